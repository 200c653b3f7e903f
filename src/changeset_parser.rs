use std::{any::type_name_of_val, fmt::Debug, io::BufRead};

use compact_str::CompactString;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use rustc_hash::FxHashMap;

/// Name of the element the sub-records are wrapped in by default.
pub const DEFAULT_RECORD_ELEMENT: &str = "changeset";

// the only child element of a changeset we take values from
const TAG_ELEMENT: &[u8] = b"tag";

// elements on the path from the record element down to the current position
// we don't track anything outside of a record, the root element may never be closed
#[derive(PartialEq, Eq)]
enum Element {
    Record,               // <changeset id="..." user="..." created_at="..." ...>
    Tag,                  // <tag k="comment" v="..."/>
    Other(CompactString), // <discussion>, <comment>, <text>, ...
}

impl Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Element::Record => write!(f, "<record>"),
            Element::Tag => write!(f, "<tag>"),
            Element::Other(name) => write!(f, "<{}>", name),
        }
    }
}

impl Element {
    fn matches_end_bytes(&self, e: &BytesEnd, record_element: &str) -> bool {
        match self {
            Element::Record => e.name().as_ref() == record_element.as_bytes(),
            Element::Tag => e.name().as_ref() == TAG_ELEMENT,
            Element::Other(name) => e.name().as_ref() == name.as_bytes(),
        }
    }
}

/// One sub-record as it appears in the feed: the attributes of the record element and the
/// `k`/`v` pairs of its direct `<tag>` children.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawChangeset {
    pub attributes: FxHashMap<CompactString, String>,
    // a tag without `v` is kept with `None`
    pub tags: FxHashMap<String, Option<String>>,
}

impl RawChangeset {
    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).and_then(Option::as_deref)
    }
}

#[derive(Debug, Default)]
struct ChangesetBuilder {
    changeset: RawChangeset,
    // first problem found while reading the record, the record is dropped if set
    defect: Option<String>,
}

impl ChangesetBuilder {
    fn from_start_bytes(e: &BytesStart) -> Self {
        let mut builder = Self::default();

        for attr in e.attributes() {
            let attr = match attr {
                Ok(attr) => attr,
                Err(error) => {
                    builder.mark_defect(format!("malformed attribute: {error}"));
                    break;
                }
            };

            let key = CompactString::from(String::from_utf8_lossy(attr.key.as_ref()));
            match attr.unescape_value() {
                Ok(value) => {
                    builder.changeset.attributes.insert(key, value.into_owned());
                }
                Err(error) => {
                    builder.mark_defect(format!("malformed value of attribute `{key}`: {error}"));
                    break;
                }
            }
        }

        builder
    }

    fn add_tag(&mut self, e: &BytesStart) {
        let mut key = None;
        let mut value = None;

        for attr in e.attributes() {
            let attr = match attr {
                Ok(attr) => attr,
                Err(error) => {
                    self.mark_defect(format!("malformed tag attribute: {error}"));
                    return;
                }
            };

            let slot = match attr.key.as_ref() {
                b"k" => &mut key,
                b"v" => &mut value,
                _ => continue,
            };
            match attr.unescape_value() {
                Ok(text) => *slot = Some(text.into_owned()),
                Err(error) => {
                    self.mark_defect(format!("malformed tag attribute: {error}"));
                    return;
                }
            }
        }

        if let Some(key) = key {
            self.changeset.tags.insert(key, value);
        }
    }

    fn mark_defect(&mut self, reason: String) {
        if self.defect.is_none() {
            self.defect = Some(reason);
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParsingError {
    #[error("XML error")]
    XmlError(#[from] quick_xml::Error),
    #[error("malformed record at byte {position}: {reason}")]
    MalformedRecord { position: u64, reason: String },
}

/// Forward-only reader over a feed of sub-record elements.
///
/// The whole feed is never held in memory: quick-xml hands out one event at a time and only the
/// record currently being read is kept around.
pub struct ChangesetParser<R: BufRead> {
    xml_parser: quick_xml::Reader<R>,
    buf: Vec<u8>,
    record_element: CompactString,
    current_path: Vec<Element>,
    skipped: u64,
}

impl<R: BufRead> Debug for ChangesetParser<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangesetParser")
            .field("xml_parser", &type_name_of_val(&self.xml_parser))
            // print buffer length and capacity
            .field("buf.len", &self.buf.len())
            .field("buf.capacity", &self.buf.capacity())
            .field("record_element", &self.record_element)
            .field("current_path", &self.current_path)
            .field("skipped", &self.skipped)
            .finish()
    }
}

impl<R: BufRead> ChangesetParser<R> {
    pub fn new(reader: R, record_element: &str) -> Self {
        let mut xml_parser = quick_xml::Reader::from_reader(reader);
        // mismatched end tags are handled per record below instead of failing the whole feed
        xml_parser.config_mut().check_end_names = false;
        // expand_empty_elements not set, take care to handle empty elements!

        Self {
            xml_parser,
            // preallocate 64 KiB for the buffer
            buf: Vec::with_capacity(64 * 1024),
            record_element: CompactString::from(record_element),
            current_path: Vec::new(),
            skipped: 0,
        }
    }

    /// Number of records dropped so far because they were malformed or truncated.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Byte offset of the reader in the input.
    pub fn position(&self) -> u64 {
        self.xml_parser.buffer_position()
    }

    /// Read up to and including the next complete record.
    ///
    /// Returns `Ok(None)` once the input is exhausted. Malformed records are skipped (and counted
    /// in [`skipped`](Self::skipped)) unless the `strict` feature is enabled.
    pub fn parse_changeset(&mut self) -> Result<Option<RawChangeset>, ParsingError> {
        let mut builder: Option<ChangesetBuilder> = None;

        loop {
            self.buf.clear();
            let position = self.xml_parser.buffer_position();

            let event = match self.xml_parser.read_event_into(&mut self.buf) {
                Ok(event) => event,
                Err(error) => {
                    // the reader could not move past the broken markup, nothing left to recover
                    if self.xml_parser.buffer_position() == position {
                        tracing::error!(message = "Aborting parsing due to error", %error, position);
                        return Err(ParsingError::XmlError(error));
                    }

                    if let Some(builder) = &mut builder {
                        builder.mark_defect(format!("XML error: {error}"));
                    } else {
                        tracing::debug!(
                            message = "Ignoring XML error outside of a record",
                            %error,
                            position
                        );
                    }
                    continue;
                }
            };

            match event {
                Event::Start(ref e) => {
                    if let Some(builder) = &mut builder {
                        let element = if self.current_path.len() == 1
                            && e.name().as_ref() == TAG_ELEMENT
                        {
                            builder.add_tag(e);
                            Element::Tag
                        } else {
                            Element::Other(CompactString::from(String::from_utf8_lossy(
                                e.name().as_ref(),
                            )))
                        };
                        self.current_path.push(element);
                    } else if e.name().as_ref() == self.record_element.as_bytes() {
                        builder = Some(ChangesetBuilder::from_start_bytes(e));
                        self.current_path.push(Element::Record);
                    }
                }
                Event::Empty(ref e) => {
                    if let Some(builder) = &mut builder {
                        if self.current_path.len() == 1 && e.name().as_ref() == TAG_ELEMENT {
                            builder.add_tag(e);
                        }
                    } else if e.name().as_ref() == self.record_element.as_bytes() {
                        // record without any tags, e.g. an empty changeset
                        let finished = ChangesetBuilder::from_start_bytes(e);
                        let position = self.xml_parser.buffer_position();
                        if let Some(changeset) =
                            Self::finish_record(finished, &mut self.skipped, position)?
                        {
                            return Ok(Some(changeset));
                        }
                    }
                }
                Event::End(ref e) => {
                    let Some(open_builder) = &mut builder else {
                        // closing tags of the container, nothing to do
                        continue;
                    };

                    if Self::check_end_tag(
                        e,
                        &mut self.current_path,
                        &self.record_element,
                        open_builder,
                    ) {
                        if let Some(finished) = builder.take() {
                            let position = self.xml_parser.buffer_position();
                            if let Some(changeset) =
                                Self::finish_record(finished, &mut self.skipped, position)?
                            {
                                return Ok(Some(changeset));
                            }
                        }
                    }
                }
                Event::Eof => {
                    if builder.is_some() {
                        tracing::warn!(
                            message = "Input ended in the middle of a record, dropping it",
                            current_path = ?self.current_path,
                            position = self.xml_parser.buffer_position()
                        );
                        self.current_path.clear();
                        self.skipped += 1;
                    }
                    return Ok(None);
                }
                _ => {}
            }
        }
    }

    // pops the path for an end tag, returns true if it closed the record
    fn check_end_tag(
        e: &BytesEnd,
        current_path: &mut Vec<Element>,
        record_element: &str,
        builder: &mut ChangesetBuilder,
    ) -> bool {
        if e.name().as_ref() == record_element.as_bytes() {
            // closing the record always ends it, even if some child was never closed
            if current_path.len() > 1 {
                builder.mark_defect(format!(
                    "record closed with unclosed children {:?}",
                    &current_path[1..]
                ));
            }
            current_path.clear();
            return true;
        }

        if current_path.len() <= 1 {
            // keep the record open, its own end tag is still to come
            builder.mark_defect(format!(
                "unexpected end tag `{}`",
                String::from_utf8_lossy(e.name().as_ref())
            ));
            return false;
        }

        if let Some(element) = current_path.pop() {
            if !element.matches_end_bytes(e, record_element) {
                builder.mark_defect(format!(
                    "mismatched tags: expected {:?}, found `{}`",
                    element,
                    String::from_utf8_lossy(e.name().as_ref())
                ));
            }
        }

        false
    }

    // unfortunately can't take `&mut self` here, the current event still borrows the buffer
    fn finish_record(
        builder: ChangesetBuilder,
        skipped: &mut u64,
        position: u64,
    ) -> Result<Option<RawChangeset>, ParsingError> {
        let Some(reason) = builder.defect else {
            return Ok(Some(builder.changeset));
        };

        if cfg!(feature = "strict") {
            tracing::error!(message = "Malformed record", %reason, position);
            return Err(ParsingError::MalformedRecord { position, reason });
        }

        tracing::debug!(
            message = "Skipping malformed record",
            %reason,
            id = builder.changeset.attribute("id"),
            position
        );
        *skipped += 1;
        Ok(None)
    }
}
