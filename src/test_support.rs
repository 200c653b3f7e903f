//! Builders for synthetic changeset feeds used across the test modules.

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use std::io::Cursor;

pub mod prelude {
    pub(crate) use super::proptest as proptest_support;
    pub(crate) use super::{dummy_changeset, expected_match, feed_to_xml, TestChangeset};
    pub(crate) use proptest::prelude::*;
}

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Changeset as written into a test feed.
#[derive(Debug, Clone)]
pub struct TestChangeset {
    pub id: i64,
    pub user: Option<String>,
    pub created_at: String,
    pub changes_count: Option<i64>,
    pub comment: Option<String>,
    pub hashtags: Option<String>,
}

pub fn dummy_changeset() -> TestChangeset {
    TestChangeset {
        id: 1,
        user: Some("Dummy".into()),
        created_at: "2025-06-01T12:00:00Z".into(),
        changes_count: Some(1),
        comment: Some("Quick mapping #qmp".into()),
        hashtags: None,
    }
}

/// What the extractor should decide for `changeset`, computed independently of the filter code.
pub fn expected_match(changeset: &TestChangeset, since: DateTime<Utc>) -> bool {
    let recent = DateTime::parse_from_rfc3339(&changeset.created_at)
        .map(|created_at| created_at >= since)
        .unwrap_or(false);
    let tagged = [&changeset.comment, &changeset.hashtags].iter().any(|tag| {
        tag.as_deref()
            .unwrap_or("")
            .to_lowercase()
            .contains("#qmp")
    });

    recent && tagged
}

pub fn feed_to_xml(changesets: &[TestChangeset]) -> String {
    let mut xml = Vec::new();
    let mut writer = quick_xml::Writer::new_with_indent(Cursor::new(&mut xml), b' ', 1);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .unwrap();
    writer
        .write_event(Event::Start(
            BytesStart::new("osm").with_attributes([("version", "0.6")]),
        ))
        .unwrap();

    for changeset in changesets {
        let id = changeset.id.to_string();
        let changes_count = changeset.changes_count.map(|count| count.to_string());

        let mut attributes = vec![
            ("id", id.as_str()),
            ("created_at", changeset.created_at.as_str()),
            ("open", "false"),
        ];
        if let Some(user) = &changeset.user {
            attributes.push(("user", user.as_str()));
        }
        if let Some(changes_count) = &changes_count {
            attributes.push(("changes_count", changes_count.as_str()));
        }
        let start = BytesStart::new("changeset").with_attributes(attributes);

        let tags: Vec<_> = [("comment", &changeset.comment), ("hashtags", &changeset.hashtags)]
            .into_iter()
            .filter_map(|(key, value)| value.as_deref().map(|value| (key, value)))
            .collect();

        if tags.is_empty() {
            writer.write_event(Event::Empty(start)).unwrap();
            continue;
        }

        writer.write_event(Event::Start(start)).unwrap();
        for (key, value) in tags {
            writer
                .write_event(Event::Empty(
                    BytesStart::new("tag").with_attributes([("k", key), ("v", value)]),
                ))
                .unwrap();
        }
        writer
            .write_event(Event::End(BytesEnd::new("changeset")))
            .unwrap();
    }

    writer.write_event(Event::End(BytesEnd::new("osm"))).unwrap();

    String::from_utf8(xml).unwrap()
}

pub mod proptest {
    use chrono::{Duration, TimeZone, Utc};
    use proptest::prelude::*;
    use proptest::strategy::Strategy;

    use super::{TestChangeset, TIMESTAMP_FORMAT};

    /// Timestamps within a few days around the default cutoff, hitting the boundary itself often.
    pub fn created_at() -> impl Strategy<Value = String> {
        let cutoff = Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap();
        prop_oneof![
            1 => Just(0i64),
            1 => Just(-1i64),
            6 => -259_200i64..259_200i64,
        ]
        .prop_map(move |offset| {
            (cutoff + Duration::seconds(offset))
                .format(TIMESTAMP_FORMAT)
                .to_string()
        })
    }

    /// Free text that sometimes contains the marker in some spelling.
    pub fn maybe_tag_text() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            3 => Just(None),
            3 => "[a-z #;<>&\"]{0,16}".prop_map(Some),
            2 => ("[a-z ]{0,8}", prop::sample::select(vec!["#qmp", "#QMP", "#Qmp", "#qMp"]), "[a-z ;#]{0,8}")
                .prop_map(|(prefix, marker, suffix)| Some(format!("{prefix}{marker}{suffix}"))),
            1 => Just(Some("qmp #qm p #q mp".to_string())),
        ]
    }

    pub fn maybe_user() -> impl Strategy<Value = Option<String>> {
        prop_oneof![
            1 => Just(None),
            6 => prop::sample::select(vec!["alice", "bob", "carol", "山田", "d|ve"])
                .prop_map(|user| Some(user.to_string())),
        ]
    }

    prop_compose! {
        pub fn changeset(id: i64)
                (user in maybe_user(),
                 created_at in created_at(),
                 changes_count in proptest::option::weighted(0.9, 0i64..5000),
                 comment in maybe_tag_text(),
                 hashtags in maybe_tag_text())
        -> TestChangeset {
            TestChangeset { id, user, created_at, changes_count, comment, hashtags }
        }
    }

    pub fn changeset_feed(max_changesets: i64) -> impl Strategy<Value = Vec<TestChangeset>> {
        (0..max_changesets).prop_flat_map(|num_changesets| {
            (0..num_changesets)
                .map(|i| changeset(i + 1)) /* ids must be unique */
                .collect::<Vec<_>>()
        })
    }
}
