use palmdb::category::{CategoryBlock, CategorySlot};
use palmdb::codec::{AppInfo, DbCodec, Payload};
use palmdb::database::{Database, DbError, Entries, Record, Resource};
use palmdb::datebook::{Event, EventDate, Repeat, RepeatKind};
use palmdb::header::Tag;
use palmdb::index::RecordAttributes;
use palmdb::memo::{Memo, MemoCodec};
use palmdb::registry::{CodecRegistry, DbKind, Pattern};
use palmdb::RawCodec;
use proptest::prelude::*;
use std::sync::Arc;
use tempfile::NamedTempFile;

fn memo_record(id: u32, category: u8, text: &str) -> Record {
    Record {
        attributes: RecordAttributes::default(),
        category,
        id,
        payload: Payload::Memo(Memo {
            text: text.to_string(),
        }),
    }
}

#[test]
fn memo_database_roundtrip_on_disk() {
    let temp_file = NamedTempFile::new().unwrap();
    let registry = CodecRegistry::with_builtins();

    let mut categories = CategoryBlock::default();
    categories.slots[0] = CategorySlot {
        name: "Unfiled".to_string(),
        id: 0,
        renamed: false,
    };
    categories.add_category("Shopping", None, true).unwrap();

    {
        let mut db = Database::new("MemoDB", Tag(*b"memo"), Tag(*b"DATA"), Arc::new(MemoCodec));
        db.app_info = Some(AppInfo::Categories(categories.clone()));
        db.reserved = [0xAB, 0xCD];
        db.entries = Entries::Records(vec![
            memo_record(1, 0, "first memo"),
            memo_record(2, 1, "second memo\nwith a second line"),
        ]);
        db.save(temp_file.path()).unwrap();
    }

    {
        let db = Database::open(temp_file.path(), &registry).unwrap();
        assert_eq!(db.name, "MemoDB");
        assert_eq!(db.codec().name(), "memo");
        assert_eq!(db.reserved, [0xAB, 0xCD]);
        assert_eq!(db.app_info, Some(AppInfo::Categories(categories)));
        match &db.entries {
            Entries::Records(records) => {
                assert_eq!(records.len(), 2);
                assert_eq!(records[0], memo_record(1, 0, "first memo"));
                assert_eq!(
                    records[1],
                    memo_record(2, 1, "second memo\nwith a second line")
                );
            }
            Entries::Resources(_) => panic!("expected a record database"),
        }
    }
}

#[test]
fn datebook_database_roundtrip() {
    let registry = CodecRegistry::with_builtins();

    let mut event = Event::on(EventDate::new(2024, 3, 15));
    event.repeat = Some(Repeat {
        kind: RepeatKind::Weekly {
            days: [false, true, false, false, false, true, false],
            start_of_week: 0,
        },
        frequency: 2,
        end: None,
        unknown: 0,
    });
    event.description = Some("gym".to_string());

    let mut db = Database::new(
        "DatebookDB",
        Tag(*b"date"),
        Tag(*b"DATA"),
        Arc::new(palmdb::datebook::DatebookCodec),
    );
    db.entries = Entries::Records(vec![Record {
        attributes: RecordAttributes {
            dirty: true,
            ..RecordAttributes::default()
        },
        category: 2,
        id: 0x42,
        payload: Payload::Event(event.clone()),
    }]);

    let image = db.to_vec().unwrap();
    let reread = Database::from_bytes(&image, &registry, None).unwrap();
    match &reread.entries {
        Entries::Records(records) => {
            assert_eq!(records[0].payload, Payload::Event(event));
            assert!(records[0].attributes.dirty);
            assert_eq!(records[0].category, 2);
        }
        Entries::Resources(_) => panic!("expected a record database"),
    }
}

#[test]
fn resource_database_roundtrip() {
    let registry = CodecRegistry::with_builtins();

    let mut db = Database::new_resource("Viewer", Tag(*b"view"), Tag(*b"appl"), Arc::new(RawCodec));
    db.entries = Entries::Resources(vec![
        Resource {
            type_code: Tag(*b"code"),
            id: 0,
            payload: Payload::Raw(vec![0x01, 0x02, 0x03]),
        },
        Resource {
            type_code: Tag(*b"tSTR"),
            id: 1000,
            payload: Payload::Raw(b"hello".to_vec()),
        },
    ]);

    let image = db.to_vec().unwrap();
    let reread = Database::from_bytes(&image, &registry, None).unwrap();
    assert!(reread.attributes.resource);
    assert_eq!(reread.entries, db.entries);
}

// ── Registry resolution order ────────────────────────────────────────────────

struct NamedCodec(&'static str);

impl DbCodec for NamedCodec {
    fn name(&self) -> &'static str {
        self.0
    }
}

#[test]
fn registry_prefers_most_specific_pattern() {
    let creator = Tag(*b"TEST");
    let type_code = Tag(*b"DATA");

    let mut registry = CodecRegistry::new();
    registry.register(
        DbKind::Records,
        Arc::new(NamedCodec("exact")),
        &[Pattern::exact(creator, type_code)],
    );
    registry.register(
        DbKind::Records,
        Arc::new(NamedCodec("any-creator")),
        &[Pattern::any_creator(type_code)],
    );
    registry.register(
        DbKind::Records,
        Arc::new(NamedCodec("any-type")),
        &[Pattern::any_type(creator)],
    );
    registry.register(DbKind::Records, Arc::new(NamedCodec("wildcard")), &[Pattern::ANY]);

    let resolve = |c: &[u8; 4], t: &[u8; 4]| {
        registry
            .resolve(Tag(*c), Tag(*t), DbKind::Records)
            .unwrap()
            .name()
    };
    assert_eq!(resolve(b"TEST", b"DATA"), "exact");
    assert_eq!(resolve(b"ABCD", b"DATA"), "any-creator");
    assert_eq!(resolve(b"TEST", b"FOOB"), "any-type");
    assert_eq!(resolve(b"ABCD", b"FOOB"), "wildcard");
}

// ── Offset inference and verification ────────────────────────────────────────

#[test]
fn app_info_length_inferred_from_first_record() {
    let registry = CodecRegistry::with_builtins();

    let mut db = Database::new("RawDB", Tag(*b"ZZZZ"), Tag(*b"ZZZZ"), Arc::new(RawCodec));
    db.app_info = Some(AppInfo::Raw(vec![0xAA; 40]));
    db.entries = Entries::Records(vec![Record {
        attributes: RecordAttributes::default(),
        category: 0,
        id: 1,
        payload: Payload::Raw(vec![0xBB; 10]),
    }]);

    let image = db.to_vec().unwrap();
    // Header (72) + index header (6) + one 8-byte entry + 2 reserved bytes.
    assert_eq!(u32::from_be_bytes(image[52..56].try_into().unwrap()), 88);
    // Sort offset stays zero; the AppInfo length comes from the first record
    // offset (128), giving exactly 40 bytes.
    assert_eq!(u32::from_be_bytes(image[56..60].try_into().unwrap()), 0);

    let reread = Database::from_bytes(&image, &registry, None).unwrap();
    assert_eq!(reread.app_info, Some(AppInfo::Raw(vec![0xAA; 40])));
}

#[test]
fn sort_block_sits_between_app_info_and_records() {
    let registry = CodecRegistry::with_builtins();

    let mut db = Database::new("SortedDB", Tag(*b"ZZZZ"), Tag(*b"ZZZZ"), Arc::new(RawCodec));
    db.app_info = Some(AppInfo::Raw(vec![0x11; 16]));
    db.sort_block = Some(vec![0x22; 12]);
    db.entries = Entries::Records(vec![Record {
        attributes: RecordAttributes::default(),
        category: 0,
        id: 1,
        payload: Payload::Raw(vec![0x33; 4]),
    }]);

    let image = db.to_vec().unwrap();
    assert_eq!(u32::from_be_bytes(image[52..56].try_into().unwrap()), 88);
    assert_eq!(u32::from_be_bytes(image[56..60].try_into().unwrap()), 104);

    let reread = Database::from_bytes(&image, &registry, None).unwrap();
    assert_eq!(reread.app_info, Some(AppInfo::Raw(vec![0x11; 16])));
    assert_eq!(reread.sort_block, Some(vec![0x22; 12]));
}

#[test]
fn wrong_app_info_offset_is_fatal() {
    let registry = CodecRegistry::with_builtins();

    let mut db = Database::new("BadDB", Tag(*b"ZZZZ"), Tag(*b"ZZZZ"), Arc::new(RawCodec));
    db.app_info = Some(AppInfo::Raw(vec![0xAA; 8]));
    let mut image = db.to_vec().unwrap();
    // Declare the AppInfo block at 60, inside the header.
    image[52..56].copy_from_slice(&60u32.to_be_bytes());

    match Database::from_bytes(&image, &registry, None) {
        Err(DbError::OffsetMismatch { what, expected, actual }) => {
            assert_eq!(what, "AppInfo block");
            assert_eq!(expected, 60);
            assert_eq!(actual, 80);
        }
        other => panic!("expected an offset mismatch, got {other:?}"),
    }
}

#[test]
fn record_offsets_out_of_order_are_fatal() {
    let registry = CodecRegistry::with_builtins();

    let mut db = Database::new("BadDB", Tag(*b"ZZZZ"), Tag(*b"ZZZZ"), Arc::new(RawCodec));
    db.entries = Entries::Records(vec![
        Record {
            attributes: RecordAttributes::default(),
            category: 0,
            id: 1,
            payload: Payload::Raw(vec![0x01; 4]),
        },
        Record {
            attributes: RecordAttributes::default(),
            category: 0,
            id: 2,
            payload: Payload::Raw(vec![0x02; 4]),
        },
    ]);
    let mut image = db.to_vec().unwrap();
    // The first index entry sits at 78; its offset field must match the
    // position reached after the reserved bytes (96 here).
    image[78..82].copy_from_slice(&95u32.to_be_bytes());

    assert!(matches!(
        Database::from_bytes(&image, &registry, None),
        Err(DbError::OffsetMismatch { what: "record", expected: 95, actual: 96 })
    ));
}

// ── Unknown formats ──────────────────────────────────────────────────────────

#[test]
fn unresolved_format_fails_without_a_fallback() {
    let db = Database::new("Mystery", Tag(*b"wxyz"), Tag(*b"wxyz"), Arc::new(RawCodec));
    let image = db.to_vec().unwrap();

    let empty = CodecRegistry::new();
    match Database::from_bytes(&image, &empty, None) {
        Err(DbError::UnknownFormat { creator, type_code }) => {
            assert_eq!(creator, Tag(*b"wxyz"));
            assert_eq!(type_code, Tag(*b"wxyz"));
        }
        other => panic!("expected UnknownFormat, got {other:?}"),
    }

    let reread = Database::from_bytes(&image, &empty, Some(Arc::new(RawCodec))).unwrap();
    assert_eq!(reread.codec().name(), "raw");
    assert_eq!(reread.name, "Mystery");
}

// ── Generative round trip ────────────────────────────────────────────────────

fn arb_record() -> impl Strategy<Value = Record> {
    (
        any::<(bool, bool, bool, bool)>(),
        any::<bool>(),
        0u8..16,
        0u32..0x0100_0000,
        "[a-zA-Z0-9 .,!?]{0,40}",
    )
        .prop_map(|((expunged, dirty, deleted, private), archived, category, id, text)| {
            let dead = expunged || deleted;
            Record {
                attributes: RecordAttributes {
                    expunged,
                    dirty,
                    deleted,
                    private,
                    // The archive bit only exists for dead records.
                    archived: dead && archived,
                },
                // The category nibble only exists for live records.
                category: if dead { 0 } else { category },
                id,
                payload: Payload::Memo(Memo { text }),
            }
        })
}

proptest! {
    #[test]
    fn write_then_load_reproduces_the_database(
        name in "[a-zA-Z][a-zA-Z0-9 ]{0,30}",
        version in any::<u16>(),
        created in 0i64..2_000_000_000,
        modified in 0i64..2_000_000_000,
        modification_number in any::<u32>(),
        unique_id_seed in any::<u32>(),
        reserved in any::<[u8; 2]>(),
        records in proptest::collection::vec(arb_record(), 0..12),
    ) {
        let registry = CodecRegistry::with_builtins();
        let mut db = Database::new(&name, Tag(*b"memo"), Tag(*b"DATA"), Arc::new(MemoCodec));
        db.version = version;
        db.created = created;
        db.modified = modified;
        db.modification_number = modification_number;
        db.unique_id_seed = unique_id_seed;
        db.reserved = reserved;
        db.entries = Entries::Records(records);

        let image = db.to_vec().unwrap();
        let reread = Database::from_bytes(&image, &registry, None).unwrap();

        prop_assert_eq!(&reread.name, &db.name);
        prop_assert_eq!(reread.attributes, db.attributes);
        prop_assert_eq!(reread.version, db.version);
        prop_assert_eq!(reread.created, db.created);
        prop_assert_eq!(reread.modified, db.modified);
        prop_assert_eq!(reread.modification_number, db.modification_number);
        prop_assert_eq!(reread.unique_id_seed, db.unique_id_seed);
        prop_assert_eq!(reread.reserved, db.reserved);
        prop_assert_eq!(&reread.entries, &db.entries);

        // A second pass over the reloaded value yields the same image.
        prop_assert_eq!(reread.to_vec().unwrap(), image);
    }
}
