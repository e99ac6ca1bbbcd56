//! Container engine: offset-verified load, offset-computing write.
//!
//! # Load
//! One sequential forward pass: fixed header, entry index, two reserved
//! bytes, then the AppInfo block, the sort block and every payload in file
//! order.  Block lengths are never stored on disk; each is inferred from
//! the next known offset (or the end of the file).  Before every block the
//! engine checks that the running position matches the offset the file
//! declared; any mismatch is fatal, with no resynchronization attempted.
//!
//! # Write
//! The inverse pipeline.  Every block is packed first, offsets are computed
//! from the accumulated sizes, and the image is emitted in a single pass:
//! header, index, reserved bytes, AppInfo, sort block, payloads.
//!
//! The handler driving block and payload parsing is resolved once, from the
//! registry, when the database is loaded or constructed, and stays bound
//! for the lifetime of the value.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::Utc;
use serde::Serialize;
use std::fmt;
use std::fs::File;
use std::io::{self, Cursor, Read, Write};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::codec::{AppInfo, CodecError, DbCodec, Payload, RecordInfo, ResourceInfo};
use crate::header::{DatabaseHeader, DbAttributes, HeaderError, Tag, HEADER_SIZE};
use crate::index::{
    RecordAttributes, RecordIndexEntry, ResourceIndexEntry, INDEX_HEADER_SIZE, RECORD_ENTRY_SIZE,
    RESOURCE_ENTRY_SIZE,
};
use crate::registry::{CodecRegistry, DbKind};

/// The two bytes between the index and the first data block.
const RESERVED_LEN: usize = 2;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Header error: {0}")]
    Header(#[from] HeaderError),
    #[error("Structural corruption: {what} declared at offset {expected}, file position is {actual}")]
    OffsetMismatch {
        what: &'static str,
        expected: u64,
        actual: u64,
    },
    #[error("Structural corruption: {what} spans {start}..{end} in a {size}-byte file")]
    BadBlockRange {
        what: &'static str,
        start: u64,
        end: u64,
        size: u64,
    },
    #[error("No handler registered for creator '{creator}' / type '{type_code}'")]
    UnknownFormat { creator: Tag, type_code: Tag },
    #[error("Handler error: {0}")]
    Codec(#[from] CodecError),
    #[error("Too many entries for the index: {0} (maximum 65535)")]
    TooManyEntries(usize),
    #[error("Database image exceeds the 4 GiB offset space ({0} bytes)")]
    TooLarge(u64),
}

// ── Entries ──────────────────────────────────────────────────────────────────

/// A data-database record: index metadata plus the parsed payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub attributes: RecordAttributes,
    /// Category slot 0-15.  Meaningful only while the record is alive.
    pub category: u8,
    /// 24-bit unique record id.
    pub id: u32,
    pub payload: Payload,
}

/// A resource-database entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resource {
    pub type_code: Tag,
    pub id: u16,
    pub payload: Payload,
}

/// Entry sequence, in file order.  The variant is fixed by the header
/// resource bit; file order is the contract for offset inference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Entries {
    Records(Vec<Record>),
    Resources(Vec<Resource>),
}

impl Entries {
    pub fn len(&self) -> usize {
        match self {
            Entries::Records(records) => records.len(),
            Entries::Resources(resources) => resources.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> DbKind {
        match self {
            Entries::Records(_) => DbKind::Records,
            Entries::Resources(_) => DbKind::Resources,
        }
    }
}

// ── Database ─────────────────────────────────────────────────────────────────

/// An in-memory database: header fields, optional AppInfo and sort blocks,
/// and the entry sequence, with the format handler bound at load time.
///
/// Timestamps are Unix-epoch seconds (converted from the on-disk 1904-based
/// counts).  `reserved` is kept verbatim for round-trip fidelity.
#[derive(Clone)]
pub struct Database {
    pub name: String,
    pub attributes: DbAttributes,
    pub version: u16,
    pub created: i64,
    pub modified: i64,
    pub backed_up: i64,
    pub modification_number: u32,
    pub type_code: Tag,
    pub creator: Tag,
    pub unique_id_seed: u32,
    pub reserved: [u8; RESERVED_LEN],
    pub app_info: Option<AppInfo>,
    pub sort_block: Option<Vec<u8>>,
    pub entries: Entries,
    codec: Arc<dyn DbCodec>,
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name)
            .field("creator", &self.creator)
            .field("type_code", &self.type_code)
            .field("codec", &self.codec.name())
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl Database {
    // ── Constructors ─────────────────────────────────────────────────────────

    /// Empty record-mode database stamped with the current time.
    pub fn new(name: &str, creator: Tag, type_code: Tag, codec: Arc<dyn DbCodec>) -> Self {
        Self::empty(name, creator, type_code, codec, Entries::Records(Vec::new()))
    }

    /// Empty resource-mode database stamped with the current time.
    pub fn new_resource(name: &str, creator: Tag, type_code: Tag, codec: Arc<dyn DbCodec>) -> Self {
        Self::empty(
            name,
            creator,
            type_code,
            codec,
            Entries::Resources(Vec::new()),
        )
    }

    fn empty(
        name: &str,
        creator: Tag,
        type_code: Tag,
        codec: Arc<dyn DbCodec>,
        entries: Entries,
    ) -> Self {
        let now = Utc::now().timestamp();
        Database {
            name: name.to_owned(),
            attributes: DbAttributes {
                resource: matches!(entries, Entries::Resources(_)),
                ..DbAttributes::default()
            },
            version: 0,
            created: now,
            modified: now,
            backed_up: now,
            modification_number: 0,
            type_code,
            creator,
            unique_id_seed: 0,
            reserved: [0; RESERVED_LEN],
            app_info: None,
            sort_block: None,
            entries,
            codec,
        }
    }

    /// The handler bound at load or construction time.
    pub fn codec(&self) -> &Arc<dyn DbCodec> {
        &self.codec
    }

    // ── Load ─────────────────────────────────────────────────────────────────

    pub fn open<P: AsRef<Path>>(path: P, registry: &CodecRegistry) -> Result<Self, DbError> {
        Self::load(File::open(path)?, registry)
    }

    /// Read an entire database from `source`, resolving the handler from
    /// `registry` by (creator, type, mode).
    pub fn load<R: Read>(source: R, registry: &CodecRegistry) -> Result<Self, DbError> {
        Self::load_with_fallback(source, registry, None)
    }

    /// Like [`Database::load`], but falls back to `fallback` when the
    /// registry has no matching pattern instead of failing with
    /// [`DbError::UnknownFormat`].
    pub fn load_with_fallback<R: Read>(
        mut source: R,
        registry: &CodecRegistry,
        fallback: Option<Arc<dyn DbCodec>>,
    ) -> Result<Self, DbError> {
        let mut data = Vec::new();
        source.read_to_end(&mut data)?;
        Self::from_bytes(&data, registry, fallback)
    }

    /// Parse a complete database image.
    pub fn from_bytes(
        data: &[u8],
        registry: &CodecRegistry,
        fallback: Option<Arc<dyn DbCodec>>,
    ) -> Result<Self, DbError> {
        let file_size = data.len() as u64;
        let mut cursor = Cursor::new(data);

        let header = DatabaseHeader::read(&mut cursor)?;
        let kind = if header.attributes.resource {
            DbKind::Resources
        } else {
            DbKind::Records
        };
        let codec = registry
            .resolve(header.creator, header.type_code, kind)
            .or(fallback)
            .ok_or(DbError::UnknownFormat {
                creator: header.creator,
                type_code: header.type_code,
            })?;

        // Index header: 4 reserved bytes, then the entry count.
        let mut skipped = [0u8; 4];
        cursor.read_exact(&mut skipped)?;
        let count = cursor.read_u16::<BigEndian>()? as usize;

        let mut record_index = Vec::new();
        let mut resource_index = Vec::new();
        match kind {
            DbKind::Records => {
                record_index.reserve(count);
                for _ in 0..count {
                    record_index.push(RecordIndexEntry::read(&mut cursor)?);
                }
            }
            DbKind::Resources => {
                resource_index.reserve(count);
                for _ in 0..count {
                    resource_index.push(ResourceIndexEntry::read(&mut cursor)?);
                }
            }
        }
        let first_entry_offset = match kind {
            DbKind::Records => record_index.first().map(|e| e.offset),
            DbKind::Resources => resource_index.first().map(|e| e.offset),
        };

        let mut reserved = [0u8; RESERVED_LEN];
        cursor.read_exact(&mut reserved)?;

        let app_info = if header.app_info_offset != 0 {
            expect_position(&cursor, u64::from(header.app_info_offset), "AppInfo block")?;
            let end = if header.sort_offset != 0 {
                u64::from(header.sort_offset)
            } else {
                first_entry_offset.map_or(file_size, u64::from)
            };
            let bytes = take_block(data, &mut cursor, end, "AppInfo block")?;
            Some(codec.parse_app_info(bytes)?)
        } else {
            None
        };

        let sort_block = if header.sort_offset != 0 {
            expect_position(&cursor, u64::from(header.sort_offset), "sort block")?;
            let end = first_entry_offset.map_or(file_size, u64::from);
            let bytes = take_block(data, &mut cursor, end, "sort block")?;
            Some(codec.parse_sort_block(bytes)?)
        } else {
            None
        };

        let entries = match kind {
            DbKind::Records => {
                let mut records = Vec::with_capacity(count);
                for (i, entry) in record_index.iter().enumerate() {
                    expect_position(&cursor, u64::from(entry.offset), "record")?;
                    let end = record_index
                        .get(i + 1)
                        .map_or(file_size, |next| u64::from(next.offset));
                    let bytes = take_block(data, &mut cursor, end, "record")?;
                    let info = RecordInfo {
                        attributes: entry.attributes,
                        category: entry.category,
                        id: entry.id,
                        offset: entry.offset,
                    };
                    records.push(Record {
                        attributes: entry.attributes,
                        category: entry.category,
                        id: entry.id,
                        payload: codec.parse_record(&info, bytes)?,
                    });
                }
                Entries::Records(records)
            }
            DbKind::Resources => {
                let mut resources = Vec::with_capacity(count);
                for (i, entry) in resource_index.iter().enumerate() {
                    expect_position(&cursor, u64::from(entry.offset), "resource")?;
                    let end = resource_index
                        .get(i + 1)
                        .map_or(file_size, |next| u64::from(next.offset));
                    let bytes = take_block(data, &mut cursor, end, "resource")?;
                    let info = ResourceInfo {
                        type_code: entry.type_code,
                        id: entry.id,
                        offset: entry.offset,
                    };
                    resources.push(Resource {
                        type_code: entry.type_code,
                        id: entry.id,
                        payload: codec.parse_resource(&info, bytes)?,
                    });
                }
                Entries::Resources(resources)
            }
        };

        Ok(Database {
            name: header.name,
            attributes: header.attributes,
            version: header.version,
            created: header.created,
            modified: header.modified,
            backed_up: header.backed_up,
            modification_number: header.modification_number,
            type_code: header.type_code,
            creator: header.creator,
            unique_id_seed: header.unique_id_seed,
            reserved,
            app_info,
            sort_block,
            entries,
            codec,
        })
    }

    // ── Write ────────────────────────────────────────────────────────────────

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DbError> {
        self.write(File::create(path)?)
    }

    /// Serialize the whole database into `sink` in one forward pass.
    pub fn write<W: Write>(&self, mut sink: W) -> Result<(), DbError> {
        sink.write_all(&self.to_vec()?)?;
        Ok(())
    }

    /// Build the complete on-disk image.
    pub fn to_vec(&self) -> Result<Vec<u8>, DbError> {
        let app_info_bytes = match &self.app_info {
            Some(value) => self.codec.pack_app_info(value)?,
            None => Vec::new(),
        };
        let sort_bytes = match &self.sort_block {
            Some(value) => self.codec.pack_sort_block(value)?,
            None => Vec::new(),
        };
        let payloads: Vec<Vec<u8>> = match &self.entries {
            Entries::Records(records) => records
                .iter()
                .map(|r| self.codec.pack_record(&r.payload))
                .collect::<Result<_, _>>()?,
            Entries::Resources(resources) => resources
                .iter()
                .map(|r| self.codec.pack_resource(&r.payload))
                .collect::<Result<_, _>>()?,
        };

        let count = payloads.len();
        if count > u16::MAX as usize {
            return Err(DbError::TooManyEntries(count));
        }
        let entry_size = match self.entries {
            Entries::Records(_) => RECORD_ENTRY_SIZE,
            Entries::Resources(_) => RESOURCE_ENTRY_SIZE,
        };
        let blocks_start = (HEADER_SIZE + INDEX_HEADER_SIZE + count * entry_size + RESERVED_LEN) as u64;

        let app_info_offset = if app_info_bytes.is_empty() {
            0
        } else {
            blocks_start
        };
        let sort_offset = if sort_bytes.is_empty() {
            0
        } else {
            blocks_start + app_info_bytes.len() as u64
        };
        let mut next_offset = blocks_start + app_info_bytes.len() as u64 + sort_bytes.len() as u64;
        let total = next_offset + payloads.iter().map(|p| p.len() as u64).sum::<u64>();
        if total > u64::from(u32::MAX) {
            return Err(DbError::TooLarge(total));
        }

        let header = DatabaseHeader {
            name: self.name.clone(),
            // The resource bit always reflects the entry mode.
            attributes: DbAttributes {
                resource: matches!(self.entries, Entries::Resources(_)),
                ..self.attributes
            },
            version: self.version,
            created: self.created,
            modified: self.modified,
            backed_up: self.backed_up,
            modification_number: self.modification_number,
            app_info_offset: app_info_offset as u32,
            sort_offset: sort_offset as u32,
            type_code: self.type_code,
            creator: self.creator,
            unique_id_seed: self.unique_id_seed,
        };

        let mut out = Vec::with_capacity(total as usize);
        header.write(&mut out)?;
        out.extend_from_slice(&[0u8; 4]);
        out.write_u16::<BigEndian>(count as u16)?;
        match &self.entries {
            Entries::Records(records) => {
                for (record, payload) in records.iter().zip(&payloads) {
                    RecordIndexEntry {
                        offset: next_offset as u32,
                        attributes: record.attributes,
                        category: record.category,
                        id: record.id,
                    }
                    .write(&mut out)?;
                    next_offset += payload.len() as u64;
                }
            }
            Entries::Resources(resources) => {
                for (resource, payload) in resources.iter().zip(&payloads) {
                    ResourceIndexEntry {
                        offset: next_offset as u32,
                        type_code: resource.type_code,
                        id: resource.id,
                    }
                    .write(&mut out)?;
                    next_offset += payload.len() as u64;
                }
            }
        }
        out.extend_from_slice(&self.reserved);
        out.extend_from_slice(&app_info_bytes);
        out.extend_from_slice(&sort_bytes);
        for payload in &payloads {
            out.extend_from_slice(payload);
        }
        Ok(out)
    }
}

// ── Load helpers ─────────────────────────────────────────────────────────────

fn expect_position(cursor: &Cursor<&[u8]>, expected: u64, what: &'static str) -> Result<(), DbError> {
    let actual = cursor.position();
    if actual != expected {
        return Err(DbError::OffsetMismatch {
            what,
            expected,
            actual,
        });
    }
    Ok(())
}

/// Slice `[position, end)` out of `data` and advance the cursor past it.
fn take_block<'a>(
    data: &'a [u8],
    cursor: &mut Cursor<&'a [u8]>,
    end: u64,
    what: &'static str,
) -> Result<&'a [u8], DbError> {
    let start = cursor.position();
    if end < start || end > data.len() as u64 {
        return Err(DbError::BadBlockRange {
            what,
            start,
            end,
            size: data.len() as u64,
        });
    }
    cursor.set_position(end);
    Ok(&data[start as usize..end as usize])
}
