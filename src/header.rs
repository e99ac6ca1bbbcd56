//! Fixed database header: the first 72 bytes of every database file.
//!
//! All multi-byte fields are big-endian.  Timestamps are stored on disk as
//! seconds since 1904-01-01 and exposed through the API as Unix-epoch
//! seconds; the two counts differ by the fixed [`EPOCH_OFFSET`].

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Serialize, Serializer};
use std::fmt;
use std::io::{self, Read, Write};
use thiserror::Error;

/// On-disk size of the fixed header.
pub const HEADER_SIZE: usize = 72;
/// Maximum database name length, excluding the NUL terminator.
pub const NAME_MAX: usize = 31;
/// Seconds between 1904-01-01 (on-disk epoch) and 1970-01-01 (Unix epoch).
pub const EPOCH_OFFSET: i64 = 2_082_844_800;

const ATTR_RESOURCE: u16 = 0x0001;
const ATTR_READ_ONLY: u16 = 0x0002;
const ATTR_APP_INFO_DIRTY: u16 = 0x0004;
const ATTR_BACKUP: u16 = 0x0008;
const ATTR_OK_NEWER: u16 = 0x0010;
const ATTR_RESET: u16 = 0x0020;
const ATTR_OPEN: u16 = 0x0040;

#[derive(Error, Debug)]
pub enum HeaderError {
    #[error("Database name exceeds {NAME_MAX} bytes: {0:?}")]
    NameTooLong(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Four-character codes ─────────────────────────────────────────────────────

/// Four-byte creator or type code, e.g. `date` or `DATA`.
///
/// Codes are compared byte-for-byte; the [`fmt::Display`] form is for
/// diagnostics only and is never parsed back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    pub const fn new(bytes: [u8; 4]) -> Self {
        Tag(bytes)
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut bytes = [0u8; 4];
        reader.read_exact(&mut bytes)?;
        Ok(Tag(bytes))
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.0)
    }
}

impl From<&[u8; 4]> for Tag {
    fn from(bytes: &[u8; 4]) -> Self {
        Tag(*bytes)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl Serialize for Tag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

// ── Attribute flags ──────────────────────────────────────────────────────────

/// Decoded header attribute word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DbAttributes {
    pub resource: bool,
    pub read_only: bool,
    pub app_info_dirty: bool,
    pub backup: bool,
    pub ok_newer: bool,
    pub reset: bool,
    pub open: bool,
}

impl DbAttributes {
    pub fn from_bits(bits: u16) -> Self {
        DbAttributes {
            resource: bits & ATTR_RESOURCE != 0,
            read_only: bits & ATTR_READ_ONLY != 0,
            app_info_dirty: bits & ATTR_APP_INFO_DIRTY != 0,
            backup: bits & ATTR_BACKUP != 0,
            ok_newer: bits & ATTR_OK_NEWER != 0,
            reset: bits & ATTR_RESET != 0,
            open: bits & ATTR_OPEN != 0,
        }
    }

    pub fn to_bits(self) -> u16 {
        let mut bits = 0;
        if self.resource {
            bits |= ATTR_RESOURCE;
        }
        if self.read_only {
            bits |= ATTR_READ_ONLY;
        }
        if self.app_info_dirty {
            bits |= ATTR_APP_INFO_DIRTY;
        }
        if self.backup {
            bits |= ATTR_BACKUP;
        }
        if self.ok_newer {
            bits |= ATTR_OK_NEWER;
        }
        if self.reset {
            bits |= ATTR_RESET;
        }
        if self.open {
            bits |= ATTR_OPEN;
        }
        bits
    }
}

// ── Epoch conversion ─────────────────────────────────────────────────────────

/// Convert an on-disk 1904-based second count to Unix-epoch seconds.
pub fn palm_to_unix(palm: u32) -> i64 {
    i64::from(palm) - EPOCH_OFFSET
}

/// Convert Unix-epoch seconds to the on-disk 1904-based count, saturating
/// at the bounds of the u32 field.
pub fn unix_to_palm(unix: i64) -> u32 {
    (unix + EPOCH_OFFSET).clamp(0, i64::from(u32::MAX)) as u32
}

// ── Header ───────────────────────────────────────────────────────────────────

/// The fixed header, with timestamps already converted to Unix seconds.
///
/// `app_info_offset` and `sort_offset` are file positions filled in by the
/// container engine; zero means the block is absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseHeader {
    pub name: String,
    pub attributes: DbAttributes,
    pub version: u16,
    pub created: i64,
    pub modified: i64,
    pub backed_up: i64,
    pub modification_number: u32,
    pub app_info_offset: u32,
    pub sort_offset: u32,
    pub type_code: Tag,
    pub creator: Tag,
    pub unique_id_seed: u32,
}

impl DatabaseHeader {
    pub fn read<R: Read>(mut reader: R) -> Result<Self, HeaderError> {
        let mut name_field = [0u8; 32];
        reader.read_exact(&mut name_field)?;
        let name_len = name_field.iter().position(|&b| b == 0).unwrap_or(32);
        let name = String::from_utf8_lossy(&name_field[..name_len]).into_owned();

        let attributes = DbAttributes::from_bits(reader.read_u16::<BigEndian>()?);
        let version = reader.read_u16::<BigEndian>()?;
        let created = palm_to_unix(reader.read_u32::<BigEndian>()?);
        let modified = palm_to_unix(reader.read_u32::<BigEndian>()?);
        let backed_up = palm_to_unix(reader.read_u32::<BigEndian>()?);
        let modification_number = reader.read_u32::<BigEndian>()?;
        let app_info_offset = reader.read_u32::<BigEndian>()?;
        let sort_offset = reader.read_u32::<BigEndian>()?;
        let type_code = Tag::read(&mut reader)?;
        let creator = Tag::read(&mut reader)?;
        let unique_id_seed = reader.read_u32::<BigEndian>()?;

        Ok(Self {
            name,
            attributes,
            version,
            created,
            modified,
            backed_up,
            modification_number,
            app_info_offset,
            sort_offset,
            type_code,
            creator,
            unique_id_seed,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> Result<(), HeaderError> {
        let name_bytes = self.name.as_bytes();
        if name_bytes.len() > NAME_MAX {
            return Err(HeaderError::NameTooLong(self.name.clone()));
        }
        let mut name_field = [0u8; 32];
        name_field[..name_bytes.len()].copy_from_slice(name_bytes);
        writer.write_all(&name_field)?;

        writer.write_u16::<BigEndian>(self.attributes.to_bits())?;
        writer.write_u16::<BigEndian>(self.version)?;
        writer.write_u32::<BigEndian>(unix_to_palm(self.created))?;
        writer.write_u32::<BigEndian>(unix_to_palm(self.modified))?;
        writer.write_u32::<BigEndian>(unix_to_palm(self.backed_up))?;
        writer.write_u32::<BigEndian>(self.modification_number)?;
        writer.write_u32::<BigEndian>(self.app_info_offset)?;
        writer.write_u32::<BigEndian>(self.sort_offset)?;
        self.type_code.write(&mut writer)?;
        self.creator.write(&mut writer)?;
        writer.write_u32::<BigEndian>(self.unique_id_seed)?;
        Ok(())
    }
}
