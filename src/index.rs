//! Entry index codecs.
//!
//! The index follows the fixed header: 4 reserved bytes, a big-endian entry
//! count, then one fixed-size entry per payload.  Record databases use
//! 8-byte entries, resource databases 10-byte entries.  Payload lengths are
//! never stored; they are inferred from neighboring offsets by the engine.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::Serialize;
use std::io::{self, Read, Write};

use crate::header::Tag;

/// Reserved dword plus the entry count.
pub const INDEX_HEADER_SIZE: usize = 6;
pub const RECORD_ENTRY_SIZE: usize = 8;
pub const RESOURCE_ENTRY_SIZE: usize = 10;

const ATTR_EXPUNGED: u8 = 0x80;
const ATTR_DIRTY: u8 = 0x40;
const ATTR_DELETED: u8 = 0x20;
const ATTR_PRIVATE: u8 = 0x10;
const ATTR_ARCHIVED: u8 = 0x08;
const CATEGORY_MASK: u8 = 0x0F;

/// Per-record index flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RecordAttributes {
    pub expunged: bool,
    pub dirty: bool,
    pub deleted: bool,
    pub private: bool,
    pub archived: bool,
}

/// Decode the index attribute byte.
///
/// The low nibble carries the category only while the record is alive; for
/// expunged or deleted records it carries the archive bit instead, and the
/// category reads as 0.
pub fn unpack_attr_byte(byte: u8) -> (RecordAttributes, u8) {
    let expunged = byte & ATTR_EXPUNGED != 0;
    let deleted = byte & ATTR_DELETED != 0;
    let (archived, category) = if expunged || deleted {
        (byte & ATTR_ARCHIVED != 0, 0)
    } else {
        (false, byte & CATEGORY_MASK)
    };
    let attrs = RecordAttributes {
        expunged,
        dirty: byte & ATTR_DIRTY != 0,
        deleted,
        private: byte & ATTR_PRIVATE != 0,
        archived,
    };
    (attrs, category)
}

/// Inverse of [`unpack_attr_byte`].  The category nibble is emitted only
/// when neither the expunged nor the deleted bit is set.
pub fn pack_attr_byte(attrs: RecordAttributes, category: u8) -> u8 {
    let mut byte = 0;
    if attrs.expunged {
        byte |= ATTR_EXPUNGED;
    }
    if attrs.dirty {
        byte |= ATTR_DIRTY;
    }
    if attrs.deleted {
        byte |= ATTR_DELETED;
    }
    if attrs.private {
        byte |= ATTR_PRIVATE;
    }
    if attrs.expunged || attrs.deleted {
        if attrs.archived {
            byte |= ATTR_ARCHIVED;
        }
    } else {
        byte |= category & CATEGORY_MASK;
    }
    byte
}

/// 8-byte index entry of a record database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordIndexEntry {
    pub offset: u32,
    pub attributes: RecordAttributes,
    pub category: u8,
    /// 24-bit unique record id.
    pub id: u32,
}

impl RecordIndexEntry {
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let offset = reader.read_u32::<BigEndian>()?;
        let (attributes, category) = unpack_attr_byte(reader.read_u8()?);
        let id = reader.read_u24::<BigEndian>()?;
        Ok(Self {
            offset,
            attributes,
            category,
            id,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_u32::<BigEndian>(self.offset)?;
        writer.write_u8(pack_attr_byte(self.attributes, self.category))?;
        writer.write_u24::<BigEndian>(self.id & 0x00FF_FFFF)?;
        Ok(())
    }
}

/// 10-byte index entry of a resource database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceIndexEntry {
    pub type_code: Tag,
    pub id: u16,
    pub offset: u32,
}

impl ResourceIndexEntry {
    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let type_code = Tag::read(&mut reader)?;
        let id = reader.read_u16::<BigEndian>()?;
        let offset = reader.read_u32::<BigEndian>()?;
        Ok(Self {
            type_code,
            id,
            offset,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        self.type_code.write(&mut writer)?;
        writer.write_u16::<BigEndian>(self.id)?;
        writer.write_u32::<BigEndian>(self.offset)?;
        Ok(())
    }
}
