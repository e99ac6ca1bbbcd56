//! Format handler protocol.
//!
//! A handler is selected once per database at load time, from the registry,
//! and stays bound for the database's lifetime.  The engine drives it
//! through this trait to parse and pack the AppInfo block, the sort block,
//! and every record or resource payload.
//!
//! Every trait method has a raw-passthrough default, so a minimal handler
//! only overrides what its format actually interprets.  [`RawCodec`]
//! overrides nothing and is the usual catch-all and `UnknownFormat`
//! fallback.
//!
//! Parse methods receive the payload bytes plus index metadata.  The
//! `offset` carried in the metadata is informational (where the payload sat
//! in the source file) and must never drive parsing.  A handler failure
//! aborts the whole load or write; there are no partial results.

use serde::Serialize;
use std::io;
use thiserror::Error;

use crate::category::CategoryBlock;
use crate::datebook::Event;
use crate::header::Tag;
use crate::index::RecordAttributes;
use crate::memo::Memo;

#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Truncated {what}: need at least {need} bytes, have {have}")]
    Truncated {
        what: &'static str,
        need: usize,
        have: usize,
    },
    #[error("Malformed {what}: {detail}")]
    Malformed {
        what: &'static str,
        detail: String,
    },
    /// A pack call was handed a value parsed by a different handler.
    #[error("Handler '{codec}' cannot pack a {got} value")]
    WrongValueKind {
        codec: &'static str,
        got: &'static str,
    },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

// ── Parsed values ────────────────────────────────────────────────────────────

/// Parsed AppInfo block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum AppInfo {
    /// Verbatim bytes, for formats without a richer interpretation.
    Raw(Vec<u8>),
    /// Standard category table (plus format-owned tail bytes).
    Categories(CategoryBlock),
}

/// Parsed entry payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Payload {
    Raw(Vec<u8>),
    Memo(Memo),
    Event(Event),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Raw(_) => "raw",
            Payload::Memo(_) => "memo",
            Payload::Event(_) => "event",
        }
    }
}

// ── Index metadata ───────────────────────────────────────────────────────────

/// Index metadata handed to a record handler alongside the payload bytes.
#[derive(Debug, Clone, Copy)]
pub struct RecordInfo {
    pub attributes: RecordAttributes,
    pub category: u8,
    pub id: u32,
    /// File position the payload was read from.  Informational only.
    pub offset: u32,
}

/// Index metadata handed to a resource handler.
#[derive(Debug, Clone, Copy)]
pub struct ResourceInfo {
    pub type_code: Tag,
    pub id: u16,
    /// File position the payload was read from.  Informational only.
    pub offset: u32,
}

// ── Handler trait ────────────────────────────────────────────────────────────

pub trait DbCodec: Send + Sync {
    /// Diagnostic name, shown by the CLI.  Never parsed.
    fn name(&self) -> &'static str;

    fn parse_app_info(&self, data: &[u8]) -> Result<AppInfo, CodecError> {
        Ok(AppInfo::Raw(data.to_vec()))
    }

    fn pack_app_info(&self, value: &AppInfo) -> Result<Vec<u8>, CodecError> {
        match value {
            AppInfo::Raw(bytes) => Ok(bytes.clone()),
            AppInfo::Categories(block) => Ok(block.pack()),
        }
    }

    fn parse_sort_block(&self, data: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(data.to_vec())
    }

    fn pack_sort_block(&self, value: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(value.to_vec())
    }

    fn parse_record(&self, _info: &RecordInfo, data: &[u8]) -> Result<Payload, CodecError> {
        Ok(Payload::Raw(data.to_vec()))
    }

    fn pack_record(&self, value: &Payload) -> Result<Vec<u8>, CodecError> {
        match value {
            Payload::Raw(bytes) => Ok(bytes.clone()),
            other => Err(CodecError::WrongValueKind {
                codec: self.name(),
                got: other.kind(),
            }),
        }
    }

    fn parse_resource(&self, _info: &ResourceInfo, data: &[u8]) -> Result<Payload, CodecError> {
        Ok(Payload::Raw(data.to_vec()))
    }

    fn pack_resource(&self, value: &Payload) -> Result<Vec<u8>, CodecError> {
        match value {
            Payload::Raw(bytes) => Ok(bytes.clone()),
            other => Err(CodecError::WrongValueKind {
                codec: self.name(),
                got: other.kind(),
            }),
        }
    }
}

/// Stores every block and payload verbatim.
pub struct RawCodec;

impl DbCodec for RawCodec {
    fn name(&self) -> &'static str {
        "raw"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_codec_is_a_passthrough() {
        let codec = RawCodec;
        let info = RecordInfo {
            attributes: RecordAttributes::default(),
            category: 0,
            id: 1,
            offset: 0,
        };
        let payload = codec.parse_record(&info, b"payload").unwrap();
        assert_eq!(payload, Payload::Raw(b"payload".to_vec()));
        assert_eq!(codec.pack_record(&payload).unwrap(), b"payload");
    }

    #[test]
    fn raw_codec_rejects_foreign_values() {
        let codec = RawCodec;
        let err = codec
            .pack_record(&Payload::Memo(Memo {
                text: "hi".to_string(),
            }))
            .unwrap_err();
        assert!(matches!(err, CodecError::WrongValueKind { got: "memo", .. }));
    }
}
