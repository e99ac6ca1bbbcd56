//! Memo pad record handler: one NUL-terminated text field per record, with
//! the standard category table in the AppInfo block.

use serde::Serialize;

use crate::category::CategoryBlock;
use crate::codec::{AppInfo, CodecError, DbCodec, Payload, RecordInfo};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Memo {
    pub text: String,
}

pub struct MemoCodec;

impl DbCodec for MemoCodec {
    fn name(&self) -> &'static str {
        "memo"
    }

    fn parse_app_info(&self, data: &[u8]) -> Result<AppInfo, CodecError> {
        Ok(AppInfo::Categories(CategoryBlock::parse(data)?))
    }

    fn parse_record(&self, _info: &RecordInfo, data: &[u8]) -> Result<Payload, CodecError> {
        let len = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        Ok(Payload::Memo(Memo {
            text: String::from_utf8_lossy(&data[..len]).into_owned(),
        }))
    }

    fn pack_record(&self, value: &Payload) -> Result<Vec<u8>, CodecError> {
        match value {
            Payload::Memo(memo) => {
                let mut out = Vec::with_capacity(memo.text.len() + 1);
                out.extend_from_slice(memo.text.as_bytes());
                out.push(0);
                Ok(out)
            }
            other => Err(CodecError::WrongValueKind {
                codec: self.name(),
                got: other.kind(),
            }),
        }
    }
}
