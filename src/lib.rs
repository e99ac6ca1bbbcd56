pub mod header;
pub mod index;
pub mod category;
pub mod codec;
pub mod registry;
pub mod database;
pub mod datebook;
pub mod memo;

pub use category::{CategoryBlock, CategoryError, CategoryPackStyle, CategorySlot};
pub use codec::{AppInfo, CodecError, DbCodec, Payload, RawCodec};
pub use database::{Database, DbError, Entries, Record, Resource};
pub use header::{DbAttributes, Tag};
pub use registry::{CodecRegistry, DbKind, Pattern};
