//! Handler registry: (creator, type) patterns to format handlers.
//!
//! Two independent tables exist, one consulted for record databases and one
//! for resource databases.  Either pattern component may be a wildcard, so
//! many independent handlers coexist with one generic catch-all without any
//! central list of known formats.
//!
//! Registration happens in application bootstrap code, before any load.
//! Concurrent register/resolve is not supported; build the registry first,
//! then share it read-only.

use std::sync::Arc;

use crate::codec::{DbCodec, RawCodec};
use crate::datebook::DatebookCodec;
use crate::header::Tag;
use crate::memo::MemoCodec;

/// Which entry table a database uses, fixed by the header resource bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbKind {
    Records,
    Resources,
}

/// A (creator, type) match pattern.  `None` is the wildcard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pattern {
    pub creator: Option<Tag>,
    pub type_code: Option<Tag>,
}

impl Pattern {
    /// Matches every database.
    pub const ANY: Pattern = Pattern {
        creator: None,
        type_code: None,
    };

    pub const fn exact(creator: Tag, type_code: Tag) -> Self {
        Pattern {
            creator: Some(creator),
            type_code: Some(type_code),
        }
    }

    pub const fn any_creator(type_code: Tag) -> Self {
        Pattern {
            creator: None,
            type_code: Some(type_code),
        }
    }

    pub const fn any_type(creator: Tag) -> Self {
        Pattern {
            creator: Some(creator),
            type_code: None,
        }
    }
}

#[derive(Default)]
pub struct CodecRegistry {
    records: Vec<(Pattern, Arc<dyn DbCodec>)>,
    resources: Vec<(Pattern, Arc<dyn DbCodec>)>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every bundled handler installed: the calendar and memo
    /// handlers for their record formats, and the raw passthrough as the
    /// catch-all for both tables.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(
            DbKind::Records,
            Arc::new(DatebookCodec),
            &[Pattern::exact(Tag(*b"date"), Tag(*b"DATA"))],
        );
        registry.register(
            DbKind::Records,
            Arc::new(MemoCodec),
            &[Pattern::exact(Tag(*b"memo"), Tag(*b"DATA"))],
        );
        let raw: Arc<dyn DbCodec> = Arc::new(RawCodec);
        registry.register(DbKind::Records, raw.clone(), &[Pattern::ANY]);
        registry.register(DbKind::Resources, raw, &[Pattern::ANY]);
        registry
    }

    /// Register `codec` under each of `patterns` in the table for `kind`.
    pub fn register(&mut self, kind: DbKind, codec: Arc<dyn DbCodec>, patterns: &[Pattern]) {
        let table = self.table_mut(kind);
        for &pattern in patterns {
            table.push((pattern, codec.clone()));
        }
    }

    /// Resolve most-specific-first: exact (creator, type); wildcard creator
    /// with exact type; exact creator with wildcard type; full wildcard.
    /// Within a tier the earliest registration wins.
    pub fn resolve(&self, creator: Tag, type_code: Tag, kind: DbKind) -> Option<Arc<dyn DbCodec>> {
        let table = self.table(kind);
        let tiers = [
            Pattern::exact(creator, type_code),
            Pattern::any_creator(type_code),
            Pattern::any_type(creator),
            Pattern::ANY,
        ];
        for want in tiers {
            if let Some((_, codec)) = table.iter().find(|(pattern, _)| *pattern == want) {
                return Some(codec.clone());
            }
        }
        None
    }

    fn table(&self, kind: DbKind) -> &Vec<(Pattern, Arc<dyn DbCodec>)> {
        match kind {
            DbKind::Records => &self.records,
            DbKind::Resources => &self.resources,
        }
    }

    fn table_mut(&mut self, kind: DbKind) -> &mut Vec<(Pattern, Arc<dyn DbCodec>)> {
        match kind {
            DbKind::Records => &mut self.records,
            DbKind::Resources => &mut self.resources,
        }
    }
}
