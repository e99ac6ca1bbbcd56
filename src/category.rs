//! Standard 16-slot category table, shared by most record formats.
//!
//! The fixed region is a renamed bitmask, sixteen NUL-padded 16-byte name
//! fields, sixteen one-byte ids, a last-unique-id counter and one pad byte.
//! Anything after that belongs to the enclosing format and is kept verbatim
//! in [`CategoryBlock::other`].
//!
//! Slots are never resized or reordered: deleting a category clears its name
//! and marks it renamed, keeping slot indices stable for the records that
//! reference them.

use serde::Serialize;
use thiserror::Error;

use crate::codec::CodecError;

/// Number of slots in every category table.
pub const NUM_CATEGORIES: usize = 16;
/// Maximum category name length, excluding the NUL terminator.
pub const CATEGORY_NAME_MAX: usize = 15;
/// Size of the fixed region preceding the format-owned tail.
pub const CATEGORY_BLOCK_LEN: usize = 2 + NUM_CATEGORIES * 16 + NUM_CATEGORIES + 1 + 1;

/// Auto-assigned category ids start here; lower ids are reserved for the
/// slots a device ships with.
const FIRST_AUTO_ID: u16 = 128;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CategoryError {
    #[error("Category id {0} is already in use")]
    DuplicateId(u8),
    #[error("All {NUM_CATEGORIES} category slots are occupied")]
    NoFreeSlot,
    #[error("No category named {0:?}")]
    NotFound(String),
}

/// One category slot.  An empty name means the slot is unused; its id and
/// renamed flag are still stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CategorySlot {
    pub name: String,
    pub id: u8,
    pub renamed: bool,
}

/// How [`CategoryBlock::pack_style`] lays out the name and id arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryPackStyle {
    /// All sixteen fixed-width slots, always [`CATEGORY_BLOCK_LEN`] bytes
    /// before the tail.  This is the reference layout and the default.
    FixedSlots,
    /// Historical variant: slots with empty names are omitted from both the
    /// name and id arrays, producing a shorter, non-fixed-width block.
    OmitEmpty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryBlock {
    pub slots: [CategorySlot; NUM_CATEGORIES],
    pub last_unique_id: u8,
    /// Bytes after the fixed region, owned by the enclosing format.
    pub other: Vec<u8>,
}

impl Default for CategoryBlock {
    fn default() -> Self {
        CategoryBlock {
            slots: Default::default(),
            last_unique_id: 0,
            other: Vec::new(),
        }
    }
}

impl CategoryBlock {
    /// Parse the fixed region; trailing bytes land in `other`.
    ///
    /// Always yields exactly sixteen slots, however many are populated.
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < CATEGORY_BLOCK_LEN {
            return Err(CodecError::Truncated {
                what: "category block",
                need: CATEGORY_BLOCK_LEN,
                have: data.len(),
            });
        }
        let renamed_mask = u16::from_be_bytes([data[0], data[1]]);

        let mut slots: [CategorySlot; NUM_CATEGORIES] = Default::default();
        for (i, slot) in slots.iter_mut().enumerate() {
            let field = &data[2 + i * 16..2 + (i + 1) * 16];
            let len = field.iter().position(|&b| b == 0).unwrap_or(16);
            slot.name = String::from_utf8_lossy(&field[..len]).into_owned();
            slot.renamed = renamed_mask & (1 << i) != 0;
        }
        let ids_start = 2 + NUM_CATEGORIES * 16;
        for (i, slot) in slots.iter_mut().enumerate() {
            slot.id = data[ids_start + i];
        }
        let last_unique_id = data[ids_start + NUM_CATEGORIES];
        // One pad byte, then the format-owned tail.
        let other = data[CATEGORY_BLOCK_LEN..].to_vec();

        Ok(CategoryBlock {
            slots,
            last_unique_id,
            other,
        })
    }

    /// Pack in the reference fixed-width layout.
    pub fn pack(&self) -> Vec<u8> {
        self.pack_style(CategoryPackStyle::FixedSlots)
    }

    pub fn pack_style(&self, style: CategoryPackStyle) -> Vec<u8> {
        let mut renamed_mask = 0u16;
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.renamed {
                renamed_mask |= 1 << i;
            }
        }

        let keep = |slot: &&CategorySlot| match style {
            CategoryPackStyle::FixedSlots => true,
            CategoryPackStyle::OmitEmpty => !slot.name.is_empty(),
        };

        let mut out = Vec::with_capacity(CATEGORY_BLOCK_LEN + self.other.len());
        out.extend_from_slice(&renamed_mask.to_be_bytes());
        for slot in self.slots.iter().filter(keep) {
            let mut field = [0u8; 16];
            let name = slot.name.as_bytes();
            let len = name.len().min(CATEGORY_NAME_MAX);
            field[..len].copy_from_slice(&name[..len]);
            out.extend_from_slice(&field);
        }
        for slot in self.slots.iter().filter(keep) {
            out.push(slot.id);
        }
        out.push(self.last_unique_id);
        out.push(0);
        out.extend_from_slice(&self.other);
        out
    }

    fn used_ids(&self) -> Vec<u8> {
        self.slots
            .iter()
            .filter(|s| !s.name.is_empty())
            .map(|s| s.id)
            .collect()
    }

    /// Add a category to the first unused slot.
    ///
    /// With `id: None` the first free id in [128, 256) is assigned.  Returns
    /// the id actually used.  The table is untouched on failure.
    pub fn add_category(
        &mut self,
        name: &str,
        id: Option<u8>,
        renamed: bool,
    ) -> Result<u8, CategoryError> {
        let used = self.used_ids();
        let id = match id {
            Some(id) => {
                if used.contains(&id) {
                    return Err(CategoryError::DuplicateId(id));
                }
                id
            }
            None => (FIRST_AUTO_ID..=u8::MAX as u16)
                .map(|id| id as u8)
                .find(|id| !used.contains(id))
                .ok_or(CategoryError::NoFreeSlot)?,
        };
        let slot = self
            .slots
            .iter_mut()
            .find(|s| s.name.is_empty())
            .ok_or(CategoryError::NoFreeSlot)?;
        slot.name = name.to_owned();
        slot.id = id;
        slot.renamed = renamed;
        Ok(id)
    }

    /// Soft-delete a category: the slot keeps its id but loses its name and
    /// is flagged renamed for the next sync.
    pub fn delete_category(&mut self, name: &str) -> Result<(), CategoryError> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| !s.name.is_empty() && s.name == name)
            .ok_or_else(|| CategoryError::NotFound(name.to_owned()))?;
        slot.name = String::new();
        slot.renamed = true;
        Ok(())
    }

    pub fn rename_category(&mut self, old: &str, new: &str) -> Result<(), CategoryError> {
        let slot = self
            .slots
            .iter_mut()
            .find(|s| !s.name.is_empty() && s.name == old)
            .ok_or_else(|| CategoryError::NotFound(old.to_owned()))?;
        slot.name = new.to_owned();
        slot.renamed = true;
        Ok(())
    }
}
