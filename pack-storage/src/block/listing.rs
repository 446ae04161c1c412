//! Ordering and aggregation of listed blocks.
//!
//! Sorting happens only at the listing boundary; the index itself keeps its
//! own order.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use super::info::BlockInfo;
use crate::blob::BlobId;

/// Key used to order a block listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    Name,
    Size,
    Time,
    Pack,
    /// Keep the order the index returned
    None,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "name" => Ok(SortKey::Name),
            "size" => Ok(SortKey::Size),
            "time" => Ok(SortKey::Time),
            "pack" => Ok(SortKey::Pack),
            "none" => Ok(SortKey::None),
            _ => Err(format!("Unknown sort order: {}", s)),
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SortKey::Name => "name",
            SortKey::Size => "size",
            SortKey::Time => "time",
            SortKey::Pack => "pack",
            SortKey::None => "none",
        };
        f.write_str(name)
    }
}

/// Orders by pack blob id (standalone blocks first), then by offset within the pack.
pub fn compare_packs(a: &BlockInfo, b: &BlockInfo) -> Ordering {
    let offset = |info: &BlockInfo| info.pack.as_ref().map_or(0, |p| p.offset);
    a.pack_blob_id()
        .cmp(&b.pack_blob_id())
        .then_with(|| offset(a).cmp(&offset(b)))
}

/// Sorts `blocks` in place. The sort is stable; `reverse` flips the whole
/// comparator, tie-break included. `SortKey::None` leaves the order untouched.
pub fn sort_blocks(blocks: &mut [BlockInfo], key: SortKey, reverse: bool) {
    let compare: fn(&BlockInfo, &BlockInfo) -> Ordering = match key {
        SortKey::Name => |a: &BlockInfo, b: &BlockInfo| a.block_id.cmp(&b.block_id),
        SortKey::Size => |a: &BlockInfo, b: &BlockInfo| a.length.cmp(&b.length),
        SortKey::Time => |a: &BlockInfo, b: &BlockInfo| a.timestamp.cmp(&b.timestamp),
        SortKey::Pack => compare_packs,
        SortKey::None => return,
    };

    if reverse {
        blocks.sort_by(|a, b| compare(a, b).reverse());
    } else {
        blocks.sort_by(compare);
    }
}

/// Totals over a set of listed blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockSummary {
    pub blocks: usize,
    /// Distinct pack blobs; standalone blocks are not counted
    pub packs: usize,
    /// Sum of logical block lengths
    pub total_bytes: u64,
}

impl BlockSummary {
    pub fn from_blocks<'a, I>(blocks: I) -> Self
    where
        I: IntoIterator<Item = &'a BlockInfo>,
    {
        let mut summary = BlockSummary::default();
        let mut unique_packs: HashSet<&BlobId> = HashSet::new();

        for info in blocks {
            summary.blocks += 1;
            summary.total_bytes += info.length;
            if let Some(pack) = info.pack_blob_id() {
                unique_packs.insert(pack);
            }
        }

        summary.packs = unique_packs.len();
        summary
    }
}

impl fmt::Display for BlockSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Total: {} blocks, {} packs, {} bytes",
            self.blocks, self.packs, self.total_bytes
        )
    }
}
