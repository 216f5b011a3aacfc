//! Read coalescing for poll cycles
//!
//! Groups tags that live close together in the same area/block into one
//! block read. This reduces round trips significantly when a data block
//! holds many small tags.
//!
//! # Example
//!
//! ```ignore
//! let planner = ReadPlanner::new(16);  // merge tags up to 16 bytes apart
//! let plan = planner.plan(&tags);
//!
//! for region in plan.regions() {
//!     let data = driver.read_block(region.area, region.block_index, region.start, region.size)?;
//!     for &idx in &region.tag_indices {
//!         let value = decoder::decode_at(&data, region.start, &tags[idx]);
//!     }
//! }
//! ```

use crate::types::{Area, TagSpec};

/// Default gap threshold for combining reads (bytes)
pub const DEFAULT_GAP_THRESHOLD: usize = 16;

/// Plans block reads covering a set of tags
#[derive(Debug, Clone)]
pub struct ReadPlanner {
    /// Maximum gap between tags to combine into a single read
    gap_threshold: usize,
}

/// A contiguous range in one area/block covering one or more tags
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadRegion {
    pub area: Area,
    pub block_index: u16,
    /// First byte of the read
    pub start: usize,
    /// Number of bytes to read
    pub size: usize,
    /// Tag indices (into the planned slice) that fall within this region
    pub tag_indices: Vec<usize>,
}

impl ReadRegion {
    /// One past the last byte
    pub fn end(&self) -> usize {
        self.start + self.size
    }
}

/// Regions for a tag list plus the tag → region lookup
#[derive(Debug, Clone, Default)]
pub struct ReadPlan {
    regions: Vec<ReadRegion>,
    /// Region index per tag; `None` for tags excluded from the plan
    region_of: Vec<Option<usize>>,
}

impl ReadPlan {
    pub fn regions(&self) -> &[ReadRegion] {
        &self.regions
    }

    /// Region serving the tag at `tag_index`
    pub fn region_index(&self, tag_index: usize) -> Option<usize> {
        self.region_of.get(tag_index).copied().flatten()
    }

    /// Number of reads the plan saves over one read per tag
    pub fn reads_saved(&self) -> usize {
        let planned = self.region_of.iter().filter(|r| r.is_some()).count();
        planned.saturating_sub(self.regions.len())
    }
}

impl ReadPlanner {
    /// Create a planner that merges tags up to `gap_threshold` bytes apart
    pub fn new(gap_threshold: usize) -> Self {
        Self { gap_threshold }
    }

    /// Get the current gap threshold
    pub fn gap_threshold(&self) -> usize {
        self.gap_threshold
    }

    /// Plan reads for every tag
    pub fn plan(&self, tags: &[TagSpec]) -> ReadPlan {
        self.plan_filtered(tags, |_| true)
    }

    /// Plan reads for the tags accepted by `include`
    ///
    /// Excluded tags get no region; the caller handles them on its own.
    pub fn plan_filtered<F>(&self, tags: &[TagSpec], include: F) -> ReadPlan
    where
        F: Fn(usize) -> bool,
    {
        let mut region_of = vec![None; tags.len()];

        // (index, area, block, start, end) sorted by location
        let mut indexed: Vec<(usize, Area, u16, usize, usize)> = tags
            .iter()
            .enumerate()
            .filter(|(i, _)| include(*i))
            .map(|(i, t)| (i, t.area(), t.block_index(), t.byte_offset(), t.end_offset()))
            .collect();
        indexed.sort_by_key(|&(_, area, block, start, _)| (area, block, start));

        let mut regions: Vec<ReadRegion> = Vec::new();
        for (idx, area, block, start, end) in indexed {
            match regions.last_mut() {
                Some(current)
                    if current.area == area
                        && current.block_index == block
                        && start <= current.end() + self.gap_threshold =>
                {
                    if end > current.end() {
                        current.size = end - current.start;
                    }
                    current.tag_indices.push(idx);
                }
                _ => regions.push(ReadRegion {
                    area,
                    block_index: block,
                    start,
                    size: end - start,
                    tag_indices: vec![idx],
                }),
            }
            region_of[idx] = Some(regions.len() - 1);
        }

        ReadPlan { regions, region_of }
    }
}

impl Default for ReadPlanner {
    fn default() -> Self {
        Self::new(DEFAULT_GAP_THRESHOLD)
    }
}
