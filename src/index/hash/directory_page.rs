use std::collections::HashMap;
use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, INVALID_PAGE_ID};
use crate::index::hash::error::HashIndexError;

/// Hard cap on the directory depth; the directory never exceeds
/// `2^MAX_DEPTH` slots.
pub const MAX_DEPTH: u32 = 9;

/// Number of slots physically present in the directory page.
pub const DIRECTORY_ARRAY_SIZE: usize = 1 << MAX_DEPTH;

const PAGE_ID_OFFSET: usize = 0;
const LSN_OFFSET: usize = 4;
const GLOBAL_DEPTH_OFFSET: usize = 8;
const BUCKET_IDS_OFFSET: usize = 12;
const LOCAL_DEPTHS_OFFSET: usize = BUCKET_IDS_OFFSET + DIRECTORY_ARRAY_SIZE * 4;

/// The directory of an extendible hash table.
///
/// Slot `i` serves every key whose low `global_depth` hash bits equal `i`.
/// Buckets are shared between slots while their `local_depth` is below the
/// global depth: slots agreeing on their low `local_depth` bits point at the
/// same bucket page.
#[derive(Debug, Clone)]
pub struct HashTableDirectoryPage {
    page_id: PageId,
    lsn: u32,
    global_depth: u32,
    bucket_page_ids: [PageId; DIRECTORY_ARRAY_SIZE],
    local_depths: [u8; DIRECTORY_ARRAY_SIZE],
}

impl HashTableDirectoryPage {
    pub fn new(page_id: PageId) -> Self {
        Self {
            page_id,
            lsn: 0,
            global_depth: 0,
            bucket_page_ids: [INVALID_PAGE_ID; DIRECTORY_ARRAY_SIZE],
            local_depths: [0; DIRECTORY_ARRAY_SIZE],
        }
    }

    /// Decode the directory from a page image.
    pub fn load(page: &Page) -> Self {
        let data = &page.data;
        let mut dir = Self::new(LittleEndian::read_i32(&data[PAGE_ID_OFFSET..]));
        dir.lsn = LittleEndian::read_u32(&data[LSN_OFFSET..]);
        dir.global_depth = LittleEndian::read_u32(&data[GLOBAL_DEPTH_OFFSET..]);
        for i in 0..DIRECTORY_ARRAY_SIZE {
            dir.bucket_page_ids[i] = LittleEndian::read_i32(&data[BUCKET_IDS_OFFSET + i * 4..]);
        }
        dir.local_depths
            .copy_from_slice(&data[LOCAL_DEPTHS_OFFSET..LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE]);
        dir
    }

    /// Encode the directory into a page image.
    pub fn save(&self, page: &mut Page) {
        let data = &mut page.data;
        LittleEndian::write_i32(&mut data[PAGE_ID_OFFSET..LSN_OFFSET], self.page_id);
        LittleEndian::write_u32(&mut data[LSN_OFFSET..GLOBAL_DEPTH_OFFSET], self.lsn);
        LittleEndian::write_u32(
            &mut data[GLOBAL_DEPTH_OFFSET..BUCKET_IDS_OFFSET],
            self.global_depth,
        );
        for i in 0..DIRECTORY_ARRAY_SIZE {
            LittleEndian::write_i32(
                &mut data[BUCKET_IDS_OFFSET + i * 4..BUCKET_IDS_OFFSET + (i + 1) * 4],
                self.bucket_page_ids[i],
            );
        }
        data[LOCAL_DEPTHS_OFFSET..LOCAL_DEPTHS_OFFSET + DIRECTORY_ARRAY_SIZE]
            .copy_from_slice(&self.local_depths);
    }

    pub fn page_id(&self) -> PageId {
        self.page_id
    }

    pub fn global_depth(&self) -> u32 {
        self.global_depth
    }

    /// Mask selecting the hash bits that index the directory.
    pub fn global_depth_mask(&self) -> u32 {
        (1u32 << self.global_depth) - 1
    }

    /// Number of directory slots currently in view.
    pub fn size(&self) -> usize {
        1 << self.global_depth
    }

    /// Double the directory: each new slot mirrors the slot that differs
    /// from it only in the new high bit.
    pub fn incr_global_depth(&mut self) {
        debug_assert!(self.global_depth < MAX_DEPTH);
        let old_size = self.size();
        for i in 0..old_size {
            self.bucket_page_ids[old_size + i] = self.bucket_page_ids[i];
            self.local_depths[old_size + i] = self.local_depths[i];
        }
        self.global_depth += 1;
    }

    pub fn decr_global_depth(&mut self) {
        debug_assert!(self.global_depth > 0);
        self.global_depth -= 1;
    }

    /// The directory view can halve when no bucket uses its full depth.
    pub fn can_shrink(&self) -> bool {
        if self.global_depth == 0 {
            return false;
        }
        (0..self.size()).all(|i| u32::from(self.local_depths[i]) < self.global_depth)
    }

    pub fn bucket_page_id(&self, index: usize) -> PageId {
        self.bucket_page_ids[index]
    }

    pub fn set_bucket_page_id(&mut self, index: usize, page_id: PageId) {
        self.bucket_page_ids[index] = page_id;
    }

    pub fn local_depth(&self, index: usize) -> u32 {
        u32::from(self.local_depths[index])
    }

    pub fn set_local_depth(&mut self, index: usize, depth: u8) {
        self.local_depths[index] = depth;
    }

    /// Mask selecting the hash bits that are fixed within `index`'s bucket.
    pub fn local_depth_mask(&self, index: usize) -> u32 {
        (1u32 << self.local_depth(index)) - 1
    }

    /// Check the structural invariants of the directory view:
    /// every local depth is bounded by the global depth, every slot points at
    /// a real bucket, each bucket is referenced by exactly
    /// `2^(global_depth - local_depth)` slots, and all slots sharing a bucket
    /// agree on their low `local_depth` bits.
    pub fn verify_integrity(&self) -> Result<(), HashIndexError> {
        let mut reference_counts: HashMap<PageId, usize> = HashMap::new();
        let mut depths: HashMap<PageId, u32> = HashMap::new();
        let mut low_bits: HashMap<PageId, u32> = HashMap::new();

        for i in 0..self.size() {
            let page_id = self.bucket_page_ids[i];
            let local_depth = self.local_depth(i);

            if page_id == INVALID_PAGE_ID {
                return Err(HashIndexError::CorruptDirectory(format!(
                    "slot {} has no bucket page",
                    i
                )));
            }
            if local_depth > self.global_depth {
                return Err(HashIndexError::CorruptDirectory(format!(
                    "slot {} has local depth {} above global depth {}",
                    i, local_depth, self.global_depth
                )));
            }

            *reference_counts.entry(page_id).or_insert(0) += 1;
            let masked = (i as u32) & self.local_depth_mask(i);
            if let Some(&depth) = depths.get(&page_id) {
                if depth != local_depth {
                    return Err(HashIndexError::CorruptDirectory(format!(
                        "bucket page {} referenced at depths {} and {}",
                        page_id, depth, local_depth
                    )));
                }
                if low_bits[&page_id] != masked {
                    return Err(HashIndexError::CorruptDirectory(format!(
                        "bucket page {} referenced by slots with differing low bits",
                        page_id
                    )));
                }
            } else {
                depths.insert(page_id, local_depth);
                low_bits.insert(page_id, masked);
            }
        }

        for (page_id, count) in reference_counts {
            let expected = 1usize << (self.global_depth - depths[&page_id]);
            if count != expected {
                return Err(HashIndexError::CorruptDirectory(format!(
                    "bucket page {} referenced by {} slots, expected {}",
                    page_id, count, expected
                )));
            }
        }

        Ok(())
    }
}
