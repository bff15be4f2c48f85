use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;
use log::{debug, warn};
use parking_lot::Mutex;

use crate::common::rwlatch::RwLatch;
use crate::common::types::{PageId, INVALID_PAGE_ID};
use crate::index::hash::bucket_page::HashTableBucketPage;
use crate::index::hash::directory_page::{HashTableDirectoryPage, MAX_DEPTH};
use crate::index::hash::error::HashIndexError;
use crate::index::hash::key::{hash_key, FixedCodec};
use crate::storage::buffer::BufferPool;

/// A disk-resident extendible hash table.
///
/// One directory page routes each key, by the low bits of its 32-bit hash,
/// to a bucket page. Buckets split on overflow (doubling the directory when
/// needed) and merge with their split image once empty, shrinking the
/// directory back down.
///
/// Latching is two-level: point operations hold the table latch shared plus
/// the bucket's page latch; structural changes (split, merge) hold the table
/// latch exclusive. The table latch is always acquired before any page latch.
pub struct ExtendibleHashTable<K, V> {
    buffer_pool: Arc<dyn BufferPool>,
    directory_page_id: Mutex<PageId>,
    table_latch: RwLatch,
    _marker: PhantomData<fn(K, V)>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: FixedCodec + Hash + Eq,
    V: FixedCodec + PartialEq,
{
    pub fn new(buffer_pool: Arc<dyn BufferPool>) -> Self {
        Self {
            buffer_pool,
            directory_page_id: Mutex::new(INVALID_PAGE_ID),
            table_latch: RwLatch::new(),
            _marker: PhantomData,
        }
    }

    /// Collect every value stored under `key`.
    pub fn get_value(&self, key: &K) -> Result<Vec<V>, HashIndexError> {
        let _table = self.table_latch.read();
        let directory = self.load_directory()?;
        let bucket_page_id = directory.bucket_page_id(Self::directory_index(key, &directory));

        let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;
        let result = {
            let page = bucket_ptr.read();
            HashTableBucketPage::<K, V>::load(&page).get_value(key)
        };
        self.buffer_pool.unpin_page(bucket_page_id, false)?;

        Ok(result)
    }

    /// Insert a (key, value) pair. Returns `Ok(false)` when the exact pair is
    /// already present or when the target bucket cannot split any further.
    pub fn insert(&self, key: &K, value: &V) -> Result<bool, HashIndexError> {
        {
            let _table = self.table_latch.read();
            let directory = self.load_directory()?;
            let bucket_page_id = directory.bucket_page_id(Self::directory_index(key, &directory));

            let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;
            let mut page = bucket_ptr.write();
            let mut bucket = HashTableBucketPage::<K, V>::load(&page);

            if !bucket.is_full() {
                let inserted = bucket.insert(key, value);
                if inserted {
                    bucket.save(&mut page);
                }
                drop(page);
                self.buffer_pool.unpin_page(bucket_page_id, inserted)?;
                return Ok(inserted);
            }

            drop(page);
            self.buffer_pool.unpin_page(bucket_page_id, false)?;
        }

        // target bucket is full: split under the exclusive table latch, then
        // retry from the top against the rewritten directory
        self.split_insert(key, value)
    }

    /// Remove the exact (key, value) pair. An emptied bucket triggers a merge
    /// pass once all latches are released.
    pub fn remove(&self, key: &K, value: &V) -> Result<bool, HashIndexError> {
        let removed;
        let emptied;
        {
            let _table = self.table_latch.read();
            let directory = self.load_directory()?;
            let bucket_page_id = directory.bucket_page_id(Self::directory_index(key, &directory));

            let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;
            let mut page = bucket_ptr.write();
            let mut bucket = HashTableBucketPage::<K, V>::load(&page);

            removed = bucket.remove(key, value);
            if removed {
                bucket.save(&mut page);
            }
            emptied = removed && bucket.is_empty();
            drop(page);
            self.buffer_pool.unpin_page(bucket_page_id, removed)?;
        }

        if emptied {
            self.merge()?;
        }
        Ok(removed)
    }

    /// Current global depth of the directory.
    pub fn global_depth(&self) -> Result<u32, HashIndexError> {
        let _table = self.table_latch.read();
        Ok(self.load_directory()?.global_depth())
    }

    /// Check the directory invariants.
    pub fn verify_integrity(&self) -> Result<(), HashIndexError> {
        let _table = self.table_latch.read();
        self.load_directory()?.verify_integrity()
    }

    fn directory_index(key: &K, directory: &HashTableDirectoryPage) -> usize {
        (hash_key(key) & directory.global_depth_mask()) as usize
    }

    /// Split the full bucket `key` routes to, then re-enter `insert`.
    fn split_insert(&self, key: &K, value: &V) -> Result<bool, HashIndexError> {
        {
            let _table = self.table_latch.write();
            let mut directory = self.load_directory()?;
            let index = Self::directory_index(key, &directory);
            let bucket_page_id = directory.bucket_page_id(index);

            let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;
            let mut page = bucket_ptr.write();
            let mut bucket = HashTableBucketPage::<K, V>::load(&page);

            // another writer may have split this bucket while we waited
            if bucket.is_full() {
                let local_depth = directory.local_depth(index);
                if local_depth >= MAX_DEPTH {
                    drop(page);
                    self.buffer_pool.unpin_page(bucket_page_id, false)?;
                    warn!(
                        "cannot split bucket page {}: already at depth {}",
                        bucket_page_id, MAX_DEPTH
                    );
                    return Ok(false);
                }
                if local_depth == directory.global_depth() {
                    directory.incr_global_depth();
                    debug!("directory doubled to depth {}", directory.global_depth());
                }

                let (image_ptr, image_page_id) = self.buffer_pool.new_page()?;
                let entries = bucket.array_copy();
                bucket.clear();

                let new_depth = local_depth + 1;
                let pair_mask = (1usize << new_depth) - 1;
                let split_index = index ^ (1usize << local_depth);

                // rebind every slot of the old bucket to either side of the
                // split, at the new depth
                for slot in 0..directory.size() {
                    if slot & pair_mask == index & pair_mask {
                        directory.set_bucket_page_id(slot, bucket_page_id);
                        directory.set_local_depth(slot, new_depth as u8);
                    } else if slot & pair_mask == split_index & pair_mask {
                        directory.set_bucket_page_id(slot, image_page_id);
                        directory.set_local_depth(slot, new_depth as u8);
                    }
                }

                let mut image = HashTableBucketPage::<K, V>::new();
                for (entry_key, entry_value) in entries {
                    if (hash_key(&entry_key) as usize) & pair_mask == index & pair_mask {
                        bucket.insert(&entry_key, &entry_value);
                    } else {
                        image.insert(&entry_key, &entry_value);
                    }
                }

                bucket.save(&mut page);
                {
                    let mut image_page = image_ptr.write();
                    image.save(&mut image_page);
                }
                drop(page);
                self.buffer_pool.unpin_page(image_page_id, true)?;
                self.buffer_pool.unpin_page(bucket_page_id, true)?;
                self.save_directory(&directory)?;
                debug!(
                    "split bucket page {} into {} at depth {}",
                    bucket_page_id, image_page_id, new_depth
                );
            } else {
                drop(page);
                self.buffer_pool.unpin_page(bucket_page_id, false)?;
            }
        }

        self.insert(key, value)
    }

    /// Fold empty buckets into their split images until none remains, then
    /// shrink the directory as far as the local depths allow.
    fn merge(&self) -> Result<(), HashIndexError> {
        let _table = self.table_latch.write();
        let mut directory = self.load_directory()?;
        let mut changed = false;

        'scan: loop {
            for index in 0..directory.size() {
                let local_depth = directory.local_depth(index);
                if local_depth == 0 {
                    continue;
                }
                let image_index = index ^ (1usize << (local_depth - 1));
                if directory.local_depth(image_index) != local_depth {
                    continue;
                }

                let bucket_page_id = directory.bucket_page_id(index);
                let image_page_id = directory.bucket_page_id(image_index);
                if bucket_page_id == image_page_id {
                    continue;
                }

                // re-check emptiness under the exclusive table latch
                let empty = {
                    let bucket_ptr = self.buffer_pool.fetch_page(bucket_page_id)?;
                    let empty = {
                        let page = bucket_ptr.read();
                        HashTableBucketPage::<K, V>::load(&page).is_empty()
                    };
                    self.buffer_pool.unpin_page(bucket_page_id, false)?;
                    empty
                };
                if !empty {
                    continue;
                }

                self.buffer_pool.delete_page(bucket_page_id)?;
                let merged_depth = (local_depth - 1) as u8;
                for slot in 0..directory.size() {
                    let slot_page_id = directory.bucket_page_id(slot);
                    if slot_page_id == bucket_page_id || slot_page_id == image_page_id {
                        directory.set_bucket_page_id(slot, image_page_id);
                        directory.set_local_depth(slot, merged_depth);
                    }
                }
                while directory.can_shrink() {
                    directory.decr_global_depth();
                }
                debug!(
                    "merged bucket page {} into {}, directory at depth {}",
                    bucket_page_id,
                    image_page_id,
                    directory.global_depth()
                );
                changed = true;
                // indices shifted; rescan from the top
                continue 'scan;
            }
            break;
        }

        if changed {
            self.save_directory(&directory)?;
        }
        Ok(())
    }

    /// Fetch the directory, creating it (with an initial bucket bound to
    /// slot 0) on first use.
    fn load_directory(&self) -> Result<HashTableDirectoryPage, HashIndexError> {
        let directory_page_id = {
            let mut directory_page_id = self.directory_page_id.lock();
            if *directory_page_id == INVALID_PAGE_ID {
                *directory_page_id = self.init_directory()?;
            }
            *directory_page_id
        };

        let directory_ptr = self.buffer_pool.fetch_page(directory_page_id)?;
        let directory = {
            let page = directory_ptr.read();
            HashTableDirectoryPage::load(&page)
        };
        self.buffer_pool.unpin_page(directory_page_id, false)?;
        Ok(directory)
    }

    fn save_directory(&self, directory: &HashTableDirectoryPage) -> Result<(), HashIndexError> {
        let directory_ptr = self.buffer_pool.fetch_page(directory.page_id())?;
        {
            let mut page = directory_ptr.write();
            directory.save(&mut page);
        }
        self.buffer_pool.unpin_page(directory.page_id(), true)?;
        Ok(())
    }

    fn init_directory(&self) -> Result<PageId, HashIndexError> {
        let (directory_ptr, directory_page_id) = self.buffer_pool.new_page()?;
        let (bucket_ptr, bucket_page_id) = self.buffer_pool.new_page()?;

        {
            let mut page = bucket_ptr.write();
            HashTableBucketPage::<K, V>::new().save(&mut page);
        }
        {
            let mut page = directory_ptr.write();
            let mut directory = HashTableDirectoryPage::new(directory_page_id);
            directory.set_bucket_page_id(0, bucket_page_id);
            directory.set_local_depth(0, 0);
            directory.save(&mut page);
        }

        self.buffer_pool.unpin_page(bucket_page_id, true)?;
        self.buffer_pool.unpin_page(directory_page_id, true)?;
        debug!(
            "initialized hash table: directory page {}, bucket page {}",
            directory_page_id, bucket_page_id
        );
        Ok(directory_page_id)
    }
}
