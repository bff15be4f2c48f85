use std::path::Path;
use std::sync::Arc;
use parking_lot::Mutex;

use crate::common::types::{PageId, PagePtr};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::manager::{BufferPool, BufferPoolInstance};
use crate::storage::disk::DiskManager;

/// A buffer pool sharded over N independent instances.
///
/// Page ids are routed by `page_id % N`, which matches each instance's
/// allocation pattern, so every page is always served by the instance that
/// created it. Each shard has its own latch; only `new_page`'s round-robin
/// cursor is shared.
pub struct ParallelBufferPool {
    instances: Vec<Arc<BufferPoolInstance>>,
    instance_pool_size: usize,
    next_instance: Mutex<usize>,
}

impl ParallelBufferPool {
    pub fn new(
        num_instances: usize,
        pool_size: usize,
        db_path: impl AsRef<Path>,
    ) -> Result<Self, BufferPoolError> {
        assert!(num_instances > 0, "pool must have at least one instance");
        let disk_manager = Arc::new(DiskManager::new(db_path)?);

        let instances = (0..num_instances)
            .map(|index| {
                Arc::new(BufferPoolInstance::with_sharding(
                    pool_size,
                    num_instances as u32,
                    index as u32,
                    disk_manager.clone(),
                ))
            })
            .collect();

        Ok(Self {
            instances,
            instance_pool_size: pool_size,
            next_instance: Mutex::new(0),
        })
    }

    pub fn num_instances(&self) -> usize {
        self.instances.len()
    }

    fn instance_for(&self, page_id: PageId) -> Result<&BufferPoolInstance, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        Ok(&self.instances[page_id as usize % self.instances.len()])
    }
}

impl BufferPool for ParallelBufferPool {
    /// Allocate a page from the next instance in round-robin order. Each
    /// instance is tried once; if all of them are out of frames the rotation
    /// resets and the allocation fails.
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut next = self.next_instance.lock();
        let num = self.instances.len();
        let start = *next;

        loop {
            match self.instances[*next].new_page() {
                Ok(result) => {
                    *next = (*next + 1) % num;
                    return Ok(result);
                }
                Err(BufferPoolError::NoFreeFrames) => {
                    *next = (*next + 1) % num;
                    if *next == start {
                        break;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        *next = 0;
        Err(BufferPoolError::NoFreeFrames)
    }

    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        self.instance_for(page_id)?.fetch_page(page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        self.instance_for(page_id)?.unpin_page(page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id)?.flush_page(page_id)
    }

    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        self.instance_for(page_id)?.delete_page(page_id)
    }

    /// Flush every instance in turn. Not atomic across shards.
    fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        for instance in &self.instances {
            instance.flush_all_pages()?;
        }
        Ok(())
    }

    fn pool_size(&self) -> usize {
        self.instances.len() * self.instance_pool_size
    }
}
