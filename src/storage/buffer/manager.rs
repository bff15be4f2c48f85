use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{
    Frame, FrameId, FramePtr, Page, PageId, PagePtr, INVALID_PAGE_ID,
};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::LruReplacer;
use crate::storage::disk::DiskManager;

/// The page-cache interface shared by the single-instance and parallel
/// buffer pools. Callers receive pinned pages and must pair every `new_page`
/// or `fetch_page` with an `unpin_page`.
pub trait BufferPool: Send + Sync {
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError>;
    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError>;
    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError>;
    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError>;
    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError>;
    fn flush_all_pages(&self) -> Result<(), BufferPoolError>;
    fn pool_size(&self) -> usize;
}

/// Bookkeeping guarded by the instance latch. Holding it makes every public
/// operation on this instance linearizable.
struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
    replacer: LruReplacer,
    next_page_id: PageId,
}

/// A fixed-capacity page cache over the disk manager.
///
/// When sharded (`num_instances > 1`), each instance allocates page ids
/// congruent to its own index, so `page_id % num_instances` always routes a
/// page back to the instance that created it.
pub struct BufferPoolInstance {
    pool_size: usize,
    num_instances: u32,
    instance_index: u32,
    frames: Vec<FramePtr>,
    state: Mutex<PoolState>,
    disk_manager: Arc<DiskManager>,
}

impl BufferPoolInstance {
    /// Create a standalone instance backed by the database file at `db_path`.
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::with_sharding(pool_size, 1, 0, disk_manager))
    }

    /// Create one shard of a parallel pool. `instance_index` must be less
    /// than `num_instances`; all shards share the disk manager.
    pub fn with_sharding(
        pool_size: usize,
        num_instances: u32,
        instance_index: u32,
        disk_manager: Arc<DiskManager>,
    ) -> Self {
        assert!(num_instances > 0, "pool must have at least one instance");
        assert!(
            instance_index < num_instances,
            "instance index out of range"
        );

        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for i in 0..pool_size {
            let frame_id = i as FrameId;
            let page = PagePtr::new(RwLock::new(Page::new(INVALID_PAGE_ID)));
            frames.push(FramePtr::new(RwLock::new(Frame::new(frame_id, page))));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            num_instances,
            instance_index,
            frames,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
                replacer: LruReplacer::new(pool_size),
                next_page_id: instance_index as PageId,
            }),
            disk_manager,
        }
    }

    /// Allocate and pin a zeroed page. Fails with `NoFreeFrames` when every
    /// frame is pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = self.find_free_frame(&mut state)?;
        let page_id = self.allocate_page_id(&mut state);

        let mut frame_guard = self.frames[frame_id as usize].write();
        {
            let page = frame_guard.page.clone();
            let mut page_guard = page.write();
            *page_guard = Page::new(page_id);
        }
        frame_guard.pin_count = 1;
        frame_guard.is_dirty = false;

        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);

        Ok((frame_guard.page.clone(), page_id))
    }

    /// Pin the requested page, reading it from disk if it is not resident.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }

        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let mut frame_guard = self.frames[frame_id as usize].write();
            frame_guard.pin_count += 1;
            state.replacer.pin(frame_id);
            return Ok(frame_guard.page.clone());
        }

        let frame_id = self.find_free_frame(&mut state)?;
        let mut frame_guard = self.frames[frame_id as usize].write();
        {
            let page = frame_guard.page.clone();
            let mut page_guard = page.write();
            *page_guard = Page::new(page_id);
            if let Err(e) = self.disk_manager.read_page(page_id, &mut page_guard) {
                drop(page_guard);
                drop(frame_guard);
                state.free_list.push_back(frame_id);
                return Err(e.into());
            }
        }
        frame_guard.pin_count = 1;
        frame_guard.is_dirty = false;

        state.page_table.insert(page_id, frame_id);
        state.replacer.pin(frame_id);

        Ok(frame_guard.page.clone())
    }

    /// Drop one pin on a page. The dirty flag is sticky: once set it stays
    /// set until the page is flushed, even if later unpins pass `false`.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut state = self.state.lock();
        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let mut frame_guard = self.frames[frame_id as usize].write();
        if frame_guard.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        frame_guard.pin_count -= 1;
        if is_dirty {
            frame_guard.is_dirty = true;
        }
        if frame_guard.pin_count == 0 {
            state.replacer.unpin(frame_id);
        }

        Ok(())
    }

    /// Write a page's current content back to disk, regardless of its pin
    /// status, and clear its dirty flag.
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let state = self.state.lock();
        let frame_id = *state
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;
        self.flush_frame(frame_id)
    }

    /// Flush every resident page under the instance latch.
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let state = self.state.lock();
        for &frame_id in state.page_table.values() {
            self.flush_frame(frame_id)?;
        }
        Ok(())
    }

    /// Drop a page from the pool and release its backing storage. Deleting a
    /// page that is not resident succeeds; deleting a pinned page fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id < 0 {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        self.disk_manager.deallocate_page(page_id);

        let mut state = self.state.lock();
        let frame_id = match state.page_table.get(&page_id) {
            Some(&frame_id) => frame_id,
            None => return Ok(()),
        };

        let mut frame_guard = self.frames[frame_id as usize].write();
        if frame_guard.pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        state.page_table.remove(&page_id);
        state.replacer.pin(frame_id);
        {
            let page = frame_guard.page.clone();
            let mut page_guard = page.write();
            *page_guard = Page::new(INVALID_PAGE_ID);
        }
        frame_guard.is_dirty = false;
        state.free_list.push_back(frame_id);

        Ok(())
    }

    /// Number of frames in this instance.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Number of frames currently on the free list.
    pub fn free_frame_count(&self) -> usize {
        self.state.lock().free_list.len()
    }

    /// Hand out the next page id owned by this instance. Ids advance by
    /// `num_instances` so that `page_id % num_instances == instance_index`.
    fn allocate_page_id(&self, state: &mut PoolState) -> PageId {
        let page_id = state.next_page_id;
        state.next_page_id += self.num_instances as PageId;
        debug_assert_eq!(
            page_id.rem_euclid(self.num_instances as PageId),
            self.instance_index as PageId
        );
        page_id
    }

    /// Claim a reusable frame: free list first, then the replacer. An evicted
    /// dirty page is written back before the frame is handed out.
    fn find_free_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = state.replacer.victim().ok_or(BufferPoolError::NoFreeFrames)?;
        let mut frame_guard = self.frames[frame_id as usize].write();
        let page = frame_guard.page.clone();
        let old_page_id = page.read().page_id;

        if frame_guard.is_dirty {
            let page_guard = page.read();
            if let Err(e) = self.disk_manager.write_page(&page_guard) {
                drop(page_guard);
                drop(frame_guard);
                state.replacer.unpin(frame_id);
                return Err(e.into());
            }
            debug!("evicting dirty page {} from frame {}", old_page_id, frame_id);
        }
        frame_guard.is_dirty = false;

        if old_page_id != INVALID_PAGE_ID {
            state.page_table.remove(&old_page_id);
        }

        Ok(frame_id)
    }

    fn flush_frame(&self, frame_id: FrameId) -> Result<(), BufferPoolError> {
        let mut frame_guard = self.frames[frame_id as usize].write();
        if frame_guard.is_dirty {
            let page = frame_guard.page.clone();
            let page_guard = page.read();
            self.disk_manager.write_page(&page_guard)?;
        }
        frame_guard.is_dirty = false;
        Ok(())
    }
}

impl BufferPool for BufferPoolInstance {
    fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        BufferPoolInstance::new_page(self)
    }

    fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        BufferPoolInstance::fetch_page(self, page_id)
    }

    fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        BufferPoolInstance::unpin_page(self, page_id, is_dirty)
    }

    fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        BufferPoolInstance::flush_page(self, page_id)
    }

    fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        BufferPoolInstance::delete_page(self, page_id)
    }

    fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        BufferPoolInstance::flush_all_pages(self)
    }

    fn pool_size(&self) -> usize {
        BufferPoolInstance::pool_size(self)
    }
}
