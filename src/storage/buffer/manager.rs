use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};

use crate::common::types::{Frame, FrameId, Page, PageId, PagePtr, FramePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::replacer::ClockReplacer;
use crate::storage::disk::DiskManager;
use crate::storage::page::TablePage;
use crate::transaction::wal::log_manager::LogManager;

/// Page table and free list, serialized under one latch
struct PoolInner {
    page_table: HashMap<PageId, FrameId>,
    free_list: VecDeque<FrameId>,
}

/// Caches fixed-size pages in a bounded set of frames, with pin/unpin
/// reference counting and clock eviction.
///
/// When a log manager is attached, a dirty page whose page-LSN exceeds the
/// persistent LSN is held back until the flusher catches up (write-ahead
/// ordering).
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<FramePtr>,
    inner: Mutex<PoolInner>,
    replacer: ClockReplacer,
    disk_manager: Arc<DiskManager>,
    log_manager: Option<Arc<LogManager>>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, db_path: impl AsRef<Path>) -> Result<Self, BufferPoolError> {
        let disk_manager = Arc::new(DiskManager::new(db_path)?);
        Ok(Self::new_with_disk_manager(pool_size, disk_manager))
    }

    /// Create a buffer pool over an existing disk manager, without a WAL
    /// gate. Recovery uses this to replay the log onto the same device.
    pub fn new_with_disk_manager(pool_size: usize, disk_manager: Arc<DiskManager>) -> Self {
        Self::new_with_disk(pool_size, disk_manager, None)
    }

    /// Create a buffer pool wired to a log manager, enabling the
    /// write-ahead flush gate. The disk manager is shared so that pages and
    /// log records go through the same device.
    pub fn new_with_wal(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Arc<LogManager>,
    ) -> Self {
        Self::new_with_disk(pool_size, disk_manager, Some(log_manager))
    }

    fn new_with_disk(
        pool_size: usize,
        disk_manager: Arc<DiskManager>,
        log_manager: Option<Arc<LogManager>>,
    ) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);

        for frame_id in 0..pool_size {
            let page = Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID)));
            frames.push(Arc::new(RwLock::new(Frame::new(frame_id, page))));
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            inner: Mutex::new(PoolInner {
                page_table: HashMap::new(),
                free_list,
            }),
            replacer: ClockReplacer::new(pool_size),
            disk_manager,
            log_manager,
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    pub fn disk_manager(&self) -> &Arc<DiskManager> {
        &self.disk_manager
    }

    /// Fetch a page from the buffer pool, reading it from disk on a miss
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot fetch the invalid page ID".to_string(),
            ));
        }

        let mut inner = self.inner.lock();

        if let Some(&frame_id) = inner.page_table.get(&page_id) {
            let frame = &self.frames[frame_id];
            frame.write().pin_count += 1;
            self.replacer.pin(frame_id);
            return Ok(frame.read().page.clone());
        }

        let frame_id = self.acquire_frame(&mut inner)?;
        let frame = &self.frames[frame_id];
        {
            let mut frame_guard = frame.write();
            {
                let mut page_guard = frame_guard.page.write();
                if let Err(e) = self.disk_manager.read_page(page_id, &mut page_guard) {
                    page_guard.reset();
                    drop(page_guard);
                    inner.free_list.push_front(frame_id);
                    return Err(e.into());
                }
            }
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
        }
        inner.page_table.insert(page_id, frame_id);

        Ok(frame.read().page.clone())
    }

    /// Allocate a fresh page on disk and pin it in a zeroed frame
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut inner = self.inner.lock();

        let frame_id = self.acquire_frame(&mut inner)?;
        let page_id = match self.disk_manager.allocate_page() {
            Ok(id) => id,
            Err(e) => {
                inner.free_list.push_front(frame_id);
                return Err(e.into());
            }
        };

        let frame = &self.frames[frame_id];
        {
            let mut frame_guard = frame.write();
            {
                let mut page_guard = frame_guard.page.write();
                page_guard.reset();
                page_guard.page_id = page_id;
            }
            frame_guard.pin_count = 1;
            frame_guard.is_dirty = false;
        }
        inner.page_table.insert(page_id, frame_id);

        Ok((frame.read().page.clone(), page_id))
    }

    /// Drop one pin on a page, OR-ing in the caller's dirty flag
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let inner = self.inner.lock();
        let frame_id = *inner
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;

        let frame = &self.frames[frame_id];
        let mut frame_guard = frame.write();
        if frame_guard.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        frame_guard.is_dirty = frame_guard.is_dirty || is_dirty;
        frame_guard.pin_count -= 1;
        if frame_guard.pin_count == 0 {
            self.replacer.unpin(frame_id);
        }
        Ok(())
    }

    /// Write a resident page out to disk, clearing its dirty bit
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidOperation(
                "cannot flush the invalid page ID".to_string(),
            ));
        }

        let inner = self.inner.lock();
        let frame_id = *inner
            .page_table
            .get(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;
        self.flush_frame(&self.frames[frame_id])
    }

    /// Flush every resident dirty page
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let inner = self.inner.lock();
        for &frame_id in inner.page_table.values() {
            let frame = &self.frames[frame_id];
            if frame.read().is_dirty {
                self.flush_frame(frame)?;
            }
        }
        Ok(())
    }

    /// Drop a page from the pool and tell the disk device to deallocate it.
    /// Deleting a page that is not resident succeeds; deleting a pinned
    /// page fails.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut inner = self.inner.lock();
        let frame_id = match inner.page_table.get(&page_id) {
            Some(&id) => id,
            None => return Ok(()),
        };

        let frame = &self.frames[frame_id];
        {
            let mut frame_guard = frame.write();
            if frame_guard.pin_count > 0 {
                return Err(BufferPoolError::PagePinned(page_id));
            }
            frame_guard.page.write().reset();
            frame_guard.is_dirty = false;
        }
        inner.page_table.remove(&page_id);
        self.replacer.pin(frame_id);
        inner.free_list.push_back(frame_id);
        self.disk_manager.deallocate_page(page_id);
        Ok(())
    }

    /// Pick a frame for reuse: free list first, then a clock victim whose
    /// contents are flushed out if dirty
    fn acquire_frame(&self, inner: &mut PoolInner) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = inner.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = self
            .replacer
            .victim()
            .ok_or(BufferPoolError::BufferPoolFull)?;
        let frame = &self.frames[frame_id];

        if frame.read().is_dirty {
            self.flush_frame(frame)?;
        }
        let old_page_id = frame.read().page.read().page_id;
        if old_page_id != INVALID_PAGE_ID {
            inner.page_table.remove(&old_page_id);
        }
        Ok(frame_id)
    }

    /// Write a frame's page to disk, honoring the write-ahead gate
    fn flush_frame(&self, frame: &FramePtr) -> Result<(), BufferPoolError> {
        let page = frame.read().page.clone();
        self.wait_for_wal(&page);
        {
            let page_guard = page.read();
            self.disk_manager.write_page(&page_guard)?;
        }
        frame.write().is_dirty = false;
        Ok(())
    }

    /// Spin until every log record reflected in the page is durable. The
    /// flusher is nudged each iteration so the wait is bounded by one
    /// group-commit cycle.
    fn wait_for_wal(&self, page: &PagePtr) {
        let log_manager = match &self.log_manager {
            Some(lm) if lm.is_logging_enabled() => lm,
            _ => return,
        };
        loop {
            let page_lsn = TablePage::page_lsn(&page.read().data);
            if page_lsn <= log_manager.persistent_lsn() {
                break;
            }
            log_manager.wake_flusher();
            std::thread::yield_now();
        }
    }
}
