use std::marker::PhantomData;
use std::sync::Arc;
use log::debug;
use parking_lot::RwLock;

use crate::common::types::{PageId, PagePtr};
use crate::index::hash::block_page::{block_array_size, BlockPageMut, BlockPageRef};
use crate::index::hash::error::{HashTableError, Result};
use crate::index::hash::header_page::{HeaderPageMut, HeaderPageRef};
use crate::index::hash::key::{hash_key, HashTableKey, HashTableValue};
use crate::storage::buffer::BufferPoolManager;
use crate::transaction::Transaction;

/// How one probe step over a block page ended
enum ProbeStep {
    /// Hit the probe terminator (an unoccupied slot) or finished the work
    Done,
    /// Examined every bucket without finding room or a terminator
    FullWrap,
    /// Ran off the end of this block; continue in the next one
    NextBlock,
}

/// A disk-resident hash map using linear probing, backed entirely by
/// buffer-pool pages: one header page pointing at lazily created block
/// pages.
///
/// Latch order is table latch, then header page latch, then block page
/// latch, taken top-down and released bottom-up. The table latch guards
/// the header page id; every operation takes it shared except `resize`,
/// which swaps in a rebuilt table under the exclusive latch.
pub struct LinearProbeHashTable<K, V> {
    buffer_pool: Arc<BufferPoolManager>,
    header_page_id: RwLock<PageId>,
    _marker: PhantomData<(K, V)>,
}

impl<K: HashTableKey, V: HashTableValue> LinearProbeHashTable<K, V> {
    /// Create a new table with at least `num_buckets` buckets, rounded up
    /// to whole block pages. Block pages themselves are created on first
    /// insert.
    pub fn new(buffer_pool: Arc<BufferPoolManager>, num_buckets: usize) -> Result<Self> {
        let block_size = block_array_size::<K, V>();
        let num_buckets = block_size * num_buckets.div_ceil(block_size).max(1);

        let (header_page, header_page_id) = buffer_pool.new_page()?;
        {
            let mut header_guard = header_page.write();
            HeaderPageMut::new(&mut header_guard.data).init(header_page_id, num_buckets as u32);
        }
        buffer_pool.unpin_page(header_page_id, true)?;

        Ok(Self {
            buffer_pool,
            header_page_id: RwLock::new(header_page_id),
            _marker: PhantomData,
        })
    }

    /// Reattach to a table whose header page already exists on disk
    pub fn open(buffer_pool: Arc<BufferPoolManager>, header_page_id: PageId) -> Self {
        Self {
            buffer_pool,
            header_page_id: RwLock::new(header_page_id),
            _marker: PhantomData,
        }
    }

    pub fn header_page_id(&self) -> PageId {
        *self.header_page_id.read()
    }

    /// Logical bucket capacity
    pub fn size(&self, _txn: &Transaction) -> Result<usize> {
        let table_guard = self.header_page_id.read();
        let (num_buckets, _) = self.header_snapshot(*table_guard)?;
        Ok(num_buckets)
    }

    /// Collect every value stored under `key`
    pub fn get_value(&self, _txn: &Transaction, key: &K) -> Result<Vec<V>> {
        let n = block_array_size::<K, V>();
        let table_guard = self.header_page_id.read();
        let (num_buckets, block_ids) = self.header_snapshot(*table_guard)?;
        let num_blocks_total = num_buckets / n;

        let total_idx = Self::bucket_of(key, num_buckets);
        let mut block_idx = total_idx / n;
        let mut bucket_idx = total_idx % n;
        let mut probed = 0usize;
        let mut result = Vec::new();

        if block_idx >= block_ids.len() {
            return Ok(result);
        }

        loop {
            let block_page_id = block_ids[block_idx];
            let block_page = self.buffer_pool.fetch_page(block_page_id)?;
            let step = {
                let block_guard = block_page.read();
                let block = BlockPageRef::<K, V>::new(&block_guard.data);
                loop {
                    if probed == num_buckets {
                        break ProbeStep::FullWrap;
                    }
                    if !block.is_occupied(bucket_idx) {
                        break ProbeStep::Done;
                    }
                    if block.is_readable(bucket_idx) && block.key_at(bucket_idx) == *key {
                        result.push(block.value_at(bucket_idx));
                    }
                    probed += 1;
                    bucket_idx += 1;
                    if bucket_idx == n {
                        break ProbeStep::NextBlock;
                    }
                }
            };
            self.buffer_pool.unpin_page(block_page_id, false)?;

            match step {
                ProbeStep::Done | ProbeStep::FullWrap => break,
                ProbeStep::NextBlock => {
                    bucket_idx = 0;
                    block_idx = (block_idx + 1) % num_blocks_total;
                    if block_idx >= block_ids.len() {
                        break;
                    }
                }
            }
        }
        Ok(result)
    }

    /// Insert a key/value pair. Returns false when the exact pair is
    /// already present. A fully wrapped probe doubles the table and
    /// retries.
    pub fn insert(&self, txn: &Transaction, key: &K, value: &V) -> Result<bool> {
        loop {
            let full_size = {
                let table_guard = self.header_page_id.read();
                let header_page_id = *table_guard;
                let header_page = self.buffer_pool.fetch_page(header_page_id)?;

                let (outcome, header_dirty) = self.try_insert(&header_page, key, value)?;
                self.buffer_pool.unpin_page(header_page_id, header_dirty)?;

                match outcome {
                    InsertOutcome::Inserted => return Ok(true),
                    InsertOutcome::Duplicate => return Ok(false),
                    InsertOutcome::TableFull(size) => size,
                }
            };
            debug!("hash table full at {} buckets, resizing", full_size);
            self.resize(txn, full_size)?;
        }
    }

    /// Remove the first slot holding exactly (key, value); tombstones it
    /// so longer probe chains stay reachable
    pub fn remove(&self, _txn: &Transaction, key: &K, value: &V) -> Result<bool> {
        let n = block_array_size::<K, V>();
        let table_guard = self.header_page_id.read();
        let (num_buckets, block_ids) = self.header_snapshot(*table_guard)?;
        let num_blocks_total = num_buckets / n;

        let total_idx = Self::bucket_of(key, num_buckets);
        let mut block_idx = total_idx / n;
        let mut bucket_idx = total_idx % n;
        let mut probed = 0usize;

        if block_idx >= block_ids.len() {
            return Ok(false);
        }

        loop {
            let block_page_id = block_ids[block_idx];
            let block_page = self.buffer_pool.fetch_page(block_page_id)?;
            let (step, removed) = {
                let mut block_guard = block_page.write();
                let mut block = BlockPageMut::<K, V>::new(&mut block_guard.data);
                let mut removed = false;
                let step = loop {
                    if probed == num_buckets {
                        break ProbeStep::FullWrap;
                    }
                    if !block.is_occupied(bucket_idx) {
                        break ProbeStep::Done;
                    }
                    if block.is_readable(bucket_idx)
                        && block.key_at(bucket_idx) == *key
                        && block.value_at(bucket_idx) == *value
                    {
                        block.remove(bucket_idx);
                        removed = true;
                        break ProbeStep::Done;
                    }
                    probed += 1;
                    bucket_idx += 1;
                    if bucket_idx == n {
                        break ProbeStep::NextBlock;
                    }
                };
                (step, removed)
            };
            self.buffer_pool.unpin_page(block_page_id, removed)?;

            match step {
                ProbeStep::Done | ProbeStep::FullWrap => return Ok(removed),
                ProbeStep::NextBlock => {
                    bucket_idx = 0;
                    block_idx = (block_idx + 1) % num_blocks_total;
                    if block_idx >= block_ids.len() {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Rebuild the table at twice `old_size` buckets and migrate every
    /// live entry. The only operation that takes the table latch
    /// exclusively; old pages are deleted after migration and the header
    /// pointer is swapped before the latch is released.
    pub fn resize(&self, _txn: &Transaction, old_size: usize) -> Result<()> {
        let n = block_array_size::<K, V>();
        let mut table_guard = self.header_page_id.write();
        let old_header_page_id = *table_guard;

        let (current_size, old_block_ids) = self.header_snapshot(old_header_page_id)?;
        if current_size != old_size {
            // Lost the race to another resize
            return Ok(());
        }

        let new_size = old_size * 2;
        let new_num_blocks = new_size / n;
        debug!("resizing hash table {} -> {} buckets", old_size, new_size);

        // Build the replacement header with every block pre-allocated
        let (new_header_page, new_header_page_id) = self.buffer_pool.new_page()?;
        let mut new_block_ids = Vec::with_capacity(new_num_blocks);
        {
            let mut header_guard = new_header_page.write();
            let mut header = HeaderPageMut::new(&mut header_guard.data);
            header.init(new_header_page_id, new_size as u32);
            for _ in 0..new_num_blocks {
                let (_block_page, block_page_id) = self.buffer_pool.new_page()?;
                let added = header.add_block_page_id(block_page_id);
                self.buffer_pool.unpin_page(block_page_id, false)?;
                if !added {
                    return Err(HashTableError::HeaderFull);
                }
                new_block_ids.push(block_page_id);
            }
        }
        self.buffer_pool.unpin_page(new_header_page_id, true)?;

        // Migrate live entries, then drop each source block
        for &old_block_page_id in &old_block_ids {
            let old_block_page = self.buffer_pool.fetch_page(old_block_page_id)?;
            {
                let old_guard = old_block_page.read();
                let old_block = BlockPageRef::<K, V>::new(&old_guard.data);
                for slot in 0..n {
                    if old_block.is_readable(slot) {
                        let key = old_block.key_at(slot);
                        let value = old_block.value_at(slot);
                        self.migrate_entry(&new_block_ids, new_size, &key, &value)?;
                    }
                }
            }
            self.buffer_pool.unpin_page(old_block_page_id, false)?;
            self.buffer_pool.delete_page(old_block_page_id)?;
        }
        self.buffer_pool.delete_page(old_header_page_id)?;

        *table_guard = new_header_page_id;
        Ok(())
    }

    /// One insert attempt against the current header. The caller holds the
    /// shared table latch and a pin on the header page.
    fn try_insert(
        &self,
        header_page: &PagePtr,
        key: &K,
        value: &V,
    ) -> Result<(InsertOutcome, bool)> {
        let n = block_array_size::<K, V>();
        let num_buckets = {
            let header_guard = header_page.read();
            HeaderPageRef::new(&header_guard.data).size() as usize
        };
        let num_blocks_total = num_buckets / n;

        let total_idx = Self::bucket_of(key, num_buckets);
        let mut block_idx = total_idx / n;
        let mut bucket_idx = total_idx % n;
        let mut probed = 0usize;
        let mut header_dirty = self.ensure_blocks(header_page, block_idx)?;

        loop {
            let block_page_id = {
                let header_guard = header_page.read();
                HeaderPageRef::new(&header_guard.data).block_page_id(block_idx)
            };
            let block_page = self.buffer_pool.fetch_page(block_page_id)?;
            let (step, inserted) = {
                let mut block_guard = block_page.write();
                let mut block = BlockPageMut::<K, V>::new(&mut block_guard.data);
                let mut inserted = false;
                let step = loop {
                    if probed == num_buckets {
                        break ProbeStep::FullWrap;
                    }
                    if !block.is_occupied(bucket_idx) {
                        block.insert(bucket_idx, key, value);
                        inserted = true;
                        break ProbeStep::Done;
                    }
                    if block.is_readable(bucket_idx)
                        && block.key_at(bucket_idx) == *key
                        && block.value_at(bucket_idx) == *value
                    {
                        break ProbeStep::Done;
                    }
                    probed += 1;
                    bucket_idx += 1;
                    if bucket_idx == n {
                        break ProbeStep::NextBlock;
                    }
                };
                (step, inserted)
            };
            self.buffer_pool.unpin_page(block_page_id, inserted)?;

            match step {
                ProbeStep::Done => {
                    let outcome = if inserted {
                        InsertOutcome::Inserted
                    } else {
                        InsertOutcome::Duplicate
                    };
                    return Ok((outcome, header_dirty));
                }
                ProbeStep::FullWrap => {
                    return Ok((InsertOutcome::TableFull(num_buckets), header_dirty));
                }
                ProbeStep::NextBlock => {
                    bucket_idx = 0;
                    block_idx = (block_idx + 1) % num_blocks_total;
                    header_dirty |= self.ensure_blocks(header_page, block_idx)?;
                }
            }
        }
    }

    /// Make sure block pages exist up to and including `block_idx`,
    /// upgrading the header latch only when creation is needed. Returns
    /// whether the header page was modified.
    ///
    /// New pages are allocated before the exclusive latch is taken, so no
    /// buffer pool call ever runs under a page latch; allocations made
    /// redundant by a concurrent grower are handed back.
    fn ensure_blocks(&self, header_page: &PagePtr, block_idx: usize) -> Result<bool> {
        let existing = {
            let header_guard = header_page.read();
            HeaderPageRef::new(&header_guard.data).num_blocks() as usize
        };
        if block_idx < existing {
            return Ok(false);
        }

        let mut fresh = Vec::with_capacity(block_idx + 1 - existing);
        for _ in 0..block_idx + 1 - existing {
            let (_block_page, block_page_id) = self.buffer_pool.new_page()?;
            self.buffer_pool.unpin_page(block_page_id, false)?;
            fresh.push(block_page_id);
        }

        let mut dirtied = false;
        let mut header_full = false;
        let mut surplus = Vec::new();
        {
            let mut header_guard = header_page.write();
            for block_page_id in fresh {
                let mut header = HeaderPageMut::new(&mut header_guard.data);
                if header_full || header.num_blocks() as usize > block_idx {
                    surplus.push(block_page_id);
                } else if header.add_block_page_id(block_page_id) {
                    dirtied = true;
                } else {
                    header_full = true;
                    surplus.push(block_page_id);
                }
            }
        }
        for block_page_id in surplus {
            self.buffer_pool.delete_page(block_page_id)?;
        }
        if header_full {
            return Err(HashTableError::HeaderFull);
        }
        Ok(dirtied)
    }

    /// Place one entry into the replacement table during resize. The new
    /// table is at most half full, so the probe always finds a free slot.
    fn migrate_entry(
        &self,
        block_ids: &[PageId],
        num_buckets: usize,
        key: &K,
        value: &V,
    ) -> Result<()> {
        let n = block_array_size::<K, V>();
        let total_idx = Self::bucket_of(key, num_buckets);
        let mut block_idx = total_idx / n;
        let mut bucket_idx = total_idx % n;

        loop {
            let block_page_id = block_ids[block_idx];
            let block_page = self.buffer_pool.fetch_page(block_page_id)?;
            let placed = {
                let mut block_guard = block_page.write();
                let mut block = BlockPageMut::<K, V>::new(&mut block_guard.data);
                loop {
                    if !block.is_occupied(bucket_idx) {
                        block.insert(bucket_idx, key, value);
                        break true;
                    }
                    bucket_idx += 1;
                    if bucket_idx == n {
                        break false;
                    }
                }
            };
            self.buffer_pool.unpin_page(block_page_id, placed)?;
            if placed {
                return Ok(());
            }
            bucket_idx = 0;
            block_idx = (block_idx + 1) % block_ids.len();
        }
    }

    /// Fetch the header once and copy out its size and block ids
    fn header_snapshot(&self, header_page_id: PageId) -> Result<(usize, Vec<PageId>)> {
        let header_page = self.buffer_pool.fetch_page(header_page_id)?;
        let snapshot = {
            let header_guard = header_page.read();
            let header = HeaderPageRef::new(&header_guard.data);
            let block_ids = (0..header.num_blocks() as usize)
                .map(|i| header.block_page_id(i))
                .collect();
            (header.size() as usize, block_ids)
        };
        self.buffer_pool.unpin_page(header_page_id, false)?;
        Ok(snapshot)
    }

    fn bucket_of(key: &K, num_buckets: usize) -> usize {
        (hash_key(key) % num_buckets as u64) as usize
    }
}

enum InsertOutcome {
    Inserted,
    Duplicate,
    TableFull(usize),
}
