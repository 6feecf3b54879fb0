use std::sync::Arc;
use parking_lot::RwLock;

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = u32;

/// Sentinel page ID; disk allocation starts at 1
pub const INVALID_PAGE_ID: PageId = 0;

/// Transaction ID type
pub type TxnId = u32;

/// Buffer pool frame ID type
pub type FrameId = usize;

/// LSN (Log Sequence Number) type
pub type Lsn = i32;

/// Sentinel LSN; assigned LSNs start at 0
pub const INVALID_LSN: Lsn = -1;

/// Record ID: the page a tuple lives on plus its slot index within the page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rid {
    pub page_id: PageId,
    pub slot: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot: u32) -> Self {
        Self { page_id, slot }
    }
}

/// An opaque tuple payload, length-prefixed on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tuple {
    data: Vec<u8>,
}

impl Tuple {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl From<&[u8]> for Tuple {
    fn from(bytes: &[u8]) -> Self {
        Self { data: bytes.to_vec() }
    }
}

/// Page structure
#[derive(Debug, Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }

    pub fn reset(&mut self) {
        self.data = [0; PAGE_SIZE];
        self.page_id = INVALID_PAGE_ID;
    }
}

/// Smart pointer to a page; the RwLock doubles as the page latch
pub type PagePtr = Arc<RwLock<Page>>;

/// Buffer pool frame structure
#[derive(Debug)]
pub struct Frame {
    pub page: PagePtr,
    pub frame_id: FrameId,
    pub is_dirty: bool,
    pub pin_count: u32,
}

impl Frame {
    pub fn new(frame_id: FrameId, page: PagePtr) -> Self {
        Self {
            page,
            frame_id,
            is_dirty: false,
            pin_count: 0,
        }
    }
}

/// Smart pointer to a frame
pub type FramePtr = Arc<RwLock<Frame>>;
