use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Lsn, PageId, Tuple, INVALID_LSN, PAGE_SIZE};

/// Scratch page for spilling intermediate tuples (hash aggregation, joins).
///
/// Layout (sizes in bytes):
///
/// | page_id (4) | lsn (4) | free_space_remaining (4) | ... free ... |
/// | tupleN_len (4) | tupleN bytes | ... | tuple1_len (4) | tuple1 bytes |
///
/// Payloads grow downward from the end of the page, each length written
/// just below its bytes, so a reader at a tuple offset reads the length
/// first and then backs up to the data.
pub struct TmpTuplePage;

const HEADER_SIZE: usize = 12;
const OFFSET_LSN: usize = 4;
const OFFSET_FREE_SPACE: usize = 8;
const SIZE_TUPLE_LEN: usize = 4;

impl TmpTuplePage {
    pub fn init(data: &mut [u8], page_id: PageId) {
        data[..PAGE_SIZE].fill(0);
        LittleEndian::write_u32(&mut data[0..4], page_id);
        Self::set_lsn(data, INVALID_LSN);
        Self::set_free_space_remaining(data, (PAGE_SIZE - HEADER_SIZE) as u32);
    }

    pub fn page_id(data: &[u8]) -> PageId {
        LittleEndian::read_u32(&data[0..4])
    }

    pub fn page_lsn(data: &[u8]) -> Lsn {
        LittleEndian::read_i32(&data[OFFSET_LSN..OFFSET_LSN + 4])
    }

    pub fn set_lsn(data: &mut [u8], lsn: Lsn) {
        LittleEndian::write_i32(&mut data[OFFSET_LSN..OFFSET_LSN + 4], lsn);
    }

    pub fn free_space_remaining(data: &[u8]) -> u32 {
        LittleEndian::read_u32(&data[OFFSET_FREE_SPACE..OFFSET_FREE_SPACE + 4])
    }

    /// Append a tuple; returns the byte offset its data starts at, or None
    /// when the page cannot hold it
    pub fn insert_tuple(data: &mut [u8], tuple: &Tuple) -> Option<usize> {
        let remaining = Self::free_space_remaining(data) as usize;
        if tuple.is_empty() || remaining < tuple.len() + SIZE_TUPLE_LEN {
            return None;
        }

        let mut remaining = remaining - tuple.len();
        let offset = HEADER_SIZE + remaining;
        data[offset..offset + tuple.len()].copy_from_slice(tuple.as_bytes());

        remaining -= SIZE_TUPLE_LEN;
        let len_offset = HEADER_SIZE + remaining;
        LittleEndian::write_u32(&mut data[len_offset..len_offset + 4], tuple.len() as u32);

        Self::set_free_space_remaining(data, remaining as u32);
        Some(offset)
    }

    /// Read back the tuple whose data starts at `offset`
    pub fn get_tuple(data: &[u8], offset: usize) -> Tuple {
        let len = LittleEndian::read_u32(&data[offset - SIZE_TUPLE_LEN..offset]) as usize;
        Tuple::from(&data[offset..offset + len])
    }

    fn set_free_space_remaining(data: &mut [u8], remaining: u32) {
        LittleEndian::write_u32(&mut data[OFFSET_FREE_SPACE..OFFSET_FREE_SPACE + 4], remaining);
    }
}
