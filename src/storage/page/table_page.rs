use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Lsn, PageId, Tuple, INVALID_LSN, INVALID_PAGE_ID, PAGE_SIZE};
use crate::storage::page::error::PageError;

/// Byte-level operations over a slotted tuple page.
///
/// Page layout (sizes in bytes):
///
/// | page_id (4) | lsn (4) | prev_page_id (4) | next_page_id (4) |
/// | free_space_pointer (4) | slot_count (4) | slot array ... free ... tuple data |
///
/// Slots grow upward from the header, each `offset (4) | length (4)`;
/// tuple data grows downward from the end of the page. The high bit of a
/// slot's length is the delete mark, so a marked tuple keeps its bytes
/// until the delete is applied.
pub struct TablePage;

pub const HEADER_SIZE: usize = 24;
const SLOT_SIZE: usize = 8;

const OFFSET_LSN: usize = 4;
const OFFSET_PREV_PAGE_ID: usize = 8;
const OFFSET_NEXT_PAGE_ID: usize = 12;
const OFFSET_FREE_SPACE_PTR: usize = 16;
const OFFSET_SLOT_COUNT: usize = 20;

const DELETE_MASK: u32 = 1 << 31;

impl TablePage {
    /// Format a raw page as an empty table page
    pub fn init(data: &mut [u8], page_id: PageId, prev_page_id: PageId) {
        data[..PAGE_SIZE].fill(0);
        LittleEndian::write_u32(&mut data[0..4], page_id);
        Self::set_lsn(data, INVALID_LSN);
        LittleEndian::write_u32(&mut data[OFFSET_PREV_PAGE_ID..OFFSET_PREV_PAGE_ID + 4], prev_page_id);
        LittleEndian::write_u32(&mut data[OFFSET_NEXT_PAGE_ID..OFFSET_NEXT_PAGE_ID + 4], INVALID_PAGE_ID);
        LittleEndian::write_u32(&mut data[OFFSET_FREE_SPACE_PTR..OFFSET_FREE_SPACE_PTR + 4], PAGE_SIZE as u32);
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

    pub fn prev_page_id(data: &[u8]) -> PageId {
        LittleEndian::read_u32(&data[OFFSET_PREV_PAGE_ID..OFFSET_PREV_PAGE_ID + 4])
    }

    pub fn next_page_id(data: &[u8]) -> PageId {
        LittleEndian::read_u32(&data[OFFSET_NEXT_PAGE_ID..OFFSET_NEXT_PAGE_ID + 4])
    }

    pub fn set_next_page_id(data: &mut [u8], page_id: PageId) {
        LittleEndian::write_u32(&mut data[OFFSET_NEXT_PAGE_ID..OFFSET_NEXT_PAGE_ID + 4], page_id);
    }

    pub fn slot_count(data: &[u8]) -> u32 {
        LittleEndian::read_u32(&data[OFFSET_SLOT_COUNT..OFFSET_SLOT_COUNT + 4])
    }

    pub fn free_space(data: &[u8]) -> usize {
        let fsp = Self::free_space_pointer(data);
        let used = HEADER_SIZE + SLOT_SIZE * Self::slot_count(data) as usize;
        fsp.saturating_sub(used)
    }

    /// Insert a tuple into the first free slot, or a fresh one
    pub fn insert_tuple(data: &mut [u8], tuple: &Tuple) -> Result<u32, PageError> {
        if tuple.is_empty() {
            return Err(PageError::EmptyTuple);
        }

        let slot_count = Self::slot_count(data);
        let reuse = (0..slot_count).find(|&i| {
            let (offset, len) = Self::slot(data, i);
            offset == 0 && len == 0
        });

        let new_slot_cost = if reuse.is_some() { 0 } else { SLOT_SIZE };
        if Self::free_space(data) < tuple.len() + new_slot_cost {
            return Err(PageError::InsufficientSpace);
        }

        let slot = match reuse {
            Some(i) => i,
            None => {
                Self::set_slot_count(data, slot_count + 1);
                slot_count
            }
        };
        Self::place_tuple(data, slot, tuple);
        Ok(slot)
    }

    /// Insert a tuple into a specific slot, extending the slot array as
    /// needed. Used by redo and undo to restore a tuple to its original RID.
    pub fn insert_tuple_at(data: &mut [u8], slot: u32, tuple: &Tuple) -> Result<(), PageError> {
        if tuple.is_empty() {
            return Err(PageError::EmptyTuple);
        }

        let slot_count = Self::slot_count(data);
        if slot < slot_count {
            let (offset, len) = Self::slot(data, slot);
            if offset != 0 || len != 0 {
                return Err(PageError::DuplicateRecord);
            }
            if Self::free_space(data) < tuple.len() {
                return Err(PageError::InsufficientSpace);
            }
        } else {
            let extra_slots = (slot - slot_count + 1) as usize;
            if Self::free_space(data) < tuple.len() + SLOT_SIZE * extra_slots {
                return Err(PageError::InsufficientSpace);
            }
            // Intermediate slots stay zeroed, i.e. empty
            Self::set_slot_count(data, slot + 1);
        }
        Self::place_tuple(data, slot, tuple);
        Ok(())
    }

    /// Fetch a live tuple
    pub fn get_tuple(data: &[u8], slot: u32) -> Result<Tuple, PageError> {
        let (offset, len) = Self::checked_slot(data, slot)?;
        if offset == 0 && len == 0 {
            return Err(PageError::RecordNotFound);
        }
        if len & DELETE_MASK != 0 {
            return Err(PageError::RecordNotFound);
        }
        let start = offset as usize;
        let end = start + len as usize;
        Ok(Tuple::from(&data[start..end]))
    }

    /// Set the delete mark on a tuple, keeping its bytes in place
    pub fn mark_delete(data: &mut [u8], slot: u32) -> Result<(), PageError> {
        let (offset, len) = Self::checked_slot(data, slot)?;
        if offset == 0 && len == 0 || len & DELETE_MASK != 0 {
            return Err(PageError::RecordNotFound);
        }
        Self::set_slot(data, slot, offset, len | DELETE_MASK);
        Ok(())
    }

    /// Clear the delete mark, restoring the tuple
    pub fn rollback_delete(data: &mut [u8], slot: u32) -> Result<(), PageError> {
        let (offset, len) = Self::checked_slot(data, slot)?;
        if offset == 0 && len == 0 {
            return Err(PageError::RecordNotFound);
        }
        Self::set_slot(data, slot, offset, len & !DELETE_MASK);
        Ok(())
    }

    /// Physically delete a tuple. The slot becomes empty; the tuple's bytes
    /// are abandoned until the page is reformatted.
    pub fn apply_delete(data: &mut [u8], slot: u32) -> Result<(), PageError> {
        let (offset, len) = Self::checked_slot(data, slot)?;
        if offset == 0 && len == 0 {
            return Err(PageError::RecordNotFound);
        }
        Self::set_slot(data, slot, 0, 0);
        Ok(())
    }

    /// Overwrite a live tuple in place, relocating it when it grows
    pub fn update_tuple(data: &mut [u8], slot: u32, tuple: &Tuple) -> Result<(), PageError> {
        if tuple.is_empty() {
            return Err(PageError::EmptyTuple);
        }
        let (offset, len) = Self::checked_slot(data, slot)?;
        if offset == 0 && len == 0 || len & DELETE_MASK != 0 {
            return Err(PageError::RecordNotFound);
        }

        let old_len = (len & !DELETE_MASK) as usize;
        if tuple.len() <= old_len {
            let start = offset as usize;
            data[start..start + tuple.len()].copy_from_slice(tuple.as_bytes());
            Self::set_slot(data, slot, offset, tuple.len() as u32);
        } else {
            if Self::free_space(data) < tuple.len() {
                return Err(PageError::InsufficientSpace);
            }
            Self::place_tuple(data, slot, tuple);
        }
        Ok(())
    }

    fn place_tuple(data: &mut [u8], slot: u32, tuple: &Tuple) {
        let fsp = Self::free_space_pointer(data) - tuple.len();
        data[fsp..fsp + tuple.len()].copy_from_slice(tuple.as_bytes());
        LittleEndian::write_u32(&mut data[OFFSET_FREE_SPACE_PTR..OFFSET_FREE_SPACE_PTR + 4], fsp as u32);
        Self::set_slot(data, slot, fsp as u32, tuple.len() as u32);
    }

    fn free_space_pointer(data: &[u8]) -> usize {
        LittleEndian::read_u32(&data[OFFSET_FREE_SPACE_PTR..OFFSET_FREE_SPACE_PTR + 4]) as usize
    }

    fn set_slot_count(data: &mut [u8], count: u32) {
        LittleEndian::write_u32(&mut data[OFFSET_SLOT_COUNT..OFFSET_SLOT_COUNT + 4], count);
    }

    fn slot(data: &[u8], slot: u32) -> (u32, u32) {
        let pos = HEADER_SIZE + SLOT_SIZE * slot as usize;
        (
            LittleEndian::read_u32(&data[pos..pos + 4]),
            LittleEndian::read_u32(&data[pos + 4..pos + 8]),
        )
    }

    fn checked_slot(data: &[u8], slot: u32) -> Result<(u32, u32), PageError> {
        if slot >= Self::slot_count(data) {
            return Err(PageError::InvalidRecordId);
        }
        Ok(Self::slot(data, slot))
    }

    fn set_slot(data: &mut [u8], slot: u32, offset: u32, len: u32) {
        let pos = HEADER_SIZE + SLOT_SIZE * slot as usize;
        LittleEndian::write_u32(&mut data[pos..pos + 4], offset);
        LittleEndian::write_u32(&mut data[pos + 4..pos + 8], len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_page() -> [u8; PAGE_SIZE] {
        let mut data = [0u8; PAGE_SIZE];
        TablePage::init(&mut data, 7, INVALID_PAGE_ID);
        data
    }

    #[test]
    fn test_init_metadata() {
        let data = fresh_page();
        assert_eq!(TablePage::page_id(&data), 7);
        assert_eq!(TablePage::page_lsn(&data), INVALID_LSN);
        assert_eq!(TablePage::next_page_id(&data), INVALID_PAGE_ID);
        assert_eq!(TablePage::slot_count(&data), 0);
    }

    #[test]
    fn test_insert_and_get() {
        let mut data = fresh_page();
        let tuple = Tuple::new(b"hello".to_vec());
        let slot = TablePage::insert_tuple(&mut data, &tuple).unwrap();
        assert_eq!(TablePage::get_tuple(&data, slot).unwrap(), tuple);
    }

    #[test]
    fn test_mark_and_rollback_delete() {
        let mut data = fresh_page();
        let tuple = Tuple::new(b"doomed".to_vec());
        let slot = TablePage::insert_tuple(&mut data, &tuple).unwrap();

        TablePage::mark_delete(&mut data, slot).unwrap();
        assert!(TablePage::get_tuple(&data, slot).is_err());

        TablePage::rollback_delete(&mut data, slot).unwrap();
        assert_eq!(TablePage::get_tuple(&data, slot).unwrap(), tuple);
    }

    #[test]
    fn test_apply_delete_then_reinsert_at() {
        let mut data = fresh_page();
        let tuple = Tuple::new(b"victim".to_vec());
        let slot = TablePage::insert_tuple(&mut data, &tuple).unwrap();

        TablePage::apply_delete(&mut data, slot).unwrap();
        assert!(TablePage::get_tuple(&data, slot).is_err());

        TablePage::insert_tuple_at(&mut data, slot, &tuple).unwrap();
        assert_eq!(TablePage::get_tuple(&data, slot).unwrap(), tuple);
    }

    #[test]
    fn test_insert_at_extends_slot_array() {
        let mut data = fresh_page();
        let tuple = Tuple::new(b"far".to_vec());
        TablePage::insert_tuple_at(&mut data, 3, &tuple).unwrap();
        assert_eq!(TablePage::slot_count(&data), 4);
        assert_eq!(TablePage::get_tuple(&data, 3).unwrap(), tuple);
        // Intermediate slots are empty
        assert!(TablePage::get_tuple(&data, 0).is_err());
    }

    #[test]
    fn test_update_shrink_and_grow() {
        let mut data = fresh_page();
        let slot = TablePage::insert_tuple(&mut data, &Tuple::new(b"abcdef".to_vec())).unwrap();

        TablePage::update_tuple(&mut data, slot, &Tuple::new(b"xy".to_vec())).unwrap();
        assert_eq!(TablePage::get_tuple(&data, slot).unwrap().as_bytes(), b"xy");

        TablePage::update_tuple(&mut data, slot, &Tuple::new(b"longer-than-before".to_vec())).unwrap();
        assert_eq!(
            TablePage::get_tuple(&data, slot).unwrap().as_bytes(),
            b"longer-than-before"
        );
    }

    #[test]
    fn test_page_full() {
        let mut data = fresh_page();
        let big = Tuple::new(vec![0xAA; 1024]);
        let mut inserted = 0;
        while TablePage::insert_tuple(&mut data, &big).is_ok() {
            inserted += 1;
        }
        assert!(inserted >= 3);
        assert!(matches!(
            TablePage::insert_tuple(&mut data, &big),
            Err(PageError::InsufficientSpace)
        ));
    }
}
