use std::io::Cursor;
use byteorder::{ByteOrder, LittleEndian};
use murmur3::murmur3_32;

use crate::common::types::Rid;

/// Fixed seed so bucket homes stay stable across process restarts
const HASH_SEED: u32 = 0x9747_b28c;

/// A fixed-width key storable in a hash table block page. Keys and values
/// are specialized at compile time; there is no runtime dispatch on the
/// probe path.
pub trait HashTableKey: Copy + PartialEq {
    const ENCODED_SIZE: usize;
    fn encode(&self, dst: &mut [u8]);
    fn decode(src: &[u8]) -> Self;
}

/// A fixed-width value storable alongside a key
pub trait HashTableValue: Copy + PartialEq {
    const ENCODED_SIZE: usize;
    fn encode(&self, dst: &mut [u8]);
    fn decode(src: &[u8]) -> Self;
}

/// Deterministic bucket hash over a key's encoded bytes
pub fn hash_key<K: HashTableKey>(key: &K) -> u64 {
    let mut buf = [0u8; 16];
    key.encode(&mut buf[..K::ENCODED_SIZE]);
    let mut cursor = Cursor::new(&buf[..K::ENCODED_SIZE]);
    murmur3_32(&mut cursor, HASH_SEED).expect("hashing an in-memory buffer cannot fail") as u64
}

impl HashTableKey for i32 {
    const ENCODED_SIZE: usize = 4;

    fn encode(&self, dst: &mut [u8]) {
        LittleEndian::write_i32(dst, *self);
    }

    fn decode(src: &[u8]) -> Self {
        LittleEndian::read_i32(src)
    }
}

impl HashTableKey for u32 {
    const ENCODED_SIZE: usize = 4;

    fn encode(&self, dst: &mut [u8]) {
        LittleEndian::write_u32(dst, *self);
    }

    fn decode(src: &[u8]) -> Self {
        LittleEndian::read_u32(src)
    }
}

impl HashTableKey for u64 {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, dst: &mut [u8]) {
        LittleEndian::write_u64(dst, *self);
    }

    fn decode(src: &[u8]) -> Self {
        LittleEndian::read_u64(src)
    }
}

impl HashTableValue for i32 {
    const ENCODED_SIZE: usize = 4;

    fn encode(&self, dst: &mut [u8]) {
        LittleEndian::write_i32(dst, *self);
    }

    fn decode(src: &[u8]) -> Self {
        LittleEndian::read_i32(src)
    }
}

impl HashTableValue for u32 {
    const ENCODED_SIZE: usize = 4;

    fn encode(&self, dst: &mut [u8]) {
        LittleEndian::write_u32(dst, *self);
    }

    fn decode(src: &[u8]) -> Self {
        LittleEndian::read_u32(src)
    }
}

impl HashTableValue for u64 {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, dst: &mut [u8]) {
        LittleEndian::write_u64(dst, *self);
    }

    fn decode(src: &[u8]) -> Self {
        LittleEndian::read_u64(src)
    }
}

impl HashTableValue for Rid {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, dst: &mut [u8]) {
        LittleEndian::write_u32(&mut dst[0..4], self.page_id);
        LittleEndian::write_u32(&mut dst[4..8], self.slot);
    }

    fn decode(src: &[u8]) -> Self {
        Rid::new(
            LittleEndian::read_u32(&src[0..4]),
            LittleEndian::read_u32(&src[4..8]),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash_key(&42i32), hash_key(&42i32));
        assert_ne!(hash_key(&42i32), hash_key(&43i32));
    }

    #[test]
    fn test_rid_value_round_trip() {
        let rid = Rid::new(9, 4);
        let mut buf = [0u8; 8];
        rid.encode(&mut buf);
        assert_eq!(Rid::decode(&buf), rid);
    }
}
