use std::sync::Arc;
use anyhow::Result;

mod common;
use common::create_test_buffer_pool;

use siltdb::index::hash::block_page::block_array_size;
use siltdb::index::hash::key::hash_key;
use siltdb::index::hash::LinearProbeHashTable;
use siltdb::transaction::Transaction;

#[test]
fn test_insert_and_get() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(16)?;
    let table = LinearProbeHashTable::<i32, i32>::new(buffer_pool, 64)?;
    let txn = Transaction::new(1);

    assert!(table.insert(&txn, &7, &70)?);
    assert!(table.insert(&txn, &8, &80)?);

    assert_eq!(table.get_value(&txn, &7)?, vec![70]);
    assert_eq!(table.get_value(&txn, &8)?, vec![80]);
    assert!(table.get_value(&txn, &9)?.is_empty());

    Ok(())
}

#[test]
fn test_get_on_empty_table() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(16)?;
    let table = LinearProbeHashTable::<i32, i32>::new(buffer_pool, 64)?;
    let txn = Transaction::new(1);

    // No block pages exist yet
    assert!(table.get_value(&txn, &1)?.is_empty());
    assert!(!table.remove(&txn, &1, &10)?);

    Ok(())
}

#[test]
fn test_duplicate_pair_is_rejected() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(16)?;
    let table = LinearProbeHashTable::<i32, i32>::new(buffer_pool, 64)?;
    let txn = Transaction::new(1);

    assert!(table.insert(&txn, &5, &50)?);
    assert!(!table.insert(&txn, &5, &50)?);
    // Same key with a different value is a legal second entry
    assert!(table.insert(&txn, &5, &51)?);

    let mut values = table.get_value(&txn, &5)?;
    values.sort_unstable();
    assert_eq!(values, vec![50, 51]);

    Ok(())
}

#[test]
fn test_remove() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(16)?;
    let table = LinearProbeHashTable::<i32, i32>::new(buffer_pool, 64)?;
    let txn = Transaction::new(1);

    assert!(table.insert(&txn, &3, &30)?);
    assert!(table.remove(&txn, &3, &30)?);
    assert!(table.get_value(&txn, &3)?.is_empty());

    // Removing again, or removing a pair never inserted, reports false
    assert!(!table.remove(&txn, &3, &30)?);
    assert!(!table.remove(&txn, &4, &40)?);

    Ok(())
}

#[test]
fn test_tombstone_preserves_probe_chain() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(16)?;
    let table = LinearProbeHashTable::<i32, i32>::new(buffer_pool, 1)?;
    let txn = Transaction::new(1);

    let num_buckets = table.size(&txn)?;

    // Find two keys that hash to the same home bucket, so the second
    // lands one probe step past the first
    let k1 = 1i32;
    let home = hash_key(&k1) % num_buckets as u64;
    let k2 = (2..)
        .find(|k: &i32| hash_key(k) % num_buckets as u64 == home)
        .unwrap();

    assert!(table.insert(&txn, &k1, &100)?);
    assert!(table.insert(&txn, &k2, &200)?);

    // Tombstoning the first key must not cut the chain to the second
    assert!(table.remove(&txn, &k1, &100)?);
    assert_eq!(table.get_value(&txn, &k2)?, vec![200]);

    Ok(())
}

#[test]
fn test_growth_through_resize() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(16)?;
    // One block page worth of buckets
    let table = LinearProbeHashTable::<i32, i32>::new(buffer_pool, 1)?;
    let txn = Transaction::new(1);

    let initial_size = table.size(&txn)?;
    assert_eq!(initial_size, block_array_size::<i32, i32>());

    // Fill every bucket, then one more to force a full-wrap resize
    let count = initial_size as i32 + 1;
    for key in 0..count {
        assert!(table.insert(&txn, &key, &(key * 2))?);
    }

    assert_eq!(table.size(&txn)?, initial_size * 2);
    for key in 0..count {
        assert_eq!(table.get_value(&txn, &key)?, vec![key * 2], "key {}", key);
    }

    Ok(())
}

#[test]
fn test_concurrent_inserts_and_reads() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let table = Arc::new(LinearProbeHashTable::<i32, i32>::new(buffer_pool, 1024)?);

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let table = Arc::clone(&table);
            std::thread::spawn(move || {
                let txn = Transaction::new(t as u32);
                for i in 0..250 {
                    let key = t * 1000 + i;
                    table.insert(&txn, &key, &(key * 10)).unwrap();
                }
            })
        })
        .collect();
    for handle in writers {
        handle.join().unwrap();
    }

    let txn = Transaction::new(99);
    for t in 0..4 {
        for i in 0..250 {
            let key = t * 1000 + i;
            assert_eq!(table.get_value(&txn, &key)?, vec![key * 10]);
        }
    }

    Ok(())
}

#[test]
fn test_reopen_preserves_entries() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(16)?;
    let txn = Transaction::new(1);

    let table = LinearProbeHashTable::<u32, u64>::new(Arc::clone(&buffer_pool), 64)?;
    for key in 0..100u32 {
        assert!(table.insert(&txn, &key, &u64::from(key + 1))?);
    }
    let header_page_id = table.header_page_id();
    buffer_pool.flush_all_pages()?;
    drop(table);

    let reopened = LinearProbeHashTable::<u32, u64>::open(buffer_pool, header_page_id);
    for key in 0..100u32 {
        assert_eq!(reopened.get_value(&txn, &key)?, vec![u64::from(key + 1)]);
    }

    Ok(())
}
