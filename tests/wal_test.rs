use std::time::Duration;
use anyhow::Result;

mod common;
use common::create_wal_buffer_pool;

use siltdb::common::types::{Rid, Tuple};
use siltdb::storage::page::TablePage;
use siltdb::transaction::wal::log_manager::{LogManagerConfig, LOG_BUFFER_SIZE};
use siltdb::transaction::wal::log_record::LogRecord;

fn small_config() -> LogManagerConfig {
    LogManagerConfig {
        buffer_size: 4096,
        log_timeout: Duration::from_millis(20),
    }
}

#[test]
fn test_group_commit_reaches_disk() -> Result<()> {
    let (disk_manager, log_manager, _buffer_pool, _temp_file) =
        create_wal_buffer_pool(8, small_config())?;
    log_manager.run_flush_thread();

    let mut appended = Vec::new();
    for i in 0..50u32 {
        let mut record =
            LogRecord::new_insert(1, i as i32 - 1, Rid::new(2, i), Tuple::new(vec![i as u8; 16]));
        log_manager.append_log_record(&mut record)?;
        appended.push(record);
    }
    log_manager.stop_flush_thread();
    assert_eq!(log_manager.persistent_lsn(), 49);

    // The on-disk log decodes back to exactly what was appended
    let mut buf = vec![0u8; LOG_BUFFER_SIZE];
    let mut offset = 0u64;
    let mut decoded = Vec::new();
    loop {
        let n = disk_manager.read_log(&mut buf, offset)?;
        if n == 0 {
            break;
        }
        let mut pos = 0;
        while let Some(record) = LogRecord::deserialize(&buf[pos..n]) {
            pos += record.size();
            decoded.push(record);
        }
        assert!(pos > 0);
        offset += pos as u64;
    }
    assert_eq!(decoded, appended);

    Ok(())
}

#[test]
fn test_flush_page_waits_for_persistent_lsn() -> Result<()> {
    let (_disk_manager, log_manager, buffer_pool, _temp_file) =
        create_wal_buffer_pool(8, small_config())?;
    log_manager.run_flush_thread();

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        TablePage::init(&mut page_guard.data, page_id, 0);
    }

    // Three records touch this page; its page-LSN becomes the last one
    let mut last_lsn = 0;
    for i in 0..3u32 {
        let mut record =
            LogRecord::new_insert(1, i as i32 - 1, Rid::new(page_id, i), Tuple::new(vec![1]));
        last_lsn = log_manager.append_log_record(&mut record)?;
        let mut page_guard = page.write();
        TablePage::insert_tuple_at(&mut page_guard.data, i, &Tuple::new(vec![1]))?;
        TablePage::set_lsn(&mut page_guard.data, last_lsn);
    }
    assert_eq!(last_lsn, 2);
    buffer_pool.unpin_page(page_id, true)?;

    // The write-ahead gate must hold the flush until LSN 2 is durable
    buffer_pool.flush_page(page_id)?;
    assert!(log_manager.persistent_lsn() >= last_lsn);

    log_manager.stop_flush_thread();
    Ok(())
}

#[test]
fn test_concurrent_appenders_keep_lsns_unique() -> Result<()> {
    const RECORDS_PER_THREAD: usize = 10_000;

    let (disk_manager, log_manager, _buffer_pool, _temp_file) =
        create_wal_buffer_pool(8, small_config())?;
    log_manager.run_flush_thread();

    let handles: Vec<_> = (0..2)
        .map(|t| {
            let log_manager = log_manager.clone();
            std::thread::spawn(move || {
                for _ in 0..RECORDS_PER_THREAD {
                    let mut record = LogRecord::new_begin(t);
                    log_manager.append_log_record(&mut record).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let total = 2 * RECORDS_PER_THREAD as i32;
    assert_eq!(log_manager.next_lsn(), total);
    log_manager.stop_flush_thread();
    assert_eq!(log_manager.persistent_lsn(), total - 1);

    // Decode the whole log: every record present, LSNs strictly increasing
    let mut buf = vec![0u8; LOG_BUFFER_SIZE];
    let mut offset = 0u64;
    let mut expected_lsn = 0;
    loop {
        let n = disk_manager.read_log(&mut buf, offset)?;
        if n == 0 {
            break;
        }
        let mut pos = 0;
        while let Some(record) = LogRecord::deserialize(&buf[pos..n]) {
            pos += record.size();
            assert_eq!(record.lsn, expected_lsn);
            expected_lsn += 1;
        }
        assert!(pos > 0);
        offset += pos as u64;
    }
    assert_eq!(expected_lsn, total);

    Ok(())
}
