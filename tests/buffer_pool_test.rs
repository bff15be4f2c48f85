use anyhow::Result;

use karstdb::storage::buffer::BufferPoolError;

mod common;
use common::create_test_buffer_pool;

#[test]
fn test_new_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;

    // Instance 0 of a standalone pool starts allocating at page 0
    assert!(page_id >= 0);
    {
        let page_guard = page.read();
        assert_eq!(page_guard.page_id, page_id);
        assert!(page_guard.data.iter().all(|&b| b == 0));
    }

    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_fetch_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false)?;

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        assert_eq!(page_guard.page_id, page_id);
    }

    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_page_modification() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        let test_data = b"Test Data";
        page_guard.data[100..100 + test_data.len()].copy_from_slice(test_data);
    }
    buffer_pool.unpin_page(page_id, true)?;

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        let test_data = b"Test Data";
        assert_eq!(&page_guard.data[100..100 + test_data.len()], test_data);
    }
    buffer_pool.unpin_page(page_id, false)?;

    Ok(())
}

#[test]
fn test_lru_victim_writes_back_dirty_page() -> Result<()> {
    // Three frames; the dirty page unpinned first must be the eviction
    // victim, and its bytes must survive the round trip through disk.
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (page0, page0_id) = buffer_pool.new_page()?;
    let (_, page1_id) = buffer_pool.new_page()?;
    let (_, page2_id) = buffer_pool.new_page()?;

    {
        let mut page_guard = page0.write();
        page_guard.data[0..4].copy_from_slice(b"LRU0");
    }

    buffer_pool.unpin_page(page0_id, true)?;
    buffer_pool.unpin_page(page1_id, false)?;
    buffer_pool.unpin_page(page2_id, false)?;

    // page0 is the least recently unpinned, so this evicts (and flushes) it
    let (_, page3_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page3_id, false)?;

    let fetched = buffer_pool.fetch_page(page0_id)?;
    {
        let page_guard = fetched.read();
        assert_eq!(&page_guard.data[0..4], b"LRU0");
    }
    buffer_pool.unpin_page(page0_id, false)?;

    Ok(())
}

#[test]
fn test_new_page_fails_when_all_frames_pinned() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(2)?;

    let (_, page0_id) = buffer_pool.new_page()?;
    let (_, page1_id) = buffer_pool.new_page()?;

    assert!(matches!(
        buffer_pool.new_page(),
        Err(BufferPoolError::NoFreeFrames)
    ));

    // releasing one pin makes allocation possible again
    buffer_pool.unpin_page(page0_id, false)?;
    let (_, page2_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page1_id, false)?;
    buffer_pool.unpin_page(page2_id, false)?;

    Ok(())
}

#[test]
fn test_unpin_errors() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4)?;

    assert!(matches!(
        buffer_pool.unpin_page(42, false),
        Err(BufferPoolError::PageNotFound(42))
    ));

    let (_, page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page_id, false)?;
    assert!(matches!(
        buffer_pool.unpin_page(page_id, false),
        Err(BufferPoolError::PageNotPinned(_))
    ));

    Ok(())
}

#[test]
fn test_dirty_flag_is_sticky() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(2)?;

    let (page0, page0_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page0.write();
        page_guard.data[0..6].copy_from_slice(b"sticky");
    }
    buffer_pool.unpin_page(page0_id, true)?;

    // re-pin and unpin clean; the earlier dirty marking must survive
    let _ = buffer_pool.fetch_page(page0_id)?;
    buffer_pool.unpin_page(page0_id, false)?;

    // fill both frames to force page0 out
    let (_, page1_id) = buffer_pool.new_page()?;
    let (_, page2_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(page1_id, false)?;
    buffer_pool.unpin_page(page2_id, false)?;

    let fetched = buffer_pool.fetch_page(page0_id)?;
    {
        let page_guard = fetched.read();
        assert_eq!(&page_guard.data[0..6], b"sticky");
    }
    buffer_pool.unpin_page(page0_id, false)?;

    Ok(())
}

#[test]
fn test_flush_page_writes_disk_image() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(3)?;

    let (page, page_id) = buffer_pool.new_page()?;
    {
        let mut page_guard = page.write();
        let test_data = b"Test Data For Flushing";
        page_guard.data[100..100 + test_data.len()].copy_from_slice(test_data);
    }
    buffer_pool.unpin_page(page_id, true)?;

    // flush clears the dirty flag, so the eviction below will not write
    // again; the data coming back must be what flush put on disk
    buffer_pool.flush_page(page_id)?;

    for _ in 0..3 {
        let (_, filler_id) = buffer_pool.new_page()?;
        buffer_pool.unpin_page(filler_id, false)?;
    }

    let fetched_page = buffer_pool.fetch_page(page_id)?;
    {
        let page_guard = fetched_page.read();
        let test_data = b"Test Data For Flushing";
        assert_eq!(&page_guard.data[100..100 + test_data.len()], test_data);
    }
    buffer_pool.unpin_page(page_id, false)?;

    assert!(matches!(
        buffer_pool.flush_page(9999),
        Err(BufferPoolError::PageNotFound(_))
    ));

    Ok(())
}

#[test]
fn test_flush_all_pages() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let mut page_ids = Vec::new();
    for i in 0..5 {
        let (page, page_id) = buffer_pool.new_page()?;
        {
            let mut page_guard = page.write();
            let test_data = format!("Test Data {}", i).into_bytes();
            page_guard.data[100..100 + test_data.len()].copy_from_slice(&test_data);
        }
        buffer_pool.unpin_page(page_id, true)?;
        page_ids.push(page_id);
    }

    buffer_pool.flush_all_pages()?;

    for (i, &page_id) in page_ids.iter().enumerate() {
        let fetched_page = buffer_pool.fetch_page(page_id)?;
        {
            let page_guard = fetched_page.read();
            let expected_data = format!("Test Data {}", i).into_bytes();
            assert_eq!(
                &page_guard.data[100..100 + expected_data.len()],
                expected_data.as_slice()
            );
        }
        buffer_pool.unpin_page(page_id, false)?;
    }

    Ok(())
}

#[test]
fn test_delete_page() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(10)?;

    let (_, page_id) = buffer_pool.new_page()?;

    // pinned pages cannot be deleted
    assert!(matches!(
        buffer_pool.delete_page(page_id),
        Err(BufferPoolError::PagePinned(_))
    ));

    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.delete_page(page_id)?;

    // deleting a page that is not resident succeeds
    buffer_pool.delete_page(page_id)?;

    // the freed frame is reusable
    let (_, new_page_id) = buffer_pool.new_page()?;
    buffer_pool.unpin_page(new_page_id, false)?;

    Ok(())
}

#[test]
fn test_free_frames_accounting() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(4)?;
    assert_eq!(buffer_pool.pool_size(), 4);
    assert_eq!(buffer_pool.free_frame_count(), 4);

    let (_, page_id) = buffer_pool.new_page()?;
    assert_eq!(buffer_pool.free_frame_count(), 3);

    buffer_pool.unpin_page(page_id, false)?;
    buffer_pool.delete_page(page_id)?;
    assert_eq!(buffer_pool.free_frame_count(), 4);

    Ok(())
}
