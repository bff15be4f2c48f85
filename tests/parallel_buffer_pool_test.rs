use anyhow::Result;

use karstdb::storage::buffer::{BufferPool, BufferPoolError};

mod common;
use common::create_test_parallel_pool;

#[test]
fn test_allocation_is_sharded() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(3, 2)?;
    assert_eq!(pool.num_instances(), 3);
    assert_eq!(pool.pool_size(), 6);

    // round-robin allocation walks the instances in order, and every id is
    // congruent to the index of the instance that produced it
    let mut page_ids = Vec::new();
    for _ in 0..6 {
        let (_, page_id) = pool.new_page()?;
        page_ids.push(page_id);
    }
    assert_eq!(page_ids, vec![0, 1, 2, 3, 4, 5]);

    for &page_id in &page_ids {
        pool.unpin_page(page_id, false)?;
    }

    Ok(())
}

#[test]
fn test_pages_route_back_to_owning_instance() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(4, 3)?;

    let mut page_ids = Vec::new();
    for i in 0..8 {
        let (page, page_id) = pool.new_page()?;
        {
            let mut page_guard = page.write();
            page_guard.data[0] = i as u8;
        }
        pool.unpin_page(page_id, true)?;
        page_ids.push(page_id);
    }

    // fetching goes through the mod-N router; the content written through
    // the allocating instance must come back
    for (i, &page_id) in page_ids.iter().enumerate() {
        let page = pool.fetch_page(page_id)?;
        {
            let page_guard = page.read();
            assert_eq!(page_guard.data[0], i as u8);
        }
        pool.unpin_page(page_id, false)?;
    }

    Ok(())
}

#[test]
fn test_new_page_skips_exhausted_instances() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(2, 1)?;

    let (_, page0_id) = pool.new_page()?;
    let (_, page1_id) = pool.new_page()?;

    // both single-frame instances hold a pinned page
    assert!(matches!(pool.new_page(), Err(BufferPoolError::NoFreeFrames)));

    // freeing any one instance lets allocation succeed again
    pool.unpin_page(page0_id, false)?;
    let (_, page2_id) = pool.new_page()?;
    assert_eq!(page2_id % 2, page0_id % 2);

    pool.unpin_page(page1_id, false)?;
    pool.unpin_page(page2_id, false)?;

    Ok(())
}

#[test]
fn test_flush_all_pages_covers_every_shard() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(3, 2)?;

    let mut page_ids = Vec::new();
    for i in 0..6 {
        let (page, page_id) = pool.new_page()?;
        {
            let mut page_guard = page.write();
            page_guard.data[10] = 100 + i as u8;
        }
        pool.unpin_page(page_id, true)?;
        page_ids.push(page_id);
    }

    pool.flush_all_pages()?;

    for (i, &page_id) in page_ids.iter().enumerate() {
        let page = pool.fetch_page(page_id)?;
        {
            let page_guard = page.read();
            assert_eq!(page_guard.data[10], 100 + i as u8);
        }
        pool.unpin_page(page_id, false)?;
    }

    Ok(())
}

#[test]
fn test_delete_routes_to_owning_instance() -> Result<()> {
    let (pool, _temp_file) = create_test_parallel_pool(2, 2)?;

    let (_, page_id) = pool.new_page()?;
    pool.unpin_page(page_id, false)?;
    pool.delete_page(page_id)?;

    assert!(matches!(
        pool.fetch_page(-1),
        Err(BufferPoolError::InvalidPageId(-1))
    ));

    Ok(())
}
