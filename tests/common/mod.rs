use std::sync::Arc;
use anyhow::Result;
use tempfile::NamedTempFile;

use karstdb::storage::buffer::{BufferPoolInstance, ParallelBufferPool};

// Create a temporary database file for testing
#[allow(dead_code)]
pub fn create_temp_db_file() -> Result<(NamedTempFile, String)> {
    let file = NamedTempFile::new()?;
    let path = file.path().to_str().unwrap().to_string();
    Ok((file, path))
}

// Create a buffer pool instance with a temporary database
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolInstance>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(BufferPoolInstance::new(pool_size, path)?);
    Ok((buffer_pool, file))
}

// Create a sharded buffer pool with a temporary database
#[allow(dead_code)]
pub fn create_test_parallel_pool(
    num_instances: usize,
    pool_size: usize,
) -> Result<(Arc<ParallelBufferPool>, NamedTempFile)> {
    let (file, path) = create_temp_db_file()?;
    let buffer_pool = Arc::new(ParallelBufferPool::new(num_instances, pool_size, path)?);
    Ok((buffer_pool, file))
}
