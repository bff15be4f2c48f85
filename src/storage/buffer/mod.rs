pub mod error;
pub mod manager;
pub mod parallel;
pub mod replacer;

pub use error::BufferPoolError;
pub use manager::{BufferPool, BufferPoolInstance};
pub use parallel::ParallelBufferPool;
