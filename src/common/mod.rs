pub mod rwlatch;
pub mod types;

pub use rwlatch::RwLatch;
