pub mod bucket_page;
pub mod directory_page;
pub mod error;
pub mod key;
pub mod table;

pub use bucket_page::HashTableBucketPage;
pub use directory_page::HashTableDirectoryPage;
pub use error::HashIndexError;
pub use key::{hash_key, FixedCodec, GenericKey};
pub use table::ExtendibleHashTable;
