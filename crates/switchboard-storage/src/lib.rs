//! Storage layer: the keyed store contract, its Redis and in-memory
//! implementations, the on-disk backup mirror, and the facade that picks
//! between them.

pub mod backup;
pub mod facade;
pub mod keyed;
pub mod memory;
pub mod redis_store;

pub use backup::FileBackup;
pub use facade::{Storage, StorageConfig};
pub use keyed::{KeyedStore, StoreError, StoreResult, StoreStatus};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;
