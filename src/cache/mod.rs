pub mod backend;
pub mod key;
pub mod manager;

pub use backend::{CacheBackend, MemoryBackend, RedisBackend};
pub use key::derive_key;
pub use manager::CacheManager;
