//! Persisted scheduled-poll registry: the single source of truth for poll
//! lifecycle, plus the lease primitive that serializes finalization attempts.

pub mod redis;
pub mod service;
pub mod store;

pub use redis::RedisRegistryStore;
pub use service::{Lease, PollRegistry};
pub use store::{MemoryRegistryStore, RegistryStore};
