//! Adapters behind the domain ports: snapshot storage and a simulated
//! terminal bridge.

pub mod in_memory;
#[cfg(feature = "storage-rocksdb")]
pub mod rocksdb;
pub mod simulated;
