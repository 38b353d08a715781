//! Storage seams: the remote store of record and local key-value storage.

pub mod traits;
pub mod memory;
pub mod kv;
