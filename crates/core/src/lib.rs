// Core types and storage for the kgserve tool server

pub mod error;
pub mod graph;
pub mod kv;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use graph::{GraphStore, InMemoryGraphStore, Neo4jConfig, Neo4jGraphStore};
pub use kv::{InMemoryKvStore, KvStore, RedbKvStore};
pub use types::*;
