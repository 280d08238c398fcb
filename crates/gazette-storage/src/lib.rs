//! Gazette Storage - Campaign, delivery record and queue persistence
//!
//! Repository traits with a PostgreSQL backend (sqlx) and an in-memory
//! backend sharing the same semantics.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use memory::MemoryStore;
pub use models::*;
pub use repository::*;
