//! In-memory document storage backend for docrepo.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreBackend` trait.
//! It uses async-aware read-write locks for concurrent access and is ideal for development,
//! testing, and small-scale deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Full query support** - Filtering, multi-key sorting, paging and projection
//! - **Snapshot transactions** - Session-scoped writes made visible on commit
//! - **Unique indexes** - Enforced on insert, replace and update
//!
//! # Quick Start
//!
//! ```ignore
//! use docrepo::{prelude::*, memory::InMemoryStore};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Entity)]
//! pub struct User {
//!     pub id: bson::Uuid,
//!     pub name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = InMemoryStore::builder().build().await?;
//!     let context = DocumentContext::new(backend);
//!     let mut users = context.repository::<User>()?;
//!
//!     let mut user = User { id: bson::Uuid::from_bytes([0; 16]), name: "Alice".to_string() };
//!     users.add(&mut user).await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docrepo_memory;

pub mod store;
pub mod evaluator;

pub use store::{InMemorySession, InMemoryStore, InMemoryStoreBuilder};
