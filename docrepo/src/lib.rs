//! Main docrepo crate: a typed repository and unit-of-work layer over
//! document stores.
//!
//! This crate is the primary entry point for users of the docrepo framework.
//! It re-exports the core types and functionality from the sub-crates and
//! provides convenient access to the storage backends.
//!
//! # Features
//!
//! - **Typed repositories** - CRUD, paging, projection and joins for any `#[derive(Entity)]` type
//! - **Unit of work** - One context, at most one active transaction, shared by every repository it creates
//! - **Bulk mode** - Batch writes in memory and submit them as one multi-operation write
//! - **Identity generation** - Unset keys are assigned on insert for integer, string, UUID and ObjectId keys
//! - **Multiple backends** - In-memory and MongoDB storage behind one backend trait
//!
//! # Quick Start
//!
//! ```ignore
//! use docrepo::{prelude::*, memory::InMemoryStore};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize, Entity)]
//! pub struct User {
//!     pub id: i64,
//!     pub name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocumentStoreResult<()> {
//!     let context = DocumentContext::new(InMemoryStore::builder().build().await?);
//!     let mut users = context.repository::<User>()?;
//!
//!     let mut alice = User { id: 0, name: "Alice".to_string() };
//!     users.add(&mut alice).await?;
//!
//!     let found = users.get_all(Filter::eq("name", "Alice")).await?;
//!     println!("Queried users: {found:?}");
//!
//!     context.shutdown().await
//! }
//! ```
//!
//! # Transactions
//!
//! ```ignore
//! context
//!     .with_transaction(None, None, async || {
//!         let mut users = context.repository::<User>()?;
//!         users.add(&mut alice).await?;
//!         users.delete_by_id(&bob_id).await
//!     })
//!     .await?;
//! ```
//!
//! # Bulk mode
//!
//! ```ignore
//! users
//!     .with_bulk_operation(BulkWriteOptions::default(), async |users| {
//!         users.add(&mut carol).await?;
//!         users.update(&alice).await?;
//!         Ok(())
//!     })
//!     .await?;
//! ```
//!
//! # Backends
//!
//! - [`memory`] - Fast in-memory storage for development and testing
//! - [`mongodb`] - Persistent MongoDB backend (requires `mongodb` feature)

#[allow(unused_extern_crates)]
extern crate self as docrepo;

pub mod prelude;

#[cfg(feature = "blocking")]
pub mod blocking;

pub use docrepo_core::{
    backend, cancel, collection, context, document, error, index, key, naming, page, query, repository,
    session, update, write,
};
pub use docrepo_macros::Entity;

// Re-export BSON types for convenience
pub use bson;

/// In-memory storage backend implementations.
pub mod memory {
    pub use docrepo_memory::{InMemorySession, InMemoryStore, InMemoryStoreBuilder};
}

/// MongoDB storage backend implementations.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use docrepo_mongodb::{MongoDbStore, MongoDbStoreBuilder, MongoSession};
}
