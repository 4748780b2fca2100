//! A typed repository and unit-of-work layer over document stores.
//!
//! This crate is the core of the docrepo project and provides:
//!
//! - **Entities and keys** ([`document`], [`key`]) - the entity trait and identity generation per key kind
//! - **Collection naming** ([`naming`]) - override-or-convention collection name resolution, memoized per type
//! - **Store backend abstraction** ([`backend`]) - the trait implemented by concrete stores
//! - **Filters, updates, indexes and writes** ([`query`], [`update`], [`index`], [`write`]) - store-neutral models
//! - **Document context** ([`context`]) - backend ownership and the transaction lifecycle
//! - **Repository** ([`repository`]) - typed CRUD, paging, projection, bulk mode, indexes and joins
//! - **Sessions and cancellation** ([`session`], [`cancel`])
//! - **Error handling** ([`error`]) - error types and result types
//!
//! # Example
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
//! let context = DocumentContext::new(InMemoryStore::new());
//! let mut users = context.repository::<User>()?;
//!
//! let mut alice = User { id: 0, name: "Alice".into() };
//! users.add(&mut alice).await?; // alice.id is now assigned
//! ```

#[allow(unused_extern_crates)]
extern crate self as docrepo_core;

pub mod backend;
pub mod cancel;
pub mod collection;
pub mod context;
pub mod document;
pub mod error;
pub mod index;
pub mod key;
pub mod naming;
pub mod page;
pub mod query;
pub mod repository;
pub mod session;
pub mod update;
pub mod write;
