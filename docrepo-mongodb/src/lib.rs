//! MongoDB backend implementation for docrepo.
//!
//! This crate provides a MongoDB-based implementation of the `StoreBackend` trait,
//! enabling persistent document storage with full query support using MongoDB's querying capabilities.
//! 
//! To use this backend, include the `mongodb` feature in your `Cargo.toml`:
//! 
//! ```toml
//! [dependencies]
//! docrepo = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Persistent storage** - Data is persisted to MongoDB Atlas or self-hosted MongoDB
//! - **Full query support** - Leverages MongoDB's query engine for filtering and sorting
//! - **Async/await** - Fully asynchronous API built on MongoDB's async driver
//! - **Indexing** - Single, compound, text, hashed, geo and wildcard indexes
//! - **Transactions** - Driver sessions wrapped in docrepo session handles
//!
//! # Connection
//!
//! To use this backend, you need a MongoDB connection string. The database is
//! named explicitly with [`MongoDbStore::builder`] or taken from the connection
//! string with [`MongoDbStore::from_connection_string`]. Transactions require
//! a replica set or sharded cluster.
//!
//! # Example
//!
//! ```ignore
//! use docrepo::{backend::StoreBackendBuilder, mongodb::MongoDbStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoDbStore::builder("mongodb://localhost:27017", "my_database")
//!         .build()
//!         .await?;
//!         
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docrepo_mongodb;

pub mod store;
pub mod query;

pub use store::{MongoDbStore, MongoDbStoreBuilder, MongoSession};
