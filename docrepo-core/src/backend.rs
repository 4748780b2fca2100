//! Storage backend abstraction.
//!
//! This module defines the traits that abstract over different storage
//! implementations, allowing a [`DocumentContext`](crate::context::DocumentContext)
//! to work with an in-memory store, MongoDB, or anything else that can run
//! filtered reads, multi-operation writes and sessions.
//!
//! # Overview
//!
//! The [`StoreBackend`] trait provides a unified async interface for all
//! storage operations. Implementations must be thread-safe (`Send + Sync`).
//! Every data operation takes an optional [`SessionHandle`]; when one is
//! given, the operation runs inside that session's transaction.
//!
//! Documents cross this boundary as BSON. Stored documents always carry the
//! store-native `_id` field; callers strip it when rebuilding entities.
//!
//! # Examples
//!
//! ```ignore
//! use docrepo::backend::StoreBackend;
//! use bson::{Bson, doc};
//!
//! let backend = MyBackendImpl::new();
//! backend
//!     .insert_documents("users", vec![(Bson::Int64(1), Bson::Document(doc! { "name": "Alice" }))], None)
//!     .await?;
//! ```

use async_trait::async_trait;
use bson::Bson;
use std::fmt::Debug;

use crate::{
    error::DocumentStoreResult,
    index::IndexDescriptor,
    query::{Expr, Query},
    session::{SessionHandle, SessionOptions, TransactionOptions},
    write::{BulkWriteOptions, WriteOp, WriteResult},
};

/// A left-outer join against another collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupSpec {
    /// Collection holding the joined documents.
    pub from: String,
    /// Field of the source document to match on.
    pub local_field: String,
    /// Field of the joined document to match on.
    pub foreign_field: String,
    /// Array field that receives the matches.
    pub as_field: String,
}

/// Abstract interface for document storage backends.
///
/// # Thread Safety
///
/// All implementations must support concurrent access from multiple async
/// tasks. Operations carrying the same session are serialized by the
/// session's own lock.
///
/// # Error Handling
///
/// Operations return [`DocumentStoreResult<T>`](crate::error::DocumentStoreResult).
/// Native driver failures surface as
/// [`DocumentStoreError::Backend`](crate::error::DocumentStoreError::Backend).
#[async_trait]
pub trait StoreBackend: Send + Sync + Debug {
    /// Starts a new session. No transaction is open on it yet.
    async fn start_session(&self, options: Option<SessionOptions>) -> DocumentStoreResult<SessionHandle>;

    /// Opens a transaction on `session`.
    async fn start_transaction(
        &self,
        session: &SessionHandle,
        options: Option<TransactionOptions>,
    ) -> DocumentStoreResult<()>;

    /// Makes every write of the open transaction visible.
    async fn commit_transaction(&self, session: &SessionHandle) -> DocumentStoreResult<()>;

    /// Discards every write of the open transaction.
    async fn abort_transaction(&self, session: &SessionHandle) -> DocumentStoreResult<()>;

    /// Inserts new documents into a collection.
    ///
    /// Each pair is `(store id, document)`. The collection is created if it
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Fails with [`DocumentAlreadyExists`](crate::error::DocumentStoreError::DocumentAlreadyExists)
    /// if an id is already present.
    async fn insert_documents(
        &self,
        collection: &str,
        documents: Vec<(Bson, Bson)>,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<WriteResult>;

    /// Runs a structured query.
    ///
    /// Missing collections yield an empty result.
    async fn find_documents(
        &self,
        collection: &str,
        query: Query,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<Vec<Bson>>;

    /// Counts documents matching `filter`, or every document when `None`.
    async fn count_documents(
        &self,
        collection: &str,
        filter: Option<Expr>,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<u64>;

    /// Submits an ordered list of write operations as one write.
    ///
    /// # Errors
    ///
    /// Fails with [`BulkWrite`](crate::error::DocumentStoreError::BulkWrite)
    /// listing every failed operation. With `ordered` set, nothing after the
    /// first failure is attempted.
    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<WriteOp>,
        options: BulkWriteOptions,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<WriteResult>;

    /// Joins `from` into every document matching `filter`.
    async fn lookup(
        &self,
        collection: &str,
        filter: Option<Expr>,
        spec: LookupSpec,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<Vec<Bson>>;

    /// Creates an index and returns its name.
    async fn create_index(&self, collection: &str, index: IndexDescriptor) -> DocumentStoreResult<String>;

    /// Lists index names, including the implicit `_id_` index.
    async fn list_index_names(&self, collection: &str) -> DocumentStoreResult<Vec<String>>;

    /// Drops an index by name.
    async fn drop_index(&self, collection: &str, name: &str) -> DocumentStoreResult<()>;

    /// Creates an empty collection. Existing collections are left untouched.
    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Drops a collection with its documents and indexes.
    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()>;

    /// Lists collection names.
    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>>;

    /// Releases backend resources.
    ///
    /// The default implementation is a no-op.
    async fn shutdown(self) -> DocumentStoreResult<()>
    where
        Self: Sized,
    {
        Ok(())
    }
}

/// Factory trait for creating backend instances.
#[async_trait]
pub trait StoreBackendBuilder {
    type Backend: StoreBackend;

    async fn build(self) -> DocumentStoreResult<Self::Backend>;
}
