//! Convenient re-exports of commonly used types from docrepo.
//!
//! Import this prelude module to quickly access the most frequently used types
//! and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use docrepo::prelude::*;
//! ```
//!
//! This provides access to:
//! - The `Entity` trait and its derive
//! - The document context and repositories
//! - Store backends and builders
//! - Query, update, index and paging models
//! - Error types

pub use docrepo_macros::Entity;

pub use docrepo_core::{
    backend::{StoreBackend, StoreBackendBuilder},
    cancel::CancellationToken,
    collection::TypedCollection,
    context::DocumentContext,
    document::{Entity, EntityExt},
    key::{Key, KeyKind},
    naming::{CollectionNameResolver, NamingConvention},
    page::{Page, PaginationParams},
    query::{Query, QueryVisitor, Expr, Sort, SortDirection, SortSpec, Projection, FieldOp, QueryBuilder, Filter},
    repository::Repository,
    session::{SessionHandle, SessionOptions, TransactionOptions},
    update::UpdateDoc,
    index::{IndexKey, IndexKind, IndexOptions},
    write::{BulkWriteOptions, WriteResult},
    error::{DocumentStoreError, DocumentStoreResult},
};
