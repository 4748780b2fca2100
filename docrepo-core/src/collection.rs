//! Typed collection handles.
//!
//! A [`TypedCollection`] binds a backend to one resolved collection name and
//! converts between entities and BSON. It carries no state of its own: the
//! caller passes the session explicitly on every call, which is what
//! [`Repository`](crate::repository::Repository) does with the context's
//! active session.
//!
//! # Example
//!
//! ```ignore
//! let users = context.collection::<User>()?;
//! let adults = users
//!     .find(Query::filtered(Filter::gte("age", 18)), context.current_session().await.as_ref())
//!     .await?;
//! ```

use bson::{Bson, Document};
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

use crate::{
    backend::{LookupSpec, StoreBackend},
    document::{Entity, EntityExt, strip_id},
    error::{DocumentStoreError, DocumentStoreResult},
    index::IndexDescriptor,
    key::Key,
    query::{Expr, Filter, Query},
    session::SessionHandle,
    write::{BulkWriteOptions, WriteOp, WriteResult},
};

/// A type-safe collection for a specific entity type.
#[derive(Debug)]
pub struct TypedCollection<'a, B: StoreBackend, E: Entity> {
    name: String,
    backend: &'a B,
    _marker: PhantomData<E>,
}

impl<'a, B: StoreBackend, E: Entity> Clone for TypedCollection<'a, B, E> {
    fn clone(&self) -> Self {
        Self::new(self.name.clone(), self.backend)
    }
}

impl<'a, B: StoreBackend, E: Entity> TypedCollection<'a, B, E> {
    pub(crate) fn new(name: String, backend: &'a B) -> Self {
        Self { name, backend, _marker: PhantomData }
    }

    /// Returns the name of this collection.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Builds an insert operation for `entity`.
    pub fn insert_op(entity: &E) -> DocumentStoreResult<WriteOp> {
        Ok(WriteOp::InsertOne {
            id: entity.id().to_bson(),
            document: entity.to_bson()?,
        })
    }

    /// Builds a by-id replace operation for `entity`.
    pub fn replace_op(entity: &E) -> DocumentStoreResult<WriteOp> {
        Ok(WriteOp::ReplaceOne {
            filter: Filter::id(entity.id()),
            id: entity.id().to_bson(),
            document: entity.to_bson()?,
            upsert: false,
        })
    }

    /// Inserts entities as they are; identifiers are not assigned here.
    pub async fn insert(&self, entities: &[E], session: Option<&SessionHandle>) -> DocumentStoreResult<WriteResult> {
        let documents = entities
            .iter()
            .map(|entity| Ok((entity.id().to_bson(), entity.to_bson()?)))
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        self.backend
            .insert_documents(&self.name, documents, session)
            .await
    }

    /// Runs `query` and deserializes each match into `E`.
    pub async fn find(&self, query: Query, session: Option<&SessionHandle>) -> DocumentStoreResult<Vec<E>> {
        self.backend
            .find_documents(&self.name, query, session)
            .await?
            .into_iter()
            .map(E::from_bson)
            .collect()
    }

    /// Fetches one entity by identifier.
    pub async fn find_by_id(&self, id: &E::Key, session: Option<&SessionHandle>) -> DocumentStoreResult<Option<E>> {
        Ok(self
            .find(
                Query::builder().filter(Filter::id(id)).limit(1).build(),
                session,
            )
            .await?
            .into_iter()
            .next())
    }

    /// Runs `query` and deserializes each match into a projection type.
    ///
    /// The query should carry a [`Projection`](crate::query::Projection)
    /// covering the fields of `P`.
    pub async fn find_projected<P: DeserializeOwned>(
        &self,
        query: Query,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<Vec<P>> {
        self.backend
            .find_documents(&self.name, query, session)
            .await?
            .into_iter()
            .map(|doc| Ok(bson::de::deserialize_from_bson(strip_id(doc))?))
            .collect()
    }

    pub async fn count(&self, filter: Option<Expr>, session: Option<&SessionHandle>) -> DocumentStoreResult<u64> {
        self.backend
            .count_documents(&self.name, filter, session)
            .await
    }

    pub async fn write(
        &self,
        operations: Vec<WriteOp>,
        options: BulkWriteOptions,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<WriteResult> {
        self.backend
            .bulk_write(&self.name, operations, options, session)
            .await
    }

    /// Left-outer joins `F`'s collection into every document matching `filter`.
    pub async fn lookup(
        &self,
        filter: Option<Expr>,
        spec: LookupSpec,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<Vec<Document>> {
        self.backend
            .lookup(&self.name, filter, spec, session)
            .await?
            .into_iter()
            .map(|doc| match doc {
                Bson::Document(doc) => Ok(doc),
                other => Err(DocumentStoreError::InvalidDocument(format!(
                    "lookup returned {:?}",
                    other.element_type()
                ))),
            })
            .collect()
    }

    pub async fn create_index(&self, index: IndexDescriptor) -> DocumentStoreResult<String> {
        self.backend.create_index(&self.name, index).await
    }

    pub async fn index_names(&self) -> DocumentStoreResult<Vec<String>> {
        self.backend.list_index_names(&self.name).await
    }

    pub async fn drop_index(&self, name: &str) -> DocumentStoreResult<()> {
        self.backend.drop_index(&self.name, name).await
    }

    /// Creates the collection if it does not exist yet.
    pub async fn create(&self) -> DocumentStoreResult<()> {
        self.backend.create_collection(&self.name).await
    }

    /// Drops the collection with all of its documents and indexes.
    pub async fn drop(&self) -> DocumentStoreResult<()> {
        self.backend.drop_collection(&self.name).await
    }
}
