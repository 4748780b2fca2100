//! The generic repository.
//!
//! A [`Repository`] gives typed create/read/update/delete, paging,
//! projection, bulk batching, index management and a join over a single
//! collection. It is bound to a [`DocumentContext`] and attaches the
//! context's active session, if any, to every store call.
//!
//! # Bulk mode
//!
//! Between [`begin_bulk_operation`](Repository::begin_bulk_operation) and
//! [`do_bulk_operation`](Repository::do_bulk_operation) every write is
//! appended to a pending batch instead of being executed. The batch is
//! submitted as one multi-operation write, and the repository is back to
//! normal mode afterwards whatever the outcome.
//!
//! ```ignore
//! let mut orders = context.repository::<Order>()?;
//!
//! orders
//!     .with_bulk_operation(BulkWriteOptions::default(), async |orders| {
//!         orders.add(&mut first).await?;
//!         orders.delete_by_id(&stale_id).await
//!     })
//!     .await?;
//! ```
//!
//! # Reads
//!
//! Single-entity reads return `Ok(None)` for "not found". The `first` and
//! `single` families return [`DocumentStoreError::NoMatchingDocument`] or
//! [`DocumentStoreError::MultipleMatchingDocuments`] when the cardinality
//! does not hold.

use bson::{Bson, Document};
use serde::de::DeserializeOwned;
use std::mem;
use tracing::{debug, info, warn};

use crate::{
    backend::{LookupSpec, StoreBackend},
    cancel::{CancellationToken, run_cancellable},
    collection::TypedCollection,
    context::DocumentContext,
    document::{Entity, EntityExt},
    error::{DocumentStoreError, DocumentStoreResult},
    index::{IndexDescriptor, IndexKey, IndexKind, IndexOptions},
    key::Key,
    page::{Page, PaginationParams},
    query::{Expr, Filter, Projection, Query, Sort, SortDirection, SortSpec},
    session::SessionHandle,
    update::UpdateDoc,
    write::{BulkWriteOptions, WriteOp, WriteResult},
};

/// Write handling mode of a repository.
#[derive(Debug, Default)]
enum BulkState {
    #[default]
    Idle,
    Batching(Vec<WriteOp>),
}

/// Typed data access for one entity type.
#[derive(Debug)]
pub struct Repository<'a, B: StoreBackend, E: Entity> {
    context: &'a DocumentContext<B>,
    collection: TypedCollection<'a, B, E>,
    bulk: BulkState,
    cancellation: Option<CancellationToken>,
}

impl<'a, B: StoreBackend, E: Entity> Repository<'a, B, E> {
    pub(crate) fn new(context: &'a DocumentContext<B>, collection: TypedCollection<'a, B, E>) -> Self {
        Self {
            context,
            collection,
            bulk: BulkState::Idle,
            cancellation: context.cancellation_token().cloned(),
        }
    }

    /// Overrides the cancellation token inherited from the context.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// The resolved collection name.
    pub fn collection_name(&self) -> &str {
        self.collection.name()
    }

    pub fn collection(&self) -> &TypedCollection<'a, B, E> {
        &self.collection
    }

    // Create

    /// Inserts `entity`, assigning an identifier first if it has none.
    ///
    /// In bulk mode the insert is appended to the pending batch.
    pub async fn add(&mut self, entity: &mut E) -> DocumentStoreResult<()> {
        self.assign_id(entity)?;

        if let BulkState::Batching(ops) = &mut self.bulk {
            ops.push(TypedCollection::<B, E>::insert_op(entity)?);
            return Ok(());
        }

        let session = self.session().await;
        self.run(self.collection.insert(std::slice::from_ref(entity), session.as_ref()))
            .await?;

        debug!(collection = self.collection_name(), "inserted entity");

        Ok(())
    }

    /// Inserts every entity in one multi-document write.
    ///
    /// Identifiers are assigned to every element before anything is sent.
    pub async fn add_many(&mut self, entities: &mut [E]) -> DocumentStoreResult<()> {
        if entities.is_empty() {
            return Ok(());
        }

        for entity in entities.iter_mut() {
            self.assign_id(entity)?;
        }

        if let BulkState::Batching(ops) = &mut self.bulk {
            for entity in entities.iter() {
                ops.push(TypedCollection::<B, E>::insert_op(entity)?);
            }
            return Ok(());
        }

        let session = self.session().await;
        let result = self
            .run(self.collection.insert(entities, session.as_ref()))
            .await?;

        debug!(collection = self.collection_name(), inserted = result.inserted, "inserted entities");

        Ok(())
    }

    // Read

    /// Fetches an entity by identifier.
    pub async fn get_by_id(&self, id: &E::Key) -> DocumentStoreResult<Option<E>> {
        let session = self.session().await;

        self.run(self.collection.find_by_id(id, session.as_ref()))
            .await
    }

    /// Fetches every entity matching `filter`. Use [`Filter::all`] for the
    /// whole collection.
    pub async fn get_all(&self, filter: Expr) -> DocumentStoreResult<Vec<E>> {
        self.find(Query::filtered(filter)).await
    }

    /// Runs an arbitrary query.
    pub async fn find(&self, query: Query) -> DocumentStoreResult<Vec<E>> {
        let session = self.session().await;

        self.run(self.collection.find(query, session.as_ref()))
            .await
    }

    pub async fn first(&self, filter: Expr) -> DocumentStoreResult<E> {
        self.first_or_default(filter)
            .await?
            .ok_or_else(|| self.no_match())
    }

    pub async fn first_or_default(&self, filter: Expr) -> DocumentStoreResult<Option<E>> {
        Ok(self
            .find(Query::builder().filter(filter).limit(1).build())
            .await?
            .into_iter()
            .next())
    }

    pub async fn single(&self, filter: Expr) -> DocumentStoreResult<E> {
        self.single_or_default(filter)
            .await?
            .ok_or_else(|| self.no_match())
    }

    /// Like [`first_or_default`](Self::first_or_default), but fails when more
    /// than one entity matches.
    pub async fn single_or_default(&self, filter: Expr) -> DocumentStoreResult<Option<E>> {
        let matches = self
            .find(Query::builder().filter(filter).limit(2).build())
            .await?;

        self.at_most_one(matches)
    }

    pub async fn count(&self, filter: Expr) -> DocumentStoreResult<u64> {
        let session = self.session().await;

        self.run(self.collection.count(Some(filter), session.as_ref()))
            .await
    }

    pub async fn any(&self, filter: Expr) -> DocumentStoreResult<bool> {
        Ok(self.count(filter).await? > 0)
    }

    /// Sorts by one field, then skips `skip` and returns at most `limit` entities.
    pub async fn get_paged(
        &self,
        filter: Expr,
        sort_field: impl Into<String>,
        ascending: bool,
        skip: usize,
        limit: usize,
    ) -> DocumentStoreResult<Vec<E>> {
        let sort = SortSpec(vec![Sort {
            field: sort_field.into(),
            direction: SortDirection::from_ascending(ascending),
        }]);

        self.get_paged_by(filter, sort, skip, limit).await
    }

    /// Like [`get_paged`](Self::get_paged) with a multi-key sort.
    pub async fn get_paged_by(
        &self,
        filter: Expr,
        sort: SortSpec,
        skip: usize,
        limit: usize,
    ) -> DocumentStoreResult<Vec<E>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        self.find(
            Query::builder()
                .filter(filter)
                .sort_by(sort)
                .offset(skip)
                .limit(limit)
                .build(),
        )
        .await
    }

    /// Returns one page together with the total match count.
    pub async fn get_page(
        &self,
        filter: Expr,
        sort: SortSpec,
        params: &PaginationParams,
    ) -> DocumentStoreResult<Page<E>> {
        let total = self.count(filter.clone()).await?;
        let items = self
            .get_paged_by(filter, sort, params.offset(), params.per_page)
            .await?;

        Ok(params.to_page(items, total as usize))
    }

    // Projection

    /// Returns the projected fields of every match.
    pub async fn project_all<P: DeserializeOwned>(
        &self,
        filter: Expr,
        projection: Projection,
    ) -> DocumentStoreResult<Vec<P>> {
        self.project(filter, projection, None).await
    }

    pub async fn project_first<P: DeserializeOwned>(
        &self,
        filter: Expr,
        projection: Projection,
    ) -> DocumentStoreResult<P> {
        self.project_first_or_default(filter, projection)
            .await?
            .ok_or_else(|| self.no_match())
    }

    pub async fn project_first_or_default<P: DeserializeOwned>(
        &self,
        filter: Expr,
        projection: Projection,
    ) -> DocumentStoreResult<Option<P>> {
        Ok(self
            .project(filter, projection, Some(1))
            .await?
            .into_iter()
            .next())
    }

    pub async fn project_single<P: DeserializeOwned>(
        &self,
        filter: Expr,
        projection: Projection,
    ) -> DocumentStoreResult<P> {
        self.project_single_or_default(filter, projection)
            .await?
            .ok_or_else(|| self.no_match())
    }

    pub async fn project_single_or_default<P: DeserializeOwned>(
        &self,
        filter: Expr,
        projection: Projection,
    ) -> DocumentStoreResult<Option<P>> {
        let matches = self.project(filter, projection, Some(2)).await?;

        self.at_most_one(matches)
    }

    // Update

    /// Replaces the stored entity with the same identifier.
    pub async fn update(&mut self, entity: &E) -> DocumentStoreResult<()> {
        let op = TypedCollection::<B, E>::replace_op(entity)?;

        self.submit(vec![op], "replace").await
    }

    /// Replaces every entity in one ordered multi-operation write.
    ///
    /// Entities without an identifier are skipped.
    pub async fn update_many(&mut self, entities: &[E]) -> DocumentStoreResult<()> {
        let ops = entities
            .iter()
            .filter(|entity| !entity.id().is_unset())
            .map(TypedCollection::<B, E>::replace_op)
            .collect::<DocumentStoreResult<Vec<_>>>()?;

        if ops.len() < entities.len() {
            warn!(
                collection = self.collection_name(),
                skipped = entities.len() - ops.len(),
                "skipping entities without an identifier"
            );
        }
        if ops.is_empty() {
            return Ok(());
        }

        self.submit(ops, "replace").await
    }

    /// Applies a partial update to the entity with identifier `id`.
    pub async fn update_by_id(&mut self, id: &E::Key, update: UpdateDoc) -> DocumentStoreResult<()> {
        self.submit(
            vec![WriteOp::UpdateOne { filter: Filter::id(id), update }],
            "update",
        )
        .await
    }

    /// Applies a partial update to the stored copy of `entity`.
    pub async fn update_fields(&mut self, entity: &E, update: UpdateDoc) -> DocumentStoreResult<()> {
        self.update_by_id(entity.id(), update).await
    }

    /// Sets one field of the stored copy of `entity`.
    pub async fn set_field(
        &mut self,
        entity: &E,
        field: impl Into<String>,
        value: impl Into<Bson>,
    ) -> DocumentStoreResult<()> {
        self.update_by_id(entity.id(), UpdateDoc::new().set(field, value))
            .await
    }

    /// Sets one field of the entity with identifier `id`.
    pub async fn set_field_by_id(
        &mut self,
        id: &E::Key,
        field: impl Into<String>,
        value: impl Into<Bson>,
    ) -> DocumentStoreResult<()> {
        self.update_by_id(id, UpdateDoc::new().set(field, value))
            .await
    }

    /// Applies a partial update to every entity matching `filter`.
    pub async fn update_where(&mut self, filter: Expr, update: UpdateDoc) -> DocumentStoreResult<()> {
        self.submit(vec![WriteOp::UpdateMany { filter, update }], "update")
            .await
    }

    /// Sets one field on every entity matching `filter`.
    pub async fn set_field_where(
        &mut self,
        filter: Expr,
        field: impl Into<String>,
        value: impl Into<Bson>,
    ) -> DocumentStoreResult<()> {
        self.update_where(filter, UpdateDoc::new().set(field, value))
            .await
    }

    // Delete

    pub async fn delete(&mut self, entity: &E) -> DocumentStoreResult<()> {
        self.delete_by_id(entity.id()).await
    }

    /// Deletes one entity; fails with [`DocumentStoreError::PartialDelete`]
    /// if nothing was deleted.
    pub async fn delete_by_id(&mut self, id: &E::Key) -> DocumentStoreResult<()> {
        self.delete_exact(WriteOp::DeleteOne { filter: Filter::id(id) }, 1)
            .await
    }

    pub async fn delete_many(&mut self, entities: &[E]) -> DocumentStoreResult<()> {
        let ids = entities
            .iter()
            .map(|entity| entity.id().clone())
            .collect::<Vec<_>>();

        self.delete_by_ids(&ids).await
    }

    /// Deletes every entity in `ids`.
    ///
    /// Duplicate identifiers count once. An empty set is a no-op. Fails with
    /// [`DocumentStoreError::PartialDelete`] when fewer entities were deleted
    /// than distinct identifiers were given.
    pub async fn delete_by_ids(&mut self, ids: &[E::Key]) -> DocumentStoreResult<()> {
        let mut distinct: Vec<&E::Key> = Vec::with_capacity(ids.len());
        for id in ids {
            if !distinct.contains(&id) {
                distinct.push(id);
            }
        }

        if distinct.is_empty() {
            return Ok(());
        }

        let expected = distinct.len() as u64;

        self.delete_exact(
            WriteOp::DeleteMany { filter: Filter::id_in(distinct) },
            expected,
        )
        .await
    }

    /// Deletes every entity matching `filter`.
    pub async fn delete_where(&mut self, filter: Expr) -> DocumentStoreResult<()> {
        self.submit(vec![WriteOp::DeleteMany { filter }], "delete")
            .await
    }

    pub async fn delete_all(&mut self) -> DocumentStoreResult<()> {
        self.delete_where(Filter::all()).await
    }

    // Bulk

    /// Switches the repository into bulk mode.
    pub fn begin_bulk_operation(&mut self) -> DocumentStoreResult<()> {
        match self.bulk {
            BulkState::Batching(_) => Err(DocumentStoreError::BulkOperationAlreadyActive),
            BulkState::Idle => {
                debug!(collection = self.collection_name(), "bulk operation started");
                self.bulk = BulkState::Batching(Vec::new());
                Ok(())
            }
        }
    }

    /// Submits the pending batch and leaves bulk mode.
    ///
    /// The repository is back in normal mode when this returns, whether the
    /// submission succeeded or not.
    pub async fn do_bulk_operation(&mut self, options: BulkWriteOptions) -> DocumentStoreResult<WriteResult> {
        let ops = match mem::take(&mut self.bulk) {
            BulkState::Idle => return Err(DocumentStoreError::NoActiveBulkOperation),
            BulkState::Batching(ops) => ops,
        };

        if ops.is_empty() {
            return Ok(WriteResult::acknowledged());
        }

        let count = ops.len();
        let session = self.session().await;
        let result = self
            .run(self.collection.write(ops, options, session.as_ref()))
            .await?;

        info!(
            collection = self.collection_name(),
            operations = count,
            ordered = options.ordered,
            "bulk operation submitted"
        );

        Ok(result)
    }

    /// Begins bulk mode, runs `action`, then submits the batch.
    ///
    /// If `action` fails, the pending batch is discarded, the repository
    /// leaves bulk mode and the action's error is returned.
    pub async fn with_bulk_operation<F>(
        &mut self,
        options: BulkWriteOptions,
        action: F,
    ) -> DocumentStoreResult<WriteResult>
    where
        F: AsyncFnOnce(&mut Self) -> DocumentStoreResult<()>,
    {
        self.begin_bulk_operation()?;

        if let Err(err) = action(self).await {
            let discarded = self.discard_bulk_operation();
            warn!(
                collection = self.collection_name(),
                discarded,
                error = %err,
                "bulk action failed, batch discarded"
            );
            return Err(err);
        }

        self.do_bulk_operation(options).await
    }

    /// Drops the pending batch without submitting it and returns its size.
    pub fn discard_bulk_operation(&mut self) -> usize {
        match mem::take(&mut self.bulk) {
            BulkState::Batching(ops) => ops.len(),
            BulkState::Idle => 0,
        }
    }

    pub fn is_bulk_mode(&self) -> bool {
        matches!(self.bulk, BulkState::Batching(_))
    }

    /// Number of operations waiting in the batch.
    pub fn pending_operations(&self) -> usize {
        match &self.bulk {
            BulkState::Batching(ops) => ops.len(),
            BulkState::Idle => 0,
        }
    }

    // Indexes

    pub async fn create_ascending_index(
        &self,
        field: impl Into<String>,
        options: IndexOptions,
    ) -> DocumentStoreResult<String> {
        self.create_index(IndexDescriptor::uniform([field], IndexKind::Ascending, options))
            .await
    }

    pub async fn create_descending_index(
        &self,
        field: impl Into<String>,
        options: IndexOptions,
    ) -> DocumentStoreResult<String> {
        self.create_index(IndexDescriptor::uniform([field], IndexKind::Descending, options))
            .await
    }

    pub async fn create_text_index(
        &self,
        field: impl Into<String>,
        options: IndexOptions,
    ) -> DocumentStoreResult<String> {
        self.create_index(IndexDescriptor::uniform([field], IndexKind::Text, options))
            .await
    }

    pub async fn create_hashed_index(
        &self,
        field: impl Into<String>,
        options: IndexOptions,
    ) -> DocumentStoreResult<String> {
        self.create_index(IndexDescriptor::uniform([field], IndexKind::Hashed, options))
            .await
    }

    pub async fn create_combined_ascending_index<I, S>(
        &self,
        fields: I,
        options: IndexOptions,
    ) -> DocumentStoreResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.create_index(IndexDescriptor::uniform(fields, IndexKind::Ascending, options))
            .await
    }

    pub async fn create_combined_descending_index<I, S>(
        &self,
        fields: I,
        options: IndexOptions,
    ) -> DocumentStoreResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.create_index(IndexDescriptor::uniform(fields, IndexKind::Descending, options))
            .await
    }

    pub async fn create_combined_text_index<I, S>(
        &self,
        fields: I,
        options: IndexOptions,
    ) -> DocumentStoreResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.create_index(IndexDescriptor::uniform(fields, IndexKind::Text, options))
            .await
    }

    pub async fn create_combined_hashed_index<I, S>(
        &self,
        fields: I,
        options: IndexOptions,
    ) -> DocumentStoreResult<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.create_index(IndexDescriptor::uniform(fields, IndexKind::Hashed, options))
            .await
    }

    /// Creates a compound index with a kind per field.
    pub async fn create_combined_index(
        &self,
        keys: Vec<IndexKey>,
        options: IndexOptions,
    ) -> DocumentStoreResult<String> {
        self.create_index(IndexDescriptor::new(keys, options))
            .await
    }

    /// Creates an index and returns its name.
    pub async fn create_index(&self, index: IndexDescriptor) -> DocumentStoreResult<String> {
        let name = self
            .run(self.collection.create_index(index))
            .await?;

        info!(collection = self.collection_name(), index = %name, "index created");

        Ok(name)
    }

    /// Lists index names, always asking the store.
    pub async fn get_index_names(&self) -> DocumentStoreResult<Vec<String>> {
        self.run(self.collection.index_names()).await
    }

    pub async fn index_exists(&self, name: &str) -> DocumentStoreResult<bool> {
        Ok(self
            .get_index_names()
            .await?
            .iter()
            .any(|existing| existing == name))
    }

    pub async fn drop_index(&self, name: &str) -> DocumentStoreResult<()> {
        self.run(self.collection.drop_index(name)).await?;

        info!(collection = self.collection_name(), index = name, "index dropped");

        Ok(())
    }

    // Join

    /// Left-outer joins `F`'s collection into every entity matching `filter`.
    ///
    /// Each returned document is the stored entity with an `as_field` array
    /// holding the `F` documents whose `foreign_field` equals its `local_field`.
    pub async fn join<F: Entity>(
        &self,
        filter: Expr,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> DocumentStoreResult<Vec<Document>> {
        let spec = LookupSpec {
            from: self.context.collection_name::<F>()?,
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            as_field: as_field.into(),
        };
        let session = self.session().await;

        self.run(self.collection.lookup(Some(filter), spec, session.as_ref()))
            .await
    }

    // Internals

    fn assign_id(&self, entity: &mut E) -> DocumentStoreResult<()> {
        if entity.ensure_id()? {
            debug!(collection = self.collection_name(), id = ?entity.id(), "assigned identifier");
        }

        Ok(())
    }

    async fn session(&self) -> Option<SessionHandle> {
        self.context.current_session().await
    }

    async fn run<T>(&self, fut: impl Future<Output = DocumentStoreResult<T>>) -> DocumentStoreResult<T> {
        run_cancellable(self.cancellation.as_ref(), fut).await
    }

    async fn project<P: DeserializeOwned>(
        &self,
        filter: Expr,
        projection: Projection,
        limit: Option<usize>,
    ) -> DocumentStoreResult<Vec<P>> {
        let mut builder = Query::builder().filter(filter).project(projection);
        if let Some(limit) = limit {
            builder = builder.limit(limit);
        }
        let session = self.session().await;

        self.run(self.collection.find_projected(builder.build(), session.as_ref()))
            .await
    }

    /// Executes `ops`, or queues them in bulk mode, and checks acknowledgement.
    async fn submit(&mut self, ops: Vec<WriteOp>, what: &str) -> DocumentStoreResult<()> {
        self.submit_counted(ops, what).await.map(|_| ())
    }

    async fn submit_counted(&mut self, ops: Vec<WriteOp>, what: &str) -> DocumentStoreResult<Option<WriteResult>> {
        if let BulkState::Batching(pending) = &mut self.bulk {
            pending.extend(ops);
            return Ok(None);
        }

        let session = self.session().await;
        let result = self
            .run(self.collection.write(ops, BulkWriteOptions::default(), session.as_ref()))
            .await?;

        if !result.acknowledged {
            return Err(DocumentStoreError::WriteNotAcknowledged(format!(
                "{what} on {}",
                self.collection_name()
            )));
        }

        debug!(
            collection = self.collection_name(),
            matched = result.matched,
            modified = result.modified,
            deleted = result.deleted,
            "{what} applied"
        );

        Ok(Some(result))
    }

    async fn delete_exact(&mut self, op: WriteOp, expected: u64) -> DocumentStoreResult<()> {
        match self.submit_counted(vec![op], "delete").await? {
            Some(result) if result.deleted != expected => Err(DocumentStoreError::PartialDelete {
                expected,
                deleted: result.deleted,
            }),
            _ => Ok(()),
        }
    }

    fn no_match(&self) -> DocumentStoreError {
        DocumentStoreError::NoMatchingDocument(self.collection_name().to_string())
    }

    fn at_most_one<T>(&self, mut matches: Vec<T>) -> DocumentStoreResult<Option<T>> {
        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            _ => Err(DocumentStoreError::MultipleMatchingDocuments(
                self.collection_name().to_string(),
            )),
        }
    }
}
