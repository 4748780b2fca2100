//! In-memory storage implementation.
//!
//! Documents live in per-collection vectors (insertion order is the natural
//! order) behind an async-aware read-write lock.
//!
//! # Transactions
//!
//! Starting a transaction on a session takes a snapshot of the whole store.
//! Reads and writes carrying that session go to the snapshot. Commit merges
//! the transaction's per-document changes into the live store: documents it
//! inserted or modified replace the live document with the same `_id`, and
//! documents it deleted are removed. Writes made outside the transaction to
//! other documents survive, and index definitions are never touched. If the
//! merge would break a unique index, commit fails and the live store is left
//! as it was. Abort, or dropping the session, discards the snapshot.

use std::{any::Any, collections::HashMap, sync::Arc};
use async_trait::async_trait;
use mea::rwlock::RwLock;
use bson::{Bson, Document};
use tracing::debug;

use docrepo_core::{
    backend::{LookupSpec, StoreBackend, StoreBackendBuilder},
    document::ID_FIELD,
    error::{DocumentStoreError, DocumentStoreResult, WriteFailure},
    index::IndexDescriptor,
    query::{Expr, Query},
    session::{BackendSession, SessionHandle, SessionOptions, TransactionOptions},
    update::UpdateDoc,
    write::{BulkWriteOptions, WriteOp, WriteResult},
};

use crate::evaluator::{DocumentEvaluator, bson_eq, get_path, project_document, sort_documents};

const ID_INDEX: &str = "_id_";

#[derive(Debug, Clone, Default)]
struct CollectionData {
    documents: Vec<Document>,
    indexes: Vec<IndexDescriptor>,
}

type StoreMap = HashMap<String, CollectionData>;

#[derive(Debug)]
struct Transaction {
    snapshot: StoreMap,
    /// Documents of each written collection as they were when the
    /// transaction first wrote to it.
    originals: HashMap<String, Vec<Document>>,
}

/// Session state of the in-memory backend.
#[derive(Debug)]
pub struct InMemorySession {
    owner: usize,
    transaction: Option<Transaction>,
}

impl BackendSession for InMemorySession {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Thread-safe in-memory document storage backend.
///
/// `InMemoryStore` is cloneable and uses an `Arc`-wrapped internal state, so
/// clones share the same data.
///
/// # Performance
///
/// Queries scan every document in a collection; indexes only enforce
/// uniqueness. Use a persistent backend for anything large.
///
/// # Example
///
/// ```ignore
/// use docrepo_memory::InMemoryStore;
/// use docrepo::backend::StoreBackend;
/// use bson::{Bson, doc};
///
/// let store = InMemoryStore::new();
/// store
///     .insert_documents("users", vec![(Bson::Int64(1), Bson::Document(doc! { "name": "Alice" }))], None)
///     .await?;
/// ```
#[derive(Clone, Debug)]
pub struct InMemoryStore {
    /// collection name -> documents and indexes
    store: Arc<RwLock<StoreMap>>,
    acknowledge_writes: bool,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    /// Creates a new empty in-memory document store.
    pub fn new() -> Self {
        Self {
            store: Arc::new(RwLock::new(StoreMap::new())),
            acknowledge_writes: true,
        }
    }

    /// Creates a builder for constructing an `InMemoryStore` with custom options.
    ///
    /// ```ignore
    /// let store = InMemoryStore::builder().build().await?;
    /// ```
    pub fn builder() -> InMemoryStoreBuilder {
        InMemoryStoreBuilder::default()
    }

    fn owner_id(&self) -> usize {
        Arc::as_ptr(&self.store) as usize
    }

    fn session_mut<'s>(&self, session: &'s mut Box<dyn BackendSession>) -> DocumentStoreResult<&'s mut InMemorySession> {
        let owner = self.owner_id();

        session
            .as_any_mut()
            .downcast_mut::<InMemorySession>()
            .filter(|session| session.owner == owner)
            .ok_or_else(|| DocumentStoreError::InvalidSession("session belongs to another store".to_string()))
    }

    /// Runs `f` against the transaction snapshot if `session` has one, else
    /// against the live store.
    async fn read_with<T>(
        &self,
        session: Option<&SessionHandle>,
        f: impl FnOnce(&StoreMap) -> DocumentStoreResult<T>,
    ) -> DocumentStoreResult<T> {
        if let Some(handle) = session {
            let mut guard = handle.lock().await;
            let session = self.session_mut(&mut guard)?;

            if let Some(transaction) = &session.transaction {
                return f(&transaction.snapshot);
            }
        }

        let store = self.store.read().await;
        f(&store)
    }

    /// Write counterpart of [`read_with`](Self::read_with); remembers the
    /// transaction's starting view of `collection` on its first write.
    async fn write_with<T>(
        &self,
        collection: &str,
        session: Option<&SessionHandle>,
        f: impl FnOnce(&mut StoreMap) -> DocumentStoreResult<T>,
    ) -> DocumentStoreResult<T> {
        if let Some(handle) = session {
            let mut guard = handle.lock().await;
            let session = self.session_mut(&mut guard)?;

            if let Some(transaction) = &mut session.transaction {
                if !transaction.originals.contains_key(collection) {
                    let original = transaction
                        .snapshot
                        .get(collection)
                        .map(|data| data.documents.clone())
                        .unwrap_or_default();
                    transaction.originals.insert(collection.to_string(), original);
                }
                return f(&mut transaction.snapshot);
            }
        }

        let mut store = self.store.write().await;
        f(&mut store)
    }

    fn acknowledge(&self, result: WriteResult) -> WriteResult {
        if self.acknowledge_writes {
            WriteResult { acknowledged: true, ..result }
        } else {
            WriteResult::default()
        }
    }
}

fn run_query(data: Option<&CollectionData>, query: &Query) -> DocumentStoreResult<Vec<Bson>> {
    let Some(data) = data else {
        return Ok(vec![]);
    };

    let mut documents = DocumentEvaluator::filter_documents(&data.documents, query.filter.as_ref())?;
    sort_documents(&mut documents, &query.sort);

    Ok(documents
        .into_iter()
        .skip(query.offset.unwrap_or(0))
        .take(query.limit.unwrap_or(usize::MAX))
        .map(|doc| match &query.projection {
            Some(projection) => Bson::Document(project_document(&doc, projection)),
            None => Bson::Document(doc),
        })
        .collect())
}

fn prepare_document(id: Bson, document: Bson) -> DocumentStoreResult<Document> {
    let Bson::Document(fields) = document else {
        return Err(DocumentStoreError::InvalidDocument("Expected document".into()));
    };

    let mut prepared = Document::new();
    prepared.insert(ID_FIELD, id);
    prepared.extend(fields.into_iter().filter(|(k, _)| k != ID_FIELD));

    Ok(prepared)
}

fn index_key(document: &Document, index: &IndexDescriptor) -> Option<Vec<Bson>> {
    let values = index
        .keys
        .iter()
        .map(|key| get_path(document, &key.field).cloned())
        .collect::<Vec<_>>();

    if index.options.sparse && values.iter().all(Option::is_none) {
        return None;
    }

    Some(values.into_iter().map(|v| v.unwrap_or(Bson::Null)).collect())
}

impl CollectionData {
    fn matching_positions(&self, filter: &Expr, first_only: bool) -> DocumentStoreResult<Vec<usize>> {
        let mut positions = Vec::new();

        for (position, doc) in self.documents.iter().enumerate() {
            if DocumentEvaluator::matches(doc, Some(filter))? {
                positions.push(position);
                if first_only {
                    break;
                }
            }
        }

        Ok(positions)
    }

    /// Checks that `candidate`, stored at `position` (or appended when
    /// `None`), violates neither `_id` nor any unique index.
    fn check_unique(&self, collection: &str, candidate: &Document, position: Option<usize>) -> DocumentStoreResult<()> {
        let others = self
            .documents
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != position)
            .map(|(_, doc)| doc);

        for other in others {
            if other.get(ID_FIELD) == candidate.get(ID_FIELD) {
                return Err(DocumentStoreError::DocumentAlreadyExists(
                    candidate.get(ID_FIELD).map(Bson::to_string).unwrap_or_default(),
                    collection.to_string(),
                ));
            }

            for index in self.indexes.iter().filter(|index| index.options.unique) {
                if let (Some(mine), Some(theirs)) = (index_key(candidate, index), index_key(other, index)) {
                    if mine == theirs {
                        return Err(DocumentStoreError::Backend(format!(
                            "duplicate key in unique index {} of {collection}",
                            index.name()
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Applies the difference between `original` and `written` to these
    /// documents, matching by `_id`.
    fn merge_changes(&mut self, collection: &str, original: &[Document], written: &[Document]) -> DocumentStoreResult<()> {
        let same_id = |a: &Document, b: &Document| a.get(ID_FIELD) == b.get(ID_FIELD);

        for removed in original.iter().filter(|doc| !written.iter().any(|w| same_id(w, *doc))) {
            self.documents.retain(|doc| !same_id(doc, removed));
        }

        for changed in written.iter().filter(|doc| !original.contains(doc)) {
            match self.documents.iter().position(|doc| same_id(doc, changed)) {
                Some(position) => {
                    self.replace_at(collection, position, changed.clone())?;
                }
                None => self.insert(collection, changed.clone())?,
            }
        }

        Ok(())
    }

    fn insert(&mut self, collection: &str, document: Document) -> DocumentStoreResult<()> {
        self.check_unique(collection, &document, None)?;
        self.documents.push(document);

        Ok(())
    }

    fn replace_at(&mut self, collection: &str, position: usize, document: Document) -> DocumentStoreResult<bool> {
        self.check_unique(collection, &document, Some(position))?;
        let changed = self.documents[position] != document;
        self.documents[position] = document;

        Ok(changed)
    }

    fn update_at(&mut self, collection: &str, position: usize, update: &UpdateDoc) -> DocumentStoreResult<bool> {
        if update.ops().iter().any(|op| op.field() == ID_FIELD) {
            return Err(DocumentStoreError::InvalidDocument("the _id field is immutable".into()));
        }

        let mut updated = self.documents[position].clone();
        update.apply(&mut updated)?;

        self.replace_at(collection, position, updated)
    }

    fn apply(&mut self, collection: &str, op: WriteOp, result: &mut WriteResult) -> DocumentStoreResult<()> {
        match op {
            WriteOp::InsertOne { id, document } => {
                self.insert(collection, prepare_document(id, document)?)?;
                result.inserted += 1;
            }
            WriteOp::ReplaceOne { filter, id, document, upsert } => {
                match self.matching_positions(&filter, true)?.first() {
                    Some(&position) => {
                        let existing_id = self.documents[position].get(ID_FIELD).cloned().unwrap_or(id);
                        let changed = self.replace_at(collection, position, prepare_document(existing_id, document)?)?;
                        result.matched += 1;
                        result.modified += u64::from(changed);
                    }
                    None if upsert => {
                        self.insert(collection, prepare_document(id, document)?)?;
                        result.upserted += 1;
                    }
                    None => {}
                }
            }
            WriteOp::UpdateOne { filter, update } => {
                for position in self.matching_positions(&filter, true)? {
                    let changed = self.update_at(collection, position, &update)?;
                    result.matched += 1;
                    result.modified += u64::from(changed);
                }
            }
            WriteOp::UpdateMany { filter, update } => {
                for position in self.matching_positions(&filter, false)? {
                    let changed = self.update_at(collection, position, &update)?;
                    result.matched += 1;
                    result.modified += u64::from(changed);
                }
            }
            WriteOp::DeleteOne { filter } => {
                if let Some(position) = self.matching_positions(&filter, true)?.pop() {
                    self.documents.remove(position);
                    result.deleted += 1;
                }
            }
            WriteOp::DeleteMany { filter } => {
                let positions = self.matching_positions(&filter, false)?;

                for position in positions.into_iter().rev() {
                    self.documents.remove(position);
                    result.deleted += 1;
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn start_session(&self, _options: Option<SessionOptions>) -> DocumentStoreResult<SessionHandle> {
        Ok(SessionHandle::new(Box::new(InMemorySession {
            owner: self.owner_id(),
            transaction: None,
        })))
    }

    async fn start_transaction(&self, session: &SessionHandle, _options: Option<TransactionOptions>) -> DocumentStoreResult<()> {
        let mut guard = session.lock().await;
        let session = self.session_mut(&mut guard)?;

        if session.transaction.is_some() {
            return Err(DocumentStoreError::TransactionAlreadyActive);
        }

        session.transaction = Some(Transaction {
            snapshot: self.store.read().await.clone(),
            originals: HashMap::new(),
        });

        Ok(())
    }

    async fn commit_transaction(&self, session: &SessionHandle) -> DocumentStoreResult<()> {
        let mut guard = session.lock().await;
        let Transaction { snapshot, originals } = self
            .session_mut(&mut guard)?
            .transaction
            .take()
            .ok_or(DocumentStoreError::NoActiveTransaction)?;

        let mut store = self.store.write().await;

        // Merge into copies first so a conflict leaves the live store intact.
        let mut merged = Vec::with_capacity(originals.len());
        for (name, original) in &originals {
            let written = snapshot
                .get(name)
                .map(|data| data.documents.as_slice())
                .unwrap_or_default();
            let mut data = store.get(name).cloned().unwrap_or_default();
            data.merge_changes(name, original, written)?;
            merged.push((name.clone(), data));
        }

        let collections = merged.len();
        store.extend(merged);

        debug!(collections, "transaction committed");

        Ok(())
    }

    async fn abort_transaction(&self, session: &SessionHandle) -> DocumentStoreResult<()> {
        let mut guard = session.lock().await;

        self.session_mut(&mut guard)?
            .transaction
            .take()
            .map(|_| ())
            .ok_or(DocumentStoreError::NoActiveTransaction)
    }

    async fn insert_documents(
        &self,
        collection: &str,
        documents: Vec<(Bson, Bson)>,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<WriteResult> {
        let prepared = documents
            .into_iter()
            .map(|(id, doc)| prepare_document(id, doc))
            .collect::<DocumentStoreResult<Vec<_>>>()?;
        let count = prepared.len() as u64;

        self.write_with(collection, session, |store| {
            let data = store.entry(collection.to_string()).or_default();

            // Validate against a scratch copy so a failed batch leaves no trace.
            let mut staged = data.clone();
            for document in prepared {
                staged.insert(collection, document)?;
            }
            *data = staged;

            Ok(())
        })
        .await?;

        debug!(collection, count, "inserted documents");

        Ok(self.acknowledge(WriteResult { inserted: count, ..WriteResult::default() }))
    }

    async fn find_documents(
        &self,
        collection: &str,
        query: Query,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        self.read_with(session, |store| run_query(store.get(collection), &query))
            .await
    }

    async fn count_documents(
        &self,
        collection: &str,
        filter: Option<Expr>,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<u64> {
        self.read_with(session, |store| {
            let Some(data) = store.get(collection) else {
                return Ok(0);
            };

            let mut count = 0;
            for doc in &data.documents {
                if DocumentEvaluator::matches(doc, filter.as_ref())? {
                    count += 1;
                }
            }

            Ok(count)
        })
        .await
    }

    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<WriteOp>,
        options: BulkWriteOptions,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<WriteResult> {
        let total = operations.len();

        let result = self
            .write_with(collection, session, |store| {
                let data = store.entry(collection.to_string()).or_default();
                let mut result = WriteResult::default();
                let mut failures = Vec::new();

                for (index, op) in operations.into_iter().enumerate() {
                    if let Err(err) = data.apply(collection, op, &mut result) {
                        failures.push(WriteFailure { index, message: err.to_string() });
                        if options.ordered {
                            break;
                        }
                    }
                }

                if failures.is_empty() {
                    Ok(result)
                } else {
                    Err(DocumentStoreError::BulkWrite(failures))
                }
            })
            .await?;

        debug!(collection, total, ordered = options.ordered, "bulk write applied");

        Ok(self.acknowledge(result))
    }

    async fn lookup(
        &self,
        collection: &str,
        filter: Option<Expr>,
        spec: LookupSpec,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        self.read_with(session, |store| {
            let Some(data) = store.get(collection) else {
                return Ok(vec![]);
            };
            let foreign = store
                .get(&spec.from)
                .map(|data| data.documents.as_slice())
                .unwrap_or_default();

            DocumentEvaluator::filter_documents(&data.documents, filter.as_ref())?
                .into_iter()
                .map(|mut doc| {
                    let local = get_path(&doc, &spec.local_field).cloned().unwrap_or(Bson::Null);
                    let joined = foreign
                        .iter()
                        .filter(|other| {
                            let theirs = get_path(other, &spec.foreign_field).unwrap_or(&Bson::Null);
                            match &local {
                                Bson::Array(values) => values.iter().any(|value| bson_eq(value, theirs)),
                                value => bson_eq(value, theirs),
                            }
                        })
                        .cloned()
                        .map(Bson::Document)
                        .collect::<Vec<_>>();

                    doc.insert(spec.as_field.clone(), joined);
                    Ok(Bson::Document(doc))
                })
                .collect()
        })
        .await
    }

    async fn create_index(&self, collection: &str, index: IndexDescriptor) -> DocumentStoreResult<String> {
        let name = index.name();
        let mut store = self.store.write().await;
        let data = store.entry(collection.to_string()).or_default();

        if let Some(existing) = data.indexes.iter().find(|existing| existing.name() == name) {
            if existing.keys == index.keys {
                return Ok(name);
            }
            return Err(DocumentStoreError::Backend(format!(
                "index {name} already exists with different keys"
            )));
        }

        if index.options.unique {
            let mut seen: Vec<Vec<Bson>> = Vec::new();
            for key in data.documents.iter().filter_map(|doc| index_key(doc, &index)) {
                if seen.contains(&key) {
                    return Err(DocumentStoreError::Backend(format!(
                        "cannot build unique index {name}: duplicate key"
                    )));
                }
                seen.push(key);
            }
        }

        data.indexes.push(index);

        Ok(name)
    }

    async fn list_index_names(&self, collection: &str) -> DocumentStoreResult<Vec<String>> {
        Ok(self
            .store
            .read()
            .await
            .get(collection)
            .map(|data| {
                std::iter::once(ID_INDEX.to_string())
                    .chain(data.indexes.iter().map(IndexDescriptor::name))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn drop_index(&self, collection: &str, name: &str) -> DocumentStoreResult<()> {
        if name == ID_INDEX {
            return Err(DocumentStoreError::Backend("cannot drop the _id index".into()));
        }

        let mut store = self.store.write().await;
        let data = store
            .get_mut(collection)
            .ok_or_else(|| DocumentStoreError::CollectionNotFound(collection.to_string()))?;
        let position = data
            .indexes
            .iter()
            .position(|index| index.name() == name)
            .ok_or_else(|| DocumentStoreError::IndexNotFound(name.to_string(), collection.to_string()))?;

        data.indexes.remove(position);

        Ok(())
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.store
            .write()
            .await
            .entry(name.to_string())
            .or_default();

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.store.write().await.remove(name);

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        Ok(
            self.store
                .read()
                .await
                .keys()
                .cloned()
                .collect()
        )
    }
}


/// Builder for constructing [`InMemoryStore`] instances.
///
/// ```ignore
/// use docrepo_memory::InMemoryStore;
/// use docrepo::backend::StoreBackendBuilder;
///
/// let store = InMemoryStore::builder()
///     .acknowledge_writes(false)
///     .build()
///     .await?;
/// ```
#[derive(Debug)]
pub struct InMemoryStoreBuilder {
    acknowledge_writes: bool,
}

impl Default for InMemoryStoreBuilder {
    fn default() -> Self {
        Self { acknowledge_writes: true }
    }
}

impl InMemoryStoreBuilder {
    /// When `false`, writes are applied but reported as unacknowledged,
    /// like a fire-and-forget write concern.
    pub fn acknowledge_writes(mut self, acknowledge: bool) -> Self {
        self.acknowledge_writes = acknowledge;
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for InMemoryStoreBuilder {
    type Backend = InMemoryStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        Ok(InMemoryStore {
            acknowledge_writes: self.acknowledge_writes,
            ..InMemoryStore::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use docrepo_core::{
        index::{IndexKind, IndexOptions},
        query::{Filter, SortSpec},
    };

    fn pair(id: i64, doc: Document) -> (Bson, Bson) {
        (Bson::Int64(id), Bson::Document(doc))
    }

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .insert_documents(
                "users",
                vec![
                    pair(1, doc! { "name": "Alice", "age": 30 }),
                    pair(2, doc! { "name": "Bob", "age": 25 }),
                    pair(3, doc! { "name": "Carol", "age": 35 }),
                ],
                None,
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn insert_puts_id_first_and_rejects_duplicates() {
        let store = seeded().await;

        let found = store.find_documents("users", Query::filtered(Filter::eq("name", "Bob")), None).await.unwrap();
        let Bson::Document(bob) = &found[0] else { panic!("expected document") };
        assert_eq!(bob.keys().next().map(String::as_str), Some(ID_FIELD));

        let err = store
            .insert_documents("users", vec![pair(4, doc! {}), pair(2, doc! {})], None)
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::DocumentAlreadyExists(_, _)));

        // the whole batch is rejected
        assert_eq!(store.count_documents("users", None, None).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn find_sorts_pages_and_projects() {
        let store = seeded().await;

        let query = Query::builder()
            .sort_by(SortSpec::desc("age"))
            .offset(1)
            .limit(1)
            .project(docrepo_core::query::Projection::include(["name"]))
            .build();
        let found = store.find_documents("users", query, None).await.unwrap();

        assert_eq!(found, vec![Bson::Document(doc! { "name": "Alice" })]);
    }

    #[tokio::test]
    async fn ordered_bulk_write_stops_at_first_failure() {
        let store = seeded().await;

        let err = store
            .bulk_write(
                "users",
                vec![
                    WriteOp::DeleteOne { filter: Filter::eq("name", "Alice") },
                    WriteOp::InsertOne { id: Bson::Int64(2), document: Bson::Document(doc! {}) },
                    WriteOp::DeleteOne { filter: Filter::eq("name", "Bob") },
                ],
                BulkWriteOptions::default(),
                None,
            )
            .await
            .unwrap_err();

        let DocumentStoreError::BulkWrite(failures) = err else { panic!("expected bulk failure") };
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 1);
        assert_eq!(store.count_documents("users", None, None).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unordered_bulk_write_attempts_everything() {
        let store = seeded().await;

        let err = store
            .bulk_write(
                "users",
                vec![
                    WriteOp::InsertOne { id: Bson::Int64(1), document: Bson::Document(doc! {}) },
                    WriteOp::InsertOne { id: Bson::Int64(2), document: Bson::Document(doc! {}) },
                    WriteOp::DeleteMany { filter: Filter::all() },
                ],
                BulkWriteOptions::unordered(),
                None,
            )
            .await
            .unwrap_err();

        let DocumentStoreError::BulkWrite(failures) = err else { panic!("expected bulk failure") };
        assert_eq!(failures.iter().map(|f| f.index).collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(store.count_documents("users", None, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn updates_report_matched_and_modified() {
        let store = seeded().await;

        let result = store
            .bulk_write(
                "users",
                vec![WriteOp::UpdateMany {
                    filter: Filter::gte("age", 30),
                    update: UpdateDoc::new().set("senior", true),
                }],
                BulkWriteOptions::default(),
                None,
            )
            .await
            .unwrap();

        assert!(result.acknowledged);
        assert_eq!((result.matched, result.modified), (2, 2));

        let err = store
            .bulk_write(
                "users",
                vec![WriteOp::UpdateOne { filter: Filter::all(), update: UpdateDoc::new().set("_id", 9) }],
                BulkWriteOptions::default(),
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::BulkWrite(_)));
    }

    #[tokio::test]
    async fn replace_upserts_when_nothing_matches() {
        let store = InMemoryStore::new();

        let result = store
            .bulk_write(
                "users",
                vec![WriteOp::ReplaceOne {
                    filter: Filter::eq(ID_FIELD, 7_i64),
                    id: Bson::Int64(7),
                    document: Bson::Document(doc! { "name": "Dan" }),
                    upsert: true,
                }],
                BulkWriteOptions::default(),
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.upserted, 1);
        assert_eq!(store.count_documents("users", None, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn transaction_writes_are_isolated_until_commit() {
        let store = seeded().await;
        let session = store.start_session(None).await.unwrap();
        store.start_transaction(&session, None).await.unwrap();

        store
            .insert_documents("users", vec![pair(4, doc! { "name": "Dan" })], Some(&session))
            .await
            .unwrap();

        assert_eq!(store.count_documents("users", None, None).await.unwrap(), 3);
        assert_eq!(store.count_documents("users", None, Some(&session)).await.unwrap(), 4);

        store.commit_transaction(&session).await.unwrap();

        assert_eq!(store.count_documents("users", None, None).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn commit_keeps_outside_writes_and_indexes() {
        let store = seeded().await;
        let session = store.start_session(None).await.unwrap();
        store.start_transaction(&session, None).await.unwrap();

        store
            .insert_documents("users", vec![pair(4, doc! { "name": "Dan" })], Some(&session))
            .await
            .unwrap();
        store
            .bulk_write(
                "users",
                vec![
                    WriteOp::UpdateOne { filter: Filter::eq("name", "Bob"), update: UpdateDoc::new().set("age", 26) },
                    WriteOp::DeleteOne { filter: Filter::eq("name", "Carol") },
                ],
                BulkWriteOptions::default(),
                Some(&session),
            )
            .await
            .unwrap();

        // committed outside the transaction meanwhile
        store
            .insert_documents("users", vec![pair(5, doc! { "name": "Eve" })], None)
            .await
            .unwrap();
        let index = IndexDescriptor::uniform(["name"], IndexKind::Ascending, IndexOptions::default());
        store.create_index("users", index).await.unwrap();

        store.commit_transaction(&session).await.unwrap();

        let names: Vec<String> = store
            .find_documents("users", Query::builder().sort_by(SortSpec::asc(ID_FIELD)).build(), None)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|doc| doc.as_document().and_then(|d| d.get_str("name").ok()).map(str::to_string))
            .collect();
        assert_eq!(names, vec!["Alice", "Bob", "Dan", "Eve"]);
        assert_eq!(
            store.count_documents("users", Some(Filter::eq("age", 26)), None).await.unwrap(),
            1
        );
        assert_eq!(store.list_index_names("users").await.unwrap(), vec!["_id_", "name_1"]);
    }

    #[tokio::test]
    async fn conflicting_commit_leaves_live_store_unchanged() {
        let store = seeded().await;
        let index = IndexDescriptor::uniform(["name"], IndexKind::Ascending, IndexOptions::default().unique(true));
        let session = store.start_session(None).await.unwrap();
        store.start_transaction(&session, None).await.unwrap();

        store
            .insert_documents(
                "users",
                vec![pair(4, doc! { "name": "Dan" }), pair(6, doc! { "name": "Zed" })],
                Some(&session),
            )
            .await
            .unwrap();

        store.create_index("users", index).await.unwrap();
        store
            .insert_documents("users", vec![pair(5, doc! { "name": "Zed" })], None)
            .await
            .unwrap();

        assert!(store.commit_transaction(&session).await.is_err());
        assert_eq!(store.count_documents("users", None, None).await.unwrap(), 4);
        assert_eq!(
            store.count_documents("users", Some(Filter::eq("name", "Dan")), None).await.unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn abort_discards_transaction_writes() {
        let store = seeded().await;
        let session = store.start_session(None).await.unwrap();
        store.start_transaction(&session, None).await.unwrap();

        assert!(matches!(
            store.start_transaction(&session, None).await,
            Err(DocumentStoreError::TransactionAlreadyActive)
        ));

        store
            .bulk_write("users", vec![WriteOp::DeleteMany { filter: Filter::all() }], BulkWriteOptions::default(), Some(&session))
            .await
            .unwrap();
        store.abort_transaction(&session).await.unwrap();

        assert_eq!(store.count_documents("users", None, None).await.unwrap(), 3);
        assert!(matches!(
            store.commit_transaction(&session).await,
            Err(DocumentStoreError::NoActiveTransaction)
        ));
    }

    #[tokio::test]
    async fn foreign_sessions_are_rejected() {
        let store = seeded().await;
        let other = InMemoryStore::new();
        let session = other.start_session(None).await.unwrap();

        let err = store.start_transaction(&session, None).await.unwrap_err();

        assert!(matches!(err, DocumentStoreError::InvalidSession(_)));
    }

    #[tokio::test]
    async fn unique_index_is_enforced() {
        let store = seeded().await;
        let index = IndexDescriptor::uniform(["name"], IndexKind::Ascending, IndexOptions::default().unique(true));

        let name = store.create_index("users", index.clone()).await.unwrap();
        assert_eq!(name, "name_1");
        // same definition twice is fine
        assert_eq!(store.create_index("users", index).await.unwrap(), "name_1");

        let err = store
            .insert_documents("users", vec![pair(9, doc! { "name": "Alice" })], None)
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::Backend(_)));

        assert_eq!(store.list_index_names("users").await.unwrap(), vec!["_id_", "name_1"]);

        store.drop_index("users", "name_1").await.unwrap();
        assert!(matches!(
            store.drop_index("users", "name_1").await,
            Err(DocumentStoreError::IndexNotFound(_, _))
        ));
    }

    #[tokio::test]
    async fn lookup_attaches_matching_documents() {
        let store = seeded().await;
        store
            .insert_documents(
                "orders",
                vec![
                    pair(10, doc! { "user": 1_i64, "total": 5 }),
                    pair(11, doc! { "user": 1_i64, "total": 7 }),
                    pair(12, doc! { "user": 3_i64, "total": 1 }),
                ],
                None,
            )
            .await
            .unwrap();

        let joined = store
            .lookup(
                "users",
                Some(Filter::eq("name", "Alice")),
                LookupSpec {
                    from: "orders".into(),
                    local_field: ID_FIELD.into(),
                    foreign_field: "user".into(),
                    as_field: "orders".into(),
                },
                None,
            )
            .await
            .unwrap();

        let Bson::Document(alice) = &joined[0] else { panic!("expected document") };
        assert_eq!(alice.get_array("orders").unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unacknowledged_writes_still_apply() {
        let store = InMemoryStore::builder().acknowledge_writes(false).build().await.unwrap();

        let result = store
            .insert_documents("users", vec![pair(1, doc! {})], None)
            .await
            .unwrap();

        assert!(!result.acknowledged);
        assert_eq!(store.count_documents("users", None, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn create_collection_keeps_existing_documents() {
        let store = seeded().await;

        store.create_collection("users").await.unwrap();
        store.create_collection("audit").await.unwrap();

        let mut names = store.list_collections().await.unwrap();
        names.sort();

        assert_eq!(names, vec!["audit", "users"]);
        assert_eq!(store.count_documents("users", None, None).await.unwrap(), 3);
        assert_eq!(store.count_documents("audit", None, None).await.unwrap(), 0);
    }
}
