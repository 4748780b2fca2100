use std::any::Any;
use async_trait::async_trait;
use futures::TryStreamExt;
use bson::{Document, Bson, doc};
use mea::mutex::MutexGuard;
use mongodb::{
    Client, ClientSession, Collection as MongoCollection, IndexModel,
    error::ErrorKind,
    options::{Acknowledgment, ClientOptions, FindOptions, IndexOptions, WriteConcern},
};
use tracing::{debug, info};
use docrepo_core::{
    backend::{LookupSpec, StoreBackend, StoreBackendBuilder},
    document::ID_FIELD,
    error::{DocumentStoreError, DocumentStoreResult, WriteFailure},
    index::IndexDescriptor,
    query::{Expr, Query},
    session::{BackendSession, SessionHandle, SessionOptions, TransactionOptions},
    write::{BulkWriteOptions, WriteOp, WriteResult},
};

use crate::query::{
    MongoQueryTranslator, index_keys_document, projection_document, sort_document, update_document,
};

fn backend_error(err: mongodb::error::Error) -> DocumentStoreError {
    DocumentStoreError::Backend(err.to_string())
}

/// A driver session carried inside a [`SessionHandle`].
#[derive(Debug)]
pub struct MongoSession {
    session: ClientSession,
    in_transaction: bool,
}

impl MongoSession {
    pub fn new(session: ClientSession) -> Self {
        Self { session, in_transaction: false }
    }

    pub fn client_session(&mut self) -> &mut ClientSession {
        &mut self.session
    }
}

impl BackendSession for MongoSession {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Holds a session's lock for the duration of one driver call.
struct SessionLock<'a>(Option<MutexGuard<'a, Box<dyn BackendSession>>>);

impl<'a> SessionLock<'a> {
    async fn acquire(session: Option<&'a SessionHandle>) -> Self {
        match session {
            Some(handle) => Self(Some(handle.lock().await)),
            None => Self(None),
        }
    }

    fn client_session(&mut self) -> DocumentStoreResult<Option<&mut ClientSession>> {
        match &mut self.0 {
            Some(guard) => guard
                .as_any_mut()
                .downcast_mut::<MongoSession>()
                .map(|session| Some(session.client_session()))
                .ok_or_else(|| DocumentStoreError::InvalidSession("not a MongoDB session".to_string())),
            None => Ok(None),
        }
    }
}

fn mongo_session(handle: &mut Box<dyn BackendSession>) -> DocumentStoreResult<&mut MongoSession> {
    handle
        .as_any_mut()
        .downcast_mut::<MongoSession>()
        .ok_or_else(|| DocumentStoreError::InvalidSession("not a MongoDB session".to_string()))
}

fn prepare_document(id: Bson, document: Bson) -> DocumentStoreResult<Document> {
    let Bson::Document(fields) = document else {
        return Err(DocumentStoreError::InvalidDocument("Expected document".into()));
    };

    Ok(prepare_fields(id, fields))
}

fn prepare_fields(id: Bson, fields: Document) -> Document {
    let mut prepared = doc! { ID_FIELD: id };
    prepared.extend(fields.into_iter().filter(|(k, _)| k != ID_FIELD));

    prepared
}

/// A slice of a multi-operation write sent to the server in one call.
#[derive(Debug)]
enum WriteBatch {
    /// Consecutive inserts starting at operation `start`.
    Inserts { start: usize, documents: Vec<Document> },
    Single { index: usize, op: WriteOp },
}

/// Groups consecutive inserts so each run costs one round trip. Inserts
/// whose payload is not a document stay single and fail at their own index.
fn batch_operations(operations: Vec<WriteOp>) -> Vec<WriteBatch> {
    let mut batches = Vec::new();

    for (index, op) in operations.into_iter().enumerate() {
        match op {
            WriteOp::InsertOne { id, document: Bson::Document(fields) } => {
                let prepared = prepare_fields(id, fields);

                match batches.last_mut() {
                    Some(WriteBatch::Inserts { documents, .. }) => documents.push(prepared),
                    _ => batches.push(WriteBatch::Inserts { start: index, documents: vec![prepared] }),
                }
            }
            op => batches.push(WriteBatch::Single { index, op }),
        }
    }

    batches
}

/// MongoDB-backed document store.
#[derive(Debug, Clone)]
pub struct MongoDbStore {
    client: Client,
    database: String,
}

impl MongoDbStore {
    pub fn new(client: Client, database: impl Into<String>) -> Self {
        Self { client, database: database.into() }
    }

    pub fn builder(dsn: &str, database: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, Some(database))
    }

    /// Builder whose database is taken from the path of `dsn`.
    ///
    /// ```ignore
    /// let store = MongoDbStore::from_connection_string("mongodb://localhost:27017/shop")
    ///     .build()
    ///     .await?;
    /// ```
    pub fn from_connection_string(dsn: &str) -> MongoDbStoreBuilder {
        MongoDbStoreBuilder::new(dsn, None)
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }

    fn acknowledges(collection: &MongoCollection<Document>) -> bool {
        !matches!(
            collection.write_concern(),
            Some(WriteConcern { w: Some(Acknowledgment::Nodes(0)), .. })
        )
    }

    async fn apply(
        collection: &MongoCollection<Document>,
        op: WriteOp,
        session: Option<&mut ClientSession>,
        result: &mut WriteResult,
    ) -> DocumentStoreResult<()> {
        match op {
            WriteOp::InsertOne { id, document } => {
                let action = collection.insert_one(prepare_document(id, document)?);
                match session {
                    Some(s) => action.session(s).await,
                    None => action.await,
                }
                .map_err(backend_error)?;

                result.inserted += 1;
            }
            WriteOp::ReplaceOne { filter, id, document, upsert } => {
                let action = collection
                    .replace_one(MongoQueryTranslator::translate(Some(&filter))?, prepare_document(id, document)?)
                    .upsert(upsert);
                let outcome = match session {
                    Some(s) => action.session(s).await,
                    None => action.await,
                }
                .map_err(backend_error)?;

                result.matched += outcome.matched_count;
                result.modified += outcome.modified_count;
                result.upserted += u64::from(outcome.upserted_id.is_some());
            }
            WriteOp::UpdateOne { filter, update } => {
                let action = collection.update_one(MongoQueryTranslator::translate(Some(&filter))?, update_document(&update));
                let outcome = match session {
                    Some(s) => action.session(s).await,
                    None => action.await,
                }
                .map_err(backend_error)?;

                result.matched += outcome.matched_count;
                result.modified += outcome.modified_count;
            }
            WriteOp::UpdateMany { filter, update } => {
                let action = collection.update_many(MongoQueryTranslator::translate(Some(&filter))?, update_document(&update));
                let outcome = match session {
                    Some(s) => action.session(s).await,
                    None => action.await,
                }
                .map_err(backend_error)?;

                result.matched += outcome.matched_count;
                result.modified += outcome.modified_count;
            }
            WriteOp::DeleteOne { filter } => {
                let action = collection.delete_one(MongoQueryTranslator::translate(Some(&filter))?);
                let outcome = match session {
                    Some(s) => action.session(s).await,
                    None => action.await,
                }
                .map_err(backend_error)?;

                result.deleted += outcome.deleted_count;
            }
            WriteOp::DeleteMany { filter } => {
                let action = collection.delete_many(MongoQueryTranslator::translate(Some(&filter))?);
                let outcome = match session {
                    Some(s) => action.session(s).await,
                    None => action.await,
                }
                .map_err(backend_error)?;

                result.deleted += outcome.deleted_count;
            }
        }

        Ok(())
    }

    /// Sends a run of consecutive inserts as one `insert_many`. Failure
    /// indexes are positions in the whole write, offset by `start`.
    async fn insert_run(
        collection: &MongoCollection<Document>,
        start: usize,
        documents: Vec<Document>,
        ordered: bool,
        session: Option<&mut ClientSession>,
    ) -> (WriteResult, Vec<WriteFailure>) {
        let count = documents.len();
        let action = collection.insert_many(documents).ordered(ordered);
        let outcome = match session {
            Some(s) => action.session(s).await,
            None => action.await,
        };

        let failures = match outcome {
            Ok(_) => Vec::new(),
            Err(err) => {
                let mut failures = match *err.kind {
                    ErrorKind::InsertMany(ref failure) => failure
                        .write_errors
                        .iter()
                        .flatten()
                        .map(|e| WriteFailure { index: start + e.index, message: e.message.clone() })
                        .collect(),
                    _ => Vec::new(),
                };
                if failures.is_empty() {
                    failures.push(WriteFailure { index: start, message: err.to_string() });
                }

                debug!(collection = collection.name(), start, count, failed = failures.len(), "insert batch failed");
                failures
            }
        };

        let inserted = match failures.iter().map(|f| f.index).min() {
            Some(first) if ordered => first - start,
            Some(_) => count - failures.len(),
            None => count,
        };

        (WriteResult { inserted: inserted as u64, ..WriteResult::acknowledged() }, failures)
    }

    async fn aggregate(
        &self,
        collection: &str,
        pipeline: Vec<Document>,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        let collection = self.get_collection(collection);
        let mut lock = SessionLock::acquire(session).await;

        let documents = match lock.client_session()? {
            Some(s) => {
                let mut cursor = collection
                    .aggregate(pipeline)
                    .session(&mut *s)
                    .await
                    .map_err(backend_error)?;
                cursor
                    .stream(s)
                    .try_collect::<Vec<Document>>()
                    .await
                    .map_err(backend_error)?
            }
            None => collection
                .aggregate(pipeline)
                .await
                .map_err(backend_error)?
                .try_collect::<Vec<Document>>()
                .await
                .map_err(backend_error)?,
        };

        Ok(documents.into_iter().map(Bson::Document).collect())
    }
}

#[async_trait]
impl StoreBackend for MongoDbStore {
    async fn start_session(&self, options: Option<SessionOptions>) -> DocumentStoreResult<SessionHandle> {
        let mut action = self.client.start_session();

        if let Some(causal_consistency) = options.and_then(|o| o.causal_consistency) {
            action = action.causal_consistency(causal_consistency);
        }

        let session = action.await.map_err(backend_error)?;

        Ok(SessionHandle::new(Box::new(MongoSession::new(session))))
    }

    async fn start_transaction(&self, session: &SessionHandle, options: Option<TransactionOptions>) -> DocumentStoreResult<()> {
        let options = options.unwrap_or_default();
        let mut guard = session.lock().await;
        let session = mongo_session(&mut guard)?;

        if session.in_transaction {
            return Err(DocumentStoreError::TransactionAlreadyActive);
        }

        let mut action = session.session.start_transaction();
        if options.majority_write {
            action = action.write_concern(WriteConcern::builder().w(Acknowledgment::Majority).build());
        }
        if let Some(max_commit_time) = options.max_commit_time {
            action = action.max_commit_time(max_commit_time);
        }
        action.await.map_err(backend_error)?;

        session.in_transaction = true;

        Ok(())
    }

    async fn commit_transaction(&self, session: &SessionHandle) -> DocumentStoreResult<()> {
        let mut guard = session.lock().await;
        let session = mongo_session(&mut guard)?;

        if !session.in_transaction {
            return Err(DocumentStoreError::NoActiveTransaction);
        }

        session.in_transaction = false;
        session.session.commit_transaction().await.map_err(backend_error)
    }

    async fn abort_transaction(&self, session: &SessionHandle) -> DocumentStoreResult<()> {
        let mut guard = session.lock().await;
        let session = mongo_session(&mut guard)?;

        if !session.in_transaction {
            return Err(DocumentStoreError::NoActiveTransaction);
        }

        session.in_transaction = false;
        session.session.abort_transaction().await.map_err(backend_error)
    }

    async fn insert_documents(
        &self,
        collection: &str,
        documents: Vec<(Bson, Bson)>,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<WriteResult> {
        if documents.is_empty() {
            return Ok(WriteResult::acknowledged());
        }

        let documents = documents
            .into_iter()
            .map(|(id, doc)| prepare_document(id, doc))
            .collect::<DocumentStoreResult<Vec<Document>>>()?;
        let collection = self.get_collection(collection);
        let mut lock = SessionLock::acquire(session).await;

        let action = collection.insert_many(documents);
        let outcome = match lock.client_session()? {
            Some(s) => action.session(s).await,
            None => action.await,
        }
        .map_err(backend_error)?;

        Ok(WriteResult {
            acknowledged: Self::acknowledges(&collection),
            inserted: outcome.inserted_ids.len() as u64,
            ..WriteResult::default()
        })
    }

    async fn find_documents(
        &self,
        collection: &str,
        query: Query,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        let mut options = FindOptions::default();

        if let Some(limit) = query.limit {
            options.limit = Some(limit as i64);
        }
        if let Some(skip) = query.offset {
            options.skip = Some(skip as u64);
        }
        options.sort = sort_document(&query.sort);
        options.projection = query.projection.as_ref().map(projection_document);

        let filter = MongoQueryTranslator::translate(query.filter.as_ref())?;
        let collection = self.get_collection(collection);
        let mut lock = SessionLock::acquire(session).await;

        let documents = match lock.client_session()? {
            Some(s) => {
                let mut cursor = collection
                    .find(filter)
                    .with_options(options)
                    .session(&mut *s)
                    .await
                    .map_err(backend_error)?;
                cursor
                    .stream(s)
                    .try_collect::<Vec<Document>>()
                    .await
                    .map_err(backend_error)?
            }
            None => collection
                .find(filter)
                .with_options(options)
                .await
                .map_err(backend_error)?
                .try_collect::<Vec<Document>>()
                .await
                .map_err(backend_error)?,
        };

        Ok(documents.into_iter().map(Bson::Document).collect())
    }

    async fn count_documents(
        &self,
        collection: &str,
        filter: Option<Expr>,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<u64> {
        let filter = MongoQueryTranslator::translate(filter.as_ref())?;
        let collection = self.get_collection(collection);
        let mut lock = SessionLock::acquire(session).await;

        let action = collection.count_documents(filter);
        match lock.client_session()? {
            Some(s) => action.session(s).await,
            None => action.await,
        }
        .map_err(backend_error)
    }

    async fn bulk_write(
        &self,
        collection: &str,
        operations: Vec<WriteOp>,
        options: BulkWriteOptions,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<WriteResult> {
        let total = operations.len();
        let collection = self.get_collection(collection);
        let mut lock = SessionLock::acquire(session).await;
        let mut result = WriteResult::acknowledged();
        let mut failures = Vec::new();

        for batch in batch_operations(operations) {
            let session = lock.client_session()?;

            let (outcome, batch_failures) = match batch {
                WriteBatch::Inserts { start, documents } => {
                    Self::insert_run(&collection, start, documents, options.ordered, session).await
                }
                WriteBatch::Single { index, op } => {
                    let name = op.name();
                    let mut outcome = WriteResult::acknowledged();

                    match Self::apply(&collection, op, session, &mut outcome).await {
                        Ok(()) => (outcome, Vec::new()),
                        Err(err) => {
                            debug!(collection = collection.name(), index, op = name, error = %err, "write operation failed");
                            (outcome, vec![WriteFailure { index, message: err.to_string() }])
                        }
                    }
                }
            };

            result.merge(outcome);

            let stop = options.ordered && !batch_failures.is_empty();
            failures.extend(batch_failures);
            if stop {
                break;
            }
        }

        if !failures.is_empty() {
            return Err(DocumentStoreError::BulkWrite(failures));
        }

        debug!(collection = collection.name(), total, ordered = options.ordered, "bulk write applied");

        Ok(WriteResult {
            acknowledged: Self::acknowledges(&collection),
            ..result
        })
    }

    async fn lookup(
        &self,
        collection: &str,
        filter: Option<Expr>,
        spec: LookupSpec,
        session: Option<&SessionHandle>,
    ) -> DocumentStoreResult<Vec<Bson>> {
        let pipeline = vec![
            doc! { "$match": MongoQueryTranslator::translate(filter.as_ref())? },
            doc! {
                "$lookup": {
                    "from": spec.from,
                    "localField": spec.local_field,
                    "foreignField": spec.foreign_field,
                    "as": spec.as_field,
                }
            },
        ];

        self.aggregate(collection, pipeline, session).await
    }

    async fn create_index(&self, collection: &str, index: IndexDescriptor) -> DocumentStoreResult<String> {
        let name = index.name();

        let created = self.get_collection(collection)
            .create_index(
                IndexModel::builder()
                .keys(index_keys_document(&index))
                .options(
                    IndexOptions::builder()
                    .name(name)
                    .unique(index.options.unique)
                    .sparse(index.options.sparse)
                    .build()
                )
                .build()
            )
            .await
            .map_err(backend_error)?;

        Ok(created.index_name)
    }

    async fn list_index_names(&self, collection: &str) -> DocumentStoreResult<Vec<String>> {
        self.get_collection(collection)
            .list_index_names()
            .await
            .map_err(backend_error)
    }

    async fn drop_index(&self, collection: &str, name: &str) -> DocumentStoreResult<()> {
        self.get_collection(collection)
            .drop_index(name)
            .await
            .map_err(|e| match *e.kind {
                ErrorKind::Command(ref command) if command.code == 27 => {
                    DocumentStoreError::IndexNotFound(name.to_string(), collection.to_string())
                }
                _ => backend_error(e),
            })
    }

    async fn create_collection(&self, name: &str) -> DocumentStoreResult<()> {
        let database = self.client.database(&self.database);

        let existing = database
            .list_collection_names()
            .await
            .map_err(backend_error)?;
        if existing.iter().any(|existing| existing == name) {
            return Ok(());
        }

        database
            .create_collection(name)
            .await
            .map_err(backend_error)?;

        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> DocumentStoreResult<()> {
        self.get_collection(name)
            .drop()
            .await
            .map_err(backend_error)?;

        Ok(())
    }

    async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        self.client
            .database(&self.database)
            .list_collection_names()
            .await
            .map_err(backend_error)
    }

    async fn shutdown(self) -> DocumentStoreResult<()> {
        info!(database = %self.database, "shutting down MongoDB client");

        self.client.shutdown().await;

        Ok(())
    }
}

/// Builder for [`MongoDbStore`].
#[derive(Debug)]
pub struct MongoDbStoreBuilder {
    dsn: String,
    database: Option<String>,
    write_concern: Option<WriteConcern>,
}

impl MongoDbStoreBuilder {
    pub fn new(dsn: &str, database: Option<&str>) -> Self {
        Self {
            dsn: dsn.to_string(),
            database: database.map(str::to_string),
            write_concern: None,
        }
    }

    /// Overrides the write concern parsed from the connection string.
    pub fn write_concern(mut self, write_concern: WriteConcern) -> Self {
        self.write_concern = Some(write_concern);
        self
    }
}

#[async_trait]
impl StoreBackendBuilder for MongoDbStoreBuilder {
    type Backend = MongoDbStore;

    async fn build(self) -> DocumentStoreResult<Self::Backend> {
        let mut options = ClientOptions::parse(&self.dsn)
            .await
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        if let Some(write_concern) = self.write_concern {
            options.write_concern = Some(write_concern);
        }

        let database = self
            .database
            .or_else(|| options.default_database.clone())
            .ok_or_else(|| DocumentStoreError::Initialization("connection string names no database".to_string()))?;

        debug!(database = %database, "connecting to MongoDB");

        Ok(MongoDbStore::new(
            Client::with_options(options)
                .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?,
            database,
        ))
    }
}
