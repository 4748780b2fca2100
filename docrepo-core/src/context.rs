//! The document context: a backend plus at most one active transaction.
//!
//! [`DocumentContext`] is the unit-of-work boundary. It hands out
//! collection handles and repositories bound to resolved collection names,
//! and it owns the session slot that every repository operation attaches
//! to while a transaction is active.
//!
//! # Transaction state machine
//!
//! ```text
//! NoTransaction --begin--> TransactionActive --commit|rollback--> NoTransaction
//! ```
//!
//! `begin` while active fails with
//! [`TransactionAlreadyActive`](DocumentStoreError::TransactionAlreadyActive);
//! `commit`/`rollback` while idle fail with
//! [`NoActiveTransaction`](DocumentStoreError::NoActiveTransaction). The slot
//! is cleared by commit and rollback even when the backend call fails.
//!
//! # Example
//!
//! ```ignore
//! use docrepo::{prelude::*, memory::InMemoryStore};
//!
//! let context = DocumentContext::new(InMemoryStore::new());
//!
//! context
//!     .with_transaction(None, None, async || {
//!         let mut users = context.repository::<User>()?;
//!         users.add(&mut alice).await?;
//!         users.add(&mut bob).await
//!     })
//!     .await?;
//! ```

use std::{fmt, sync::Arc};

use mea::mutex::Mutex;
use tracing::{debug, info, warn};

use crate::{
    backend::StoreBackend,
    cancel::{CancellationToken, run_cancellable},
    collection::TypedCollection,
    document::Entity,
    error::{DocumentStoreError, DocumentStoreResult},
    naming::CollectionNameResolver,
    repository::Repository,
    session::{SessionHandle, SessionOptions, TransactionOptions},
};

/// Owns a store backend and the current transactional session.
pub struct DocumentContext<B: StoreBackend> {
    backend: B,
    session: Mutex<Option<SessionHandle>>,
    resolver: Option<Arc<CollectionNameResolver>>,
    cancellation: Option<CancellationToken>,
}

impl<B: StoreBackend> fmt::Debug for DocumentContext<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentContext")
            .field("backend", &self.backend)
            .field("cancellation", &self.cancellation)
            .finish_non_exhaustive()
    }
}

impl<B: StoreBackend> DocumentContext<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            session: Mutex::new(None),
            resolver: None,
            cancellation: None,
        }
    }

    /// Uses a private name resolver instead of the process-wide one.
    pub fn with_resolver(mut self, resolver: Arc<CollectionNameResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Races every store call made through this context against `token`.
    ///
    /// Repositories created afterwards inherit the token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn resolver(&self) -> &CollectionNameResolver {
        self.resolver
            .as_deref()
            .unwrap_or_else(|| CollectionNameResolver::global())
    }

    pub fn cancellation_token(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    /// Resolves the collection name of `E`.
    pub fn collection_name<E: Entity>(&self) -> DocumentStoreResult<String> {
        self.resolver().resolve::<E>()
    }

    /// Returns a typed handle for `E`'s collection.
    pub fn collection<E: Entity>(&self) -> DocumentStoreResult<TypedCollection<'_, B, E>> {
        Ok(TypedCollection::new(self.collection_name::<E>()?, &self.backend))
    }

    /// Returns a repository bound to this context.
    pub fn repository<E: Entity>(&self) -> DocumentStoreResult<Repository<'_, B, E>> {
        Ok(Repository::new(self, self.collection::<E>()?))
    }

    /// Creates `E`'s collection ahead of its first write. Existing
    /// collections are left untouched.
    pub async fn create_collection<E: Entity>(&self) -> DocumentStoreResult<()> {
        let collection = self.collection::<E>()?;

        debug!(collection = collection.name(), "creating collection");

        self.cancellable(collection.create()).await
    }

    /// Names of every collection in the store, sorted.
    pub async fn list_collections(&self) -> DocumentStoreResult<Vec<String>> {
        let mut names = self.cancellable(self.backend.list_collections()).await?;
        names.sort();

        Ok(names)
    }

    /// Drops `E`'s collection.
    pub async fn drop_collection<E: Entity>(&self) -> DocumentStoreResult<()> {
        let collection = self.collection::<E>()?;

        info!(collection = collection.name(), "dropping collection");

        self.cancellable(collection.drop()).await
    }

    /// Starts a standalone session that is not attached to this context.
    ///
    /// Pass it to [`use_transaction`](Self::use_transaction) on one or more
    /// contexts sharing the same backend.
    pub async fn start_session(&self, options: Option<SessionOptions>) -> DocumentStoreResult<SessionHandle> {
        self.cancellable(self.backend.start_session(options)).await
    }

    /// Starts a session and a transaction and attaches them to this context.
    pub async fn begin_transaction(
        &self,
        session_options: Option<SessionOptions>,
        transaction_options: Option<TransactionOptions>,
    ) -> DocumentStoreResult<SessionHandle> {
        let mut slot = self.session.lock().await;

        if slot.is_some() {
            return Err(DocumentStoreError::TransactionAlreadyActive);
        }

        let session = self
            .cancellable(self.backend.start_session(session_options))
            .await?;
        self.cancellable(self.backend.start_transaction(&session, transaction_options))
            .await?;

        info!(session = %session.id(), "transaction started");

        *slot = Some(session.clone());

        Ok(session)
    }

    /// Commits the active transaction and releases the session.
    pub async fn commit_transaction(&self) -> DocumentStoreResult<()> {
        let session = self.take_session().await?;

        self.cancellable(self.backend.commit_transaction(&session))
            .await?;

        info!(session = %session.id(), "transaction committed");

        Ok(())
    }

    /// Aborts the active transaction and releases the session.
    ///
    /// Rollback is not raced against the cancellation token.
    pub async fn rollback_transaction(&self) -> DocumentStoreResult<()> {
        let session = self.take_session().await?;

        self.backend.abort_transaction(&session).await?;

        info!(session = %session.id(), "transaction rolled back");

        Ok(())
    }

    /// Runs `action` inside a new transaction.
    ///
    /// Commits when `action` succeeds. When it fails the transaction is
    /// rolled back and the action's error is returned; a failing rollback is
    /// only logged.
    pub async fn with_transaction<T, F>(
        &self,
        session_options: Option<SessionOptions>,
        transaction_options: Option<TransactionOptions>,
        action: F,
    ) -> DocumentStoreResult<T>
    where
        F: AsyncFnOnce() -> DocumentStoreResult<T>,
    {
        self.begin_transaction(session_options, transaction_options)
            .await?;

        match action().await {
            Ok(value) => {
                self.commit_transaction().await?;
                Ok(value)
            }
            Err(err) => {
                debug!(error = %err, "transaction action failed, rolling back");

                if let Err(rollback_err) = self.rollback_transaction().await {
                    warn!(error = %rollback_err, "rollback after failed action also failed");
                }

                Err(err)
            }
        }
    }

    /// Attaches an externally created session without validating it.
    ///
    /// Returns the handle previously held, if any.
    pub async fn use_transaction(&self, session: SessionHandle) -> Option<SessionHandle> {
        debug!(session = %session.id(), "attaching external session");

        self.session.lock().await.replace(session)
    }

    /// The currently attached session, if any.
    pub async fn current_session(&self) -> Option<SessionHandle> {
        self.session.lock().await.clone()
    }

    pub async fn has_active_transaction(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Shuts the backend down.
    pub async fn shutdown(self) -> DocumentStoreResult<()> {
        self.backend.shutdown().await
    }

    async fn take_session(&self) -> DocumentStoreResult<SessionHandle> {
        self.session
            .lock()
            .await
            .take()
            .ok_or(DocumentStoreError::NoActiveTransaction)
    }

    pub(crate) async fn cancellable<T>(
        &self,
        fut: impl Future<Output = DocumentStoreResult<T>>,
    ) -> DocumentStoreResult<T> {
        run_cancellable(self.cancellation.as_ref(), fut).await
    }
}
