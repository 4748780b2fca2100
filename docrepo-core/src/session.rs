//! Session and transaction handles.
//!
//! A [`SessionHandle`] is an opaque, cloneable reference to a backend session.
//! Backends recover their concrete session type through
//! [`BackendSession::as_any_mut`].

use std::{any::Any, fmt, sync::Arc, time::Duration};

use bson::Uuid;
use mea::mutex::{Mutex, MutexGuard};

/// Options applied when a session is started.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Reads observe the session's own earlier writes.
    pub causal_consistency: Option<bool>,
}

/// Options applied when a transaction is started on a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionOptions {
    /// Require acknowledgement from a majority of replicas on commit.
    pub majority_write: bool,
    /// Upper bound for the commit itself.
    pub max_commit_time: Option<Duration>,
}

/// Backend-specific session state.
pub trait BackendSession: Any + Send + Sync + fmt::Debug {
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Cloneable reference to an in-flight session.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    inner: Arc<Mutex<Box<dyn BackendSession>>>,
}

impl SessionHandle {
    pub fn new(session: Box<dyn BackendSession>) -> Self {
        Self {
            id: Uuid::new(),
            inner: Arc::new(Mutex::new(session)),
        }
    }

    /// Identity shared by every clone of this handle.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Locks the backend session for the duration of one operation.
    pub async fn lock(&self) -> MutexGuard<'_, Box<dyn BackendSession>> {
        self.inner.lock().await
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle").field("id", &self.id).finish()
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
