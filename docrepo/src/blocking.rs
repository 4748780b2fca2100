//! Blocking access to the async API.
//!
//! [`BlockingRuntime`] owns a current-thread Tokio runtime and drives any
//! docrepo future to completion on the calling thread.
//!
//! ```ignore
//! use docrepo::{blocking::BlockingRuntime, prelude::*, memory::InMemoryStore};
//!
//! let runtime = BlockingRuntime::new()?;
//! let context = DocumentContext::new(InMemoryStore::new());
//! let mut users = context.repository::<User>()?;
//!
//! runtime.block_on(users.add(&mut alice))?;
//! let count = runtime.block_on(users.count(Filter::all()))?;
//! ```
//!
//! Do not call [`BlockingRuntime::block_on`] from inside another async
//! runtime; Tokio panics when a runtime is started from a runtime thread.

use tokio::runtime::{Builder, Runtime};

use docrepo_core::error::{DocumentStoreError, DocumentStoreResult};

#[derive(Debug)]
pub struct BlockingRuntime {
    runtime: Runtime,
}

impl BlockingRuntime {
    pub fn new() -> DocumentStoreResult<Self> {
        let runtime = Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| DocumentStoreError::Initialization(e.to_string()))?;

        Ok(Self { runtime })
    }

    /// Runs `future` to completion on the current thread.
    pub fn block_on<F: Future>(&self, future: F) -> F::Output {
        self.runtime.block_on(future)
    }
}
