//! Cooperative cancellation for store-facing operations.

use std::{future::Future, sync::Arc};

use tokio::sync::watch;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// A cloneable cancellation signal.
///
/// Cancelling any clone cancels all of them. Cancellation is permanent.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);

        Self { sender: Arc::new(sender) }
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.sender.borrow()
    }

    /// Resolves once the token is cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.sender.subscribe();

        // The sender lives as long as `self`, so the wait cannot fail early.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }
}

/// Runs `fut` unless `token` fires first.
///
/// A pre-cancelled token short-circuits without polling `fut`.
pub async fn run_cancellable<T, F>(token: Option<&CancellationToken>, fut: F) -> DocumentStoreResult<T>
where
    F: Future<Output = DocumentStoreResult<T>>,
{
    let Some(token) = token else {
        return fut.await;
    };

    if token.is_cancelled() {
        return Err(DocumentStoreError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = token.cancelled() => Err(DocumentStoreError::Cancelled),
        result = fut => result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn pre_cancelled_token_short_circuits() {
        let token = CancellationToken::new();
        token.cancel();

        let result = run_cancellable(Some(&token), async { Ok(1) }).await;

        assert!(matches!(result, Err(DocumentStoreError::Cancelled)));
    }

    #[tokio::test]
    async fn cancel_interrupts_pending_future() {
        let token = CancellationToken::new();
        let trigger = token.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result: DocumentStoreResult<()> = run_cancellable(Some(&token), async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
        .await;

        assert!(matches!(result, Err(DocumentStoreError::Cancelled)));
    }

    #[tokio::test]
    async fn no_token_runs_to_completion() {
        assert_eq!(run_cancellable(None, async { Ok(5) }).await.unwrap(), 5);
    }
}
