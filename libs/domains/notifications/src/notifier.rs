use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;

use crate::models::Completion;

/// One-way, best-effort signal that an ingestion finished.
///
/// Implementations swallow their own failures; there is nothing for the
/// caller to handle.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionNotifier: Send + Sync {
    async fn notify(&self, completion: Completion);
}

/// Send `completion` on a detached task.
///
/// The handle is only useful to tests and shutdown paths; dropping it does
/// not cancel delivery.
pub fn dispatch(notifier: Arc<dyn CompletionNotifier>, completion: Completion) -> JoinHandle<()> {
    tokio::spawn(async move { notifier.notify(completion).await })
}

/// Notifier for deployments without a callback endpoint
pub struct NoopNotifier;

#[async_trait]
impl CompletionNotifier for NoopNotifier {
    async fn notify(&self, completion: Completion) {
        tracing::trace!(source_id = %completion.source_id, "Notification skipped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_dispatch_delivers_on_background_task() {
        let mut mock = MockCompletionNotifier::new();
        mock.expect_notify()
            .withf(|c| c.source_id == "file-1" && c.succeeded)
            .times(1)
            .returning(|_| ());

        dispatch(Arc::new(mock), Completion::success("file-1", "general"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_noop_notifier() {
        NoopNotifier
            .notify(Completion::failure("file-1", "general", "boom"))
            .await;
    }
}
