//! Completion notifications
//!
//! Reports the outcome of each ingestion to an external consumer. Delivery is
//! best effort: the notifier logs failures and never reports them back to the
//! ingestion that triggered it.
//!
//! ```text
//! IngestionService ──dispatch()──▶ tokio task ──▶ CompletionNotifier
//!                                                   └─ WebhookNotifier ──POST──▶ consumer
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use domain_notifications::{dispatch, Completion, WebhookNotifier};
//!
//! let notifier = Arc::new(WebhookNotifier::from_env()?);
//! dispatch(notifier, Completion::success("file-1", "project-a"));
//! ```

pub mod error;
pub mod models;
pub mod notifier;
pub mod webhook;

pub use error::{NotificationError, NotificationResult};
pub use models::Completion;
pub use notifier::{dispatch, CompletionNotifier, NoopNotifier};
pub use webhook::{WebhookConfig, WebhookNotifier, WEBHOOK_PATH};

#[cfg(test)]
pub use notifier::MockCompletionNotifier;
