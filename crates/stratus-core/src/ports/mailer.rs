//! Mailer port - 通知の副作用部分（SMTP 送信）

use async_trait::async_trait;

use crate::domain::NotificationTask;

/// Failure sending one message.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("address parse error: {0}")]
    Address(String),

    #[error("message build error: {0}")]
    Build(String),
}

/// Sends one notification to its recipient.
///
/// Implementations must be `'static` so a send can run on a detached task
/// that outlives the caller's deadline.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    async fn send(&self, task: &NotificationTask) -> Result<(), MailError>;
}
