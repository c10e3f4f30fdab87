//! Delivery executor: one send, raced against a deadline.

use std::sync::Arc;
use std::time::Duration;

use crate::domain::NotificationTask;
use crate::error::DeliveryError;
use crate::ports::Mailer;

pub struct DeliveryExecutor {
    mailer: Arc<dyn Mailer>,
}

impl DeliveryExecutor {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self { mailer }
    }

    /// Send `task`, waiting at most `deadline`.
    ///
    /// The send runs on its own task. When the deadline wins, the send is left
    /// running and its eventual result is dropped.
    pub async fn deliver(
        &self,
        task: NotificationTask,
        deadline: Duration,
    ) -> Result<(), DeliveryError> {
        let mailer = Arc::clone(&self.mailer);
        let send = tokio::spawn(async move { mailer.send(&task).await });

        match tokio::time::timeout(deadline, send).await {
            Ok(Ok(result)) => result.map_err(DeliveryError::from),
            Ok(Err(join_err)) => Err(DeliveryError::Aborted(join_err.to_string())),
            Err(_elapsed) => Err(DeliveryError::Timeout(deadline)),
        }
    }
}
