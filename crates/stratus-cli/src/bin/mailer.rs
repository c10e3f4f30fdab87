//! stratus-mailer: consumes notification tasks from RabbitMQ and sends them
//! over SMTP.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use stratus_core::app::{DeliveryExecutor, ShutdownCoordinator, WorkerPool, shutdown_signal};
use stratus_core::config::{BrokerConfig, SmtpConfig, WorkerPoolConfig};
use stratus_core::error::StratusError;
use stratus_core::impls::{AmqpBroker, SmtpMailer};
use stratus_core::observability::init_tracing;
use stratus_core::ports::Broker;

const LOG_FILTER: &str = concat!("stratus_core=info,", env!("CARGO_CRATE_NAME"), "=info");

const BROKER_DIAL_ATTEMPTS: u32 = 10;
const BROKER_DIAL_DELAY: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing(LOG_FILTER);

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "stratus-mailer failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), StratusError> {
    let broker_config = BrokerConfig::from_env()?;
    let smtp = SmtpConfig::from_env()?;
    let pool_config = WorkerPoolConfig::from_env()?;

    let mailer = SmtpMailer::new(&smtp)?;
    let executor = Arc::new(DeliveryExecutor::new(Arc::new(mailer)));

    let broker = AmqpBroker::connect_with_retry(
        &broker_config.url,
        BROKER_DIAL_ATTEMPTS,
        BROKER_DIAL_DELAY,
    )
    .await?;
    let broker: Arc<dyn Broker> = Arc::new(broker);

    let pool = WorkerPool::start(broker.as_ref(), executor, &pool_config).await?;
    tracing::info!(
        workers = pool_config.workers,
        prefetch = pool_config.prefetch,
        deadline_secs = pool_config.deadline.as_secs(),
        "stratus-mailer running"
    );

    let outcome = ShutdownCoordinator::new(broker, pool_config.grace)
        .run_until(shutdown_signal(), pool)
        .await;
    tracing::info!(?outcome, "stratus-mailer stopped");
    Ok(())
}
