//! stratus-notify: publish one notification task.
//!
//! ```text
//! stratus-notify <to> <subject> <body> [type]
//! ```

use std::process::ExitCode;
use std::sync::Arc;

use stratus_core::app::TaskPublisher;
use stratus_core::config::BrokerConfig;
use stratus_core::domain::NotificationTask;
use stratus_core::error::StratusError;
use stratus_core::impls::AmqpBroker;
use stratus_core::observability::init_tracing;
use stratus_core::ports::{Broker, SystemClock, Topology, UlidGenerator};

const LOG_FILTER: &str = concat!("stratus_core=info,", env!("CARGO_CRATE_NAME"), "=info");

const USAGE: &str = "usage: stratus-notify <to> <subject> <body> [type]";

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing(LOG_FILTER);

    match run(std::env::args().skip(1).collect()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "stratus-notify failed");
            ExitCode::FAILURE
        }
    }
}

fn parse_task(args: Vec<String>) -> Result<NotificationTask, StratusError> {
    let mut args = args.into_iter();
    let (Some(to), Some(subject), Some(body)) = (args.next(), args.next(), args.next()) else {
        return Err(StratusError::Other(USAGE.to_string()));
    };
    let task = NotificationTask::new(to, subject, body);
    Ok(match args.next() {
        Some(kind) => task.with_kind(kind),
        None => task,
    })
}

async fn run(args: Vec<String>) -> Result<(), StratusError> {
    let task = parse_task(args)?;
    let config = BrokerConfig::from_env()?;

    let broker = Arc::new(AmqpBroker::connect(&config.url).await?);
    // Publishing to an undeclared exchange closes the channel.
    broker.declare(&Topology::email()).await?;

    let publisher = TaskPublisher::new(
        broker.clone(),
        Arc::new(SystemClock),
        Arc::new(UlidGenerator::new(SystemClock)),
    );
    let result = publisher.publish(&task).await;
    broker.close().await?;

    let message_id = result?;
    println!("{message_id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_required_and_optional_fields() {
        let task = parse_task(args(&["a@example.com", "Hi", "<p>x</p>", "welcome"])).unwrap();
        assert_eq!(task.recipient, "a@example.com");
        assert_eq!(task.kind.as_deref(), Some("welcome"));
    }

    #[test]
    fn missing_body_is_a_usage_error() {
        let err = parse_task(args(&["a@example.com", "Hi"])).unwrap_err();
        assert!(err.to_string().starts_with("usage:"));
    }
}
