//! stratus-ingest: samples the weather of every tracked city on a fixed
//! interval and appends the samples to ClickHouse.

use std::process::ExitCode;
use std::sync::Arc;

use stratus_core::app::{BatchWriter, CityRegistry, IngestionScheduler, shutdown_signal};
use stratus_core::config::{AnalyticsConfig, SchedulerConfig, WeatherApiConfig};
use stratus_core::error::StratusError;
use stratus_core::impls::{ClickHouseStore, OpenWeatherClient};
use stratus_core::observability::init_tracing;
use stratus_core::ports::{AnalyticsStore, Geocoder, WeatherApi};

const LOG_FILTER: &str = concat!("stratus_core=info,", env!("CARGO_CRATE_NAME"), "=info");

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing(LOG_FILTER);

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "stratus-ingest failed");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<(), StratusError> {
    let analytics = AnalyticsConfig::from_env()?;
    let weather = WeatherApiConfig::from_env()?;
    let schedule = SchedulerConfig::from_env()?;

    let store = Arc::new(ClickHouseStore::new(analytics)?);
    store.ping().await?;
    store.ensure_schema().await?;
    let store: Arc<dyn AnalyticsStore> = store;

    let client = Arc::new(OpenWeatherClient::new(weather)?);
    let geocoder: Arc<dyn Geocoder> = client.clone();
    let api: Arc<dyn WeatherApi> = client;

    let registry = Arc::new(CityRegistry::new(geocoder, Arc::clone(&store)));
    registry.load().await?;

    if !schedule.seed_cities.is_empty() {
        // A bad seed list should not keep already tracked cities from being sampled.
        if let Err(e) = registry.register(schedule.seed_cities.as_slice()).await {
            tracing::error!(error = %e, "registering seed cities failed");
        }
    }

    let writer = Arc::new(BatchWriter::new(api, store, schedule.fetch_concurrency));
    let handle = IngestionScheduler::new(registry, writer, schedule.interval).start();

    shutdown_signal().await;
    handle.stop().await;
    tracing::info!("stratus-ingest stopped");
    Ok(())
}
