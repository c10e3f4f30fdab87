//! ClickHouse analytics store over the HTTP interface.
//!
//! Every statement is one POST. Inserts ship all rows as `JSONEachRow` in a
//! single request body, which ClickHouse applies as one block: the whole
//! batch lands or the request fails.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::AnalyticsConfig;
use crate::domain::{TrackedEntity, WeatherSample};
use crate::ports::{AnalyticsStore, StoreError};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const CREATE_WEATHER_METRICS: &str = "CREATE TABLE IF NOT EXISTS weather_metrics (
    timestamp DateTime,
    city String,
    temp Float32,
    app_temp Float32,
    pressure Int16,
    wind_speed Float32,
    wind_deg Int16
) ENGINE = MergeTree()
PARTITION BY toYYYYMM(timestamp)
ORDER BY timestamp";

const CREATE_CITIES: &str = "CREATE TABLE IF NOT EXISTS cities (
    city String,
    lat Float32,
    lon Float32
) ENGINE = MergeTree()
ORDER BY city";

const SELECT_CITIES: &str = "SELECT city, lat, lon FROM cities FORMAT JSONEachRow";
const INSERT_CITIES: &str = "INSERT INTO cities (city, lat, lon) FORMAT JSONEachRow";
const INSERT_METRICS: &str = "INSERT INTO weather_metrics \
    (timestamp, city, temp, app_temp, pressure, wind_speed, wind_deg) FORMAT JSONEachRow";

impl From<reqwest::Error> for StoreError {
    fn from(e: reqwest::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct CityRow {
    city: String,
    lat: f32,
    lon: f32,
}

impl From<&TrackedEntity> for CityRow {
    fn from(e: &TrackedEntity) -> Self {
        Self {
            city: e.name.clone(),
            lat: e.latitude,
            lon: e.longitude,
        }
    }
}

impl From<CityRow> for TrackedEntity {
    fn from(row: CityRow) -> Self {
        TrackedEntity::new(row.city, row.lat, row.lon)
    }
}

#[derive(Debug, Serialize)]
struct MetricRow<'a> {
    /// Unix seconds; ClickHouse parses integers into `DateTime` as UTC.
    timestamp: i64,
    city: &'a str,
    temp: f32,
    app_temp: f32,
    pressure: i16,
    wind_speed: f32,
    wind_deg: i16,
}

impl<'a> From<&'a WeatherSample> for MetricRow<'a> {
    fn from(s: &'a WeatherSample) -> Self {
        Self {
            timestamp: s.timestamp.timestamp(),
            city: &s.entity_name,
            temp: s.temperature,
            app_temp: s.apparent_temperature,
            pressure: s.pressure,
            wind_speed: s.wind_speed,
            wind_deg: s.wind_direction_deg,
        }
    }
}

/// Serialize rows as newline-delimited JSON.
fn encode_rows<T: Serialize>(rows: impl IntoIterator<Item = T>) -> Result<String, StoreError> {
    let mut body = String::new();
    for row in rows {
        let line = serde_json::to_string(&row).map_err(|e| StoreError::Decode(e.to_string()))?;
        body.push_str(&line);
        body.push('\n');
    }
    Ok(body)
}

/// Parse `JSONEachRow` output. Lines that fail to decode are logged and skipped.
fn decode_cities(body: &str) -> Vec<TrackedEntity> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<CityRow>(line) {
            Ok(row) => Some(row.into()),
            Err(e) => {
                tracing::warn!(error = %e, line, "skipping unreadable cities row");
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct ClickHouseStore {
    client: reqwest::Client,
    url: String,
    config: AnalyticsConfig,
}

impl ClickHouseStore {
    pub fn new(config: AnalyticsConfig) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            url: config.http_url(),
            config,
        })
    }

    /// Check the server answers. Used once at startup.
    pub async fn ping(&self) -> Result<(), StoreError> {
        self.execute(None, "SELECT 1".to_string()).await.map(|_| ())
    }

    /// POST one statement. `query` goes in the URL when the body carries data.
    async fn execute(&self, query: Option<&str>, body: String) -> Result<String, StoreError> {
        let mut params = vec![("database", self.config.database.as_str())];
        if let Some(query) = query {
            params.push(("query", query));
        }

        let response = self
            .client
            .post(&self.url)
            .query(&params)
            .header("X-ClickHouse-User", &self.config.user)
            .header("X-ClickHouse-Key", &self.config.password)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(StoreError::Rejected {
                status: status.as_u16(),
                message: text.trim().to_string(),
            });
        }
        Ok(text)
    }
}

#[async_trait]
impl AnalyticsStore for ClickHouseStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        for ddl in [CREATE_WEATHER_METRICS, CREATE_CITIES] {
            self.execute(None, ddl.to_string()).await?;
        }
        tracing::info!(database = %self.config.database, "analytics schema ready");
        Ok(())
    }

    async fn load_entities(&self) -> Result<Vec<TrackedEntity>, StoreError> {
        let body = self.execute(None, SELECT_CITIES.to_string()).await?;
        Ok(decode_cities(&body))
    }

    async fn insert_entities(&self, entities: &[TrackedEntity]) -> Result<(), StoreError> {
        if entities.is_empty() {
            return Ok(());
        }
        let body = encode_rows(entities.iter().map(CityRow::from))?;
        self.execute(Some(INSERT_CITIES), body).await?;
        Ok(())
    }

    async fn insert_samples(&self, samples: &[WeatherSample]) -> Result<(), StoreError> {
        if samples.is_empty() {
            return Ok(());
        }
        let body = encode_rows(samples.iter().map(MetricRow::from))?;
        self.execute(Some(INSERT_METRICS), body).await?;
        Ok(())
    }
}
