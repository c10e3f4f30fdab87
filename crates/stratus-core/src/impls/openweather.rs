//! OpenWeather client: current weather and direct geocoding over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::config::WeatherApiConfig;
use crate::domain::{TrackedEntity, WeatherSample};
use crate::ports::{FetchError, Geocoder, WeatherApi};

/// HTTP timeout for a single API call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            FetchError::Decode(e.to_string())
        } else {
            FetchError::Request(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    dt: i64,
    main: MainBlock,
    wind: WindBlock,
}

#[derive(Debug, Deserialize)]
struct MainBlock {
    temp: f32,
    feels_like: f32,
    pressure: f64,
}

#[derive(Debug, Deserialize)]
struct WindBlock {
    speed: f32,
    #[serde(default)]
    deg: f64,
}

#[derive(Debug, Deserialize)]
struct GeoResult {
    name: String,
    lat: f32,
    lon: f32,
}

impl CurrentWeather {
    fn into_sample(self, entity_name: &str) -> Result<WeatherSample, FetchError> {
        let Some(timestamp) = DateTime::<Utc>::from_timestamp(self.dt, 0) else {
            let reason = format!("timestamp out of range: {}", self.dt);
            return Err(FetchError::Decode(reason));
        };

        Ok(WeatherSample {
            timestamp,
            entity_name: entity_name.to_string(),
            temperature: self.main.temp,
            apparent_temperature: self.main.feels_like,
            pressure: self.main.pressure.round() as i16,
            wind_speed: self.wind.speed,
            wind_direction_deg: self.wind.deg.round() as i16,
        })
    }
}

/// Decode a current-weather response body for `entity_name`.
fn parse_current(body: &[u8], entity_name: &str) -> Result<WeatherSample, FetchError> {
    let parsed: CurrentWeather =
        serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    parsed.into_sample(entity_name)
}

/// Decode a geocoding response body. Only the first match is used.
///
/// The entity keeps the name it was requested under, not the API's spelling,
/// so later lookups by that name hit.
fn parse_geocoding(body: &[u8], requested: &str) -> Result<TrackedEntity, FetchError> {
    let results: Vec<GeoResult> =
        serde_json::from_slice(body).map_err(|e| FetchError::Decode(e.to_string()))?;
    let first = results
        .into_iter()
        .next()
        .ok_or_else(|| FetchError::NotFound(requested.to_string()))?;
    tracing::debug!(requested, resolved = %first.name, "geocoded city");
    Ok(TrackedEntity::new(requested, first.lat, first.lon))
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Implements both [`WeatherApi`] and [`Geocoder`] against OpenWeather.
pub struct OpenWeatherClient {
    client: reqwest::Client,
    config: WeatherApiConfig,
}

impl OpenWeatherClient {
    pub fn new(config: WeatherApiConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self { client, config })
    }

    async fn get_ok(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, FetchError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl WeatherApi for OpenWeatherClient {
    async fn current(&self, entity: &TrackedEntity) -> Result<WeatherSample, FetchError> {
        let request = self.client.get(&self.config.weather_url).query(&[
            ("lat", entity.latitude.to_string()),
            ("lon", entity.longitude.to_string()),
            ("appid", self.config.api_key.clone()),
            ("units", "metric".to_string()),
        ]);
        let body = self.get_ok(request).await?;
        parse_current(&body, &entity.name)
    }
}

#[async_trait]
impl Geocoder for OpenWeatherClient {
    async fn resolve(&self, name: &str) -> Result<TrackedEntity, FetchError> {
        let request = self.client.get(&self.config.geocoding_url).query(&[
            ("q", name),
            ("limit", "1"),
            ("appid", self.config.api_key.as_str()),
        ]);
        let body = self.get_ok(request).await?;
        parse_geocoding(&body, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CURRENT: &str = r#"{
        "coord": {"lon": 10.75, "lat": 59.91},
        "main": {"temp": 4.5, "feels_like": 1.2, "pressure": 1013, "humidity": 80},
        "wind": {"speed": 3.6, "deg": 250},
        "dt": 1700000000,
        "name": "Oslo"
    }"#;

    #[test]
    fn parses_current_weather() {
        let sample = parse_current(CURRENT.as_bytes(), "Oslo").unwrap();
        assert_eq!(sample.entity_name, "Oslo");
        assert_eq!(sample.timestamp.timestamp(), 1_700_000_000);
        assert_eq!(sample.temperature, 4.5);
        assert_eq!(sample.apparent_temperature, 1.2);
        assert_eq!(sample.pressure, 1013);
        assert_eq!(sample.wind_speed, 3.6);
        assert_eq!(sample.wind_direction_deg, 250);
    }

    #[test]
    fn missing_wind_direction_defaults_to_zero() {
        let body = r#"{"main":{"temp":1,"feels_like":0,"pressure":990},"wind":{"speed":0},"dt":1}"#;
        let sample = parse_current(body.as_bytes(), "Calm").unwrap();
        assert_eq!(sample.wind_direction_deg, 0);
    }

    #[test]
    fn malformed_weather_is_decode_error() {
        let err = parse_current(b"{\"main\": {}}", "Oslo").unwrap_err();
        assert!(matches!(err, FetchError::Decode(_)));
    }

    #[test]
    fn geocoding_takes_first_result_and_keeps_requested_name() {
        let body = r#"[{"name": "Oslo", "lat": 59.91, "lon": 10.75, "country": "NO"}]"#;
        let entity = parse_geocoding(body.as_bytes(), "oslo").unwrap();
        assert_eq!(entity.name, "oslo");
        assert_eq!(entity.latitude, 59.91);
        assert_eq!(entity.longitude, 10.75);
    }

    #[test]
    fn empty_geocoding_result_is_not_found() {
        let err = parse_geocoding(b"[]", "Atlantis").unwrap_err();
        assert!(matches!(
            err,
            FetchError::NotFound(name) if name == "Atlantis"
        ));
    }

    #[test]
    fn client_builds_from_config() {
        let config = WeatherApiConfig {
            api_key: "k".into(),
            weather_url: "http://localhost/weather".into(),
            geocoding_url: "http://localhost/geo".into(),
        };
        assert!(OpenWeatherClient::new(config).is_ok());
    }
}
