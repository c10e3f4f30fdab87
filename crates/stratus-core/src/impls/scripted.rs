//! Scripted doubles for the weather API, the geocoder and the mailer.
//!
//! Each keeps a per-key script of [`Behavior`]s consumed one call at a time,
//! falling back to a default once the script runs out, and counts every call.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{NotificationTask, TrackedEntity, WeatherSample};
use crate::ports::{FetchError, Geocoder, MailError, Mailer, WeatherApi};

/// What one call does.
#[derive(Debug, Clone, PartialEq)]
pub enum Behavior {
    Succeed,
    Fail,
    /// Wait, then succeed.
    Delay(Duration),
}

#[derive(Default)]
struct Script {
    default: Option<Behavior>,
    per_key: HashMap<String, VecDeque<Behavior>>,
    calls: HashMap<String, usize>,
}

impl Script {
    fn next(&mut self, key: &str) -> Behavior {
        *self.calls.entry(key.to_string()).or_default() += 1;
        self.per_key
            .get_mut(key)
            .and_then(VecDeque::pop_front)
            .or_else(|| self.default.clone())
            .unwrap_or(Behavior::Succeed)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Play `behavior`; `Ok` means the caller should produce its success value.
async fn play(behavior: Behavior) -> Result<(), ()> {
    match behavior {
        Behavior::Succeed => Ok(()),
        Behavior::Fail => Err(()),
        Behavior::Delay(d) => {
            tokio::time::sleep(d).await;
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// Weather API
// ---------------------------------------------------------------------------

/// Returns a synthetic sample per entity, keyed by entity name.
#[derive(Clone, Default)]
pub struct ScriptedWeatherApi {
    script: Arc<Mutex<Script>>,
    total_calls: Arc<AtomicUsize>,
}

impl ScriptedWeatherApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Behavior for every name without a script of its own.
    pub fn set_default(&self, behavior: Behavior) {
        lock(&self.script).default = Some(behavior);
    }

    /// Queue behaviors for `name`, consumed one per call.
    pub fn script(&self, name: &str, behaviors: impl IntoIterator<Item = Behavior>) {
        lock(&self.script)
            .per_key
            .entry(name.to_string())
            .or_default()
            .extend(behaviors);
    }

    pub fn calls_for(&self, name: &str) -> usize {
        lock(&self.script).calls.get(name).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// The sample returned for `entity` on success.
    pub fn sample_for(entity: &TrackedEntity, at: DateTime<Utc>) -> WeatherSample {
        WeatherSample {
            timestamp: at,
            entity_name: entity.name.clone(),
            temperature: entity.latitude / 4.0,
            apparent_temperature: entity.latitude / 4.0 - 1.0,
            pressure: 1013,
            wind_speed: 2.5,
            wind_direction_deg: 90,
        }
    }
}

#[async_trait]
impl WeatherApi for ScriptedWeatherApi {
    async fn current(&self, entity: &TrackedEntity) -> Result<WeatherSample, FetchError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        let behavior = lock(&self.script).next(&entity.name);
        play(behavior)
            .await
            .map_err(|_| FetchError::Status(503))?;
        Ok(Self::sample_for(entity, Utc::now()))
    }
}

// ---------------------------------------------------------------------------
// Geocoder
// ---------------------------------------------------------------------------

/// Resolves names from a fixed gazetteer; unknown names are `NotFound`.
#[derive(Clone, Default)]
pub struct ScriptedGeocoder {
    places: Arc<Mutex<HashMap<String, (f32, f32)>>>,
    script: Arc<Mutex<Script>>,
}

impl ScriptedGeocoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_place(self, name: &str, latitude: f32, longitude: f32) -> Self {
        lock(&self.places).insert(name.to_string(), (latitude, longitude));
        self
    }

    pub fn script(&self, name: &str, behaviors: impl IntoIterator<Item = Behavior>) {
        lock(&self.script)
            .per_key
            .entry(name.to_string())
            .or_default()
            .extend(behaviors);
    }

    pub fn calls_for(&self, name: &str) -> usize {
        lock(&self.script).calls.get(name).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Geocoder for ScriptedGeocoder {
    async fn resolve(&self, name: &str) -> Result<TrackedEntity, FetchError> {
        let behavior = lock(&self.script).next(name);
        play(behavior)
            .await
            .map_err(|_| FetchError::Request(format!("geocoding {name} failed")))?;
        let place = lock(&self.places).get(name).copied();
        match place {
            Some((lat, lon)) => Ok(TrackedEntity::new(name, lat, lon)),
            None => Err(FetchError::NotFound(name.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Mailer
// ---------------------------------------------------------------------------

/// Records every successful send, keyed by recipient.
#[derive(Clone, Default)]
pub struct RecordingMailer {
    script: Arc<Mutex<Script>>,
    sent: Arc<Mutex<Vec<NotificationTask>>>,
    attempts: Arc<AtomicUsize>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default(&self, behavior: Behavior) {
        lock(&self.script).default = Some(behavior);
    }

    pub fn script(&self, recipient: &str, behaviors: impl IntoIterator<Item = Behavior>) {
        lock(&self.script)
            .per_key
            .entry(recipient.to_string())
            .or_default()
            .extend(behaviors);
    }

    /// Send attempts, successful or not.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn attempts_for(&self, recipient: &str) -> usize {
        lock(&self.script).calls.get(recipient).copied().unwrap_or(0)
    }

    pub fn sent(&self) -> Vec<NotificationTask> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, task: &NotificationTask) -> Result<(), MailError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let behavior = lock(&self.script).next(&task.recipient);
        play(behavior)
            .await
            .map_err(|_| MailError::Transport("relay refused".to_string()))?;
        lock(&self.sent).push(task.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_is_consumed_then_default_applies() {
        let mailer = RecordingMailer::new();
        mailer.set_default(Behavior::Succeed);
        mailer.script("a@example.com", [Behavior::Fail]);

        let task = NotificationTask::new("a@example.com", "s", "b");
        assert!(mailer.send(&task).await.is_err());
        assert!(mailer.send(&task).await.is_ok());
        assert_eq!(mailer.attempts_for("a@example.com"), 2);
        assert_eq!(mailer.sent().len(), 1);
    }

    #[tokio::test]
    async fn geocoder_unknown_name_is_not_found() {
        let geocoder = ScriptedGeocoder::new().with_place("Oslo", 59.9, 10.7);
        assert!(geocoder.resolve("Oslo").await.is_ok());
        assert!(matches!(
            geocoder.resolve("Atlantis").await,
            Err(FetchError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn weather_api_counts_calls() {
        let api = ScriptedWeatherApi::new();
        api.script("Oslo", [Behavior::Fail]);
        let oslo = TrackedEntity::new("Oslo", 59.9, 10.7);

        assert!(api.current(&oslo).await.is_err());
        let sample = api.current(&oslo).await.unwrap();
        assert_eq!(sample.entity_name, "Oslo");
        assert_eq!(api.calls_for("Oslo"), 2);
        assert_eq!(api.total_calls(), 2);
    }
}
