//! Economic calendar gate
//!
//! Events are read from a JSON array:
//! ```json
//! [{"title": "FOMC Statement", "time": "2024-03-20T18:00:00Z", "impact": "HIGH", "currency": "USD"}]
//! ```
//! The file is re-read at most every 15 minutes. If a refresh fails the last
//! good events stay in use.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::NewsGate;

const CACHE_MINUTES: i64 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Impact {
    #[serde(alias = "low")]
    Low,
    #[serde(alias = "medium")]
    Medium,
    #[serde(alias = "high")]
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsEvent {
    pub title: String,
    pub time: DateTime<Utc>,
    pub impact: Impact,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl NewsEvent {
    pub fn is_high_impact(&self) -> bool {
        self.impact == Impact::High
    }

    /// Negative once the event is in the past
    pub fn minutes_until(&self, now: DateTime<Utc>) -> f64 {
        (self.time - now).num_seconds() as f64 / 60.0
    }
}

#[derive(Debug, Default)]
struct Cache {
    events: Vec<NewsEvent>,
    fetched_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct NewsCalendar {
    source: Option<PathBuf>,
    currency: String,
    cache: Mutex<Cache>,
}

impl NewsCalendar {
    /// A calendar that never blocks trading
    pub fn disabled() -> Self {
        Self::from_events("USD", Vec::new())
    }

    /// Fixed event list, never refreshed
    pub fn from_events(currency: impl Into<String>, events: Vec<NewsEvent>) -> Self {
        NewsCalendar {
            source: None,
            currency: currency.into(),
            cache: Mutex::new(Cache {
                events,
                fetched_at: None,
            }),
        }
    }

    pub fn from_file(path: impl Into<PathBuf>, currency: impl Into<String>) -> Self {
        NewsCalendar {
            source: Some(path.into()),
            currency: currency.into(),
            cache: Mutex::new(Cache::default()),
        }
    }

    async fn refresh(&self, cache: &mut Cache, now: DateTime<Utc>) {
        let Some(path) = &self.source else {
            return;
        };
        if let Some(fetched_at) = cache.fetched_at {
            if now - fetched_at < Duration::minutes(CACHE_MINUTES) {
                return;
            }
        }

        let loaded = match tokio::fs::read(path).await {
            Ok(bytes) => serde_json::from_slice::<Vec<NewsEvent>>(&bytes).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };

        match loaded {
            Ok(events) => {
                info!(count = events.len(), path = %path.display(), "Loaded news events");
                cache.events = events;
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "Failed to load news events, using cached events");
            }
        }
        // failed reads also wait for the next cache window
        cache.fetched_at = Some(now);
    }

    pub async fn high_impact_event_within_at(&self, minutes: i64, now: DateTime<Utc>) -> bool {
        let mut cache = self.cache.lock().await;
        self.refresh(&mut cache, now).await;

        let window = minutes as f64;
        let hit = cache.events.iter().find(|event| {
            event.is_high_impact()
                && event.currency.eq_ignore_ascii_case(&self.currency)
                && event.minutes_until(now).abs() <= window
        });

        match hit {
            Some(event) => {
                warn!(
                    title = %event.title,
                    minutes_until = event.minutes_until(now),
                    "High-impact event detected"
                );
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl NewsGate for NewsCalendar {
    async fn has_high_impact_event_within(&self, minutes: i64) -> bool {
        self.high_impact_event_within_at(minutes, Utc::now()).await
    }
}
