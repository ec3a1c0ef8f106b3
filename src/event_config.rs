use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use derive_more::From;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Opaque metadata payload attached to an [`EventConfig`]. The engine never
/// interprets these values; they pass through to whoever surfaces the event.
#[derive(Debug, Serialize, Deserialize, PartialEq, PartialOrd, From, Clone)]
#[serde(untagged)]
#[allow(missing_docs)]
pub enum MetadataValue {
    String(String),
    Number(f64),
    Boolean(bool),
    Null,
}
impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

/// Metadata mapping carried by an [`EventConfig`].
pub type EventMetadata = HashMap<String, MetadataValue>;

/// An immutable description of one event's identity and eligibility rules.
///
/// An "event" is anything that may or may not be allowed to fire at a given
/// moment: a feature prompt, a reward, a promotion. `EventConfig` carries no
/// logic; interpretation of the rules belongs to
/// [`EligibilityEngine`](crate::EligibilityEngine).
///
/// Construct via [`EventConfig::builder`]:
/// ```
/// # use eventgate::EventConfig;
/// # use chrono::Duration;
/// let config = EventConfig::builder("daily-reward")
///     .min_interval(Duration::hours(24))
///     .max_activation_count(30)
///     .priority(10)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EventConfig {
    id: String,
    min_interval: Duration,
    expiration_date: Option<DateTime<Utc>>,
    max_activation_count: Option<u64>,
    priority: i32,
    probability: f64,
    metadata: Option<EventMetadata>,
    dependencies: Vec<String>,
}

impl EventConfig {
    /// Start building a config for the event with the given id.
    ///
    /// The id must be non-empty and is expected to be unique per logical
    /// event; it is used to derive the engine's storage keys.
    pub fn builder(id: impl Into<String>) -> EventConfigBuilder {
        EventConfigBuilder {
            id: id.into(),
            min_interval: Duration::zero(),
            expiration_date: None,
            max_activation_count: None,
            priority: 0,
            probability: 1.0,
            metadata: None,
            dependencies: Vec::new(),
        }
    }

    /// Unique id of the event.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Minimum time that must pass between two activations.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Instant after which the event is permanently ineligible, if set.
    pub fn expiration_date(&self) -> Option<DateTime<Utc>> {
        self.expiration_date
    }

    /// Cap on total activations, if set. A cap of 0 makes the event
    /// permanently ineligible.
    pub fn max_activation_count(&self) -> Option<u64> {
        self.max_activation_count
    }

    /// Ordering weight when multiple events are eligible at once, descending.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Probability of passing the sampling gate, always in `[0.0, 1.0]`.
    pub fn probability(&self) -> f64 {
        self.probability
    }

    /// Passthrough metadata, not interpreted by the engine.
    pub fn metadata(&self) -> Option<&EventMetadata> {
        self.metadata.as_ref()
    }

    /// Ids of events that must each have been activated at least once for
    /// this event to be eligible.
    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

/// Builder for [`EventConfig`]. Created via [`EventConfig::builder`].
#[derive(Debug, Clone)]
pub struct EventConfigBuilder {
    id: String,
    min_interval: Duration,
    expiration_date: Option<DateTime<Utc>>,
    max_activation_count: Option<u64>,
    priority: i32,
    probability: f64,
    metadata: Option<EventMetadata>,
    dependencies: Vec<String>,
}

impl EventConfigBuilder {
    /// Set the minimum time between activations. Defaults to zero (no
    /// restriction). Negative durations are clamped to zero.
    pub fn min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval.max(Duration::zero());
        self
    }

    /// Set the instant after which the event is permanently ineligible.
    pub fn expiration_date(mut self, expiration_date: DateTime<Utc>) -> Self {
        self.expiration_date = Some(expiration_date);
        self
    }

    /// Cap the total number of activations.
    pub fn max_activation_count(mut self, max_activation_count: u64) -> Self {
        self.max_activation_count = Some(max_activation_count);
        self
    }

    /// Set the ordering priority. Defaults to 0.
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the sampling probability. Defaults to 1.0.
    ///
    /// Out-of-range values are clamped into `[0.0, 1.0]`, never rejected
    /// (NaN clamps to 1.0).
    pub fn probability(mut self, probability: f64) -> Self {
        self.probability = if probability.is_nan() {
            1.0
        } else {
            probability.clamp(0.0, 1.0)
        };
        self
    }

    /// Attach passthrough metadata.
    pub fn metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Require each of the given event ids to have been activated at least
    /// once before this event is eligible. Evaluated in the given order.
    pub fn dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    /// Finish building, validating the event id.
    ///
    /// Returns [`Error::InvalidConfig`] if the id is empty. All other inputs
    /// are accepted as-is; probability has already been clamped by the setter.
    pub fn build(self) -> Result<EventConfig> {
        if self.id.is_empty() {
            return Err(Error::InvalidConfig("event id must not be empty".to_owned()));
        }
        Ok(EventConfig {
            id: self.id,
            min_interval: self.min_interval,
            expiration_date: self.expiration_date,
            max_activation_count: self.max_activation_count,
            priority: self.priority,
            probability: self.probability,
            metadata: self.metadata,
            dependencies: self.dependencies,
        })
    }
}
