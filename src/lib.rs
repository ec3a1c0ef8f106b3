//! An event-eligibility engine: given a declarative description of an event (a
//! feature prompt, a reward, a promotion) and a record of its prior
//! activations, decide whether the event may fire now — and record that it did.
//!
//! # Overview
//!
//! The crate revolves around an [`EligibilityEngine`] that evaluates
//! [`EventConfig`]s — immutable descriptions of one event's rules (minimum
//! interval between activations, expiration date, activation cap, dependencies
//! on other events, sampling probability) — against activation history held in
//! an [`EventStore`].
//!
//! Ask the engine whether an event may fire with
//! [`EligibilityEngine::can_activate`]; record that it did with
//! [`EligibilityEngine::mark_activated`], which also notifies any subscribed
//! [`ActivationObserver`]s. [`EligibilityEngine::eligible_events`] surfaces
//! every eligible event out of a batch, ordered by priority.
//!
//! ```
//! # use std::sync::Arc;
//! # use chrono::{Duration, Utc};
//! # use eventgate::{EligibilityEngine, EventConfig, InMemoryStore};
//! # fn main() -> eventgate::Result<()> {
//! let engine = EligibilityEngine::new(Arc::new(InMemoryStore::new()));
//! let config = EventConfig::builder("daily-reward")
//!     .min_interval(Duration::hours(24))
//!     .max_activation_count(30)
//!     .build()?;
//!
//! if engine.can_activate(&config, Utc::now())? {
//!     engine.mark_activated(config.id())?;
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Error Handling
//!
//! Errors are represented by the [`Error`] enum. Store and serialization
//! failures propagate unchanged to the caller; the engine performs no silent
//! recovery and no retries.
//!
//! # Logging
//!
//! The crate uses the [`log`](https://docs.rs/log/latest/log/) crate for
//! structured logging under the `eventgate` target. Integrate a
//! `log`-compatible logger implementation for visibility into eligibility
//! verdicts and activations.

#![warn(rustdoc::missing_crate_level_docs)]
#![warn(missing_docs)]

mod engine;
mod error;
mod event_config;
mod observer;
mod store;

pub use engine::{Condition, EligibilityEngine};
pub use error::{Error, Result};
pub use event_config::{EventConfig, EventConfigBuilder, EventMetadata, MetadataValue};
pub use observer::{ActivationEvent, ActivationObserver, Subscription};
pub use store::{EventStore, InMemoryStore};
