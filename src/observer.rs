use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A record of one successful activation, emitted exactly once per
/// [`EligibilityEngine::mark_activated`] call.
///
/// Delivery is in-process and best-effort: zero or more subscribers, no
/// acknowledgment, no replay to late subscribers.
///
/// [`EligibilityEngine::mark_activated`]: crate::EligibilityEngine::mark_activated
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ActivationEvent {
    /// Id of the activated event.
    pub event_id: String,
    /// Instant the activation was recorded at.
    pub timestamp: DateTime<Utc>,
    /// Total activation count after this activation was counted.
    pub activation_count: u64,
}

/// Receiver of [`ActivationEvent`]s. Subscribe via
/// [`EligibilityEngine::subscribe`].
///
/// Observers are invoked synchronously on the activating thread and should
/// return quickly; hand off to a channel or queue for anything slow. They must
/// not call back into the engine — delivery happens while the engine holds
/// internal locks, and re-entering it deadlocks (see
/// [`EligibilityEngine::subscribe`]).
///
/// [`EligibilityEngine::subscribe`]: crate::EligibilityEngine::subscribe
pub trait ActivationObserver {
    /// Called once per successful activation.
    fn on_activation(&self, event: &ActivationEvent);
}

impl<T: Fn(&ActivationEvent)> ActivationObserver for T {
    fn on_activation(&self, event: &ActivationEvent) {
        self(event);
    }
}

/// Handle identifying one subscription, returned by
/// [`EligibilityEngine::subscribe`] and consumed by
/// [`EligibilityEngine::unsubscribe`].
///
/// Dropping the handle does NOT unsubscribe the observer.
///
/// [`EligibilityEngine::subscribe`]: crate::EligibilityEngine::subscribe
/// [`EligibilityEngine::unsubscribe`]: crate::EligibilityEngine::unsubscribe
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct Subscription(pub(crate) u64);
