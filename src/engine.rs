use std::{
    cmp::Reverse,
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError, RwLock,
    },
};

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::{
    observer::{ActivationEvent, ActivationObserver, Subscription},
    store::{activation_count_key, last_activated_at_key, EventStore},
    Error, EventConfig, Result,
};

/// An externally supplied predicate, evaluated as the final eligibility gate
/// after all built-in rules have passed.
///
/// Errors returned from [`evaluate`](Condition::evaluate) propagate to the
/// engine's caller, never swallowed. The engine assumes no side effects.
pub trait Condition {
    /// Produce the final verdict.
    fn evaluate(&self) -> Result<bool>;
}

impl<T: Fn() -> Result<bool>> Condition for T {
    fn evaluate(&self) -> Result<bool> {
        self()
    }
}

/// The decision core: evaluates [`EventConfig`]s against activation history
/// held in an [`EventStore`], and records activations.
///
/// The engine is stateless between calls apart from its subscriber registry;
/// all durable state lives in the injected store. It is `Send + Sync` and
/// serializes [`mark_activated`](EligibilityEngine::mark_activated) per event
/// id, so concurrent activations never lose a count update.
pub struct EligibilityEngine {
    store: Arc<dyn EventStore + Send + Sync>,
    subscribers: RwLock<Vec<(u64, Box<dyn ActivationObserver + Send + Sync>)>>,
    next_subscription: AtomicU64,
    activation_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl EligibilityEngine {
    /// Create an engine backed by the given store.
    ///
    /// The store is an explicit dependency; there is no ambient default. Use
    /// [`InMemoryStore`](crate::InMemoryStore) when durability is not needed.
    pub fn new(store: Arc<dyn EventStore + Send + Sync>) -> Self {
        Self {
            store,
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(0),
            activation_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Decide whether the event described by `config` may activate at `now`.
    ///
    /// Checks run in a fixed order, short-circuiting on the first failure:
    /// expiration, activation-count cap, minimum interval, dependencies,
    /// probability. A never-activated event with open gates is eligible
    /// immediately; absent history reads as zero, never as an error.
    pub fn can_activate(&self, config: &EventConfig, now: DateTime<Utc>) -> Result<bool> {
        self.evaluate(config, now, None)
    }

    /// Like [`can_activate`](EligibilityEngine::can_activate), with a custom
    /// condition supplying the final verdict once all built-in rules pass.
    pub fn can_activate_with(
        &self,
        config: &EventConfig,
        now: DateTime<Utc>,
        condition: &dyn Condition,
    ) -> Result<bool> {
        self.evaluate(config, now, Some(condition))
    }

    fn evaluate(
        &self,
        config: &EventConfig,
        now: DateTime<Utc>,
        condition: Option<&dyn Condition>,
    ) -> Result<bool> {
        let eligible = self.evaluate_rules(config, now, condition)?;
        log::trace!(target: "eventgate",
                    event_id = config.id(),
                    eligible;
                    "evaluated event eligibility");
        Ok(eligible)
    }

    // Rules are ordered cheapest first to minimize store reads; the first
    // failing rule wins.
    fn evaluate_rules(
        &self,
        config: &EventConfig,
        now: DateTime<Utc>,
        condition: Option<&dyn Condition>,
    ) -> Result<bool> {
        if matches!(config.expiration_date(), Some(t) if now > t) {
            return Ok(false);
        }

        if let Some(max) = config.max_activation_count() {
            if self.activation_count(config.id())? >= max {
                return Ok(false);
            }
        }

        if let Some(last) = self.last_activated_at(config.id())? {
            // Exactly min_interval elapsed counts as eligible.
            if now.signed_duration_since(last) < config.min_interval() {
                return Ok(false);
            }
        }

        // "Activated at least once", not "activated within a window".
        for dependency in config.dependencies() {
            if self.activation_count(dependency)? == 0 {
                return Ok(false);
            }
        }

        if !sample(config.probability()) {
            return Ok(false);
        }

        match condition {
            Some(condition) => condition.evaluate(),
            None => Ok(true),
        }
    }

    /// Record an activation of `event_id` at the current instant.
    ///
    /// See [`mark_activated_at`](EligibilityEngine::mark_activated_at).
    pub fn mark_activated(&self, event_id: &str) -> Result<ActivationEvent> {
        self.mark_activated_at(event_id, Utc::now())
    }

    /// Record an activation of `event_id` at `at`: stores the timestamp,
    /// increments the activation count, and notifies subscribers with the
    /// post-increment count. Returns the emitted [`ActivationEvent`].
    ///
    /// Calls for the same event id are serialized internally. The timestamp
    /// and count land in the store as two separate writes; a crash between
    /// them leaves the count stale by one.
    pub fn mark_activated_at(&self, event_id: &str, at: DateTime<Utc>) -> Result<ActivationEvent> {
        let lock = self.activation_lock(event_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        self.store
            .set(&last_activated_at_key(event_id), serde_json::to_value(at)?)?;

        let activation_count = self.activation_count(event_id)? + 1;
        self.store.set(
            &activation_count_key(event_id),
            serde_json::to_value(activation_count)?,
        )?;

        let event = ActivationEvent {
            event_id: event_id.to_owned(),
            timestamp: at,
            activation_count,
        };
        log::trace!(target: "eventgate",
                    event:serde;
                    "event activated");
        self.notify(&event);

        Ok(event)
    }

    /// Forget all activation history for `event_id`, returning it to the
    /// never-activated state. Absent history is a no-op, not an error.
    pub fn reset(&self, event_id: &str) -> Result<()> {
        for key in [last_activated_at_key(event_id), activation_count_key(event_id)] {
            match self.store.remove(&key) {
                Ok(()) | Err(Error::ValueNotFound) => {}
                Err(err) => return Err(err),
            }
        }

        // Drop the id's activation lock with its history, so churning event
        // ids don't accumulate dead entries in the lock map. A concurrent
        // activation holding the old lock still completes; the next one
        // creates a fresh lock.
        let mut locks = self
            .activation_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.remove(event_id);

        Ok(())
    }

    /// Evaluate each config in `configs` (in order) and return the eligible
    /// ones sorted by priority, descending. The sort is stable: equal
    /// priorities keep their input order.
    ///
    /// `conditions` maps event ids to custom final-verdict predicates; configs
    /// without an entry are evaluated on built-in rules alone. The first error
    /// from any evaluation aborts the whole batch.
    pub fn eligible_events<'a>(
        &self,
        configs: &'a [EventConfig],
        now: DateTime<Utc>,
        conditions: &HashMap<String, Box<dyn Condition>>,
    ) -> Result<Vec<&'a EventConfig>> {
        let mut eligible = Vec::new();
        for config in configs {
            let condition = conditions.get(config.id()).map(|condition| condition.as_ref());
            if self.evaluate(config, now, condition)? {
                eligible.push(config);
            }
        }
        eligible.sort_by_key(|config| Reverse(config.priority()));
        Ok(eligible)
    }

    /// Number of recorded activations for `event_id` (0 if never activated).
    pub fn activation_count(&self, event_id: &str) -> Result<u64> {
        match self.store.get(&activation_count_key(event_id))? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Ok(0),
        }
    }

    /// Instant of the most recent activation of `event_id`, if any.
    pub fn last_activated_at(&self, event_id: &str) -> Result<Option<DateTime<Utc>>> {
        match self.store.get(&last_activated_at_key(event_id))? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Register an observer for future activation events.
    ///
    /// Observers are notified synchronously, in subscription order, after the
    /// activation has been stored. There is no replay of past activations.
    ///
    /// Observers must not call back into the engine: delivery happens while
    /// the engine holds internal locks, so `mark_activated` for the same event
    /// id, `subscribe`, or `unsubscribe` from inside an observer deadlocks.
    /// Hand the event off to a channel if a reaction needs the engine.
    pub fn subscribe(
        &self,
        observer: impl ActivationObserver + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.push((id, Box::new(observer)));
        Subscription(id)
    }

    /// Remove a previously registered observer. Unknown or already-removed
    /// subscriptions are ignored.
    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|(id, _)| *id != subscription.0);
    }

    fn notify(&self, event: &ActivationEvent) {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, observer) in subscribers.iter() {
            observer.on_activation(event);
        }
    }

    fn activation_lock(&self, event_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .activation_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(event_id.to_owned()).or_default().clone()
    }
}

/// One uniform draw against `probability`.
///
/// The extremes skip the draw entirely: 0.0 must be deterministically
/// ineligible and 1.0 must never reject, independent of how the sampler
/// behaves at the boundaries.
fn sample(probability: f64) -> bool {
    if probability <= 0.0 {
        return false;
    }
    if probability >= 1.0 {
        return true;
    }
    rand::thread_rng().gen::<f64>() <= probability
}

#[cfg(test)]
mod tests {
    use std::{
        cell::Cell,
        collections::HashMap,
        sync::{Arc, Mutex},
    };

    use chrono::{Duration, Utc};

    use crate::{
        store::{EventStore, InMemoryStore},
        ActivationEvent, Error, EventConfig,
    };

    use super::{Condition, EligibilityEngine};

    fn engine() -> EligibilityEngine {
        EligibilityEngine::new(Arc::new(InMemoryStore::new()))
    }

    #[test]
    fn never_activated_event_is_eligible() {
        let _ = env_logger::builder().is_test(true).try_init();

        let engine = engine();
        let config = EventConfig::builder("welcome").build().unwrap();

        assert!(engine.can_activate(&config, Utc::now()).unwrap());
    }

    #[test]
    fn expiration_is_strictly_after() {
        let engine = engine();
        let t = Utc::now();
        let config = EventConfig::builder("flash-sale")
            .expiration_date(t)
            .build()
            .unwrap();

        assert!(engine.can_activate(&config, t).unwrap());
        assert!(!engine.can_activate(&config, t + Duration::seconds(1)).unwrap());
    }

    #[test]
    fn interval_gates_reactivation() {
        let engine = engine();
        let config = EventConfig::builder("hourly")
            .min_interval(Duration::seconds(3600))
            .build()
            .unwrap();
        let t = Utc::now();
        engine.mark_activated_at("hourly", t).unwrap();

        assert!(!engine.can_activate(&config, t + Duration::seconds(1800)).unwrap());
        // the boundary at exactly min_interval is eligible
        assert!(engine.can_activate(&config, t + Duration::seconds(3600)).unwrap());
        assert!(engine.can_activate(&config, t + Duration::seconds(3601)).unwrap());
    }

    #[test]
    fn max_activation_count_is_a_hard_cutoff() {
        let engine = engine();
        let config = EventConfig::builder("promo")
            .max_activation_count(3)
            .build()
            .unwrap();

        for _ in 0..3 {
            assert!(engine.can_activate(&config, Utc::now()).unwrap());
            engine.mark_activated("promo").unwrap();
        }
        assert!(!engine.can_activate(&config, Utc::now()).unwrap());
    }

    #[test]
    fn zero_max_count_is_immediately_ineligible() {
        let engine = engine();
        let config = EventConfig::builder("disabled")
            .max_activation_count(0)
            .build()
            .unwrap();

        assert!(!engine.can_activate(&config, Utc::now()).unwrap());
    }

    #[test]
    fn dependencies_require_at_least_one_activation_each() {
        // Activation order of the dependencies must not matter.
        for order in [["a", "b"], ["b", "a"]] {
            let engine = engine();
            let config = EventConfig::builder("dependent")
                .dependencies(["a", "b"])
                .build()
                .unwrap();

            assert!(!engine.can_activate(&config, Utc::now()).unwrap());
            engine.mark_activated(order[0]).unwrap();
            assert!(!engine.can_activate(&config, Utc::now()).unwrap());
            engine.mark_activated(order[1]).unwrap();
            assert!(engine.can_activate(&config, Utc::now()).unwrap());
        }
    }

    #[test]
    fn probability_zero_never_activates() {
        let engine = engine();
        let config = EventConfig::builder("never").probability(0.0).build().unwrap();

        for _ in 0..100 {
            assert!(!engine.can_activate(&config, Utc::now()).unwrap());
        }
    }

    #[test]
    fn probability_one_always_activates() {
        let engine = engine();
        let config = EventConfig::builder("always").probability(1.0).build().unwrap();

        for _ in 0..100 {
            assert!(engine.can_activate(&config, Utc::now()).unwrap());
        }
    }

    #[test]
    fn probability_rate_is_respected() {
        let engine = engine();
        let config = EventConfig::builder("sampled")
            .probability(0.3)
            .build()
            .unwrap();
        let now = Utc::now();

        let activations = (0..10_000)
            .filter(|_| engine.can_activate(&config, now).unwrap())
            .count();
        let rate = activations as f64 / 10_000.0;

        assert!(
            (0.28..=0.32).contains(&rate),
            "empirical activation rate {} out of tolerance",
            rate
        );
    }

    #[test]
    fn custom_condition_is_the_final_verdict() {
        let engine = engine();
        let config = EventConfig::builder("gated").build().unwrap();

        let always_no: &dyn Condition = &|| Ok::<bool, Error>(false);
        let always_yes: &dyn Condition = &|| Ok::<bool, Error>(true);

        assert!(!engine.can_activate_with(&config, Utc::now(), always_no).unwrap());
        assert!(engine.can_activate_with(&config, Utc::now(), always_yes).unwrap());
    }

    #[test]
    fn failing_condition_propagates() {
        let engine = engine();
        let config = EventConfig::builder("gated").build().unwrap();

        let failing: &dyn Condition = &|| Err::<bool, Error>(Error::ValueNotFound);
        let result = engine.can_activate_with(&config, Utc::now(), failing);

        assert!(matches!(result, Err(Error::ValueNotFound)));
    }

    #[test]
    fn condition_is_not_evaluated_when_a_prior_check_fails() {
        let engine = engine();
        let config = EventConfig::builder("sampled-out")
            .probability(0.0)
            .build()
            .unwrap();

        let called = Cell::new(false);
        let condition = || {
            called.set(true);
            Ok::<bool, Error>(true)
        };

        assert!(!engine.can_activate_with(&config, Utc::now(), &condition).unwrap());
        assert!(!called.get());
    }

    #[test]
    fn eligible_events_sorts_by_priority_descending_stably() {
        let engine = engine();
        let configs = vec![
            EventConfig::builder("low").priority(1).build().unwrap(),
            EventConfig::builder("tie-first").priority(5).build().unwrap(),
            EventConfig::builder("high").priority(9).build().unwrap(),
            EventConfig::builder("tie-second").priority(5).build().unwrap(),
        ];

        let eligible = engine
            .eligible_events(&configs, Utc::now(), &HashMap::new())
            .unwrap();
        let ids: Vec<_> = eligible.iter().map(|config| config.id()).collect();

        assert_eq!(ids, ["high", "tie-first", "tie-second", "low"]);
    }

    #[test]
    fn eligible_events_applies_per_event_conditions() {
        let engine = engine();
        let configs = vec![
            EventConfig::builder("open").build().unwrap(),
            EventConfig::builder("gated").build().unwrap(),
        ];

        let mut conditions: HashMap<String, Box<dyn Condition>> = HashMap::new();
        conditions.insert("gated".to_owned(), Box::new(|| Ok::<bool, Error>(false)));

        let eligible = engine
            .eligible_events(&configs, Utc::now(), &conditions)
            .unwrap();
        let ids: Vec<_> = eligible.iter().map(|config| config.id()).collect();

        assert_eq!(ids, ["open"]);
    }

    #[test]
    fn eligible_events_fails_fast_on_the_first_error() {
        let engine = engine();
        let configs = vec![
            EventConfig::builder("broken").build().unwrap(),
            EventConfig::builder("fine").build().unwrap(),
        ];

        let mut conditions: HashMap<String, Box<dyn Condition>> = HashMap::new();
        conditions.insert(
            "broken".to_owned(),
            Box::new(|| Err::<bool, Error>(Error::ValueNotFound)),
        );

        let result = engine.eligible_events(&configs, Utc::now(), &conditions);
        assert!(matches!(result, Err(Error::ValueNotFound)));
    }

    #[test]
    fn mark_activated_returns_the_emitted_event() {
        let _ = env_logger::builder().is_test(true).try_init();

        let engine = engine();
        let t = Utc::now();

        let event = engine.mark_activated_at("reward", t).unwrap();

        assert_eq!(event.event_id, "reward");
        assert_eq!(event.timestamp, t);
        assert_eq!(event.activation_count, 1);
        assert_eq!(engine.last_activated_at("reward").unwrap(), Some(t));
    }

    #[test]
    fn activation_events_carry_the_post_increment_count() {
        let _ = env_logger::builder().is_test(true).try_init();

        let engine = engine();
        let received = Arc::new(Mutex::new(Vec::new()));

        let subscription = engine.subscribe({
            let received = received.clone();
            move |event: &ActivationEvent| received.lock().unwrap().push(event.clone())
        });

        engine.mark_activated("reward").unwrap();
        engine.mark_activated("reward").unwrap();

        let counts: Vec<u64> = received
            .lock()
            .unwrap()
            .iter()
            .map(|event| event.activation_count)
            .collect();
        assert_eq!(counts, [1, 2]);
        assert_eq!(engine.activation_count("reward").unwrap(), 2);

        engine.unsubscribe(subscription);
        engine.mark_activated("reward").unwrap();
        assert_eq!(received.lock().unwrap().len(), 2);
    }

    #[test]
    fn reset_is_idempotent_and_clears_history() {
        let engine = engine();

        // no history yet; must not error
        engine.reset("fresh").unwrap();

        engine.mark_activated("fresh").unwrap();
        assert_eq!(engine.activation_count("fresh").unwrap(), 1);

        engine.reset("fresh").unwrap();
        assert_eq!(engine.activation_count("fresh").unwrap(), 0);
        assert_eq!(engine.last_activated_at("fresh").unwrap(), None);

        let config = EventConfig::builder("fresh")
            .min_interval(Duration::days(1))
            .build()
            .unwrap();
        assert!(engine.can_activate(&config, Utc::now()).unwrap());
    }

    #[test]
    fn reset_releases_the_per_id_activation_lock() {
        let engine = engine();

        engine.mark_activated("churning").unwrap();
        assert!(engine
            .activation_locks
            .lock()
            .unwrap()
            .contains_key("churning"));

        engine.reset("churning").unwrap();
        assert!(engine.activation_locks.lock().unwrap().is_empty());

        // A fresh lock is created on the next activation.
        engine.mark_activated("churning").unwrap();
        assert_eq!(engine.activation_count("churning").unwrap(), 1);
    }

    #[test]
    fn store_errors_propagate_unchanged() {
        struct FailingStore;
        impl EventStore for FailingStore {
            fn set(&self, _key: &str, _value: serde_json::Value) -> crate::Result<()> {
                Err(serde_json::from_str::<u64>("boom").unwrap_err().into())
            }
            fn get(&self, _key: &str) -> crate::Result<Option<serde_json::Value>> {
                Err(serde_json::from_str::<u64>("boom").unwrap_err().into())
            }
            fn remove(&self, _key: &str) -> crate::Result<()> {
                Err(serde_json::from_str::<u64>("boom").unwrap_err().into())
            }
        }

        let engine = EligibilityEngine::new(Arc::new(FailingStore));
        let config = EventConfig::builder("any").build().unwrap();

        assert!(matches!(
            engine.can_activate(&config, Utc::now()),
            Err(Error::Serialization(_))
        ));
        assert!(matches!(
            engine.mark_activated("any"),
            Err(Error::Serialization(_))
        ));
        assert!(matches!(engine.reset("any"), Err(Error::Serialization(_))));
    }

    #[test]
    fn concurrent_activations_do_not_lose_updates() {
        let engine = Arc::new(engine());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        engine.mark_activated("contended").unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(engine.activation_count("contended").unwrap(), 400);
    }
}
