// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Callback management for topic-pattern subscriptions.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::topic::{FilterError, TopicFilter};
use crate::transport::MessageProperties;

/// Unique identifier for a registered callback.
///
/// Returned on registration and used to remove the callback later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sub({})", self.0)
    }
}

/// Type alias for message callbacks.
///
/// A callback receives the topic, the payload as a string, and the
/// optional v5 message properties.
pub type MessageCallback = Arc<dyn Fn(&str, &str, Option<&MessageProperties>) + Send + Sync>;

struct PatternEntry {
    filter: TopicFilter,
    callbacks: Vec<(SubscriptionId, MessageCallback)>,
}

/// Registry mapping topic patterns to ordered callback lists.
///
/// Callbacks registered under the same pattern are dispatched in
/// registration order; distinct patterns carry no ordering guarantee.
pub struct CallbackRegistry {
    next_id: AtomicU64,
    patterns: RwLock<Vec<PatternEntry>>,
}

impl CallbackRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            patterns: RwLock::new(Vec::new()),
        }
    }

    /// Registers a callback under a topic pattern.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] if the pattern is not a valid MQTT filter.
    pub fn add<F>(&self, pattern: &str, callback: F) -> Result<SubscriptionId, FilterError>
    where
        F: Fn(&str, &str, Option<&MessageProperties>) + Send + Sync + 'static,
    {
        let filter = TopicFilter::parse(pattern)?;
        let id = SubscriptionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback: MessageCallback = Arc::new(callback);

        let mut patterns = self.patterns.write();
        if let Some(entry) = patterns.iter_mut().find(|e| e.filter.as_str() == pattern) {
            entry.callbacks.push((id, callback));
        } else {
            patterns.push(PatternEntry {
                filter,
                callbacks: vec![(id, callback)],
            });
        }
        Ok(id)
    }

    /// Removes a callback by its subscription ID.
    ///
    /// Returns `true` if a callback was found and removed. The pattern
    /// entry is kept even when its last callback goes away, since the
    /// MQTT subscription itself stays active.
    pub fn remove(&self, id: SubscriptionId) -> bool {
        let mut patterns = self.patterns.write();
        for entry in patterns.iter_mut() {
            let before = entry.callbacks.len();
            entry.callbacks.retain(|(callback_id, _)| *callback_id != id);
            if entry.callbacks.len() != before {
                return true;
            }
        }
        false
    }

    /// Returns the callback lists of every pattern matching `topic`,
    /// one list per pattern, each in registration order.
    #[must_use]
    pub fn matching(&self, topic: &str) -> Vec<Vec<MessageCallback>> {
        self.patterns
            .read()
            .iter()
            .filter(|entry| entry.filter.matches(topic))
            .map(|entry| {
                entry
                    .callbacks
                    .iter()
                    .map(|(_, callback)| Arc::clone(callback))
                    .collect()
            })
            .filter(|callbacks: &Vec<MessageCallback>| !callbacks.is_empty())
            .collect()
    }

    /// The registered patterns, in registration order.
    #[must_use]
    pub fn patterns(&self) -> Vec<String> {
        self.patterns
            .read()
            .iter()
            .map(|entry| entry.filter.as_str().to_string())
            .collect()
    }

    /// Total number of registered callbacks.
    #[must_use]
    pub fn callback_count(&self) -> usize {
        self.patterns
            .read()
            .iter()
            .map(|entry| entry.callbacks.len())
            .sum()
    }

    /// Whether no callbacks are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.callback_count() == 0
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistry")
            .field("patterns", &self.patterns())
            .field("callback_count", &self.callback_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn new_registry_is_empty() {
        let registry = CallbackRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.matching("a/b").is_empty());
    }

    #[test]
    fn add_and_match() {
        let registry = CallbackRegistry::new();
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        registry
            .add("icsia/+/status/ack", move |_topic, _payload, _props| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        let groups = registry.matching("icsia/motor_01/status/ack");
        assert_eq!(groups.len(), 1);
        for callback in &groups[0] {
            callback("icsia/motor_01/status/ack", "{}", None);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        assert!(registry.matching("icsia/motor_01/status/completion").is_empty());
    }

    #[test]
    fn callbacks_keep_registration_order_within_pattern() {
        let registry = CallbackRegistry::new();
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        for n in 0..3 {
            let order = order.clone();
            registry
                .add("a/#", move |_, _, _| order.lock().push(n))
                .unwrap();
        }

        let groups = registry.matching("a/b");
        assert_eq!(groups.len(), 1);
        for callback in &groups[0] {
            callback("a/b", "", None);
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn multiple_patterns_can_match_one_topic() {
        let registry = CallbackRegistry::new();
        registry.add("a/#", |_, _, _| {}).unwrap();
        registry.add("a/+", |_, _, _| {}).unwrap();
        registry.add("b/#", |_, _, _| {}).unwrap();

        assert_eq!(registry.matching("a/b").len(), 2);
    }

    #[test]
    fn remove_by_id() {
        let registry = CallbackRegistry::new();
        let id = registry.add("a/#", |_, _, _| {}).unwrap();

        assert!(registry.remove(id));
        assert!(!registry.remove(id));
        assert!(registry.matching("a/b").is_empty());
        // The pattern stays registered for the MQTT subscription.
        assert_eq!(registry.patterns(), vec!["a/#".to_string()]);
    }

    #[test]
    fn invalid_pattern_is_rejected() {
        let registry = CallbackRegistry::new();
        assert!(registry.add("a/#/b", |_, _, _| {}).is_err());
    }

    #[test]
    fn ids_are_unique() {
        let registry = CallbackRegistry::new();
        let a = registry.add("a/#", |_, _, _| {}).unwrap();
        let b = registry.add("a/#", |_, _, _| {}).unwrap();
        assert_ne!(a, b);
    }
}
