//! Topic interest tracking and inbound message routing.
//!
//! The registry is pure bookkeeping: it reports when a topic gains its
//! first consumer or loses its last one, and the engine turns that into
//! control messages on the channel.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tracing::debug;

use crate::models::Topic;

/// Identifies one consumer of view updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(pub u64);

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "consumer-{}", self.0)
    }
}

/// Whether the server should be streaming a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Subscribed,
    Unsubscribed,
}

/// Interest in one topic.
#[derive(Debug, Clone)]
pub struct Subscription {
    consumers: BTreeSet<ConsumerId>,
    desired: SubscriptionState,
    acknowledged: SubscriptionState,
}

impl Subscription {
    fn new() -> Self {
        Self {
            consumers: BTreeSet::new(),
            desired: SubscriptionState::Subscribed,
            acknowledged: SubscriptionState::Unsubscribed,
        }
    }

    pub fn consumers(&self) -> impl Iterator<Item = ConsumerId> + '_ {
        self.consumers.iter().copied()
    }

    pub fn desired(&self) -> SubscriptionState {
        self.desired
    }

    pub fn acknowledged(&self) -> SubscriptionState {
        self.acknowledged
    }

    pub fn is_converged(&self) -> bool {
        self.desired == self.acknowledged
    }
}

/// Topic → consumers map for one channel.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    topics: BTreeMap<Topic, Subscription>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `consumer` for `topic`. Returns `true` for the topic's first
    /// consumer, which is when a subscribe request must be sent.
    pub fn subscribe(&mut self, topic: &Topic, consumer: ConsumerId) -> bool {
        let subscription = self
            .topics
            .entry(topic.clone())
            .or_insert_with(Subscription::new);
        let first = subscription.consumers.is_empty();
        subscription.consumers.insert(consumer);
        debug!(%topic, %consumer, first, "Consumer subscribed");
        first
    }

    /// Removes `consumer` from `topic`. Returns `true` when that was the last
    /// consumer, which is when an unsubscribe request must be sent.
    pub fn unsubscribe(&mut self, topic: &Topic, consumer: ConsumerId) -> bool {
        let Some(subscription) = self.topics.get_mut(topic) else {
            return false;
        };
        if !subscription.consumers.remove(&consumer) {
            return false;
        }
        if !subscription.consumers.is_empty() {
            return false;
        }

        self.topics.remove(topic);
        debug!(%topic, %consumer, "Last consumer left");
        true
    }

    pub fn get(&self, topic: &Topic) -> Option<&Subscription> {
        self.topics.get(topic)
    }

    pub fn consumers(&self, topic: &Topic) -> Vec<ConsumerId> {
        self.topics
            .get(topic)
            .map(|s| s.consumers().collect())
            .unwrap_or_default()
    }

    /// Topics with at least one consumer.
    pub fn topics(&self) -> Vec<Topic> {
        self.topics.keys().cloned().collect()
    }

    /// Topics the consumer is registered for.
    pub fn topics_of(&self, consumer: ConsumerId) -> Vec<Topic> {
        self.topics
            .iter()
            .filter(|(_, s)| s.consumers.contains(&consumer))
            .map(|(t, _)| t.clone())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    /// Records that the server was asked to stream these topics.
    pub fn mark_acknowledged(&mut self, topics: &[Topic]) {
        for topic in topics {
            if let Some(subscription) = self.topics.get_mut(topic) {
                subscription.acknowledged = SubscriptionState::Subscribed;
            }
        }
    }

    /// Forgets every acknowledgement; called when the socket drops.
    pub fn reset_acknowledged(&mut self) {
        for subscription in self.topics.values_mut() {
            subscription.acknowledged = SubscriptionState::Unsubscribed;
        }
    }

    /// Topics whose acknowledged state lags the desired one.
    pub fn unconverged(&self) -> Vec<Topic> {
        self.topics
            .iter()
            .filter(|(_, s)| !s.is_converged())
            .map(|(t, _)| t.clone())
            .collect()
    }

    /// Resolves the key of a `ticks` entry to the topics it feeds.
    ///
    /// The key is either a full topic (`"XAUUSD:H1"`) or a bare instrument,
    /// in which case every granularity watched for that instrument gets it.
    pub fn route_tick(&self, key: &str) -> Vec<Topic> {
        if let Ok(topic) = key.parse::<Topic>() {
            return if self.topics.contains_key(&topic) {
                vec![topic]
            } else {
                Vec::new()
            };
        }

        self.topics
            .keys()
            .filter(|t| t.instrument() == key)
            .cloned()
            .collect()
    }

    /// Resolves a bar or log event to its topic.
    ///
    /// An explicit topic must be registered. Without one, the message belongs
    /// to the channel's only topic; with several topics it is unroutable.
    pub fn route(&self, explicit: Option<&Topic>) -> Option<Topic> {
        match explicit {
            Some(topic) => self.topics.contains_key(topic).then(|| topic.clone()),
            None if self.topics.len() == 1 => self.topics.keys().next().cloned(),
            None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn xau() -> Topic {
        Topic::new("XAUUSD", "H1")
    }

    #[test]
    fn first_and_last_consumer_are_reported() {
        let mut registry = SubscriptionRegistry::new();

        assert!(registry.subscribe(&xau(), ConsumerId(1)));
        assert!(!registry.subscribe(&xau(), ConsumerId(2)));
        assert!(!registry.subscribe(&xau(), ConsumerId(2)));

        assert!(!registry.unsubscribe(&xau(), ConsumerId(1)));
        assert!(!registry.unsubscribe(&xau(), ConsumerId(1)));
        assert!(registry.unsubscribe(&xau(), ConsumerId(2)));
        assert!(registry.is_empty());
    }

    #[test]
    fn acknowledgement_converges_after_reconnect() {
        let mut registry = SubscriptionRegistry::new();
        let m5 = Topic::new("XAUUSD", "M5");
        registry.subscribe(&xau(), ConsumerId(1));
        registry.subscribe(&m5, ConsumerId(1));

        assert_eq!(registry.unconverged().len(), 2);
        registry.mark_acknowledged(&[xau(), m5.clone()]);
        assert!(registry.unconverged().is_empty());

        registry.reset_acknowledged();
        assert_eq!(registry.unconverged(), vec![xau(), m5.clone()]);

        registry.mark_acknowledged(&registry.topics());
        assert!(registry.get(&m5).unwrap().is_converged());
    }

    #[test]
    fn tick_keys_route_by_instrument_or_topic() {
        let mut registry = SubscriptionRegistry::new();
        registry.subscribe(&xau(), ConsumerId(1));
        registry.subscribe(&Topic::new("XAUUSD", "M5"), ConsumerId(2));
        registry.subscribe(&Topic::new("EURUSD", "H1"), ConsumerId(3));

        assert_eq!(registry.route_tick("XAUUSD").len(), 2);
        assert_eq!(registry.route_tick("XAUUSD:H1"), vec![xau()]);
        assert!(registry.route_tick("XAUUSD:D1").is_empty());
        assert!(registry.route_tick("BTCUSD").is_empty());
    }

    #[test]
    fn implicit_routing_needs_a_single_topic() {
        let mut registry = SubscriptionRegistry::new();
        assert_eq!(registry.route(None), None);

        registry.subscribe(&xau(), ConsumerId(1));
        assert_eq!(registry.route(None), Some(xau()));
        assert_eq!(registry.route(Some(&xau())), Some(xau()));
        assert_eq!(registry.route(Some(&Topic::new("EURUSD", "H1"))), None);

        registry.subscribe(&Topic::new("EURUSD", "H1"), ConsumerId(1));
        assert_eq!(registry.route(None), None);
        assert_eq!(
            registry.topics_of(ConsumerId(1)),
            vec![Topic::new("EURUSD", "H1"), xau()]
        );
    }
}
