//! Subscription registry
//!
//! Holds the subscriptions for one connection in creation order. Topics are
//! unique within a session; subscriptions are identified by id so renaming
//! has no effect on identity. The selected set drives message filtering.

use crate::transport::SubscribeOptions;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Display colors handed out to subscriptions that do not pick one.
const COLOR_PALETTE: [&str; 8] = [
    "#33bbff", "#ffc83d", "#ff6b6b", "#4ecdc4", "#a78bfa", "#f97316", "#34d399", "#f472b6",
];

/// One registered subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub options: SubscribeOptions,
    pub created_at: DateTime<Utc>,
}

/// All subscriptions of a session plus the user's selection.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Vec<Subscription>,
    selected: HashSet<Uuid>,
    next_color: usize,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription, assigning a palette color when none was
    /// chosen. New subscriptions start selected.
    ///
    /// The caller is responsible for rejecting duplicate topics first; the
    /// registry only stores what it is given.
    pub fn add(&mut self, mut options: SubscribeOptions) -> Subscription {
        if options.color.is_none() {
            options.color = Some(COLOR_PALETTE[self.next_color % COLOR_PALETTE.len()].to_string());
            self.next_color += 1;
        }
        let subscription = Subscription {
            id: Uuid::new_v4(),
            options,
            created_at: Utc::now(),
        };
        self.selected.insert(subscription.id);
        self.entries.push(subscription.clone());
        subscription
    }

    /// Remove by id, returning the removed entry.
    pub fn remove(&mut self, id: Uuid) -> Option<Subscription> {
        let index = self.entries.iter().position(|s| s.id == id)?;
        self.selected.remove(&id);
        Some(self.entries.remove(index))
    }

    pub fn get(&self, id: Uuid) -> Option<&Subscription> {
        self.entries.iter().find(|s| s.id == id)
    }

    pub fn contains_topic(&self, topic: &str) -> bool {
        self.entries.iter().any(|s| s.options.topic == topic)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.selected.clear();
        self.next_color = 0;
    }

    pub fn is_selected(&self, id: Uuid) -> bool {
        self.selected.contains(&id)
    }

    /// Set whether a subscription participates in filtering. No-op for
    /// unknown ids.
    pub fn set_selected(&mut self, id: Uuid, selected: bool) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        if selected {
            self.selected.insert(id)
        } else {
            self.selected.remove(&id)
        }
    }

    /// Subscriptions currently participating in filtering, in creation order.
    pub fn selected(&self) -> impl Iterator<Item = &Subscription> {
        self.entries.iter().filter(|s| self.selected.contains(&s.id))
    }

    /// Flip a subscription's selection, returning the new state.
    pub fn toggle(&mut self, id: Uuid) -> Option<bool> {
        self.get(id)?;
        let now_selected = !self.selected.contains(&id);
        self.set_selected(id, now_selected);
        Some(now_selected)
    }

    /// First subscription whose topic filter covers the topic, used to pick
    /// the display color for a message.
    pub fn matching(&self, topic: &str) -> Option<&Subscription> {
        self.entries
            .iter()
            .find(|s| topic_matches(&s.options.topic, topic))
    }
}

/// MQTT topic filter matching. `+` covers one level, `#` covers the rest
/// and must be the final level. Filters starting with a wildcard do not
/// match `$`-prefixed system topics.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    if topic.starts_with('$') && (filter.starts_with('+') || filter.starts_with('#')) {
        return false;
    }

    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(expected), Some(actual)) if expected == actual => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QosLevel;

    fn options(topic: &str) -> SubscribeOptions {
        SubscribeOptions::new(topic, QosLevel::AtMostOnce)
    }

    #[test]
    fn test_add_assigns_palette_colors_in_order() {
        let mut registry = SubscriptionRegistry::new();
        let first = registry.add(options("a"));
        let second = registry.add(options("b"));
        assert_eq!(first.options.color.as_deref(), Some(COLOR_PALETTE[0]));
        assert_eq!(second.options.color.as_deref(), Some(COLOR_PALETTE[1]));
    }

    #[test]
    fn test_explicit_color_is_kept() {
        let mut registry = SubscriptionRegistry::new();
        let mut opts = options("a");
        opts.color = Some("#123456".to_string());
        let added = registry.add(opts);
        assert_eq!(added.options.color.as_deref(), Some("#123456"));
    }

    #[test]
    fn test_new_subscriptions_start_selected() {
        let mut registry = SubscriptionRegistry::new();
        let added = registry.add(options("sensors/+"));
        assert!(registry.is_selected(added.id));
        assert_eq!(registry.selected().count(), 1);
    }

    #[test]
    fn test_remove_clears_selection() {
        let mut registry = SubscriptionRegistry::new();
        let added = registry.add(options("a"));
        assert!(registry.remove(added.id).is_some());
        assert!(!registry.is_selected(added.id));
        assert!(registry.is_empty());
        assert!(registry.remove(added.id).is_none());
    }

    #[test]
    fn test_set_selected_unknown_id_is_noop() {
        let mut registry = SubscriptionRegistry::new();
        assert!(!registry.set_selected(Uuid::new_v4(), true));
        assert!(registry.toggle(Uuid::new_v4()).is_none());
    }

    #[test]
    fn test_toggle_flips_selection() {
        let mut registry = SubscriptionRegistry::new();
        let added = registry.add(options("a"));
        assert_eq!(registry.toggle(added.id), Some(false));
        assert_eq!(registry.toggle(added.id), Some(true));
        assert!(registry.is_selected(added.id));
    }

    #[test]
    fn test_matching_prefers_first_entry() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(options("sensors/#"));
        registry.add(options("sensors/temp"));
        let hit = registry.matching("sensors/temp").unwrap();
        assert_eq!(hit.options.topic, "sensors/#");
        assert!(registry.matching("other").is_none());
    }

    #[test]
    fn test_contains_topic_is_exact() {
        let mut registry = SubscriptionRegistry::new();
        registry.add(options("sensors/+"));
        assert!(registry.contains_topic("sensors/+"));
        assert!(!registry.contains_topic("sensors/temp"));
    }

    #[test]
    fn test_topic_matching() {
        assert!(topic_matches("a/b/c", "a/b/c"));
        assert!(topic_matches("a/+/c", "a/b/c"));
        assert!(topic_matches("a/#", "a/b/c"));
        assert!(topic_matches("#", "a/b/c"));
        assert!(topic_matches("a/b/+", "a/b/c"));

        assert!(!topic_matches("a/b", "a/b/c"));
        assert!(!topic_matches("a/+/c", "a/b/d"));
        assert!(!topic_matches("a/#/c", "a/b/c"));
        assert!(!topic_matches("+/monitor/clients", "$SYS/monitor/clients"));
        assert!(topic_matches("$SYS/#", "$SYS/monitor/clients"));
    }
}
