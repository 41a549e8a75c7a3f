// Copyright 2025 Hookline Contributors (https://github.com/hookline)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Subscription registry
//!
//! Set-semantics table of (hook, subscriber) pairs - the ground truth for
//! whether anything is currently using a hook. Scheduling reads presence,
//! never counts.

use std::collections::{HashMap, HashSet};

/// Table of which subscribers need which hooks.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    by_hook: HashMap<String, HashSet<String>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that a subscriber needs a hook.
    ///
    /// Returns whether the pair was newly inserted; repeats are no-ops.
    pub fn subscribe(&mut self, hook_id: &str, subscriber_id: &str) -> bool {
        self.by_hook
            .entry(hook_id.to_string())
            .or_default()
            .insert(subscriber_id.to_string())
    }

    /// Remove a (hook, subscriber) pair if present.
    pub fn unsubscribe(&mut self, hook_id: &str, subscriber_id: &str) -> bool {
        let Some(subscribers) = self.by_hook.get_mut(hook_id) else {
            return false;
        };
        let removed = subscribers.remove(subscriber_id);
        if subscribers.is_empty() {
            self.by_hook.remove(hook_id);
        }
        removed
    }

    /// Whether a specific subscriber holds a subscription on a hook.
    pub fn is_subscribed(&self, hook_id: &str, subscriber_id: &str) -> bool {
        self.by_hook
            .get(hook_id)
            .is_some_and(|subscribers| subscribers.contains(subscriber_id))
    }

    /// Whether anything at all is using a hook.
    ///
    /// This is the check the scheduler derives desired state from.
    pub fn has_any_subscriber(&self, hook_id: &str) -> bool {
        self.by_hook.contains_key(hook_id)
    }

    /// Number of subscribers on a hook. Diagnostics only.
    pub fn subscriber_count(&self, hook_id: &str) -> usize {
        self.by_hook.get(hook_id).map_or(0, HashSet::len)
    }

    /// Subscribers on a hook, sorted. Diagnostics only.
    pub fn subscribers(&self, hook_id: &str) -> Vec<String> {
        let mut out: Vec<String> = self
            .by_hook
            .get(hook_id)
            .map(|subscribers| subscribers.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Drop every subscription held by a subscriber (consumer teardown).
    ///
    /// Returns the hooks that lost a subscription.
    pub fn remove_subscriber(&mut self, subscriber_id: &str) -> Vec<String> {
        let mut affected = Vec::new();
        self.by_hook.retain(|hook_id, subscribers| {
            if subscribers.remove(subscriber_id) {
                affected.push(hook_id.clone());
            }
            !subscribers.is_empty()
        });
        affected
    }
}
