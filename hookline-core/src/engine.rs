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

//! Engine instance - subscription protocol and scheduler tick
//!
//! One `HookEngine` owns the catalog, the subscription registry, the work
//! queue, the per-hook run state and the applier boundary. Subscribe and
//! unsubscribe only update the registry and enqueue work; `tick()` runs
//! inside the host's update callback and converges desired state against
//! actual state in bounded batches.
//!
//! Desired state is always recomputed from the registry at drain time,
//! never captured at enqueue time, so redundant queue entries are no-ops
//! and "cancelling" pending work is just another registry change.

use crate::applier::{InstallOutcome, PatchApplier, PatchBackend};
use crate::catalog::HookCatalog;
use crate::config::{DependentPolicy, EngineConfig};
use crate::definition::{HookPool, HookStatus};
use crate::error::EngineResult;
use crate::queue::WorkQueue;
use crate::resolver::DependencyResolver;
use crate::subscriptions::SubscriptionRegistry;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Mutable run state of a hook. Only the reconciliation path writes it.
#[derive(Debug, Clone, Default)]
struct RunState {
    status: HookStatus,
    last_error: Option<String>,
    changed_at: Option<DateTime<Utc>>,
}

/// Operator-facing row describing one hook.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookInfo {
    /// Hook identifier.
    pub identifier: String,
    /// Grouping name.
    pub name: String,
    /// Qualified name.
    pub full_name: String,
    /// Scheduling pool.
    pub pool: HookPool,
    /// Current run status.
    pub status: HookStatus,
    /// Number of subscribers currently holding the hook.
    pub subscriber_count: usize,
    /// Retained error, present while the status is a failure.
    pub last_error: Option<String>,
    /// When the status last changed.
    pub changed_at: Option<DateTime<Utc>>,
}

/// Counters for one scheduler tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TickSummary {
    /// Queue entries drained this tick.
    pub processed: usize,
    /// Hooks newly installed.
    pub installed: usize,
    /// Hooks newly removed.
    pub removed: usize,
    /// Install or removal failures recorded.
    pub failed: usize,
    /// Entries still queued for later ticks.
    pub remaining: usize,
}

/// The interception engine.
///
/// Constructed once at startup over a loaded catalog and a backend, then
/// handed by reference to the embedding runtime. All mutation funnels
/// through guarded structures; the engine expects a single logical writer
/// thread, matching its cooperative, tick-driven design.
pub struct HookEngine {
    config: EngineConfig,
    catalog: HookCatalog,
    registry: RwLock<SubscriptionRegistry>,
    queue: Mutex<WorkQueue>,
    states: RwLock<HashMap<String, RunState>>,
    applier: Mutex<PatchApplier>,
}

impl HookEngine {
    /// Create an engine over a loaded catalog and interception backend.
    ///
    /// Unconditional and static hooks whose dependencies all resolve are
    /// subscribed under the core subscriber and queued, so they install
    /// on the first ticks; one with an unresolvable dependency waits
    /// until some consumer subscribes it explicitly.
    pub fn new(
        catalog: HookCatalog,
        backend: Box<dyn PatchBackend>,
        config: EngineConfig,
    ) -> EngineResult<Self> {
        config.validate()?;
        let engine = Self {
            config,
            catalog,
            registry: RwLock::new(SubscriptionRegistry::new()),
            queue: Mutex::new(WorkQueue::new()),
            states: RwLock::new(HashMap::new()),
            applier: Mutex::new(PatchApplier::new(backend)),
        };
        engine.bootstrap();
        Ok(engine)
    }

    fn bootstrap(&self) {
        let core = self.config.core_subscriber.clone();
        let mut eager: Vec<String> = Vec::new();
        eager.extend_from_slice(self.catalog.pool(HookPool::Static));
        eager.extend_from_slice(self.catalog.pool(HookPool::Unconditional));

        for id in &eager {
            if let Some(missing) = self.unresolved_dependency(id) {
                tracing::warn!(
                    hook = %id,
                    dependency = %missing,
                    "Eager hook has an unmet dependency, waiting"
                );
                continue;
            }
            self.subscribe_hook(id, &core);
        }

        // Always-active hooks converge without any subscriber.
        let mut queue = self.queue.lock();
        for id in self.catalog.ids() {
            let always = self
                .catalog
                .get(id)
                .is_some_and(|def| def.flags.always_active);
            if always && !self.registry.read().has_any_subscriber(id) {
                queue.push(id);
            }
        }
    }

    /// Declare that a subscriber needs the hooks named `hook_name`.
    ///
    /// Resolves every overload sharing the name, registers the request
    /// across each one's prerequisites (and dependents, per policy) and
    /// queues them for reconciliation. Never fails synchronously; an
    /// unknown name is logged and ignored.
    pub fn subscribe(&self, hook_name: &str, subscriber_id: &str) {
        let matches: Vec<String> = self.catalog.by_name(hook_name).to_vec();
        if matches.is_empty() {
            tracing::warn!(
                hook = %hook_name,
                subscriber = %subscriber_id,
                "Subscribe for unknown hook name"
            );
            return;
        }
        for identifier in &matches {
            self.subscribe_hook(identifier, subscriber_id);
        }
    }

    /// Withdraw a subscriber's interest in the hooks named `hook_name`.
    pub fn unsubscribe(&self, hook_name: &str, subscriber_id: &str) {
        let matches: Vec<String> = self.catalog.by_name(hook_name).to_vec();
        if matches.is_empty() {
            tracing::warn!(
                hook = %hook_name,
                subscriber = %subscriber_id,
                "Unsubscribe for unknown hook name"
            );
            return;
        }
        for identifier in &matches {
            self.unsubscribe_hook(identifier, subscriber_id);
        }
    }

    /// Drop every subscription held by a subscriber (consumer teardown).
    pub fn retire_subscriber(&self, subscriber_id: &str) {
        let mut affected = self.registry.write().remove_subscriber(subscriber_id);
        if affected.is_empty() {
            return;
        }
        // Dependents drain first.
        let resolver = DependencyResolver::new(&self.catalog);
        affected.sort_by_key(|id| std::cmp::Reverse(resolver.ancestors(id).len()));

        let mut queue = self.queue.lock();
        for id in &affected {
            queue.push(id.clone());
        }
        tracing::debug!(
            subscriber = %subscriber_id,
            hooks = affected.len(),
            "Retired subscriber"
        );
    }

    fn subscribe_hook(&self, identifier: &str, subscriber_id: &str) {
        if self.registry.read().is_subscribed(identifier, subscriber_id) {
            return;
        }
        let resolver = DependencyResolver::new(&self.catalog);
        let ancestors = resolver.ancestors(identifier);
        let descendants = match self.config.dependent_policy {
            DependentPolicy::Propagate => resolver.descendants(identifier),
            DependentPolicy::AncestorsOnly => Vec::new(),
        };

        let mut registry = self.registry.write();
        let mut queue = self.queue.lock();
        // Prerequisites queue ahead of the hook itself, leaves first.
        for id in &ancestors {
            registry.subscribe(id, subscriber_id);
            queue.push(id.clone());
        }
        registry.subscribe(identifier, subscriber_id);
        queue.push(identifier);
        for id in &descendants {
            registry.subscribe(id, subscriber_id);
            queue.push(id.clone());
        }

        tracing::debug!(
            hook = %identifier,
            subscriber = %subscriber_id,
            prerequisites = ancestors.len(),
            dependents = descendants.len(),
            "Subscribed"
        );
    }

    fn unsubscribe_hook(&self, identifier: &str, subscriber_id: &str) {
        if !self.registry.read().is_subscribed(identifier, subscriber_id) {
            return;
        }
        let resolver = DependencyResolver::new(&self.catalog);
        let mut ancestors = resolver.ancestors(identifier);
        ancestors.reverse();
        let mut descendants = match self.config.dependent_policy {
            DependentPolicy::Propagate => resolver.descendants(identifier),
            DependentPolicy::AncestorsOnly => Vec::new(),
        };
        descendants.reverse();

        let mut registry = self.registry.write();
        let mut queue = self.queue.lock();
        // Dependents release before anything they might still rely on.
        for id in &descendants {
            registry.unsubscribe(id, subscriber_id);
            queue.push(id.clone());
        }
        registry.unsubscribe(identifier, subscriber_id);
        queue.push(identifier);
        for id in &ancestors {
            registry.unsubscribe(id, subscriber_id);
            queue.push(id.clone());
        }

        tracing::debug!(
            hook = %identifier,
            subscriber = %subscriber_id,
            "Unsubscribed"
        );
    }

    /// Reconcile up to `batch_limit` queued hooks against desired state.
    ///
    /// Called once per host update cycle. Entries beyond the batch limit
    /// stay queued, so a burst degrades into several ticks instead of one
    /// unbounded pause.
    pub fn tick(&self) -> TickSummary {
        let mut summary = TickSummary::default();
        for _ in 0..self.config.batch_limit {
            let entry = self.queue.lock().pop();
            let Some(identifier) = entry else { break };
            summary.processed += 1;
            self.reconcile(&identifier, &mut summary);
        }
        summary.remaining = self.queue.lock().len();

        if summary.processed > 0 {
            tracing::debug!(
                processed = summary.processed,
                installed = summary.installed,
                removed = summary.removed,
                failed = summary.failed,
                remaining = summary.remaining,
                "Tick completed"
            );
        }
        summary
    }

    fn reconcile(&self, identifier: &str, summary: &mut TickSummary) {
        let Some(def) = self.catalog.get(identifier) else {
            tracing::warn!(hook = %identifier, "Queued hook missing from catalog");
            return;
        };
        let desired =
            def.flags.always_active || self.registry.read().has_any_subscriber(identifier);
        let current = self.status(identifier);

        if desired && !current.is_active() {
            let outcome = self.applier.lock().install(def);
            self.record_install(identifier, &outcome, summary);
        } else if !desired && current.is_active() {
            let outcome = self.applier.lock().remove(def, &self.catalog);
            for (peer, peer_outcome) in &outcome.reapplied {
                self.refresh_reapplied(peer, peer_outcome, summary);
            }
            if outcome.ok {
                self.set_status(identifier, HookStatus::Inactive, None);
                summary.removed += 1;
                tracing::debug!(hook = %identifier, "Hook removed");
            } else {
                let error = outcome.error.unwrap_or_else(|| "removal failed".to_string());
                tracing::error!(hook = %identifier, error = %error, "Hook removal failed");
                self.set_status(identifier, HookStatus::Failure, Some(error));
                summary.failed += 1;
            }
        } else if !desired && current == HookStatus::Failure {
            // Nothing is installed; the recorded failure is stale.
            self.set_status(identifier, HookStatus::Inactive, None);
        }
    }

    fn record_install(&self, identifier: &str, outcome: &InstallOutcome, summary: &mut TickSummary) {
        if outcome.ok {
            let status = if outcome.checksum_mismatch {
                HookStatus::Warning
            } else {
                HookStatus::Success
            };
            self.set_status(identifier, status, None);
            summary.installed += 1;
            tracing::debug!(hook = %identifier, status = ?status, "Hook installed");
        } else {
            let error = outcome
                .error
                .clone()
                .unwrap_or_else(|| "install failed".to_string());
            tracing::error!(hook = %identifier, error = %error, "Hook install failed");
            self.set_status(identifier, HookStatus::Failure, Some(error));
            summary.failed += 1;
        }
    }

    fn refresh_reapplied(
        &self,
        identifier: &str,
        outcome: &InstallOutcome,
        summary: &mut TickSummary,
    ) {
        if outcome.ok {
            let status = if outcome.checksum_mismatch {
                HookStatus::Warning
            } else {
                HookStatus::Success
            };
            self.set_status(identifier, status, None);
        } else {
            let error = outcome
                .error
                .clone()
                .unwrap_or_else(|| "re-apply failed".to_string());
            tracing::error!(
                hook = %identifier,
                error = %error,
                "Hook lost while reordering its target stack"
            );
            self.set_status(identifier, HookStatus::Failure, Some(error));
            summary.failed += 1;
        }
    }

    fn set_status(&self, identifier: &str, status: HookStatus, error: Option<String>) {
        let mut states = self.states.write();
        let state = states.entry(identifier.to_string()).or_default();
        if state.status != status {
            state.changed_at = Some(Utc::now());
        }
        state.status = status;
        state.last_error = if status == HookStatus::Failure {
            error
        } else {
            None
        };
    }

    fn unresolved_dependency(&self, identifier: &str) -> Option<String> {
        let def = self.catalog.get(identifier)?;
        def.dependencies
            .iter()
            .find(|dep| self.catalog.by_full_name(dep).is_empty())
            .cloned()
    }

    /// Current run status of a hook. `Inactive` when never reconciled.
    pub fn status(&self, identifier: &str) -> HookStatus {
        self.states
            .read()
            .get(identifier)
            .map(|state| state.status)
            .unwrap_or_default()
    }

    /// Retained error of a failed hook.
    pub fn last_error(&self, identifier: &str) -> Option<String> {
        self.states
            .read()
            .get(identifier)
            .and_then(|state| state.last_error.clone())
    }

    /// Entries awaiting reconciliation.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Number of subscribers on a hook. Diagnostics only.
    pub fn subscriber_count(&self, identifier: &str) -> usize {
        self.registry.read().subscriber_count(identifier)
    }

    /// Subscribers on a hook, sorted. Diagnostics only.
    pub fn subscribers(&self, identifier: &str) -> Vec<String> {
        self.registry.read().subscribers(identifier)
    }

    /// The loaded catalog.
    pub fn catalog(&self) -> &HookCatalog {
        &self.catalog
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// All hooks not flagged hidden, in load order.
    pub fn list(&self) -> Vec<HookInfo> {
        self.catalog
            .ids()
            .filter_map(|id| self.info(id))
            .collect()
    }

    /// Visible hooks in a pool.
    pub fn list_by_pool(&self, pool: HookPool) -> Vec<HookInfo> {
        self.list().into_iter().filter(|info| info.pool == pool).collect()
    }

    /// Visible hooks currently patched in.
    pub fn list_active(&self) -> Vec<HookInfo> {
        self.list()
            .into_iter()
            .filter(|info| info.status.is_active())
            .collect()
    }

    /// Visible hooks currently not patched in.
    pub fn list_inactive(&self) -> Vec<HookInfo> {
        self.list()
            .into_iter()
            .filter(|info| !info.status.is_active())
            .collect()
    }

    fn info(&self, identifier: &str) -> Option<HookInfo> {
        let def = self.catalog.get(identifier)?;
        if def.flags.hidden {
            return None;
        }
        let state = self
            .states
            .read()
            .get(identifier)
            .cloned()
            .unwrap_or_default();
        Some(HookInfo {
            identifier: def.identifier.clone(),
            name: def.name.clone(),
            full_name: def.full_name.clone(),
            pool: def.pool(),
            status: state.status,
            subscriber_count: self.registry.read().subscriber_count(identifier),
            last_error: state.last_error,
            changed_at: state.changed_at,
        })
    }
}
