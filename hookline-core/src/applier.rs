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

//! Patch applier boundary
//!
//! The narrow seam between the scheduler and the interception backend.
//! Backend calls are fault-isolated here: an error or panic while
//! patching one hook is converted into a recorded failure and never
//! reaches sibling hooks or the tick loop.
//!
//! Interceptors installed on the same target operation form an ordered
//! stack: last installed, first removed. Removing a hook buried in its
//! stack unwinds the hooks above it, removes it, then re-applies the
//! unwound hooks in their original order.

use crate::catalog::HookCatalog;
use crate::definition::{HookDefinition, TargetDescriptor};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use thiserror::Error;

/// Errors reported by the interception backend.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("Backend rejected the patch: {0}")]
    Rejected(String),

    #[error("Target operation not found: {0}")]
    TargetMissing(String),

    #[error("Backend fault: {0}")]
    Backend(String),
}

/// Capability interface implemented by the interception backend.
///
/// The scheduler never learns how interception is performed; it only
/// binds, unbinds, and fingerprints named target operations through this
/// trait.
pub trait PatchBackend: Send {
    /// Bind the hook's interceptor to its target operation.
    fn install(&mut self, hook: &HookDefinition) -> Result<(), PatchError>;

    /// Unbind the hook's interceptor from its target operation.
    fn remove(&mut self, hook: &HookDefinition) -> Result<(), PatchError>;

    /// Fingerprint of the live target operation body.
    fn checksum(&self, target: &TargetDescriptor) -> Result<String, PatchError>;
}

/// Outcome of one install attempt.
#[derive(Debug, Clone)]
pub struct InstallOutcome {
    /// Whether the interceptor is now bound.
    pub ok: bool,
    /// Whether the live target drifted from the expected checksum.
    pub checksum_mismatch: bool,
    /// Backend error or panic message, when not ok.
    pub error: Option<String>,
}

/// Outcome of one removal attempt.
#[derive(Debug)]
pub struct RemoveOutcome {
    /// Whether the interceptor is now unbound.
    pub ok: bool,
    /// Backend error or panic message, when not ok.
    pub error: Option<String>,
    /// Refreshed outcomes for hooks that were unwound and re-applied to
    /// honor removal order on a shared target.
    pub reapplied: Vec<(String, InstallOutcome)>,
}

/// Fault-isolating wrapper around the interception backend.
pub struct PatchApplier {
    backend: Box<dyn PatchBackend>,
    /// Installed hook identifiers per target key, in installation order.
    /// Removal pops from the back.
    stacks: HashMap<String, Vec<String>>,
}

impl PatchApplier {
    /// Wrap an interception backend.
    pub fn new(backend: Box<dyn PatchBackend>) -> Self {
        Self {
            backend,
            stacks: HashMap::new(),
        }
    }

    /// Install a hook, comparing checksums first when the hook carries one.
    ///
    /// A checksum mismatch (or an unreadable live checksum) never blocks
    /// the install; it is reported so the caller can downgrade the hook
    /// to a drift warning.
    pub fn install(&mut self, hook: &HookDefinition) -> InstallOutcome {
        let checksum_mismatch = self.checksum_drift(hook);

        match self.guarded_install(hook) {
            Ok(()) => {
                self.stacks
                    .entry(hook.target.key())
                    .or_default()
                    .push(hook.identifier.clone());
                InstallOutcome {
                    ok: true,
                    checksum_mismatch,
                    error: None,
                }
            }
            Err(error) => InstallOutcome {
                ok: false,
                checksum_mismatch,
                error: Some(error),
            },
        }
    }

    /// Remove a hook, unwinding interceptors stacked above it first.
    pub fn remove(&mut self, hook: &HookDefinition, catalog: &HookCatalog) -> RemoveOutcome {
        let key = hook.target.key();
        let mut reapplied: Vec<(String, InstallOutcome)> = Vec::new();

        let above: Vec<String> = self
            .stacks
            .get(&key)
            .and_then(|stack| {
                stack
                    .iter()
                    .position(|id| id == &hook.identifier)
                    .map(|pos| stack[pos + 1..].to_vec())
            })
            .unwrap_or_default();

        // Unwind: last installed, first removed.
        for peer_id in above.iter().rev() {
            let Some(peer) = catalog.get(peer_id) else {
                continue;
            };
            match self.guarded_remove(peer) {
                Ok(()) => self.pop_from_stack(&key, peer_id),
                Err(error) => {
                    tracing::error!(
                        hook = %peer_id,
                        error = %error,
                        "Failed to unwind interceptor above the one being removed"
                    );
                    // The peer's state is unknown; stop tracking it and
                    // report the failure instead of re-applying.
                    self.pop_from_stack(&key, peer_id);
                    reapplied.push((
                        peer_id.clone(),
                        InstallOutcome {
                            ok: false,
                            checksum_mismatch: false,
                            error: Some(error),
                        },
                    ));
                }
            }
        }

        let result = self.guarded_remove(hook);
        self.pop_from_stack(&key, &hook.identifier);

        // Restore the unwound interceptors in their original order.
        for peer_id in &above {
            if reapplied.iter().any(|(id, _)| id == peer_id) {
                continue;
            }
            let Some(peer) = catalog.get(peer_id) else {
                continue;
            };
            let outcome = self.install(peer);
            reapplied.push((peer_id.clone(), outcome));
        }

        match result {
            Ok(()) => RemoveOutcome {
                ok: true,
                error: None,
                reapplied,
            },
            Err(error) => RemoveOutcome {
                ok: false,
                error: Some(error),
                reapplied,
            },
        }
    }

    /// Installed hook identifiers on a target, oldest first.
    pub fn installed_on(&self, target: &TargetDescriptor) -> &[String] {
        self.stacks
            .get(&target.key())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    fn checksum_drift(&self, hook: &HookDefinition) -> bool {
        let Some(expected) = &hook.expected_checksum else {
            return false;
        };
        if hook.flags.ignore_checksum {
            return false;
        }

        let backend = &self.backend;
        match catch_unwind(AssertUnwindSafe(|| backend.checksum(&hook.target))) {
            Ok(Ok(live)) => {
                if &live != expected {
                    tracing::warn!(
                        hook = %hook.identifier,
                        expected = %expected,
                        live = %live,
                        "Target checksum drifted"
                    );
                    true
                } else {
                    false
                }
            }
            Ok(Err(error)) => {
                tracing::warn!(
                    hook = %hook.identifier,
                    error = %error,
                    "Live checksum unavailable, treating as drift"
                );
                true
            }
            Err(payload) => {
                tracing::warn!(
                    hook = %hook.identifier,
                    error = %panic_message(payload),
                    "Backend panicked computing checksum, treating as drift"
                );
                true
            }
        }
    }

    fn guarded_install(&mut self, hook: &HookDefinition) -> Result<(), String> {
        let backend = &mut self.backend;
        match catch_unwind(AssertUnwindSafe(|| backend.install(hook))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(error.to_string()),
            Err(payload) => Err(format!("backend panicked: {}", panic_message(payload))),
        }
    }

    fn guarded_remove(&mut self, hook: &HookDefinition) -> Result<(), String> {
        let backend = &mut self.backend;
        match catch_unwind(AssertUnwindSafe(|| backend.remove(hook))) {
            Ok(Ok(())) => Ok(()),
            Ok(Err(error)) => Err(error.to_string()),
            Err(payload) => Err(format!("backend panicked: {}", panic_message(payload))),
        }
    }

    fn pop_from_stack(&mut self, key: &str, identifier: &str) {
        if let Some(stack) = self.stacks.get_mut(key) {
            if let Some(pos) = stack.iter().rposition(|id| id == identifier) {
                stack.remove(pos);
            }
            if stack.is_empty() {
                self.stacks.remove(key);
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::HookFlags;
    use parking_lot::Mutex;
    use std::collections::{BTreeSet, HashSet};
    use std::sync::Arc;

    #[derive(Default)]
    struct BackendState {
        installed: Vec<String>,
        removed: Vec<String>,
        fail_install: HashSet<String>,
        fail_remove: HashSet<String>,
        panic_install: HashSet<String>,
        live_checksums: HashMap<String, String>,
    }

    #[derive(Clone, Default)]
    struct MockBackend {
        state: Arc<Mutex<BackendState>>,
    }

    impl MockBackend {
        fn new() -> (Self, Arc<Mutex<BackendState>>) {
            let backend = Self::default();
            let state = backend.state.clone();
            (backend, state)
        }
    }

    impl PatchBackend for MockBackend {
        fn install(&mut self, hook: &HookDefinition) -> Result<(), PatchError> {
            let mut state = self.state.lock();
            if state.panic_install.contains(&hook.identifier) {
                drop(state);
                panic!("interceptor exploded");
            }
            if state.fail_install.contains(&hook.identifier) {
                return Err(PatchError::Rejected(hook.identifier.clone()));
            }
            state.installed.push(hook.identifier.clone());
            Ok(())
        }

        fn remove(&mut self, hook: &HookDefinition) -> Result<(), PatchError> {
            let mut state = self.state.lock();
            if state.fail_remove.contains(&hook.identifier) {
                return Err(PatchError::Backend(format!(
                    "unbind refused for {}",
                    hook.identifier
                )));
            }
            state.removed.push(hook.identifier.clone());
            Ok(())
        }

        fn checksum(&self, target: &TargetDescriptor) -> Result<String, PatchError> {
            self.state
                .lock()
                .live_checksums
                .get(&target.key())
                .cloned()
                .ok_or_else(|| PatchError::TargetMissing(target.key()))
        }
    }

    fn definition(id: &str) -> HookDefinition {
        HookDefinition {
            identifier: id.to_string(),
            name: id.to_string(),
            full_name: id.to_string(),
            flags: HookFlags::default(),
            target: TargetDescriptor::new("Host", id, &[]),
            dependencies: BTreeSet::new(),
            expected_checksum: None,
        }
    }

    fn shared_target(id: &str) -> HookDefinition {
        let mut def = definition(id);
        def.target = TargetDescriptor::new("Host", "Update", &[]);
        def
    }

    #[test]
    fn test_install_and_remove() {
        let (backend, state) = MockBackend::new();
        let mut applier = PatchApplier::new(Box::new(backend));
        let hook = definition("h");

        let outcome = applier.install(&hook);
        assert!(outcome.ok);
        assert!(!outcome.checksum_mismatch);
        assert_eq!(applier.installed_on(&hook.target), &["h".to_string()]);

        let catalog = HookCatalog::build(vec![hook.clone()]);
        let outcome = applier.remove(&hook, &catalog);
        assert!(outcome.ok);
        assert!(outcome.reapplied.is_empty());
        assert!(applier.installed_on(&hook.target).is_empty());
        assert_eq!(state.lock().removed, vec!["h"]);
    }

    #[test]
    fn test_install_panic_is_contained() {
        let (backend, state) = MockBackend::new();
        state.lock().panic_install.insert("boom".to_string());
        let mut applier = PatchApplier::new(Box::new(backend));

        let outcome = applier.install(&definition("boom"));
        assert!(!outcome.ok);
        assert!(outcome.error.unwrap().contains("interceptor exploded"));
        assert!(applier.installed_on(&definition("boom").target).is_empty());
    }

    #[test]
    fn test_install_rejection_keeps_stack_clean() {
        let (backend, state) = MockBackend::new();
        state.lock().fail_install.insert("h".to_string());
        let mut applier = PatchApplier::new(Box::new(backend));

        let outcome = applier.install(&definition("h"));
        assert!(!outcome.ok);
        assert!(outcome.error.is_some());
        assert!(applier.installed_on(&definition("h").target).is_empty());
    }

    #[test]
    fn test_checksum_mismatch_does_not_block() {
        let (backend, state) = MockBackend::new();
        let mut hook = definition("h");
        hook.expected_checksum = Some("aaaa".to_string());
        state
            .lock()
            .live_checksums
            .insert(hook.target.key(), "bbbb".to_string());
        let mut applier = PatchApplier::new(Box::new(backend));

        let outcome = applier.install(&hook);
        assert!(outcome.ok);
        assert!(outcome.checksum_mismatch);
    }

    #[test]
    fn test_checksum_match_is_clean() {
        let (backend, state) = MockBackend::new();
        let mut hook = definition("h");
        hook.expected_checksum = Some("aaaa".to_string());
        state
            .lock()
            .live_checksums
            .insert(hook.target.key(), "aaaa".to_string());
        let mut applier = PatchApplier::new(Box::new(backend));

        let outcome = applier.install(&hook);
        assert!(outcome.ok);
        assert!(!outcome.checksum_mismatch);
    }

    #[test]
    fn test_unreadable_checksum_counts_as_drift() {
        let (backend, _state) = MockBackend::new();
        let mut hook = definition("h");
        hook.expected_checksum = Some("aaaa".to_string());
        let mut applier = PatchApplier::new(Box::new(backend));

        let outcome = applier.install(&hook);
        assert!(outcome.ok);
        assert!(outcome.checksum_mismatch);
    }

    #[test]
    fn test_ignore_checksum_flag_skips_comparison() {
        let (backend, _state) = MockBackend::new();
        let mut hook = definition("h");
        hook.expected_checksum = Some("aaaa".to_string());
        hook.flags.ignore_checksum = true;
        let mut applier = PatchApplier::new(Box::new(backend));

        let outcome = applier.install(&hook);
        assert!(outcome.ok);
        assert!(!outcome.checksum_mismatch);
    }

    #[test]
    fn test_buried_removal_unwinds_lifo() {
        let (backend, state) = MockBackend::new();
        let mut applier = PatchApplier::new(Box::new(backend));

        let first = shared_target("first");
        let second = shared_target("second");
        let third = shared_target("third");
        let catalog =
            HookCatalog::build(vec![first.clone(), second.clone(), third.clone()]);

        applier.install(&first);
        applier.install(&second);
        applier.install(&third);

        let outcome = applier.remove(&first, &catalog);
        assert!(outcome.ok);

        // Unbind order: third, second, first. Then second and third rebind.
        assert_eq!(state.lock().removed, vec!["third", "second", "first"]);
        assert_eq!(
            state.lock().installed,
            vec!["first", "second", "third", "second", "third"]
        );
        assert_eq!(
            applier.installed_on(&first.target),
            &["second".to_string(), "third".to_string()]
        );
        assert_eq!(outcome.reapplied.len(), 2);
        assert!(outcome.reapplied.iter().all(|(_, o)| o.ok));
    }

    #[test]
    fn test_top_of_stack_removal_skips_unwind() {
        let (backend, state) = MockBackend::new();
        let mut applier = PatchApplier::new(Box::new(backend));

        let first = shared_target("first");
        let second = shared_target("second");
        let catalog = HookCatalog::build(vec![first.clone(), second.clone()]);

        applier.install(&first);
        applier.install(&second);

        let outcome = applier.remove(&second, &catalog);
        assert!(outcome.ok);
        assert!(outcome.reapplied.is_empty());
        assert_eq!(state.lock().removed, vec!["second"]);
        assert_eq!(applier.installed_on(&first.target), &["first".to_string()]);
    }

    #[test]
    fn test_failed_unwind_is_reported_not_reapplied() {
        let (backend, state) = MockBackend::new();
        state.lock().fail_remove.insert("stuck".to_string());
        let mut applier = PatchApplier::new(Box::new(backend));

        let base = shared_target("base");
        let stuck = shared_target("stuck");
        let catalog = HookCatalog::build(vec![base.clone(), stuck.clone()]);

        applier.install(&base);
        applier.install(&stuck);

        let outcome = applier.remove(&base, &catalog);
        assert!(outcome.ok);
        assert_eq!(outcome.reapplied.len(), 1);
        let (id, peer_outcome) = &outcome.reapplied[0];
        assert_eq!(id, "stuck");
        assert!(!peer_outcome.ok);
        // The stuck hook was not re-installed.
        assert_eq!(state.lock().installed, vec!["base", "stuck"]);
    }
}
