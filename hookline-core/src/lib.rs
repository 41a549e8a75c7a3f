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

//! Hookline Interception Engine
//!
//! A subscription-driven scheduler that decides, at runtime, which
//! instrumentation points ("hooks") are actively patched into a
//! long-running host process, based on which consumers currently need
//! each one.
//!
//! # Architecture
//!
//! - **Catalog**: immutable-after-load metadata and indices for every
//!   known hook
//! - **Resolver**: transitive prerequisite/dependent traversals over the
//!   dependency declarations
//! - **Subscriptions**: presence-based (hook, subscriber) table
//! - **Queue + Engine**: bounded-batch reconciliation, once per host
//!   update tick
//! - **Applier**: fault-isolated boundary to the swappable interception
//!   backend
//!
//! The engine is synchronous and single-threaded by design: subscribe
//! and unsubscribe only enqueue work, and all patching happens inside
//! `tick()` on the host's update callback.
//!
//! # Example
//!
//! ```rust,ignore
//! use hookline_core::{EngineConfig, HookCatalog, HookEngine};
//!
//! let catalog = HookCatalog::build(definitions);
//! let engine = HookEngine::new(catalog, backend, EngineConfig::default())?;
//!
//! // From the plugin lifecycle:
//! engine.subscribe("Player.TakeDamage", "combat-plugin");
//!
//! // From the host's per-frame update callback:
//! engine.tick();
//! ```

pub mod applier;
pub mod catalog;
pub mod config;
pub mod definition;
pub mod engine;
pub mod error;
pub mod queue;
pub mod resolver;
pub mod subscriptions;

// Re-exports
pub use applier::{InstallOutcome, PatchApplier, PatchBackend, PatchError, RemoveOutcome};
pub use catalog::HookCatalog;
pub use config::{DependentPolicy, EngineConfig};
pub use definition::{HookDefinition, HookFlags, HookPool, HookStatus, TargetDescriptor};
pub use engine::{HookEngine, HookInfo, TickSummary};
pub use error::{EngineError, EngineResult};
pub use queue::WorkQueue;
pub use resolver::DependencyResolver;
pub use subscriptions::SubscriptionRegistry;

/// Reserved subscriber id that pins unconditional and static hooks.
pub const CORE_SUBSCRIBER: &str = "core";

/// Default number of queue entries reconciled per tick.
pub const DEFAULT_BATCH_LIMIT: usize = 32;
