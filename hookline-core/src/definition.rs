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

//! Hook definitions and status types
//!
//! These records are produced by the loader that scans the host artifact.
//! Once the catalog is built they are immutable; the only mutable part of
//! a hook is its run state, which lives inside the engine.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Orthogonal behavior flags for a hook.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HookFlags {
    /// Install at startup regardless of subscribers ("patch" hooks).
    pub unconditional: bool,
    /// Fire-and-forget static call site, also installed eagerly.
    pub static_site: bool,
    /// Hide from operator-facing listings.
    pub hidden: bool,
    /// Skip the expected-vs-live checksum comparison.
    pub ignore_checksum: bool,
    /// Desired state is always active, independent of the registry.
    pub always_active: bool,
}

/// Pool a hook is scheduled from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPool {
    /// Installed at startup.
    Unconditional,
    /// Eagerly installed fire-and-forget call sites.
    Static,
    /// Installed only while subscribed.
    Demand,
}

/// Descriptor of the operation a hook intercepts.
///
/// Owned exclusively by its hook. Two hooks never share a descriptor,
/// but two descriptors may name the same target operation, in which case
/// their interceptors stack on that target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Declaring type of the target operation.
    pub type_name: String,
    /// Member name within the declaring type.
    pub member: String,
    /// Parameter type names, in declaration order.
    #[serde(default)]
    pub signature: Vec<String>,
}

impl TargetDescriptor {
    /// Create a descriptor for `type_name.member` with the given parameters.
    pub fn new(type_name: impl Into<String>, member: impl Into<String>, signature: &[&str]) -> Self {
        Self {
            type_name: type_name.into(),
            member: member.into(),
            signature: signature.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Stable key identifying the target operation.
    ///
    /// Hooks whose descriptors share a key share one removal stack in the
    /// applier boundary.
    pub fn key(&self) -> String {
        format!(
            "{}::{}({})",
            self.type_name,
            self.member,
            self.signature.join(",")
        )
    }
}

/// Run status of a hook.
///
/// Mutated only by the scheduler/applier path, never by consumers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookStatus {
    /// Not patched into the host.
    #[default]
    Inactive,
    /// Patched in cleanly.
    Success,
    /// Patched in, but the target checksum drifted from the expected one.
    Warning,
    /// Install or removal failed; the error is retained on the hook.
    Failure,
}

impl HookStatus {
    /// Whether the hook counts as active for scheduling purposes.
    pub fn is_active(self) -> bool {
        matches!(self, HookStatus::Success | HookStatus::Warning)
    }
}

/// A hook definition as discovered by the loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookDefinition {
    /// Globally unique identifier, stable across the process lifetime.
    pub identifier: String,
    /// Grouping key; overloads on different signatures share it.
    pub name: String,
    /// Qualified grouping key; dependency declarations refer to this.
    pub full_name: String,
    /// Behavior flags.
    #[serde(default)]
    pub flags: HookFlags,
    /// Target operation this hook intercepts.
    pub target: TargetDescriptor,
    /// Full names of hooks that must be active whenever this one is.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Expected fingerprint of the target operation body, if known.
    #[serde(default)]
    pub expected_checksum: Option<String>,
}

impl HookDefinition {
    /// Pool this definition is scheduled from.
    pub fn pool(&self) -> HookPool {
        if self.flags.static_site {
            HookPool::Static
        } else if self.flags.unconditional {
            HookPool::Unconditional
        } else {
            HookPool::Demand
        }
    }

    /// Fingerprint of the underlying patch implementation.
    ///
    /// Two definitions with equal fingerprints claim the same patch; the
    /// catalog keeps the first and drops the rest at load time.
    pub fn fingerprint(&self) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.full_name.as_bytes());
        hasher.update(b"\0");
        hasher.update(self.target.key().as_bytes());
        hex::encode(hasher.finalize().as_bytes())
    }
}
