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

//! Hook catalog
//!
//! Immutable-after-load index of every known interception point, built
//! once from the definitions the loader discovered in the host artifact.

use crate::definition::{HookDefinition, HookPool};
use crate::error::EngineError;
use std::collections::{HashMap, VecDeque};

/// Catalog of all known hooks.
///
/// `identifier` is unique across the catalog; `name` and `full_name` are
/// not (overloads on different target signatures share them).
pub struct HookCatalog {
    /// Definitions by identifier.
    hooks: HashMap<String, HookDefinition>,
    /// Identifiers in load order, for deterministic listings.
    order: Vec<String>,
    /// Identifiers by grouping name.
    name_index: HashMap<String, Vec<String>>,
    /// Identifiers by qualified name; dependency resolution reads this.
    full_name_index: HashMap<String, Vec<String>>,
    /// Identifiers by pool.
    pool_index: HashMap<HookPool, Vec<String>>,
    /// Definitions dropped at load time.
    load_errors: Vec<EngineError>,
}

impl HookCatalog {
    /// Build a catalog from loader-supplied definitions.
    ///
    /// A definition reusing an identifier, or claiming a patch
    /// implementation an earlier definition already owns, is dropped with
    /// a warning; the rest of the catalog still loads.
    pub fn build(definitions: Vec<HookDefinition>) -> Self {
        let mut catalog = Self {
            hooks: HashMap::new(),
            order: Vec::new(),
            name_index: HashMap::new(),
            full_name_index: HashMap::new(),
            pool_index: HashMap::new(),
            load_errors: Vec::new(),
        };

        let mut claimed: HashMap<String, String> = HashMap::new();

        for def in definitions {
            if catalog.hooks.contains_key(&def.identifier) {
                tracing::warn!(
                    hook = %def.identifier,
                    "Duplicate hook identifier, definition dropped"
                );
                catalog
                    .load_errors
                    .push(EngineError::DuplicateIdentifier(def.identifier));
                continue;
            }

            let fingerprint = def.fingerprint();
            if let Some(owner) = claimed.get(&fingerprint) {
                tracing::warn!(
                    hook = %def.identifier,
                    owner = %owner,
                    "Definition claims an already-owned patch implementation, dropped"
                );
                catalog
                    .load_errors
                    .push(EngineError::DuplicateDefinition(def.identifier, owner.clone()));
                continue;
            }

            claimed.insert(fingerprint, def.identifier.clone());
            catalog.index(def);
        }

        let cyclic = catalog.cyclic_hooks();
        if !cyclic.is_empty() {
            tracing::warn!(
                hooks = ?cyclic,
                "Dependency cycle in catalog; traversal absorbs it at runtime"
            );
        }

        tracing::debug!(
            hooks = catalog.hooks.len(),
            dropped = catalog.load_errors.len(),
            "Hook catalog built"
        );
        catalog
    }

    fn index(&mut self, def: HookDefinition) {
        let id = def.identifier.clone();
        self.name_index
            .entry(def.name.clone())
            .or_default()
            .push(id.clone());
        self.full_name_index
            .entry(def.full_name.clone())
            .or_default()
            .push(id.clone());
        self.pool_index.entry(def.pool()).or_default().push(id.clone());
        self.order.push(id.clone());
        self.hooks.insert(id, def);
    }

    /// Get a definition by identifier.
    pub fn get(&self, identifier: &str) -> Option<&HookDefinition> {
        self.hooks.get(identifier)
    }

    /// Check whether an identifier is present.
    pub fn contains(&self, identifier: &str) -> bool {
        self.hooks.contains_key(identifier)
    }

    /// Identifiers of all hooks sharing a grouping name.
    pub fn by_name(&self, name: &str) -> &[String] {
        self.name_index.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Identifiers of all hooks sharing a qualified name.
    pub fn by_full_name(&self, full_name: &str) -> &[String] {
        self.full_name_index
            .get(full_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Identifiers in a pool, in load order.
    pub fn pool(&self, pool: HookPool) -> &[String] {
        self.pool_index.get(&pool).map(Vec::as_slice).unwrap_or(&[])
    }

    /// All identifiers in load order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Number of loaded hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Definitions dropped at load time.
    pub fn load_errors(&self) -> &[EngineError] {
        &self.load_errors
    }

    /// Hooks stuck on a dependency cycle, sorted by identifier.
    ///
    /// Kahn-style in-degree peel over the resolved dependency edges;
    /// whatever cannot be peeled sits on (or behind) a cycle.
    pub fn cyclic_hooks(&self) -> Vec<String> {
        let mut in_degree: HashMap<&str, usize> =
            self.hooks.keys().map(|id| (id.as_str(), 0)).collect();
        let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

        for (id, def) in &self.hooks {
            for dep_name in &def.dependencies {
                for dep_id in self.by_full_name(dep_name) {
                    dependents.entry(dep_id.as_str()).or_default().push(id.as_str());
                    *in_degree.get_mut(id.as_str()).expect("indexed hook") += 1;
                }
            }
        }

        let mut ready: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut peeled = 0usize;

        while let Some(id) = ready.pop_front() {
            peeled += 1;
            if let Some(children) = dependents.get(id) {
                for child in children {
                    let degree = in_degree.get_mut(child).expect("indexed hook");
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(child);
                    }
                }
            }
        }

        if peeled == in_degree.len() {
            return Vec::new();
        }

        let mut cyclic: Vec<String> = in_degree
            .into_iter()
            .filter(|(_, degree)| *degree > 0)
            .map(|(id, _)| id.to_string())
            .collect();
        cyclic.sort();
        cyclic
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{HookFlags, TargetDescriptor};

    fn definition(id: &str, deps: &[&str]) -> HookDefinition {
        HookDefinition {
            identifier: id.to_string(),
            name: id.to_string(),
            full_name: id.to_string(),
            flags: HookFlags::default(),
            target: TargetDescriptor::new("Host", id, &[]),
            dependencies: deps.iter().map(|d| (*d).to_string()).collect(),
            expected_checksum: None,
        }
    }

    #[test]
    fn test_build_and_lookup() {
        let catalog = HookCatalog::build(vec![definition("a", &[]), definition("b", &["a"])]);

        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains("a"));
        assert_eq!(catalog.get("b").unwrap().dependencies.len(), 1);
        assert_eq!(catalog.by_name("a"), &["a".to_string()]);
        assert!(catalog.by_name("missing").is_empty());
        assert!(catalog.load_errors().is_empty());
    }

    #[test]
    fn test_duplicate_identifier_dropped() {
        let mut dup = definition("a", &[]);
        dup.target = TargetDescriptor::new("Host", "other", &[]);
        let catalog = HookCatalog::build(vec![definition("a", &[]), dup]);

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.load_errors().len(), 1);
        assert!(matches!(
            catalog.load_errors()[0],
            EngineError::DuplicateIdentifier(_)
        ));
    }

    #[test]
    fn test_duplicate_patch_implementation_dropped() {
        // Same full name and target under a fresh identifier: the second
        // definition claims the first one's patch.
        let mut dup = definition("a2", &[]);
        dup.full_name = "a".to_string();
        dup.target = TargetDescriptor::new("Host", "a", &[]);

        let catalog = HookCatalog::build(vec![definition("a", &[]), dup, definition("b", &[])]);

        assert_eq!(catalog.len(), 2);
        assert!(catalog.contains("a"));
        assert!(catalog.contains("b"));
        assert!(!catalog.contains("a2"));
        assert!(matches!(
            catalog.load_errors()[0],
            EngineError::DuplicateDefinition(_, _)
        ));
    }

    #[test]
    fn test_overloads_share_name() {
        let mut first = definition("dmg#1", &[]);
        first.name = "TakeDamage".to_string();
        first.full_name = "Player.TakeDamage".to_string();
        first.target = TargetDescriptor::new("Player", "TakeDamage", &["float"]);

        let mut second = definition("dmg#2", &[]);
        second.name = "TakeDamage".to_string();
        second.full_name = "Player.TakeDamage".to_string();
        second.target = TargetDescriptor::new("Player", "TakeDamage", &["float", "bool"]);

        let catalog = HookCatalog::build(vec![first, second]);

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.by_name("TakeDamage").len(), 2);
        assert_eq!(catalog.by_full_name("Player.TakeDamage").len(), 2);
    }

    #[test]
    fn test_pool_index() {
        let mut eager = definition("eager", &[]);
        eager.flags.unconditional = true;
        let mut fixed = definition("fixed", &[]);
        fixed.flags.static_site = true;

        let catalog = HookCatalog::build(vec![eager, fixed, definition("lazy", &[])]);

        assert_eq!(catalog.pool(HookPool::Unconditional), &["eager".to_string()]);
        assert_eq!(catalog.pool(HookPool::Static), &["fixed".to_string()]);
        assert_eq!(catalog.pool(HookPool::Demand), &["lazy".to_string()]);
    }

    #[test]
    fn test_cycle_detection() {
        let catalog = HookCatalog::build(vec![
            definition("a", &["b"]),
            definition("b", &["a"]),
            definition("c", &[]),
        ]);

        assert_eq!(catalog.cyclic_hooks(), vec!["a".to_string(), "b".to_string()]);
        // The catalog still loads in full.
        assert_eq!(catalog.len(), 3);
    }

    #[test]
    fn test_no_cycle_on_diamond() {
        let catalog = HookCatalog::build(vec![
            definition("base", &[]),
            definition("left", &["base"]),
            definition("right", &["base"]),
            definition("top", &["left", "right"]),
        ]);

        assert!(catalog.cyclic_hooks().is_empty());
    }
}
