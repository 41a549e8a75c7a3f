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

//! Dependency resolution
//!
//! Pure traversals over the dependency declarations in the catalog.
//! Both directions use a visited set, so cyclic declarations degrade to
//! include-once set semantics instead of recursing forever.

use crate::catalog::HookCatalog;
use std::collections::{HashSet, VecDeque};

/// Resolves transitive dependency relations against a catalog.
pub struct DependencyResolver<'a> {
    catalog: &'a HookCatalog,
}

impl<'a> DependencyResolver<'a> {
    /// Create a resolver over a catalog.
    pub fn new(catalog: &'a HookCatalog) -> Self {
        Self { catalog }
    }

    /// Transitive dependencies of a hook, leaves first.
    ///
    /// Post-order, so a dependency always precedes its dependents in the
    /// returned list and installs can be queued in that order. The start
    /// hook itself is never included, even when a cycle loops back to it.
    /// A dependency name matching zero hooks is skipped.
    pub fn ancestors(&self, identifier: &str) -> Vec<String> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(identifier.to_string());
        let mut out = Vec::new();
        self.walk_ancestors(identifier, &mut visited, &mut out);
        out
    }

    fn walk_ancestors(&self, identifier: &str, visited: &mut HashSet<String>, out: &mut Vec<String>) {
        let Some(def) = self.catalog.get(identifier) else {
            return;
        };
        for dep_name in &def.dependencies {
            let dep_ids = self.catalog.by_full_name(dep_name);
            if dep_ids.is_empty() {
                tracing::warn!(
                    hook = %identifier,
                    dependency = %dep_name,
                    "Dependency matches no hook, skipped"
                );
                continue;
            }
            for dep_id in dep_ids {
                if visited.insert(dep_id.clone()) {
                    self.walk_ancestors(dep_id, visited, out);
                    out.push(dep_id.clone());
                }
            }
        }
    }

    /// Hooks that transitively depend on a hook, nearest first.
    ///
    /// Breadth-first over the reverse dependency relation; the start hook
    /// itself is never included.
    pub fn descendants(&self, identifier: &str) -> Vec<String> {
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(identifier.to_string());
        let mut out = Vec::new();
        let mut frontier: VecDeque<String> = VecDeque::new();
        frontier.push_back(identifier.to_string());

        while let Some(id) = frontier.pop_front() {
            for dependent in self.direct_dependents(&id) {
                if visited.insert(dependent.clone()) {
                    out.push(dependent.clone());
                    frontier.push_back(dependent);
                }
            }
        }
        out
    }

    /// Hooks whose declared dependencies name this hook directly.
    fn direct_dependents(&self, identifier: &str) -> Vec<String> {
        let Some(def) = self.catalog.get(identifier) else {
            return Vec::new();
        };
        self.catalog
            .ids()
            .filter(|candidate| {
                self.catalog
                    .get(candidate)
                    .is_some_and(|c| c.dependencies.contains(&def.full_name))
            })
            .map(str::to_string)
            .collect()
    }
}
