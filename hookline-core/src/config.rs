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

//! Engine configuration

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// How far a subscription propagates through the dependency graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentPolicy {
    /// Also subscribe every hook layered on top of the requested one.
    /// Availability-favoring; the engine's historical behavior.
    #[default]
    Propagate,
    /// Subscribe prerequisites only; a dependent activates once it gains
    /// a direct consumer of its own.
    AncestorsOnly,
}

/// Configuration for the interception engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum queue entries reconciled per tick. Bounds the cost paid
    /// inside the host's update callback.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: usize,

    /// Descendant propagation policy for subscribe/unsubscribe.
    #[serde(default)]
    pub dependent_policy: DependentPolicy,

    /// Reserved subscriber id that pins unconditional and static hooks.
    #[serde(default = "default_core_subscriber")]
    pub core_subscriber: String,
}

fn default_batch_limit() -> usize {
    crate::DEFAULT_BATCH_LIMIT
}

fn default_core_subscriber() -> String {
    crate::CORE_SUBSCRIBER.to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_limit: default_batch_limit(),
            dependent_policy: DependentPolicy::default(),
            core_subscriber: default_core_subscriber(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from a JSON string.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::ConfigParse(e.to_string()))
    }

    /// Parse a configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> EngineResult<Self> {
        toml::from_str(toml_str).map_err(|e| EngineError::ConfigParse(e.to_string()))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.batch_limit == 0 {
            return Err(EngineError::InvalidConfig(
                "batch_limit must be at least 1".to_string(),
            ));
        }
        if self.core_subscriber.is_empty() {
            return Err(EngineError::InvalidConfig(
                "core_subscriber must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_limit, crate::DEFAULT_BATCH_LIMIT);
        assert_eq!(config.dependent_policy, DependentPolicy::Propagate);
        assert_eq!(config.core_subscriber, crate::CORE_SUBSCRIBER);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json() {
        let config =
            EngineConfig::from_json(r#"{"batch_limit": 4, "dependent_policy": "ancestors_only"}"#)
                .unwrap();
        assert_eq!(config.batch_limit, 4);
        assert_eq!(config.dependent_policy, DependentPolicy::AncestorsOnly);
        assert_eq!(config.core_subscriber, crate::CORE_SUBSCRIBER);
    }

    #[test]
    fn test_from_toml() {
        let config = EngineConfig::from_toml("batch_limit = 8\n").unwrap();
        assert_eq!(config.batch_limit, 8);
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            EngineConfig::from_json("{not json"),
            Err(EngineError::ConfigParse(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let config = EngineConfig {
            batch_limit: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
