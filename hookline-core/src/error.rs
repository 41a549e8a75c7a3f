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

//! Engine error types

use thiserror::Error;

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in the interception engine
#[derive(Debug, Error)]
pub enum EngineError {
    // Catalog load errors
    #[error("Duplicate hook identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("Hook {0} claims the patch implementation already owned by {1}")]
    DuplicateDefinition(String, String),

    // Configuration errors
    #[error("Config parse error: {0}")]
    ConfigParse(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),
}
