// Copyright 2024 Quill Data Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The closed error taxonomy shared by every crate in the query core.
//!
//! Operators and strategies return `Result<T, QuillError>` rather than
//! panicking; panics are reserved for invariant violations that indicate a
//! bug rather than a data- or user-caused failure (see
//! [`QuillError::InvalidInternalState`]).

use std::fmt;

pub type Result<T, E = QuillError> = std::result::Result<T, E>;

/// Closed set of error kinds surfaced by the core. Mirrors the taxonomy a
/// bound plan can raise once binding has already succeeded: everything here
/// is an execution-time failure, not a parse or type-resolution failure.
#[derive(thiserror::Error, Debug)]
pub enum QuillError {
    #[error("SQL error: {0}")]
    Sql(String),

    #[error("column not found: {identity}")]
    ColumnNotFound { identity: String },

    #[error("unsupported syntax: {0}")]
    UnsupportedSyntax(String),

    #[error("incompatible types: {left} vs {right} in {context}")]
    IncompatibleTypes {
        left: String,
        right: String,
        context: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("missing dependency: {0}")]
    MissingDependency(String),

    #[error("unmet requirement: {0}")]
    UnmetRequirement(String),

    #[error("dataset not found: {0}")]
    DatasetNotFound(String),

    #[error("permission denied: {0}")]
    Permissions(String),

    /// Invariant violation: cyclic plan, memory-pool accounting drift,
    /// morsel-accounting drift. Always aborts the query; never recoverable.
    #[error("invalid internal state: {0}")]
    InvalidInternalState(String),
}

impl QuillError {
    pub fn sql(msg: impl fmt::Display) -> Self {
        Self::Sql(msg.to_string())
    }

    pub fn column_not_found(identity: impl Into<String>) -> Self {
        Self::ColumnNotFound {
            identity: identity.into(),
        }
    }

    pub fn unsupported_syntax(msg: impl fmt::Display) -> Self {
        Self::UnsupportedSyntax(msg.to_string())
    }

    pub fn incompatible_types(
        left: impl fmt::Display,
        right: impl fmt::Display,
        context: impl fmt::Display,
    ) -> Self {
        Self::IncompatibleTypes {
            left: left.to_string(),
            right: right.to_string(),
            context: context.to_string(),
        }
    }

    pub fn invalid_internal_state(msg: impl fmt::Display) -> Self {
        Self::InvalidInternalState(msg.to_string())
    }

    /// `true` for [`QuillError::InvalidInternalState`]: the engine must abort
    /// the query rather than attempt to surface it as a user-facing result.
    pub fn is_fatal_bug(&self) -> bool {
        matches!(self, QuillError::InvalidInternalState(_))
    }
}
