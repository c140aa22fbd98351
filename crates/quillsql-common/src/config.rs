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

//! Configuration consumed by the core and the per-query properties the
//! binder hands to the optimizer/executor.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The enumerated configuration options controlling batch size, worker
/// and read concurrency, buffer capacity and cache failure tolerance.
/// Deserializable from the same session-variable map the (external)
/// binder already produces.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    pub internal_batch_size: usize,
    pub concurrent_workers: usize,
    pub concurrent_reads: usize,
    pub max_read_buffer_capacity: usize,
    pub max_consecutive_cache_failures: u32,
    pub only_push_equals_predicates: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            internal_batch_size: 500,
            concurrent_workers: default_concurrent_workers(),
            concurrent_reads: 4,
            max_read_buffer_capacity: 64 * 1024 * 1024,
            max_consecutive_cache_failures: 10,
            only_push_equals_predicates: false,
        }
    }
}

fn default_concurrent_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Identifies a query for statistics and cache scoping.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryId(pub String);

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything the optimizer and executor need that is not part of the
/// plan DAG itself: query id, session variables, and configuration.
#[derive(Clone, Debug)]
pub struct QueryProperties {
    pub qid: QueryId,
    pub session_variables: HashMap<String, String>,
    pub config: ExecutionConfig,
}

impl QueryProperties {
    pub fn new(qid: impl Into<String>) -> Self {
        Self {
            qid: QueryId(qid.into()),
            session_variables: HashMap::new(),
            config: ExecutionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutionConfig) -> Self {
        self.config = config;
        self
    }
}

/// The output shape of the core is either a lazy sequence of batches
/// (`Tabular`) or a single status row (`NonTabular`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResultType {
    Tabular,
    NonTabular,
}
