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

//! Physical operators, the memory pool, the cache/KV store
//! contract, and the execution engine that together drive a
//! [`quillsql_plan::physical::PhysicalPlan`] over columnar batches.

pub mod cache;
pub mod engine;
pub mod join;
pub mod operator;
pub mod operators;
pub mod pool;
pub mod statistics;

pub use cache::{CircuitBreakingStore, KeyValueStore, LruKStore, NullStore};
pub use engine::{result_type, validate_physical_plan, ParallelEngine, SerialEngine};
pub use operator::{call_with_sensors, pump_with_sensors, ExecutionContext, Operator, StreamEvent};
pub use operators::{build_operator, DataSourceFactory};
pub use pool::{AsyncMemoryPool, MemoryPool, PoolRef, PoolView};
pub use statistics::StatisticsRegistry;
