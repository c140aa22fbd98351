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

//! The plan DAG, the optimizer pipeline, and the physical planner
//! that together turn a logical plan into the physical operator
//! graph `quillsql-exec` runs.

pub mod dag;
pub mod logical;
pub mod optimizer;
pub mod physical;
pub mod physical_planner;

pub use dag::{EdgeLabel, NodeId, PlanDag};
pub use logical::{JoinKind, LogicalPlan, LogicalStep, SortKey};
pub use optimizer::StrategyRunner;
pub use physical::{JoinStrategy, PhysicalNode, PhysicalPlan, ScanDescriptor};
pub use physical_planner::{build_physical_plan, resolve_null_readers, ConnectorCatalog};
