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

//! The physical operator *kinds*: the structural description the
//! physical planner produces from a logical plan. `quillsql-exec` walks a
//! `PhysicalPlan` and instantiates one live operator object per node,
//! dispatching each node kind to its own operator implementation.

use quillsql_common::{ColumnIdentity, ConnectorDescriptor, Schema};
use quillsql_expr::Expr;

use crate::dag::PlanDag;
use crate::logical::{JoinKind, SortKey};

pub type PhysicalPlan = PlanDag<PhysicalNode>;

/// Concrete join specialization chosen by the physical planner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinStrategy {
    Inner,
    Outer,
    NestedLoop,
    NonEqui,
    Cross,
    Unnest,
    /// Semi (`kind.negated == false`) or Anti (`true`) filter join.
    FilterJoin { negated: bool },
}

impl JoinStrategy {
    /// Maps a logical join kind to its physical specialization, given
    /// whether the condition is a pure equi-condition.
    pub fn from_logical(kind: JoinKind, condition: &Option<Expr>, is_equi: bool) -> Self {
        match kind {
            JoinKind::Cross => JoinStrategy::Cross,
            JoinKind::CrossUnnest => JoinStrategy::Unnest,
            JoinKind::Semi => JoinStrategy::FilterJoin { negated: false },
            JoinKind::Anti => JoinStrategy::FilterJoin { negated: true },
            JoinKind::Inner | JoinKind::LeftOuter | JoinKind::RightOuter | JoinKind::FullOuter => {
                if condition.is_none() {
                    JoinStrategy::NestedLoop
                } else if is_equi {
                    if matches!(kind, JoinKind::Inner) {
                        JoinStrategy::Inner
                    } else {
                        JoinStrategy::Outer
                    }
                } else {
                    JoinStrategy::NonEqui
                }
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScanDescriptor {
    pub connector: ConnectorDescriptor,
    pub predicates: Vec<Expr>,
    pub projected_columns: Option<Vec<ColumnIdentity>>,
    pub restricted_schema: Schema,
    pub hints: Vec<String>,
}

/// One physical operator kind, 1:1 with a physical planner output node.
#[derive(Clone, Debug, PartialEq)]
pub enum PhysicalNode {
    Reader {
        scan: ScanDescriptor,
        is_async: bool,
    },
    /// Replaces a scan whose predicate folded to a provable contradiction.
    NullReader {
        schema: Schema,
    },
    Filter {
        condition: Expr,
        condition_list: Vec<Expr>,
    },
    Projection {
        expressions: Vec<(ColumnIdentity, Expr)>,
        output_schema: Schema,
    },
    Sort {
        order_by: Vec<SortKey>,
    },
    HeapSort {
        order_by: Vec<SortKey>,
        limit: usize,
    },
    Limit {
        limit: usize,
        offset: usize,
    },
    Distinct {
        distinct_on: Vec<ColumnIdentity>,
    },
    Union {
        output_schema: Schema,
    },
    SimpleAggregate {
        aggregates: Vec<(ColumnIdentity, Expr)>,
        output_schema: Schema,
    },
    AggregateAndGroup {
        group_by: Vec<Expr>,
        aggregates: Vec<(ColumnIdentity, Expr)>,
        output_schema: Schema,
        max_buffer_size: usize,
    },
    Join {
        strategy: JoinStrategy,
        condition: Option<Expr>,
        output_schema: Schema,
    },
    Exit,
    Explain {
        analyze: bool,
        rendered_plan: String,
    },
    ShowColumns {
        relation: String,
        output_schema: Schema,
    },
    ShowCreate {
        relation: String,
    },
    ShowValue {
        value: String,
    },
    SetVariable {
        variable: String,
        value: Expr,
    },
    Values {
        rows: Vec<Vec<Expr>>,
        output_schema: Schema,
    },
    GenerateSeries {
        start: Expr,
        stop: Expr,
        step: Expr,
        output_schema: Schema,
    },
}

impl PhysicalNode {
    pub const fn is_join(&self) -> bool {
        matches!(self, PhysicalNode::Join { .. })
    }

    /// Whether two instances can legally process disjoint input
    /// partitions in parallel: true for projection and filter, false for
    /// everything that keeps cross-batch state.
    pub const fn is_stateless(&self) -> bool {
        matches!(
            self,
            PhysicalNode::Filter { .. } | PhysicalNode::Projection { .. } | PhysicalNode::Exit
        )
    }
}
