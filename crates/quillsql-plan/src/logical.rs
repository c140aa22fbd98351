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

//! The closed set of logical step kinds and the `LogicalPlan` alias
//! over [`PlanDag`](crate::dag::PlanDag).

use quillsql_common::{ColumnIdentity, Schema};
use quillsql_expr::Expr;

use crate::dag::PlanDag;

pub type LogicalPlan = PlanDag<LogicalStep>;

/// Join kinds recognized by the logical plan; the physical planner
/// specializes these into concrete join operators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    LeftOuter,
    RightOuter,
    FullOuter,
    Cross,
    CrossUnnest,
    Semi,
    Anti,
}

/// Sort key: the expression to order by and its direction. Positional
/// `ORDER BY 1` is represented as an `Expr::Literal(Integer(1))` until the
/// binder-equivalent step resolves it against the
/// projection list; the `Sort`/`HeapSort` operators resolve it themselves.
#[derive(Clone, Debug, PartialEq)]
pub struct SortKey {
    pub expr: Expr,
    pub ascending: bool,
    pub nulls_first: bool,
}

/// A single step of the logical plan. `HeapSort` is optimizer-introduced
/// (never produced by the binder) and `Exit` is the unique terminal sink.
#[derive(Clone, Debug, PartialEq)]
pub enum LogicalStep {
    Project {
        /// `(target identity, expression)` pairs; wildcards are expanded
        /// by the (external) binder before reaching this core.
        expressions: Vec<(ColumnIdentity, Expr)>,
        output_schema: Schema,
    },
    Filter {
        condition: Expr,
        /// Populated by flatten-plan once consecutive same-junction
        /// filters are grouped; empty until then.
        condition_list: Vec<Expr>,
    },
    Union {
        output_schema: Schema,
    },
    Difference {
        output_schema: Schema,
    },
    Join {
        kind: JoinKind,
        /// `None` for `Cross`/`CrossUnnest` until predicate pushdown
        /// promotes a cross join to `Inner`.
        condition: Option<Expr>,
        output_schema: Schema,
    },
    Group {
        group_by: Vec<Expr>,
        output_schema: Schema,
    },
    Aggregate {
        group_by: Vec<Expr>,
        aggregates: Vec<(ColumnIdentity, Expr)>,
        output_schema: Schema,
    },
    Scan {
        relation: String,
        schema: Schema,
        /// Predicates pushed into this scan by predicate pushdown;
        /// populated by the optimizer, empty at binder time.
        predicates: Vec<Expr>,
        /// Column identities pushed by projection pushdown; `None` means
        /// "all columns of `schema`" (no pushdown has run yet).
        projected_columns: Option<Vec<ColumnIdentity>>,
        hints: Vec<String>,
    },
    Show {
        output_schema: Schema,
    },
    ShowColumns {
        relation: String,
        output_schema: Schema,
    },
    Set {
        variable: String,
        value: Expr,
    },
    Limit {
        limit: usize,
        offset: usize,
    },
    Order {
        order_by: Vec<SortKey>,
    },
    Distinct {
        /// Empty means "distinct on all columns".
        distinct_on: Vec<ColumnIdentity>,
    },
    /// Optimizer-introduced fusion of `Order` immediately followed by a
    /// zero-offset `Limit`.
    HeapSort {
        order_by: Vec<SortKey>,
        limit: usize,
    },
    Cte {
        name: String,
        output_schema: Schema,
    },
    Subquery {
        alias: String,
        output_schema: Schema,
    },
    Values {
        rows: Vec<Vec<Expr>>,
        output_schema: Schema,
    },
    Unnest {
        column: ColumnIdentity,
        output_schema: Schema,
    },
    GenerateSeries {
        start: Expr,
        stop: Expr,
        step: Expr,
        output_schema: Schema,
    },
    /// A synthetic relation used by planner unit tests and `EXPLAIN`
    /// fixtures to stand in for a scan without a real connector.
    Fake {
        schema: Schema,
        row_count: usize,
    },
    Explain {
        analyze: bool,
    },
    Exit,
    FunctionDataset {
        function_name: String,
        args: Vec<Expr>,
        output_schema: Schema,
        predicates: Vec<Expr>,
    },
}

impl LogicalStep {
    /// The relation name(s) this node itself introduces (used by
    /// predicate-tagging's `relations` set and by pushdown's "references a
    /// single relation" test). Non-leaf nodes return an empty slice; their
    /// relation set is the union of their descendants', computed by the
    /// pushdown strategy as it walks down.
    pub fn own_relation(&self) -> Option<&str> {
        match self {
            LogicalStep::Scan { relation, .. } => Some(relation),
            LogicalStep::Subquery { alias, .. } => Some(alias),
            LogicalStep::Cte { name, .. } => Some(name),
            _ => None,
        }
    }

    pub const fn is_scan_like(&self) -> bool {
        matches!(
            self,
            LogicalStep::Scan { .. } | LogicalStep::FunctionDataset { .. } | LogicalStep::Subquery { .. }
        )
    }

    /// `true` for a `Filter` whose condition folded to the literal
    /// `FALSE` — the physical planner replaces the subplan below with a
    /// `NullReader`.
    pub fn is_contradictory_filter(&self) -> bool {
        matches!(
            self,
            LogicalStep::Filter { condition, .. }
                if matches!(condition.as_literal(), Some(quillsql_common::Datum::Boolean(false)))
        )
    }
}
