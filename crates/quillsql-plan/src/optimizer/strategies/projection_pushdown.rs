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

//! Projection pushdown: walks the plan from each exit point toward
//! its entries, accumulating every column identity referenced by the nodes
//! it passes through, and at each `Scan` restricts `projected_columns` to
//! the identities actually needed above it. Implemented entirely in
//! `complete` (rather than `visit`, which DFS's producer-first node order
//! makes the wrong direction for "what does everything downstream of me
//! need") — see `predicate_pushdown`'s module doc for the same shape.

use hashbrown::HashSet;

use quillsql_common::{ColumnIdentity, QueryProperties, Result};

use crate::dag::NodeId;
use crate::logical::{LogicalPlan, LogicalStep};
use crate::optimizer::Strategy;

#[derive(Default)]
pub struct ProjectionPushdown;

impl Strategy for ProjectionPushdown {
    fn name(&self) -> &'static str {
        "projection_pushdown"
    }

    fn visit(&mut self, _plan: &mut LogicalPlan, _node: NodeId, _props: &QueryProperties) -> Result<()> {
        Ok(())
    }

    fn complete(&mut self, plan: &mut LogicalPlan, _props: &QueryProperties) -> Result<()> {
        for exit in plan.get_exit_points() {
            walk(plan, exit, HashSet::new())?;
        }
        Ok(())
    }
}

fn walk(plan: &mut LogicalPlan, node_id: NodeId, needed: HashSet<ColumnIdentity>) -> Result<()> {
    let Some(step) = plan.node(node_id).cloned() else {
        return Ok(());
    };

    let mut propagate = needed;
    match &step {
        LogicalStep::Project { expressions, .. } => {
            for (_, expr) in expressions {
                propagate.extend(expr.identities());
            }
        }
        LogicalStep::Filter { condition, condition_list } => {
            propagate.extend(condition.identities());
            for c in condition_list {
                propagate.extend(c.identities());
            }
        }
        LogicalStep::Join { condition: Some(c), .. } => propagate.extend(c.identities()),
        LogicalStep::Group { group_by, .. } => {
            for e in group_by {
                propagate.extend(e.identities());
            }
        }
        LogicalStep::Aggregate { group_by, aggregates, .. } => {
            for e in group_by {
                propagate.extend(e.identities());
            }
            for (_, e) in aggregates {
                propagate.extend(e.identities());
            }
        }
        LogicalStep::Order { order_by } | LogicalStep::HeapSort { order_by, .. } => {
            for key in order_by {
                propagate.extend(key.expr.identities());
            }
        }
        LogicalStep::Distinct { distinct_on } => propagate.extend(distinct_on.iter().cloned()),
        LogicalStep::Set { value, .. } => propagate.extend(value.identities()),
        _ => {}
    }

    if let LogicalStep::Scan { schema, .. } = &step {
        let wanted: Vec<ColumnIdentity> = schema
            .fields()
            .iter()
            .map(|f| f.identity.clone())
            .filter(|id| propagate.contains(id))
            .collect();
        if let Some(LogicalStep::Scan { projected_columns, .. }) = plan.node_mut(node_id) {
            *projected_columns = Some(wanted);
        }
    }

    for (src, _) in plan.ingoing_edges(node_id) {
        walk(plan, src, propagate.clone())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use quillsql_common::{DataType, Field, QueryProperties, Schema};
    use quillsql_expr::Expr;

    use super::*;
    use crate::dag::EdgeLabel;

    fn scan_schema() -> Schema {
        Schema::new(vec![
            Field::new("t.a", "a", DataType::Integer),
            Field::new("t.b", "b", DataType::Varchar),
        ])
    }

    #[test]
    fn scan_is_restricted_to_columns_used_above() {
        let mut plan = LogicalPlan::new();
        let scan = plan.add_node(LogicalStep::Scan {
            relation: "t".into(),
            schema: scan_schema(),
            predicates: Vec::new(),
            projected_columns: None,
            hints: Vec::new(),
        });
        let project = plan.add_node(LogicalStep::Project {
            expressions: vec![("t.a".into(), Expr::Identifier("t.a".into()))],
            output_schema: Schema::new(vec![Field::new("t.a", "a", DataType::Integer)]),
        });
        let exit = plan.add_node(LogicalStep::Exit);
        plan.add_edge(scan, project, EdgeLabel::None).unwrap();
        plan.add_edge(project, exit, EdgeLabel::None).unwrap();

        let props = QueryProperties::new("q1");
        let mut strategy = ProjectionPushdown;
        strategy.complete(&mut plan, &props).unwrap();

        let Some(LogicalStep::Scan { projected_columns, .. }) = plan.node(scan) else {
            panic!("expected scan node");
        };
        assert_eq!(projected_columns.as_deref(), Some(&[ColumnIdentity::new("t.a")][..]));
    }

    #[test]
    fn filter_column_is_included_even_when_not_projected() {
        let mut plan = LogicalPlan::new();
        let scan = plan.add_node(LogicalStep::Scan {
            relation: "t".into(),
            schema: scan_schema(),
            predicates: Vec::new(),
            projected_columns: None,
            hints: Vec::new(),
        });
        let filter = plan.add_node(LogicalStep::Filter {
            condition: Expr::compare(
                quillsql_expr::CompareOp::Gt,
                Expr::Identifier("t.b".into()),
                Expr::Literal(quillsql_common::Datum::Varchar("x".into())),
            ),
            condition_list: Vec::new(),
        });
        let project = plan.add_node(LogicalStep::Project {
            expressions: vec![("t.a".into(), Expr::Identifier("t.a".into()))],
            output_schema: Schema::new(vec![Field::new("t.a", "a", DataType::Integer)]),
        });
        let exit = plan.add_node(LogicalStep::Exit);
        plan.add_edge(scan, filter, EdgeLabel::None).unwrap();
        plan.add_edge(filter, project, EdgeLabel::None).unwrap();
        plan.add_edge(project, exit, EdgeLabel::None).unwrap();

        let props = QueryProperties::new("q1");
        let mut strategy = ProjectionPushdown;
        strategy.complete(&mut plan, &props).unwrap();

        let Some(LogicalStep::Scan { projected_columns, .. }) = plan.node(scan) else {
            panic!("expected scan node");
        };
        let cols = projected_columns.as_deref().unwrap();
        assert!(cols.contains(&ColumnIdentity::new("t.a")));
        assert!(cols.contains(&ColumnIdentity::new("t.b")));
    }
}
