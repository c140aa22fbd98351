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

//! Plan flattening: a chain of consecutive `Filter` nodes — left
//! behind by split-conjuncts, or by predicate-pushdown re-inserting several
//! unpushed predicates above the same scan — collapses into a single
//! `Filter` whose `condition_list` holds every collected condition in
//! top-down (producer-to-consumer) order. Implemented by walking each exit
//! point back toward its entries, same shape as `predicate_pushdown`, so a
//! branch (a join's two legs) accumulates independently rather than
//! sharing one global buffer across unrelated chains.

use quillsql_common::{QueryProperties, Result};
use quillsql_expr::Expr;

use crate::dag::NodeId;
use crate::logical::{LogicalPlan, LogicalStep};
use crate::optimizer::Strategy;

#[derive(Default)]
pub struct FlattenPlan;

impl Strategy for FlattenPlan {
    fn name(&self) -> &'static str {
        "flatten_plan"
    }

    fn visit(&mut self, _plan: &mut LogicalPlan, _node: NodeId, _props: &QueryProperties) -> Result<()> {
        Ok(())
    }

    fn complete(&mut self, plan: &mut LogicalPlan, _props: &QueryProperties) -> Result<()> {
        for exit in plan.get_exit_points() {
            walk(plan, exit, Vec::new())?;
        }
        Ok(())
    }
}

/// `pending` holds every condition collected so far from nodes closer to
/// the exit than `node_id`, in top-down order (the order they will end up
/// in the merged `condition_list`).
fn walk(plan: &mut LogicalPlan, node_id: NodeId, pending: Vec<Expr>) -> Result<()> {
    let Some(step) = plan.node(node_id).cloned() else {
        return Ok(());
    };

    match step {
        LogicalStep::Filter { condition, condition_list } => {
            let mut merged = if condition_list.is_empty() { vec![condition] } else { condition_list };
            merged.extend(pending);
            let ingoing = plan.ingoing_edges(node_id);
            plan.remove_node_heal(node_id)?;
            if let Some((src, _)) = ingoing.into_iter().next() {
                walk(plan, src, merged)?;
            }
        }
        _ => {
            match pending.len() {
                0 => {}
                1 => {
                    let new_id = plan.reserve_node_id();
                    plan.insert_node_after(
                        new_id,
                        LogicalStep::Filter {
                            condition: pending.into_iter().next().expect("len checked above"),
                            condition_list: Vec::new(),
                        },
                        node_id,
                    )?;
                }
                _ => {
                    let combined = pending
                        .iter()
                        .cloned()
                        .reduce(Expr::and)
                        .expect("len > 1 checked above");
                    let new_id = plan.reserve_node_id();
                    plan.insert_node_after(
                        new_id,
                        LogicalStep::Filter {
                            condition: combined,
                            condition_list: pending,
                        },
                        node_id,
                    )?;
                }
            }
            for (src, _) in plan.ingoing_edges(node_id) {
                walk(plan, src, Vec::new())?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use quillsql_common::{Datum, QueryProperties, Schema};
    use quillsql_expr::CompareOp;

    use super::*;
    use crate::dag::EdgeLabel;

    fn filter(name: &str, threshold: i64) -> LogicalStep {
        LogicalStep::Filter {
            condition: Expr::compare(CompareOp::Gt, Expr::Identifier(name.into()), Expr::Literal(Datum::Integer(threshold))),
            condition_list: Vec::new(),
        }
    }

    #[test]
    fn consecutive_filters_merge_preserving_top_down_order() {
        let mut plan = LogicalPlan::new();
        let scan = plan.add_node(LogicalStep::Scan {
            relation: "t".into(),
            schema: Schema::empty(),
            predicates: Vec::new(),
            projected_columns: None,
            hints: Vec::new(),
        });
        let f1 = plan.add_node(filter("t.a", 1));
        let f2 = plan.add_node(filter("t.b", 2));
        let f3 = plan.add_node(filter("t.c", 3));
        let exit = plan.add_node(LogicalStep::Exit);
        plan.add_edge(scan, f1, EdgeLabel::None).unwrap();
        plan.add_edge(f1, f2, EdgeLabel::None).unwrap();
        plan.add_edge(f2, f3, EdgeLabel::None).unwrap();
        plan.add_edge(f3, exit, EdgeLabel::None).unwrap();

        let props = QueryProperties::new("q1");
        let mut strategy = FlattenPlan;
        strategy.complete(&mut plan, &props).unwrap();

        assert_eq!(plan.node_count(), 3);
        let merged_id = plan.outgoing_edges(scan)[0].0;
        let Some(LogicalStep::Filter { condition_list, .. }) = plan.node(merged_id) else {
            panic!("expected merged filter node");
        };
        assert_eq!(condition_list.len(), 3);
        assert_eq!(condition_list[0], Expr::compare(CompareOp::Gt, Expr::Identifier("t.a".into()), Expr::Literal(Datum::Integer(1))));
        assert_eq!(condition_list[1], Expr::compare(CompareOp::Gt, Expr::Identifier("t.b".into()), Expr::Literal(Datum::Integer(2))));
        assert_eq!(condition_list[2], Expr::compare(CompareOp::Gt, Expr::Identifier("t.c".into()), Expr::Literal(Datum::Integer(3))));
    }

    #[test]
    fn single_filter_is_left_without_a_condition_list() {
        let mut plan = LogicalPlan::new();
        let scan = plan.add_node(LogicalStep::Scan {
            relation: "t".into(),
            schema: Schema::empty(),
            predicates: Vec::new(),
            projected_columns: None,
            hints: Vec::new(),
        });
        let f1 = plan.add_node(filter("t.a", 1));
        let exit = plan.add_node(LogicalStep::Exit);
        plan.add_edge(scan, f1, EdgeLabel::None).unwrap();
        plan.add_edge(f1, exit, EdgeLabel::None).unwrap();

        let props = QueryProperties::new("q1");
        let mut strategy = FlattenPlan;
        strategy.complete(&mut plan, &props).unwrap();

        let merged_id = plan.outgoing_edges(scan)[0].0;
        let Some(LogicalStep::Filter { condition_list, .. }) = plan.node(merged_id) else {
            panic!("expected filter node");
        };
        assert!(condition_list.is_empty());
    }
}
