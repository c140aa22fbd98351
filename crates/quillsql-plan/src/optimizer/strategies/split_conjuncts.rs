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

//! Split conjunctive predicates: every `Filter` whose condition is
//! `A AND B` becomes a chain of single-condition `Filter`s, so smaller
//! predicates can move further during pushdown. Recurses into nested
//! `AND`s (`Expr::split_conjuncts` already does this, see SPEC_FULL.md),
//! so `a AND b AND c` fully flattens in one pass.

use quillsql_common::{QueryProperties, Result};

use crate::dag::{EdgeLabel, NodeId};
use crate::logical::{LogicalPlan, LogicalStep};
use crate::optimizer::Strategy;

#[derive(Default)]
pub struct SplitConjuncts;

impl Strategy for SplitConjuncts {
    fn name(&self) -> &'static str {
        "split_conjuncts"
    }

    fn visit(&mut self, plan: &mut LogicalPlan, node: NodeId, _props: &QueryProperties) -> Result<()> {
        let Some(LogicalStep::Filter { condition, .. }) = plan.node(node) else {
            return Ok(());
        };
        let conjuncts: Vec<_> = condition.split_conjuncts().into_iter().cloned().collect();
        if conjuncts.len() <= 1 {
            return Ok(());
        }

        // `node` keeps its identity and incoming edges, carrying the
        // first conjunct; a fresh Filter is appended per remaining
        // conjunct, and the original outgoing edges are moved onto the
        // tail of the new chain.
        let outgoing = plan.outgoing_edges(node);
        if let Some(LogicalStep::Filter { condition, .. }) = plan.node_mut(node) {
            *condition = conjuncts[0].clone();
        }
        for (dst, _) in &outgoing {
            plan.remove_edge(node, *dst);
        }

        let mut tail = node;
        for conjunct in &conjuncts[1..] {
            let new_id = plan.add_node(LogicalStep::Filter {
                condition: conjunct.clone(),
                condition_list: Vec::new(),
            });
            plan.add_edge(tail, new_id, EdgeLabel::None)?;
            tail = new_id;
        }
        for (dst, label) in &outgoing {
            plan.add_edge(tail, *dst, *label)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use quillsql_common::{DataType, Datum};
    use quillsql_expr::{CompareOp, Expr};

    use super::*;
    use crate::optimizer::run_strategy;

    fn cmp(col: &str, op: CompareOp, v: i64) -> Expr {
        Expr::compare(op, Expr::Identifier(col.into()), Expr::Literal(Datum::Integer(v)))
    }

    #[test]
    fn splits_three_way_conjunction_into_chain() {
        let mut plan = LogicalPlan::new();
        let scan = plan.add_node(LogicalStep::Scan {
            relation: "t".into(),
            schema: quillsql_common::Schema::new(vec![quillsql_common::Field::new("t.a", "a", DataType::Integer)]),
            predicates: Vec::new(),
            projected_columns: None,
            hints: Vec::new(),
        });
        let condition = Expr::and(
            Expr::and(cmp("t.a", CompareOp::Gt, 1), cmp("t.b", CompareOp::Lt, 2)),
            cmp("t.c", CompareOp::Eq, 3),
        );
        let filter = plan.add_node(LogicalStep::Filter {
            condition,
            condition_list: Vec::new(),
        });
        let exit = plan.add_node(LogicalStep::Exit);
        plan.add_edge(scan, filter, EdgeLabel::None).unwrap();
        plan.add_edge(filter, exit, EdgeLabel::None).unwrap();

        let props = QueryProperties::new("q");
        let mut strategy = SplitConjuncts::default();
        run_strategy(&mut strategy, &mut plan, &props).unwrap();

        let filters: Vec<_> = plan
            .node_ids()
            .filter(|id| matches!(plan.node(*id), Some(LogicalStep::Filter { .. })))
            .collect();
        assert_eq!(filters.len(), 3);
        assert!(plan.is_acyclic());
        assert_eq!(plan.get_exit_points(), vec![exit]);

        // Re-running on a fixed point is a no-op.
        let mut strategy2 = SplitConjuncts::default();
        run_strategy(&mut strategy2, &mut plan, &props).unwrap();
        let filters_again: Vec<_> = plan
            .node_ids()
            .filter(|id| matches!(plan.node(*id), Some(LogicalStep::Filter { .. })))
            .collect();
        assert_eq!(filters_again.len(), 3);
    }
}
