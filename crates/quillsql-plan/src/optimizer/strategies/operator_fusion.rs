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

//! Operator fusion: an `Order` node whose single consumer is a
//! zero-offset `Limit` is replaced by a single `HeapSort` node, letting the
//! executor keep only `limit` rows in a heap instead of sorting the whole
//! input. An offset disqualifies the fusion — a heap can produce the
//! smallest/largest `limit` rows cheaply, but not the *next* `offset` of
//! them without sorting in full anyway.

use quillsql_common::{QueryProperties, Result};

use crate::dag::NodeId;
use crate::logical::{LogicalPlan, LogicalStep};
use crate::optimizer::Strategy;

pub struct OperatorFusion;

impl Strategy for OperatorFusion {
    fn name(&self) -> &'static str {
        "operator_fusion"
    }

    fn visit(&mut self, plan: &mut LogicalPlan, node: NodeId, _props: &QueryProperties) -> Result<()> {
        let Some(LogicalStep::Order { order_by }) = plan.node(node).cloned() else {
            return Ok(());
        };
        let outgoing = plan.outgoing_edges(node);
        let [(next_id, _)] = outgoing.as_slice() else {
            return Ok(());
        };
        let Some(LogicalStep::Limit { limit, offset }) = plan.node(*next_id).cloned() else {
            return Ok(());
        };
        if offset != 0 {
            return Ok(());
        }
        if let Some(slot) = plan.node_mut(*next_id) {
            *slot = LogicalStep::HeapSort { order_by, limit };
        }
        plan.remove_node_heal(node)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use quillsql_common::{QueryProperties, Schema};
    use quillsql_expr::Expr;

    use super::*;
    use crate::dag::EdgeLabel;
    use crate::logical::SortKey;
    use crate::optimizer::run_strategy;

    fn sort_key() -> SortKey {
        SortKey {
            expr: Expr::Identifier("t.a".into()),
            ascending: true,
            nulls_first: false,
        }
    }

    #[test]
    fn order_followed_by_zero_offset_limit_fuses_into_heap_sort() {
        let mut plan = LogicalPlan::new();
        let scan = plan.add_node(LogicalStep::Scan {
            relation: "t".into(),
            schema: Schema::empty(),
            predicates: Vec::new(),
            projected_columns: None,
            hints: Vec::new(),
        });
        let order = plan.add_node(LogicalStep::Order {
            order_by: vec![sort_key()],
        });
        let limit = plan.add_node(LogicalStep::Limit { limit: 10, offset: 0 });
        let exit = plan.add_node(LogicalStep::Exit);
        plan.add_edge(scan, order, EdgeLabel::None).unwrap();
        plan.add_edge(order, limit, EdgeLabel::None).unwrap();
        plan.add_edge(limit, exit, EdgeLabel::None).unwrap();

        let props = QueryProperties::new("q1");
        let mut strategy = OperatorFusion;
        run_strategy(&mut strategy, &mut plan, &props).unwrap();

        assert_eq!(plan.node_count(), 3);
        assert!(plan.node(order).is_none());
        assert!(matches!(
            plan.node(limit),
            Some(LogicalStep::HeapSort { limit: 10, .. })
        ));
        assert_eq!(plan.outgoing_edges(scan), vec![(limit, EdgeLabel::None)]);
    }

    #[test]
    fn order_followed_by_limit_with_offset_is_not_fused() {
        let mut plan = LogicalPlan::new();
        let scan = plan.add_node(LogicalStep::Scan {
            relation: "t".into(),
            schema: Schema::empty(),
            predicates: Vec::new(),
            projected_columns: None,
            hints: Vec::new(),
        });
        let order = plan.add_node(LogicalStep::Order {
            order_by: vec![sort_key()],
        });
        let limit = plan.add_node(LogicalStep::Limit { limit: 10, offset: 5 });
        let exit = plan.add_node(LogicalStep::Exit);
        plan.add_edge(scan, order, EdgeLabel::None).unwrap();
        plan.add_edge(order, limit, EdgeLabel::None).unwrap();
        plan.add_edge(limit, exit, EdgeLabel::None).unwrap();

        let props = QueryProperties::new("q1");
        let mut strategy = OperatorFusion;
        run_strategy(&mut strategy, &mut plan, &props).unwrap();

        assert!(plan.node(order).is_some());
        assert!(matches!(plan.node(limit), Some(LogicalStep::Limit { .. })));
    }
}
