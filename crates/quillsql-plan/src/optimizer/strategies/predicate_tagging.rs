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

//! Predicate tagging: the final strategy in the
//! pipeline. A `Filter` whose `condition_list` holds more than one
//! conjunct is stably sorted by an estimated evaluation weight, cheapest
//! first, so the executor's row loop short-circuits on the predicates most
//! likely to reject a row for the least work.
//!
//! Weights (lowest first): an equality/inequality against a literal is
//! cheap (5); `IS`/`IS NOT` is almost as cheap (7); `LIKE`/`ILIKE` pattern
//! matching costs more (16); anything involving a function call is the
//! most expensive shape in the closed set (35); everything else (range
//! comparisons, nested booleans, `IN` lists) sits in between (25). A
//! stable sort means conjuncts already tied on weight keep their original
//! relative order, which is what makes a chain like `a > 1 AND b < 2 AND
//! c = 3` come out `c = 3, a > 1, b < 2` rather than reshuffling the tied
//! `a > 1`/`b < 2` pair.

use quillsql_common::QueryProperties;
use quillsql_common::Result;
use quillsql_expr::{CompareOp, Expr, UnaryOp};

use crate::dag::NodeId;
use crate::logical::{LogicalPlan, LogicalStep};
use crate::optimizer::Strategy;

#[derive(Default)]
pub struct PredicateTagging;

impl Strategy for PredicateTagging {
    fn name(&self) -> &'static str {
        "predicate_tagging"
    }

    fn visit(&mut self, plan: &mut LogicalPlan, node: NodeId, _props: &QueryProperties) -> Result<()> {
        if let Some(LogicalStep::Filter { condition_list, .. }) = plan.node_mut(node) {
            if condition_list.len() > 1 {
                condition_list.sort_by_key(sort_key);
            }
        }
        Ok(())
    }
}

/// `(weight, simple-rank)`: ties on weight break with `simple` predicates
/// (both sides a bare literal/identifier) ordered before non-simple ones,
/// per `order_predicates`'s tie-break rule.
fn sort_key(expr: &Expr) -> (u32, u8) {
    (weight(expr), if expr.is_simple_predicate() { 0 } else { 1 })
}

fn contains_function_call(expr: &Expr) -> bool {
    match expr {
        Expr::FunctionCall { .. } => true,
        Expr::Aggregate { args, .. } => args.iter().any(contains_function_call),
        Expr::Compare { left, right, .. } | Expr::Binary { left, right, .. } | Expr::Boolean { left, right, .. } => {
            contains_function_call(left) || contains_function_call(right)
        }
        Expr::Unary { expr, .. } | Expr::Nested(expr) => contains_function_call(expr),
        Expr::In { expr, list, .. } => contains_function_call(expr) || list.iter().any(contains_function_call),
        Expr::Literal(_) | Expr::Identifier(_) | Expr::Wildcard | Expr::QualifiedWildcard(_) => false,
    }
}

fn weight(expr: &Expr) -> u32 {
    let unwrapped = expr.unwrap_nested();
    if contains_function_call(unwrapped) {
        return 35;
    }
    match unwrapped {
        Expr::Compare { op: CompareOp::Eq | CompareOp::NotEq, left, right } if left.is_literal() || right.is_literal() => 5,
        Expr::Unary { op: UnaryOp::IsNull | UnaryOp::IsNotNull | UnaryOp::IsTrue | UnaryOp::IsFalse, .. } => 7,
        Expr::Compare {
            op: CompareOp::Like | CompareOp::NotLike | CompareOp::ILike | CompareOp::NotILike,
            ..
        } => 16,
        _ => 25,
    }
}

#[cfg(test)]
mod tests {
    use quillsql_common::Datum;

    use super::*;

    fn eq_literal(name: &str, v: i64) -> Expr {
        Expr::compare(CompareOp::Eq, Expr::Identifier(name.into()), Expr::Literal(Datum::Integer(v)))
    }

    fn gt_literal(name: &str, v: i64) -> Expr {
        Expr::compare(CompareOp::Gt, Expr::Identifier(name.into()), Expr::Literal(Datum::Integer(v)))
    }

    #[test]
    fn cheapest_predicate_sorts_first() {
        let mut plan = LogicalPlan::new();
        let filter = plan.add_node(LogicalStep::Filter {
            condition: gt_literal("a", 1),
            condition_list: vec![gt_literal("a", 1), gt_literal("b", 2), eq_literal("c", 3)],
        });

        let props = QueryProperties::new("q1");
        let mut strategy = PredicateTagging;
        strategy.visit(&mut plan, filter, &props).unwrap();

        let Some(LogicalStep::Filter { condition_list, .. }) = plan.node(filter) else {
            panic!("expected filter node");
        };
        assert_eq!(condition_list[0], eq_literal("c", 3));
        assert_eq!(condition_list[1], gt_literal("a", 1));
        assert_eq!(condition_list[2], gt_literal("b", 2));
    }

    #[test]
    fn function_call_predicate_sorts_last() {
        let mut plan = LogicalPlan::new();
        let function_predicate = Expr::compare(
            CompareOp::Eq,
            Expr::FunctionCall {
                name: "UPPER".into(),
                args: vec![Expr::Identifier("a".into())],
            },
            Expr::Literal(Datum::Varchar("X".into())),
        );
        let filter = plan.add_node(LogicalStep::Filter {
            condition: gt_literal("a", 1),
            condition_list: vec![function_predicate.clone(), eq_literal("c", 3)],
        });

        let props = QueryProperties::new("q1");
        let mut strategy = PredicateTagging;
        strategy.visit(&mut plan, filter, &props).unwrap();

        let Some(LogicalStep::Filter { condition_list, .. }) = plan.node(filter) else {
            panic!("expected filter node");
        };
        assert_eq!(condition_list[0], eq_literal("c", 3));
        assert_eq!(condition_list[1], function_predicate);
    }

    #[test]
    fn single_condition_list_entry_is_left_alone() {
        let mut plan = LogicalPlan::new();
        let filter = plan.add_node(LogicalStep::Filter {
            condition: gt_literal("a", 1),
            condition_list: Vec::new(),
        });

        let props = QueryProperties::new("q1");
        let mut strategy = PredicateTagging;
        strategy.visit(&mut plan, filter, &props).unwrap();

        let Some(LogicalStep::Filter { condition_list, .. }) = plan.node(filter) else {
            panic!("expected filter node");
        };
        assert!(condition_list.is_empty());
    }
}
