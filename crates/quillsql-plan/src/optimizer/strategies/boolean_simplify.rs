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

//! Boolean simplification: De Morgan's laws, double-negation
//! elimination, and pushing `NOT` through a comparison into its inverse
//! operator (`Eq<->NotEq`, `Lt<->GtEq`, `Gt<->LtEq`).

use quillsql_common::{QueryProperties, Result};
use quillsql_expr::{BoolOp, Expr, UnaryOp};

use crate::dag::NodeId;
use crate::logical::{LogicalPlan, LogicalStep};
use crate::optimizer::Strategy;

pub struct BooleanSimplify;

impl Strategy for BooleanSimplify {
    fn name(&self) -> &'static str {
        "boolean_simplify"
    }

    fn visit(&mut self, plan: &mut LogicalPlan, node: NodeId, _props: &QueryProperties) -> Result<()> {
        match plan.node_mut(node) {
            Some(LogicalStep::Filter { condition, .. }) => {
                *condition = simplify(condition.clone());
            }
            Some(LogicalStep::Join { condition: Some(c), .. }) => {
                *c = simplify(c.clone());
            }
            _ => {}
        }
        Ok(())
    }
}

/// Recursively apply De Morgan / double-negation / comparison-inversion
/// until no top-level rewrite applies; children are always simplified
/// first so a rewrite exposed by a child's simplification (e.g. `NOT
/// NOT NOT a -> NOT a` after one double-negation pass) is caught.
pub fn simplify(expr: Expr) -> Expr {
    match expr {
        Expr::Unary { op: UnaryOp::Not, expr } => simplify_not(simplify(*expr)),
        Expr::Boolean { op, left, right } => Expr::Boolean {
            op,
            left: Box::new(simplify(*left)),
            right: Box::new(simplify(*right)),
        },
        Expr::Compare { op, left, right } => Expr::Compare {
            op,
            left: Box::new(simplify(*left)),
            right: Box::new(simplify(*right)),
        },
        Expr::Unary { op, expr } => Expr::Unary {
            op,
            expr: Box::new(simplify(*expr)),
        },
        Expr::Nested(inner) => Expr::Nested(Box::new(simplify(*inner))),
        other => other,
    }
}

/// `NOT` applied to an already-simplified `inner`.
fn simplify_not(inner: Expr) -> Expr {
    match inner {
        // Double negation: NOT NOT a -> a.
        Expr::Unary { op: UnaryOp::Not, expr } => *expr,
        // De Morgan: NOT (A OR B) -> (NOT A) AND (NOT B); NOT (A AND B) ->
        // (NOT A) OR (NOT B).
        Expr::Boolean { op: BoolOp::Or, left, right } => Expr::Boolean {
            op: BoolOp::And,
            left: Box::new(simplify_not(*left)),
            right: Box::new(simplify_not(*right)),
        },
        Expr::Boolean { op: BoolOp::And, left, right } => Expr::Boolean {
            op: BoolOp::Or,
            left: Box::new(simplify_not(*left)),
            right: Box::new(simplify_not(*right)),
        },
        // NOT (a OP b) -> a OP' b for the comparison operators with a
        // closed-set inverse.
        Expr::Compare { op, left, right } => Expr::Compare {
            op: op.inverse(),
            left,
            right,
        },
        Expr::Nested(inner) => Expr::Nested(Box::new(simplify_not(*inner))),
        other => Expr::not(other),
    }
}

#[cfg(test)]
mod tests {
    use quillsql_common::Datum;
    use quillsql_expr::CompareOp;

    use super::*;

    #[test]
    fn double_negation_cancels() {
        let expr = Expr::not(Expr::not(Expr::Identifier("t.flag".into())));
        assert_eq!(simplify(expr), Expr::Identifier("t.flag".into()));
    }

    #[test]
    fn de_morgan_or_becomes_and_of_nots() {
        let expr = Expr::not(Expr::or(
            Expr::Identifier("t.a".into()),
            Expr::Identifier("t.b".into()),
        ));
        let simplified = simplify(expr);
        assert_eq!(
            simplified,
            Expr::and(Expr::not(Expr::Identifier("t.a".into())), Expr::not(Expr::Identifier("t.b".into())))
        );
    }

    #[test]
    fn not_comparison_inverts_operator() {
        let expr = Expr::not(Expr::compare(
            CompareOp::Eq,
            Expr::Identifier("t.a".into()),
            Expr::Literal(Datum::Integer(1)),
        ));
        let simplified = simplify(expr);
        assert_eq!(
            simplified,
            Expr::compare(CompareOp::NotEq, Expr::Identifier("t.a".into()), Expr::Literal(Datum::Integer(1)))
        );
    }

    #[test]
    fn simplify_is_idempotent() {
        let expr = Expr::not(Expr::or(Expr::Identifier("t.a".into()), Expr::Identifier("t.b".into())));
        let once = simplify(expr);
        let twice = simplify(once.clone());
        assert_eq!(once, twice);
    }
}
