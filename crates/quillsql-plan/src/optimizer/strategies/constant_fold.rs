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

//! Constant folding: comparison/binary-operator nodes whose
//! children are both literals are evaluated once and replaced with a
//! literal; unary nodes over literals and `Nested` wrappers around a
//! literal fold the same way. Uses `quillsql_expr::eval_constant`, which
//! evaluates against a columnless phantom batch, since constant folding
//! has no real batch to evaluate against.

use quillsql_common::{QueryProperties, Result};
use quillsql_expr::Expr;

use crate::dag::NodeId;
use crate::logical::{LogicalPlan, LogicalStep};
use crate::optimizer::Strategy;

pub struct ConstantFold;

impl Strategy for ConstantFold {
    fn name(&self) -> &'static str {
        "constant_fold"
    }

    fn visit(&mut self, plan: &mut LogicalPlan, node: NodeId, _props: &QueryProperties) -> Result<()> {
        match plan.node_mut(node) {
            Some(LogicalStep::Filter { condition, .. }) => {
                *condition = fold(condition.clone())?;
            }
            Some(LogicalStep::Join { condition: Some(c), .. }) => {
                *c = fold(c.clone())?;
            }
            Some(LogicalStep::Project { expressions, .. }) => {
                for (_, expr) in expressions.iter_mut() {
                    *expr = fold(expr.clone())?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Fold `expr` bottom-up. Children are always folded first so a folded
/// child can expose a fresh fold opportunity at the parent
/// (`(1 + 2) * x` folds its left child to `3` before the multiply, which
/// still has a non-literal right side and so stays as-is).
pub fn fold(expr: Expr) -> Result<Expr> {
    let folded = match expr {
        Expr::Compare { op, left, right } => {
            let left = fold(*left)?;
            let right = fold(*right)?;
            if left.is_literal() && right.is_literal() {
                let literal = evaluate_no_columns(&Expr::Compare {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })?;
                Expr::Literal(literal)
            } else {
                Expr::Compare {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
        }
        Expr::Binary { op, left, right } => {
            let left = fold(*left)?;
            let right = fold(*right)?;
            if left.is_literal() && right.is_literal() {
                let literal = evaluate_no_columns(&Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })?;
                Expr::Literal(literal)
            } else {
                Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
        }
        Expr::Unary { op, expr } => {
            let inner = fold(*expr)?;
            if inner.is_literal() {
                let literal = evaluate_no_columns(&Expr::Unary { op, expr: Box::new(inner) })?;
                Expr::Literal(literal)
            } else {
                Expr::Unary { op, expr: Box::new(inner) }
            }
        }
        Expr::Boolean { op, left, right } => {
            let left = fold(*left)?;
            let right = fold(*right)?;
            if left.is_literal() && right.is_literal() {
                let literal = evaluate_no_columns(&Expr::Boolean {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                })?;
                Expr::Literal(literal)
            } else {
                Expr::Boolean {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                }
            }
        }
        // Nested collapses once its inner expression folds to a literal
        //; it
        // survives otherwise since it is semantically transparent but
        // must be preserved through other rewrites.
        Expr::Nested(inner) => {
            let inner = fold(*inner)?;
            if inner.is_literal() {
                inner
            } else {
                Expr::Nested(Box::new(inner))
            }
        }
        Expr::FunctionCall { name, args } => Expr::FunctionCall {
            name,
            args: args.into_iter().map(fold).collect::<Result<_>>()?,
        },
        other => other,
    };
    Ok(folded)
}

fn evaluate_no_columns(expr: &Expr) -> Result<quillsql_common::Datum> {
    quillsql_expr::eval_constant(expr)
}
