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

//! Fixed-function elimination: a function call whose result does not
//! depend on its arguments or on any row (`VERSION()`, `CURRENT_DATE()`,
//! ...) is evaluated once, up front, and replaced with the literal result.
//! This runs after constant-fold so `FunctionCall` nodes with no arguments
//! left behind by that pass (e.g. `NOW()`) also get folded, and before
//! predicate-pushdown so a scan never receives a pushed predicate that
//! still calls one of these functions.

use quillsql_common::Result;
use quillsql_common::QueryProperties;
use quillsql_expr::{eval_constant, is_fixed_outcome_function, Expr};

use crate::dag::NodeId;
use crate::logical::{LogicalPlan, LogicalStep};
use crate::optimizer::Strategy;

pub struct FixedFunctionEliminate;

impl Strategy for FixedFunctionEliminate {
    fn name(&self) -> &'static str {
        "fixed_function_eliminate"
    }

    fn visit(&mut self, plan: &mut LogicalPlan, node: NodeId, _props: &QueryProperties) -> Result<()> {
        match plan.node_mut(node) {
            Some(LogicalStep::Filter { condition, .. }) => {
                *condition = eliminate(condition.clone())?;
            }
            Some(LogicalStep::Join { condition: Some(c), .. }) => {
                *c = eliminate(c.clone())?;
            }
            Some(LogicalStep::Project { expressions, .. }) => {
                for (_, expr) in expressions.iter_mut() {
                    *expr = eliminate(expr.clone())?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// Bottom-up: children fold first so a fixed-outcome function nested under
/// another function call is eliminated before the outer call is considered.
fn eliminate(expr: Expr) -> Result<Expr> {
    let eliminated = match expr {
        Expr::FunctionCall { name, args } => {
            let args = args.into_iter().map(eliminate).collect::<Result<Vec<_>>>()?;
            if is_fixed_outcome_function(&name) {
                let literal = eval_constant(&Expr::FunctionCall { name, args })?;
                Expr::Literal(literal)
            } else {
                Expr::FunctionCall { name, args }
            }
        }
        Expr::Compare { op, left, right } => Expr::Compare {
            op,
            left: Box::new(eliminate(*left)?),
            right: Box::new(eliminate(*right)?),
        },
        Expr::Binary { op, left, right } => Expr::Binary {
            op,
            left: Box::new(eliminate(*left)?),
            right: Box::new(eliminate(*right)?),
        },
        Expr::Unary { op, expr } => Expr::Unary {
            op,
            expr: Box::new(eliminate(*expr)?),
        },
        Expr::Boolean { op, left, right } => Expr::Boolean {
            op,
            left: Box::new(eliminate(*left)?),
            right: Box::new(eliminate(*right)?),
        },
        Expr::Nested(inner) => Expr::Nested(Box::new(eliminate(*inner)?)),
        other => other,
    };
    Ok(eliminated)
}

#[cfg(test)]
mod tests {
    use quillsql_common::Datum;
    use quillsql_expr::CompareOp;

    use super::*;

    #[test]
    fn zero_arg_fixed_function_folds_to_literal() {
        let expr = Expr::FunctionCall {
            name: "VERSION".into(),
            args: Vec::new(),
        };
        let folded = eliminate(expr).unwrap();
        assert!(folded.is_literal());
    }

    #[test]
    fn non_fixed_function_is_untouched() {
        let expr = Expr::FunctionCall {
            name: "UPPER".into(),
            args: vec![Expr::Identifier("t.a".into())],
        };
        assert_eq!(eliminate(expr.clone()).unwrap(), expr);
    }

    #[test]
    fn folds_inside_comparison() {
        let expr = Expr::compare(
            CompareOp::Eq,
            Expr::Identifier("t.a".into()),
            Expr::FunctionCall {
                name: "CURRENT_DATE".into(),
                args: Vec::new(),
            },
        );
        let folded = eliminate(expr).unwrap();
        let Expr::Compare { right, .. } = folded else {
            panic!("expected compare node");
        };
        assert!(right.is_literal());
    }

    #[test]
    fn non_fixed_call_with_fixed_nested_arg_is_partially_folded() {
        let expr = Expr::FunctionCall {
            name: "UPPER".into(),
            args: vec![Expr::FunctionCall {
                name: "VERSION".into(),
                args: Vec::new(),
            }],
        };
        let folded = eliminate(expr).unwrap();
        match folded {
            Expr::FunctionCall { name, args } => {
                assert_eq!(name, "UPPER");
                assert_eq!(args.len(), 1);
                assert!(matches!(args[0], Expr::Literal(Datum::Varchar(_))));
            }
            _ => panic!("expected function call node"),
        }
    }
}
