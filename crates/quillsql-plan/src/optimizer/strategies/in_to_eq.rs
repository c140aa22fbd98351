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

//! IN-to-equals rewrite: `x IN (v)` / `x NOT IN (v)` becomes
//! `x = v` / `x <> v` when the list has exactly one *literal* element.
//! A single non-literal element (a subquery result, a computed value) is
//! left alone — only the literal case is a safe, purely syntactic rewrite.

use quillsql_common::{QueryProperties, Result};
use quillsql_expr::{CompareOp, Expr};

use crate::dag::NodeId;
use crate::logical::{LogicalPlan, LogicalStep};
use crate::optimizer::Strategy;

#[derive(Default)]
pub struct InToEq;

impl Strategy for InToEq {
    fn name(&self) -> &'static str {
        "in_to_eq"
    }

    fn visit(&mut self, plan: &mut LogicalPlan, node: NodeId, _props: &QueryProperties) -> Result<()> {
        match plan.node_mut(node) {
            Some(LogicalStep::Filter { condition, .. }) => {
                *condition = rewrite(condition.clone());
            }
            Some(LogicalStep::Join { condition: Some(c), .. }) => {
                *c = rewrite(c.clone());
            }
            _ => {}
        }
        Ok(())
    }
}

fn rewrite(expr: Expr) -> Expr {
    match expr {
        Expr::In { expr, list, negated } if list.len() == 1 && list[0].is_literal() => {
            let op = if negated { CompareOp::NotEq } else { CompareOp::Eq };
            Expr::compare(op, *expr, list.into_iter().next().expect("len checked above"))
        }
        Expr::In { expr, list, negated } => Expr::In {
            expr: Box::new(rewrite(*expr)),
            list: list.into_iter().map(rewrite).collect(),
            negated,
        },
        Expr::Boolean { op, left, right } => Expr::Boolean {
            op,
            left: Box::new(rewrite(*left)),
            right: Box::new(rewrite(*right)),
        },
        Expr::Nested(inner) => Expr::Nested(Box::new(rewrite(*inner))),
        other => other,
    }
}
