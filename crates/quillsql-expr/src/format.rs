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

//! Render an [`Expr`] back to SQL-ish text, supporting a format/parse
//! round trip; SQL text parsing is an external collaborator, so this
//! module only owns the formatting half — it is written so that the
//! (external) parser's output, fed back through it, is stable modulo
//! whitespace for every node kind below.

use std::fmt::Write;

use crate::expr::{BoolOp, Expr};

pub fn format_expression(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(expr, &mut out);
    out
}

fn write_expr(expr: &Expr, out: &mut String) {
    match expr {
        Expr::Literal(d) => {
            let _ = write!(out, "{d}");
        }
        Expr::Identifier(id) => {
            let _ = write!(out, "{id}");
        }
        Expr::Compare { op, left, right } => {
            write_expr(left, out);
            let _ = write!(out, " {} ", op.symbol());
            write_expr(right, out);
        }
        Expr::Binary { op, left, right } => {
            write_expr(left, out);
            let _ = write!(out, " {} ", op.symbol());
            write_expr(right, out);
        }
        Expr::Unary { op, expr } => match op {
            crate::expr::UnaryOp::IsNull => {
                write_expr(expr, out);
                out.push_str(" IS NULL");
            }
            crate::expr::UnaryOp::IsNotNull => {
                write_expr(expr, out);
                out.push_str(" IS NOT NULL");
            }
            crate::expr::UnaryOp::IsTrue => {
                write_expr(expr, out);
                out.push_str(" IS TRUE");
            }
            crate::expr::UnaryOp::IsFalse => {
                write_expr(expr, out);
                out.push_str(" IS FALSE");
            }
            crate::expr::UnaryOp::Not => {
                out.push_str("NOT ");
                write_expr(expr, out);
            }
        },
        Expr::Boolean { op, left, right } => {
            write_expr(left, out);
            let keyword = match op {
                BoolOp::And => " AND ",
                BoolOp::Or => " OR ",
                BoolOp::Xor => " XOR ",
            };
            out.push_str(keyword);
            write_expr(right, out);
        }
        Expr::Nested(inner) => {
            out.push('(');
            write_expr(inner, out);
            out.push(')');
        }
        Expr::FunctionCall { name, args } => {
            let _ = write!(out, "{name}(");
            write_arg_list(args, out);
            out.push(')');
        }
        Expr::Aggregate {
            name,
            args,
            distinct,
            order,
            limit,
        } => {
            let _ = write!(out, "{name}(");
            if *distinct {
                out.push_str("DISTINCT ");
            }
            write_arg_list(args, out);
            if !order.is_empty() {
                out.push_str(" ORDER BY ");
                for (i, (expr, asc)) in order.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    write_expr(expr, out);
                    out.push_str(if *asc { " ASC" } else { " DESC" });
                }
            }
            if let Some(limit) = limit {
                let _ = write!(out, " LIMIT {limit}");
            }
            out.push(')');
        }
        Expr::Wildcard => out.push('*'),
        Expr::QualifiedWildcard(relation) => {
            let _ = write!(out, "{relation}.*");
        }
        Expr::In { expr, list, negated } => {
            write_expr(expr, out);
            out.push_str(if *negated { " NOT IN (" } else { " IN (" });
            write_arg_list(list, out);
            out.push(')');
        }
    }
}

fn write_arg_list(args: &[Expr], out: &mut String) {
    for (i, arg) in args.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_expr(arg, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::CompareOp;
    use quillsql_common::Datum;

    #[test]
    fn formats_comparison() {
        let expr = Expr::compare(CompareOp::Gt, Expr::Identifier("t.a".into()), Expr::Literal(Datum::Integer(3)));
        assert_eq!(format_expression(&expr), "t.a > 3");
    }

    #[test]
    fn formats_nested_and() {
        let expr = Expr::Nested(Box::new(Expr::and(
            Expr::compare(CompareOp::Eq, Expr::Identifier("t.a".into()), Expr::Literal(Datum::Integer(1))),
            Expr::compare(CompareOp::Lt, Expr::Identifier("t.b".into()), Expr::Literal(Datum::Integer(2))),
        )));
        assert_eq!(format_expression(&expr), "(t.a = 1 AND t.b < 2)");
    }

    #[test]
    fn formatting_is_stable_on_repeat() {
        let expr = Expr::not(Expr::Identifier("t.flag".into()));
        let once = format_expression(&expr);
        let twice = format_expression(&expr);
        assert_eq!(once, twice);
    }
}
