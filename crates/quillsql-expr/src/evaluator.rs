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

//! The expression evaluator contract plus a reference implementation.
//! In the full system a vectorized evaluator is an external collaborator;
//! the reference implementation here is the one this crate's own tests,
//! and the optimizer's constant-folding strategy, are written against.

use std::sync::Arc;

use quillsql_common::array::TypedArray;
use quillsql_common::{Array, ArrayRef, Batch, ColumnIdentity, DataType, Datum, Field, QuillError, Result};

use crate::expr::{BinaryOp, BoolOp, CompareOp, Expr, UnaryOp};

/// The two entry points the core consumes from the evaluator.
pub trait Evaluator {
    /// Apply `expr` to every row of `batch`. For boolean expressions the
    /// result doubles as a row mask; callers (`Filter`) decide how to use
    /// it. Referentially transparent: two evaluations of the same
    /// expression against the same batch must yield equal results.
    fn evaluate(&self, expr: &Expr, batch: &Batch) -> Result<ArrayRef>;

    /// Evaluate each of `exprs` and append the result under its target
    /// identity. Idempotent: an expression whose target identity is
    /// already present in `batch` is skipped.
    fn evaluate_and_append(&self, exprs: &[(ColumnIdentity, Expr)], batch: &Batch) -> Result<Batch> {
        let mut current = batch.clone();
        for (identity, expr) in exprs {
            if current.schema().contains(identity) {
                continue;
            }
            let array = self.evaluate(expr, &current)?;
            let field = Field::new(identity.clone(), identity.as_str(), array.data_type());
            current = current.with_appended_column(field, array);
        }
        Ok(current)
    }
}

/// A straightforward row-at-a-time evaluator. Not the vectorized kernel a
/// production connector/evaluator crate would ship, but referentially transparent and
/// sufficient to drive filtering, projection, constant folding and
/// pre-aggregation function evaluation in this core's own test suite.
#[derive(Default, Clone, Copy)]
pub struct ReferenceEvaluator;

impl Evaluator for ReferenceEvaluator {
    fn evaluate(&self, expr: &Expr, batch: &Batch) -> Result<ArrayRef> {
        let row_count = batch.row_count();
        let values: Vec<Datum> = (0..row_count.max(1))
            .map(|row| eval_scalar(expr, batch, row))
            .collect::<Result<_>>()?;
        // An expression over zero rows still needs to report its type, so
        // evaluate once against a phantom row when the batch is empty.
        if row_count == 0 {
            let data_type = values.first().map(Datum::data_type).unwrap_or(DataType::Null);
            return Ok(Arc::new(Array::nulls(data_type, 0)));
        }
        Ok(Arc::new(datums_to_array(&values)))
    }
}

fn eval_scalar(expr: &Expr, batch: &Batch, row: usize) -> Result<Datum> {
    match expr {
        Expr::Literal(d) => Ok(d.clone()),
        Expr::Identifier(id) => {
            let column = batch
                .column_by_identity(id)
                .ok_or_else(|| QuillError::column_not_found(id.as_str()))?;
            Ok(column.datum_at(row))
        }
        Expr::Nested(inner) => eval_scalar(inner, batch, row),
        Expr::Unary { op, expr } => {
            let value = eval_scalar(expr, batch, row)?;
            eval_unary(*op, &value)
        }
        Expr::Boolean { op, left, right } => {
            let l = eval_scalar(left, batch, row)?;
            let r = eval_scalar(right, batch, row)?;
            eval_boolean(*op, &l, &r)
        }
        Expr::Compare { op, left, right } => {
            let l = eval_scalar(left, batch, row)?;
            let r = eval_scalar(right, batch, row)?;
            eval_compare(*op, &l, &r)
        }
        Expr::Binary { op, left, right } => {
            let l = eval_scalar(left, batch, row)?;
            let r = eval_scalar(right, batch, row)?;
            eval_binary(*op, &l, &r)
        }
        Expr::FunctionCall { name, args } => eval_function(name, args, batch, row),
        Expr::Aggregate { .. } => Err(QuillError::unsupported_syntax(
            "aggregators are evaluated by the Aggregate/AggregateAndGroup operators, not the row evaluator",
        )),
        Expr::Wildcard | Expr::QualifiedWildcard(_) => Err(QuillError::unsupported_syntax(
            "wildcard expressions must be expanded before evaluation",
        )),
        Expr::In { expr, list, negated } => {
            let value = eval_scalar(expr, batch, row)?;
            if value.is_null() {
                return Ok(Datum::Null);
            }
            let mut saw_null = false;
            let mut found = false;
            for item in list {
                let candidate = eval_scalar(item, batch, row)?;
                if candidate.is_null() {
                    saw_null = true;
                    continue;
                }
                if matches!(eval_compare(CompareOp::Eq, &value, &candidate)?, Datum::Boolean(true)) {
                    found = true;
                    break;
                }
            }
            Ok(match (found, saw_null) {
                (true, _) => Datum::Boolean(!negated),
                (false, true) => Datum::Null,
                (false, false) => Datum::Boolean(*negated),
            })
        }
    }
}

fn eval_unary(op: UnaryOp, value: &Datum) -> Result<Datum> {
    Ok(match op {
        UnaryOp::IsNull => Datum::Boolean(value.is_null()),
        UnaryOp::IsNotNull => Datum::Boolean(!value.is_null()),
        UnaryOp::IsTrue => Datum::Boolean(value.as_bool().unwrap_or(false)),
        UnaryOp::IsFalse => Datum::Boolean(!value.as_bool().unwrap_or(true)),
        UnaryOp::Not => match value {
            Datum::Null => Datum::Null,
            Datum::Boolean(b) => Datum::Boolean(!b),
            other => {
                return Err(QuillError::sql(format!("NOT applied to non-boolean value {other}")));
            }
        },
    })
}

/// Three-valued boolean logic: `NULL` only short-circuits when the *other*
/// side would not already decide the result (`FALSE AND NULL = FALSE`,
/// `TRUE OR NULL = TRUE`).
fn eval_boolean(op: BoolOp, left: &Datum, right: &Datum) -> Result<Datum> {
    let lb = match left {
        Datum::Null => None,
        Datum::Boolean(b) => Some(*b),
        other => return Err(QuillError::sql(format!("boolean operator applied to {other}"))),
    };
    let rb = match right {
        Datum::Null => None,
        Datum::Boolean(b) => Some(*b),
        other => return Err(QuillError::sql(format!("boolean operator applied to {other}"))),
    };
    Ok(match op {
        BoolOp::And => match (lb, rb) {
            (Some(false), _) | (_, Some(false)) => Datum::Boolean(false),
            (Some(true), Some(true)) => Datum::Boolean(true),
            _ => Datum::Null,
        },
        BoolOp::Or => match (lb, rb) {
            (Some(true), _) | (_, Some(true)) => Datum::Boolean(true),
            (Some(false), Some(false)) => Datum::Boolean(false),
            _ => Datum::Null,
        },
        BoolOp::Xor => match (lb, rb) {
            (Some(a), Some(b)) => Datum::Boolean(a ^ b),
            _ => Datum::Null,
        },
    })
}

fn eval_compare(op: CompareOp, left: &Datum, right: &Datum) -> Result<Datum> {
    if left.is_null() || right.is_null() {
        return Ok(Datum::Null);
    }
    if !left.data_type().comparable_to(right.data_type()) {
        return Err(QuillError::incompatible_types(
            left.data_type(),
            right.data_type(),
            "comparison",
        ));
    }
    let ordering = numeric_or_string_cmp(left, right)?;
    Ok(Datum::Boolean(match op {
        CompareOp::Eq => ordering == std::cmp::Ordering::Equal,
        CompareOp::NotEq => ordering != std::cmp::Ordering::Equal,
        CompareOp::Lt => ordering == std::cmp::Ordering::Less,
        CompareOp::LtEq => ordering != std::cmp::Ordering::Greater,
        CompareOp::Gt => ordering == std::cmp::Ordering::Greater,
        CompareOp::GtEq => ordering != std::cmp::Ordering::Less,
        CompareOp::Like => like_match(left, right, false),
        CompareOp::NotLike => !like_match(left, right, false),
        CompareOp::ILike => like_match(left, right, true),
        CompareOp::NotILike => !like_match(left, right, true),
    }))
}

fn numeric_or_string_cmp(left: &Datum, right: &Datum) -> Result<std::cmp::Ordering> {
    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        return Ok(a.partial_cmp(&b).unwrap_or(std::cmp::Ordering::Equal));
    }
    match (left, right) {
        (Datum::Varchar(a), Datum::Varchar(b)) => Ok(a.cmp(b)),
        (Datum::Boolean(a), Datum::Boolean(b)) => Ok(a.cmp(b)),
        (Datum::Date(a), Datum::Date(b)) => Ok(a.cmp(b)),
        (Datum::Timestamp(a), Datum::Timestamp(b)) => Ok(a.cmp(b)),
        _ => Err(QuillError::incompatible_types(
            left.data_type(),
            right.data_type(),
            "ordering comparison",
        )),
    }
}

fn like_match(value: &Datum, pattern: &Datum, case_insensitive: bool) -> bool {
    let (Datum::Varchar(value), Datum::Varchar(pattern)) = (value, pattern) else {
        return false;
    };
    let (value, pattern) = if case_insensitive {
        (value.to_lowercase(), pattern.to_lowercase())
    } else {
        (value.clone(), pattern.clone())
    };
    sql_like(&value, &pattern)
}

/// Minimal SQL `LIKE` matcher: `%` any run, `_` any single char.
fn sql_like(value: &str, pattern: &str) -> bool {
    fn helper(v: &[u8], p: &[u8]) -> bool {
        match p.first() {
            None => v.is_empty(),
            Some(b'%') => helper(v, &p[1..]) || (!v.is_empty() && helper(&v[1..], p)),
            Some(b'_') => !v.is_empty() && helper(&v[1..], &p[1..]),
            Some(c) => !v.is_empty() && v[0] == *c && helper(&v[1..], &p[1..]),
        }
    }
    helper(value.as_bytes(), pattern.as_bytes())
}

fn eval_binary(op: BinaryOp, left: &Datum, right: &Datum) -> Result<Datum> {
    if left.is_null() || right.is_null() {
        return Ok(Datum::Null);
    }
    if op == BinaryOp::Concat {
        return Ok(Datum::Varchar(format!("{}{}", display_text(left), display_text(right))));
    }
    if matches!(op, BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor) {
        let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) else {
            return Err(QuillError::incompatible_types(left.data_type(), right.data_type(), "bitwise op"));
        };
        return Ok(Datum::Integer(match op {
            BinaryOp::BitAnd => a & b,
            BinaryOp::BitOr => a | b,
            BinaryOp::BitXor => a ^ b,
            _ => unreachable!(),
        }));
    }
    let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) else {
        return Err(QuillError::incompatible_types(left.data_type(), right.data_type(), "arithmetic"));
    };
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => {
            if b == 0.0 {
                return Err(QuillError::sql("division by zero"));
            }
            a / b
        }
        BinaryOp::Mod => a % b,
        BinaryOp::Concat | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => unreachable!(),
    };
    if matches!((left, right), (Datum::Integer(_), Datum::Integer(_))) && op != BinaryOp::Div {
        Ok(Datum::Integer(result as i64))
    } else {
        Ok(Datum::Double(ordered_float::OrderedFloat(result)))
    }
}

fn display_text(datum: &Datum) -> String {
    match datum {
        Datum::Varchar(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Fixed-outcome functions: evaluated
/// once and folded to a literal by the optimizer, but also directly
/// callable here since a projection may reference them without folding
/// having run yet.
fn eval_function(name: &str, args: &[Expr], batch: &Batch, row: usize) -> Result<Datum> {
    match name.to_ascii_uppercase().as_str() {
        "VERSION" => Ok(Datum::Varchar("quillsql 0.1.0".to_owned())),
        "CURRENT_DATE" => Ok(Datum::Date(chrono::Utc::now().date_naive())),
        "NOW" | "CURRENT_TIMESTAMP" => Ok(Datum::Timestamp(chrono::Utc::now().naive_utc())),
        "UPPER" => text_fn(args, batch, row, |s| s.to_uppercase()),
        "LOWER" => text_fn(args, batch, row, |s| s.to_lowercase()),
        "LENGTH" => {
            let value = eval_scalar(&args[0], batch, row)?;
            match value {
                Datum::Null => Ok(Datum::Null),
                Datum::Varchar(s) => Ok(Datum::Integer(s.chars().count() as i64)),
                other => Err(QuillError::sql(format!("LENGTH applied to non-string {other}"))),
            }
        }
        other => Err(QuillError::unsupported_syntax(format!("unknown function {other}"))),
    }
}

fn text_fn(args: &[Expr], batch: &Batch, row: usize, f: impl Fn(&str) -> String) -> Result<Datum> {
    let value = eval_scalar(&args[0], batch, row)?;
    match value {
        Datum::Null => Ok(Datum::Null),
        Datum::Varchar(s) => Ok(Datum::Varchar(f(&s))),
        other => Err(QuillError::sql(format!("text function applied to non-string {other}"))),
    }
}

/// Functions whose result is constant for the whole query, regardless of
/// batch contents — the set the fixed-function-elimination strategy folds
/// at plan time.
pub fn is_fixed_outcome_function(name: &str) -> bool {
    matches!(
        name.to_ascii_uppercase().as_str(),
        "NOW" | "CURRENT_DATE" | "CURRENT_TIMESTAMP" | "VERSION"
    )
}

/// Evaluate an expression that references no columns — the constant-fold
/// and fixed-function-elimination optimizer strategies' only use of the
/// evaluator, done once at plan time rather than once per row. Any
/// `Identifier` encountered is a caller bug (the strategies only call this
/// once every leaf has been proven to be a literal or a fixed-outcome
/// function) and surfaces as `ColumnNotFound`.
pub fn eval_constant(expr: &Expr) -> Result<Datum> {
    let phantom = Batch::empty(quillsql_common::Schema::empty());
    eval_scalar(expr, &phantom, 0)
}

fn datums_to_array(values: &[Datum]) -> Array {
    let data_type = values
        .iter()
        .map(Datum::data_type)
        .find(|dt| *dt != DataType::Null)
        .unwrap_or(DataType::Null);
    match data_type {
        DataType::Boolean => Array::Boolean(TypedArray::from_options(
            values.iter().map(|d| d.as_bool()).collect(),
        )),
        DataType::Integer => Array::Integer(TypedArray::from_options(
            values.iter().map(|d| d.as_i64()).collect(),
        )),
        DataType::Double => Array::Double(TypedArray::from_options(
            values
                .iter()
                .map(|d| d.as_f64().map(ordered_float::OrderedFloat))
                .collect(),
        )),
        DataType::Varchar => Array::Varchar(TypedArray::from_options(
            values
                .iter()
                .map(|d| match d {
                    Datum::Varchar(s) => Some(s.clone()),
                    _ => None,
                })
                .collect(),
        )),
        DataType::Blob => Array::Blob(TypedArray::from_options(
            values
                .iter()
                .map(|d| match d {
                    Datum::Blob(b) => Some(b.clone()),
                    _ => None,
                })
                .collect(),
        )),
        other => Array::Boxed(
            other,
            values
                .iter()
                .map(|d| if d.is_null() { None } else { Some(d.clone()) })
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quillsql_common::array::TypedArray;
    use quillsql_common::{DataType as DT, Field, Schema};
    use std::sync::Arc as StdArc;

    fn batch_with_ints(values: Vec<i64>) -> Batch {
        let schema = Schema::new(vec![Field::new("t.a", "a", DT::Integer)]);
        let array = StdArc::new(Array::Integer(TypedArray::from_values(values)));
        Batch::new(schema, vec![array])
    }

    #[test]
    fn evaluate_comparison_produces_boolean_mask() {
        let batch = batch_with_ints(vec![1, 5, 10]);
        let expr = Expr::compare(CompareOp::Gt, Expr::Identifier("t.a".into()), Expr::Literal(Datum::Integer(3)));
        let result = ReferenceEvaluator.evaluate(&expr, &batch).unwrap();
        assert_eq!(result.datum_at(0), Datum::Boolean(false));
        assert_eq!(result.datum_at(1), Datum::Boolean(true));
        assert_eq!(result.datum_at(2), Datum::Boolean(true));
    }

    #[test]
    fn three_valued_and_short_circuits_on_false() {
        let result = eval_boolean(BoolOp::And, &Datum::Boolean(false), &Datum::Null).unwrap();
        assert_eq!(result, Datum::Boolean(false));
    }

    #[test]
    fn three_valued_or_short_circuits_on_true() {
        let result = eval_boolean(BoolOp::Or, &Datum::Boolean(true), &Datum::Null).unwrap();
        assert_eq!(result, Datum::Boolean(true));
    }

    #[test]
    fn comparison_against_null_is_null() {
        let result = eval_compare(CompareOp::Eq, &Datum::Integer(1), &Datum::Null).unwrap();
        assert_eq!(result, Datum::Null);
    }

    #[test]
    fn incompatible_types_error() {
        let err = eval_compare(CompareOp::Eq, &Datum::Integer(1), &Datum::Varchar("x".into())).unwrap_err();
        assert!(matches!(err, QuillError::IncompatibleTypes { .. }));
    }

    #[test]
    fn evaluate_and_append_is_idempotent() {
        let batch = batch_with_ints(vec![1, 2]);
        let exprs = vec![("t.a".into(), Expr::Identifier("t.a".into()))];
        let appended = ReferenceEvaluator.evaluate_and_append(&exprs, &batch).unwrap();
        assert_eq!(appended.schema().len(), batch.schema().len());
    }
}
