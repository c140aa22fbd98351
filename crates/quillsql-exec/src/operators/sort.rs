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

//! `Sort` and `HeapSort`: full accumulate-then-sort, and its
//! bounded counterpart the optimizer fuses from `Order` immediately
//! followed by a zero-offset `Limit`. Both share key resolution
//! (positional `ORDER BY 1`, the `ORDER BY RAND()` shuffle special case)
//! and the row comparator.

use std::cmp::Ordering;

use rand::seq::SliceRandom;
use quillsql_common::{Batch, Datum, QuillError, Result, Schema, Sensors};
use quillsql_expr::Expr;
use quillsql_plan::{EdgeLabel, SortKey};

use crate::operator::{ExecutionContext, Operator, StreamEvent};

fn is_rand_call(expr: &Expr) -> bool {
    matches!(expr.unwrap_nested(), Expr::FunctionCall { name, args } if args.is_empty() && matches!(name.to_ascii_uppercase().as_str(), "RAND" | "RANDOM"))
}

/// Resolves `ORDER BY <n>` against `schema`'s column order. Non-positional keys pass through unchanged.
fn resolve_order_by(order_by: &[SortKey], schema: &Schema) -> Result<Vec<SortKey>> {
    order_by
        .iter()
        .map(|key| {
            if let Some(Datum::Integer(position)) = key.expr.as_literal() {
                let index = *position as usize;
                let field = schema.fields().get(index.wrapping_sub(1)).ok_or_else(|| {
                    QuillError::sql(format!("ORDER BY position {position} is out of range for the input schema"))
                })?;
                Ok(SortKey {
                    expr: Expr::Identifier(field.identity.clone()),
                    ascending: key.ascending,
                    nulls_first: key.nulls_first,
                })
            } else {
                Ok(key.clone())
            }
        })
        .collect()
}

fn compare_datums(a: &Datum, b: &Datum, ascending: bool, nulls_first: bool) -> Ordering {
    let ordering = match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => {
            return if nulls_first { Ordering::Less } else { Ordering::Greater };
        }
        (false, true) => {
            return if nulls_first { Ordering::Greater } else { Ordering::Less };
        }
        (false, false) => {
            if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
                x.partial_cmp(&y).unwrap_or(Ordering::Equal)
            } else {
                match (a, b) {
                    (Datum::Varchar(x), Datum::Varchar(y)) => x.cmp(y),
                    (Datum::Boolean(x), Datum::Boolean(y)) => x.cmp(y),
                    (Datum::Date(x), Datum::Date(y)) => x.cmp(y),
                    (Datum::Timestamp(x), Datum::Timestamp(y)) => x.cmp(y),
                    _ => Ordering::Equal,
                }
            }
        }
    };
    if ascending {
        ordering
    } else {
        ordering.reverse()
    }
}

/// Returns the row indices of `batch` in sorted order, per `order_by`
/// (already positionally resolved). Unreferenceable identifiers surface
/// as the evaluator's `ColumnNotFound`.
fn sort_indices(batch: &Batch, order_by: &[SortKey], ctx: &ExecutionContext) -> Result<Vec<usize>> {
    let mut keys = Vec::with_capacity(order_by.len());
    for key in order_by {
        let column = ctx.evaluator.evaluate(&key.expr, batch)?;
        keys.push((column, key.ascending, key.nulls_first));
    }
    let mut indices: Vec<usize> = (0..batch.row_count()).collect();
    indices.sort_by(|&left, &right| {
        for (column, ascending, nulls_first) in &keys {
            let ordering = compare_datums(&column.datum_at(left), &column.datum_at(right), *ascending, *nulls_first);
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    });
    Ok(indices)
}

/// Shuffles or sorts `batch` per `order_by` and returns the reordered
/// batch, honoring the `ORDER BY RAND()` special case.
fn reorder(batch: Batch, order_by: &[SortKey], ctx: &ExecutionContext) -> Result<Batch> {
    let resolved = resolve_order_by(order_by, batch.schema())?;
    if resolved.first().is_some_and(|k| is_rand_call(&k.expr)) {
        let mut indices: Vec<usize> = (0..batch.row_count()).collect();
        indices.shuffle(&mut rand::thread_rng());
        return Ok(batch.take(&indices));
    }
    let indices = sort_indices(&batch, &resolved, ctx)?;
    Ok(batch.take(&indices))
}

pub struct SortOperator {
    order_by: Vec<SortKey>,
    schema: Schema,
    ctx: ExecutionContext,
    buffered: Vec<Batch>,
    sensors: Sensors,
}

impl SortOperator {
    pub fn new(order_by: Vec<SortKey>, schema: Schema, ctx: ExecutionContext) -> Self {
        Self {
            order_by,
            schema,
            ctx,
            buffered: Vec::new(),
            sensors: Sensors::new(),
        }
    }
}

impl Operator for SortOperator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn call(&mut self, input: StreamEvent, _leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
        match input {
            StreamEvent::Batch(batch) => {
                if !batch.is_empty() {
                    self.buffered.push(batch);
                }
                Ok(Vec::new())
            }
            StreamEvent::Eos => {
                let concatenated = if self.buffered.is_empty() {
                    Batch::empty(self.schema.clone())
                } else {
                    Batch::concat(&self.buffered)
                };
                let sorted = reorder(concatenated, &self.order_by, &self.ctx)?;
                Ok(vec![StreamEvent::Batch(sorted), StreamEvent::Eos])
            }
        }
    }

    fn sensors(&self) -> &Sensors {
        &self.sensors
    }
}

pub struct HeapSortOperator {
    order_by: Vec<SortKey>,
    limit: usize,
    schema: Schema,
    ctx: ExecutionContext,
    buffer: Option<Batch>,
    sensors: Sensors,
}

impl HeapSortOperator {
    pub fn new(order_by: Vec<SortKey>, limit: usize, schema: Schema, ctx: ExecutionContext) -> Self {
        Self {
            order_by,
            limit,
            schema,
            ctx,
            buffer: None,
            sensors: Sensors::new(),
        }
    }

    fn truncate(&self, batch: Batch) -> Result<Batch> {
        let sorted = reorder(batch, &self.order_by, &self.ctx)?;
        if sorted.row_count() <= self.limit {
            Ok(sorted)
        } else {
            Ok(sorted.take(&(0..self.limit).collect::<Vec<_>>()))
        }
    }
}

impl Operator for HeapSortOperator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn call(&mut self, input: StreamEvent, _leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
        match input {
            StreamEvent::Batch(batch) => {
                if batch.is_empty() {
                    return Ok(Vec::new());
                }
                let combined = match self.buffer.take() {
                    Some(existing) => Batch::concat(&[existing, batch]),
                    None => batch,
                };
                self.buffer = Some(self.truncate(combined)?);
                Ok(Vec::new())
            }
            StreamEvent::Eos => {
                let out = self.buffer.take().unwrap_or_else(|| Batch::empty(self.schema.clone()));
                Ok(vec![StreamEvent::Batch(out), StreamEvent::Eos])
            }
        }
    }

    fn sensors(&self) -> &Sensors {
        &self.sensors
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use quillsql_common::array::TypedArray;
    use quillsql_common::{Array, DataType, Field, QueryProperties};
    use quillsql_expr::ReferenceEvaluator;

    use super::*;
    use crate::pool::MemoryPool;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(QueryProperties::new("q1"), Arc::new(MemoryPool::new(0)), Arc::new(ReferenceEvaluator))
    }

    fn schema() -> Schema {
        Schema::new(vec![Field::new("t.a", "a", DataType::Integer)])
    }

    fn batch(values: Vec<i64>) -> Batch {
        Batch::new(schema(), vec![Arc::new(Array::Integer(TypedArray::from_values(values)))])
    }

    fn ints(batch: &Batch) -> Vec<i64> {
        (0..batch.row_count())
            .map(|i| batch.columns()[0].datum_at(i).as_i64().unwrap())
            .collect()
    }

    #[test]
    fn sort_buffers_until_eos_then_emits_sorted_batch_and_eos() {
        let order_by = vec![SortKey { expr: Expr::Identifier("t.a".into()), ascending: true, nulls_first: false }];
        let mut op = SortOperator::new(order_by, schema(), ctx());
        assert!(op.call(StreamEvent::Batch(batch(vec![3, 1])), EdgeLabel::None).unwrap().is_empty());
        assert!(op.call(StreamEvent::Batch(batch(vec![2])), EdgeLabel::None).unwrap().is_empty());
        let out = op.call(StreamEvent::Eos, EdgeLabel::None).unwrap();
        let StreamEvent::Batch(result) = &out[0] else { panic!() };
        assert_eq!(ints(result), vec![1, 2, 3]);
        assert!(out[1].is_eos());
    }

    #[test]
    fn sort_resolves_positional_order_by() {
        let order_by = vec![SortKey { expr: Expr::Literal(Datum::Integer(1)), ascending: false, nulls_first: false }];
        let mut op = SortOperator::new(order_by, schema(), ctx());
        op.call(StreamEvent::Batch(batch(vec![1, 3, 2])), EdgeLabel::None).unwrap();
        let out = op.call(StreamEvent::Eos, EdgeLabel::None).unwrap();
        let StreamEvent::Batch(result) = &out[0] else { panic!() };
        assert_eq!(ints(result), vec![3, 2, 1]);
    }

    #[test]
    fn heap_sort_keeps_bounded_buffer_across_batches() {
        let order_by = vec![SortKey { expr: Expr::Identifier("t.a".into()), ascending: true, nulls_first: false }];
        let mut op = HeapSortOperator::new(order_by, 2, schema(), ctx());
        op.call(StreamEvent::Batch(batch(vec![5, 1, 9])), EdgeLabel::None).unwrap();
        op.call(StreamEvent::Batch(batch(vec![0, 7])), EdgeLabel::None).unwrap();
        let out = op.call(StreamEvent::Eos, EdgeLabel::None).unwrap();
        let StreamEvent::Batch(result) = &out[0] else { panic!() };
        assert_eq!(ints(result), vec![0, 1]);
    }
}
