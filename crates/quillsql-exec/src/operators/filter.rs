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

//! `Filter`: evaluates its condition(s), applies the resulting
//! boolean mask, and guarantees at least one batch of the correct schema
//! reaches downstream even when every row is rejected.

use quillsql_common::{Array, Batch, QuillError, Result, Schema, Sensors};
use quillsql_expr::Expr;
use quillsql_plan::EdgeLabel;

use crate::operator::{ExecutionContext, Operator, StreamEvent};

pub struct FilterOperator {
    predicates: Vec<Expr>,
    schema: Schema,
    ctx: ExecutionContext,
    emitted_any: bool,
    sensors: Sensors,
}

impl FilterOperator {
    pub fn new(condition: Expr, condition_list: Vec<Expr>, schema: Schema, ctx: ExecutionContext) -> Self {
        let predicates = if condition_list.is_empty() { vec![condition] } else { condition_list };
        Self {
            predicates,
            schema,
            ctx,
            emitted_any: false,
            sensors: Sensors::new(),
        }
    }

    /// Apply each predicate in turn, narrowing the surviving row set —
    /// later, more expensive predicates only ever run against rows the cheaper ones left
    /// standing.
    fn apply(&self, batch: &Batch) -> Result<Batch> {
        let mut current = batch.clone();
        for predicate in &self.predicates {
            if current.is_empty() {
                break;
            }
            let mask = self.ctx.evaluator.evaluate(predicate, &current)?;
            let indices = true_indices(&mask)?;
            current = current.take(&indices);
        }
        Ok(current)
    }
}

fn true_indices(mask: &Array) -> Result<Vec<usize>> {
    let Array::Boolean(bools) = mask else {
        return Err(QuillError::sql("filter condition did not evaluate to a boolean mask"));
    };
    Ok((0..bools.len()).filter(|&i| bools.get(i) == Some(&true)).collect())
}

impl Operator for FilterOperator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn call(&mut self, input: StreamEvent, _leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
        match input {
            StreamEvent::Batch(batch) => {
                if batch.is_empty() {
                    return Ok(vec![StreamEvent::Batch(batch)]);
                }
                let filtered = self.apply(&batch)?;
                if !filtered.is_empty() {
                    self.emitted_any = true;
                }
                Ok(vec![StreamEvent::Batch(filtered)])
            }
            StreamEvent::Eos => {
                let mut out = Vec::with_capacity(2);
                if !self.emitted_any {
                    out.push(StreamEvent::Batch(Batch::empty(self.schema.clone())));
                }
                out.push(StreamEvent::Eos);
                Ok(out)
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

    use quillsql_common::{Array as Arr, DataType, Datum, Field, QueryProperties};
    use quillsql_common::array::TypedArray;
    use quillsql_expr::{CompareOp, ReferenceEvaluator};

    use super::*;
    use crate::pool::MemoryPool;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(
            QueryProperties::new("q1"),
            Arc::new(MemoryPool::new(0)),
            Arc::new(ReferenceEvaluator),
        )
    }

    fn batch(values: Vec<i64>) -> Batch {
        let schema = Schema::new(vec![Field::new("t.a", "a", DataType::Integer)]);
        Batch::new(schema, vec![Arc::new(Arr::Integer(TypedArray::from_values(values)))])
    }

    #[test]
    fn filters_rows_matching_mask() {
        let schema = Schema::new(vec![Field::new("t.a", "a", DataType::Integer)]);
        let cond = Expr::compare(CompareOp::Gt, Expr::Identifier("t.a".into()), Expr::Literal(Datum::Integer(2)));
        let mut op = FilterOperator::new(cond, Vec::new(), schema, ctx());
        let out = op.call(StreamEvent::Batch(batch(vec![1, 2, 3, 4])), EdgeLabel::None).unwrap();
        let StreamEvent::Batch(result) = &out[0] else { panic!() };
        assert_eq!(result.row_count(), 2);
    }

    #[test]
    fn emits_empty_batch_before_eos_when_nothing_survived() {
        let schema = Schema::new(vec![Field::new("t.a", "a", DataType::Integer)]);
        let cond = Expr::compare(CompareOp::Gt, Expr::Identifier("t.a".into()), Expr::Literal(Datum::Integer(100)));
        let mut op = FilterOperator::new(cond, Vec::new(), schema, ctx());
        op.call(StreamEvent::Batch(batch(vec![1, 2])), EdgeLabel::None).unwrap();
        let out = op.call(StreamEvent::Eos, EdgeLabel::None).unwrap();
        assert_eq!(out.len(), 2);
        assert!(matches!(out[0], StreamEvent::Batch(ref b) if b.is_empty()));
        assert!(out[1].is_eos());
    }

    #[test]
    fn eos_with_prior_output_does_not_add_extra_empty_batch() {
        let schema = Schema::new(vec![Field::new("t.a", "a", DataType::Integer)]);
        let cond = Expr::compare(CompareOp::Gt, Expr::Identifier("t.a".into()), Expr::Literal(Datum::Integer(1)));
        let mut op = FilterOperator::new(cond, Vec::new(), schema, ctx());
        op.call(StreamEvent::Batch(batch(vec![1, 2])), EdgeLabel::None).unwrap();
        let out = op.call(StreamEvent::Eos, EdgeLabel::None).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].is_eos());
    }
}
