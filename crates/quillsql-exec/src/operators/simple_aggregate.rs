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

//! `Aggregate` without a `GROUP BY`: one running accumulator per
//! aggregator, updated batch by batch, emitted as a single row at EOS.

use quillsql_common::{Batch, ColumnIdentity, Field, Result, Schema, Sensors};
use quillsql_expr::Expr;
use quillsql_plan::EdgeLabel;

use super::aggregate_state::Accumulator;
use crate::operator::{ExecutionContext, Operator, StreamEvent};

pub struct SimpleAggregateOperator {
    aggregates: Vec<(ColumnIdentity, Expr, Accumulator)>,
    output_schema: Schema,
    ctx: ExecutionContext,
    sensors: Sensors,
}

impl SimpleAggregateOperator {
    pub fn new(aggregates: Vec<(ColumnIdentity, Expr)>, output_schema: Schema, ctx: ExecutionContext) -> Result<Self> {
        let aggregates = aggregates
            .into_iter()
            .map(|(identity, expr)| {
                let Expr::Aggregate { name, args, distinct, .. } = &expr else {
                    return Err(quillsql_common::QuillError::invalid_internal_state(
                        "SimpleAggregate requires an Expr::Aggregate per output column",
                    ));
                };
                let accumulator = Accumulator::new(name, args, *distinct)?;
                Ok((identity, expr, accumulator))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            aggregates,
            output_schema,
            ctx,
            sensors: Sensors::new(),
        })
    }

    fn update(&mut self, batch: &Batch) -> Result<()> {
        for (_, expr, accumulator) in &mut self.aggregates {
            let Expr::Aggregate { args, .. } = expr else { unreachable!() };
            if args.is_empty() {
                for _ in 0..batch.row_count() {
                    accumulator.update(None);
                }
                continue;
            }
            if let Some(literal) = args[0].as_literal() {
                accumulator.update_literal(literal, batch.row_count());
                continue;
            }
            let values = self.ctx.evaluator.evaluate(&args[0], batch)?;
            for row in 0..values.len() {
                accumulator.update(Some(&values.datum_at(row)));
            }
        }
        Ok(())
    }

    fn finalize(&self) -> Batch {
        let columns = self
            .aggregates
            .iter()
            .zip(self.output_schema.fields())
            .map(|((_, _, accumulator), field)| single_row_array(field, accumulator.finalize()))
            .collect();
        Batch::new(self.output_schema.clone(), columns)
    }
}

fn single_row_array(field: &Field, datum: quillsql_common::Datum) -> quillsql_common::ArrayRef {
    use quillsql_common::array::TypedArray;
    use quillsql_common::{Array, DataType, Datum};
    std::sync::Arc::new(match field.data_type {
        DataType::Integer => Array::Integer(TypedArray::from_options(vec![datum.as_i64()])),
        DataType::Double => Array::Double(TypedArray::from_options(vec![datum.as_f64().map(ordered_float::OrderedFloat)])),
        DataType::Varchar => Array::Varchar(TypedArray::from_options(vec![match datum {
            Datum::Varchar(s) => Some(s),
            _ => None,
        }])),
        DataType::Boolean => Array::Boolean(TypedArray::from_options(vec![datum.as_bool()])),
        other => Array::Boxed(other, vec![if datum.is_null() { None } else { Some(datum) }]),
    })
}

impl Operator for SimpleAggregateOperator {
    fn schema(&self) -> &Schema {
        &self.output_schema
    }

    fn call(&mut self, input: StreamEvent, _leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
        match input {
            StreamEvent::Batch(batch) => {
                self.update(&batch)?;
                Ok(Vec::new())
            }
            StreamEvent::Eos => Ok(vec![StreamEvent::Batch(self.finalize()), StreamEvent::Eos]),
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
    use quillsql_common::{Array, DataType, QueryProperties};
    use quillsql_expr::ReferenceEvaluator;

    use super::*;
    use crate::pool::MemoryPool;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(QueryProperties::new("q1"), Arc::new(MemoryPool::new(0)), Arc::new(ReferenceEvaluator))
    }

    fn input_schema() -> Schema {
        Schema::new(vec![Field::new("t.a", "a", DataType::Integer)])
    }

    fn batch(values: Vec<i64>) -> Batch {
        Batch::new(input_schema(), vec![Arc::new(Array::Integer(TypedArray::from_values(values)))])
    }

    #[test]
    fn sums_across_multiple_batches_into_one_row() {
        let aggregates = vec![(
            "out.sum".into(),
            Expr::Aggregate {
                name: "SUM".into(),
                args: vec![Expr::Identifier("t.a".into())],
                distinct: false,
                order: Vec::new(),
                limit: None,
            },
        )];
        let output_schema = Schema::new(vec![Field::new("out.sum", "sum", DataType::Integer)]);
        let mut op = SimpleAggregateOperator::new(aggregates, output_schema, ctx()).unwrap();
        op.call(StreamEvent::Batch(batch(vec![1, 2, 3])), EdgeLabel::None).unwrap();
        op.call(StreamEvent::Batch(batch(vec![4])), EdgeLabel::None).unwrap();
        let out = op.call(StreamEvent::Eos, EdgeLabel::None).unwrap();
        let StreamEvent::Batch(result) = &out[0] else { panic!() };
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.columns()[0].datum_at(0), quillsql_common::Datum::Integer(10));
    }

    #[test]
    fn count_star_counts_all_rows_including_nulls() {
        let aggregates = vec![(
            "out.n".into(),
            Expr::Aggregate {
                name: "COUNT".into(),
                args: Vec::new(),
                distinct: false,
                order: Vec::new(),
                limit: None,
            },
        )];
        let output_schema = Schema::new(vec![Field::new("out.n", "n", DataType::Integer)]);
        let mut op = SimpleAggregateOperator::new(aggregates, output_schema, ctx()).unwrap();
        op.call(StreamEvent::Batch(batch(vec![1, 2])), EdgeLabel::None).unwrap();
        let out = op.call(StreamEvent::Eos, EdgeLabel::None).unwrap();
        let StreamEvent::Batch(result) = &out[0] else { panic!() };
        assert_eq!(result.columns()[0].datum_at(0), quillsql_common::Datum::Integer(2));
    }
}
