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

//! `AggregateAndGroup`: groups rows by a resolved key and folds
//! each row into a per-group `Accumulator` set as batches arrive, rather
//! than buffering per-batch partial batches and running a separate
//! finalizer merge pass at EOS. Because every `Accumulator` already knows
//! how to merge two partial states, collapsing the partial immediately on
//! arrival is equivalent to buffer-then-finalize and avoids holding
//! `max_buffer_size`-worth of intermediate batches in memory; see
//! `DESIGN.md` for this as a recorded simplification. `max_buffer_size` is
//! still accepted so callers can express the same budget, but with
//! per-row folding the live group table never exceeds the number of
//! distinct keys regardless of its value.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use hashbrown::HashMap;
use quillsql_common::array::TypedArray;
use quillsql_common::{Array, ArrayRef, Batch, ColumnIdentity, DataType, Datum, Field, QuillError, Result, Schema, Sensors};
use quillsql_expr::Expr;
use quillsql_plan::EdgeLabel;

use super::aggregate_state::Accumulator;
use crate::operator::{ExecutionContext, Operator, StreamEvent};

/// Resolves `GROUP BY <n>` against the projection list (here `schema`,
/// the operator's own output schema, whose columns mirror the select
/// list in order) — mirrors `sort::resolve_order_by`'s positional
/// handling for `ORDER BY`.
fn resolve_group_by(group_by: &[Expr], schema: &Schema) -> Result<Vec<Expr>> {
    group_by
        .iter()
        .map(|expr| {
            if let Some(Datum::Integer(position)) = expr.as_literal() {
                let index = *position as usize;
                let field = schema
                    .fields()
                    .get(index.wrapping_sub(1))
                    .ok_or_else(|| QuillError::sql(format!("GROUP BY position {position} is out of range for the projection list")))?;
                Ok(Expr::Identifier(field.identity.clone()))
            } else {
                Ok(expr.clone())
            }
        })
        .collect()
}

fn hash_key(values: &[Datum]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for value in values {
        value.to_string().hash(&mut hasher);
    }
    hasher.finish()
}

pub struct AggregateAndGroupOperator {
    group_by: Vec<Expr>,
    aggregates: Vec<(ColumnIdentity, Expr, Accumulator)>,
    output_schema: Schema,
    ctx: ExecutionContext,
    #[allow(dead_code)]
    max_buffer_size: usize,
    groups: HashMap<u64, (Vec<Datum>, Vec<Accumulator>)>,
    group_order: Vec<u64>,
    sensors: Sensors,
}

impl AggregateAndGroupOperator {
    pub fn new(
        group_by: Vec<Expr>,
        aggregates: Vec<(ColumnIdentity, Expr)>,
        output_schema: Schema,
        max_buffer_size: usize,
        ctx: ExecutionContext,
    ) -> Result<Self> {
        let group_by = resolve_group_by(&group_by, &output_schema)?;
        let aggregates = aggregates
            .into_iter()
            .map(|(identity, expr)| {
                let Expr::Aggregate { name, args, distinct, .. } = &expr else {
                    return Err(QuillError::invalid_internal_state(
                        "AggregateAndGroup requires an Expr::Aggregate per non-grouping output column",
                    ));
                };
                let accumulator = Accumulator::new(name, args, *distinct)?;
                Ok((identity, expr, accumulator))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            group_by,
            aggregates,
            output_schema,
            ctx,
            max_buffer_size: max_buffer_size.max(1),
            groups: HashMap::new(),
            group_order: Vec::new(),
            sensors: Sensors::new(),
        })
    }

    fn update(&mut self, batch: &Batch) -> Result<()> {
        if batch.row_count() == 0 {
            return Ok(());
        }
        let group_columns = self
            .group_by
            .iter()
            .map(|expr| self.ctx.evaluator.evaluate(expr, batch))
            .collect::<Result<Vec<_>>>()?;
        let arg_columns = self
            .aggregates
            .iter()
            .map(|(_, expr, _)| {
                let Expr::Aggregate { args, .. } = expr else { unreachable!() };
                if args.is_empty() || args[0].as_literal().is_some() {
                    Ok(None)
                } else {
                    self.ctx.evaluator.evaluate(&args[0], batch).map(Some)
                }
            })
            .collect::<Result<Vec<Option<ArrayRef>>>>()?;

        for row in 0..batch.row_count() {
            let key_values: Vec<Datum> = group_columns.iter().map(|column| column.datum_at(row)).collect();
            let key = hash_key(&key_values);
            let group_order = &mut self.group_order;
            let prototypes = &self.aggregates;
            let entry = self.groups.entry(key).or_insert_with(|| {
                group_order.push(key);
                let accumulators = prototypes.iter().map(|(_, _, prototype)| prototype.clone()).collect();
                (key_values, accumulators)
            });
            for (i, (_, expr, _)) in self.aggregates.iter().enumerate() {
                let Expr::Aggregate { args, .. } = expr else { unreachable!() };
                let accumulator = &mut entry.1[i];
                if args.is_empty() {
                    accumulator.update(None);
                } else if let Some(literal) = args[0].as_literal() {
                    accumulator.update_literal(literal, 1);
                } else {
                    let values = arg_columns[i].as_ref().expect("evaluated above for non-literal args");
                    accumulator.update(Some(&values.datum_at(row)));
                }
            }
        }
        Ok(())
    }

    fn finalize(&self) -> Batch {
        let fields = self.output_schema.fields();
        let group_width = self.group_by.len();
        let rows: Vec<(&Vec<Datum>, &Vec<Accumulator>)> = self
            .group_order
            .iter()
            .map(|key| {
                let (values, accumulators) = self.groups.get(key).expect("group_order tracks every inserted key");
                (values, accumulators)
            })
            .collect();

        let columns = fields
            .iter()
            .enumerate()
            .map(|(col, field)| {
                let datums: Vec<Datum> = rows
                    .iter()
                    .map(|(group_values, accumulators)| {
                        if col < group_width {
                            group_values[col].clone()
                        } else {
                            accumulators[col - group_width].finalize()
                        }
                    })
                    .collect();
                build_array(field, datums)
            })
            .collect();
        Batch::new(self.output_schema.clone(), columns)
    }
}

fn build_array(field: &Field, datums: Vec<Datum>) -> ArrayRef {
    std::sync::Arc::new(match field.data_type {
        DataType::Integer => Array::Integer(TypedArray::from_options(datums.iter().map(Datum::as_i64).collect())),
        DataType::Double => {
            Array::Double(TypedArray::from_options(datums.iter().map(|d| d.as_f64().map(ordered_float::OrderedFloat)).collect()))
        }
        DataType::Boolean => Array::Boolean(TypedArray::from_options(datums.iter().map(Datum::as_bool).collect())),
        DataType::Varchar => Array::Varchar(TypedArray::from_options(
            datums
                .into_iter()
                .map(|d| match d {
                    Datum::Varchar(s) => Some(s),
                    _ => None,
                })
                .collect(),
        )),
        other => Array::Boxed(other, datums.into_iter().map(|d| if d.is_null() { None } else { Some(d) }).collect()),
    })
}

impl Operator for AggregateAndGroupOperator {
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
    use quillsql_common::QueryProperties;
    use quillsql_expr::ReferenceEvaluator;

    use super::*;
    use crate::pool::MemoryPool;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(QueryProperties::new("q1"), Arc::new(MemoryPool::new(0)), Arc::new(ReferenceEvaluator))
    }

    fn input_schema() -> Schema {
        Schema::new(vec![
            Field::new("t.grp", "grp", DataType::Varchar),
            Field::new("t.val", "val", DataType::Integer),
        ])
    }

    fn batch(groups: Vec<&str>, values: Vec<i64>) -> Batch {
        Batch::new(
            input_schema(),
            vec![
                Arc::new(Array::Varchar(TypedArray::from_values(groups.into_iter().map(String::from).collect()))),
                Arc::new(Array::Integer(TypedArray::from_values(values))),
            ],
        )
    }

    fn aggregate_expr(name: &str) -> Expr {
        Expr::Aggregate {
            name: name.into(),
            args: vec![Expr::Identifier("t.val".into())],
            distinct: false,
            order: Vec::new(),
            limit: None,
        }
    }

    fn output_schema() -> Schema {
        Schema::new(vec![
            Field::new("out.grp", "grp", DataType::Varchar),
            Field::new("out.sum", "sum", DataType::Integer),
        ])
    }

    fn row_map(batch: &Batch) -> std::collections::HashMap<String, i64> {
        (0..batch.row_count())
            .map(|row| {
                let group = match batch.columns()[0].datum_at(row) {
                    Datum::Varchar(s) => s,
                    other => panic!("unexpected group datum {other:?}"),
                };
                let sum = batch.columns()[1].datum_at(row).as_i64().unwrap();
                (group, sum)
            })
            .collect()
    }

    #[test]
    fn groups_and_sums_across_batches() {
        let group_by = vec![Expr::Identifier("t.grp".into())];
        let aggregates = vec![("out.sum".into(), aggregate_expr("SUM"))];
        let mut op = AggregateAndGroupOperator::new(group_by, aggregates, output_schema(), 64, ctx()).unwrap();
        op.call(StreamEvent::Batch(batch(vec!["a", "b", "a"], vec![1, 10, 2])), EdgeLabel::None)
            .unwrap();
        op.call(StreamEvent::Batch(batch(vec!["b", "a"], vec![5, 3])), EdgeLabel::None).unwrap();
        let out = op.call(StreamEvent::Eos, EdgeLabel::None).unwrap();
        let StreamEvent::Batch(result) = &out[0] else { panic!() };
        assert_eq!(result.row_count(), 2);
        let rows = row_map(result);
        assert_eq!(rows["a"], 6);
        assert_eq!(rows["b"], 15);
    }

    #[test]
    fn resolves_positional_group_by_against_output_schema() {
        let group_by = vec![Expr::Literal(Datum::Integer(1))];
        let aggregates = vec![("out.sum".into(), aggregate_expr("SUM"))];
        let mut op = AggregateAndGroupOperator::new(group_by, aggregates, output_schema(), 64, ctx()).unwrap();
        op.call(StreamEvent::Batch(batch(vec!["x", "x", "y"], vec![1, 1, 9])), EdgeLabel::None)
            .unwrap();
        let out = op.call(StreamEvent::Eos, EdgeLabel::None).unwrap();
        let StreamEvent::Batch(result) = &out[0] else { panic!() };
        let rows = row_map(result);
        assert_eq!(rows["x"], 2);
        assert_eq!(rows["y"], 9);
    }

    #[test]
    fn no_input_rows_produce_no_groups() {
        let group_by = vec![Expr::Identifier("t.grp".into())];
        let aggregates = vec![("out.sum".into(), aggregate_expr("SUM"))];
        let mut op = AggregateAndGroupOperator::new(group_by, aggregates, output_schema(), 64, ctx()).unwrap();
        op.call(StreamEvent::Batch(Batch::empty(input_schema())), EdgeLabel::None).unwrap();
        let out = op.call(StreamEvent::Eos, EdgeLabel::None).unwrap();
        let StreamEvent::Batch(result) = &out[0] else { panic!() };
        assert_eq!(result.row_count(), 0);
    }
}
