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

//! `Cross` and `Unnest` joins.
//!
//! `CrossJoinOperator` is `NestedLoopJoinOperator` with no condition to
//! filter by — every `(build_row, probe_row)` pair survives, still
//! produced in `internal_batch_size`-sized chunks so a probe batch
//! against a large buffered `Left` never materializes the full product
//! at once.
//!
//! `UnnestJoinOperator` expands an array-valued expression into one row
//! per element, carried alongside the source row's other columns. It
//! only has one real input; the join node's `condition` slot is
//! repurposed to hold the array expression to explode (the physical
//! plan has no dedicated field for it), and the `Right` edge is left
//! unused — the planner attaches the unnest source to `Left` like every
//! other join operator here.

use std::sync::Arc;

use quillsql_common::{ArrayRef, Batch, Datum, QuillError, Result, Schema};
use quillsql_expr::Expr;
use quillsql_plan::EdgeLabel;

use super::hash::{build_typed_array, gather};
use crate::operator::{ExecutionContext, Operator, StreamEvent};

pub struct CrossJoinOperator {
    output_schema: Schema,
    ctx: ExecutionContext,
    build_batches: Vec<Batch>,
    build_batch: Option<Batch>,
    build_ready: bool,
    sensors: quillsql_common::Sensors,
}

impl CrossJoinOperator {
    pub fn new(output_schema: Schema, ctx: ExecutionContext) -> Self {
        Self {
            output_schema,
            ctx,
            build_batches: Vec::new(),
            build_batch: None,
            build_ready: false,
            sensors: quillsql_common::Sensors::new(),
        }
    }

    fn finalize_build(&mut self) {
        let build_schema = self
            .build_batches
            .first()
            .map(|b| b.schema().clone())
            .unwrap_or_else(|| Schema::new(Vec::new()));
        self.build_batch = Some(if self.build_batches.is_empty() { Batch::empty(build_schema) } else { Batch::concat(&self.build_batches) });
        self.build_batches.clear();
        self.build_ready = true;
    }

    fn probe(&self, probe_batch: &Batch) -> Vec<Batch> {
        let build_batch = self.build_batch.clone().unwrap_or_else(|| Batch::empty(Schema::new(Vec::new())));
        let chunk_size = self.ctx.props.config.internal_batch_size.max(1);
        let pairs: Vec<(usize, usize)> = (0..build_batch.row_count())
            .flat_map(|b| (0..probe_batch.row_count()).map(move |p| (b, p)))
            .collect();
        pairs
            .chunks(chunk_size)
            .map(|chunk| {
                let (build_idx, probe_idx): (Vec<usize>, Vec<usize>) = chunk.iter().copied().unzip();
                gather(
                    &self.output_schema,
                    build_batch.schema(),
                    Some(&build_batch),
                    &build_idx.iter().map(|i| Some(*i)).collect::<Vec<_>>(),
                    probe_batch.schema(),
                    Some(probe_batch),
                    &probe_idx.iter().map(|i| Some(*i)).collect::<Vec<_>>(),
                )
            })
            .collect()
    }
}

impl Operator for CrossJoinOperator {
    fn schema(&self) -> &Schema {
        &self.output_schema
    }

    fn call(&mut self, input: StreamEvent, leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
        match (leg, input) {
            (EdgeLabel::Left, StreamEvent::Batch(batch)) => {
                if self.build_ready {
                    return Err(QuillError::invalid_internal_state("CrossJoin received a Left batch after Left EOS"));
                }
                self.build_batches.push(batch);
                Ok(Vec::new())
            }
            (EdgeLabel::Left, StreamEvent::Eos) => {
                self.finalize_build();
                Ok(Vec::new())
            }
            (EdgeLabel::Right, StreamEvent::Batch(batch)) => {
                if !self.build_ready {
                    return Err(QuillError::invalid_internal_state("CrossJoin received a Right batch before Left EOS"));
                }
                if batch.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(self.probe(&batch).into_iter().map(StreamEvent::Batch).collect())
            }
            (EdgeLabel::Right, StreamEvent::Eos) => {
                if !self.build_ready {
                    return Err(QuillError::invalid_internal_state("CrossJoin received Right EOS before Left EOS"));
                }
                Ok(vec![StreamEvent::Eos])
            }
            (EdgeLabel::None, _) => Err(QuillError::invalid_internal_state("CrossJoin requires Left/Right edge labels")),
        }
    }

    fn sensors(&self) -> &quillsql_common::Sensors {
        &self.sensors
    }
}

pub struct UnnestJoinOperator {
    array_expr: Expr,
    output_schema: Schema,
    ctx: ExecutionContext,
    sensors: quillsql_common::Sensors,
}

impl UnnestJoinOperator {
    pub fn new(array_expr: Expr, output_schema: Schema, ctx: ExecutionContext) -> Self {
        Self { array_expr, output_schema, ctx, sensors: quillsql_common::Sensors::new() }
    }

    fn expand(&self, batch: &Batch) -> Result<Batch> {
        let arrays = self.ctx.evaluator.evaluate(&self.array_expr, batch)?;
        let source_cols = batch.schema().fields().len();
        let mut source_rows: Vec<usize> = Vec::new();
        let mut elements: Vec<Datum> = Vec::new();
        for row in 0..batch.row_count() {
            match arrays.datum_at(row) {
                Datum::Array(items) => {
                    for item in items {
                        source_rows.push(row);
                        elements.push(item);
                    }
                }
                Datum::Null => {}
                other => {
                    source_rows.push(row);
                    elements.push(other);
                }
            }
        }
        let unnest_field = self
            .output_schema
            .fields()
            .last()
            .ok_or_else(|| QuillError::invalid_internal_state("Unnest output schema has no columns"))?;
        let unnested: ArrayRef = build_typed_array(unnest_field.data_type, elements);
        let source_indices: Vec<Option<usize>> = source_rows.into_iter().map(Some).collect();
        let mut columns: Vec<ArrayRef> = (0..source_cols)
            .map(|col| {
                let datums: Vec<Datum> = source_indices.iter().map(|idx| idx.map(|row| batch.columns()[col].datum_at(row)).unwrap_or(Datum::Null)).collect();
                build_typed_array(batch.columns()[col].data_type(), datums)
            })
            .collect();
        columns.push(unnested);
        Ok(Batch::new(self.output_schema.clone(), columns))
    }
}

impl Operator for UnnestJoinOperator {
    fn schema(&self) -> &Schema {
        &self.output_schema
    }

    fn call(&mut self, input: StreamEvent, leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
        match (leg, input) {
            (EdgeLabel::Left, StreamEvent::Batch(batch)) => {
                if batch.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(vec![StreamEvent::Batch(self.expand(&batch)?)])
            }
            (EdgeLabel::Left, StreamEvent::Eos) => Ok(vec![StreamEvent::Eos]),
            (EdgeLabel::Right, _) => Ok(Vec::new()),
            (EdgeLabel::None, _) => Err(QuillError::invalid_internal_state("UnnestJoin requires a Left edge label")),
        }
    }

    fn sensors(&self) -> &quillsql_common::Sensors {
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

    fn schema(prefix: &str) -> Schema {
        Schema::new(vec![Field::new(format!("{prefix}.n"), "n", DataType::Integer)])
    }

    fn batch(prefix: &str, values: Vec<i64>) -> Batch {
        Batch::new(schema(prefix), vec![Arc::new(Array::Integer(TypedArray::from_values(values)))])
    }

    #[test]
    fn cross_join_yields_every_pair_in_chunks() {
        let output_schema = Schema::new(vec![Field::new("l.n", "n", DataType::Integer), Field::new("r.n", "n", DataType::Integer)]);
        let mut op = CrossJoinOperator::new(output_schema, ctx());
        op.call(StreamEvent::Batch(batch("l", vec![1, 2])), EdgeLabel::Left).unwrap();
        op.call(StreamEvent::Eos, EdgeLabel::Left).unwrap();
        let out = op.call(StreamEvent::Batch(batch("r", vec![10, 20, 30])), EdgeLabel::Right).unwrap();
        let total: usize = out
            .iter()
            .map(|e| match e {
                StreamEvent::Batch(b) => b.row_count(),
                StreamEvent::Eos => 0,
            })
            .sum();
        assert_eq!(total, 6);
    }

    #[test]
    fn unnest_expands_array_valued_column_per_row() {
        let source_schema = Schema::new(vec![Field::new("t.id", "id", DataType::Integer), Field::new("t.tags", "tags", DataType::Array)]);
        let ids = Array::Integer(TypedArray::from_values(vec![1, 2]));
        let tags = Array::Boxed(
            DataType::Array,
            vec![
                Some(Datum::Array(vec![Datum::Integer(10), Datum::Integer(11)])),
                Some(Datum::Array(vec![Datum::Integer(20)])),
            ],
        );
        let source = Batch::new(source_schema, vec![Arc::new(ids), Arc::new(tags)]);

        let output_schema = Schema::new(vec![Field::new("t.id", "id", DataType::Integer), Field::new("unnest.tag", "tag", DataType::Integer)]);
        let mut op = UnnestJoinOperator::new(Expr::Identifier("t.tags".into()), output_schema, ctx());
        let out = op.call(StreamEvent::Batch(source), EdgeLabel::Left).unwrap();
        let StreamEvent::Batch(result) = &out[0] else { panic!() };
        assert_eq!(result.row_count(), 3);
        let ids: Vec<i64> = (0..result.row_count()).map(|i| result.columns()[0].datum_at(i).as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 1, 2]);
        let eos = op.call(StreamEvent::Eos, EdgeLabel::Left).unwrap();
        assert!(matches!(eos[0], StreamEvent::Eos));
    }
}
