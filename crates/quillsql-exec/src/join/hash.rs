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

//! `Inner Join` / `Outer Join`: `Left` is buffered to EOS and
//! hashed by its equi-join keys; `Right` streams and probes the hash
//! table batch by batch.
//!
//! `JoinStrategy::from_logical` folds LEFT/RIGHT/FULL OUTER into one
//! `Outer` variant (see `DESIGN.md`'s Open Question entry); this operator
//! resolves that by always running full outer semantics
//! when `emit_unmatched` is set: unmatched probe (`Right`) rows are
//! emitted as soon as a batch is exhausted (their match status is known
//! immediately, since the build side is already complete); unmatched
//! build (`Left`) rows can only be known once the probe stream ends, so
//! they are emitted at `Right` EOS. A plan that wants a one-sided OUTER
//! join narrows the extra rows back out with a `Filter` above.

use std::sync::Arc;

use hashbrown::HashMap;
use quillsql_common::array::TypedArray;
use quillsql_common::{Array, ArrayRef, Batch, DataType, Datum, QuillError, Result, Schema, Sensors};
use quillsql_expr::Expr;
use quillsql_plan::EdgeLabel;

use super::{extract_equi_keys, hash_datums};
use crate::operator::{ExecutionContext, Operator, StreamEvent};

pub struct HashJoinOperator {
    condition: Expr,
    output_schema: Schema,
    emit_unmatched: bool,
    ctx: ExecutionContext,

    build_batches: Vec<Batch>,
    build_schema: Option<Schema>,
    build_keys: Vec<Expr>,
    probe_keys: Vec<Expr>,
    build_batch: Option<Batch>,
    build_index: HashMap<u64, Vec<usize>>,
    build_matched: Vec<bool>,
    build_ready: bool,

    sensors: Sensors,
}

impl HashJoinOperator {
    pub fn new(condition: Expr, output_schema: Schema, emit_unmatched: bool, ctx: ExecutionContext) -> Self {
        Self {
            condition,
            output_schema,
            emit_unmatched,
            ctx,
            build_batches: Vec::new(),
            build_schema: None,
            build_keys: Vec::new(),
            probe_keys: Vec::new(),
            build_batch: None,
            build_index: HashMap::new(),
            build_matched: Vec::new(),
            build_ready: false,
            sensors: Sensors::new(),
        }
    }

    fn finalize_build(&mut self) -> Result<()> {
        let build_schema = self.build_batches.first().map(|b| b.schema().clone()).unwrap_or_else(|| self.probe_schema_placeholder());
        let keys = extract_equi_keys(&self.condition, &build_schema)?;
        let (build_keys, probe_keys): (Vec<Expr>, Vec<Expr>) = keys.into_iter().unzip();
        let build_batch = if self.build_batches.is_empty() { Batch::empty(build_schema.clone()) } else { Batch::concat(&self.build_batches) };

        let mut index: HashMap<u64, Vec<usize>> = HashMap::new();
        let key_columns = build_keys
            .iter()
            .map(|expr| self.ctx.evaluator.evaluate(expr, &build_batch))
            .collect::<Result<Vec<_>>>()?;
        for row in 0..build_batch.row_count() {
            let key: Vec<Datum> = key_columns.iter().map(|c| c.datum_at(row)).collect();
            index.entry(hash_datums(&key)).or_default().push(row);
        }

        self.build_matched = vec![false; build_batch.row_count()];
        self.build_index = index;
        self.build_keys = build_keys;
        self.probe_keys = probe_keys;
        self.build_schema = Some(build_schema);
        self.build_batch = Some(build_batch);
        self.build_batches.clear();
        self.build_ready = true;
        Ok(())
    }

    fn probe_schema_placeholder(&self) -> Schema {
        Schema::new(Vec::new())
    }

    fn probe(&mut self, probe_batch: &Batch) -> Result<Batch> {
        let build_batch = self.build_batch.as_ref().expect("build side finalized before any probe batch");
        let build_schema = self.build_schema.as_ref().unwrap();
        let key_columns = self
            .probe_keys
            .iter()
            .map(|expr| self.ctx.evaluator.evaluate(expr, probe_batch))
            .collect::<Result<Vec<_>>>()?;

        let mut build_indices: Vec<Option<usize>> = Vec::new();
        let mut probe_indices: Vec<Option<usize>> = Vec::new();
        for row in 0..probe_batch.row_count() {
            let key: Vec<Datum> = key_columns.iter().map(|c| c.datum_at(row)).collect();
            match self.build_index.get(&hash_datums(&key)) {
                Some(matches) if !matches.is_empty() => {
                    for &build_row in matches {
                        self.build_matched[build_row] = true;
                        build_indices.push(Some(build_row));
                        probe_indices.push(Some(row));
                    }
                }
                _ => {
                    if self.emit_unmatched {
                        build_indices.push(None);
                        probe_indices.push(Some(row));
                    }
                }
            }
        }

        Ok(gather(&self.output_schema, build_schema, Some(build_batch), &build_indices, probe_batch.schema(), Some(probe_batch), &probe_indices))
    }

    fn unmatched_build_rows(&self) -> Batch {
        let build_batch = self.build_batch.as_ref().expect("build side finalized before EOS");
        let build_schema = self.build_schema.as_ref().unwrap();
        let indices: Vec<Option<usize>> = self
            .build_matched
            .iter()
            .enumerate()
            .filter_map(|(row, matched)| if *matched { None } else { Some(Some(row)) })
            .collect();
        let probe_indices = vec![None; indices.len()];
        let probe_schema = Schema::new(Vec::new());
        gather(&self.output_schema, build_schema, Some(build_batch), &indices, &probe_schema, None, &probe_indices)
    }
}

/// Aligns a build-side and probe-side batch into `output_schema` by
/// identity, with `None` indices filling nulls — shared by every join
/// specialization that needs a row-pair alignment.
pub fn gather(
    output_schema: &Schema,
    left_schema: &Schema,
    left_batch: Option<&Batch>,
    left_indices: &[Option<usize>],
    right_schema: &Schema,
    right_batch: Option<&Batch>,
    right_indices: &[Option<usize>],
) -> Batch {
    let row_count = left_indices.len();
    let columns = output_schema
        .fields()
        .iter()
        .map(|field| {
            if let Some(col) = left_schema.index_of(&field.identity) {
                gather_column(field.data_type, left_batch, col, left_indices)
            } else if let Some(col) = right_schema.index_of(&field.identity) {
                gather_column(field.data_type, right_batch, col, right_indices)
            } else {
                Arc::new(Array::nulls(field.data_type, row_count))
            }
        })
        .collect();
    Batch::new(output_schema.clone(), columns)
}

fn gather_column(data_type: DataType, batch: Option<&Batch>, col: usize, indices: &[Option<usize>]) -> ArrayRef {
    let datums: Vec<Datum> = indices
        .iter()
        .map(|idx| match (batch, idx) {
            (Some(batch), Some(row)) => batch.columns()[col].datum_at(*row),
            _ => Datum::Null,
        })
        .collect();
    build_typed_array(data_type, datums)
}

pub fn build_typed_array(data_type: DataType, datums: Vec<Datum>) -> ArrayRef {
    Arc::new(match data_type {
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

impl Operator for HashJoinOperator {
    fn schema(&self) -> &Schema {
        &self.output_schema
    }

    fn call(&mut self, input: StreamEvent, leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
        match (leg, input) {
            (EdgeLabel::Left, StreamEvent::Batch(batch)) => {
                if self.build_ready {
                    return Err(QuillError::invalid_internal_state("HashJoin received a Left batch after Left EOS"));
                }
                self.build_batches.push(batch);
                Ok(Vec::new())
            }
            (EdgeLabel::Left, StreamEvent::Eos) => {
                self.finalize_build()?;
                Ok(Vec::new())
            }
            (EdgeLabel::Right, StreamEvent::Batch(batch)) => {
                if !self.build_ready {
                    return Err(QuillError::invalid_internal_state("HashJoin received a Right batch before Left EOS"));
                }
                if batch.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(vec![StreamEvent::Batch(self.probe(&batch)?)])
            }
            (EdgeLabel::Right, StreamEvent::Eos) => {
                if !self.build_ready {
                    return Err(QuillError::invalid_internal_state("HashJoin received Right EOS before Left EOS"));
                }
                let mut out = Vec::new();
                if self.emit_unmatched {
                    out.push(StreamEvent::Batch(self.unmatched_build_rows()));
                }
                out.push(StreamEvent::Eos);
                Ok(out)
            }
            (EdgeLabel::None, _) => Err(QuillError::invalid_internal_state("HashJoin requires Left/Right edge labels")),
        }
    }

    fn sensors(&self) -> &Sensors {
        &self.sensors
    }
}

#[cfg(test)]
mod tests {
    use quillsql_common::array::TypedArray;
    use quillsql_common::{Field, QueryProperties};
    use quillsql_expr::ReferenceEvaluator;

    use super::*;
    use crate::pool::MemoryPool;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(QueryProperties::new("q1"), Arc::new(MemoryPool::new(0)), Arc::new(ReferenceEvaluator))
    }

    fn left_schema() -> Schema {
        Schema::new(vec![Field::new("l.id", "id", DataType::Integer), Field::new("l.name", "name", DataType::Varchar)])
    }

    fn right_schema() -> Schema {
        Schema::new(vec![Field::new("r.id", "id", DataType::Integer), Field::new("r.amount", "amount", DataType::Integer)])
    }

    fn output_schema() -> Schema {
        Schema::new(vec![
            Field::new("l.id", "id", DataType::Integer),
            Field::new("l.name", "name", DataType::Varchar),
            Field::new("r.amount", "amount", DataType::Integer),
        ])
    }

    fn left_batch() -> Batch {
        Batch::new(
            left_schema(),
            vec![
                Arc::new(Array::Integer(TypedArray::from_values(vec![1, 2, 3]))),
                Arc::new(Array::Varchar(TypedArray::from_values(vec!["a".into(), "b".into(), "c".into()]))),
            ],
        )
    }

    fn right_batch(ids: Vec<i64>, amounts: Vec<i64>) -> Batch {
        Batch::new(
            right_schema(),
            vec![Arc::new(Array::Integer(TypedArray::from_values(ids))), Arc::new(Array::Integer(TypedArray::from_values(amounts)))],
        )
    }

    fn condition() -> Expr {
        Expr::compare(quillsql_expr::CompareOp::Eq, Expr::Identifier("l.id".into()), Expr::Identifier("r.id".into()))
    }

    #[test]
    fn inner_join_emits_only_matched_pairs() {
        let mut op = HashJoinOperator::new(condition(), output_schema(), false, ctx());
        op.call(StreamEvent::Batch(left_batch()), EdgeLabel::Left).unwrap();
        op.call(StreamEvent::Eos, EdgeLabel::Left).unwrap();
        let out = op.call(StreamEvent::Batch(right_batch(vec![2, 99], vec![20, 1])), EdgeLabel::Right).unwrap();
        let StreamEvent::Batch(result) = &out[0] else { panic!() };
        assert_eq!(result.row_count(), 1);
        assert_eq!(result.columns()[1].datum_at(0), Datum::Varchar("b".into()));
        let out = op.call(StreamEvent::Eos, EdgeLabel::Right).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].is_eos());
    }

    #[test]
    fn outer_join_emits_unmatched_probe_immediately_and_unmatched_build_at_eos() {
        let mut op = HashJoinOperator::new(condition(), output_schema(), true, ctx());
        op.call(StreamEvent::Batch(left_batch()), EdgeLabel::Left).unwrap();
        op.call(StreamEvent::Eos, EdgeLabel::Left).unwrap();

        let out = op.call(StreamEvent::Batch(right_batch(vec![1, 42], vec![10, 5])), EdgeLabel::Right).unwrap();
        let StreamEvent::Batch(matched) = &out[0] else { panic!() };
        assert_eq!(matched.row_count(), 2);
        let has_unmatched_probe = (0..matched.row_count()).any(|row| matched.columns()[1].datum_at(row).is_null());
        assert!(has_unmatched_probe);

        let out = op.call(StreamEvent::Eos, EdgeLabel::Right).unwrap();
        let StreamEvent::Batch(unmatched_build) = &out[0] else { panic!() };
        assert_eq!(unmatched_build.row_count(), 2);
        assert!(out[1].is_eos());
    }
}
