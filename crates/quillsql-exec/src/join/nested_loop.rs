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

//! `NonEqui`/`NestedLoop` join: the condition (arbitrary, or
//! absent for an unconditional cross product folded through a join node)
//! is evaluated against the cartesian product of `Left` (buffered) and
//! each `Right` probe batch, in row-pair chunks bounded by
//! `ExecutionConfig::internal_batch_size` so a single probe batch against
//! a large build side never materializes an unbounded row-pair array.

use quillsql_common::{Batch, QuillError, Result, Schema};
use quillsql_expr::Expr;
use quillsql_plan::EdgeLabel;

use super::hash::gather;
use crate::operator::{ExecutionContext, Operator, StreamEvent};

pub struct NestedLoopJoinOperator {
    condition: Option<Expr>,
    output_schema: Schema,
    emit_unmatched: bool,
    ctx: ExecutionContext,
    build_batches: Vec<Batch>,
    build_batch: Option<Batch>,
    build_matched: Vec<bool>,
    build_ready: bool,
    sensors: quillsql_common::Sensors,
}

impl NestedLoopJoinOperator {
    pub fn new(condition: Option<Expr>, output_schema: Schema, emit_unmatched: bool, ctx: ExecutionContext) -> Self {
        Self {
            condition,
            output_schema,
            emit_unmatched,
            ctx,
            build_batches: Vec::new(),
            build_batch: None,
            build_matched: Vec::new(),
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
        let batch = if self.build_batches.is_empty() { Batch::empty(build_schema) } else { Batch::concat(&self.build_batches) };
        self.build_matched = vec![false; batch.row_count()];
        self.build_batch = Some(batch);
        self.build_batches.clear();
        self.build_ready = true;
    }

    /// Evaluates the condition (if any) over one `(build_row, probe_row)`
    /// chunk at a time, in `internal_batch_size`-sized slices of the
    /// cartesian product, and gathers the matching pairs into one output
    /// batch.
    fn probe(&mut self, probe_batch: &Batch) -> Result<Batch> {
        let build_batch = self.build_batch.clone().unwrap_or_else(|| Batch::empty(Schema::new(Vec::new())));
        let chunk_size = self.ctx.props.config.internal_batch_size.max(1);
        let mut build_idx = Vec::new();
        let mut probe_idx = Vec::new();
        let pairs: Vec<(usize, usize)> = (0..build_batch.row_count())
            .flat_map(|b| (0..probe_batch.row_count()).map(move |p| (b, p)))
            .collect();
        for chunk in pairs.chunks(chunk_size) {
            let (chunk_build, chunk_probe): (Vec<usize>, Vec<usize>) = chunk.iter().copied().unzip();
            let candidate = gather(
                &self.output_schema,
                build_batch.schema(),
                Some(&build_batch),
                &chunk_build.iter().map(|i| Some(*i)).collect::<Vec<_>>(),
                probe_batch.schema(),
                Some(probe_batch),
                &chunk_probe.iter().map(|i| Some(*i)).collect::<Vec<_>>(),
            );
            let keep: Vec<usize> = match &self.condition {
                None => (0..candidate.row_count()).collect(),
                Some(condition) => {
                    let mask = self.ctx.evaluator.evaluate(condition, &candidate)?;
                    (0..candidate.row_count()).filter(|&row| mask.datum_at(row).as_bool() == Some(true)).collect()
                }
            };
            for &row in &keep {
                build_idx.push(chunk_build[row]);
                probe_idx.push(chunk_probe[row]);
                self.build_matched[chunk_build[row]] = true;
            }
        }
        Ok(gather(
            &self.output_schema,
            build_batch.schema(),
            Some(&build_batch),
            &build_idx.iter().map(|i| Some(*i)).collect::<Vec<_>>(),
            probe_batch.schema(),
            Some(probe_batch),
            &probe_idx.iter().map(|i| Some(*i)).collect::<Vec<_>>(),
        ))
    }

    fn unmatched_build_rows(&self) -> Batch {
        let build_batch = self.build_batch.clone().unwrap_or_else(|| Batch::empty(Schema::new(Vec::new())));
        let indices: Vec<Option<usize>> = self
            .build_matched
            .iter()
            .enumerate()
            .filter_map(|(i, matched)| if *matched { None } else { Some(Some(i)) })
            .collect();
        gather(
            &self.output_schema,
            build_batch.schema(),
            Some(&build_batch),
            &indices,
            &Schema::new(Vec::new()),
            None,
            &vec![None; indices.len()],
        )
    }
}

impl Operator for NestedLoopJoinOperator {
    fn schema(&self) -> &Schema {
        &self.output_schema
    }

    fn call(&mut self, input: StreamEvent, leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
        match (leg, input) {
            (EdgeLabel::Left, StreamEvent::Batch(batch)) => {
                if self.build_ready {
                    return Err(QuillError::invalid_internal_state("NestedLoopJoin received a Left batch after Left EOS"));
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
                    return Err(QuillError::invalid_internal_state("NestedLoopJoin received a Right batch before Left EOS"));
                }
                if batch.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(vec![StreamEvent::Batch(self.probe(&batch)?)])
            }
            (EdgeLabel::Right, StreamEvent::Eos) => {
                if !self.build_ready {
                    return Err(QuillError::invalid_internal_state("NestedLoopJoin received Right EOS before Left EOS"));
                }
                let mut out = Vec::new();
                if self.emit_unmatched {
                    out.push(StreamEvent::Batch(self.unmatched_build_rows()));
                }
                out.push(StreamEvent::Eos);
                Ok(out)
            }
            (EdgeLabel::None, _) => Err(QuillError::invalid_internal_state("NestedLoopJoin requires Left/Right edge labels")),
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
    use quillsql_expr::{CompareOp, ReferenceEvaluator};

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

    fn output_schema() -> Schema {
        Schema::new(vec![Field::new("l.n", "n", DataType::Integer), Field::new("r.n", "n", DataType::Integer)])
    }

    #[test]
    fn evaluates_non_equi_condition_across_the_cartesian_product() {
        let condition = Expr::compare(
            CompareOp::Lt,
            Expr::Identifier("l.n".into()),
            Expr::Identifier("r.n".into()),
        );
        let mut op = NestedLoopJoinOperator::new(Some(condition), output_schema(), false, ctx());
        op.call(StreamEvent::Batch(batch("l", vec![1, 2])), EdgeLabel::Left).unwrap();
        op.call(StreamEvent::Eos, EdgeLabel::Left).unwrap();
        let out = op.call(StreamEvent::Batch(batch("r", vec![2, 3])), EdgeLabel::Right).unwrap();
        let StreamEvent::Batch(result) = &out[0] else { panic!() };
        assert_eq!(result.row_count(), 3);
    }

    #[test]
    fn unconditional_join_yields_full_cartesian_product() {
        let mut op = NestedLoopJoinOperator::new(None, output_schema(), false, ctx());
        op.call(StreamEvent::Batch(batch("l", vec![1, 2])), EdgeLabel::Left).unwrap();
        op.call(StreamEvent::Eos, EdgeLabel::Left).unwrap();
        let out = op.call(StreamEvent::Batch(batch("r", vec![10, 20, 30])), EdgeLabel::Right).unwrap();
        let StreamEvent::Batch(result) = &out[0] else { panic!() };
        assert_eq!(result.row_count(), 6);
    }

    #[test]
    fn outer_emits_unmatched_build_rows_at_eos() {
        let condition = Expr::compare(
            CompareOp::Eq,
            Expr::Identifier("l.n".into()),
            Expr::Identifier("r.n".into()),
        );
        let mut op = NestedLoopJoinOperator::new(Some(condition), output_schema(), true, ctx());
        op.call(StreamEvent::Batch(batch("l", vec![1, 2, 3])), EdgeLabel::Left).unwrap();
        op.call(StreamEvent::Eos, EdgeLabel::Left).unwrap();
        op.call(StreamEvent::Batch(batch("r", vec![2])), EdgeLabel::Right).unwrap();
        let out = op.call(StreamEvent::Eos, EdgeLabel::Right).unwrap();
        let StreamEvent::Batch(unmatched) = &out[0] else { panic!() };
        assert_eq!(unmatched.row_count(), 2);
        assert!(matches!(out[1], StreamEvent::Eos));
    }
}
