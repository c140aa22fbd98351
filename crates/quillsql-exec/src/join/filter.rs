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

//! `Semi`/`Anti` `FilterJoin`: `Left` is the presence-check
//! relation, fully buffered and hashed by EOS; `Right` streams and is
//! filtered in place by whether its row's key is present in `Left`'s hash
//! set. Never emits `Left` columns — the output schema equals `Right`'s.

use hashbrown::HashSet;
use quillsql_common::{Batch, Datum, QuillError, Result, Schema};
use quillsql_expr::Expr;
use quillsql_plan::EdgeLabel;

use super::{extract_equi_keys, hash_datums};
use crate::operator::{ExecutionContext, Operator, StreamEvent};

pub struct FilterJoinOperator {
    condition: Expr,
    negated: bool,
    output_schema: Schema,
    ctx: ExecutionContext,
    build_batches: Vec<Batch>,
    probe_keys: Vec<Expr>,
    present: HashSet<u64>,
    build_ready: bool,
    sensors: quillsql_common::Sensors,
}

impl FilterJoinOperator {
    pub fn new(condition: Expr, negated: bool, output_schema: Schema, ctx: ExecutionContext) -> Self {
        Self {
            condition,
            negated,
            output_schema,
            ctx,
            build_batches: Vec::new(),
            probe_keys: Vec::new(),
            present: HashSet::new(),
            build_ready: false,
            sensors: quillsql_common::Sensors::new(),
        }
    }

    fn finalize_build(&mut self) -> Result<()> {
        let build_schema = self
            .build_batches
            .first()
            .map(|b| b.schema().clone())
            .unwrap_or_else(|| Schema::new(Vec::new()));
        let keys = extract_equi_keys(&self.condition, &build_schema)?;
        let (build_keys, probe_keys): (Vec<Expr>, Vec<Expr>) = keys.into_iter().unzip();
        let build_batch = if self.build_batches.is_empty() { Batch::empty(build_schema) } else { Batch::concat(&self.build_batches) };
        let key_columns = build_keys
            .iter()
            .map(|expr| self.ctx.evaluator.evaluate(expr, &build_batch))
            .collect::<Result<Vec<_>>>()?;
        for row in 0..build_batch.row_count() {
            let key: Vec<Datum> = key_columns.iter().map(|c| c.datum_at(row)).collect();
            self.present.insert(hash_datums(&key));
        }
        self.probe_keys = probe_keys;
        self.build_batches.clear();
        self.build_ready = true;
        Ok(())
    }

    fn filter(&self, batch: &Batch) -> Result<Batch> {
        let key_columns = self
            .probe_keys
            .iter()
            .map(|expr| self.ctx.evaluator.evaluate(expr, batch))
            .collect::<Result<Vec<_>>>()?;
        let indices: Vec<usize> = (0..batch.row_count())
            .filter(|&row| {
                let key: Vec<Datum> = key_columns.iter().map(|c| c.datum_at(row)).collect();
                let hit = self.present.contains(&hash_datums(&key));
                hit != self.negated
            })
            .collect();
        Ok(batch.take(&indices))
    }
}

impl Operator for FilterJoinOperator {
    fn schema(&self) -> &Schema {
        &self.output_schema
    }

    fn call(&mut self, input: StreamEvent, leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
        match (leg, input) {
            (EdgeLabel::Left, StreamEvent::Batch(batch)) => {
                if self.build_ready {
                    return Err(QuillError::invalid_internal_state("FilterJoin received a Left batch after Left EOS"));
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
                    return Err(QuillError::invalid_internal_state("FilterJoin received a Right batch before Left EOS"));
                }
                if batch.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(vec![StreamEvent::Batch(self.filter(&batch)?)])
            }
            (EdgeLabel::Right, StreamEvent::Eos) => {
                if !self.build_ready {
                    return Err(QuillError::invalid_internal_state("FilterJoin received Right EOS before Left EOS"));
                }
                Ok(vec![StreamEvent::Eos])
            }
            (EdgeLabel::None, _) => Err(QuillError::invalid_internal_state("FilterJoin requires Left/Right edge labels")),
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
        Schema::new(vec![Field::new(format!("{prefix}.id"), "id", DataType::Integer)])
    }

    fn batch(prefix: &str, ids: Vec<i64>) -> Batch {
        Batch::new(schema(prefix), vec![Arc::new(Array::Integer(TypedArray::from_values(ids)))])
    }

    fn condition() -> Expr {
        Expr::compare(CompareOp::Eq, Expr::Identifier("l.id".into()), Expr::Identifier("r.id".into()))
    }

    #[test]
    fn semi_join_keeps_only_probe_rows_present_in_build() {
        let mut op = FilterJoinOperator::new(condition(), false, schema("r"), ctx());
        op.call(StreamEvent::Batch(batch("l", vec![1, 2])), EdgeLabel::Left).unwrap();
        op.call(StreamEvent::Eos, EdgeLabel::Left).unwrap();
        let out = op.call(StreamEvent::Batch(batch("r", vec![1, 3, 2])), EdgeLabel::Right).unwrap();
        let StreamEvent::Batch(result) = &out[0] else { panic!() };
        let ids: Vec<i64> = (0..result.row_count()).map(|i| result.columns()[0].datum_at(i).as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn anti_join_keeps_only_probe_rows_absent_from_build() {
        let mut op = FilterJoinOperator::new(condition(), true, schema("r"), ctx());
        op.call(StreamEvent::Batch(batch("l", vec![1, 2])), EdgeLabel::Left).unwrap();
        op.call(StreamEvent::Eos, EdgeLabel::Left).unwrap();
        let out = op.call(StreamEvent::Batch(batch("r", vec![1, 3, 2])), EdgeLabel::Right).unwrap();
        let StreamEvent::Batch(result) = &out[0] else { panic!() };
        let ids: Vec<i64> = (0..result.row_count()).map(|i| result.columns()[0].datum_at(i).as_i64().unwrap()).collect();
        assert_eq!(ids, vec![3]);
    }
}
