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

//! `Limit`: emits up to `limit` rows starting at `offset`, then
//! stops consuming — once the budget is reached the operator forwards
//! EOS without waiting for the input to run dry.

use quillsql_common::{Batch, Result, Schema, Sensors};
use quillsql_plan::EdgeLabel;

use crate::operator::{Operator, StreamEvent};

pub struct LimitOperator {
    limit: usize,
    offset: usize,
    schema: Schema,
    skipped: usize,
    emitted: usize,
    done: bool,
    sensors: Sensors,
}

impl LimitOperator {
    pub fn new(limit: usize, offset: usize, schema: Schema) -> Self {
        Self {
            limit,
            offset,
            schema,
            skipped: 0,
            emitted: 0,
            done: false,
            sensors: Sensors::new(),
        }
    }
}

impl Operator for LimitOperator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn call(&mut self, input: StreamEvent, _leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
        match input {
            StreamEvent::Batch(batch) => {
                if self.done || batch.is_empty() {
                    return Ok(Vec::new());
                }
                let mut indices = Vec::new();
                for row in 0..batch.row_count() {
                    if self.skipped < self.offset {
                        self.skipped += 1;
                        continue;
                    }
                    if self.emitted >= self.limit {
                        break;
                    }
                    indices.push(row);
                    self.emitted += 1;
                }
                let mut out = Vec::new();
                if !indices.is_empty() {
                    out.push(StreamEvent::Batch(batch.take(&indices)));
                }
                if self.emitted >= self.limit {
                    self.done = true;
                    out.push(StreamEvent::Eos);
                }
                Ok(out)
            }
            StreamEvent::Eos => {
                if self.done {
                    Ok(Vec::new())
                } else {
                    self.done = true;
                    Ok(vec![StreamEvent::Eos])
                }
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
    use quillsql_common::{Array, DataType, Field};

    use super::*;

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
    fn limit_with_offset_spans_multiple_batches() {
        let mut op = LimitOperator::new(2, 1, schema());
        let out = op.call(StreamEvent::Batch(batch(vec![10, 20, 30])), EdgeLabel::None).unwrap();
        let StreamEvent::Batch(first) = &out[0] else { panic!() };
        assert_eq!(ints(first), vec![20, 30]);
        assert!(out[1].is_eos());
    }

    #[test]
    fn limit_stops_consuming_after_budget_reached() {
        let mut op = LimitOperator::new(1, 0, schema());
        op.call(StreamEvent::Batch(batch(vec![1])), EdgeLabel::None).unwrap();
        let out = op.call(StreamEvent::Batch(batch(vec![2, 3])), EdgeLabel::None).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn eos_forwarded_once_even_if_limit_never_reached() {
        let mut op = LimitOperator::new(100, 0, schema());
        op.call(StreamEvent::Batch(batch(vec![1])), EdgeLabel::None).unwrap();
        let out = op.call(StreamEvent::Eos, EdgeLabel::None).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].is_eos());
    }
}
