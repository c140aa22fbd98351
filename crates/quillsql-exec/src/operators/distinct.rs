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

//! `Distinct`: a hash set of row-hashes over the distinct-on
//! columns (or every column), persisting across batches for the whole
//! operator lifetime.

use std::hash::{Hash, Hasher};

use hashbrown::HashSet;
use quillsql_common::{ArrayRef, Batch, ColumnIdentity, Result, Schema, Sensors};
use quillsql_plan::EdgeLabel;

use crate::operator::{Operator, StreamEvent};

pub struct DistinctOperator {
    distinct_on: Vec<ColumnIdentity>,
    schema: Schema,
    seen: HashSet<u64>,
    emitted_any: bool,
    sensors: Sensors,
}

impl DistinctOperator {
    pub fn new(distinct_on: Vec<ColumnIdentity>, schema: Schema) -> Self {
        Self {
            distinct_on,
            schema,
            seen: HashSet::new(),
            emitted_any: false,
            sensors: Sensors::new(),
        }
    }

    fn key_columns<'a>(&self, batch: &'a Batch) -> Vec<&'a ArrayRef> {
        if self.distinct_on.is_empty() {
            batch.columns().iter().collect()
        } else {
            self.distinct_on
                .iter()
                .map(|identity| {
                    batch
                        .column_by_identity(identity)
                        .unwrap_or_else(|| panic!("distinct-on column {identity} absent from input batch"))
                })
                .collect()
        }
    }

    fn row_hash(columns: &[&ArrayRef], row: usize) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        for column in columns {
            column.datum_at(row).to_string().hash(&mut hasher);
        }
        hasher.finish()
    }
}

impl Operator for DistinctOperator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn call(&mut self, input: StreamEvent, _leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
        match input {
            StreamEvent::Batch(batch) => {
                if batch.is_empty() {
                    return Ok(if self.emitted_any {
                        Vec::new()
                    } else {
                        vec![StreamEvent::Batch(batch)]
                    });
                }
                let columns = self.key_columns(&batch);
                let mut indices = Vec::new();
                for row in 0..batch.row_count() {
                    let hash = Self::row_hash(&columns, row);
                    if self.seen.insert(hash) {
                        indices.push(row);
                    }
                }
                let output = batch.take(&indices);
                if !output.is_empty() {
                    self.emitted_any = true;
                }
                Ok(vec![StreamEvent::Batch(output)])
            }
            StreamEvent::Eos => Ok(vec![StreamEvent::Eos]),
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
    fn dedups_within_and_across_batches() {
        let mut op = DistinctOperator::new(Vec::new(), schema());
        let out1 = op.call(StreamEvent::Batch(batch(vec![1, 1, 2])), EdgeLabel::None).unwrap();
        let StreamEvent::Batch(first) = &out1[0] else { panic!() };
        assert_eq!(ints(first), vec![1, 2]);

        let out2 = op.call(StreamEvent::Batch(batch(vec![2, 3])), EdgeLabel::None).unwrap();
        let StreamEvent::Batch(second) = &out2[0] else { panic!() };
        assert_eq!(ints(second), vec![3]);
    }

    #[test]
    fn empty_batch_passes_through_only_before_first_output() {
        let mut op = DistinctOperator::new(Vec::new(), schema());
        let out = op.call(StreamEvent::Batch(Batch::empty(schema())), EdgeLabel::None).unwrap();
        assert_eq!(out.len(), 1);

        op.call(StreamEvent::Batch(batch(vec![1])), EdgeLabel::None).unwrap();
        let out2 = op.call(StreamEvent::Batch(Batch::empty(schema())), EdgeLabel::None).unwrap();
        assert!(out2.is_empty());
    }
}
