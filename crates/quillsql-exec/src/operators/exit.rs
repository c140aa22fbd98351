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

//! `Exit`: the plan's single terminal sink. Forwards its input
//! unchanged so the engine always has one node to drain regardless of how
//! the rest of the DAG fans in. Stateless.

use quillsql_common::{Result, Schema, Sensors};
use quillsql_plan::EdgeLabel;

use crate::operator::{Operator, StreamEvent};

pub struct ExitOperator {
    schema: Schema,
    sensors: Sensors,
}

impl ExitOperator {
    pub fn new(schema: Schema) -> Self {
        Self { schema, sensors: Sensors::new() }
    }
}

impl Operator for ExitOperator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn call(&mut self, input: StreamEvent, _leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
        Ok(vec![input])
    }

    fn sensors(&self) -> &Sensors {
        &self.sensors
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use quillsql_common::array::TypedArray;
    use quillsql_common::{Array, Batch, DataType, Field};

    use super::*;

    #[test]
    fn forwards_batches_and_eos_unchanged() {
        let schema = Schema::new(vec![Field::new("t.a", "a", DataType::Integer)]);
        let mut op = ExitOperator::new(schema.clone());
        let batch = Batch::new(schema, vec![Arc::new(Array::Integer(TypedArray::from_values(vec![1, 2])))]);
        let out = op.call(StreamEvent::Batch(batch.clone()), EdgeLabel::None).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].as_batch().unwrap().row_count(), batch.row_count());

        let out = op.call(StreamEvent::Eos, EdgeLabel::None).unwrap();
        assert!(out[0].is_eos());
    }
}
