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

//! `Union`: every incoming edge carries `EdgeLabel::None`, so legs
//! are distinguished only by how many of them exist — the operator is
//! built knowing `input_count` and forwards EOS once every leg has
//! reported it. Each arriving batch is conformed to the unioned schema by
//! *position*, not identity (legs come from independently planned
//! relations and rarely share identities), with narrower numeric types
//! promoted to the target column's type.

use std::sync::Arc;

use quillsql_common::array::TypedArray;
use quillsql_common::{Array, ArrayRef, Batch, DataType, Datum, QuillError, Result, Schema, Sensors};
use quillsql_plan::EdgeLabel;

use crate::operator::{Operator, StreamEvent};

pub struct UnionOperator {
    output_schema: Schema,
    input_count: usize,
    eos_seen: usize,
    sensors: Sensors,
}

impl UnionOperator {
    pub fn new(output_schema: Schema, input_count: usize) -> Self {
        Self {
            output_schema,
            input_count: input_count.max(1),
            eos_seen: 0,
            sensors: Sensors::new(),
        }
    }

    fn conform_positional(&self, batch: Batch) -> Result<Batch> {
        let target_fields = self.output_schema.fields();
        if batch.columns().len() != target_fields.len() {
            return Err(QuillError::invalid_internal_state(format!(
                "union leg has {} columns, expected {} to match the unioned schema",
                batch.columns().len(),
                target_fields.len()
            )));
        }
        let columns = batch
            .columns()
            .iter()
            .zip(target_fields)
            .map(|(array, field)| promote(array, field.data_type))
            .collect::<Result<Vec<_>>>()?;
        Ok(Batch::new(self.output_schema.clone(), columns))
    }
}

fn promote(array: &ArrayRef, target: DataType) -> Result<ArrayRef> {
    if array.data_type() == target {
        return Ok(array.clone());
    }
    if !array.data_type().comparable_to(target) {
        return Err(QuillError::incompatible_types(array.data_type(), target, "Union"));
    }
    let datums: Vec<Datum> = (0..array.len()).map(|row| promote_datum(array.datum_at(row), target)).collect();
    Ok(build_array(target, datums))
}

fn promote_datum(datum: Datum, target: DataType) -> Datum {
    if datum.is_null() {
        return Datum::Null;
    }
    match target {
        DataType::Double => datum.as_f64().map(ordered_float::OrderedFloat).map(Datum::Double).unwrap_or(Datum::Null),
        DataType::Decimal => datum
            .as_f64()
            .and_then(|v| rust_decimal::Decimal::try_from(v).ok())
            .map(Datum::Decimal)
            .unwrap_or(Datum::Null),
        _ => datum,
    }
}

fn build_array(target: DataType, datums: Vec<Datum>) -> ArrayRef {
    Arc::new(match target {
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

impl Operator for UnionOperator {
    fn schema(&self) -> &Schema {
        &self.output_schema
    }

    fn call(&mut self, input: StreamEvent, _leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
        match input {
            StreamEvent::Batch(batch) => {
                if batch.is_empty() {
                    return Ok(Vec::new());
                }
                Ok(vec![StreamEvent::Batch(self.conform_positional(batch)?)])
            }
            StreamEvent::Eos => {
                self.eos_seen += 1;
                if self.eos_seen >= self.input_count {
                    Ok(vec![StreamEvent::Eos])
                } else {
                    Ok(Vec::new())
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
    use quillsql_common::array::TypedArray;
    use quillsql_common::Field;

    use super::*;

    fn left_schema() -> Schema {
        Schema::new(vec![Field::new("l.id", "id", DataType::Integer), Field::new("l.n", "n", DataType::Integer)])
    }

    fn right_schema() -> Schema {
        Schema::new(vec![Field::new("r.id", "id", DataType::Integer), Field::new("r.n", "n", DataType::Double)])
    }

    fn output_schema() -> Schema {
        Schema::new(vec![Field::new("u.id", "id", DataType::Integer), Field::new("u.n", "n", DataType::Double)])
    }

    #[test]
    fn promotes_narrower_leg_and_waits_for_every_eos() {
        let mut op = UnionOperator::new(output_schema(), 2);
        let left = Batch::new(
            left_schema(),
            vec![
                Arc::new(Array::Integer(TypedArray::from_values(vec![1, 2]))),
                Arc::new(Array::Integer(TypedArray::from_values(vec![10, 20]))),
            ],
        );
        let out = op.call(StreamEvent::Batch(left), EdgeLabel::None).unwrap();
        let StreamEvent::Batch(result) = &out[0] else { panic!() };
        assert_eq!(result.columns()[1].datum_at(0), Datum::Double(ordered_float::OrderedFloat(10.0)));

        let right = Batch::new(
            right_schema(),
            vec![
                Arc::new(Array::Integer(TypedArray::from_values(vec![3]))),
                Arc::new(Array::Double(TypedArray::from_values(vec![ordered_float::OrderedFloat(3.5)]))),
            ],
        );
        op.call(StreamEvent::Batch(right), EdgeLabel::None).unwrap();

        assert!(op.call(StreamEvent::Eos, EdgeLabel::None).unwrap().is_empty());
        let out = op.call(StreamEvent::Eos, EdgeLabel::None).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].is_eos());
    }
}
