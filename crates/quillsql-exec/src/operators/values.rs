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

//! `Values` and `GenerateSeries`: constant-producing entry
//! operators. Both are fully materialized at construction time (their
//! row counts are bounded by the literal text of the query) and replay a
//! single batch through `pump()`, then `None`.

use std::sync::Arc;

use quillsql_common::array::TypedArray;
use quillsql_common::{Array, ArrayRef, Batch, DataType, Datum, QuillError, Result, Schema, Sensors};
use quillsql_expr::{eval_constant, Expr};

use crate::operator::{Operator, StreamEvent};

pub struct ValuesOperator {
    rows: Vec<Vec<Expr>>,
    output_schema: Schema,
    emitted: bool,
    sensors: Sensors,
}

impl ValuesOperator {
    pub fn new(rows: Vec<Vec<Expr>>, output_schema: Schema) -> Self {
        Self { rows, output_schema, emitted: false, sensors: Sensors::new() }
    }

    fn materialize(&self) -> Result<Batch> {
        let fields = self.output_schema.fields();
        let columns = (0..fields.len())
            .map(|col| {
                let datums = self
                    .rows
                    .iter()
                    .map(|row| {
                        row.get(col)
                            .ok_or_else(|| QuillError::invalid_internal_state(format!("VALUES row is missing column {col}")))
                            .and_then(|expr| eval_constant(expr))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(build_array(fields[col].data_type, datums))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Batch::new(self.output_schema.clone(), columns))
    }
}

fn build_array(data_type: DataType, datums: Vec<Datum>) -> ArrayRef {
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

impl Operator for ValuesOperator {
    fn schema(&self) -> &Schema {
        &self.output_schema
    }

    fn is_entry(&self) -> bool {
        true
    }

    fn pump(&mut self) -> Result<Option<Batch>> {
        if self.emitted {
            return Ok(None);
        }
        self.emitted = true;
        self.materialize().map(Some)
    }

    fn call(&mut self, _input: StreamEvent, _leg: quillsql_plan::EdgeLabel) -> Result<Vec<StreamEvent>> {
        unreachable!("ValuesOperator is an entry operator, never called with input")
    }

    fn sensors(&self) -> &Sensors {
        &self.sensors
    }
}

pub struct GenerateSeriesOperator {
    start: Expr,
    stop: Expr,
    step: Expr,
    output_schema: Schema,
    emitted: bool,
    sensors: Sensors,
}

impl GenerateSeriesOperator {
    pub fn new(start: Expr, stop: Expr, step: Expr, output_schema: Schema) -> Self {
        Self { start, stop, step, output_schema, emitted: false, sensors: Sensors::new() }
    }

    fn materialize(&self) -> Result<Batch> {
        let start = eval_constant(&self.start)?;
        let stop = eval_constant(&self.stop)?;
        let step = eval_constant(&self.step)?;
        let (start, stop, step) = match (start.as_f64(), stop.as_f64(), step.as_f64()) {
            (Some(s), Some(e), Some(st)) => (s, e, st),
            _ => return Err(QuillError::sql("GENERATE_SERIES bounds and step must be numeric")),
        };
        if step == 0.0 {
            return Err(QuillError::sql("GENERATE_SERIES step cannot be zero"));
        }
        let mut values = Vec::new();
        let mut current = start;
        if step > 0.0 {
            while current <= stop {
                values.push(current);
                current += step;
            }
        } else {
            while current >= stop {
                values.push(current);
                current += step;
            }
        }
        let field = self
            .output_schema
            .fields()
            .first()
            .ok_or_else(|| QuillError::invalid_internal_state("GENERATE_SERIES output schema has no columns"))?;
        let datums = values
            .into_iter()
            .map(|v| if matches!(field.data_type, DataType::Integer) { Datum::Integer(v as i64) } else { Datum::Double(ordered_float::OrderedFloat(v)) })
            .collect();
        Ok(Batch::new(self.output_schema.clone(), vec![build_array(field.data_type, datums)]))
    }
}

impl Operator for GenerateSeriesOperator {
    fn schema(&self) -> &Schema {
        &self.output_schema
    }

    fn is_entry(&self) -> bool {
        true
    }

    fn pump(&mut self) -> Result<Option<Batch>> {
        if self.emitted {
            return Ok(None);
        }
        self.emitted = true;
        self.materialize().map(Some)
    }

    fn call(&mut self, _input: StreamEvent, _leg: quillsql_plan::EdgeLabel) -> Result<Vec<StreamEvent>> {
        unreachable!("GenerateSeriesOperator is an entry operator, never called with input")
    }

    fn sensors(&self) -> &Sensors {
        &self.sensors
    }
}

#[cfg(test)]
mod tests {
    use quillsql_common::Field;

    use super::*;

    #[test]
    fn values_materializes_each_column_by_position() {
        let schema = Schema::new(vec![Field::new("v.a", "a", DataType::Integer), Field::new("v.b", "b", DataType::Varchar)]);
        let rows = vec![
            vec![Expr::Literal(Datum::Integer(1)), Expr::Literal(Datum::Varchar("x".into()))],
            vec![Expr::Literal(Datum::Integer(2)), Expr::Literal(Datum::Varchar("y".into()))],
        ];
        let mut op = ValuesOperator::new(rows, schema);
        let batch = op.pump().unwrap().unwrap();
        assert_eq!(batch.row_count(), 2);
        assert_eq!(batch.columns()[1].datum_at(1), Datum::Varchar("y".into()));
        assert!(op.pump().unwrap().is_none());
    }

    #[test]
    fn generate_series_counts_inclusive_of_stop() {
        let schema = Schema::new(vec![Field::new("gs.n", "n", DataType::Integer)]);
        let mut op = GenerateSeriesOperator::new(Expr::Literal(Datum::Integer(1)), Expr::Literal(Datum::Integer(5)), Expr::Literal(Datum::Integer(2)), schema);
        let batch = op.pump().unwrap().unwrap();
        let values: Vec<i64> = (0..batch.row_count()).map(|i| batch.columns()[0].datum_at(i).as_i64().unwrap()).collect();
        assert_eq!(values, vec![1, 3, 5]);
    }

    #[test]
    fn generate_series_rejects_zero_step() {
        let schema = Schema::new(vec![Field::new("gs.n", "n", DataType::Integer)]);
        let mut op = GenerateSeriesOperator::new(Expr::Literal(Datum::Integer(1)), Expr::Literal(Datum::Integer(5)), Expr::Literal(Datum::Integer(0)), schema);
        assert!(op.pump().is_err());
    }
}
