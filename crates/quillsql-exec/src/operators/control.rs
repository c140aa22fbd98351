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

//! `Explain` / `ShowColumns` / `ShowCreate` / `ShowValue` / `SetVariable`:
//! non-streaming operators. Each is an entry operator that yields
//! exactly one descriptive batch on its first `pump()` call, then `None`.
//! They carry their own fixed content rather than reaching into a catalog
//! — `quillsql-exec` has no catalog dependency, so anything a `Show*` operator needs beyond
//! what the physical plan already recorded (e.g. a relation's column
//! list) is resolved by the caller and handed to the constructor.

use std::sync::Arc;

use quillsql_common::array::TypedArray;
use quillsql_common::{Array, Batch, DataType, Datum, Field, QuillError, Result, Schema, Sensors};
use quillsql_expr::{eval_constant, format_expression, Expr};
use quillsql_plan::EdgeLabel;

use crate::operator::{Operator, StreamEvent};

fn single_column_schema(identity: &str, name: &str) -> Schema {
    Schema::new(vec![Field::new(identity, name, DataType::Varchar)])
}

fn varchar_rows(schema: Schema, rows: Vec<String>) -> Batch {
    Batch::new(schema, vec![Arc::new(Array::Varchar(TypedArray::from_values(rows)))])
}

/// Shared "one batch, then exhausted" pump logic. `content()` is called
/// exactly once and its output replayed to completion by `pump()`.
trait OneShot {
    fn schema(&self) -> &Schema;
    fn sensors(&self) -> &Sensors;
    fn emitted(&mut self) -> &mut bool;
    fn content(&self) -> Result<Batch>;
}

macro_rules! impl_one_shot_operator {
    ($ty:ty) => {
        impl Operator for $ty {
            fn schema(&self) -> &Schema {
                OneShot::schema(self)
            }

            fn is_entry(&self) -> bool {
                true
            }

            fn pump(&mut self) -> Result<Option<Batch>> {
                if *self.emitted() {
                    return Ok(None);
                }
                *self.emitted() = true;
                self.content().map(Some)
            }

            fn call(&mut self, _input: StreamEvent, _leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
                unreachable!("{} is an entry operator, never called with input", stringify!($ty))
            }

            fn sensors(&self) -> &Sensors {
                OneShot::sensors(self)
            }
        }
    };
}

pub struct ExplainOperator {
    analyze: bool,
    rendered_plan: String,
    schema: Schema,
    emitted: bool,
    sensors: Sensors,
}

impl ExplainOperator {
    pub fn new(analyze: bool, rendered_plan: String) -> Self {
        Self {
            analyze,
            rendered_plan,
            schema: single_column_schema("explain.plan", "QUERY PLAN"),
            emitted: false,
            sensors: Sensors::new(),
        }
    }
}

impl OneShot for ExplainOperator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn sensors(&self) -> &Sensors {
        &self.sensors
    }

    fn emitted(&mut self) -> &mut bool {
        &mut self.emitted
    }

    fn content(&self) -> Result<Batch> {
        let mut lines: Vec<String> = self.rendered_plan.lines().map(str::to_owned).collect();
        if self.analyze {
            lines.push("(ANALYZE: sensor totals recorded per node)".to_owned());
        }
        if lines.is_empty() {
            lines.push(String::new());
        }
        Ok(varchar_rows(self.schema.clone(), lines))
    }
}

impl_one_shot_operator!(ExplainOperator);

pub struct ShowColumnsOperator {
    relation: String,
    columns: Vec<Field>,
    schema: Schema,
    emitted: bool,
    sensors: Sensors,
}

impl ShowColumnsOperator {
    pub fn new(relation: String, columns: Vec<Field>, schema: Schema) -> Self {
        Self { relation, columns, schema, emitted: false, sensors: Sensors::new() }
    }
}

impl OneShot for ShowColumnsOperator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn sensors(&self) -> &Sensors {
        &self.sensors
    }

    fn emitted(&mut self) -> &mut bool {
        &mut self.emitted
    }

    fn content(&self) -> Result<Batch> {
        if self.schema.fields().len() != 2 {
            return Err(QuillError::invalid_internal_state(format!(
                "ShowColumns({}) output schema must have exactly 2 columns (name, type)",
                self.relation
            )));
        }
        let names: Vec<String> = self.columns.iter().map(|f| f.name.clone()).collect();
        let types: Vec<String> = self.columns.iter().map(|f| f.data_type.to_string()).collect();
        Ok(Batch::new(
            self.schema.clone(),
            vec![
                Arc::new(Array::Varchar(TypedArray::from_values(names))),
                Arc::new(Array::Varchar(TypedArray::from_values(types))),
            ],
        ))
    }
}

impl_one_shot_operator!(ShowColumnsOperator);

pub struct ShowCreateOperator {
    relation: String,
    columns: Vec<Field>,
    schema: Schema,
    emitted: bool,
    sensors: Sensors,
}

impl ShowCreateOperator {
    pub fn new(relation: String, columns: Vec<Field>) -> Self {
        Self {
            relation,
            columns,
            schema: single_column_schema("show_create.ddl", "Create Table"),
            emitted: false,
            sensors: Sensors::new(),
        }
    }
}

impl OneShot for ShowCreateOperator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn sensors(&self) -> &Sensors {
        &self.sensors
    }

    fn emitted(&mut self) -> &mut bool {
        &mut self.emitted
    }

    fn content(&self) -> Result<Batch> {
        let column_list = self
            .columns
            .iter()
            .map(|f| format!("  {} {}", f.name, f.data_type))
            .collect::<Vec<_>>()
            .join(",\n");
        let ddl = format!("CREATE TABLE {} (\n{}\n)", self.relation, column_list);
        Ok(varchar_rows(self.schema.clone(), vec![ddl]))
    }
}

impl_one_shot_operator!(ShowCreateOperator);

pub struct ShowValueOperator {
    value: String,
    schema: Schema,
    emitted: bool,
    sensors: Sensors,
}

impl ShowValueOperator {
    pub fn new(value: String) -> Self {
        Self { value, schema: single_column_schema("show_value.value", "Value"), emitted: false, sensors: Sensors::new() }
    }
}

impl OneShot for ShowValueOperator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn sensors(&self) -> &Sensors {
        &self.sensors
    }

    fn emitted(&mut self) -> &mut bool {
        &mut self.emitted
    }

    fn content(&self) -> Result<Batch> {
        Ok(varchar_rows(self.schema.clone(), vec![self.value.clone()]))
    }
}

impl_one_shot_operator!(ShowValueOperator);

/// Emits a status row naming the variable and its resolved value.
/// Persisting the change into the session belongs to the caller that owns
/// `QueryProperties` — the operator itself only reports what was
/// requested, since `ExecutionContext::props` is an immutable `Arc`.
pub struct SetVariableOperator {
    variable: String,
    value: Expr,
    schema: Schema,
    emitted: bool,
    sensors: Sensors,
}

impl SetVariableOperator {
    pub fn new(variable: String, value: Expr) -> Self {
        Self {
            variable,
            value,
            schema: Schema::new(vec![
                Field::new("set_variable.variable", "Variable", DataType::Varchar),
                Field::new("set_variable.value", "Value", DataType::Varchar),
            ]),
            emitted: false,
            sensors: Sensors::new(),
        }
    }

    fn rendered_value(&self) -> String {
        match eval_constant(&self.value) {
            Ok(Datum::Varchar(s)) => s,
            Ok(datum) if !datum.is_null() => datum.to_string(),
            _ => format_expression(&self.value),
        }
    }
}

impl OneShot for SetVariableOperator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn sensors(&self) -> &Sensors {
        &self.sensors
    }

    fn emitted(&mut self) -> &mut bool {
        &mut self.emitted
    }

    fn content(&self) -> Result<Batch> {
        Ok(Batch::new(
            self.schema.clone(),
            vec![
                Arc::new(Array::Varchar(TypedArray::from_values(vec![self.variable.clone()]))),
                Arc::new(Array::Varchar(TypedArray::from_values(vec![self.rendered_value()]))),
            ],
        ))
    }
}

impl_one_shot_operator!(SetVariableOperator);

#[cfg(test)]
mod tests {
    use quillsql_common::Datum;

    use super::*;

    #[test]
    fn explain_splits_rendered_plan_into_one_row_per_line() {
        let mut op = ExplainOperator::new(false, "Exit\n  Filter\n    Reader(t)".to_owned());
        let first = op.pump().unwrap().unwrap();
        assert_eq!(first.row_count(), 3);
        assert_eq!(first.columns()[0].datum_at(0), Datum::Varchar("Exit".to_owned()));
        assert!(op.pump().unwrap().is_none());
    }

    #[test]
    fn show_columns_lists_name_and_type_per_column() {
        let columns = vec![Field::new("t.a", "a", DataType::Integer), Field::new("t.b", "b", DataType::Varchar)];
        let schema = Schema::new(vec![Field::new("sc.name", "name", DataType::Varchar), Field::new("sc.type", "type", DataType::Varchar)]);
        let mut op = ShowColumnsOperator::new("t".to_owned(), columns, schema);
        let batch = op.pump().unwrap().unwrap();
        assert_eq!(batch.row_count(), 2);
        assert_eq!(batch.columns()[1].datum_at(0), Datum::Varchar("INTEGER".to_owned()));
    }

    #[test]
    fn set_variable_reports_literal_value() {
        let mut op = SetVariableOperator::new("work_mem".to_owned(), Expr::Literal(Datum::Varchar("64MB".to_owned())));
        let batch = op.pump().unwrap().unwrap();
        assert_eq!(batch.columns()[0].datum_at(0), Datum::Varchar("work_mem".to_owned()));
        assert_eq!(batch.columns()[1].datum_at(0), Datum::Varchar("64MB".to_owned()));
    }
}
