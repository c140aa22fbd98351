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

//! `Projection`: evaluates required expressions, appends them, and
//! selects/renames down to the target schema. Stateless — safe to run
//! multiple instances over disjoint partitions.

use hashbrown::HashSet;
use quillsql_common::{Batch, ColumnIdentity, QuillError, Result, Schema, Sensors};
use quillsql_expr::Expr;
use quillsql_plan::EdgeLabel;

use crate::operator::{ExecutionContext, Operator, StreamEvent};

pub struct ProjectionOperator {
    expressions: Vec<(ColumnIdentity, Expr)>,
    output_schema: Schema,
    ctx: ExecutionContext,
    sensors: Sensors,
}

impl ProjectionOperator {
    pub fn new(expressions: Vec<(ColumnIdentity, Expr)>, output_schema: Schema, ctx: ExecutionContext) -> Self {
        Self {
            expressions,
            output_schema,
            ctx,
            sensors: Sensors::new(),
        }
    }
}

impl Operator for ProjectionOperator {
    fn schema(&self) -> &Schema {
        &self.output_schema
    }

    fn call(&mut self, input: StreamEvent, _leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
        match input {
            StreamEvent::Batch(batch) => {
                let mut seen = HashSet::new();
                for (identity, _) in &self.expressions {
                    if !seen.insert(identity.clone()) {
                        return Err(QuillError::sql(format!("duplicate output column '{identity}' in projection")));
                    }
                }
                let appended = self.ctx.evaluator.evaluate_and_append(&self.expressions, &batch)?;
                let wanted: Vec<ColumnIdentity> = self.output_schema.fields().iter().map(|f| f.identity.clone()).collect();
                let projected = appended.project(&wanted).conform_to(&self.output_schema);
                Ok(vec![StreamEvent::Batch(projected)])
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
    use quillsql_common::{Array, DataType, Field, QueryProperties};
    use quillsql_expr::ReferenceEvaluator;

    use super::*;
    use crate::pool::MemoryPool;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(QueryProperties::new("q1"), Arc::new(MemoryPool::new(0)), Arc::new(ReferenceEvaluator))
    }

    #[test]
    fn projects_and_renames_identity() {
        let input_schema = Schema::new(vec![Field::new("t.a", "a", DataType::Integer)]);
        let batch = Batch::new(input_schema, vec![Arc::new(Array::Integer(TypedArray::from_values(vec![1, 2])))]);
        let output_schema = Schema::new(vec![Field::new("out.a", "a", DataType::Integer)]);
        let mut op = ProjectionOperator::new(
            vec![("out.a".into(), Expr::Identifier("t.a".into()))],
            output_schema.clone(),
            ctx(),
        );
        let out = op.call(StreamEvent::Batch(batch), EdgeLabel::None).unwrap();
        let StreamEvent::Batch(result) = &out[0] else { panic!() };
        assert_eq!(result.schema(), &output_schema);
        assert_eq!(result.row_count(), 2);
    }

    #[test]
    fn duplicate_output_identity_is_an_error() {
        let input_schema = Schema::new(vec![Field::new("t.a", "a", DataType::Integer)]);
        let batch = Batch::new(input_schema, vec![Arc::new(Array::Integer(TypedArray::from_values(vec![1])))]);
        let output_schema = Schema::new(vec![Field::new("out.a", "a", DataType::Integer)]);
        let mut op = ProjectionOperator::new(
            vec![
                ("out.a".into(), Expr::Identifier("t.a".into())),
                ("out.a".into(), Expr::Literal(quillsql_common::Datum::Integer(1))),
            ],
            output_schema,
            ctx(),
        );
        assert!(op.call(StreamEvent::Batch(batch), EdgeLabel::None).is_err());
    }
}
