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

//! `Reader` and `NullReader`: the two entry operators wrapping a
//! scan. `Reader` drives an external connector; `NullReader` is the deterministic empty-table short-circuit
//! for a provably-false predicate.

use quillsql_common::{hints, Batch, Result, Schema, Sensors};
use quillsql_expr::Expr;
use quillsql_plan::{EdgeLabel, ScanDescriptor};

use crate::operator::{ExecutionContext, Operator, StreamEvent};

/// The synchronous connector interface: `read_dataset(columns,
/// predicates) -> iterator<batch>`. Concrete connectors (file, blob
/// store, catalog-backed tables) are external collaborators; this is the
/// seam `Reader` drives and the seam test fixtures implement.
pub trait DataSource: Send {
    /// Pulls the next batch, or `None` once exhausted. Batches need not
    /// already match the scan's restricted schema — `Reader` conforms
    /// them (renaming and filling null columns) before they leave.
    fn next_batch(&mut self) -> Result<Option<Batch>>;
}

/// An in-memory `DataSource` used by this crate's own operator tests and
/// by callers wiring a `Values`-style literal relation without a real
/// connector.
pub struct VecDataSource {
    batches: std::vec::IntoIter<Batch>,
}

impl VecDataSource {
    pub fn new(batches: Vec<Batch>) -> Self {
        Self {
            batches: batches.into_iter(),
        }
    }
}

impl DataSource for VecDataSource {
    fn next_batch(&mut self) -> Result<Option<Batch>> {
        Ok(self.batches.next())
    }
}

pub struct ReaderOperator {
    scan: ScanDescriptor,
    source: Box<dyn DataSource>,
    ctx: ExecutionContext,
    sensors: Sensors,
}

impl ReaderOperator {
    pub fn new(scan: ScanDescriptor, source: Box<dyn DataSource>, ctx: ExecutionContext) -> Self {
        for hint in &scan.hints {
            if let Err(message) = hints::validate_hint(&hint.to_ascii_uppercase()) {
                ctx.statistics.lock().warn(message);
            }
        }
        Self {
            scan,
            source,
            ctx,
            sensors: Sensors::new(),
        }
    }

    /// Predicates the optimizer pushed into this scan, forwarded so an
    /// external connector can apply them. Exposed for callers
    /// constructing the real `DataSource` from this descriptor.
    pub fn pushed_predicates(&self) -> &[Expr] {
        &self.scan.predicates
    }
}

impl Operator for ReaderOperator {
    fn schema(&self) -> &Schema {
        &self.scan.restricted_schema
    }

    fn is_entry(&self) -> bool {
        true
    }

    fn pump(&mut self) -> Result<Option<Batch>> {
        let Some(batch) = self.source.next_batch()? else {
            return Ok(None);
        };
        let conformed = batch.conform_to(&self.scan.restricted_schema);
        let mut stats = self.ctx.statistics.lock();
        stats.rows_read += conformed.row_count() as u64;
        stats.bytes_read += conformed.byte_size() as u64;
        Ok(Some(conformed))
    }

    fn call(&mut self, _input: StreamEvent, _leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
        unreachable!("Reader is an entry operator, driven by pump()")
    }

    fn sensors(&self) -> &Sensors {
        &self.sensors
    }
}

/// Emits exactly one empty batch of `schema`, then is exhausted.
pub struct NullReaderOperator {
    schema: Schema,
    emitted: bool,
    sensors: Sensors,
}

impl NullReaderOperator {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            emitted: false,
            sensors: Sensors::new(),
        }
    }
}

impl Operator for NullReaderOperator {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn is_entry(&self) -> bool {
        true
    }

    fn pump(&mut self) -> Result<Option<Batch>> {
        if self.emitted {
            return Ok(None);
        }
        self.emitted = true;
        Ok(Some(Batch::empty(self.schema.clone())))
    }

    fn call(&mut self, _input: StreamEvent, _leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
        unreachable!("NullReader is an entry operator, driven by pump()")
    }

    fn sensors(&self) -> &Sensors {
        &self.sensors
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use quillsql_common::array::TypedArray;
    use quillsql_common::{Array, ConnectorDescriptor, DataType, Field, QueryProperties};
    use quillsql_expr::ReferenceEvaluator;

    use super::*;
    use crate::pool::MemoryPool;

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(QueryProperties::new("q1"), Arc::new(MemoryPool::new(0)), Arc::new(ReferenceEvaluator))
    }

    fn schema() -> Schema {
        Schema::new(vec![Field::new("t.a", "a", DataType::Integer)])
    }

    #[test]
    fn reader_conforms_and_accumulates_rows_read() {
        let batch = Batch::new(schema(), vec![Arc::new(Array::Integer(TypedArray::from_values(vec![1, 2, 3])))]);
        let scan = ScanDescriptor {
            connector: ConnectorDescriptor::new("t", schema()),
            predicates: Vec::new(),
            projected_columns: None,
            restricted_schema: schema(),
            hints: Vec::new(),
        };
        let ctx = ctx();
        let mut reader = ReaderOperator::new(scan, Box::new(VecDataSource::new(vec![batch])), ctx.clone());
        assert_eq!(reader.pump().unwrap().unwrap().row_count(), 3);
        assert!(reader.pump().unwrap().is_none());
        assert_eq!(ctx.statistics.lock().rows_read, 3);
    }

    #[test]
    fn unknown_hint_warns_with_suggestion() {
        let scan = ScanDescriptor {
            connector: ConnectorDescriptor::new("t", schema()),
            predicates: Vec::new(),
            projected_columns: None,
            restricted_schema: schema(),
            hints: vec!["NO_CACH".into()],
        };
        let ctx = ctx();
        let _reader = ReaderOperator::new(scan, Box::new(VecDataSource::new(Vec::new())), ctx.clone());
        assert_eq!(ctx.statistics.lock().messages.len(), 1);
    }

    #[test]
    fn null_reader_emits_one_empty_batch_then_exhausts() {
        let mut op = NullReaderOperator::new(schema());
        let first = op.pump().unwrap().unwrap();
        assert!(first.is_empty());
        assert_eq!(first.schema(), &schema());
        assert!(op.pump().unwrap().is_none());
    }
}
