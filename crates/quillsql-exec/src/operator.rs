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

//! The physical operator contract: every operator is driven by a
//! single call per input event — a batch or EOS — arriving on a labeled
//! leg, and produces zero or more output events. The call-based shape
//! here is the push side of a push/pull hybrid engine — entry operators
//! are *pulled* via [`Operator::pump`], everything downstream is
//! *pushed* an event via [`Operator::call`].

use std::sync::Arc;

use quillsql_common::{Batch, QueryProperties, Result, Schema, Sensors, Statistics};
use quillsql_expr::Evaluator;
use quillsql_plan::EdgeLabel;

use crate::pool::MemoryPool;

/// One event flowing across a plan edge: a batch, or the end-of-stream
/// sentinel. Distinct from any batch value, never conflated with an
/// empty batch.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Batch(Batch),
    Eos,
}

impl StreamEvent {
    pub const fn is_eos(&self) -> bool {
        matches!(self, StreamEvent::Eos)
    }

    pub fn as_batch(&self) -> Option<&Batch> {
        match self {
            StreamEvent::Batch(b) => Some(b),
            StreamEvent::Eos => None,
        }
    }
}

/// Everything shared across every live operator of one query. Cheap to clone — every field is an
/// `Arc`.
#[derive(Clone)]
pub struct ExecutionContext {
    pub props: Arc<QueryProperties>,
    pub pool: Arc<MemoryPool>,
    pub evaluator: Arc<dyn Evaluator + Send + Sync>,
    pub statistics: Arc<parking_lot::Mutex<Statistics>>,
    pub cancelled: Arc<std::sync::atomic::AtomicBool>,
}

impl ExecutionContext {
    pub fn new(props: QueryProperties, pool: Arc<MemoryPool>, evaluator: Arc<dyn Evaluator + Send + Sync>) -> Self {
        Self {
            props: Arc::new(props),
            pool,
            evaluator,
            statistics: Arc::new(parking_lot::Mutex::new(Statistics::new())),
            cancelled: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(std::sync::atomic::Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, std::sync::atomic::Ordering::Relaxed);
    }
}

/// A live physical operator instance. One instance is built per
/// plan node by [`crate::operators::build_operator`]; stateful operators
/// (everything but `Filter`/`Projection`/`Exit`, see
/// `PhysicalNode::is_stateless`) have exactly one live invocation in
/// flight at a time.
pub trait Operator: Send {
    /// The schema of batches this operator emits.
    fn schema(&self) -> &Schema;

    /// `true` for entry operators (`Reader`, `NullReader`, `Values`,
    /// `GenerateSeries`) that the engine drives via [`Operator::pump`]
    /// rather than [`Operator::call`].
    fn is_entry(&self) -> bool {
        false
    }

    /// Pulled repeatedly by the engine for entry operators until it
    /// returns `Ok(None)`, at which point the engine synthesizes EOS and
    /// propagates it downstream exactly once. Non-entry operators never
    /// have this called.
    fn pump(&mut self) -> Result<Option<Batch>> {
        unreachable!("pump() called on a non-entry operator")
    }

    /// Processes one input event arriving on `leg` and returns zero or
    /// more output events. Operators must not mutate `input`'s batch in
    /// place; they build and return new batches.
    fn call(&mut self, input: StreamEvent, leg: EdgeLabel) -> Result<Vec<StreamEvent>>;

    fn sensors(&self) -> &Sensors;
}

/// Drives a single `call`, recording the sensor counters: every call
/// increments `records_in`, `bytes_in`, `calls` before calling, and
/// `records_out`, `bytes_out` for each produced batch, and records
/// elapsed nanoseconds. Shared by both engines so sensor bookkeeping
/// cannot drift between the serial and parallel code paths.
pub fn call_with_sensors(op: &mut dyn Operator, input: StreamEvent, leg: EdgeLabel) -> Result<Vec<StreamEvent>> {
    let start = std::time::Instant::now();
    if let StreamEvent::Batch(batch) = &input {
        op.sensors().record_input(batch.row_count() as u64, batch.byte_size() as u64);
    } else {
        op.sensors().calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }
    let outputs = op.call(input, leg)?;
    for event in &outputs {
        if let StreamEvent::Batch(batch) = event {
            op.sensors().record_output(batch.row_count() as u64, batch.byte_size() as u64);
        }
    }
    op.sensors().record_elapsed(start);
    Ok(outputs)
}

/// Drives a single `pump` on an entry operator, recording `calls`,
/// output counters and elapsed nanoseconds the same way
/// [`call_with_sensors`] does for `call`. Entry operators have no
/// "input" leg, so `records_in`/`bytes_in` are left untouched.
pub fn pump_with_sensors(op: &mut dyn Operator) -> Result<Option<Batch>> {
    let start = std::time::Instant::now();
    op.sensors().calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let result = op.pump();
    if let Ok(Some(batch)) = &result {
        op.sensors().record_output(batch.row_count() as u64, batch.byte_size() as u64);
    }
    op.sensors().record_elapsed(start);
    result
}
