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

//! The execution engine: drives a [`PhysicalPlan`] over columnar
//! batches. Two engines share one contract — build one live [`Operator`]
//! per node via [`build_operator`], pull batches from entry operators via
//! `pump()`, and push every event a node emits to its downstream
//! consumers via `call()` — and must produce byte-identical output for a
//! given plan over deterministic input.
//!
//! [`SerialEngine`] recurses directly; [`ParallelEngine`] dispatches the
//! same walk through a bounded work queue drained by a worker pool. Event
//! propagation (which batches/EOS reach which operator, in what order) is
//! identical between the two: every `StreamEvent` a node's `call` returns
//! is routed along the node's outgoing edges exactly as it would be in
//! the serial engine. The parallel engine's morsel accounting and
//! per-node exhaustion tracking exist purely to know when
//! every worker can stop — not as a second mechanism for synthesizing
//! EOS, which stays entirely operator-driven so both engines agree.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use hashbrown::{HashMap, HashSet};
use parking_lot::{Condvar, Mutex};
use quillsql_common::{Batch, QuillError, Result, ResultType};
use quillsql_plan::dag::NodeId;
use quillsql_plan::physical::{PhysicalNode, PhysicalPlan};
use quillsql_plan::EdgeLabel;

use crate::operator::{call_with_sensors, pump_with_sensors, ExecutionContext, Operator, StreamEvent};
use crate::operators::{build_operator, DataSourceFactory};

/// Checks the structural invariants both engines depend on: acyclic, exactly one exit node, and no node forks to more than
/// one downstream consumer. Returns the single exit node id on success.
pub fn validate_physical_plan(plan: &PhysicalPlan) -> Result<NodeId> {
    if !plan.is_acyclic() {
        return Err(QuillError::invalid_internal_state("physical plan is not acyclic"));
    }
    let exits = plan.get_exit_points();
    if exits.len() != 1 {
        return Err(QuillError::invalid_internal_state(format!(
            "physical plan must have exactly one exit node, found {}",
            exits.len()
        )));
    }
    for id in plan.node_ids() {
        let fanout = plan.outgoing_edges(id).len();
        if fanout > 1 {
            return Err(QuillError::invalid_internal_state(format!(
                "{id:?} forks to {fanout} downstream nodes; the execution engine requires fan-in only"
            )));
        }
    }
    Ok(exits[0])
}

/// Whether a plan's result is a lazy table (`Tabular`) or a single status
/// row (`NonTabular`). Explain, SetVariable and Show operators report
/// `NonTabular`; they are driven through the exact
/// same pump/call machinery as every other entry operator.
pub fn result_type(plan: &PhysicalPlan, exit: NodeId) -> ResultType {
    let parents = plan.ingoing_edges(exit);
    if let [(only_parent, _)] = parents.as_slice() {
        if let Some(node) = plan.node(*only_parent) {
            if matches!(
                node,
                PhysicalNode::Explain { .. }
                    | PhysicalNode::ShowColumns { .. }
                    | PhysicalNode::ShowCreate { .. }
                    | PhysicalNode::ShowValue { .. }
                    | PhysicalNode::SetVariable { .. }
            ) {
                return ResultType::NonTabular;
            }
        }
    }
    ResultType::Tabular
}

/// Builds one live operator per node in `plan`.
fn build_all_operators(
    plan: &PhysicalPlan,
    ctx: &ExecutionContext,
    data_sources: &dyn DataSourceFactory,
) -> Result<HashMap<NodeId, Box<dyn Operator>>> {
    let mut operators = HashMap::new();
    for id in plan.node_ids() {
        operators.insert(id, build_operator(plan, id, ctx.clone(), data_sources)?);
    }
    Ok(operators)
}

/// DFS **from the exit node, walking edges backward**. At each node, its incoming edges are visited in `Left`,
/// `None`, `Right` order before the node is (possibly) recorded, so the
/// entry feeding a join's left leg is always discovered — and therefore
/// always pumped to completion — before the entry feeding its right leg,
/// even when the two entries are otherwise unrelated roots of the DAG.
/// [`quillsql_plan::dag::PlanDag::depth_first_search_flat`] walks
/// forward from every entry point instead and does not order those
/// entry points relative to each other, so it cannot give this
/// guarantee on its own; this engine-local traversal is what actually
/// provides it.
fn pump_order(plan: &PhysicalPlan, exit: NodeId) -> Vec<NodeId> {
    let mut visited: HashSet<NodeId> = HashSet::new();
    let mut order = Vec::new();
    visit_backward(plan, exit, &mut visited, &mut order);
    order
}

fn visit_backward(plan: &PhysicalPlan, id: NodeId, visited: &mut HashSet<NodeId>, order: &mut Vec<NodeId>) {
    if !visited.insert(id) {
        return;
    }
    let mut parents = plan.ingoing_edges(id);
    parents.sort_by_key(|(_, label)| match label {
        EdgeLabel::Left => 0,
        EdgeLabel::None => 1,
        EdgeLabel::Right => 2,
    });
    if parents.is_empty() {
        order.push(id);
        return;
    }
    for (parent, _) in parents {
        visit_backward(plan, parent, visited, order);
    }
}

/// The cooperative single-threaded engine. Operators are called in
/// sequence; the only suspension points are whatever the entry
/// operator's `pump()` blocks on internally (e.g. a connector read).
///
/// Implements `Iterator` so a caller drains batches lazily; `next()` only does as much pumping as it takes
/// to produce one more batch (or discover the plan is exhausted).
pub struct SerialEngine {
    plan: PhysicalPlan,
    operators: HashMap<NodeId, Box<dyn Operator>>,
    exit: NodeId,
    pump_order: Vec<NodeId>,
    pump_cursor: usize,
    ready: VecDeque<Batch>,
    finished: bool,
    result_type: ResultType,
    ctx: ExecutionContext,
}

impl SerialEngine {
    pub fn new(plan: PhysicalPlan, ctx: ExecutionContext, data_sources: &dyn DataSourceFactory) -> Result<Self> {
        let exit = validate_physical_plan(&plan)?;
        let operators = build_all_operators(&plan, &ctx, data_sources)?;
        let pump_order = pump_order(&plan, exit);
        let result_type = result_type(&plan, exit);
        Ok(Self {
            plan,
            operators,
            exit,
            pump_order,
            pump_cursor: 0,
            ready: VecDeque::new(),
            finished: false,
            result_type,
            ctx,
        })
    }

    pub fn result_type(&self) -> ResultType {
        self.result_type
    }

    /// Recursively walks `from`'s outgoing edges, invoking each
    /// downstream operator with `(event, label)` and recursing into
    /// whatever it emits. Batches that reach the exit node are
    /// queued in `self.ready`; EOS at the exit is simply not an output
    /// event any caller needs (it only means "nothing further will ever
    /// reach `ready`", which `pump_cursor` reaching the end already
    /// tells `next()`).
    fn propagate(&mut self, from: NodeId, event: StreamEvent) -> Result<()> {
        for (dst, label) in self.plan.outgoing_edges(from) {
            let op = self
                .operators
                .get_mut(&dst)
                .ok_or_else(|| QuillError::invalid_internal_state(format!("propagate: unknown node {dst:?}")))?;
            let outputs = call_with_sensors(op.as_mut(), event.clone(), label)?;
            for out in outputs {
                if dst == self.exit {
                    if let StreamEvent::Batch(batch) = out {
                        self.ready.push_back(batch);
                    }
                } else {
                    self.propagate(dst, out)?;
                }
            }
        }
        Ok(())
    }
}

impl Iterator for SerialEngine {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(batch) = self.ready.pop_front() {
                return Some(Ok(batch));
            }
            if self.finished {
                return None;
            }
            if self.pump_cursor >= self.pump_order.len() {
                self.finished = true;
                continue;
            }
            let entry = self.pump_order[self.pump_cursor];
            // Cancellation is cooperative: the engine checks between
            // operator calls. A cancelled entry is driven straight to its
            // EOS without pumping further batches from it, so every
            // operator downstream still gets the EOS its finalization
            // depends on, just earlier than it would have arrived
            // naturally.
            if self.ctx.is_cancelled() {
                if let Err(e) = self.propagate(entry, StreamEvent::Eos) {
                    self.finished = true;
                    return Some(Err(e));
                }
                self.pump_cursor += 1;
                continue;
            }
            let op = self.operators.get_mut(&entry).expect("pump_order only contains known nodes");
            match pump_with_sensors(op.as_mut()) {
                Ok(Some(batch)) => {
                    if let Err(e) = self.propagate(entry, StreamEvent::Batch(batch)) {
                        self.finished = true;
                        return Some(Err(e));
                    }
                }
                Ok(None) => {
                    if let Err(e) = self.propagate(entry, StreamEvent::Eos) {
                        self.finished = true;
                        return Some(Err(e));
                    }
                    self.pump_cursor += 1;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Per-node bookkeeping the parallel engine uses only to detect
/// termination: when every batch this node will ever see has
/// either arrived from an already-exhausted parent or finished being
/// processed, the node itself is exhausted, and its children move one
/// step closer to the same state.
struct NodeState {
    indegree: usize,
    parents_exhausted: AtomicUsize,
    in_flight: AtomicI64,
    exhausted: AtomicBool,
}

enum WorkItem {
    Pump(NodeId),
    Deliver(NodeId, StreamEvent, EdgeLabel),
}

struct Shared {
    plan: PhysicalPlan,
    operators: HashMap<NodeId, Mutex<Box<dyn Operator>>>,
    outgoing: HashMap<NodeId, Vec<(NodeId, EdgeLabel)>>,
    node_state: HashMap<NodeId, NodeState>,
    exit: NodeId,
    ctx: ExecutionContext,
    queue: Mutex<VecDeque<WorkItem>>,
    cond: Condvar,
    active_tasks: AtomicI64,
    stopped: AtomicBool,
    error_sent: AtomicBool,
}

impl Shared {
    fn enqueue(&self, item: WorkItem) {
        if let WorkItem::Deliver(node, _, _) = &item {
            self.node_state[node].in_flight.fetch_add(1, Ordering::AcqRel);
        }
        self.active_tasks.fetch_add(1, Ordering::AcqRel);
        self.queue.lock().push_back(item);
        self.cond.notify_all();
    }

    fn dispatch(&self, from: NodeId, event: StreamEvent) {
        if let Some(children) = self.outgoing.get(&from) {
            for (dst, label) in children.clone() {
                self.enqueue(WorkItem::Deliver(dst, event.clone(), label));
            }
        }
    }

    /// Marks `node` exhausted (idempotent via CAS) and advances every
    /// child's `parents_exhausted` counter, recursing into any child
    /// that becomes exhausted as a result.
    fn mark_exhausted(&self, node: NodeId) {
        let state = &self.node_state[&node];
        if state.exhausted.compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed).is_err() {
            return;
        }
        if let Some(children) = self.outgoing.get(&node) {
            for (child, _) in children.clone() {
                let child_state = &self.node_state[&child];
                child_state.parents_exhausted.fetch_add(1, Ordering::AcqRel);
                self.try_exhaust(child);
            }
        }
    }

    fn try_exhaust(&self, node: NodeId) {
        let state = &self.node_state[&node];
        if state.exhausted.load(Ordering::Acquire) {
            return;
        }
        if state.parents_exhausted.load(Ordering::Acquire) == state.indegree && state.in_flight.load(Ordering::Acquire) == 0 {
            self.mark_exhausted(node);
        }
    }

    fn fail(&self, results_tx: &Sender<Result<Batch>>, err: QuillError) {
        if self
            .error_sent
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let _ = results_tx.send(Err(err));
        }
        self.stopped.store(true, Ordering::Release);
        self.queue.lock().clear();
        self.cond.notify_all();
    }

    fn next_item(&self) -> Option<WorkItem> {
        let mut queue = self.queue.lock();
        loop {
            if self.stopped.load(Ordering::Acquire) {
                return None;
            }
            if let Some(item) = queue.pop_front() {
                return Some(item);
            }
            if self.active_tasks.load(Ordering::Acquire) == 0 {
                self.cond.notify_all();
                return None;
            }
            self.cond.wait(&mut queue);
        }
    }
}

/// The parallel engine: same graph, same per-node `call`
/// contract as [`SerialEngine`], dispatched through a bounded work queue
/// drained by a fixed pool of worker threads instead of direct
/// recursion. Stateful operators have exactly one live invocation at a
/// time because every operator is wrapped in its own mutex and workers
/// hold that mutex for the duration of a single `call`/`pump`; this
/// engine does not additionally instantiate multiple copies of a
/// *stateless* operator across workers,
/// since a single mutex-guarded instance already satisfies correctness
/// for every operator, stateless or not — only throughput is left on the
/// table, recorded as an Open Question resolution in the grounding
/// ledger.
pub struct ParallelEngine {
    rx: Receiver<Result<Batch>>,
    workers: Vec<JoinHandle<()>>,
    result_type: ResultType,
}

impl ParallelEngine {
    /// Builds every operator, spawns `worker_count` threads, and returns
    /// immediately; the threads begin pumping entry operators right
    /// away. The caller drains `ParallelEngine` as an `Iterator`.
    pub fn spawn(plan: PhysicalPlan, ctx: ExecutionContext, data_sources: &dyn DataSourceFactory, worker_count: usize) -> Result<Self> {
        let exit = validate_physical_plan(&plan)?;
        let result_type = result_type(&plan, exit);
        let built = build_all_operators(&plan, &ctx, data_sources)?;
        let operators: HashMap<NodeId, Mutex<Box<dyn Operator>>> = built.into_iter().map(|(id, op)| (id, Mutex::new(op))).collect();

        let mut outgoing: HashMap<NodeId, Vec<(NodeId, EdgeLabel)>> = HashMap::new();
        let mut node_state: HashMap<NodeId, NodeState> = HashMap::new();
        let entries: Vec<NodeId> = plan.node_ids().collect();
        for id in &entries {
            outgoing.insert(*id, plan.outgoing_edges(*id));
            node_state.insert(
                *id,
                NodeState {
                    indegree: plan.ingoing_edges(*id).len(),
                    parents_exhausted: AtomicUsize::new(0),
                    in_flight: AtomicI64::new(0),
                    exhausted: AtomicBool::new(false),
                },
            );
        }
        let entry_nodes: Vec<NodeId> = plan.get_entry_points();

        let shared = Arc::new(Shared {
            plan,
            operators,
            outgoing,
            node_state,
            exit,
            ctx,
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            active_tasks: AtomicI64::new(entry_nodes.len() as i64),
            stopped: AtomicBool::new(false),
            error_sent: AtomicBool::new(false),
        });
        for id in &entry_nodes {
            shared.queue.lock().push_back(WorkItem::Pump(*id));
        }

        let worker_count = worker_count.max(1);
        let (tx, rx) = mpsc::channel::<Result<Batch>>();
        let mut workers = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let shared = Arc::clone(&shared);
            let tx = tx.clone();
            workers.push(std::thread::spawn(move || worker_loop(shared, tx)));
        }
        drop(tx);

        Ok(Self { rx, workers, result_type })
    }

    pub fn result_type(&self) -> ResultType {
        self.result_type
    }
}

fn worker_loop(shared: Arc<Shared>, results_tx: Sender<Result<Batch>>) {
    while let Some(item) = shared.next_item() {
        let cancelled = shared.ctx.is_cancelled();
        match item {
            WorkItem::Pump(node) => {
                if cancelled {
                    // The entry stops being pumped as if it had reached real
                    // exhaustion, but downstream operators still need the
                    // actual `Eos` event delivered to their `call` so their
                    // finalization runs (§5).
                    shared.dispatch(node, StreamEvent::Eos);
                    shared.mark_exhausted(node);
                } else {
                    let result = {
                        let mut op = shared.operators[&node].lock();
                        pump_with_sensors(op.as_mut())
                    };
                    match result {
                        Ok(Some(batch)) => {
                            shared.enqueue(WorkItem::Pump(node));
                            shared.dispatch(node, StreamEvent::Batch(batch));
                        }
                        Ok(None) => {
                            shared.dispatch(node, StreamEvent::Eos);
                            shared.mark_exhausted(node);
                        }
                        Err(e) => shared.fail(&results_tx, e),
                    }
                }
            }
            WorkItem::Deliver(node, event, leg) => {
                // Pending batches are discarded on cancel, but operators
                // still receive EOS so their finalization runs.
                if cancelled && matches!(event, StreamEvent::Batch(_)) {
                    // discarded
                } else {
                    let outcome = {
                        let mut op = shared.operators[&node].lock();
                        call_with_sensors(op.as_mut(), event, leg)
                    };
                    match outcome {
                        Ok(outputs) => {
                            for out in outputs {
                                if node == shared.exit {
                                    if let StreamEvent::Batch(batch) = out {
                                        if results_tx.send(Ok(batch)).is_err() {
                                            shared.stopped.store(true, Ordering::Release);
                                        }
                                    }
                                } else {
                                    shared.dispatch(node, out);
                                }
                            }
                        }
                        Err(e) => shared.fail(&results_tx, e),
                    }
                }
                shared.node_state[&node].in_flight.fetch_sub(1, Ordering::AcqRel);
                shared.try_exhaust(node);
            }
        }
        shared.active_tasks.fetch_sub(1, Ordering::AcqRel);
        shared.cond.notify_all();
    }
    let _ = shared.plan.node_count();
}

impl Iterator for ParallelEngine {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        self.rx.recv().ok()
    }
}

impl Drop for ParallelEngine {
    fn drop(&mut self) {
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc as StdArc;

    use quillsql_common::array::TypedArray;
    use quillsql_common::{Array, DataType, Field, QueryProperties, Schema};
    use quillsql_expr::{Expr, ReferenceEvaluator};
    use quillsql_plan::physical::{JoinStrategy, PhysicalPlan};
    use quillsql_plan::EdgeLabel;

    use super::*;
    use crate::operators::reader::VecDataSource;
    use crate::pool::MemoryPool;

    struct NoSources;
    impl DataSourceFactory for NoSources {
        fn open(&self, _connector: &quillsql_common::ConnectorDescriptor) -> Result<Box<dyn crate::operators::reader::DataSource>> {
            unreachable!("tests do not build Reader nodes")
        }
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(QueryProperties::new("q1"), StdArc::new(MemoryPool::new(0)), StdArc::new(ReferenceEvaluator))
    }

    fn schema() -> Schema {
        Schema::new(vec![Field::new("t.a", "a", DataType::Integer)])
    }

    fn values_to_exit_plan() -> PhysicalPlan {
        let mut plan = PhysicalPlan::new();
        let values = plan.add_node(PhysicalNode::Values {
            rows: vec![vec![Expr::Literal(quillsql_common::Datum::Integer(1))], vec![Expr::Literal(quillsql_common::Datum::Integer(2))]],
            output_schema: schema(),
        });
        let exit = plan.add_node(PhysicalNode::Exit);
        plan.add_edge(values, exit, EdgeLabel::None).unwrap();
        plan
    }

    #[test]
    fn serial_engine_streams_batches_to_exit_then_stops() {
        let plan = values_to_exit_plan();
        let engine = SerialEngine::new(plan, ctx(), &NoSources).unwrap();
        assert_eq!(engine.result_type(), ResultType::Tabular);
        let batches: Vec<Batch> = engine.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].row_count(), 2);
    }

    #[test]
    fn parallel_engine_matches_serial_output() {
        let plan = values_to_exit_plan();
        let engine = ParallelEngine::spawn(plan, ctx(), &NoSources, 4).unwrap();
        assert_eq!(engine.result_type(), ResultType::Tabular);
        let batches: Vec<Batch> = engine.collect::<Result<Vec<_>>>().unwrap();
        let total_rows: usize = batches.iter().map(|b| b.row_count()).sum();
        assert_eq!(total_rows, 2);
    }

    #[test]
    fn parallel_engine_delivers_eos_to_a_buffering_operator() {
        // A buffering operator (Sort) only ever emits once it actually
        // receives `call(Eos, ..)`; this pins down that the parallel
        // engine dispatches a real `Eos` event when an entry's `pump`
        // returns `None`, not just internal exhaustion bookkeeping.
        use quillsql_plan::logical::SortKey;

        let mut plan = PhysicalPlan::new();
        let values = plan.add_node(PhysicalNode::Values {
            rows: vec![
                vec![Expr::Literal(quillsql_common::Datum::Integer(3))],
                vec![Expr::Literal(quillsql_common::Datum::Integer(1))],
                vec![Expr::Literal(quillsql_common::Datum::Integer(2))],
            ],
            output_schema: schema(),
        });
        let sort = plan.add_node(PhysicalNode::Sort {
            order_by: vec![SortKey {
                expr: Expr::Identifier("t.a".into()),
                ascending: true,
                nulls_first: false,
            }],
        });
        let exit = plan.add_node(PhysicalNode::Exit);
        plan.add_edge(values, sort, EdgeLabel::None).unwrap();
        plan.add_edge(sort, exit, EdgeLabel::None).unwrap();

        let engine = ParallelEngine::spawn(plan, ctx(), &NoSources, 4).unwrap();
        let batches: Vec<Batch> = engine.collect::<Result<Vec<_>>>().unwrap();
        let total_rows: usize = batches.iter().map(|b| b.row_count()).sum();
        assert_eq!(total_rows, 3);
    }

    fn union_plan() -> (PhysicalPlan, NodeId, NodeId) {
        let mut plan = PhysicalPlan::new();
        let left = plan.add_node(PhysicalNode::Values {
            rows: vec![vec![Expr::Literal(quillsql_common::Datum::Integer(1))]],
            output_schema: schema(),
        });
        let right = plan.add_node(PhysicalNode::Values {
            rows: vec![vec![Expr::Literal(quillsql_common::Datum::Integer(2))]],
            output_schema: schema(),
        });
        let union = plan.add_node(PhysicalNode::Union { output_schema: schema() });
        let exit = plan.add_node(PhysicalNode::Exit);
        plan.add_edge(left, union, EdgeLabel::None).unwrap();
        plan.add_edge(right, union, EdgeLabel::None).unwrap();
        plan.add_edge(union, exit, EdgeLabel::None).unwrap();
        (plan, left, right)
    }

    #[test]
    fn serial_engine_drains_every_entry_before_finishing() {
        let (plan, _left, _right) = union_plan();
        let engine = SerialEngine::new(plan, ctx(), &NoSources).unwrap();
        let batches: Vec<Batch> = engine.collect::<Result<Vec<_>>>().unwrap();
        let total_rows: usize = batches.iter().map(|b| b.row_count()).sum();
        assert_eq!(total_rows, 2);
    }

    #[test]
    fn pump_order_visits_join_left_leg_before_right_leg() {
        let mut plan = PhysicalPlan::new();
        let left = plan.add_node(PhysicalNode::Values {
            rows: vec![vec![Expr::Literal(quillsql_common::Datum::Integer(1))]],
            output_schema: schema(),
        });
        let right = plan.add_node(PhysicalNode::Values {
            rows: vec![vec![Expr::Literal(quillsql_common::Datum::Integer(1))]],
            output_schema: schema(),
        });
        let join = plan.add_node(PhysicalNode::Join {
            strategy: JoinStrategy::Cross,
            condition: None,
            output_schema: schema(),
        });
        let exit = plan.add_node(PhysicalNode::Exit);
        plan.add_edge(left, join, EdgeLabel::Left).unwrap();
        plan.add_edge(right, join, EdgeLabel::Right).unwrap();
        plan.add_edge(join, exit, EdgeLabel::None).unwrap();

        let order = pump_order(&plan, exit);
        let left_pos = order.iter().position(|id| *id == left).unwrap();
        let right_pos = order.iter().position(|id| *id == right).unwrap();
        assert!(left_pos < right_pos);
    }

    #[test]
    fn forking_plan_is_rejected() {
        let mut plan = PhysicalPlan::new();
        let values = plan.add_node(PhysicalNode::Values { rows: vec![], output_schema: schema() });
        let exit_a = plan.add_node(PhysicalNode::Exit);
        let exit_b = plan.add_node(PhysicalNode::Exit);
        plan.add_edge(values, exit_a, EdgeLabel::None).unwrap();
        plan.add_edge(values, exit_b, EdgeLabel::None).unwrap();
        assert!(validate_physical_plan(&plan).is_err());
    }

    #[test]
    fn result_type_reports_non_tabular_for_explain() {
        let mut plan = PhysicalPlan::new();
        let explain = plan.add_node(PhysicalNode::Explain { analyze: false, rendered_plan: "Exit".to_owned() });
        let exit = plan.add_node(PhysicalNode::Exit);
        plan.add_edge(explain, exit, EdgeLabel::None).unwrap();
        assert_eq!(result_type(&plan, exit), ResultType::NonTabular);
    }

    #[test]
    fn cancellation_short_circuits_pumping() {
        let plan = values_to_exit_plan();
        let ctx = ctx();
        ctx.cancel();
        let engine = SerialEngine::new(plan, ctx, &NoSources).unwrap();
        let batches: Vec<Batch> = engine.collect::<Result<Vec<_>>>().unwrap();
        assert!(batches.is_empty());
    }

    #[test]
    fn reader_operator_reads_from_vec_data_source_through_engine() {
        use quillsql_common::ConnectorDescriptor;
        use quillsql_plan::physical::ScanDescriptor;

        struct OneBatch;
        impl DataSourceFactory for OneBatch {
            fn open(&self, _connector: &quillsql_common::ConnectorDescriptor) -> Result<Box<dyn crate::operators::reader::DataSource>> {
                let batch = Batch::new(schema(), vec![StdArc::new(Array::Integer(TypedArray::from_values(vec![7, 8, 9])))]);
                Ok(Box::new(VecDataSource::new(vec![batch])))
            }
        }

        let mut plan = PhysicalPlan::new();
        let scan = ScanDescriptor {
            connector: ConnectorDescriptor::new("t", schema()),
            predicates: Vec::new(),
            projected_columns: None,
            restricted_schema: schema(),
            hints: Vec::new(),
        };
        let reader = plan.add_node(PhysicalNode::Reader { scan, is_async: false });
        let exit = plan.add_node(PhysicalNode::Exit);
        plan.add_edge(reader, exit, EdgeLabel::None).unwrap();

        let engine = SerialEngine::new(plan, ctx(), &OneBatch).unwrap();
        let batches: Vec<Batch> = engine.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(batches.iter().map(|b| b.row_count()).sum::<usize>(), 3);
    }
}
