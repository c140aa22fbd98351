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

//! The optimizer framework: a `Strategy` is a `(visit, complete)`
//! pair over a shared rewrite context; the `StrategyRunner` applies the
//! fixed, ordered strategy list to a logical plan.
//!
//! Rather than runtime class dispatch over strategy objects, each strategy is a
//! plain `Strategy` trait object the runner calls by reference, visiting
//! nodes in `depth_first_search_flat` order.

pub mod strategies;

use quillsql_common::{QueryProperties, Result};

use crate::dag::NodeId;
use crate::logical::LogicalPlan;
use crate::physical_planner::ConnectorCatalog;

/// Per-strategy mutable state threaded across one DFS pass over the plan.
/// Each strategy owns its own concrete context type; this trait lets the
/// runner treat them uniformly without a tagged union.
pub trait RewriteContext: Default {}

impl<T: Default> RewriteContext for T {}

/// A single optimizer strategy. `visit` fires once per node in DFS
/// order and may rewrite `plan` or accumulate state in `self`; `complete`
/// fires once after the traversal and must be safe to call even when
/// `visit` never fired (an empty plan, or a plan with no nodes this
/// strategy cares about).
pub trait Strategy {
    fn name(&self) -> &'static str;

    /// Visit `node` of `plan`. `node` may already have been rewritten or
    /// removed by an earlier call in the same pass (e.g. `remove_node_heal`
    /// from a sibling visit); implementations must tolerate a missing node
    /// by no-op'ing rather than panicking.
    fn visit(&mut self, plan: &mut LogicalPlan, node: NodeId, props: &QueryProperties) -> Result<()>;

    fn complete(&mut self, plan: &mut LogicalPlan, props: &QueryProperties) -> Result<()> {
        let _ = (plan, props);
        Ok(())
    }
}

/// Apply a single strategy over every node of `plan`, in DFS order, then
/// call `complete`. Strategies must be idempotent: running this
/// twice on a fixed point yields the same plan, which the strategy test
/// suites below assert directly.
pub fn run_strategy(strategy: &mut dyn Strategy, plan: &mut LogicalPlan, props: &QueryProperties) -> Result<()> {
    tracing::debug!(strategy = strategy.name(), "optimizer strategy entering");
    for node in plan.depth_first_search_flat() {
        if plan.node(node).is_none() {
            continue;
        }
        strategy.visit(plan, node, props)?;
    }
    strategy.complete(plan, props)?;
    tracing::debug!(strategy = strategy.name(), "optimizer strategy exiting");
    Ok(())
}

/// The fixed fixed-order strategy runner: split-conjuncts ->
/// boolean-simplify -> constant-fold -> fixed-function-eliminate ->
/// in-to-eq -> predicate-pushdown -> flatten-plan -> projection-pushdown
/// -> operator-fusion -> predicate-tagging.
///
/// This is the `cost_based_optimizer`'s strategy list from the original
/// (see DESIGN.md's Open Question resolution): the `heuristic_optimizer`
/// parallel path is not ported.
pub struct StrategyRunner;

impl StrategyRunner {
    /// `catalog` feeds predicate-pushdown's connector-capability check.
    /// An empty catalog treats every relation as not
    /// predicate-pushable, which is always sound (it just keeps the Filter
    /// in place) — the safe default for callers planning without a real
    /// connector registry, e.g. unit tests.
    pub fn optimize(logical: &LogicalPlan, props: &QueryProperties, catalog: &ConnectorCatalog) -> Result<LogicalPlan> {
        let mut plan = logical.copy();
        let mut pipeline: Vec<Box<dyn Strategy>> = vec![
            Box::new(strategies::split_conjuncts::SplitConjuncts::default()),
            Box::new(strategies::boolean_simplify::BooleanSimplify),
            Box::new(strategies::constant_fold::ConstantFold),
            Box::new(strategies::fixed_function_eliminate::FixedFunctionEliminate),
            Box::new(strategies::in_to_eq::InToEq),
            Box::new(strategies::predicate_pushdown::PredicatePushdown::new(props, catalog)),
            Box::new(strategies::flatten_plan::FlattenPlan::default()),
            Box::new(strategies::projection_pushdown::ProjectionPushdown::default()),
            Box::new(strategies::operator_fusion::OperatorFusion),
            Box::new(strategies::predicate_tagging::PredicateTagging::default()),
        ];
        for strategy in pipeline.iter_mut() {
            run_strategy(strategy.as_mut(), &mut plan, props)?;
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use quillsql_common::QueryProperties;

    use super::*;
    use crate::logical::LogicalStep;

    #[test]
    fn optimize_preserves_acyclicity() {
        let mut plan = LogicalPlan::new();
        let scan = plan.add_node(LogicalStep::Scan {
            relation: "t".into(),
            schema: quillsql_common::Schema::empty(),
            predicates: Vec::new(),
            projected_columns: None,
            hints: Vec::new(),
        });
        let exit = plan.add_node(LogicalStep::Exit);
        plan.add_edge(scan, exit, crate::dag::EdgeLabel::None).unwrap();

        let props = QueryProperties::new("q1");
        let optimized = StrategyRunner::optimize(&plan, &props, &ConnectorCatalog::new()).unwrap();
        assert!(optimized.is_acyclic());
    }

    #[test]
    fn optimize_is_idempotent_at_fixed_point() {
        let mut plan = LogicalPlan::new();
        let scan = plan.add_node(LogicalStep::Scan {
            relation: "t".into(),
            schema: quillsql_common::Schema::empty(),
            predicates: Vec::new(),
            projected_columns: None,
            hints: Vec::new(),
        });
        let exit = plan.add_node(LogicalStep::Exit);
        plan.add_edge(scan, exit, crate::dag::EdgeLabel::None).unwrap();

        let props = QueryProperties::new("q1");
        let once = StrategyRunner::optimize(&plan, &props, &ConnectorCatalog::new()).unwrap();
        let twice = StrategyRunner::optimize(&once, &props, &ConnectorCatalog::new()).unwrap();
        assert_eq!(once.node_count(), twice.node_count());
    }
}
