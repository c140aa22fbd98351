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

//! The operator builder: walks a [`PhysicalPlan`] node and
//! instantiates the one live [`Operator`] it describes, dispatching each
//! node kind to its own operator implementation. Callers drive this once
//! per node discovered by [`PlanDag::depth_first_search_flat`] while
//! assembling an engine.

pub mod aggregate_state;
pub mod control;
pub mod distinct;
pub mod exit;
pub mod filter;
pub mod group_aggregate;
pub mod limit;
pub mod projection;
pub mod reader;
pub mod simple_aggregate;
pub mod sort;
pub mod union;
pub mod values;

use quillsql_common::{ConnectorDescriptor, QuillError, Result};
use quillsql_plan::dag::NodeId;
use quillsql_plan::physical::{JoinStrategy, PhysicalNode, PhysicalPlan};

use crate::join::cross::{CrossJoinOperator, UnnestJoinOperator};
use crate::join::filter::FilterJoinOperator;
use crate::join::hash::HashJoinOperator;
use crate::join::nested_loop::NestedLoopJoinOperator;
use crate::operator::{ExecutionContext, Operator};
use control::{ExplainOperator, SetVariableOperator, ShowColumnsOperator, ShowCreateOperator, ShowValueOperator};
use distinct::DistinctOperator;
use exit::ExitOperator;
use filter::FilterOperator;
use group_aggregate::AggregateAndGroupOperator;
use limit::LimitOperator;
use projection::ProjectionOperator;
use reader::{DataSource, NullReaderOperator, ReaderOperator};
use simple_aggregate::SimpleAggregateOperator;
use sort::{HeapSortOperator, SortOperator};
use union::UnionOperator;
use values::{GenerateSeriesOperator, ValuesOperator};

/// Resolves a scan's connector descriptor into a live [`DataSource`].
/// `quillsql-exec` has no connector registry of its own; every caller assembling an engine from a
/// real catalog supplies the glue here.
pub trait DataSourceFactory {
    fn open(&self, connector: &ConnectorDescriptor) -> Result<Box<dyn DataSource>>;
}

/// Builds the live operator for `id` within `plan`. `data_sources`
/// resolves `Reader` scans; every other node is self-contained given its
/// payload and `ctx`.
pub fn build_operator(
    plan: &PhysicalPlan,
    id: NodeId,
    ctx: ExecutionContext,
    data_sources: &dyn DataSourceFactory,
) -> Result<Box<dyn Operator>> {
    let node = plan
        .node(id)
        .ok_or_else(|| QuillError::invalid_internal_state(format!("build_operator: unknown node {id:?}")))?;

    let operator: Box<dyn Operator> = match node {
        PhysicalNode::Reader { scan, .. } => {
            let source = data_sources.open(&scan.connector)?;
            Box::new(ReaderOperator::new(scan.clone(), source, ctx))
        }
        PhysicalNode::NullReader { schema } => Box::new(NullReaderOperator::new(schema.clone())),
        PhysicalNode::Filter { condition, condition_list } => {
            let schema = upstream_schema(plan, id)?;
            Box::new(FilterOperator::new(condition.clone(), condition_list.clone(), schema, ctx))
        }
        PhysicalNode::Projection { expressions, output_schema } => {
            Box::new(ProjectionOperator::new(expressions.clone(), output_schema.clone(), ctx))
        }
        PhysicalNode::Sort { order_by } => {
            let schema = upstream_schema(plan, id)?;
            Box::new(SortOperator::new(order_by.clone(), schema, ctx))
        }
        PhysicalNode::HeapSort { order_by, limit } => {
            let schema = upstream_schema(plan, id)?;
            Box::new(HeapSortOperator::new(order_by.clone(), *limit, schema, ctx))
        }
        PhysicalNode::Limit { limit, offset } => {
            let schema = upstream_schema(plan, id)?;
            Box::new(LimitOperator::new(*limit, *offset, schema))
        }
        PhysicalNode::Distinct { distinct_on } => {
            let schema = upstream_schema(plan, id)?;
            Box::new(DistinctOperator::new(distinct_on.clone(), schema))
        }
        PhysicalNode::Union { output_schema } => {
            let input_count = plan.ingoing_edges(id).len();
            Box::new(UnionOperator::new(output_schema.clone(), input_count))
        }
        PhysicalNode::SimpleAggregate { aggregates, output_schema } => {
            Box::new(SimpleAggregateOperator::new(aggregates.clone(), output_schema.clone(), ctx)?)
        }
        PhysicalNode::AggregateAndGroup { group_by, aggregates, output_schema, max_buffer_size } => Box::new(
            AggregateAndGroupOperator::new(group_by.clone(), aggregates.clone(), output_schema.clone(), *max_buffer_size, ctx)?,
        ),
        PhysicalNode::Join { strategy, condition, output_schema } => build_join(*strategy, condition.clone(), output_schema.clone(), ctx),
        PhysicalNode::Exit => Box::new(ExitOperator::new(upstream_schema(plan, id)?)),
        PhysicalNode::Explain { analyze, rendered_plan } => Box::new(ExplainOperator::new(*analyze, rendered_plan.clone())),
        PhysicalNode::ShowColumns { relation, output_schema } => {
            let columns = output_schema.fields().to_vec();
            Box::new(ShowColumnsOperator::new(relation.clone(), columns, output_schema.clone()))
        }
        PhysicalNode::ShowCreate { relation } => {
            let schema = upstream_schema(plan, id).unwrap_or_else(|_| quillsql_common::Schema::empty());
            Box::new(ShowCreateOperator::new(relation.clone(), schema.fields().to_vec()))
        }
        PhysicalNode::ShowValue { value } => Box::new(ShowValueOperator::new(value.clone())),
        PhysicalNode::SetVariable { variable, value } => Box::new(SetVariableOperator::new(variable.clone(), value.clone())),
        PhysicalNode::Values { rows, output_schema } => Box::new(ValuesOperator::new(rows.clone(), output_schema.clone())),
        PhysicalNode::GenerateSeries { start, stop, step, output_schema } => {
            Box::new(GenerateSeriesOperator::new(start.clone(), stop.clone(), step.clone(), output_schema.clone()))
        }
    };
    Ok(operator)
}

/// Join strategy dispatch. `Inner`/`Outer` share the hash-based
/// implementation; `NestedLoop`/`NonEqui` share the chunked cartesian
/// scan. Neither strategy preserves which original `JoinKind` it came
/// from beyond `Outer` meaning "some kind of OUTER" (see
/// `JoinStrategy::from_logical`), so `NestedLoop`/`NonEqui` follow the
/// same "always emit unmatched build rows, let an outer `Filter` narrow
/// to inner-only semantics when needed" rule already established for
/// `Outer` — recorded as an Open Question in the grounding ledger.
fn build_join(strategy: JoinStrategy, condition: Option<quillsql_expr::Expr>, output_schema: quillsql_common::Schema, ctx: ExecutionContext) -> Box<dyn Operator> {
    match strategy {
        JoinStrategy::Inner => Box::new(HashJoinOperator::new(condition.expect("equi join carries a condition"), output_schema, false, ctx)),
        JoinStrategy::Outer => Box::new(HashJoinOperator::new(condition.expect("equi join carries a condition"), output_schema, true, ctx)),
        JoinStrategy::NestedLoop => Box::new(NestedLoopJoinOperator::new(condition, output_schema, true, ctx)),
        JoinStrategy::NonEqui => Box::new(NestedLoopJoinOperator::new(condition, output_schema, true, ctx)),
        JoinStrategy::Cross => Box::new(CrossJoinOperator::new(output_schema, ctx)),
        JoinStrategy::Unnest => Box::new(UnnestJoinOperator::new(
            condition.expect("unnest join repurposes `condition` to carry the array expression"),
            output_schema,
            ctx,
        )),
        JoinStrategy::FilterJoin { negated } => {
            Box::new(FilterJoinOperator::new(condition.expect("filter join carries a presence condition"), negated, output_schema, ctx))
        }
    }
}

/// `Filter`/`Sort`/`HeapSort`/`Limit`/`Distinct`/`Exit` pass their single
/// input's schema straight through, so the builder reads it off the nearest upstream node
/// that actually fixes a schema, walking back through any chain of
/// passthrough nodes.
fn upstream_schema(plan: &PhysicalPlan, id: NodeId) -> Result<quillsql_common::Schema> {
    let parents = plan.ingoing_edges(id);
    let (parent, _) = parents
        .first()
        .ok_or_else(|| QuillError::invalid_internal_state(format!("{id:?} has no upstream node to inherit a schema from")))?;
    let node = plan
        .node(*parent)
        .ok_or_else(|| QuillError::invalid_internal_state(format!("build_operator: unknown node {parent:?}")))?;
    match node {
        PhysicalNode::Filter { .. } | PhysicalNode::Sort { .. } | PhysicalNode::HeapSort { .. } | PhysicalNode::Limit { .. } | PhysicalNode::Distinct { .. } | PhysicalNode::Exit => {
            upstream_schema(plan, *parent)
        }
        other => Ok(node_output_schema(other)),
    }
}

fn node_output_schema(node: &PhysicalNode) -> quillsql_common::Schema {
    match node {
        PhysicalNode::Reader { scan, .. } => scan.restricted_schema.clone(),
        PhysicalNode::NullReader { schema } => schema.clone(),
        PhysicalNode::Projection { output_schema, .. }
        | PhysicalNode::Union { output_schema, .. }
        | PhysicalNode::SimpleAggregate { output_schema, .. }
        | PhysicalNode::AggregateAndGroup { output_schema, .. }
        | PhysicalNode::Join { output_schema, .. }
        | PhysicalNode::ShowColumns { output_schema, .. }
        | PhysicalNode::Values { output_schema, .. }
        | PhysicalNode::GenerateSeries { output_schema, .. } => output_schema.clone(),
        PhysicalNode::Explain { .. } => quillsql_common::Schema::new(vec![quillsql_common::Field::new("explain.plan", "QUERY PLAN", quillsql_common::DataType::Varchar)]),
        PhysicalNode::ShowCreate { .. } => {
            quillsql_common::Schema::new(vec![quillsql_common::Field::new("show_create.ddl", "Create Table", quillsql_common::DataType::Varchar)])
        }
        PhysicalNode::ShowValue { .. } => quillsql_common::Schema::new(vec![quillsql_common::Field::new("show_value.value", "Value", quillsql_common::DataType::Varchar)]),
        PhysicalNode::SetVariable { .. } => quillsql_common::Schema::new(vec![
            quillsql_common::Field::new("set_variable.variable", "Variable", quillsql_common::DataType::Varchar),
            quillsql_common::Field::new("set_variable.value", "Value", quillsql_common::DataType::Varchar),
        ]),
        PhysicalNode::Filter { .. } | PhysicalNode::Sort { .. } | PhysicalNode::HeapSort { .. } | PhysicalNode::Limit { .. } | PhysicalNode::Distinct { .. } | PhysicalNode::Exit => {
            unreachable!("node_output_schema is only called on non-passthrough nodes; upstream_schema walks through passthrough nodes before calling it")
        }
    }
}
