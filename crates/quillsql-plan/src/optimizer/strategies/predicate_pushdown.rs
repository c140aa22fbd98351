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

//! Predicate pushdown: walks the plan from each exit point toward
//! its entries carrying the predicates collected from `Filter` nodes along
//! the way, and tries to re-home each one as close to its relation's
//! `Scan` as the plan shape allows.
//!
//! Implemented entirely in `complete`, not `visit`: `visit` fires in
//! `depth_first_search_flat`'s producer-first order, but deciding "can this
//! predicate move past this node" requires knowing what's *below* a node,
//! which is only available walking the other way. `flatten_plan` and
//! `projection_pushdown` share the same shape for the same reason.
//!
//! A predicate only crosses an `Inner`/`Cross` join, routed to whichever
//! leg owns every relation it references; a predicate referencing relations
//! on both legs (a genuine join condition candidate) stays above the join.
//! Every other join kind blocks all pending predicates: `Left`/`Semi`/
//! `Anti` obviously introduce nulls or filter rows on at least one leg, and
//! `RightOuter`/`FullOuter`/`CrossUnnest` have the same shape, so
//! DESIGN.md records treating them the same way as a deliberate extension.
//!
//! A predicate only lands in a `Scan`'s own `predicates` list if the
//! connector catalog marks that relation predicate-pushable and (when
//! `only_push_equals_predicates` is set) the predicate is a plain equality
//! comparison; otherwise it is left as a `Filter` directly above the scan.

use hashbrown::HashSet;

use quillsql_common::{QueryProperties, Result};
use quillsql_expr::{CompareOp, Expr};

use crate::dag::{EdgeLabel, NodeId};
use crate::logical::{JoinKind, LogicalPlan, LogicalStep};
use crate::optimizer::Strategy;
use crate::physical_planner::ConnectorCatalog;

pub struct PredicatePushdown {
    only_push_equals: bool,
    catalog: ConnectorCatalog,
}

impl PredicatePushdown {
    pub fn new(props: &QueryProperties, catalog: &ConnectorCatalog) -> Self {
        Self {
            only_push_equals: props.config.only_push_equals_predicates,
            catalog: catalog.clone(),
        }
    }
}

impl Strategy for PredicatePushdown {
    fn name(&self) -> &'static str {
        "predicate_pushdown"
    }

    fn visit(&mut self, _plan: &mut LogicalPlan, _node: NodeId, _props: &QueryProperties) -> Result<()> {
        Ok(())
    }

    fn complete(&mut self, plan: &mut LogicalPlan, _props: &QueryProperties) -> Result<()> {
        for exit in plan.get_exit_points() {
            walk(plan, exit, Vec::new(), &self.catalog, self.only_push_equals)?;
        }
        Ok(())
    }
}

fn relation_of(id: &quillsql_common::ColumnIdentity) -> &str {
    id.as_str().split('.').next().unwrap_or_else(|| id.as_str())
}

fn relations_of(expr: &Expr) -> HashSet<String> {
    expr.identities().iter().map(|id| relation_of(id).to_owned()).collect()
}

fn is_pure_eq(expr: &Expr) -> bool {
    matches!(expr.unwrap_nested(), Expr::Compare { op: CompareOp::Eq, .. })
}

/// Every relation reachable upstream (toward producers) of `node_id`,
/// including `node_id` itself if it is a scan/subquery/cte.
fn relations_under(plan: &LogicalPlan, node_id: NodeId) -> HashSet<String> {
    let mut out = HashSet::new();
    collect_relations(plan, node_id, &mut out);
    out
}

fn collect_relations(plan: &LogicalPlan, node_id: NodeId, out: &mut HashSet<String>) {
    if let Some(step) = plan.node(node_id) {
        if let Some(relation) = step.own_relation() {
            out.insert(relation.to_owned());
        }
    }
    for (src, _) in plan.ingoing_edges(node_id) {
        collect_relations(plan, src, out);
    }
}

/// Reinsert `pending` as a single `Filter` directly above `anchor`, or do
/// nothing if `pending` is empty.
fn reinsert_above(plan: &mut LogicalPlan, pending: Vec<Expr>, anchor: NodeId) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }
    let (condition, condition_list) = if pending.len() == 1 {
        (pending.into_iter().next().expect("len checked above"), Vec::new())
    } else {
        let combined = pending.iter().cloned().reduce(Expr::and).expect("len > 1 checked above");
        (combined, pending)
    };
    let new_id = plan.reserve_node_id();
    plan.insert_node_after(new_id, LogicalStep::Filter { condition, condition_list }, anchor)?;
    Ok(())
}

fn eligible_for_scan(pred: &Expr, relation: &str, catalog: &ConnectorCatalog, only_push_equals: bool) -> bool {
    if pred.contains_aggregate() {
        return false;
    }
    let rels = relations_of(pred);
    if !rels.iter().all(|r| r == relation) {
        return false;
    }
    let connector_pushable = catalog.get(relation).map(|d| d.predicate_pushable).unwrap_or(false);
    connector_pushable && (!only_push_equals || is_pure_eq(pred))
}

fn walk(plan: &mut LogicalPlan, node_id: NodeId, pending: Vec<Expr>, catalog: &ConnectorCatalog, only_push_equals: bool) -> Result<()> {
    let Some(step) = plan.node(node_id).cloned() else {
        return Ok(());
    };

    match step {
        LogicalStep::Filter { condition, condition_list } => {
            let mut merged = if condition_list.is_empty() { vec![condition] } else { condition_list };
            merged.extend(pending);
            let ingoing = plan.ingoing_edges(node_id);
            plan.remove_node_heal(node_id)?;
            if let Some((src, _)) = ingoing.into_iter().next() {
                walk(plan, src, merged, catalog, only_push_equals)?;
            }
        }
        LogicalStep::Join { kind, .. } if matches!(kind, JoinKind::Inner | JoinKind::Cross) => {
            let ingoing = plan.ingoing_edges(node_id);
            let left_id = ingoing.iter().find(|(_, l)| *l == EdgeLabel::Left).map(|(id, _)| *id);
            let right_id = ingoing.iter().find(|(_, l)| *l == EdgeLabel::Right).map(|(id, _)| *id);
            let left_rels = left_id.map(|id| relations_under(plan, id)).unwrap_or_default();
            let right_rels = right_id.map(|id| relations_under(plan, id)).unwrap_or_default();

            let mut left_pending = Vec::new();
            let mut right_pending = Vec::new();
            let mut stay = Vec::new();
            for pred in pending {
                let rels = relations_of(&pred);
                if pred.contains_aggregate() || rels.is_empty() {
                    stay.push(pred);
                } else if rels.is_subset(&left_rels) {
                    left_pending.push(pred);
                } else if rels.is_subset(&right_rels) {
                    right_pending.push(pred);
                } else {
                    stay.push(pred);
                }
            }
            reinsert_above(plan, stay, node_id)?;
            if let Some(id) = left_id {
                walk(plan, id, left_pending, catalog, only_push_equals)?;
            }
            if let Some(id) = right_id {
                walk(plan, id, right_pending, catalog, only_push_equals)?;
            }
        }
        LogicalStep::Join { .. } => {
            let ingoing = plan.ingoing_edges(node_id);
            reinsert_above(plan, pending, node_id)?;
            for (src, _) in ingoing {
                walk(plan, src, Vec::new(), catalog, only_push_equals)?;
            }
        }
        LogicalStep::Scan { relation, .. } => {
            let mut keep_at_scan = Vec::new();
            let mut reinsert = Vec::new();
            for pred in pending {
                if eligible_for_scan(&pred, &relation, catalog, only_push_equals) {
                    keep_at_scan.push(pred);
                } else {
                    reinsert.push(pred);
                }
            }
            if !keep_at_scan.is_empty() {
                if let Some(LogicalStep::Scan { predicates, .. }) = plan.node_mut(node_id) {
                    predicates.extend(keep_at_scan);
                }
            }
            reinsert_above(plan, reinsert, node_id)?;
        }
        LogicalStep::Project { .. } | LogicalStep::Order { .. } | LogicalStep::HeapSort { .. } => {
            let ingoing = plan.ingoing_edges(node_id);
            if let Some((src, _)) = ingoing.into_iter().next() {
                walk(plan, src, pending, catalog, only_push_equals)?;
            }
        }
        _ => {
            let ingoing = plan.ingoing_edges(node_id);
            reinsert_above(plan, pending, node_id)?;
            for (src, _) in ingoing {
                walk(plan, src, Vec::new(), catalog, only_push_equals)?;
            }
        }
    }
    Ok(())
}
