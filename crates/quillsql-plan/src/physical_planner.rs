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

//! The physical planner: a structural, 1:1 translation from logical
//! nodes to physical operators, preserving every edge exactly. No
//! reordering happens here — that was the optimizer's job.

use hashbrown::HashMap;
use quillsql_common::{ConnectorDescriptor, Datum, Result};
use quillsql_expr::Expr;

use crate::dag::{EdgeLabel, NodeId, PlanDag};
use crate::logical::{LogicalPlan, LogicalStep};
use crate::physical::{JoinStrategy, PhysicalNode, PhysicalPlan, ScanDescriptor};

/// Connector descriptors keyed by relation name, supplied by the (external)
/// catalog/connector registry so the planner can decide Reader vs.
/// AsyncReader and whether a scan's predicate list survived pushdown for a
/// reason worth recording on the physical node.
pub type ConnectorCatalog = HashMap<String, ConnectorDescriptor>;

pub fn build_physical_plan(logical: &LogicalPlan, catalog: &ConnectorCatalog) -> Result<PhysicalPlan> {
    let mut physical = PhysicalPlan::new();
    let mut mapping: HashMap<NodeId, NodeId> = HashMap::new();

    for id in logical.node_ids() {
        let step = logical.node(id).expect("node_ids yields only present ids");
        let physical_node = translate_step(step, catalog)?;
        mapping.insert(id, physical.add_node(physical_node));
    }

    for id in logical.node_ids() {
        for (dst, label) in logical.outgoing_edges(id) {
            physical.add_edge(mapping[&id], mapping[&dst], label)?;
        }
    }

    Ok(physical)
}

fn translate_step(step: &LogicalStep, catalog: &ConnectorCatalog) -> Result<PhysicalNode> {
    Ok(match step {
        LogicalStep::Scan {
            relation,
            schema,
            predicates,
            projected_columns,
            hints,
        } => {
            let connector = catalog
                .get(relation)
                .cloned()
                .unwrap_or_else(|| ConnectorDescriptor::new(relation.clone(), schema.clone()));
            let restricted_schema = match projected_columns {
                Some(cols) => schema.project(cols),
                None => schema.clone(),
            };
            let is_async = connector.supports_async;
            PhysicalNode::Reader {
                scan: ScanDescriptor {
                    connector,
                    predicates: predicates.clone(),
                    projected_columns: projected_columns.clone(),
                    restricted_schema,
                    hints: hints.clone(),
                },
                is_async,
            }
        }
        LogicalStep::FunctionDataset {
            output_schema,
            predicates,
            ..
        } => PhysicalNode::Reader {
            scan: ScanDescriptor {
                connector: ConnectorDescriptor::new("function_dataset", output_schema.clone()),
                predicates: predicates.clone(),
                projected_columns: None,
                restricted_schema: output_schema.clone(),
                hints: Vec::new(),
            },
            is_async: false,
        },
        LogicalStep::Subquery { output_schema, .. } => PhysicalNode::Reader {
            scan: ScanDescriptor {
                connector: ConnectorDescriptor::new("subquery", output_schema.clone()),
                predicates: Vec::new(),
                projected_columns: None,
                restricted_schema: output_schema.clone(),
                hints: Vec::new(),
            },
            is_async: false,
        },
        LogicalStep::Cte { output_schema, .. } => PhysicalNode::Reader {
            scan: ScanDescriptor {
                connector: ConnectorDescriptor::new("cte", output_schema.clone()),
                predicates: Vec::new(),
                projected_columns: None,
                restricted_schema: output_schema.clone(),
                hints: Vec::new(),
            },
            is_async: false,
        },
        LogicalStep::Fake { schema, .. } => PhysicalNode::Reader {
            scan: ScanDescriptor {
                connector: ConnectorDescriptor::new("fake", schema.clone()),
                predicates: Vec::new(),
                projected_columns: None,
                restricted_schema: schema.clone(),
                hints: Vec::new(),
            },
            is_async: false,
        },
        LogicalStep::Filter {
            condition,
            condition_list,
        } => PhysicalNode::Filter {
            condition: condition.clone(),
            condition_list: condition_list.clone(),
        },
        LogicalStep::Project {
            expressions,
            output_schema,
        } => PhysicalNode::Projection {
            expressions: expressions.clone(),
            output_schema: output_schema.clone(),
        },
        LogicalStep::Union { output_schema } => PhysicalNode::Union {
            output_schema: output_schema.clone(),
        },
        LogicalStep::Difference { output_schema } => PhysicalNode::Union {
            output_schema: output_schema.clone(),
        },
        LogicalStep::Join {
            kind,
            condition,
            output_schema,
        } => {
            let is_equi = condition.as_ref().is_some_and(is_equi_condition);
            let strategy = JoinStrategy::from_logical(*kind, condition, is_equi);
            PhysicalNode::Join {
                strategy,
                condition: condition.clone(),
                output_schema: output_schema.clone(),
            }
        }
        LogicalStep::Group { group_by, output_schema } => PhysicalNode::AggregateAndGroup {
            group_by: group_by.clone(),
            aggregates: Vec::new(),
            output_schema: output_schema.clone(),
            max_buffer_size: 10_000,
        },
        LogicalStep::Aggregate {
            group_by,
            aggregates,
            output_schema,
        } => {
            if group_by.is_empty() {
                PhysicalNode::SimpleAggregate {
                    aggregates: aggregates.clone(),
                    output_schema: output_schema.clone(),
                }
            } else {
                PhysicalNode::AggregateAndGroup {
                    group_by: group_by.clone(),
                    aggregates: aggregates.clone(),
                    output_schema: output_schema.clone(),
                    max_buffer_size: 10_000,
                }
            }
        }
        LogicalStep::Show { output_schema } => PhysicalNode::ShowColumns {
            relation: String::new(),
            output_schema: output_schema.clone(),
        },
        LogicalStep::ShowColumns {
            relation,
            output_schema,
        } => PhysicalNode::ShowColumns {
            relation: relation.clone(),
            output_schema: output_schema.clone(),
        },
        LogicalStep::Set { variable, value } => PhysicalNode::SetVariable {
            variable: variable.clone(),
            value: value.clone(),
        },
        LogicalStep::Limit { limit, offset } => PhysicalNode::Limit {
            limit: *limit,
            offset: *offset,
        },
        LogicalStep::Order { order_by } => PhysicalNode::Sort {
            order_by: order_by.clone(),
        },
        LogicalStep::Distinct { distinct_on } => PhysicalNode::Distinct {
            distinct_on: distinct_on.clone(),
        },
        LogicalStep::HeapSort { order_by, limit } => PhysicalNode::HeapSort {
            order_by: order_by.clone(),
            limit: *limit,
        },
        LogicalStep::Values { rows, output_schema } => PhysicalNode::Values {
            rows: rows.clone(),
            output_schema: output_schema.clone(),
        },
        LogicalStep::Unnest { output_schema, .. } => PhysicalNode::Projection {
            expressions: Vec::new(),
            output_schema: output_schema.clone(),
        },
        LogicalStep::GenerateSeries {
            start,
            stop,
            step,
            output_schema,
        } => PhysicalNode::GenerateSeries {
            start: start.clone(),
            stop: stop.clone(),
            step: step.clone(),
            output_schema: output_schema.clone(),
        },
        LogicalStep::Explain { analyze } => PhysicalNode::Explain {
            analyze: *analyze,
            rendered_plan: String::new(),
        },
        LogicalStep::Exit => PhysicalNode::Exit,
    })
}

/// `a.x = b.y`-shaped condition: both sides of a top-level `Eq` (or a
/// conjunction of such) are bare identifiers. Anything else (a function
/// call, a range comparison) disqualifies the inner/outer hash-join
/// strategy in favor of `NonEqui`/`NestedLoop`.
fn is_equi_condition(expr: &Expr) -> bool {
    use quillsql_expr::{BoolOp, CompareOp};
    match expr.unwrap_nested() {
        Expr::Compare {
            op: CompareOp::Eq,
            left,
            right,
        } => matches!(left.unwrap_nested(), Expr::Identifier(_)) && matches!(right.unwrap_nested(), Expr::Identifier(_)),
        Expr::Boolean {
            op: BoolOp::And,
            left,
            right,
        } => is_equi_condition(left) && is_equi_condition(right),
        _ => false,
    }
}

/// Second pass: after translation, replace the subplan below any `Filter`
/// whose condition is the literal `FALSE` with a `NullReader` of that
/// scan's restricted schema. Separate from
/// `translate_step` because the Filter node doesn't know its descendant
/// scan's schema in a single top-down pass.
pub fn resolve_null_readers(plan: &mut PhysicalPlan) -> Result<()> {
    let contradictory: Vec<NodeId> = plan
        .node_ids()
        .filter(|id| matches!(plan.node(*id), Some(PhysicalNode::Filter { condition, .. }) if matches!(condition.as_literal(), Some(Datum::Boolean(false)))))
        .collect();

    for filter_id in contradictory {
        let descendants = descendants_of(plan, filter_id);
        let schema = descendants
            .iter()
            .find_map(|id| match plan.node(*id) {
                Some(PhysicalNode::Reader { scan, .. }) => Some(scan.restricted_schema.clone()),
                Some(PhysicalNode::NullReader { schema }) => Some(schema.clone()),
                _ => None,
            })
            .unwrap_or_default();

        for id in &descendants {
            if *id != filter_id {
                plan.remove_node_heal(*id)?;
            }
        }
        if let Some(node) = plan.node_mut(filter_id) {
            *node = PhysicalNode::NullReader { schema };
        }
    }
    Ok(())
}

fn descendants_of(plan: &PhysicalPlan, root: NodeId) -> Vec<NodeId> {
    let mut stack = vec![root];
    let mut seen = hashbrown::HashSet::new();
    let mut out = Vec::new();
    while let Some(id) = stack.pop() {
        if !seen.insert(id) {
            continue;
        }
        out.push(id);
        for (child, _) in plan.ingoing_edges(id) {
            stack.push(child);
        }
    }
    out
}

/// Helper used by tests and by callers building a logical plan by hand:
/// wires `src -> dst` with the given label, propagating the `PlanDag`
/// error as a `quillsql_common::Result`.
pub fn connect(plan: &mut PlanDag<LogicalStep>, src: NodeId, dst: NodeId, label: EdgeLabel) -> Result<()> {
    plan.add_edge(src, dst, label)
}

#[cfg(test)]
mod tests {
    use quillsql_common::{DataType, Field, Schema};

    use super::*;

    fn scan_schema() -> Schema {
        Schema::new(vec![Field::new("t.a", "a", DataType::Integer)])
    }

    #[test]
    fn translates_scan_filter_exit_preserving_edges() {
        let mut logical = LogicalPlan::new();
        let scan = logical.add_node(LogicalStep::Scan {
            relation: "t".into(),
            schema: scan_schema(),
            predicates: Vec::new(),
            projected_columns: None,
            hints: Vec::new(),
        });
        let filter = logical.add_node(LogicalStep::Filter {
            condition: Expr::compare(
                quillsql_expr::CompareOp::Gt,
                Expr::Identifier("t.a".into()),
                Expr::Literal(Datum::Integer(1)),
            ),
            condition_list: Vec::new(),
        });
        let exit = logical.add_node(LogicalStep::Exit);
        logical.add_edge(scan, filter, EdgeLabel::None).unwrap();
        logical.add_edge(filter, exit, EdgeLabel::None).unwrap();

        let physical = build_physical_plan(&logical, &ConnectorCatalog::new()).unwrap();
        assert_eq!(physical.node_count(), 3);
        assert!(physical.is_acyclic());
    }

    #[test]
    fn contradictory_filter_becomes_null_reader() {
        let mut logical = LogicalPlan::new();
        let scan = logical.add_node(LogicalStep::Scan {
            relation: "t".into(),
            schema: scan_schema(),
            predicates: Vec::new(),
            projected_columns: None,
            hints: Vec::new(),
        });
        let filter = logical.add_node(LogicalStep::Filter {
            condition: Expr::Literal(Datum::Boolean(false)),
            condition_list: Vec::new(),
        });
        let exit = logical.add_node(LogicalStep::Exit);
        logical.add_edge(scan, filter, EdgeLabel::None).unwrap();
        logical.add_edge(filter, exit, EdgeLabel::None).unwrap();

        let mut physical = build_physical_plan(&logical, &ConnectorCatalog::new()).unwrap();
        resolve_null_readers(&mut physical).unwrap();

        assert_eq!(physical.node_count(), 2);
        let remaining: Vec<_> = physical.node_ids().collect();
        let has_null_reader = remaining
            .iter()
            .any(|id| matches!(physical.node(*id), Some(PhysicalNode::NullReader { schema }) if schema == &scan_schema()));
        assert!(has_null_reader);
    }

    #[test]
    fn equi_condition_promotes_inner_hash_join() {
        let condition = Expr::compare(
            quillsql_expr::CompareOp::Eq,
            Expr::Identifier("a.id".into()),
            Expr::Identifier("b.id".into()),
        );
        assert!(is_equi_condition(&condition));
        let strategy = JoinStrategy::from_logical(JoinKind::Inner, &Some(condition), true);
        assert_eq!(strategy, JoinStrategy::Inner);
    }
}
