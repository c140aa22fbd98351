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

//! Join specializations. Every operator here buffers its `Left`
//! edge as the build/materialized side and streams its `Right` edge as
//! the probe side. The serial engine's pump order drains a node's `Left`
//! subtree (through EOS) before its `Right` subtree ever receives a
//! batch, so `Left` is the only edge that can be fully known
//! before the other starts arriving; the physical planner is responsible
//! for attaching whichever relation needs to be build-side to `Left`.
//! This is the only reading consistent with the engine's structural
//! guarantee, so every operator below follows it uniformly.

pub mod cross;
pub mod filter;
pub mod hash;
pub mod nested_loop;

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use quillsql_common::{Datum, QuillError, Result, Schema};
use quillsql_expr::{CompareOp, Expr};

/// Splits an AND-conjunction join condition into equi-key pairs, ordered
/// `(build_key, probe_key)`. Non-equality conjuncts are dropped — callers
/// that need the whole condition (NonEqui/NestedLoop) use
/// [`Expr::split_conjuncts`] directly instead.
pub fn extract_equi_keys(condition: &Expr, build_schema: &Schema) -> Result<Vec<(Expr, Expr)>> {
    condition
        .split_conjuncts()
        .into_iter()
        .filter_map(|conjunct| match conjunct {
            Expr::Compare { op: CompareOp::Eq, left, right } => Some((left.as_ref().clone(), right.as_ref().clone())),
            _ => None,
        })
        .map(|(left, right)| orient_pair(left, right, build_schema))
        .collect()
}

fn belongs_to(expr: &Expr, schema: &Schema) -> bool {
    let identities = expr.identities();
    !identities.is_empty() && identities.iter().all(|id| schema.index_of(id).is_some())
}

fn orient_pair(left: Expr, right: Expr, build_schema: &Schema) -> Result<(Expr, Expr)> {
    if belongs_to(&left, build_schema) {
        Ok((left, right))
    } else if belongs_to(&right, build_schema) {
        Ok((right, left))
    } else {
        Err(QuillError::sql("join condition's equality operands could not be resolved to either relation"))
    }
}

pub fn hash_datums(values: &[Datum]) -> u64 {
    let mut hasher = DefaultHasher::new();
    for value in values {
        value.to_string().hash(&mut hasher);
    }
    hasher.finish()
}
