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

//! The connector interface consumed by the core. A connector is an
//! external collaborator — this module only owns the trait seam both
//! `quillsql-plan` (predicate/projection pushdown) and `quillsql-exec`
//! (the `Reader`/`AsyncReader` operators) dispatch through.

use chrono::NaiveDate;

use crate::schema::{ColumnIdentity, Schema};
use crate::types::DataType;

/// Capability mixin: a connector that can evaluate a predicate itself,
/// avoiding a `Filter` operator above the scan.
pub trait PredicatePushable {
    /// `predicate` is opaque here (the concrete `Expr` type lives in
    /// `quillsql-expr`, which this crate does not depend on to keep the
    /// dependency graph acyclic); connectors receive it pre-formatted as
    /// the string the pushdown strategy builds, plus the resolved operand
    /// types, and decide whether they can apply it without help.
    fn can_push(&self, predicate_description: &str, operand_types: &[DataType]) -> bool;
}

/// Capability mixin: a connector that can restrict the columns it reads
/// to a caller-provided subset.
pub trait ProjectionPushable {
    fn supports_projection_pushdown(&self) -> bool;
}

/// A date-partitioned dataset's blob enumeration contract.
pub trait PartitionScheme {
    /// `blob_list_getter` lists every blob under `prefix`; the scheme
    /// narrows that list to the ones whose partition key falls in
    /// `[start_date, end_date]`.
    fn get_blobs_in_partition(
        &self,
        start_date: NaiveDate,
        end_date: NaiveDate,
        blob_list_getter: &dyn Fn(&str) -> Vec<String>,
        prefix: &str,
    ) -> Vec<String>;
}

/// Everything a scan's physical `Reader` operator needs to know about the
/// relation it wraps, gathered at physical-planning time.
#[derive(Clone, Debug)]
pub struct ConnectorDescriptor {
    pub relation: String,
    pub schema: Schema,
    pub supports_async: bool,
    pub predicate_pushable: bool,
    pub projection_pushable: bool,
}

impl ConnectorDescriptor {
    pub fn new(relation: impl Into<String>, schema: Schema) -> Self {
        Self {
            relation: relation.into(),
            schema,
            supports_async: false,
            predicate_pushable: false,
            projection_pushable: false,
        }
    }

    pub fn with_async(mut self, value: bool) -> Self {
        self.supports_async = value;
        self
    }

    pub fn with_predicate_pushable(mut self, value: bool) -> Self {
        self.predicate_pushable = value;
        self
    }

    pub fn with_projection_pushable(mut self, value: bool) -> Self {
        self.projection_pushable = value;
        self
    }

    /// Columns this connector produces; columns in a requested schema that
    /// are absent here are filled with nulls by the `Reader`.
    pub fn produced_columns(&self) -> impl Iterator<Item = &ColumnIdentity> {
        self.schema.fields().iter().map(|f| &f.identity)
    }
}
