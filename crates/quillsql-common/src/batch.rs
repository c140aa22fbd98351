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

//! The columnar [`Batch`]: the only unit of data exchanged between
//! operators. Batches are immutable once built — every transformation here
//! returns a new `Batch` rather than mutating `self`; operators must not
//! mutate an input batch in place.

use std::sync::Arc;

use crate::array::{Array, ArrayRef};
use crate::schema::{ColumnIdentity, Schema};

#[derive(Clone, Debug)]
pub struct Batch {
    schema: Schema,
    columns: Vec<ArrayRef>,
    row_count: usize,
}

impl Batch {
    pub fn new(schema: Schema, columns: Vec<ArrayRef>) -> Self {
        let row_count = columns.first().map_or(0, |c| c.len());
        debug_assert!(
            columns.iter().all(|c| c.len() == row_count),
            "all columns of a batch must have equal length"
        );
        debug_assert_eq!(schema.len(), columns.len(), "schema/column count mismatch");
        Self {
            schema,
            columns,
            row_count,
        }
    }

    /// An empty batch carrying only a schema — the shape downstream
    /// operators need to see even when zero rows survive.
    pub fn empty(schema: Schema) -> Self {
        let columns = schema
            .fields()
            .iter()
            .map(|f| Arc::new(Array::nulls(f.data_type, 0)))
            .collect();
        Self {
            schema,
            columns,
            row_count: 0,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn columns(&self) -> &[ArrayRef] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }

    pub fn column_by_identity(&self, identity: &ColumnIdentity) -> Option<&ArrayRef> {
        self.schema
            .index_of(identity)
            .map(|idx| &self.columns[idx])
    }

    /// Rough in-memory byte size, used for sensor accounting and the
    /// morsel-size-driven chunking used by join operators.
    pub fn byte_size(&self) -> usize {
        self.columns
            .iter()
            .map(|c| estimate_array_bytes(c))
            .sum::<usize>()
            + self.schema.len() * 64
    }

    /// Select and, where `renames` provides one, rename columns by
    /// identity — the operation a Projection and a Scan's restricted
    /// schema both perform.
    pub fn project(&self, wanted: &[ColumnIdentity]) -> Self {
        let mut fields = Vec::with_capacity(wanted.len());
        let mut columns = Vec::with_capacity(wanted.len());
        for identity in wanted {
            let idx = self
                .schema
                .index_of(identity)
                .unwrap_or_else(|| panic!("projected identity {identity} absent from batch schema"));
            fields.push(self.schema.fields()[idx].clone());
            columns.push(self.columns[idx].clone());
        }
        Self {
            schema: Schema::new(fields),
            columns,
            row_count: self.row_count,
        }
    }

    /// Append a computed column under a fresh identity (used by
    /// `evaluate_and_append`); idempotent if the identity is already
    /// present.
    pub fn with_appended_column(&self, field: crate::schema::Field, array: ArrayRef) -> Self {
        if self.schema.contains(&field.identity) {
            return self.clone();
        }
        let mut schema = self.schema.clone();
        schema.push(field);
        let mut columns = self.columns.clone();
        columns.push(array);
        Self {
            schema,
            columns,
            row_count: self.row_count,
        }
    }

    /// Keep only the rows at `indices`, in order. Used by Filter (mask
    /// application), Limit, Distinct, and join row alignment.
    pub fn take(&self, indices: &[usize]) -> Self {
        let columns = self.columns.iter().map(|c| Arc::new(c.take(indices))).collect();
        Self {
            schema: self.schema.clone(),
            columns,
            row_count: indices.len(),
        }
    }

    /// Concatenate batches that all share the same schema (Sort, HeapSort,
    /// AggregateAndGroup's finalizer, Union within a single output type).
    pub fn concat(batches: &[Batch]) -> Self {
        assert!(!batches.is_empty(), "concat of zero batches is undefined");
        let schema = batches[0].schema.clone();
        let row_count: usize = batches.iter().map(|b| b.row_count).sum();
        let num_cols = schema.len();
        let mut columns = Vec::with_capacity(num_cols);
        for col_idx in 0..num_cols {
            let parts: Vec<ArrayRef> = batches.iter().map(|b| b.columns[col_idx].clone()).collect();
            columns.push(Arc::new(Array::concat(&parts)));
        }
        Self {
            schema,
            columns,
            row_count,
        }
    }

    /// Rename this batch onto `target` by identity, filling nulls for any
    /// target column this batch does not produce (used by Reader to
    /// present connector output under the scan's schema, and by Union to
    /// present each leg under the unioned schema).
    pub fn conform_to(&self, target: &Schema) -> Self {
        let mut columns = Vec::with_capacity(target.len());
        for field in target.fields() {
            let array = self
                .column_by_identity(&field.identity)
                .cloned()
                .unwrap_or_else(|| Arc::new(Array::nulls(field.data_type, self.row_count)));
            columns.push(array);
        }
        Self {
            schema: target.clone(),
            columns,
            row_count: self.row_count,
        }
    }
}

fn estimate_array_bytes(array: &Array) -> usize {
    match array {
        Array::Boolean(a) => a.len(),
        Array::Integer(a) => a.len() * 8,
        Array::Double(a) => a.len() * 8,
        Array::Varchar(a) => (0..a.len()).map(|i| a.get(i).map_or(0, |s| s.len())).sum(),
        Array::Blob(a) => (0..a.len()).map(|i| a.get(i).map_or(0, |b| b.len())).sum(),
        Array::Boxed(_, v) => v.len() * 32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::TypedArray;
    use crate::schema::Field;
    use crate::types::DataType;

    fn sample_batch(values: Vec<i64>) -> Batch {
        let schema = Schema::new(vec![Field::new("t.a", "a", DataType::Integer)]);
        let array = Arc::new(Array::Integer(TypedArray::from_values(values)));
        Batch::new(schema, vec![array])
    }

    #[test]
    fn take_preserves_order_and_updates_row_count() {
        let batch = sample_batch(vec![10, 20, 30, 40]);
        let taken = batch.take(&[3, 0]);
        assert_eq!(taken.row_count(), 2);
        assert_eq!(taken.columns()[0].datum_at(0), crate::types::Datum::Integer(40));
        assert_eq!(taken.columns()[0].datum_at(1), crate::types::Datum::Integer(10));
    }

    #[test]
    fn concat_sums_row_counts() {
        let a = sample_batch(vec![1, 2]);
        let b = sample_batch(vec![3]);
        let combined = Batch::concat(&[a, b]);
        assert_eq!(combined.row_count(), 3);
        assert_eq!(combined.columns()[0].datum_at(2), crate::types::Datum::Integer(3));
    }

    #[test]
    fn empty_batch_carries_schema() {
        let schema = Schema::new(vec![Field::new("t.a", "a", DataType::Integer)]);
        let empty = Batch::empty(schema.clone());
        assert_eq!(empty.row_count(), 0);
        assert_eq!(empty.schema(), &schema);
    }

    #[test]
    fn conform_to_fills_nulls_for_missing_columns() {
        let batch = sample_batch(vec![1, 2]);
        let target = Schema::new(vec![
            Field::new("t.a", "a", DataType::Integer),
            Field::new("t.z", "z", DataType::Varchar),
        ]);
        let conformed = batch.conform_to(&target);
        assert_eq!(conformed.row_count(), 2);
        assert!(!conformed.columns()[1].is_valid(0));
    }
}
