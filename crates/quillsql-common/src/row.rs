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

//! Row-at-a-time views over a [`Batch`], used wherever the columnar model
//! has to fall back to per-row work: hash-set membership for `Distinct`,
//! group keys for `AggregateAndGroup`, and join-key tuples.

use std::hash::{Hash, Hasher};

use crate::batch::Batch;
use crate::types::Datum;

/// A borrowed view of one row across a chosen set of column positions.
#[derive(Clone, Copy, Debug)]
pub struct RowRef<'a> {
    batch: &'a Batch,
    row_idx: usize,
    column_positions: &'a [usize],
}

impl<'a> RowRef<'a> {
    pub fn new(batch: &'a Batch, row_idx: usize, column_positions: &'a [usize]) -> Self {
        Self {
            batch,
            row_idx,
            column_positions,
        }
    }

    pub fn datum_at(&self, pos: usize) -> Datum {
        let col_idx = self.column_positions[pos];
        self.batch.columns()[col_idx].datum_at(self.row_idx)
    }

    pub fn to_owned_row(&self) -> Vec<Datum> {
        (0..self.column_positions.len()).map(|p| self.datum_at(p)).collect()
    }
}

impl Hash for RowRef<'_> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for pos in 0..self.column_positions.len() {
            hash_datum(&self.datum_at(pos), state);
        }
    }
}

impl PartialEq for RowRef<'_> {
    fn eq(&self, other: &Self) -> bool {
        if self.column_positions.len() != other.column_positions.len() {
            return false;
        }
        (0..self.column_positions.len()).all(|p| self.datum_at(p) == other.datum_at(p))
    }
}

impl Eq for RowRef<'_> {}

/// Hash a `Datum` with NULL hashing to a fixed sentinel — the same
/// normalization used by the `hash_of` helper once the evaluator resolves
/// comparisons, so that `GROUP BY`/`DISTINCT`/join-key hashing all treat
/// NULL consistently without three-valued-logic leaking into hashing.
pub fn hash_datum<H: Hasher>(datum: &Datum, state: &mut H) {
    std::mem::discriminant(datum).hash(state);
    match datum {
        Datum::Boolean(b) => b.hash(state),
        Datum::Integer(i) => i.hash(state),
        Datum::Double(d) => d.0.to_bits().hash(state),
        Datum::Decimal(d) => d.hash(state),
        Datum::Date(d) => d.hash(state),
        Datum::Timestamp(t) => t.hash(state),
        Datum::Interval(m, d, n) => {
            m.hash(state);
            d.hash(state);
            n.hash(state);
        }
        Datum::Varchar(s) => s.hash(state),
        Datum::Blob(b) => b.hash(state),
        Datum::Array(items) => {
            for item in items {
                hash_datum(item, state);
            }
        }
        Datum::Struct(fields) => {
            for (name, value) in fields {
                name.hash(state);
                hash_datum(value, state);
            }
        }
        Datum::Null => 0u8.hash(state),
    }
}

/// Hash a tuple of column positions for row `row_idx` of `batch`. Used by
/// `Distinct` and by join build-side hash maps, both of which need a
/// stable 64-bit key independent of the underlying columnar layout.
pub fn hash_row(batch: &Batch, row_idx: usize, column_positions: &[usize]) -> u64 {
    let mut hasher = rustc_hash_like_hasher();
    for &col_idx in column_positions {
        hash_datum(&batch.columns()[col_idx].datum_at(row_idx), &mut hasher);
    }
    hasher.finish()
}

fn rustc_hash_like_hasher() -> std::collections::hash_map::DefaultHasher {
    std::collections::hash_map::DefaultHasher::new()
}
