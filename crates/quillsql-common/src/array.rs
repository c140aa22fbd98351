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

//! The typed columnar array backing each column of a [`crate::batch::Batch`].
//!
//! Each variant holds a dense value vector plus a validity bitmap, matching
//! the value/null-mask split every vectorized engine uses so that
//! null-checks never have to pattern-match the payload type.

use std::sync::Arc;

use crate::types::{DataType, Datum};

/// A reference-counted, immutably shared array. Batches clone this handle
/// rather than the underlying buffer when a column passes through an
/// operator unchanged (e.g. projection of an untouched column).
pub type ArrayRef = Arc<Array>;

#[derive(Clone, Debug, PartialEq)]
pub enum Array {
    Boolean(TypedArray<bool>),
    Integer(TypedArray<i64>),
    Double(TypedArray<ordered_float::OrderedFloat<f64>>),
    Varchar(TypedArray<String>),
    Blob(TypedArray<Vec<u8>>),
    /// Catch-all for Decimal/Date/Timestamp/Interval/Array/Struct/Null: a
    /// boxed `Datum` per row. Hot paths (comparisons, arithmetic) dispatch
    /// on the typed variants above; the rest goes through this.
    Boxed(DataType, Vec<Option<Datum>>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct TypedArray<T> {
    values: Vec<T>,
    validity: Vec<bool>,
}

impl<T: Clone + Default> TypedArray<T> {
    pub fn from_options(items: Vec<Option<T>>) -> Self {
        let mut values = Vec::with_capacity(items.len());
        let mut validity = Vec::with_capacity(items.len());
        for item in items {
            match item {
                Some(v) => {
                    values.push(v);
                    validity.push(true);
                }
                None => {
                    values.push(T::default());
                    validity.push(false);
                }
            }
        }
        Self { values, validity }
    }

    pub fn from_values(values: Vec<T>) -> Self {
        let validity = vec![true; values.len()];
        Self { values, validity }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn is_valid(&self, idx: usize) -> bool {
        self.validity[idx]
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.validity[idx].then(|| &self.values[idx])
    }

    pub fn take(&self, indices: &[usize]) -> Self {
        let values = indices.iter().map(|&i| self.values[i].clone()).collect();
        let validity = indices.iter().map(|&i| self.validity[i]).collect();
        Self { values, validity }
    }

    pub fn concat(parts: &[&Self]) -> Self {
        let mut values = Vec::new();
        let mut validity = Vec::new();
        for part in parts {
            values.extend(part.values.iter().cloned());
            validity.extend(part.validity.iter().copied());
        }
        Self { values, validity }
    }
}

impl Array {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Boolean(_) => DataType::Boolean,
            Self::Integer(_) => DataType::Integer,
            Self::Double(_) => DataType::Double,
            Self::Varchar(_) => DataType::Varchar,
            Self::Blob(_) => DataType::Blob,
            Self::Boxed(dt, _) => *dt,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::Boolean(a) => a.len(),
            Self::Integer(a) => a.len(),
            Self::Double(a) => a.len(),
            Self::Varchar(a) => a.len(),
            Self::Blob(a) => a.len(),
            Self::Boxed(_, v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_valid(&self, idx: usize) -> bool {
        match self {
            Self::Boolean(a) => a.is_valid(idx),
            Self::Integer(a) => a.is_valid(idx),
            Self::Double(a) => a.is_valid(idx),
            Self::Varchar(a) => a.is_valid(idx),
            Self::Blob(a) => a.is_valid(idx),
            Self::Boxed(_, v) => v[idx].is_some(),
        }
    }

    /// Materialize the value at `idx` as a boxed [`Datum`]. Used by row-at-a
    /// time paths (hashing, sort comparators, expression evaluation
    /// fallbacks); columnar paths should prefer the typed accessors.
    pub fn datum_at(&self, idx: usize) -> Datum {
        match self {
            Self::Boolean(a) => a.get(idx).map(|b| Datum::Boolean(*b)).unwrap_or(Datum::Null),
            Self::Integer(a) => a.get(idx).map(|i| Datum::Integer(*i)).unwrap_or(Datum::Null),
            Self::Double(a) => a.get(idx).map(|d| Datum::Double(*d)).unwrap_or(Datum::Null),
            Self::Varchar(a) => a
                .get(idx)
                .map(|s| Datum::Varchar(s.clone()))
                .unwrap_or(Datum::Null),
            Self::Blob(a) => a.get(idx).map(|b| Datum::Blob(b.clone())).unwrap_or(Datum::Null),
            Self::Boxed(_, v) => v[idx].clone().unwrap_or(Datum::Null),
        }
    }

    /// Select the rows at `indices`, producing a new array (used by
    /// filter's mask application and by join row alignment).
    pub fn take(&self, indices: &[usize]) -> Array {
        match self {
            Self::Boolean(a) => Array::Boolean(a.take(indices)),
            Self::Integer(a) => Array::Integer(a.take(indices)),
            Self::Double(a) => Array::Double(a.take(indices)),
            Self::Varchar(a) => Array::Varchar(a.take(indices)),
            Self::Blob(a) => Array::Blob(a.take(indices)),
            Self::Boxed(dt, v) => Array::Boxed(*dt, indices.iter().map(|&i| v[i].clone()).collect()),
        }
    }

    /// Produce an array of `len` nulls of the given type (used when a
    /// connector does not produce a column, and by outer-join unmatched
    /// sides).
    pub fn nulls(data_type: DataType, len: usize) -> Array {
        match data_type {
            DataType::Boolean => Array::Boolean(TypedArray::from_options(vec![None; len])),
            DataType::Integer => Array::Integer(TypedArray::from_options(vec![None; len])),
            DataType::Double => Array::Double(TypedArray::from_options(vec![None; len])),
            DataType::Varchar => Array::Varchar(TypedArray::from_options(vec![None; len])),
            DataType::Blob => Array::Blob(TypedArray::from_options(vec![None; len])),
            other => Array::Boxed(other, vec![None; len]),
        }
    }

    pub fn concat(parts: &[ArrayRef]) -> Array {
        assert!(!parts.is_empty());
        let data_type = parts[0].data_type();
        match &*parts[0] {
            Array::Boolean(_) => {
                let refs: Vec<_> = parts
                    .iter()
                    .map(|p| match &**p {
                        Array::Boolean(a) => a,
                        _ => unreachable!("mixed array kinds in concat"),
                    })
                    .collect();
                Array::Boolean(TypedArray::concat(&refs))
            }
            Array::Integer(_) => {
                let refs: Vec<_> = parts
                    .iter()
                    .map(|p| match &**p {
                        Array::Integer(a) => a,
                        _ => unreachable!("mixed array kinds in concat"),
                    })
                    .collect();
                Array::Integer(TypedArray::concat(&refs))
            }
            Array::Double(_) => {
                let refs: Vec<_> = parts
                    .iter()
                    .map(|p| match &**p {
                        Array::Double(a) => a,
                        _ => unreachable!("mixed array kinds in concat"),
                    })
                    .collect();
                Array::Double(TypedArray::concat(&refs))
            }
            Array::Varchar(_) => {
                let refs: Vec<_> = parts
                    .iter()
                    .map(|p| match &**p {
                        Array::Varchar(a) => a,
                        _ => unreachable!("mixed array kinds in concat"),
                    })
                    .collect();
                Array::Varchar(TypedArray::concat(&refs))
            }
            Array::Blob(_) => {
                let refs: Vec<_> = parts
                    .iter()
                    .map(|p| match &**p {
                        Array::Blob(a) => a,
                        _ => unreachable!("mixed array kinds in concat"),
                    })
                    .collect();
                Array::Blob(TypedArray::concat(&refs))
            }
            Array::Boxed(..) => {
                let mut values = Vec::new();
                for part in parts {
                    match &**part {
                        Array::Boxed(_, v) => values.extend(v.iter().cloned()),
                        _ => unreachable!("mixed array kinds in concat"),
                    }
                }
                Array::Boxed(data_type, values)
            }
        }
    }
}
