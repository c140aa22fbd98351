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

//! The running-value accumulator shared by `SimpleAggregate` and
//! `AggregateAndGroup`. Every supported aggregator can be merged
//! incrementally (sum-of-sums, min-of-mins, count-of-counts, mean/variance
//! re-derived from the running sum/count/sum-of-squares), so both
//! operators fold rows one at a time into live per-aggregator state rather
//! than materializing the partial-batch-then-finalizer-merge shape
//! literally — see `DESIGN.md` for this as a recorded simplification.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use bk_tree::{metrics, BKTree};
use hashbrown::HashSet;
use quillsql_common::{DataType, Datum, QuillError, Result};
use quillsql_expr::Expr;

const KNOWN_AGGREGATES: &[&str] = &[
    "SUM", "MIN", "MAX", "AVG", "MEAN", "MAXIMUM", "COUNT", "ANY_VALUE", "ARRAY_AGG", "STDDEV", "VARIANCE",
];

fn normalize(name: &str) -> Result<&'static str> {
    Ok(match name.to_ascii_uppercase().as_str() {
        "SUM" => "SUM",
        "MIN" => "MIN",
        "MAX" | "MAXIMUM" => "MAX",
        "AVG" | "MEAN" => "AVG",
        "COUNT" => "COUNT",
        "ANY_VALUE" => "ANY_VALUE",
        "ARRAY_AGG" => "ARRAY_AGG",
        "STDDEV" => "STDDEV",
        "VARIANCE" => "VARIANCE",
        other => {
            let mut tree: BKTree<&str> = BKTree::new(metrics::Levenshtein);
            for known in KNOWN_AGGREGATES {
                tree.add(known);
            }
            let suggestion = tree.find(other, 3).min_by_key(|(d, _)| *d).map(|(_, c)| *c);
            return Err(QuillError::unsupported_syntax(match suggestion {
                Some(candidate) => format!("unknown aggregate function '{other}', did you mean '{candidate}'?"),
                None => format!("unknown aggregate function '{other}'"),
            }));
        }
    })
}

/// One live aggregator's running state, folded one row (or one literal,
/// repeated `n` times) at a time so the same accumulator serves both the
/// ungrouped and grouped operators.
#[derive(Clone, Debug)]
pub enum Accumulator {
    Sum { total: f64, integer: bool, any: bool },
    Min { value: Option<Datum> },
    Max { value: Option<Datum> },
    Avg { total: f64, count: u64 },
    /// `star` counts rows including nulls (`COUNT(*)`); otherwise only
    /// non-null values are counted.
    Count { count: u64, star: bool },
    CountDistinct { seen: HashSet<u64> },
    AnyValue { value: Option<Datum> },
    ArrayAgg { values: Vec<Datum> },
    /// Welford's online algorithm; `stddev` selects the square root at
    /// finalize time, otherwise the (sample) variance is returned as-is.
    Dispersion { count: u64, mean: f64, m2: f64, stddev: bool },
}

impl Accumulator {
    pub fn new(name: &str, args: &[Expr], distinct: bool) -> Result<Self> {
        let star = args.is_empty();
        Ok(match normalize(name)? {
            "SUM" => Accumulator::Sum { total: 0.0, integer: true, any: false },
            "MIN" => Accumulator::Min { value: None },
            "MAX" => Accumulator::Max { value: None },
            "AVG" => Accumulator::Avg { total: 0.0, count: 0 },
            "COUNT" if distinct => Accumulator::CountDistinct { seen: HashSet::new() },
            "COUNT" => Accumulator::Count { count: 0, star },
            "ANY_VALUE" => Accumulator::AnyValue { value: None },
            "ARRAY_AGG" => Accumulator::ArrayAgg { values: Vec::new() },
            "STDDEV" => Accumulator::Dispersion { count: 0, mean: 0.0, m2: 0.0, stddev: true },
            "VARIANCE" => Accumulator::Dispersion { count: 0, mean: 0.0, m2: 0.0, stddev: false },
            _ => unreachable!(),
        })
    }

    /// Folds one row's argument value into this accumulator. `None` means
    /// either `COUNT(*)` (no argument to evaluate) or a SQL `NULL` value;
    /// both are distinguished internally by the `Count::star` flag, so
    /// callers pass `None` for both and `Count` alone decides whether that
    /// counts.
    pub fn update(&mut self, datum: Option<&Datum>) {
        let is_null = datum.is_none_or(Datum::is_null);
        match self {
            Accumulator::Sum { total, integer, any } => {
                if let Some(datum) = datum.filter(|d| !d.is_null()) {
                    *any = true;
                    if !matches!(datum, Datum::Integer(_)) {
                        *integer = false;
                    }
                    *total += datum.as_f64().unwrap_or(0.0);
                }
            }
            Accumulator::Min { value } => {
                if let Some(datum) = datum.filter(|d| !d.is_null()) {
                    if value.as_ref().map_or(true, |v| datum_less_than(datum, v)) {
                        *value = Some(datum.clone());
                    }
                }
            }
            Accumulator::Max { value } => {
                if let Some(datum) = datum.filter(|d| !d.is_null()) {
                    if value.as_ref().map_or(true, |v| datum_less_than(v, datum)) {
                        *value = Some(datum.clone());
                    }
                }
            }
            Accumulator::Avg { total, count } => {
                if let Some(v) = datum.and_then(Datum::as_f64) {
                    *total += v;
                    *count += 1;
                }
            }
            Accumulator::Count { count, star } => {
                if *star || !is_null {
                    *count += 1;
                }
            }
            Accumulator::CountDistinct { seen } => {
                if let Some(datum) = datum.filter(|d| !d.is_null()) {
                    let mut hasher = DefaultHasher::new();
                    datum.to_string().hash(&mut hasher);
                    seen.insert(hasher.finish());
                }
            }
            Accumulator::AnyValue { value } => {
                if value.is_none() {
                    if let Some(datum) = datum.filter(|d| !d.is_null()) {
                        *value = Some(datum.clone());
                    }
                }
            }
            Accumulator::ArrayAgg { values } => {
                if let Some(datum) = datum {
                    values.push(datum.clone());
                }
            }
            Accumulator::Dispersion { count, mean, m2, .. } => {
                if let Some(v) = datum.and_then(Datum::as_f64) {
                    *count += 1;
                    let delta = v - *mean;
                    *mean += delta / *count as f64;
                    let delta2 = v - *mean;
                    *m2 += delta * delta2;
                }
            }
        }
    }

    /// Folds a literal argument across `row_count` repetitions without a
    /// column to evaluate.
    pub fn update_literal(&mut self, literal: &Datum, row_count: usize) {
        if row_count == 0 || literal.is_null() {
            return;
        }
        match self {
            Accumulator::Sum { total, integer, any } => {
                *total += literal.as_f64().unwrap_or(0.0) * row_count as f64;
                *any = true;
                if !matches!(literal, Datum::Integer(_)) {
                    *integer = false;
                }
            }
            Accumulator::Avg { total, count } => {
                *total += literal.as_f64().unwrap_or(0.0) * row_count as f64;
                *count += row_count as u64;
            }
            Accumulator::Min { value } | Accumulator::Max { value } => {
                *value = Some(literal.clone());
            }
            Accumulator::Count { count, .. } => *count += row_count as u64,
            _ => {}
        }
    }

    pub fn finalize(&self) -> Datum {
        match self {
            Accumulator::Sum { total, integer, any } => {
                if !*any {
                    Datum::Null
                } else if *integer {
                    Datum::Integer(*total as i64)
                } else {
                    Datum::Double(ordered_float::OrderedFloat(*total))
                }
            }
            Accumulator::Min { value } | Accumulator::Max { value } => value.clone().unwrap_or(Datum::Null),
            Accumulator::Avg { total, count } => {
                if *count == 0 {
                    Datum::Null
                } else {
                    Datum::Double(ordered_float::OrderedFloat(*total / *count as f64))
                }
            }
            Accumulator::Count { count, .. } => Datum::Integer(*count as i64),
            Accumulator::CountDistinct { seen } => Datum::Integer(seen.len() as i64),
            Accumulator::AnyValue { value } => value.clone().unwrap_or(Datum::Null),
            Accumulator::ArrayAgg { values } => Datum::Array(values.clone()),
            Accumulator::Dispersion { count, m2, stddev, .. } => {
                if *count < 2 {
                    Datum::Null
                } else {
                    let variance = *m2 / (*count as f64 - 1.0);
                    Datum::Double(ordered_float::OrderedFloat(if *stddev { variance.sqrt() } else { variance }))
                }
            }
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Accumulator::Sum { integer, .. } if *integer => DataType::Integer,
            Accumulator::Count { .. } | Accumulator::CountDistinct { .. } => DataType::Integer,
            Accumulator::ArrayAgg { .. } => DataType::Array,
            Accumulator::Min { .. } | Accumulator::Max { .. } | Accumulator::AnyValue { .. } => DataType::Null,
            _ => DataType::Double,
        }
    }

    /// Merges `other`'s running state into `self` — used when two partial
    /// per-group states for the same group key need combining.
    pub fn merge(&mut self, other: &Accumulator) {
        match (self, other) {
            (Accumulator::Sum { total, integer, any }, Accumulator::Sum { total: t2, integer: i2, any: a2 }) => {
                *total += t2;
                *integer = *integer && *i2;
                *any = *any || *a2;
            }
            (Accumulator::Min { value }, Accumulator::Min { value: v2 }) => {
                if let Some(v2) = v2 {
                    if value.as_ref().map_or(true, |v| datum_less_than(v2, v)) {
                        *value = Some(v2.clone());
                    }
                }
            }
            (Accumulator::Max { value }, Accumulator::Max { value: v2 }) => {
                if let Some(v2) = v2 {
                    if value.as_ref().map_or(true, |v| datum_less_than(v, v2)) {
                        *value = Some(v2.clone());
                    }
                }
            }
            (Accumulator::Avg { total, count }, Accumulator::Avg { total: t2, count: c2 }) => {
                *total += t2;
                *count += c2;
            }
            (Accumulator::Count { count, .. }, Accumulator::Count { count: c2, .. }) => *count += c2,
            (Accumulator::CountDistinct { seen }, Accumulator::CountDistinct { seen: s2 }) => {
                seen.extend(s2.iter().copied());
            }
            (Accumulator::AnyValue { value }, Accumulator::AnyValue { value: v2 }) => {
                if value.is_none() {
                    *value = v2.clone();
                }
            }
            (Accumulator::ArrayAgg { values }, Accumulator::ArrayAgg { values: v2 }) => {
                values.extend(v2.iter().cloned());
            }
            (
                Accumulator::Dispersion { count, mean, m2, .. },
                Accumulator::Dispersion { count: c2, mean: m2b, m2: s2, .. },
            ) => {
                if *c2 == 0 {
                    return;
                }
                let n1 = *count as f64;
                let n2 = *c2 as f64;
                let delta = m2b - *mean;
                let total = n1 + n2;
                *m2 += s2 + delta * delta * n1 * n2 / total;
                *mean = (*mean * n1 + m2b * n2) / total;
                *count += c2;
            }
            _ => unreachable!("merge called on mismatched accumulator kinds"),
        }
    }
}

fn datum_less_than(a: &Datum, b: &Datum) -> bool {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x < y;
    }
    match (a, b) {
        (Datum::Varchar(x), Datum::Varchar(y)) => x < y,
        (Datum::Date(x), Datum::Date(y)) => x < y,
        (Datum::Timestamp(x), Datum::Timestamp(y)) => x < y,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sum_stays_integer_for_all_integer_input() {
        let mut acc = Accumulator::new("SUM", &[Expr::Identifier("a".into())], false).unwrap();
        for v in [1, 2, 3] {
            acc.update(Some(&Datum::Integer(v)));
        }
        assert_eq!(acc.finalize(), Datum::Integer(6));
    }

    #[test]
    fn count_star_counts_nulls() {
        let mut acc = Accumulator::new("COUNT", &[], false).unwrap();
        for _ in 0..5 {
            acc.update(None);
        }
        assert_eq!(acc.finalize(), Datum::Integer(5));
    }

    #[test]
    fn count_distinct_dedups_across_updates() {
        let mut acc = Accumulator::new("COUNT", &[Expr::Identifier("a".into())], true).unwrap();
        for v in [1, 1, 2, 2, 3] {
            acc.update(Some(&Datum::Integer(v)));
        }
        assert_eq!(acc.finalize(), Datum::Integer(3));
    }

    #[test]
    fn alias_maximum_behaves_as_max() {
        let mut acc = Accumulator::new("MAXIMUM", &[Expr::Identifier("a".into())], false).unwrap();
        for v in [3, 9, 1] {
            acc.update(Some(&Datum::Integer(v)));
        }
        assert_eq!(acc.finalize(), Datum::Integer(9));
    }

    #[test]
    fn unknown_aggregate_suggests_nearest() {
        let err = Accumulator::new("SUMM", &[], false).unwrap_err();
        assert!(matches!(err, QuillError::UnsupportedSyntax(msg) if msg.contains("SUM")));
    }

    #[test]
    fn merging_sums_matches_single_pass_sum() {
        let mut a = Accumulator::new("SUM", &[Expr::Identifier("a".into())], false).unwrap();
        a.update(Some(&Datum::Integer(1)));
        a.update(Some(&Datum::Integer(2)));
        let mut b = Accumulator::new("SUM", &[Expr::Identifier("a".into())], false).unwrap();
        b.update(Some(&Datum::Integer(3)));
        b.update(Some(&Datum::Integer(4)));
        a.merge(&b);
        assert_eq!(a.finalize(), Datum::Integer(10));
    }
}
