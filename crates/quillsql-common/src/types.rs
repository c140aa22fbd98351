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

use std::fmt;

/// The closed set of column types. Every identifier in an expression
/// tree resolves to one of these.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataType {
    Boolean,
    Integer,
    Double,
    Decimal,
    Date,
    Timestamp,
    Interval,
    Varchar,
    Blob,
    Array,
    Struct,
    Null,
}

impl DataType {
    pub const fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Double | Self::Decimal)
    }

    /// Two types are comparable (for join keys, `Eq`/`Lt`/... predicates)
    /// if they are identical, or both numeric, or either side is `Null`.
    pub const fn comparable_to(self, other: Self) -> bool {
        if matches!(self, Self::Null) || matches!(other, Self::Null) {
            return true;
        }
        match (self, other) {
            (a, b) if a as u8 == b as u8 => true,
            (a, b) => a.is_numeric() && b.is_numeric(),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Boolean => "BOOLEAN",
            Self::Integer => "INTEGER",
            Self::Double => "DOUBLE",
            Self::Decimal => "DECIMAL",
            Self::Date => "DATE",
            Self::Timestamp => "TIMESTAMP",
            Self::Interval => "INTERVAL",
            Self::Varchar => "VARCHAR",
            Self::Blob => "BLOB",
            Self::Array => "ARRAY",
            Self::Struct => "STRUCT",
            Self::Null => "NULL",
        };
        f.write_str(s)
    }
}

/// A single scalar value, tagged with its type so literals always carry
/// both the raw value and the type.
#[derive(Clone, Debug, PartialEq)]
pub enum Datum {
    Boolean(bool),
    Integer(i64),
    Double(ordered_float::OrderedFloat<f64>),
    Decimal(rust_decimal::Decimal),
    Date(chrono::NaiveDate),
    Timestamp(chrono::NaiveDateTime),
    /// Interval stored as (months, days, nanoseconds), matching how
    /// calendar and exact-duration components must be kept separate for
    /// correct date arithmetic.
    Interval(i32, i32, i64),
    Varchar(String),
    Blob(Vec<u8>),
    Array(Vec<Datum>),
    Struct(Vec<(String, Datum)>),
    Null,
}

impl Datum {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Boolean(_) => DataType::Boolean,
            Self::Integer(_) => DataType::Integer,
            Self::Double(_) => DataType::Double,
            Self::Decimal(_) => DataType::Decimal,
            Self::Date(_) => DataType::Date,
            Self::Timestamp(_) => DataType::Timestamp,
            Self::Interval(..) => DataType::Interval,
            Self::Varchar(_) => DataType::Varchar,
            Self::Blob(_) => DataType::Blob,
            Self::Array(_) => DataType::Array,
            Self::Struct(_) => DataType::Struct,
            Self::Null => DataType::Null,
        }
    }

    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Double(d) => Some(d.0),
            Self::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Double(d) => write!(f, "{}", d.0),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::Date(d) => write!(f, "{d}"),
            Self::Timestamp(t) => write!(f, "{t}"),
            Self::Interval(months, days, nanos) => {
                write!(f, "INTERVAL {months} MONS {days} DAYS {nanos} NS")
            }
            Self::Varchar(s) => write!(f, "'{s}'"),
            Self::Blob(b) => write!(f, "x'{}'", hex_encode(b)),
            Self::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Struct(fields) => {
                write!(f, "{{")?;
                for (i, (name, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Null => write!(f, "NULL"),
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
