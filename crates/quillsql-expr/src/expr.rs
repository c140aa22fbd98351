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

//! The expression tree. Built from literals, identifiers, comparisons,
//! binary/unary operators, boolean junctions, a semantically-transparent
//! nested wrapper, function calls/aggregators, and wildcards.

use quillsql_common::{ColumnIdentity, Datum};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    NotLike,
    ILike,
    NotILike,
}

impl CompareOp {
    /// The De Morgan inverse used by boolean simplification's
    /// `NOT (a OP b) -> a OP' b` rewrite. Every comparison operator has an
    /// inverse in the closed set; `Like`/`ILike` invert to their `Not*`
    /// counterpart, which is itself representable.
    pub const fn inverse(self) -> Self {
        match self {
            Self::Eq => Self::NotEq,
            Self::NotEq => Self::Eq,
            Self::Lt => Self::GtEq,
            Self::GtEq => Self::Lt,
            Self::Gt => Self::LtEq,
            Self::LtEq => Self::Gt,
            Self::Like => Self::NotLike,
            Self::NotLike => Self::Like,
            Self::ILike => Self::NotILike,
            Self::NotILike => Self::ILike,
        }
    }

    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::NotEq => "<>",
            Self::Lt => "<",
            Self::LtEq => "<=",
            Self::Gt => ">",
            Self::GtEq => ">=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::ILike => "ILIKE",
            Self::NotILike => "NOT ILIKE",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    BitAnd,
    BitOr,
    BitXor,
}

impl BinaryOp {
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Concat => "||",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::BitXor => "^",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    IsNull,
    IsNotNull,
    IsTrue,
    IsFalse,
    Not,
}

impl UnaryOp {
    pub const fn inverse(self) -> Option<Self> {
        match self {
            Self::IsNull => Some(Self::IsNotNull),
            Self::IsNotNull => Some(Self::IsNull),
            Self::IsTrue => Some(Self::IsFalse),
            Self::IsFalse => Some(Self::IsTrue),
            Self::Not => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BoolOp {
    And,
    Or,
    Xor,
}

/// A single node of the expression tree. Kept flat (no separate "node" +
/// "payload" indirection) because, unlike plan nodes, expression nodes
/// don't need identity-bearing cross-references beyond the identifiers
/// they hold.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Literal(Datum),
    Identifier(ColumnIdentity),
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Boolean {
        op: BoolOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Semantically transparent parenthetical wrapper. Must survive
    /// rewrites other than constant folding, which collapses it once its
    /// inner expression folds to a literal.
    Nested(Box<Expr>),
    FunctionCall {
        name: String,
        args: Vec<Expr>,
    },
    Aggregate {
        name: String,
        args: Vec<Expr>,
        distinct: bool,
        order: Vec<(Expr, bool)>,
        limit: Option<usize>,
    },
    /// `expr IN (list)` / `expr NOT IN (list)`. Kept as its own node (rather
    /// than desugared to a chain of `OR`s) so the in-to-eq strategy can
    /// recognize the single-element case.
    In {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Wildcard,
    QualifiedWildcard(String),
}

impl Expr {
    pub fn and(left: Expr, right: Expr) -> Expr {
        Expr::Boolean {
            op: BoolOp::And,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn or(left: Expr, right: Expr) -> Expr {
        Expr::Boolean {
            op: BoolOp::Or,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn compare(op: CompareOp, left: Expr, right: Expr) -> Expr {
        Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn not(expr: Expr) -> Expr {
        Expr::Unary {
            op: UnaryOp::Not,
            expr: Box::new(expr),
        }
    }

    pub const fn is_literal(&self) -> bool {
        matches!(self, Expr::Literal(_))
    }

    pub fn as_literal(&self) -> Option<&Datum> {
        match self {
            Expr::Literal(d) => Some(d),
            _ => None,
        }
    }

    /// True if both sides of a binary/compare node are literal-or-identifier.
    pub fn is_simple_predicate(&self) -> bool {
        fn leaf(e: &Expr) -> bool {
            matches!(e, Expr::Literal(_) | Expr::Identifier(_))
        }
        match self {
            Expr::Compare { left, right, .. } => leaf(left) && leaf(right),
            _ => false,
        }
    }

    /// Recursively split a top-level conjunction into its conjuncts. Used
    /// by the split-conjunctive-predicates strategy, which must recurse
    /// into nested `AND`s rather than only peeling one level.
    pub fn split_conjuncts(&self) -> Vec<&Expr> {
        match self {
            Expr::Boolean {
                op: BoolOp::And,
                left,
                right,
            } => {
                let mut out = left.split_conjuncts();
                out.extend(right.split_conjuncts());
                out
            }
            Expr::Nested(inner) => inner.split_conjuncts(),
            other => vec![other],
        }
    }

    /// Collect every column identity referenced anywhere in the tree,
    /// including inside aggregator arguments and order/limit modifiers —
    /// used by projection pushdown.
    pub fn collect_identities(&self, out: &mut Vec<ColumnIdentity>) {
        match self {
            Expr::Identifier(id) => out.push(id.clone()),
            Expr::Literal(_) | Expr::Wildcard | Expr::QualifiedWildcard(_) => {}
            Expr::Compare { left, right, .. } | Expr::Binary { left, right, .. } => {
                left.collect_identities(out);
                right.collect_identities(out);
            }
            Expr::Boolean { left, right, .. } => {
                left.collect_identities(out);
                right.collect_identities(out);
            }
            Expr::Unary { expr, .. } | Expr::Nested(expr) => expr.collect_identities(out),
            Expr::FunctionCall { args, .. } => {
                for arg in args {
                    arg.collect_identities(out);
                }
            }
            Expr::Aggregate { args, order, .. } => {
                for arg in args {
                    arg.collect_identities(out);
                }
                for (order_expr, _) in order {
                    order_expr.collect_identities(out);
                }
            }
            Expr::In { expr, list, .. } => {
                expr.collect_identities(out);
                for item in list {
                    item.collect_identities(out);
                }
            }
        }
    }

    pub fn identities(&self) -> Vec<ColumnIdentity> {
        let mut out = Vec::new();
        self.collect_identities(&mut out);
        out
    }

    /// Predicates containing aggregators are never pushed.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate { .. } => true,
            Expr::Literal(_) | Expr::Identifier(_) | Expr::Wildcard | Expr::QualifiedWildcard(_) => false,
            Expr::Compare { left, right, .. } | Expr::Binary { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::Boolean { left, right, .. } => left.contains_aggregate() || right.contains_aggregate(),
            Expr::Unary { expr, .. } | Expr::Nested(expr) => expr.contains_aggregate(),
            Expr::FunctionCall { args, .. } => args.iter().any(Expr::contains_aggregate),
            Expr::In { expr, list, .. } => expr.contains_aggregate() || list.iter().any(Expr::contains_aggregate),
        }
    }

    /// Strip any number of transparent `Nested` wrappers, used before
    /// pattern-matching on the underlying node kind.
    pub fn unwrap_nested(&self) -> &Expr {
        match self {
            Expr::Nested(inner) => inner.unwrap_nested(),
            other => other,
        }
    }
}
