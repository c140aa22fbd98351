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

pub mod evaluator;
pub mod expr;
pub mod format;

pub use evaluator::{eval_constant, is_fixed_outcome_function, Evaluator, ReferenceEvaluator};
pub use expr::{BinaryOp, BoolOp, CompareOp, Expr, UnaryOp};
pub use format::format_expression;
