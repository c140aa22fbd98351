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

//! The ten canonical strategies, one module each, run in the fixed
//! order `StrategyRunner::optimize` applies them in.

pub mod boolean_simplify;
pub mod constant_fold;
pub mod fixed_function_eliminate;
pub mod flatten_plan;
pub mod in_to_eq;
pub mod operator_fusion;
pub mod predicate_pushdown;
pub mod predicate_tagging;
pub mod projection_pushdown;
pub mod split_conjuncts;
