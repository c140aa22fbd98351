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

//! Schema, columnar batch, error taxonomy, configuration and sensors
//! shared by every crate in the query execution core.

pub mod array;
pub mod batch;
pub mod config;
pub mod connector;
pub mod error;
pub mod hints;
pub mod row;
pub mod schema;
pub mod sensors;
pub mod statistics;
pub mod types;

pub use array::{Array, ArrayRef};
pub use batch::Batch;
pub use config::{ExecutionConfig, QueryId, QueryProperties, ResultType};
pub use connector::{ConnectorDescriptor, PartitionScheme, PredicatePushable, ProjectionPushable};
pub use error::{QuillError, Result};
pub use schema::{ColumnIdentity, Field, Schema};
pub use sensors::{SensorSnapshot, Sensors};
pub use statistics::Statistics;
pub use types::{DataType, Datum};
