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
use std::sync::Arc;

use crate::types::DataType;

/// An opaque, stable identity for a column. Identities — not names — key
/// all cross-operator references; names exist only for presentation.
///
/// Cloning is cheap (an `Arc<str>` under the hood) because identities are
/// threaded through every expression node and plan edge.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColumnIdentity(Arc<str>);

impl ColumnIdentity {
    pub fn new(raw: impl Into<Arc<str>>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ColumnIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for ColumnIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ColumnIdentity {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ColumnIdentity {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// A single schema column: its stable identity, its presentation name, its
/// type, and where it came from.
#[derive(Clone, Debug, PartialEq)]
pub struct Field {
    pub identity: ColumnIdentity,
    pub name: String,
    pub data_type: DataType,
    /// Name of the relation this column was sourced from, if any
    /// (base scan or subquery alias). `None` for computed columns.
    pub source_relation: Option<String>,
    /// Presentation alias assigned by a projection, if different from
    /// `name`.
    pub alias: Option<String>,
}

impl Field {
    pub fn new(identity: impl Into<ColumnIdentity>, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            identity: identity.into(),
            name: name.into(),
            data_type,
            source_relation: None,
            alias: None,
        }
    }

    pub fn with_source_relation(mut self, relation: impl Into<String>) -> Self {
        self.source_relation = Some(relation.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// The name presented to the user: the alias if one was assigned,
    /// otherwise the underlying column name.
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// An ordered list of columns, the schema carried by every `Batch` and by
/// every plan node's output.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn empty() -> Self {
        Self { fields: Vec::new() }
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, identity: &ColumnIdentity) -> Option<usize> {
        self.fields.iter().position(|f| &f.identity == identity)
    }

    pub fn field_by_identity(&self, identity: &ColumnIdentity) -> Option<&Field> {
        self.fields.iter().find(|f| &f.identity == identity)
    }

    pub fn contains(&self, identity: &ColumnIdentity) -> bool {
        self.index_of(identity).is_some()
    }

    /// Restrict this schema to the identities in `wanted`, preserving their
    /// relative order in `self` (used by projection pushdown at a scan).
    pub fn project(&self, wanted: &[ColumnIdentity]) -> Self {
        let fields = self
            .fields
            .iter()
            .filter(|f| wanted.contains(&f.identity))
            .cloned()
            .collect();
        Self { fields }
    }

    pub fn push(&mut self, field: Field) {
        self.fields.push(field);
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Field> {
        self.fields.iter()
    }
}

impl IntoIterator for Schema {
    type Item = Field;
    type IntoIter = std::vec::IntoIter<Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl<'a> IntoIterator for &'a Schema {
    type Item = &'a Field;
    type IntoIter = std::slice::Iter<'a, Field>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.iter()
    }
}

impl FromIterator<Field> for Schema {
    fn from_iter<T: IntoIterator<Item = Field>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("t.a", "a", DataType::Integer).with_source_relation("t"),
            Field::new("t.b", "b", DataType::Varchar).with_source_relation("t"),
            Field::new("t.c", "c", DataType::Boolean).with_source_relation("t"),
        ])
    }

    #[test]
    fn project_preserves_relative_order() {
        let schema = schema();
        let wanted = vec![ColumnIdentity::new("t.c"), ColumnIdentity::new("t.a")];
        let projected = schema.project(&wanted);
        let names: Vec<_> = projected.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn display_name_prefers_alias() {
        let field = Field::new("t.a", "a", DataType::Integer).with_alias("renamed");
        assert_eq!(field.display_name(), "renamed");
    }

    #[test]
    fn identity_is_independent_of_name() {
        let schema = schema();
        assert!(schema.contains(&ColumnIdentity::new("t.b")));
        assert!(!schema.contains(&ColumnIdentity::new("b")));
    }
}
