use std::{borrow::Borrow, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;

/// Attribute bag of an entity. Opaque to the synchronizer.
pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for EntityId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Name of a remote collection (`tasks`, `projects`, `incidents`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(transparent)]
pub struct CollectionName(String);

impl CollectionName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CollectionName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// A uniquely identified record of some collection.
///
/// `updated_at` and `revision` are assigned by the server and together act as
/// the last-write marker. Locally computed (optimistic) entities carry the
/// marker of the snapshot they were derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
pub struct Entity {
    pub id: EntityId,
    #[ts(type = "Record<string, unknown>")]
    pub fields: Fields,
    pub updated_at: Option<DateTime<Utc>>,
    pub revision: Option<i64>,
}

impl Entity {
    pub fn new(id: impl Into<EntityId>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
            updated_at: None,
            revision: None,
        }
    }

    pub fn with_marker(mut self, updated_at: DateTime<Utc>, revision: i64) -> Self {
        self.updated_at = Some(updated_at);
        self.revision = Some(revision);
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// New entity with `patch` merged over the current fields. The marker is kept.
    pub fn patched(&self, patch: &Fields) -> Self {
        let mut next = self.clone();
        merge_fields(&mut next.fields, patch);
        next
    }
}

/// Shallow merge: every key in `patch` overwrites the same key in `target`.
pub fn merge_fields(target: &mut Fields, patch: &Fields) {
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
}

/// A change requested against a single entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "fields", rename_all = "snake_case")]
pub enum Change {
    /// Merge fields into the entity, creating it when absent.
    Patch(Fields),
    Delete,
}

impl Change {
    pub fn patch<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Patch(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Self::Delete)
    }
}

/// A remote-originated notification that some entity changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ChangeEvent {
    Inserted(Entity),
    Updated(Entity),
    Deleted(EntityId),
}

impl ChangeEvent {
    pub fn entity_id(&self) -> &EntityId {
        match self {
            Self::Inserted(entity) | Self::Updated(entity) => &entity.id,
            Self::Deleted(id) => id,
        }
    }
}

/// Equality filter on one field of the entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOrder {
    pub field: String,
    #[serde(default)]
    pub descending: bool,
}

/// Optional filter and ordering for listing a collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListQuery {
    pub filter: Option<FieldFilter>,
    pub order: Option<FieldOrder>,
}

impl ListQuery {
    pub fn filter_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Some(FieldFilter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order = Some(FieldOrder {
            field: field.into(),
            descending,
        });
        self
    }
}
