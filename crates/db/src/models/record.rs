//! Typed views over opaque entities and the payloads that produce changes.

use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

use super::entity::{Change, Entity, Fields};

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },
    #[error("update contains no changes")]
    EmptyUpdate,
    #[error("entity {id} does not match the expected shape: {message}")]
    Malformed { id: String, message: String },
}

/// Fails when `value` is empty or whitespace only.
pub fn require_non_blank(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(())
}

/// A domain type stored as entities of one collection.
pub trait Record: DeserializeOwned {
    const COLLECTION: &'static str;

    type Create: Payload;
    type Update: Payload;

    fn id(&self) -> &str;

    fn from_entity(entity: &Entity) -> Result<Self, ValidationError> {
        decode_entity(entity)
    }
}

/// A create or update request for a [`Record`].
///
/// Validation runs before a [`Change`] is built, so a payload that fails it
/// never reaches the synchronizer.
pub trait Payload: Serialize {
    fn validate(&self) -> Result<(), ValidationError>;

    fn into_change(self) -> Result<Change, ValidationError>
    where
        Self: Sized,
    {
        self.validate()?;
        Ok(Change::Patch(encode_fields(&self)?))
    }
}

/// Serialize a payload into entity fields. `None` values must be skipped by the payload's serde attributes.
pub fn encode_fields<T: Serialize>(payload: &T) -> Result<Fields, ValidationError> {
    match serde_json::to_value(payload) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(ValidationError::InvalidField {
            field: "payload",
            message: format!("expected an object, got {other}"),
        }),
        Err(e) => Err(ValidationError::InvalidField {
            field: "payload",
            message: e.to_string(),
        }),
    }
}

/// Rebuild a typed record from an entity's fields plus its id and marker.
pub fn decode_entity<T: DeserializeOwned>(entity: &Entity) -> Result<T, ValidationError> {
    let mut object = entity.fields.clone();
    object.insert("id".to_string(), Value::String(entity.id.to_string()));
    if let Some(updated_at) = entity.updated_at {
        object.insert(
            "updated_at".to_string(),
            Value::String(utils::ids::format_timestamp(updated_at)),
        );
    }
    if let Some(revision) = entity.revision {
        object.insert("revision".to_string(), Value::from(revision));
    }

    serde_json::from_value(Value::Object(object)).map_err(|e| ValidationError::Malformed {
        id: entity.id.to_string(),
        message: e.to_string(),
    })
}
