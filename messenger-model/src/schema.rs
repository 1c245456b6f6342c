use crate::{Record, RecordKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// How a remote write is folded into a local record it wins against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeRule {
    /// The remote snapshot replaces the whole record (default).
    #[default]
    LwwRecord,
    /// Remote top-level fields overwrite local ones; fields the remote
    /// snapshot does not carry are kept.
    LwwPerField,
}

/// A record failed its schema check.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{kind} fields must be a JSON object")]
    NotAnObject { kind: RecordKind },

    #[error("{kind} is missing required field {field}")]
    MissingField { kind: RecordKind, field: String },

    #[error("record kind {actual} checked against the {expected} schema")]
    WrongKind { expected: RecordKind, actual: RecordKind },
}

/// Declares the required fields and merge rule of a record kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSchema {
    pub kind: RecordKind,
    /// JSON pointers that must resolve to a non-null value on live records.
    #[serde(default)]
    pub required_fields: Vec<String>,
    #[serde(default)]
    pub merge_rule: MergeRule,
}

impl RecordSchema {
    #[must_use]
    pub fn new(kind: RecordKind, merge_rule: MergeRule) -> Self {
        Self {
            kind,
            required_fields: Vec::new(),
            merge_rule,
        }
    }

    /// Adds a required field.
    #[must_use]
    pub fn require(mut self, pointer: &str) -> Self {
        self.required_fields.push(pointer.to_string());
        self
    }

    /// Chatrooms: title and membership are edited independently.
    #[must_use]
    pub fn chatroom() -> Self {
        Self::new(RecordKind::Chatroom, MergeRule::LwwPerField).require("/title")
    }

    /// Users: profile fields are edited independently.
    #[must_use]
    pub fn user() -> Self {
        Self::new(RecordKind::User, MergeRule::LwwPerField).require("/name")
    }

    /// Messages: the body blob and its metadata are replaced as a unit.
    #[must_use]
    pub fn message() -> Self {
        Self::new(RecordKind::Message, MergeRule::LwwRecord)
            .require("/chatroom")
            .require("/sender")
    }

    /// Checks a field payload against this schema.
    pub fn validate_fields(&self, fields: &serde_json::Value) -> Result<(), ValidationError> {
        if !fields.is_object() {
            return Err(ValidationError::NotAnObject { kind: self.kind });
        }
        for pointer in &self.required_fields {
            match fields.pointer(pointer) {
                Some(v) if !v.is_null() => {}
                _ => {
                    return Err(ValidationError::MissingField {
                        kind: self.kind,
                        field: pointer.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Checks a record against this schema. Tombstones always pass.
    pub fn validate(&self, record: &Record) -> Result<(), ValidationError> {
        if record.kind != self.kind {
            return Err(ValidationError::WrongKind {
                expected: self.kind,
                actual: record.kind,
            });
        }
        if record.deleted {
            return Ok(());
        }
        self.validate_fields(&record.fields)
    }
}

/// The schemas in effect for one data stack.
///
/// Kinds without a registered schema accept any JSON object and merge with
/// [`MergeRule::LwwRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaRegistry {
    schemas: HashMap<RecordKind, RecordSchema>,
}

impl SchemaRegistry {
    /// An empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            schemas: HashMap::new(),
        }
    }

    /// Registers (or replaces) the schema for its kind.
    pub fn register(&mut self, schema: RecordSchema) {
        self.schemas.insert(schema.kind, schema);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, schema: RecordSchema) -> Self {
        self.register(schema);
        self
    }

    pub fn get(&self, kind: RecordKind) -> Option<&RecordSchema> {
        self.schemas.get(&kind)
    }

    /// The merge rule for a kind.
    #[must_use]
    pub fn merge_rule(&self, kind: RecordKind) -> MergeRule {
        self.get(kind).map(|s| s.merge_rule).unwrap_or_default()
    }

    /// Validates a record against its kind's schema, if one is registered.
    pub fn validate(&self, record: &Record) -> Result<(), ValidationError> {
        match self.get(record.kind) {
            Some(schema) => schema.validate(record),
            None if record.deleted || record.fields.is_object() => Ok(()),
            None => Err(ValidationError::NotAnObject { kind: record.kind }),
        }
    }
}

impl Default for SchemaRegistry {
    /// The built-in chatroom, user and message schemas.
    fn default() -> Self {
        Self::empty()
            .with(RecordSchema::chatroom())
            .with(RecordSchema::user())
            .with(RecordSchema::message())
    }
}
