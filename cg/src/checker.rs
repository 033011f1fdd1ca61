//! Existence checks against a snapshot of a remote collection
//!
//! Only the comparable payload takes part: `type` plus `parameter` for
//! variables, `type` plus `filter` and `customEventFilter` for triggers.
//! Names, paths, ids and fingerprints the remote adds are ignored. Object
//! fields never depend on order. List order matters unless
//! `normalize_order` is set.

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::connector::RemoteEntity;
use crate::error::ComparisonAmbiguous;
use crate::template::{Entity, EntityType};

const VARIABLE_FIELDS: &[&str] = &["type", "parameter"];
const TRIGGER_FIELDS: &[&str] = &["type", "filter", "customEventFilter"];

/// Decides create-vs-skip for candidate entities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExistenceChecker {
    normalize_order: bool,
}

impl ExistenceChecker {
    /// `normalize_order` sorts nested lists before payloads are compared
    pub fn new(normalize_order: bool) -> Self {
        Self { normalize_order }
    }

    pub fn normalizes_order(&self) -> bool {
        self.normalize_order
    }

    /// True when some remote entity carries the candidate's payload
    pub fn exists(&self, candidate: &Entity, remote: &[RemoteEntity]) -> bool {
        self.find(candidate, remote).is_some()
    }

    /// First remote entity carrying the candidate's payload, whatever its name
    ///
    /// Remote entities that cannot be compared are logged and treated as
    /// non-matching, so the candidate gets created.
    pub fn find<'r>(&self, candidate: &Entity, remote: &'r [RemoteEntity]) -> Option<&'r RemoteEntity> {
        debug!(candidate = %candidate.name(), remote = remote.len(), normalize_order = self.normalize_order, "ExistenceChecker::find: called");
        let wanted = match candidate.body() {
            Ok(body) => body,
            Err(e) => {
                warn!(candidate = %candidate.name(), error = %e, "Candidate could not be serialized, assuming not present");
                return None;
            }
        };
        let wanted = match self.comparable(candidate.name(), candidate.entity_type(), &wanted) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "Candidate payload not comparable, assuming not present");
                return None;
            }
        };

        for entity in remote {
            match self.comparable(&entity.name, candidate.entity_type(), &entity.body) {
                Ok(payload) if payload == wanted => {
                    debug!(candidate = %candidate.name(), matched = %entity.name, "ExistenceChecker::find: match");
                    return Some(entity);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(candidate = %candidate.name(), error = %e, "Skipping remote entity in existence check");
                }
            }
        }
        None
    }

    /// Extract and normalize the comparable payload of an entity body
    pub fn comparable(
        &self,
        name: &str,
        entity_type: EntityType,
        body: &Value,
    ) -> Result<Value, ComparisonAmbiguous> {
        let ambiguous = |reason: String| ComparisonAmbiguous {
            entity: name.to_string(),
            reason,
        };

        let object = body
            .as_object()
            .ok_or_else(|| ambiguous("payload is not an object".to_string()))?;

        let fields = match entity_type {
            EntityType::Variable => VARIABLE_FIELDS,
            EntityType::Trigger => TRIGGER_FIELDS,
        };

        let mut payload = Map::new();
        for &field in fields {
            let value = match object.get(field) {
                None | Some(Value::Null) => continue,
                Some(value) => value,
            };
            if field == "type" {
                if !value.is_string() {
                    return Err(ambiguous("type is not a string".to_string()));
                }
                payload.insert(field.to_string(), value.clone());
                continue;
            }
            let list = value
                .as_array()
                .ok_or_else(|| ambiguous(format!("{} is not a list", field)))?;
            if let Some(bad) = list.iter().position(|item| !item.is_object()) {
                return Err(ambiguous(format!("{}[{}] is not an object", field, bad)));
            }
            payload.insert(field.to_string(), Value::Array(list.clone()));
        }

        if !payload.contains_key("type") {
            return Err(ambiguous("type is missing".to_string()));
        }

        let payload = Value::Object(payload);
        Ok(if self.normalize_order { sort_lists(payload) } else { payload })
    }
}

/// Recursively sort every list by the canonical text of its elements
fn sort_lists(value: Value) -> Value {
    match value {
        Value::Array(items) => {
            let mut items: Vec<Value> = items.into_iter().map(sort_lists).collect();
            items.sort_by_cached_key(|item| item.to_string());
            Value::Array(items)
        }
        Value::Object(map) => Value::Object(map.into_iter().map(|(k, v)| (k, sort_lists(v))).collect()),
        other => other,
    }
}
