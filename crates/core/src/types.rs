use crate::error::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest relation type accepted as a native relationship type
pub const MAX_RELATION_TYPE_LEN: usize = 64;

/// Longest key accepted by the key/value memory
pub const MAX_MEMORY_KEY_LEN: usize = 256;

/// A named, typed node in the knowledge graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub name: String,
    pub entity_type: String,
    #[serde(default)]
    pub observations: Vec<String>,
}

impl Entity {
    pub fn new(
        name: impl Into<String>,
        entity_type: impl Into<String>,
        observations: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            entity_type: entity_type.into(),
            observations,
        }
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "entity name must not be empty".to_string(),
            ));
        }
        if self.entity_type.trim().is_empty() {
            return Err(StoreError::InvalidInput(format!(
                "entity '{}' has an empty entityType",
                self.name
            )));
        }
        Ok(())
    }

    /// Observations with duplicates removed, first occurrence kept
    pub(crate) fn dedup_observations(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.observations.retain(|o| seen.insert(o.clone()));
    }
}

/// A directed, typed edge between two entities
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub from: String,
    pub to: String,
    pub relation_type: String,
}

impl Relation {
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        relation_type: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            relation_type: relation_type.into(),
        }
    }

    pub fn validate(&self) -> StoreResult<()> {
        if self.from.trim().is_empty() || self.to.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "relation endpoints must not be empty".to_string(),
            ));
        }
        validate_relation_type(&self.relation_type)
    }

    fn sort_key(&self) -> (&str, &str, &str) {
        (&self.from, &self.relation_type, &self.to)
    }
}

/// Relation types become native relationship types, so they must be plain identifiers.
pub fn validate_relation_type(relation_type: &str) -> StoreResult<()> {
    let mut chars = relation_type.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };

    if !valid || relation_type.len() > MAX_RELATION_TYPE_LEN {
        return Err(StoreError::InvalidInput(format!(
            "invalid relationType '{}': expected letters, digits and underscores (max {} chars, not starting with a digit)",
            relation_type, MAX_RELATION_TYPE_LEN
        )));
    }
    Ok(())
}

/// A view of the knowledge graph (all of it, or a query result)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl KnowledgeGraph {
    /// Sort entities by name and relations by (from, type, to)
    pub fn normalize(mut self) -> Self {
        self.entities.sort_by(|a, b| a.name.cmp(&b.name));
        self.relations.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationAddition {
    pub entity_name: String,
    pub contents: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObservationDeletion {
    pub entity_name: String,
    pub observations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedObservations {
    pub entity_name: String,
    pub added_observations: Vec<String>,
}

/// A value held in the key/value memory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryEntry {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

impl MemoryEntry {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            updated_at: Utc::now(),
        }
    }
}

pub fn validate_memory_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidInput("key must not be empty".to_string()));
    }
    if key.len() > MAX_MEMORY_KEY_LEN {
        return Err(StoreError::InvalidInput(format!(
            "key is longer than {} bytes",
            MAX_MEMORY_KEY_LEN
        )));
    }
    Ok(())
}
