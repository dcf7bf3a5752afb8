pub mod in_memory;
pub mod neo4j;

pub use in_memory::InMemoryGraphStore;
pub use neo4j::{Neo4jConfig, Neo4jGraphStore};

use crate::error::StoreResult;
use crate::types::{
    AddedObservations, Entity, KnowledgeGraph, ObservationAddition, ObservationDeletion, Relation,
};
use std::collections::BTreeMap;

/// Knowledge graph storage.
///
/// Every operation maps to one logical write or read against the backing store.
/// Implementations enforce entity-name uniqueness and refuse relations whose
/// endpoints do not exist.
#[async_trait::async_trait]
pub trait GraphStore: Send + Sync {
    /// Create constraints and indexes the store relies on. Safe to call repeatedly.
    async fn ensure_schema(&self) -> StoreResult<()>;

    /// Create entities whose names are not taken yet; returns the ones created
    async fn create_entities(&self, entities: Vec<Entity>) -> StoreResult<Vec<Entity>>;

    /// Create relations between existing entities; returns the ones created
    async fn create_relations(&self, relations: Vec<Relation>) -> StoreResult<Vec<Relation>>;

    /// Append observations to existing entities, skipping ones already present
    async fn add_observations(
        &self,
        additions: Vec<ObservationAddition>,
    ) -> StoreResult<Vec<AddedObservations>>;

    /// Delete entities together with every relation touching them; returns
    /// how many entities existed and were removed
    async fn delete_entities(&self, names: Vec<String>) -> StoreResult<usize>;

    async fn delete_observations(&self, deletions: Vec<ObservationDeletion>) -> StoreResult<()>;

    /// Delete exact triples; returns how many existed and were removed
    async fn delete_relations(&self, relations: Vec<Relation>) -> StoreResult<usize>;

    async fn read_graph(&self) -> StoreResult<KnowledgeGraph>;

    /// Full-text search over entity name, type and observations
    async fn search_nodes(&self, query: &str) -> StoreResult<KnowledgeGraph>;

    /// Case-insensitive substring match on entity name
    async fn find_nodes(&self, query: &str) -> StoreResult<KnowledgeGraph>;

    /// Entities with exactly these names, plus the relations among them
    async fn open_nodes(&self, names: Vec<String>) -> StoreResult<KnowledgeGraph>;
}

/// Validate a batch of entities and drop repeated names (first one wins).
pub(crate) fn prepare_entities(entities: Vec<Entity>) -> StoreResult<Vec<Entity>> {
    for entity in &entities {
        entity.validate()?;
    }

    let mut seen = std::collections::HashSet::new();
    Ok(entities
        .into_iter()
        .filter(|e| seen.insert(e.name.clone()))
        .map(|mut e| {
            e.dedup_observations();
            e
        })
        .collect())
}

/// Validate a batch of relations and drop exact repeats.
pub(crate) fn prepare_relations(relations: Vec<Relation>) -> StoreResult<Vec<Relation>> {
    for relation in &relations {
        relation.validate()?;
    }

    let mut seen = std::collections::HashSet::new();
    Ok(relations
        .into_iter()
        .filter(|r| seen.insert(r.clone()))
        .collect())
}

/// Relations worth looking up for deletion. A triple that fails validation
/// cannot exist, so it is dropped rather than rejected; repeats are dropped too.
pub(crate) fn deletable_relations(relations: Vec<Relation>) -> Vec<Relation> {
    let mut seen = std::collections::HashSet::new();
    relations
        .into_iter()
        .filter(|r| r.validate().is_ok())
        .filter(|r| seen.insert(r.clone()))
        .collect()
}

/// Merge additions that target the same entity, keeping first-seen order and
/// dropping repeated contents.
pub(crate) fn merge_additions(additions: Vec<ObservationAddition>) -> Vec<ObservationAddition> {
    let mut merged: Vec<ObservationAddition> = Vec::new();
    for addition in additions {
        let index = match merged
            .iter()
            .position(|m| m.entity_name == addition.entity_name)
        {
            Some(index) => index,
            None => {
                merged.push(ObservationAddition {
                    entity_name: addition.entity_name.clone(),
                    contents: Vec::new(),
                });
                merged.len() - 1
            }
        };
        let target = &mut merged[index];
        for content in addition.contents {
            if !target.contents.contains(&content) {
                target.contents.push(content);
            }
        }
    }
    merged
}

/// Same as [`merge_additions`] for deletions.
pub(crate) fn merge_deletions(deletions: Vec<ObservationDeletion>) -> Vec<ObservationDeletion> {
    let mut merged: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for deletion in deletions {
        let target = merged.entry(deletion.entity_name).or_default();
        for observation in deletion.observations {
            if !target.contains(&observation) {
                target.push(observation);
            }
        }
    }
    merged
        .into_iter()
        .map(|(entity_name, observations)| ObservationDeletion {
            entity_name,
            observations,
        })
        .collect()
}

/// Group relations by type, since a relationship type cannot be a query parameter.
pub(crate) fn group_by_type(relations: &[Relation]) -> BTreeMap<&str, Vec<&Relation>> {
    let mut groups: BTreeMap<&str, Vec<&Relation>> = BTreeMap::new();
    for relation in relations {
        groups
            .entry(relation.relation_type.as_str())
            .or_default()
            .push(relation);
    }
    groups
}
