use super::{
    deletable_relations, merge_additions, merge_deletions, prepare_entities, prepare_relations,
    GraphStore,
};
use crate::error::{StoreError, StoreResult};
use crate::types::{
    AddedObservations, Entity, KnowledgeGraph, ObservationAddition, ObservationDeletion, Relation,
};
use std::collections::{BTreeSet, HashSet};
use tokio::sync::RwLock;

/// Knowledge graph held in process memory. Contents are lost on restart.
#[derive(Default)]
pub struct InMemoryGraphStore {
    graph: RwLock<KnowledgeGraph>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Entities matching `keep` plus the relations whose endpoints both match
    fn subgraph(graph: &KnowledgeGraph, keep: impl Fn(&Entity) -> bool) -> KnowledgeGraph {
        let entities: Vec<Entity> = graph.entities.iter().filter(|e| keep(e)).cloned().collect();
        let names: HashSet<&str> = entities.iter().map(|e| e.name.as_str()).collect();
        let relations = graph
            .relations
            .iter()
            .filter(|r| names.contains(r.from.as_str()) && names.contains(r.to.as_str()))
            .cloned()
            .collect();

        KnowledgeGraph {
            entities,
            relations,
        }
        .normalize()
    }
}

fn search_tokens(query: &str) -> StoreResult<Vec<String>> {
    let tokens: Vec<String> = query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .collect();
    if tokens.is_empty() {
        return Err(StoreError::InvalidInput(
            "search query must not be empty".to_string(),
        ));
    }
    Ok(tokens)
}

fn entity_matches(entity: &Entity, tokens: &[String]) -> bool {
    let fields = std::iter::once(&entity.name)
        .chain(std::iter::once(&entity.entity_type))
        .chain(entity.observations.iter())
        .map(|f| f.to_lowercase())
        .collect::<Vec<_>>();

    tokens
        .iter()
        .any(|token| fields.iter().any(|field| field.contains(token.as_str())))
}

#[async_trait::async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn ensure_schema(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn create_entities(&self, entities: Vec<Entity>) -> StoreResult<Vec<Entity>> {
        let entities = prepare_entities(entities)?;
        let mut graph = self.graph.write().await;

        let mut created = Vec::new();
        for entity in entities {
            if graph.entities.iter().any(|e| e.name == entity.name) {
                tracing::debug!(name = %entity.name, "Entity already exists, skipping");
                continue;
            }
            graph.entities.push(entity.clone());
            created.push(entity);
        }
        Ok(created)
    }

    async fn create_relations(&self, relations: Vec<Relation>) -> StoreResult<Vec<Relation>> {
        let relations = prepare_relations(relations)?;
        let mut graph = self.graph.write().await;

        let known: HashSet<&str> = graph.entities.iter().map(|e| e.name.as_str()).collect();
        let missing: BTreeSet<String> = relations
            .iter()
            .flat_map(|r| [r.from.as_str(), r.to.as_str()])
            .filter(|name| !known.contains(name))
            .map(str::to_string)
            .collect();
        if !missing.is_empty() {
            return Err(StoreError::MissingEndpoints(missing.into_iter().collect()));
        }

        let mut created = Vec::new();
        for relation in relations {
            if graph.relations.contains(&relation) {
                continue;
            }
            graph.relations.push(relation.clone());
            created.push(relation);
        }
        Ok(created)
    }

    async fn add_observations(
        &self,
        additions: Vec<ObservationAddition>,
    ) -> StoreResult<Vec<AddedObservations>> {
        let additions = merge_additions(additions);
        let mut graph = self.graph.write().await;

        if let Some(missing) = additions
            .iter()
            .find(|a| !graph.entities.iter().any(|e| e.name == a.entity_name))
        {
            return Err(StoreError::EntityNotFound(missing.entity_name.clone()));
        }

        let mut results = Vec::with_capacity(additions.len());
        for addition in additions {
            let Some(entity) = graph
                .entities
                .iter_mut()
                .find(|e| e.name == addition.entity_name)
            else {
                continue;
            };

            let added: Vec<String> = addition
                .contents
                .into_iter()
                .filter(|c| !entity.observations.contains(c))
                .collect();
            entity.observations.extend(added.iter().cloned());

            results.push(AddedObservations {
                entity_name: addition.entity_name,
                added_observations: added,
            });
        }
        Ok(results)
    }

    async fn delete_entities(&self, names: Vec<String>) -> StoreResult<usize> {
        let names: HashSet<String> = names.into_iter().collect();
        let mut graph = self.graph.write().await;

        let before = graph.entities.len();
        graph.entities.retain(|e| !names.contains(&e.name));
        graph
            .relations
            .retain(|r| !names.contains(&r.from) && !names.contains(&r.to));
        Ok(before - graph.entities.len())
    }

    async fn delete_observations(&self, deletions: Vec<ObservationDeletion>) -> StoreResult<()> {
        let deletions = merge_deletions(deletions);
        let mut graph = self.graph.write().await;

        for deletion in deletions {
            if let Some(entity) = graph
                .entities
                .iter_mut()
                .find(|e| e.name == deletion.entity_name)
            {
                entity
                    .observations
                    .retain(|o| !deletion.observations.contains(o));
            }
        }
        Ok(())
    }

    async fn delete_relations(&self, relations: Vec<Relation>) -> StoreResult<usize> {
        let relations: HashSet<Relation> = deletable_relations(relations).into_iter().collect();
        let mut graph = self.graph.write().await;

        let before = graph.relations.len();
        graph.relations.retain(|r| !relations.contains(r));
        Ok(before - graph.relations.len())
    }

    async fn read_graph(&self) -> StoreResult<KnowledgeGraph> {
        Ok(self.graph.read().await.clone().normalize())
    }

    async fn search_nodes(&self, query: &str) -> StoreResult<KnowledgeGraph> {
        let tokens = search_tokens(query)?;
        let graph = self.graph.read().await;
        Ok(Self::subgraph(&graph, |e| entity_matches(e, &tokens)))
    }

    async fn find_nodes(&self, query: &str) -> StoreResult<KnowledgeGraph> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(StoreError::InvalidInput(
                "name query must not be empty".to_string(),
            ));
        }
        let graph = self.graph.read().await;
        Ok(Self::subgraph(&graph, |e| {
            e.name.to_lowercase().contains(&needle)
        }))
    }

    async fn open_nodes(&self, names: Vec<String>) -> StoreResult<KnowledgeGraph> {
        let names: HashSet<String> = names.into_iter().collect();
        let graph = self.graph.read().await;
        Ok(Self::subgraph(&graph, |e| names.contains(&e.name)))
    }
}
