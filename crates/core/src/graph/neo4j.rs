use super::{
    deletable_relations, group_by_type, merge_additions, merge_deletions, prepare_entities,
    prepare_relations, GraphStore,
};
use crate::error::{StoreError, StoreResult};
use crate::types::{
    validate_relation_type, AddedObservations, Entity, KnowledgeGraph, ObservationAddition,
    ObservationDeletion, Relation,
};
use neo4rs::{query, ConfigBuilder, Graph, Query};
use serde::{Deserialize, Serialize};

const ENTITY_CONSTRAINT: &str =
    "CREATE CONSTRAINT entity_name_unique IF NOT EXISTS FOR (e:Entity) REQUIRE e.name IS UNIQUE";
const FULLTEXT_INDEX: &str = "CREATE FULLTEXT INDEX entity_search IF NOT EXISTS \
     FOR (e:Entity) ON EACH [e.name, e.type, e.observations]";

const ENTITY_COLUMNS: &str =
    "e.name AS name, e.type AS type, coalesce(e.observations, []) AS observations";

/// Connection settings for a Neo4j server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Neo4jConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
    pub max_connections: usize,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            uri: "127.0.0.1:7687".to_string(),
            user: "neo4j".to_string(),
            password: String::new(),
            database: None,
            max_connections: 16,
        }
    }
}

/// Knowledge graph stored in Neo4j.
///
/// Entities are `:Entity` nodes with `name`, `type` and `observations`
/// properties; relations are native relationships whose type is the
/// relation's `relationType`.
pub struct Neo4jGraphStore {
    graph: Graph,
}

impl Neo4jGraphStore {
    pub async fn connect(config: &Neo4jConfig) -> StoreResult<Self> {
        let mut builder = ConfigBuilder::default()
            .uri(config.uri.as_str())
            .user(config.user.as_str())
            .password(config.password.as_str())
            .max_connections(config.max_connections);
        if let Some(database) = &config.database {
            builder = builder.db(database.as_str());
        }

        let graph = Graph::connect(builder.build()?).await?;
        tracing::info!(uri = %config.uri, "Connected to Neo4j");

        Ok(Self { graph })
    }

    async fn fetch_entities(&self, q: Query) -> StoreResult<Vec<Entity>> {
        let mut rows = self.graph.execute(q).await?;
        let mut entities = Vec::new();
        while let Some(row) = rows.next().await? {
            entities.push(Entity {
                name: row.get("name")?,
                entity_type: row.get("type")?,
                observations: row.get("observations")?,
            });
        }
        Ok(entities)
    }

    async fn fetch_relations(&self, q: Query) -> StoreResult<Vec<Relation>> {
        let mut rows = self.graph.execute(q).await?;
        let mut relations = Vec::new();
        while let Some(row) = rows.next().await? {
            relations.push(Relation {
                from: row.get("from")?,
                to: row.get("to")?,
                relation_type: row.get("type")?,
            });
        }
        Ok(relations)
    }

    async fn fetch_names(&self, q: Query) -> StoreResult<Vec<String>> {
        let mut rows = self.graph.execute(q).await?;
        let mut names = Vec::new();
        while let Some(row) = rows.next().await? {
            names.push(row.get("name")?);
        }
        Ok(names)
    }

    async fn fetch_count(&self, q: Query) -> StoreResult<usize> {
        let mut rows = self.graph.execute(q).await?;
        let mut total = 0;
        while let Some(row) = rows.next().await? {
            total += row_count(&row)?;
        }
        Ok(total)
    }

    /// Names from `names` that do not exist, sorted
    async fn missing_entities(&self, names: Vec<String>) -> StoreResult<Vec<String>> {
        let mut missing = self
            .fetch_names(
                query(
                    "UNWIND $names AS name \
                     OPTIONAL MATCH (e:Entity {name: name}) \
                     WITH name, e WHERE e IS NULL \
                     RETURN DISTINCT name",
                )
                .param("names", names),
            )
            .await?;
        missing.sort();
        Ok(missing)
    }

    /// The given entities plus relations whose endpoints are both among them
    async fn subgraph(&self, entities: Vec<Entity>) -> StoreResult<KnowledgeGraph> {
        if entities.is_empty() {
            return Ok(KnowledgeGraph::default());
        }
        let names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
        let relations = self
            .fetch_relations(
                query(
                    "MATCH (a:Entity)-[r]->(b:Entity) \
                     WHERE a.name IN $names AND b.name IN $names \
                     RETURN a.name AS from, type(r) AS type, b.name AS to",
                )
                .param("names", names),
            )
            .await?;

        Ok(KnowledgeGraph {
            entities,
            relations,
        }
        .normalize())
    }
}

/// Escape Lucene query syntax so user text is searched literally.
///
/// Terms are whitespace-separated and OR-ed. The bare operator keywords
/// `AND`, `OR` and `NOT` are lowercased so the parser reads them as terms;
/// the index analyzer lowercases everything anyway.
pub fn escape_fulltext_query(input: &str) -> String {
    const SPECIAL: &[char] = &[
        '+', '-', '&', '|', '!', '(', ')', '{', '}', '[', ']', '^', '"', '~', '*', '?', ':',
        '\\', '/',
    ];

    input
        .split_whitespace()
        .map(|term| {
            if matches!(term, "AND" | "OR" | "NOT") {
                return term.to_lowercase();
            }
            let mut escaped = String::with_capacity(term.len());
            for c in term.chars() {
                if SPECIAL.contains(&c) {
                    escaped.push('\\');
                }
                escaped.push(c);
            }
            escaped
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn row_count(row: &neo4rs::Row) -> StoreResult<usize> {
    let count: i64 = row.get("deleted")?;
    Ok(usize::try_from(count).unwrap_or(0))
}

/// Backtick-quoted relationship type for interpolation into Cypher
fn relationship_type(relation_type: &str) -> StoreResult<String> {
    validate_relation_type(relation_type)?;
    Ok(format!("`{}`", relation_type))
}

#[async_trait::async_trait]
impl GraphStore for Neo4jGraphStore {
    async fn ensure_schema(&self) -> StoreResult<()> {
        self.graph.run(query(ENTITY_CONSTRAINT)).await?;
        self.graph.run(query(FULLTEXT_INDEX)).await?;
        tracing::debug!("Neo4j constraint and full-text index in place");
        Ok(())
    }

    async fn create_entities(&self, entities: Vec<Entity>) -> StoreResult<Vec<Entity>> {
        let entities = prepare_entities(entities)?;
        if entities.is_empty() {
            return Ok(Vec::new());
        }

        let names: Vec<String> = entities.iter().map(|e| e.name.clone()).collect();
        let types: Vec<String> = entities.iter().map(|e| e.entity_type.clone()).collect();
        let observations: Vec<Vec<String>> =
            entities.iter().map(|e| e.observations.clone()).collect();

        let q = query(&format!(
            "UNWIND range(0, size($names) - 1) AS i \
             WITH $names[i] AS name, $types[i] AS type, $observations[i] AS observations \
             WHERE NOT EXISTS {{ MATCH (:Entity {{name: name}}) }} \
             CREATE (e:Entity {{name: name, type: type, observations: observations}}) \
             RETURN {}",
            ENTITY_COLUMNS
        ))
        .param("names", names)
        .param("types", types)
        .param("observations", observations);

        let created = self.fetch_entities(q).await?;
        tracing::debug!(count = created.len(), "Created entities");
        Ok(created)
    }

    async fn create_relations(&self, relations: Vec<Relation>) -> StoreResult<Vec<Relation>> {
        let relations = prepare_relations(relations)?;
        if relations.is_empty() {
            return Ok(Vec::new());
        }

        let endpoints: Vec<String> = relations
            .iter()
            .flat_map(|r| [r.from.clone(), r.to.clone()])
            .collect();
        let missing = self.missing_entities(endpoints).await?;
        if !missing.is_empty() {
            return Err(StoreError::MissingEndpoints(missing));
        }

        let mut txn = self.graph.start_txn().await?;
        let mut created = Vec::new();
        for (relation_type, group) in group_by_type(&relations) {
            let froms: Vec<String> = group.iter().map(|r| r.from.clone()).collect();
            let tos: Vec<String> = group.iter().map(|r| r.to.clone()).collect();
            let rel = relationship_type(relation_type)?;

            let q = query(&format!(
                "UNWIND range(0, size($froms) - 1) AS i \
                 MATCH (a:Entity {{name: $froms[i]}}), (b:Entity {{name: $tos[i]}}) \
                 WHERE NOT EXISTS {{ MATCH (a)-[:{rel}]->(b) }} \
                 CREATE (a)-[:{rel}]->(b) \
                 RETURN a.name AS from, b.name AS to"
            ))
            .param("froms", froms)
            .param("tos", tos);

            let mut rows = txn.execute(q).await?;
            while let Some(row) = rows.next(txn.handle()).await? {
                created.push(Relation {
                    from: row.get("from")?,
                    to: row.get("to")?,
                    relation_type: relation_type.to_string(),
                });
            }
        }
        txn.commit().await?;

        tracing::debug!(count = created.len(), "Created relations");
        Ok(created)
    }

    async fn add_observations(
        &self,
        additions: Vec<ObservationAddition>,
    ) -> StoreResult<Vec<AddedObservations>> {
        let additions = merge_additions(additions);
        if additions.is_empty() {
            return Ok(Vec::new());
        }

        let names: Vec<String> = additions.iter().map(|a| a.entity_name.clone()).collect();
        if let Some(missing) = self.missing_entities(names.clone()).await?.into_iter().next() {
            return Err(StoreError::EntityNotFound(missing));
        }

        let contents: Vec<Vec<String>> = additions.iter().map(|a| a.contents.clone()).collect();
        let q = query(
            "UNWIND range(0, size($names) - 1) AS i \
             MATCH (e:Entity {name: $names[i]}) \
             WITH e, [o IN $contents[i] WHERE NOT o IN coalesce(e.observations, [])] AS added \
             SET e.observations = coalesce(e.observations, []) + added \
             RETURN e.name AS name, added",
        )
        .param("names", names)
        .param("contents", contents);

        let mut rows = self.graph.execute(q).await?;
        let mut results = Vec::with_capacity(additions.len());
        while let Some(row) = rows.next().await? {
            results.push(AddedObservations {
                entity_name: row.get("name")?,
                added_observations: row.get("added")?,
            });
        }
        Ok(results)
    }

    async fn delete_entities(&self, names: Vec<String>) -> StoreResult<usize> {
        if names.is_empty() {
            return Ok(0);
        }
        let deleted = self
            .fetch_count(
                query(
                    "MATCH (e:Entity) WHERE e.name IN $names \
                     DETACH DELETE e \
                     RETURN count(*) AS deleted",
                )
                .param("names", names),
            )
            .await?;
        tracing::debug!(count = deleted, "Deleted entities");
        Ok(deleted)
    }

    async fn delete_observations(&self, deletions: Vec<ObservationDeletion>) -> StoreResult<()> {
        let deletions = merge_deletions(deletions);
        if deletions.is_empty() {
            return Ok(());
        }

        let names: Vec<String> = deletions.iter().map(|d| d.entity_name.clone()).collect();
        let observations: Vec<Vec<String>> =
            deletions.iter().map(|d| d.observations.clone()).collect();

        self.graph
            .run(
                query(
                    "UNWIND range(0, size($names) - 1) AS i \
                     MATCH (e:Entity {name: $names[i]}) \
                     SET e.observations = \
                       [o IN coalesce(e.observations, []) WHERE NOT o IN $observations[i]]",
                )
                .param("names", names)
                .param("observations", observations),
            )
            .await?;
        Ok(())
    }

    async fn delete_relations(&self, relations: Vec<Relation>) -> StoreResult<usize> {
        let relations = deletable_relations(relations);
        if relations.is_empty() {
            return Ok(0);
        }

        let mut txn = self.graph.start_txn().await?;
        let mut deleted = 0;
        for (relation_type, group) in group_by_type(&relations) {
            let froms: Vec<String> = group.iter().map(|r| r.from.clone()).collect();
            let tos: Vec<String> = group.iter().map(|r| r.to.clone()).collect();
            let rel = relationship_type(relation_type)?;

            let q = query(&format!(
                "UNWIND range(0, size($froms) - 1) AS i \
                 MATCH (a:Entity {{name: $froms[i]}})-[r:{rel}]->(b:Entity {{name: $tos[i]}}) \
                 DELETE r \
                 RETURN count(*) AS deleted"
            ))
            .param("froms", froms)
            .param("tos", tos);

            let mut rows = txn.execute(q).await?;
            while let Some(row) = rows.next(txn.handle()).await? {
                deleted += row_count(&row)?;
            }
        }
        txn.commit().await?;

        tracing::debug!(count = deleted, "Deleted relations");
        Ok(deleted)
    }

    async fn read_graph(&self) -> StoreResult<KnowledgeGraph> {
        let entities = self
            .fetch_entities(query(&format!("MATCH (e:Entity) RETURN {}", ENTITY_COLUMNS)))
            .await?;
        let relations = self
            .fetch_relations(query(
                "MATCH (a:Entity)-[r]->(b:Entity) \
                 RETURN a.name AS from, type(r) AS type, b.name AS to",
            ))
            .await?;

        Ok(KnowledgeGraph {
            entities,
            relations,
        }
        .normalize())
    }

    async fn search_nodes(&self, search: &str) -> StoreResult<KnowledgeGraph> {
        if search.trim().is_empty() {
            return Err(StoreError::InvalidInput(
                "search query must not be empty".to_string(),
            ));
        }

        let entities = self
            .fetch_entities(
                query(&format!(
                    "CALL db.index.fulltext.queryNodes('entity_search', $query) \
                     YIELD node AS e \
                     RETURN {}",
                    ENTITY_COLUMNS
                ))
                .param("query", escape_fulltext_query(search.trim())),
            )
            .await?;
        self.subgraph(entities).await
    }

    async fn find_nodes(&self, name: &str) -> StoreResult<KnowledgeGraph> {
        let needle = name.trim();
        if needle.is_empty() {
            return Err(StoreError::InvalidInput(
                "name query must not be empty".to_string(),
            ));
        }

        let entities = self
            .fetch_entities(
                query(&format!(
                    "MATCH (e:Entity) WHERE toLower(e.name) CONTAINS toLower($needle) RETURN {}",
                    ENTITY_COLUMNS
                ))
                .param("needle", needle),
            )
            .await?;
        self.subgraph(entities).await
    }

    async fn open_nodes(&self, names: Vec<String>) -> StoreResult<KnowledgeGraph> {
        if names.is_empty() {
            return Ok(KnowledgeGraph::default());
        }
        let entities = self
            .fetch_entities(
                query(&format!(
                    "MATCH (e:Entity) WHERE e.name IN $names RETURN {}",
                    ENTITY_COLUMNS
                ))
                .param("names", names),
            )
            .await?;
        self.subgraph(entities).await
    }
}
