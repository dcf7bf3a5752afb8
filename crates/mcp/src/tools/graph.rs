// Knowledge graph tools: entity, relation and observation CRUD plus queries

use crate::protocol::{CallToolResult, ToolSchema};
use crate::tools::{
    client_error, json_schema_array, json_schema_object, json_schema_string, parse_args, Tool,
};
use anyhow::Result;
use kgserve_core::graph::GraphStore;
use kgserve_core::{Entity, ObservationAddition, ObservationDeletion, Relation};
use serde::Deserialize;
use std::sync::Arc;

/// All knowledge graph tools backed by `store`
pub fn graph_tools(store: Arc<dyn GraphStore>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(CreateEntitiesTool::new(store.clone())),
        Arc::new(CreateRelationsTool::new(store.clone())),
        Arc::new(AddObservationsTool::new(store.clone())),
        Arc::new(DeleteEntitiesTool::new(store.clone())),
        Arc::new(DeleteObservationsTool::new(store.clone())),
        Arc::new(DeleteRelationsTool::new(store.clone())),
        Arc::new(ReadGraphTool::new(store.clone())),
        Arc::new(SearchNodesTool::new(store.clone())),
        Arc::new(FindNodesTool::new(store.clone())),
        Arc::new(OpenNodesTool::new(store)),
    ]
}

fn entity_schema() -> serde_json::Value {
    json_schema_object(
        serde_json::json!({
            "name": json_schema_string("Unique name of the entity"),
            "entityType": json_schema_string("Type of the entity, e.g. person or project"),
            "observations": json_schema_array(
                serde_json::json!({"type": "string"}),
                "Facts about the entity"
            )
        }),
        vec!["name", "entityType"],
    )
}

fn relation_schema() -> serde_json::Value {
    json_schema_object(
        serde_json::json!({
            "from": json_schema_string("Name of the entity the relation starts at"),
            "to": json_schema_string("Name of the entity the relation points to"),
            "relationType": json_schema_string(
                "Relation type in active voice; letters, digits and underscores, e.g. WORKS_AT"
            )
        }),
        vec!["from", "to", "relationType"],
    )
}

fn string_list(description: &str) -> serde_json::Value {
    json_schema_array(serde_json::json!({"type": "string"}), description)
}

macro_rules! graph_tool {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        pub struct $name {
            store: Arc<dyn GraphStore>,
        }

        impl $name {
            pub fn new(store: Arc<dyn GraphStore>) -> Self {
                Self { store }
            }
        }
    };
}

macro_rules! args_or_return {
    ($tool:expr, $arguments:expr) => {
        match parse_args($tool, $arguments) {
            Ok(args) => args,
            Err(result) => return Ok(result),
        }
    };
}

graph_tool!(
    /// Tool to create entities
    CreateEntitiesTool
);

#[derive(Debug, Deserialize)]
struct CreateEntitiesArgs {
    entities: Vec<Entity>,
}

#[async_trait::async_trait]
impl Tool for CreateEntitiesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "create_entities".to_string(),
            description: "Create entities in the knowledge graph. Entities whose name already exists are skipped; the created ones are returned".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "entities": json_schema_array(entity_schema(), "Entities to create")
                }),
                vec!["entities"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: CreateEntitiesArgs = args_or_return!("create_entities", arguments);
        match self.store.create_entities(args.entities).await {
            Ok(created) => CallToolResult::json(&created),
            Err(e) => client_error(e),
        }
    }
}

graph_tool!(
    /// Tool to create relations between existing entities
    CreateRelationsTool
);

#[derive(Debug, Deserialize)]
struct RelationsArgs {
    relations: Vec<Relation>,
}

#[async_trait::async_trait]
impl Tool for CreateRelationsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "create_relations".to_string(),
            description: "Create directed relations between existing entities. Fails without writing anything if an endpoint does not exist".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "relations": json_schema_array(relation_schema(), "Relations to create")
                }),
                vec!["relations"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: RelationsArgs = args_or_return!("create_relations", arguments);
        match self.store.create_relations(args.relations).await {
            Ok(created) => CallToolResult::json(&created),
            Err(e) => client_error(e),
        }
    }
}

graph_tool!(
    /// Tool to append observations to entities
    AddObservationsTool
);

#[derive(Debug, Deserialize)]
struct AddObservationsArgs {
    observations: Vec<ObservationAddition>,
}

#[async_trait::async_trait]
impl Tool for AddObservationsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "add_observations".to_string(),
            description: "Add observations to existing entities. Observations an entity already has are skipped".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "observations": json_schema_array(
                        json_schema_object(
                            serde_json::json!({
                                "entityName": json_schema_string("Entity to add observations to"),
                                "contents": string_list("Observations to add")
                            }),
                            vec!["entityName", "contents"],
                        ),
                        "Observations to add, grouped by entity"
                    )
                }),
                vec!["observations"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: AddObservationsArgs = args_or_return!("add_observations", arguments);
        match self.store.add_observations(args.observations).await {
            Ok(added) => CallToolResult::json(&added),
            Err(e) => client_error(e),
        }
    }
}

graph_tool!(
    /// Tool to delete entities and their relations
    DeleteEntitiesTool
);

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteEntitiesArgs {
    entity_names: Vec<String>,
}

#[async_trait::async_trait]
impl Tool for DeleteEntitiesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "delete_entities".to_string(),
            description: "Delete entities and every relation attached to them".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "entityNames": string_list("Names of the entities to delete")
                }),
                vec!["entityNames"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: DeleteEntitiesArgs = args_or_return!("delete_entities", arguments);
        match self.store.delete_entities(args.entity_names).await {
            Ok(count) => Ok(CallToolResult::text(format!(
                "Deleted {} entit{} and their relations",
                count,
                if count == 1 { "y" } else { "ies" }
            ))),
            Err(e) => client_error(e),
        }
    }
}

graph_tool!(
    /// Tool to remove observations from entities
    DeleteObservationsTool
);

#[derive(Debug, Deserialize)]
struct DeleteObservationsArgs {
    deletions: Vec<ObservationDeletion>,
}

#[async_trait::async_trait]
impl Tool for DeleteObservationsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "delete_observations".to_string(),
            description: "Remove specific observations from entities".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "deletions": json_schema_array(
                        json_schema_object(
                            serde_json::json!({
                                "entityName": json_schema_string("Entity to remove observations from"),
                                "observations": string_list("Observations to remove")
                            }),
                            vec!["entityName", "observations"],
                        ),
                        "Observations to remove, grouped by entity"
                    )
                }),
                vec!["deletions"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: DeleteObservationsArgs = args_or_return!("delete_observations", arguments);
        match self.store.delete_observations(args.deletions).await {
            Ok(()) => Ok(CallToolResult::text("Observations deleted")),
            Err(e) => client_error(e),
        }
    }
}

graph_tool!(
    /// Tool to delete relations
    DeleteRelationsTool
);

#[async_trait::async_trait]
impl Tool for DeleteRelationsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "delete_relations".to_string(),
            description: "Delete relations matching from, to and relationType exactly".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "relations": json_schema_array(relation_schema(), "Relations to delete")
                }),
                vec!["relations"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: RelationsArgs = args_or_return!("delete_relations", arguments);
        match self.store.delete_relations(args.relations).await {
            Ok(count) => Ok(CallToolResult::text(format!(
                "Deleted {} relation{}",
                count,
                if count == 1 { "" } else { "s" }
            ))),
            Err(e) => client_error(e),
        }
    }
}

graph_tool!(
    /// Tool to read the whole graph
    ReadGraphTool
);

#[async_trait::async_trait]
impl Tool for ReadGraphTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "read_graph".to_string(),
            description: "Read the entire knowledge graph".to_string(),
            input_schema: json_schema_object(serde_json::json!({}), vec![]),
        }
    }

    async fn execute(&self, _arguments: serde_json::Value) -> Result<CallToolResult> {
        match self.store.read_graph().await {
            Ok(graph) => CallToolResult::json(&graph),
            Err(e) => client_error(e),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryArgs {
    query: String,
}

graph_tool!(
    /// Tool to full-text search entities
    SearchNodesTool
);

#[async_trait::async_trait]
impl Tool for SearchNodesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "search_nodes".to_string(),
            description: "Full-text search over entity names, types and observations. Returns matching entities and the relations between them".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "query": json_schema_string("Search terms")
                }),
                vec!["query"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: QueryArgs = args_or_return!("search_nodes", arguments);
        match self.store.search_nodes(&args.query).await {
            Ok(graph) => CallToolResult::json(&graph),
            Err(e) => client_error(e),
        }
    }
}

graph_tool!(
    /// Tool to find entities by partial name
    FindNodesTool
);

#[async_trait::async_trait]
impl Tool for FindNodesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "find_nodes".to_string(),
            description: "Find entities whose name contains the query (case-insensitive). Returns matching entities and the relations between them".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "query": json_schema_string("Part of an entity name")
                }),
                vec!["query"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: QueryArgs = args_or_return!("find_nodes", arguments);
        match self.store.find_nodes(&args.query).await {
            Ok(graph) => CallToolResult::json(&graph),
            Err(e) => client_error(e),
        }
    }
}

graph_tool!(
    /// Tool to open entities by exact name
    OpenNodesTool
);

#[derive(Debug, Deserialize)]
struct OpenNodesArgs {
    names: Vec<String>,
}

#[async_trait::async_trait]
impl Tool for OpenNodesTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "open_nodes".to_string(),
            description: "Open entities by exact name, together with the relations between them".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "names": string_list("Entity names to open")
                }),
                vec!["names"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: OpenNodesArgs = args_or_return!("open_nodes", arguments);
        match self.store.open_nodes(args.names).await {
            Ok(graph) => CallToolResult::json(&graph),
            Err(e) => client_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use kgserve_core::{InMemoryGraphStore, KnowledgeGraph, StoreError, StoreResult};
    use kgserve_core::AddedObservations;

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_all(graph_tools(Arc::new(InMemoryGraphStore::new())));
        registry
    }

    async fn call(registry: &ToolRegistry, name: &str, args: serde_json::Value) -> CallToolResult {
        registry.get(name).unwrap().execute(args).await.unwrap()
    }

    fn text(result: &CallToolResult) -> &str {
        result.content[0].as_text()
    }

    async fn seed(registry: &ToolRegistry) {
        call(
            registry,
            "create_entities",
            serde_json::json!({"entities": [
                {"name": "Alice", "entityType": "person", "observations": ["Drinks tea"]},
                {"name": "Acme", "entityType": "company"}
            ]}),
        )
        .await;
        call(
            registry,
            "create_relations",
            serde_json::json!({"relations": [
                {"from": "Alice", "to": "Acme", "relationType": "WORKS_AT"}
            ]}),
        )
        .await;
    }

    #[test]
    fn test_all_graph_tools_registered() {
        let registry = registry();
        for name in [
            "create_entities",
            "create_relations",
            "add_observations",
            "delete_entities",
            "delete_observations",
            "delete_relations",
            "read_graph",
            "search_nodes",
            "find_nodes",
            "open_nodes",
        ] {
            assert!(registry.contains(name), "missing tool {name}");
        }
        assert_eq!(registry.len(), 10);
    }

    #[tokio::test]
    async fn test_create_entities_reports_only_new() {
        let registry = registry();
        seed(&registry).await;

        let result = call(
            &registry,
            "create_entities",
            serde_json::json!({"entities": [
                {"name": "Alice", "entityType": "person"},
                {"name": "Bob", "entityType": "person"}
            ]}),
        )
        .await;
        let created: Vec<Entity> = serde_json::from_str(text(&result)).unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].name, "Bob");
    }

    #[tokio::test]
    async fn test_create_relation_with_missing_endpoint_is_tool_error() {
        let registry = registry();
        seed(&registry).await;

        let result = call(
            &registry,
            "create_relations",
            serde_json::json!({"relations": [
                {"from": "Alice", "to": "Nobody", "relationType": "KNOWS"}
            ]}),
        )
        .await;
        assert!(result.is_error());
        assert!(text(&result).contains("Nobody"));
    }

    #[tokio::test]
    async fn test_invalid_relation_type_is_tool_error() {
        let registry = registry();
        seed(&registry).await;

        let result = call(
            &registry,
            "create_relations",
            serde_json::json!({"relations": [
                {"from": "Alice", "to": "Acme", "relationType": "works at"}
            ]}),
        )
        .await;
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn test_observation_round() {
        let registry = registry();
        seed(&registry).await;

        let result = call(
            &registry,
            "add_observations",
            serde_json::json!({"observations": [
                {"entityName": "Alice", "contents": ["Drinks tea", "Rides a bike"]}
            ]}),
        )
        .await;
        let added: Vec<AddedObservations> = serde_json::from_str(text(&result)).unwrap();
        assert_eq!(added[0].added_observations, vec!["Rides a bike"]);

        call(
            &registry,
            "delete_observations",
            serde_json::json!({"deletions": [
                {"entityName": "Alice", "observations": ["Drinks tea"]}
            ]}),
        )
        .await;

        let opened = call(&registry, "open_nodes", serde_json::json!({"names": ["Alice"]})).await;
        let graph: KnowledgeGraph = serde_json::from_str(text(&opened)).unwrap();
        assert_eq!(graph.entities[0].observations, vec!["Rides a bike"]);
    }

    #[tokio::test]
    async fn test_queries_and_deletes() {
        let registry = registry();
        seed(&registry).await;

        let found = call(&registry, "search_nodes", serde_json::json!({"query": "tea"})).await;
        let graph: KnowledgeGraph = serde_json::from_str(text(&found)).unwrap();
        assert_eq!(graph.entities.len(), 1);

        let found = call(&registry, "find_nodes", serde_json::json!({"query": "ac"})).await;
        let graph: KnowledgeGraph = serde_json::from_str(text(&found)).unwrap();
        assert_eq!(graph.entities[0].name, "Acme");

        let unlinked = call(
            &registry,
            "delete_relations",
            serde_json::json!({"relations": [
                {"from": "Alice", "to": "Acme", "relationType": "WORKS_AT"},
                {"from": "Acme", "to": "Alice", "relationType": "works at"}
            ]}),
        )
        .await;
        assert!(!unlinked.is_error());
        assert_eq!(text(&unlinked), "Deleted 1 relation");
        let deleted = call(
            &registry,
            "delete_entities",
            serde_json::json!({"entityNames": ["Acme"]}),
        )
        .await;
        assert_eq!(text(&deleted), "Deleted 1 entity and their relations");

        let all = call(&registry, "read_graph", serde_json::json!({})).await;
        let graph: KnowledgeGraph = serde_json::from_str(text(&all)).unwrap();
        assert_eq!(graph.entities.len(), 1);
        assert!(graph.relations.is_empty());
    }

    #[tokio::test]
    async fn test_delete_counts_only_existing() {
        let registry = registry();

        let deleted = call(
            &registry,
            "delete_entities",
            serde_json::json!({"entityNames": ["ghost1", "ghost2"]}),
        )
        .await;
        assert_eq!(text(&deleted), "Deleted 0 entities and their relations");

        let unlinked = call(
            &registry,
            "delete_relations",
            serde_json::json!({"relations": [
                {"from": "ghost1", "to": "ghost2", "relationType": "HAUNTS"}
            ]}),
        )
        .await;
        assert_eq!(text(&unlinked), "Deleted 0 relations");
    }

    #[tokio::test]
    async fn test_missing_arguments_is_tool_error() {
        let registry = registry();
        let result = call(&registry, "open_nodes", serde_json::json!({})).await;
        assert!(result.is_error());
        assert!(text(&result).contains("Invalid arguments for open_nodes"));
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl GraphStore for FailingStore {
        async fn ensure_schema(&self) -> StoreResult<()> {
            Ok(())
        }
        async fn create_entities(&self, _: Vec<Entity>) -> StoreResult<Vec<Entity>> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn create_relations(&self, _: Vec<Relation>) -> StoreResult<Vec<Relation>> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn add_observations(
            &self,
            _: Vec<ObservationAddition>,
        ) -> StoreResult<Vec<AddedObservations>> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn delete_entities(&self, _: Vec<String>) -> StoreResult<usize> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn delete_observations(&self, _: Vec<ObservationDeletion>) -> StoreResult<()> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn delete_relations(&self, _: Vec<Relation>) -> StoreResult<usize> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn read_graph(&self) -> StoreResult<KnowledgeGraph> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn search_nodes(&self, _: &str) -> StoreResult<KnowledgeGraph> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn find_nodes(&self, _: &str) -> StoreResult<KnowledgeGraph> {
            Err(StoreError::Backend("connection refused".into()))
        }
        async fn open_nodes(&self, _: Vec<String>) -> StoreResult<KnowledgeGraph> {
            Err(StoreError::Backend("connection refused".into()))
        }
    }

    #[tokio::test]
    async fn test_backend_failure_propagates() {
        let tool = ReadGraphTool::new(Arc::new(FailingStore));
        let err = tool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }
}
