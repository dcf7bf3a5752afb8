// Key/value memory tools

use crate::protocol::{CallToolResult, ToolSchema};
use crate::tools::{client_error, json_schema_object, json_schema_string, parse_args, Tool};
use anyhow::Result;
use kgserve_core::kv::KvStore;
use serde::Deserialize;
use std::sync::Arc;

/// All key/value memory tools backed by `store`
pub fn memory_tools(store: Arc<dyn KvStore>) -> Vec<Arc<dyn Tool>> {
    vec![
        Arc::new(MemorySetTool::new(store.clone())),
        Arc::new(MemoryGetTool::new(store.clone())),
        Arc::new(MemoryDeleteTool::new(store.clone())),
        Arc::new(MemoryListTool::new(store)),
    ]
}

fn not_found(key: &str) -> String {
    format!("No memory stored under key '{}'", key)
}

/// Tool to store a value under a key
pub struct MemorySetTool {
    store: Arc<dyn KvStore>,
}

impl MemorySetTool {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }
}

#[derive(Debug, Deserialize)]
struct MemorySetArgs {
    key: String,
    value: String,
}

#[async_trait::async_trait]
impl Tool for MemorySetTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "memory_set".to_string(),
            description: "Store a text value under a key, replacing any previous value".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "key": json_schema_string("Key to store the value under"),
                    "value": json_schema_string("Text value to remember")
                }),
                vec!["key", "value"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: MemorySetArgs = match parse_args("memory_set", arguments) {
            Ok(args) => args,
            Err(result) => return Ok(result),
        };

        match self.store.set(&args.key, &args.value) {
            Ok(entry) => {
                tracing::debug!(key = %entry.key, "Stored memory");
                CallToolResult::json(&entry)
            }
            Err(e) => client_error(e),
        }
    }
}

/// Tool to read a stored value
pub struct MemoryGetTool {
    store: Arc<dyn KvStore>,
}

impl MemoryGetTool {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }
}

#[derive(Debug, Deserialize)]
struct MemoryKeyArgs {
    key: String,
}

#[async_trait::async_trait]
impl Tool for MemoryGetTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "memory_get".to_string(),
            description: "Get the value stored under a key".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "key": json_schema_string("Key to look up")
                }),
                vec!["key"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: MemoryKeyArgs = match parse_args("memory_get", arguments) {
            Ok(args) => args,
            Err(result) => return Ok(result),
        };

        match self.store.get(&args.key) {
            Ok(Some(entry)) => CallToolResult::json(&entry),
            Ok(None) => Ok(CallToolResult::error(not_found(&args.key))),
            Err(e) => client_error(e),
        }
    }
}

/// Tool to forget a stored value
pub struct MemoryDeleteTool {
    store: Arc<dyn KvStore>,
}

impl MemoryDeleteTool {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }
}

#[async_trait::async_trait]
impl Tool for MemoryDeleteTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "memory_delete".to_string(),
            description: "Delete the value stored under a key".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "key": json_schema_string("Key to delete")
                }),
                vec!["key"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: MemoryKeyArgs = match parse_args("memory_delete", arguments) {
            Ok(args) => args,
            Err(result) => return Ok(result),
        };

        match self.store.delete(&args.key) {
            Ok(true) => Ok(CallToolResult::text(format!("Deleted '{}'", args.key))),
            Ok(false) => Ok(CallToolResult::text(not_found(&args.key))),
            Err(e) => client_error(e),
        }
    }
}

/// Tool to list stored values
pub struct MemoryListTool {
    store: Arc<dyn KvStore>,
}

impl MemoryListTool {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }
}

#[derive(Debug, Deserialize)]
struct MemoryListArgs {
    #[serde(default)]
    prefix: Option<String>,
}

#[async_trait::async_trait]
impl Tool for MemoryListTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "memory_list".to_string(),
            description: "List stored values ordered by key, optionally filtered by key prefix"
                .to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "prefix": json_schema_string("Only return keys starting with this prefix")
                }),
                vec![],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: MemoryListArgs = match parse_args("memory_list", arguments) {
            Ok(args) => args,
            Err(result) => return Ok(result),
        };

        match self.store.list(args.prefix.as_deref()) {
            Ok(entries) => CallToolResult::json(&entries),
            Err(e) => client_error(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;
    use kgserve_core::kv::{InMemoryKvStore, RedbKvStore};
    use kgserve_core::MemoryEntry;
    use tempfile::TempDir;

    fn registry(store: Arc<dyn KvStore>) -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register_all(memory_tools(store));
        registry
    }

    async fn call(registry: &ToolRegistry, name: &str, args: serde_json::Value) -> CallToolResult {
        registry.get(name).unwrap().execute(args).await.unwrap()
    }

    #[tokio::test]
    async fn test_memory_set_get_delete() {
        let registry = registry(Arc::new(InMemoryKvStore::new()));

        let set = call(
            &registry,
            "memory_set",
            serde_json::json!({"key": "favorite", "value": "tea"}),
        )
        .await;
        assert!(!set.is_error());

        let get = call(&registry, "memory_get", serde_json::json!({"key": "favorite"})).await;
        let entry: MemoryEntry = serde_json::from_str(get.content[0].as_text()).unwrap();
        assert_eq!(entry.value, "tea");

        let deleted = call(&registry, "memory_delete", serde_json::json!({"key": "favorite"})).await;
        assert_eq!(deleted.content[0].as_text(), "Deleted 'favorite'");

        let again = call(&registry, "memory_delete", serde_json::json!({"key": "favorite"})).await;
        assert!(!again.is_error());

        let missing = call(&registry, "memory_get", serde_json::json!({"key": "favorite"})).await;
        assert!(missing.is_error());
    }

    #[tokio::test]
    async fn test_memory_list_with_prefix() {
        let temp_dir = TempDir::new().unwrap();
        let store = RedbKvStore::new(temp_dir.path().join("memory.redb")).unwrap();
        let registry = registry(Arc::new(store));

        for (key, value) in [("a/x", "1"), ("a/y", "2"), ("b", "3")] {
            call(
                &registry,
                "memory_set",
                serde_json::json!({"key": key, "value": value}),
            )
            .await;
        }

        let listed = call(&registry, "memory_list", serde_json::json!({"prefix": "a/"})).await;
        let entries: Vec<MemoryEntry> = serde_json::from_str(listed.content[0].as_text()).unwrap();
        assert_eq!(entries.len(), 2);

        let all = call(&registry, "memory_list", serde_json::json!({})).await;
        let entries: Vec<MemoryEntry> = serde_json::from_str(all.content[0].as_text()).unwrap();
        assert_eq!(entries.len(), 3);
    }

    #[tokio::test]
    async fn test_memory_set_rejects_empty_key() {
        let registry = registry(Arc::new(InMemoryKvStore::new()));
        let result = call(
            &registry,
            "memory_set",
            serde_json::json!({"key": "", "value": "x"}),
        )
        .await;
        assert!(result.is_error());
        assert!(result.content[0].as_text().contains("key must not be empty"));
    }
}
