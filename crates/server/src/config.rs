use anyhow::{Context, Result};
use kgserve_core::{
    GraphStore, InMemoryGraphStore, InMemoryKvStore, KvStore, Neo4jConfig, Neo4jGraphStore,
    RedbKvStore,
};
use kgserve_mcp::tools::{graph_tools, memory_tools, EchoTool, ToolRegistry};
use kgserve_mcp::McpServer;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub server: ServerSection,

    #[serde(default)]
    pub graph: GraphConfig,

    #[serde(default)]
    pub memory: MemoryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSection {
    /// Name reported to clients during initialization
    #[serde(default = "default_server_name")]
    pub name: String,

    /// When set, `/mcp` requires `Authorization: Bearer <token>`
    #[serde(default)]
    pub auth_token: Option<String>,
}

fn default_server_name() -> String {
    "kgserve".to_string()
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            auth_token: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphBackend {
    #[default]
    Neo4j,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default)]
    pub backend: GraphBackend,

    #[serde(flatten)]
    pub neo4j: Neo4jConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    #[default]
    Redb,
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default)]
    pub backend: MemoryBackend,

    #[serde(default = "default_memory_file")]
    pub file: String,
}

fn default_memory_file() -> String {
    "memory.redb".to_string()
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::default(),
            file: default_memory_file(),
        }
    }
}

impl ServerConfig {
    pub fn load(config_path: &Path, data_dir: PathBuf) -> Result<Self> {
        // Create data directory if it doesn't exist
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        // Load config file if it exists, otherwise use defaults
        let mut config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            tracing::info!("Configuration file not found, using defaults");
            Self {
                data_dir: data_dir.clone(),
                server: Default::default(),
                graph: Default::default(),
                memory: Default::default(),
            }
        };

        config.data_dir = data_dir;

        Ok(config)
    }

    /// Get the key/value memory file path
    pub fn memory_path(&self) -> PathBuf {
        self.data_dir.join(&self.memory.file)
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub mcp: Arc<McpServer>,
    pub auth_token: Option<String>,
}

impl AppState {
    pub async fn new(config: &ServerConfig) -> Result<Self> {
        let graph_store: Arc<dyn GraphStore> = match config.graph.backend {
            GraphBackend::Neo4j => Arc::new(
                Neo4jGraphStore::connect(&config.graph.neo4j)
                    .await
                    .context("Failed to connect to Neo4j")?,
            ),
            GraphBackend::Memory => {
                tracing::warn!("Using in-memory knowledge graph; contents are lost on restart");
                Arc::new(InMemoryGraphStore::new())
            }
        };
        graph_store
            .ensure_schema()
            .await
            .context("Failed to prepare graph schema")?;

        let kv_store: Arc<dyn KvStore> = match config.memory.backend {
            MemoryBackend::Redb => Arc::new(
                RedbKvStore::new(config.memory_path()).context("Failed to open memory store")?,
            ),
            MemoryBackend::Memory => Arc::new(InMemoryKvStore::new()),
        };

        Ok(Self::from_stores(config, graph_store, kv_store))
    }

    pub fn from_stores(
        config: &ServerConfig,
        graph_store: Arc<dyn GraphStore>,
        kv_store: Arc<dyn KvStore>,
    ) -> Self {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register_all(memory_tools(kv_store));
        registry.register_all(graph_tools(graph_store));

        tracing::info!("Registered {} tools", registry.len());

        let mcp = McpServer::new(registry).with_name(config.server.name.clone());

        Self {
            mcp: Arc::new(mcp),
            auth_token: config.server.auth_token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_when_missing() {
        let temp_dir = TempDir::new().unwrap();
        let config = ServerConfig::load(
            &temp_dir.path().join("absent.toml"),
            temp_dir.path().join("data"),
        )
        .unwrap();

        assert_eq!(config.server.name, "kgserve");
        assert_eq!(config.graph.backend, GraphBackend::Neo4j);
        assert_eq!(config.graph.neo4j.uri, "127.0.0.1:7687");
        assert_eq!(config.memory_path(), temp_dir.path().join("data/memory.redb"));
        assert!(temp_dir.path().join("data").is_dir());
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("kgserve.toml");
        std::fs::write(
            &path,
            r#"
[server]
name = "team-memory"
auth_token = "s3cret"

[graph]
backend = "neo4j"
uri = "graph.internal:7687"
password = "pw"
database = "memory"

[memory]
backend = "memory"
"#,
        )
        .unwrap();

        let config = ServerConfig::load(&path, temp_dir.path().to_path_buf()).unwrap();
        assert_eq!(config.server.name, "team-memory");
        assert_eq!(config.server.auth_token.as_deref(), Some("s3cret"));
        assert_eq!(config.graph.neo4j.uri, "graph.internal:7687");
        assert_eq!(config.graph.neo4j.user, "neo4j");
        assert_eq!(config.graph.neo4j.database.as_deref(), Some("memory"));
        assert_eq!(config.memory.backend, MemoryBackend::Memory);
        assert_eq!(config.memory.file, "memory.redb");
    }

    #[test]
    fn test_invalid_backend_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("kgserve.toml");
        std::fs::write(&path, "[graph]\nbackend = \"postgres\"\n").unwrap();

        assert!(ServerConfig::load(&path, temp_dir.path().to_path_buf()).is_err());
    }

    #[tokio::test]
    async fn test_app_state_with_in_memory_backends() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = ServerConfig::load(
            &temp_dir.path().join("absent.toml"),
            temp_dir.path().to_path_buf(),
        )
        .unwrap();
        config.graph.backend = GraphBackend::Memory;

        let state = AppState::new(&config).await.unwrap();
        assert_eq!(state.mcp.registry().len(), 15);
        assert!(temp_dir.path().join("memory.redb").exists());
    }
}
