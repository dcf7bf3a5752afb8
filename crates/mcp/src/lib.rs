// MCP (Model Context Protocol) server implementation
// Exposes echo, key/value memory and knowledge graph tools to remote clients

pub mod protocol;
pub mod server;
pub mod tools;

pub use server::McpServer;
