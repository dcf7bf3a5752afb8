// MCP server: JSON-RPC dispatch onto the tool registry

use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcError,
    JsonRpcRequest, JsonRpcResponse, ListToolsResult, ServerCapabilities, ServerInfo,
    ToolsCapability, JSONRPC_VERSION, PROTOCOL_VERSION, SUPPORTED_PROTOCOL_VERSIONS,
};
use crate::tools::ToolRegistry;
use anyhow::Result;
use bytes::BytesMut;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Decoder, FramedRead, FramedWrite, LinesCodec, LinesCodecError};

/// Longest single message accepted on the line transport
pub const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

/// One inbound line, or the marker left by a line that was too long
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Line(String),
    Oversized,
}

/// Line decoder that survives oversized lines.
///
/// `FramedRead` ends the stream after any decoder error, so the length error
/// is turned into a frame here. `LinesCodec` keeps discarding up to the next
/// newline on its own, after which decoding resumes.
struct MessageCodec {
    lines: LinesCodec,
}

impl MessageCodec {
    fn new(max_length: usize) -> Self {
        Self {
            lines: LinesCodec::new_with_max_length(max_length),
        }
    }

    fn frame(
        result: Result<Option<String>, LinesCodecError>,
    ) -> Result<Option<Frame>, LinesCodecError> {
        match result {
            Ok(line) => Ok(line.map(Frame::Line)),
            Err(LinesCodecError::MaxLineLengthExceeded) => Ok(Some(Frame::Oversized)),
            Err(e) => Err(e),
        }
    }
}

impl Decoder for MessageCodec {
    type Item = Frame;
    type Error = LinesCodecError;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        Self::frame(self.lines.decode(buf))
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Frame>, LinesCodecError> {
        Self::frame(self.lines.decode_eof(buf))
    }
}

pub struct McpServer {
    registry: Arc<ToolRegistry>,
    info: ServerInfo,
    instructions: Option<String>,
}

impl McpServer {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            info: ServerInfo {
                name: "kgserve".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: None,
        }
    }

    /// Name reported to clients in `serverInfo`
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.info.name = name.into();
        self
    }

    pub fn with_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn info(&self) -> &ServerInfo {
        &self.info
    }

    /// Handle one request. Notifications produce no response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let Some(id) = request.id else {
            if request.jsonrpc != JSONRPC_VERSION {
                tracing::warn!(method = %request.method, "Ignoring notification with bad jsonrpc version");
            } else {
                tracing::debug!(method = %request.method, "Received notification");
            }
            return None;
        };

        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(id, JsonRpcError::invalid_request()));
        }

        tracing::debug!(method = %request.method, id = %id, "Handling request");

        let response = match request.method.as_str() {
            "initialize" => self.initialize(id, request.params),
            "ping" => JsonRpcResponse::success(id, serde_json::json!({})),
            "tools/list" => JsonRpcResponse::from_result(
                id,
                &ListToolsResult {
                    tools: self.registry.list_schemas(),
                },
            ),
            "tools/call" => self.call_tool(id, request.params).await,
            other => JsonRpcResponse::error(id, JsonRpcError::method_not_found(other)),
        };
        Some(response)
    }

    fn initialize(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let requested = params
            .and_then(|p| serde_json::from_value::<InitializeParams>(p).ok())
            .map(|p| {
                tracing::info!(
                    client = %p.client_info.name,
                    version = %p.client_info.version,
                    protocol = %p.protocol_version,
                    "Client initializing"
                );
                p.protocol_version
            });

        let protocol_version = match requested {
            Some(v) if SUPPORTED_PROTOCOL_VERSIONS.contains(&v.as_str()) => v,
            _ => PROTOCOL_VERSION.to_string(),
        };

        JsonRpcResponse::from_result(
            id,
            &InitializeResult {
                protocol_version,
                capabilities: ServerCapabilities {
                    tools: Some(ToolsCapability {
                        list_changed: false,
                    }),
                },
                server_info: self.info.clone(),
                instructions: self.instructions.clone(),
            },
        )
    }

    async fn call_tool(&self, id: Value, params: Option<Value>) -> JsonRpcResponse {
        let params: CallToolParams = match params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            Some(Err(e)) => {
                return JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_params(format!("Invalid tools/call params: {}", e)),
                )
            }
            None => {
                return JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_params("Missing tools/call params"),
                )
            }
        };

        let Some(tool) = self.registry.get(&params.name) else {
            return JsonRpcResponse::error(
                id,
                JsonRpcError::invalid_params(format!("Unknown tool: {}", params.name)),
            );
        };

        let result = match tool.execute(params.arguments).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(tool = %params.name, error = %e, "Tool execution failed");
                CallToolResult::error(format!("{:#}", e))
            }
        };
        if result.is_error() {
            tracing::debug!(tool = %params.name, "Tool returned an error result");
        }

        JsonRpcResponse::from_result(id, &result)
    }

    /// Handle a decoded message: a single request or a batch.
    pub async fn handle_value(&self, message: Value) -> Option<Value> {
        match message {
            Value::Array(batch) if batch.is_empty() => Some(response_value(
                JsonRpcResponse::error(Value::Null, JsonRpcError::invalid_request()),
            )),
            Value::Array(batch) => {
                let mut responses = Vec::with_capacity(batch.len());
                for item in batch {
                    if let Some(response) = self.handle_single(item).await {
                        responses.push(response);
                    }
                }
                if responses.is_empty() {
                    None
                } else {
                    Some(Value::Array(responses))
                }
            }
            single => self.handle_single(single).await,
        }
    }

    async fn handle_single(&self, message: Value) -> Option<Value> {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        match serde_json::from_value::<JsonRpcRequest>(message) {
            Ok(request) => self.handle_request(request).await.map(response_value),
            Err(e) => {
                tracing::warn!(error = %e, "Invalid JSON-RPC request");
                Some(response_value(JsonRpcResponse::error(
                    id,
                    JsonRpcError::invalid_request(),
                )))
            }
        }
    }

    /// Handle a raw JSON text message, returning the serialized response if any
    pub async fn handle_message(&self, message: &str) -> Option<String> {
        let response = match serde_json::from_str::<Value>(message) {
            Ok(value) => self.handle_value(value).await?,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to parse message");
                response_value(JsonRpcResponse::error(
                    Value::Null,
                    JsonRpcError::parse_error(),
                ))
            }
        };
        Some(response.to_string())
    }

    /// Serve newline-delimited JSON-RPC on stdin/stdout until stdin closes
    pub async fn serve_stdio(&self) -> Result<()> {
        tracing::info!(tools = self.registry.len(), "MCP server listening on stdio");
        self.serve(tokio::io::stdin(), tokio::io::stdout()).await
    }

    /// Serve newline-delimited JSON-RPC over any reader/writer pair
    pub async fn serve<R, W>(&self, reader: R, writer: W) -> Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = FramedRead::new(reader, MessageCodec::new(MAX_MESSAGE_BYTES));
        let mut sink = FramedWrite::new(writer, LinesCodec::new());

        while let Some(frame) = lines.next().await {
            let line = match frame? {
                Frame::Line(line) => line,
                Frame::Oversized => {
                    tracing::warn!(max = MAX_MESSAGE_BYTES, "Dropping oversized message");
                    let error = JsonRpcError::invalid_request().with_data(serde_json::json!({
                        "reason": format!("message exceeds {} bytes", MAX_MESSAGE_BYTES)
                    }));
                    let response = response_value(JsonRpcResponse::error(Value::Null, error));
                    sink.send(response.to_string()).await?;
                    continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            if let Some(response) = self.handle_message(&line).await {
                sink.send(response).await?;
            }
        }

        tracing::info!("Input closed, MCP server stopping");
        Ok(())
    }
}

fn response_value(response: JsonRpcResponse) -> Value {
    serde_json::to_value(&response).unwrap_or_else(|e| {
        serde_json::json!({
            "jsonrpc": JSONRPC_VERSION,
            "id": Value::Null,
            "error": { "code": JsonRpcError::INTERNAL_ERROR, "message": e.to_string() }
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{graph_tools, memory_tools, EchoTool};
    use kgserve_core::{InMemoryGraphStore, InMemoryKvStore};

    fn server() -> McpServer {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        registry.register_all(memory_tools(Arc::new(InMemoryKvStore::new())));
        registry.register_all(graph_tools(Arc::new(InMemoryGraphStore::new())));
        McpServer::new(registry).with_name("test-server")
    }

    async fn request(server: &McpServer, method: &str, params: Option<Value>) -> JsonRpcResponse {
        server
            .handle_request(JsonRpcRequest::new(1, method, params))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_initialize() {
        let server = server();
        let response = request(
            &server,
            "initialize",
            Some(serde_json::json!({
                "protocolVersion": "2025-03-26",
                "capabilities": {},
                "clientInfo": {"name": "inspector", "version": "0.1"}
            })),
        )
        .await;

        let result = response.result.unwrap();
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["serverInfo"]["name"], "test-server");
        assert_eq!(result["capabilities"]["tools"]["listChanged"], false);
    }

    #[tokio::test]
    async fn test_initialize_unknown_version_falls_back() {
        let server = server();
        let response = request(
            &server,
            "initialize",
            Some(serde_json::json!({
                "protocolVersion": "1999-01-01",
                "clientInfo": {"name": "old"}
            })),
        )
        .await;
        assert_eq!(response.result.unwrap()["protocolVersion"], PROTOCOL_VERSION);
    }

    #[tokio::test]
    async fn test_tools_list() {
        let server = server();
        let response = request(&server, "tools/list", None).await;
        let result: ListToolsResult = serde_json::from_value(response.result.unwrap()).unwrap();

        assert_eq!(result.tools.len(), 15);
        let names: Vec<_> = result.tools.iter().map(|t| t.name.as_str()).collect();
        assert!(names.contains(&"echo"));
        assert!(names.contains(&"memory_set"));
        assert!(names.contains(&"search_nodes"));
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[tokio::test]
    async fn test_tools_call_echo() {
        let server = server();
        let response = request(
            &server,
            "tools/call",
            Some(serde_json::json!({"name": "echo", "arguments": {"text": "hi"}})),
        )
        .await;

        let result: CallToolResult = serde_json::from_value(response.result.unwrap()).unwrap();
        assert_eq!(result.content[0].as_text(), "hi");
    }

    #[tokio::test]
    async fn test_tools_call_errors() {
        let server = server();

        let unknown = request(
            &server,
            "tools/call",
            Some(serde_json::json!({"name": "nope", "arguments": {}})),
        )
        .await;
        assert_eq!(unknown.error.unwrap().code, JsonRpcError::INVALID_PARAMS);

        let missing = request(&server, "tools/call", None).await;
        assert_eq!(missing.error.unwrap().code, JsonRpcError::INVALID_PARAMS);

        let bad_args = request(
            &server,
            "tools/call",
            Some(serde_json::json!({"name": "echo", "arguments": {}})),
        )
        .await;
        let result: CallToolResult = serde_json::from_value(bad_args.result.unwrap()).unwrap();
        assert!(result.is_error());
    }

    #[tokio::test]
    async fn test_unknown_method_and_notifications() {
        let server = server();
        let response = request(&server, "resources/list", None).await;
        assert_eq!(response.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);

        let none = server
            .handle_request(JsonRpcRequest::notification("notifications/initialized"))
            .await;
        assert!(none.is_none());

        let ping = request(&server, "ping", None).await;
        assert_eq!(ping.result.unwrap(), serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_handle_message_errors() {
        let server = server();

        let parse = server.handle_message("{not json").await.unwrap();
        let value: Value = serde_json::from_str(&parse).unwrap();
        assert_eq!(value["error"]["code"], JsonRpcError::PARSE_ERROR);
        assert_eq!(value["id"], Value::Null);

        let wrong_version = server
            .handle_message(r#"{"jsonrpc":"1.0","id":7,"method":"ping"}"#)
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&wrong_version).unwrap();
        assert_eq!(value["error"]["code"], JsonRpcError::INVALID_REQUEST);
        assert_eq!(value["id"], 7);

        let no_method = server
            .handle_message(r#"{"jsonrpc":"2.0","id":3}"#)
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&no_method).unwrap();
        assert_eq!(value["error"]["code"], JsonRpcError::INVALID_REQUEST);
        assert_eq!(value["id"], 3);
    }

    #[tokio::test]
    async fn test_batch() {
        let server = server();
        let batch = serde_json::json!([
            {"jsonrpc": "2.0", "id": 1, "method": "ping"},
            {"jsonrpc": "2.0", "method": "notifications/initialized"},
            {"jsonrpc": "2.0", "id": 2, "method": "tools/call",
             "params": {"name": "echo", "arguments": {"text": "x"}}}
        ]);

        let responses = server.handle_value(batch).await.unwrap();
        assert_eq!(responses.as_array().unwrap().len(), 2);

        let only_notifications = serde_json::json!([
            {"jsonrpc": "2.0", "method": "notifications/initialized"}
        ]);
        assert!(server.handle_value(only_notifications).await.is_none());

        let empty = server.handle_value(serde_json::json!([])).await.unwrap();
        assert_eq!(empty["error"]["code"], JsonRpcError::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_null_id_gets_response() {
        let server = server();
        let response = server
            .handle_message(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#)
            .await
            .unwrap();
        let value: Value = serde_json::from_str(&response).unwrap();
        assert_eq!(value["id"], Value::Null);
        assert_eq!(value["result"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_bad_version_notification_is_silent() {
        let server = server();
        let response = server
            .handle_message(r#"{"jsonrpc":"1.0","method":"notifications/initialized"}"#)
            .await;
        assert!(response.is_none());
    }

    #[tokio::test]
    async fn test_serve_recovers_after_oversized_line() {
        let server = server();
        let filler = "x".repeat(MAX_MESSAGE_BYTES + 10);
        let input = format!(
            "{{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/call\",\"params\":{{\"name\":\"echo\",\"arguments\":{{\"text\":\"{}\"}}}}}}\n{}\n",
            filler, r#"{"jsonrpc":"2.0","id":2,"method":"ping"}"#
        );

        let mut output = Vec::new();
        server.serve(input.as_bytes(), &mut output).await.unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], Value::Null);
        assert_eq!(lines[0]["error"]["code"], JsonRpcError::INVALID_REQUEST);
        assert_eq!(lines[1]["id"], 2);
        assert_eq!(lines[1]["result"], serde_json::json!({}));
    }

    #[test]
    fn test_message_codec_resyncs() {
        let mut codec = MessageCodec::new(8);
        let mut buf = BytesMut::from("0123456789abcdef\nok\n");

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(Frame::Oversized));
        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(Frame::Line("ok".to_string()))
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[tokio::test]
    async fn test_serve_line_transport() {
        let server = server();
        let input = concat!(
            r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"t","version":"1"}}}"#,
            "\n",
            r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
            "\n\n",
            r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"memory_set","arguments":{"key":"k","value":"v"}}}"#,
            "\n",
        );

        let mut output = Vec::new();
        server.serve(input.as_bytes(), &mut output).await.unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["id"], 2);
        assert!(lines[1]["result"]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("\"value\": \"v\""));
    }
}
