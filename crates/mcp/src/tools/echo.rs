use crate::protocol::{CallToolResult, ToolSchema};
use crate::tools::{json_schema_object, json_schema_string, parse_args, Tool};
use anyhow::Result;
use serde::Deserialize;

/// Returns its input unchanged; useful for checking a client connection end to end
pub struct EchoTool;

#[derive(Debug, Deserialize)]
struct EchoArgs {
    text: String,
}

#[async_trait::async_trait]
impl Tool for EchoTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "echo".to_string(),
            description: "Echo tool - returns the input text unchanged".to_string(),
            input_schema: json_schema_object(
                serde_json::json!({
                    "text": json_schema_string("The text to echo back")
                }),
                vec!["text"],
            ),
        }
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<CallToolResult> {
        let args: EchoArgs = match parse_args("echo", arguments) {
            Ok(args) => args,
            Err(result) => return Ok(result),
        };
        Ok(CallToolResult::text(args.text))
    }
}
