pub mod echo;
pub mod graph;
pub mod memory;
mod registry;

pub use echo::EchoTool;
pub use graph::graph_tools;
pub use memory::memory_tools;
pub use registry::{
    json_schema_array, json_schema_object, json_schema_string, parse_args, Tool, ToolRegistry,
};

use crate::protocol::CallToolResult;
use kgserve_core::StoreError;

/// Errors caused by the caller's arguments become `isError` results; backend
/// failures propagate.
pub(crate) fn client_error(err: StoreError) -> anyhow::Result<CallToolResult> {
    if err.is_client_error() {
        Ok(CallToolResult::error(err.to_string()))
    } else {
        Err(err.into())
    }
}
