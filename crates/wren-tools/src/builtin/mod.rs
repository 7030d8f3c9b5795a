// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod clock;
pub mod delete_file;
pub mod list_dir;
pub mod read_file;
pub mod shell;
pub mod write;

pub use clock::GetCurrentTimeTool;
pub use delete_file::DeleteFileTool;
pub use list_dir::ListDirTool;
pub use read_file::ReadFileTool;
pub use shell::BashTool;
pub use write::WriteFileTool;

use crate::{ToolCall, ToolOutput, ToolRegistry};

/// Register every built-in tool.
pub fn register_builtins(reg: &mut ToolRegistry) {
    reg.register(GetCurrentTimeTool);
    reg.register(ReadFileTool);
    reg.register(ListDirTool);
    reg.register(WriteFileTool);
    reg.register(DeleteFileTool);
    reg.register(BashTool::default());
}

/// Fetch a required string argument or build the error output the model
/// sees when it is missing.
pub(crate) fn required_str<'a>(call: &'a ToolCall, key: &str) -> Result<&'a str, ToolOutput> {
    call.args.get(key).and_then(|v| v.as_str()).ok_or_else(|| {
        let args_preview =
            serde_json::to_string(&call.args).unwrap_or_else(|_| "null".to_string());
        ToolOutput::err(
            &call.id,
            format!("missing required parameter '{key}'. Received: {args_preview}"),
        )
    })
}
