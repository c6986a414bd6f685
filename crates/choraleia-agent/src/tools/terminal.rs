//! Terminal tools: shell access through the session multiplexer's sentinel
//! protocols.

use std::sync::Arc;

use async_trait::async_trait;
use choraleia_core::config::{READ_FILE_MAX_BYTES, TOOL_EXEC_DEFAULT_TIMEOUT_SECS};
use choraleia_terminal::{exec, SessionId, TerminalManager};
use serde_json::{json, Value};

use super::{Tool, ToolResult};

fn session_from(args: &Value, manager: &TerminalManager) -> Result<Arc<choraleia_terminal::TermSession>, ToolResult> {
    let Some(terminal_id) = args.get("terminal_id").and_then(|v| v.as_str()) else {
        return Err(ToolResult::error("missing required parameter: terminal_id"));
    };
    manager
        .get(&SessionId::from(terminal_id))
        .map_err(|e| ToolResult::error(e.to_string()))
}

// ---------------------------------------------------------------------------
// terminal_get_output
// ---------------------------------------------------------------------------

pub struct GetOutputTool {
    manager: Arc<TerminalManager>,
}

impl GetOutputTool {
    pub fn new(manager: Arc<TerminalManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for GetOutputTool {
    fn name(&self) -> &str {
        "terminal_get_output"
    }

    fn description(&self) -> &str {
        "Read the most recent output lines from a terminal session. Returns an \
         empty string when the session has produced no output."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "terminal_id": { "type": "string", "description": "Target session id." },
                "lines": { "type": "integer", "description": "How many trailing lines to return.", "default": 50 }
            },
            "required": ["terminal_id"]
        })
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let session = match session_from(&args, &self.manager) {
            Ok(s) => s,
            Err(e) => return e,
        };
        let lines = args.get("lines").and_then(|v| v.as_u64()).unwrap_or(50) as usize;
        ToolResult::success(exec::get_output(&session, lines))
    }
}

// ---------------------------------------------------------------------------
// terminal_exec_command
// ---------------------------------------------------------------------------

pub struct ExecCommandTool {
    manager: Arc<TerminalManager>,
}

impl ExecCommandTool {
    pub fn new(manager: Arc<TerminalManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for ExecCommandTool {
    fn name(&self) -> &str {
        "terminal_exec_command"
    }

    fn description(&self) -> &str {
        "Run a shell command in a terminal session and wait for it to finish. \
         Returns the exit code and captured output. Long-running commands are \
         interrupted with Ctrl+C when the timeout expires."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "terminal_id": { "type": "string", "description": "Target session id." },
                "command": { "type": "string", "description": "Command line to run." },
                "timeout_seconds": { "type": "integer", "default": TOOL_EXEC_DEFAULT_TIMEOUT_SECS }
            },
            "required": ["terminal_id", "command"]
        })
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let session = match session_from(&args, &self.manager) {
            Ok(s) => s,
            Err(e) => return e,
        };
        let Some(command) = args.get("command").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: command");
        };
        let timeout = args
            .get("timeout_seconds")
            .and_then(|v| v.as_u64())
            .unwrap_or(TOOL_EXEC_DEFAULT_TIMEOUT_SECS);

        match exec::exec_command(&session, command, timeout).await {
            Ok(result) => ToolResult::success(result.render()),
            Err(e) => ToolResult::error(format!("exec failed: {e}")),
        }
    }
}

// ---------------------------------------------------------------------------
// terminal_read_file
// ---------------------------------------------------------------------------

pub struct ReadFileTool {
    manager: Arc<TerminalManager>,
}

impl ReadFileTool {
    pub fn new(manager: Arc<TerminalManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "terminal_read_file"
    }

    fn description(&self) -> &str {
        "Read a file through the terminal session. Output is capped; oversized \
         files end with a truncation marker."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "terminal_id": { "type": "string" },
                "path": { "type": "string", "description": "Absolute or cwd-relative file path." },
                "max_bytes": { "type": "integer", "default": READ_FILE_MAX_BYTES }
            },
            "required": ["terminal_id", "path"]
        })
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let session = match session_from(&args, &self.manager) {
            Ok(s) => s,
            Err(e) => return e,
        };
        let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: path");
        };
        let max_bytes = args
            .get("max_bytes")
            .and_then(|v| v.as_u64())
            .unwrap_or(READ_FILE_MAX_BYTES as u64) as usize;

        match exec::read_file(&session, path, max_bytes, TOOL_EXEC_DEFAULT_TIMEOUT_SECS).await {
            Ok(result) if result.exit_code == 0 => ToolResult::success(result.render()),
            Ok(result) => ToolResult::error(result.render()),
            Err(e) => ToolResult::error(format!("read failed: {e}")),
        }
    }
}

// ---------------------------------------------------------------------------
// terminal_write_file
// ---------------------------------------------------------------------------

pub struct WriteFileTool {
    manager: Arc<TerminalManager>,
}

impl WriteFileTool {
    pub fn new(manager: Arc<TerminalManager>) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "terminal_write_file"
    }

    fn description(&self) -> &str {
        "Write content to a file through the terminal session using a heredoc. \
         Set overwrite=false to append instead of replacing."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "terminal_id": { "type": "string" },
                "path": { "type": "string" },
                "content": { "type": "string" },
                "overwrite": { "type": "boolean", "default": true }
            },
            "required": ["terminal_id", "path", "content"]
        })
    }

    async fn invoke(&self, args: Value) -> ToolResult {
        let session = match session_from(&args, &self.manager) {
            Ok(s) => s,
            Err(e) => return e,
        };
        let Some(path) = args.get("path").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: path");
        };
        let Some(content) = args.get("content").and_then(|v| v.as_str()) else {
            return ToolResult::error("missing required parameter: content");
        };
        let overwrite = args
            .get("overwrite")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        match exec::write_file(
            &session,
            path,
            content,
            overwrite,
            TOOL_EXEC_DEFAULT_TIMEOUT_SECS,
        )
        .await
        {
            Ok(result) if result.success => ToolResult::success(result.render()),
            Ok(result) => ToolResult::error(result.render()),
            Err(e) => ToolResult::error(format!("write failed: {e}")),
        }
    }
}
