//! Error types for MCP connections.

/// Errors from connecting to or calling an external tool server.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// The server executable does not exist.
    #[error("command not found: {0}")]
    NotFound(String),

    #[error("connection timed out after {0}s")]
    Timeout(u64),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or unexpected message from the server.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transport error: {0}")]
    Transport(std::io::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON-RPC error object returned by the server.
    #[error("server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("unknown server: {0}")]
    UnknownServer(String),

    #[error("server not connected: {0}")]
    NotConnected(String),

    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Foreground interrupt (e.g. Ctrl-C) observed during I/O.
    #[error("interrupted")]
    Interrupted,

    /// Several concurrent sub-operations failed.
    #[error("{}", join_errors(.0))]
    Aggregate(Vec<McpError>),
}

fn join_errors(errors: &[McpError]) -> String {
    let parts: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
    format!("{} errors: {}", errors.len(), parts.join("; "))
}

impl From<std::io::Error> for McpError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::Interrupted => McpError::Interrupted,
            _ => McpError::Transport(e),
        }
    }
}

impl McpError {
    /// Map a process spawn failure, naming the missing command.
    pub fn from_spawn(e: std::io::Error, command: &str) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => McpError::NotFound(command.to_string()),
            _ => McpError::from(e),
        }
    }

    /// True for `Cancelled`, including inside an aggregate.
    pub fn is_cancelled(&self) -> bool {
        match self {
            McpError::Cancelled => true,
            McpError::Aggregate(v) => v.iter().any(McpError::is_cancelled),
            _ => false,
        }
    }

    /// True for `Interrupted`, including inside an aggregate.
    pub fn is_interrupted(&self) -> bool {
        match self {
            McpError::Interrupted => true,
            McpError::Aggregate(v) => v.iter().any(McpError::is_interrupted),
            _ => false,
        }
    }

    /// Errors in the send/receive exchange with a server, as opposed to
    /// unexpected local failures.
    pub fn is_protocol(&self) -> bool {
        matches!(
            self,
            McpError::Json(_)
                | McpError::Protocol(_)
                | McpError::Transport(_)
                | McpError::Http(_)
                | McpError::Server { .. }
                | McpError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_found_inside_aggregates() {
        let e = McpError::Aggregate(vec![
            McpError::Protocol("bad".into()),
            McpError::Aggregate(vec![McpError::Cancelled]),
        ]);
        assert!(e.is_cancelled());
        assert!(!McpError::Aggregate(vec![McpError::Protocol("x".into())]).is_cancelled());
    }

    #[test]
    fn io_interrupted_maps_to_interrupted() {
        let e: McpError = std::io::Error::from(std::io::ErrorKind::Interrupted).into();
        assert!(e.is_interrupted());
        let e: McpError = std::io::Error::from(std::io::ErrorKind::BrokenPipe).into();
        assert!(e.is_protocol());
    }

    #[test]
    fn spawn_not_found_names_the_command() {
        let e = McpError::from_spawn(std::io::Error::from(std::io::ErrorKind::NotFound), "mcp-x");
        assert_eq!(e.to_string(), "command not found: mcp-x");
    }

    #[test]
    fn aggregate_display_lists_members() {
        let e = McpError::Aggregate(vec![McpError::Cancelled, McpError::Timeout(3)]);
        assert_eq!(
            e.to_string(),
            "2 errors: operation cancelled; connection timed out after 3s"
        );
    }
}
