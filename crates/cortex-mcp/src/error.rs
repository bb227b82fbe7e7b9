use thiserror::Error;

#[derive(Debug, Error)]
pub enum McpError {
    /// Transport-level failure: spawn, connect, or stream closed.
    #[error("connection error: {0}")]
    Connection(String),

    /// JSON-RPC error object from the server.
    #[error("JSON-RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// `isError` response from `tools/call` — the transport worked, the
    /// tool itself failed.
    #[error("{0}")]
    ToolCall(String),

    #[error("timeout on {0}")]
    Timeout(String),
}
