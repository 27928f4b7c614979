//! Network layer error types.

/// Unified error type for the Conductor network layer.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// No endpoint is registered for the tool.
    #[error("no endpoint registered for tool: {tool_id}")]
    UnknownEndpoint { tool_id: String },

    /// An HTTP request failed at the transport level.
    #[error("http transport error for {url}: {reason}")]
    Http { url: String, reason: String },

    /// The tool server answered with a non-success status.
    #[error("tool host returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// A response body could not be decoded.
    #[error("malformed response from {url}: {reason}")]
    Decode { url: String, reason: String },

    /// The WebSocket connection to the tool host failed.
    #[error("websocket error: {reason}")]
    WebSocket { reason: String },

    /// A URL could not be parsed.
    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Convenience alias used throughout the network crate.
pub type Result<T> = std::result::Result<T, NetError>;
