//! Error types for netconf-client.

use thiserror::Error;

/// Severity of a single `<rpc-error>` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Severity {
    /// Operation failed.
    #[default]
    Error,
    /// Operation succeeded but the server wants to tell us something.
    Warning,
}

impl Severity {
    /// Parse the wire value. Unknown values are treated as `Error`.
    pub fn parse(s: &str) -> Self {
        match s {
            "warning" => Severity::Warning,
            _ => Severity::Error,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
        }
    }
}

/// A structured error record extracted from an `<rpc-error>` element
/// inside an `<rpc-reply>`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RpcError {
    /// `<error-severity>`: error or warning.
    pub severity: Severity,
    /// `<error-tag>`: the RFC 6241 Appendix A error tag (e.g. "operation-failed").
    pub tag: String,
    /// `<error-type>`: protocol layer the error originated from.
    pub error_type: String,
    /// `<error-path>`: absolute path to the offending element, if reported.
    pub path: Option<String>,
    /// `<error-message>`: human readable description, if reported.
    pub message: Option<String>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.severity.as_str())?;
        if !self.tag.is_empty() {
            write!(f, " [{}]", self.tag)?;
        }
        if let Some(path) = &self.path {
            write!(f, " at {}", path)?;
        }
        if let Some(msg) = &self.message {
            write!(f, ": {}", msg)?;
        }
        Ok(())
    }
}

fn display_rpc_errors(errors: &[RpcError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Main error type for all netconf-client operations.
#[derive(Debug, Error)]
pub enum NetconfError {
    /// I/O error on the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// XML encode/decode error.
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// Wire framing violation (bad chunk header, truncated stream, etc.).
    /// Always fatal for the session.
    #[error("framing error: {0}")]
    Framing(String),

    /// Capability exchange failed; the session never reached the open state.
    #[error("handshake failed: {0}")]
    Handshake(String),

    /// The session is closed. Pending calls resolve with this error and
    /// new calls fail immediately.
    #[error("session closed")]
    SessionClosed,

    /// Caller-side deadline fired while waiting for a reply. The request
    /// may still execute on the server.
    #[error("rpc timed out")]
    Timeout,

    /// Invalid caller-supplied options or identifiers. Never reaches the wire.
    #[error("validation error: {0}")]
    Validation(String),

    /// The server answered with one or more `<rpc-error>` records.
    /// Only the issuing call fails; the session stays open.
    #[error("rpc failed: {}", display_rpc_errors(.0))]
    Rpc(Vec<RpcError>),
}

impl NetconfError {
    /// True for failures that terminate the session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NetconfError::Io(_)
                | NetconfError::Framing(_)
                | NetconfError::Handshake(_)
                | NetconfError::SessionClosed
        )
    }
}

/// Result type alias using NetconfError.
pub type Result<T> = std::result::Result<T, NetconfError>;
