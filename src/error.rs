use std::fmt;

/// Errors raised by the framework core.
///
/// Registration-time errors (`RouteConflict`, `UnknownMethod`) are fatal at
/// startup. Request-time errors never cross the connection boundary: they are
/// converted into HTTP responses by the connection loop.
#[derive(Debug)]
pub enum ServerError {
    /// A route parameter name disagrees with the name already registered at
    /// the same position. Carries the byte offset of the divergence inside
    /// the new pattern together with both names.
    RouteConflict {
        position: usize,
        existing: String,
        proposed: String,
    },
    /// Registration targeted a method outside the recognized set.
    UnknownMethod(String),
    /// Request line or headers could not be parsed.
    MalformedRequest(String),
    /// A chunked body carried an unparsable chunk-size line.
    BadChunk(String),
    /// TLS listener material could not be loaded.
    Tls(String),
    Config(String),
    Io(std::io::Error),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerError::RouteConflict {
                position,
                existing,
                proposed,
            } => write!(
                f,
                "route conflict at byte {}: parameter ':{}' is already registered here, got ':{}'",
                position, existing, proposed
            ),
            ServerError::UnknownMethod(m) => write!(f, "unknown HTTP method: {}", m),
            ServerError::MalformedRequest(msg) => write!(f, "malformed request: {}", msg),
            ServerError::BadChunk(msg) => write!(f, "bad chunk: {}", msg),
            ServerError::Tls(msg) => write!(f, "tls error: {}", msg),
            ServerError::Config(msg) => write!(f, "config error: {}", msg),
            ServerError::Io(e) => write!(f, "io error: {}", e),
        }
    }
}

impl std::error::Error for ServerError {}

impl From<std::io::Error> for ServerError {
    fn from(e: std::io::Error) -> Self {
        ServerError::Io(e)
    }
}
