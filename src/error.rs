use crate::{exception::parse_exception_bytes, ServerException};

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum ClickHouseError {
    /// Network or request execution error from `reqwest`, including
    /// timeouts and aborted connections.
    #[error("transport error: {0}")]
    Transport(reqwest::Error),
    /// Non-success HTTP status code with the decoded server exception.
    #[error("server error {status}: {exception}")]
    Server {
        status: u16,
        exception: ServerException,
    },
    /// Response body does not match the declared JSON-family format.
    #[error("decode error: {0}")]
    Decode(String),
    /// Invalid configuration or misuse of a channel, raised before any
    /// network activity.
    #[error("usage error: {0}")]
    Usage(String),
    /// The other half of a record channel is gone.
    #[error("record channel closed")]
    Closed,
}

impl ClickHouseError {
    pub(crate) fn server(status: u16, body: &[u8]) -> Self {
        Self::Server {
            status,
            exception: parse_exception_bytes(body),
        }
    }

    /// Returns the decoded server exception for [`ClickHouseError::Server`].
    pub fn exception(&self) -> Option<&ServerException> {
        match self {
            Self::Server { exception, .. } => Some(exception),
            _ => None,
        }
    }
}
