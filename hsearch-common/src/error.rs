//! # Error Taxonomy
//!
//! One error type for every provider and the client facade. Each variant
//! carries the endpoint or operation it came from.

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::endpoint::Endpoint;

/// Result type for the search client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by connection providers and the index client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No handle became available within the acquire timeout.
    #[error("connection pool for {endpoint} exhausted after waiting {waited:?}")]
    PoolExhausted { endpoint: Endpoint, waited: Duration },

    /// The underlying session is broken (reset, stale, unreachable peer).
    #[error("transport error on {endpoint} during {operation}: {source}")]
    Transport {
        endpoint: Endpoint,
        operation: &'static str,
        #[source]
        source: io::Error,
    },

    /// Reply framing from the peer could not be parsed.
    #[error("protocol error from {endpoint}")]
    Protocol { endpoint: Endpoint },

    /// A handle was used after `close()`.
    #[error("connection handle #{id} used after close")]
    ClosedHandle { id: u64 },

    /// `acquire` was attempted after the provider began shutting down.
    #[error("connection provider for {endpoint} has been shut down")]
    ProviderShutdown { endpoint: Endpoint },

    /// The server answered with an error reply.
    #[error("server error: {message}")]
    Server { message: String },

    /// The reply type did not match the command.
    #[error("unexpected response")]
    UnexpectedResponse,

    /// Address could not be parsed into an endpoint.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// No sentinel could name the current master.
    #[error("no sentinel could resolve master '{master_name}'")]
    MasterUnresolved { master_name: String },
}

impl ClientError {
    pub fn transport(endpoint: &Endpoint, operation: &'static str, source: io::Error) -> Self {
        ClientError::Transport {
            endpoint: endpoint.clone(),
            operation,
            source,
        }
    }

    /// Whether a caller may reasonably retry after this error.
    ///
    /// Exhaustion and broken sessions are transient; closed-handle misuse,
    /// shutdown and configuration problems are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ClientError::PoolExhausted { .. }
                | ClientError::Transport { .. }
                | ClientError::Protocol { .. }
                | ClientError::MasterUnresolved { .. }
        )
    }

    /// True for a read/write that hit the socket timeout rather than a reset.
    pub fn is_timeout(&self) -> bool {
        match self {
            ClientError::Transport { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}
