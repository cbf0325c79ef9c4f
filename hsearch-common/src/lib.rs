// hsearch-common - Shared types for the HybridSearch client
//
// Endpoints, pool/client configuration and the error taxonomy used by every
// connection provider.

pub mod config;
pub mod endpoint;
pub mod error;

// Re-export for convenience
pub use config::*;
pub use endpoint::*;
pub use error::*;
