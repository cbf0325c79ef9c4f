//! # Connection Providers
//!
//! Purpose: Decide how a connection is obtained. Everything above this layer
//! holds a `ConnectionProvider` and never learns which variant it has.
//!
//! ## Variants
//! - `DirectPoolProvider`: bounded pool against one fixed endpoint.
//! - `FailoverPoolProvider`: the same pool, retargeted when a monitored master
//!   fails over.
//! - `SingleConnectionProvider`: one fresh connection per acquire, no pooling.
//!
//! ## Lifecycle
//! Pooled providers move `Active` → `Draining` (after `shutdown`, until every
//! outstanding handle is released) → `Closed`.

mod discovery;
mod failover;
mod pool;
mod single;

pub use discovery::{Discovery, MasterChanged, SentinelDiscovery, Subscription};
pub use failover::FailoverPoolProvider;
pub use pool::DirectPoolProvider;
pub use single::SingleConnectionProvider;

use hsearch_common::{ClientResult, Endpoint};

use crate::handle::ConnectionHandle;

/// Lifecycle phase of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    /// Serving acquire and release.
    Active,
    /// Shut down; refusing acquires while outstanding handles come back.
    Draining,
    /// Terminal.
    Closed,
}

/// Point-in-time counters for a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub idle: usize,
    pub outstanding: usize,
    /// Callers currently blocked in `acquire`.
    pub waiting: usize,
    pub max_size: usize,
}

/// Supplies connection handles on demand.
///
/// Implementations are internally synchronized; `acquire` is the only call
/// that may block.
pub trait ConnectionProvider: Send + Sync {
    /// Hands out an exclusively owned handle.
    fn acquire(&self) -> ClientResult<ConnectionHandle>;

    /// Takes a handle back. Pooled variants may reuse it; broken, closed or
    /// retargeted handles are closed instead.
    fn release(&self, handle: ConnectionHandle);

    /// Stops serving acquires. Outstanding handles may still be released.
    fn shutdown(&self);

    fn state(&self) -> ProviderState;

    /// Endpoint new connections are currently opened against.
    fn endpoint(&self) -> Endpoint;

    fn status(&self) -> PoolStatus;
}
