//! # HybridSearch Client
//!
//! Purpose: Connection management and command dispatch for a search index
//! hosted on a Redis-compatible store.
//!
//! ## Design Principles
//! 1. **Strategy Pattern**: How connections are obtained (`ConnectionProvider`)
//!    and how commands are shaped (`CommandTopology`) are both traits, so the
//!    `IndexClient` facade never branches on deployment type.
//! 2. **Object Pool Pattern**: Pooled providers reuse connections behind a
//!    mutex-guarded free set with bounded, optionally fair waits.
//! 3. **Transparent Failover**: The sentinel-backed pool follows master
//!    switches without surfacing them as errors.
//! 4. **Opaque Payloads**: Queries and replies pass through untouched.

mod client;
mod handle;
mod provider;
mod resp;
mod topology;
mod transport;

pub use client::{IndexClient, Lease};
pub use handle::ConnectionHandle;
pub use provider::{
    ConnectionProvider, DirectPoolProvider, Discovery, FailoverPoolProvider, MasterChanged,
    PoolStatus, ProviderState, SentinelDiscovery, SingleConnectionProvider, Subscription,
};
pub use resp::RespValue;
pub use topology::{
    Command, CommandTopology, IndexCommand, Qualifier, ShapedCommand, SingleNodeTopology,
    TargetHint,
};
pub use transport::{Connector, TcpConnector, Transport};

pub use hsearch_common::{
    ClientConfig, ClientError, ClientResult, Endpoint, EvictionPolicy, EvictionRunSize,
    PoolConfig, ProbePolicy, Target,
};
