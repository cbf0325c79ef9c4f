//! # Index Client
//!
//! Purpose: Execute search-index commands against whatever deployment the
//! client was built for.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `IndexClient` hides providers, handles and command
//!    shaping behind `execute` and a few typed helpers.
//! 2. **Scoped Release**: Every handle is held through a `Lease`, which gives
//!    it back to its provider when dropped, whether the send succeeded,
//!    failed, or unwound.
//! 3. **No Hidden Retries**: Pool exhaustion and transport failures reach the
//!    caller unchanged; retry policy belongs to a wrapper.

use std::ops::{Deref, DerefMut};

use bytes::Bytes;
use tracing::{debug, info};

use hsearch_common::{ClientConfig, ClientError, ClientResult, Endpoint, Target};

use crate::handle::ConnectionHandle;
use crate::provider::{
    ConnectionProvider, DirectPoolProvider, FailoverPoolProvider, SingleConnectionProvider,
};
use crate::resp::RespValue;
use crate::topology::{
    Command, CommandTopology, IndexCommand, ShapedCommand, SingleNodeTopology, TargetHint,
};

/// A handle on loan from a provider, released when dropped.
pub struct Lease<'a> {
    provider: &'a dyn ConnectionProvider,
    handle: Option<ConnectionHandle>,
}

impl<'a> Lease<'a> {
    pub fn acquire(provider: &'a dyn ConnectionProvider) -> ClientResult<Self> {
        let handle = provider.acquire()?;
        Ok(Lease {
            provider,
            handle: Some(handle),
        })
    }
}

impl Deref for Lease<'_> {
    type Target = ConnectionHandle;

    fn deref(&self) -> &ConnectionHandle {
        self.handle.as_ref().expect("lease holds a handle until dropped")
    }
}

impl DerefMut for Lease<'_> {
    fn deref_mut(&mut self) -> &mut ConnectionHandle {
        self.handle.as_mut().expect("lease holds a handle until dropped")
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.provider.release(handle);
        }
    }
}

/// Client bound to one search index.
pub struct IndexClient {
    index_name: String,
    provider: Box<dyn ConnectionProvider>,
    topology: Box<dyn CommandTopology>,
}

impl IndexClient {
    /// Builds a pooled client: a direct pool for `Target::Direct`, a
    /// failover pool for `Target::Sentinel`.
    pub fn connect(config: ClientConfig) -> ClientResult<Self> {
        config.validate()?;
        let pool = config.pool_config();
        info!(
            index = %config.index_name,
            target = %config.target.describe(),
            pool_size = pool.max_size,
            "building index client"
        );
        let provider: Box<dyn ConnectionProvider> = match config.target {
            Target::Direct(endpoint) => Box::new(DirectPoolProvider::new(endpoint, pool)?),
            Target::Sentinel {
                master_name,
                sentinels,
            } => Box::new(FailoverPoolProvider::new(master_name, sentinels, pool)?),
        };
        Ok(Self::with_parts(
            config.index_name,
            provider,
            Box::new(SingleNodeTopology),
        ))
    }

    /// Client that opens a fresh connection per command, for runtimes where
    /// pooling is not available.
    pub fn single_connection(index_name: impl Into<String>, endpoint: Endpoint) -> Self {
        Self::with_parts(
            index_name,
            Box::new(SingleConnectionProvider::new(endpoint)),
            Box::new(SingleNodeTopology),
        )
    }

    /// Client over a caller-supplied provider and topology.
    pub fn with_parts(
        index_name: impl Into<String>,
        provider: Box<dyn ConnectionProvider>,
        topology: Box<dyn CommandTopology>,
    ) -> Self {
        IndexClient {
            index_name: index_name.into(),
            provider,
            topology,
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    pub fn provider(&self) -> &dyn ConnectionProvider {
        self.provider.as_ref()
    }

    /// Runs one logical command and returns the aggregated reply.
    ///
    /// Server `-ERR` replies are returned as `RespValue::Error`.
    pub fn execute<I, A>(&self, command: IndexCommand, args: I) -> ClientResult<RespValue>
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        let args: Vec<Bytes> = args.into_iter().map(Into::into).collect();
        let shaped = self.topology.shape(&self.index_name, command, args);
        debug!(
            index = %self.index_name,
            topology = self.topology.name(),
            commands = shaped.len(),
            "executing {}",
            command.wire_name()
        );

        let mut replies = Vec::with_capacity(shaped.len());
        for ShapedCommand { command, target } in shaped {
            let mut lease = Lease::acquire(self.provider_for(&target))?;
            replies.push(lease.send(&command)?);
        }
        self.topology.aggregate(replies)
    }

    /// Borrows a handle directly, e.g. for commands outside the index set.
    pub fn lease(&self) -> ClientResult<Lease<'_>> {
        Lease::acquire(self.provider.as_ref())
    }

    // Single provider today; a sharded topology would pick per hint.
    fn provider_for(&self, _target: &TargetHint) -> &dyn ConnectionProvider {
        self.provider.as_ref()
    }

    /// Returns the `FT.INFO` reply.
    pub fn info(&self) -> ClientResult<RespValue> {
        self.execute(IndexCommand::Info, Vec::<Bytes>::new())?.into_result()
    }

    /// Runs a query; the query string and options are passed through
    /// verbatim.
    pub fn search<I, A>(&self, query: impl Into<Bytes>, options: I) -> ClientResult<RespValue>
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        let query: Bytes = query.into();
        let args = std::iter::once(query).chain(options.into_iter().map(Into::<Bytes>::into));
        self.execute(IndexCommand::Search, args)?.into_result()
    }

    /// Returns the execution plan the server builds for `query`.
    pub fn explain(&self, query: impl Into<Bytes>) -> ClientResult<String> {
        let query: Bytes = query.into();
        let reply = self.execute(IndexCommand::Explain, [query])?.into_result()?;
        reply
            .as_text()
            .map(str::to_owned)
            .ok_or(ClientError::UnexpectedResponse)
    }

    /// Fetches one document's fields; `Bulk(None)`/null when missing.
    pub fn get_document(&self, doc_id: impl Into<Bytes>) -> ClientResult<RespValue> {
        let doc_id: Bytes = doc_id.into();
        self.execute(IndexCommand::Get, [doc_id])?.into_result()
    }

    /// Removes a document from the index, optionally deleting its hash too.
    /// Returns whether the document existed.
    pub fn delete_document(
        &self,
        doc_id: impl Into<Bytes>,
        delete_hash: bool,
    ) -> ClientResult<bool> {
        let mut args: Vec<Bytes> = vec![doc_id.into()];
        if delete_hash {
            args.push(Bytes::from_static(b"DD"));
        }
        match self.execute(IndexCommand::Delete, args)?.into_result()? {
            RespValue::Integer(count) => Ok(count == 1),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Drops the index.
    pub fn drop_index(&self) -> ClientResult<()> {
        match self.execute(IndexCommand::Drop, Vec::<Bytes>::new())?.into_result()? {
            RespValue::Simple(_) => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Round-trips a `PING` on a leased handle.
    pub fn ping(&self) -> ClientResult<()> {
        let mut lease = self.lease()?;
        match lease.send(&Command::new("PING"))?.into_result()? {
            reply if reply.as_text() == Some("PONG") => Ok(()),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Shuts the provider down. Handles already leased may still finish.
    pub fn close(&self) {
        self.provider.shutdown();
    }
}
