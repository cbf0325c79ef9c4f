//! # Single Connection Provider
//!
//! Purpose: Serve platforms where pooling is unavailable or unwanted. Every
//! `acquire` opens a brand-new connection and closes whichever handle this
//! provider handed out before; `release` closes immediately. At most one
//! live handle exists per provider, at the price of a connect per command.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info};

use hsearch_common::{ClientError, ClientResult, Endpoint};

use crate::handle::{ConnectionHandle, HandleCloser};
use crate::provider::{ConnectionProvider, PoolStatus, ProviderState};
use crate::transport::{Connector, TcpConnector};

/// Socket timeout used when the caller does not supply a connector.
const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(2);

struct SingleState {
    phase: ProviderState,
    live: Option<HandleCloser>,
}

/// One connection at a time, recreated on each acquire.
pub struct SingleConnectionProvider {
    endpoint: Endpoint,
    connector: Arc<dyn Connector>,
    state: Mutex<SingleState>,
}

impl SingleConnectionProvider {
    pub fn new(endpoint: Endpoint) -> Self {
        let connector = TcpConnector {
            credentials: None,
            connect_timeout: Some(DEFAULT_SOCKET_TIMEOUT),
            io_timeout: Some(DEFAULT_SOCKET_TIMEOUT),
        };
        Self::with_connector(endpoint, Arc::new(connector))
    }

    pub fn with_connector(endpoint: Endpoint, connector: Arc<dyn Connector>) -> Self {
        SingleConnectionProvider {
            endpoint,
            connector,
            state: Mutex::new(SingleState {
                phase: ProviderState::Active,
                live: None,
            }),
        }
    }
}

impl ConnectionProvider for SingleConnectionProvider {
    fn acquire(&self) -> ClientResult<ConnectionHandle> {
        // Held across the connect so two callers cannot both end up live.
        let mut state = self.state.lock();
        if state.phase != ProviderState::Active {
            return Err(ClientError::ProviderShutdown {
                endpoint: self.endpoint.clone(),
            });
        }

        if let Some(previous) = state.live.take() {
            if previous.close() {
                debug!(handle = previous.id(), "closed previous single connection");
            }
        }

        let handle = ConnectionHandle::new(self.connector.connect(&self.endpoint)?);
        state.live = Some(handle.closer());
        Ok(handle)
    }

    fn release(&self, handle: ConnectionHandle) {
        {
            let mut state = self.state.lock();
            if state.live.as_ref().map(HandleCloser::id) == Some(handle.id()) {
                state.live = None;
            }
        }
        handle.close();
    }

    fn shutdown(&self) {
        let live = {
            let mut state = self.state.lock();
            if state.phase == ProviderState::Closed {
                return;
            }
            state.phase = ProviderState::Closed;
            state.live.take()
        };
        if let Some(live) = live {
            live.close();
        }
        info!(endpoint = %self.endpoint, "single connection provider shut down");
    }

    fn state(&self) -> ProviderState {
        self.state.lock().phase
    }

    fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        let outstanding = state.live.as_ref().map_or(0, |live| usize::from(live.is_open()));
        PoolStatus {
            idle: 0,
            outstanding,
            waiting: 0,
            max_size: 1,
        }
    }
}

impl Drop for SingleConnectionProvider {
    fn drop(&mut self) {
        self.shutdown();
    }
}
