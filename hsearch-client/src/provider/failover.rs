//! # Failover Pool
//!
//! Purpose: A direct pool whose endpoint follows a sentinel-monitored master.
//!
//! ## Failover Policy
//! Invalidation is lazy. When discovery reports a new master the pool's
//! target is swapped under its lock and nothing else happens: handles that
//! are checked out keep working or fail on their own, idle handles for the
//! old master are closed the next time `acquire`, `release` or the evictor
//! meets them, and every new connection goes to the new master. The pool is
//! never drained and rebuilt. Notifications are absorbed here and never
//! surface as errors.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use hsearch_common::{ClientResult, Endpoint, PoolConfig};

use crate::handle::ConnectionHandle;
use crate::provider::discovery::{Discovery, MasterChanged, SentinelDiscovery, Subscription};
use crate::provider::{ConnectionProvider, DirectPoolProvider, PoolStatus, ProviderState};
use crate::transport::{Connector, TcpConnector};

/// Pool that re-resolves its master on failover.
pub struct FailoverPoolProvider {
    pool: Arc<DirectPoolProvider>,
    master_name: String,
    subscription: Mutex<Option<Subscription>>,
}

impl FailoverPoolProvider {
    /// Sentinel-backed TCP pool for `master_name`.
    pub fn new(
        master_name: impl Into<String>,
        sentinels: Vec<Endpoint>,
        config: PoolConfig,
    ) -> ClientResult<Self> {
        let discovery = SentinelDiscovery::new(master_name, sentinels);
        let connector = Arc::new(TcpConnector::from_pool_config(&config));
        Self::with_discovery(&discovery, config, connector)
    }

    /// Resolves the master once, builds the pool against it, and subscribes
    /// to further changes.
    pub fn with_discovery(
        discovery: &dyn Discovery,
        config: PoolConfig,
        connector: Arc<dyn Connector>,
    ) -> ClientResult<Self> {
        let master = discovery.resolve()?;
        let master_name = discovery.master_name().to_owned();
        info!(master_name = %master_name, master = %master, "resolved initial master");

        let pool = Arc::new(DirectPoolProvider::with_connector(master, config, connector)?);
        let subscription = discovery.subscribe(follow_master(&pool, master_name.clone()))?;

        Ok(FailoverPoolProvider {
            pool,
            master_name,
            subscription: Mutex::new(Some(subscription)),
        })
    }

    pub fn master_name(&self) -> &str {
        &self.master_name
    }

    /// Master new connections are opened against.
    pub fn current_master(&self) -> Endpoint {
        self.pool.endpoint()
    }

    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.pool.await_termination(timeout)
    }
}

/// Change callback that swaps the pool's target. Holds the pool weakly so a
/// lingering listener never keeps it alive.
fn follow_master(pool: &Arc<DirectPoolProvider>, master_name: String) -> MasterChanged {
    let pool = Arc::downgrade(pool);
    Arc::new(move |master: Endpoint| {
        let Some(pool) = pool.upgrade() else {
            return;
        };
        if let Some(previous) = pool.retarget(master.clone()) {
            info!(
                master_name = %master_name,
                from = %previous,
                to = %master,
                "master failover; new connections follow the new master"
            );
        }
    })
}

impl ConnectionProvider for FailoverPoolProvider {
    fn acquire(&self) -> ClientResult<ConnectionHandle> {
        self.pool.acquire()
    }

    fn release(&self, handle: ConnectionHandle) {
        self.pool.release(handle);
    }

    fn shutdown(&self) {
        if let Some(subscription) = self.subscription.lock().take() {
            subscription.cancel();
        }
        self.pool.shutdown();
    }

    fn state(&self) -> ProviderState {
        self.pool.state()
    }

    fn endpoint(&self) -> Endpoint {
        self.pool.endpoint()
    }

    fn status(&self) -> PoolStatus {
        self.pool.status()
    }
}

impl Drop for FailoverPoolProvider {
    fn drop(&mut self) {
        self.shutdown();
    }
}
