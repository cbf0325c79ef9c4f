//! # Master Discovery
//!
//! Purpose: Tell a failover pool where the named master lives right now and
//! call back when that changes.
//!
//! `SentinelDiscovery` asks each sentinel `SENTINEL get-master-addr-by-name`
//! until one answers, and keeps one listener thread per sentinel subscribed
//! to `+switch-master`. A listener that loses its sentinel reconnects after
//! `retry_delay`, re-reading the master address first so a switch announced
//! while it was away is not missed.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use hsearch_common::{ClientError, ClientResult, Endpoint};

use crate::resp::RespValue;
use crate::topology::Command;
use crate::transport::{Connector, TcpConnector, Transport};

/// Channel sentinels publish master switches on.
const SWITCH_MASTER_CHANNEL: &str = "+switch-master";
/// Pause before a listener reconnects to a sentinel.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
/// Socket timeout for sentinel sessions; bounds how long a listener takes to
/// notice a stop request.
const SENTINEL_IO_TIMEOUT: Duration = Duration::from_secs(1);

/// Callback invoked with the new master endpoint.
pub type MasterChanged = Arc<dyn Fn(Endpoint) + Send + Sync>;

/// Source of the current master endpoint for one master name.
pub trait Discovery: Send + Sync {
    fn master_name(&self) -> &str;

    /// Current endpoint of the master.
    fn resolve(&self) -> ClientResult<Endpoint>;

    /// Calls `on_change` whenever the master moves, until the returned
    /// subscription is dropped. Repeated notifications of the same endpoint
    /// are allowed.
    fn subscribe(&self, on_change: MasterChanged) -> ClientResult<Subscription>;
}

/// Live change subscription; dropping it stops the notifications.
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Subscription whose teardown runs `cancel`.
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Subscription {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Stops notifications and waits for any listener to finish.
    pub fn cancel(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Discovery through sentinel monitors.
pub struct SentinelDiscovery {
    master_name: String,
    sentinels: Vec<Endpoint>,
    connector: Arc<dyn Connector>,
    retry_delay: Duration,
}

impl SentinelDiscovery {
    /// Sentinel discovery over TCP. Sentinels are contacted without the
    /// master's credentials.
    pub fn new(master_name: impl Into<String>, sentinels: Vec<Endpoint>) -> Self {
        let connector = TcpConnector {
            credentials: None,
            connect_timeout: Some(SENTINEL_IO_TIMEOUT),
            io_timeout: Some(SENTINEL_IO_TIMEOUT),
        };
        Self::with_connector(master_name, sentinels, Arc::new(connector))
    }

    pub fn with_connector(
        master_name: impl Into<String>,
        sentinels: Vec<Endpoint>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        SentinelDiscovery {
            master_name: master_name.into(),
            sentinels,
            connector,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn sentinels(&self) -> &[Endpoint] {
        &self.sentinels
    }
}

impl Discovery for SentinelDiscovery {
    fn master_name(&self) -> &str {
        &self.master_name
    }

    fn resolve(&self) -> ClientResult<Endpoint> {
        for sentinel in &self.sentinels {
            let mut transport = match self.connector.connect(sentinel) {
                Ok(transport) => transport,
                Err(err) => {
                    warn!(sentinel = %sentinel, error = %err, "cannot reach sentinel");
                    continue;
                }
            };
            let answer = query_master(transport.as_mut(), &self.master_name);
            transport.close();
            match answer {
                Ok(Some(master)) => {
                    debug!(sentinel = %sentinel, master = %master, "resolved master");
                    return Ok(master);
                }
                Ok(None) => {
                    warn!(sentinel = %sentinel, master_name = %self.master_name, "sentinel does not know master");
                }
                Err(err) => {
                    warn!(sentinel = %sentinel, error = %err, "sentinel query failed");
                }
            }
        }
        Err(ClientError::MasterUnresolved {
            master_name: self.master_name.clone(),
        })
    }

    fn subscribe(&self, on_change: MasterChanged) -> ClientResult<Subscription> {
        let stop = Arc::new(AtomicBool::new(false));
        let mut joins: Vec<JoinHandle<()>> = Vec::with_capacity(self.sentinels.len());

        for sentinel in &self.sentinels {
            let listener = Listener {
                sentinel: sentinel.clone(),
                master_name: self.master_name.clone(),
                connector: Arc::clone(&self.connector),
                retry_delay: self.retry_delay,
                stop: Arc::clone(&stop),
                on_change: Arc::clone(&on_change),
            };
            let spawned = std::thread::Builder::new()
                .name(format!("hsearch-sentinel-{}", sentinel))
                .spawn(move || listener.run());
            match spawned {
                Ok(join) => joins.push(join),
                Err(err) => {
                    stop.store(true, Ordering::Release);
                    return Err(ClientError::transport(sentinel, "spawn listener", err));
                }
            }
        }

        Ok(Subscription::new(move || {
            stop.store(true, Ordering::Release);
            for join in joins {
                let _ = join.join();
            }
        }))
    }
}

struct Listener {
    sentinel: Endpoint,
    master_name: String,
    connector: Arc<dyn Connector>,
    retry_delay: Duration,
    stop: Arc<AtomicBool>,
    on_change: MasterChanged,
}

impl Listener {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn run(self) {
        while !self.stopped() {
            if let Err(err) = self.listen_once() {
                if self.stopped() {
                    break;
                }
                warn!(sentinel = %self.sentinel, error = %err, "sentinel listener lost; reconnecting");
                self.pause();
            }
        }
        debug!(sentinel = %self.sentinel, "sentinel listener stopped");
    }

    /// One connected session: re-read the master, subscribe, then relay
    /// switch messages until the session fails or a stop is requested.
    fn listen_once(&self) -> ClientResult<()> {
        let mut transport = self.connector.connect(&self.sentinel)?;
        let result = self.relay(transport.as_mut());
        transport.close();
        result
    }

    fn relay(&self, transport: &mut dyn Transport) -> ClientResult<()> {
        if let Some(master) = query_master(transport, &self.master_name)? {
            (self.on_change)(master);
        }

        let ack = transport.send(&Command::new("SUBSCRIBE").arg(SWITCH_MASTER_CHANNEL))?;
        if let Some(message) = ack.error_message() {
            return Err(ClientError::Server { message });
        }
        debug!(sentinel = %self.sentinel, "subscribed to master switches");

        while !self.stopped() {
            match transport.receive() {
                Ok(message) => {
                    if let Some(master) = parse_switch_master(&message, &self.master_name) {
                        debug!(sentinel = %self.sentinel, master = %master, "switch-master received");
                        (self.on_change)(master);
                    }
                }
                Err(err) if err.is_timeout() => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn pause(&self) {
        let until = Instant::now() + self.retry_delay;
        while !self.stopped() && Instant::now() < until {
            std::thread::sleep(Duration::from_millis(50).min(self.retry_delay));
        }
    }
}

fn query_master(transport: &mut dyn Transport, master_name: &str) -> ClientResult<Option<Endpoint>> {
    let command = Command::new("SENTINEL")
        .arg("get-master-addr-by-name")
        .arg(master_name.to_owned());
    match transport.send(&command)? {
        RespValue::Array(items) if items.len() == 2 => {
            match (items[0].as_text(), items[1].as_text()) {
                (Some(host), Some(port)) => Endpoint::from_parts(host, port).map(Some),
                _ => Err(ClientError::UnexpectedResponse),
            }
        }
        RespValue::Array(items) if items.is_empty() => Ok(None),
        RespValue::Bulk(None) => Ok(None),
        RespValue::Error(message) => Err(ClientError::Server {
            message: String::from_utf8_lossy(&message).into_owned(),
        }),
        _ => Err(ClientError::UnexpectedResponse),
    }
}

/// Extracts the new master from a `+switch-master` pub/sub message:
/// `<master> <old-ip> <old-port> <new-ip> <new-port>`.
fn parse_switch_master(message: &RespValue, master_name: &str) -> Option<Endpoint> {
    let RespValue::Array(items) = message else {
        return None;
    };
    if items.len() != 3
        || items[0].as_text() != Some("message")
        || items[1].as_text() != Some(SWITCH_MASTER_CHANNEL)
    {
        return None;
    }
    let parts: Vec<&str> = items[2].as_text()?.split_whitespace().collect();
    match parts.as_slice() {
        [name, _, _, host, port] if *name == master_name => Endpoint::from_parts(host, port).ok(),
        _ => None,
    }
}
