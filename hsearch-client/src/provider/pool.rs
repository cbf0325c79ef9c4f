//! # Direct Connection Pool
//!
//! Purpose: Reuse connections to one node, bounding how many exist at once
//! and how long a caller waits for one.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Handles return to a free set on release and
//!    are reused newest-first; the oldest idle handles are the eviction
//!    candidates.
//! 2. **Minimal Locking**: The mutex covers only the free set and counters;
//!    connecting, probing and closing happen outside it.
//! 3. **Bounded Waits**: `acquire` waits on a condition variable until a
//!    handle frees up, the deadline passes, or the pool shuts down.
//! 4. **Ticketed Fairness**: With `fairness` on, waiters take a ticket and
//!    only the head of the queue may claim a handle.
//! 5. **Lazy Connects**: Connections are opened on demand, up to `max_size`.
//!    `prefill` opens them up front for callers who want an eager pool.
//!
//! ## Accounting
//!
//! ```text
//! total = idle + outstanding + (connecting or being probed)
//! ```
//! `total` never exceeds `max_size`. A draining pool closes once `total`
//! reaches zero.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use hsearch_common::{ClientError, ClientResult, Endpoint, PoolConfig};

use crate::handle::ConnectionHandle;
use crate::provider::{ConnectionProvider, PoolStatus, ProviderState};
use crate::transport::{Connector, TcpConnector};

struct PoolState {
    phase: ProviderState,
    idle: VecDeque<ConnectionHandle>,
    total: usize,
    outstanding: usize,
    /// Acquirers parked on the condvar, fair or not.
    blocked: usize,
    waiters: VecDeque<u64>,
    next_ticket: u64,
}

impl PoolState {
    fn enqueue(&mut self, fair: bool) -> Option<u64> {
        if !fair {
            return None;
        }
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        self.waiters.push_back(ticket);
        Some(ticket)
    }

    fn is_turn(&self, ticket: Option<u64>) -> bool {
        match ticket {
            Some(ticket) => self.waiters.front() == Some(&ticket),
            None => true,
        }
    }

    fn leave(&mut self, ticket: Option<u64>) {
        if let Some(ticket) = ticket {
            self.waiters.retain(|waiter| *waiter != ticket);
        }
    }

    /// Removes idle handles that point at a node other than `current`.
    fn take_stale(&mut self, current: &Endpoint) -> Vec<ConnectionHandle> {
        let mut stale = Vec::new();
        let mut kept = VecDeque::with_capacity(self.idle.len());
        for handle in self.idle.drain(..) {
            if handle.endpoint() == current {
                kept.push_back(handle);
            } else {
                stale.push(handle);
            }
        }
        self.idle = kept;
        self.total -= stale.len();
        stale
    }

    fn finish_drain(&mut self) {
        if self.phase == ProviderState::Draining && self.total == 0 {
            self.phase = ProviderState::Closed;
        }
    }
}

enum Reservation {
    Idle(ConnectionHandle),
    Connect(Endpoint),
}

pub(crate) struct PoolShared {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    target: RwLock<Endpoint>,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolShared {
    fn current(&self) -> Endpoint {
        self.target.read().clone()
    }

    fn shutdown_error(&self) -> ClientError {
        ClientError::ProviderShutdown {
            endpoint: self.current(),
        }
    }

    fn reserve(&self, started: Instant) -> ClientResult<Reservation> {
        let deadline = self.config.acquire_timeout.map(|timeout| started + timeout);
        let mut state = self.state.lock();
        if state.phase != ProviderState::Active {
            return Err(self.shutdown_error());
        }
        let ticket = state.enqueue(self.config.fairness);

        let mut blocked = false;
        let result = self.claim(&mut state, ticket, deadline, started, &mut blocked);
        state.leave(ticket);
        if blocked {
            state.blocked -= 1;
        }
        self.available.notify_all();
        result
    }

    /// Waits for an idle handle or a free slot. Every exit is cleaned up by
    /// `reserve`.
    fn claim(
        &self,
        state: &mut MutexGuard<'_, PoolState>,
        ticket: Option<u64>,
        deadline: Option<Instant>,
        started: Instant,
        blocked: &mut bool,
    ) -> ClientResult<Reservation> {
        loop {
            if state.phase != ProviderState::Active {
                return Err(self.shutdown_error());
            }

            if state.is_turn(ticket) {
                let current = self.current();
                let stale = state.take_stale(&current);
                if !stale.is_empty() {
                    MutexGuard::unlocked(state, || close_all(stale, "retargeted"));
                    continue;
                }

                if let Some(handle) = state.idle.pop_back() {
                    state.outstanding += 1;
                    return Ok(Reservation::Idle(handle));
                }

                if state.total < self.config.max_size {
                    state.total += 1;
                    state.outstanding += 1;
                    return Ok(Reservation::Connect(current));
                }
            }

            if !*blocked {
                *blocked = true;
                state.blocked += 1;
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return Err(ClientError::PoolExhausted {
                            endpoint: self.current(),
                            waited: started.elapsed(),
                        });
                    }
                    self.available.wait_until(state, deadline);
                }
                None => self.available.wait(state),
            }
        }
    }

    fn open(&self, endpoint: &Endpoint) -> ClientResult<ConnectionHandle> {
        let mut handle = ConnectionHandle::new(self.connector.connect(endpoint)?);
        if self.config.probes.test_on_create && !handle.ping() {
            handle.close();
            return Err(ClientError::transport(
                endpoint,
                "validate",
                std::io::Error::new(std::io::ErrorKind::Other, "new connection failed PING"),
            ));
        }
        debug!(handle = handle.id(), endpoint = %endpoint, "pool opened connection");
        Ok(handle)
    }

    /// Gives back a slot reserved for a checked-out handle that no longer
    /// exists.
    fn forget_outstanding(&self) {
        let mut state = self.state.lock();
        state.total -= 1;
        state.outstanding -= 1;
        state.finish_drain();
        self.available.notify_all();
    }

    fn give_back(&self, mut handle: ConnectionHandle) {
        let healthy = !handle.is_broken()
            && !handle.is_closed()
            && (!self.config.probes.test_on_return || handle.ping());

        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        let reusable = healthy
            && state.phase == ProviderState::Active
            && *handle.endpoint() == *self.target.read();

        let discard = if reusable {
            handle.touch();
            state.idle.push_back(handle);
            None
        } else {
            state.total = state.total.saturating_sub(1);
            Some(handle)
        };
        state.finish_drain();
        self.available.notify_all();
        drop(state);

        if let Some(handle) = discard {
            if handle.is_broken() {
                warn!(handle = handle.id(), endpoint = %handle.endpoint(), "discarding broken connection");
            }
            handle.close();
        }
    }

    /// One eviction pass. Returns the number of handles closed.
    fn evict_idle(&self) -> usize {
        let policy = self.config.eviction;
        let probe = self.config.probes.test_while_idle;
        let current = self.current();
        let now = Instant::now();

        let mut expired = Vec::new();
        let mut to_probe = Vec::new();
        {
            let mut state = self.state.lock();
            if state.phase != ProviderState::Active {
                return 0;
            }
            let examine = policy.tests_per_run.per_run(state.idle.len());
            let mut kept = Vec::with_capacity(examine);
            for _ in 0..examine {
                let Some(handle) = state.idle.pop_front() else {
                    break;
                };
                let idle_for = now.saturating_duration_since(handle.last_used());
                if *handle.endpoint() != current || idle_for >= policy.min_idle_time {
                    expired.push(handle);
                } else if probe {
                    to_probe.push(handle);
                } else {
                    kept.push(handle);
                }
            }
            for handle in kept.into_iter().rev() {
                state.idle.push_front(handle);
            }
            state.total -= expired.len();
            state.finish_drain();
            self.available.notify_all();
        }

        let mut closed = expired.len();
        close_all(expired, "idle");

        for mut handle in to_probe {
            if handle.ping() {
                let mut state = self.state.lock();
                if state.phase == ProviderState::Active {
                    state.idle.push_front(handle);
                    self.available.notify_all();
                    continue;
                }
                state.total -= 1;
                state.finish_drain();
                self.available.notify_all();
                drop(state);
                handle.close();
            } else {
                debug!(handle = handle.id(), "idle connection failed PING");
                let mut state = self.state.lock();
                state.total -= 1;
                state.finish_drain();
                self.available.notify_all();
                drop(state);
                handle.close();
            }
            closed += 1;
        }
        closed
    }
}

fn close_all(handles: Vec<ConnectionHandle>, reason: &'static str) {
    for handle in handles {
        debug!(handle = handle.id(), endpoint = %handle.endpoint(), reason, "evicting connection");
        handle.close();
    }
}

struct Evictor {
    stop: Arc<(Mutex<bool>, Condvar)>,
    join: Option<JoinHandle<()>>,
}

impl Evictor {
    fn start(shared: &Arc<PoolShared>, interval: Duration) -> Self {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let stop_thread = Arc::clone(&stop);
        let pool: Weak<PoolShared> = Arc::downgrade(shared);

        let join = std::thread::Builder::new()
            .name("hsearch-evictor".into())
            .spawn(move || {
                let (flag, wake) = &*stop_thread;
                loop {
                    {
                        let mut stopped = flag.lock();
                        if !*stopped {
                            wake.wait_for(&mut stopped, interval);
                        }
                        if *stopped {
                            break;
                        }
                    }
                    let Some(pool) = pool.upgrade() else {
                        break;
                    };
                    let evicted = pool.evict_idle();
                    if evicted > 0 {
                        debug!(evicted, "eviction run finished");
                    }
                }
            })
            .ok();

        if join.is_none() {
            warn!("could not start eviction thread; idle connections will not be evicted");
        }
        Evictor { stop, join }
    }

    fn stop(&mut self) {
        let (flag, wake) = &*self.stop;
        *flag.lock() = true;
        wake.notify_all();
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Bounded pool of connections to one endpoint.
pub struct DirectPoolProvider {
    shared: Arc<PoolShared>,
    evictor: Mutex<Option<Evictor>>,
}

impl DirectPoolProvider {
    /// Creates a TCP pool against `endpoint`.
    pub fn new(endpoint: Endpoint, config: PoolConfig) -> ClientResult<Self> {
        let connector = Arc::new(TcpConnector::from_pool_config(&config));
        Self::with_connector(endpoint, config, connector)
    }

    /// Creates a pool that opens sessions through a caller-supplied connector.
    pub fn with_connector(
        endpoint: Endpoint,
        config: PoolConfig,
        connector: Arc<dyn Connector>,
    ) -> ClientResult<Self> {
        config.validate()?;
        let state = PoolState {
            phase: ProviderState::Active,
            idle: VecDeque::with_capacity(config.max_size),
            total: 0,
            outstanding: 0,
            blocked: 0,
            waiters: VecDeque::new(),
            next_ticket: 0,
        };
        let interval = config.eviction.interval;
        let shared = Arc::new(PoolShared {
            config,
            connector,
            target: RwLock::new(endpoint),
            state: Mutex::new(state),
            available: Condvar::new(),
        });
        let evictor = interval.map(|interval| Evictor::start(&shared, interval));

        Ok(DirectPoolProvider {
            shared,
            evictor: Mutex::new(evictor),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Points new connections at `endpoint`. Idle handles for the old node
    /// are dropped as they are encountered; checked-out handles are left
    /// alone. Returns the previous endpoint, or `None` if nothing changed.
    pub(crate) fn retarget(&self, endpoint: Endpoint) -> Option<Endpoint> {
        let previous = {
            let mut target = self.shared.target.write();
            if *target == endpoint {
                return None;
            }
            std::mem::replace(&mut *target, endpoint)
        };
        self.shared.available.notify_all();
        Some(previous)
    }

    /// Opens connections until `count` are idle, capped at `max_size`.
    /// Returns how many were opened.
    pub fn prefill(&self, count: usize) -> ClientResult<usize> {
        let mut opened = 0;
        loop {
            let endpoint = {
                let mut state = self.shared.state.lock();
                if state.phase != ProviderState::Active {
                    return Err(self.shared.shutdown_error());
                }
                if state.idle.len() >= count || state.total >= self.shared.config.max_size {
                    return Ok(opened);
                }
                state.total += 1;
                self.shared.current()
            };

            let opened_handle = self.shared.open(&endpoint);
            let mut state = self.shared.state.lock();
            match opened_handle {
                Ok(mut handle) if state.phase == ProviderState::Active => {
                    handle.touch();
                    state.idle.push_back(handle);
                    self.shared.available.notify_all();
                    opened += 1;
                }
                Ok(handle) => {
                    state.total -= 1;
                    state.finish_drain();
                    self.shared.available.notify_all();
                    drop(state);
                    handle.close();
                }
                Err(err) => {
                    state.total -= 1;
                    state.finish_drain();
                    self.shared.available.notify_all();
                    return Err(err);
                }
            }
        }
    }

    /// Connects into a slot `reserve` already counted.
    fn connect_reserved(&self, endpoint: Endpoint) -> ClientResult<ConnectionHandle> {
        self.shared.open(&endpoint).map_err(|err| {
            debug!(endpoint = %endpoint, error = %err, "pool connect failed");
            self.shared.forget_outstanding();
            err
        })
    }

    /// Runs one eviction pass immediately; returns how many handles closed.
    pub fn evict_idle(&self) -> usize {
        self.shared.evict_idle()
    }

    /// Blocks until the pool reaches `Closed` or `timeout` elapses.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.phase != ProviderState::Closed {
            if self
                .shared
                .available
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return state.phase == ProviderState::Closed;
            }
        }
        true
    }
}

impl ConnectionProvider for DirectPoolProvider {
    fn acquire(&self) -> ClientResult<ConnectionHandle> {
        match self.shared.reserve(Instant::now())? {
            Reservation::Idle(mut handle) => {
                if !self.shared.config.probes.test_on_borrow || handle.ping() {
                    debug!(handle = handle.id(), "reused pooled connection");
                    return Ok(handle);
                }
                // The slot stays reserved; fill it with a fresh connection.
                debug!(handle = handle.id(), "idle connection failed PING on borrow");
                handle.close();
                self.connect_reserved(self.shared.current())
            }
            Reservation::Connect(endpoint) => self.connect_reserved(endpoint),
        }
    }

    fn release(&self, handle: ConnectionHandle) {
        self.shared.give_back(handle);
    }

    fn shutdown(&self) {
        let idle: Vec<ConnectionHandle> = {
            let mut state = self.shared.state.lock();
            if state.phase != ProviderState::Active {
                return;
            }
            state.phase = ProviderState::Draining;
            let idle: Vec<_> = state.idle.drain(..).collect();
            state.total -= idle.len();
            state.finish_drain();
            self.shared.available.notify_all();
            idle
        };
        close_all(idle, "shutdown");

        if let Some(mut evictor) = self.evictor.lock().take() {
            evictor.stop();
        }
        info!(endpoint = %self.shared.current(), "connection pool shut down");
    }

    fn state(&self) -> ProviderState {
        self.shared.state.lock().phase
    }

    fn endpoint(&self) -> Endpoint {
        self.shared.current()
    }

    fn status(&self) -> PoolStatus {
        let state = self.shared.state.lock();
        PoolStatus {
            idle: state.idle.len(),
            outstanding: state.outstanding,
            waiting: state.blocked,
            max_size: self.shared.config.max_size,
        }
    }
}

impl Drop for DirectPoolProvider {
    fn drop(&mut self) {
        self.shutdown();
    }
}
