//! # Connection Handle
//!
//! Purpose: Uniform wrapper around one live transport session, with the same
//! close/release semantics whichever provider created it.
//!
//! ## Design Principles
//! 1. **Exclusive Use**: A handle is not `Clone`; whoever holds it is the only
//!    caller sending on it.
//! 2. **Idempotent Close**: The session sits in a shared slot that `close`
//!    empties, so closing twice (or closing from the provider side) is a no-op.
//! 3. **Poisoning by Failure**: A transport error marks the handle broken so a
//!    pool drops it on release instead of recycling a dead socket.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::debug;

use hsearch_common::{ClientError, ClientResult, Endpoint};

use crate::resp::RespValue;
use crate::topology::Command;
use crate::transport::Transport;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

struct Session {
    id: u64,
    endpoint: Endpoint,
    transport: Mutex<Option<Box<dyn Transport>>>,
}

impl Session {
    fn close(&self) -> bool {
        let transport = self.transport.lock().take();
        match transport {
            Some(mut transport) => {
                transport.close();
                debug!(handle = self.id, endpoint = %self.endpoint, "handle closed");
                true
            }
            None => false,
        }
    }
}

/// An exclusively owned connection to one store node.
pub struct ConnectionHandle {
    session: Arc<Session>,
    created_at: Instant,
    last_used: Instant,
    broken: bool,
}

impl ConnectionHandle {
    /// Wraps a freshly connected transport.
    pub fn new(transport: Box<dyn Transport>) -> Self {
        let now = Instant::now();
        let session = Session {
            id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
            endpoint: transport.endpoint().clone(),
            transport: Mutex::new(Some(transport)),
        };
        ConnectionHandle {
            session: Arc::new(session),
            created_at: now,
            last_used: now,
            broken: false,
        }
    }

    /// Sends one command and returns the reply.
    ///
    /// Server error replies come back as `RespValue::Error`; only a broken
    /// session is an `Err`.
    pub fn send(&mut self, command: &Command) -> ClientResult<RespValue> {
        let mut slot = self.session.transport.lock();
        let transport = slot
            .as_mut()
            .ok_or(ClientError::ClosedHandle { id: self.session.id })?;
        let reply = transport.send(command);
        drop(slot);

        self.last_used = Instant::now();
        if reply.is_err() {
            // Do not hand this session to anyone else.
            self.broken = true;
        }
        reply
    }

    /// Sends `PING` and reports whether the node answered `PONG`.
    pub fn ping(&mut self) -> bool {
        match self.send(&Command::new("PING")) {
            Ok(reply) => reply.as_text() == Some("PONG"),
            Err(_) => false,
        }
    }

    /// Releases the transport. Safe to call any number of times.
    pub fn close(&self) {
        self.session.close();
    }

    pub fn is_closed(&self) -> bool {
        self.session.transport.lock().is_none()
    }

    /// True once a send has failed on this handle.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn id(&self) -> u64 {
        self.session.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.session.endpoint
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Restarts the idle clock when the handle goes back to a free set.
    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// A provider-side reference that can close this handle later without
    /// keeping it alive.
    pub(crate) fn closer(&self) -> HandleCloser {
        HandleCloser {
            id: self.session.id,
            session: Arc::downgrade(&self.session),
        }
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.session.id)
            .field("endpoint", &self.session.endpoint)
            .field("broken", &self.broken)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Weak reference used by a provider to revoke a handle it handed out.
#[derive(Debug, Clone)]
pub(crate) struct HandleCloser {
    id: u64,
    session: Weak<Session>,
}

impl HandleCloser {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// True while the handle exists and has not been closed.
    pub(crate) fn is_open(&self) -> bool {
        self.session
            .upgrade()
            .map_or(false, |session| session.transport.lock().is_some())
    }

    /// Closes the handle if it is still alive; returns whether anything was
    /// actually closed.
    pub(crate) fn close(&self) -> bool {
        match self.session.upgrade() {
            Some(session) => session.close(),
            None => false,
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}
