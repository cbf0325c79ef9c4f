//! # Transport Boundary
//!
//! Purpose: The "send a command, get a reply" contract the rest of the client
//! is written against, plus the TCP/RESP2 implementation used in production.
//!
//! ## Design Principles
//! 1. **Trait Seam**: Providers only see `Connector` and `Transport`, so tests
//!    and other store clients can slot in without touching pooling logic.
//! 2. **Buffer Reuse**: Each TCP transport owns its framing buffers.
//! 3. **Errors Carry the Peer**: Every failure names the endpoint and the
//!    operation that hit it.

use std::io::{self, BufRead, BufReader, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use hsearch_common::{ClientError, ClientResult, Endpoint, PoolConfig};

use crate::resp::{encode_command, read_value, RespError, RespValue};
use crate::topology::Command;

/// One live session with a store node.
pub trait Transport: Send {
    /// Node this session is connected to.
    fn endpoint(&self) -> &Endpoint;

    /// Writes one command and reads its reply.
    fn send(&mut self, command: &Command) -> ClientResult<RespValue>;

    /// Reads one unsolicited message, as delivered on a subscribed session.
    fn receive(&mut self) -> ClientResult<RespValue>;

    /// Releases the underlying resources. Called at most once by the handle.
    fn close(&mut self);
}

/// Opens new sessions to a given endpoint.
pub trait Connector: Send + Sync {
    fn connect(&self, endpoint: &Endpoint) -> ClientResult<Box<dyn Transport>>;
}

/// Connector for RESP2 over TCP.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    /// Password sent with `AUTH` right after connecting.
    pub credentials: Option<String>,
    pub connect_timeout: Option<Duration>,
    pub io_timeout: Option<Duration>,
}

impl TcpConnector {
    /// Connector using the socket settings and credentials of a pool.
    pub fn from_pool_config(config: &PoolConfig) -> Self {
        TcpConnector {
            credentials: config.credentials.clone(),
            connect_timeout: config.connect_timeout,
            io_timeout: config.io_timeout,
        }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, endpoint: &Endpoint) -> ClientResult<Box<dyn Transport>> {
        let stream = connect_stream(endpoint, self.connect_timeout)?;
        let setup = |stream: &TcpStream| -> std::io::Result<()> {
            stream.set_read_timeout(self.io_timeout)?;
            stream.set_write_timeout(self.io_timeout)?;
            stream.set_nodelay(true)
        };
        setup(&stream).map_err(|err| ClientError::transport(endpoint, "connect", err))?;

        let mut transport = TcpTransport {
            endpoint: endpoint.clone(),
            reader: BufReader::new(stream),
            line_buf: Vec::with_capacity(128),
            write_buf: Vec::with_capacity(256),
            closed: false,
        };

        if let Some(password) = &self.credentials {
            let auth = Command::new("AUTH").arg(Bytes::from(password.clone()));
            if let Some(message) = transport.send(&auth)?.error_message() {
                transport.close();
                return Err(ClientError::Server { message });
            }
        }

        debug!(endpoint = %endpoint, "connected");
        Ok(Box::new(transport))
    }
}

fn connect_stream(endpoint: &Endpoint, timeout: Option<Duration>) -> ClientResult<TcpStream> {
    let addrs: Vec<SocketAddr> = (endpoint.host(), endpoint.port())
        .to_socket_addrs()
        .map_err(|err| ClientError::transport(endpoint, "resolve", err))?
        .collect();

    let mut last_err = None;
    for addr in addrs {
        let attempt = match timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
            None => TcpStream::connect(addr),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }

    let err = last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "host resolved to no addresses")
    });
    Err(ClientError::transport(endpoint, "connect", err))
}

/// RESP2 session over one TCP stream.
pub struct TcpTransport {
    endpoint: Endpoint,
    // Buffered reader reduces syscalls while still allowing direct writes.
    reader: BufReader<TcpStream>,
    line_buf: Vec<u8>,
    write_buf: Vec<u8>,
    closed: bool,
}

impl TcpTransport {
    /// Reads one reply. A timeout before the first byte is reported as a
    /// timeout; one partway through a reply is not, since the stream can no
    /// longer be parsed from a frame boundary.
    fn read(&mut self, operation: &'static str) -> ClientResult<RespValue> {
        if self.reader.buffer().is_empty() {
            self.reader
                .fill_buf()
                .map_err(|err| ClientError::transport(&self.endpoint, operation, err))?;
        }
        read_value(&mut self.reader, &mut self.line_buf).map_err(|err| match err {
            RespError::Io(err) if is_timeout_kind(err.kind()) => ClientError::transport(
                &self.endpoint,
                operation,
                io::Error::new(io::ErrorKind::Other, "timed out partway through a reply"),
            ),
            RespError::Io(err) => ClientError::transport(&self.endpoint, operation, err),
            RespError::Protocol => ClientError::Protocol {
                endpoint: self.endpoint.clone(),
            },
        })
    }
}

impl Transport for TcpTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn send(&mut self, command: &Command) -> ClientResult<RespValue> {
        self.write_buf.clear();
        encode_command(command.name(), command.arguments(), &mut self.write_buf);

        let stream = self.reader.get_mut();
        stream
            .write_all(&self.write_buf)
            .and_then(|_| stream.flush())
            .map_err(|err| ClientError::transport(&self.endpoint, "send", err))?;

        self.read("send")
    }

    fn receive(&mut self) -> ClientResult<RespValue> {
        self.read("receive")
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        // Peer may already be gone; nothing useful to do with the error.
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
    }
}

fn is_timeout_kind(kind: io::ErrorKind) -> bool {
    matches!(kind, io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    /// Connects a transport to a one-shot peer that writes `payload` and then
    /// stays silent until the test is done.
    fn silent_after(payload: &'static [u8]) -> (Box<dyn Transport>, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(payload).unwrap();
            stream.flush().unwrap();
            thread::sleep(Duration::from_millis(400));
        });
        let connector = TcpConnector {
            credentials: None,
            connect_timeout: Some(Duration::from_secs(1)),
            io_timeout: Some(Duration::from_millis(100)),
        };
        let transport = connector.connect(&Endpoint::new("127.0.0.1", port)).unwrap();
        (transport, peer)
    }

    #[test]
    fn idle_timeout_is_reported_as_timeout() {
        let (mut transport, peer) = silent_after(b"");
        let err = transport.receive().unwrap_err();
        assert!(err.is_timeout(), "{:?}", err);
        transport.close();
        peer.join().unwrap();
    }

    #[test]
    fn timeout_inside_a_reply_is_not_a_plain_timeout() {
        let (mut transport, peer) = silent_after(b"*3\r\n$7\r\nmessage\r\n");
        let err = transport.receive().unwrap_err();
        assert!(!err.is_timeout(), "{:?}", err);
        assert!(matches!(err, ClientError::Transport { operation: "receive", .. }));
        transport.close();
        peer.join().unwrap();
    }

    #[test]
    fn complete_reply_after_idle_timeout_still_parses() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let peer = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_millis(150));
            stream.write_all(b"+OK\r\n").unwrap();
            thread::sleep(Duration::from_millis(100));
        });
        let connector = TcpConnector {
            credentials: None,
            connect_timeout: Some(Duration::from_secs(1)),
            io_timeout: Some(Duration::from_millis(100)),
        };
        let mut transport = connector.connect(&Endpoint::new("127.0.0.1", port)).unwrap();

        assert!(transport.receive().unwrap_err().is_timeout());
        let mut reply = transport.receive();
        if matches!(&reply, Err(err) if err.is_timeout()) {
            reply = transport.receive();
        }
        assert_eq!(reply.unwrap(), RespValue::Simple(b"OK".to_vec()));
        peer.join().unwrap();
    }
}
