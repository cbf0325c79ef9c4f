#![allow(dead_code)]

use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use hsearch_client::{
    ClientError, ClientResult, Command, Connector, Endpoint, EvictionPolicy, PoolConfig,
    RespValue, Transport,
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn endpoint(port: u16) -> Endpoint {
    Endpoint::new("127.0.0.1", port)
}

/// Pool config without the background evictor, so tests stay deterministic.
pub fn pool_config(size: usize, timeout: Option<Duration>) -> PoolConfig {
    PoolConfig::for_size(size)
        .with_acquire_timeout(timeout)
        .with_eviction(EvictionPolicy {
            interval: None,
            ..EvictionPolicy::default()
        })
}

/// Polls `check` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}

fn words(command: &Command) -> Vec<String> {
    std::iter::once(command.name())
        .chain(command.arguments().iter().map(|arg| &arg[..]))
        .map(|word| String::from_utf8_lossy(word).into_owned())
        .collect()
}

fn default_reply(words: &[String]) -> RespValue {
    match words[0].as_str() {
        "PING" => RespValue::Simple(b"PONG".to_vec()),
        "FT.DEL" => RespValue::Integer(1),
        "FT.EXPLAIN" => RespValue::Bulk(Some(b"INTERSECT {\n  hello\n}\n".to_vec())),
        "FT.DROP" => RespValue::Error(b"Unknown Index name".to_vec()),
        _ => RespValue::Simple(b"OK".to_vec()),
    }
}

/// In-memory connector that records every command and tracks open sessions.
#[derive(Default)]
pub struct MockConnector {
    pub opened: AtomicUsize,
    pub live: Arc<AtomicUsize>,
    pub fail_sends: Arc<AtomicBool>,
    pub refuse: AtomicBool,
    pub sent: Arc<Mutex<Vec<(Endpoint, Vec<String>)>>>,
}

impl MockConnector {
    pub fn new() -> Arc<Self> {
        Arc::new(MockConnector::default())
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<(Endpoint, Vec<String>)> {
        self.sent.lock().unwrap().clone()
    }
}

impl Connector for MockConnector {
    fn connect(&self, endpoint: &Endpoint) -> ClientResult<Box<dyn Transport>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ClientError::transport(
                endpoint,
                "connect",
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            ));
        }
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockTransport {
            endpoint: endpoint.clone(),
            live: Arc::clone(&self.live),
            fail_sends: Arc::clone(&self.fail_sends),
            sent: Arc::clone(&self.sent),
            closed: false,
        }))
    }
}

pub struct MockTransport {
    endpoint: Endpoint,
    live: Arc<AtomicUsize>,
    fail_sends: Arc<AtomicBool>,
    sent: Arc<Mutex<Vec<(Endpoint, Vec<String>)>>>,
    closed: bool,
}

impl Transport for MockTransport {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn send(&mut self, command: &Command) -> ClientResult<RespValue> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(ClientError::transport(
                &self.endpoint,
                "send",
                std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer"),
            ));
        }
        let words = words(command);
        let reply = default_reply(&words);
        self.sent
            .lock()
            .unwrap()
            .push((self.endpoint.clone(), words));
        Ok(reply)
    }

    fn receive(&mut self) -> ClientResult<RespValue> {
        Err(ClientError::UnexpectedResponse)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.close();
    }
}

// ---- loopback RESP server helpers ----

/// Accepts connections on a loopback port and runs `handler` for each one on
/// its own thread.
pub fn spawn_server<F>(handler: F) -> Endpoint
where
    F: Fn(usize, &mut BufReader<TcpStream>, &mut TcpStream) + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();
    let handler = Arc::new(handler);

    thread::spawn(move || {
        for (idx, stream) in listener.incoming().enumerate() {
            let Ok(mut stream) = stream else {
                break;
            };
            let handler = Arc::clone(&handler);
            thread::spawn(move || {
                let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
                let mut reader = BufReader::new(stream.try_clone().expect("clone"));
                handler(idx, &mut reader, &mut stream);
            });
        }
    });

    endpoint(port)
}

pub fn read_command(reader: &mut BufReader<TcpStream>) -> std::io::Result<Vec<String>> {
    let mut line = Vec::new();
    read_line(reader, &mut line)?;
    if line.first() != Some(&b'*') {
        return Err(invalid("expected array"));
    }
    let count = parse_usize(&line[1..])?;
    let mut args = Vec::with_capacity(count);
    for _ in 0..count {
        read_line(reader, &mut line)?;
        if line.first() != Some(&b'$') {
            return Err(invalid("expected bulk"));
        }
        let len = parse_usize(&line[1..])?;
        let mut data = vec![0u8; len + 2];
        reader.read_exact(&mut data)?;
        data.truncate(len);
        args.push(String::from_utf8_lossy(&data).into_owned());
    }
    Ok(args)
}

fn read_line(reader: &mut BufReader<TcpStream>, buf: &mut Vec<u8>) -> std::io::Result<()> {
    buf.clear();
    if reader.read_until(b'\n', buf)? == 0 {
        return Err(std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof"));
    }
    if !buf.ends_with(b"\r\n") {
        return Err(invalid("invalid line"));
    }
    buf.truncate(buf.len() - 2);
    Ok(())
}

fn parse_usize(data: &[u8]) -> std::io::Result<usize> {
    std::str::from_utf8(data)
        .ok()
        .and_then(|text| text.parse().ok())
        .ok_or_else(|| invalid("digit"))
}

fn invalid(message: &str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message.to_string())
}

pub fn write_simple(stream: &mut TcpStream, msg: &str) {
    let _ = stream.write_all(format!("+{}\r\n", msg).as_bytes());
    let _ = stream.flush();
}

pub fn write_error(stream: &mut TcpStream, msg: &str) {
    let _ = stream.write_all(format!("-{}\r\n", msg).as_bytes());
    let _ = stream.flush();
}

pub fn write_integer(stream: &mut TcpStream, value: i64) {
    let _ = stream.write_all(format!(":{}\r\n", value).as_bytes());
    let _ = stream.flush();
}

pub fn write_bulks(stream: &mut TcpStream, items: &[&str]) {
    let mut out = format!("*{}\r\n", items.len());
    for item in items {
        out.push_str(&format!("${}\r\n{}\r\n", item.len(), item));
    }
    let _ = stream.write_all(out.as_bytes());
    let _ = stream.flush();
}
