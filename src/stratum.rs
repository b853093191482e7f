pub mod rpc;

use crate::{
    config::PoolAddress,
    error::{Error, Result},
    share::ShareSubmission,
};
use rpc::{
    request::{KeepAlivedParams, LoginParams, Method, Request, SubmitParams},
    response::parse_object,
};
use serde::Serialize;
use serde_json::Value;
use std::{
    fmt,
    io::{self, Read, Write},
    net::{Shutdown, TcpStream},
    time::{Duration, Instant},
};

const READ_BUF_SIZE: usize = 4096;
const MAX_LINE_LEN: usize = 64 * 1024;

/// Raw byte stream to a pool.
///
/// Abstracts the socket so the session can run over TCP/TLS or over a
/// scripted transport in tests.
pub trait Transport: Send {
    /// Writes one complete line.
    fn send(&mut self, line: &str) -> io::Result<()>;

    /// Blocking read. `Ok(0)` means the peer closed the stream; a timeout is
    /// reported as `WouldBlock` or `TimedOut`.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Reads only what has already arrived; `WouldBlock` when nothing has.
    fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn close(&mut self);
}

/// Opens transports to the pool, once per (re)connect.
pub trait Connector: Send {
    type Transport: Transport;

    fn connect(&mut self) -> Result<Self::Transport>;
}

enum Stream {
    Plain(TcpStream),
    Tls(Box<native_tls::TlsStream<TcpStream>>),
}

impl Stream {
    fn tcp(&self) -> &TcpStream {
        match self {
            Stream::Plain(tcp) => tcp,
            Stream::Tls(tls) => tls.get_ref(),
        }
    }
}

pub struct Connection {
    stream: Stream,
    peer: String,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.peer)
            .field("tls", &matches!(self.stream, Stream::Tls(_)))
            .finish()
    }
}

impl Connection {
    #[tracing::instrument]
    pub fn connect(host: &str, port: u16, tls: bool, read_timeout: Duration) -> Result<Self> {
        let peer = format!("{host}:{port}");
        let tcp = TcpStream::connect((host, port)).map_err(|source| Error::Connect {
            addr: peer.clone(),
            source,
        })?;
        tcp.set_nodelay(true)?;
        let stream = if tls {
            let connector = native_tls::TlsConnector::new()?;
            let tls = connector
                .connect(host, tcp)
                .map_err(|e| Error::TlsHandshake(e.to_string()))?;
            Stream::Tls(Box::new(tls))
        } else {
            Stream::Plain(tcp)
        };
        stream.tcp().set_read_timeout(Some(read_timeout))?;
        tracing::info!("connected");
        Ok(Self { stream, peer })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl Transport for Connection {
    fn send(&mut self, line: &str) -> io::Result<()> {
        match &mut self.stream {
            Stream::Plain(tcp) => {
                tcp.write_all(line.as_bytes())?;
                tcp.flush()
            }
            Stream::Tls(tls) => {
                tls.write_all(line.as_bytes())?;
                tls.flush()
            }
        }
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.stream {
            Stream::Plain(tcp) => tcp.read(buf),
            Stream::Tls(tls) => tls.read(buf),
        }
    }

    fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.tcp().set_nonblocking(true)?;
        let read = self.receive(buf);
        self.stream.tcp().set_nonblocking(false)?;
        read
    }

    fn close(&mut self) {
        if let Stream::Tls(tls) = &mut self.stream {
            let _ = tls.shutdown();
        }
        let _ = self.stream.tcp().shutdown(Shutdown::Both);
        tracing::debug!(peer = %self.peer, "connection closed");
    }
}

#[derive(Debug, Clone)]
pub struct TcpConnector {
    pub address: PoolAddress,
    pub tls: bool,
    pub read_timeout: Duration,
}

impl Connector for TcpConnector {
    type Transport = Connection;

    fn connect(&mut self) -> Result<Connection> {
        Connection::connect(
            &self.address.host,
            self.address.port,
            self.tls,
            self.read_timeout,
        )
    }
}

/// Splits a byte stream into lines. Messages may arrive in fragments or
/// several per read; incomplete tails are kept until their newline arrives.
#[derive(Debug, Default)]
pub struct LineFramer {
    pending: Vec<u8>,
}

impl LineFramer {
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        if self.pending.len() > MAX_LINE_LEN {
            let len = self.pending.len();
            self.pending.clear();
            return Err(Error::Malformed(format!("unterminated line of {len} bytes")));
        }
        Ok(lines)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Line-delimited JSON-RPC session over a [`Transport`].
pub struct Stratum<T> {
    transport: T,
    framer: LineFramer,
    buf: Vec<u8>,
    last_activity: Instant,
}

impl<T: Transport> Stratum<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            framer: LineFramer::default(),
            buf: vec![0; READ_BUF_SIZE],
            last_activity: Instant::now(),
        }
    }

    pub fn login(&mut self, params: LoginParams) -> Result<()> {
        tracing::info!(login = %params.login, "logging in");
        self.send(params)
    }

    pub fn submit(&mut self, share: ShareSubmission) -> Result<()> {
        tracing::info!(job_id = %share.job_id, nonce = %share.nonce, "submitting share");
        self.send(SubmitParams::from(share))
    }

    pub fn keep_alive(&mut self, miner_id: &str) -> Result<()> {
        tracing::debug!("keepalived");
        self.send(KeepAlivedParams {
            id: miner_id.to_string(),
        })
    }

    fn send<P: Method + Serialize>(&mut self, params: P) -> Result<()> {
        let line = rpc::encode(&Request::new(params))?;
        tracing::trace!(tx = %line.trim_end(), "sending");
        self.transport.send(&line)?;
        self.last_activity = Instant::now();
        Ok(())
    }

    /// Reads once from the transport.
    ///
    /// Returns `Ok(None)` when the read timed out or only a partial line has
    /// arrived. Otherwise returns every JSON object among the completed lines;
    /// completed lines that hold no object at all make the read malformed.
    pub fn read_messages(&mut self) -> Result<Option<Vec<Value>>> {
        let read = self.transport.receive(&mut self.buf);
        self.take_messages(read)
    }

    /// Same as [`read_messages`](Self::read_messages) without waiting for
    /// data.
    pub fn poll_messages(&mut self) -> Result<Option<Vec<Value>>> {
        let read = self.transport.try_receive(&mut self.buf);
        self.take_messages(read)
    }

    fn take_messages(&mut self, read: io::Result<usize>) -> Result<Option<Vec<Value>>> {
        let n = match read {
            Ok(0) => return Err(Error::Disconnected),
            Ok(n) => n,
            Err(e)
                if matches!(
                    e.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
                ) =>
            {
                return Ok(None)
            }
            Err(e) => return Err(e.into()),
        };
        self.last_activity = Instant::now();

        let lines = self.framer.push(&self.buf[..n])?;
        if lines.is_empty() {
            return Ok(None);
        }
        let mut objects = Vec::with_capacity(lines.len());
        for line in &lines {
            tracing::trace!(rx = %line, "received");
            match parse_object(line) {
                Some(object) => objects.push(object),
                None => tracing::debug!(line = %line, "skipping non-object line"),
            }
        }
        if objects.is_empty() {
            return Err(Error::Malformed(format!(
                "no JSON object in {} line(s)",
                lines.len()
            )));
        }
        Ok(Some(objects))
    }

    /// Time since the last byte was sent or received.
    pub fn idle_for(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn close(&mut self) {
        self.framer.clear();
        self.transport.close();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    /// One scripted outcome of a `receive` call.
    pub(crate) enum Incoming {
        Bytes(Vec<u8>),
        Timeout,
        Closed,
        Fail(io::ErrorKind),
    }

    /// In-memory transport replaying scripted reads and recording writes.
    /// Once the script is exhausted every read times out.
    #[derive(Clone, Default)]
    pub(crate) struct MockTransport {
        pub incoming: Arc<Mutex<VecDeque<Incoming>>>,
        pub sent: Arc<Mutex<Vec<String>>>,
        pub closed: Arc<Mutex<bool>>,
        pub fail_send: Arc<Mutex<Option<io::ErrorKind>>>,
    }

    impl MockTransport {
        pub(crate) fn push_line(&self, line: &str) {
            self.incoming
                .lock()
                .unwrap()
                .push_back(Incoming::Bytes(format!("{line}\n").into_bytes()));
        }

        pub(crate) fn push(&self, incoming: Incoming) {
            self.incoming.lock().unwrap().push_back(incoming);
        }

        /// The next `send` fails with `kind` and writes nothing.
        pub(crate) fn fail_next_send(&self, kind: io::ErrorKind) {
            *self.fail_send.lock().unwrap() = Some(kind);
        }

        pub(crate) fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }

        pub(crate) fn sent_methods(&self) -> Vec<String> {
            self.sent()
                .iter()
                .map(|line| {
                    let value: Value = serde_json::from_str(line).unwrap();
                    value["method"].as_str().unwrap().to_string()
                })
                .collect()
        }
    }

    impl Transport for MockTransport {
        fn send(&mut self, line: &str) -> io::Result<()> {
            if let Some(kind) = self.fail_send.lock().unwrap().take() {
                return Err(io::Error::new(kind, "scripted send failure"));
            }
            self.sent.lock().unwrap().push(line.to_string());
            Ok(())
        }

        fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let read = self.try_receive(buf);
            if matches!(&read, Err(e) if e.kind() == io::ErrorKind::WouldBlock) {
                std::thread::sleep(Duration::from_millis(1));
            }
            read
        }

        fn try_receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            match self.incoming.lock().unwrap().pop_front() {
                Some(Incoming::Bytes(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Incoming::Closed) => Ok(0),
                Some(Incoming::Fail(kind)) => Err(io::Error::new(kind, "scripted failure")),
                Some(Incoming::Timeout) | None => Err(io::ErrorKind::WouldBlock.into()),
            }
        }

        fn close(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    /// Hands out clones of one scripted transport. The first `failures`
    /// connects are refused.
    #[derive(Clone, Default)]
    pub(crate) struct MockConnector {
        pub transport: MockTransport,
        pub failures: Arc<Mutex<u32>>,
        pub connects: Arc<Mutex<u32>>,
    }

    impl Connector for MockConnector {
        type Transport = MockTransport;

        fn connect(&mut self) -> Result<MockTransport> {
            *self.connects.lock().unwrap() += 1;
            let mut failures = self.failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Err(Error::Connect {
                    addr: "mock:0".into(),
                    source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
                });
            }
            Ok(self.transport.clone())
        }
    }

    #[test]
    fn test_framer_joins_fragments() {
        let mut framer = LineFramer::default();
        assert!(framer.push(b"{\"a\":").unwrap().is_empty());
        assert_eq!(framer.push(b"1}\n{\"b\"").unwrap(), vec!["{\"a\":1}"]);
        assert_eq!(framer.push(b":2}\r\n\n").unwrap(), vec!["{\"b\":2}"]);
    }

    #[test]
    fn test_framer_rejects_runaway_line() {
        let mut framer = LineFramer::default();
        let junk = vec![b'x'; MAX_LINE_LEN + 1];
        assert!(matches!(framer.push(&junk), Err(Error::Malformed(_))));
        assert!(framer.push(b"{}\n").unwrap() == vec!["{}"]);
    }

    #[test]
    fn test_read_messages_multiple_objects() {
        let mock = MockTransport::default();
        mock.push(Incoming::Bytes(
            b"{\"result\":{\"status\":\"OK\"}}\ngarbage\n{\"params\":{}}\n".to_vec(),
        ));
        let mut stratum = Stratum::new(mock);
        let messages = stratum.read_messages().unwrap().unwrap();
        assert_eq!(messages.len(), 2);
        assert!(messages[1].get("params").is_some());
    }

    #[test]
    fn test_read_messages_partial_then_complete() {
        let mock = MockTransport::default();
        mock.push(Incoming::Bytes(b"{\"id\":".to_vec()));
        mock.push(Incoming::Bytes(b"1}\n".to_vec()));
        let mut stratum = Stratum::new(mock);
        assert!(stratum.read_messages().unwrap().is_none());
        assert_eq!(stratum.read_messages().unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_read_messages_malformed() {
        let mock = MockTransport::default();
        mock.push_line("not json");
        let mut stratum = Stratum::new(mock);
        assert!(matches!(stratum.read_messages(), Err(Error::Malformed(_))));
    }

    #[test]
    fn test_read_messages_close_and_timeout() {
        let mock = MockTransport::default();
        mock.push(Incoming::Timeout);
        mock.push(Incoming::Fail(io::ErrorKind::ConnectionReset));
        mock.push(Incoming::Closed);
        let mut stratum = Stratum::new(mock);
        assert!(stratum.read_messages().unwrap().is_none());
        assert!(matches!(stratum.read_messages(), Err(Error::Io(_))));
        assert!(matches!(stratum.read_messages(), Err(Error::Disconnected)));
    }

    #[test]
    fn test_poll_messages_does_not_wait() {
        let mock = MockTransport::default();
        let mut stratum = Stratum::new(mock.clone());
        assert!(stratum.poll_messages().unwrap().is_none());
        mock.push_line(r#"{"params":{"job_id":"j2"}}"#);
        let messages = stratum.poll_messages().unwrap().unwrap();
        assert_eq!(messages[0]["params"]["job_id"], "j2");
    }

    #[test]
    fn test_send_failure_is_io_error() {
        let mock = MockTransport::default();
        mock.fail_next_send(io::ErrorKind::BrokenPipe);
        let mut stratum = Stratum::new(mock.clone());
        let err = stratum.keep_alive("m").unwrap_err();
        assert!(err.needs_reconnect());
        assert!(mock.sent().is_empty());
        stratum.keep_alive("m").unwrap();
        assert_eq!(mock.sent_methods(), vec!["keepalived"]);
    }

    #[test]
    fn test_login_and_submit_lines() {
        let mock = MockTransport::default();
        let mut stratum = Stratum::new(mock.clone());
        stratum
            .login(LoginParams {
                login: "acct".into(),
                pass: "x".into(),
                rigid: "test".into(),
                agent: "2.0".into(),
            })
            .unwrap();
        stratum
            .submit(ShareSubmission {
                miner_id: "m".into(),
                job_id: "j".into(),
                nonce: "00000001".into(),
                result: "00".repeat(32),
            })
            .unwrap();
        stratum.close();
        assert_eq!(mock.sent_methods(), vec!["login", "submit"]);
        assert!(mock.sent().iter().all(|line| line.ends_with('\n')));
        assert!(*mock.closed.lock().unwrap());
    }
}
