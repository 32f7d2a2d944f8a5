//! # Request Boundary
//!
//! What the dispatch core needs from a transport: a validated command, the raw
//! parameter map, framework-supplied values, the caller's [`Session`], a
//! sequence number and receive timestamp, the raw payload for tracing, a
//! lazily created chunk stream and profiler marks.
//!
//! Transports build requests with [`Request::builder`] (or
//! [`Kernel::request`](crate::lifecycle::Kernel::request), which applies the
//! kernel's stream buffer).

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::framework::error::{ActionError, RequestError, SessionError};
use crate::framework::value::{Bound, ParamMap, ParamValue};

const DEFAULT_STREAM_BUFFER: usize = 64;

/// The caller's session, owned by the transport.
#[async_trait]
pub trait Session: Send + Sync + fmt::Debug {
    fn id(&self) -> &str;

    /// Sequence number for the next request of this session.
    fn next_seq(&self) -> u64;

    /// Persists pending session mutations. Called once per dispatch.
    async fn flush(&self) -> Result<(), SessionError> {
        Ok(())
    }
}

/// An in-memory session with nothing to persist.
#[derive(Debug)]
pub struct LocalSession {
    id: String,
    seq: AtomicU64,
}

impl LocalSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            seq: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Session for LocalSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// A dot-delimited command such as `user.login`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command(String);

impl Command {
    pub fn parse(raw: &str) -> Result<Self, RequestError> {
        let valid = !raw.is_empty()
            && raw.split('.').all(|segment| {
                !segment.is_empty()
                    && segment
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            });
        if valid {
            Ok(Self(raw.to_owned()))
        } else {
            Err(RequestError::InvalidCommand(raw.to_owned()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('.')
    }

    /// First segment, the module the command belongs to.
    pub fn module(&self) -> &str {
        self.segments().next().unwrap_or_default()
    }
}

impl FromStr for Command {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Writing half of a chunked response.
///
/// Clones share one channel; [`ChunkWriter::close`] ends the stream for all of
/// them, which matters because the request itself keeps a writer.
#[derive(Clone)]
pub struct ChunkWriter {
    tx: Arc<Mutex<Option<mpsc::Sender<Vec<u8>>>>>,
    newline: Arc<AtomicBool>,
}

impl ChunkWriter {
    pub fn channel(buffer: usize) -> (ChunkWriter, ChunkReader) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let writer = ChunkWriter {
            tx: Arc::new(Mutex::new(Some(tx))),
            newline: Arc::new(AtomicBool::new(true)),
        };
        (writer, ChunkReader { rx })
    }

    pub async fn write(&self, data: impl Into<Vec<u8>>) -> Result<(), ActionError> {
        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }
        let tx = self.sender().ok_or_else(closed)?;
        let ends_with_newline = data.last() == Some(&b'\n');
        tx.send(data).await.map_err(|_| closed())?;
        self.newline.store(ends_with_newline, Ordering::Release);
        Ok(())
    }

    /// Writes `text` followed by a newline.
    pub async fn line(&self, text: &str) -> Result<(), ActionError> {
        self.write(format!("{text}\n")).await
    }

    /// Whether the last chunk written ended a line (true before any write).
    pub fn ends_with_newline(&self) -> bool {
        self.newline.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    fn sender(&self) -> Option<mpsc::Sender<Vec<u8>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl fmt::Debug for ChunkWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkWriter")
            .field("closed", &self.is_closed())
            .finish()
    }
}

fn closed() -> ActionError {
    ActionError::Io(io::Error::new(io::ErrorKind::BrokenPipe, "chunk stream closed"))
}

/// Reading half of a chunked response, handed to the transport.
#[derive(Debug)]
pub struct ChunkReader {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl ChunkReader {
    pub async fn next(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }

    /// Drains the stream until every writer is closed.
    pub async fn collect(mut self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = self.rx.recv().await {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

struct ChunkChannel {
    writer: ChunkWriter,
    reader: Mutex<Option<ChunkReader>>,
}

/// One inbound request.
pub struct Request {
    cmd: Command,
    params: ParamMap,
    framework: HashMap<String, Bound>,
    session: Arc<dyn Session>,
    seq: u64,
    received_at_ms: i64,
    content: String,
    stream_buffer: usize,
    stream: OnceLock<ChunkChannel>,
    started: Instant,
    marks: Mutex<Vec<(String, Instant)>>,
}

impl Request {
    pub fn builder(cmd: impl Into<String>, session: Arc<dyn Session>) -> RequestBuilder {
        RequestBuilder {
            cmd: cmd.into(),
            session,
            params: ParamMap::new(),
            framework: HashMap::new(),
            content: None,
            received_at_ms: None,
            stream_buffer: DEFAULT_STREAM_BUFFER,
        }
    }

    pub fn cmd(&self) -> &Command {
        &self.cmd
    }

    pub fn params(&self) -> &ParamMap {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// A value the transport stashed for `__name` parameters.
    pub fn framework_value(&self, name: &str) -> Option<&Bound> {
        self.framework.get(name)
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Receive time in milliseconds since the epoch.
    pub fn received_at_ms(&self) -> i64 {
        self.received_at_ms
    }

    /// The raw payload as received.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// At most `limit` characters of the raw payload, for traces.
    pub fn content_prefix(&self, limit: usize) -> &str {
        match self.content.char_indices().nth(limit) {
            Some((end, _)) => &self.content[..end],
            None => &self.content,
        }
    }

    /// The request's chunk writer, created on first use.
    pub fn init_stream(&self) -> ChunkWriter {
        self.stream
            .get_or_init(|| {
                let (writer, reader) = ChunkWriter::channel(self.stream_buffer);
                ChunkChannel {
                    writer,
                    reader: Mutex::new(Some(reader)),
                }
            })
            .writer
            .clone()
    }

    pub fn has_stream(&self) -> bool {
        self.stream.get().is_some()
    }

    /// Hands the reading half to the transport; `None` once taken.
    pub fn take_stream_reader(&self) -> Option<ChunkReader> {
        self.stream
            .get()?
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Records a profiler step.
    pub fn mark(&self, step: impl Into<String>) {
        self.marks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((step.into(), Instant::now()));
    }

    /// Profiler steps with the time spent since the previous mark.
    pub fn marks(&self) -> Vec<(String, Duration)> {
        let marks = self.marks.lock().unwrap_or_else(PoisonError::into_inner);
        let mut previous = self.started;
        marks
            .iter()
            .map(|(step, at)| {
                let spent = at.saturating_duration_since(previous);
                previous = *at;
                (step.clone(), spent)
            })
            .collect()
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("cmd", &self.cmd)
            .field("session", &self.session.id())
            .field("seq", &self.seq)
            .field("params", &self.params.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.cmd, self.session.id())
    }
}

/// Builder for [`Request`].
#[derive(Debug)]
pub struct RequestBuilder {
    cmd: String,
    session: Arc<dyn Session>,
    params: ParamMap,
    framework: HashMap<String, Bound>,
    content: Option<String>,
    received_at_ms: Option<i64>,
    stream_buffer: usize,
}

impl RequestBuilder {
    pub fn param(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<ParamValue>,
    {
        self.params
            .extend(params.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Stashes a value for a `__name` framework parameter.
    pub fn framework_value(mut self, name: impl Into<String>, value: Bound) -> Self {
        self.framework.insert(name.into(), value);
        self
    }

    /// The raw payload; derived from the parameters when not given.
    pub fn content(mut self, raw: impl Into<String>) -> Self {
        self.content = Some(raw.into());
        self
    }

    /// Pins the receive time, for replayed requests.
    pub fn received_at(mut self, ms: i64) -> Self {
        self.received_at_ms = Some(ms);
        self
    }

    pub fn stream_buffer(mut self, buffer: usize) -> Self {
        self.stream_buffer = buffer;
        self
    }

    pub fn build(self) -> Result<Arc<Request>, RequestError> {
        let cmd = Command::parse(&self.cmd)?;
        let mut framework = self.framework;
        framework.insert("__cmd".to_owned(), Bound::Str(cmd.as_str().to_owned()));
        let content = self.content.unwrap_or_else(|| dump_params(&self.params));
        let seq = self.session.next_seq();
        Ok(Arc::new(Request {
            cmd,
            params: self.params,
            framework,
            session: self.session,
            seq,
            received_at_ms: self
                .received_at_ms
                .unwrap_or_else(|| Utc::now().timestamp_millis()),
            content,
            stream_buffer: self.stream_buffer,
            stream: OnceLock::new(),
            started: Instant::now(),
            marks: Mutex::new(Vec::new()),
        }))
    }
}

/// JSON view of the parameters for traces; private keys are skipped and bytes summarised.
fn dump_params(params: &ParamMap) -> String {
    let view: serde_json::Map<String, serde_json::Value> = params
        .iter()
        .filter(|(k, _)| !k.starts_with(&['#', '_', '$'][..]))
        .map(|(k, v)| {
            let value = match v {
                ParamValue::Json(json) => json.clone(),
                ParamValue::Bytes(bytes) => serde_json::Value::String(format!("bytes[{}]", bytes.len())),
            };
            (k.clone(), value)
        })
        .collect();
    serde_json::Value::Object(view).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Arc<dyn Session> {
        Arc::new(LocalSession::new("s-1"))
    }

    #[test]
    fn commands_are_dot_delimited() {
        assert_eq!(Command::parse("user.login").unwrap().module(), "user");
        assert!(Command::parse("user..login").is_err());
        assert!(Command::parse("").is_err());
        assert!(Command::parse("user login").is_err());
    }

    #[test]
    fn build_assigns_seq_and_cmd_value() {
        let session = session();
        let first = Request::builder("a.b", session.clone()).build().unwrap();
        let second = Request::builder("a.b", session).build().unwrap();
        assert_eq!(second.seq(), first.seq() + 1);
        assert!(matches!(first.framework_value("__cmd"), Some(Bound::Str(cmd)) if cmd == "a.b"));
    }

    #[test]
    fn derived_content_hides_private_keys_and_bytes() {
        let req = Request::builder("a.b", session())
            .param("uid", 7)
            .param("_token", "secret")
            .param("file", vec![1u8, 2, 3])
            .build()
            .unwrap();
        assert!(req.content().contains("\"uid\":7"));
        assert!(!req.content().contains("secret"));
        assert!(req.content().contains("bytes[3]"));
    }

    #[test]
    fn content_prefix_respects_char_boundaries() {
        let req = Request::builder("a.b", session())
            .content("héllo")
            .build()
            .unwrap();
        assert_eq!(req.content_prefix(2), "hé");
        assert_eq!(req.content_prefix(100), "héllo");
    }

    #[tokio::test]
    async fn stream_is_created_once_and_closes() {
        let req = Request::builder("a.b", session()).build().unwrap();
        assert!(!req.has_stream());
        let writer = req.init_stream();
        let again = req.init_stream();
        let reader = req.take_stream_reader().unwrap();
        assert!(req.take_stream_reader().is_none());

        writer.line("one").await.unwrap();
        again.write("two").await.unwrap();
        assert!(!writer.ends_with_newline());
        writer.close();
        assert!(again.is_closed());
        assert!(again.write("three").await.is_err());
        assert_eq!(reader.collect().await, b"one\ntwo".to_vec());
    }
}
