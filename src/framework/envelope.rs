//! # Response Envelope
//!
//! Every JSON response travels in an [`Envelope`]:
//!
//! ```json
//! {"ret": 0, "result": {...}, "cmd": "user.login", "receive": 1700000000000, "seq": 3}
//! ```
//!
//! `ret` is `0` on success, a business code on expected failure and a
//! negative number on fatal failure. `error` and `debug` are only present on
//! failures; `debug` is stripped from the wire unless debug exposure is on.
//!
//! [`Packet`] is what a dispatch produces (JSON, HTML, raw bytes or a chunk
//! stream) and [`Reply`] is what a handler returns before it is shaped into one.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::framework::request::{ChunkReader, Request};

fn default_status() -> u16 {
    200
}

fn unattached() -> i64 {
    -1
}

/// The JSON response document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub ret: i32,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub cmd: String,
    #[serde(rename = "receive", default = "unattached")]
    pub received_at_ms: i64,
    #[serde(default = "unattached")]
    pub seq: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<String>,
    /// HTTP status for transports that have one; never serialized.
    #[serde(skip, default = "default_status")]
    pub status: u16,
}

impl Envelope {
    pub fn new(ret: i32, result: Value) -> Self {
        Self {
            ret,
            result,
            error: None,
            cmd: String::new(),
            received_at_ms: -1,
            seq: -1,
            debug: None,
            status: 200,
        }
    }

    pub fn ok(result: Value) -> Self {
        Self::new(0, result)
    }

    /// `{ret: 0, result: {}}`.
    pub fn empty() -> Self {
        Self::ok(Value::Object(Map::new()))
    }

    /// `{ret: 0, result: {"msg": text}}`.
    pub fn text(msg: impl Into<String>) -> Self {
        let mut result = Map::new();
        result.insert("msg".to_owned(), Value::String(msg.into()));
        Self::ok(Value::Object(result))
    }

    pub fn error(ret: i32, message: impl Into<String>) -> Self {
        Self::new(ret, Value::Null).with_error(message)
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error = Some(message.into());
        self
    }

    pub fn with_debug(mut self, debug: impl Into<String>) -> Self {
        self.debug = Some(debug.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Copies command, receive time and sequence number from the request.
    pub fn attach(&mut self, request: &Request) {
        self.cmd = request.cmd().to_string();
        self.received_at_ms = request.received_at_ms();
        self.seq = i64::try_from(request.seq()).unwrap_or(i64::MAX);
    }

    pub fn is_success(&self) -> bool {
        self.ret == 0
    }

    /// Serialized form; `debug` only survives when `expose_debug` is set.
    pub fn to_wire(&self, expose_debug: bool) -> Result<Vec<u8>, serde_json::Error> {
        if expose_debug || self.debug.is_none() {
            serde_json::to_vec(self)
        } else {
            let mut stripped = self.clone();
            stripped.debug = None;
            serde_json::to_vec(&stripped)
        }
    }
}

/// An HTML page, e.g. a login prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct HtmlPacket {
    pub content: String,
    pub status: u16,
    /// Realm for a `WWW-Authenticate: Basic` challenge.
    pub basic_auth_realm: Option<String>,
}

impl HtmlPacket {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            status: 200,
            basic_auth_realm: None,
        }
    }

    /// A `401` asking for basic authentication.
    pub fn need_auth(realm: impl Into<String>) -> Self {
        Self {
            content: "Need Auth".to_owned(),
            status: 401,
            basic_auth_realm: Some(realm.into()),
        }
    }
}

/// Raw bytes with their own content type, e.g. a download.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPacket {
    pub content: Vec<u8>,
    pub content_type: String,
    pub status: u16,
}

impl RawPacket {
    pub fn new(content: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            content_type: content_type.into(),
            status: 200,
        }
    }
}

/// A chunked text response still being produced.
#[derive(Debug)]
pub struct ChunkPacket {
    pub reader: ChunkReader,
    pub content_type: String,
}

impl ChunkPacket {
    pub fn new(reader: ChunkReader) -> Self {
        Self {
            reader,
            content_type: "text/plain; charset=utf-8".to_owned(),
        }
    }
}

/// What a dispatch hands back to the transport.
#[derive(Debug)]
pub enum Packet {
    Json(Envelope),
    Html(HtmlPacket),
    Raw(RawPacket),
    Chunk(ChunkPacket),
}

impl Packet {
    pub fn content_type(&self) -> &str {
        match self {
            Packet::Json(_) => "application/json; charset=utf-8",
            Packet::Html(_) => "text/html; charset=utf-8",
            Packet::Raw(raw) => &raw.content_type,
            Packet::Chunk(chunk) => &chunk.content_type,
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            Packet::Json(envelope) => envelope.status,
            Packet::Html(html) => html.status,
            Packet::Raw(raw) => raw.status,
            Packet::Chunk(_) => 200,
        }
    }

    /// `ret` of a JSON packet; other packets count as success.
    pub fn ret(&self) -> i32 {
        match self {
            Packet::Json(envelope) => envelope.ret,
            _ => 0,
        }
    }

    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Packet::Json(envelope) => Some(envelope),
            _ => None,
        }
    }

    pub fn into_envelope(self) -> Option<Envelope> {
        match self {
            Packet::Json(envelope) => Some(envelope),
            _ => None,
        }
    }

    pub fn into_chunk_reader(self) -> Option<ChunkReader> {
        match self {
            Packet::Chunk(chunk) => Some(chunk.reader),
            _ => None,
        }
    }

    /// Body bytes for non-streaming packets; a chunk packet has none.
    pub fn to_write_data(&self, expose_debug: bool) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Packet::Json(envelope) => envelope.to_wire(expose_debug),
            Packet::Html(html) => Ok(html.content.clone().into_bytes()),
            Packet::Raw(raw) => Ok(raw.content.clone()),
            Packet::Chunk(_) => Ok(Vec::new()),
        }
    }
}

impl From<Envelope> for Packet {
    fn from(envelope: Envelope) -> Self {
        Packet::Json(envelope)
    }
}

/// A handler's return value before response shaping.
#[derive(Debug)]
pub enum Reply {
    Empty,
    Packet(Packet),
    Map(Map<String, Value>),
    List(Vec<Value>),
    Text(String),
    Bool(bool),
    /// A value with no response form; dispatch turns it into a fatal error.
    Unsupported { type_name: &'static str },
}

impl Reply {
    /// Marks `value` as something the dispatcher cannot turn into a response.
    pub fn opaque<T>(_value: T) -> Self {
        Reply::Unsupported {
            type_name: std::any::type_name::<T>(),
        }
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Reply::Empty
    }
}

impl From<Packet> for Reply {
    fn from(packet: Packet) -> Self {
        Reply::Packet(packet)
    }
}

impl From<Envelope> for Reply {
    fn from(envelope: Envelope) -> Self {
        Reply::Packet(Packet::Json(envelope))
    }
}

impl From<Map<String, Value>> for Reply {
    fn from(map: Map<String, Value>) -> Self {
        Reply::Map(map)
    }
}

impl From<Vec<Value>> for Reply {
    fn from(items: Vec<Value>) -> Self {
        Reply::List(items)
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Reply::Text(text)
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        Reply::Text(text.to_owned())
    }
}

impl From<bool> for Reply {
    fn from(flag: bool) -> Self {
        Reply::Bool(flag)
    }
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Reply::Empty,
            Value::Bool(flag) => Reply::Bool(flag),
            Value::String(text) => Reply::Text(text),
            Value::Object(map) => Reply::Map(map),
            Value::Array(items) => Reply::List(items),
            Value::Number(_) => Reply::Unsupported { type_name: "number" },
        }
    }
}

impl<R: Into<Reply>> From<Option<R>> for Reply {
    fn from(value: Option<R>) -> Self {
        value.map_or(Reply::Empty, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn debug_is_stripped_unless_exposed() {
        let envelope = Envelope::error(-2, "server error").with_debug("boom");
        let hidden: Value = serde_json::from_slice(&envelope.to_wire(false).unwrap()).unwrap();
        let shown: Value = serde_json::from_slice(&envelope.to_wire(true).unwrap()).unwrap();
        assert!(hidden.get("debug").is_none());
        assert_eq!(shown["debug"], "boom");
        assert_eq!(hidden["result"], Value::Null);
    }

    #[test]
    fn success_envelope_has_no_error_field() {
        let wire: Value = serde_json::from_slice(&Envelope::text("hi").to_wire(true).unwrap()).unwrap();
        assert_eq!(wire, json!({"ret": 0, "result": {"msg": "hi"}, "cmd": "", "receive": -1, "seq": -1}));
    }

    #[test]
    fn numbers_have_no_reply_form() {
        assert!(matches!(Reply::from(json!(3)), Reply::Unsupported { .. }));
        assert!(matches!(Reply::from(json!({"a": 1})), Reply::Map(_)));
        assert!(matches!(Reply::from(None::<String>), Reply::Empty));
    }
}
