//! # Values
//!
//! Two worlds meet here:
//!
//! - **Wire values** ([`ParamValue`]): what the transport hands over. Form and query
//!   transports deliver text, JSON transports deliver native structures, multipart
//!   delivers raw bytes.
//! - **Bound values** ([`Bound`]): what an injector produced after coercion and
//!   validation. Handlers read them through [`Args`](crate::action::Args).
//!
//! [`TypeTag`] is the declared type of a handler parameter and drives which
//! injector strategy is selected at registration.

use base64::Engine;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::any::Any;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::framework::request::{ChunkWriter, Request, Session};

/// One raw parameter as delivered by the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Json(Value),
    Bytes(Vec<u8>),
}

/// The raw parameter map of a request, in arrival order.
pub type ParamMap = IndexMap<String, ParamValue>;

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        ParamValue::Json(value)
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Json(Value::String(value.to_owned()))
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Json(Value::String(value))
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Json(Value::from(value))
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Json(Value::from(value))
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Json(Value::from(value))
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Json(Value::Bool(value))
    }
}

impl From<Vec<u8>> for ParamValue {
    fn from(value: Vec<u8>) -> Self {
        ParamValue::Bytes(value)
    }
}

/// Text form of a native JSON value, used when a strategy only knows how to read text.
pub fn text_of(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

/// Element type of array and set parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElemTag {
    Any,
    Str,
    Int,
    Float,
    Bool,
}

impl ElemTag {
    /// Coerces one textual element.
    pub fn coerce_text(self, text: &str) -> Option<Value> {
        match self {
            ElemTag::Any | ElemTag::Str => Some(Value::String(text.to_owned())),
            ElemTag::Int => text.trim().parse::<i64>().ok().map(Value::from),
            ElemTag::Float => text
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number),
            ElemTag::Bool => parse_bool(text).map(Value::Bool),
        }
    }

    /// Coerces one native element; strings go through [`ElemTag::coerce_text`].
    pub fn coerce(self, value: &Value) -> Option<Value> {
        if let Value::String(text) = value {
            return self.coerce_text(text);
        }
        match (self, value) {
            (ElemTag::Any, v) => Some(v.clone()),
            (ElemTag::Str, Value::Number(_) | Value::Bool(_)) => Some(Value::String(text_of(value))),
            (ElemTag::Int, Value::Number(n)) => n.as_i64().map(Value::from),
            (ElemTag::Float, Value::Number(n)) => n.as_f64().and_then(Number::from_f64).map(Value::Number),
            (ElemTag::Bool, Value::Bool(b)) => Some(Value::Bool(*b)),
            _ => None,
        }
    }
}

impl fmt::Display for ElemTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ElemTag::Any => "any",
            ElemTag::Str => "str",
            ElemTag::Int => "int",
            ElemTag::Float => "float",
            ElemTag::Bool => "bool",
        };
        f.write_str(name)
    }
}

/// Case-insensitive `true`/`false`.
pub fn parse_bool(text: &str) -> Option<bool> {
    if text.eq_ignore_ascii_case("true") {
        Some(true)
    } else if text.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// A hashable, ordered scalar. Sets and domains are made of these.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl Scalar {
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Number(n) => n.as_i64().map(Scalar::Int),
            Value::String(s) => Some(Scalar::Str(s.clone())),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(i) => Value::from(*i),
            Scalar::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::Int(i) => write!(f, "{i}"),
            Scalar::Str(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::Str(value.to_owned())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::Str(value)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Scalar::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Scalar::Int(i64::from(value))
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Scalar::Bool(value)
    }
}

/// Renders a set as `{a, b}` for error messages.
pub fn describe_set<'a, T: fmt::Display + 'a>(items: impl IntoIterator<Item = &'a T>) -> String {
    let parts: Vec<String> = items.into_iter().map(ToString::to_string).collect();
    format!("{{{}}}", parts.join(", "))
}

/// One member of a declared enumeration.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct EnumMember {
    pub name: String,
    pub value: Scalar,
}

/// A declared enumeration: named members with scalar values.
#[derive(Debug, Clone, PartialEq)]
pub struct EnumDef {
    name: String,
    members: Vec<EnumMember>,
}

impl EnumDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: Vec::new(),
        }
    }

    pub fn member(mut self, name: impl Into<String>, value: impl Into<Scalar>) -> Self {
        self.members.push(EnumMember {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn members(&self) -> &[EnumMember] {
        &self.members
    }

    /// Whether every member carries an integer value.
    pub fn is_numeric(&self) -> bool {
        !self.members.is_empty() && self.members.iter().all(|m| matches!(m.value, Scalar::Int(_)))
    }

    /// Looks a member up by name, then by the text form of its value.
    pub fn lookup(&self, key: &str) -> Option<&EnumMember> {
        self.members
            .iter()
            .find(|m| m.name == key)
            .or_else(|| self.members.iter().find(|m| m.value.to_string() == key))
    }

    /// Looks a member up from a native value: numbers and booleans by value, strings by [`EnumDef::lookup`].
    pub fn lookup_value(&self, value: &Value) -> Option<&EnumMember> {
        match value {
            Value::String(s) => self.lookup(s),
            other => {
                let scalar = Scalar::from_json(other)?;
                self.members.iter().find(|m| m.value == scalar)
            }
        }
    }
}

/// The declared type of a handler parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeTag {
    Str,
    Int,
    Float,
    Bool,
    Object,
    Array(ElemTag),
    Set(ElemTag),
    Bytes,
    Enum(Arc<EnumDef>),
    IntEnum(Arc<EnumDef>),
    EnumSet(Arc<EnumDef>),
    Optional(Box<TypeTag>),
    /// A type only a custom injector understands.
    Named(&'static str),
}

impl TypeTag {
    pub fn optional(inner: TypeTag) -> Self {
        TypeTag::Optional(Box::new(inner))
    }

    /// Type of an untyped parameter, guessed from its default value.
    pub fn infer(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(_) => Some(TypeTag::Bool),
            Value::Number(n) if n.is_f64() => Some(TypeTag::Float),
            Value::Number(_) => Some(TypeTag::Int),
            Value::String(_) => Some(TypeTag::Str),
            Value::Object(_) => Some(TypeTag::Object),
            Value::Array(_) => Some(TypeTag::Array(ElemTag::Any)),
            Value::Null => None,
        }
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Str => f.write_str("str"),
            TypeTag::Int => f.write_str("int"),
            TypeTag::Float => f.write_str("float"),
            TypeTag::Bool => f.write_str("bool"),
            TypeTag::Object => f.write_str("dict"),
            TypeTag::Array(elem) => write!(f, "list[{elem}]"),
            TypeTag::Set(elem) => write!(f, "set[{elem}]"),
            TypeTag::Bytes => f.write_str("bytes"),
            TypeTag::Enum(def) | TypeTag::IntEnum(def) => f.write_str(def.name()),
            TypeTag::EnumSet(def) => write!(f, "set[{}]", def.name()),
            TypeTag::Optional(inner) => write!(f, "optional[{inner}]"),
            TypeTag::Named(name) => f.write_str(name),
        }
    }
}

/// Raw bytes bound from a base64 or multipart parameter.
///
/// `Debug` only shows the first 30 bytes so large uploads stay out of the logs.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Blob(pub Vec<u8>);

impl Blob {
    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl std::ops::Deref for Blob {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.len() > 30 {
            write!(f, "b\"{}\"...", self.0[..30].escape_ascii())
        } else {
            write!(f, "b\"{}\"", self.0.escape_ascii())
        }
    }
}

/// A coerced, validated parameter value ready to hand to a handler.
#[derive(Debug, Clone)]
pub enum Bound {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Blob),
    Object(Map<String, Value>),
    Array(Vec<Value>),
    Set(BTreeSet<Scalar>),
    Member(EnumMember),
    Members(BTreeSet<EnumMember>),
    Stream(ChunkWriter),
    Request(Arc<Request>),
    Session(Arc<dyn Session>),
    Params(ParamMap),
    /// Anything a registered reserved accessor wants to hand over.
    Extension(Arc<dyn Any + Send + Sync>),
}

impl Bound {
    pub fn type_name(&self) -> &'static str {
        match self {
            Bound::Null => "null",
            Bound::Bool(_) => "bool",
            Bound::Int(_) => "int",
            Bound::Float(_) => "float",
            Bound::Str(_) => "str",
            Bound::Bytes(_) => "bytes",
            Bound::Object(_) => "dict",
            Bound::Array(_) => "list",
            Bound::Set(_) => "set",
            Bound::Member(_) => "enum",
            Bound::Members(_) => "enum set",
            Bound::Stream(_) => "stream",
            Bound::Request(_) => "request",
            Bound::Session(_) => "session",
            Bound::Params(_) => "params",
            Bound::Extension(_) => "extension",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Bound::Null)
    }

    /// JSON view of the value; framework handles have no JSON form and map to `null`.
    pub fn to_json(&self) -> Value {
        match self {
            Bound::Null => Value::Null,
            Bound::Bool(b) => Value::Bool(*b),
            Bound::Int(i) => Value::from(*i),
            Bound::Float(x) => Number::from_f64(*x).map_or(Value::Null, Value::Number),
            Bound::Str(s) => Value::String(s.clone()),
            Bound::Bytes(blob) => Value::String(base64::engine::general_purpose::STANDARD.encode(&blob.0)),
            Bound::Object(map) => Value::Object(map.clone()),
            Bound::Array(items) => Value::Array(items.clone()),
            Bound::Set(items) => Value::Array(items.iter().map(Scalar::to_json).collect()),
            Bound::Member(member) => member.value.to_json(),
            Bound::Members(members) => Value::Array(members.iter().map(|m| m.value.to_json()).collect()),
            Bound::Params(params) => Value::Object(
                params
                    .iter()
                    .map(|(k, v)| {
                        let value = match v {
                            ParamValue::Json(json) => json.clone(),
                            ParamValue::Bytes(bytes) => Value::String(format!("bytes[{}]", bytes.len())),
                        };
                        (k.clone(), value)
                    })
                    .collect(),
            ),
            Bound::Stream(_) | Bound::Request(_) | Bound::Session(_) | Bound::Extension(_) => Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn elem_coercion_follows_declared_type() {
        assert_eq!(ElemTag::Int.coerce_text(" 7 "), Some(json!(7)));
        assert_eq!(ElemTag::Int.coerce(&json!("8")), Some(json!(8)));
        assert_eq!(ElemTag::Int.coerce(&json!(1.5)), None);
        assert_eq!(ElemTag::Str.coerce(&json!(3)), Some(json!("3")));
        assert_eq!(ElemTag::Bool.coerce_text("TRUE"), Some(json!(true)));
        assert_eq!(ElemTag::Bool.coerce_text("yes"), None);
    }

    #[test]
    fn enum_lookup_by_name_value_and_text() {
        let def = EnumDef::new("Color").member("Red", 1).member("Green", 2);
        assert_eq!(def.lookup("Red").map(|m| &m.name[..]), Some("Red"));
        assert_eq!(def.lookup("2").map(|m| &m.name[..]), Some("Green"));
        assert_eq!(def.lookup_value(&json!(1)).map(|m| &m.name[..]), Some("Red"));
        assert!(def.lookup("Blue").is_none());
        assert!(def.is_numeric());
    }

    #[test]
    fn blob_debug_is_truncated() {
        let blob = Blob(vec![b'a'; 40]);
        let shown = format!("{blob:?}");
        assert!(shown.ends_with("..."));
        assert_eq!(shown.matches('a').count(), 30);
    }

    #[test]
    fn untyped_declarations_infer_from_default() {
        assert_eq!(TypeTag::infer(&json!(1)), Some(TypeTag::Int));
        assert_eq!(TypeTag::infer(&json!(1.0)), Some(TypeTag::Float));
        assert_eq!(TypeTag::infer(&json!("x")), Some(TypeTag::Str));
        assert_eq!(TypeTag::infer(&Value::Null), None);
    }
}
