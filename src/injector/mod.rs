//! # Injectors
//!
//! An injector turns one raw request parameter into one typed handler
//! argument. Each handler parameter gets exactly one injector, picked when
//! the action is registered and then reused for every request.
//!
//! ## 🧩 Selection
//!
//! An [`InjectorRegistry`] holds an ordered list of candidates. For a
//! parameter [`Declaration`] every candidate is tried in ascending priority
//! and the **last** one that accepts wins:
//!
//! ```text
//! framework, str, int, float, bool, object, array, set, enum_int, temp_enum,
//! temp_enum_set, enum, enum_set, int_enum, bytes, pattern, stream, <custom...>
//! ```
//!
//! More specific strategies sit later so they shadow the generic ones. A
//! `set[int]` with a domain default is accepted by `set` *and* by
//! `temp_enum_set`; the domain check wins.
//!
//! ## 🔌 Binding
//!
//! [`Injector::bind`] reads the parameter by its alias and reports a
//! [`Binding`]:
//!
//! - absent: the default (converted at registration), or `Missing`;
//! - JSON `null`: `Null` when the parameter allows it, or `Missing`;
//! - a string: [`Injector::from_text`];
//! - any other JSON value: [`Injector::from_native`];
//! - raw bytes: [`Injector::from_bytes`].
//!
//! Reserved (`__request`, `__session`, ...), stream and framework parameters
//! override `bind` and never look at the parameter map.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use crate::framework::code::{Code, CodeArgs, FrameworkCode};
use crate::framework::error::{ActionError, DeclarationError, StartupError};
use crate::framework::request::Request;
use crate::framework::value::{text_of, Bound, ElemTag, ParamValue, Scalar, TypeTag};

pub mod domain;
pub mod framework;
pub mod json;
pub mod scalar;

pub use domain::{DomainInjector, DomainKind, EnumInjector, EnumSetInjector, IntEnumInjector};
pub use framework::{FrameworkInjector, ReservedAccessor, ReservedInjector, ReservedParams, StreamInjector};
pub use json::{ArrayInjector, ObjectInjector, SetInjector};
pub use scalar::{BoolInjector, BytesInjector, FloatInjector, IntInjector, PatternInjector, StrInjector};

/// The default declared for a parameter.
#[derive(Debug, Clone)]
pub enum DefaultValue {
    /// Required parameter.
    Unset,
    /// Optional parameter defaulting to `null`.
    Null,
    Value(Value),
    /// Allowed values of a temporary enumeration.
    Domain(BTreeSet<Scalar>),
    /// Full-match constraint for a string parameter.
    Pattern(Regex),
}

impl DefaultValue {
    pub fn domain<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Scalar>,
    {
        DefaultValue::Domain(values.into_iter().map(Into::into).collect())
    }

    pub fn pattern(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(DefaultValue::Pattern)
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, DefaultValue::Unset)
    }
}

impl From<Value> for DefaultValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => DefaultValue::Null,
            other => DefaultValue::Value(other),
        }
    }
}

/// A handler parameter as declared, plus what validation derived from it.
#[derive(Debug, Clone)]
pub struct Declaration {
    /// Name the handler reads the argument by.
    pub param: String,
    /// Name of the request parameter it is bound from.
    pub alias: String,
    pub type_tag: TypeTag,
    pub default: DefaultValue,
    /// Declared as `Optional`.
    pub nullable: bool,
    /// Set by validation: a JSON `null` binds as `Bound::Null`.
    pub allow_none: bool,
    /// Set by validation: what an absent parameter binds to.
    pub fallback: Option<Bound>,
}

impl Declaration {
    pub fn new(param: impl Into<String>, type_tag: TypeTag) -> Self {
        let param = param.into();
        Self {
            alias: param.clone(),
            param,
            type_tag,
            default: DefaultValue::Unset,
            nullable: false,
            allow_none: false,
            fallback: None,
        }
    }

    /// Builds a declaration, inferring a missing type from the default.
    pub fn resolve(
        param: &str,
        alias: Option<&str>,
        type_tag: Option<TypeTag>,
        default: DefaultValue,
    ) -> Result<Self, DeclarationError> {
        let tag = match (type_tag, &default) {
            (Some(tag), _) => tag,
            (None, DefaultValue::Unset | DefaultValue::Pattern(_)) => TypeTag::Str,
            (None, DefaultValue::Value(value)) => {
                TypeTag::infer(value).ok_or_else(|| DeclarationError::Untyped(param.to_owned()))?
            }
            (None, DefaultValue::Domain(domain)) => TypeTag::Set(domain_elem(domain)),
            (None, DefaultValue::Null) => return Err(DeclarationError::Untyped(param.to_owned())),
        };
        let mut nullable = false;
        let mut tag = tag;
        while let TypeTag::Optional(inner) = tag {
            nullable = true;
            tag = *inner;
        }
        let mut declaration = Declaration::new(param, tag);
        declaration.alias = alias.unwrap_or(param).to_owned();
        declaration.default = default;
        declaration.nullable = nullable;
        Ok(declaration)
    }
}

impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.default {
            DefaultValue::Unset => write!(f, "<{}:{}>", self.alias, self.type_tag),
            DefaultValue::Null => write!(f, "{}:{}=null", self.alias, self.type_tag),
            DefaultValue::Value(value) => write!(f, "{}:{}={}", self.alias, self.type_tag, value),
            DefaultValue::Domain(domain) => write!(
                f,
                "{}:{}={}",
                self.alias,
                self.type_tag,
                crate::framework::value::describe_set(domain)
            ),
            DefaultValue::Pattern(re) => write!(f, "{}:{}=/{}/", self.alias, self.type_tag, re),
        }
    }
}

fn domain_elem(domain: &BTreeSet<Scalar>) -> ElemTag {
    if domain.iter().all(|s| matches!(s, Scalar::Int(_))) {
        ElemTag::Int
    } else if domain.iter().all(|s| matches!(s, Scalar::Str(_))) {
        ElemTag::Str
    } else {
        ElemTag::Any
    }
}

/// Outcome of binding one parameter.
#[derive(Debug)]
pub enum Binding {
    Value(Bound),
    /// Required parameter not supplied.
    Missing,
    Rejected(ActionError),
}

impl From<Result<Bound, ActionError>> for Binding {
    fn from(result: Result<Bound, ActionError>) -> Self {
        match result {
            Ok(bound) => Binding::Value(bound),
            Err(error) => Binding::Rejected(error),
        }
    }
}

/// A strategy for turning one raw parameter into one bound value.
pub trait Injector: Send + Sync + fmt::Debug {
    /// Strategy name used in logs and errors.
    fn kind(&self) -> &'static str;

    fn declaration(&self) -> &Declaration;

    fn declaration_mut(&mut self) -> &mut Declaration;

    /// Consumes strategy-specific configuration from the declaration.
    fn prepare(&mut self) -> Result<(), DeclarationError> {
        Ok(())
    }

    fn verify_param(&self) -> Result<(), DeclarationError> {
        let param = &self.declaration().param;
        if param.starts_with("__") {
            return Err(DeclarationError::ReservedPrefix(param.clone()));
        }
        Ok(())
    }

    fn verify_type(&self) -> Result<(), DeclarationError>;

    fn verify_default(&self, _default: &Value) -> Result<(), DeclarationError> {
        Ok(())
    }

    /// Converts the declared default into the value an absent parameter binds to.
    fn default_binding(&self, default: &DefaultValue) -> Result<Option<Bound>, DeclarationError> {
        match default {
            DefaultValue::Unset => Ok(None),
            DefaultValue::Null => Ok(Some(Bound::Null)),
            DefaultValue::Value(value) => {
                self.verify_default(value)?;
                self.from_native(value)
                    .map(Some)
                    .map_err(|error| DeclarationError::InvalidDefault {
                        kind: self.kind(),
                        reason: error.to_string(),
                    })
            }
            DefaultValue::Domain(_) => Err(DeclarationError::InvalidDefault {
                kind: self.kind(),
                reason: "a domain needs a domain injector".to_owned(),
            }),
            DefaultValue::Pattern(_) => Err(DeclarationError::InvalidDefault {
                kind: self.kind(),
                reason: "a pattern needs a pattern injector".to_owned(),
            }),
        }
    }

    /// Full declaration check; on success `allow_none` and `fallback` are set.
    fn validate(&mut self) -> Result<(), DeclarationError> {
        self.prepare()?;
        self.verify_param()?;
        self.verify_type()?;
        let default = self.declaration().default.clone();
        let fallback = self.default_binding(&default)?;
        let declaration = self.declaration_mut();
        declaration.allow_none = declaration.nullable || matches!(default, DefaultValue::Null);
        declaration.fallback = fallback;
        Ok(())
    }

    fn bind(&self, request: &Arc<Request>) -> Binding {
        let declaration = self.declaration();
        match request.param(&declaration.alias) {
            None => match &declaration.fallback {
                Some(fallback) => Binding::Value(fallback.clone()),
                None => Binding::Missing,
            },
            Some(ParamValue::Json(Value::Null)) if declaration.allow_none => Binding::Value(Bound::Null),
            Some(ParamValue::Json(Value::Null)) => Binding::Missing,
            Some(ParamValue::Json(Value::String(text))) => self.from_text(text).into(),
            Some(ParamValue::Json(value)) => self.from_native(value).into(),
            Some(ParamValue::Bytes(bytes)) => self.from_bytes(bytes).into(),
        }
    }

    fn from_text(&self, text: &str) -> Result<Bound, ActionError>;

    fn from_native(&self, value: &Value) -> Result<Bound, ActionError> {
        self.from_text(&text_of(value))
    }

    fn from_bytes(&self, bytes: &[u8]) -> Result<Bound, ActionError> {
        match std::str::from_utf8(bytes) {
            Ok(text) => self.from_text(text),
            Err(_) => Err(reject(
                FrameworkCode::param_type_mismatch(),
                &self.declaration().alias,
                format!("bytes[{}]", bytes.len()),
            )),
        }
    }
}

/// Runs [`Injector::validate`] and boxes the injector.
pub fn validated<I: Injector + 'static>(mut injector: I) -> Result<Box<dyn Injector>, DeclarationError> {
    injector.validate()?;
    Ok(Box::new(injector))
}

/// Business error for a parameter value, with `param` and `value` placeholders filled.
pub fn reject(code: &Code, alias: &str, value: impl fmt::Display) -> ActionError {
    code.error(&CodeArgs::new().with("param", alias).with("value", clip(&value.to_string())))
        .into()
}

/// Shortens huge values to their head and tail.
fn clip(text: &str) -> String {
    const LIMIT: usize = 1000;
    const KEEP: usize = 100;
    let count = text.chars().count();
    if count < LIMIT {
        return text.to_owned();
    }
    let head: String = text.chars().take(KEEP).collect();
    let tail: String = text.chars().skip(count - KEEP).collect();
    format!("{head}...{tail}")
}

pub(crate) fn unsupported(kind: &'static str, tag: &TypeTag) -> DeclarationError {
    DeclarationError::UnsupportedType {
        kind,
        found: tag.to_string(),
    }
}

pub(crate) fn invalid_default(kind: &'static str, reason: impl Into<String>) -> DeclarationError {
    DeclarationError::InvalidDefault {
        kind,
        reason: reason.into(),
    }
}

/// Builds and validates an injector for a declaration.
pub type InjectorBuilder =
    Arc<dyn Fn(Declaration) -> Result<Box<dyn Injector>, DeclarationError> + Send + Sync>;

/// Ordered injector candidates; the last accepting candidate wins.
#[derive(Clone)]
pub struct InjectorRegistry {
    candidates: Vec<(String, InjectorBuilder)>,
}

impl InjectorRegistry {
    /// A registry with no candidates at all.
    pub fn empty() -> Self {
        Self {
            candidates: Vec::new(),
        }
    }

    /// The built-in candidates in priority order.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.push("framework", |d| validated(FrameworkInjector::new(d)));
        registry.push("str", |d| validated(StrInjector::new(d)));
        registry.push("int", |d| validated(IntInjector::new(d)));
        registry.push("float", |d| validated(FloatInjector::new(d)));
        registry.push("bool", |d| validated(BoolInjector::new(d)));
        registry.push("object", |d| validated(ObjectInjector::new(d)));
        registry.push("array", |d| validated(ArrayInjector::new(d)));
        registry.push("set", |d| validated(SetInjector::new(d)));
        registry.push("enum_int", |d| validated(DomainInjector::new(d, DomainKind::Int)));
        registry.push("temp_enum", |d| validated(DomainInjector::new(d, DomainKind::Str)));
        registry.push("temp_enum_set", |d| validated(DomainInjector::new(d, DomainKind::Set)));
        registry.push("enum", |d| validated(EnumInjector::new(d)));
        registry.push("enum_set", |d| validated(EnumSetInjector::new(d)));
        registry.push("int_enum", |d| validated(IntEnumInjector::new(d)));
        registry.push("bytes", |d| validated(BytesInjector::new(d)));
        registry.push("pattern", |d| validated(PatternInjector::new(d)));
        registry.push("stream", |d| validated(StreamInjector::new(d)));
        registry
    }

    fn push<F>(&mut self, name: &str, build: F)
    where
        F: Fn(Declaration) -> Result<Box<dyn Injector>, DeclarationError> + Send + Sync + 'static,
    {
        self.candidates.push((name.to_owned(), Arc::new(build)));
    }

    /// Appends a candidate with the highest priority so far.
    pub fn register<F>(&mut self, name: impl Into<String>, build: F) -> Result<(), StartupError>
    where
        F: Fn(Declaration) -> Result<Box<dyn Injector>, DeclarationError> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.candidates.iter().any(|(existing, _)| *existing == name) {
            return Err(StartupError::DuplicateInjector(name));
        }
        self.candidates.push((name, Arc::new(build)));
        Ok(())
    }

    /// Candidate names, lowest priority first.
    pub fn names(&self) -> Vec<&str> {
        self.candidates.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Tries every candidate; returns the last success or every rejection.
    pub fn resolve(
        &self,
        declaration: &Declaration,
    ) -> Result<Box<dyn Injector>, Vec<(String, DeclarationError)>> {
        let mut chosen = None;
        let mut rejections = Vec::new();
        for (name, build) in &self.candidates {
            match build(declaration.clone()) {
                Ok(injector) => chosen = Some(injector),
                Err(error) => rejections.push((name.clone(), error)),
            }
        }
        chosen.ok_or(rejections)
    }
}

impl Default for InjectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InjectorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
