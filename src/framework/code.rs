//! # Code Taxonomy
//!
//! A [`Code`] is a reusable business error: a numeric code, a public message
//! template shown to clients, an optional internal template kept for logs and
//! debug output, and an HTTP status. Templates use `{name}` placeholders:
//!
//! ```ignore
//! static NOT_OWNER: Code = Code::new(2001, "not your order [{order}]")
//!     .internal("order [{order}] belongs to [{owner}]")
//!     .status(403);
//!
//! NOT_OWNER.check(order.owner == user, || {
//!     CodeArgs::new().with("order", &order.id).with("owner", &order.owner)
//! })?;
//! ```
//!
//! Codes are plain `static` values. Catalogs of them are declared with
//! [`define_codes!`](crate::define_codes), and a [`CodeRegistry`] owned by the
//! kernel validates templates and enforces uniqueness at startup.
//!
//! ## Debug builds
//!
//! With `debug_assertions` on, [`Code::check`] renders its arguments even when
//! the check passes and panics if a placeholder has no argument. A forgotten
//! placeholder then shows up the first time the code path runs instead of the
//! first time it fails in production.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use tracing::debug;

use crate::framework::error::StartupError;

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$?\{([^=}]+)\}").expect("placeholder pattern compiles"));

/// Expected failure carrying a client-facing message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("business error {code}: {internal}")]
pub struct BusinessException {
    pub code: i32,
    /// Shown to clients.
    pub message: String,
    /// Kept for logs and the envelope's `debug` field.
    pub internal: String,
    /// Extra context echoed back as `result.param`.
    pub params: Map<String, Value>,
    pub status: u16,
}

impl BusinessException {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            code,
            internal: message.clone(),
            message,
            params: Map::new(),
            status: 200,
        }
    }

    pub fn with_internal(mut self, internal: impl Into<String>) -> Self {
        self.internal = internal.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }
}

/// Placeholder values for rendering a [`Code`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CodeArgs(BTreeMap<String, String>);

impl CodeArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl fmt::Display) -> Self {
        self.0.insert(key.to_owned(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A reusable business error definition.
#[derive(Debug)]
pub struct Code {
    code: i32,
    message: &'static str,
    internal: &'static str,
    status: u16,
    canonical: Option<&'static Code>,
    placeholders: OnceLock<Vec<String>>,
}

impl Code {
    pub const fn new(code: i32, message: &'static str) -> Self {
        Self {
            code,
            message,
            internal: "",
            status: 200,
            canonical: None,
            placeholders: OnceLock::new(),
        }
    }

    /// Template used for logs and `debug`; defaults to the public message.
    pub const fn internal(mut self, internal: &'static str) -> Self {
        self.internal = internal;
        self
    }

    pub const fn status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// A second definition of `canonical`'s number.
    ///
    /// Only the internal template is its own; number, public message and
    /// status always come from `canonical`.
    pub const fn alias_of(canonical: &'static Code, internal: &'static str) -> Self {
        Self {
            code: 0,
            message: "",
            internal,
            status: 0,
            canonical: Some(canonical),
            placeholders: OnceLock::new(),
        }
    }

    fn origin(&self) -> &Code {
        match self.canonical {
            Some(canonical) => canonical.origin(),
            None => self,
        }
    }

    pub fn code(&self) -> i32 {
        self.origin().code
    }

    pub fn message(&self) -> &'static str {
        self.origin().message
    }

    pub fn internal_message(&self) -> &'static str {
        if self.internal.is_empty() {
            self.message()
        } else {
            self.internal
        }
    }

    pub fn status_code(&self) -> u16 {
        self.origin().status
    }

    pub fn is_alias(&self) -> bool {
        self.canonical.is_some()
    }

    /// Placeholder names of both templates, derived once.
    pub fn placeholders(&self) -> &[String] {
        self.placeholders.get_or_init(|| {
            let mut names: Vec<String> = Vec::new();
            for template in [self.message(), self.internal] {
                for caps in PLACEHOLDER.captures_iter(template) {
                    let name = caps[1].to_owned();
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }
            names
        })
    }

    /// Validates the templates. Called by [`CodeRegistry::register`].
    pub fn ready(&self) -> Result<&[String], StartupError> {
        for template in [self.message(), self.internal] {
            if template.contains("%s") {
                return Err(StartupError::Template {
                    code: self.code(),
                    reason: format!("`%s` in [{template}], use {{name}} placeholders"),
                });
            }
        }
        Ok(self.placeholders())
    }

    /// Renders both templates into a [`BusinessException`].
    pub fn error(&self, args: &CodeArgs) -> BusinessException {
        let message = render(self.message(), args);
        let internal = if self.internal.is_empty() {
            message.clone()
        } else {
            render(self.internal, args)
        };
        debug!(code = self.code(), %internal, "business failure");
        BusinessException {
            code: self.code(),
            message,
            internal,
            params: Map::new(),
            status: self.status_code(),
        }
    }

    /// Passes when `expr` holds, fails with this code otherwise.
    ///
    /// `args` is only evaluated on failure, except in debug builds where it is
    /// always evaluated and checked against the placeholders.
    pub fn check<F>(&self, expr: bool, args: F) -> Result<(), BusinessException>
    where
        F: FnOnce() -> CodeArgs,
    {
        if cfg!(debug_assertions) && !self.placeholders().is_empty() {
            let args = args();
            self.assert_complete(&args);
            return if expr { Ok(()) } else { Err(self.error(&args)) };
        }
        if expr {
            Ok(())
        } else {
            Err(self.error(&args()))
        }
    }

    /// Unwraps `value`, failing with this code when it is `None`.
    pub fn require<T, F>(&self, value: Option<T>, args: F) -> Result<T, BusinessException>
    where
        F: FnOnce() -> CodeArgs,
    {
        self.check(value.is_some(), args)?;
        value.ok_or_else(|| self.error(&CodeArgs::new()))
    }

    fn assert_complete(&self, args: &CodeArgs) {
        for name in self.placeholders() {
            if args.get(name).is_none() {
                panic!("code [{}] is missing placeholder [{}]", self.code(), name);
            }
        }
    }
}

impl fmt::Display for Code {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code(), self.internal_message())
    }
}

fn render(template: &str, args: &CodeArgs) -> String {
    PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| match args.get(&caps[1]) {
            Some(value) => value.to_owned(),
            None => caps[0].to_owned(),
        })
        .into_owned()
}

/// Declares a catalog of [`Code`]s.
///
/// Each entry becomes a snake_case accessor returning a `&'static Code`, and
/// `all()` lists the catalog in declaration order for registration.
///
/// ```ignore
/// define_codes! {
///     pub struct OrderCode {
///         NOT_OWNER = Code::new(2001, "not your order [{order}]").status(403);
///         SOLD_OUT = Code::new(2002, "sold out");
///     }
/// }
///
/// let code = OrderCode::sold_out();
/// ```
#[macro_export]
macro_rules! define_codes {
    (
        $(#[$meta:meta])*
        $vis:vis struct $catalog:ident {
            $(
                $(#[$item_meta:meta])*
                $name:ident = $code:expr;
            )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        $vis struct $catalog;

        $crate::__paste! {
            impl $catalog {
                $(
                    $(#[$item_meta])*
                    pub fn [<$name:lower>]() -> &'static $crate::Code {
                        static CODE: $crate::Code = $code;
                        &CODE
                    }
                )+

                /// Every code of the catalog, in declaration order.
                pub fn all() -> ::std::vec::Vec<&'static $crate::Code> {
                    ::std::vec![$(Self::[<$name:lower>]()),+]
                }
            }
        }
    };
}

define_codes! {
    /// Codes raised by the framework while binding and dispatching.
    pub struct FrameworkCode {
        INVALID_PARAM = Code::new(1101, "invalid request [param={param}]")
            .internal("[{param}={hint}] does not exist")
            .status(400);
        INVALID_UUID_PARAM = Code::new(1102, "invalid request [param={param}]")
            .internal("parameter [{param}] is not a valid uuid [{value}]")
            .status(400);
        NOT_LOGGED_IN = Code::new(1103, "unauthorized").status(401);
        PARAM_NOT_NUMBER = Code::new(1104, "invalid request [param={param}]")
            .internal("parameter is not a number [{value}]")
            .status(400);
        PARAM_NOT_FLOAT = Code::new(1105, "invalid request [param={param}]")
            .internal("parameter is not a float [{value}]")
            .status(400);
        PARAM_NOT_BOOL = Code::new(1106, "invalid request [param={param}]")
            .internal("parameter is not a boolean [{value}]")
            .status(400);
        PARAM_NOT_ARRAY = Code::new(1107, "invalid request [param={param}]")
            .internal("parameter is not an array [{value}]")
            .status(400);
        PARAM_NOT_SET = Code::new(1108, "invalid request [param={param}]")
            .internal("parameter is not a set [{value}]")
            .status(400);
        PARAM_NOT_JSON = Code::new(1109, "invalid request")
            .internal("parameter [{param}] is not a JSON object [{value}]")
            .status(400);
        MISSING_AUTH = Code::new(1110, "unauthorized")
            .internal("missing credentials")
            .status(401);
        PARAM_TYPE_MISMATCH = Code::new(1111, "invalid request [param={param}]")
            .internal("parameter [{param}] has the wrong type [{value}]")
            .status(400);
        LOGIN_EXPIRED = Code::new(1112, "login expired").status(401);
        MISSING_PARAM = Code::new(1113, "invalid request [param={param}]")
            .internal("missing parameter [{param}]")
            .status(400);
        FRAMEWORK_ERROR = Code::new(1114, "server error")
            .internal("framework error [{reason}]")
            .status(500);
        SESSION_UNSUPPORTED = Code::new(1116, "session unsupported")
            .internal("the transport has no session support");
        LOGIN_FAILED = Code::new(1117, "login failed").status(401);
        PARAM_FORMAT_ERROR = Code::new(1118, "invalid request [{param}]")
            .internal("parameter [{param}] malformed [{error}]")
            .status(400);
        VALUE_NOT_IN_DOMAIN = Code::new(1120, "invalid request [param={param}]")
            .internal("value [{value}] of [{param}] is not in {domain}")
            .status(400);
    }
}

/// The set of codes known to a kernel.
#[derive(Debug, Default)]
pub struct CodeRegistry {
    pool: BTreeMap<i32, &'static Code>,
}

impl CodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with [`FrameworkCode`].
    pub fn with_framework_codes() -> Result<Self, StartupError> {
        let mut registry = Self::new();
        registry.register_all(&FrameworkCode::all())?;
        Ok(registry)
    }

    /// Validates and adds a code.
    ///
    /// A second code with the same number is only accepted when built with
    /// [`alias_of`](Code::alias_of); the first definition stays canonical.
    pub fn register(&mut self, code: &'static Code) -> Result<(), StartupError> {
        code.ready()?;
        match self.pool.get(&code.code()) {
            Some(_) if code.is_alias() => Ok(()),
            Some(_) => Err(StartupError::DuplicateCode(code.code())),
            None => {
                self.pool.insert(code.code(), code.canonical.unwrap_or(code));
                Ok(())
            }
        }
    }

    pub fn register_all(&mut self, codes: &[&'static Code]) -> Result<(), StartupError> {
        codes.iter().try_for_each(|code| self.register(code))
    }

    pub fn get(&self, code: i32) -> Option<&'static Code> {
        self.pool.get(&code).copied()
    }

    /// Registered codes in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = &'static Code> + '_ {
        self.pool.values().copied()
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static SOLD_OUT: Code = Code::new(2002, "sold out [{item}]")
        .internal("item [{item}] has [{left}] left")
        .status(409);
    static SOLD_OUT_AGAIN: Code = Code::alias_of(&SOLD_OUT, "restock of [{item}] failed");
    static CLASH: Code = Code::new(2002, "clash");
    static PRINTF: Code = Code::new(2003, "bad %s template");

    #[test]
    fn placeholders_come_from_both_templates() {
        assert_eq!(SOLD_OUT.placeholders(), &["item".to_string(), "left".to_string()]);
    }

    #[test]
    fn failing_check_renders_both_templates() {
        let err = SOLD_OUT
            .check(false, || CodeArgs::new().with("item", "tea").with("left", 0))
            .unwrap_err();
        assert_eq!(err.code, 2002);
        assert_eq!(err.message, "sold out [tea]");
        assert_eq!(err.internal, "item [tea] has [0] left");
        assert_eq!(err.status, 409);
    }

    #[test]
    fn passing_check_is_ok() {
        assert!(SOLD_OUT
            .check(true, || CodeArgs::new().with("item", "tea").with("left", 3))
            .is_ok());
        assert_eq!(
            FrameworkCode::login_failed().require(Some(5), CodeArgs::new).unwrap(),
            5
        );
    }

    #[test]
    #[should_panic(expected = "missing placeholder")]
    #[cfg(debug_assertions)]
    fn debug_builds_catch_missing_placeholders() {
        let _ = SOLD_OUT.check(true, || CodeArgs::new().with("item", "tea"));
    }

    #[test]
    fn registry_rejects_duplicates_but_accepts_aliases() {
        let mut registry = CodeRegistry::new();
        registry.register(&SOLD_OUT).unwrap();
        registry.register(&SOLD_OUT_AGAIN).unwrap();
        assert_eq!(registry.register(&CLASH), Err(StartupError::DuplicateCode(2002)));
        assert_eq!(registry.get(2002).map(Code::message), Some("sold out [{item}]"));
        assert_eq!(registry.get(2002).map(Code::internal_message), Some("item [{item}] has [{left}] left"));

        let err = SOLD_OUT_AGAIN.error(&CodeArgs::new().with("item", "tea"));
        assert_eq!(err.code, 2002);
        assert_eq!(err.message, "sold out [tea]");
        assert_eq!(err.internal, "restock of [tea] failed");
        assert_eq!(err.status, 409);
    }

    #[test]
    fn printf_templates_are_rejected() {
        let mut registry = CodeRegistry::new();
        assert!(matches!(
            registry.register(&PRINTF),
            Err(StartupError::Template { code: 2003, .. })
        ));
    }

    #[test]
    fn framework_catalog_is_consistent() {
        let registry = CodeRegistry::with_framework_codes().unwrap();
        assert_eq!(registry.len(), FrameworkCode::all().len());
        let missing = FrameworkCode::missing_param().error(&CodeArgs::new().with("param", "uid"));
        assert_eq!(missing.code, 1113);
        assert!(missing.message.contains("uid"));
    }
}
