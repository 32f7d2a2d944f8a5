//! # Framework Errors
//!
//! Every boundary of the dispatch core has its own error type:
//!
//! - [`ActionError`]: what a handler (or a binding step) fails with at request time.
//!   Its variants drive the outcome classification in the dispatcher.
//! - [`DeclarationError`]: an injector refusing a parameter declaration.
//! - [`RegistrationError`]: an action that cannot be prepared.
//! - [`StartupError`]: misconfiguration detected while the kernel is built.
//! - [`RequestError`]: a transport handing over a malformed request.
//! - [`DispatchError`]: a fatal failure surfaced to the caller in strict mode.

use thiserror::Error;

use crate::framework::code::BusinessException;
use crate::framework::envelope::Packet;

/// Internal failure of the framework itself.
///
/// May carry a replacement packet that is sent to the client instead of the
/// generic `server error` envelope.
#[derive(Debug, Error)]
#[error("{title}")]
pub struct FrameworkException {
    pub title: String,
    pub packet: Option<Box<Packet>>,
}

impl FrameworkException {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            packet: None,
        }
    }

    /// Answers the client with `packet` instead of the generic framework error.
    pub fn with_packet(mut self, packet: Packet) -> Self {
        self.packet = Some(Box::new(packet));
        self
    }
}

/// Failure raised while binding parameters or running a handler.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Expected failure with a client-facing message.
    #[error(transparent)]
    Business(#[from] BusinessException),

    #[error("framework error: {0}")]
    Framework(#[from] FrameworkException),

    /// A broken invariant inside a handler.
    #[error("assertion failed: {0}")]
    Assertion(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl ActionError {
    pub fn assertion(message: impl Into<String>) -> Self {
        ActionError::Assertion(message.into())
    }

    pub fn other(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        ActionError::Other(Box::new(error))
    }

    pub fn is_business(&self) -> bool {
        matches!(self, ActionError::Business(_))
    }
}

impl From<serde_json::Error> for ActionError {
    fn from(error: serde_json::Error) -> Self {
        ActionError::other(error)
    }
}

/// An injector refusing a parameter declaration.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DeclarationError {
    #[error("parameter [{0}] must not start with `__`")]
    ReservedPrefix(String),

    #[error("parameter [{0}] is not handled by this framework injector")]
    NotFramework(String),

    #[error("[{kind}] does not handle type [{found}]")]
    UnsupportedType { kind: &'static str, found: String },

    #[error("[{kind}] rejects the default value: {reason}")]
    InvalidDefault { kind: &'static str, reason: String },

    #[error("parameter [{0}] needs a declared type or a default value")]
    Untyped(String),

    #[error("invalid pattern [{pattern}]: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// An action that cannot be prepared for dispatch.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("[{title}::{param}] no injector accepts the declaration ({reasons})")]
    NoInjector {
        title: String,
        param: String,
        reasons: String,
    },

    #[error("[{title}::{param}] {source}")]
    Rejected {
        title: String,
        param: String,
        source: DeclarationError,
    },

    #[error("[{title}] parameter [{param}] is declared twice")]
    DuplicateParam { title: String, param: String },
}

/// Misconfiguration detected while building the kernel.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum StartupError {
    #[error("code [{0}] is already registered")]
    DuplicateCode(i32),

    #[error("code [{code}] has a broken template: {reason}")]
    Template { code: i32, reason: String },

    #[error("reserved parameter [{0}] is already registered")]
    DuplicateReserved(String),

    #[error("reserved parameter [{0}] must start with `__`")]
    ReservedName(String),

    #[error("injector [{0}] is already registered")]
    DuplicateInjector(String),
}

/// A transport handing over a malformed request.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RequestError {
    #[error("invalid command [{0}]")]
    InvalidCommand(String),
}

#[derive(Debug, Error)]
#[error("session flush failed: {0}")]
pub struct SessionError(pub String);

/// Fatal outcome surfaced to the caller when the kernel runs in strict mode.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("[{cmd}] action failed: {source}")]
    Fatal { cmd: String, source: ActionError },
}
