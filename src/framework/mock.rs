//! # Mock Framework
//!
//! Utilities for testing actions and hooks without a transport.
//!
//! - [`MockSession`] counts flushes and can be told to fail them.
//! - [`RecordingHooks`] answers `before` from a queue of expectations and
//!   records every `after` it sees.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::action::Action;
use crate::dispatch::{ActionHooks, PreHook};
use crate::framework::envelope::Packet;
use crate::framework::error::SessionError;
use crate::framework::request::{Request, Session};

// =============================================================================
// SESSION
// =============================================================================

/// A session that records how often it was flushed.
///
/// # Example
/// ```ignore
/// let session = MockSession::new("s1");
/// kernel.dispatch(&action, kernel.request("math.add", session.clone()).build()?).await?;
/// assert_eq!(session.flushes(), 1);
/// ```
#[derive(Debug)]
pub struct MockSession {
    id: String,
    seq: AtomicU64,
    flushes: AtomicUsize,
    failing: AtomicBool,
}

impl MockSession {
    pub fn new(id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            seq: AtomicU64::new(0),
            flushes: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        })
    }

    /// A session whose flushes report an error.
    pub fn failing(id: impl Into<String>) -> Arc<Self> {
        let session = Self::new(id);
        session.failing.store(true, Ordering::SeqCst);
        session
    }

    /// Flush attempts so far, failed ones included.
    pub fn flushes(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for MockSession {
    fn id(&self) -> &str {
        &self.id
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    async fn flush(&self) -> Result<(), SessionError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(SessionError(format!("session [{}] store is unavailable", self.id)));
        }
        Ok(())
    }
}

// =============================================================================
// HOOKS
// =============================================================================

/// Hooks driven by queued expectations.
///
/// Each `before` call pops the next expectation; with the queue empty it
/// answers [`PreHook::Continue`].
///
/// # Example
/// ```ignore
/// let hooks = RecordingHooks::new();
/// hooks.expect_before().respond(Packet::Html(HtmlPacket::need_auth("kiwi")));
///
/// let kernel = Kernel::builder().hooks(hooks.clone()).build()?;
/// // dispatch...
/// hooks.verify(); // Ensures all expectations were consumed
/// assert_eq!(hooks.afters(), vec![("user.find".to_string(), 0)]);
/// ```
#[derive(Debug, Default)]
pub struct RecordingHooks {
    expectations: Arc<Mutex<VecDeque<PreHook>>>,
    befores: Mutex<Vec<String>>,
    afters: Mutex<Vec<(String, i32)>>,
}

impl RecordingHooks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues the answer of the next `before` call.
    pub fn expect_before(&self) -> BeforeExpectationBuilder {
        BeforeExpectationBuilder {
            expectations: self.expectations.clone(),
        }
    }

    /// Titles seen by `before`, in call order.
    pub fn befores(&self) -> Vec<String> {
        self.befores.lock().unwrap().clone()
    }

    /// `(title, ret)` pairs seen by `after`, in call order.
    pub fn afters(&self) -> Vec<(String, i32)> {
        self.afters.lock().unwrap().clone()
    }

    /// Verifies that all expectations were met.
    pub fn verify(&self) {
        let exps = self.expectations.lock().unwrap();
        if !exps.is_empty() {
            panic!("Not all expectations were met. {} remaining", exps.len());
        }
    }
}

#[async_trait]
impl ActionHooks for RecordingHooks {
    async fn before(&self, action: &Action, _request: &Arc<Request>) -> PreHook {
        self.befores.lock().unwrap().push(action.title().to_owned());
        self.expectations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(PreHook::Continue)
    }

    async fn after(&self, action: &Action, _request: &Arc<Request>, packet: &Packet) {
        self.afters
            .lock()
            .unwrap()
            .push((action.title().to_owned(), packet.ret()));
    }
}

/// Builder for `before` expectations.
pub struct BeforeExpectationBuilder {
    expectations: Arc<Mutex<VecDeque<PreHook>>>,
}

impl BeforeExpectationBuilder {
    /// Lets the dispatch proceed.
    pub fn proceed(self) {
        self.expectations.lock().unwrap().push_back(PreHook::Continue);
    }

    /// Answers with `packet` instead of invoking the handler.
    pub fn respond(self, packet: Packet) {
        self.expectations.lock().unwrap().push_back(PreHook::Respond(packet));
    }

    /// Answers with an empty success envelope.
    pub fn skip(self) {
        self.expectations.lock().unwrap().push_back(PreHook::Skip);
    }
}
