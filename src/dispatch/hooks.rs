//! Pre- and post-invocation hooks.

use async_trait::async_trait;
use std::sync::Arc;

use crate::action::Action;
use crate::framework::envelope::Packet;
use crate::framework::request::Request;

/// Decision of [`ActionHooks::before`].
#[derive(Debug)]
pub enum PreHook {
    /// Bind and invoke as usual.
    Continue,
    /// Answer with this packet without invoking the handler.
    Respond(Packet),
    /// Answer with an empty success envelope without invoking the handler.
    Skip,
}

/// Application hooks around every dispatch.
///
/// # Provided Methods
///
/// Both methods have no-op defaults; implement only what you need. Finalisation
/// (session flush, access log, `after`) runs even when `before` short-circuits.
#[async_trait]
pub trait ActionHooks: Send + Sync {
    /// Runs before parameters are bound, e.g. for authentication checks.
    async fn before(&self, _action: &Action, _request: &Arc<Request>) -> PreHook {
        PreHook::Continue
    }

    /// Runs last, once the response packet is final.
    async fn after(&self, _action: &Action, _request: &Arc<Request>, _packet: &Packet) {}
}

/// Hooks that do nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHooks;

#[async_trait]
impl ActionHooks for NoHooks {}
