//! # Dispatch Lifecycle
//!
//! One call of [`Dispatcher::dispatch`] walks a request through:
//!
//! ```text
//! Idle → PreHook → Injecting → Invoking → ShapingResponse
//!      → {Succeeded | BusinessFailed | FrameworkFailed | Fatal}
//!      → Finalizing → Done
//! ```
//!
//! - **PreHook**: [`ActionHooks::before`] may answer on the handler's behalf.
//! - **Injecting**: injectors run in declaration order; the first failure wins.
//! - **Invoking**: the handler runs on its own tokio task, so a panic is
//!   caught as a fatal outcome. Streaming handlers become chunk producers.
//! - **ShapingResponse**: the handler's [`Reply`] becomes a [`Packet`].
//! - **Finalizing**: always exactly once. Request metadata is attached, the
//!   session is flushed, the access line is logged and [`ActionHooks::after`] runs.
//!
//! ## Outcomes on the wire
//!
//! | outcome | `ret` | `error` | logged at |
//! |---------|-------|---------|-----------|
//! | success | 0 (or `$ret$`) | - | `info` (access line) |
//! | business | the code | public message | `debug` |
//! | framework | 1114 | `server error` | `warn` |
//! | fatal | -1 assertion, -100 I/O, -2 other | `server error` | `error` |

use serde_json::{Map, Value};
use std::any::Any;
use std::sync::Arc;
use tokio::task::JoinError;
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use crate::action::{Action, Args};
use crate::config::DispatchConfig;
use crate::framework::code::{BusinessException, CodeArgs, FrameworkCode};
use crate::framework::envelope::{ChunkPacket, Envelope, Packet, Reply};
use crate::framework::error::{ActionError, DispatchError, FrameworkException};
use crate::framework::request::{ChunkWriter, Request};

pub mod hooks;

pub use hooks::{ActionHooks, NoHooks, PreHook};

/// Map key a handler uses to set `ret` on a successful envelope.
pub const RESPONSE_RET: &str = "$ret$";

const SERVER_ERROR: &str = "server error";

/// A failure nobody planned for.
#[derive(Debug)]
enum Fatal {
    Error(ActionError),
    Panic(Box<dyn Any + Send>),
}

impl Fatal {
    fn from_join(error: JoinError) -> Self {
        match error.try_into_panic() {
            Ok(payload) => Fatal::Panic(payload),
            Err(error) => Fatal::Error(ActionError::assertion(format!("handler task cancelled: {error}"))),
        }
    }

    fn ret(&self) -> i32 {
        match self {
            Fatal::Error(ActionError::Assertion(_)) => -1,
            Fatal::Error(ActionError::Io(_)) => -100,
            _ => -2,
        }
    }

    fn describe(&self) -> String {
        match self {
            Fatal::Error(error) => error.to_string(),
            Fatal::Panic(payload) => match payload.downcast_ref::<&str>() {
                Some(message) => format!("panic: {message}"),
                None => match payload.downcast_ref::<String>() {
                    Some(message) => format!("panic: {message}"),
                    None => "panic".to_owned(),
                },
            },
        }
    }
}

enum Outcome {
    Succeeded(Packet),
    BusinessFailed(BusinessException),
    FrameworkFailed(FrameworkException),
    Fatal(Fatal),
}

impl From<ActionError> for Outcome {
    fn from(error: ActionError) -> Self {
        match error {
            ActionError::Business(e) => Outcome::BusinessFailed(e),
            ActionError::Framework(e) => Outcome::FrameworkFailed(e),
            other => Outcome::Fatal(Fatal::Error(other)),
        }
    }
}

/// Runs prepared actions against requests.
pub struct Dispatcher {
    config: DispatchConfig,
    hooks: Arc<dyn ActionHooks>,
}

impl Dispatcher {
    pub fn new(config: DispatchConfig, hooks: Arc<dyn ActionHooks>) -> Self {
        Self { config, hooks }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Dispatches one request; only strict mode returns `Err`.
    pub async fn dispatch(&self, action: &Action, request: Arc<Request>) -> Result<Packet, DispatchError> {
        let span = info_span!(
            "dispatch",
            cmd = %request.cmd(),
            seq = request.seq(),
            session = request.session().id(),
        );
        async move {
            let outcome = match self.hooks.before(action, &request).await {
                PreHook::Continue => self.execute(action, &request).await,
                PreHook::Respond(packet) => {
                    debug!(action = %action.title(), "answered by pre-hook");
                    Outcome::Succeeded(packet)
                }
                PreHook::Skip => {
                    info!(action = %action.title(), "skipped by pre-hook");
                    Outcome::Succeeded(Envelope::empty().into())
                }
            };
            self.finalize(action, &request, outcome).await
        }
        .instrument(span)
        .await
    }

    async fn execute(&self, action: &Action, request: &Arc<Request>) -> Outcome {
        let args = match action.bind(request) {
            Ok(args) => args,
            Err(error) => return error.into(),
        };
        request.mark("inject");

        if action.is_stream() || request.has_stream() {
            return self.produce_chunks(action, request, args);
        }

        let reply = match tokio::spawn(action.invoke(args)).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(error)) => return error.into(),
            Err(join) => return Outcome::Fatal(Fatal::from_join(join)),
        };
        request.mark("invoke");

        match shape(action, reply) {
            Ok(packet) => Outcome::Succeeded(packet),
            Err(error) => error.into(),
        }
    }

    /// Spawns the handler as the producer of a chunk stream and answers at once.
    fn produce_chunks(&self, action: &Action, request: &Arc<Request>, args: Args) -> Outcome {
        let writer = request.init_stream();
        let Some(reader) = request.take_stream_reader() else {
            return Outcome::Fatal(Fatal::Error(ActionError::assertion("chunk stream was already taken")));
        };
        let title = action.title().to_owned();
        let handler = tokio::spawn(action.invoke(args));
        tokio::spawn(
            async move {
                match handler.await {
                    Ok(Ok(reply)) => {
                        if let Err(error) = write_tail(&writer, reply).await {
                            warn!(action = %title, %error, "chunk stream tail dropped");
                        }
                    }
                    Ok(Err(error)) => error!(action = %title, %error, "chunk producer failed"),
                    Err(join) => {
                        let fatal = Fatal::from_join(join);
                        error!(action = %title, error = %fatal.describe(), "chunk producer failed");
                    }
                }
                writer.close();
            }
            .instrument(Span::current()),
        );
        Outcome::Succeeded(Packet::Chunk(ChunkPacket::new(reader)))
    }

    async fn finalize(
        &self,
        action: &Action,
        request: &Arc<Request>,
        outcome: Outcome,
    ) -> Result<Packet, DispatchError> {
        let mut surfaced = None;
        let mut packet = match outcome {
            Outcome::Succeeded(packet) => packet,
            Outcome::BusinessFailed(e) => {
                debug!(code = e.code, internal = %e.internal, "business failure");
                business_packet(e)
            }
            Outcome::FrameworkFailed(e) => {
                warn!(action = %action.title(), error = %e.title, "framework failure");
                match e.packet {
                    Some(packet) => *packet,
                    None => framework_packet(&e.title),
                }
            }
            Outcome::Fatal(fatal) => {
                let text = fatal.describe();
                error!(
                    cmd = %request.cmd(),
                    session = request.session().id(),
                    action = %action.title(),
                    payload = %request.content_prefix(self.config.payload_trace_limit),
                    error = %text,
                    "action failed"
                );
                let envelope = Envelope::error(fatal.ret(), SERVER_ERROR).with_debug(text).with_status(500);
                if self.config.strict {
                    surfaced = Some(fatal);
                }
                envelope.into()
            }
        };

        if let Packet::Json(envelope) = &mut packet {
            envelope.attach(request);
        }

        if let Err(error) = request.session().flush().await {
            warn!(%error, "session flush failed");
        }

        for (step, spent) in request.marks() {
            debug!(step = %step, elapsed_us = spent.as_micros() as u64, "profile");
        }
        let elapsed = request.elapsed();
        info!(ret = packet.ret(), elapsed_ms = elapsed.as_millis() as u64, "access");
        if elapsed > self.config.slow_request {
            warn!(
                action = %action.title(),
                elapsed_ms = elapsed.as_millis() as u64,
                payload = %request.content_prefix(self.config.payload_trace_limit),
                "slow request"
            );
        }

        self.hooks.after(action, request, &packet).await;

        match surfaced {
            None => Ok(packet),
            Some(Fatal::Error(source)) => Err(DispatchError::Fatal {
                cmd: request.cmd().to_string(),
                source,
            }),
            Some(Fatal::Panic(payload)) => std::panic::resume_unwind(payload),
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("config", &self.config).finish()
    }
}

/// Turns a handler reply into a packet.
fn shape(action: &Action, reply: Reply) -> Result<Packet, ActionError> {
    match reply {
        Reply::Empty => Ok(Envelope::empty().into()),
        Reply::Packet(packet) => Ok(packet),
        Reply::Map(mut map) => {
            let ret = match map.remove(RESPONSE_RET) {
                None => 0,
                Some(value) => value
                    .as_i64()
                    .and_then(|ret| i32::try_from(ret).ok())
                    .ok_or_else(|| {
                        ActionError::assertion(format!(
                            "[{}] {RESPONSE_RET} must be an integer, got {value}",
                            action.title()
                        ))
                    })?,
            };
            Ok(Envelope::new(ret, Value::Object(map)).into())
        }
        Reply::List(items) => Ok(Envelope::ok(Value::Array(items)).into()),
        Reply::Text(text) => Ok(Envelope::text(text).into()),
        Reply::Bool(flag) => Ok(Envelope::text(flag.to_string()).into()),
        Reply::Unsupported { type_name } => Err(ActionError::assertion(format!(
            "unsupported return type [{}][{}]",
            action.title(),
            type_name
        ))),
    }
}

/// Appends what a streaming handler returned as the final line.
async fn write_tail(writer: &ChunkWriter, reply: Reply) -> Result<(), ActionError> {
    let tail = match reply {
        Reply::Empty => return Ok(()),
        Reply::Text(text) => text,
        Reply::Bool(flag) => flag.to_string(),
        Reply::Map(map) => Value::Object(map).to_string(),
        Reply::List(items) => Value::Array(items).to_string(),
        Reply::Packet(Packet::Json(envelope)) => serde_json::to_string(&envelope)?,
        Reply::Packet(_) => return Ok(()),
        Reply::Unsupported { type_name } => type_name.to_owned(),
    };
    if !writer.ends_with_newline() {
        writer.write("\n").await?;
    }
    writer.write(tail).await
}

fn business_packet(e: BusinessException) -> Packet {
    let mut result = Map::new();
    result.insert("success".to_owned(), Value::Bool(false));
    if !e.params.is_empty() {
        result.insert("param".to_owned(), Value::Object(e.params));
    }
    Envelope::new(e.code, Value::Object(result))
        .with_error(e.message)
        .with_debug(e.internal)
        .with_status(e.status)
        .into()
}

fn framework_packet(reason: &str) -> Packet {
    let code = FrameworkCode::framework_error();
    let rendered = code.error(&CodeArgs::new().with("reason", reason));
    Envelope::error(code.code(), rendered.message)
        .with_debug(rendered.internal)
        .with_status(code.status_code())
        .into()
}
