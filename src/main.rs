//! # Kiwi Dispatch Demo
//!
//! Registers a handful of actions and dispatches requests against them the
//! way a transport would:
//! 1.  A successful `math.add` with parameters arriving as text and numbers.
//! 2.  A failing `account.login` answered with a business code.
//! 3.  A streaming `report.lines` read chunk by chunk.
//! 4.  A burst of concurrent requests, one task each.

use kiwi_dispatch::framework::{ChunkWriter, LocalSession, Session};
use kiwi_dispatch::injector::DefaultValue;
use kiwi_dispatch::lifecycle::setup_tracing;
use kiwi_dispatch::{define_codes, Action, ActionError, Args, Code, CodeArgs, DispatchConfig, Kernel, ParamSpec, TypeTag};
use serde_json::json;
use std::error::Error;
use std::sync::Arc;
use tracing::{info, Instrument};

define_codes! {
    pub struct DemoCode {
        WRONG_PASSWORD = Code::new(2001, "login failed")
            .internal("wrong password for [{user}]")
            .status(401);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = dotenvy::dotenv();
    setup_tracing();

    let config = DispatchConfig::from_env();
    let expose_debug = config.expose_debug;
    let kernel = Kernel::builder()
        .config(config)
        .codes(&DemoCode::all())
        .build()?;

    // =====================================================================
    // Registration
    // =====================================================================
    let add = kernel.register(
        Action::builder("math", "add")
            .param("a", TypeTag::Int)
            .param_default("b", TypeTag::Int, 0)
            .handler(|args: Args| async move {
                let a: i64 = args.get("a")?;
                let b: i64 = args.get("b")?;
                Ok::<_, ActionError>(json!({ "sum": a + b }))
            }),
    )?;

    let login = kernel.register(
        Action::builder("account", "login")
            .declare(ParamSpec::new("user").default(DefaultValue::pattern("[a-z]{3,16}")?))
            .param("password", TypeTag::Str)
            .handler(|args: Args| async move {
                let user: String = args.get("user")?;
                let password: String = args.get("password")?;
                DemoCode::wrong_password().check(password == "kiwi", || CodeArgs::new().with("user", &user))?;
                Ok::<_, ActionError>(format!("welcome {user}"))
            }),
    )?;

    let report = kernel.register(
        Action::builder("report", "lines")
            .param_default("count", TypeTag::Int, 3)
            .declare(ParamSpec::new("__stream"))
            .handler(|args: Args| async move {
                let count: i64 = args.get("count")?;
                let out: ChunkWriter = args.get("__stream")?;
                for n in 1..=count {
                    out.line(&format!("line {n}")).await?;
                }
                Ok::<_, ActionError>("done")
            }),
    )?;

    let session: Arc<dyn Session> = Arc::new(LocalSession::new("demo"));

    // =====================================================================
    // Single requests
    // =====================================================================
    let request = kernel
        .request("math.add", session.clone())
        .param("a", "40")
        .param("b", 2)
        .build()?;
    let packet = kernel.dispatch(&add, request).await?;
    info!(response = %String::from_utf8_lossy(&packet.to_write_data(expose_debug)?), "math.add");

    let request = kernel
        .request("account.login", session.clone())
        .param("user", "alice")
        .param("password", "hunter2")
        .build()?;
    let packet = kernel.dispatch(&login, request).await?;
    info!(
        status = packet.status(),
        response = %String::from_utf8_lossy(&packet.to_write_data(expose_debug)?),
        "account.login"
    );

    let request = kernel.request("report.lines", session.clone()).param("count", 2).build()?;
    let packet = kernel.dispatch(&report, request).await?;
    if let Some(mut reader) = packet.into_chunk_reader() {
        let span = tracing::info_span!("chunk_reader");
        async {
            while let Some(chunk) = reader.next().await {
                info!(chunk = %String::from_utf8_lossy(&chunk).trim_end(), "received");
            }
        }
        .instrument(span)
        .await;
    }

    // =====================================================================
    // Concurrent requests
    // =====================================================================
    let mut handles = Vec::new();
    for n in 0..4_i64 {
        let request = kernel
            .request("math.add", session.clone())
            .param("a", n)
            .param("b", n * 10)
            .build()?;
        handles.push(kernel.spawn(add.clone(), request));
    }
    for handle in handles {
        let packet = handle.await??;
        info!(ret = packet.ret(), result = ?packet.envelope().map(|e| &e.result), "math.add");
    }

    info!("demo finished");
    Ok(())
}
