//! # Observability & Tracing
//!
//! [`setup_tracing`] installs the process-wide subscriber. Libraries embedding
//! the kernel usually have their own subscriber and skip it.
//!
//! ## Configuration
//!
//! Compact format without the module prefix (`with_target(false)`); every
//! event already names its `action` or `cmd`.
//!
//! ```bash
//! # Access lines, slow requests, failures
//! RUST_LOG=info cargo run
//!
//! # Plus business failures and profiler steps
//! RUST_LOG=debug cargo run
//!
//! # Plus injector selection at registration
//! RUST_LOG=trace cargo run
//! ```
//!
//! ## What Gets Traced
//!
//! Every dispatch runs inside a `dispatch` span carrying `cmd`, `seq` and
//! `session`, so all lines of one request line up:
//!
//! ```text
//! INFO dispatch{cmd=math.add seq=1 session=demo}: access ret=0 elapsed_ms=0
//! DEBUG dispatch{cmd=account.login seq=2 session=demo}: business failure code=401 internal="unauthorized"
//! ERROR dispatch{cmd=net.open seq=3 session=demo}: action failed action=net.open payload={} error=...
//! ```
//!
//! | level | events |
//! |-------|--------|
//! | `error` | fatal outcomes with command, session and payload prefix |
//! | `warn` | framework failures, slow requests, failed session flushes |
//! | `info` | access line, kernel start, registrations when `KIWI_VERBOSE` is on |
//! | `debug` | business failures, pre-hook answers, profiler steps |
//! | `trace` | injector selection |
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}
