#![doc(html_logo_url = "https://www.rust-lang.org/logos/rust-logo-128x128.png")]
#![doc(html_favicon_url = "https://www.rust-lang.org/favicon.ico")]
//! # Kiwi Dispatch
//!
//! > **Typed parameter binding and failure-proof dispatch for RPC actions.**
//!
//! A transport hands over a loosely typed parameter map (strings, numbers,
//! arrays, nested objects, raw bytes) together with a registered [`Action`].
//! The kernel binds each declared parameter to a strongly typed value,
//! invokes the handler, shapes whatever it returns into one response
//! [`Envelope`] and classifies every failure into a small closed taxonomy.
//! Malformed input never takes the serving process down.
//!
//! ## 🏗️ Design Philosophy
//!
//! ### Declarations in, injectors out
//! Handlers declare parameters by name, type and default. At registration
//! each declaration is offered to an ordered list of injector candidates and
//! the **last** one that accepts it wins. Registration pays for the choice
//! once; dispatch just walks the prepared list.
//! -   **Benefit**: a new parameter kind is one more candidate, not a branch in a giant `match`.
//! -   **Trade-off**: order matters. It is explicit, documented in [`injector`] and tested.
//!
//! ### Failures are values
//! Injectors answer with a [`Binding`](injector::Binding) instead of throwing, handlers
//! return [`ActionError`], and the dispatcher turns every outcome into a packet:
//! - **Business** failures carry a registered [`Code`] and are expected.
//! - **Framework** failures mean a broken contract and answer `1114`.
//! - **Fatal** failures (assertions, I/O, panics) are traced with the payload and answer `server error`.
//!
//! ## 👩‍💻 Architecture Notes
//!
//! ### 1. Explicit registries
//! Codes, injector candidates and reserved parameter names live in a
//! [`Kernel`] built once at startup. After [`KernelBuilder::build`] nothing is
//! mutated, so request tasks share it through an `Arc` without locks.
//!
//! ### 2. Concurrency Model
//! One tokio task per request ([`Kernel::spawn`]). Handlers run on a task of
//! their own so a panic is caught as a fatal outcome. Streaming actions hand
//! back a chunk reader at once and keep producing in the background.
//!
//! ### 3. Observability
//! Every dispatch runs inside a `dispatch` span. See the
//! [`lifecycle::tracing`] module for what gets logged at which level.
//!
//! ## 🗺️ Module Tour
//!
//! ### 1. The Vocabulary ([`framework`])
//! Values, requests, sessions, envelopes, codes and error types.
//!
//! ### 2. The Binders ([`injector`])
//! The [`Injector`] trait and every built-in candidate.
//!
//! ### 3. The Descriptor ([`action`])
//! [`ActionBuilder`] declares parameters and the handler; [`Args`] hands the bound values over.
//!
//! ### 4. The Engine ([`dispatch`])
//! [`Dispatcher`] runs the lifecycle; [`ActionHooks`] plugs in around it.
//!
//! ### 5. The Orchestrator ([`lifecycle`])
//! [`Kernel`] wires the registries, configuration and hooks together.
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! # Run the demo with info logs
//! RUST_LOG=info cargo run
//!
//! # Run the tests
//! cargo test
//! ```

pub mod action;
pub mod config;
pub mod dispatch;
pub mod framework;
pub mod injector;
pub mod lifecycle;

pub use action::{Action, ActionBuilder, Args, FromBound, ParamSpec};
pub use config::DispatchConfig;
pub use dispatch::{ActionHooks, Dispatcher, NoHooks, PreHook};
pub use framework::{
    ActionError, BusinessException, Bound, Code, CodeArgs, Envelope, FrameworkCode, Packet, Reply, Request,
    Session, TypeTag,
};
pub use injector::{DefaultValue, Injector};
pub use lifecycle::{Kernel, KernelBuilder};

#[doc(hidden)]
pub use paste::paste as __paste;
