//! Kernel startup and process-level setup.
//!
//! # Main Components
//!
//! - [`Kernel`] - Owns the registries and the dispatcher; built once at startup
//! - [`KernelBuilder`] - Collects codes, custom injectors, reserved names and hooks
//! - [`setup_tracing`] - Initializes the tracing/logging infrastructure

pub mod kernel;
pub mod tracing;

pub use kernel::*;
pub use tracing::*;
