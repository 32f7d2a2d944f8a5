//! Building blocks shared by injectors, actions and the dispatcher.
//!
//! # Main Components
//!
//! - [`value`] - Wire values ([`ParamValue`]), declared types ([`TypeTag`]) and bound values ([`Bound`])
//! - [`request`] - [`Request`], [`Session`] and the chunk channel for streaming actions
//! - [`envelope`] - Response [`Envelope`]s, [`Packet`]s and handler [`Reply`] values
//! - [`code`] - Business error [`Code`]s and the [`CodeRegistry`]
//! - [`error`] - Error types for each failure surface
//!
//! # Testing
//!
//! See [`mock`] for a recording session and hooks.

pub mod code;
pub mod envelope;
pub mod error;
pub mod mock;
pub mod request;
pub mod value;

pub use code::{BusinessException, Code, CodeArgs, CodeRegistry, FrameworkCode};
pub use envelope::{ChunkPacket, Envelope, HtmlPacket, Packet, RawPacket, Reply};
pub use error::{
    ActionError, DeclarationError, DispatchError, FrameworkException, RegistrationError, RequestError,
    SessionError, StartupError,
};
pub use request::{ChunkReader, ChunkWriter, Command, LocalSession, Request, RequestBuilder, Session};
pub use value::{Blob, Bound, ElemTag, EnumDef, EnumMember, ParamMap, ParamValue, Scalar, TypeTag};
