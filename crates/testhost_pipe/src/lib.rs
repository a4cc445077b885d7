//! Request/reply transport over named pipes.
//!
//! Both endpoints speak the same framing: every message is
//!
//! ```text
//! [i32 LE total length][i32 LE serializer id][payload bytes]
//! ```
//!
//! where `total length = 4 + payload length`. The serializer id selects, from a per-endpoint
//! [`SerializerRegistry`], the serializer able to turn the payload back into a typed message.
//!
//! ## Endpoints
//!
//! - [`NamedPipeClient`] connects to a pipe and performs one request/reply cycle at a time. Concurrent callers are
//!   serialized by an async mutex around the whole cycle, so bytes of two requests never interleave on the wire.
//! - [`NamedPipeServer`] accepts a single connection and loops read → dispatch → reply until the peer closes the
//!   connection or the server is cancelled. Any failure inside that loop is fatal: a broken frame boundary cannot be
//!   resynchronized mid-stream.
//!
//! ## Platforms
//!
//! On Windows a pipe name maps to `\\.\pipe\<name>`; elsewhere it maps to a Unix domain socket under the temp
//! directory (see [`PipeName`]).

// Enforce explicit error handling - no panicking in production code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod cancellation;
pub mod client;
pub mod error;
pub mod frame;
pub mod pipe_name;
pub mod registry;
pub mod server;
pub mod transport;

pub use cancellation::CancellationToken;
pub use client::NamedPipeClient;
pub use error::{PipeError, PipeResult};
pub use frame::{Frame, FrameDecoder};
pub use pipe_name::PipeName;
pub use registry::{JsonSerializer, Message, NamedPipeSerializer, SerializerRegistry, VoidResponse, VoidSerializer};
pub use server::{FailFast, NamedPipeServer, RequestCallback};
pub use transport::BoxedStream;
