//! Platform streams behind the pipe endpoints.
//!
//! Endpoints only ever see a [`BoxedStream`], so tests can drive them over in-memory duplex streams.

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::PipeResult;
use crate::pipe_name::PipeName;

/// A bidirectional byte stream.
pub trait DuplexStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> DuplexStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Owned, type-erased connection.
pub type BoxedStream = Box<dyn DuplexStream>;

/// A bound, not yet connected, server address.
pub struct Listener {
    name: PipeName,
    #[cfg(unix)]
    inner: tokio::net::UnixListener,
    #[cfg(windows)]
    inner: tokio::net::windows::named_pipe::NamedPipeServer,
}

impl Listener {
    /// Bind `name`. On Unix a stale socket file left behind by a crashed process is replaced.
    #[cfg(unix)]
    pub fn bind(name: &PipeName) -> PipeResult<Self> {
        match std::fs::remove_file(name.path()) {
            Ok(()) => tracing::debug!(path = %name, "removed stale socket file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let inner = tokio::net::UnixListener::bind(name.path())?;
        Ok(Self {
            name: name.clone(),
            inner,
        })
    }

    #[cfg(windows)]
    pub fn bind(name: &PipeName) -> PipeResult<Self> {
        let inner = tokio::net::windows::named_pipe::ServerOptions::new()
            .first_pipe_instance(true)
            .create(name.path())?;
        Ok(Self {
            name: name.clone(),
            inner,
        })
    }

    pub fn name(&self) -> &PipeName {
        &self.name
    }

    /// Wait for the single peer this listener serves.
    #[cfg(unix)]
    pub async fn accept(self) -> PipeResult<BoxedStream> {
        let (stream, _) = self.inner.accept().await?;
        // The connected socket outlives its path; unlinking now leaves nothing behind on abrupt exit.
        if let Err(e) = std::fs::remove_file(self.name.path()) {
            tracing::debug!(path = %self.name, error = %e, "could not remove socket file");
        }
        Ok(Box::new(stream))
    }

    #[cfg(windows)]
    pub async fn accept(self) -> PipeResult<BoxedStream> {
        self.inner.connect().await?;
        Ok(Box::new(self.inner))
    }
}

/// Open one connection attempt to `name`.
#[cfg(unix)]
pub async fn connect(name: &PipeName) -> std::io::Result<BoxedStream> {
    let stream = tokio::net::UnixStream::connect(name.path()).await?;
    Ok(Box::new(stream))
}

#[cfg(windows)]
pub async fn connect(name: &PipeName) -> std::io::Result<BoxedStream> {
    let stream = tokio::net::windows::named_pipe::ClientOptions::new().open(name.path())?;
    Ok(Box::new(stream))
}
