//! Client endpoint: one request/reply cycle at a time.

use std::any::{Any, type_name};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::cancellation::CancellationToken;
use crate::error::{PipeError, PipeResult};
use crate::frame::{FrameDecoder, READ_BUFFER_SIZE, read_frame, write_frame};
use crate::pipe_name::PipeName;
use crate::registry::{Message, SerializerRegistry};
use crate::transport::{self, BoxedStream};

/// Delay between two connection attempts while the server is not listening yet.
pub const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(50);

struct Connection {
    stream: BoxedStream,
    decoder: FrameDecoder,
    scratch: Vec<u8>,
}

impl Connection {
    fn new(stream: BoxedStream) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(),
            scratch: vec![0u8; READ_BUFFER_SIZE],
        }
    }

    async fn exchange(&mut self, registry: &SerializerRegistry, id: i32, payload: &[u8]) -> PipeResult<Message> {
        write_frame(&mut self.stream, id, payload).await?;
        let frame = read_frame(&mut self.stream, &mut self.decoder, &mut self.scratch)
            .await?
            .ok_or(PipeError::ConnectionClosed)?;
        registry.decode(frame.serializer_id, &frame.payload)
    }
}

/// Client side of a pipe.
///
/// The whole request/reply cycle runs under one async mutex, so concurrent callers are served in turn and their
/// frames never interleave on the wire.
pub struct NamedPipeClient {
    name: Option<PipeName>,
    registry: Arc<SerializerRegistry>,
    connection: Mutex<Option<Connection>>,
}

impl NamedPipeClient {
    /// A disconnected client for `name`. Call [`connect`](Self::connect) before sending requests.
    pub fn new(name: PipeName, registry: Arc<SerializerRegistry>) -> Self {
        Self {
            name: Some(name),
            registry,
            connection: Mutex::new(None),
        }
    }

    /// A client over an already connected stream.
    pub fn from_stream(stream: BoxedStream, registry: Arc<SerializerRegistry>) -> Self {
        Self {
            name: None,
            registry,
            connection: Mutex::new(Some(Connection::new(stream))),
        }
    }

    pub fn name(&self) -> Option<&PipeName> {
        self.name.as_ref()
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_some()
    }

    /// Connect, retrying until the server listens.
    ///
    /// Gives up with [`PipeError::Timeout`] after `timeout`, or with [`PipeError::Cancelled`] when `cancel` fires.
    pub async fn connect(&self, timeout: Duration, cancel: &CancellationToken) -> PipeResult<()> {
        let name = self.name.as_ref().ok_or(PipeError::NotConnected)?;

        let attempts = async {
            loop {
                match transport::connect(name).await {
                    Ok(stream) => return stream,
                    Err(e) => {
                        debug!(pipe = %name, error = %e, "pipe not ready, retrying");
                        tokio::time::sleep(CONNECT_RETRY_INTERVAL).await;
                    }
                }
            }
        };

        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(PipeError::Cancelled),
            result = tokio::time::timeout(timeout, attempts) => result.map_err(|_| PipeError::Timeout(timeout))?,
        };

        debug!(pipe = %name, "connected");
        *self.connection.lock().await = Some(Connection::new(stream));
        Ok(())
    }

    /// Send `request` and wait for its reply.
    ///
    /// Both types must be registered. A reply of another type fails with [`PipeError::UnexpectedResponse`]. When the
    /// exchange fails or is cancelled mid-flight the frame boundary is lost, so the connection is dropped and later
    /// requests fail with [`PipeError::NotConnected`].
    pub async fn request<Req, Resp>(&self, request: &Req, cancel: &CancellationToken) -> PipeResult<Resp>
    where
        Req: Any + Send,
        Resp: Any + Send,
    {
        let (id, payload) = self.registry.encode(request)?;

        let mut guard = self.connection.lock().await;
        let connection = guard.as_mut().ok_or(PipeError::NotConnected)?;

        let outcome = tokio::select! {
            _ = cancel.cancelled() => None,
            result = connection.exchange(&self.registry, id, &payload) => Some(result),
        };

        let message = match outcome {
            None => {
                *guard = None;
                return Err(PipeError::Cancelled);
            }
            Some(Err(e)) => {
                *guard = None;
                return Err(e);
            }
            Some(Ok(message)) => message,
        };
        drop(guard);

        message
            .downcast::<Resp>()
            .map(|response| *response)
            .map_err(|_| PipeError::UnexpectedResponse {
                expected: type_name::<Resp>(),
            })
    }

    /// Close the connection. Idempotent.
    pub async fn dispose(&self) {
        if let Some(mut connection) = self.connection.lock().await.take() {
            if let Err(e) = connection.stream.shutdown().await {
                debug!(error = %e, "pipe shutdown failed");
            }
        }
    }
}
