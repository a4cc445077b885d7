//! Server endpoint: a single connection served by a read → dispatch → reply loop.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::cancellation::CancellationToken;
use crate::error::{PipeError, PipeResult};
use crate::frame::{FrameDecoder, READ_BUFFER_SIZE, read_frame, write_frame};
use crate::pipe_name::PipeName;
use crate::registry::{Message, SerializerRegistry};
use crate::transport::{BoxedStream, Listener};

/// How long [`NamedPipeServer::dispose`] waits for the loop to exit.
pub const DISPOSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Future returned by a [`RequestCallback`].
pub type ResponseFuture = Pin<Box<dyn Future<Output = PipeResult<Message>> + Send>>;

/// Handles one decoded request and produces the reply message.
pub type RequestCallback = Arc<dyn Fn(Message) -> ResponseFuture + Send + Sync>;

/// Invoked when the serve loop hits an unrecoverable error.
pub type FailFast = Arc<dyn Fn(&PipeError) + Send + Sync>;

/// Box an async handler into a [`RequestCallback`].
pub fn callback<F, Fut>(handler: F) -> RequestCallback
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PipeResult<Message>> + Send + 'static,
{
    Arc::new(move |message| Box::pin(handler(message)))
}

/// Default fail-fast: a broken frame boundary cannot be resynchronized, so the process goes down.
pub fn abort_process() -> FailFast {
    Arc::new(|e: &PipeError| {
        error!(error = %e, "unrecoverable pipe failure, aborting");
        std::process::abort();
    })
}

/// Server side of a pipe. Serves exactly one peer.
pub struct NamedPipeServer {
    name: Option<PipeName>,
    registry: Arc<SerializerRegistry>,
    callback: RequestCallback,
    fail_fast: FailFast,
    dispose_timeout: Duration,
    shutdown: CancellationToken,
    listener: Mutex<Option<Listener>>,
    serve_loop: Mutex<Option<JoinHandle<()>>>,
}

impl NamedPipeServer {
    /// Bind `name` so peers can connect, without accepting yet.
    pub fn bind(name: PipeName, registry: Arc<SerializerRegistry>, callback: RequestCallback) -> PipeResult<Self> {
        let listener = Listener::bind(&name)?;
        debug!(pipe = %name, "listening");
        let mut server = Self::unbound(Some(name), registry, callback);
        server.listener = Mutex::new(Some(listener));
        Ok(server)
    }

    /// A server without an address, to be fed a stream through [`start_with_stream`](Self::start_with_stream).
    pub fn detached(registry: Arc<SerializerRegistry>, callback: RequestCallback) -> Self {
        Self::unbound(None, registry, callback)
    }

    fn unbound(name: Option<PipeName>, registry: Arc<SerializerRegistry>, callback: RequestCallback) -> Self {
        Self {
            name,
            registry,
            callback,
            fail_fast: abort_process(),
            dispose_timeout: DISPOSE_TIMEOUT,
            shutdown: CancellationToken::new(),
            listener: Mutex::new(None),
            serve_loop: Mutex::new(None),
        }
    }

    pub fn with_fail_fast(mut self, fail_fast: FailFast) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    pub fn with_dispose_timeout(mut self, timeout: Duration) -> Self {
        self.dispose_timeout = timeout;
        self
    }

    pub fn name(&self) -> Option<&PipeName> {
        self.name.as_ref()
    }

    /// Accept the single peer, then start serving it in the background.
    ///
    /// The loop runs until the peer disconnects, `cancel` fires, or the server is disposed.
    pub async fn wait_connection(&self, cancel: &CancellationToken) -> PipeResult<()> {
        let listener = self.listener.lock().await.take().ok_or(PipeError::NotConnected)?;

        let stream = tokio::select! {
            _ = cancel.cancelled() => return Err(PipeError::Cancelled),
            _ = self.shutdown.cancelled() => return Err(PipeError::Cancelled),
            result = listener.accept() => result?,
        };

        debug!(pipe = ?self.name, "client connected");
        self.spawn_loop(stream, cancel.clone()).await;
        Ok(())
    }

    /// Serve an already connected stream.
    pub async fn start_with_stream(&self, stream: BoxedStream, cancel: &CancellationToken) {
        self.spawn_loop(stream, cancel.clone()).await;
    }

    pub async fn is_serving(&self) -> bool {
        self.serve_loop.lock().await.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    async fn spawn_loop(&self, stream: BoxedStream, external: CancellationToken) {
        let handle = tokio::spawn(serve(
            stream,
            Arc::clone(&self.registry),
            Arc::clone(&self.callback),
            Arc::clone(&self.fail_fast),
            self.shutdown.clone(),
            external,
        ));
        *self.serve_loop.lock().await = Some(handle);
    }

    /// Wait until the serve loop ends on its own: the peer disconnected or the loop's token fired.
    pub async fn join(&self) -> PipeResult<()> {
        let Some(handle) = self.serve_loop.lock().await.take() else {
            return Ok(());
        };
        handle.await.map_err(|join_error| PipeError::Handler(join_error.to_string()))
    }

    /// Stop serving and wait for the loop to exit.
    ///
    /// Fails with [`PipeError::DisposeTimeout`] when the loop does not observe the shutdown in time.
    pub async fn dispose(&self) -> PipeResult<()> {
        self.shutdown.cancel();
        self.listener.lock().await.take();

        let Some(handle) = self.serve_loop.lock().await.take() else {
            return Ok(());
        };
        match tokio::time::timeout(self.dispose_timeout, handle).await {
            Err(_) => Err(PipeError::DisposeTimeout(self.dispose_timeout)),
            Ok(Err(join_error)) => Err(PipeError::Handler(join_error.to_string())),
            Ok(Ok(())) => Ok(()),
        }
    }
}

impl Drop for NamedPipeServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn serve(
    mut stream: BoxedStream,
    registry: Arc<SerializerRegistry>,
    callback: RequestCallback,
    fail_fast: FailFast,
    shutdown: CancellationToken,
    external: CancellationToken,
) {
    let mut decoder = FrameDecoder::new();
    let mut scratch = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let step = tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = external.cancelled() => break,
            result = serve_one(&mut stream, &mut decoder, &mut scratch, &registry, &callback) => result,
        };

        match step {
            Ok(true) => {}
            Ok(false) => {
                debug!("peer closed the pipe");
                break;
            }
            Err(e) => {
                (fail_fast)(&e);
                break;
            }
        }
    }
}

/// Serve one request. `Ok(false)` means the peer closed the connection.
async fn serve_one(
    stream: &mut BoxedStream,
    decoder: &mut FrameDecoder,
    scratch: &mut [u8],
    registry: &SerializerRegistry,
    callback: &RequestCallback,
) -> PipeResult<bool> {
    let Some(frame) = read_frame(stream, decoder, scratch).await? else {
        return Ok(false);
    };
    let request = registry.decode(frame.serializer_id, &frame.payload)?;
    let response = (callback)(request).await?;
    let (id, payload) = registry.encode_erased(response.as_ref())?;
    write_frame(stream, id, &payload).await?;
    Ok(true)
}
