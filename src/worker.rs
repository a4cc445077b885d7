//! The `testhost worker` side of child-process isolation.
//!
//! A worker binds the discovery pipe it was given, serves [`DiscoveryRequest`]s from a single controller until the
//! controller closes the pipe, then exits. With a hang-dump pipe it also reports each discovery as test activity, so
//! a controller-side watchdog can dump a worker stuck inside one source.

use std::sync::Arc;
use std::time::Duration;

use testhost_pipe::server::callback;
use testhost_pipe::{CancellationToken, Message, NamedPipeServer, PipeError, PipeName};
use tracing::{debug, info, warn};

use crate::discovery::DiscoveryError;
use crate::hangdump::HangDumpActivityIndicator;
use crate::hangdump::messages::{TestState, TestStateUpdate};
use crate::isolation::{DiscoveryRequest, DiscoveryResponse, discovery_registry, handle_request};
use crate::loader::{FileOperations, ManifestFileOperations};

/// How long the worker waits to reach the hang-dump controller.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// Run a worker to completion on its own runtime.
pub fn run_worker(pipe: &str, hang_dump_pipe: Option<&str>) -> Result<(), DiscoveryError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| DiscoveryError::Isolation(format!("could not start the worker runtime: {}", e)))?;
    runtime.block_on(serve(pipe, hang_dump_pipe, Arc::new(ManifestFileOperations)))
}

/// Serve discovery requests on `pipe` until the controller disconnects.
#[tracing::instrument(skip_all, fields(pipe = pipe))]
pub async fn serve(
    pipe: &str,
    hang_dump_pipe: Option<&str>,
    files: Arc<dyn FileOperations>,
) -> Result<(), DiscoveryError> {
    let indicator = match hang_dump_pipe {
        Some(name) => Some(Arc::new(HangDumpActivityIndicator::connect(name, HANDSHAKE_TIMEOUT).await?)),
        None => None,
    };

    let handler = {
        let indicator = indicator.clone();
        callback(move |message: Message| {
            let files = Arc::clone(&files);
            let indicator = indicator.clone();
            async move {
                let request = message
                    .downcast::<DiscoveryRequest>()
                    .map_err(|_| PipeError::Handler("expected a discovery request".to_string()))?;
                let source = request.source.clone();
                report(indicator.as_deref(), &source, TestState::InProgress).await;

                let response = tokio::task::spawn_blocking(move || handle_request(&request, files.as_ref()))
                    .await
                    .map_err(|e| PipeError::Handler(e.to_string()))?;

                let state = match &response {
                    DiscoveryResponse::Completed(_) => TestState::Passed,
                    DiscoveryResponse::Failed { .. } => TestState::Failed,
                };
                report(indicator.as_deref(), &source, state).await;
                Ok(Box::new(response) as Message)
            }
        })
    };

    let server = NamedPipeServer::bind(PipeName::new(pipe), discovery_registry()?, handler)?;
    let cancel = CancellationToken::new();
    server.wait_connection(&cancel).await?;
    info!("controller connected");
    server.join().await?;
    server.dispose().await?;
    debug!("controller disconnected");

    if let Some(indicator) = indicator {
        indicator.session_end().await?;
        indicator.dispose().await?;
    }
    Ok(())
}

async fn report(indicator: Option<&HangDumpActivityIndicator>, source: &str, state: TestState) {
    let Some(indicator) = indicator else {
        return;
    };
    let update = TestStateUpdate::new(source, format!("discover {}", source), state);
    if let Err(e) = indicator.on_test_state_update(update).await {
        warn!(error = %e, "could not report activity to the hang-dump controller");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::loader::InMemoryFileOperations;
    use testhost_core::{AssemblyMetadata, DiscoveryResult, FRAMEWORK_ASSEMBLY_NAME};
    use testhost_pipe::NamedPipeClient;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_worker_serves_until_the_controller_leaves() {
        let assembly = AssemblyMetadata {
            references: vec![FRAMEWORK_ASSEMBLY_NAME.to_string()],
            types: Some(Vec::new()),
            ..AssemblyMetadata::default()
        };
        let files: Arc<dyn FileOperations> =
            Arc::new(InMemoryFileOperations::new().with_assembly("/bin/Empty.dll", assembly));

        let pipe = PipeName::unique("testhost_worker_test");
        let worker = tokio::spawn({
            let name = pipe.name().to_string();
            async move { serve(&name, None, files).await }
        });

        let client = NamedPipeClient::new(pipe, discovery_registry().unwrap());
        let cancel = CancellationToken::new();
        client.connect(Duration::from_secs(5), &cancel).await.unwrap();

        let request = DiscoveryRequest {
            source: "/bin/Empty.dll".to_string(),
            settings: String::new(),
        };
        let response: DiscoveryResponse = client.request(&request, &cancel).await.unwrap();
        assert_eq!(response, DiscoveryResponse::Completed(DiscoveryResult::default()));

        client.dispose().await;
        tokio::time::timeout(Duration::from_secs(5), worker)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
