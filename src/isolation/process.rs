//! Worker-process host.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use testhost_pipe::{CancellationToken, NamedPipeClient, PipeName};
use tokio::process::{Child, Command};
use tokio::runtime::Runtime;
use tracing::{debug, info, warn};

use super::{DiscoveryRequest, DiscoveryResponse, IsolationHost, discovery_registry};
use crate::discovery::DiscoveryError;
use crate::hangdump::{
    CommandDumpCollector, HangDumpProcessLifetimeHandler, SystemProcessTerminator, WatchdogOutcome,
};
use crate::settings::RunSettings;

/// Subcommand that turns the `testhost` binary into a worker.
pub const WORKER_SUBCOMMAND: &str = "worker";

/// How long the worker gets to open its pipe and, when enabled, complete the hang-dump handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
/// How long the worker gets to exit once its pipe is closed.
const EXIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Serves requests in a spawned `testhost worker` process.
///
/// The host owns a private tokio runtime and exposes a blocking interface, so it must not be used from inside
/// another runtime.
pub struct ChildProcessHost {
    runtime: Runtime,
    child: Option<Child>,
    client: NamedPipeClient,
    hang_dump: Option<HangDumpProcessLifetimeHandler>,
    cancel: CancellationToken,
}

impl ChildProcessHost {
    /// Spawn the worker and connect to it.
    ///
    /// `worker_program` defaults to the running executable.
    pub fn start(settings: &RunSettings, worker_program: Option<&Path>) -> Result<Self, DiscoveryError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| DiscoveryError::Isolation(format!("could not start the host runtime: {}", e)))?;
        let program = match worker_program {
            Some(program) => program.to_path_buf(),
            None => std::env::current_exe()
                .map_err(|e| DiscoveryError::Isolation(format!("could not locate the worker executable: {}", e)))?,
        };
        let cancel = CancellationToken::new();

        let (child, client, hang_dump) = runtime.block_on(launch(settings, &program, &cancel))?;
        Ok(Self {
            runtime,
            child: Some(child),
            client,
            hang_dump,
            cancel,
        })
    }
}

async fn launch(
    settings: &RunSettings,
    program: &Path,
    cancel: &CancellationToken,
) -> Result<(Child, NamedPipeClient, Option<HangDumpProcessLifetimeHandler>), DiscoveryError> {
    let hang_dump = if settings.hang_dump.enabled {
        Some(HangDumpProcessLifetimeHandler::start(
            &settings.hang_dump,
            Arc::new(CommandDumpCollector::platform_default()),
            Arc::new(SystemProcessTerminator),
        )?)
    } else {
        None
    };

    let pipe = PipeName::unique("testhost_discovery");
    let mut command = Command::new(program);
    command.arg(WORKER_SUBCOMMAND).arg("--pipe").arg(pipe.name()).kill_on_drop(true);
    if let Some(name) = hang_dump.as_ref().and_then(|handler| handler.pipe_name()) {
        command.arg("--hang-dump-pipe").arg(name.name());
    }
    let mut child = command
        .spawn()
        .map_err(|e| DiscoveryError::Isolation(format!("could not start {}: {}", program.display(), e)))?;
    info!(process_id = ?child.id(), program = %program.display(), "worker started");

    let client = NamedPipeClient::new(pipe, discovery_registry()?);
    tokio::select! {
        status = child.wait() => {
            let status = status.map_or_else(|e| e.to_string(), |status| status.to_string());
            return Err(DiscoveryError::Isolation(format!("worker exited before connecting ({})", status)));
        }
        result = client.connect(CONNECT_TIMEOUT, cancel) => result?,
    }
    if let Some(handler) = &hang_dump {
        handler.wait_for_handshake(CONNECT_TIMEOUT).await?;
    }

    Ok((child, client, hang_dump))
}

impl IsolationHost for ChildProcessHost {
    fn invoke(&mut self, request: &DiscoveryRequest) -> Result<DiscoveryResponse, DiscoveryError> {
        if self.child.is_none() {
            return Err(DiscoveryError::Isolation("host was disposed".to_string()));
        }
        let response = self
            .runtime
            .block_on(self.client.request::<DiscoveryRequest, DiscoveryResponse>(request, &self.cancel))?;
        Ok(response)
    }

    fn dispose(&mut self) -> Result<(), DiscoveryError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let hang_dump = self.hang_dump.take();
        let client = &self.client;

        self.runtime.block_on(async move {
            // Closing the pipe ends the worker's serve loop, and with it the worker.
            client.dispose().await;
            match tokio::time::timeout(EXIT_TIMEOUT, child.wait()).await {
                Ok(Ok(status)) => debug!(%status, "worker exited"),
                Ok(Err(e)) => warn!(error = %e, "could not wait for the worker"),
                Err(_) => {
                    warn!(timeout = ?EXIT_TIMEOUT, "worker did not exit, killing it");
                    if let Err(e) = child.kill().await {
                        warn!(error = %e, "could not kill the worker");
                    }
                }
            }

            let Some(handler) = hang_dump else {
                return Ok(());
            };
            match handler.dispose().await? {
                WatchdogOutcome::HangDetected(report) => Err(DiscoveryError::Isolation(format!(
                    "worker process {} stopped responding; dump written to {}",
                    report.process_id,
                    report.dump_path.display()
                ))),
                outcome => {
                    debug!(?outcome, "hang-dump watchdog finished");
                    Ok(())
                }
            }
        })
    }
}
