//! Controller side of hang detection.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use testhost_pipe::server::callback;
use testhost_pipe::{
    CancellationToken, Message, NamedPipeClient, NamedPipeServer, PipeError, PipeName, SerializerRegistry,
    VoidResponse,
};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::dump::{DumpCollector, ProcessTerminator};
use super::messages::{
    ActivityHandshake, GetInProgressTests, InProgressTest, InProgressTests, SessionEnd, TestStateUpdate,
    hang_dump_registry,
};
use super::{HangDumpError, timeout_as};
use crate::settings::HangDumpSettings;

/// How long the watchdog waits for the worker's in-progress snapshot.
const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(30);

enum WatchdogEvent {
    Connected(ActivityHandshake),
    Activity(TestStateUpdate),
    SessionEnd,
    Stop,
}

/// What a hang looked like when the watchdog fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HangReport {
    pub process_id: u32,
    pub dump_path: PathBuf,
    /// Tests the worker reported as running.
    pub in_progress: Vec<InProgressTest>,
}

/// How the watchdog finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// The worker announced the end of its session.
    SessionEnded,
    /// The handler was disposed while the worker was still considered alive.
    Stopped,
    HangDetected(HangReport),
}

/// Watches a worker for activity and dumps it when it goes silent.
pub struct HangDumpProcessLifetimeHandler {
    server: Arc<NamedPipeServer>,
    accept: JoinHandle<()>,
    cancel: CancellationToken,
    events: Sender<WatchdogEvent>,
    handshake: watch::Receiver<Option<ActivityHandshake>>,
    watchdog: thread::JoinHandle<WatchdogOutcome>,
}

impl HangDumpProcessLifetimeHandler {
    /// Start listening for a worker and arm the watchdog.
    ///
    /// Must be called from within a tokio runtime; the watchdog thread uses it to reach the worker.
    pub fn start(
        settings: &HangDumpSettings,
        collector: Arc<dyn DumpCollector>,
        terminator: Arc<dyn ProcessTerminator>,
    ) -> Result<Self, HangDumpError> {
        Self::spawn(settings, settings.timeout(), collector, terminator)
    }

    fn spawn(
        settings: &HangDumpSettings,
        timeout: Duration,
        collector: Arc<dyn DumpCollector>,
        terminator: Arc<dyn ProcessTerminator>,
    ) -> Result<Self, HangDumpError> {
        let runtime = Handle::try_current().map_err(|e| HangDumpError::Watchdog(e.to_string()))?;
        let registry = hang_dump_registry()?;
        let (events, receiver) = mpsc::channel();
        let (handshake_tx, handshake) = watch::channel(None);

        let server = NamedPipeServer::bind(
            PipeName::unique("testhost_hangdump"),
            Arc::clone(&registry),
            activity_callback(events.clone(), handshake_tx),
        )?
        // The worker may be killed mid-frame by the watchdog itself.
        .with_fail_fast(Arc::new(|e: &PipeError| warn!(error = %e, "hang-dump pipe closed abruptly")));
        let server = Arc::new(server);

        let cancel = CancellationToken::new();
        let accept = {
            let server = Arc::clone(&server);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = server.wait_connection(&cancel).await {
                    debug!(error = %e, "no worker connected to the hang-dump pipe");
                }
            })
        };

        let watchdog = Watchdog {
            settings: settings.clone(),
            timeout,
            collector,
            terminator,
            runtime,
            registry,
        };
        let watchdog = thread::Builder::new()
            .name("hang-dump-watchdog".to_string())
            .spawn(move || watchdog.run(receiver))
            .map_err(|e| HangDumpError::Watchdog(e.to_string()))?;

        Ok(Self {
            server,
            accept,
            cancel,
            events,
            handshake,
            watchdog,
        })
    }

    /// Name the worker should pass to [`HangDumpActivityIndicator::connect`](super::HangDumpActivityIndicator).
    pub fn pipe_name(&self) -> Option<&PipeName> {
        self.server.name()
    }

    /// Wait for the worker's handshake.
    pub async fn wait_for_handshake(&self, timeout: Duration) -> Result<ActivityHandshake, HangDumpError> {
        let mut handshake = self.handshake.clone();
        let result = match tokio::time::timeout(timeout, handshake.wait_for(Option::is_some)).await {
            Err(_) => Err(HangDumpError::OperationTimeout {
                operation: "receive the worker handshake",
                timeout,
            }),
            Ok(Err(_)) => Err(HangDumpError::Watchdog("handshake channel closed".to_string())),
            Ok(Ok(received)) => received
                .clone()
                .ok_or_else(|| HangDumpError::Watchdog("empty handshake".to_string())),
        };
        result
    }

    /// Stop listening and collect the watchdog's verdict.
    pub async fn dispose(self) -> Result<WatchdogOutcome, HangDumpError> {
        // Ignored when the watchdog already finished.
        let _ = self.events.send(WatchdogEvent::Stop);
        self.cancel.cancel();
        self.accept.abort();
        self.server.dispose().await?;

        let watchdog = self.watchdog;
        tokio::task::spawn_blocking(move || watchdog.join())
            .await
            .map_err(|e| HangDumpError::Watchdog(e.to_string()))?
            .map_err(|_| HangDumpError::Watchdog("watchdog thread panicked".to_string()))
    }
}

fn activity_callback(
    events: Sender<WatchdogEvent>,
    handshake: watch::Sender<Option<ActivityHandshake>>,
) -> testhost_pipe::RequestCallback {
    callback(move |message: Message| {
        let event = if let Some(hello) = message.downcast_ref::<ActivityHandshake>() {
            handshake.send_replace(Some(hello.clone()));
            Some(WatchdogEvent::Connected(hello.clone()))
        } else if let Some(update) = message.downcast_ref::<TestStateUpdate>() {
            Some(WatchdogEvent::Activity(update.clone()))
        } else if message.downcast_ref::<SessionEnd>().is_some() {
            Some(WatchdogEvent::SessionEnd)
        } else {
            None
        };
        // The watchdog may already be gone; the worker still gets its reply.
        let delivered = event.map(|event| events.send(event).is_ok());
        async move {
            match delivered {
                None => Err(PipeError::Handler("unexpected message on the hang-dump pipe".to_string())),
                Some(_) => Ok(Box::new(VoidResponse) as Message),
            }
        }
    })
}

struct Watchdog {
    settings: HangDumpSettings,
    timeout: Duration,
    collector: Arc<dyn DumpCollector>,
    terminator: Arc<dyn ProcessTerminator>,
    runtime: Handle,
    registry: Arc<SerializerRegistry>,
}

impl Watchdog {
    fn run(self, events: Receiver<WatchdogEvent>) -> WatchdogOutcome {
        // Nothing to watch until the worker introduces itself.
        let handshake = loop {
            match events.recv() {
                Ok(WatchdogEvent::Connected(handshake)) => break handshake,
                Ok(WatchdogEvent::Activity(_)) => {}
                Ok(WatchdogEvent::SessionEnd) => return WatchdogOutcome::SessionEnded,
                Ok(WatchdogEvent::Stop) | Err(_) => return WatchdogOutcome::Stopped,
            }
        };
        info!(process_id = handshake.process_id, timeout = ?self.timeout, "hang-dump watchdog armed");

        loop {
            match events.recv_timeout(self.timeout) {
                Ok(WatchdogEvent::Activity(update)) => {
                    trace!(test = %update.display_name, state = ?update.state, "activity");
                }
                Ok(WatchdogEvent::Connected(_)) => {}
                Ok(WatchdogEvent::SessionEnd) => return WatchdogOutcome::SessionEnded,
                Ok(WatchdogEvent::Stop) | Err(RecvTimeoutError::Disconnected) => return WatchdogOutcome::Stopped,
                Err(RecvTimeoutError::Timeout) => return WatchdogOutcome::HangDetected(self.on_hang(&handshake)),
            }
        }
    }

    fn on_hang(&self, handshake: &ActivityHandshake) -> HangReport {
        let process_id = handshake.process_id;
        warn!(process_id, timeout = ?self.timeout, "no test activity, treating the worker as hung");

        let in_progress = self
            .runtime
            .block_on(request_snapshot(&self.registry, &handshake.consumer_pipe))
            .unwrap_or_else(|e| {
                warn!(error = %e, "could not read the in-progress tests");
                Vec::new()
            });

        let dump_path = self.settings.dump_path(process_id);
        if let Err(e) = self.collect(process_id, &dump_path, &in_progress) {
            error!(error = %e, "hang dump incomplete");
        }
        if let Err(e) = self.terminator.terminate(process_id) {
            error!(error = %e, "could not terminate the hung worker");
        }

        HangReport {
            process_id,
            dump_path,
            in_progress,
        }
    }

    fn collect(&self, process_id: u32, dump_path: &Path, in_progress: &[InProgressTest]) -> Result<(), HangDumpError> {
        if let Some(dir) = dump_path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| HangDumpError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        if !in_progress.is_empty() {
            let log_path = log_path(dump_path);
            std::fs::write(&log_path, render_in_progress(in_progress)).map_err(|source| HangDumpError::Io {
                path: log_path.clone(),
                source,
            })?;
        }
        self.collector.collect(process_id, dump_path)
    }
}

async fn request_snapshot(
    registry: &Arc<SerializerRegistry>,
    consumer_pipe: &str,
) -> Result<Vec<InProgressTest>, HangDumpError> {
    let client = NamedPipeClient::new(PipeName::new(consumer_pipe), Arc::clone(registry));
    let cancel = CancellationToken::new();
    client
        .connect(SNAPSHOT_TIMEOUT, &cancel)
        .await
        .map_err(timeout_as("connect to the worker consumer pipe"))?;
    let snapshot = client.request::<_, InProgressTests>(&GetInProgressTests, &cancel).await;
    client.dispose().await;
    Ok(snapshot?.tests)
}

/// `<dump>.log`, next to the dump.
fn log_path(dump_path: &Path) -> PathBuf {
    let mut path = dump_path.as_os_str().to_owned();
    path.push(".log");
    PathBuf::from(path)
}

fn render_in_progress(tests: &[InProgressTest]) -> String {
    let mut out = String::new();
    for test in tests {
        let _ = writeln!(out, "{} ({}s)", test.display_name, test.elapsed_secs);
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::hangdump::HangDumpActivityIndicator;
    use crate::hangdump::messages::TestState;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        dumps: Mutex<Vec<(u32, PathBuf)>>,
        terminated: Mutex<Vec<u32>>,
    }

    impl DumpCollector for Recorder {
        fn collect(&self, process_id: u32, path: &Path) -> Result<(), HangDumpError> {
            std::fs::write(path, b"dump").unwrap();
            self.dumps.lock().unwrap().push((process_id, path.to_path_buf()));
            Ok(())
        }
    }

    impl ProcessTerminator for Recorder {
        fn terminate(&self, process_id: u32) -> Result<(), HangDumpError> {
            self.terminated.lock().unwrap().push(process_id);
            Ok(())
        }
    }

    fn settings(dir: &Path) -> HangDumpSettings {
        HangDumpSettings {
            enabled: true,
            output_directory: Some(dir.join("dumps")),
            ..HangDumpSettings::default()
        }
    }

    fn handler(
        settings: &HangDumpSettings,
        timeout: Duration,
        recorder: &Arc<Recorder>,
    ) -> HangDumpProcessLifetimeHandler {
        HangDumpProcessLifetimeHandler::spawn(settings, timeout, recorder.clone(), recorder.clone()).unwrap()
    }

    #[test]
    fn test_log_path_appends_extension() {
        assert_eq!(log_path(Path::new("out/hang_7.dmp")), PathBuf::from("out/hang_7.dmp.log"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_silent_worker_is_dumped_and_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(dir.path());
        let recorder = Arc::new(Recorder::default());
        let handler = handler(&settings, Duration::from_millis(300), &recorder);

        let pipe = handler.pipe_name().unwrap().name().to_string();
        let indicator = HangDumpActivityIndicator::connect(&pipe, Duration::from_secs(5)).await.unwrap();
        let handshake = handler.wait_for_handshake(Duration::from_secs(5)).await.unwrap();
        assert_eq!(handshake.process_id, std::process::id());

        indicator
            .on_test_state_update(TestStateUpdate::new("1", "Adds", TestState::InProgress))
            .await
            .unwrap();
        // Go silent until the watchdog has fired.
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        while recorder.terminated.lock().unwrap().is_empty() && std::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let outcome = handler.dispose().await.unwrap();
        let expected_dump = settings.dump_path(std::process::id());
        let WatchdogOutcome::HangDetected(report) = outcome else {
            panic!("expected a hang, got {outcome:?}");
        };
        assert_eq!(report.dump_path, expected_dump);
        assert_eq!(report.in_progress.len(), 1);
        assert_eq!(report.in_progress[0].display_name, "Adds");
        assert_eq!(*recorder.dumps.lock().unwrap(), vec![(std::process::id(), expected_dump.clone())]);
        assert_eq!(*recorder.terminated.lock().unwrap(), vec![std::process::id()]);

        let log = std::fs::read_to_string(log_path(&expected_dump)).unwrap();
        assert!(log.starts_with("Adds ("), "{log}");

        indicator.dispose().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_session_end_is_not_a_hang() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let handler = handler(&settings(dir.path()), Duration::from_secs(30), &recorder);

        let pipe = handler.pipe_name().unwrap().name().to_string();
        let indicator = HangDumpActivityIndicator::connect(&pipe, Duration::from_secs(5)).await.unwrap();
        indicator
            .on_test_state_update(TestStateUpdate::new("1", "Adds", TestState::InProgress))
            .await
            .unwrap();
        indicator
            .on_test_state_update(TestStateUpdate::new("1", "Adds", TestState::Passed))
            .await
            .unwrap();
        indicator.session_end().await.unwrap();

        assert_eq!(handler.dispose().await.unwrap(), WatchdogOutcome::SessionEnded);
        assert!(recorder.dumps.lock().unwrap().is_empty());
        indicator.dispose().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_missing_handshake_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let handler = handler(&settings(dir.path()), Duration::from_secs(30), &recorder);

        let err = handler.wait_for_handshake(Duration::from_millis(50)).await.unwrap_err();
        assert!(matches!(err, HangDumpError::OperationTimeout { .. }));
        assert_eq!(handler.dispose().await.unwrap(), WatchdogOutcome::Stopped);
    }
}
