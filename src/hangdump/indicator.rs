//! Worker side of hang detection.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use testhost_pipe::server::callback;
use testhost_pipe::{
    CancellationToken, Message, NamedPipeClient, NamedPipeServer, PipeError, PipeName, VoidResponse,
};
use tokio::task::JoinHandle;
use tracing::debug;

use super::messages::{
    ActivityHandshake, GetInProgressTests, InProgressTest, InProgressTests, SessionEnd, TestState, TestStateUpdate,
    hang_dump_registry,
};
use super::{HangDumpError, timeout_as};

struct InFlight {
    display_name: String,
    started: Instant,
    /// Arrival order, so snapshots list the oldest test first.
    sequence: u64,
}

#[derive(Default)]
struct Activity {
    in_flight: HashMap<String, InFlight>,
    next_sequence: u64,
}

impl Activity {
    fn apply(&mut self, update: &TestStateUpdate) {
        match update.state {
            TestState::InProgress => {
                let sequence = self.next_sequence;
                self.next_sequence += 1;
                self.in_flight.insert(
                    update.uid.clone(),
                    InFlight {
                        display_name: update.display_name.clone(),
                        started: Instant::now(),
                        sequence,
                    },
                );
            }
            TestState::Passed | TestState::Failed | TestState::Skipped => {
                self.in_flight.remove(&update.uid);
            }
        }
    }

    fn snapshot(&self) -> Vec<InProgressTest> {
        let mut tests: Vec<&InFlight> = self.in_flight.values().collect();
        tests.sort_by_key(|t| t.sequence);
        tests
            .into_iter()
            .map(|t| InProgressTest {
                display_name: t.display_name.clone(),
                elapsed_secs: t.started.elapsed().as_secs(),
            })
            .collect()
    }
}

/// Reports test activity to a [`HangDumpProcessLifetimeHandler`](super::HangDumpProcessLifetimeHandler).
pub struct HangDumpActivityIndicator {
    client: NamedPipeClient,
    consumer: Arc<NamedPipeServer>,
    accept: JoinHandle<()>,
    activity: Arc<Mutex<Activity>>,
    cancel: CancellationToken,
}

impl HangDumpActivityIndicator {
    /// Open the consumer pipe, connect to the controller and perform the handshake.
    pub async fn connect(controller_pipe: &str, timeout: Duration) -> Result<Self, HangDumpError> {
        let registry = hang_dump_registry()?;
        let activity = Arc::new(Mutex::new(Activity::default()));
        let cancel = CancellationToken::new();

        let consumer_name = PipeName::unique("testhost_hangdump_consumer");
        let source = Arc::clone(&activity);
        let answer = callback(move |message: Message| {
            let tests = source.lock().unwrap_or_else(PoisonError::into_inner).snapshot();
            async move {
                if message.downcast_ref::<GetInProgressTests>().is_none() {
                    return Err(PipeError::Handler("unexpected message on the consumer pipe".to_string()));
                }
                Ok(Box::new(InProgressTests { tests }) as Message)
            }
        });
        let consumer = Arc::new(NamedPipeServer::bind(consumer_name.clone(), Arc::clone(&registry), answer)?);

        let accept = {
            let consumer = Arc::clone(&consumer);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = consumer.wait_connection(&cancel).await {
                    debug!(error = %e, "consumer pipe closed before the controller connected");
                }
            })
        };

        let client = NamedPipeClient::new(PipeName::new(controller_pipe), registry);
        client
            .connect(timeout, &cancel)
            .await
            .map_err(timeout_as("connect to the hang-dump controller"))?;

        let handshake = ActivityHandshake {
            consumer_pipe: consumer_name.name().to_string(),
            process_id: std::process::id(),
        };
        client.request::<_, VoidResponse>(&handshake, &cancel).await?;
        debug!(controller = controller_pipe, consumer = %consumer_name, "hang-dump handshake done");

        Ok(Self {
            client,
            consumer,
            accept,
            activity,
            cancel,
        })
    }

    /// Record `update` and signal activity to the controller.
    pub async fn on_test_state_update(&self, update: TestStateUpdate) -> Result<(), HangDumpError> {
        self.activity.lock().unwrap_or_else(PoisonError::into_inner).apply(&update);
        self.client.request::<_, VoidResponse>(&update, &self.cancel).await?;
        Ok(())
    }

    /// Tell the controller the session is over, so silence from now on is not a hang.
    pub async fn session_end(&self) -> Result<(), HangDumpError> {
        self.client.request::<_, VoidResponse>(&SessionEnd, &self.cancel).await?;
        Ok(())
    }

    /// Close both pipes. Idempotent.
    pub async fn dispose(&self) -> Result<(), HangDumpError> {
        self.client.dispose().await;
        self.cancel.cancel();
        self.accept.abort();
        self.consumer.dispose().await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_lists_unfinished_tests_oldest_first() {
        let mut activity = Activity::default();
        activity.apply(&TestStateUpdate::new("1", "Adds", TestState::InProgress));
        activity.apply(&TestStateUpdate::new("2", "Subtracts", TestState::InProgress));
        activity.apply(&TestStateUpdate::new("3", "Divides", TestState::InProgress));
        activity.apply(&TestStateUpdate::new("2", "Subtracts", TestState::Passed));

        let names: Vec<_> = activity.snapshot().into_iter().map(|t| t.display_name).collect();
        assert_eq!(names, vec!["Adds", "Divides"]);
    }

    #[tokio::test]
    async fn test_connect_without_controller_times_out() {
        let missing = PipeName::unique("testhost_missing_controller");
        let err = HangDumpActivityIndicator::connect(missing.name(), Duration::from_millis(100))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, HangDumpError::OperationTimeout { .. }));
    }
}
