//! Messages exchanged on the hang-dump pipes.
//!
//! Worker → controller: [`ActivityHandshake`], [`TestStateUpdate`], [`SessionEnd`], each answered with
//! [`testhost_pipe::VoidResponse`].
//!
//! Controller → worker consumer pipe: [`GetInProgressTests`], answered with [`InProgressTests`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use testhost_pipe::{PipeResult, SerializerRegistry};

pub const HANDSHAKE_ID: i32 = 1;
pub const TEST_STATE_UPDATE_ID: i32 = 2;
pub const SESSION_END_ID: i32 = 3;
pub const GET_IN_PROGRESS_TESTS_ID: i32 = 4;
pub const IN_PROGRESS_TESTS_ID: i32 = 5;
pub const VOID_RESPONSE_ID: i32 = 6;

/// First message from the worker: where to reach it back, and which process to dump.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityHandshake {
    pub consumer_pipe: String,
    pub process_id: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestState {
    InProgress,
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestStateUpdate {
    pub uid: String,
    pub display_name: String,
    pub state: TestState,
}

impl TestStateUpdate {
    pub fn new(uid: impl Into<String>, display_name: impl Into<String>, state: TestState) -> Self {
        Self {
            uid: uid.into(),
            display_name: display_name.into(),
            state,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEnd;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetInProgressTests;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InProgressTest {
    pub display_name: String,
    pub elapsed_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InProgressTests {
    pub tests: Vec<InProgressTest>,
}

/// Serializers for both hang-dump pipes.
pub fn hang_dump_registry() -> PipeResult<Arc<SerializerRegistry>> {
    let mut registry = SerializerRegistry::new();
    registry
        .register_json::<ActivityHandshake>(HANDSHAKE_ID)?
        .register_json::<TestStateUpdate>(TEST_STATE_UPDATE_ID)?
        .register_json::<SessionEnd>(SESSION_END_ID)?
        .register_json::<GetInProgressTests>(GET_IN_PROGRESS_TESTS_ID)?
        .register_json::<InProgressTests>(IN_PROGRESS_TESTS_ID)?
        .register_void(VOID_RESPONSE_ID)?;
    Ok(Arc::new(registry))
}
