//! Isolation hosts.
//!
//! Discovery of one source runs behind a message boundary: the caller sends a plain-data [`DiscoveryRequest`] and
//! receives a plain-data [`DiscoveryResponse`]. Nothing else crosses the boundary, so the same request can be served
//! in the calling process ([`InProcessHost`]) or by a worker process reached over a named pipe
//! ([`ChildProcessHost`]).

mod in_process;
mod process;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use testhost_core::DiscoveryResult;
use testhost_pipe::{PipeResult, SerializerRegistry};
use tracing::debug;

use crate::discovery::{AssemblyEnumerator, DiscoveryError};
use crate::loader::FileOperations;
use crate::settings::{IsolationMode, RunSettings};

pub use in_process::InProcessHost;
pub use process::{ChildProcessHost, WORKER_SUBCOMMAND};

/// Serializer id of [`DiscoveryRequest`] on the discovery pipe.
pub const DISCOVERY_REQUEST_ID: i32 = 1;
/// Serializer id of [`DiscoveryResponse`] on the discovery pipe.
pub const DISCOVERY_RESPONSE_ID: i32 = 2;

/// Discover the tests of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    /// Full path of the assembly.
    pub source: String,
    /// Run settings as a TOML document; may be empty.
    pub settings: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscoveryResponse {
    Completed(DiscoveryResult),
    Failed { message: String },
}

/// Serializers for the discovery pipe. Both endpoints build the same registry.
pub fn discovery_registry() -> PipeResult<Arc<SerializerRegistry>> {
    let mut registry = SerializerRegistry::new();
    registry
        .register_json::<DiscoveryRequest>(DISCOVERY_REQUEST_ID)?
        .register_json::<DiscoveryResponse>(DISCOVERY_RESPONSE_ID)?;
    Ok(Arc::new(registry))
}

/// Runs discovery requests somewhere other than the caller's stack.
pub trait IsolationHost {
    fn invoke(&mut self, request: &DiscoveryRequest) -> Result<DiscoveryResponse, DiscoveryError>;

    /// Release the host. Further calls to [`invoke`](Self::invoke) fail.
    fn dispose(&mut self) -> Result<(), DiscoveryError>;
}

/// Create the host selected by `settings`.
pub fn create_host(
    settings: &RunSettings,
    files: Arc<dyn FileOperations>,
    worker_program: Option<&Path>,
) -> Result<Box<dyn IsolationHost>, DiscoveryError> {
    match settings.adapter.isolation {
        IsolationMode::InProcess => Ok(Box::new(InProcessHost::new(files))),
        IsolationMode::ChildProcess => Ok(Box::new(ChildProcessHost::start(settings, worker_program)?)),
    }
}

/// Serve one request. This is what runs on the far side of every host.
pub fn handle_request(request: &DiscoveryRequest, files: &dyn FileOperations) -> DiscoveryResponse {
    match discover(request, files) {
        Ok(result) => DiscoveryResponse::Completed(result),
        Err(e) => DiscoveryResponse::Failed { message: e.to_string() },
    }
}

fn discover(request: &DiscoveryRequest, files: &dyn FileOperations) -> Result<DiscoveryResult, DiscoveryError> {
    let settings = RunSettings::from_toml_str(&request.settings)?;
    let path = Path::new(&request.source);

    let assembly = files.load_assembly(path)?;
    let mut result = AssemblyEnumerator::new(files, &settings.adapter).enumerate_loaded(&assembly)?;
    result.test_run_parameters = settings.merged_parameters(&assembly.run_parameters);
    debug!(
        source = %request.source,
        parameters = result.test_run_parameters.len(),
        "test run parameters resolved"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::InMemoryFileOperations;
    use testhost_core::{AssemblyMetadata, FRAMEWORK_ASSEMBLY_NAME};

    fn files() -> InMemoryFileOperations {
        let assembly = AssemblyMetadata {
            references: vec![FRAMEWORK_ASSEMBLY_NAME.to_string()],
            types: Some(Vec::new()),
            ..AssemblyMetadata::default()
        };
        InMemoryFileOperations::new().with_assembly("/bin/Empty.dll", assembly)
    }

    #[test]
    fn test_handle_request_completes() {
        let request = DiscoveryRequest {
            source: "/bin/Empty.dll".to_string(),
            settings: String::new(),
        };
        assert_eq!(
            handle_request(&request, &files()),
            DiscoveryResponse::Completed(DiscoveryResult::default())
        );
    }

    #[test]
    fn test_handle_request_reports_failures_as_data() {
        let missing = DiscoveryRequest {
            source: "/bin/Missing.dll".to_string(),
            settings: String::new(),
        };
        assert!(matches!(handle_request(&missing, &files()), DiscoveryResponse::Failed { .. }));

        let bad_settings = DiscoveryRequest {
            source: "/bin/Empty.dll".to_string(),
            settings: "[adapter]\nunknown = 1".to_string(),
        };
        let DiscoveryResponse::Failed { message } = handle_request(&bad_settings, &files()) else {
            panic!("expected a failure");
        };
        assert!(message.starts_with("invalid run settings"), "{message}");
    }

    #[test]
    fn test_run_settings_parameters_override_assembly_parameters() {
        let mut assembly = AssemblyMetadata {
            references: vec![FRAMEWORK_ASSEMBLY_NAME.to_string()],
            types: Some(Vec::new()),
            ..AssemblyMetadata::default()
        };
        assembly.run_parameters.insert("server".to_string(), "localhost".to_string());
        assembly.run_parameters.insert("timeout".to_string(), "30".to_string());
        let files = InMemoryFileOperations::new().with_assembly("/bin/Params.dll", assembly);

        let request = DiscoveryRequest {
            source: "/bin/Params.dll".to_string(),
            settings: "[test_run_parameters]\nserver = \"db01\"\n".to_string(),
        };
        let DiscoveryResponse::Completed(result) = handle_request(&request, &files) else {
            panic!("expected discovery to complete");
        };
        assert_eq!(result.test_run_parameters.get("server").map(String::as_str), Some("db01"));
        assert_eq!(result.test_run_parameters.get("timeout").map(String::as_str), Some("30"));
    }

    #[test]
    fn test_registry_knows_both_messages() {
        let registry = discovery_registry().unwrap();
        assert_eq!(registry.len(), 2);
    }
}
