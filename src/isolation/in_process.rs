//! Same-process host.

use std::sync::Arc;

use super::{DiscoveryRequest, DiscoveryResponse, IsolationHost, handle_request};
use crate::discovery::DiscoveryError;
use crate::loader::FileOperations;

/// Serves requests in the calling process.
///
/// Requests and responses still go through a JSON round trip so that nothing but plain data crosses the boundary,
/// exactly as with a worker process.
pub struct InProcessHost {
    files: Option<Arc<dyn FileOperations>>,
}

impl InProcessHost {
    pub fn new(files: Arc<dyn FileOperations>) -> Self {
        Self { files: Some(files) }
    }
}

impl IsolationHost for InProcessHost {
    fn invoke(&mut self, request: &DiscoveryRequest) -> Result<DiscoveryResponse, DiscoveryError> {
        let files = self
            .files
            .as_ref()
            .ok_or_else(|| DiscoveryError::Isolation("host was disposed".to_string()))?;

        let request: DiscoveryRequest = round_trip(request)?;
        let response = handle_request(&request, files.as_ref());
        round_trip(&response)
    }

    fn dispose(&mut self) -> Result<(), DiscoveryError> {
        self.files = None;
        Ok(())
    }
}

fn round_trip<T>(value: &T) -> Result<T, DiscoveryError>
where
    T: serde::Serialize + serde::de::DeserializeOwned,
{
    let bytes = serde_json::to_vec(value).map_err(|e| DiscoveryError::Isolation(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| DiscoveryError::Isolation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::InMemoryFileOperations;

    #[test]
    fn test_disposed_host_rejects_requests() {
        let mut host = InProcessHost::new(Arc::new(InMemoryFileOperations::new()));
        let request = DiscoveryRequest {
            source: "/bin/A.dll".to_string(),
            settings: String::new(),
        };
        assert!(matches!(host.invoke(&request).unwrap(), DiscoveryResponse::Failed { .. }));

        host.dispose().unwrap();
        assert!(matches!(host.invoke(&request), Err(DiscoveryError::Isolation(_))));
    }
}
