//! Pre-flight checks around an isolation host.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use testhost_core::{DiscoveryResult, FRAMEWORK_ASSEMBLY_NAME};
use tracing::{debug, warn};

use super::DiscoveryError;
use crate::isolation::{self, DiscoveryRequest, DiscoveryResponse};
use crate::loader::FileOperations;
use crate::settings::RunSettings;

/// Decides whether a source is worth discovering, then discovers it inside an isolation host.
pub struct AssemblyEnumeratorWrapper {
    files: Arc<dyn FileOperations>,
    worker_program: Option<PathBuf>,
}

impl AssemblyEnumeratorWrapper {
    pub fn new(files: Arc<dyn FileOperations>) -> Self {
        Self {
            files,
            worker_program: None,
        }
    }

    /// Executable launched for child-process isolation. Defaults to the running executable.
    pub fn with_worker_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.worker_program = Some(program.into());
        self
    }

    /// Discover the tests of `path`.
    ///
    /// Returns `None` for an empty path and for assemblies that do not reference the test framework. A missing file
    /// is an error.
    #[tracing::instrument(skip_all, fields(source = path))]
    pub fn get_tests(&self, path: &str, settings: &RunSettings) -> Result<Option<DiscoveryResult>, DiscoveryError> {
        if path.trim().is_empty() {
            return Ok(None);
        }

        let full_path = self.files.get_full_file_path(Path::new(path));
        if !self.files.does_file_exist(&full_path) {
            return Err(DiscoveryError::FileNotFound(full_path));
        }

        let assembly = self.files.load_assembly(&full_path)?;
        if !assembly.references_assembly(FRAMEWORK_ASSEMBLY_NAME) {
            debug!("source does not reference the test framework, skipping");
            return Ok(None);
        }

        let request = DiscoveryRequest {
            source: full_path.display().to_string(),
            settings: settings.to_toml_string()?,
        };
        let mut host = isolation::create_host(settings, Arc::clone(&self.files), self.worker_program.as_deref())?;
        let response = host.invoke(&request);
        let disposed = host.dispose();

        let response = match (response, disposed) {
            (Ok(response), Ok(())) => response,
            (Ok(response), Err(e)) => {
                warn!(error = %e, "isolation host did not shut down cleanly");
                response
            }
            // A failed shutdown explains a failed call better than the call's own error, e.g. a hang dump.
            (Err(_), Err(e)) => return Err(e),
            (Err(e), Ok(())) => return Err(e),
        };

        match response {
            DiscoveryResponse::Completed(result) => Ok(Some(result)),
            DiscoveryResponse::Failed { message } => Err(DiscoveryError::Isolation(message)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::InMemoryFileOperations;
    use testhost_core::{AssemblyMetadata, AttributeData, MethodMetadata, TypeMetadata};

    fn wrapper() -> AssemblyEnumeratorWrapper {
        let tests = AssemblyMetadata {
            references: vec![FRAMEWORK_ASSEMBLY_NAME.to_string()],
            types: Some(vec![TypeMetadata {
                full_name: "Calc.Tests.MathTests".to_string(),
                attributes: vec![AttributeData::new("TestClass")],
                methods: vec![MethodMetadata {
                    name: "Adds".to_string(),
                    attributes: vec![AttributeData::new("TestMethod")],
                    ..MethodMetadata::default()
                }],
                ..TypeMetadata::default()
            }]),
            ..AssemblyMetadata::default()
        };
        let library = AssemblyMetadata {
            references: vec!["System.Runtime".to_string()],
            ..AssemblyMetadata::default()
        };
        let files = InMemoryFileOperations::new()
            .with_assembly("/bin/Calc.Tests.dll", tests)
            .with_assembly("/bin/Calc.dll", library);
        AssemblyEnumeratorWrapper::new(Arc::new(files))
    }

    #[test]
    fn test_preflight() {
        let wrapper = wrapper();
        let settings = RunSettings::default();
        assert!(wrapper.get_tests("", &settings).unwrap().is_none());
        assert!(wrapper.get_tests("/bin/Calc.dll", &settings).unwrap().is_none());
        assert!(matches!(
            wrapper.get_tests("/bin/Missing.dll", &settings),
            Err(DiscoveryError::FileNotFound(path)) if path == Path::new("/bin/Missing.dll")
        ));
    }

    #[test]
    fn test_discovers_through_the_host() {
        let result = wrapper()
            .get_tests("/bin/Calc.Tests.dll", &RunSettings::default())
            .unwrap()
            .unwrap();
        assert_eq!(result.tests.len(), 1);
        assert_eq!(result.tests[0].test_method.fully_qualified_name(), "Calc.Tests.MathTests.Adds");
        assert!(result.warnings.is_empty());
    }
}
