//! Run settings.
//!
//! Settings are a TOML document with three tables:
//!
//! ```toml
//! [adapter]
//! consider_fixtures_as_special_tests = true
//! consider_empty_data_source_as_inconclusive = false
//! treat_discovery_warnings_as_errors = false
//! enable_base_class_test_methods_from_other_assemblies = false
//! isolation = "in_process"            # or "child_process"
//!
//! [hang_dump]
//! enabled = false
//! timeout_secs = 1800
//! dump_file_pattern = "testhost_%p_hang.dmp"
//! output_directory = "TestResults"
//!
//! [test_run_parameters]
//! server = "localhost"
//! ```
//!
//! Every key is optional; an empty document yields [`RunSettings::default`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder for the process id in [`HangDumpSettings::dump_file_pattern`].
pub const PROCESS_ID_PLACEHOLDER: &str = "%p";

/// Errors raised while loading run settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("could not read settings file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid run settings: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("could not render run settings: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid run settings: {0}")]
    Invalid(String),
}

/// Where discovery runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// In the calling process, behind a serialization boundary.
    #[default]
    InProcess,
    /// In a spawned worker process reached over a named pipe.
    ChildProcess,
}

/// Discovery behavior switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdapterSettings {
    /// Surface assembly/class initialize and cleanup methods as pseudo-tests.
    pub consider_fixtures_as_special_tests: bool,
    /// Keep one inconclusive test for a data source that yields no rows, instead of failing the expansion.
    pub consider_empty_data_source_as_inconclusive: bool,
    /// Report discovery warnings at error severity.
    pub treat_discovery_warnings_as_errors: bool,
    /// Discover test methods inherited from base classes that live in another assembly.
    pub enable_base_class_test_methods_from_other_assemblies: bool,
    pub isolation: IsolationMode,
}

/// Hang detection for child-process isolation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HangDumpSettings {
    pub enabled: bool,
    /// Seconds without activity before the worker is considered hung.
    pub timeout_secs: u64,
    /// Dump file name; `%p` is replaced by the worker's process id.
    pub dump_file_pattern: String,
    /// Directory receiving the dump and its `.log` companion. Defaults to the current directory.
    pub output_directory: Option<PathBuf>,
}

impl Default for HangDumpSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            timeout_secs: 30 * 60,
            dump_file_pattern: format!("testhost_{}_hang.dmp", PROCESS_ID_PLACEHOLDER),
            output_directory: None,
        }
    }
}

impl HangDumpSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Full path of the dump for `process_id`.
    pub fn dump_path(&self, process_id: u32) -> PathBuf {
        let file_name = self.dump_file_pattern.replace(PROCESS_ID_PLACEHOLDER, &process_id.to_string());
        match &self.output_directory {
            Some(dir) => dir.join(file_name),
            None => PathBuf::from(file_name),
        }
    }
}

/// Complete run settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunSettings {
    pub adapter: AdapterSettings,
    pub hang_dump: HangDumpSettings,
    pub test_run_parameters: BTreeMap<String, String>,
}

impl RunSettings {
    /// Create settings with every default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a settings document. Blank input yields the defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, SettingsError> {
        if source.trim().is_empty() {
            return Ok(Self::default());
        }
        let settings: RunSettings = toml::from_str(source)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load a settings file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let source = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Render back to TOML, the form in which settings cross the isolation boundary.
    pub fn to_toml_string(&self) -> Result<String, SettingsError> {
        Ok(toml::to_string(self)?)
    }

    fn validate(&self) -> Result<(), SettingsError> {
        if self.hang_dump.enabled && self.hang_dump.timeout_secs == 0 {
            return Err(SettingsError::Invalid("hang_dump.timeout_secs must be positive".to_string()));
        }
        if self.hang_dump.dump_file_pattern.trim().is_empty() {
            return Err(SettingsError::Invalid("hang_dump.dump_file_pattern must not be empty".to_string()));
        }
        Ok(())
    }

    /// Assembly-scoped parameters overlaid by run-settings parameters; run settings win on key collisions.
    pub fn merged_parameters(&self, assembly_parameters: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut merged = assembly_parameters.clone();
        merged.extend(self.test_run_parameters.iter().map(|(k, v)| (k.clone(), v.clone())));
        merged
    }

    /// Set whether fixtures are reported as pseudo-tests
    pub fn with_fixtures_as_special_tests(mut self, enabled: bool) -> Self {
        self.adapter.consider_fixtures_as_special_tests = enabled;
        self
    }

    /// Set whether empty data sources become inconclusive tests
    pub fn with_empty_data_source_as_inconclusive(mut self, enabled: bool) -> Self {
        self.adapter.consider_empty_data_source_as_inconclusive = enabled;
        self
    }

    /// Set whether discovery warnings are escalated to errors
    pub fn with_warnings_as_errors(mut self, enabled: bool) -> Self {
        self.adapter.treat_discovery_warnings_as_errors = enabled;
        self
    }

    pub fn with_base_class_methods_from_other_assemblies(mut self, enabled: bool) -> Self {
        self.adapter.enable_base_class_test_methods_from_other_assemblies = enabled;
        self
    }

    /// Set the isolation mode
    pub fn with_isolation(mut self, mode: IsolationMode) -> Self {
        self.adapter.isolation = mode;
        self
    }

    pub fn with_hang_dump(mut self, hang_dump: HangDumpSettings) -> Self {
        self.hang_dump = hang_dump;
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.test_run_parameters.insert(key.into(), value.into());
        self
    }
}
