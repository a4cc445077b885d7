//! Platform-specific pipe addresses.

use std::fmt;
use std::path::PathBuf;

use uuid::Uuid;

/// Prefix of every Windows named pipe path.
pub const WINDOWS_PIPE_PREFIX: &str = r"\\.\pipe\";

/// A logical pipe name plus the address it maps to on this platform.
///
/// - Windows: `\\.\pipe\<name>` where path separators in `name` are replaced by `_`.
/// - Elsewhere: `<temp dir>/<name>`, a Unix domain socket path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipeName {
    name: String,
    path: PathBuf,
}

impl PipeName {
    /// Map a logical name to this platform's address.
    ///
    /// A name that already carries the Windows prefix, or is already an absolute socket path, is kept as is so that a
    /// name received from a peer resolves to the same address.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let path = if cfg!(windows) { windows_path(&name) } else { unix_path(&name) };
        Self { name, path }
    }

    /// A fresh name that no other live endpoint uses: `<prefix>_<uuid>`.
    pub fn unique(prefix: &str) -> Self {
        Self::new(format!("{}_{}", prefix, Uuid::new_v4().simple()))
    }

    /// The logical name, as exchanged between processes.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The platform address to bind or connect to.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl fmt::Display for PipeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

fn windows_path(name: &str) -> PathBuf {
    if let Some(stripped) = name.strip_prefix(WINDOWS_PIPE_PREFIX) {
        return PathBuf::from(format!("{}{}", WINDOWS_PIPE_PREFIX, normalize(stripped)));
    }
    PathBuf::from(format!("{}{}", WINDOWS_PIPE_PREFIX, normalize(name)))
}

fn unix_path(name: &str) -> PathBuf {
    let candidate = PathBuf::from(name);
    if candidate.is_absolute() {
        return candidate;
    }
    std::env::temp_dir().join(normalize(name))
}

fn normalize(name: &str) -> String {
    name.chars().map(|c| if c == '/' || c == '\\' { '_' } else { c }).collect()
}
