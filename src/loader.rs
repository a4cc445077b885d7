//! Loading reflected assemblies.
//!
//! Discovery never touches the filesystem directly; it goes through [`FileOperations`]. The shipped implementation,
//! [`ManifestFileOperations`], reads an assembly manifest: a JSON document in the shape of
//! [`testhost_core::AssemblyMetadata`] describing what reflection reports about the assembly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use testhost_core::AssemblyMetadata;

use crate::discovery::DiscoveryError;

/// Filesystem and assembly-loading seam used by discovery.
pub trait FileOperations: Send + Sync {
    /// Load the reflected metadata of the assembly at `path`.
    fn load_assembly(&self, path: &Path) -> Result<AssemblyMetadata, DiscoveryError>;

    fn does_file_exist(&self, path: &Path) -> bool;

    /// Absolute form of `path`. Paths that cannot be resolved are returned unchanged.
    fn get_full_file_path(&self, path: &Path) -> PathBuf;
}

/// Reads JSON assembly manifests from disk.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManifestFileOperations;

impl FileOperations for ManifestFileOperations {
    fn load_assembly(&self, path: &Path) -> Result<AssemblyMetadata, DiscoveryError> {
        let source = std::fs::read_to_string(path).map_err(|source| DiscoveryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut assembly: AssemblyMetadata =
            serde_json::from_str(&source).map_err(|e| DiscoveryError::InvalidManifest {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        fill_location(&mut assembly, &self.get_full_file_path(path));
        Ok(assembly)
    }

    fn does_file_exist(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn get_full_file_path(&self, path: &Path) -> PathBuf {
        std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Serves assemblies from memory, keyed by path.
#[derive(Debug, Default, Clone)]
pub struct InMemoryFileOperations {
    assemblies: HashMap<PathBuf, AssemblyMetadata>,
}

impl InMemoryFileOperations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `assembly` under `path`.
    pub fn with_assembly(mut self, path: impl Into<PathBuf>, assembly: AssemblyMetadata) -> Self {
        let path = path.into();
        let mut assembly = assembly;
        fill_location(&mut assembly, &path);
        self.assemblies.insert(path, assembly);
        self
    }
}

impl FileOperations for InMemoryFileOperations {
    fn load_assembly(&self, path: &Path) -> Result<AssemblyMetadata, DiscoveryError> {
        self.assemblies
            .get(path)
            .cloned()
            .ok_or_else(|| DiscoveryError::FileNotFound(path.to_path_buf()))
    }

    fn does_file_exist(&self, path: &Path) -> bool {
        self.assemblies.contains_key(path)
    }

    fn get_full_file_path(&self, path: &Path) -> PathBuf {
        path.to_path_buf()
    }
}

fn fill_location(assembly: &mut AssemblyMetadata, path: &Path) {
    if assembly.location.is_empty() {
        assembly.location = path.display().to_string();
    }
    if assembly.name.is_empty() {
        assembly.name = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();
    }
}
