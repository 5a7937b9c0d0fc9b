//! Workspace materialisation: downloading a job's file manifest into a
//! scoped temporary directory.
//!
//! The root directory is removed on every exit path (success, error, or
//! unwind) by the [`tempfile::TempDir`] guard inside [`ScopedWorkspace`].
//! Downloads are written through a capability-scoped directory handle, so a
//! manifest path that escapes the root is refused by the OS layer on top of
//! the explicit normalisation performed here.

use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use cap_std::ambient_authority;
use cap_std::fs::Dir;
use color_eyre::eyre::{Context as _, Report};
use serde::Deserialize;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::StorageError;
use crate::observability::LOG_TARGET;
use crate::storage::ObjectStore;

/// One manifest entry: a remote object and its path under the root.
#[derive(Debug, Clone, Deserialize)]
pub struct ManifestEntry {
    /// Key of the object in the payload's bucket.
    pub r2_object_key: String,
    /// Path relative to the materialised root; leading separators are
    /// stripped, parent-directory components are rejected.
    pub file_path: String,
}

/// Raised when a manifest cannot be materialised.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// The manifest listed no files at all.
    #[error("No files found in job payload manifest to download.")]
    EmptyManifest,
    /// A manifest path would escape the workspace root.
    #[error("workspace manifest entry '{path}' escapes the workspace root")]
    UnsafePath {
        /// The offending manifest path.
        path: String,
    },
    /// An object could not be downloaded.
    #[error("failed to download workspace object '{key}'")]
    Download {
        /// Key of the object that failed.
        key: String,
        /// Underlying storage failure.
        #[source]
        source: StorageError,
    },
    /// The temporary root could not be created or written.
    #[error("failed to prepare the workspace directory")]
    Workspace(#[source] Report),
}

/// A materialised workspace rooted in a temporary directory.
///
/// Dropping the value deletes the whole tree.
pub struct ScopedWorkspace {
    root: TempDir,
    dir: Dir,
}

impl ScopedWorkspace {
    /// Creates an empty workspace for one task.
    ///
    /// # Errors
    ///
    /// Returns [`MaterializeError::Workspace`] when the temporary directory
    /// cannot be created or opened.
    pub fn create(job_id: &str) -> Result<Self, MaterializeError> {
        let root = tempfile::Builder::new()
            .prefix(&format!("job_{job_id}_"))
            .tempdir()
            .context("create workspace directory")
            .map_err(MaterializeError::Workspace)?;
        let dir = Dir::open_ambient_dir(root.path(), ambient_authority())
            .context("open workspace directory")
            .map_err(MaterializeError::Workspace)?;
        Ok(Self { root, dir })
    }

    /// Root of the workspace as a UTF-8 path.
    ///
    /// # Errors
    ///
    /// Returns [`MaterializeError::Workspace`] when the temporary root is
    /// not valid UTF-8.
    pub fn root_path(&self) -> Result<Utf8PathBuf, MaterializeError> {
        Utf8PathBuf::from_path_buf(self.root.path().to_path_buf()).map_err(|path| {
            MaterializeError::Workspace(Report::msg(format!(
                "workspace root is not valid UTF-8: {}",
                path.display()
            )))
        })
    }

    /// Writes one file under the root, creating intermediate directories.
    fn write_file(&self, relative: &Utf8Path, bytes: &[u8]) -> Result<(), MaterializeError> {
        if let Some(parent) = relative.parent() {
            if !parent.as_str().is_empty() {
                self.dir
                    .create_dir_all(parent.as_std_path())
                    .context("create workspace subdirectory")
                    .map_err(MaterializeError::Workspace)?;
            }
        }
        self.dir
            .write(relative.as_std_path(), bytes)
            .context("write workspace file")
            .map_err(MaterializeError::Workspace)
    }

    /// Resolves an entrypoint to a path relative to the root, verifying it
    /// is a regular file inside the workspace. Returns `None` when the file
    /// is absent, not regular, or names an unsafe path.
    #[must_use]
    pub fn entrypoint(&self, entrypoint_file: &str) -> Option<Utf8PathBuf> {
        let relative = sanitize_relative_path(entrypoint_file).ok()?;
        let metadata = self.dir.metadata(relative.as_std_path()).ok()?;
        metadata.is_file().then_some(relative)
    }
}

/// Normalises a manifest path: strips leading separators, drops `.`
/// components, and rejects anything that would escape the root.
///
/// # Errors
///
/// Returns [`MaterializeError::UnsafePath`] for absolute escapes, parent
/// traversal, or paths that normalise to nothing.
pub fn sanitize_relative_path(raw: &str) -> Result<Utf8PathBuf, MaterializeError> {
    let trimmed = raw.trim_start_matches(['/', '\\']);
    let mut normalized = Utf8PathBuf::new();
    for component in Utf8Path::new(trimmed).components() {
        match component {
            Utf8Component::Normal(part) => normalized.push(part),
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir | Utf8Component::RootDir | Utf8Component::Prefix(_) => {
                return Err(MaterializeError::UnsafePath {
                    path: raw.to_owned(),
                });
            }
        }
    }
    if normalized.as_str().is_empty() {
        return Err(MaterializeError::UnsafePath {
            path: raw.to_owned(),
        });
    }
    Ok(normalized)
}

/// Downloads every manifest entry into a fresh [`ScopedWorkspace`].
pub struct Materializer<'a> {
    store: &'a dyn ObjectStore,
}

impl<'a> Materializer<'a> {
    /// Creates a materialiser over the given object store.
    #[must_use]
    pub const fn new(store: &'a dyn ObjectStore) -> Self {
        Self { store }
    }

    /// Materialises the manifest for one task.
    ///
    /// Entries with a blank key or path are skipped with a warning. The
    /// returned workspace removes itself when dropped; on error the
    /// partially populated root is removed before returning.
    ///
    /// # Errors
    ///
    /// Returns [`MaterializeError::EmptyManifest`] for an empty manifest,
    /// [`MaterializeError::UnsafePath`] when an entry escapes the root, and
    /// [`MaterializeError::Download`]/[`MaterializeError::Workspace`] for
    /// storage and filesystem failures.
    pub async fn materialize(
        &self,
        job_id: &str,
        bucket: &str,
        manifest: &[ManifestEntry],
    ) -> Result<ScopedWorkspace, MaterializeError> {
        if manifest.is_empty() {
            return Err(MaterializeError::EmptyManifest);
        }
        let workspace = ScopedWorkspace::create(job_id)?;

        for entry in manifest {
            if entry.r2_object_key.is_empty() || entry.file_path.is_empty() {
                warn!(
                    target: LOG_TARGET,
                    job_id,
                    key = %entry.r2_object_key,
                    path = %entry.file_path,
                    "skipping manifest entry with missing key or path"
                );
                continue;
            }
            let relative = sanitize_relative_path(&entry.file_path)?;
            let bytes = self
                .store
                .get(bucket, &entry.r2_object_key)
                .await
                .map_err(|source| MaterializeError::Download {
                    key: entry.r2_object_key.clone(),
                    source,
                })?;
            workspace.write_file(&relative, &bytes)?;
            debug!(
                target: LOG_TARGET,
                job_id,
                key = %entry.r2_object_key,
                path = %relative,
                "workspace file downloaded"
            );
        }
        Ok(workspace)
    }
}

#[cfg(test)]
mod tests;
