use std::{
    fs,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};

use metrics::counter;
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{PipelineStep, RenderError};

/// Base name shared by the source, document and image files of one render.
pub const STAGED_BASE_NAME: &str = "score";

const SOURCE_FILE_MODE: u32 = 0o666;
const DIRECTORY_MODE: u32 = 0o777;

/// The files of a single render, scoped under a directory unique to that render.
///
/// Dropping the value removes every staged file that exists, whatever state the
/// pipeline reached. Removal failures are logged and counted, never returned.
#[derive(Debug)]
pub struct StagedFiles {
    token: Uuid,
    directory: PathBuf,
    source: PathBuf,
    document: PathBuf,
    image: PathBuf,
    output_prefix: PathBuf,
    released: bool,
}

impl StagedFiles {
    /// Create the staging root if needed and claim a fresh per-render directory inside it.
    pub async fn allocate(staging_root: &Path) -> Result<Self, RenderError> {
        tokio::fs::create_dir_all(staging_root)
            .await
            .map_err(|source| {
                RenderError::staging(
                    PipelineStep::Stage,
                    "create staging directory",
                    staging_root,
                    source,
                )
            })?;

        let token = Uuid::new_v4();
        let directory = staging_root.join(token.to_string());
        tokio::fs::create_dir(&directory).await.map_err(|source| {
            RenderError::staging(
                PipelineStep::Stage,
                "create render directory",
                &directory,
                source,
            )
        })?;

        let staged = Self::at(token, directory);
        set_mode(&staged.directory, DIRECTORY_MODE)
            .await
            .map_err(|source| {
                RenderError::staging(
                    PipelineStep::Stage,
                    "set permissions on",
                    &staged.directory,
                    source,
                )
            })?;

        Ok(staged)
    }

    fn at(token: Uuid, directory: PathBuf) -> Self {
        let output_prefix = directory.join(STAGED_BASE_NAME);
        Self {
            token,
            source: output_prefix.with_extension("ly"),
            document: output_prefix.with_extension("pdf"),
            image: output_prefix.with_extension("png"),
            output_prefix,
            directory,
            released: false,
        }
    }

    /// Write the engine input and open it up for tools running under another user.
    pub async fn write_source(&self, text: &str) -> Result<(), RenderError> {
        tokio::fs::write(&self.source, text)
            .await
            .map_err(|source| {
                RenderError::staging(PipelineStep::Stage, "write notation source", &self.source, source)
            })?;
        set_mode(&self.source, SOURCE_FILE_MODE)
            .await
            .map_err(|source| {
                RenderError::staging(PipelineStep::Stage, "set permissions on", &self.source, source)
            })
    }

    pub fn token(&self) -> Uuid {
        self.token
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn document(&self) -> &Path {
        &self.document
    }

    pub fn image(&self) -> &Path {
        &self.image
    }

    /// Path without extension handed to the engine's `-o` flag.
    pub fn output_prefix(&self) -> &Path {
        &self.output_prefix
    }

    /// Remove the staged files now instead of waiting for the value to go out of scope.
    pub fn release(mut self) {
        self.cleanup();
    }

    fn cleanup(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        for path in [&self.source, &self.document, &self.image] {
            remove_staged_file(path);
        }

        // The EPS backend writes per-system side files next to the document.
        match fs::read_dir(&self.directory) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    remove_staged_file(&entry.path());
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => return,
            Err(err) => {
                record_cleanup_failure(&self.directory, &err);
            }
        }

        match fs::remove_dir(&self.directory) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => record_cleanup_failure(&self.directory, &err),
        }
    }
}

impl Drop for StagedFiles {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn remove_staged_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(
                target = "application::render::staging",
                op = "staging::cleanup",
                path = %path.display(),
                "Cleaned up staged file"
            );
        }
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => record_cleanup_failure(path, &err),
    }
}

fn record_cleanup_failure(path: &Path, err: &io::Error) {
    counter!("lilyrender_cleanup_failures_total").increment(1);
    warn!(
        target = "application::render::staging",
        op = "staging::cleanup",
        result = "error",
        path = %path.display(),
        error = %err,
        "Error cleaning up staged file"
    );
}

#[cfg(unix)]
async fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    tokio::fs::set_permissions(path, fs::Permissions::from_mode(mode)).await
}

#[cfg(not(unix))]
async fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}
