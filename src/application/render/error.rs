use std::{fmt::Write as _, io, path::PathBuf, time::Duration};

use thiserror::Error;

/// Pipeline position at which a render stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Stage,
    Typeset,
    VerifyDocument,
    Rasterize,
    VerifyImage,
    ReadImage,
}

impl PipelineStep {
    pub fn as_str(self) -> &'static str {
        match self {
            PipelineStep::Stage => "stage",
            PipelineStep::Typeset => "typeset",
            PipelineStep::VerifyDocument => "verify_document",
            PipelineStep::Rasterize => "rasterize",
            PipelineStep::VerifyImage => "verify_image",
            PipelineStep::ReadImage => "read_image",
        }
    }
}

/// Classification tag surfaced to callers as the error `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderErrorKind {
    DependencyMissing,
    ExternalToolFailure,
    OutputMissing,
    Timeout,
    Staging,
}

impl RenderErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RenderErrorKind::DependencyMissing => "DependencyMissing",
            RenderErrorKind::ExternalToolFailure => "ExternalToolFailure",
            RenderErrorKind::OutputMissing => "OutputMissing",
            RenderErrorKind::Timeout => "Timeout",
            RenderErrorKind::Staging => "StagingError",
        }
    }
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to {action} `{}`: {source}", .path.display())]
    Staging {
        step: PipelineStep,
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{tool} is not installed (looked for `{}`). {hint}", .program.display())]
    DependencyMissing {
        step: PipelineStep,
        tool: &'static str,
        program: PathBuf,
        hint: &'static str,
    },
    #[error("failed to run {tool}: {source}")]
    Spawn {
        step: PipelineStep,
        tool: &'static str,
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{tool} error:\nStdout: {stdout}\nStderr: {stderr}")]
    ToolFailed {
        step: PipelineStep,
        tool: &'static str,
        command: String,
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    #[error("{tool} did not finish within {} seconds", .after.as_secs_f64())]
    TimedOut {
        step: PipelineStep,
        tool: &'static str,
        command: String,
        after: Duration,
    },
    #[error("{artifact} file was not created at {}", .path.display())]
    OutputMissing {
        step: PipelineStep,
        tool: &'static str,
        artifact: &'static str,
        path: PathBuf,
    },
}

impl RenderError {
    pub(crate) fn staging(
        step: PipelineStep,
        action: &'static str,
        path: impl Into<PathBuf>,
        source: io::Error,
    ) -> Self {
        Self::Staging {
            step,
            action,
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> RenderErrorKind {
        match self {
            RenderError::Staging { .. } => RenderErrorKind::Staging,
            RenderError::DependencyMissing { .. } => RenderErrorKind::DependencyMissing,
            RenderError::Spawn { .. } | RenderError::ToolFailed { .. } => {
                RenderErrorKind::ExternalToolFailure
            }
            RenderError::TimedOut { .. } => RenderErrorKind::Timeout,
            RenderError::OutputMissing { .. } => RenderErrorKind::OutputMissing,
        }
    }

    pub fn step(&self) -> PipelineStep {
        match self {
            RenderError::Staging { step, .. }
            | RenderError::DependencyMissing { step, .. }
            | RenderError::Spawn { step, .. }
            | RenderError::ToolFailed { step, .. }
            | RenderError::TimedOut { step, .. }
            | RenderError::OutputMissing { step, .. } => *step,
        }
    }

    /// Multi-line report naming the failing step, the command line and both captured streams.
    pub fn diagnostic(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "error: {}", self.kind().as_str());
        let _ = writeln!(out, "step: {}", self.step().as_str());

        match self {
            RenderError::Staging { action, path, source, .. } => {
                let _ = writeln!(out, "action: {action}");
                let _ = writeln!(out, "path: {}", path.display());
                let _ = writeln!(out, "cause: {source}");
            }
            RenderError::DependencyMissing {
                tool,
                program,
                hint,
                ..
            } => {
                let _ = writeln!(out, "tool: {tool}");
                let _ = writeln!(out, "program: {}", program.display());
                let _ = writeln!(out, "hint: {hint}");
            }
            RenderError::Spawn {
                tool,
                command,
                source,
                ..
            } => {
                let _ = writeln!(out, "tool: {tool}");
                let _ = writeln!(out, "command: {command}");
                let _ = writeln!(out, "cause: {source}");
            }
            RenderError::ToolFailed {
                tool,
                command,
                exit_code,
                stdout,
                stderr,
                ..
            } => {
                let _ = writeln!(out, "tool: {tool}");
                let _ = writeln!(out, "command: {command}");
                match exit_code {
                    Some(code) => {
                        let _ = writeln!(out, "exit code: {code}");
                    }
                    None => {
                        let _ = writeln!(out, "exit code: none (terminated by signal)");
                    }
                }
                let _ = writeln!(out, "--- stdout ---\n{stdout}");
                let _ = writeln!(out, "--- stderr ---\n{stderr}");
            }
            RenderError::TimedOut {
                tool,
                command,
                after,
                ..
            } => {
                let _ = writeln!(out, "tool: {tool}");
                let _ = writeln!(out, "command: {command}");
                let _ = writeln!(out, "timeout: {}ms", after.as_millis());
            }
            RenderError::OutputMissing {
                tool,
                artifact,
                path,
                ..
            } => {
                let _ = writeln!(out, "tool: {tool}");
                let _ = writeln!(out, "expected {artifact}: {}", path.display());
                let _ = writeln!(out, "note: the tool exited successfully without producing it");
            }
        }

        out
    }
}
