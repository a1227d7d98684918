use std::{
    env,
    ffi::OsString,
    io::ErrorKind,
    path::{Path, PathBuf},
    process::Stdio,
    time::{Duration, Instant},
};

use metrics::histogram;
use tokio::process::Command;
use tracing::{debug, warn};

use super::error::{PipelineStep, RenderError};

pub const LILYPOND_TOOL: &str = "lilypond";
pub const CONVERT_TOOL: &str = "convert";

const LILYPOND_INSTALL_HINT: &str = "Please install LilyPond: brew install lilypond";
const CONVERT_INSTALL_HINT: &str = "Please install ImageMagick: brew install imagemagick";

/// An external command-line program the pipeline shells out to.
#[derive(Debug, Clone)]
pub struct ExternalTool {
    name: &'static str,
    program: PathBuf,
    install_hint: &'static str,
}

/// Captured streams of a tool run that exited successfully.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub stdout: String,
    pub stderr: String,
}

impl ExternalTool {
    pub fn lilypond(program: impl Into<PathBuf>) -> Self {
        Self {
            name: LILYPOND_TOOL,
            program: program.into(),
            install_hint: LILYPOND_INSTALL_HINT,
        }
    }

    pub fn convert(program: impl Into<PathBuf>) -> Self {
        Self {
            name: CONVERT_TOOL,
            program: program.into(),
            install_hint: CONVERT_INSTALL_HINT,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn install_hint(&self) -> &'static str {
        self.install_hint
    }

    /// Locate the executable the same way a shell `which` lookup would.
    pub fn resolve(&self) -> Option<PathBuf> {
        resolve_executable(&self.program)
    }

    /// Resolve the tool, run it to completion in `cwd` and capture both streams.
    ///
    /// A non-zero exit becomes [`RenderError::ToolFailed`]; exceeding `timeout` kills
    /// the tool's whole process group and becomes [`RenderError::TimedOut`].
    pub(crate) async fn run(
        &self,
        step: PipelineStep,
        args: Vec<OsString>,
        cwd: &Path,
        timeout: Duration,
    ) -> Result<ToolOutput, RenderError> {
        let program = self.resolve().ok_or_else(|| self.missing(step))?;
        let command_line = render_command_line(&program, &args);
        let started_at = Instant::now();

        let mut command = Command::new(&program);
        command
            .args(&args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command.spawn().map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                self.missing(step)
            } else {
                RenderError::Spawn {
                    step,
                    tool: self.name,
                    command: command_line.clone(),
                    source,
                }
            }
        })?;
        let mut group = ProcessGroupGuard::new(self.name, child.id());

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(source)) => {
                return Err(RenderError::Spawn {
                    step,
                    tool: self.name,
                    command: command_line,
                    source,
                });
            }
            Err(_) => {
                warn!(
                    target = "application::render::tools",
                    op = "tools::run",
                    result = "timeout",
                    tool = self.name,
                    step = step.as_str(),
                    timeout_ms = timeout.as_millis() as u64,
                    command = %command_line,
                    "External tool timed out and was killed"
                );
                return Err(RenderError::TimedOut {
                    step,
                    tool: self.name,
                    command: command_line,
                    after: timeout,
                });
            }
        };

        group.disarm();

        let elapsed_ms = started_at.elapsed().as_millis() as u64;
        histogram!("lilyrender_tool_ms", "tool" => self.name).record(elapsed_ms as f64);

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let exit_code = output.status.code();
            warn!(
                target = "application::render::tools",
                op = "tools::run",
                result = "error",
                tool = self.name,
                step = step.as_str(),
                elapsed_ms,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                stderr = %stderr,
                "External tool exited with failure"
            );
            return Err(RenderError::ToolFailed {
                step,
                tool: self.name,
                command: command_line,
                exit_code,
                stdout,
                stderr,
            });
        }

        debug!(
            target = "application::render::tools",
            op = "tools::run",
            result = "ok",
            tool = self.name,
            step = step.as_str(),
            elapsed_ms,
            command = %command_line,
            "External tool finished"
        );

        Ok(ToolOutput { stdout, stderr })
    }

    fn missing(&self, step: PipelineStep) -> RenderError {
        RenderError::DependencyMissing {
            step,
            tool: self.name,
            program: self.program.clone(),
            hint: self.install_hint,
        }
    }
}

/// Kills every process the tool started (the engine runs Ghostscript as a child)
/// unless the tool exited on its own.
struct ProcessGroupGuard {
    tool: &'static str,
    leader: Option<u32>,
}

impl ProcessGroupGuard {
    fn new(tool: &'static str, leader: Option<u32>) -> Self {
        Self { tool, leader }
    }

    fn disarm(&mut self) {
        self.leader = None;
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        if let Some(leader) = self.leader.take() {
            kill_process_group(self.tool, leader);
        }
    }
}

#[cfg(unix)]
fn kill_process_group(tool: &'static str, leader: u32) {
    let Ok(group) = i32::try_from(leader) else {
        return;
    };
    if group <= 1 {
        return;
    }

    // SAFETY: killpg only sends a signal to the group created for this tool run.
    let result = unsafe { libc::killpg(group, libc::SIGKILL) };
    if result != 0 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::ESRCH) {
            warn!(
                target = "application::render::tools",
                op = "tools::kill_group",
                tool,
                group,
                error = %err,
                "Failed to kill tool process group"
            );
        }
    }
}

#[cfg(not(unix))]
fn kill_process_group(_tool: &'static str, _leader: u32) {}

/// Find `program` on `PATH`, or check it directly when it already contains a directory.
pub fn resolve_executable(program: &Path) -> Option<PathBuf> {
    if program.as_os_str().is_empty() {
        return None;
    }

    if program.components().count() > 1 {
        return is_executable(program).then(|| program.to_path_buf());
    }

    let search_path = env::var_os("PATH")?;
    env::split_paths(&search_path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    std::fs::metadata(path)
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

fn render_command_line(program: &Path, args: &[OsString]) -> String {
    let mut line = program.display().to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}
