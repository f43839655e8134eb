//! Small process-related helpers shared across the workspace.
//!
//! Every external tool screlay drives (yt-dlp, ffprobe, the bitrate
//! wrapper) is spawned through these helpers so child processes never
//! flash a console window on Windows and their output is captured the
//! same way everywhere.

use std::ffi::OsStr;
use std::process::ExitStatus;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Output of a finished child process, decoded lossily as UTF-8.
#[derive(Debug, Clone)]
pub struct CapturedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

impl CapturedOutput {
    fn from_output(output: std::process::Output) -> Self {
        Self {
            status: output.status,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }

    /// Whether the process exited with status zero.
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Human-readable exit description, e.g. `exited with 1`.
    pub fn exit_description(&self) -> String {
        match self.status.code() {
            Some(code) => format!("exited with {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

/// Run a `std::process::Command` to completion with piped stdout/stderr.
pub fn run_captured_std(cmd: &mut std::process::Command) -> std::io::Result<CapturedOutput> {
    use std::process::Stdio;

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd.output().map(CapturedOutput::from_output)
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
///
/// The child is killed if the returned command's future is dropped, so a
/// cancelled caller never leaves an orphaned tool running.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.kill_on_drop(true);
    cmd
}

/// Run a `tokio::process::Command` to completion with piped stdout/stderr.
///
/// Spawn failures (missing binary, permissions) surface as `Err`; a
/// non-zero exit is reported through [`CapturedOutput::success`].
#[cfg(feature = "tokio")]
pub async fn run_captured(cmd: &mut tokio::process::Command) -> std::io::Result<CapturedOutput> {
    use std::process::Stdio;

    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd.output().await.map(CapturedOutput::from_output)
}
