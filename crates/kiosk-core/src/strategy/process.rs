//! Supervision of a spawned script target.
//!
//! The child runs with its target directory as working directory and its
//! stdout piped. A supervisor task forwards every stdout chunk to a
//! [`ProcessObserver`], flags the first one as the readiness signal, and reports
//! the exit. Stopping sends SIGTERM, escalates to SIGKILL after a grace period,
//! and always reaps the child.

use std::{
    future, io,
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    str,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader},
    process::{Child, ChildStderr, ChildStdout, Command},
    task::JoinHandle,
    time::{Instant, sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};

/// Time to wait for graceful shutdown after SIGTERM before escalating.
const TERM_WAIT_TIMEOUT_MS: u64 = 300;
/// Poll interval while waiting for graceful exit.
const TERM_POLL_INTERVAL_MS: u64 = 10;
/// Size of each stdout read.
const CHUNK_SIZE: usize = 8 * 1024;

/// Receives output and exit notifications from a supervised script.
pub trait ProcessObserver: Send + Sync {
    /// A chunk of stdout, decoded as UTF-8. `first` is set on the first chunk only.
    fn on_output(&self, chunk: &str, first: bool);
    /// The child exited without being asked to stop.
    fn on_exit(&self, status: io::Result<ExitStatus>);
}

/// How to launch a script.
#[derive(Debug, Clone)]
pub struct ScriptSpec {
    /// Entry point path.
    pub path: PathBuf,
    /// Working directory for the child.
    pub directory: PathBuf,
    /// Interpreter that runs `path`; `None` executes `path` directly.
    pub interpreter: Option<String>,
}

impl ScriptSpec {
    /// Build the command for this spec.
    fn command(&self) -> Command {
        let mut command = match &self.interpreter {
            Some(interp) => {
                let mut c = Command::new(interp);
                c.arg(&self.path);
                c
            }
            None => Command::new(&self.path),
        };
        command
            .current_dir(&self.directory)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

/// A running, supervised script.
pub struct ScriptProcess {
    /// OS process id at spawn time.
    pid: Option<u32>,
    /// Set once the first stdout chunk has been received.
    ready: Arc<AtomicBool>,
    /// Cancels the supervisor, which then terminates the child.
    cancel: CancellationToken,
    /// The supervisor task; `None` once stopped.
    task: Option<JoinHandle<()>>,
}

impl ScriptProcess {
    /// Spawn the script and start supervising it.
    ///
    /// Spawn failures are reported as [`Error::Script`].
    pub fn spawn(spec: &ScriptSpec, observer: Arc<dyn ProcessObserver>) -> Result<Self> {
        info!(path = %spec.path.display(), cwd = %spec.directory.display(), "script_spawn");
        let mut child = spec
            .command()
            .spawn()
            .map_err(|e| Error::Script(format!("{}: {e}", spec.path.display())))?;
        let pid = child.id();
        info!(pid, "script_spawned");

        let stdout = child.stdout.take();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(log_stderr(stderr, pid));
        }

        let ready = Arc::new(AtomicBool::new(false));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(supervise(
            child,
            stdout,
            ready.clone(),
            cancel.clone(),
            observer,
        ));
        Ok(Self {
            pid,
            ready,
            cancel,
            task: Some(task),
        })
    }

    /// Process id reported at spawn.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True once the script has produced output.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Terminate the child and wait until it has been reaped.
    ///
    /// Safe to call repeatedly and after the child has already exited.
    pub async fn stop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        self.cancel.cancel();
        if let Err(e) = task.await {
            warn!(pid = self.pid, error = %e, "script_supervisor_join_failed");
        }
        debug!(pid = self.pid, "script_stopped");
    }
}

impl Drop for ScriptProcess {
    fn drop(&mut self) {
        // The supervisor owns the child, which is killed on drop.
        if let Some(task) = self.task.take() {
            self.cancel.cancel();
            task.abort();
        }
    }
}

/// Outcome of one supervisor wait.
enum Step {
    /// `stop` was requested.
    Cancelled,
    /// A stdout read completed.
    Read(io::Result<usize>),
    /// The child exited on its own.
    Exited(io::Result<ExitStatus>),
}

/// Forward output until the child exits or a stop is requested.
async fn supervise(
    mut child: Child,
    mut stdout: Option<ChildStdout>,
    ready: Arc<AtomicBool>,
    cancel: CancellationToken,
    observer: Arc<dyn ProcessObserver>,
) {
    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut decoder = Utf8Chunks::default();
    loop {
        // Drain output before noticing the exit, so the last chunks are delivered.
        let step = tokio::select! {
            biased;
            _ = cancel.cancelled() => Step::Cancelled,
            read = read_some(&mut stdout, &mut buf) => Step::Read(read),
            status = child.wait() => Step::Exited(status),
        };
        match step {
            Step::Cancelled => {
                terminate_child(&mut child).await;
                return;
            }
            Step::Read(Ok(0)) => {
                trace!("script_stdout_eof");
                stdout = None;
                forward(&decoder.finish(), &ready, observer.as_ref());
            }
            Step::Read(Ok(n)) => {
                forward(&decoder.push(&buf[..n]), &ready, observer.as_ref());
            }
            Step::Read(Err(e)) => {
                warn!(error = %e, "script_stdout_read_failed");
                stdout = None;
                forward(&decoder.finish(), &ready, observer.as_ref());
            }
            Step::Exited(status) => {
                match &status {
                    Ok(s) => info!(status = %s, "script_exited"),
                    Err(e) => warn!(error = %e, "script_wait_failed"),
                }
                forward(&decoder.finish(), &ready, observer.as_ref());
                observer.on_exit(status);
                return;
            }
        }
    }
}

/// Hand decoded output to the observer, flagging the first chunk.
fn forward(text: &str, ready: &AtomicBool, observer: &dyn ProcessObserver) {
    if text.is_empty() {
        return;
    }
    let first = !ready.swap(true, Ordering::SeqCst);
    observer.on_output(text, first);
}

/// Read from the pipe while it is open; never completes once it is closed.
async fn read_some<R>(stream: &mut Option<R>, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match stream {
        Some(s) => s.read(buf).await,
        None => future::pending().await,
    }
}

/// Relay the child's stderr into the log.
async fn log_stderr(stderr: ChildStderr, pid: Option<u32>) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(pid, line = %line, "script_stderr");
    }
}

#[cfg(unix)]
/// Ask the child to exit with SIGTERM.
fn send_sigterm(child: &Child) {
    if let Some(pid) = child.id() {
        // SAFETY: signalling a pid we spawned and have not yet reaped.
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }
}

#[cfg(not(unix))]
/// No graceful signal off unix; termination goes straight to kill.
fn send_sigterm(_child: &Child) {}

/// Poll for exit until `timeout_ms` elapses.
async fn wait_exit(child: &mut Child, timeout_ms: u64) -> bool {
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_status)) => return true,
            Ok(None) => sleep(Duration::from_millis(TERM_POLL_INTERVAL_MS)).await,
            Err(_) => break,
        }
    }
    false
}

/// SIGTERM, grace period, then SIGKILL; the child is reaped either way.
async fn terminate_child(child: &mut Child) {
    if let Ok(Some(status)) = child.try_wait() {
        debug!(status = %status, "script_already_exited");
        return;
    }
    send_sigterm(child);
    if wait_exit(child, TERM_WAIT_TIMEOUT_MS).await {
        info!("script exited gracefully");
        return;
    }
    warn!("graceful stop timed out; escalating to SIGKILL");
    if let Err(e) = child.kill().await {
        warn!(error = %e, "script_kill_failed");
    }
}

/// Incremental UTF-8 decoding that never splits a multi-byte sequence.
#[derive(Debug, Default)]
struct Utf8Chunks {
    /// Bytes of an incomplete trailing sequence from the previous push.
    pending: Vec<u8>,
}

impl Utf8Chunks {
    /// Decode `bytes`, holding back an incomplete trailing sequence.
    fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let keep = incomplete_tail(&self.pending);
        let tail = self.pending.split_off(self.pending.len() - keep);
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending = tail;
        text
    }

    /// Decode whatever is still held back; nothing more will follow it.
    fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

/// Length of the incomplete sequence ending `bytes`, skipping invalid bytes before it.
fn incomplete_tail(bytes: &[u8]) -> usize {
    let mut rest = bytes;
    loop {
        match str::from_utf8(rest) {
            Ok(_) => return 0,
            Err(e) => match e.error_len() {
                None => return rest.len() - e.valid_up_to(),
                Some(bad) => rest = &rest[e.valid_up_to() + bad..],
            },
        }
    }
}

/// Resolve the script spec for an entry point.
pub fn script_spec(path: &Path, directory: &Path, interpreter: Option<&str>) -> ScriptSpec {
    ScriptSpec {
        path: path.to_path_buf(),
        directory: directory.to_path_buf(),
        interpreter: interpreter.map(str::to_string),
    }
}
