//! The shell event loop: stdin requests and controller events in, launcher calls out.

use kiosk_core::{Chord, ControllerEvent, KeyOutcome, Launcher, Result, Submission};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt},
    signal,
    sync::mpsc::UnboundedReceiver,
};
use tracing::{debug, info, warn};

use crate::protocol::{Request, submission};

/// Why the loop should keep going or stop.
enum Flow {
    /// Keep reading.
    Continue,
    /// Tear down and exit.
    Exit,
}

/// Run the shell until a kill request, the quit gate, EOF or Ctrl-C.
///
/// `initial` is submitted first when present; otherwise the persisted target
/// launches. The running target is always torn down before returning.
pub async fn run<R>(
    launcher: &Launcher,
    mut events: UnboundedReceiver<ControllerEvent>,
    input: R,
    initial: Option<Submission>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let result = drive(launcher, &mut events, input, initial).await;
    launcher.shutdown().await;
    result
}

/// The loop proper; errors are only fatal bind failures.
async fn drive<R>(
    launcher: &Launcher,
    events: &mut UnboundedReceiver<ControllerEvent>,
    input: R,
    initial: Option<Submission>,
) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    match initial {
        Some(sub) => launcher.submit(sub).await?,
        None => launcher.init().await?,
    }

    let mut lines = input.lines();
    let mut events_open = true;
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if let Flow::Exit = handle_line(launcher, &line).await? {
                        return Ok(());
                    }
                }
                Ok(None) => {
                    info!("stdin_closed");
                    return Ok(());
                }
                Err(e) => {
                    warn!(error = %e, "stdin_read_failed");
                    return Ok(());
                }
            },
            event = events.recv(), if events_open => match event {
                Some(event) => launcher.on_event(event),
                None => events_open = false,
            },
            _ = signal::ctrl_c() => {
                info!("interrupted");
                return Ok(());
            }
        }
    }
}

/// Dispatch one request line.
async fn handle_line(launcher: &Launcher, line: &str) -> Result<Flow> {
    if line.trim().is_empty() {
        return Ok(Flow::Continue);
    }
    let request = match Request::parse(line) {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, %line, "bad_request");
            return Ok(Flow::Continue);
        }
    };
    debug!(?request, "request");
    match request {
        Request::Submit {
            target,
            port,
            persist,
        } => {
            launcher.submit(submission(target, port, persist)).await?;
            Ok(Flow::Continue)
        }
        Request::Key { chord } => {
            let Some(chord) = Chord::parse(&chord) else {
                warn!(%chord, "bad_chord");
                return Ok(Flow::Continue);
            };
            match launcher.on_key(&chord).await {
                KeyOutcome::Quit => Ok(Flow::Exit),
                _ => Ok(Flow::Continue),
            }
        }
        Request::Kill => {
            info!("kill_requested");
            Ok(Flow::Exit)
        }
    }
}
