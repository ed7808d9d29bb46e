//! The target controller: owns the active runtime session and the display surface.
//!
//! States move `Idle -> Starting -> Active -> Idle`. Every `start` and `stop`
//! bumps a generation counter; work that completes under an older generation
//! is torn down instead of installed. Transitions are serialized, so the old
//! session is fully released before the next strategy acquires anything.

use std::{
    fmt, io, mem,
    path::Path,
    process::ExitStatus,
    sync::{Arc, Weak},
};

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tracing::{debug, info, warn};

use crate::{
    descriptor::{Runtime, TargetDescriptor},
    error::{Error, Result},
    shell::{ChannelMessage, DisplaySurface, DuplexChannel},
    strategy::{
        ProcessObserver, RuntimeSession, ScriptProcess, StaticServer, process::script_spec,
        webview,
    },
};

/// Where the controller is in a target's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No target is running.
    Idle,
    /// A target is acquiring its resources.
    Starting(Runtime),
    /// The surface is showing a target.
    Active(Runtime),
}

impl ControllerState {
    /// True for `Idle`.
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Starting(r) => write!(f, "starting({r})"),
            Self::Active(r) => write!(f, "active({r})"),
        }
    }
}

/// Failures that happen after `start` has returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    /// The running script exited or could not be waited on.
    ScriptError {
        /// Description of the failure.
        message: String,
    },
}

/// Mutable controller state, guarded by a synchronous lock.
struct Inner {
    /// Current lifecycle state.
    state: ControllerState,
    /// Incremented by every `start` and `stop`.
    generation: u64,
    /// Resources of the current target.
    session: RuntimeSession,
}

/// State shared between the controller handle and process observers.
struct Shared {
    /// Guarded state; never held across an await.
    inner: Mutex<Inner>,
    /// Serializes session release and acquisition.
    transition: AsyncMutex<()>,
    /// The content view.
    surface: Arc<dyn DisplaySurface>,
    /// Outbound shell messages.
    channel: Arc<dyn DuplexChannel>,
    /// Asynchronous failure reports.
    events: mpsc::UnboundedSender<ControllerEvent>,
    /// Interpreter for script targets.
    interpreter: Option<String>,
}

impl Shared {
    /// Mark a failed start as idle, unless a newer request has taken over.
    fn fail(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation == generation {
            inner.state = ControllerState::Idle;
        }
    }
}

/// Handle to the target controller. Clones share the same state.
#[derive(Clone)]
pub struct Controller {
    /// Shared state.
    shared: Arc<Shared>,
}

impl Controller {
    /// Create an idle controller and the receiver for its asynchronous events.
    pub fn new(
        surface: Arc<dyn DisplaySurface>,
        channel: Arc<dyn DuplexChannel>,
        interpreter: Option<String>,
    ) -> (Self, mpsc::UnboundedReceiver<ControllerEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            inner: Mutex::new(Inner {
                state: ControllerState::Idle,
                generation: 0,
                session: RuntimeSession::default(),
            }),
            transition: AsyncMutex::new(()),
            surface,
            channel,
            events,
            interpreter,
        });
        (Self { shared }, rx)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ControllerState {
        self.shared.inner.lock().state
    }

    /// Start `descriptor`, releasing whatever was running first.
    ///
    /// Static targets are `Active` when this returns; script targets become
    /// `Active` on their first output. A failed start leaves the controller
    /// `Idle`. If a newer `start` or `stop` overtakes this one, anything it
    /// acquired is released and [`Error::Superseded`] is returned.
    pub async fn start(&self, descriptor: &TargetDescriptor, port: u16) -> Result<()> {
        let runtime = descriptor.runtime();
        let generation = {
            let mut inner = self.shared.inner.lock();
            inner.generation += 1;
            inner.state = ControllerState::Starting(runtime);
            inner.generation
        };
        info!(descriptor = %descriptor, port, generation, "controller_start");

        let _transition = self.shared.transition.lock().await;
        let previous = {
            let mut inner = self.shared.inner.lock();
            if inner.generation != generation {
                debug!(generation, "controller_start_superseded");
                return Err(Error::Superseded);
            }
            mem::take(&mut inner.session)
        };
        previous.release().await;

        let result = match descriptor {
            TargetDescriptor::Webview { url } => self.start_webview(generation, url),
            TargetDescriptor::Static { directory, .. } => {
                self.start_static(generation, directory, port).await
            }
            TargetDescriptor::Process { path, directory } => {
                self.start_process(generation, path, directory, port).await
            }
        };
        match &result {
            Ok(()) => {}
            Err(Error::Superseded) => debug!(generation, "controller_start_superseded"),
            Err(e) => {
                warn!(generation, error = %e, "controller_start_failed");
                self.shared.fail(generation);
            }
        }
        result
    }

    /// Replace the running target. Identical to [`start`](Self::start).
    pub async fn replace(&self, descriptor: &TargetDescriptor, port: u16) -> Result<()> {
        self.start(descriptor, port).await
    }

    /// Release everything and return to `Idle`. Safe to call repeatedly.
    pub async fn stop(&self) {
        let session = {
            let mut inner = self.shared.inner.lock();
            inner.generation += 1;
            inner.state = ControllerState::Idle;
            mem::take(&mut inner.session)
        };
        if session.is_empty() {
            debug!("controller_stop_noop");
        } else {
            info!("controller_stop");
        }
        let _transition = self.shared.transition.lock().await;
        session.release().await;
    }

    /// Navigate to a remote URL.
    fn start_webview(&self, generation: u64, url: &str) -> Result<()> {
        let mut inner = self.shared.inner.lock();
        if inner.generation != generation {
            return Err(Error::Superseded);
        }
        webview::start(self.shared.surface.as_ref(), url);
        inner.state = ControllerState::Active(Runtime::Webview);
        Ok(())
    }

    /// Bind a static server and show it once the listener is up.
    async fn start_static(&self, generation: u64, directory: &Path, port: u16) -> Result<()> {
        let server = StaticServer::bind(directory, port).await?;
        let stale = {
            let mut inner = self.shared.inner.lock();
            if inner.generation == generation {
                self.shared.surface.set_source(&server.url());
                inner.session.listener = Some(server);
                inner.state = ControllerState::Active(Runtime::Static);
                None
            } else {
                Some(server)
            }
        };
        match stale {
            Some(mut server) => {
                server.close().await;
                Err(Error::Superseded)
            }
            None => Ok(()),
        }
    }

    /// Spawn a script; the surface follows on its first output.
    async fn start_process(
        &self,
        generation: u64,
        path: &Path,
        directory: &Path,
        port: u16,
    ) -> Result<()> {
        let spec = script_spec(path, directory, self.shared.interpreter.as_deref());
        let observer = Arc::new(SessionObserver {
            shared: Arc::downgrade(&self.shared),
            generation,
            url: format!("http://localhost:{port}"),
        });
        let child = ScriptProcess::spawn(&spec, observer)?;
        match self.adopt_process(generation, child) {
            Adoption::Installed => Ok(()),
            Adoption::Superseded(mut child) => {
                child.stop().await;
                Err(Error::Superseded)
            }
            Adoption::Exited(mut child) => {
                // The exit was already reported through the event channel.
                child.stop().await;
                Ok(())
            }
        }
    }

    /// Store a freshly spawned script in the session, unless it must not stay.
    fn adopt_process(&self, generation: u64, child: ScriptProcess) -> Adoption {
        let mut inner = self.shared.inner.lock();
        if inner.generation != generation {
            Adoption::Superseded(child)
        } else if inner.state.is_idle() {
            debug!(generation, "script_exited_before_adoption");
            Adoption::Exited(child)
        } else {
            inner.session.process = Some(child);
            Adoption::Installed
        }
    }
}

/// What became of a spawned script once its start finished.
enum Adoption {
    /// Held by the session.
    Installed,
    /// A newer `start` or `stop` took over.
    Superseded(ScriptProcess),
    /// The script exited before the session could take it.
    Exited(ScriptProcess),
}

/// Connects a supervised script back to the controller that started it.
struct SessionObserver {
    /// The controller; weak so a dropped controller does not stay alive.
    shared: Weak<Shared>,
    /// Generation of the start that spawned the script.
    generation: u64,
    /// Address the surface loads once the script is ready.
    url: String,
}

impl ProcessObserver for SessionObserver {
    fn on_output(&self, chunk: &str, first: bool) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let became_ready = {
            let mut inner = shared.inner.lock();
            if inner.generation != self.generation {
                return;
            }
            let ready = first && inner.state == ControllerState::Starting(Runtime::Process);
            if ready {
                inner.state = ControllerState::Active(Runtime::Process);
            }
            ready
        };
        if became_ready {
            info!(url = %self.url, "script_ready");
            shared.surface.set_source(&self.url);
        }
        shared
            .channel
            .send(ChannelMessage::Message(chunk.to_string()));
    }

    fn on_exit(&self, status: io::Result<ExitStatus>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let session = {
            let mut inner = shared.inner.lock();
            if inner.generation != self.generation {
                return;
            }
            inner.state = ControllerState::Idle;
            mem::take(&mut inner.session)
        };
        // The supervisor calling us is the task `release` waits on.
        tokio::spawn(session.release());
        let message = match status {
            Ok(s) => format!("Script exited ({s})"),
            Err(e) => format!("Script could not be waited on: {e}"),
        };
        warn!(%message, "script_error");
        if shared
            .events
            .send(ControllerEvent::ScriptError { message })
            .is_err()
        {
            debug!("controller_event_dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf, time::Duration};

    use tokio::{task, time::timeout};

    use super::*;
    use crate::{shell::NullChannel, test_support::RecordingSurface};

    /// Reads the controller state from inside `send`.
    #[derive(Default)]
    struct StateProbingChannel {
        controller: Mutex<Option<Controller>>,
        seen: Mutex<Vec<ControllerState>>,
    }

    impl DuplexChannel for StateProbingChannel {
        fn send(&self, _msg: ChannelMessage) {
            let controller = self.controller.lock().clone();
            if let Some(c) = controller {
                self.seen.lock().push(c.state());
            }
        }
    }

    /// Put `c` in the given generation and state, as a start in flight would.
    fn force(c: &Controller, generation: u64, state: ControllerState) {
        let mut inner = c.shared.inner.lock();
        inner.generation = generation;
        inner.state = state;
    }

    #[cfg(unix)]
    fn sleeping_script(dir: &Path) -> ScriptProcess {
        let path = dir.join("index.js");
        fs::write(&path, "sleep 30\n").expect("write script");
        let observer = Arc::new(SessionObserver {
            shared: Weak::new(),
            generation: 0,
            url: String::new(),
        });
        ScriptProcess::spawn(&script_spec(&path, dir, Some("sh")), observer).expect("spawn")
    }

    fn controller() -> (
        Controller,
        Arc<RecordingSurface>,
        mpsc::UnboundedReceiver<ControllerEvent>,
    ) {
        let surface = Arc::new(RecordingSurface::default());
        let (c, rx) = Controller::new(surface.clone(), Arc::new(NullChannel), None);
        (c, surface, rx)
    }

    #[tokio::test]
    async fn webview_goes_active_immediately() {
        let (c, surface, _rx) = controller();
        let d = TargetDescriptor::Webview {
            url: "https://example.com".into(),
        };
        c.start(&d, 3000).await.expect("start");
        assert_eq!(c.state(), ControllerState::Active(Runtime::Webview));
        assert_eq!(surface.sources(), vec!["https://example.com".to_string()]);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let (c, _surface, _rx) = controller();
        c.stop().await;
        c.stop().await;
        assert_eq!(c.state(), ControllerState::Idle);
    }

    #[tokio::test]
    async fn failed_static_start_leaves_idle() {
        let (c, surface, _rx) = controller();
        let d = TargetDescriptor::Static {
            path: PathBuf::from("/no/such/site/index.html"),
            directory: PathBuf::from("/no/such/site"),
        };
        assert!(c.start(&d, 0).await.is_err());
        assert_eq!(c.state(), ControllerState::Idle);
        assert!(surface.sources().is_empty());
    }

    #[tokio::test]
    async fn failed_spawn_leaves_idle() {
        let surface = Arc::new(RecordingSurface::default());
        let (c, _rx) = Controller::new(
            surface,
            Arc::new(NullChannel),
            Some("definitely-not-an-interpreter-kiosk".into()),
        );
        let dir = tempfile::tempdir().expect("tempdir");
        let d = TargetDescriptor::Process {
            path: dir.path().join("index.js"),
            directory: dir.path().to_path_buf(),
        };
        let err = c.start(&d, 3000).await.expect_err("spawn fails");
        assert!(matches!(err, Error::Script(_)));
        assert_eq!(c.state(), ControllerState::Idle);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn script_that_exited_before_adoption_is_not_kept() {
        let (c, _surface, _rx) = controller();
        let dir = tempfile::tempdir().expect("tempdir");

        // `on_exit` already ran for this generation and left the controller idle.
        force(&c, 4, ControllerState::Idle);
        let Adoption::Exited(mut child) = c.adopt_process(4, sleeping_script(dir.path())) else {
            panic!("exited script must be handed back");
        };
        assert!(c.shared.inner.lock().session.is_empty());
        child.stop().await;

        force(&c, 5, ControllerState::Starting(Runtime::Process));
        let Adoption::Superseded(mut child) = c.adopt_process(4, sleeping_script(dir.path()))
        else {
            panic!("older generation must be handed back");
        };
        child.stop().await;

        assert!(matches!(
            c.adopt_process(5, sleeping_script(dir.path())),
            Adoption::Installed
        ));
        assert!(!c.shared.inner.lock().session.is_empty());
        c.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn output_is_forwarded_outside_the_state_lock() {
        let channel = Arc::new(StateProbingChannel::default());
        let (c, _rx) = Controller::new(
            Arc::new(RecordingSurface::default()),
            channel.clone(),
            None,
        );
        *channel.controller.lock() = Some(c.clone());
        force(&c, 1, ControllerState::Starting(Runtime::Process));

        let observer = SessionObserver {
            shared: Arc::downgrade(&c.shared),
            generation: 1,
            url: "http://localhost:3000".into(),
        };
        let forwarded = task::spawn_blocking(move || observer.on_output("hello\n", true));
        timeout(Duration::from_secs(5), forwarded)
            .await
            .expect("send must not wait on the state lock")
            .expect("join");

        assert_eq!(
            channel.seen.lock().clone(),
            vec![ControllerState::Active(Runtime::Process)]
        );
        // Break the controller <-> channel cycle.
        *channel.controller.lock() = None;
    }

    #[test]
    fn state_display() {
        assert_eq!(ControllerState::Idle.to_string(), "idle");
        assert_eq!(
            ControllerState::Starting(Runtime::Process).to_string(),
            "starting(process)"
        );
    }
}
