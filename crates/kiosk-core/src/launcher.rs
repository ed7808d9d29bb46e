//! The launcher ties the input collector, the persisted target and the hidden
//! key gates to the [`Controller`].

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    chord::Chord,
    classifier::Classifier,
    config::{BindFailurePolicy, Config, ConfigError},
    controller::{Controller, ControllerEvent},
    descriptor::{PersistedTarget, TargetDescriptor},
    error::{Error, ErrorKind, Result},
    gate::OverrideGate,
    shell::{ChannelMessage, DisplaySurface, DuplexChannel, InputCollector},
    store::{KeyValueStore, PersistedTargets},
};

/// A target entered into the input collector.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Submission {
    /// Free-form target text.
    pub raw: String,
    /// Port text; empty or absent selects the configured default.
    pub port: Option<String>,
    /// Remember the target for the next launch.
    pub persist: bool,
}

impl Submission {
    /// A submission of `raw` on the default port.
    pub fn new(raw: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            ..Self::default()
        }
    }

    /// Set the port text.
    pub fn with_port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Set the persist flag.
    pub fn persisted(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }
}

/// Parse the port field of a submission.
pub fn parse_port(text: Option<&str>, default: u16) -> Result<u16> {
    match text.map(str::trim) {
        None | Some("") => Ok(default),
        Some(t) => match t.parse::<u16>() {
            Ok(0) | Err(_) => Err(Error::InvalidPort(t.to_string())),
            Ok(p) => Ok(p),
        },
    }
}

/// What a key press did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    /// Not a gated chord, or the collector is already visible.
    Ignored,
    /// Counted toward a gate that has not fired yet.
    Counted,
    /// The show gate fired; the collector is visible.
    ShowCollector,
    /// The quit gate fired; the session is torn down and the shell should exit.
    Quit,
}

/// A gate and the chord that drives it.
#[derive(Debug, Clone)]
struct GatedChord {
    /// Chord counted by the gate.
    chord: Chord,
    /// Press counter.
    gate: OverrideGate,
}

impl GatedChord {
    /// Build from a chord spec, rejecting unparseable ones.
    fn new(spec: &str, config: &Config) -> Result<Self> {
        let chord = Chord::parse(spec).ok_or_else(|| ConfigError::Invalid {
            message: format!("invalid chord '{spec}'"),
        })?;
        Ok(Self {
            chord,
            gate: OverrideGate::from_config(&config.gate),
        })
    }
}

/// Drives the controller from user input and the persisted target.
pub struct Launcher {
    /// The target controller.
    controller: Controller,
    /// The input form.
    collector: Arc<dyn InputCollector>,
    /// Outbound shell messages.
    channel: Arc<dyn DuplexChannel>,
    /// Persisted target access.
    targets: PersistedTargets,
    /// Resolves submitted text.
    classifier: Classifier,
    /// Active configuration.
    config: Config,
    /// Gate revealing the collector.
    show: GatedChord,
    /// Gate quitting the shell.
    quit: GatedChord,
    /// Whether the collector is currently shown.
    collector_visible: AtomicBool,
}

impl Launcher {
    /// Build a launcher and the receiver for controller events.
    ///
    /// Feed every received event to [`on_event`](Self::on_event).
    pub fn new(
        config: Config,
        surface: Arc<dyn DisplaySurface>,
        collector: Arc<dyn InputCollector>,
        channel: Arc<dyn DuplexChannel>,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ControllerEvent>)> {
        let show = GatedChord::new(&config.gate.show, &config)?;
        let quit = GatedChord::new(&config.gate.quit, &config)?;
        let (controller, events) =
            Controller::new(surface, channel.clone(), config.interpreter.clone());
        let classifier = Classifier::new().with_entry_points(config.entry_points.iter().cloned());
        let launcher = Self {
            controller,
            collector,
            channel,
            targets: PersistedTargets::new(store),
            classifier,
            config,
            show,
            quit,
            collector_visible: AtomicBool::new(false),
        };
        Ok((launcher, events))
    }

    /// Replace the classifier, e.g. to pin the home directory in tests.
    pub fn with_classifier(mut self, classifier: Classifier) -> Self {
        self.classifier = classifier;
        self
    }

    /// The controller driven by this launcher.
    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Whether the collector is currently shown.
    pub fn is_collector_visible(&self) -> bool {
        self.collector_visible.load(Ordering::SeqCst)
    }

    /// Launch the persisted target, or show the collector when there is none.
    pub async fn init(&self) -> Result<()> {
        let persisted = match self.targets.load(self.config.port) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "persisted_target_unreadable");
                None
            }
        };
        match persisted {
            Some(PersistedTarget { descriptor, port }) => {
                info!(descriptor = %descriptor, port, "persisted_launch");
                self.launch(&descriptor, port).await
            }
            None => {
                debug!("no_persisted_target");
                self.show_collector();
                Ok(())
            }
        }
    }

    /// Handle a submission from the collector.
    ///
    /// Input problems are displayed and leave the running target alone.
    /// Only a bind failure under [`BindFailurePolicy::Fatal`] is returned.
    pub async fn submit(&self, submission: Submission) -> Result<()> {
        let port = match parse_port(submission.port.as_deref(), self.config.port) {
            Ok(p) => p,
            Err(e) => {
                self.display(&e);
                return Ok(());
            }
        };
        let descriptor = match self.classifier.classify(&submission.raw) {
            Ok(d) => d,
            Err(e) => {
                debug!(kind = %ErrorKind::from(e.kind), "submission_rejected");
                self.display(&Error::from(e));
                return Ok(());
            }
        };
        info!(descriptor = %descriptor, port, persist = submission.persist, "submission_accepted");

        let stored = if submission.persist {
            self.targets.save(&PersistedTarget {
                descriptor: descriptor.clone(),
                port,
            })
        } else {
            self.targets.clear(self.config.port)
        };
        if let Err(e) = stored {
            warn!(error = %e, "persisted_target_write_failed");
            self.display(&Error::Store(e.to_string()));
        }

        self.launch(&descriptor, port).await
    }

    /// Start a target and update the collector from the outcome.
    async fn launch(&self, descriptor: &TargetDescriptor, port: u16) -> Result<()> {
        match self.controller.replace(descriptor, port).await {
            Ok(()) => {
                if !self.controller.state().is_idle() {
                    self.hide_collector();
                }
                Ok(())
            }
            Err(Error::Superseded) => Ok(()),
            Err(e @ Error::Bind { .. }) if self.config.bind_failure == BindFailurePolicy::Fatal => {
                Err(e)
            }
            Err(e) => {
                self.display(&e);
                self.show_collector();
                Ok(())
            }
        }
    }

    /// Route a key chord through the hidden gates.
    pub async fn on_key(&self, chord: &Chord) -> KeyOutcome {
        if self.is_collector_visible() {
            return KeyOutcome::Ignored;
        }
        if *chord == self.show.chord {
            if !self.show.gate.press() {
                return KeyOutcome::Counted;
            }
            info!("override_show");
            self.show_collector();
            return KeyOutcome::ShowCollector;
        }
        if *chord == self.quit.chord {
            if !self.quit.gate.press() {
                return KeyOutcome::Counted;
            }
            info!("override_quit");
            self.channel.send(ChannelMessage::Kill);
            self.controller.stop().await;
            return KeyOutcome::Quit;
        }
        KeyOutcome::Ignored
    }

    /// Handle an asynchronous controller failure.
    pub fn on_event(&self, event: ControllerEvent) {
        match event {
            ControllerEvent::ScriptError { message } => {
                self.collector
                    .display_error(ErrorKind::ScriptError, &message);
                self.show_collector();
            }
        }
    }

    /// Tear down the running target. Called when the shell is told to quit.
    pub async fn shutdown(&self) {
        info!("launcher_shutdown");
        self.controller.stop().await;
    }

    /// Forget the persisted target.
    pub fn forget(&self) -> Result<()> {
        self.targets.clear(self.config.port)
    }

    /// Report an error through the collector.
    fn display(&self, e: &Error) {
        self.collector.display_error(e.kind(), &e.to_string());
    }

    /// Reveal the collector and reset the gates.
    fn show_collector(&self) {
        self.show.gate.reset();
        self.quit.gate.reset();
        self.collector_visible.store(true, Ordering::SeqCst);
        self.collector.show();
    }

    /// Hide the collector.
    fn hide_collector(&self) {
        self.collector_visible.store(false, Ordering::SeqCst);
        self.collector.hide();
    }
}
