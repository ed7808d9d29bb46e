//! Kiosk Core
//!
//! Resolves free-form user input into a runnable target and keeps exactly one
//! target on the display surface at a time:
//! - [`Classifier`] turns text into a [`TargetDescriptor`] (URL, static site, or script)
//! - [`Controller`] starts, replaces and stops targets, releasing the previous
//!   target's listener or child process first
//! - [`Launcher`] drives the controller from the input collector, the persisted
//!   target and the hidden override key gates
//!
//! The hosting shell supplies its display surface, input form, duplex channel
//! and key-value store through the traits in [`shell`] and [`store`].

mod classifier;
mod controller;
mod descriptor;
mod error;
mod launcher;

/// Key chord parsing for the override gates.
pub mod chord;
pub mod config;
pub mod gate;
pub mod shell;
pub mod store;
pub mod strategy;
pub mod test_support;

pub use chord::{Chord, Modifier};
pub use classifier::{
    ClassificationError, Classifier, ClassifyErrorKind, DEFAULT_ENTRY_POINTS, classify,
    expand_tilde, is_absolute_url, is_plausible_path,
};
pub use config::{BindFailurePolicy, Config, ConfigError, DEFAULT_PORT, GateConfig};
pub use controller::{Controller, ControllerEvent, ControllerState};
pub use descriptor::{PersistedTarget, Runtime, TargetDescriptor};
pub use error::{Error, ErrorKind, Result};
pub use gate::OverrideGate;
pub use launcher::{KeyOutcome, Launcher, Submission, parse_port};
pub use shell::{ChannelMessage, DisplaySurface, DuplexChannel, InputCollector, NullChannel};
pub use store::{FileStore, KeyValueStore, MemoryStore, PersistedTargets};
