//! Capabilities supplied by the hosting shell.
//!
//! The core never touches a window, a form or an IPC transport directly. The
//! shell hands it implementations of these traits instead.

use tracing::debug;

use crate::error::ErrorKind;

/// The single view whose content source the controller sets.
pub trait DisplaySurface: Send + Sync {
    /// Point the surface at a URL or path.
    fn set_source(&self, source: &str);
}

/// The user-facing form that collects a target.
pub trait InputCollector: Send + Sync {
    /// Reveal the collector.
    fn show(&self);
    /// Hide the collector.
    fn hide(&self);
    /// Show an error message without closing the collector.
    fn display_error(&self, kind: ErrorKind, message: &str);
}

/// Messages sent from the controller side to the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    /// A chunk of output from a running script.
    Message(String),
    /// Ask the shell to quit.
    Kill,
}

impl ChannelMessage {
    /// Wire name of the message.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Kill => "kill",
        }
    }
}

/// Outbound half of the shell duplex channel.
///
/// Inbound `kill` requests are delivered by the shell calling
/// [`crate::Launcher::shutdown`].
pub trait DuplexChannel: Send + Sync {
    /// Deliver a message to the shell.
    fn send(&self, msg: ChannelMessage);
}

/// Channel used when no shell is listening; messages are only logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullChannel;

impl DuplexChannel for NullChannel {
    fn send(&self, msg: ChannelMessage) {
        debug!(name = msg.name(), ?msg, "null_channel_send");
    }
}
