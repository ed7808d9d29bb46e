//! Shell capabilities backed by JSON lines on an output stream.
//!
//! One [`StdioShell`] plays the display surface, the input collector and the
//! duplex channel at once; every call becomes one [`Event`] line.

use std::io::{self, Write};

use kiosk_core::{ChannelMessage, DisplaySurface, DuplexChannel, ErrorKind, InputCollector};
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::protocol::Event;

/// Writes events as JSON lines.
pub struct StdioShell {
    /// Destination stream, flushed after every line.
    out: Mutex<Box<dyn Write + Send>>,
}

impl StdioShell {
    /// Emit events on the process's stdout.
    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    /// Emit events on `out`.
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Write one event line.
    pub fn emit(&self, event: &Event) {
        let line = match serde_json::to_string(event) {
            Ok(l) => l,
            Err(e) => {
                warn!(error = %e, "event_encode_failed");
                return;
            }
        };
        trace!(%line, "emit");
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{line}").and_then(|()| out.flush()) {
            warn!(error = %e, "event_write_failed");
        }
    }
}

impl DisplaySurface for StdioShell {
    fn set_source(&self, source: &str) {
        self.emit(&Event::Source {
            url: source.to_string(),
        });
    }
}

impl InputCollector for StdioShell {
    fn show(&self) {
        self.emit(&Event::Collector { visible: true });
    }

    fn hide(&self) {
        self.emit(&Event::Collector { visible: false });
    }

    fn display_error(&self, kind: ErrorKind, message: &str) {
        self.emit(&Event::Error {
            kind,
            message: message.to_string(),
        });
    }
}

impl DuplexChannel for StdioShell {
    fn send(&self, msg: ChannelMessage) {
        match msg {
            ChannelMessage::Message(data) => self.emit(&Event::Message { data }),
            ChannelMessage::Kill => self.emit(&Event::Kill),
        }
    }
}
