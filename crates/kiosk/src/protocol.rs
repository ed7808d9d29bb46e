//! JSON-lines messages exchanged with the host over stdio.
//!
//! Each line is one JSON object tagged by `type`. Requests arrive on stdin:
//!
//! ```text
//! {"type":"submit","target":"~/site","port":"8080","persist":true}
//! {"type":"key","chord":"shift+`"}
//! {"type":"kill"}
//! ```
//!
//! Events leave on stdout: `source`, `message`, `kill`, `collector` and `error`.

use kiosk_core::{ErrorKind, Submission};
use serde::{Deserialize, Serialize};

/// A port given either as a JSON number or as text.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum PortField {
    /// `"port": 8080`
    Number(u64),
    /// `"port": "8080"`
    Text(String),
}

impl PortField {
    /// The port as the collector would have typed it.
    fn into_text(self) -> String {
        match self {
            Self::Number(n) => n.to_string(),
            Self::Text(s) => s,
        }
    }
}

/// A request from the host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum Request {
    /// The input collector was submitted.
    Submit {
        /// Raw target text.
        target: String,
        /// Port text; absent selects the default.
        #[serde(default)]
        port: Option<PortField>,
        /// Remember the target across restarts; on unless the host opts out.
        #[serde(default = "persist_by_default")]
        persist: bool,
    },
    /// A key chord was pressed on the display surface.
    Key {
        /// Chord spec, e.g. `shift+escape`.
        chord: String,
    },
    /// The host wants the shell to exit.
    Kill,
}

/// Submissions are remembered unless asked otherwise, as with `--no-persist`.
fn persist_by_default() -> bool {
    true
}

impl Request {
    /// Parse one line of input.
    pub fn parse(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

/// Convert a submit request into a launcher submission.
pub fn submission(target: String, port: Option<PortField>, persist: bool) -> Submission {
    Submission {
        raw: target,
        port: port.map(PortField::into_text),
        persist,
    }
}

/// An event for the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Point the display surface at `url`.
    Source {
        /// URL or path to load.
        url: String,
    },
    /// Output from the running script.
    Message {
        /// Raw output chunk.
        data: String,
    },
    /// The shell is quitting.
    Kill,
    /// Show or hide the input collector.
    Collector {
        /// Whether the collector is shown.
        visible: bool,
    },
    /// Show an error in the input collector.
    Error {
        /// Error category.
        kind: ErrorKind,
        /// Display message.
        message: String,
    },
}
