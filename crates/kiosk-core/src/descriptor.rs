//! Resolved targets and their persisted wire form.
//!
//! A [`TargetDescriptor`] is what the classifier produces and what the
//! controller starts. The stored JSON keeps the field names of the older
//! persisted records (`runtime`, `path`, `directory`, `static`), and still
//! accepts the legacy `"js"` runtime name for script targets.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

/// The strategy that executes a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    /// Navigate the display surface directly.
    Webview,
    /// Serve a directory over a local HTTP listener.
    Static,
    /// Spawn a script and point the surface at the port it serves.
    #[serde(alias = "js")]
    Process,
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Webview => "webview",
            Self::Static => "static",
            Self::Process => "process",
        })
    }
}

/// A fully resolved, runnable target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "StoredDescriptor", into = "StoredDescriptor")]
pub enum TargetDescriptor {
    /// A remote address, shown as-is.
    Webview {
        /// Absolute URL.
        url: String,
    },
    /// An HTML entry point served from its directory.
    Static {
        /// Absolute path of the HTML file.
        path: PathBuf,
        /// Directory served as the site root.
        directory: PathBuf,
    },
    /// A script entry point run from its directory.
    Process {
        /// Absolute path of the script.
        path: PathBuf,
        /// Working directory of the child process.
        directory: PathBuf,
    },
}

impl TargetDescriptor {
    /// Build a descriptor for a file, using its parent as the directory.
    pub(crate) fn for_file(runtime: Runtime, path: PathBuf) -> Self {
        let directory = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("/"));
        match runtime {
            Runtime::Webview => Self::Webview {
                url: path.to_string_lossy().into_owned(),
            },
            Runtime::Static => Self::Static { path, directory },
            Runtime::Process => Self::Process { path, directory },
        }
    }

    /// Which strategy runs this target.
    pub fn runtime(&self) -> Runtime {
        match self {
            Self::Webview { .. } => Runtime::Webview,
            Self::Static { .. } => Runtime::Static,
            Self::Process { .. } => Runtime::Process,
        }
    }

    /// The URL or entry-point path, as a display string.
    pub fn path(&self) -> String {
        match self {
            Self::Webview { url } => url.clone(),
            Self::Static { path, .. } | Self::Process { path, .. } => {
                path.to_string_lossy().into_owned()
            }
        }
    }

    /// The served or working directory, for local targets.
    pub fn directory(&self) -> Option<&Path> {
        match self {
            Self::Webview { .. } => None,
            Self::Static { directory, .. } | Self::Process { directory, .. } => Some(directory),
        }
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.runtime(), self.path())
    }
}

/// Flat record layout used in the key-value store.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredDescriptor {
    /// Strategy name.
    runtime: Runtime,
    /// URL or entry-point path.
    path: String,
    /// Root directory for local targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    directory: Option<String>,
    /// Legacy flag mirroring `runtime == static`; ignored when reading.
    #[serde(default, rename = "static")]
    is_static: bool,
}

impl From<TargetDescriptor> for StoredDescriptor {
    fn from(d: TargetDescriptor) -> Self {
        let runtime = d.runtime();
        Self {
            runtime,
            path: d.path(),
            directory: d
                .directory()
                .map(|dir| dir.to_string_lossy().into_owned()),
            is_static: runtime == Runtime::Static,
        }
    }
}

impl TryFrom<StoredDescriptor> for TargetDescriptor {
    type Error = String;

    fn try_from(s: StoredDescriptor) -> Result<Self, Self::Error> {
        if s.path.is_empty() {
            return Err("stored target has an empty path".to_string());
        }
        if s.runtime == Runtime::Webview {
            return Ok(Self::Webview { url: s.path });
        }
        let directory = match s.directory {
            Some(d) if !d.is_empty() => PathBuf::from(d),
            _ => return Err(format!("stored {} target has no directory", s.runtime)),
        };
        let path = PathBuf::from(s.path);
        Ok(match s.runtime {
            Runtime::Static => Self::Static { path, directory },
            _ => Self::Process { path, directory },
        })
    }
}

/// A target saved for automatic relaunch, with the port it was started on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedTarget {
    /// The stored descriptor.
    pub descriptor: TargetDescriptor,
    /// Port used by static and process targets.
    pub port: u16,
}
