//! Turn free-form user input into a [`TargetDescriptor`].
//!
//! Input is tried as an absolute URL first, then as a filesystem path. URLs are
//! never checked against the filesystem. Paths have a leading `~` expanded,
//! are made absolute, and are resolved to an entry point when they name a
//! directory. The only filesystem access is read-only metadata and listing.

use std::{
    collections::HashSet,
    ffi::OsStr,
    fs,
    path::{self, Path, PathBuf},
};

use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
    descriptor::{Runtime, TargetDescriptor},
    error::ErrorKind,
};

/// Entry points searched for in a directory, highest priority first.
pub const DEFAULT_ENTRY_POINTS: &[&str] = &["index.html", "index.js"];

/// Characters that never appear in a path we are willing to resolve.
const INVALID_PATH_CHARS: &[char] = &['<', '>', '"', '|', '?', '*'];

/// Why classification failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyErrorKind {
    /// The input was blank.
    EmptyInput,
    /// Neither a URL nor a plausible path.
    UnrecognizedInput,
    /// The expanded path does not exist.
    PathNotFound,
    /// The directory contains no known entry point.
    NoEntryPoint,
    /// The file extension maps to no strategy.
    UnsupportedExtension,
}

impl From<ClassifyErrorKind> for ErrorKind {
    fn from(kind: ClassifyErrorKind) -> Self {
        match kind {
            ClassifyErrorKind::EmptyInput => Self::EmptyInput,
            ClassifyErrorKind::UnrecognizedInput => Self::UnrecognizedInput,
            ClassifyErrorKind::PathNotFound => Self::PathNotFound,
            ClassifyErrorKind::NoEntryPoint => Self::NoEntryPoint,
            ClassifyErrorKind::UnsupportedExtension => Self::UnsupportedExtension,
        }
    }
}

/// A failed classification. Never a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ClassificationError {
    /// Failure category.
    pub kind: ClassifyErrorKind,
    /// Message suitable for display to the user.
    pub message: String,
}

impl ClassificationError {
    /// Construct an error of `kind` with a display message.
    fn new(kind: ClassifyErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Classifies raw input against a home directory and an entry-point list.
#[derive(Debug, Clone)]
pub struct Classifier {
    /// Home directory used for `~` expansion, when known.
    home: Option<PathBuf>,
    /// Entry-point file names in priority order.
    entry_points: Vec<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier {
    /// A classifier using the current user's home and the default entry points.
    pub fn new() -> Self {
        Self {
            home: home::home_dir(),
            entry_points: DEFAULT_ENTRY_POINTS.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Override the home directory used for `~` expansion.
    pub fn with_home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Override the entry-point search list.
    pub fn with_entry_points<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entry_points = names.into_iter().map(Into::into).collect();
        self
    }

    /// Resolve `raw` to a descriptor.
    pub fn classify(&self, raw: &str) -> Result<TargetDescriptor, ClassificationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ClassificationError::new(
                ClassifyErrorKind::EmptyInput,
                "No URL or path given",
            ));
        }
        if is_absolute_url(raw) {
            return Ok(TargetDescriptor::Webview {
                url: raw.to_string(),
            });
        }
        if !is_plausible_path(raw) {
            return Err(ClassificationError::new(
                ClassifyErrorKind::UnrecognizedInput,
                format!("'{raw}' is neither a URL nor a path"),
            ));
        }

        let expanded = match &self.home {
            Some(home) => expand_tilde(raw, home),
            None => raw.to_string(),
        };
        let full = path::absolute(&expanded).unwrap_or_else(|_| PathBuf::from(&expanded));
        debug!(input = raw, resolved = %full.display(), "classify_path");

        let meta = fs::metadata(&full).map_err(|_| {
            ClassificationError::new(
                ClassifyErrorKind::PathNotFound,
                format!("{} does not exist", full.display()),
            )
        })?;
        if meta.is_dir() {
            let entry = self.find_entry_point(&full)?;
            return classify_file(entry);
        }
        classify_file(full)
    }

    /// Find the highest-priority entry point inside `dir`.
    ///
    /// Names are compared literally against the directory listing, so an
    /// unrelated file never stands in for a missing entry point.
    fn find_entry_point(&self, dir: &Path) -> Result<PathBuf, ClassificationError> {
        let listing = fs::read_dir(dir).map_err(|e| {
            ClassificationError::new(
                ClassifyErrorKind::PathNotFound,
                format!("cannot read {}: {e}", dir.display()),
            )
        })?;
        let files: HashSet<String> = listing
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| !t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect();

        self.entry_points
            .iter()
            .find(|name| files.contains(name.as_str()))
            .map(|name| dir.join(name))
            .ok_or_else(|| {
                ClassificationError::new(
                    ClassifyErrorKind::NoEntryPoint,
                    format!(
                        "{} has no entry point (looked for {})",
                        dir.display(),
                        self.entry_points.join(", ")
                    ),
                )
            })
    }
}

/// Classify with the default [`Classifier`].
pub fn classify(raw: &str) -> Result<TargetDescriptor, ClassificationError> {
    Classifier::new().classify(raw)
}

/// Dispatch a file on its extension.
fn classify_file(file: PathBuf) -> Result<TargetDescriptor, ClassificationError> {
    let runtime = match file.extension().and_then(OsStr::to_str) {
        Some("html") => Runtime::Static,
        Some("js") => Runtime::Process,
        _ => {
            return Err(ClassificationError::new(
                ClassifyErrorKind::UnsupportedExtension,
                format!("Unsupported file {}", file.display()),
            ));
        }
    };
    Ok(TargetDescriptor::for_file(runtime, file))
}

/// True for an absolute URL with both a scheme and a non-empty host.
pub fn is_absolute_url(s: &str) -> bool {
    Url::parse(s)
        .map(|u| u.host_str().is_some_and(|h| !h.is_empty()))
        .unwrap_or(false)
}

/// True when `s` could name a file: no control characters, no shell-special
/// characters, and no colon except a drive-letter prefix.
pub fn is_plausible_path(s: &str) -> bool {
    if s.chars().any(|c| c.is_control() || INVALID_PATH_CHARS.contains(&c)) {
        return false;
    }
    let rest = match s.as_bytes() {
        [drive, b':', ..] if drive.is_ascii_alphabetic() => &s[2..],
        _ => s,
    };
    !rest.contains(':')
}

/// Replace a leading `~` with `home`.
///
/// This is plain concatenation of the home directory and the remainder, so an
/// already expanded path is returned unchanged.
pub fn expand_tilde(raw: &str, home: &Path) -> String {
    match raw.strip_prefix('~') {
        Some(rest) => format!("{}{}", home.display(), rest),
        None => raw.to_string(),
    }
}
