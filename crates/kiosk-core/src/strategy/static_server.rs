//! Local HTTP listener serving a directory of static files.
//!
//! Requests map onto files under the root. `/` and directory paths resolve to
//! `index.html`; a directory requested without its trailing slash is redirected
//! to it first, so relative links in the page resolve inside the directory.
//! Paths that escape the root (via `..` or a symlink) are refused.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    path::{Component, Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use tokio::{fs, net::TcpListener, sync::oneshot, task::JoinHandle, time};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};

/// How long a graceful shutdown may take before the server task is aborted.
const SHUTDOWN_WAIT_MS: u64 = 300;

/// File served for `/` and for directory requests.
const INDEX_FILE: &str = "index.html";

/// A bound, running static file server.
pub struct StaticServer {
    /// Address the listener is bound to.
    addr: SocketAddr,
    /// Triggers graceful shutdown; `None` once closed.
    shutdown: Option<oneshot::Sender<()>>,
    /// The serving task; `None` once closed.
    task: Option<JoinHandle<()>>,
}

impl StaticServer {
    /// Bind the IPv4 loopback on `port` and start serving `root`.
    ///
    /// Returns only once the listener is bound, so callers can treat success as
    /// readiness. Port 0 picks a free port; see [`port`](Self::port).
    pub async fn bind(root: &Path, port: u16) -> Result<Self> {
        let root = fs::canonicalize(root).await.map_err(Error::Io)?;
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
            .await
            .map_err(|source| Error::Bind { port, source })?;
        let addr = listener
            .local_addr()
            .map_err(|source| Error::Bind { port, source })?;
        info!(%addr, root = %root.display(), "static_server_bound");

        let app = Router::new()
            .fallback(serve_file)
            .with_state(Arc::new(root));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ignored = shutdown_rx.await;
            });
            if let Err(e) = server.await {
                warn!(error = %e, "static_server_failed");
            }
            trace!(%addr, "static_server_task_exit");
        });

        Ok(Self {
            addr,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Port the listener is bound to.
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// URL the display surface should load.
    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port())
    }

    /// True until [`close`](Self::close) has run.
    pub fn is_open(&self) -> bool {
        self.task.is_some()
    }

    /// Stop serving and release the port. Safe to call repeatedly.
    pub async fn close(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ignored = tx.send(());
        }
        let Some(mut task) = self.task.take() else {
            return;
        };
        // Idle keep-alive connections can hold a graceful shutdown open.
        if time::timeout(Duration::from_millis(SHUTDOWN_WAIT_MS), &mut task)
            .await
            .is_err()
        {
            debug!(addr = %self.addr, "static_server_abort");
            task.abort();
            let _ignored = task.await;
        }
        info!(addr = %self.addr, "static_server_closed");
    }
}

impl Drop for StaticServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Fallback handler: map the request path to a file under the root.
async fn serve_file(State(root): State<Arc<PathBuf>>, method: Method, uri: Uri) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed").into_response();
    }
    let Some(mut file) = safe_join(&root, uri.path()) else {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    };
    if fs::metadata(&file).await.is_ok_and(|m| m.is_dir()) {
        if !uri.path().ends_with('/') {
            return redirect_to_directory(&uri);
        }
        file = file.join(INDEX_FILE);
    }

    // Canonical path must remain within root, so symlinks cannot escape it.
    let canonical = match fs::canonicalize(&file).await {
        Ok(p) => p,
        Err(_) => return (StatusCode::NOT_FOUND, "Not found").into_response(),
    };
    if !canonical.starts_with(root.as_path()) {
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }

    match fs::read(&canonical).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&canonical).first_or_octet_stream();
            trace!(path = %canonical.display(), len = bytes.len(), "static_serve");
            (
                [
                    (header::CONTENT_TYPE, mime.essence_str().to_string()),
                    (header::CACHE_CONTROL, "no-store".to_string()),
                ],
                Body::from(bytes),
            )
                .into_response()
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "Not found").into_response()
        }
        Err(e) => {
            warn!(path = %canonical.display(), error = %e, "static_read_failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read file").into_response()
        }
    }
}

/// `301` to the same path with a trailing slash, keeping the query.
fn redirect_to_directory(uri: &Uri) -> Response {
    let location = match uri.query() {
        Some(q) => format!("{}/?{q}", uri.path()),
        None => format!("{}/", uri.path()),
    };
    trace!(%location, "static_redirect");
    (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
}

/// Join a percent-encoded request path onto `root`, rejecting traversal.
fn safe_join(root: &Path, request_path: &str) -> Option<PathBuf> {
    let decoded = percent_decode(request_path)?;
    let mut out = root.to_path_buf();
    for component in Path::new(decoded.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(out)
}

/// Decode `%XX` escapes; malformed escapes are kept literally.
fn percent_decode(input: &str) -> Option<String> {
    /// Value of one hex digit.
    fn hex_val(b: u8) -> Option<u8> {
        match b {
            b'0'..=b'9' => Some(b - b'0'),
            b'a'..=b'f' => Some(b - b'a' + 10),
            b'A'..=b'F' => Some(b - b'A' + 10),
            _ => None,
        }
    }

    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (hex_val(bytes[i + 1]), hex_val(bytes[i + 2]))
        {
            out.push((hi << 4) | lo);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).ok()
}
