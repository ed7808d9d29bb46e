//! Execution strategies and the resources a running target holds.

pub mod process;
pub mod static_server;
pub mod webview;

use tracing::debug;

pub use self::{
    process::{ProcessObserver, ScriptProcess, ScriptSpec},
    static_server::StaticServer,
};

/// Resources owned by the active target.
///
/// Webview targets hold nothing; static targets hold a listener; process
/// targets hold a supervised child.
#[derive(Default)]
pub struct RuntimeSession {
    /// Bound static file server.
    pub listener: Option<StaticServer>,
    /// Supervised script.
    pub process: Option<ScriptProcess>,
}

impl RuntimeSession {
    /// True when nothing is held.
    pub fn is_empty(&self) -> bool {
        self.listener.is_none() && self.process.is_none()
    }

    /// Close the listener and stop the child, waiting for both.
    pub async fn release(mut self) {
        if let Some(mut server) = self.listener.take() {
            debug!(port = server.port(), "session_release_listener");
            server.close().await;
        }
        if let Some(mut child) = self.process.take() {
            debug!(pid = child.pid(), "session_release_process");
            child.stop().await;
        }
    }
}
