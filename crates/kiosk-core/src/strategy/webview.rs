//! Direct navigation: the surface loads the URL itself and nothing is held.

use tracing::info;

use crate::shell::DisplaySurface;

/// Point the surface at `url`.
pub fn start(surface: &dyn DisplaySurface, url: &str) {
    info!(url, "webview_start");
    surface.set_source(url);
}
