//! Admin console frontend, mounted behind the API routes.

use std::path::Path;

use axum::Router;
use axum_reverse_proxy::ReverseProxy;
use tower_http::services::{ServeDir, ServeFile};

use crate::config::FrontendMode;

/// Attach the admin console to a router that already has its state applied.
///
/// API and socket routes always win; anything they do not match goes to the console.
pub fn mount_admin_console(api: Router, mode: &FrontendMode) -> Router {
    match mode {
        FrontendMode::Proxy { target } => {
            tracing::info!(target = %target, "Admin console: proxying to dev server");
            let dev_server: Router = ReverseProxy::new("/", target).into();
            api.merge(dev_server)
        }
        FrontendMode::Static { dir } => {
            let root = Path::new(dir);
            if !root.join("index.html").exists() {
                tracing::warn!(dir = %dir, "Admin console build has no index.html");
            }
            tracing::info!(dir = %dir, "Admin console: serving static build");
            // Client-side routes resolve to the SPA entry point
            let spa = ServeDir::new(root).fallback(ServeFile::new(root.join("index.html")));
            api.fallback_service(spa)
        }
        FrontendMode::Disabled => {
            tracing::info!("Admin console: not served, API only");
            api
        }
    }
}
