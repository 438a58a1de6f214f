//! # shellcache update prompt
//!
//! Foreground side of the update flow: registers the controller script when
//! a page loads, shows an update banner when a new version is waiting, and
//! reloads the page exactly once when the new version takes control.
//!
//! ```text
//! page load ── register_and_attach ──→ UpdatePromptClient ←── RegistrationEvent
//!                                         │  accept: post {action: skipWaiting}
//!                                         └─ ControllerChange: reload (once)
//! ```

use std::sync::Arc;

use shellcache_sw::{RegistrationEvent, ServiceWorkerContainer, ServiceWorkerError};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{info, warn};
use url::Url;

pub mod host;
pub mod prompt;

pub use host::{PageHost, UpdateBanner};
pub use prompt::{UpdatePromptClient, UpdatePromptState};

/// Relative path of the controller script, resolved against the page URL.
pub const SCRIPT_PATH: &str = "./sw.js";

/// Errors from the update prompt.
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Invalid script URL: {0}")]
    InvalidScriptUrl(#[from] url::ParseError),

    #[error("Registration failed: {0}")]
    Registration(#[from] ServiceWorkerError),
}

/// Register the controller for a freshly loaded page and attach the prompt.
pub async fn register_and_attach(
    container: &ServiceWorkerContainer,
    script_path: &str,
    page_url: &Url,
    host: Arc<dyn PageHost>,
) -> Result<(Arc<UpdatePromptClient>, broadcast::Receiver<RegistrationEvent>), UpdateError> {
    let script_url = page_url.join(script_path)?;

    let registration = match container.register(&script_url).await {
        Ok(registration) => registration,
        Err(e) => {
            warn!(script = %script_url, error = %e, "Service worker registration failed");
            return Err(e.into());
        }
    };
    info!(scope = %registration.scope(), "Service worker registered");

    Ok(UpdatePromptClient::attach(registration, host).await)
}
