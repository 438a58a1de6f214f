//! # shellcache service worker
//!
//! The offline caching and update-lifecycle controller of the admin shell.
//!
//! ## Features
//!
//! - **Precache**: best-effort app-shell download on install
//! - **Reaping**: stale cache generations deleted on activation
//! - **Routing**: navigations network-first, static assets stale-while-revalidate,
//!   backend traffic untouched
//! - **Lifecycle**: installing → waiting → active, with `skipWaiting` signalling
//! - **Notifications**: push payload rendering and click-to-focus
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer
//!     └── ServiceWorkerRegistration ──── broadcast ───→ foreground pages
//!             ├── installing / waiting / active (ServiceWorker)
//!             │       └── Controller
//!             │             on_install · on_activate · on_fetch · on_message
//!             └── scope
//!
//! WorkerEnvironment (shared by every controller version)
//!     ├── CacheStorage ── Cache (<namespace>-<version>) ── GET url → CacheEntry
//!     ├── Network
//!     ├── Clients
//!     └── NotificationCenter
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use shellcache_common::ConfigError;
use thiserror::Error;

pub mod cache;
pub mod clients;
pub mod config;
pub mod container;
pub mod controller;
pub mod message;
pub mod notification;
pub mod precache;
pub mod reaper;
pub mod registration;
pub mod router;
pub mod strategy;

pub use cache::{Cache, CacheEntry, CacheStorage};
pub use clients::{Client, ClientMatchOptions, ClientType, Clients};
pub use config::{ControllerConfig, NotificationDefaults};
pub use container::{FileScriptSource, ScriptSource, ServiceWorkerContainer, StaticScriptSource};
pub use controller::{ActivateReport, Controller, FetchDisposition, WorkerEnvironment};
pub use message::{ControlMessage, MessageOutcome};
pub use notification::{ClickOutcome, Notification, NotificationCenter, PushPayload};
pub use precache::{PrecacheFailure, PrecacheOutcome, PrecacheReport};
pub use reaper::ReapReport;
pub use registration::{
    InstallOutcome, RegistrationEvent, ServiceWorker, ServiceWorkerRegistration,
    ServiceWorkerState,
};
pub use router::{PassReason, Route};
pub use strategy::{Revalidation, RevalidationOutcome, StrategyResponse};

// ==================== Errors ====================

/// Errors that can occur in service worker operations.
#[derive(Error, Debug)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Security error: {0}")]
    SecurityError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("No waiting worker to receive the message")]
    NoWaitingWorker,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Errors from the cache store itself.
///
/// These are not expected under normal operation and abort the lifecycle
/// step that triggered them.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Request method {0} cannot be cached")]
    UnsupportedMethod(String),

    #[error("Unreadable entry for {url}: {reason}")]
    InvalidEntry { url: String, reason: String },

    #[error("Cache snapshot I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt cache snapshot: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl CacheError {
    fn invalid_entry(url: &str, reason: impl std::fmt::Display) -> Self {
        Self::InvalidEntry {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

// ==================== Types ====================

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ServiceWorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sw-{}", self.0)
    }
}
