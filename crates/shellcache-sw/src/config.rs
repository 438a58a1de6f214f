//! Controller configuration.
//!
//! Everything a deployed controller script would otherwise carry as
//! module-level constants: version tag, precache manifest, exclusions.

use serde::{Deserialize, Serialize};
use shellcache_common::ConfigError;
use shellcache_net::ExclusionRules;
use url::Url;

/// Immutable configuration of one controller version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Cache namespace shared by every version of this app.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Version tag. Bump to force a fresh cache generation.
    #[serde(default = "default_version")]
    pub version: String,

    /// Registration scope. Manifest paths resolve against it.
    pub scope: Url,

    /// App-shell paths fetched on install.
    #[serde(default = "default_precache")]
    pub precache: Vec<String>,

    /// Document served to navigations when both network and cache miss.
    #[serde(default = "default_offline_fallback")]
    pub offline_fallback: String,

    /// Traffic that bypasses the controller.
    #[serde(default)]
    pub exclusions: ExclusionRules,

    /// Skip the waiting phase as soon as install finishes.
    #[serde(default = "default_true")]
    pub skip_waiting_on_install: bool,

    /// Fallbacks for push notifications.
    #[serde(default)]
    pub notifications: NotificationDefaults,
}

/// Notification fallbacks used when a push payload leaves fields out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationDefaults {
    pub title: String,
    pub body: String,
    pub url: String,
    pub icon: String,
    pub badge: String,
}

impl Default for NotificationDefaults {
    fn default() -> Self {
        Self {
            title: "You're So Golden".to_string(),
            body: "You have a new notification".to_string(),
            url: "./index.html".to_string(),
            icon: "./icon-192.png".to_string(),
            badge: "./icon-192.png".to_string(),
        }
    }
}

fn default_namespace() -> String {
    "admin-cache".to_string()
}

fn default_version() -> String {
    "v2".to_string()
}

fn default_offline_fallback() -> String {
    "./index.html".to_string()
}

fn default_true() -> bool {
    true
}

fn default_precache() -> Vec<String> {
    [
        "./",
        "./index.html",
        "./login.html",
        "./styles.css",
        "./admin-auth.js",
        "./dashboard.js",
        "./notifications.js",
        "./products.html",
        "./products.js",
        "./orders.html",
        "./orders.js",
        "./settings.html",
        "./analytics.html",
        "./analytics.js",
        "./site-design.html",
        "./marquee-manager.js",
        "./welcome-modal.js",
        "./update-popup.js",
        "./manifest.webmanifest",
        "./icon-192.png",
        "./icon-512.png",
        "./apple-touch-icon.png",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl ControllerConfig {
    /// Default configuration for a scope.
    pub fn new(scope: Url) -> Self {
        Self {
            namespace: default_namespace(),
            version: default_version(),
            scope,
            precache: default_precache(),
            offline_fallback: default_offline_fallback(),
            exclusions: ExclusionRules::default(),
            skip_waiting_on_install: true,
            notifications: NotificationDefaults::default(),
        }
    }

    /// Set the version tag.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    /// Replace the precache manifest.
    pub fn with_precache<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.precache = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_skip_waiting_on_install(mut self, skip: bool) -> Self {
        self.skip_waiting_on_install = skip;
        self
    }

    /// Name of this version's cache generation: `<namespace>-<version>`.
    pub fn cache_name(&self) -> String {
        format!("{}-{}", self.namespace, self.version)
    }

    /// Prefix shared by every generation in the namespace.
    pub fn generation_prefix(&self) -> String {
        format!("{}-", self.namespace)
    }

    /// Resolve a path against the scope.
    pub fn resolve(&self, path: &str) -> Result<Url, ConfigError> {
        self.scope
            .join(path)
            .map_err(|e| ConfigError::invalid(format!("cannot resolve {path:?}: {e}")))
    }

    /// Whether `url` lies inside the scope.
    pub fn in_scope(&self, url: &Url) -> bool {
        url.as_str().starts_with(self.scope.as_str())
    }

    /// Manifest resolved to absolute URLs, in manifest order.
    pub fn precache_urls(&self) -> Result<Vec<Url>, ConfigError> {
        self.precache
            .iter()
            .map(|path| self.resolve_in_scope(path))
            .collect()
    }

    pub fn offline_fallback_url(&self) -> Result<Url, ConfigError> {
        self.resolve_in_scope(&self.offline_fallback)
    }

    fn resolve_in_scope(&self, path: &str) -> Result<Url, ConfigError> {
        let url = self.resolve(path)?;
        if !self.in_scope(&url) {
            return Err(ConfigError::invalid(format!(
                "{url} is outside scope {}",
                self.scope
            )));
        }
        Ok(url)
    }

    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.namespace.is_empty() {
            return Err(ConfigError::invalid("namespace must not be empty"));
        }
        if self.version.is_empty() {
            return Err(ConfigError::invalid("version must not be empty"));
        }
        if self.scope.cannot_be_a_base() {
            return Err(ConfigError::invalid(format!(
                "scope {} cannot be a base URL",
                self.scope
            )));
        }
        self.precache_urls()?;
        self.offline_fallback_url()?;
        Ok(())
    }
}
