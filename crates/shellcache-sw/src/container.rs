//! Registrations by scope, as seen from foreground pages.

use std::path::PathBuf;
use std::sync::{Arc, RwLock as StdRwLock};

use futures::future::{self, BoxFuture, FutureExt};
use hashbrown::HashMap;
use shellcache_common::load_json;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::controller::{Controller, WorkerEnvironment};
use crate::registration::ServiceWorkerRegistration;
use crate::{ControllerConfig, ServiceWorkerError};

/// Where deployed controller scripts come from.
///
/// Loading a script yields the configuration of the version currently
/// deployed at that URL.
pub trait ScriptSource: Send + Sync {
    fn load(&self, script_url: &Url) -> BoxFuture<'_, Result<ControllerConfig, ServiceWorkerError>>;
}

/// A script source holding one deployed configuration in memory.
#[derive(Debug, Default)]
pub struct StaticScriptSource {
    deployed: StdRwLock<Option<ControllerConfig>>,
}

impl StaticScriptSource {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            deployed: StdRwLock::new(Some(config)),
        }
    }

    /// Replace the deployed configuration.
    pub fn deploy(&self, config: ControllerConfig) {
        *self.deployed.write().unwrap_or_else(|e| e.into_inner()) = Some(config);
    }
}

impl ScriptSource for StaticScriptSource {
    fn load(&self, script_url: &Url) -> BoxFuture<'_, Result<ControllerConfig, ServiceWorkerError>> {
        let result = self
            .deployed
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or_else(|| {
                ServiceWorkerError::RegistrationFailed(format!("no script deployed at {script_url}"))
            });
        future::ready(result).boxed()
    }
}

/// A script source reading the configuration from a JSON file.
#[derive(Debug, Clone)]
pub struct FileScriptSource {
    path: PathBuf,
}

impl FileScriptSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ScriptSource for FileScriptSource {
    fn load(&self, _script_url: &Url) -> BoxFuture<'_, Result<ControllerConfig, ServiceWorkerError>> {
        async move {
            load_json::<ControllerConfig>(&self.path)
                .await
                .map_err(ServiceWorkerError::from)
        }
        .boxed()
    }
}

// ==================== Container ====================

/// Service worker container: the page-side entry point.
pub struct ServiceWorkerContainer {
    source: Arc<dyn ScriptSource>,
    env: WorkerEnvironment,
    registrations: RwLock<HashMap<String, ServiceWorkerRegistration>>,
}

impl std::fmt::Debug for ServiceWorkerContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorkerContainer")
            .field("env", &self.env)
            .finish_non_exhaustive()
    }
}

impl ServiceWorkerContainer {
    pub fn new(source: Arc<dyn ScriptSource>, env: WorkerEnvironment) -> Self {
        Self {
            source,
            env,
            registrations: RwLock::new(HashMap::new()),
        }
    }

    pub fn environment(&self) -> &WorkerEnvironment {
        &self.env
    }

    /// Register the script at `script_url`.
    ///
    /// The scope must lie under the script's directory. A new worker is
    /// installed when the deployed version differs from the registration's
    /// newest one; the install job completes before this returns.
    pub async fn register(
        &self,
        script_url: &Url,
    ) -> Result<ServiceWorkerRegistration, ServiceWorkerError> {
        let config = self.source.load(script_url).await?;

        let max_scope = script_url.join("./")?;
        if config.scope.origin() != script_url.origin()
            || !config.scope.as_str().starts_with(max_scope.as_str())
        {
            return Err(ServiceWorkerError::SecurityError(format!(
                "scope {} is not allowed for script {script_url}",
                config.scope
            )));
        }

        let registration = self
            .registrations
            .write()
            .await
            .entry(config.scope.to_string())
            .or_insert_with(|| ServiceWorkerRegistration::new(config.scope.clone()))
            .clone();

        self.install_if_changed(&registration, script_url, config).await?;
        Ok(registration)
    }

    /// Re-check the deployed script for a registered scope.
    pub async fn update(&self, scope: &Url) -> Result<ServiceWorkerRegistration, ServiceWorkerError> {
        let registration = self
            .registrations
            .read()
            .await
            .get(scope.as_str())
            .cloned()
            .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
        let script_url = registration
            .script_url()
            .await
            .ok_or_else(|| ServiceWorkerError::StateError(format!("{scope} has no script")))?;

        let config = self.source.load(&script_url).await?;
        self.install_if_changed(&registration, &script_url, config).await?;
        Ok(registration)
    }

    async fn install_if_changed(
        &self,
        registration: &ServiceWorkerRegistration,
        script_url: &Url,
        config: ControllerConfig,
    ) -> Result<(), ServiceWorkerError> {
        if registration.newest_version().await.as_deref() == Some(config.version.as_str()) {
            debug!(scope = %registration.scope(), version = %config.version, "Script unchanged");
            return Ok(());
        }

        info!(scope = %registration.scope(), version = %config.version, "Installing new version");
        let controller = Arc::new(Controller::new(config, self.env.clone())?);
        registration.install(script_url.clone(), controller).await?;
        Ok(())
    }

    /// Registration whose scope is the longest prefix of `url`.
    pub async fn get_registration(&self, url: &Url) -> Option<ServiceWorkerRegistration> {
        self.registrations
            .read()
            .await
            .iter()
            .filter(|(scope, _)| url.as_str().starts_with(scope.as_str()))
            .max_by_key(|(scope, _)| scope.len())
            .map(|(_, registration)| registration.clone())
    }

    /// All registered scopes, sorted.
    pub async fn get_registrations(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.registrations.read().await.keys().cloned().collect();
        scopes.sort();
        scopes
    }

    /// Active controller for a page URL.
    pub async fn controller_for(&self, url: &Url) -> Option<Arc<Controller>> {
        self.get_registration(url).await?.controller().await
    }

    /// Remove a registration. Returns whether it existed.
    pub async fn unregister(&self, scope: &Url) -> bool {
        let removed = self.registrations.write().await.remove(scope.as_str());
        match removed {
            Some(registration) => {
                registration.unregister().await;
                true
            }
            None => false,
        }
    }
}
