//! The controller: one deployed version of the offline worker.
//!
//! Lifecycle and fetch handling are plain async methods so they can be
//! invoked directly; [`crate::ServiceWorkerRegistration`] drives them in
//! lifecycle order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use shellcache_net::{Network, Request};
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;

use crate::clients::{ClientMatchOptions, ClientType, Clients};
use crate::message::{ControlMessage, MessageOutcome};
use crate::notification::{self, ClickOutcome, Notification, NotificationCenter, PushPayload};
use crate::precache::{self, PrecacheReport};
use crate::reaper::{self, ReapReport};
use crate::router::{self, PassReason, Route};
use crate::strategy::{self, StrategyResponse};
use crate::{CacheStorage, ControllerConfig, ServiceWorkerError, ServiceWorkerId};

/// Host facilities shared by every controller version.
#[derive(Clone)]
pub struct WorkerEnvironment {
    pub caches: CacheStorage,
    pub network: Arc<dyn Network>,
    pub clients: Arc<RwLock<Clients>>,
    pub notifications: NotificationCenter,
}

impl WorkerEnvironment {
    /// Fresh environment with empty caches and no clients.
    pub fn new(network: Arc<dyn Network>) -> Self {
        Self::with_caches(network, CacheStorage::new())
    }

    /// Environment over existing cache storage.
    pub fn with_caches(network: Arc<dyn Network>, caches: CacheStorage) -> Self {
        Self {
            caches,
            network,
            clients: Arc::new(RwLock::new(Clients::new())),
            notifications: NotificationCenter::new(),
        }
    }
}

impl std::fmt::Debug for WorkerEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerEnvironment")
            .field("caches", &self.caches)
            .finish_non_exhaustive()
    }
}

/// Result of the activate phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
    pub reaped: ReapReport,
    /// Clients that switched to this controller.
    pub claimed: Vec<String>,
}

/// What the interception hook should do with a request.
#[derive(Debug)]
pub enum FetchDisposition {
    /// Not intercepted; the host performs the request itself.
    Passthrough(PassReason),
    Respond(StrategyResponse),
}

/// One controller version.
pub struct Controller {
    id: ServiceWorkerId,
    config: Arc<ControllerConfig>,
    env: WorkerEnvironment,
    cache_name: String,
    precache_urls: Vec<Url>,
    offline_fallback: Url,
    skip_waiting: AtomicBool,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("id", &self.id)
            .field("cache_name", &self.cache_name)
            .field("skip_waiting", &self.skip_waiting_requested())
            .finish()
    }
}

impl Controller {
    /// Create a controller. Fails if the configuration does not validate.
    pub fn new(
        config: impl Into<Arc<ControllerConfig>>,
        env: WorkerEnvironment,
    ) -> Result<Self, ServiceWorkerError> {
        let config = config.into();
        config.validate()?;

        Ok(Self {
            id: ServiceWorkerId::new(),
            cache_name: config.cache_name(),
            precache_urls: config.precache_urls()?,
            offline_fallback: config.offline_fallback_url()?,
            config,
            env,
            skip_waiting: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.id
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn version(&self) -> &str {
        &self.config.version
    }

    pub fn scope(&self) -> &Url {
        &self.config.scope
    }

    /// Name of the cache generation this controller reads and writes.
    pub fn cache_name(&self) -> &str {
        &self.cache_name
    }

    pub fn environment(&self) -> &WorkerEnvironment {
        &self.env
    }

    /// Ask to become active without waiting for old clients to close.
    pub fn skip_waiting(&self) {
        if !self.skip_waiting.swap(true, Ordering::SeqCst) {
            debug!(worker = %self.id, "skipWaiting requested");
        }
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Install phase: fill this version's generation from the manifest.
    pub async fn on_install(&self) -> Result<PrecacheReport, ServiceWorkerError> {
        info!(worker = %self.id, version = %self.config.version, "Installing");

        let cache = self.env.caches.open(&self.cache_name).await;
        let report = precache::precache(&cache, self.env.network.as_ref(), &self.precache_urls).await?;

        if self.config.skip_waiting_on_install {
            self.skip_waiting();
        }
        Ok(report)
    }

    /// Activate phase: reap old generations, then claim open clients.
    pub async fn on_activate(&self) -> Result<ActivateReport, ServiceWorkerError> {
        info!(worker = %self.id, version = %self.config.version, "Activating");

        let reaped = reaper::reap(
            &self.env.caches,
            &self.config.generation_prefix(),
            &self.cache_name,
        )
        .await;

        let claimed = self
            .env
            .clients
            .write()
            .await
            .claim(self.id, &self.config.scope);

        Ok(ActivateReport { reaped, claimed })
    }

    /// Intercept one request.
    pub async fn on_fetch(&self, request: Request) -> Result<FetchDisposition, ServiceWorkerError> {
        let route = router::classify(&request, &self.config.scope, &self.config.exclusions);
        debug!(url = %request.url, route = ?route, "Intercepted request");

        let cache = match route {
            Route::Passthrough(reason) => return Ok(FetchDisposition::Passthrough(reason)),
            _ => self.env.caches.open(&self.cache_name).await,
        };

        let response = match route {
            Route::NetworkFirst => {
                strategy::network_first(
                    &cache,
                    self.env.network.as_ref(),
                    request,
                    &self.offline_fallback,
                )
                .await?
            }
            _ => strategy::stale_while_revalidate(&cache, &self.env.network, request).await?,
        };

        Ok(FetchDisposition::Respond(response))
    }

    /// Handle a message posted by a page.
    pub fn on_message(&self, message: &ControlMessage) -> MessageOutcome {
        match message {
            ControlMessage::SkipWaiting => {
                self.skip_waiting();
                MessageOutcome::SkipWaitingRequested
            }
            ControlMessage::Unknown => {
                debug!(worker = %self.id, "Ignoring unknown message");
                MessageOutcome::Ignored
            }
        }
    }

    /// Show the notification for a push payload.
    pub async fn on_push(&self, payload: &PushPayload) -> Notification {
        let notification =
            notification::render(payload, &self.config.notifications, &self.config.scope);
        debug!(title = %notification.title, url = %notification.url, "Showing notification");
        self.env.notifications.show(notification.clone()).await;
        notification
    }

    /// Close the notification and bring its target page to the front.
    ///
    /// A window already showing exactly the target URL is focused; otherwise
    /// a new window is opened.
    pub async fn on_notification_click(
        &self,
        notification: &Notification,
    ) -> Result<ClickOutcome, ServiceWorkerError> {
        self.env.notifications.close(notification.id).await;

        let target = self
            .config
            .scope
            .join(&notification.url)
            .or_else(|_| self.config.resolve(&self.config.notifications.url))?;

        let mut clients = self.env.clients.write().await;
        let options = ClientMatchOptions {
            include_uncontrolled: true,
            client_type: ClientType::Window,
        };
        let existing = clients
            .match_all(self.id, &options)
            .into_iter()
            .find(|c| c.url == target)
            .map(|c| c.id.clone());

        match existing {
            Some(id) => {
                clients.focus(&id)?;
                Ok(ClickOutcome::Focused(id))
            }
            None => {
                let client = clients.open_window(target);
                Ok(ClickOutcome::Opened(client.id))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::Client;
    use shellcache_net::MockNetwork;

    const SCOPE: &str = "https://shop.example.com/admin/";

    fn config() -> ControllerConfig {
        ControllerConfig::new(Url::parse(SCOPE).unwrap())
            .with_precache(["./index.html", "./app.js"])
    }

    fn network() -> Arc<MockNetwork> {
        Arc::new(
            MockNetwork::new()
                .with_ok("https://shop.example.com/admin/index.html", "<html>")
                .with_ok("https://shop.example.com/admin/app.js", "app"),
        )
    }

    fn controller(config: ControllerConfig, network: Arc<MockNetwork>) -> Controller {
        Controller::new(config, WorkerEnvironment::new(network)).unwrap()
    }

    #[tokio::test]
    async fn test_install_precaches_and_requests_skip_waiting() {
        let controller = controller(config(), network());

        let report = controller.on_install().await.unwrap();

        assert!(report.is_complete());
        assert!(controller.skip_waiting_requested());
        let cache = controller.environment().caches.open("admin-cache-v2").await;
        assert_eq!(cache.len().await, 2);
    }

    #[tokio::test]
    async fn test_install_without_skip_waiting() {
        let controller = controller(config().with_skip_waiting_on_install(false), network());
        controller.on_install().await.unwrap();
        assert!(!controller.skip_waiting_requested());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let result = Controller::new(config().with_version(""), WorkerEnvironment::new(network()));
        assert!(matches!(result, Err(ServiceWorkerError::Config(_))));
    }

    #[tokio::test]
    async fn test_activate_reaps_and_claims() {
        let controller = controller(config(), network());
        let env = controller.environment().clone();
        env.caches.open("admin-cache-v1").await;
        let page = Client::window(Url::parse("https://shop.example.com/admin/orders.html").unwrap());
        let page_id = page.id.clone();
        env.clients.write().await.add(page);

        let report = controller.on_activate().await.unwrap();

        assert_eq!(report.reaped.deleted, vec!["admin-cache-v1"]);
        assert_eq!(report.claimed, vec![page_id.clone()]);
        let clients = env.clients.read().await;
        assert!(clients.get(&page_id).unwrap().is_controlled_by(controller.id()));
    }

    #[tokio::test]
    async fn test_fetch_routes() {
        let controller = controller(config(), network());

        let api = Request::get(Url::parse("https://shop.example.com/api/orders").unwrap());
        assert!(matches!(
            controller.on_fetch(api).await.unwrap(),
            FetchDisposition::Passthrough(PassReason::Excluded)
        ));

        let page = Request::navigate(Url::parse("https://shop.example.com/admin/index.html").unwrap());
        match controller.on_fetch(page).await.unwrap() {
            FetchDisposition::Respond(r) => assert_eq!(r.response.text(), "<html>"),
            other => panic!("expected a response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_message_skip_waiting() {
        let controller = controller(config().with_skip_waiting_on_install(false), network());
        assert_eq!(
            controller.on_message(&ControlMessage::Unknown),
            MessageOutcome::Ignored
        );
        assert!(!controller.skip_waiting_requested());
        assert_eq!(
            controller.on_message(&ControlMessage::SkipWaiting),
            MessageOutcome::SkipWaitingRequested
        );
        assert!(controller.skip_waiting_requested());
    }

    #[tokio::test]
    async fn test_notification_click_focuses_existing_window() {
        let controller = controller(config(), network());
        let env = controller.environment().clone();
        let page = Client::window(Url::parse("https://shop.example.com/admin/orders.html").unwrap());
        let page_id = page.id.clone();
        env.clients.write().await.add(page);

        let payload = PushPayload {
            data: Some(notification::PushData {
                url: Some("./orders.html".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let shown = controller.on_push(&payload).await;
        assert_eq!(env.notifications.shown().await.len(), 1);

        let outcome = controller.on_notification_click(&shown).await.unwrap();

        assert_eq!(outcome, ClickOutcome::Focused(page_id));
        assert!(env.notifications.shown().await.is_empty());
    }

    #[tokio::test]
    async fn test_notification_click_opens_window() {
        let controller = controller(config(), network());
        let env = controller.environment().clone();
        env.clients
            .write()
            .await
            .add(Client::window(Url::parse("https://shop.example.com/admin/orders.html?x=1").unwrap()));

        let shown = controller.on_push(&PushPayload::default()).await;
        let outcome = controller.on_notification_click(&shown).await.unwrap();

        let ClickOutcome::Opened(id) = outcome else {
            panic!("expected a new window");
        };
        let clients = env.clients.read().await;
        let opened = clients.get(&id).unwrap();
        assert_eq!(opened.url.as_str(), "https://shop.example.com/admin/index.html");
        assert!(opened.focused);
    }
}
