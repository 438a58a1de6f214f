//! Update prompt against a real registration

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shellcache_net::MockNetwork;
use shellcache_sw::{
    ControllerConfig, ServiceWorkerContainer, StaticScriptSource, WorkerEnvironment,
};
use shellcache_update::{
    register_and_attach, PageHost, UpdateBanner, UpdateError, UpdatePromptState, SCRIPT_PATH,
};
use url::Url;

const SCOPE: &str = "https://shop.example.com/admin/";

#[derive(Default)]
struct RecordingHost {
    banners: AtomicUsize,
    reloads: AtomicUsize,
}

impl PageHost for RecordingHost {
    fn show_banner(&self, banner: &UpdateBanner) {
        assert_eq!(banner.accept_label, "Update");
        self.banners.fetch_add(1, Ordering::SeqCst);
    }

    fn remove_banner(&self) {}

    fn reload(&self) {
        self.reloads.fetch_add(1, Ordering::SeqCst);
    }
}

fn config(version: &str) -> ControllerConfig {
    ControllerConfig::new(Url::parse(SCOPE).unwrap())
        .with_version(version)
        .with_precache(["./index.html"])
        .with_skip_waiting_on_install(false)
}

fn container(source: Arc<StaticScriptSource>) -> ServiceWorkerContainer {
    let network = Arc::new(
        MockNetwork::new().with_ok("https://shop.example.com/admin/index.html", "<html>"),
    );
    ServiceWorkerContainer::new(source, WorkerEnvironment::new(network))
}

fn page() -> Url {
    Url::parse("https://shop.example.com/admin/orders.html").unwrap()
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("condition not reached");
}

#[tokio::test]
async fn test_waiting_worker_on_page_load_prompts() {
    let source = Arc::new(StaticScriptSource::new(config("v1")));
    let container = container(source.clone());
    let host = Arc::new(RecordingHost::default());
    register_and_attach(&container, SCRIPT_PATH, &page(), host.clone())
        .await
        .unwrap();
    assert_eq!(host.banners.load(Ordering::SeqCst), 0);

    // The next page load finds v2 deployed and waiting behind v1.
    source.deploy(config("v2"));
    let (client, _events) = register_and_attach(&container, SCRIPT_PATH, &page(), host.clone())
        .await
        .unwrap();

    assert_eq!(client.state(), UpdatePromptState::UserPrompted);
    assert_eq!(host.banners.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_accept_reloads_exactly_once() {
    let source = Arc::new(StaticScriptSource::new(config("v1")));
    let container = container(source.clone());
    container
        .register(&Url::parse("https://shop.example.com/admin/sw.js").unwrap())
        .await
        .unwrap();

    let host = Arc::new(RecordingHost::default());
    let (client, events) = register_and_attach(&container, SCRIPT_PATH, &page(), host.clone())
        .await
        .unwrap();
    assert_eq!(client.state(), UpdatePromptState::NoController);
    let task = client.spawn(events);

    source.deploy(config("v2"));
    let registration = container.update(&Url::parse(SCOPE).unwrap()).await.unwrap();
    wait_for(|| host.banners.load(Ordering::SeqCst) == 1).await;
    assert_eq!(client.state(), UpdatePromptState::UserPrompted);

    client.accept().await.unwrap();
    wait_for(|| client.has_reloaded()).await;

    assert_eq!(client.state(), UpdatePromptState::ReloadIssued);
    assert_eq!(host.reloads.load(Ordering::SeqCst), 1);
    assert_eq!(registration.active().await.unwrap().version(), "v2");
    assert!(registration.waiting().await.is_none());

    task.abort();
}

#[tokio::test]
async fn test_registration_failure_is_reported() {
    let mut bad = config("v1");
    bad.scope = Url::parse("https://shop.example.com/").unwrap();
    let container = container(Arc::new(StaticScriptSource::new(bad)));

    let result = register_and_attach(
        &container,
        SCRIPT_PATH,
        &page(),
        Arc::new(RecordingHost::default()),
    )
    .await;

    assert!(matches!(result, Err(UpdateError::Registration(_))));
}
