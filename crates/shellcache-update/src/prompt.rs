//! Update prompt state machine.
//!
//! ```text
//! NoController ─→ WaitingDetected ─→ UserPrompted ─┬─ accept ─→ SkipRequested ─→ ControllerChanged ─→ ReloadIssued
//!                                                  └─ dismiss ─→ Idle
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use shellcache_sw::{
    ControlMessage, RegistrationEvent, ServiceWorkerRegistration, ServiceWorkerState,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::host::{PageHost, UpdateBanner};
use crate::UpdateError;

/// Where the page is in the update flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePromptState {
    /// Nothing to offer yet.
    NoController,
    /// A new version is installed and waiting.
    WaitingDetected,
    /// The banner is shown.
    UserPrompted,
    /// `skipWaiting` was posted to the waiting worker.
    SkipRequested,
    ControllerChanged,
    ReloadIssued,
    /// Prompt dismissed; nothing happens until the next page load.
    Idle,
}

/// Foreground half of the update flow for one page load.
pub struct UpdatePromptClient {
    registration: ServiceWorkerRegistration,
    host: Arc<dyn PageHost>,
    banner: UpdateBanner,
    state: Mutex<UpdatePromptState>,
    prompted: AtomicBool,
    reloaded: AtomicBool,
}

impl std::fmt::Debug for UpdatePromptClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdatePromptClient")
            .field("scope", &self.registration.scope().as_str())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl UpdatePromptClient {
    /// Attach to a registration.
    ///
    /// Subscribes before looking at the registration so no event is lost in
    /// between. If a worker is already waiting the banner is shown at once.
    pub async fn attach(
        registration: ServiceWorkerRegistration,
        host: Arc<dyn PageHost>,
    ) -> (Arc<Self>, broadcast::Receiver<RegistrationEvent>) {
        Self::attach_with_banner(registration, host, UpdateBanner::default()).await
    }

    pub async fn attach_with_banner(
        registration: ServiceWorkerRegistration,
        host: Arc<dyn PageHost>,
        banner: UpdateBanner,
    ) -> (Arc<Self>, broadcast::Receiver<RegistrationEvent>) {
        let events = registration.subscribe();
        let client = Arc::new(Self {
            registration,
            host,
            banner,
            state: Mutex::new(UpdatePromptState::NoController),
            prompted: AtomicBool::new(false),
            reloaded: AtomicBool::new(false),
        });

        if client.registration.waiting().await.is_some() {
            debug!(scope = %client.registration.scope(), "Worker already waiting");
            client.waiting_detected();
        }
        (client, events)
    }

    pub fn state(&self) -> UpdatePromptState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: UpdatePromptState) {
        *self.state.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    pub fn has_reloaded(&self) -> bool {
        self.reloaded.load(Ordering::SeqCst)
    }

    /// React to one lifecycle event.
    pub fn handle_event(&self, event: &RegistrationEvent) {
        match event {
            RegistrationEvent::StateChange {
                state: ServiceWorkerState::Installed,
                controlled: true,
                ..
            } => self.waiting_detected(),
            RegistrationEvent::ControllerChange { worker } => {
                if self.has_reloaded() {
                    warn!(worker = %worker, "Ignoring repeated controller change");
                    return;
                }
                debug!(worker = %worker, "Controller changed");
                self.set_state(UpdatePromptState::ControllerChanged);
                self.reload_once();
            }
            _ => {}
        }
    }

    fn waiting_detected(&self) {
        if self.state() == UpdatePromptState::Idle {
            return;
        }
        if self.prompted.swap(true, Ordering::SeqCst) {
            debug!("Update prompt already shown");
            return;
        }
        self.set_state(UpdatePromptState::WaitingDetected);
        info!(scope = %self.registration.scope(), "Update available");
        self.host.show_banner(&self.banner);
        self.set_state(UpdatePromptState::UserPrompted);
    }

    fn reload_once(&self) {
        if self.reloaded.swap(true, Ordering::SeqCst) {
            return;
        }
        self.host.reload();
        self.set_state(UpdatePromptState::ReloadIssued);
    }

    /// The user accepted the update.
    ///
    /// With no waiting worker this is a plain reload. Otherwise the waiting
    /// worker is told to skip waiting; the reload follows its controller
    /// change.
    pub async fn accept(&self) -> Result<(), UpdateError> {
        self.host.remove_banner();

        if self.registration.waiting().await.is_none() {
            self.reload_once();
            return Ok(());
        }

        self.set_state(UpdatePromptState::SkipRequested);
        self.registration
            .post_message(&ControlMessage::SkipWaiting)
            .await?;
        Ok(())
    }

    /// The user dismissed the banner.
    pub fn dismiss(&self) {
        self.host.remove_banner();
        self.set_state(UpdatePromptState::Idle);
    }

    /// Process events for the rest of the page load.
    pub async fn run(self: Arc<Self>, mut events: broadcast::Receiver<RegistrationEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => self.handle_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Update prompt fell behind lifecycle events");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    /// Run the event loop on a background task.
    pub fn spawn(
        self: &Arc<Self>,
        events: broadcast::Receiver<RegistrationEvent>,
    ) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run(events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use url::Url;

    #[derive(Default)]
    struct RecordingHost {
        banners: AtomicUsize,
        removed: AtomicUsize,
        reloads: AtomicUsize,
    }

    impl PageHost for RecordingHost {
        fn show_banner(&self, _banner: &UpdateBanner) {
            self.banners.fetch_add(1, Ordering::SeqCst);
        }

        fn remove_banner(&self) {
            self.removed.fetch_add(1, Ordering::SeqCst);
        }

        fn reload(&self) {
            self.reloads.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn client() -> (Arc<UpdatePromptClient>, Arc<RecordingHost>) {
        let registration =
            ServiceWorkerRegistration::new(Url::parse("https://shop.example.com/admin/").unwrap());
        let host = Arc::new(RecordingHost::default());
        let (client, _events) = UpdatePromptClient::attach(registration, host.clone()).await;
        (client, host)
    }

    fn installed(controlled: bool) -> RegistrationEvent {
        RegistrationEvent::StateChange {
            worker: shellcache_sw::ServiceWorkerId::from_raw(7),
            state: ServiceWorkerState::Installed,
            controlled,
        }
    }

    fn controller_change() -> RegistrationEvent {
        RegistrationEvent::ControllerChange {
            worker: shellcache_sw::ServiceWorkerId::from_raw(7),
        }
    }

    #[tokio::test]
    async fn test_starts_without_controller() {
        let (client, host) = client().await;
        assert_eq!(client.state(), UpdatePromptState::NoController);
        assert_eq!(host.banners.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_first_install_does_not_prompt() {
        let (client, host) = client().await;
        client.handle_event(&installed(false));
        assert_eq!(client.state(), UpdatePromptState::NoController);
        assert_eq!(host.banners.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_prompt_shown_once() {
        let (client, host) = client().await;

        client.handle_event(&installed(true));
        client.handle_event(&installed(true));

        assert_eq!(client.state(), UpdatePromptState::UserPrompted);
        assert_eq!(host.banners.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dismiss_is_final() {
        let (client, host) = client().await;
        client.handle_event(&installed(true));

        client.dismiss();
        client.handle_event(&installed(true));

        assert_eq!(client.state(), UpdatePromptState::Idle);
        assert_eq!(host.banners.load(Ordering::SeqCst), 1);
        assert_eq!(host.removed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_two_controller_changes_reload_once() {
        let (client, host) = client().await;

        client.handle_event(&controller_change());
        client.handle_event(&controller_change());

        assert_eq!(host.reloads.load(Ordering::SeqCst), 1);
        assert_eq!(client.state(), UpdatePromptState::ReloadIssued);
        assert!(client.has_reloaded());
    }

    #[tokio::test]
    async fn test_accept_without_waiting_worker_reloads() {
        let (client, host) = client().await;
        client.accept().await.unwrap();
        client.accept().await.unwrap();
        assert_eq!(host.reloads.load(Ordering::SeqCst), 1);
    }
}
