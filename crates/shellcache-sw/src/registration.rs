//! Worker lifecycle per registration, and the signals pages observe.
//!
//! ```text
//! install():   Parsed → Installing ──on_install──→ Installed (waiting)
//!                           │ failure                  │ nothing active, or skipWaiting
//!                           └──→ Redundant             └──→ activate()
//! activate():  Installed → Activating ──on_activate──→ Activated (active)
//!              previous active ─────────────────────→ Redundant
//! ```
//!
//! Lifecycle jobs (install, activate, message-triggered activation) run one
//! at a time per registration.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::controller::{ActivateReport, Controller};
use crate::message::{ControlMessage, MessageOutcome};
use crate::precache::PrecacheReport;
use crate::{ServiceWorkerError, ServiceWorkerId};

const EVENT_CAPACITY: usize = 64;

/// Service worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Initial state, script loaded.
    #[default]
    Parsed,
    /// Installing (install phase running).
    Installing,
    /// Installed and waiting for activation.
    Installed,
    /// Activating (activate phase running).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced or failed.
    Redundant,
}

// ==================== Service Worker ====================

/// A service worker instance: one controller in one lifecycle slot.
///
/// Cloning yields another handle to the same worker. Every handle observes
/// state changes made through any other.
#[derive(Debug, Clone)]
pub struct ServiceWorker {
    /// Script URL.
    pub script_url: Url,

    state: Arc<Mutex<StateCell>>,

    controller: Arc<Controller>,
}

#[derive(Debug)]
struct StateCell {
    state: ServiceWorkerState,
    changed_at: Instant,
}

impl ServiceWorker {
    fn new(script_url: Url, controller: Arc<Controller>) -> Self {
        Self {
            script_url,
            state: Arc::new(Mutex::new(StateCell {
                state: ServiceWorkerState::Parsed,
                changed_at: Instant::now(),
            })),
            controller,
        }
    }

    fn cell(&self) -> MutexGuard<'_, StateCell> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current state.
    pub fn state(&self) -> ServiceWorkerState {
        self.cell().state
    }

    /// Time of last state change.
    pub fn state_changed_at(&self) -> Instant {
        self.cell().changed_at
    }

    pub fn id(&self) -> ServiceWorkerId {
        self.controller.id()
    }

    pub fn version(&self) -> &str {
        self.controller.version()
    }

    pub fn controller(&self) -> &Arc<Controller> {
        &self.controller
    }

    fn set_state(&self, state: ServiceWorkerState) {
        let mut cell = self.cell();
        cell.state = state;
        cell.changed_at = Instant::now();
    }

    pub fn is_active(&self) -> bool {
        self.state() == ServiceWorkerState::Activated
    }

    pub fn is_redundant(&self) -> bool {
        self.state() == ServiceWorkerState::Redundant
    }

    /// Deliver a message to the worker's controller.
    pub fn post_message(&self, message: &ControlMessage) -> Result<MessageOutcome, ServiceWorkerError> {
        if self.is_redundant() {
            return Err(ServiceWorkerError::StateError(
                "Cannot post message to redundant worker".to_string(),
            ));
        }
        Ok(self.controller.on_message(message))
    }
}

// ==================== Events ====================

/// Lifecycle signals broadcast to every page observing a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationEvent {
    /// A new worker started installing.
    UpdateFound { worker: ServiceWorkerId },
    /// A worker changed state. `controlled` is whether the registration had
    /// an active worker at that moment, i.e. whether this is an update.
    StateChange {
        worker: ServiceWorkerId,
        state: ServiceWorkerState,
        controlled: bool,
    },
    /// A new worker took control of the registration's pages.
    ControllerChange { worker: ServiceWorkerId },
}

/// Result of an install job.
#[derive(Debug)]
pub struct InstallOutcome {
    pub worker: ServiceWorkerId,
    pub precache: PrecacheReport,
    /// Present when the worker activated in the same job.
    pub activated: Option<ActivateReport>,
}

// ==================== Registration ====================

#[derive(Debug, Default)]
struct Slots {
    installing: Option<ServiceWorker>,
    waiting: Option<ServiceWorker>,
    active: Option<ServiceWorker>,
    script_url: Option<Url>,
    last_update_check: Option<Instant>,
}

/// A service worker registration. Cloning yields another handle to it.
#[derive(Debug, Clone)]
pub struct ServiceWorkerRegistration {
    scope: Url,
    slots: Arc<RwLock<Slots>>,
    jobs: Arc<tokio::sync::Mutex<()>>,
    events: broadcast::Sender<RegistrationEvent>,
}

impl ServiceWorkerRegistration {
    /// Create a new, empty registration.
    pub fn new(scope: Url) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            scope,
            slots: Arc::new(RwLock::new(Slots::default())),
            jobs: Arc::new(tokio::sync::Mutex::new(())),
            events,
        }
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    /// Observe lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistrationEvent> {
        self.events.subscribe()
    }

    pub async fn installing(&self) -> Option<ServiceWorker> {
        self.slots.read().await.installing.clone()
    }

    pub async fn waiting(&self) -> Option<ServiceWorker> {
        self.slots.read().await.waiting.clone()
    }

    pub async fn active(&self) -> Option<ServiceWorker> {
        self.slots.read().await.active.clone()
    }

    /// Controller serving fetches for this registration's pages.
    pub async fn controller(&self) -> Option<Arc<Controller>> {
        self.slots
            .read()
            .await
            .active
            .as_ref()
            .map(|w| Arc::clone(w.controller()))
    }

    /// Version of the newest worker (installing, else waiting, else active).
    pub async fn newest_version(&self) -> Option<String> {
        let slots = self.slots.read().await;
        slots
            .installing
            .as_ref()
            .or(slots.waiting.as_ref())
            .or(slots.active.as_ref())
            .map(|w| w.version().to_string())
    }

    pub async fn script_url(&self) -> Option<Url> {
        self.slots.read().await.script_url.clone()
    }

    pub async fn last_update_check(&self) -> Option<Instant> {
        self.slots.read().await.last_update_check
    }

    fn emit(&self, event: RegistrationEvent) {
        debug!(scope = %self.scope, event = ?event, "Registration event");
        // No receivers simply means no page is listening.
        let _ = self.events.send(event);
    }

    fn emit_state(&self, worker: &ServiceWorker, controlled: bool) {
        self.emit(RegistrationEvent::StateChange {
            worker: worker.id(),
            state: worker.state(),
            controlled,
        });
    }

    /// Install a new controller version.
    ///
    /// On success the worker becomes the waiting worker, replacing any
    /// previous one. It is activated in the same job when nothing is active
    /// yet or when it asked to skip waiting.
    pub async fn install(
        &self,
        script_url: Url,
        controller: Arc<Controller>,
    ) -> Result<InstallOutcome, ServiceWorkerError> {
        let _job = self.jobs.lock().await;

        let worker = ServiceWorker::new(script_url.clone(), controller);
        worker.set_state(ServiceWorkerState::Installing);
        let controlled = {
            let mut slots = self.slots.write().await;
            slots.installing = Some(worker.clone());
            slots.script_url = Some(script_url);
            slots.last_update_check = Some(Instant::now());
            slots.active.is_some()
        };
        self.emit(RegistrationEvent::UpdateFound { worker: worker.id() });
        self.emit_state(&worker, controlled);

        let precache = match worker.controller().on_install().await {
            Ok(report) => report,
            Err(e) => {
                warn!(worker = %worker.id(), error = %e, "Install failed");
                worker.set_state(ServiceWorkerState::Redundant);
                self.slots.write().await.installing = None;
                self.emit_state(&worker, controlled);
                return Err(e);
            }
        };

        worker.set_state(ServiceWorkerState::Installed);
        let (superseded, controlled) = {
            let mut slots = self.slots.write().await;
            slots.installing = None;
            let superseded = slots.waiting.replace(worker.clone());
            (superseded, slots.active.is_some())
        };
        if let Some(old) = superseded {
            old.set_state(ServiceWorkerState::Redundant);
            self.emit_state(&old, controlled);
        }
        info!(worker = %worker.id(), version = %worker.version(), "Installed");
        self.emit_state(&worker, controlled);

        let activated = if !controlled || worker.controller().skip_waiting_requested() {
            self.activate_waiting().await?
        } else {
            None
        };

        Ok(InstallOutcome {
            worker: worker.id(),
            precache,
            activated,
        })
    }

    /// Activate the waiting worker, if any.
    pub async fn activate(&self) -> Result<Option<ActivateReport>, ServiceWorkerError> {
        let _job = self.jobs.lock().await;
        self.activate_waiting().await
    }

    /// Post a message to the waiting worker. A `skipWaiting` request
    /// activates it before this returns.
    pub async fn post_message(
        &self,
        message: &ControlMessage,
    ) -> Result<MessageOutcome, ServiceWorkerError> {
        let _job = self.jobs.lock().await;

        let waiting = self
            .waiting()
            .await
            .ok_or(ServiceWorkerError::NoWaitingWorker)?;
        let outcome = waiting.post_message(message)?;

        if waiting.controller().skip_waiting_requested() {
            self.activate_waiting().await?;
        }
        Ok(outcome)
    }

    async fn activate_waiting(&self) -> Result<Option<ActivateReport>, ServiceWorkerError> {
        let (worker, controlled) = {
            let mut slots = self.slots.write().await;
            match slots.waiting.take() {
                Some(worker) => (worker, slots.active.is_some()),
                None => return Ok(None),
            }
        };

        worker.set_state(ServiceWorkerState::Activating);
        self.emit_state(&worker, controlled);

        let report = match worker.controller().on_activate().await {
            Ok(report) => report,
            Err(e) => {
                warn!(worker = %worker.id(), error = %e, "Activation failed");
                worker.set_state(ServiceWorkerState::Redundant);
                self.emit_state(&worker, controlled);
                return Err(e);
            }
        };

        worker.set_state(ServiceWorkerState::Activated);
        let previous = self.slots.write().await.active.replace(worker.clone());
        if let Some(old) = previous {
            old.set_state(ServiceWorkerState::Redundant);
            self.emit_state(&old, true);
        }

        info!(
            worker = %worker.id(),
            version = %worker.version(),
            reaped = report.reaped.deleted.len(),
            claimed = report.claimed.len(),
            "Activated"
        );
        self.emit_state(&worker, true);
        self.emit(RegistrationEvent::ControllerChange { worker: worker.id() });

        Ok(Some(report))
    }

    /// Mark every worker redundant and empty all slots.
    pub async fn unregister(&self) {
        let _job = self.jobs.lock().await;
        let mut guard = self.slots.write().await;
        let slots = &mut *guard;
        for slot in [&mut slots.installing, &mut slots.waiting, &mut slots.active] {
            if let Some(worker) = slot.take() {
                worker.set_state(ServiceWorkerState::Redundant);
                self.emit_state(&worker, false);
            }
        }
    }
}
