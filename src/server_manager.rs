//! Single-active-mode policy for the management and operational services.
//!
//! Claiming a mode slot is synchronous and lock-protected; binding the
//! listener happens afterwards in a spawned task so the lock is never held
//! across I/O. A failed bind reverts the slot to `None` and reports the
//! error on the event channel.

use crate::error::Error;
use actix_server::ServerHandle;
use actix_web::dev::Server;
use log::{error, info};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// The process-wide service mode. Exactly one value at any instant;
/// `Starting*` values are transient and resolve to the steady state or
/// revert to `None` on failure.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceMode {
    None,
    StartingManagement,
    Management,
    StartingOperational,
    Operational,
}

impl std::fmt::Display for ServiceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceMode::None => write!(f, "none"),
            ServiceMode::StartingManagement => write!(f, "starting management"),
            ServiceMode::Management => write!(f, "management"),
            ServiceMode::StartingOperational => write!(f, "starting operational"),
            ServiceMode::Operational => write!(f, "operational"),
        }
    }
}

/// Which of the two mutually exclusive services an event refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModeKind {
    Management,
    Operational,
}

impl ModeKind {
    fn starting(self) -> ServiceMode {
        match self {
            ModeKind::Management => ServiceMode::StartingManagement,
            ModeKind::Operational => ServiceMode::StartingOperational,
        }
    }

    fn steady(self) -> ServiceMode {
        match self {
            ModeKind::Management => ServiceMode::Management,
            ModeKind::Operational => ServiceMode::Operational,
        }
    }
}

impl std::fmt::Display for ModeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModeKind::Management => write!(f, "management"),
            ModeKind::Operational => write!(f, "operational"),
        }
    }
}

/// Lifecycle notifications for subscribers; start failures are reported
/// here in addition to reverting the mode to `None`.
#[derive(Clone, Debug)]
pub enum ModeEvent {
    Started(ModeKind),
    StartFailed(ModeKind, String),
    Stopped(ModeKind),
}

/// Builds a bound, ready-to-run server for one mode. Called inside the
/// start task, not under the state lock.
pub type ServiceFactory = Arc<dyn Fn() -> anyhow::Result<Server> + Send + Sync>;

struct Inner {
    mode: ServiceMode,
    handle: Option<ServerHandle>,
}

pub struct ServerModeManager {
    inner: Arc<Mutex<Inner>>,
    management: ServiceFactory,
    operational: ServiceFactory,
    events: broadcast::Sender<ModeEvent>,
}

impl ServerModeManager {
    pub fn new(management: ServiceFactory, operational: ServiceFactory) -> Self {
        let (events, _) = broadcast::channel(16);

        ServerModeManager {
            inner: Arc::new(Mutex::new(Inner {
                mode: ServiceMode::None,
                handle: None,
            })),
            management,
            operational,
            events,
        }
    }

    /// Current mode. Eventually consistent: a caller racing a transition
    /// may observe a `Starting*` value.
    pub fn running(&self) -> ServiceMode {
        self.inner.lock().unwrap().mode
    }

    /// Receive start/stop/failure notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<ModeEvent> {
        self.events.subscribe()
    }

    /// Start the captive-portal service. Only allowed from `None`.
    pub fn start_management_server(&self) -> Result<(), Error> {
        self.start(ModeKind::Management)
    }

    /// Start the operational status service. Only allowed from `None`.
    pub fn start_operational_server(&self) -> Result<(), Error> {
        self.start(ModeKind::Operational)
    }

    /// Gracefully stop the captive-portal service. Idempotent from `None`.
    pub async fn shutdown_management_server(&self) -> Result<(), Error> {
        self.shutdown(ModeKind::Management).await
    }

    /// Gracefully stop the operational status service. Idempotent from `None`.
    pub async fn shutdown_operational_server(&self) -> Result<(), Error> {
        self.shutdown(ModeKind::Operational).await
    }

    fn start(&self, kind: ModeKind) -> Result<(), Error> {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.mode != ServiceMode::None {
                return Err(Error::StateConflict(inner.mode));
            }
            inner.mode = kind.starting();
        }

        let factory = match kind {
            ModeKind::Management => self.management.clone(),
            ModeKind::Operational => self.operational.clone(),
        };
        let state = self.inner.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let server = match factory() {
                Ok(server) => server,
                Err(e) => {
                    error!("starting {kind} server failed: {e:#}");

                    // Revert only a claim we still own; a shutdown may have
                    // released the slot already, and another mode may have
                    // claimed it since.
                    let owned = {
                        let mut inner = state.lock().unwrap();
                        if inner.mode == kind.starting() {
                            inner.mode = ServiceMode::None;
                            true
                        } else {
                            false
                        }
                    };
                    if owned {
                        let _ = events.send(ModeEvent::StartFailed(kind, format!("{e:#}")));
                    }
                    return;
                }
            };

            let handle = server.handle();
            let server_task = tokio::spawn(server);

            let claimed = {
                let mut inner = state.lock().unwrap();
                if inner.mode == kind.starting() {
                    inner.handle = Some(handle.clone());
                    inner.mode = kind.steady();
                    true
                } else {
                    false
                }
            };

            if !claimed {
                // shut down while still starting, the bound listener must go
                handle.stop(true).await;
                let _ = server_task.await;
                return;
            }

            info!("{kind} server up");
            let _ = events.send(ModeEvent::Started(kind));

            match server_task.await {
                Ok(Err(e)) => error!("{kind} server terminated with error: {e}"),
                Err(e) => error!("{kind} server task panicked: {e}"),
                Ok(Ok(())) => {}
            }

            // The server exited on its own or via shutdown; release the slot
            // if we still own it.
            let mut inner = state.lock().unwrap();
            if inner.mode == kind.steady() {
                inner.mode = ServiceMode::None;
                inner.handle = None;
            }
        });

        Ok(())
    }

    async fn shutdown(&self, kind: ModeKind) -> Result<(), Error> {
        let handle = {
            let mut inner = self.inner.lock().unwrap();
            match inner.mode {
                ServiceMode::None => return Ok(()),
                mode if mode == kind.starting() => {
                    // No listener bound yet, the start task will stop the
                    // server once the bind completes.
                    inner.mode = ServiceMode::None;
                    inner.handle = None;
                    let _ = self.events.send(ModeEvent::Stopped(kind));
                    return Ok(());
                }
                mode if mode == kind.steady() => inner.handle.clone(),
                mode => return Err(Error::StateConflict(mode)),
            }
        };

        // Stop outside the lock: graceful shutdown waits for in-flight
        // requests to finish.
        if let Some(handle) = handle {
            handle.stop(true).await;
        }

        let mut inner = self.inner.lock().unwrap();
        if inner.mode == kind.steady() {
            inner.mode = ServiceMode::None;
            inner.handle = None;
        }
        drop(inner);

        info!("{kind} server stopped");
        let _ = self.events.send(ModeEvent::Stopped(kind));
        Ok(())
    }
}
