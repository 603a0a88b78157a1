//! Sync service: a task that owns the [`SyncEngine`].
//!
//! Callers hold a cloneable [`SyncService`] handle and talk to the engine
//! through command messages, so cache and settings state is only ever
//! touched by one task. Create one service per process at startup and pass
//! the handle to whoever needs it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::storage::Event;
use crate::sync::engine::{CacheReport, SettingsSyncReport, SyncEngine};
use crate::sync::provider::{CredentialStore, DocketSource};
use crate::sync::store::SharedStore;
use crate::sync::types::{CacheRecord, RefreshOutcome, SyncError, SyncResult, SyncStatus};

/// Pending commands before senders wait.
const COMMAND_QUEUE_SIZE: usize = 32;

/// Marks a refresh as running until dropped.
///
/// Travels inside the refresh command, so the flag clears whether the
/// refresh completes or the command is never delivered.
struct RefreshTicket(Arc<AtomicBool>);

impl Drop for RefreshTicket {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

enum Command {
    LoadCache {
        respond: oneshot::Sender<Option<CacheRecord>>,
    },
    InspectCache {
        respond: oneshot::Sender<CacheReport>,
    },
    RefreshCache {
        force: bool,
        ticket: RefreshTicket,
        respond: oneshot::Sender<SyncResult<RefreshOutcome>>,
    },
    LoadSettings {
        owner_id: String,
        respond: oneshot::Sender<SyncResult<Option<Value>>>,
    },
    SaveSettings {
        owner_id: String,
        blob: Value,
        respond: oneshot::Sender<SyncResult<SettingsSyncReport>>,
    },
    ResolveAndSync {
        owner_id: String,
        respond: oneshot::Sender<SyncResult<SettingsSyncReport>>,
    },
    DeleteSettings {
        owner_id: String,
        respond: oneshot::Sender<SyncResult<bool>>,
    },
    ListOwnerIds {
        respond: oneshot::Sender<SyncResult<Vec<String>>>,
    },
    Status {
        owner_id: String,
        respond: oneshot::Sender<SyncStatus>,
    },
    RecentEvents {
        subject: Option<String>,
        limit: u32,
        respond: oneshot::Sender<SyncResult<Vec<Event>>>,
    },
}

/// Handle to the sync service task.
#[derive(Debug, Clone)]
pub struct SyncService {
    tx: mpsc::Sender<Command>,
    refreshing: Arc<AtomicBool>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::LoadCache { .. } => "LoadCache",
            Self::InspectCache { .. } => "InspectCache",
            Self::RefreshCache { .. } => "RefreshCache",
            Self::LoadSettings { .. } => "LoadSettings",
            Self::SaveSettings { .. } => "SaveSettings",
            Self::ResolveAndSync { .. } => "ResolveAndSync",
            Self::DeleteSettings { .. } => "DeleteSettings",
            Self::ListOwnerIds { .. } => "ListOwnerIds",
            Self::Status { .. } => "Status",
            Self::RecentEvents { .. } => "RecentEvents",
        };
        f.write_str(name)
    }
}

/// Start the service task.
///
/// The task runs until every [`SyncService`] handle is dropped.
pub fn spawn<S, P, C>(engine: SyncEngine<S, P, C>) -> (SyncService, JoinHandle<()>)
where
    S: SharedStore + 'static,
    P: DocketSource + 'static,
    C: CredentialStore + 'static,
{
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
    let handle = tokio::spawn(run(engine, rx));
    let service = SyncService {
        tx,
        refreshing: Arc::new(AtomicBool::new(false)),
    };
    (service, handle)
}

async fn run<S, P, C>(mut engine: SyncEngine<S, P, C>, mut rx: mpsc::Receiver<Command>)
where
    S: SharedStore,
    P: DocketSource,
    C: CredentialStore,
{
    // Send failures mean the caller stopped waiting; the work is done regardless.
    while let Some(command) = rx.recv().await {
        debug!(?command, "Sync command");
        match command {
            Command::LoadCache { respond } => {
                let _ = respond.send(engine.load_cache());
            }
            Command::InspectCache { respond } => {
                let _ = respond.send(engine.inspect_cache());
            }
            Command::RefreshCache {
                force,
                ticket,
                respond,
            } => {
                let outcome = engine.refresh_cache(force).await;
                drop(ticket);
                let _ = respond.send(outcome);
            }
            Command::LoadSettings { owner_id, respond } => {
                let _ = respond.send(engine.load_settings(&owner_id));
            }
            Command::SaveSettings {
                owner_id,
                blob,
                respond,
            } => {
                let _ = respond.send(engine.save_settings(&owner_id, blob));
            }
            Command::ResolveAndSync { owner_id, respond } => {
                let _ = respond.send(engine.resolve_and_sync(&owner_id));
            }
            Command::DeleteSettings { owner_id, respond } => {
                let _ = respond.send(engine.delete_settings(&owner_id));
            }
            Command::ListOwnerIds { respond } => {
                let _ = respond.send(engine.list_owner_ids());
            }
            Command::Status { owner_id, respond } => {
                let _ = respond.send(engine.status(&owner_id));
            }
            Command::RecentEvents {
                subject,
                limit,
                respond,
            } => {
                let _ = respond.send(engine.recent_events(subject.as_deref(), limit));
            }
        }
    }
    debug!("Sync service stopped");
}

impl SyncService {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> SyncResult<T> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(make(respond))
            .await
            .map_err(|_| SyncError::ServiceStopped)?;
        rx.await.map_err(|_| SyncError::ServiceStopped)
    }

    /// Load the validated shared cache, or `None`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ServiceStopped`] if the service task is gone.
    pub async fn load_cache(&self) -> SyncResult<Option<CacheRecord>> {
        self.request(|respond| Command::LoadCache { respond }).await
    }

    /// Diagnostic classification of the shared cache.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ServiceStopped`] if the service task is gone.
    pub async fn inspect_cache(&self) -> SyncResult<CacheReport> {
        self.request(|respond| Command::InspectCache { respond }).await
    }

    /// Refresh the shared cache.
    ///
    /// Returns [`RefreshOutcome::AlreadyRunning`] without queueing if a
    /// refresh started from any handle is still in progress.
    ///
    /// # Errors
    ///
    /// Returns the refresh error, or [`SyncError::ServiceStopped`].
    pub async fn refresh_cache(&self, force: bool) -> SyncResult<RefreshOutcome> {
        if self.refreshing.swap(true, Ordering::AcqRel) {
            debug!("Refresh already running");
            return Ok(RefreshOutcome::AlreadyRunning);
        }
        let ticket = RefreshTicket(Arc::clone(&self.refreshing));
        self.request(|respond| Command::RefreshCache {
            force,
            ticket,
            respond,
        })
        .await?
    }

    /// Whether a refresh is currently in progress.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    /// Settings for an owner, local copy first.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid owner ID, a local database failure,
    /// or [`SyncError::ServiceStopped`].
    pub async fn load_settings(&self, owner_id: &str) -> SyncResult<Option<Value>> {
        let owner_id = owner_id.to_string();
        self.request(|respond| Command::LoadSettings { owner_id, respond })
            .await?
    }

    /// Save a user edit locally and publish it.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid owner ID, a local write failure, or
    /// [`SyncError::ServiceStopped`].
    pub async fn save_settings(&self, owner_id: &str, blob: Value) -> SyncResult<SettingsSyncReport> {
        let owner_id = owner_id.to_string();
        self.request(|respond| Command::SaveSettings {
            owner_id,
            blob,
            respond,
        })
        .await?
    }

    /// Reconcile local and shared settings for an owner.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid owner ID, a local database failure,
    /// or [`SyncError::ServiceStopped`].
    pub async fn resolve_and_sync(&self, owner_id: &str) -> SyncResult<SettingsSyncReport> {
        let owner_id = owner_id.to_string();
        self.request(|respond| Command::ResolveAndSync { owner_id, respond })
            .await?
    }

    /// Remove an owner's settings locally and on the shared volume.
    ///
    /// # Errors
    ///
    /// Returns an error if either removal fails, or
    /// [`SyncError::ServiceStopped`].
    pub async fn delete_settings(&self, owner_id: &str) -> SyncResult<bool> {
        let owner_id = owner_id.to_string();
        self.request(|respond| Command::DeleteSettings { owner_id, respond })
            .await?
    }

    /// Owners known locally or on the shared volume.
    ///
    /// # Errors
    ///
    /// Returns an error if the local database fails, or
    /// [`SyncError::ServiceStopped`].
    pub async fn list_owner_ids(&self) -> SyncResult<Vec<String>> {
        self.request(|respond| Command::ListOwnerIds { respond })
            .await?
    }

    /// Current session status for an owner.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::ServiceStopped`] if the service task is gone.
    pub async fn status(&self, owner_id: &str) -> SyncResult<SyncStatus> {
        let owner_id = owner_id.to_string();
        self.request(|respond| Command::Status { owner_id, respond })
            .await
    }

    /// Recent audit events, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the local database fails, or
    /// [`SyncError::ServiceStopped`].
    pub async fn recent_events(&self, subject: Option<&str>, limit: u32) -> SyncResult<Vec<Event>> {
        let subject = subject.map(str::to_string);
        self.request(|respond| Command::RecentEvents {
            subject,
            limit,
            respond,
        })
        .await?
    }
}
