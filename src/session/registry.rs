//! Session registry: get-or-create with at-most-one construction per id.
//!
//! A lookup first takes the read lock. On a miss it takes the write lock,
//! rechecks, and installs a pending slot whose construction runs on its own
//! task. Every caller for that id awaits the same shared outcome, so the
//! connect-and-build sequence runs once and failures reach everyone
//! identically. Construction of one session never holds the registry lock,
//! so unrelated sessions are not serialized behind it.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{RegenerationBridge, Session};
use crate::codegen::BindingGenerator;
use crate::config::{GatewayConfig, ProviderConfig, RegistryOptions};
use crate::error::{CleanupFailure, GatewayError, Result};
use crate::hub::ClientHub;
use crate::provider::ProviderConnector;
use crate::workspace::BundleWorkspace;

type Outcome = std::result::Result<Arc<Session>, Arc<GatewayError>>;
type SharedOutcome = Shared<BoxFuture<'static, Outcome>>;

enum SessionSlot {
    Ready(Arc<Session>),
    Pending {
        attempt: u64,
        cancel: CancellationToken,
        outcome: SharedOutcome,
    },
}

struct RegistryShared {
    sessions: RwLock<HashMap<String, SessionSlot>>,
    providers: BTreeMap<String, ProviderConfig>,
    connector: Arc<dyn ProviderConnector>,
    generator: Arc<dyn BindingGenerator>,
    options: RegistryOptions,
    attempts: AtomicU64,
}

/// Map of session id to live session.
///
/// Cheap to clone; clones share the same sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    shared: Arc<RegistryShared>,
}

impl SessionRegistry {
    pub fn new(
        config: GatewayConfig,
        connector: Arc<dyn ProviderConnector>,
        generator: Arc<dyn BindingGenerator>,
        options: RegistryOptions,
    ) -> Self {
        Self {
            shared: Arc::new(RegistryShared {
                sessions: RwLock::new(HashMap::new()),
                providers: config.mcp_servers,
                connector,
                generator,
                options,
                attempts: AtomicU64::new(0),
            }),
        }
    }

    /// Return the session for `session_id`, building it on first access.
    ///
    /// Concurrent first callers share one construction and observe the same
    /// session or the same [`GatewayError::SessionInit`] error.
    pub async fn get_or_create(&self, session_id: &str) -> Result<Arc<Session>> {
        let pending = {
            let sessions = self.shared.sessions.read().await;
            match sessions.get(session_id) {
                Some(SessionSlot::Ready(session)) => {
                    session.touch();
                    return Ok(Arc::clone(session));
                }
                Some(SessionSlot::Pending { outcome, .. }) => Some(outcome.clone()),
                None => None,
            }
        };

        let outcome = match pending {
            Some(outcome) => outcome,
            None => match self.claim(session_id).await {
                Ok(session) => return Ok(session),
                Err(outcome) => outcome,
            },
        };

        let session = outcome.await.map_err(|source| GatewayError::SessionInit {
            session_id: session_id.to_owned(),
            source,
        })?;
        session.touch();
        Ok(session)
    }

    /// Write-locked recheck. Returns a ready session, or the outcome to await.
    async fn claim(&self, session_id: &str) -> std::result::Result<Arc<Session>, SharedOutcome> {
        let mut sessions = self.shared.sessions.write().await;
        match sessions.get(session_id) {
            Some(SessionSlot::Ready(session)) => {
                session.touch();
                return Ok(Arc::clone(session));
            }
            Some(SessionSlot::Pending { outcome, .. }) => return Err(outcome.clone()),
            None => {}
        }

        let attempt = self.shared.attempts.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(construct(
            Arc::clone(&self.shared),
            session_id.to_owned(),
            attempt,
            cancel.clone(),
        ));
        let outcome: SharedOutcome = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join) => Err(Arc::new(GatewayError::InvalidState(format!(
                    "session construction task failed: {join}"
                )))),
            }
        }
        .boxed()
        .shared();

        sessions.insert(
            session_id.to_owned(),
            SessionSlot::Pending {
                attempt,
                cancel,
                outcome: outcome.clone(),
            },
        );
        debug!(session_id, attempt, "session construction started");
        Err(outcome)
    }

    /// Look up a published session. Never constructs.
    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        match self.shared.sessions.read().await.get(session_id) {
            Some(SessionSlot::Ready(session)) => Some(Arc::clone(session)),
            _ => None,
        }
    }

    /// Tear down and remove one session.
    ///
    /// The entry is removed even when part of the teardown fails; those
    /// failures come back as [`GatewayError::CleanupFailed`].
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        let mut sessions = self.shared.sessions.write().await;
        let session = match sessions.get(session_id) {
            Some(SessionSlot::Ready(session)) => Arc::clone(session),
            _ => return Err(GatewayError::NotFound(format!("session '{session_id}'"))),
        };

        let result = session.shutdown().await;
        sessions.remove(session_id);
        match &result {
            Ok(()) => info!(session_id, "session deleted"),
            Err(error) => warn!(session_id, error = %error, "session deleted with cleanup errors"),
        }
        result
    }

    /// Tear down every session and empty the registry.
    ///
    /// In-flight constructions are cancelled; they release whatever they had
    /// acquired on their own task.
    pub async fn close_all(&self) -> Result<()> {
        let mut sessions = self.shared.sessions.write().await;
        let mut drained: Vec<(String, SessionSlot)> = sessions.drain().collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));

        let mut failures = Vec::new();
        for (session_id, slot) in drained {
            match slot {
                SessionSlot::Ready(session) => {
                    if let Err(error) = session.shutdown().await {
                        warn!(session_id = %session_id, error = %error, "session cleanup failed");
                        failures.push(CleanupFailure::new(session_id, error.to_string()));
                    }
                }
                SessionSlot::Pending { cancel, .. } => {
                    debug!(session_id = %session_id, "cancelling pending session");
                    cancel.cancel();
                }
            }
        }
        info!(failed = failures.len(), "all sessions closed");
        GatewayError::from_cleanup(failures)
    }

    /// Delete every session idle for longer than `max_idle`.
    ///
    /// Returns the evicted ids. Evicted sessions are gone even when the
    /// result is a cleanup error.
    pub async fn evict_idle(&self, max_idle: Duration) -> Result<Vec<String>> {
        let mut sessions = self.shared.sessions.write().await;
        let mut idle: Vec<String> = sessions
            .iter()
            .filter_map(|(id, slot)| match slot {
                SessionSlot::Ready(session) if session.idle_duration() > max_idle => {
                    Some(id.clone())
                }
                _ => None,
            })
            .collect();
        idle.sort();

        let mut failures = Vec::new();
        for session_id in &idle {
            if let Some(SessionSlot::Ready(session)) = sessions.remove(session_id) {
                if let Err(error) = session.shutdown().await {
                    failures.push(CleanupFailure::new(session_id.clone(), error.to_string()));
                }
            }
        }
        if !idle.is_empty() {
            info!(evicted = idle.len(), "idle sessions evicted");
        }
        GatewayError::from_cleanup(failures).map(|()| idle)
    }

    /// Published session ids, sorted.
    pub async fn session_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .shared
            .sessions
            .read()
            .await
            .iter()
            .filter(|(_, slot)| matches!(slot, SessionSlot::Ready(_)))
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Number of published sessions.
    pub async fn len(&self) -> usize {
        self.shared
            .sessions
            .read()
            .await
            .values()
            .filter(|slot| matches!(slot, SessionSlot::Ready(_)))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Build a session and publish it if its slot is still the one we claimed.
async fn construct(
    shared: Arc<RegistryShared>,
    session_id: String,
    attempt: u64,
    cancel: CancellationToken,
) -> Outcome {
    let built = build_session(&shared, &session_id, &cancel).await;

    let mut sessions = shared.sessions.write().await;
    let claimed = matches!(
        sessions.get(&session_id),
        Some(SessionSlot::Pending { attempt: current, .. }) if *current == attempt
    );

    match built {
        Ok(session) if claimed && !cancel.is_cancelled() => {
            sessions.insert(session_id.clone(), SessionSlot::Ready(Arc::clone(&session)));
            info!(session_id = %session_id, providers = shared.providers.len(), "session created");
            Ok(session)
        }
        Ok(session) => {
            if claimed {
                sessions.remove(&session_id);
            }
            drop(sessions);
            if let Err(error) = session.shutdown().await {
                warn!(session_id = %session_id, error = %error, "cleanup of abandoned session failed");
            }
            Err(Arc::new(GatewayError::Cancelled(format!(
                "session '{session_id}' was closed during construction"
            ))))
        }
        Err(error) => {
            if claimed {
                sessions.remove(&session_id);
            }
            warn!(session_id = %session_id, error = %error, "session construction failed");
            Err(Arc::new(error))
        }
    }
}

async fn build_session(
    shared: &RegistryShared,
    session_id: &str,
    cancel: &CancellationToken,
) -> Result<Arc<Session>> {
    let hub = ClientHub::new();
    if let Err(error) = hub
        .connect(shared.connector.as_ref(), &shared.providers, cancel)
        .await
    {
        release_hub(&hub, session_id).await;
        return Err(error);
    }

    if cancel.is_cancelled() {
        release_hub(&hub, session_id).await;
        return Err(GatewayError::Cancelled(format!(
            "session '{session_id}' was closed during construction"
        )));
    }

    let built = BundleWorkspace::build(
        &shared.options.workspace_root,
        session_id,
        &hub.list_tools(),
        shared.generator.as_ref(),
        &shared.options.bundler_config,
    )
    .await;
    let (workspace, artifacts) = match built {
        Ok(built) => built,
        Err(error) => {
            release_hub(&hub, session_id).await;
            return Err(error);
        }
    };

    let session = Arc::new(Session::new(
        session_id,
        hub,
        workspace,
        artifacts,
        cancel.clone(),
    ));
    let bridge = RegenerationBridge::new(&session, Arc::clone(&shared.generator));
    session
        .hub()
        .set_catalog_changed_callback(bridge.into_callback());
    Ok(session)
}

async fn release_hub(hub: &ClientHub, session_id: &str) {
    if let Err(error) = hub.close().await {
        warn!(session_id, error = %error, "failed to release hub after construction failure");
    }
}
