use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use projehub_core::storage::{EmbeddedStore, RelationalStore, SqliteKeyValueStore};
use projehub_core::{
    Authenticator, BatchSettings, Error, IngestPipeline, Owner, Principal, ProjectHub,
    ProjectStore,
};
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::config::{Backend, ServerConfig};

/// Unique identifier for a session
pub type SessionId = Uuid;

/// A hub locked per session, so one slow request never blocks other sessions.
pub type SharedHub = Arc<Mutex<ProjectHub>>;

/// How long sessions live and how many are kept at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    pub idle_timeout: Duration,
    pub max_sessions: usize,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::minutes(30),
            max_sessions: 1024,
        }
    }
}

/// A browser connection and its view state.
///
/// The hub is built on first use, and only once the session may see
/// projects: always for the embedded backend, after sign-in for the
/// relational one.
pub struct Session {
    pub id: SessionId,
    pub principal: Option<Principal>,
    hub: Option<SharedHub>,
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

impl Session {
    fn new(id: SessionId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            principal: None,
            hub: None,
            created_at: now,
            last_seen: now,
        }
    }
}

/// Owns every session and hands out their hubs.
pub struct SessionManager {
    store: Arc<dyn ProjectStore>,
    requires_sign_in: bool,
    limits: SessionLimits,
    sessions: HashMap<SessionId, Session>,
}

impl SessionManager {
    pub fn new(store: Arc<dyn ProjectStore>, requires_sign_in: bool) -> Self {
        Self {
            store,
            requires_sign_in,
            limits: SessionLimits::default(),
            sessions: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_limits(mut self, limits: SessionLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Resume the session behind a presented id, or issue a new one.
    ///
    /// Returns the id to use and whether it was newly issued. Ids the server
    /// does not know are never adopted.
    pub fn resume_or_issue(&mut self, presented: Option<SessionId>) -> (SessionId, bool) {
        let now = Utc::now();
        self.evict_idle(now);

        if let Some(session) = presented.and_then(|id| self.sessions.get_mut(&id)) {
            session.last_seen = now;
            return (session.id, false);
        }

        (self.issue(now), true)
    }

    fn issue(&mut self, now: DateTime<Utc>) -> SessionId {
        while self.sessions.len() >= self.limits.max_sessions.max(1) {
            let Some(oldest) = self
                .sessions
                .values()
                .min_by_key(|s| s.last_seen)
                .map(|s| s.id)
            else {
                break;
            };
            self.sessions.remove(&oldest);
            tracing::debug!(session_id = %oldest, "evicted least recently used session");
        }

        let id = Uuid::new_v4();
        self.sessions.insert(id, Session::new(id, now));
        id
    }

    /// Drop sessions idle for longer than the configured timeout.
    pub fn evict_idle(&mut self, now: DateTime<Utc>) -> usize {
        let timeout = self.limits.idle_timeout;
        let before = self.sessions.len();
        self.sessions.retain(|_, s| now - s.last_seen <= timeout);

        let evicted = before - self.sessions.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.sessions.len(), "evicted idle sessions");
        }
        evicted
    }

    pub fn get_session(&self, session_id: SessionId) -> Option<&Session> {
        self.sessions.get(&session_id)
    }

    #[must_use]
    pub fn is_authenticated(&self, session_id: SessionId) -> bool {
        self.sessions
            .get(&session_id)
            .is_some_and(|s| !self.requires_sign_in || s.principal.is_some())
    }

    /// The session's hub, or `Unauthenticated` when it may not see projects.
    pub fn hub(&mut self, session_id: SessionId) -> Result<SharedHub, Error> {
        let store = &self.store;
        let requires_sign_in = self.requires_sign_in;
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or(Error::Unauthenticated)?;

        if let Some(hub) = &session.hub {
            return Ok(Arc::clone(hub));
        }

        let owner = match (&session.principal, requires_sign_in) {
            (Some(principal), _) => principal.owner(),
            (None, false) => Owner::Local,
            (None, true) => return Err(Error::Unauthenticated),
        };
        let hub = Arc::new(Mutex::new(ProjectHub::new(Arc::clone(store), owner)));
        session.hub = Some(Arc::clone(&hub));
        Ok(hub)
    }

    /// Attach a principal under a freshly issued id and drop the old session.
    ///
    /// The id a client held before signing in never becomes authenticated.
    pub fn sign_in(&mut self, session_id: SessionId, principal: Principal) -> SessionId {
        self.sessions.remove(&session_id);

        let id = self.issue(Utc::now());
        if let Some(session) = self.sessions.get_mut(&id) {
            session.principal = Some(principal);
        }
        id
    }

    pub fn sign_out(&mut self, session_id: SessionId) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.principal = None;
            session.hub = None;
        }
    }
}

/// Application state shared across all requests
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<RwLock<SessionManager>>,
    pub store: Arc<dyn ProjectStore>,
    pub authenticator: Option<Arc<dyn Authenticator>>,
    pub pipeline: Arc<IngestPipeline>,
    pub config: ServerConfig,
}

impl AppState {
    /// Open the configured backend and seed the admin account if one is set.
    pub async fn new(config: ServerConfig) -> anyhow::Result<Self> {
        if let Some(parent) = config.db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db_path = config.db_path.to_string_lossy().to_string();

        let state = match config.backend {
            Backend::Embedded => {
                let kv = SqliteKeyValueStore::open(&db_path).await?;
                let store = EmbeddedStore::new(Arc::new(kv));
                Self::with_store(config, Arc::new(store), None)
            }
            Backend::Relational => {
                let batching = BatchSettings {
                    policy: config.batch_policy,
                    ..BatchSettings::default()
                };
                let store = RelationalStore::open(&db_path).await?.with_batching(batching);
                let store = Arc::new(store);
                let authenticator: Arc<dyn Authenticator> = store.clone();
                Self::with_store(config, store, Some(authenticator))
            }
        };

        state.seed_admin().await?;

        tracing::info!(backend = ?state.config.backend, db = %db_path, "opened project store");

        Ok(state)
    }

    pub fn with_store(
        config: ServerConfig,
        store: Arc<dyn ProjectStore>,
        authenticator: Option<Arc<dyn Authenticator>>,
    ) -> Self {
        let sessions = SessionManager::new(Arc::clone(&store), config.backend.requires_sign_in())
            .with_limits(config.session_limits());
        Self {
            sessions: Arc::new(RwLock::new(sessions)),
            store,
            authenticator,
            pipeline: Arc::new(IngestPipeline::new().with_options(config.ingest_options())),
            config,
        }
    }

    /// The session's hub. The manager lock is released before this returns.
    pub async fn hub(&self, session_id: SessionId) -> Result<SharedHub, Error> {
        self.sessions.write().await.hub(session_id)
    }

    async fn seed_admin(&self) -> anyhow::Result<()> {
        let (Some(authenticator), Some((email, password))) =
            (&self.authenticator, &self.config.admin)
        else {
            return Ok(());
        };

        match authenticator.register(email, password).await {
            Ok(principal) => tracing::info!(email = %principal.email, "seeded admin account"),
            Err(Error::DuplicateAccount(email)) => {
                tracing::debug!(%email, "admin account already exists");
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }
}
