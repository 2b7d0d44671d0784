//! Shared, reference-counted Metabase sessions.
//!
//! A [`SessionManager`] owns one authenticated [`Session`] per
//! `(host, port, username)`. Facades hold a [`SessionHandle`]; cloning a handle
//! takes a reference and dropping it gives the reference back. A session whose
//! count reaches zero is not destroyed right away: a periodic sweep evicts it
//! once its token has expired and the release grace period has passed.
//!
//! # Session creation
//!
//! Lookups of a valid session only take the registry's read lock. Creating a
//! session goes through a per-key async gate, so concurrent first-time
//! acquisitions for one key authenticate exactly once while other keys proceed
//! independently.

use crate::cache::MetadataCache;
use crate::catalog::CatalogLoader;
use crate::config::{ClientConfig, ManagerConfig};
use crate::error::{ClientError, Operation, Result};
use crate::executor::{HttpExecutor, RetryPolicy};
use crate::headers;
use crate::types::{SessionRequest, SessionResponse};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Identity under which sessions are shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub host: String,
    pub port: u16,
    pub username: String,
}

impl SessionKey {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
        }
    }
}

impl From<&ClientConfig> for SessionKey {
    fn from(config: &ClientConfig) -> Self {
        Self::new(config.host.clone(), config.port, config.username.clone())
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

#[derive(Debug, Default)]
struct RefState {
    count: usize,
    last_release: Option<Instant>,
}

/// An authenticated session and the catalog cache that belongs to it.
pub struct Session {
    key: SessionKey,
    base_url: String,
    token: String,
    created_at: Instant,
    token_ttl: Duration,
    refs: Mutex<RefState>,
    metadata: MetadataCache,
}

impl Session {
    fn new(
        key: SessionKey,
        base_url: String,
        token: String,
        token_ttl: Duration,
        metadata: MetadataCache,
    ) -> Self {
        Self {
            key,
            base_url,
            token,
            created_at: Instant::now(),
            token_ttl,
            refs: Mutex::new(RefState::default()),
            metadata,
        }
    }

    /// True while the token is younger than the token TTL.
    pub fn is_valid(&self) -> bool {
        self.created_at.elapsed() < self.token_ttl
    }

    pub fn ref_count(&self) -> usize {
        self.refs.lock().count
    }

    fn retain(&self) {
        self.refs.lock().count += 1;
    }

    fn release(&self) {
        let mut refs = self.refs.lock();
        refs.count = refs.count.saturating_sub(1);
        refs.last_release = Some(Instant::now());
    }

    /// Unreferenced, expired, and idle for longer than `grace`.
    fn is_evictable(&self, grace: Duration) -> bool {
        let refs = self.refs.lock();
        if refs.count > 0 || self.is_valid() {
            return false;
        }
        refs.last_release.unwrap_or(self.created_at).elapsed() > grace
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let refs = self.refs.lock();
        f.debug_struct("Session")
            .field("key", &self.key)
            .field("base_url", &self.base_url)
            .field("token", &"***REDACTED***")
            .field("age", &self.created_at.elapsed())
            .field("ref_count", &refs.count)
            .field("last_release", &refs.last_release)
            .finish()
    }
}

/// One counted reference to a shared [`Session`].
///
/// Cloning takes another reference; dropping gives it back.
pub struct SessionHandle {
    session: Arc<Session>,
}

impl SessionHandle {
    /// Wrap `session`, taking a reference on it.
    fn retained(session: Arc<Session>) -> Self {
        session.retain();
        Self { session }
    }

    pub fn key(&self) -> &SessionKey {
        &self.session.key
    }

    /// Base URL of the server, e.g. `https://metabase.example.com:443`.
    pub fn base_url(&self) -> &str {
        &self.session.base_url
    }

    /// Value for the session header. Never log this.
    pub fn token(&self) -> &str {
        &self.session.token
    }

    pub fn is_valid(&self) -> bool {
        self.session.is_valid()
    }

    /// References currently held on the session, this one included.
    pub fn ref_count(&self) -> usize {
        self.session.ref_count()
    }

    /// The session's shared catalog cache.
    pub fn metadata(&self) -> &MetadataCache {
        &self.session.metadata
    }

    /// True if both handles point to the same session.
    pub fn same_session(&self, other: &SessionHandle) -> bool {
        Arc::ptr_eq(&self.session, &other.session)
    }
}

impl Clone for SessionHandle {
    fn clone(&self) -> Self {
        Self::retained(Arc::clone(&self.session))
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.session.release();
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionHandle").field(&self.session).finish()
    }
}

struct ManagerInner {
    config: ManagerConfig,
    executor: HttpExecutor,
    sessions: RwLock<HashMap<SessionKey, Arc<Session>>>,
    gates: Mutex<HashMap<SessionKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl ManagerInner {
    /// Hand out a reference to the registered session if its token is still valid.
    fn lookup(&self, key: &SessionKey) -> Option<SessionHandle> {
        let sessions = self.sessions.read();
        // Retained under the read lock so a concurrent sweep cannot evict it first.
        let handle = sessions
            .get(key)
            .filter(|session| session.is_valid())
            .map(|session| SessionHandle::retained(Arc::clone(session)));
        handle
    }

    fn gate(&self, key: &SessionKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut gates = self.gates.lock();
        Arc::clone(gates.entry(key.clone()).or_default())
    }

    fn sweep(&self) -> usize {
        let grace = self.config.release_grace;
        let mut evicted = 0;
        {
            let mut sessions = self.sessions.write();
            sessions.retain(|key, session| {
                if session.is_evictable(grace) {
                    tracing::info!(session = %key, "Evicting idle session");
                    evicted += 1;
                    false
                } else {
                    true
                }
            });
        }
        // A gate nobody else holds is recreated on demand.
        self.gates.lock().retain(|_, gate| Arc::strong_count(gate) > 1);
        evicted
    }

    async fn authenticate(&self, config: &ClientConfig) -> Result<String> {
        let url = format!("{}/api/session", config.base_url());
        let body = SessionRequest {
            username: &config.username,
            password: &config.password,
            client_info: headers::client_info(),
        };
        let request = self
            .executor
            .http()
            .post(&url)
            .json(&body)
            .build()
            .map_err(|e| ClientError::Config(format!("Invalid session URL {}: {}", url, e)))?;
        let policy = RetryPolicy::new(
            config.auth_timeout,
            config.max_retries,
            config.auth_retry_delay,
        );

        let response = self
            .executor
            .execute(Operation::Authentication, request, &policy, None)
            .await?;
        let status = response.status;
        let bytes = response.body;

        if !status.is_success() {
            tracing::warn!(
                host = %config.host,
                status = status.as_u16(),
                "Authentication rejected"
            );
            return Err(ClientError::Authentication {
                message: format!("HTTP {}: {}", status.as_u16(), String::from_utf8_lossy(&bytes)),
            });
        }

        let parsed: SessionResponse =
            serde_json::from_slice(&bytes).map_err(|e| ClientError::Authentication {
                message: format!("failed to parse response: {}", e),
            })?;
        match parsed.id {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(ClientError::Authentication {
                message: "response does not contain a session token".to_string(),
            }),
        }
    }
}

/// Registry of shared sessions.
///
/// Construct one per process and pass it (usually as `Arc<SessionManager>`)
/// to every [`MetabaseClient`](crate::MetabaseClient).
pub struct SessionManager {
    inner: Arc<ManagerInner>,
    sweeper: Option<JoinHandle<()>>,
}

impl SessionManager {
    /// Create a manager and, when called inside a tokio runtime, start its sweeper.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        if config.sweep_interval.is_zero() {
            return Err(ClientError::Config(
                "sweep_interval must be greater than zero".to_string(),
            ));
        }

        let executor = HttpExecutor::new(&config)?;
        let inner = Arc::new(ManagerInner {
            config,
            executor,
            sessions: RwLock::new(HashMap::new()),
            gates: Mutex::new(HashMap::new()),
        });

        let sweeper = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(run_sweeper(
                Arc::downgrade(&inner),
                inner.config.sweep_interval,
            ))),
            Err(_) => {
                tracing::debug!("No tokio runtime, session sweeper not started");
                None
            }
        };

        Ok(Self { inner, sweeper })
    }

    /// Return a reference to the shared session for `config`, authenticating if needed.
    ///
    /// Sessions are keyed by host, port and username only. The password is
    /// checked when a session is created; while a valid session exists for
    /// the key, later callers join it whatever password they carry.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Authentication`] when the server rejects the credentials
    /// - [`ClientError::TransientNetwork`] when every attempt failed in transport
    pub async fn acquire(&self, config: &ClientConfig) -> Result<SessionHandle> {
        let key = SessionKey::from(config);
        if let Some(handle) = self.inner.lookup(&key) {
            tracing::debug!(session = %key, refs = handle.ref_count(), "Reusing session");
            return Ok(handle);
        }

        let gate = self.inner.gate(&key);
        let _creating = gate.lock().await;

        // Someone else may have created it while we waited on the gate.
        if let Some(handle) = self.inner.lookup(&key) {
            return Ok(handle);
        }

        let start = Instant::now();
        let token = self.inner.authenticate(config).await?;
        let base_url = config.base_url();
        let loader = CatalogLoader::new(
            self.inner.executor.clone(),
            base_url.clone(),
            token.clone(),
            RetryPolicy::new(config.metadata_timeout, config.max_retries, config.retry_delay),
        );
        let metadata = MetadataCache::new(
            loader,
            self.inner.config.cache_capacity,
            self.inner.config.metadata_ttl,
        );
        let session = Arc::new(Session::new(
            key.clone(),
            base_url,
            token,
            self.inner.config.token_ttl,
            metadata,
        ));
        let handle = SessionHandle::retained(Arc::clone(&session));

        // Replaces an expired session for the key; its holders keep their own Arc.
        self.inner.sessions.write().insert(key.clone(), session);
        tracing::info!(
            session = %key,
            duration_ms = start.elapsed().as_millis() as u64,
            "Session created"
        );
        Ok(handle)
    }

    /// Give back a reference obtained from [`acquire`](Self::acquire).
    ///
    /// The session stays registered until the sweep finds it expired and idle.
    pub fn release(&self, handle: SessionHandle) {
        tracing::debug!(
            session = %handle.key(),
            refs = handle.ref_count().saturating_sub(1),
            "Releasing session"
        );
        drop(handle);
    }

    /// Run one sweep now. Returns the number of evicted sessions.
    pub fn sweep_expired(&self) -> usize {
        self.inner.sweep()
    }

    /// Number of registered sessions, valid or not.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.read().len()
    }

    /// The pooled HTTP executor shared by every session.
    pub fn executor(&self) -> &HttpExecutor {
        &self.inner.executor
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
    }
}

impl fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.inner.config)
            .field("sessions", &self.session_count())
            .field("sweeper", &self.sweeper.is_some())
            .finish()
    }
}

async fn run_sweeper(inner: Weak<ManagerInner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let evicted = inner.sweep();
        if evicted > 0 {
            tracing::debug!(evicted, "Session sweep finished");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(config: ManagerConfig) -> SessionManager {
        SessionManager::new(config).unwrap()
    }

    fn fake_session(manager: &SessionManager, key: SessionKey, token_ttl: Duration) -> Arc<Session> {
        let loader = CatalogLoader::new(
            manager.executor().clone(),
            "http://127.0.0.1:9".to_string(),
            "token".to_string(),
            RetryPolicy::new(Duration::from_secs(1), 1, Duration::ZERO),
        );
        Arc::new(Session::new(
            key,
            "http://127.0.0.1:9".to_string(),
            "token".to_string(),
            token_ttl,
            MetadataCache::new(loader, 8, Duration::from_secs(60)),
        ))
    }

    fn register(manager: &SessionManager, session: &Arc<Session>) {
        manager
            .inner
            .sessions
            .write()
            .insert(session.key.clone(), Arc::clone(session));
    }

    #[test]
    fn test_key_from_config() {
        let config = ClientConfig::builder("bi.example.com", "analyst", "pw")
            .port(3000)
            .build()
            .unwrap();
        let key = SessionKey::from(&config);
        assert_eq!(key, SessionKey::new("bi.example.com", 3000, "analyst"));
        assert_eq!(key.to_string(), "analyst@bi.example.com:3000");
    }

    #[test]
    fn test_zero_sweep_interval_rejected() {
        let config = ManagerConfig {
            sweep_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(matches!(
            SessionManager::new(config),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_manager_without_runtime_has_no_sweeper() {
        let manager = manager(ManagerConfig::default());
        assert!(manager.sweeper.is_none());
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_handle_ref_counting() {
        let manager = manager(ManagerConfig::default());
        let session = fake_session(&manager, SessionKey::new("h", 1, "u"), Duration::from_secs(60));

        let first = SessionHandle::retained(Arc::clone(&session));
        let second = first.clone();
        assert_eq!(session.ref_count(), 2);
        assert!(first.same_session(&second));

        manager.release(second);
        assert_eq!(session.ref_count(), 1);
        drop(first);
        assert_eq!(session.ref_count(), 0);
        assert!(session.refs.lock().last_release.is_some());
    }

    #[tokio::test]
    async fn test_release_never_goes_negative() {
        let manager = manager(ManagerConfig::default());
        let session = fake_session(&manager, SessionKey::new("h", 1, "u"), Duration::from_secs(60));

        session.release();
        session.release();
        assert_eq!(session.ref_count(), 0);

        let handle = SessionHandle::retained(Arc::clone(&session));
        assert_eq!(handle.ref_count(), 1);
    }

    #[tokio::test]
    async fn test_lookup_skips_expired_session() {
        let manager = manager(ManagerConfig::default());
        let key = SessionKey::new("h", 1, "u");
        let expired = fake_session(&manager, key.clone(), Duration::ZERO);
        register(&manager, &expired);

        assert!(manager.inner.lookup(&key).is_none());
        assert_eq!(expired.ref_count(), 0);
    }

    #[tokio::test]
    async fn test_lookup_retains_valid_session() {
        let manager = manager(ManagerConfig::default());
        let key = SessionKey::new("h", 1, "u");
        let session = fake_session(&manager, key.clone(), Duration::from_secs(60));
        register(&manager, &session);

        let handle = manager.inner.lookup(&key).unwrap();
        assert_eq!(handle.ref_count(), 1);
        assert_eq!(handle.token(), "token");
    }

    #[tokio::test]
    async fn test_sweep_evicts_only_idle_expired_sessions() {
        let manager = manager(ManagerConfig {
            release_grace: Duration::ZERO,
            ..Default::default()
        });

        let held = fake_session(&manager, SessionKey::new("h", 1, "held"), Duration::ZERO);
        let valid = fake_session(&manager, SessionKey::new("h", 1, "valid"), Duration::from_secs(60));
        let idle = fake_session(&manager, SessionKey::new("h", 1, "idle"), Duration::ZERO);
        for session in [&held, &valid, &idle] {
            register(&manager, session);
        }
        let _holder = SessionHandle::retained(Arc::clone(&held));
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(manager.sweep_expired(), 1);
        assert_eq!(manager.session_count(), 2);
        assert!(manager
            .inner
            .sessions
            .read()
            .contains_key(&SessionKey::new("h", 1, "held")));
    }

    #[tokio::test]
    async fn test_sweep_respects_release_grace() {
        let manager = manager(ManagerConfig {
            release_grace: Duration::from_secs(60),
            ..Default::default()
        });
        let session = fake_session(&manager, SessionKey::new("h", 1, "u"), Duration::ZERO);
        register(&manager, &session);
        drop(SessionHandle::retained(Arc::clone(&session)));

        assert_eq!(manager.sweep_expired(), 0);
        assert_eq!(manager.session_count(), 1);
    }

    #[tokio::test]
    async fn test_background_sweeper_runs() {
        let manager = manager(ManagerConfig {
            sweep_interval: Duration::from_millis(50),
            release_grace: Duration::ZERO,
            ..Default::default()
        });
        assert!(manager.sweeper.is_some());
        let session = fake_session(&manager, SessionKey::new("h", 1, "u"), Duration::ZERO);
        register(&manager, &session);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(manager.session_count(), 0);
    }

    #[tokio::test]
    async fn test_unused_gates_are_dropped_by_sweep() {
        let manager = manager(ManagerConfig::default());
        let key = SessionKey::new("h", 1, "u");
        let held = manager.inner.gate(&key);
        drop(manager.inner.gate(&SessionKey::new("h", 1, "other")));

        manager.sweep_expired();
        let gates = manager.inner.gates.lock();
        assert_eq!(gates.len(), 1);
        assert!(gates.contains_key(&key));
        drop(held);
    }

    #[test]
    fn test_session_debug_hides_token() {
        let manager = manager(ManagerConfig::default());
        let session = fake_session(&manager, SessionKey::new("h", 1, "u"), Duration::from_secs(60));
        let debug_output = format!("{:?}", session);
        assert!(!debug_output.contains("\"token\""));
        assert!(debug_output.contains("REDACTED"));
    }
}
