//! Registry of authenticated sessions, keyed by opaque token.
//!
//! One registry exists per process. The lifecycle coordinator creates it from
//! the resolved configuration and hands the same `Arc` to the providers and the
//! request layer.
//!
//! # Expiry
//!
//! Sessions idle for longer than `api-session-timeout` minutes (default 60)
//! expire. `0` disables expiry. Expired sessions are removed by a background
//! task ticking every minute, and `get` never returns one.
//!
//! # Thread Safety
//!
//! The session map sits behind a `RwLock`; lookups take the write lock only
//! long enough to refresh the access time.
//!
//! # Invariants
//!
//! - Tokens are 64 lower-case hex characters (256 random bits)
//! - After `shutdown`, the registry holds no sessions and accepts no new ones

pub mod time;

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use rand::Rng;

use crate::config::{ConfigurationView, IntegerProperty};
use crate::provider::AuthenticatedUser;
pub use time::{ManualTimeSource, SystemTimeSource, TimeSource};

/// Idle minutes before a session expires. `0` disables expiry.
pub const API_SESSION_TIMEOUT: IntegerProperty = IntegerProperty::new("api-session-timeout");

/// Default value of `api-session-timeout`, in minutes.
pub const DEFAULT_SESSION_TIMEOUT_MINUTES: u64 = 60;

/// How often the eviction task looks for expired sessions.
pub const EVICTION_INTERVAL: Duration = Duration::from_mins(1);

/// Number of random bytes in a token.
const TOKEN_BYTES: usize = 32;

/// Errors returned by the session registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The registry has been shut down.
    ShutDown,
    /// The session map lock is poisoned.
    LockPoisoned,
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShutDown => write!(f, "session registry has been shut down"),
            Self::LockPoisoned => write!(f, "session registry lock poisoned"),
        }
    }
}

impl std::error::Error for SessionError {}

/// State kept for one authenticated session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedSession {
    pub user: AuthenticatedUser,
    pub created_at_ms: u64,
    pub last_accessed_ms: u64,
}

/// Process-wide map from session token to session.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, AuthenticatedSession>>,
    /// `None` when expiry is disabled.
    timeout_ms: Option<u64>,
    time: Arc<dyn TimeSource>,
    eviction: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shut_down: AtomicBool,
}

impl std::fmt::Debug for SessionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRegistry")
            .field("sessions", &self.len())
            .field("timeout_ms", &self.timeout_ms)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl SessionRegistry {
    /// Create the registry from resolved configuration.
    ///
    /// Reads `api-session-timeout`. When called inside a tokio runtime and
    /// expiry is enabled, also starts the eviction task.
    #[must_use]
    pub fn from_config(config: &ConfigurationView) -> Arc<Self> {
        let minutes = config.get_or(&API_SESSION_TIMEOUT, DEFAULT_SESSION_TIMEOUT_MINUTES);
        if minutes == 0 {
            tracing::info!("Session expiry disabled");
        } else {
            tracing::info!("Sessions expire after {minutes} minute(s) of inactivity");
        }
        Self::with_time_source(minutes.saturating_mul(60_000), Arc::new(SystemTimeSource))
    }

    /// Create a registry with an explicit timeout and clock.
    ///
    /// # Arguments
    ///
    /// * `timeout_ms` - Idle time before expiry; `0` disables expiry.
    /// * `time` - Clock used for access and expiry times.
    #[must_use]
    pub fn with_time_source(timeout_ms: u64, time: Arc<dyn TimeSource>) -> Arc<Self> {
        let registry = Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            timeout_ms: (timeout_ms > 0).then_some(timeout_ms),
            time,
            eviction: Mutex::new(None),
            shut_down: AtomicBool::new(false),
        });

        // Only spawn if we're inside a tokio runtime (may not be in some test contexts)
        if registry.timeout_ms.is_some() && tokio::runtime::Handle::try_current().is_ok() {
            let handle = spawn_eviction_task(Arc::downgrade(&registry), EVICTION_INTERVAL);
            if let Ok(mut eviction) = registry.eviction.lock() {
                *eviction = Some(handle);
            }
        }

        registry
    }

    /// Start a session for `user` under a freshly generated token.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ShutDown` after `shutdown`.
    pub fn create(&self, user: AuthenticatedUser) -> Result<String, SessionError> {
        let now = self.time.now_ms();
        let token = generate_token();
        self.insert(
            token.clone(),
            AuthenticatedSession {
                user,
                created_at_ms: now,
                last_accessed_ms: now,
            },
        )?;
        Ok(token)
    }

    /// Store `session` under `token`, replacing any existing session.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::ShutDown` after `shutdown`.
    pub fn insert(&self, token: String, session: AuthenticatedSession) -> Result<(), SessionError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| SessionError::LockPoisoned)?;
        // Checked under the lock so nothing slips in after shutdown clears the map
        if self.is_shut_down() {
            return Err(SessionError::ShutDown);
        }
        sessions.insert(token, session);
        drop(sessions);
        Ok(())
    }

    /// Look up a session and refresh its access time.
    ///
    /// An expired session is removed and reported as absent.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::LockPoisoned` if the map lock is poisoned.
    pub fn get(&self, token: &str) -> Result<Option<AuthenticatedSession>, SessionError> {
        let now = self.time.now_ms();
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| SessionError::LockPoisoned)?;

        match sessions.get_mut(token) {
            None => return Ok(None),
            Some(session) if !self.is_expired(session, now) => {
                session.last_accessed_ms = now;
                return Ok(Some(session.clone()));
            }
            Some(_) => {}
        }

        sessions.remove(token);
        drop(sessions);
        tracing::debug!("Session expired on access");
        Ok(None)
    }

    /// Remove and return the session stored under `token`.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::LockPoisoned` if the map lock is poisoned.
    pub fn remove(&self, token: &str) -> Result<Option<AuthenticatedSession>, SessionError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| SessionError::LockPoisoned)?;
        Ok(sessions.remove(token))
    }

    /// Number of stored sessions, including expired ones not yet evicted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().map_or(0, |sessions| sessions.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired session. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = self.time.now_ms();
        let Ok(mut sessions) = self.sessions.write() else {
            tracing::error!("Session eviction skipped: registry lock poisoned");
            return 0;
        };
        let before = sessions.len();
        sessions.retain(|_, session| !self.is_expired(session, now));
        let evicted = before - sessions.len();
        drop(sessions);

        if evicted > 0 {
            tracing::debug!("Evicted {evicted} expired session(s)");
        }
        evicted
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stop the eviction task and drop every session.
    ///
    /// Only the first call has any effect; it returns `true`.
    pub fn shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return false;
        }

        let eviction = self.eviction.lock().ok().and_then(|mut eviction| eviction.take());
        if let Some(handle) = eviction {
            handle.abort();
        }

        let invalidated = self.sessions.write().map_or_else(
            |_| {
                tracing::error!("Session registry lock poisoned during shutdown");
                0
            },
            |mut sessions| sessions.drain().count(),
        );
        tracing::info!("Session registry shut down ({invalidated} session(s) invalidated)");
        true
    }

    const fn is_expired(&self, session: &AuthenticatedSession, now_ms: u64) -> bool {
        match self.timeout_ms {
            Some(timeout) => now_ms.saturating_sub(session.last_accessed_ms) > timeout,
            None => false,
        }
    }
}

/// Generate a new session token: 256 random bits, hex-encoded.
#[must_use]
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rng().fill(&mut bytes);
    bytes.iter().fold(String::with_capacity(TOKEN_BYTES * 2), |mut token, b| {
        let _ = write!(token, "{b:02x}");
        token
    })
}

/// Spawn the background eviction task.
///
/// The task holds a weak reference so it exits on its own once the registry is
/// dropped, even if `shutdown` was never called.
fn spawn_eviction_task(
    registry: Weak<SessionRegistry>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(registry) = registry.upgrade() else {
                break;
            };
            if registry.is_shut_down() {
                break;
            }
            registry.evict_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE_MS: u64 = 60_000;

    fn user(name: &str) -> AuthenticatedUser {
        AuthenticatedUser {
            username: name.to_string(),
            provider: "test".to_string(),
        }
    }

    fn registry(timeout_ms: u64) -> (Arc<SessionRegistry>, Arc<ManualTimeSource>) {
        let time = Arc::new(ManualTimeSource::new(1_700_000_000_000));
        let registry =
            SessionRegistry::with_time_source(timeout_ms, Arc::clone(&time) as Arc<dyn TimeSource>);
        (registry, time)
    }

    #[test]
    fn test_generate_token_format() {
        let token = generate_token();
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_ne!(token, generate_token());
    }

    #[test]
    fn test_create_get_remove() {
        let (registry, _) = registry(60 * MINUTE_MS);

        let token = registry.create(user("alice")).expect("create");
        assert_eq!(registry.len(), 1);

        let session = registry.get(&token).expect("get").expect("present");
        assert_eq!(session.user.username, "alice");

        let removed = registry.remove(&token).expect("remove").expect("present");
        assert_eq!(removed.user.username, "alice");
        assert!(registry.is_empty());
        assert_eq!(registry.get(&token).expect("get"), None);
    }

    #[test]
    fn test_get_refreshes_access_time() {
        let (registry, time) = registry(10 * MINUTE_MS);
        let token = registry.create(user("alice")).expect("create");

        time.advance(8 * MINUTE_MS);
        assert!(registry.get(&token).expect("get").is_some());

        // 16 minutes since creation, 8 since last access
        time.advance(8 * MINUTE_MS);
        assert!(registry.get(&token).expect("get").is_some());
    }

    #[test]
    fn test_expired_session_is_not_returned() {
        let (registry, time) = registry(10 * MINUTE_MS);
        let token = registry.create(user("alice")).expect("create");

        time.advance(10 * MINUTE_MS + 1);
        assert_eq!(registry.get(&token).expect("get"), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_evict_expired() {
        let (registry, time) = registry(10 * MINUTE_MS);
        let _old = registry.create(user("old")).expect("create");
        time.advance(6 * MINUTE_MS);
        let fresh = registry.create(user("fresh")).expect("create");
        time.advance(6 * MINUTE_MS);

        assert_eq!(registry.evict_expired(), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&fresh).expect("get").is_some());
    }

    #[test]
    fn test_zero_timeout_never_expires() {
        let (registry, time) = registry(0);
        let token = registry.create(user("alice")).expect("create");

        time.advance(365 * 24 * 60 * MINUTE_MS);
        assert_eq!(registry.evict_expired(), 0);
        assert!(registry.get(&token).expect("get").is_some());
    }

    #[test]
    fn test_shutdown_is_idempotent_and_rejects_inserts() {
        let (registry, _) = registry(MINUTE_MS);
        registry.create(user("alice")).expect("create");

        assert!(registry.shutdown());
        assert!(!registry.shutdown());
        assert!(registry.is_empty());
        assert_eq!(registry.create(user("bob")), Err(SessionError::ShutDown));
    }

    #[test]
    fn test_from_config_reads_timeout() {
        let config = crate::provider::tests::view(vec![("api-session-timeout", "0")]);
        let registry = SessionRegistry::from_config(&config);
        assert_eq!(registry.timeout_ms, None);

        let config = crate::provider::tests::view(vec![("api-session-timeout", "5")]);
        let registry = SessionRegistry::from_config(&config);
        assert_eq!(registry.timeout_ms, Some(5 * MINUTE_MS));

        let config = crate::provider::tests::view(vec![("api-session-timeout", "soon")]);
        let registry = SessionRegistry::from_config(&config);
        assert_eq!(registry.timeout_ms, Some(DEFAULT_SESSION_TIMEOUT_MINUTES * MINUTE_MS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_task_removes_expired_sessions() {
        let (registry, time) = registry(MINUTE_MS);
        registry.create(user("alice")).expect("create");
        time.advance(2 * MINUTE_MS);

        tokio::time::sleep(EVICTION_INTERVAL + Duration::from_secs(1)).await;
        tokio::task::yield_now().await;

        assert!(registry.is_empty());
        assert!(registry.shutdown());
    }

    #[tokio::test]
    async fn test_shutdown_stops_eviction_task() {
        let (registry, _) = registry(MINUTE_MS);
        assert!(registry.eviction.lock().expect("eviction lock").is_some());

        registry.shutdown();
        assert!(registry.eviction.lock().expect("eviction lock").is_none());
    }

    #[test]
    fn test_no_eviction_task_outside_runtime() {
        let (registry, _) = registry(MINUTE_MS);
        assert!(registry.eviction.lock().expect("eviction lock").is_none());
    }
}
