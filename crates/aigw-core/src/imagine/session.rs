//! Resumable imagine sessions.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Run parameters stored under a resumption id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagineSession {
    pub id: String,
    pub prompt: String,
    pub aspect_ratio: String,
    pub nsfw: Option<bool>,
    /// 0 means unbounded.
    pub quantity: u32,
    pub concurrent: u32,
    pub created_at: Instant,
}

/// Session map with a TTL enforced on every access.
///
/// There is no background sweeper: each create and read drops expired
/// entries first, so an expired session is never returned.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, ImagineSession>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, ImagineSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sweep(&self, sessions: &mut HashMap<String, ImagineSession>, now: Instant) {
        let ttl = self.ttl;
        sessions.retain(|_, s| now.duration_since(s.created_at) <= ttl);
    }

    /// Store a new session and return its id.
    pub fn create(
        &self,
        prompt: &str,
        aspect_ratio: &str,
        nsfw: Option<bool>,
        quantity: u32,
        concurrent: u32,
    ) -> String {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let now = Instant::now();
        let mut sessions = self.lock();
        self.sweep(&mut sessions, now);
        sessions.insert(
            id.clone(),
            ImagineSession {
                id: id.clone(),
                prompt: prompt.to_string(),
                aspect_ratio: aspect_ratio.to_string(),
                nsfw,
                quantity,
                concurrent,
                created_at: now,
            },
        );
        tracing::debug!(session_id = %id, quantity, concurrent, "Imagine session created");
        id
    }

    /// A copy of the session, or `None` if absent or expired.
    pub fn get(&self, id: &str) -> Option<ImagineSession> {
        if id.is_empty() {
            return None;
        }
        let mut sessions = self.lock();
        self.sweep(&mut sessions, Instant::now());
        sessions.get(id).cloned()
    }

    /// Whether the session is still live.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn drop_session(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Remove every listed session; returns how many existed.
    pub fn drop_many<S: AsRef<str>>(&self, ids: &[S]) -> usize {
        let mut sessions = self.lock();
        ids.iter()
            .filter(|id| sessions.remove(id.as_ref()).is_some())
            .count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(600);

    #[tokio::test(start_paused = true)]
    async fn test_get_before_ttl_returns_fields() {
        let store = SessionStore::new(TTL);
        let id = store.create("a cat", "1:1", Some(true), 4, 2);

        tokio::time::advance(Duration::from_secs(599)).await;
        let session = store.get(&id).unwrap();
        assert_eq!(session.prompt, "a cat");
        assert_eq!(session.aspect_ratio, "1:1");
        assert_eq!(session.nsfw, Some(true));
        assert_eq!((session.quantity, session.concurrent), (4, 2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_session_is_absent() {
        let store = SessionStore::new(TTL);
        let id = store.create("a cat", "2:3", None, 0, 1);

        tokio::time::advance(TTL + Duration::from_millis(1)).await;
        assert!(store.get(&id).is_none());
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_sweeps_expired() {
        let store = SessionStore::new(TTL);
        store.create("old", "2:3", None, 0, 1);
        tokio::time::advance(TTL * 2).await;
        store.create("new", "2:3", None, 0, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_drop_is_idempotent() {
        let store = SessionStore::new(TTL);
        let id = store.create("a", "2:3", None, 0, 1);

        assert_eq!(store.drop_many(&[id.as_str(), "missing"]), 1);
        assert_eq!(store.drop_many(&[id.as_str()]), 0);
        assert!(!store.drop_session(&id));
        assert_eq!(store.drop_many::<&str>(&[]), 0);
    }
}
