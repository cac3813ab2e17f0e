//! Net sessions: logical conversations multiplexed over channels.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Stable ordered session identity. Sessions live in ordered containers, so
/// the key is `Ord`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct SessionInner {
    id: SessionId,
    consumer_name: String,
    /// Set while a streaming source owns the outbound channel
    locked: AtomicBool,
    attributes: Mutex<HashMap<String, String>>,
}

/// A logical conversation rooted in a consumer. Cheap to clone, compared and
/// ordered by its id.
#[derive(Clone)]
pub struct NetSession {
    inner: Arc<SessionInner>,
}

impl NetSession {
    pub fn new(consumer_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: SessionId::new(),
                consumer_name: consumer_name.into(),
                locked: AtomicBool::new(false),
                attributes: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn consumer_name(&self) -> &str {
        &self.inner.consumer_name
    }

    pub fn lock(&self) {
        self.inner.locked.store(true, Ordering::SeqCst);
    }

    pub fn unlock(&self) {
        self.inner.locked.store(false, Ordering::SeqCst);
    }

    pub fn is_locked(&self) -> bool {
        self.inner.locked.load(Ordering::SeqCst)
    }

    /// Store a consumer-defined attribute.
    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        if let Ok(mut attributes) = self.inner.attributes.lock() {
            attributes.insert(key.into(), value.into());
        }
    }

    pub fn attribute(&self, key: &str) -> Option<String> {
        self.inner
            .attributes
            .lock()
            .ok()
            .and_then(|attributes| attributes.get(key).cloned())
    }
}

impl fmt::Debug for NetSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetSession")
            .field("id", &self.inner.id)
            .field("consumer", &self.inner.consumer_name)
            .field("locked", &self.is_locked())
            .finish()
    }
}

impl PartialEq for NetSession {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for NetSession {}

impl PartialOrd for NetSession {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for NetSession {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id().cmp(&other.id())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_lock_cycle() {
        let session = NetSession::new("echo");
        assert!(!session.is_locked());
        session.lock();
        assert!(session.is_locked());
        session.unlock();
        assert!(!session.is_locked());
    }

    #[test]
    fn test_clones_share_identity() {
        let session = NetSession::new("echo");
        let clone = session.clone();
        assert_eq!(session, clone);
        clone.set_attribute("user", "alice");
        assert_eq!(session.attribute("user").as_deref(), Some("alice"));
    }
}
