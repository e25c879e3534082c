use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct Session {
    pub data: HashMap<String, String>,
    pub expires_at: Instant,
}

/// Keyed session map with a sliding TTL. Entries are garbage-collected
/// opportunistically from the event loop.
#[derive(Debug)]
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    ttl: Duration,
    counter: u64,
    pub last_cleanup: Instant,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        SessionStore {
            sessions: HashMap::new(),
            ttl,
            counter: 0,
            last_cleanup: Instant::now(),
        }
    }

    /// Returns the id of a live session for the presented cookie value,
    /// extending its expiry; otherwise mints a fresh session.
    pub fn get_or_create(&mut self, cookie_value: Option<&str>) -> String {
        let now = Instant::now();

        if let Some(id) = cookie_value {
            if let Some(session) = self.sessions.get_mut(id) {
                if session.expires_at > now {
                    session.expires_at = now + self.ttl;
                    return id.to_string();
                }
            }
        }

        self.counter += 1;
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let id = format!("{:x}{:04x}", millis, self.counter);
        self.sessions.insert(
            id.clone(),
            Session {
                data: HashMap::new(),
                expires_at: now + self.ttl,
            },
        );
        id
    }

    pub fn set(&mut self, id: &str, key: &str, value: &str) {
        if let Some(session) = self.sessions.get_mut(id) {
            session.data.insert(key.to_string(), value.to_string());
        }
    }

    pub fn get(&self, id: &str, key: &str) -> Option<&String> {
        self.sessions.get(id).and_then(|s| s.data.get(key))
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn cleanup_if_needed(&mut self) {
        if self.last_cleanup.elapsed() < Duration::from_secs(60) {
            return;
        }
        let now = Instant::now();
        self.sessions.retain(|_, session| session.expires_at > now);
        self.last_cleanup = now;
    }
}
