use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::conversation::Session;

pub type SharedSession = Arc<AsyncMutex<Session>>;

struct Entry {
    session: SharedSession,
    last_used: Instant,
}

/// Handle -> conversation, bounded by capacity and idle time.
///
/// A session that is currently checked out (someone holds a clone of the
/// `Arc`) is never evicted, so an event in flight always finishes against the
/// same session the next event will see.
pub struct SessionCache {
    entries: Mutex<HashMap<String, Entry>>,
    capacity: usize,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    /// The session for `handle`, created on first use.
    pub fn get_or_create(&self, handle: &str, chat_id: i64) -> SharedSession {
        let now = Instant::now();
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let ttl = self.ttl;
        entries.retain(|_, e| Arc::strong_count(&e.session) > 1 || now.duration_since(e.last_used) <= ttl);

        if let Some(entry) = entries.get_mut(handle) {
            entry.last_used = now;
            return entry.session.clone();
        }

        if entries.len() >= self.capacity {
            let victim = entries
                .iter()
                .filter(|(_, e)| Arc::strong_count(&e.session) == 1)
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(victim) = victim {
                debug!("Evicting idle session {}", victim);
                entries.remove(&victim);
            }
        }

        let session = Arc::new(AsyncMutex::new(Session::new(handle, chat_id)));
        entries.insert(
            handle.to_string(),
            Entry {
                session: session.clone(),
                last_used: now,
            },
        );
        session
    }

    /// The cached session for `handle`, if any. Does not refresh last use.
    pub fn get(&self, handle: &str) -> Option<SharedSession> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(handle)
            .map(|e| e.session.clone())
    }

    /// Sends `handle` back to the main menu, e.g. after the user was deleted.
    /// The entry stays cached, so an event in flight and the next one still
    /// share a session. If the session is busy the reset waits for it in the
    /// background.
    pub fn reset(&self, handle: &str) {
        let Some(session) = self.get(handle) else {
            return;
        };
        if let Ok(mut guard) = session.try_lock() {
            guard.reset();
            return;
        }
        debug!("Session {} busy, resetting after current event", handle);
        tokio::spawn(async move {
            session.lock().await.reset();
        });
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Context, Step};
    use crate::i18n::Localizer;
    use chrono::NaiveDate;
    use swapdesk_db::Database;
    use swapdesk_types::Language;

    #[test]
    fn same_handle_same_session() {
        let cache = SessionCache::new(10, Duration::from_secs(60));
        let a = cache.get_or_create("alice", 1);
        let b = cache.get_or_create("alice", 1);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let cache = SessionCache::new(2, Duration::from_secs(60));
        drop(cache.get_or_create("a", 1));
        std::thread::sleep(Duration::from_millis(5));
        drop(cache.get_or_create("b", 2));
        std::thread::sleep(Duration::from_millis(5));
        drop(cache.get_or_create("c", 3));

        assert_eq!(cache.len(), 2);
        let entries = cache.entries.lock().unwrap();
        assert!(!entries.contains_key("a"));
        assert!(entries.contains_key("c"));
    }

    #[test]
    fn sessions_in_use_survive_eviction() {
        let cache = SessionCache::new(1, Duration::ZERO);
        let held = cache.get_or_create("busy", 1);
        held.try_lock().unwrap().reset();
        let _other = cache.get_or_create("other", 2);

        let again = cache.get_or_create("busy", 1);
        assert!(Arc::ptr_eq(&held, &again));
    }

    #[tokio::test]
    async fn reset_keeps_one_session_per_handle() {
        let db = Database::open_in_memory().unwrap();
        let i18n = Localizer::new(Language::En);
        let ctx = Context {
            db: &db,
            i18n: &i18n,
            today: NaiveDate::from_ymd_opt(2029, 12, 1).unwrap(),
            is_admin: false,
        };

        let cache = SessionCache::new(10, Duration::from_secs(60));
        let first = cache.get_or_create("bob", 1);
        let mut guard = first.clone().lock_owned().await;
        guard.handle(&ctx, "menu:new").unwrap();
        assert_eq!(guard.step(), Step::AwaitingDirection);

        cache.reset("bob");
        tokio::task::yield_now().await;
        let second = cache.get_or_create("bob", 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(guard.step(), Step::AwaitingDirection);

        drop(guard);
        let session = second.lock().await;
        assert_eq!(session.step(), Step::Start);
        drop(session);

        cache.reset("nobody");
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn idle_reset_is_immediate() {
        let db = Database::open_in_memory().unwrap();
        let i18n = Localizer::new(Language::En);
        let ctx = Context {
            db: &db,
            i18n: &i18n,
            today: NaiveDate::from_ymd_opt(2029, 12, 1).unwrap(),
            is_admin: false,
        };

        let cache = SessionCache::new(10, Duration::from_secs(60));
        let session = cache.get_or_create("bob", 1);
        session.try_lock().unwrap().handle(&ctx, "menu:new").unwrap();
        cache.reset("bob");
        assert_eq!(session.try_lock().unwrap().step(), Step::Start);
    }

    #[test]
    fn idle_sessions_expire() {
        let cache = SessionCache::new(10, Duration::from_millis(1));
        {
            let s = cache.get_or_create("alice", 1);
            let mut guard = s.try_lock().unwrap();
            guard.reset();
            assert_eq!(guard.step(), Step::Start);
        }
        std::thread::sleep(Duration::from_millis(10));
        drop(cache.get_or_create("bob", 2));
        assert_eq!(cache.len(), 1);
    }
}
