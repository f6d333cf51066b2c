use std::{
    collections::{HashMap, hash_map::Entry},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;

use crate::{
    backend::SessionBackend,
    session::{DecayTimer, Session},
    value::Values,
};

/// The authoritative table of live sessions.
///
/// Lock order: the table lock is taken before any per-session lock and is never held across an
/// `.await`. Sessions are cloned out of the table and the table lock released before their
/// values are touched.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<StoreInner>,
}

#[derive(Default)]
struct StoreInner {
    sessions: Mutex<HashMap<String, Session>>,
    backend: Option<Arc<dyn SessionBackend>>,
    next_timer: AtomicU64,
}

impl fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionStore")
            .field("sessions", &self.len())
            .field("backend", &self.inner.backend)
            .finish()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend<B: SessionBackend>(backend: B) -> Self {
        Self::with_shared_backend(Arc::new(backend))
    }

    pub fn with_shared_backend(backend: Arc<dyn SessionBackend>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                backend: Some(backend),
                ..StoreInner::default()
            }),
        }
    }

    pub fn backend(&self) -> Option<&Arc<dyn SessionBackend>> {
        self.inner.backend.as_ref()
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Create and register the session for `id`, seeded from the backend when it holds values.
    ///
    /// Never fails: backend errors leave the session empty. If another task registered `id`
    /// first, that session is returned instead so at most one exists per id.
    pub async fn init(&self, id: &str, ttl: Option<Duration>) -> Session {
        let values = self.load_values(id).await;
        let candidate = Session::new(id.to_owned(), values, self.inner.backend.clone());

        let session = match self.inner.sessions.lock().entry(id.to_owned()) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => entry.insert(candidate).clone(),
        };

        if let Some(ttl) = ttl {
            self.arm(&session, ttl);
        }
        tracing::debug!(session_id = %id, "session initialized");

        session
    }

    pub async fn read(&self, id: &str, ttl: Option<Duration>) -> Session {
        let tracked = self.inner.sessions.lock().get(id).cloned();

        match tracked {
            Some(session) => {
                if let Some(ttl) = ttl {
                    self.arm(&session, ttl);
                }
                session.run_flash_gc();
                session
            }
            None => self.init(id, ttl).await,
        }
    }

    pub async fn exist(&self, id: &str) -> bool {
        let tracked = self.inner.sessions.lock().contains_key(id);
        if tracked {
            return true;
        }

        let Some(backend) = &self.inner.backend else {
            return false;
        };

        match backend.exists(id).await {
            Ok(found) => found,
            Err(err) => {
                tracing::debug!(err = %err, session_id = %id, "session backend probe failed");
                false
            }
        }
    }

    pub async fn destroy(&self, id: &str) {
        let removed = self.inner.sessions.lock().remove(id);

        if let Some(session) = removed {
            if let Some(timer) = session.retire().await {
                timer.cancel();
            }
            tracing::debug!(session_id = %id, "session destroyed");
        }
    }

    /// Destroy every tracked session. Backend entries never read into this process are kept.
    pub async fn destroy_all(&self) {
        let drained: Vec<(String, Session)> = self.inner.sessions.lock().drain().collect();

        for (_, session) in drained {
            if let Some(timer) = session.retire().await {
                timer.cancel();
            }
        }
    }

    async fn load_values(&self, id: &str) -> Values {
        let Some(backend) = &self.inner.backend else {
            return Values::new();
        };

        match backend.load(id).await {
            Ok(Some(values)) => values,
            Ok(None) => Values::new(),
            Err(err) => {
                tracing::warn!(
                    err = %err,
                    session_id = %id,
                    "session backend load failed, starting empty"
                );
                Values::new()
            }
        }
    }

    // Cancel-and-rearm: each timer carries a generation and only the timer whose generation is
    // still installed may expire the session.
    fn arm(&self, session: &Session, ttl: Duration) {
        if session.is_destroyed() {
            return;
        }

        let generation = self.inner.next_timer.fetch_add(1, Ordering::Relaxed);
        let store = Arc::downgrade(&self.inner);
        let id = session.id().to_owned();

        let handle = tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            if let Some(inner) = store.upgrade() {
                SessionStore { inner }.expire(&id, generation).await;
            }
        });

        session.replace_timer(DecayTimer::new(generation, handle));
    }

    async fn expire(&self, id: &str, generation: u64) {
        let expired = {
            let mut sessions = self.inner.sessions.lock();
            let current = sessions
                .get(id)
                .is_some_and(|session| session.timer_generation() == Some(generation));
            if current { sessions.remove(id) } else { None }
        };

        if let Some(session) = expired {
            // This task is the timer; aborting it would cancel the delete.
            drop(session.retire().await);
            tracing::debug!(session_id = %id, "session decayed");
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::error::{Error, Result};

    #[derive(Debug, Default)]
    struct RecordingBackend {
        stored: Mutex<HashMap<String, Values>>,
        updates: Mutex<Vec<(String, Values)>>,
        unavailable: bool,
    }

    #[async_trait]
    impl SessionBackend for RecordingBackend {
        async fn load(&self, id: &str) -> Result<Option<Values>> {
            tokio::task::yield_now().await;
            if self.unavailable {
                return Err(Error::BackendUnavailable("connection refused".into()));
            }
            Ok(self.stored.lock().get(id).cloned())
        }

        async fn update(&self, id: &str, values: &Values) -> Result<()> {
            tokio::task::yield_now().await;
            self.updates.lock().push((id.to_owned(), values.clone()));
            if values.is_empty() {
                self.stored.lock().remove(id);
            } else {
                self.stored.lock().insert(id.to_owned(), values.clone());
            }
            Ok(())
        }
    }

    fn recording_store() -> (SessionStore, Arc<RecordingBackend>) {
        let backend = Arc::new(RecordingBackend::default());
        let store = SessionStore::with_shared_backend(backend.clone());
        (store, backend)
    }

    #[tokio::test]
    async fn init_registers_and_read_returns_same_session() {
        let store = SessionStore::new();
        let session = store.init("a_1", None).await;
        session.set("k", "v").await.expect("set succeeds");

        let again = store.read("a_1", None).await;

        assert_eq!(again.get("k"), Some(json!("v")));
        assert!(store.exist("a_1").await);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn each_mutation_writes_one_snapshot() {
        let (store, backend) = recording_store();
        let session = store.init("a_1", None).await;

        session.set("a", 1).await.expect("set succeeds");
        session.set("b", 2).await.expect("set succeeds");
        session.delete("a").await;
        session.clear().await;

        let updates = backend.updates.lock();
        assert_eq!(updates.len(), 4);
        assert_eq!(updates[1].1, Values::from([("a".into(), json!(1)), ("b".into(), json!(2))]));
        assert_eq!(updates[2].1, Values::from([("b".into(), json!(2))]));
        assert!(updates[3].1.is_empty());
    }

    #[tokio::test]
    async fn init_seeds_from_backend() {
        let (store, backend) = recording_store();
        backend
            .stored
            .lock()
            .insert("a_1".into(), Values::from([("name".into(), json!("x"))]));

        assert!(store.exist("a_1").await);
        let session = store.read("a_1", None).await;

        assert_eq!(session.get_string("name").expect("name is stored"), "x");
    }

    #[tokio::test]
    async fn unavailable_backend_degrades_to_empty_session() {
        let backend = RecordingBackend {
            unavailable: true,
            ..RecordingBackend::default()
        };
        let store = SessionStore::with_backend(backend);

        assert!(!store.exist("a_1").await);
        let session = store.init("a_1", None).await;
        assert!(session.is_empty());
    }

    #[tokio::test]
    async fn destroy_removes_once_and_deletes_persisted_values() {
        let (store, backend) = recording_store();
        let session = store.init("a_1", None).await;
        session.set("a", 1).await.expect("set succeeds");

        store.destroy("a_1").await;
        store.destroy("a_1").await;

        assert!(!store.exist("a_1").await);
        assert_eq!(backend.load("a_1").await.expect("load succeeds"), None);
        // one set, one delete
        assert_eq!(backend.updates.lock().len(), 2);

        // a stale handle no longer writes through
        session.set("b", 2).await.expect("set succeeds");
        assert_eq!(backend.updates.lock().len(), 2);
    }

    #[tokio::test]
    async fn destroy_all_forgets_tracked_sessions() {
        let store = SessionStore::new();
        store.init("a_1", None).await;
        store.init("a_2", None).await;

        store.destroy_all().await;

        assert!(!store.exist("a_1").await);
        assert!(!store.exist("a_2").await);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn read_collects_consumed_flashes() {
        let store = SessionStore::new();
        let session = store.init("a_1", None).await;
        session.set_flash("m", "x").expect("set_flash succeeds");

        let next = store.read("a_1", None).await;
        assert_eq!(next.get_flash("m"), Some(json!("x")));

        let after = store.read("a_1", None).await;
        assert_eq!(after.get_flash("m"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn session_decays_after_ttl() {
        let (store, backend) = recording_store();
        let session = store.init("a_1", Some(Duration::from_secs(60))).await;
        session.set("a", 1).await.expect("set succeeds");

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(!store.exist("a_1").await);
        assert!(session.is_empty());
        assert!(backend.stored.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn read_rearms_decay_timer() {
        let store = SessionStore::new();
        let ttl = Some(Duration::from_secs(60));
        store.init("a_1", ttl).await;

        tokio::time::sleep(Duration::from_secs(45)).await;
        store.read("a_1", ttl).await;
        tokio::time::sleep(Duration::from_secs(45)).await;

        assert!(store.exist("a_1").await);

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert!(!store.exist("a_1").await);
    }

    #[tokio::test(start_paused = true)]
    async fn destroy_cancels_pending_timer() {
        let store = SessionStore::new();
        let ttl = Some(Duration::from_secs(10));
        store.init("a_1", ttl).await;
        store.destroy("a_1").await;

        let fresh = store.init("a_1", None).await;
        fresh.set("a", 1).await.expect("set succeeds");
        tokio::time::sleep(Duration::from_secs(11)).await;

        assert!(store.exist("a_1").await);
        assert_eq!(fresh.get("a"), Some(json!(1)));
    }
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_init_registers_one_session() {
        let (store, _backend) = recording_store();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.init("a_1", None).await })
            })
            .collect();
        let mut sessions = Vec::new();
        for handle in handles {
            sessions.push(handle.await.expect("init task completes"));
        }

        assert_eq!(store.len(), 1);
        sessions[0].set("k", 1).await.expect("set succeeds");
        for session in &sessions {
            assert_eq!(session.get("k"), Some(json!(1)));
        }
    }

    #[tokio::test]
    async fn write_racing_destroy_is_never_persisted() {
        let (store, backend) = recording_store();

        for i in 0..50 {
            let id = format!("a_{i}");
            let session = store.init(&id, None).await;

            let write = async {
                session.set("a", 1).await.expect("set succeeds");
            };
            tokio::join!(write, store.destroy(&id));

            assert_eq!(backend.load(&id).await.expect("load succeeds"), None, "id {id}");
        }
    }

    #[tokio::test]
    async fn destroy_all_deletes_persisted_values() {
        let (store, backend) = recording_store();
        store
            .init("a_1", None)
            .await
            .set("a", 1)
            .await
            .expect("set succeeds");
        store
            .init("a_2", None)
            .await
            .set("b", 2)
            .await
            .expect("set succeeds");
        assert_eq!(backend.stored.lock().len(), 2);

        store.destroy_all().await;

        assert!(backend.stored.lock().is_empty());
        assert!(!store.exist("a_1").await);
        assert!(!store.exist("a_2").await);
    }

    async fn gone_from(backend: &dyn SessionBackend, id: &str) -> bool {
        for _ in 0..200 {
            if backend.load(id).await.expect("load succeeds").is_none() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[cfg(feature = "file-store")]
    #[tokio::test]
    async fn destroy_removes_file_backed_session() {
        let dir = tempfile::tempdir().expect("tempdir is created");
        let store = SessionStore::with_backend(crate::FileStore::new(dir.path()));
        let session = store.init("a_1", None).await;
        session.set("a", 1).await.expect("set succeeds");

        store.destroy("a_1").await;

        let reopened = crate::FileStore::new(dir.path());
        assert!(gone_from(&reopened, "a_1").await);
        assert!(!SessionStore::with_backend(reopened).exist("a_1").await);
    }

    #[cfg(feature = "sled-store")]
    #[tokio::test]
    async fn destroy_removes_sled_backed_session() {
        let dir = tempfile::tempdir().expect("tempdir is created");
        let backend = Arc::new(
            crate::SledStore::open(crate::SledConfig::new(dir.path().join("sessions")))
                .expect("store opens"),
        );
        let store = SessionStore::with_shared_backend(backend.clone());
        let session = store.init("a_1", None).await;
        session.set("a", 1).await.expect("set succeeds");

        store.destroy("a_1").await;

        assert!(gone_from(backend.as_ref(), "a_1").await);
        assert!(!store.exist("a_1").await);
        backend.shutdown().await.expect("shutdown succeeds");
    }
}
