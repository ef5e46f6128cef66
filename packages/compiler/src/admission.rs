//! Per-client admission control.
//!
//! Fixed-window counter keyed by client identity: each key gets `capacity`
//! requests per `window`, and the counter starts over once the window has
//! passed. Window state lives behind [`AdmissionStore`] so the in-process
//! map can be swapped for a shared store when running several workers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tracing::debug;

pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
pub const DEFAULT_CAPACITY: u32 = 60;
/// Longest window accepted; longer settings are clamped to this.
pub const MAX_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// End of a window opened at `now`. Saturates instead of overflowing
/// `Instant`, which panics on some platforms.
fn window_end(now: Instant, window: Duration) -> Instant {
    now.checked_add(window)
        .or_else(|| now.checked_add(MAX_WINDOW))
        .unwrap_or(now)
}

/// Counter state for one client key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientWindow {
    pub count: u32,
    pub reset_at: Instant,
}

impl ClientWindow {
    fn fresh(now: Instant, window: Duration) -> Self {
        Self {
            count: 1,
            reset_at: window_end(now, window),
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now > self.reset_at
    }
}

/// Keyed counter store with expiry.
pub trait AdmissionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<ClientWindow>;

    fn set(&self, key: &str, window: ClientWindow);

    fn reset(&self, key: &str);

    /// Count one request for `key` and return the post-increment window.
    ///
    /// The default implementation is a plain get-then-set; stores shared
    /// between threads should override it with an atomic update.
    fn record(&self, key: &str, now: Instant, window: Duration) -> ClientWindow {
        let next = match self.get(key) {
            Some(current) if !current.is_expired(now) => ClientWindow {
                count: current.count.saturating_add(1),
                reset_at: current.reset_at,
            },
            _ => ClientWindow::fresh(now, window),
        };
        self.set(key, next);
        next
    }

    /// Drop windows that have expired. Returns how many were removed.
    fn evict_expired(&self, now: Instant) -> usize;
}

/// Process-local store.
#[derive(Debug, Default)]
pub struct InMemoryAdmissionStore {
    windows: Mutex<HashMap<String, ClientWindow>>,
}

impl InMemoryAdmissionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ClientWindow>> {
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl AdmissionStore for InMemoryAdmissionStore {
    fn get(&self, key: &str) -> Option<ClientWindow> {
        self.lock().get(key).copied()
    }

    fn set(&self, key: &str, window: ClientWindow) {
        self.lock().insert(key.to_string(), window);
    }

    fn reset(&self, key: &str) {
        self.lock().remove(key);
    }

    fn record(&self, key: &str, now: Instant, window: Duration) -> ClientWindow {
        let mut windows = self.lock();
        let entry = windows
            .entry(key.to_string())
            .or_insert_with(|| ClientWindow {
                count: 0,
                reset_at: window_end(now, window),
            });

        if entry.is_expired(now) {
            *entry = ClientWindow::fresh(now, window);
        } else {
            entry.count = entry.count.saturating_add(1);
        }
        *entry
    }

    fn evict_expired(&self, now: Instant) -> usize {
        let mut windows = self.lock();
        let before = windows.len();
        windows.retain(|_, w| !w.is_expired(now));
        before - windows.len()
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    Denied { retry_after_secs: u64 },
}

#[derive(Clone)]
pub struct AdmissionControl {
    store: Arc<dyn AdmissionStore>,
    capacity: u32,
    window: Duration,
}

impl AdmissionControl {
    /// `window` is clamped to [`MAX_WINDOW`].
    pub fn new(store: Arc<dyn AdmissionStore>, capacity: u32, window: Duration) -> Self {
        Self {
            store,
            capacity,
            window: window.min(MAX_WINDOW),
        }
    }

    pub fn in_memory(capacity: u32, window: Duration) -> Self {
        Self::new(Arc::new(InMemoryAdmissionStore::new()), capacity, window)
    }

    pub fn store(&self) -> &Arc<dyn AdmissionStore> {
        &self.store
    }

    pub fn admit(&self, client_key: &str) -> Admission {
        self.admit_at(client_key, Instant::now())
    }

    pub fn admit_at(&self, client_key: &str, now: Instant) -> Admission {
        let window = self.store.record(client_key, now, self.window);

        if window.count <= self.capacity {
            return Admission::Allowed;
        }

        let remaining = window.reset_at.saturating_duration_since(now);
        let retry_after_secs = u64::try_from(remaining.as_millis().div_ceil(1000))
            .unwrap_or(u64::MAX)
            .max(1);

        debug!(client = client_key, count = window.count, retry_after_secs, "admission denied");
        Admission::Denied { retry_after_secs }
    }

    /// Periodically drop expired windows so the map does not grow without
    /// bound.
    pub fn spawn_eviction(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = store.evict_expired(Instant::now());
                if evicted > 0 {
                    debug!(evicted, "evicted expired admission windows");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn control() -> AdmissionControl {
        AdmissionControl::in_memory(DEFAULT_CAPACITY, DEFAULT_WINDOW)
    }

    #[test]
    fn sixtieth_allowed_sixty_first_denied() {
        let control = control();
        let start = Instant::now();

        for i in 0..60 {
            let now = start + Duration::from_millis(i * 10);
            assert_eq!(control.admit_at("10.0.0.1", now), Admission::Allowed);
        }

        match control.admit_at("10.0.0.1", start + Duration::from_secs(1)) {
            Admission::Denied { retry_after_secs } => {
                assert!(retry_after_secs > 0);
                assert_eq!(retry_after_secs, 59);
            }
            Admission::Allowed => panic!("61st request must be denied"),
        }
    }

    #[test]
    fn retry_after_rounds_up() {
        let control = AdmissionControl::in_memory(1, Duration::from_secs(60));
        let start = Instant::now();

        assert_eq!(control.admit_at("k", start), Admission::Allowed);
        assert_eq!(
            control.admit_at("k", start + Duration::from_millis(500)),
            Admission::Denied {
                retry_after_secs: 60
            }
        );
    }

    #[test]
    fn window_resets_after_expiry() {
        let control = control();
        let start = Instant::now();

        for _ in 0..75 {
            control.admit_at("k", start);
        }
        assert!(matches!(
            control.admit_at("k", start),
            Admission::Denied { .. }
        ));

        let later = start + DEFAULT_WINDOW + Duration::from_millis(1);
        assert_eq!(control.admit_at("k", later), Admission::Allowed);

        let window = control.store().get("k").expect("window");
        assert_eq!(window.count, 1);
        assert_eq!(window.reset_at, later + DEFAULT_WINDOW);
    }

    #[test]
    fn window_boundary_is_not_yet_expired() {
        let control = AdmissionControl::in_memory(1, Duration::from_secs(60));
        let start = Instant::now();

        control.admit_at("k", start);
        let at_reset = start + Duration::from_secs(60);
        assert!(matches!(
            control.admit_at("k", at_reset),
            Admission::Denied {
                retry_after_secs: 1
            }
        ));
    }

    #[test]
    fn oversized_window_is_clamped_instead_of_overflowing() {
        let control = AdmissionControl::in_memory(1, Duration::from_secs(u64::MAX));
        let now = Instant::now();

        assert_eq!(control.admit_at("k", now), Admission::Allowed);
        match control.admit_at("k", now) {
            Admission::Denied { retry_after_secs } => {
                assert_eq!(retry_after_secs, MAX_WINDOW.as_secs());
            }
            Admission::Allowed => panic!("second request must be denied"),
        }
    }

    #[test]
    fn store_record_saturates_window_end() {
        let store = InMemoryAdmissionStore::new();
        let now = Instant::now();

        let window = store.record("k", now, Duration::MAX);
        assert_eq!(window.count, 1);
        assert!(window.reset_at >= now);
        assert!(!window.is_expired(now));
    }

    #[test]
    fn keys_are_independent() {
        let control = AdmissionControl::in_memory(1, DEFAULT_WINDOW);
        let now = Instant::now();

        assert_eq!(control.admit_at("a", now), Admission::Allowed);
        assert_eq!(control.admit_at("b", now), Admission::Allowed);
        assert!(matches!(
            control.admit_at("a", now),
            Admission::Denied { .. }
        ));
    }

    #[test]
    fn evict_expired_keeps_live_windows() {
        let store = InMemoryAdmissionStore::new();
        let now = Instant::now();

        store.record("old", now, Duration::from_secs(1));
        store.record("live", now, Duration::from_secs(120));
        assert_eq!(store.len(), 2);

        let evicted = store.evict_expired(now + Duration::from_secs(2));
        assert_eq!(evicted, 1);
        assert!(store.get("old").is_none());
        assert!(store.get("live").is_some());
    }

    #[test]
    fn reset_forgets_key() {
        let store = InMemoryAdmissionStore::new();
        let now = Instant::now();

        store.record("k", now, DEFAULT_WINDOW);
        store.record("k", now, DEFAULT_WINDOW);
        store.reset("k");
        assert!(store.is_empty());
        assert_eq!(store.record("k", now, DEFAULT_WINDOW).count, 1);
    }

    /// Store that only implements get/set, exercising the default `record`.
    #[derive(Default)]
    struct PlainStore(Mutex<HashMap<String, ClientWindow>>);

    impl AdmissionStore for PlainStore {
        fn get(&self, key: &str) -> Option<ClientWindow> {
            self.0.lock().expect("lock").get(key).copied()
        }

        fn set(&self, key: &str, window: ClientWindow) {
            self.0.lock().expect("lock").insert(key.to_string(), window);
        }

        fn reset(&self, key: &str) {
            self.0.lock().expect("lock").remove(key);
        }

        fn evict_expired(&self, _now: Instant) -> usize {
            0
        }
    }

    #[test]
    fn default_record_matches_in_memory_semantics() {
        let control = AdmissionControl::new(Arc::new(PlainStore::default()), 2, DEFAULT_WINDOW);
        let now = Instant::now();

        assert_eq!(control.admit_at("k", now), Admission::Allowed);
        assert_eq!(control.admit_at("k", now), Admission::Allowed);
        assert!(matches!(
            control.admit_at("k", now),
            Admission::Denied { .. }
        ));
        assert_eq!(
            control.admit_at("k", now + DEFAULT_WINDOW + Duration::from_secs(1)),
            Admission::Allowed
        );
    }
}
