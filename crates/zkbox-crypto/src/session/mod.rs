//! Master key session: in-memory key holder with inactivity expiry
//!
//! ```text
//!            set_master_key            touch_activity / master_key()
//!   Absent ─────────────────▶ Active ◀──────────────┐
//!     ▲                         │  └────────────────┘
//!     └── timeout / clear ──────┘   (key zeroed in place)
//! ```
//!
//! At most one expiry timer is live per session: every re-arm cancels the
//! previous timer first, and each timer carries the generation it was armed
//! for so a superseded one that fires late does nothing. Presence checks do
//! their own elapsed-time check and never trust the timer to have run.

pub mod clock;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, info};
use zeroize::Zeroize;
use zkbox_core::{ZkError, ZkResult};

use crate::kdf::MasterKey;
use clock::{Clock, ExpiryScheduler, ExpiryTimer, SystemClock, TokioScheduler};

/// Default inactivity window, shared with `SessionConfig::default()`.
pub const DEFAULT_SESSION_TIMEOUT: Duration =
    Duration::from_secs(zkbox_core::config::DEFAULT_SESSION_TIMEOUT_SECS);

/// Anything that can hand out the current master key.
///
/// The envelope and transfer layers consume this instead of a concrete
/// session so tests can inject a fixed key or an isolated session.
pub trait KeySource: Send + Sync {
    fn master_key(&self) -> ZkResult<MasterKey>;
}

/// A fixed key is always available (tests, one-shot tools).
impl KeySource for MasterKey {
    fn master_key(&self) -> ZkResult<MasterKey> {
        Ok(self.clone())
    }
}

/// Holds the derived master key in process memory for one signed-in user.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct MasterKeySession {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    state: Mutex<SessionState>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn ExpiryScheduler>,
    timeout: Duration,
}

#[derive(Default)]
struct SessionState {
    key: Option<MasterKey>,
    last_activity: Option<Instant>,
    timer: Option<Box<dyn ExpiryTimer>>,
    generation: u64,
}

impl MasterKeySession {
    /// Session on the system clock, with expiry timers on the current tokio
    /// runtime (if any).
    pub fn new(timeout: Duration) -> Self {
        Self::with_clock(
            timeout,
            Arc::new(SystemClock),
            Arc::new(TokioScheduler::current()),
        )
    }

    pub fn with_clock(
        timeout: Duration,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn ExpiryScheduler>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                state: Mutex::new(SessionState::default()),
                clock,
                scheduler,
                timeout,
            }),
        }
    }

    pub fn from_config(cfg: &zkbox_core::config::SessionConfig) -> Self {
        Self::new(cfg.timeout())
    }

    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Install a freshly derived key (Absent → Active). An existing key is
    /// zeroed and replaced.
    pub fn set_master_key(&self, key: MasterKey) {
        let mut state = self.inner.lock();
        if let Some(old) = state.key.as_mut() {
            old.zeroize();
        }
        state.key = Some(key);
        state.last_activity = Some(self.inner.clock.now());
        self.inner.arm_timer(&mut state, self.inner.timeout);
        info!(
            timeout_secs = self.inner.timeout.as_secs(),
            "master key session started"
        );
    }

    /// Reset the inactivity window. No effect when the session is absent or
    /// already past its window.
    pub fn touch_activity(&self) {
        let mut state = self.inner.lock();
        if self.inner.expire_if_elapsed(&mut state) || state.key.is_none() {
            return;
        }
        state.last_activity = Some(self.inner.clock.now());
        self.inner.arm_timer(&mut state, self.inner.timeout);
    }

    /// Return the master key and extend the session.
    ///
    /// Fails with `KeyUnavailable` when absent or expired.
    pub fn master_key(&self) -> ZkResult<MasterKey> {
        let mut state = self.inner.lock();
        if self.inner.expire_if_elapsed(&mut state) {
            return Err(ZkError::KeyUnavailable);
        }
        let key = state.key.clone().ok_or(ZkError::KeyUnavailable)?;
        state.last_activity = Some(self.inner.clock.now());
        self.inner.arm_timer(&mut state, self.inner.timeout);
        Ok(key)
    }

    /// Whether a usable key is present. Expires the session on the spot if
    /// the window has elapsed, even if the timer has not fired yet.
    pub fn has_master_key(&self) -> bool {
        let mut state = self.inner.lock();
        !self.inner.expire_if_elapsed(&mut state) && state.key.is_some()
    }

    /// Time left in the inactivity window, floored at zero. Read-only.
    pub fn remaining_time(&self) -> Duration {
        let state = self.inner.lock();
        match (&state.key, state.last_activity) {
            (Some(_), Some(last)) => {
                let elapsed = self.inner.clock.now().saturating_duration_since(last);
                self.inner.timeout.saturating_sub(elapsed)
            }
            _ => Duration::ZERO,
        }
    }

    /// [`remaining_time`](Self::remaining_time) in whole seconds.
    pub fn remaining_secs(&self) -> u64 {
        self.remaining_time().as_secs()
    }

    /// Wipe the key (logout, forced re-authentication).
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        if state.key.is_some() {
            self.inner.wipe(&mut state, "cleared");
        }
    }
}

impl Default for MasterKeySession {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TIMEOUT)
    }
}

impl KeySource for MasterKeySession {
    fn master_key(&self) -> ZkResult<MasterKey> {
        MasterKeySession::master_key(self)
    }
}

impl std::fmt::Debug for MasterKeySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKeySession")
            .field("timeout", &self.inner.timeout)
            .field("remaining", &self.remaining_time())
            .finish()
    }
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel any live timer, then arm exactly one that fires after `delay`.
    fn arm_timer(self: &Arc<Self>, state: &mut SessionState, delay: Duration) {
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        state.generation = state.generation.wrapping_add(1);
        let generation = state.generation;
        let weak: Weak<SessionInner> = Arc::downgrade(self);

        state.timer = Some(self.scheduler.schedule(
            delay,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.on_timer(generation);
                }
            }),
        ));
    }

    fn on_timer(self: &Arc<Self>, generation: u64) {
        let mut state = self.lock();
        if state.generation != generation || state.key.is_none() {
            debug!("stale expiry timer ignored");
            return;
        }
        // The timer already fired; drop its handle so wipe() does not cancel it.
        state.timer = None;
        if self.expire_if_elapsed(&mut state) {
            return;
        }
        // Fired early relative to our clock: wait out the remainder only.
        if let Some(last) = state.last_activity {
            let elapsed = self.clock.now().saturating_duration_since(last);
            let remaining = self.timeout.saturating_sub(elapsed);
            self.arm_timer(&mut state, remaining);
        }
    }

    /// Expire the session if its window has elapsed. Returns true if it did.
    fn expire_if_elapsed(&self, state: &mut SessionState) -> bool {
        let Some(last) = state.last_activity else {
            return false;
        };
        if state.key.is_none() {
            return false;
        }
        if self.clock.now().saturating_duration_since(last) >= self.timeout {
            self.wipe(state, "inactivity timeout");
            return true;
        }
        false
    }

    fn wipe(&self, state: &mut SessionState, reason: &'static str) {
        if let Some(key) = state.key.as_mut() {
            key.zeroize();
        }
        state.key = None;
        state.last_activity = None;
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
        // Invalidate anything still in flight for the old window.
        state.generation = state.generation.wrapping_add(1);
        info!(reason, "master key wiped");
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(key) = state.key.as_mut() {
            key.zeroize();
        }
        if let Some(timer) = state.timer.take() {
            timer.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::clock::{ManualClock, ManualScheduler, TokioClock};
    use super::*;
    use crate::KEY_SIZE;

    const WINDOW: Duration = Duration::from_secs(30 * 60);

    fn manual_session() -> (MasterKeySession, Arc<ManualClock>, ManualScheduler) {
        let clock = Arc::new(ManualClock::new());
        let scheduler = ManualScheduler::new(Arc::clone(&clock));
        let session = MasterKeySession::with_clock(
            WINDOW,
            Arc::clone(&clock) as Arc<dyn Clock>,
            Arc::new(scheduler.clone()),
        );
        (session, clock, scheduler)
    }

    fn key(b: u8) -> MasterKey {
        MasterKey::from_bytes([b; KEY_SIZE])
    }

    /// Key presence without the lazy expiry check.
    fn raw_key_present(session: &MasterKeySession) -> bool {
        session.inner.lock().key.is_some()
    }

    #[test]
    fn test_absent_session() {
        let (session, _, scheduler) = manual_session();
        assert!(!session.has_master_key());
        assert!(matches!(session.master_key(), Err(ZkError::KeyUnavailable)));
        assert_eq!(session.remaining_time(), Duration::ZERO);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_set_then_get() {
        let (session, _, scheduler) = manual_session();
        session.set_master_key(key(7));

        assert!(session.has_master_key());
        assert_eq!(session.master_key().unwrap().as_bytes(), &[7u8; KEY_SIZE]);
        assert_eq!(session.remaining_time(), WINDOW);
        assert_eq!(session.remaining_secs(), 1800);
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn test_timer_expires_session() {
        let (session, clock, scheduler) = manual_session();
        session.set_master_key(key(1));

        clock.advance(WINDOW - Duration::from_secs(1));
        assert_eq!(scheduler.run_due(), 0);
        assert!(raw_key_present(&session));

        clock.advance(Duration::from_secs(1));
        assert_eq!(scheduler.run_due(), 1);
        assert!(!raw_key_present(&session), "timer must wipe the key");
        assert!(!session.has_master_key());
        assert!(matches!(session.master_key(), Err(ZkError::KeyUnavailable)));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_lazy_expiry_without_timer() {
        let (session, clock, scheduler) = manual_session();
        session.set_master_key(key(1));

        clock.advance(WINDOW + Duration::from_secs(5));
        // Timer has not been run; the presence check must still see expiry.
        assert!(raw_key_present(&session));
        assert!(!session.has_master_key());
        assert!(!raw_key_present(&session));

        // The late timer is now stale and must not disturb a new session.
        session.set_master_key(key(2));
        assert_eq!(scheduler.run_due(), 0, "old timer was cancelled on wipe");
        assert!(session.has_master_key());
    }

    #[test]
    fn test_remaining_time_is_read_only() {
        let (session, clock, _) = manual_session();
        session.set_master_key(key(1));

        clock.advance(Duration::from_secs(600));
        assert_eq!(session.remaining_time(), WINDOW - Duration::from_secs(600));
        // Reading the remaining time must not extend the session.
        assert_eq!(session.remaining_time(), WINDOW - Duration::from_secs(600));

        clock.advance(WINDOW);
        assert_eq!(session.remaining_time(), Duration::ZERO);
        assert!(raw_key_present(&session), "remaining_time must not mutate");
    }

    #[test]
    fn test_get_extends_session() {
        let (session, clock, scheduler) = manual_session();
        session.set_master_key(key(1));

        clock.advance(Duration::from_secs(20 * 60));
        session.master_key().unwrap();
        assert_eq!(session.remaining_time(), WINDOW);

        // Past the original deadline but within the extended one.
        clock.advance(Duration::from_secs(20 * 60));
        assert_eq!(scheduler.run_due(), 0);
        assert!(session.has_master_key());
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn test_touch_extends_session_with_single_timer() {
        let (session, clock, scheduler) = manual_session();
        session.set_master_key(key(1));

        for _ in 0..5 {
            clock.advance(Duration::from_secs(60));
            session.touch_activity();
            assert_eq!(scheduler.pending(), 1, "never more than one live timer");
        }
        assert_eq!(session.remaining_time(), WINDOW);

        clock.advance(WINDOW);
        assert_eq!(scheduler.run_due(), 1);
        assert!(!session.has_master_key());
    }

    #[test]
    fn test_touch_after_expiry_does_not_resurrect() {
        let (session, clock, _) = manual_session();
        session.set_master_key(key(1));

        clock.advance(WINDOW);
        session.touch_activity();
        assert!(!session.has_master_key());
    }

    #[test]
    fn test_touch_on_absent_session_is_noop() {
        let (session, _, scheduler) = manual_session();
        session.touch_activity();
        assert!(!session.has_master_key());
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_clear() {
        let (session, _, scheduler) = manual_session();
        session.set_master_key(key(1));
        session.clear();

        assert!(!session.has_master_key());
        assert!(matches!(session.master_key(), Err(ZkError::KeyUnavailable)));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_set_replaces_key() {
        let (session, _, scheduler) = manual_session();
        session.set_master_key(key(1));
        session.set_master_key(key(2));

        assert_eq!(session.master_key().unwrap().as_bytes(), &[2u8; KEY_SIZE]);
        assert_eq!(scheduler.pending(), 1);
    }

    #[test]
    fn test_independent_sessions() {
        let (a, _, _) = manual_session();
        let (b, _, _) = manual_session();
        a.set_master_key(key(1));
        assert!(a.has_master_key());
        assert!(!b.has_master_key());
    }

    #[test]
    fn test_debug_does_not_leak_key() {
        let (session, _, _) = manual_session();
        session.set_master_key(key(0xAB));
        let dbg = format!("{session:?}");
        assert!(!dbg.contains("171"));
        assert!(!dbg.to_lowercase().contains("ab, ab"));
    }

    #[test]
    fn test_early_timer_rearms_for_remainder() {
        // Timers run on a clock that runs ahead of the session's clock.
        let session_clock = Arc::new(ManualClock::new());
        let timer_clock = Arc::new(ManualClock::new());
        let scheduler = ManualScheduler::new(Arc::clone(&timer_clock));
        let session = MasterKeySession::with_clock(
            WINDOW,
            Arc::clone(&session_clock) as Arc<dyn Clock>,
            Arc::new(scheduler.clone()),
        );
        session.set_master_key(key(1));

        session_clock.advance(Duration::from_secs(20 * 60));
        timer_clock.advance(WINDOW);
        assert_eq!(scheduler.run_due(), 1);
        assert!(raw_key_present(&session), "window has not elapsed yet");
        assert_eq!(scheduler.pending(), 1);

        // The re-armed timer covers the 10 minutes left, not a fresh window.
        timer_clock.advance(Duration::from_secs(10 * 60 - 1));
        assert_eq!(scheduler.run_due(), 0);
        session_clock.advance(Duration::from_secs(10 * 60));
        timer_clock.advance(Duration::from_secs(1));
        assert_eq!(scheduler.run_due(), 1);
        assert!(!raw_key_present(&session));
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_default_timeout_matches_config() {
        let cfg = zkbox_core::config::SessionConfig::default();
        assert_eq!(DEFAULT_SESSION_TIMEOUT, cfg.timeout());
        assert_eq!(MasterKeySession::default().timeout(), DEFAULT_SESSION_TIMEOUT);
        assert_eq!(MasterKeySession::from_config(&cfg).timeout(), WINDOW);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_wipes_key() {
        let session = MasterKeySession::with_clock(
            Duration::from_secs(60),
            Arc::new(TokioClock),
            Arc::new(TokioScheduler::current()),
        );
        session.set_master_key(key(3));

        tokio::time::sleep(Duration::from_secs(30)).await;
        session.touch_activity();

        tokio::time::sleep(Duration::from_secs(59)).await;
        assert!(raw_key_present(&session), "touch must push the deadline out");

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!raw_key_present(&session), "timer must fire after inactivity");
    }
}
