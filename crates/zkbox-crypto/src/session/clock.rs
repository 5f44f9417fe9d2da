//! Time sources and expiry timers for the master key session.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Monotonic time source.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> Instant;
}

/// Wall-clock monotonic time (`std::time::Instant`).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Tokio's view of time. Follows `tokio::time::pause`/`advance` in tests,
/// and is the same as [`SystemClock`] otherwise.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioClock;

impl Clock for TokioClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }
}

/// Hand-driven clock for deterministic tests.
#[derive(Debug)]
pub struct ManualClock {
    start: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(PoisonError::into_inner);
        *offset += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.start + *self.offset.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Work run when an expiry timer fires.
pub type ExpiryTask = Box<dyn FnOnce() + Send + 'static>;

/// Handle to an armed timer.
pub trait ExpiryTimer: Send {
    /// Cancel the timer. A cancelled timer never runs its task.
    fn cancel(self: Box<Self>);
}

/// Arms one-shot timers.
pub trait ExpiryScheduler: Send + Sync + 'static {
    fn schedule(&self, delay: Duration, task: ExpiryTask) -> Box<dyn ExpiryTimer>;
}

/// Timers backed by `tokio::time::sleep` on a spawned task.
///
/// Without a runtime there is nothing to spawn on; timers are then inert and
/// the session relies on its lazy expiry check alone.
#[derive(Debug, Clone)]
pub struct TokioScheduler {
    handle: Option<tokio::runtime::Handle>,
}

impl TokioScheduler {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// Use the runtime the caller is running on, if any.
    pub fn current() -> Self {
        Self {
            handle: tokio::runtime::Handle::try_current().ok(),
        }
    }
}

struct TokioTimer(tokio::task::JoinHandle<()>);

impl ExpiryTimer for TokioTimer {
    fn cancel(self: Box<Self>) {
        self.0.abort();
    }
}

struct InertTimer;

impl ExpiryTimer for InertTimer {
    fn cancel(self: Box<Self>) {}
}

impl ExpiryScheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: ExpiryTask) -> Box<dyn ExpiryTimer> {
        match &self.handle {
            Some(handle) => {
                let join = handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    task();
                });
                Box::new(TokioTimer(join))
            }
            None => {
                tracing::debug!("no tokio runtime: expiry timer not armed, lazy expiry only");
                Box::new(InertTimer)
            }
        }
    }
}

/// Scheduler paired with a [`ManualClock`]: timers fire only when
/// [`ManualScheduler::run_due`] is called and their deadline has passed.
#[derive(Clone)]
pub struct ManualScheduler {
    clock: Arc<ManualClock>,
    queue: Arc<Mutex<ManualQueue>>,
}

#[derive(Default)]
struct ManualQueue {
    next_id: u64,
    timers: Vec<(u64, Instant, ExpiryTask)>,
}

impl ManualScheduler {
    pub fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            queue: Arc::new(Mutex::new(ManualQueue::default())),
        }
    }

    /// Run every timer whose deadline is at or before the clock's now.
    /// Returns how many fired.
    pub fn run_due(&self) -> usize {
        let now = self.clock.now();
        let due: Vec<ExpiryTask> = {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut queue.timers)
                .into_iter()
                .partition(|(_, deadline, _)| *deadline <= now);
            queue.timers = pending;
            due.into_iter().map(|(_, _, task)| task).collect()
        };

        // Tasks run with the queue unlocked: they may re-arm.
        let fired = due.len();
        for task in due {
            task();
        }
        fired
    }

    /// Number of live (armed, not cancelled, not fired) timers.
    pub fn pending(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .timers
            .len()
    }
}

struct ManualTimer {
    id: u64,
    queue: Arc<Mutex<ManualQueue>>,
}

impl ExpiryTimer for ManualTimer {
    fn cancel(self: Box<Self>) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .timers
            .retain(|(id, _, _)| *id != self.id);
    }
}

impl ExpiryScheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: ExpiryTask) -> Box<dyn ExpiryTimer> {
        let deadline = self.clock.now() + delay;
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        let id = queue.next_id;
        queue.next_id += 1;
        queue.timers.push((id, deadline, task));
        Box::new(ManualTimer {
            id,
            queue: Arc::clone(&self.queue),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new();
        let t0 = clock.now();
        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now() - t0, Duration::from_secs(90));
    }

    #[test]
    fn test_manual_scheduler_fires_once_when_due() {
        let clock = Arc::new(ManualClock::new());
        let scheduler = ManualScheduler::new(Arc::clone(&clock));
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let _timer = scheduler.schedule(
            Duration::from_secs(10),
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );

        clock.advance(Duration::from_secs(9));
        assert_eq!(scheduler.run_due(), 0);
        clock.advance(Duration::from_secs(1));
        assert_eq!(scheduler.run_due(), 1);
        assert_eq!(scheduler.run_due(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_manual_scheduler_cancel() {
        let clock = Arc::new(ManualClock::new());
        let scheduler = ManualScheduler::new(Arc::clone(&clock));

        let timer = scheduler.schedule(Duration::from_secs(1), Box::new(|| panic!("cancelled")));
        assert_eq!(scheduler.pending(), 1);
        timer.cancel();
        assert_eq!(scheduler.pending(), 0);

        clock.advance(Duration::from_secs(5));
        assert_eq!(scheduler.run_due(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_scheduler_cancel_prevents_fire() {
        let scheduler = TokioScheduler::current();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let timer = scheduler.schedule(
            Duration::from_secs(5),
            Box::new(move || {
                h.fetch_add(1, Ordering::SeqCst);
            }),
        );
        timer.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
