//! Injectable timer source for idle teardown and correlation expiry.
//!
//! Production code schedules on tokio; tests drive a [`ManualTimers`] clock
//! forward by hand so expiry can be asserted without sleeping.

use std::{
    collections::BTreeMap,
    fmt,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::runtime::Handle;

/// Work to run when a timer fires.
pub type TimerTask = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

pub trait Timers: Send + Sync + 'static {
    /// Run `task` once after `delay` unless the returned handle is cancelled first.
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle;
}

/// Cancellation handle for a scheduled timer.
///
/// Dropping the handle leaves the timer armed; only [`TimerHandle::cancel`]
/// disarms it.
pub struct TimerHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl TimerHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TimerHandle")
    }
}

/// Timers backed by detached tokio tasks.
///
/// The tasks are dropped when the runtime shuts down, so a pending timer never
/// holds the process open.
#[derive(Clone, Debug)]
pub struct TokioTimers {
    handle: Handle,
}

impl TokioTimers {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Bind to the runtime we are currently running on.
    ///
    /// Panics outside of a tokio runtime, like `tokio::spawn`.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl Timers for TokioTimers {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let join = self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            task().await;
        });
        TimerHandle::new(move || join.abort())
    }
}

struct Pending {
    deadline: Duration,
    task: TimerTask,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_id: u64,
    pending: BTreeMap<u64, Pending>,
}

/// Advanceable clock for tests. Nothing fires until [`ManualTimers::advance`].
#[derive(Clone, Default)]
pub struct ManualTimers {
    state: Arc<Mutex<ManualState>>,
}

impl ManualTimers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time elapsed since the clock was created.
    pub fn now(&self) -> Duration {
        self.lock().now
    }

    /// Number of armed timers.
    pub fn pending(&self) -> usize {
        self.lock().pending.len()
    }

    /// Move the clock forward, running every timer that comes due in deadline
    /// order. Timers scheduled by a firing task are honoured in the same call.
    pub async fn advance(&self, by: Duration) {
        let target = self.lock().now + by;
        loop {
            let due = {
                let mut state = self.lock();
                let next = state
                    .pending
                    .iter()
                    .filter(|(_, p)| p.deadline <= target)
                    .min_by_key(|(id, p)| (p.deadline, **id))
                    .map(|(id, _)| *id);
                match next {
                    Some(id) => {
                        let pending = state.pending.remove(&id);
                        if let Some(p) = &pending {
                            state.now = p.deadline;
                        }
                        pending
                    }
                    None => {
                        state.now = target;
                        None
                    }
                }
            };
            match due {
                Some(p) => (p.task)().await,
                None => break,
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        // a panicking test may poison the lock; the state itself stays usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Timers for ManualTimers {
    fn schedule(&self, delay: Duration, task: TimerTask) -> TimerHandle {
        let id = {
            let mut state = self.lock();
            let id = state.next_id;
            state.next_id += 1;
            let deadline = state.now + delay;
            state.pending.insert(id, Pending { deadline, task });
            id
        };
        let weak: Weak<Mutex<ManualState>> = Arc::downgrade(&self.state);
        TimerHandle::new(move || {
            if let Some(state) = weak.upgrade() {
                state
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .pending
                    .remove(&id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_task(counter: &Arc<AtomicUsize>) -> TimerTask {
        let counter = counter.clone();
        Box::new(move || {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    #[tokio::test]
    async fn manual_timer_fires_only_when_due() {
        let timers = ManualTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let _handle = timers.schedule(Duration::from_secs(10), counting_task(&fired));

        timers.advance(Duration::from_secs(9)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        timers.advance(Duration::from_secs(1)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(timers.pending(), 0);
        assert_eq!(timers.now(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn cancelled_manual_timer_never_fires() {
        let timers = ManualTimers::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = timers.schedule(Duration::from_secs(1), counting_task(&fired));
        handle.cancel();

        timers.advance(Duration::from_secs(5)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn tokio_timer_can_be_aborted() {
        let timers = TokioTimers::current();
        let fired = Arc::new(AtomicUsize::new(0));
        let keep = timers.schedule(Duration::from_millis(50), counting_task(&fired));
        let cancel = timers.schedule(Duration::from_millis(50), counting_task(&fired));
        cancel.cancel();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        drop(keep);
    }
}
