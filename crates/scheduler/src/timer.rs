//! One cancellable timer per schedule id.

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    chrono::{DateTime, Utc},
    tokio::task::JoinHandle,
    tracing::debug,
};

use crate::{clock::Clock, types::ScheduleId};

/// Callback invoked when a timer fires, with the deadline the timer was
/// armed for.
pub type FireFn = Arc<
    dyn Fn(ScheduleId, DateTime<Utc>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync,
>;

struct Armed {
    generation: u64,
    fire_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

type Timers = Arc<Mutex<HashMap<ScheduleId, Armed>>>;

fn lock(timers: &Timers) -> MutexGuard<'_, HashMap<ScheduleId, Armed>> {
    timers.lock().unwrap_or_else(|e| e.into_inner())
}

/// Holds at most one live timer per schedule id.
///
/// Each armed timer is a tokio task sleeping until its deadline. When it
/// wakes it removes its own entry before running the callback, so a fired
/// schedule is no longer armed and a later [`cancel`](Self::cancel) cannot
/// interrupt a callback already in progress.
pub struct TimerRegistry {
    clock: Arc<dyn Clock>,
    generation: AtomicU64,
    timers: Timers,
}

impl TimerRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            generation: AtomicU64::new(0),
            timers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Arm `id` to fire at `fire_at`, replacing any live timer for it.
    ///
    /// Deadlines already in the past fire immediately. Must be called from
    /// within a tokio runtime.
    pub fn arm(&self, id: ScheduleId, fire_at: DateTime<Utc>, callback: FireFn) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let delay = (fire_at - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        let mut timers = lock(&self.timers);
        if let Some(previous) = timers.remove(&id) {
            previous.handle.abort();
            debug!(%id, previous = %previous.fire_at, "replaced timer");
        }

        let registry = Arc::clone(&self.timers);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let claimed = {
                let mut timers = lock(&registry);
                match timers.get(&id) {
                    Some(armed) if armed.generation == generation => {
                        timers.remove(&id);
                        true
                    },
                    _ => false,
                }
            };
            if claimed {
                callback(id, fire_at).await;
            }
        });

        timers.insert(id, Armed {
            generation,
            fire_at,
            handle,
        });
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        debug!(%id, %fire_at, delay_ms, "armed timer");
    }

    /// Cancel the live timer for `id`. Returns `false` if there was none.
    pub fn cancel(&self, id: ScheduleId) -> bool {
        match lock(&self.timers).remove(&id) {
            Some(armed) => {
                armed.handle.abort();
                debug!(%id, "cancelled timer");
                true
            },
            None => false,
        }
    }

    pub fn is_armed(&self, id: ScheduleId) -> bool {
        lock(&self.timers).contains_key(&id)
    }

    /// Deadline of the live timer for `id`.
    pub fn fire_at(&self, id: ScheduleId) -> Option<DateTime<Utc>> {
        lock(&self.timers).get(&id).map(|a| a.fire_at)
    }

    pub fn armed_count(&self) -> usize {
        lock(&self.timers).len()
    }

    /// Earliest deadline among live timers.
    pub fn earliest(&self) -> Option<DateTime<Utc>> {
        lock(&self.timers).values().map(|a| a.fire_at).min()
    }

    /// Cancel every live timer, returning how many there were.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<Armed> = lock(&self.timers).drain().map(|(_, a)| a).collect();
        for armed in &drained {
            armed.handle.abort();
        }
        drained.len()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
