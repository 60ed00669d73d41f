//! Reconciliation engine: keeps timers in step with the schedule store and
//! turns timer fires into remote build triggers.

use std::{
    collections::{HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard},
};

use {
    chrono::{DateTime, Utc},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use buildcron_metrics::{counter, gauge, histogram, scheduler as scheduler_metrics};

use crate::{
    Error, Result,
    calc::NextRunCalculator,
    clock::{Clock, SystemClock},
    store::{DEFAULT_RUN_HISTORY_LIMIT, ScheduleStore},
    timer::{FireFn, TimerRegistry},
    trigger::TriggerClient,
    types::*,
};

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub calculator: NextRunCalculator,
    pub run_history_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            calculator: NextRunCalculator::utc(),
            run_history_limit: DEFAULT_RUN_HISTORY_LIMIT,
        }
    }
}

#[derive(Default)]
struct State {
    /// Ids whose fire is between dispatch and re-arm.
    firing: HashSet<ScheduleId>,
    stopped: bool,
}

/// The scheduler.
///
/// Every reconciliation step (caller mutation, fire start, fire completion)
/// runs inside one short critical section over [`State`], so steps for the
/// same id never interleave. The lock is never held across the trigger call.
pub struct SchedulerEngine {
    store: ScheduleStore,
    timers: TimerRegistry,
    trigger: Arc<dyn TriggerClient>,
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl SchedulerEngine {
    pub fn new(trigger: Arc<dyn TriggerClient>) -> Arc<Self> {
        Self::with_config(EngineConfig::default(), trigger, Arc::new(SystemClock))
    }

    pub fn with_config(
        config: EngineConfig,
        trigger: Arc<dyn TriggerClient>,
        clock: Arc<dyn Clock>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store: ScheduleStore::with_run_history_limit(
                config.calculator,
                config.run_history_limit,
            ),
            timers: TimerRegistry::new(Arc::clone(&clock)),
            trigger,
            clock,
            state: Mutex::new(State::default()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    /// Create a schedule and arm it if enabled.
    ///
    /// Must be called within a tokio runtime, since arming spawns a task.
    pub fn create(self: &Arc<Self>, owner: &OwnerId, new: NewSchedule) -> Result<Schedule> {
        let state = self.lock();
        let schedule = self.store.create(owner, new, self.clock.now())?;
        self.reconcile(&state, &schedule);
        drop(state);

        info!(
            id = %schedule.id,
            owner = %owner,
            job_id = %schedule.job_id,
            cron = %schedule.cron_expression,
            enabled = schedule.enabled,
            "schedule created"
        );
        Ok(schedule)
    }

    /// Update a schedule, then re-arm or disarm it to match.
    ///
    /// Must be called within a tokio runtime, since arming spawns a task.
    pub fn update(
        self: &Arc<Self>,
        id: ScheduleId,
        owner: &OwnerId,
        patch: SchedulePatch,
    ) -> Result<Schedule> {
        let state = self.lock();
        let schedule = self.store.update(id, owner, patch, self.clock.now())?;
        self.reconcile(&state, &schedule);
        drop(state);

        info!(%id, enabled = schedule.enabled, next_run = %schedule.next_run, "schedule updated");
        Ok(schedule)
    }

    /// Delete a schedule and cancel its timer.
    ///
    /// A fire already dispatching for this id runs to completion but is not
    /// re-armed.
    pub fn delete(&self, id: ScheduleId, owner: &OwnerId) -> Result<()> {
        let state = self.lock();
        self.store.delete(id, owner)?;
        self.timers.cancel(id);
        let firing = state.firing.contains(&id);
        drop(state);

        self.record_armed();
        info!(%id, firing, "schedule deleted");
        Ok(())
    }

    pub fn get(&self, id: ScheduleId, owner: &OwnerId) -> Result<Schedule> {
        self.store.get(id, owner)
    }

    pub fn list(&self, owner: &OwnerId) -> Vec<Schedule> {
        self.store.list(owner)
    }

    pub fn runs(&self, id: ScheduleId, owner: &OwnerId, limit: usize) -> Result<Vec<RunRecord>> {
        self.store.runs(id, owner, limit)
    }

    pub fn status(&self) -> SchedulerStatus {
        let running = !self.lock().stopped;
        let schedules = self.store.all();
        SchedulerStatus {
            running,
            schedule_count: schedules.len(),
            enabled_count: schedules.iter().filter(|s| s.enabled).count(),
            armed_count: self.timers.armed_count(),
            next_run: self.timers.earliest(),
        }
    }

    /// Trigger a schedule's job right away.
    ///
    /// Works for disabled schedules too; those stay disarmed afterwards.
    /// An enabled schedule is re-armed from the current time once the
    /// trigger call returns, or once this future is dropped before it does.
    pub async fn run_now(self: &Arc<Self>, id: ScheduleId, owner: &OwnerId) -> Result<RunRecord> {
        let firing = {
            let mut state = self.lock();
            let schedule = self.store.get(id, owner)?;
            if state.firing.contains(&id) {
                return Err(Error::AlreadyFiring { id });
            }
            self.begin_fire(&mut state, schedule, None)
        };
        info!(%id, job_id = %firing.schedule.job_id, "manual run");
        Ok(self.dispatch(firing).await)
    }

    /// Cancel every timer. In-flight fires finish but are not re-armed.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.stopped = true;
        let cancelled = self.timers.cancel_all();
        drop(state);

        self.record_armed();
        info!(cancelled, "scheduler stopped");
    }

    // ── Internal ────────────────────────────────────────────────────────

    /// Bring the timer for `schedule` in line with its `enabled` flag.
    fn reconcile(self: &Arc<Self>, state: &State, schedule: &Schedule) {
        if schedule.enabled && !state.stopped && !state.firing.contains(&schedule.id) {
            self.timers
                .arm(schedule.id, schedule.next_run, self.fire_callback());
        } else {
            // While firing, arming is left to `complete_fire`, which re-reads
            // the stored schedule.
            self.timers.cancel(schedule.id);
        }
        self.record_armed();
    }

    fn fire_callback(self: &Arc<Self>) -> FireFn {
        let engine = Arc::downgrade(self);
        Arc::new(move |id, fire_at| {
            let engine = engine.clone();
            Box::pin(async move {
                if let Some(engine) = engine.upgrade() {
                    engine.on_fire(id, fire_at).await;
                }
            })
        })
    }

    /// Handle a timer armed for `fire_at` going off.
    async fn on_fire(self: &Arc<Self>, id: ScheduleId, fire_at: DateTime<Utc>) {
        let begun = {
            let mut state = self.lock();
            match self.store.find(id) {
                Some(s) if s.enabled && !state.stopped && !state.firing.contains(&id) => {
                    Some(self.begin_fire(&mut state, s, Some(fire_at)))
                },
                Some(s) => {
                    debug!(%id, enabled = s.enabled, "discarding fire");
                    None
                },
                None => {
                    debug!(%id, "discarding fire for deleted schedule");
                    None
                },
            }
        };

        let Some(firing) = begun else {
            #[cfg(feature = "metrics")]
            counter!(scheduler_metrics::FIRES_DISCARDED_TOTAL).increment(1);
            return;
        };

        #[cfg(feature = "metrics")]
        counter!(scheduler_metrics::FIRES_TOTAL).increment(1);

        self.dispatch(firing).await;
    }

    /// Enter the Firing state: stamp `last_run` and mark the id busy.
    ///
    /// A Firing schedule holds no timer. The returned [`Firing`] arms the
    /// next one when dropped. `due` is the deadline of the timer that went
    /// off, if any; the follow-up is never computed from before it.
    fn begin_fire(
        self: &Arc<Self>,
        state: &mut State,
        schedule: Schedule,
        due: Option<DateTime<Utc>>,
    ) -> Firing {
        let now = self.clock.now();
        self.timers.cancel(schedule.id);
        state.firing.insert(schedule.id);
        let schedule = self
            .store
            .modify(schedule.id, |s| s.last_run = Some(now))
            .unwrap_or(schedule);
        Firing {
            engine: Arc::clone(self),
            base: due.map_or(now, |due| due.max(now)),
            fired_at: now,
            schedule,
            finished: false,
        }
    }

    async fn dispatch(self: &Arc<Self>, mut firing: Firing) -> RunRecord {
        let schedule = firing.schedule.clone();
        let fired_at = firing.fired_at;
        info!(id = %schedule.id, job_id = %schedule.job_id, "triggering build");
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let result = self.trigger.trigger(&schedule.job_id, &HashMap::new()).await;

        #[cfg(feature = "metrics")]
        histogram!(scheduler_metrics::TRIGGER_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        let outcome = match result {
            Ok(build) => {
                info!(
                    id = %schedule.id,
                    job_id = %schedule.job_id,
                    queue_url = build.queue_url.as_deref().unwrap_or("-"),
                    "build triggered"
                );
                RunOutcome::Triggered { build }
            },
            Err(e) => {
                warn!(id = %schedule.id, job_id = %schedule.job_id, error = %e, "trigger failed");
                #[cfg(feature = "metrics")]
                counter!(scheduler_metrics::TRIGGER_FAILURES_TOTAL).increment(1);
                RunOutcome::Failed {
                    error: e.to_string(),
                }
            },
        };

        let record = RunRecord {
            schedule_id: schedule.id,
            job_id: schedule.job_id.clone(),
            fired_at,
            finished_at: self.clock.now(),
            outcome,
        };
        self.store.record_run(record.clone());
        firing.finished = true;
        drop(firing);
        record
    }

    /// Leave the Firing state, re-arming from the schedule as it is now.
    fn complete_fire(self: &Arc<Self>, id: ScheduleId, base: DateTime<Utc>) {
        let mut state = self.lock();
        state.firing.remove(&id);

        let Some(current) = self.store.find(id) else {
            debug!(%id, "schedule deleted while firing");
            return;
        };
        if !current.enabled || state.stopped {
            self.timers.cancel(id);
            self.record_armed();
            return;
        }

        let base = base.max(self.clock.now());
        match self
            .store
            .calculator()
            .next_after(&current.cron_expression, base)
        {
            Ok(next) => {
                self.store.modify(id, |s| s.next_run = next);
                self.timers.arm(id, next, self.fire_callback());
                debug!(%id, next_run = %next, "re-armed");
            },
            Err(e) => {
                self.store.modify(id, |s| s.enabled = false);
                self.timers.cancel(id);
                warn!(%id, error = %e, "no next run, schedule disabled");
                #[cfg(feature = "metrics")]
                counter!(scheduler_metrics::AUTO_DISABLED_TOTAL).increment(1);
            },
        }
        self.record_armed();
    }

    fn record_armed(&self) {
        #[cfg(feature = "metrics")]
        gauge!(scheduler_metrics::SCHEDULES_ARMED).set(self.timers.armed_count() as f64);
    }
}

/// A schedule in the Firing state.
///
/// Dropping it leaves Firing and re-arms, whether the trigger call returned,
/// panicked or had its future dropped by the caller.
struct Firing {
    engine: Arc<SchedulerEngine>,
    schedule: Schedule,
    fired_at: DateTime<Utc>,
    base: DateTime<Utc>,
    finished: bool,
}

impl Drop for Firing {
    fn drop(&mut self) {
        if !self.finished {
            warn!(
                id = %self.schedule.id,
                job_id = %self.schedule.job_id,
                "fire abandoned before the trigger call returned"
            );
        }
        self.engine.complete_fire(self.schedule.id, self.base);
    }
}
