//! In-memory schedule registry, scoped by owner.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};

use crate::{
    Error, Result,
    calc::NextRunCalculator,
    types::{NewSchedule, OwnerId, RunRecord, Schedule, ScheduleId, SchedulePatch},
};

/// Run records kept per schedule unless configured otherwise.
pub const DEFAULT_RUN_HISTORY_LIMIT: usize = 50;

#[derive(Default)]
struct Inner {
    schedules: HashMap<ScheduleId, Schedule>,
    runs: HashMap<ScheduleId, VecDeque<RunRecord>>,
}

/// Authoritative collection of schedules.
///
/// Every caller-facing lookup is keyed by `(id, owner)`; a schedule owned by
/// someone else is reported as [`Error::NotFound`], same as a missing id.
pub struct ScheduleStore {
    calc: NextRunCalculator,
    next_id: AtomicU64,
    run_history_limit: usize,
    inner: Mutex<Inner>,
}

impl ScheduleStore {
    pub fn new(calc: NextRunCalculator) -> Self {
        Self::with_run_history_limit(calc, DEFAULT_RUN_HISTORY_LIMIT)
    }

    pub fn with_run_history_limit(calc: NextRunCalculator, run_history_limit: usize) -> Self {
        Self {
            calc,
            next_id: AtomicU64::new(1),
            run_history_limit,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn calculator(&self) -> &NextRunCalculator {
        &self.calc
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Validate and insert a new schedule. `next_run` is computed from `now`.
    pub fn create(
        &self,
        owner: &OwnerId,
        new: NewSchedule,
        now: DateTime<Utc>,
    ) -> Result<Schedule> {
        let job_id = required("jobId", new.job_id)?;
        let cron_expression = required("cronExpression", new.cron_expression)?;
        let next_run = self.calc.next_after(&cron_expression, now)?;

        let id = ScheduleId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let schedule = Schedule {
            id,
            owner_id: owner.clone(),
            job_name: new
                .job_name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| job_id.clone()),
            job_id,
            cron_expression,
            enabled: new.enabled.unwrap_or(true),
            description: new.description.unwrap_or_default(),
            created_at: now,
            last_run: None,
            next_run,
        };

        self.lock().schedules.insert(id, schedule.clone());
        Ok(schedule)
    }

    pub fn get(&self, id: ScheduleId, owner: &OwnerId) -> Result<Schedule> {
        self.lock()
            .schedules
            .get(&id)
            .filter(|s| &s.owner_id == owner)
            .cloned()
            .ok_or_else(|| Error::not_found(id))
    }

    /// Apply a patch. Nothing is written unless the whole patch validates.
    ///
    /// `next_run` is recomputed when the expression changes or when the
    /// resulting schedule is enabled.
    pub fn update(
        &self,
        id: ScheduleId,
        owner: &OwnerId,
        patch: SchedulePatch,
        now: DateTime<Utc>,
    ) -> Result<Schedule> {
        let mut inner = self.lock();
        let current = inner
            .schedules
            .get(&id)
            .filter(|s| &s.owner_id == owner)
            .ok_or_else(|| Error::not_found(id))?;

        let mut updated = current.clone();
        if let Some(job_id) = patch.job_id {
            updated.job_id = required("jobId", job_id)?;
        }
        if let Some(job_name) = patch.job_name.filter(|n| !n.trim().is_empty()) {
            updated.job_name = job_name;
        }
        let cron_changed = match patch.cron_expression {
            Some(expr) => {
                let expr = required("cronExpression", expr)?;
                let changed = expr != updated.cron_expression;
                updated.cron_expression = expr;
                changed
            },
            None => false,
        };
        if let Some(enabled) = patch.enabled {
            updated.enabled = enabled;
        }
        if let Some(description) = patch.description {
            updated.description = description;
        }

        if cron_changed || updated.enabled {
            updated.next_run = self.calc.next_after(&updated.cron_expression, now)?;
        }

        inner.schedules.insert(id, updated.clone());
        Ok(updated)
    }

    /// Remove a schedule and its run history.
    pub fn delete(&self, id: ScheduleId, owner: &OwnerId) -> Result<Schedule> {
        let mut inner = self.lock();
        if !inner
            .schedules
            .get(&id)
            .is_some_and(|s| &s.owner_id == owner)
        {
            return Err(Error::not_found(id));
        }
        inner.runs.remove(&id);
        inner.schedules.remove(&id).ok_or_else(|| Error::not_found(id))
    }

    /// Schedules of one owner, oldest first.
    pub fn list(&self, owner: &OwnerId) -> Vec<Schedule> {
        let mut schedules: Vec<Schedule> = self
            .lock()
            .schedules
            .values()
            .filter(|s| &s.owner_id == owner)
            .cloned()
            .collect();
        schedules.sort_by_key(|s| (s.created_at, s.id));
        schedules
    }

    /// Every schedule regardless of owner.
    pub fn all(&self) -> Vec<Schedule> {
        self.lock().schedules.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().schedules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Unscoped lookup for the engine's fire path.
    pub(crate) fn find(&self, id: ScheduleId) -> Option<Schedule> {
        self.lock().schedules.get(&id).cloned()
    }

    /// Mutate a schedule in place, bypassing owner scoping.
    pub(crate) fn modify<F>(&self, id: ScheduleId, f: F) -> Option<Schedule>
    where
        F: FnOnce(&mut Schedule),
    {
        let mut inner = self.lock();
        let schedule = inner.schedules.get_mut(&id)?;
        f(schedule);
        Some(schedule.clone())
    }

    /// Append to a schedule's run history. Ignored if the schedule is gone.
    pub fn record_run(&self, record: RunRecord) -> bool {
        let mut inner = self.lock();
        if !inner.schedules.contains_key(&record.schedule_id) {
            return false;
        }
        let limit = self.run_history_limit;
        let runs = inner.runs.entry(record.schedule_id).or_default();
        runs.push_back(record);
        while runs.len() > limit {
            runs.pop_front();
        }
        true
    }

    /// The most recent `limit` runs, oldest first.
    pub fn runs(&self, id: ScheduleId, owner: &OwnerId, limit: usize) -> Result<Vec<RunRecord>> {
        let inner = self.lock();
        if !inner
            .schedules
            .get(&id)
            .is_some_and(|s| &s.owner_id == owner)
        {
            return Err(Error::not_found(id));
        }
        let records = inner.runs.get(&id);
        let len = records.map_or(0, VecDeque::len);
        Ok(records
            .into_iter()
            .flatten()
            .skip(len.saturating_sub(limit))
            .cloned()
            .collect())
    }
}

fn required(field: &'static str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        return Err(Error::missing_field(field));
    }
    Ok(value)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::RunOutcome,
        chrono::{Duration, TimeZone},
    };

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
    }

    fn store() -> ScheduleStore {
        ScheduleStore::new(NextRunCalculator::utc())
    }

    fn alice() -> OwnerId {
        "alice".into()
    }

    fn bob() -> OwnerId {
        "bob".into()
    }

    fn run(id: ScheduleId, minute: i64) -> RunRecord {
        RunRecord {
            schedule_id: id,
            job_id: "nightly".into(),
            fired_at: now() + Duration::minutes(minute),
            finished_at: now() + Duration::minutes(minute),
            outcome: RunOutcome::Failed {
                error: "down".into(),
            },
        }
    }

    #[test]
    fn create_assigns_increasing_ids_and_defaults() {
        let store = store();
        let a = store
            .create(&alice(), NewSchedule::new("nightly", "0 0 * * *"), now())
            .unwrap();
        let b = store
            .create(&alice(), NewSchedule::new("hourly", "0 * * * *"), now())
            .unwrap();
        assert!(b.id > a.id);
        assert!(a.enabled);
        assert_eq!(a.job_name, "nightly");
        assert_eq!(a.description, "");
        assert_eq!(a.created_at, now());
        assert_eq!(a.next_run, Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
        assert!(a.last_run.is_none());
    }

    #[test]
    fn create_requires_job_and_expression() {
        let store = store();
        let err = store
            .create(&alice(), NewSchedule::new("", "0 0 * * *"), now())
            .unwrap_err();
        assert!(matches!(err, Error::MissingField { field: "jobId" }));

        let err = store
            .create(&alice(), NewSchedule::new("nightly", "  "), now())
            .unwrap_err();
        assert!(matches!(err, Error::MissingField {
            field: "cronExpression"
        }));

        let err = store
            .create(&alice(), NewSchedule::new("nightly", "every day"), now())
            .unwrap_err();
        assert!(err.is_validation());
        assert!(store.is_empty());
    }

    #[test]
    fn other_owner_sees_not_found() {
        let store = store();
        let s = store
            .create(&alice(), NewSchedule::new("nightly", "0 0 * * *"), now())
            .unwrap();

        assert!(matches!(
            store.get(s.id, &bob()).unwrap_err(),
            Error::NotFound { .. }
        ));
        assert!(matches!(
            store
                .update(s.id, &bob(), SchedulePatch::enabled(false), now())
                .unwrap_err(),
            Error::NotFound { .. }
        ));
        assert!(matches!(
            store.delete(s.id, &bob()).unwrap_err(),
            Error::NotFound { .. }
        ));
        assert!(store.list(&bob()).is_empty());
        assert!(store.get(s.id, &alice()).unwrap().enabled);
    }

    #[test]
    fn invalid_update_leaves_schedule_untouched() {
        let store = store();
        let s = store
            .create(&alice(), NewSchedule::new("nightly", "0 0 * * *"), now())
            .unwrap();

        let patch = SchedulePatch {
            description: Some("changed".into()),
            cron_expression: Some("99 * * * *".into()),
            ..Default::default()
        };
        assert!(store.update(s.id, &alice(), patch, now()).is_err());
        assert_eq!(store.get(s.id, &alice()).unwrap(), s);
    }

    #[test]
    fn disabled_update_keeps_next_run() {
        let store = store();
        let s = store
            .create(&alice(), NewSchedule::new("nightly", "0 0 * * *"), now())
            .unwrap();
        let later = now() + Duration::days(3);
        let off = store
            .update(s.id, &alice(), SchedulePatch::enabled(false), later)
            .unwrap();
        assert!(!off.enabled);
        assert_eq!(off.next_run, s.next_run);

        let on = store
            .update(s.id, &alice(), SchedulePatch::enabled(true), later)
            .unwrap();
        assert!(on.next_run > later);
    }

    #[test]
    fn blank_job_name_update_keeps_existing_name() {
        let store = store();
        let s = store
            .create(
                &alice(),
                NewSchedule::new("nightly", "0 0 * * *").job_name("Nightly build"),
                now(),
            )
            .unwrap();

        for blank in ["", "   "] {
            let patch = SchedulePatch {
                job_name: Some(blank.into()),
                ..Default::default()
            };
            let same = store.update(s.id, &alice(), patch, now()).unwrap();
            assert_eq!(same.job_name, "Nightly build");
        }

        let patch = SchedulePatch {
            job_name: Some("Renamed".into()),
            ..Default::default()
        };
        let renamed = store.update(s.id, &alice(), patch, now()).unwrap();
        assert_eq!(renamed.job_name, "Renamed");
    }

    #[test]
    fn delete_twice_is_not_found() {
        let store = store();
        let s = store
            .create(&alice(), NewSchedule::new("nightly", "0 0 * * *"), now())
            .unwrap();
        store.delete(s.id, &alice()).unwrap();
        assert!(matches!(
            store.delete(s.id, &alice()).unwrap_err(),
            Error::NotFound { .. }
        ));
    }

    #[test]
    fn list_is_owner_scoped_and_ordered() {
        let store = store();
        let first = store
            .create(&alice(), NewSchedule::new("a", "0 0 * * *"), now())
            .unwrap();
        store
            .create(&bob(), NewSchedule::new("b", "0 0 * * *"), now())
            .unwrap();
        let second = store
            .create(
                &alice(),
                NewSchedule::new("c", "0 0 * * *"),
                now() + Duration::seconds(1),
            )
            .unwrap();

        let ids: Vec<_> = store.list(&alice()).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert_eq!(store.all().len(), 3);
    }

    #[test]
    fn run_history_is_capped() {
        let store = ScheduleStore::with_run_history_limit(NextRunCalculator::utc(), 3);
        let s = store
            .create(&alice(), NewSchedule::new("nightly", "0 0 * * *"), now())
            .unwrap();
        for minute in 0..5 {
            assert!(store.record_run(run(s.id, minute)));
        }

        let runs = store.runs(s.id, &alice(), 10).unwrap();
        assert_eq!(runs.len(), 3);
        assert_eq!(runs[0].fired_at, now() + Duration::minutes(2));

        let latest = store.runs(s.id, &alice(), 1).unwrap();
        assert_eq!(latest[0].fired_at, now() + Duration::minutes(4));

        assert!(store.runs(s.id, &bob(), 10).is_err());
    }

    #[test]
    fn runs_for_deleted_schedule_are_dropped() {
        let store = store();
        let s = store
            .create(&alice(), NewSchedule::new("nightly", "0 0 * * *"), now())
            .unwrap();
        store.delete(s.id, &alice()).unwrap();
        assert!(!store.record_run(run(s.id, 0)));
    }
}
