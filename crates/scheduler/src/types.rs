//! Core data types for the build scheduler.

use std::fmt;

use {
    chrono::{DateTime, Utc},
    serde::{Deserialize, Serialize},
};

use crate::trigger::BuildHandle;

/// Process-unique schedule identifier, assigned in creation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleId(pub u64);

impl fmt::Display for ScheduleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of the caller that owns a schedule.
///
/// Supplied by the authentication layer and trusted as-is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OwnerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for OwnerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A recurring trigger for one remote job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Schedule {
    pub id: ScheduleId,
    pub owner_id: OwnerId,
    pub job_id: String,
    pub job_name: String,
    pub cron_expression: String,
    pub enabled: bool,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: DateTime<Utc>,
}

/// Input for creating a new schedule.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NewSchedule {
    pub job_id: String,
    #[serde(default)]
    pub job_name: Option<String>,
    pub cron_expression: String,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub description: Option<String>,
}

impl NewSchedule {
    pub fn new(job_id: impl Into<String>, cron_expression: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            cron_expression: cron_expression.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn job_name(mut self, job_name: impl Into<String>) -> Self {
        self.job_name = Some(job_name.into());
        self
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Partial update of an existing schedule. `None` keeps the current value.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SchedulePatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cron_expression: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SchedulePatch {
    #[must_use]
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn cron(expr: impl Into<String>) -> Self {
        Self {
            cron_expression: Some(expr.into()),
            ..Default::default()
        }
    }
}

/// What happened when a fire was dispatched to the trigger client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RunOutcome {
    Triggered { build: BuildHandle },
    Failed { error: String },
}

/// One dispatched fire, kept in the schedule's run history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub schedule_id: ScheduleId,
    pub job_id: String,
    pub fired_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcome: RunOutcome,
}

impl RunRecord {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Triggered { .. })
    }
}

/// Summary status of the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub running: bool,
    pub schedule_count: usize,
    pub enabled_count: usize,
    pub armed_count: usize,
    pub next_run: Option<DateTime<Utc>>,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono::TimeZone};

    #[test]
    fn schedule_serializes_camel_case() {
        let s = Schedule {
            id: ScheduleId(7),
            owner_id: "alice".into(),
            job_id: "deploy".into(),
            job_name: "Deploy".into(),
            cron_expression: "0 0 * * *".into(),
            enabled: true,
            description: String::new(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap(),
            last_run: None,
            next_run: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
        };
        let v = serde_json::to_value(&s).unwrap();
        assert_eq!(v["id"], 7);
        assert_eq!(v["ownerId"], "alice");
        assert_eq!(v["cronExpression"], "0 0 * * *");
        assert_eq!(v["nextRun"], "2024-01-02T00:00:00Z");
        assert!(v["lastRun"].is_null());
    }

    #[test]
    fn new_schedule_defaults_from_json() {
        let json = r#"{ "jobId": "build-api", "cronExpression": "*/5 * * * *" }"#;
        let create: NewSchedule = serde_json::from_str(json).unwrap();
        assert_eq!(create.job_id, "build-api");
        assert!(create.enabled.is_none());
        assert!(create.job_name.is_none());
    }

    #[test]
    fn patch_skips_unset_fields() {
        let v = serde_json::to_value(SchedulePatch::enabled(false)).unwrap();
        assert_eq!(v, serde_json::json!({ "enabled": false }));
    }

    #[test]
    fn run_outcome_tagged() {
        let rec = RunRecord {
            schedule_id: ScheduleId(1),
            job_id: "nightly".into(),
            fired_at: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            finished_at: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 1).unwrap(),
            outcome: RunOutcome::Failed {
                error: "connection refused".into(),
            },
        };
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["outcome"]["kind"], "failed");
        assert!(!rec.is_success());
    }
}
