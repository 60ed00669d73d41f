//! Metric name and label definitions.
//!
//! Every metric buildcron emits is named here so dashboards have one place
//! to look.

/// Scheduler engine metrics
pub mod scheduler {
    /// Number of schedules with a live timer
    pub const SCHEDULES_ARMED: &str = "buildcron_scheduler_schedules_armed";
    /// Timer fires that dispatched a build trigger
    pub const FIRES_TOTAL: &str = "buildcron_scheduler_fires_total";
    /// Timer fires dropped because the schedule was gone, disabled or busy
    pub const FIRES_DISCARDED_TOTAL: &str = "buildcron_scheduler_fires_discarded_total";
    /// Trigger calls that returned an error
    pub const TRIGGER_FAILURES_TOTAL: &str = "buildcron_scheduler_trigger_failures_total";
    /// Schedules disabled because their expression has no further match
    pub const AUTO_DISABLED_TOTAL: &str = "buildcron_scheduler_auto_disabled_total";
    /// Duration of trigger calls in seconds
    pub const TRIGGER_DURATION_SECONDS: &str = "buildcron_scheduler_trigger_duration_seconds";
}

/// Jenkins client metrics
pub mod jenkins {
    /// Build requests sent
    pub const REQUESTS_TOTAL: &str = "buildcron_jenkins_requests_total";
    /// Build requests that failed, labelled by `error_type`
    pub const ERRORS_TOTAL: &str = "buildcron_jenkins_errors_total";
}

/// Common label keys used across metrics
pub mod labels {
    pub const ERROR_TYPE: &str = "error_type";
}

/// Standard histogram buckets for different metric types
pub mod buckets {
    use once_cell::sync::Lazy;

    /// Trigger call duration buckets (in seconds)
    /// Covers 10ms to 1 minute
    pub static TRIGGER_DURATION: Lazy<Vec<f64>> = Lazy::new(|| {
        vec![
            0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
        ]
    });
}
