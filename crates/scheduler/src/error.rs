use thiserror::Error;

use crate::types::ScheduleId;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{field} is required")]
    MissingField { field: &'static str },

    #[error("invalid cron expression '{expr}': {reason}")]
    InvalidCron { expr: String, reason: String },

    #[error("cron expression '{expr}' has no future occurrence")]
    NeverMatches { expr: String },

    #[error("unknown timezone: {timezone}")]
    UnknownTimezone { timezone: String },

    #[error("schedule not found: {id}")]
    NotFound { id: ScheduleId },

    #[error("schedule {id} is already firing")]
    AlreadyFiring { id: ScheduleId },
}

impl Error {
    #[must_use]
    pub fn missing_field(field: &'static str) -> Self {
        Self::MissingField { field }
    }

    #[must_use]
    pub fn invalid_cron(expr: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidCron {
            expr: expr.into(),
            reason: reason.to_string(),
        }
    }

    #[must_use]
    pub fn never_matches(expr: impl Into<String>) -> Self {
        Self::NeverMatches { expr: expr.into() }
    }

    #[must_use]
    pub fn unknown_timezone(timezone: impl Into<String>) -> Self {
        Self::UnknownTimezone {
            timezone: timezone.into(),
        }
    }

    #[must_use]
    pub fn not_found(id: ScheduleId) -> Self {
        Self::NotFound { id }
    }

    /// Malformed or missing caller input. Rejected before any state change.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingField { .. }
                | Self::InvalidCron { .. }
                | Self::NeverMatches { .. }
                | Self::UnknownTimezone { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
