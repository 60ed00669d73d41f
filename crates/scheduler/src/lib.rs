//! Recurring build triggers driven by cron expressions.
//! Schedules live in memory, scoped by owner; each enabled schedule holds
//! exactly one timer, and every fire starts a build through a [`TriggerClient`].

pub mod calc;
pub mod clock;
pub mod engine;
pub mod error;
pub mod store;
pub mod timer;
pub mod trigger;
pub mod types;

pub use {
    calc::NextRunCalculator,
    clock::{Clock, SystemClock, TokioClock},
    engine::{EngineConfig, SchedulerEngine},
    error::{Error, Result},
    trigger::{BuildHandle, TriggerClient, TriggerError},
    types::{
        NewSchedule, OwnerId, RunOutcome, RunRecord, Schedule, ScheduleId, SchedulePatch,
        SchedulerStatus,
    },
};
