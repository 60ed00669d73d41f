//! Configuration loading, validation and env substitution.
//!
//! Config files: `buildcron.toml`, `buildcron.yaml`, `buildcron.yml` or
//! `buildcron.json`, searched in `./` then `~/.config/buildcron/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in the raw
//! file text.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, discover_and_load, find_config_file, load_config},
    schema::{BuildcronConfig, JenkinsConfig, MetricsConfig, SchedulerConfig, SeedSchedule},
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_config},
};
