/// Config schema types (scheduler, jenkins, metrics, seed schedules).
use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

pub const DEFAULT_JENKINS_URL: &str = "http://localhost:8080";
pub const DEFAULT_OWNER: &str = "default";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildcronConfig {
    pub scheduler: SchedulerConfig,
    pub jenkins: JenkinsConfig,
    pub metrics: MetricsConfig,
    /// Schedules created at startup.
    pub schedules: Vec<SeedSchedule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// IANA timezone cron expressions are evaluated in. UTC when unset.
    pub timezone: Option<String>,
    /// Run records kept per schedule.
    pub run_history_limit: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            timezone: None,
            run_history_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JenkinsConfig {
    pub url: String,
    pub user: Option<String>,
    /// API token. Sent as the basic-auth password when `user` is set,
    /// otherwise as a bearer token.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<Secret<String>>,
    pub timeout_secs: u64,
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_JENKINS_URL.into(),
            user: None,
            token: None,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

/// A schedule declared in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedSchedule {
    #[serde(default = "default_owner")]
    pub owner: String,
    pub job_id: String,
    #[serde(default)]
    pub job_name: Option<String>,
    pub cron: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_owner() -> String {
    DEFAULT_OWNER.into()
}

fn default_true() -> bool {
    true
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
