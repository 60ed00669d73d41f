//! Configuration validation.
//!
//! Checks a config file for syntax errors, unknown or misspelled fields, and
//! semantic problems (bad URLs, unknown timezones, invalid seed cron
//! expressions, missing credentials).

use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
};

use buildcron_scheduler::NextRunCalculator;

use crate::{loader, schema::BuildcronConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "invalid-url",
    /// "timezone", "cron", "security", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "schedules[0].cron"
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{} [{}]: {}", self.severity, self.category, self.message)
        } else {
            write!(
                f,
                "{} [{}] {}: {}",
                self.severity, self.category, self.path, self.message
            )
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Array(Box<KnownKeys>),
    Leaf,
}

/// Mirrors every field in `schema.rs`.
fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Array, Leaf, Struct};

    let seed = Struct(HashMap::from([
        ("owner", Leaf),
        ("job_id", Leaf),
        ("job_name", Leaf),
        ("cron", Leaf),
        ("enabled", Leaf),
        ("description", Leaf),
    ]));

    Struct(HashMap::from([
        (
            "scheduler",
            Struct(HashMap::from([
                ("timezone", Leaf),
                ("run_history_limit", Leaf),
            ])),
        ),
        (
            "jenkins",
            Struct(HashMap::from([
                ("url", Leaf),
                ("user", Leaf),
                ("token", Leaf),
                ("timeout_secs", Leaf),
            ])),
        ),
        ("metrics", Struct(HashMap::from([("enabled", Leaf)]))),
        ("schedules", Array(Box::new(seed))),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    if a.is_empty() {
        return b_len;
    }
    if b.is_empty() {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

/// Closest candidate within `max_distance` edits.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|&c| (c, levenshtein(needle, c)))
        .filter(|&(_, d)| d > 0 && d <= max_distance)
        .min_by_key(|&(c, d)| (d, c))
        .map(|(c, _)| c)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or the discovered one if `path`
/// is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path
        .map(Path::to_path_buf)
        .or_else(loader::find_config_file);

    let Some(actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults".into(),
            }],
            config_path: None,
        };
    };

    let diagnostics = match loader::load_config_value(&actual_path) {
        Ok(value) => validate_value(&value),
        Err(e) => vec![Diagnostic {
            severity: Severity::Error,
            category: "syntax",
            path: String::new(),
            message: e.to_string(),
        }],
    };
    ValidationResult {
        diagnostics,
        config_path: Some(actual_path),
    }
}

/// Validate an already-parsed config document.
#[must_use]
pub fn validate_value(value: &serde_json::Value) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();
    check_unknown_fields(value, &build_schema_map(), "", &mut diagnostics);

    match serde_json::from_value::<BuildcronConfig>(value.clone()) {
        Ok(config) => diagnostics.extend(validate_config(&config)),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        }),
    }
    diagnostics
}

/// Semantic checks on a typed config.
#[must_use]
pub fn validate_config(config: &BuildcronConfig) -> Vec<Diagnostic> {
    let mut diagnostics = Vec::new();

    match url::Url::parse(&config.jenkins.url) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => {},
        Ok(u) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "invalid-url",
            path: "jenkins.url".into(),
            message: format!("unsupported scheme \"{}\"", u.scheme()),
        }),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "invalid-url",
            path: "jenkins.url".into(),
            message: format!("invalid URL \"{}\": {e}", config.jenkins.url),
        }),
    }

    if config.jenkins.token.is_none() {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "security",
            path: "jenkins.token".into(),
            message: "no API token configured; builds will be requested anonymously".into(),
        });
    }
    if config.jenkins.timeout_secs == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: "jenkins.timeout_secs".into(),
            message: "timeout must be at least one second".into(),
        });
    }

    let calc = match config.scheduler.timezone.as_deref() {
        Some(tz) => match NextRunCalculator::with_timezone(tz) {
            Ok(calc) => calc,
            Err(_) => {
                diagnostics.push(Diagnostic {
                    severity: Severity::Error,
                    category: "timezone",
                    path: "scheduler.timezone".into(),
                    message: format!("unknown timezone \"{tz}\""),
                });
                NextRunCalculator::utc()
            },
        },
        None => NextRunCalculator::utc(),
    };

    if config.scheduler.run_history_limit == 0 {
        diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "type-error",
            path: "scheduler.run_history_limit".into(),
            message: "run history is disabled".into(),
        });
    }

    let mut seen = HashSet::new();
    for (i, seed) in config.schedules.iter().enumerate() {
        if seed.job_id.trim().is_empty() {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "type-error",
                path: format!("schedules[{i}].job_id"),
                message: "job_id is required".into(),
            });
        }
        if !calc.validate(&seed.cron) {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "cron",
                path: format!("schedules[{i}].cron"),
                message: format!("invalid cron expression \"{}\"", seed.cron),
            });
        }
        if !seen.insert((&seed.owner, &seed.job_id, &seed.cron)) {
            diagnostics.push(Diagnostic {
                severity: Severity::Warning,
                category: "cron",
                path: format!("schedules[{i}]"),
                message: format!("duplicate schedule for job \"{}\"", seed.job_id),
            });
        }
    }

    diagnostics
}

/// Walk the value tree against the schema tree and flag unknown keys.
fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    match (value, schema) {
        (serde_json::Value::Object(map), KnownKeys::Struct(fields)) => {
            let mut known_keys: Vec<&str> = fields.keys().copied().collect();
            known_keys.sort_unstable();
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                match fields.get(key.as_str()) {
                    Some(child_schema) => {
                        check_unknown_fields(child, child_schema, &path, diagnostics)
                    },
                    None => {
                        let message = match suggest(key, &known_keys, 3) {
                            Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                            None => "unknown field".into(),
                        };
                        diagnostics.push(Diagnostic {
                            severity: Severity::Error,
                            category: "unknown-field",
                            path,
                            message,
                        });
                    },
                }
            }
        },
        (serde_json::Value::Array(items), KnownKeys::Array(item_schema)) => {
            for (i, item) in items.iter().enumerate() {
                let path = format!("{prefix}[{i}]");
                check_unknown_fields(item, item_schema, &path, diagnostics);
            }
        },
        // Leaf or type mismatch; type errors are reported by deserialization.
        _ => {},
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
