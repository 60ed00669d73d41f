//! Next-run computation for cron expressions.

use std::{collections::BTreeSet, str::FromStr};

use {
    chrono::{DateTime, Utc},
    chrono_tz::Tz,
    cron::Schedule as CronSchedule,
};

use crate::{Error, Result};

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Computes the next instant at which a cron expression matches.
///
/// Stateless apart from the evaluation timezone; every call is pure and
/// deterministic for a given `(expr, from)` pair.
#[derive(Debug, Clone, Copy, Default)]
pub struct NextRunCalculator {
    tz: Option<Tz>,
}

impl NextRunCalculator {
    /// Evaluate expressions in UTC.
    pub fn utc() -> Self {
        Self { tz: None }
    }

    /// Evaluate expressions in an IANA timezone, e.g. `"Europe/Paris"`.
    pub fn with_timezone(name: &str) -> Result<Self> {
        let tz: Tz = name.parse().map_err(|_| Error::unknown_timezone(name))?;
        Ok(Self { tz: Some(tz) })
    }

    pub fn timezone(&self) -> Option<Tz> {
        self.tz
    }

    /// Syntactic check only. A valid expression may still never match.
    pub fn validate(&self, expr: &str) -> bool {
        parse(expr).is_ok()
    }

    /// Next match strictly after `from`.
    pub fn next_after(&self, expr: &str, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.upcoming(expr, from, 1)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::never_matches(expr))
    }

    /// Up to `count` matches strictly after `from`, in order.
    ///
    /// Returns [`Error::NeverMatches`] only when there is no match at all.
    pub fn upcoming(
        &self,
        expr: &str,
        from: DateTime<Utc>,
        count: usize,
    ) -> Result<Vec<DateTime<Utc>>> {
        let schedule = parse(expr)?;
        let times: Vec<DateTime<Utc>> = match self.tz {
            Some(tz) => schedule
                .after(&from.with_timezone(&tz))
                .map(|t| t.with_timezone(&Utc))
                .filter(|t| *t > from)
                .take(count)
                .collect(),
            None => schedule
                .after(&from)
                .filter(|t| *t > from)
                .take(count)
                .collect(),
        };
        if times.is_empty() && count > 0 {
            return Err(Error::never_matches(expr));
        }
        Ok(times)
    }
}

/// Parse a cron expression.
///
/// Accepts classic 5-field crontab syntax (`min hour dom month dow`) as well
/// as the 6/7-field form with seconds and an optional year.
pub fn parse(expr: &str) -> Result<CronSchedule> {
    let normalized = normalize(expr)?;
    CronSchedule::from_str(&normalized).map_err(|e| Error::invalid_cron(expr, e))
}

fn normalize(expr: &str) -> Result<String> {
    let fields: Vec<&str> = expr.split_whitespace().collect();
    match fields.as_slice() {
        [minute, hour, dom, month, dow] => Ok(format!(
            "0 {minute} {hour} {dom} {month} {} *",
            crontab_day_of_week(dow)
        )),
        [_, _, _, _, _, _] | [_, _, _, _, _, _, _] => Ok(fields.join(" ")),
        [] => Err(Error::invalid_cron(expr, "empty expression")),
        _ => Err(Error::invalid_cron(
            expr,
            format!("expected 5, 6 or 7 fields, got {}", fields.len()),
        )),
    }
}

/// Rewrite a numeric crontab day-of-week field (0-7, Sunday = 0 or 7) as day
/// names, which mean the same thing to the `cron` crate.
///
/// Fields using names, or that don't parse as numeric items, are returned
/// unchanged and left to the cron parser to accept or reject.
fn crontab_day_of_week(field: &str) -> String {
    if field == "*" || field == "?" {
        return field.to_string();
    }
    let mut days = BTreeSet::new();
    for item in field.split(',') {
        match numeric_days(item) {
            Some(set) => days.extend(set),
            None => return field.to_string(),
        }
    }
    days.into_iter()
        .map(|d| DAY_NAMES[d % 7])
        .collect::<Vec<_>>()
        .join(",")
}

fn numeric_days(item: &str) -> Option<Vec<usize>> {
    let (base, step) = match item.split_once('/') {
        Some((base, step)) => (base, step.parse::<usize>().ok().filter(|s| *s > 0)?),
        None => (item, 1),
    };
    let (start, end) = match base {
        "*" => (0, 6),
        _ => match base.split_once('-') {
            Some((a, b)) => (a.parse::<usize>().ok()?, b.parse::<usize>().ok()?),
            None => {
                let day = base.parse::<usize>().ok()?;
                // `n/step` means "from n to the end of the week".
                (day, if item.contains('/') { 6 } else { day })
            },
        },
    };
    if start > 7 || end > 7 || start > end {
        return None;
    }
    Some((start..=end).step_by(step).collect())
}
