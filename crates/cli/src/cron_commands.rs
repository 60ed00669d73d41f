use {
    anyhow::{Context, Result},
    buildcron_scheduler::NextRunCalculator,
    chrono::{DateTime, Utc},
};

/// Print the next `count` fire times of `expr`.
pub fn next(expr: &str, count: usize, from: Option<&str>, tz: Option<&str>) -> Result<()> {
    let calc = match tz {
        Some(tz) => NextRunCalculator::with_timezone(tz)?,
        None => NextRunCalculator::utc(),
    };
    let from = match from {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .with_context(|| format!("invalid --from '{s}', expected RFC 3339"))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let times = calc.upcoming(expr, from, count)?;
    for line in format_times(&calc, &times) {
        println!("{line}");
    }
    if times.len() < count {
        eprintln!("(no further matches)");
    }
    Ok(())
}

fn format_times(calc: &NextRunCalculator, times: &[DateTime<Utc>]) -> Vec<String> {
    times
        .iter()
        .map(|t| match calc.timezone() {
            Some(tz) => format!("{}  {}", t.to_rfc3339(), t.with_timezone(&tz).to_rfc3339()),
            None => t.to_rfc3339(),
        })
        .collect()
}
