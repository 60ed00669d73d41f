mod config_commands;
mod cron_commands;

use std::{path::PathBuf, sync::Arc, time::Duration};

use {
    anyhow::Context,
    buildcron_config::{BuildcronConfig, Severity},
    buildcron_jenkins::JenkinsClient,
    buildcron_metrics::MetricsRecorderConfig,
    buildcron_scheduler::{
        EngineConfig, NewSchedule, NextRunCalculator, OwnerId, SchedulerEngine, SystemClock,
    },
    clap::{Parser, Subcommand},
    tracing::{debug, error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "buildcron", about = "buildcron: cron schedules for Jenkins builds")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file (overrides discovery of ./buildcron.toml etc.).
    #[arg(long, global = true, env = "BUILDCRON_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted (default when no subcommand is provided).
    Run,
    /// Print upcoming fire times of a cron expression.
    Next {
        /// Cron expression, 5-field crontab or 6/7-field with seconds.
        expr: String,
        #[arg(short = 'n', long, default_value_t = 5)]
        count: usize,
        /// Start instant (RFC 3339). Defaults to now.
        #[arg(long)]
        from: Option<String>,
        /// IANA timezone to evaluate the expression in.
        #[arg(long)]
        tz: Option<String>,
    },
    /// Validate the configuration file.
    Check {
        /// Show informational diagnostics in addition to errors and warnings.
        #[arg(long)]
        verbose: bool,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    match cli.command {
        None | Some(Commands::Run) => run(cli.config).await,
        Some(Commands::Next {
            expr,
            count,
            from,
            tz,
        }) => cron_commands::next(&expr, count, from.as_deref(), tz.as_deref()),
        Some(Commands::Check { verbose }) => config_commands::check(cli.config.as_deref(), verbose),
    }
}

async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "buildcron starting");

    let config = match config_path {
        Some(ref path) => buildcron_config::load_config(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => buildcron_config::discover_and_load(),
    };

    let diagnostics = buildcron_config::validate_config(&config);
    for d in &diagnostics {
        match d.severity {
            Severity::Error => error!(path = %d.path, "{}", d.message),
            Severity::Warning => warn!(path = %d.path, "{}", d.message),
            Severity::Info => debug!(path = %d.path, "{}", d.message),
        }
    }
    if diagnostics.iter().any(|d| d.severity == Severity::Error) {
        anyhow::bail!("invalid configuration, run `buildcron check` for details");
    }

    let metrics = buildcron_metrics::init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        ..Default::default()
    })?;

    let engine = build_engine(&config)?;
    seed_schedules(&engine, &config);

    let status = engine.status();
    info!(
        schedules = status.schedule_count,
        armed = status.armed_count,
        next_run = ?status.next_run,
        "scheduler running"
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for ctrl-c")?;
    info!("shutting down");
    engine.shutdown();

    if let Some(handle) = metrics {
        print!("{}", handle.render());
    }
    Ok(())
}

fn build_engine(config: &BuildcronConfig) -> anyhow::Result<Arc<SchedulerEngine>> {
    let calculator = match config.scheduler.timezone.as_deref() {
        Some(tz) => NextRunCalculator::with_timezone(tz)?,
        None => NextRunCalculator::utc(),
    };

    let jenkins = JenkinsClient::new(buildcron_jenkins::JenkinsConfig {
        url: config.jenkins.url.clone(),
        user: config.jenkins.user.clone(),
        token: config.jenkins.token.clone(),
        timeout: Duration::from_secs(config.jenkins.timeout_secs),
    })?;

    Ok(SchedulerEngine::with_config(
        EngineConfig {
            calculator,
            run_history_limit: config.scheduler.run_history_limit,
        },
        Arc::new(jenkins),
        Arc::new(SystemClock),
    ))
}

fn seed_schedules(engine: &Arc<SchedulerEngine>, config: &BuildcronConfig) {
    for seed in &config.schedules {
        let mut new = NewSchedule::new(&seed.job_id, &seed.cron).enabled(seed.enabled);
        if let Some(ref name) = seed.job_name {
            new = new.job_name(name);
        }
        if let Some(ref description) = seed.description {
            new = new.description(description);
        }
        if let Err(e) = engine.create(&OwnerId::new(&seed.owner), new) {
            warn!(job_id = %seed.job_id, cron = %seed.cron, error = %e, "skipping seed schedule");
        }
    }
}
