//! tracklens CLI - Command-line interface for tracklens
//!
//! Commands:
//! - heatmap: Grid heatmap of clicks or moves on matching URLs
//! - paths: Navigation path frequencies
//! - funnel: Funnel conversion for a step definition file
//! - session: Mouse analytics for a single session
//! - validate: Normalize raw events and report skipped records
//! - doctor: Diagnose configuration and store snapshots

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use tracklens::normalizer::parse_timestamp;
use tracklens::store::{
    AnalysisStore, Funnel, FunnelAnalysisRecord, HeatmapKind, HeatmapRecord, MemoryStore,
    PathAnalysisRecord,
};
use tracklens::types::FunnelStep;
use tracklens::{
    AnalyticsConfig, AnalyticsError, AnalyticsProcessor, JobOutcome, RawEvent, RawEventAdapter,
    SessionRecord, PRODUCER_NAME, TRACKLENS_VERSION,
};

/// tracklens - Aggregation engine for browser interaction telemetry
#[derive(Parser)]
#[command(name = "tracklens")]
#[command(version = TRACKLENS_VERSION)]
#[command(about = "Heatmaps, navigation paths, funnels and cursor kinematics from tracker events", long_about = None)]
struct Cli {
    /// Analytics config file (JSON); defaults plus TRACKLENS_* environment overrides otherwise
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Output format
    #[arg(long, global = true, default_value = "json-pretty")]
    output_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Grid heatmap of clicks or moves on URLs containing a pattern
    Heatmap {
        #[command(flatten)]
        input: InputArgs,

        /// Substring matched against event URLs
        #[arg(long)]
        url_pattern: String,

        /// Events to count
        #[arg(long, value_enum, default_value = "click")]
        kind: KindArg,

        #[command(flatten)]
        window: WindowArgs,

        /// Screen width in pixels
        #[arg(long)]
        width: Option<u32>,

        /// Screen height in pixels
        #[arg(long)]
        height: Option<u32>,

        /// Cell size in pixels
        #[arg(long)]
        grid_size: Option<u32>,
    },

    /// Navigation path frequencies over sessions started in the window
    Paths {
        #[command(flatten)]
        input: InputArgs,

        #[command(flatten)]
        window: WindowArgs,
    },

    /// Funnel conversion over sessions started in the window
    Funnel {
        #[command(flatten)]
        input: InputArgs,

        /// Funnel steps file: JSON array of {name, url_pattern, step_order}
        #[arg(long)]
        steps: PathBuf,

        /// Funnel name
        #[arg(long, default_value = "funnel")]
        name: String,

        #[command(flatten)]
        window: WindowArgs,
    },

    /// Mouse metrics, cursor patterns and smoothed heatmap for one session
    Session {
        #[command(flatten)]
        input: InputArgs,

        /// Session to analyze
        #[arg(long)]
        session_id: String,
    },

    /// Normalize raw events and report what would be skipped
    Validate {
        #[command(flatten)]
        input: InputArgs,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and store snapshots
    Doctor {
        /// Store snapshot file to check
        #[arg(long)]
        store: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(clap::Args)]
struct InputArgs {
    /// Events file path (use - for stdin)
    #[arg(short, long)]
    input: PathBuf,

    /// Input format
    #[arg(long, default_value = "auto")]
    input_format: InputFormat,

    /// Sessions file (JSON array); derived from the events when omitted
    #[arg(long)]
    sessions: Option<PathBuf>,
}

#[derive(clap::Args)]
struct WindowArgs {
    /// Window start (RFC 3339, epoch ms, or YYYY-MM-DD)
    #[arg(long, value_parser = parse_instant)]
    from: Option<DateTime<Utc>>,

    /// Window end, inclusive (RFC 3339, epoch ms, or YYYY-MM-DD for end of day)
    #[arg(long, value_parser = parse_end_instant)]
    to: Option<DateTime<Utc>>,
}

impl WindowArgs {
    fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            self.from.unwrap_or(DateTime::<Utc>::MIN_UTC),
            self.to.unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Detect from the first character
    Auto,
    /// Newline-delimited JSON (one event per line)
    Ndjson,
    /// JSON array of events
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, Copy, ValueEnum)]
enum KindArg {
    Click,
    Move,
}

impl From<KindArg> for HeatmapKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Click => HeatmapKind::Click,
            KindArg::Move => HeatmapKind::Move,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tracklens=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn run(cli: Cli) -> Result<(), TracklensCliError> {
    let format = cli.output_format;

    // Doctor reports config problems itself
    if let Commands::Doctor { store, json } = &cli.command {
        return cmd_doctor(store.as_deref(), *json);
    }
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Heatmap {
            input,
            url_pattern,
            kind,
            window,
            width,
            height,
            grid_size,
        } => {
            let mut config = config;
            if let Some(grid_size) = grid_size {
                config.grid_size = grid_size;
            }
            let (from, to) = window.bounds();
            let mut record = HeatmapRecord::new(
                format!("{:?} heatmap - {}", HeatmapKind::from(kind), url_pattern),
                url_pattern,
                kind.into(),
                from,
                to,
            );
            record.resolution_width = width.unwrap_or(config.resolution_width);
            record.resolution_height = height.unwrap_or(config.resolution_height);
            let id = record.id;

            let mut store = load_store(&input)?;
            store.save_heatmap(record)?;
            let outcome = AnalyticsProcessor::with_config(config).run_heatmap_job(&mut store, id);
            finish_job(outcome)?;

            let record = store.heatmap(id)?.ok_or(TracklensCliError::MissingRecord(id))?;
            emit(&record.data, &format)
        }

        Commands::Paths { input, window } => {
            let (from, to) = window.bounds();
            let record = PathAnalysisRecord::new("paths", from, to);
            let id = record.id;

            let mut store = load_store(&input)?;
            store.save_path_analysis(record)?;
            let outcome = AnalyticsProcessor::with_config(config).run_path_job(&mut store, id);
            finish_job(outcome)?;

            let record = store.path_analysis(id)?.ok_or(TracklensCliError::MissingRecord(id))?;
            emit(&record.data, &format)
        }

        Commands::Funnel {
            input,
            steps,
            name,
            window,
        } => {
            let steps: Vec<FunnelStep> = serde_json::from_str(&read_input(&steps)?)?;
            let funnel = Funnel::new(name, steps);
            let (from, to) = window.bounds();
            let record = FunnelAnalysisRecord::new(funnel.id, from, to);
            let id = record.id;

            let mut store = load_store(&input)?;
            store.save_funnel(funnel)?;
            store.save_funnel_analysis(record)?;
            let outcome = AnalyticsProcessor::with_config(config).run_funnel_job(&mut store, id);
            finish_job(outcome)?;

            let record = store
                .funnel_analysis(id)?
                .ok_or(TracklensCliError::MissingRecord(id))?;
            emit(&record.data, &format)
        }

        Commands::Session { input, session_id } => {
            let store = load_store(&input)?;
            let analytics =
                AnalyticsProcessor::with_config(config).session_mouse_analytics(&store, &session_id)?;
            emit(&analytics, &format)
        }

        Commands::Validate { input, json } => cmd_validate(&input, json),

        Commands::Doctor { store, json } => cmd_doctor(store.as_deref(), json),
    }
}

fn cmd_validate(input: &InputArgs, json: bool) -> Result<(), TracklensCliError> {
    let events = load_events(input)?;
    let report = RawEventAdapter::validate(&events);

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total events:      {}", report.total);
        println!("Valid events:      {}", report.valid);
        println!("With coordinates:  {}", report.positioned);
        println!("Sessions:          {}", report.sessions);

        if !report.by_type.is_empty() {
            println!("\nBy type:");
            for (event_type, count) in &report.by_type {
                println!("  {:<12} {}", event_type, count);
            }
        }

        if !report.skipped.is_empty() {
            println!("\nSkipped:");
            for skipped in &report.skipped {
                println!("  - index {}: {}", skipped.index, skipped.reason);
            }
        }
    }

    if report.is_clean() {
        Ok(())
    } else {
        Err(TracklensCliError::ValidationFailed(report.skipped.len()))
    }
}

fn cmd_doctor(store: Option<&Path>, json: bool) -> Result<(), TracklensCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "tracklens_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("tracklens version {}", TRACKLENS_VERSION),
    });

    // Environment overrides
    match AnalyticsConfig::from_env() {
        Ok(config) => {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!(
                    "grid {}px over {}x{}, cursor canvas {}x{}",
                    config.grid_size,
                    config.resolution_width,
                    config.resolution_height,
                    config.canvas_width,
                    config.canvas_height
                ),
            });
            if config.resolution_width < config.grid_size || config.resolution_height < config.grid_size {
                checks.push(DoctorCheck {
                    name: "grid".to_string(),
                    status: CheckStatus::Warning,
                    message: "Grid size exceeds the resolution; heatmaps will be empty".to_string(),
                });
            }
        }
        Err(e) => checks.push(DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: e,
        }),
    }

    // Store snapshot if provided
    if let Some(store_path) = store {
        let check = if !store_path.exists() {
            DoctorCheck {
                name: "store".to_string(),
                status: CheckStatus::Warning,
                message: "Store snapshot does not exist".to_string(),
            }
        } else {
            match fs::read_to_string(store_path).map(|s| MemoryStore::from_json(&s)) {
                Ok(Ok(snapshot)) => DoctorCheck {
                    name: "store".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "Store snapshot valid ({} events, {} sessions)",
                        snapshot.event_count(),
                        snapshot.session_count()
                    ),
                },
                Ok(Err(e)) => DoctorCheck {
                    name: "store".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Invalid store snapshot: {}", e),
                },
                Err(e) => DoctorCheck {
                    name: "store".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot read store snapshot: {}", e),
                },
            }
        };
        checks.push(check);
    }

    // Check stdin is available (for piped input)
    let stdin_message = if atty::is(atty::Stream::Stdin) {
        "stdin is a TTY (pass --input <file>)"
    } else {
        "stdin is a pipe (--input - ready)"
    };
    checks.push(DoctorCheck {
        name: "stdin".to_string(),
        status: CheckStatus::Ok,
        message: stdin_message.to_string(),
    });

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: TRACKLENS_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("tracklens Doctor Report");
        println!("=======================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    if report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error)) {
        Err(TracklensCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Helper functions

fn load_config(path: Option<&Path>) -> Result<AnalyticsConfig, TracklensCliError> {
    match path {
        Some(path) => Ok(AnalyticsConfig::from_json(&fs::read_to_string(path)?)?),
        None => AnalyticsConfig::from_env().map_err(TracklensCliError::Config),
    }
}

fn read_input(path: &Path) -> Result<String, TracklensCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn load_events(input: &InputArgs) -> Result<Vec<RawEvent>, TracklensCliError> {
    let data = read_input(&input.input)?;
    let events = match input.input_format {
        InputFormat::Auto => RawEventAdapter::parse_auto(&data)?,
        InputFormat::Ndjson => RawEventAdapter::parse_ndjson(&data)?,
        InputFormat::Json => RawEventAdapter::parse_array(&data)?,
    };
    if events.is_empty() {
        return Err(TracklensCliError::NoEvents);
    }
    debug!(events = events.len(), "loaded input events");
    Ok(events)
}

fn load_store(input: &InputArgs) -> Result<MemoryStore, TracklensCliError> {
    let mut store = MemoryStore::with_events(load_events(input)?);
    if let Some(path) = &input.sessions {
        let sessions: Vec<SessionRecord> = serde_json::from_str(&read_input(path)?)?;
        info!(sessions = sessions.len(), "using explicit sessions");
        store.set_sessions(sessions);
    }
    Ok(store)
}

fn finish_job(outcome: JobOutcome) -> Result<(), TracklensCliError> {
    match outcome {
        JobOutcome::Processed | JobOutcome::AlreadyProcessed => Ok(()),
        JobOutcome::NotFound => Err(TracklensCliError::JobFailed("analysis record not found".to_string())),
        JobOutcome::Failed { reason } => Err(TracklensCliError::JobFailed(reason)),
    }
}

fn emit<T: Serialize>(value: &T, format: &OutputFormat) -> Result<(), TracklensCliError> {
    let out = match format {
        OutputFormat::Json => serde_json::to_string(value)?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(value)?,
    };
    println!("{}", out);
    Ok(())
}

fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return day
            .and_hms_opt(0, 0, 0)
            .map(|d| d.and_utc())
            .ok_or_else(|| format!("invalid date: {}", s));
    }
    let value = match s.parse::<i64>() {
        Ok(ms) => Value::from(ms),
        Err(_) => Value::from(s),
    };
    parse_timestamp(&value).map_err(|e| e.to_string())
}

fn parse_end_instant(s: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(day) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return day
            .and_hms_micro_opt(23, 59, 59, 999_999)
            .map(|d| d.and_utc())
            .ok_or_else(|| format!("invalid date: {}", s));
    }
    parse_instant(s)
}

// Error types

#[derive(Debug)]
enum TracklensCliError {
    Io(io::Error),
    Analytics(AnalyticsError),
    Json(serde_json::Error),
    Config(String),
    NoEvents,
    ValidationFailed(usize),
    JobFailed(String),
    MissingRecord(Uuid),
    DoctorFailed,
}

impl From<io::Error> for TracklensCliError {
    fn from(e: io::Error) -> Self {
        TracklensCliError::Io(e)
    }
}

impl From<AnalyticsError> for TracklensCliError {
    fn from(e: AnalyticsError) -> Self {
        TracklensCliError::Analytics(e)
    }
}

impl From<serde_json::Error> for TracklensCliError {
    fn from(e: serde_json::Error) -> Self {
        TracklensCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<TracklensCliError> for CliError {
    fn from(e: TracklensCliError) -> Self {
        match e {
            TracklensCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            TracklensCliError::Analytics(e) => CliError {
                code: "ANALYTICS_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Ensure input contains tracker events (NDJSON or JSON array)".to_string()),
            },
            TracklensCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            TracklensCliError::Config(msg) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Check TRACKLENS_* environment variables".to_string()),
            },
            TracklensCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No events found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            TracklensCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} events would be skipped", count),
                hint: Some("Fix or drop the skipped records and retry".to_string()),
            },
            TracklensCliError::JobFailed(reason) => CliError {
                code: "JOB_FAILED".to_string(),
                message: reason,
                hint: Some("Check the --from/--to window and input events".to_string()),
            },
            TracklensCliError::MissingRecord(id) => CliError {
                code: "MISSING_RECORD".to_string(),
                message: format!("Analysis record {} disappeared after processing", id),
                hint: None,
            },
            TracklensCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
