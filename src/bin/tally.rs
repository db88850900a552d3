//! Tally CLI - Command-line interface for Synheart Tally
//!
//! Commands:
//! - ingest: Merge importer output into an event store
//! - daily: Print the daily matrix
//! - calendar: Print events split at logical-day boundaries
//! - heatmap: Print the time-of-day heatmap
//! - layers: Compute and write weekly layers
//! - validate: Validate importer output without ingesting it
//! - doctor: Diagnose configuration and stores

use clap::{Parser, Subcommand, ValueEnum};
use chrono::NaiveDate;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use synheart_tally::pipeline::LayersSummary;
use synheart_tally::schema::{RecordAdapter, RecordBatch, SCHEMA_VERSION};
use synheart_tally::split::{last_instant, split_events};
use synheart_tally::streaks::StreakLog;
use synheart_tally::{
    CategoryCatalog, ComputeError, EventStore, LayerStore, PipelineConfig, TallyProcessor,
    PRODUCER_NAME, TALLY_VERSION,
};

const DEFAULT_LOG_DIRECTIVES: &str = "info";

/// Tally - Batch engine for personal time-tracking data
#[derive(Parser)]
#[command(name = "tally")]
#[command(author = "Synheart AI Inc")]
#[command(version = TALLY_VERSION)]
#[command(about = "Turn time-tracking exports into daily matrices and weekly layers", long_about = None)]
struct Cli {
    /// Pipeline configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Merge importer output into an event store
    Ingest {
        /// Event store (NDJSON)
        #[arg(short, long)]
        store: PathBuf,

        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,
    },

    /// Print the daily matrix (hours per logical day and category)
    Daily {
        #[arg(short, long)]
        store: PathBuf,

        /// Category catalog (JSON)
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Print events split at logical-day boundaries, one piece per line
    Calendar {
        #[arg(short, long)]
        store: PathBuf,
    },

    /// Print the minute-of-day heatmap
    Heatmap {
        #[arg(short, long)]
        store: PathBuf,

        #[arg(long)]
        catalog: Option<PathBuf>,

        /// First local date to include (YYYY-MM-DD)
        #[arg(long)]
        since: NaiveDate,

        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,
    },

    /// Compute weekly layers and write changed files
    Layers {
        #[arg(short, long)]
        store: PathBuf,

        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Layer root directory
        #[arg(short, long)]
        output: PathBuf,

        /// Directory of habit logs (`<name>.json`) to score as streak layers
        #[arg(long)]
        streaks: Option<PathBuf>,
    },

    /// Validate importer output
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and stores
    Doctor {
        /// Check an event store
        #[arg(long)]
        store: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Compact JSON
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

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

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVES));
    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_writer(io::stderr).with_target(true))
        .try_init();
}

fn run(cli: Cli) -> Result<(), TallyCliError> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Ingest {
            store,
            input,
            input_format,
        } => cmd_ingest(config, &store, &input, input_format),

        Commands::Daily {
            store,
            catalog,
            output_format,
        } => cmd_daily(config, &store, catalog.as_deref(), output_format),

        Commands::Calendar { store } => cmd_calendar(config, &store),

        Commands::Heatmap {
            store,
            catalog,
            since,
            output_format,
        } => cmd_heatmap(config, &store, catalog.as_deref(), since, output_format),

        Commands::Layers {
            store,
            catalog,
            output,
            streaks,
        } => cmd_layers(config, &store, catalog.as_deref(), &output, streaks.as_deref()),

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(config, &input, input_format, json),

        Commands::Doctor { store, json } => cmd_doctor(config, store.as_deref(), json),
    }
}

/// Parse the configuration; validation happens when a processor is built so
/// that `doctor` can still report on an invalid file
fn load_config(path: Option<&Path>) -> Result<PipelineConfig, TallyCliError> {
    match path {
        Some(path) => Ok(serde_json::from_str(&fs::read_to_string(path)?)?),
        None => Ok(PipelineConfig::default()),
    }
}

fn load_catalog(path: Option<&Path>) -> Result<CategoryCatalog, TallyCliError> {
    match path {
        Some(path) => Ok(CategoryCatalog::from_json(&fs::read_to_string(path)?)?),
        None => Ok(CategoryCatalog::new()),
    }
}

fn read_input(input: &Path) -> Result<String, TallyCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn parse_input(data: &str, format: InputFormat) -> Result<RecordBatch, TallyCliError> {
    match format {
        InputFormat::Ndjson => Ok(RecordAdapter::parse_ndjson(data)),
        InputFormat::Json => Ok(RecordAdapter::parse_array(data)?),
    }
}

fn print_json<T: serde::Serialize>(value: &T, format: &OutputFormat) -> Result<(), TallyCliError> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string(value)?),
        OutputFormat::JsonPretty => println!("{}", serde_json::to_string_pretty(value)?),
    }
    Ok(())
}

fn cmd_ingest(
    config: PipelineConfig,
    store: &Path,
    input: &Path,
    input_format: InputFormat,
) -> Result<(), TallyCliError> {
    let batch = parse_input(&read_input(input)?, input_format)?;
    if batch.is_empty() {
        return Err(TallyCliError::NoRecords);
    }

    let processor = TallyProcessor::new(config)?;
    let summary = processor.ingest(&EventStore::new(store), batch)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn cmd_daily(
    config: PipelineConfig,
    store: &Path,
    catalog: Option<&Path>,
    output_format: OutputFormat,
) -> Result<(), TallyCliError> {
    let processor = TallyProcessor::new(config)?;
    let events = EventStore::new(store).load(processor.timezone())?;
    let matrix = processor.daily_matrix(&events, &load_catalog(catalog)?);
    print_json(&matrix.to_table(), &output_format)
}

#[derive(serde::Serialize)]
struct CalendarPiece {
    category: String,
    logical_date: NaiveDate,
    start: String,
    end: String,
    last_instant: String,
    duration_hours: f64,
    flags: Vec<&'static str>,
}

fn cmd_calendar(config: PipelineConfig, store: &Path) -> Result<(), TallyCliError> {
    let processor = TallyProcessor::new(config)?;
    let boundary = processor.config().day_boundary();
    let events = EventStore::new(store).load(processor.timezone())?;

    for piece in split_events(events.iter(), &boundary) {
        let line = CalendarPiece {
            logical_date: piece.logical_date(boundary.offset_for(&piece.category)),
            start: piece.start.to_rfc3339(),
            end: piece.end().to_rfc3339(),
            last_instant: last_instant(&piece).to_rfc3339(),
            duration_hours: piece.duration_hours(),
            flags: piece.quality_flags.iter().map(|f| f.as_str()).collect(),
            category: piece.category,
        };
        println!("{}", serde_json::to_string(&line)?);
    }
    Ok(())
}

fn cmd_heatmap(
    config: PipelineConfig,
    store: &Path,
    catalog: Option<&Path>,
    since: NaiveDate,
    output_format: OutputFormat,
) -> Result<(), TallyCliError> {
    let processor = TallyProcessor::new(config)?;
    let events = EventStore::new(store).load(processor.timezone())?;
    let heatmap = processor.heatmap(&events, &load_catalog(catalog)?, since);
    print_json(&heatmap.to_table(), &output_format)
}

fn load_streak_logs(dir: &Path) -> Result<Vec<StreakLog>, TallyCliError> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|path| -> Result<StreakLog, TallyCliError> {
            let name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_default();
            Ok(StreakLog::from_json(name, &fs::read_to_string(path)?)?)
        })
        .collect()
}

fn cmd_layers(
    config: PipelineConfig,
    store: &Path,
    catalog: Option<&Path>,
    output: &Path,
    streaks: Option<&Path>,
) -> Result<(), TallyCliError> {
    let processor = TallyProcessor::new(config)?;
    let events = EventStore::new(store).load(processor.timezone())?;

    let mut results = processor.weekly_layers(&events, &load_catalog(catalog)?);
    if let Some(dir) = streaks {
        results.extend(processor.streak_layers(&load_streak_logs(dir)?));
    }

    let summary = processor.write_layers(&LayerStore::new(output), results);
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if summary.is_success() {
        Ok(())
    } else {
        Err(TallyCliError::LayersFailed(summary))
    }
}

fn cmd_validate(
    config: PipelineConfig,
    input: &Path,
    input_format: InputFormat,
    json: bool,
) -> Result<(), TallyCliError> {
    let batch = parse_input(&read_input(input)?, input_format)?;
    let failures = RecordAdapter::validate_records(&batch, config.tz()?);

    let report = ValidationReport {
        schema_version: SCHEMA_VERSION.to_string(),
        total_records: batch.len(),
        valid_records: batch.len() - failures.len(),
        invalid_records: failures.len(),
        errors: failures
            .iter()
            .map(|f| ValidationErrorDetail {
                index: f.index,
                error: f.error.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total records:   {}", report.total_records);
        println!("Valid records:   {}", report.valid_records);
        println!("Invalid records: {}", report.invalid_records);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!("  - Record {}: {}", err.index, err.error);
            }
        }
    }

    if report.invalid_records > 0 {
        Err(TallyCliError::ValidationFailed(report.invalid_records))
    } else {
        Ok(())
    }
}

fn cmd_doctor(config: PipelineConfig, store: Option<&Path>, json: bool) -> Result<(), TallyCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "tally_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Tally version {}", TALLY_VERSION),
    });

    checks.push(DoctorCheck {
        name: "schema_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Input schema: {}", SCHEMA_VERSION),
    });

    checks.push(match config.validate() {
        Ok(()) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: format!(
                "Timezone {}, weeks start {}, {} layer spec(s)",
                config.timezone,
                config.anchor_weekday,
                config.layers.len()
            ),
        },
        Err(e) => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    });

    if let Some(store_path) = store {
        let check = if !store_path.exists() {
            DoctorCheck {
                name: "store".to_string(),
                status: CheckStatus::Warning,
                message: "Event store does not exist yet".to_string(),
            }
        } else {
            match config.tz().and_then(|tz| EventStore::new(store_path).load(tz)) {
                Ok(events) => DoctorCheck {
                    name: "store".to_string(),
                    status: CheckStatus::Ok,
                    message: format!(
                        "{} events, newest {}",
                        events.len(),
                        events
                            .last_start()
                            .map(|start| start.to_rfc3339())
                            .unwrap_or_else(|| "n/a".to_string())
                    ),
                },
                Err(e) => DoctorCheck {
                    name: "store".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Cannot load event store: {}", e),
                },
            }
        };
        checks.push(check);
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (pass --input <file>)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: TALLY_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Tally Doctor Report");
        println!("===================");
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

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(TallyCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

// Error handling

#[derive(Debug)]
enum TallyCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    NoRecords,
    ValidationFailed(usize),
    LayersFailed(LayersSummary),
    DoctorFailed,
}

impl From<io::Error> for TallyCliError {
    fn from(e: io::Error) -> Self {
        TallyCliError::Io(e)
    }
}

impl From<ComputeError> for TallyCliError {
    fn from(e: ComputeError) -> Self {
        TallyCliError::Compute(e)
    }
}

impl From<serde_json::Error> for TallyCliError {
    fn from(e: serde_json::Error) -> Self {
        TallyCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<TallyCliError> for CliError {
    fn from(e: TallyCliError) -> Self {
        match e {
            TallyCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            TallyCliError::Compute(e) => {
                let hint = match &e {
                    ComputeError::InvalidConfig(_)
                    | ComputeError::InvalidTimezone(_)
                    | ComputeError::NormalizationError(_)
                    | ComputeError::InvalidLayerName(_) => "Run 'tally doctor --config <file>' for details",
                    _ => "Ensure input matches the tally.event.v1 schema",
                };
                CliError {
                    code: "COMPUTE_ERROR".to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            TallyCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            TallyCliError::NoRecords => CliError {
                code: "NO_RECORDS".to_string(),
                message: "No records found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            TallyCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} records failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            TallyCliError::LayersFailed(summary) => CliError {
                code: "LAYERS_FAILED".to_string(),
                message: format!(
                    "{} layer(s) failed: {}",
                    summary.failed.len(),
                    summary
                        .failed
                        .iter()
                        .map(|f| f.layer.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
                hint: Some("Other layers were written; see the summary on stdout".to_string()),
            },
            TallyCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    schema_version: String,
    total_records: usize,
    valid_records: usize,
    invalid_records: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    index: usize,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
