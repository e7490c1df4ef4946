//! Proctor CLI - Command-line interface for Proctor Analytics
//!
//! Commands:
//! - similarity: Compare pointer trajectories of finished results
//! - suspicious: Flag suspicious test attempts
//! - abandoned: List sessions without a completed result
//! - validate: Validate telemetry records
//! - doctor: Diagnose configuration and policy files

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use proctor_analytics::cache::ABANDONED_TTL;
use proctor_analytics::schema::{TelemetryAdapter, SCHEMA_VERSION};
use proctor_analytics::store::{
    InMemoryAttemptStore, InMemoryEventStore, InMemoryIdentityDirectory, IdentityRecord,
};
use proctor_analytics::types::{FinishedResult, TestAttemptSummary};
use proctor_analytics::{
    AnalysisBudget, AnalysisConfig, ComputeError, FilePolicyProvider, IntegrityEngine,
    PolicyConfig, PolicyProvider, StaticPolicyProvider, ENGINE_VERSION, PRODUCER_NAME,
};

/// Proctor - behavioral-integrity analysis for proctored tests
#[derive(Parser)]
#[command(name = "proctor")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Analyze proctoring telemetry for integrity signals", long_about = None)]
struct Cli {
    /// Log at debug level (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare pointer trajectories of two or more finished results
    Similarity {
        /// Finished-result JSON files, one per session
        #[arg(required = true, num_args = 2..)]
        results: Vec<PathBuf>,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// Flag completed attempts with high scores, fast completion and low engagement
    Suspicious {
        #[command(flatten)]
        data: DataArgs,

        /// Policy file (TOML); built-in thresholds when omitted
        #[arg(long)]
        policy: Option<PathBuf>,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// List sessions that produced telemetry but no completed result
    Abandoned {
        #[command(flatten)]
        data: DataArgs,

        /// Known candidates (JSON array of identity records)
        #[arg(long)]
        directory: Option<PathBuf>,

        #[command(flatten)]
        output: OutputArgs,

        #[command(flatten)]
        analysis: AnalysisArgs,
    },

    /// Validate telemetry records
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

    /// Diagnose configuration and policy files
    Doctor {
        /// Analysis config file to check
        #[arg(long)]
        config: Option<PathBuf>,

        /// Policy file to check
        #[arg(long)]
        policy: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Args)]
struct DataArgs {
    /// Telemetry file path (use - for stdin)
    #[arg(short, long)]
    events: PathBuf,

    /// Telemetry format
    #[arg(long, default_value = "ndjson")]
    input_format: InputFormat,

    /// Completed attempts (JSON array of attempt summaries)
    #[arg(short, long)]
    attempts: Option<PathBuf>,
}

#[derive(Args)]
struct OutputArgs {
    /// Output file path (use - for stdout)
    #[arg(short, long, default_value = "-")]
    output: PathBuf,

    /// Output format
    #[arg(long, default_value = "json-pretty")]
    output_format: OutputFormat,
}

#[derive(Args)]
struct AnalysisArgs {
    /// Analysis config file (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Abort the analysis after this many seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one event per line)
    Ndjson,
    /// JSON array of events
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// Report envelope as compact JSON
    Json,
    /// Pretty-printed report envelope
    JsonPretty,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn run(command: Commands) -> Result<(), ProctorCliError> {
    match command {
        Commands::Similarity {
            results,
            output,
            analysis,
        } => cmd_similarity(&results, &output, &analysis),
        Commands::Suspicious {
            data,
            policy,
            output,
            analysis,
        } => cmd_suspicious(&data, policy.as_deref(), &output, &analysis),
        Commands::Abandoned {
            data,
            directory,
            output,
            analysis,
        } => cmd_abandoned(&data, directory.as_deref(), &output, &analysis),
        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),
        Commands::Doctor {
            config,
            policy,
            json,
        } => cmd_doctor(config.as_deref(), policy.as_deref(), json),
    }
}

fn cmd_similarity(
    paths: &[PathBuf],
    output: &OutputArgs,
    analysis: &AnalysisArgs,
) -> Result<(), ProctorCliError> {
    let mut results = Vec::with_capacity(paths.len());
    for path in paths {
        let result: FinishedResult = serde_json::from_str(&read_input(path)?)?;
        results.push(result);
    }

    let engine = build_engine(
        InMemoryEventStore::new(),
        InMemoryAttemptStore::new(),
        Arc::new(StaticPolicyProvider::default()),
        analysis,
    )?;
    let matrix = engine.pairwise_similarity(&results, &budget(analysis))?;

    let rows: Vec<PairScores> = matrix
        .into_iter()
        .map(|(pair, scores)| PairScores { pair, scores })
        .collect();
    info!(pairs = rows.len(), "trajectory comparison finished");
    write_output(&engine, &rows, output)
}

fn cmd_suspicious(
    data: &DataArgs,
    policy: Option<&Path>,
    output: &OutputArgs,
    analysis: &AnalysisArgs,
) -> Result<(), ProctorCliError> {
    let policy: Arc<dyn PolicyProvider> = match policy {
        Some(path) => Arc::new(FilePolicyProvider::open(path)?),
        None => Arc::new(StaticPolicyProvider::new(PolicyConfig::default())),
    };
    let engine = load_engine(data, policy, analysis)?;
    let flagged = engine.suspicious_attempts(&budget(analysis))?;
    write_output(&engine, &flagged, output)
}

fn cmd_abandoned(
    data: &DataArgs,
    directory: Option<&Path>,
    output: &OutputArgs,
    analysis: &AnalysisArgs,
) -> Result<(), ProctorCliError> {
    let mut engine = load_engine(data, Arc::new(StaticPolicyProvider::default()), analysis)?
        .with_abandoned_cache(ABANDONED_TTL);
    if let Some(path) = directory {
        let records: Vec<IdentityRecord> = serde_json::from_str(&read_input(path)?)?;
        let directory = InMemoryIdentityDirectory::new();
        for record in records {
            directory.upsert(record);
        }
        engine = engine.with_directory(Arc::new(directory));
    }
    let sessions = engine.list_abandoned(&budget(analysis))?;
    write_output(&engine, &sessions, output)
}

fn cmd_validate(
    input: &Path,
    input_format: InputFormat,
    json: bool,
) -> Result<(), ProctorCliError> {
    let input_data = read_input(input)?;

    let events = match input_format {
        InputFormat::Ndjson => TelemetryAdapter::parse_ndjson(&input_data)?,
        InputFormat::Json => TelemetryAdapter::parse_array(&input_data)?,
    };

    let results = TelemetryAdapter::validate_events(&events);

    let report = ValidationReport {
        schema: SCHEMA_VERSION.to_string(),
        total_events: events.len(),
        valid_events: events.len() - results.len(),
        invalid_events: results.len(),
        errors: results
            .iter()
            .map(|r| ValidationErrorDetail {
                index: r.index,
                session_id: r.session_id.clone(),
                error: r.result.as_ref().map(|e| e.to_string()).unwrap_or_default(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report ({})", report.schema);
        println!("=================");
        println!("Total events:   {}", report.total_events);
        println!("Valid events:   {}", report.valid_events);
        println!("Invalid events: {}", report.invalid_events);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Session {} (index {}): {}",
                    err.session_id.as_deref().unwrap_or("unknown"),
                    err.index,
                    err.error
                );
            }
        }
    }

    if report.invalid_events > 0 {
        Err(ProctorCliError::ValidationFailed(report.invalid_events))
    } else {
        Ok(())
    }
}

fn cmd_doctor(
    config: Option<&Path>,
    policy: Option<&Path>,
    json: bool,
) -> Result<(), ProctorCliError> {
    let mut checks: Vec<DoctorCheck> = vec![
        DoctorCheck::ok("engine_version", format!("Engine version {}", ENGINE_VERSION)),
        DoctorCheck::ok("schema_version", format!("Input schema: {}", SCHEMA_VERSION)),
    ];

    if let Some(path) = config {
        checks.push(file_check("config", path, |p| {
            AnalysisConfig::load(p).map(|c| {
                format!(
                    "Config valid (pause {} s, lookback {} h, {:?})",
                    c.pause_threshold_sec, c.lookback_hours, c.completion_policy
                )
            })
        }));
    }

    if let Some(path) = policy {
        checks.push(file_check("policy", path, |p| {
            PolicyConfig::load(p).map(|pc| {
                format!(
                    "Policy valid ({} test types with thresholds, {} study pages)",
                    pc.thresholds.len(),
                    pc.study_pages.len()
                )
            })
        }));
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck::ok("stdin", "stdin is a TTY (interactive mode)".to_string())
    } else {
        DoctorCheck::ok("stdin", "stdin is a pipe (telemetry can be piped)".to_string())
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Proctor Doctor Report");
        println!("=====================");
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

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(ProctorCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn file_check<F>(name: &str, path: &Path, load: F) -> DoctorCheck
where
    F: FnOnce(&Path) -> Result<String, ComputeError>,
{
    if !path.exists() {
        return DoctorCheck {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: format!("{} does not exist", path.display()),
        };
    }
    match load(path) {
        Ok(message) => DoctorCheck::ok(name, message),
        Err(e) => DoctorCheck {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: e.to_string(),
        },
    }
}

fn read_input(path: &Path) -> Result<String, ProctorCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn load_config(analysis: &AnalysisArgs) -> Result<AnalysisConfig, ProctorCliError> {
    match &analysis.config {
        Some(path) => Ok(AnalysisConfig::load(path)?),
        None => Ok(AnalysisConfig::default()),
    }
}

fn budget(analysis: &AnalysisArgs) -> AnalysisBudget {
    match analysis.timeout_secs {
        Some(secs) => AnalysisBudget::with_timeout(Duration::from_secs(secs)),
        None => AnalysisBudget::unbounded(),
    }
}

fn build_engine(
    events: InMemoryEventStore,
    attempts: InMemoryAttemptStore,
    policy: Arc<dyn PolicyProvider>,
    analysis: &AnalysisArgs,
) -> Result<IntegrityEngine, ProctorCliError> {
    let config = load_config(analysis)?;
    Ok(IntegrityEngine::new(
        Arc::new(events),
        Arc::new(attempts),
        policy,
        config,
    )?)
}

/// Build an engine over the telemetry and attempts named on the command line
fn load_engine(
    data: &DataArgs,
    policy: Arc<dyn PolicyProvider>,
    analysis: &AnalysisArgs,
) -> Result<IntegrityEngine, ProctorCliError> {
    let attempts = match &data.attempts {
        Some(path) => {
            let summaries: Vec<TestAttemptSummary> = serde_json::from_str(&read_input(path)?)?;
            InMemoryAttemptStore::with_attempts(summaries).map_err(ComputeError::from)?
        }
        None => InMemoryAttemptStore::new(),
    };

    let engine = build_engine(InMemoryEventStore::new(), attempts, policy, analysis)?;
    let input_data = read_input(&data.events)?;
    let summary = match data.input_format {
        InputFormat::Ndjson => engine.ingest_ndjson(&input_data)?,
        InputFormat::Json => engine.ingest_json(&input_data)?,
    };
    if summary.stored == 0 {
        return Err(ProctorCliError::NoEvents);
    }
    if !summary.rejected.is_empty() {
        warn!(
            rejected = summary.rejected.len(),
            "some telemetry records were skipped; run 'proctor validate' for details"
        );
    }
    info!(stored = summary.stored, "telemetry loaded");
    Ok(engine)
}

fn write_output<T: Serialize>(
    engine: &IntegrityEngine,
    records: &[T],
    args: &OutputArgs,
) -> Result<(), ProctorCliError> {
    let output_data = match args.output_format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            lines.join("\n") + "\n"
        }
        OutputFormat::Json => serde_json::to_string(&engine.report(records))?,
        OutputFormat::JsonPretty => serde_json::to_string_pretty(&engine.report(records))?,
    };

    if args.output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(&args.output, output_data)?;
    }
    Ok(())
}

// Error handling

#[derive(Debug)]
enum ProctorCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    NoEvents,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for ProctorCliError {
    fn from(e: io::Error) -> Self {
        ProctorCliError::Io(e)
    }
}

impl From<ComputeError> for ProctorCliError {
    fn from(e: ComputeError) -> Self {
        ProctorCliError::Compute(e)
    }
}

impl From<serde_json::Error> for ProctorCliError {
    fn from(e: serde_json::Error) -> Self {
        ProctorCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<ProctorCliError> for CliError {
    fn from(e: ProctorCliError) -> Self {
        match e {
            ProctorCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            ProctorCliError::Compute(e) => {
                let (code, hint) = match &e {
                    ComputeError::Cancelled | ComputeError::DeadlineExceeded(_) => {
                        ("TIMEOUT", "Raise --timeout-secs or narrow the input")
                    }
                    ComputeError::ConfigError(_) | ComputeError::PolicyError(_) => {
                        ("CONFIG_ERROR", "Run 'proctor doctor' on the config and policy files")
                    }
                    ComputeError::InsufficientInput(_) => {
                        ("INSUFFICIENT_INPUT", "Provide at least two sessions")
                    }
                    ComputeError::Storage(_) => ("STORAGE_ERROR", "Retry once the store is reachable"),
                    _ => (
                        "PARSE_ERROR",
                        "Ensure input matches the proctor.telemetry_event.v1 schema",
                    ),
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            ProctorCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            ProctorCliError::NoEvents => CliError {
                code: "NO_EVENTS".to_string(),
                message: "No valid telemetry found in input".to_string(),
                hint: Some("Run 'proctor validate' on the input".to_string()),
            },
            ProctorCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} events failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            ProctorCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct PairScores {
    pair: String,
    scores: BTreeMap<usize, f64>,
}

#[derive(Serialize)]
struct ValidationReport {
    schema: String,
    total_events: usize,
    valid_events: usize,
    invalid_events: usize,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(Serialize)]
struct ValidationErrorDetail {
    index: usize,
    session_id: Option<String>,
    error: String,
}

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

impl DoctorCheck {
    fn ok(name: &str, message: String) -> Self {
        DoctorCheck {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message,
        }
    }
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
