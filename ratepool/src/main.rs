//! Ratepool CLI Application
//!
//! A rate-limited HTTP load generator. Sends requests to one or more target
//! URLs from a fixed pool of workers, under an optional queries-per-second
//! ceiling, and prints a per-request log and a summary report.

mod ui;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::Parser;
use ratepool_lib::{
    load_env_config, parse_duration_string, parse_header, parse_targets, validate_target,
    ConfigManager, EnvConfig, FileConfig, MAX_WORKERS,
};
use ratepool_lib::{
    Engine, EngineConfig, HttpAction, InFlightPolicy, JobResult, LimiterScope, Report,
    StopCondition, StopReason,
};
use serde::Serialize;
use std::error::Error;
use std::process;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Yellow.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default());

/// Exit code when at least one request failed.
const EXIT_FAILURES: i32 = 2;

/// Exit code when the run was interrupted by SIGINT/SIGTERM.
const EXIT_INTERRUPTED: i32 = 130;

/// CLI arguments for ratepool
#[derive(Parser, Debug)]
#[command(name = "ratepool")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Sai Dutt G.V <gvs46@protonmail.com>")]
#[command(about = "Rate-limited HTTP load generator with a bounded worker pool")]
#[command(
    long_about = "Send HTTP requests to one or more targets from a fixed pool of workers.\n\nRequests can be capped by count (-n) or by time (-z), throttled to a queries-per-second\nceiling shared by the pool or applied per worker, and stopped cleanly with Ctrl-C."
)]
#[command(styles = STYLES)]
pub struct Args {
    /// Target URLs (cycled when more requests than targets are sent)
    #[arg(value_name = "URLS", help_heading = "Targets")]
    pub targets: Vec<String>,

    /// Input file with target URLs (one per line, # comments allowed)
    #[arg(
        short = 'f',
        long = "file",
        value_name = "FILE",
        help_heading = "Targets"
    )]
    pub file: Option<String>,

    /// Total number of requests to send (default: 200)
    #[arg(short = 'n', long = "requests", value_name = "N", help_heading = "Load")]
    pub requests: Option<usize>,

    /// Number of concurrent workers (default: available CPUs)
    #[arg(short = 'c', long = "workers", value_name = "N", help_heading = "Load")]
    pub workers: Option<usize>,

    /// Rate limit in queries per second; 0 disables throttling
    #[arg(short = 'q', long = "qps", value_name = "QPS", help_heading = "Load")]
    pub qps: Option<f64>,

    /// Run for a fixed time instead of a request count (e.g. 10s, 2m)
    #[arg(
        short = 'z',
        long = "duration",
        value_name = "DURATION",
        help_heading = "Load"
    )]
    pub duration: Option<String>,

    /// Apply the rate limit to each worker instead of the whole pool
    #[arg(long = "per-worker", help_heading = "Load")]
    pub per_worker: bool,

    /// Capacity of the job queue between producer and workers
    #[arg(long = "queue-capacity", value_name = "N", help_heading = "Load")]
    pub queue_capacity: Option<usize>,

    /// Cancel requests that are still running when a stop is requested
    #[arg(long = "abort-in-flight", help_heading = "Load")]
    pub abort_in_flight: bool,

    /// HTTP method (default: GET)
    #[arg(
        short = 'm',
        long = "method",
        value_name = "METHOD",
        help_heading = "Request"
    )]
    pub method: Option<String>,

    /// Extra request header, repeatable (e.g. -H "Accept: text/html")
    #[arg(short = 'H', long = "header", value_name = "HEADER", action = clap::ArgAction::Append, help_heading = "Request")]
    pub headers: Vec<String>,

    /// Request body
    #[arg(short = 'd', long = "body", value_name = "BODY", help_heading = "Request")]
    pub body: Option<String>,

    /// Per-request timeout (default: 20s)
    #[arg(
        short = 't',
        long = "timeout",
        value_name = "DURATION",
        help_heading = "Request"
    )]
    pub timeout: Option<String>,

    /// Output the report and every result as JSON
    #[arg(short = 'j', long = "json", help_heading = "Output Format")]
    pub json: bool,

    /// Output one CSV row per result
    #[arg(long = "csv", help_heading = "Output Format")]
    pub csv: bool,

    /// Only print the summary, not every result
    #[arg(long = "quiet", help_heading = "Output Format")]
    pub quiet: bool,

    /// Use specific config file instead of automatic discovery
    #[arg(long = "config", value_name = "FILE", help_heading = "Configuration")]
    pub config: Option<String>,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose", help_heading = "Configuration")]
    pub verbose: bool,
}

/// How results are written to stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
    Csv,
}

/// Everything a run needs once CLI args, environment and config files have
/// been merged.
#[derive(Debug, Clone)]
pub(crate) struct RunSettings {
    pub(crate) engine: EngineConfig,
    pub(crate) method: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Option<String>,
    pub(crate) output: OutputFormat,
    pub(crate) file: Option<String>,
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    report: &'a Report,
    results: &'a [JobResult],
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Validate arguments
    if let Err(e) = validate_args(&args) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    init_tracing(args.verbose);
    debug!("ratepool v{} starting", env!("CARGO_PKG_VERSION"));

    match run(args).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

/// Install the log subscriber. Logs go to stderr so stdout stays clean for
/// results.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

/// Validate command line arguments
fn validate_args(args: &Args) -> Result<(), String> {
    // Can't have multiple output formats
    if args.json && args.csv {
        return Err("Cannot specify multiple output formats (--json, --csv)".to_string());
    }

    if let Some(workers) = args.workers {
        if workers == 0 || workers > MAX_WORKERS {
            return Err(format!("Workers must be between 1 and {}", MAX_WORKERS));
        }
    }

    if args.queue_capacity == Some(0) {
        return Err("Queue capacity must be at least 1".to_string());
    }

    if let Some(qps) = args.qps {
        if !qps.is_finite() {
            return Err("QPS must be a finite number".to_string());
        }
    }

    if let Some(duration) = &args.duration {
        match parse_duration_string(duration) {
            Some(d) if !d.is_zero() => {}
            _ => {
                return Err(format!(
                    "Invalid duration '{}'. Use values like 500ms, 10s, 2m",
                    duration
                ))
            }
        }
    }

    if let Some(timeout) = &args.timeout {
        match parse_duration_string(timeout) {
            Some(t) if !t.is_zero() => {}
            _ => {
                return Err(format!(
                    "Invalid timeout '{}'. Use values like 500ms, 10s, 2m",
                    timeout
                ))
            }
        }
    }

    for header in &args.headers {
        parse_header(header).map_err(|e| e.to_string())?;
    }

    Ok(())
}

/// Main run logic. Returns the process exit code.
async fn run(args: Args) -> Result<i32, Box<dyn Error>> {
    let settings = build_settings(&args)?;
    let targets = collect_targets(&args.targets, settings.file.as_deref())?;
    let action = build_action(&settings)?;

    let engine = Engine::new(settings.engine.clone(), action)?;

    let report = match settings.output {
        OutputFormat::Json => run_json(engine, targets).await?,
        OutputFormat::Csv => {
            println!("{}", ui::CSV_HEADER);
            let printer = ui::ResultPrinter::csv();
            engine
                .with_sink(Arc::new(printer))
                .run_targets(targets)
                .await?
        }
        OutputFormat::Text => run_text(engine, targets, &settings, args.quiet).await?,
    };

    Ok(exit_code(&report))
}

/// Run with streamed, colored per-result lines (or a spinner with --quiet)
/// followed by the summary.
async fn run_text(
    engine: Engine,
    targets: Vec<String>,
    settings: &RunSettings,
    quiet: bool,
) -> Result<Report, Box<dyn Error>> {
    ui::print_header(targets.len(), &settings.method, &settings.engine);

    let report = if quiet {
        let spinner = ui::Spinner::start(spinner_message(&settings.engine));
        let report = engine.run_targets(targets).await;
        if let Some(spinner) = spinner {
            spinner.stop().await;
        }
        report?
    } else {
        let total = match settings.engine.stop_condition() {
            StopCondition::Count(requests) => Some(requests),
            StopCondition::Deadline(_) => None,
        };
        engine
            .with_sink(Arc::new(ui::ResultPrinter::text(total)))
            .run_targets(targets)
            .await?
    };

    println!();
    ui::print_summary(&report);
    ui::print_error_summary(&report);
    Ok(report)
}

/// Run collecting every result, then print the report and results as one
/// JSON document.
async fn run_json(engine: Engine, targets: Vec<String>) -> Result<Report, Box<dyn Error>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let report = engine.with_sink(Arc::new(tx)).run_targets(targets).await?;

    let mut results = Vec::with_capacity(report.completed());
    while let Ok(result) = rx.try_recv() {
        results.push(result);
    }

    let json = serde_json::to_string_pretty(&JsonOutput {
        report: &report,
        results: &results,
    })?;
    println!("{}", json);
    Ok(report)
}

fn spinner_message(config: &EngineConfig) -> String {
    match config.stop_condition() {
        StopCondition::Count(requests) => format!(
            "Sending {} request{}...",
            requests,
            if requests == 1 { "" } else { "s" }
        ),
        StopCondition::Deadline(duration) => {
            format!("Sending requests for {}...", ui::format_duration(duration))
        }
    }
}

/// Map a finished run to the process exit code.
///
/// Failed requests win over an interrupt; a deadline stop is a normal end.
fn exit_code(report: &Report) -> i32 {
    if report.has_failures() {
        EXIT_FAILURES
    } else if report.stop_reason == Some(StopReason::Interrupt) {
        EXIT_INTERRUPTED
    } else {
        0
    }
}

/// Build the run settings with config file integration.
///
/// Precedence order (highest to lowest):
/// 1. CLI arguments (explicit user input)
/// 2. Environment variables (RP_*)
/// 3. Local config file (./ratepool.toml or ./.ratepool.toml)
/// 4. Global config file (~/.ratepool.toml)
/// 5. XDG config file (~/.config/ratepool/config.toml)
/// 6. Built-in defaults
fn build_settings(args: &Args) -> Result<RunSettings, Box<dyn Error>> {
    let env_config = load_env_config();
    if env_config.has_output_format_conflict() {
        warn!("both RP_JSON and RP_CSV are set; using JSON unless a CLI flag decides");
    }

    let file_config = load_file_config(args, &env_config)?;
    resolve_settings(args, &env_config, file_config)
}

/// Load the explicit config file (--config, then RP_CONFIG) or discover one.
fn load_file_config(args: &Args, env_config: &EnvConfig) -> Result<FileConfig, Box<dyn Error>> {
    let config_manager = ConfigManager::new(args.verbose);

    let explicit = match (&args.config, &env_config.config) {
        (Some(path), _) => Some((path, "--config")),
        (None, Some(path)) => Some((path, "RP_CONFIG")),
        (None, None) => None,
    };

    if let Some((path, origin)) = explicit {
        debug!("using explicit config file ({}): {}", origin, path);
        let file_config = config_manager
            .load_file(path)
            .map_err(|e| format!("Failed to load config file '{}': {}", path, e))?;
        return Ok(file_config);
    }

    match config_manager.discover_and_load() {
        Ok(file_config) => Ok(file_config),
        Err(e) => {
            warn!("config discovery failed: {}", e);
            Ok(FileConfig::default())
        }
    }
}

/// Merge defaults, config file, environment and CLI args into run settings.
fn resolve_settings(
    args: &Args,
    env_config: &EnvConfig,
    file_config: FileConfig,
) -> Result<RunSettings, Box<dyn Error>> {
    let mut engine = EngineConfig::default();
    let mut method = "GET".to_string();
    let mut headers: Vec<(String, String)> = Vec::new();
    let mut body = None;

    // Step 1: config file
    if let Some(defaults) = &file_config.defaults {
        engine = defaults.apply_to(engine)?;
        if let Some(m) = &defaults.method {
            method = m.clone();
        }
    }
    if let Some(request) = file_config.request {
        if let Some(file_headers) = request.headers {
            headers.extend(file_headers);
            headers.sort();
        }
        body = request.body;
    }

    // Step 2: environment variables (RP_*)
    engine = env_config.apply_to(engine)?;
    if let Some(m) = &env_config.method {
        method = m.clone();
    }

    // Step 3: CLI arguments (highest precedence)
    if let Some(workers) = args.workers {
        engine.workers = workers;
    }
    if let Some(requests) = args.requests {
        engine.requests = requests;
        // An explicit count on the command line beats a duration from
        // the environment or a config file.
        if args.duration.is_none() {
            engine.duration = None;
        }
    }
    if let Some(duration) = &args.duration {
        engine.duration = Some(
            parse_duration_string(duration)
                .ok_or_else(|| format!("Invalid duration '{}'", duration))?,
        );
    }
    if let Some(qps) = args.qps {
        engine.qps = qps;
    }
    if args.per_worker {
        engine.limiter_scope = LimiterScope::PerWorker;
    }
    if let Some(capacity) = args.queue_capacity {
        engine.queue_capacity = capacity;
    }
    if args.abort_in_flight {
        engine.in_flight = InFlightPolicy::Abort;
    }
    if let Some(timeout) = &args.timeout {
        engine.timeout = parse_duration_string(timeout)
            .ok_or_else(|| format!("Invalid timeout '{}'", timeout))?;
    }
    if let Some(m) = &args.method {
        method = m.clone();
    }
    for line in &args.headers {
        let (name, value) = parse_header(line)?;
        headers.retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        headers.push((name, value));
    }
    if let Some(b) = &args.body {
        body = Some(b.clone());
    }

    let output = if args.json {
        OutputFormat::Json
    } else if args.csv {
        OutputFormat::Csv
    } else if env_config.json == Some(true) {
        OutputFormat::Json
    } else if env_config.csv == Some(true) {
        OutputFormat::Csv
    } else {
        OutputFormat::Text
    };

    engine.validate()?;

    Ok(RunSettings {
        engine,
        method,
        headers,
        body,
        output,
        file: args.file.clone().or_else(|| env_config.file.clone()),
    })
}

/// Build the HTTP action from the resolved request shape.
fn build_action(settings: &RunSettings) -> Result<HttpAction, Box<dyn Error>> {
    let mut action = HttpAction::new(settings.engine.timeout)?.with_method(&settings.method)?;
    for (name, value) in &settings.headers {
        action = action.with_header(name, value)?;
    }
    if let Some(body) = &settings.body {
        action = action.with_body(body.clone());
    }
    Ok(action)
}

/// Gather targets from positional args and the target file, validating each.
fn collect_targets(positional: &[String], file: Option<&str>) -> Result<Vec<String>, Box<dyn Error>> {
    let mut targets = Vec::new();

    if let Some(path) = file {
        targets.extend(read_targets_from_file(path)?);
    }
    targets.extend(positional.iter().map(|t| t.trim().to_string()));

    if targets.is_empty() {
        return Err("You must specify target URLs or a file with --file".into());
    }

    for target in &targets {
        validate_target(target)?;
    }

    Ok(targets)
}

/// Read targets from a file
fn read_targets_from_file(file_path: &str) -> Result<Vec<String>, Box<dyn Error>> {
    let path = std::path::Path::new(file_path);
    if !path.exists() {
        return Err(format!("File not found: {}", file_path).into());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("Failed to read '{}': {}", file_path, e))?;
    let targets = parse_targets(&content);

    if targets.is_empty() {
        return Err(format!("No targets found in '{}'", file_path).into());
    }

    Ok(targets)
}
