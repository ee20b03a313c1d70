//! Terminal display logic for the ratepool CLI.
//!
//! This module handles text and CSV output: colored result lines, the
//! spinner shown with `--quiet`, headers, and summaries. Uses only the
//! `console` crate (already a dependency).

use console::{pad_str, style, Alignment, Term};
use ratepool_lib::{EngineConfig, JobResult, LimiterScope, Report, ResultSink, StopCondition};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ── Spinner ──────────────────────────────────────────────────────────────────

const SPINNER_FRAMES: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// An async braille-dot spinner that writes to stderr so stdout stays clean.
pub struct Spinner {
    running: Arc<AtomicBool>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl Spinner {
    /// Start a new spinner with the given message (e.g. "Sending 200 requests...").
    ///
    /// Returns `None` when stderr is not a terminal.
    pub fn start(message: String) -> Option<Self> {
        if !Term::stderr().is_term() {
            return None;
        }

        let running = Arc::new(AtomicBool::new(true));
        let running_clone = running.clone();

        let handle = tokio::spawn(async move {
            let term = Term::stderr();
            let mut idx = 0usize;
            while running_clone.load(Ordering::Relaxed) {
                let frame = SPINNER_FRAMES[idx % SPINNER_FRAMES.len()];
                let _ = term.clear_line();
                let _ = term.write_str(&format!("{} {}", style(frame).cyan(), message));
                idx += 1;
                tokio::time::sleep(Duration::from_millis(80)).await;
            }
            let _ = term.clear_line();
        });

        Some(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Stop the spinner and clear the line.
    pub async fn stop(mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.await;
        }
    }
}

// ── Header ───────────────────────────────────────────────────────────────────

/// Print a styled header at the start of a text-mode run.
pub fn print_header(target_count: usize, method: &str, config: &EngineConfig) {
    println!(
        "{} {} {}",
        style("ratepool").bold(),
        style(format!("v{}", env!("CARGO_PKG_VERSION"))).dim(),
        style(format!(
            "| {} {} target{}",
            method.to_uppercase(),
            target_count,
            if target_count == 1 { "" } else { "s" }
        ))
        .dim(),
    );

    let mut meta_parts: Vec<String> = Vec::new();

    match config.stop_condition() {
        StopCondition::Count(requests) => meta_parts.push(format!("Requests: {}", requests)),
        StopCondition::Deadline(duration) => {
            meta_parts.push(format!("Duration: {}", format_duration(duration)))
        }
    }
    meta_parts.push(format!("Workers: {}", config.workers));
    if config.is_throttled() {
        let scope = match config.limiter_scope {
            LimiterScope::Global => "",
            LimiterScope::PerWorker => " per worker",
        };
        meta_parts.push(format!("QPS: {}{}", config.qps, scope));
    } else {
        meta_parts.push("QPS: unlimited".to_string());
    }

    println!("{}", style(meta_parts.join(" | ")).dim());
    println!();
}

// ── Single result line ───────────────────────────────────────────────────────

/// Format and print a single result with colors and alignment.
///
/// If `counter` is Some((current, total)), a progress prefix like `[3/8]` is shown.
pub fn print_result(result: &JobResult, counter: Option<(usize, usize)>) {
    let target_width = 40;
    let padded_target = pad_str(&result.target, target_width, Alignment::Left, Some(".."));

    let prefix = match counter {
        Some((cur, total)) => {
            format!("{} ", style(format!("[{}/{}]", cur, total)).dim())
        }
        None => String::new(),
    };

    let timing = style(format!(
        "{:>8}  w{}",
        format_duration(result.duration),
        result.worker_id
    ))
    .dim();

    if result.is_success() {
        let status = result
            .status_code
            .map(|code| code.to_string())
            .unwrap_or_else(|| "OK".to_string());
        println!(
            "  {}{}  {}  {}",
            prefix,
            style(&padded_target).white(),
            style(pad_str(&status, 5, Alignment::Left, None)).green().bold(),
            timing,
        );
    } else {
        let label = match result.status_code {
            Some(code) => style(code.to_string()).red().bold(),
            None => style("FAIL".to_string()).red().bold(),
        };
        println!(
            "  {}{}  {}  {}  {}",
            prefix,
            style(&padded_target).white(),
            label,
            timing,
            style(brief_error(result)).dim(),
        );
    }
}

/// Streams results to stdout as they arrive.
pub struct ResultPrinter {
    csv: bool,
    total: Option<usize>,
    printed: AtomicUsize,
}

impl ResultPrinter {
    /// Colored text lines, with a `[n/total]` counter when the total is known.
    pub fn text(total: Option<usize>) -> Self {
        Self {
            csv: false,
            total,
            printed: AtomicUsize::new(0),
        }
    }

    /// One CSV row per result (see [`CSV_HEADER`]).
    pub fn csv() -> Self {
        Self {
            csv: true,
            total: None,
            printed: AtomicUsize::new(0),
        }
    }
}

impl ResultSink for ResultPrinter {
    fn record(&self, result: &JobResult) {
        let n = self.printed.fetch_add(1, Ordering::Relaxed) + 1;
        if self.csv {
            println!("{}", csv_row(result));
        } else {
            print_result(result, self.total.map(|total| (n, total)));
        }
    }
}

// ── CSV ──────────────────────────────────────────────────────────────────────

pub const CSV_HEADER: &str = "job_id,target,worker,status,duration_ms,offset_ms,bytes,error";

/// Format one result as a CSV row matching [`CSV_HEADER`].
pub fn csv_row(result: &JobResult) -> String {
    format!(
        "{},{},{},{},{},{},{},{}",
        result.job_id.0,
        csv_escape(&result.target),
        result.worker_id,
        result
            .status_code
            .map(|c| c.to_string())
            .unwrap_or_default(),
        result.duration.as_millis(),
        result.offset.as_millis(),
        result
            .content_length
            .map(|l| l.to_string())
            .unwrap_or_default(),
        csv_escape(result.error_message.as_deref().unwrap_or("")),
    )
}

fn csv_escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

// ── Summary ──────────────────────────────────────────────────────────────────

/// Print the final summary: counts, throughput, latency and status codes.
pub fn print_summary(report: &Report) {
    println!(
        "  {}",
        style("────────────────────────────────────────────────────").dim()
    );
    println!(
        "  {} request{} in {:.2}s  {}  {}  {}  {}  {}  {}",
        style(report.total).bold(),
        if report.total == 1 { "" } else { "s" },
        report.elapsed.as_secs_f64(),
        style("|").dim(),
        style(format!("{} ok", report.success)).green(),
        style("|").dim(),
        style(format!("{} failed", report.failure)).red(),
        style("|").dim(),
        style(format!("{} abandoned", report.abandoned)).yellow(),
    );

    println!(
        "  {} {:.1} req/s",
        style("Throughput:").dim(),
        report.requests_per_second()
    );

    if report.retryable > 0 {
        println!(
            "  {} {} of {} failures may succeed on retry",
            style("Retryable:").dim(),
            report.retryable,
            report.failure
        );
    }

    if let (Some(fastest), Some(average), Some(slowest)) =
        (report.fastest, report.average, report.slowest)
    {
        println!(
            "  {} fastest {}  {}  average {}  {}  slowest {}",
            style("Latency:").dim(),
            format_duration(fastest),
            style("|").dim(),
            format_duration(average),
            style("|").dim(),
            format_duration(slowest),
        );
    }

    if !report.status_codes.is_empty() {
        let codes: Vec<String> = report
            .status_codes
            .iter()
            .map(|(code, count)| format!("[{}] {}", code, count))
            .collect();
        println!("  {} {}", style("Status codes:").dim(), codes.join("  "));
    }

    if let Some(reason) = report.stop_reason {
        println!(
            "  {} {}",
            style("Stopped:").dim(),
            style(reason.to_string()).yellow()
        );
    }
}

// ── Error summary ────────────────────────────────────────────────────────────

/// Maximum number of distinct failure messages listed in the summary.
const MAX_ERRORS_SHOWN: usize = 5;

/// Print failures grouped by message, most frequent first.
pub fn print_error_summary(report: &Report) {
    if report.errors.is_empty() {
        return;
    }

    println!();
    println!("  {}", style("Some requests failed:").yellow());

    let errors = top_errors(report);
    for (message, count) in errors.iter().take(MAX_ERRORS_SHOWN) {
        println!(
            "  {} {}  {}",
            style("•").dim(),
            style(format!("{}x", count)).bold(),
            message,
        );
    }
    if errors.len() > MAX_ERRORS_SHOWN {
        println!(
            "  {} {}",
            style("•").dim(),
            style(format!(
                "... and {} more distinct errors",
                errors.len() - MAX_ERRORS_SHOWN
            ))
            .dim(),
        );
    }
}

/// Failure messages ordered by count, then alphabetically.
fn top_errors(report: &Report) -> Vec<(&str, usize)> {
    let mut errors: Vec<(&str, usize)> = report
        .errors
        .iter()
        .map(|(message, count)| (message.as_str(), *count))
        .collect();
    errors.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    errors
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Human-friendly duration: `850ms`, `1.25s`, `2m05s`.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        format!("{}ms", millis)
    } else if millis < 60_000 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        let secs = duration.as_secs();
        format!("{}m{:02}s", secs / 60, secs % 60)
    }
}

/// Extract a brief error reason from a failed result.
fn brief_error(result: &JobResult) -> &str {
    match result.error_kind.as_deref() {
        Some("timeout") => "(timeout)",
        Some("network") => "(network error)",
        Some("status") => "(bad status)",
        Some("aborted") => "(aborted)",
        Some("invalid target") => "(invalid target)",
        Some("internal") => "(internal error)",
        Some(_) => "(error)",
        None => "(unknown error)",
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
