//! CLI binary for docbridge.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `EngineConfig`, loads the settings file, and prints results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docbridge::{
    CacheReport, ConversionProgressCallback, ConversionReport, ConversionRequest, Engine,
    EngineConfig, Format, FormatMatrix, ProgressCallback, QualityMode, SettingsFile,
};
use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: one bar tick per hop, one log line per hop
/// and per failed candidate.
struct CliProgressCallback {
    bar: ProgressBar,
    step_started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Resolving route…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            step_started: Mutex::new(None),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:30.green/238}] {pos}/{len} hops  {msg}  ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Converting");
    }
}

impl ConversionProgressCallback for CliProgressCallback {
    fn on_conversion_start(&self, total_steps: usize) {
        self.activate_bar(total_steps);
        if total_steps > 1 {
            self.bar.println(format!(
                "{} {}",
                cyan("◆"),
                bold(&format!("No direct converter, using a {total_steps}-hop chain"))
            ));
        }
    }

    fn on_step_start(&self, _step: usize, _total: usize, from: &Format, to: &Format) {
        *self.step_started.lock() = Some(Instant::now());
        self.bar.set_message(format!("{from} → {to}"));
    }

    fn on_candidate_failed(&self, step: usize, converter: &str, error: &str) {
        let msg = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} hop {step}  {}  {}",
            red("✗"),
            converter,
            red(&msg)
        ));
    }

    fn on_step_complete(&self, step: usize, total: usize, converter: &str) {
        let elapsed = self
            .step_started
            .lock()
            .take()
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        self.bar.println(format!(
            "  {} hop {step}/{total}  {}  {}",
            green("✓"),
            converter,
            dim(&format!("{elapsed:.1}s"))
        ));
        self.bar.inc(1);
    }

    fn on_conversion_complete(&self, _success: bool) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Negotiate with every configured converter and write the cache
  docbridge rebuild-cache

  # ... and show which direct conversions exist
  docbridge rebuild-cache --formats

  # Convert; formats are taken from the file extensions
  docbridge convert book.djvu book.html

  # Explicit formats and mode
  docbridge convert --from md --to pdf --mode quality notes.txt notes.pdf

  # Machine-readable report
  docbridge convert --json report.docx report.pdf

CONFIGURATION (docbridge.toml):
  cache_file = "~/.cache/docbridge/converters.yaml"

  [[converter]]
  path = "~/helpers/pandoc.sh"
  weight = 0.9

CONVERTER PROTOCOL:
  <converter> ping                                        → prints "pong"
  <converter> describe                                    → prints a YAML descriptor
  <converter> convert <mode> <from> <in> <to> <out>       → exit 0 on success
"#;

/// Convert documents between formats through pluggable converters.
#[derive(Parser, Debug)]
#[command(
    name = "docbridge",
    version,
    about = "Convert documents between formats through pluggable converters",
    long_about = "Convert documents between formats by negotiating with external converter \
programs, falling back across them by weight, and chaining them through intermediate formats \
when no single converter handles the requested pair.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Settings file (TOML). Default: ./docbridge.toml if present.
    #[arg(long, global = true, env = "DOCBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Capability cache path; overrides `cache_file` from the settings file.
    #[arg(long, global = true, env = "DOCBRIDGE_CACHE")]
    cache: Option<PathBuf>,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCBRIDGE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCBRIDGE_QUIET")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Negotiate with every configured converter and write the capability cache.
    RebuildCache {
        /// Print the FROM\TO matrix of direct conversions afterwards.
        #[arg(long)]
        formats: bool,

        /// Print the report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Print the matrix of direct conversions in the current cache.
    Formats,

    /// Convert one document.
    Convert {
        /// Source document.
        input: PathBuf,

        /// Destination path.
        output: PathBuf,

        /// Source format (default: input extension).
        #[arg(long, value_parser = parse_format)]
        from: Option<Format>,

        /// Target format (default: output extension).
        #[arg(long, value_parser = parse_format)]
        to: Option<Format>,

        /// Quality mode: normal, fast, quality.
        #[arg(short, long, env = "DOCBRIDGE_MODE", default_value = "normal", value_parser = parse_mode)]
        mode: QualityMode,

        /// Per-converter timeout in seconds.
        #[arg(long, env = "DOCBRIDGE_TIMEOUT")]
        timeout: Option<u64>,

        /// Maximum hops in a conversion chain (1–16).
        #[arg(long, env = "DOCBRIDGE_MAX_HOPS",
              value_parser = clap::value_parser!(u64).range(1..=16))]
        max_hops: Option<u64>,

        /// Trust the cache without pinging its converters first.
        #[arg(long)]
        no_verify: bool,

        /// Disable progress bar.
        #[arg(long, env = "DOCBRIDGE_NO_PROGRESS")]
        no_progress: bool,

        /// Output a structured JSON report instead of a summary line.
        #[arg(long)]
        json: bool,
    },
}

fn parse_format(s: &str) -> Result<Format, String> {
    Format::new(s).map_err(|e| e.to_string())
}

fn parse_mode(s: &str) -> Result<QualityMode, String> {
    s.parse()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // Suppress INFO-level library logs when the progress bar is active;
    // the bar provides all the feedback that matters to the user.
    let show_progress = match &cli.command {
        Command::Convert {
            no_progress, json, ..
        } => !cli.quiet && !no_progress && !json,
        _ => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    // ── Cancellation on Ctrl-C ───────────────────────────────────────────
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    // ── Settings ─────────────────────────────────────────────────────────
    let (settings, settings_path) =
        SettingsFile::load_or_default(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(path) = &settings_path {
        tracing::debug!("Using settings from {}", path.display());
    }

    match cli.command {
        Command::RebuildCache { formats, json } => {
            let config = build_config(&cli.cache, &settings, None, None, true, None)?;
            let registry = settings
                .build_registry(&config)
                .context("Invalid converter configuration")?;
            let (engine, report) = Engine::rebuild_cache(registry, config, &cancel)
                .await
                .context("Failed to rebuild capability cache")?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to serialise report")?
                );
            } else if !cli.quiet {
                print_cache_report(&report);
            }
            if formats {
                print_matrix(&engine.format_matrix());
            }
        }

        Command::Formats => {
            let config = build_config(&cli.cache, &settings, None, None, false, None)?;
            let registry = settings
                .build_registry(&config)
                .context("Invalid converter configuration")?;
            let engine = Engine::open(registry, config, &cancel)
                .await
                .context("Failed to open capability cache")?;
            print_matrix(&engine.format_matrix());
        }

        Command::Convert {
            input,
            output,
            from,
            to,
            mode,
            timeout,
            max_hops,
            no_verify,
            no_progress: _,
            json,
        } => {
            let progress_cb: Option<ProgressCallback> = if show_progress {
                Some(CliProgressCallback::new() as Arc<dyn ConversionProgressCallback>)
            } else {
                None
            };
            let config = build_config(
                &cli.cache,
                &settings,
                timeout,
                max_hops.map(|n| n as usize),
                !no_verify,
                progress_cb,
            )?;
            let registry = settings
                .build_registry(&config)
                .context("Invalid converter configuration")?;
            let engine = Engine::open(registry, config, &cancel)
                .await
                .context("Failed to open capability cache")?;

            let mut request = ConversionRequest::new(input, output).mode(mode);
            request.from = from;
            request.to = to;

            let report = engine
                .convert(request, &cancel)
                .await
                .context("Conversion failed")?;

            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&report).context("Failed to serialise report")?
                );
            } else if !cli.quiet {
                print_conversion_report(&report);
            }
        }
    }

    Ok(())
}

/// Merge settings file values and CLI overrides into an `EngineConfig`.
fn build_config(
    cache: &Option<PathBuf>,
    settings: &SettingsFile,
    timeout_secs: Option<u64>,
    max_hops: Option<usize>,
    verify: bool,
    progress: Option<ProgressCallback>,
) -> Result<EngineConfig> {
    let mut builder = settings
        .apply(EngineConfig::builder())
        .context("Invalid settings")?
        .verify_on_load(verify);

    if let Some(path) = cache {
        builder = builder.cache_path(path.clone());
    }
    if let Some(secs) = timeout_secs {
        builder = builder.convert_timeout(Duration::from_secs(secs));
    }
    if let Some(n) = max_hops {
        builder = builder.max_hops(n);
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

fn print_cache_report(report: &CacheReport) {
    for id in &report.available {
        eprintln!("  {} {}", green("✓"), id);
    }
    for (id, reason) in &report.unavailable {
        eprintln!("  {} {}  {}", red("✗"), id, dim(reason));
    }
    let target = report
        .path
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "memory".to_string());
    eprintln!(
        "{}  {} available, {} unavailable, {} conversions  →  {}",
        if report.available.is_empty() {
            red("✘")
        } else {
            green("✔")
        },
        report.available.len(),
        report.unavailable.len(),
        report.conversions,
        bold(&target),
    );
}

fn print_matrix(matrix: &FormatMatrix) {
    if matrix.is_empty() {
        println!("No format is both a source and a target of the available converters.");
        return;
    }
    print!("{}", matrix.render());
}

fn print_conversion_report(report: &ConversionReport) {
    let route = report
        .steps
        .iter()
        .map(|s| format!("{} ({})", s.to, s.converter))
        .collect::<Vec<_>>()
        .join(" → ");
    eprintln!(
        "{}  {} → {}  {}ms  {} bytes  →  {}",
        green("✔"),
        report.from,
        route,
        report.duration_ms,
        report.output_bytes,
        bold(&report.output.display().to_string()),
    );
    let fallbacks = report.attempts().saturating_sub(report.steps.len());
    if fallbacks > 0 {
        eprintln!("   {}", dim(&format!("{fallbacks} candidate(s) failed along the way")));
    }
}
