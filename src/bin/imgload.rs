//! CLI binary for edgequake-imgload.
//!
//! A terminal presentation surface over the library: maps CLI flags to
//! `PipelineConfig`, prints status lines, and optionally saves the decoded
//! image. In `--interactive` mode every stdin line is a new trigger, which
//! cancels the run in progress.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_imgload::{
    DecodedImage, Extraction, Extractor, MissingValuePolicy, PatternExtractor, PipelineConfig,
    PipelineError, PipelineObserver, PipelineState, PresentationSurface, Presenter, RunId,
    RunOutcome, SelectorExtractor, TaskPipeline,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
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
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── Spinner observer using indicatif ─────────────────────────────────────────

/// Mirrors pipeline state onto a terminal spinner. Runs off the main thread,
/// so it only touches the (thread-safe) progress bar.
struct SpinnerObserver {
    bar: ProgressBar,
}

impl SpinnerObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Idle");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl PipelineObserver for SpinnerObserver {
    fn on_run_start(&self, run: RunId, document_locator: &str) {
        self.bar.set_prefix(run.to_string());
        self.bar.set_message(document_locator.to_string());
    }

    fn on_state_change(&self, _run: RunId, state: PipelineState) {
        self.bar.set_message(state.to_string());
    }

    fn on_run_cancelled(&self, run: RunId) {
        self.bar.println(dim(&format!("  {run} superseded")));
    }
}

// ── Terminal presentation surface ────────────────────────────────────────────

#[derive(Debug, Default, Serialize)]
struct RunReport {
    input: String,
    statuses: Vec<String>,
    error: Option<String>,
    image: Option<ImageSummary>,
}

#[derive(Debug, Serialize)]
struct ImageSummary {
    width: u32,
    height: u32,
    format: Option<String>,
    saved_to: Option<PathBuf>,
}

struct TerminalSurface {
    json: bool,
    quiet: bool,
    output: Option<PathBuf>,
    bar: Option<ProgressBar>,
    report: RunReport,
    /// Set when saving the image failed; reported after the run.
    save_error: Option<String>,
}

impl TerminalSurface {
    fn line(&self, text: String) {
        if self.quiet || self.json {
            return;
        }
        match &self.bar {
            Some(bar) => bar.println(text),
            None => eprintln!("{text}"),
        }
    }

    fn reset(&mut self, input: &str) {
        self.report = RunReport {
            input: input.to_string(),
            ..RunReport::default()
        };
        self.save_error = None;
    }
}

impl PresentationSurface for TerminalSurface {
    fn show_status(&mut self, text: &str) {
        self.report.statuses.push(text.to_string());
        self.line(format!("{} {}", cyan("◆"), text));
    }

    fn show_error(&mut self, error: &PipelineError) {
        self.report.error = Some(error.to_string());
        self.line(format!("{} {}", red("✗"), error));
    }

    fn show_image(&mut self, image: Option<DecodedImage>) {
        let Some(image) = image else {
            return;
        };

        let mut saved_to = None;
        if let Some(ref path) = self.output {
            match image.save_png(path) {
                Ok(()) => saved_to = Some(path.clone()),
                Err(e) => self.save_error = Some(e.to_string()),
            }
        }

        self.line(format!(
            "{} {}x{} px{}",
            green("✓"),
            image.width(),
            image.height(),
            saved_to
                .as_ref()
                .map(|p| format!("  →  {}", p.display()))
                .unwrap_or_default()
        ));

        self.report.image = Some(ImageSummary {
            width: image.width(),
            height: image.height(),
            format: image.format().map(|f| format!("{:?}", f).to_lowercase()),
            saved_to,
        });
    }
}

// ── Extraction rule ──────────────────────────────────────────────────────────

enum Rule {
    Selector(SelectorExtractor),
    Pattern(PatternExtractor),
}

impl Extractor for Rule {
    fn extract(&self, document: &str) -> Extraction {
        match self {
            Rule::Selector(s) => s.extract(document),
            Rule::Pattern(p) => p.extract(document),
        }
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # First <img src> on a page, saved as PNG
  imgload https://example.com/ -o hero.png

  # Text of an element is the image URL
  imgload --selector '#x' --text https://example.com/page

  # Regex instead of CSS
  imgload --pattern 'data-src="([^"]+)"' https://example.com/

  # User input goes into a fixed lookup page
  imgload --template 'https://example.com/lookup?q={input}' cat

  # One trigger per stdin line; a new line cancels the run in progress
  imgload --interactive --template 'https://example.com/lookup?q={input}'

ENVIRONMENT VARIABLES:
  RUST_LOG                Override log filter (e.g. edgequake_imgload=debug)
  IMGLOAD_*               Every flag has an IMGLOAD_ equivalent (see --help)
"#;

/// Load the image referenced by a web page.
#[derive(Parser, Debug)]
#[command(
    name = "imgload",
    version,
    about = "Fetch a page, extract an image locator, fetch and decode the image",
    long_about = "Fetch an HTML document, extract one value from it with a CSS selector or regex, \
then fetch and decode the image that value points to. A new trigger always cancels the run in progress.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Document URL (or template input when --template is set).
    #[arg(required_unless_present = "interactive")]
    input: Option<String>,

    /// CSS selector for the element holding the image locator.
    #[arg(long, env = "IMGLOAD_SELECTOR", default_value = "img[src]")]
    selector: String,

    /// Attribute of the matched element to read.
    #[arg(long, env = "IMGLOAD_ATTRIBUTE", default_value = "src")]
    attribute: String,

    /// Use the matched element's text instead of an attribute.
    #[arg(long, env = "IMGLOAD_TEXT")]
    text: bool,

    /// Regex whose first capture group is the image locator (overrides --selector).
    #[arg(long, env = "IMGLOAD_PATTERN")]
    pattern: Option<String>,

    /// Document locator template containing {input}.
    #[arg(long, env = "IMGLOAD_TEMPLATE")]
    template: Option<String>,

    /// Fail the run when extraction finds nothing (default: try an empty locator).
    #[arg(long, env = "IMGLOAD_REQUIRE_VALUE")]
    require_value: bool,

    /// Write the decoded image as PNG to this file.
    #[arg(short, long, env = "IMGLOAD_OUTPUT")]
    output: Option<PathBuf>,

    /// HTTP timeout in seconds.
    #[arg(long, env = "IMGLOAD_TIMEOUT", default_value_t = 30)]
    timeout: u64,

    /// Maximum response size in bytes.
    #[arg(long, env = "IMGLOAD_MAX_BYTES", default_value_t = 20 * 1024 * 1024)]
    max_bytes: u64,

    /// Maximum decoded image width/height in pixels.
    #[arg(long, env = "IMGLOAD_MAX_DIMENSION", default_value_t = 8192)]
    max_dimension: u32,

    /// Read one input per stdin line; each line restarts the pipeline.
    #[arg(short, long, env = "IMGLOAD_INTERACTIVE")]
    interactive: bool,

    /// Print a JSON report per run instead of status lines.
    #[arg(long, env = "IMGLOAD_JSON")]
    json: bool,

    /// Disable the spinner.
    #[arg(long, env = "IMGLOAD_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "IMGLOAD_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "IMGLOAD_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
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
        .with_writer(io::stderr)
        .init();

    // ── Build pipeline ───────────────────────────────────────────────────
    let spinner = show_progress.then(SpinnerObserver::new);
    let config = build_config(&cli, spinner.clone())?;
    let rule = build_rule(&cli)?;
    let (pipeline, mut presenter) =
        TaskPipeline::new(rule, config).context("Failed to start pipeline")?;

    let mut surface = TerminalSurface {
        json: cli.json,
        quiet: cli.quiet,
        output: cli.output.clone(),
        bar: spinner.as_ref().map(|s| s.bar.clone()),
        report: RunReport::default(),
        save_error: None,
    };

    let result = if cli.interactive {
        run_interactive(&cli, &pipeline, &mut presenter, &mut surface).await
    } else {
        let input = cli.input.as_deref().unwrap_or_default();
        run_once(input, &cli, &pipeline, &mut presenter, &mut surface).await
    };

    if let Some(s) = spinner {
        s.bar.finish_and_clear();
    }
    result
}

/// Single trigger: wait for its final delivery, then exit non-zero on failure.
async fn run_once(
    input: &str,
    cli: &Cli,
    pipeline: &TaskPipeline,
    presenter: &mut Presenter,
    surface: &mut TerminalSurface,
) -> Result<()> {
    surface.reset(input);
    let handle = pipeline.trigger(input);
    let run = handle.id();

    while let Some(d) = presenter.next(&mut *surface).await {
        if d.run == run && d.finished_run() {
            break;
        }
    }

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&surface.report).context("Failed to serialise report")?
        );
    }
    if let Some(ref e) = surface.save_error {
        anyhow::bail!("{e}");
    }

    match handle.outcome().await {
        RunOutcome::Completed { .. } => Ok(()),
        RunOutcome::Failed(e) => Err(anyhow::Error::new(e).context("Image load failed")),
        RunOutcome::Cancelled => anyhow::bail!("{run} was cancelled"),
    }
}

/// One trigger per stdin line. Finishes the last run after EOF.
async fn run_interactive(
    cli: &Cli,
    pipeline: &TaskPipeline,
    presenter: &mut Presenter,
    surface: &mut TerminalSurface,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut pending: Option<RunId> = None;

    if let Some(ref first) = cli.input {
        surface.reset(first);
        pending = Some(pipeline.trigger(first).id());
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                surface.reset(input);
                pending = Some(pipeline.trigger(input).id());
            }
            delivery = presenter.next(&mut *surface) => {
                let Some(d) = delivery else {
                    return Ok(());
                };
                if Some(d.run) == pending && d.finished_run() {
                    pending = None;
                    emit_json(cli, surface)?;
                }
            }
        }
    }

    // stdin closed: let the last run finish.
    if let Some(run) = pending {
        while let Some(d) = presenter.next(&mut *surface).await {
            if d.run == run && d.finished_run() {
                emit_json(cli, surface)?;
                break;
            }
        }
    }
    Ok(())
}

fn emit_json(cli: &Cli, surface: &TerminalSurface) -> Result<()> {
    if cli.json {
        println!(
            "{}",
            serde_json::to_string(&surface.report).context("Failed to serialise report")?
        );
    }
    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(cli: &Cli, spinner: Option<Arc<SpinnerObserver>>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .fetch_timeout_secs(cli.timeout)
        .max_body_bytes(cli.max_bytes)
        .max_image_dimension(cli.max_dimension)
        .missing_value(if cli.require_value {
            MissingValuePolicy::Fail
        } else {
            MissingValuePolicy::UseEmpty
        });

    if let Some(ref t) = cli.template {
        builder = builder
            .document_template(t.clone())
            .progress_message("{input} downloading…");
    }
    if let Some(s) = spinner {
        builder = builder.observer(s);
    }

    builder.build().context("Invalid configuration")
}

/// Build the extraction rule from `--pattern` or `--selector`/`--attribute`/`--text`.
fn build_rule(cli: &Cli) -> Result<Rule> {
    if let Some(ref p) = cli.pattern {
        return Ok(Rule::Pattern(
            PatternExtractor::new(p).context("Invalid --pattern")?,
        ));
    }

    let selector = SelectorExtractor::new(&cli.selector).context("Invalid --selector")?;
    Ok(Rule::Selector(if cli.text {
        selector
    } else {
        selector.attribute(cli.attribute.clone())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn every_flag_reads_an_env_var() {
        let cmd = Cli::command();
        let missing: Vec<_> = cmd
            .get_arguments()
            .filter(|a| !a.is_positional())
            .filter(|a| !matches!(a.get_id().as_str(), "help" | "version"))
            .filter(|a| {
                a.get_env()
                    .and_then(|e| e.to_str())
                    .map_or(true, |e| !e.starts_with("IMGLOAD_"))
            })
            .map(|a| a.get_id().to_string())
            .collect();
        assert!(missing.is_empty(), "flags without IMGLOAD_ env: {missing:?}");
    }

    #[test]
    fn interactive_needs_no_input() {
        let cli = Cli::try_parse_from(["imgload", "--interactive"]).unwrap();
        assert!(cli.interactive);
        assert!(cli.input.is_none());
        assert!(Cli::try_parse_from(["imgload"]).is_err());
    }
}
