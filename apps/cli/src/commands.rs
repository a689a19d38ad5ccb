//! CLI command definitions, routing, and tracing setup.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Report, Result, WrapErr, eyre};
use docfill_core::{AnalyzeOutcome, Pipeline, ProgressReporter};
use docfill_shared::{
    AppConfig, Answers, ArtifactRef, SessionToken, Variable, init_config, load_config,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// docfill: identify and fill the variable fields of legal documents.
#[derive(Parser)]
#[command(
    name = "docfill",
    version,
    about = "Identify the fields a legal document needs filled in, then fill them.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Upload root for session files (overrides the config file).
    #[arg(long, global = true)]
    pub upload_dir: Option<PathBuf>,

    /// Oracle model (overrides the config file).
    #[arg(long, global = true)]
    pub model: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Print the normalized text of a DOCX or PDF.
    Extract {
        /// Document to read.
        file: PathBuf,
    },

    /// Identify the variables a document needs filled in.
    Analyze {
        /// Document to analyze.
        file: PathBuf,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Fill a document with the given answers, without analysis.
    Fill {
        /// Document to fill.
        file: PathBuf,

        /// An answer as NAME=VALUE (repeatable).
        #[arg(short, long = "answer", value_parser = parse_answer)]
        answers: Vec<(String, String)>,

        /// JSON object of answers, applied before --answer values.
        #[arg(long = "answers")]
        answers_file: Option<PathBuf>,

        /// Directory to copy the filled document into.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Analyze, prompt for each variable, and fill.
    Run {
        /// Document to process.
        file: PathBuf,

        /// Directory to copy the filled document into.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "docfill=info",
        1 => "docfill=debug",
        _ => "docfill=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let overrides = Overrides {
        upload_dir: cli.upload_dir,
        model: cli.model,
    };

    match cli.command {
        Command::Extract { file } => cmd_extract(&file),
        Command::Analyze { file, json } => cmd_analyze(&file, json, &overrides).await,
        Command::Fill {
            file,
            answers,
            answers_file,
            out,
        } => {
            let answers = collect_answers(answers_file.as_deref(), answers)?;
            cmd_fill(&file, answers, out.as_deref(), &overrides).await
        }
        Command::Run { file, out } => cmd_run(&file, out.as_deref(), &overrides).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&overrides).await,
        },
    }
}

/// Global flags that take precedence over the config file.
struct Overrides {
    upload_dir: Option<PathBuf>,
    model: Option<String>,
}

impl Overrides {
    fn apply(&self, mut config: AppConfig) -> AppConfig {
        if let Some(dir) = &self.upload_dir {
            config.defaults.upload_dir = dir.to_string_lossy().into_owned();
        }
        if let Some(model) = &self.model {
            config.oracle.model = model.clone();
        }
        config
    }
}

fn resolved_config(overrides: &Overrides) -> Result<AppConfig> {
    Ok(overrides.apply(load_config()?))
}

fn build_pipeline(config: &AppConfig, progress: Arc<CliProgress>) -> Result<Pipeline> {
    Ok(Pipeline::from_config(config)?.with_progress(progress))
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_extract(file: &Path) -> Result<()> {
    let text = docfill_extract::extract_file(file)?;
    print!("{text}");
    if !text.ends_with('\n') {
        println!();
    }
    Ok(())
}

async fn cmd_analyze(file: &Path, json: bool, overrides: &Overrides) -> Result<()> {
    let config = resolved_config(overrides)?;
    let pipeline = build_pipeline(&config, Arc::new(CliProgress::new()))?;

    let outcome = analyze_once(&pipeline, file).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

async fn cmd_fill(
    file: &Path,
    answers: Answers,
    out: Option<&Path>,
    overrides: &Overrides,
) -> Result<()> {
    let config = resolved_config(overrides)?;
    let pipeline = build_pipeline(&config, Arc::new(CliProgress::new()))?;

    let token = upload_file(&pipeline, file).await?;
    let path = fill_and_deliver(&pipeline, &token, answers, out).await?;

    println!("Filled document: {}", path.display());
    Ok(())
}

async fn cmd_run(file: &Path, out: Option<&Path>, overrides: &Overrides) -> Result<()> {
    let config = resolved_config(overrides)?;
    let pipeline = build_pipeline(&config, Arc::new(CliProgress::new()))?;

    let token = upload_file(&pipeline, file).await?;
    let analyzed = pipeline.analyze(&token).await.map_err(Report::from);
    let outcome = discard_on_error(&pipeline, &token, analyzed).await?;
    print_outcome(&outcome);

    if outcome.variables.is_empty() {
        println!("Nothing to fill in.");
    }
    let prompted = prompt_answers(&outcome.variables);
    let answers = discard_on_error(&pipeline, &token, prompted).await?;

    let path = fill_and_deliver(&pipeline, &token, answers, out).await?;

    println!();
    println!("Filled document: {}", path.display());
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(overrides: &Overrides) -> Result<()> {
    let config = resolved_config(overrides)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn upload_file(pipeline: &Pipeline, file: &Path) -> Result<SessionToken> {
    let bytes =
        std::fs::read(file).wrap_err_with(|| format!("cannot read {}", file.display()))?;
    let name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| eyre!("'{}' has no usable file name", file.display()))?;

    let token = pipeline.upload(&bytes, name).await?;
    info!(%token, file = %file.display(), "uploaded");
    Ok(token)
}

/// Analyze `file` in a session that is dropped again afterwards.
async fn analyze_once(pipeline: &Pipeline, file: &Path) -> Result<AnalyzeOutcome> {
    let token = upload_file(pipeline, file).await?;
    let outcome = pipeline.analyze(&token).await;
    release(pipeline, &token).await;
    Ok(outcome?)
}

/// Fill the session's document and hand the artifact to the user.
///
/// With `out` the artifact is copied there and the session is dropped.
/// Without it the artifact stays in the session directory and the session
/// is kept, unless filling failed.
async fn fill_and_deliver(
    pipeline: &Pipeline,
    token: &SessionToken,
    answers: Answers,
    out: Option<&Path>,
) -> Result<PathBuf> {
    let delivered = match pipeline.generate(token, answers).await {
        Ok(artifact) => deliver(&artifact, out),
        Err(e) => Err(e.into()),
    };
    if out.is_some() || delivered.is_err() {
        release(pipeline, token).await;
    }
    delivered
}

async fn discard_on_error<T>(
    pipeline: &Pipeline,
    token: &SessionToken,
    result: Result<T>,
) -> Result<T> {
    if result.is_err() {
        release(pipeline, token).await;
    }
    result
}

/// Drop a session. Cleanup failures are logged, not returned.
async fn release(pipeline: &Pipeline, token: &SessionToken) {
    if let Err(e) = pipeline.discard(token).await {
        warn!(%token, error = %e, "failed to discard session");
    }
}

/// Copy the artifact into `out` when given; otherwise leave it in the session dir.
fn deliver(artifact: &ArtifactRef, out: Option<&Path>) -> Result<PathBuf> {
    let Some(dir) = out else {
        return Ok(artifact.path.clone());
    };
    std::fs::create_dir_all(dir).wrap_err_with(|| format!("cannot create {}", dir.display()))?;
    let dest = dir.join(&artifact.file_name);
    std::fs::copy(&artifact.path, &dest)
        .wrap_err_with(|| format!("cannot copy artifact to {}", dest.display()))?;
    Ok(dest)
}

fn print_outcome(outcome: &AnalyzeOutcome) {
    if let Some(reason) = &outcome.degraded {
        println!("Variable identification unavailable: {reason}");
        return;
    }
    if outcome.sample {
        println!("No API key configured; showing sample variables.");
    }
    println!();
    for var in &outcome.variables {
        println!("  {:<24} {}", var.name, var.description);
    }
    println!();
}

/// Ask for each variable on stdin. Blank input skips the variable.
fn prompt_answers(variables: &[Variable]) -> Result<Answers> {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();
    let mut answers = Answers::new();

    for var in variables {
        print!("{} ({}): ", var.name, var.description);
        std::io::stdout().flush()?;
        let Some(line) = lines.next() else {
            break;
        };
        let value = line?;
        let value = value.trim();
        if !value.is_empty() {
            answers.insert(var.name.clone(), value);
        }
    }
    Ok(answers)
}

/// Parse `NAME=VALUE`. The value may itself contain `=`.
fn parse_answer(raw: &str) -> std::result::Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("answer '{raw}' has an empty name"));
    }
    Ok((name.to_string(), value.to_string()))
}

/// Answers from the JSON file first, then the `--answer` flags on top.
fn collect_answers(file: Option<&Path>, pairs: Vec<(String, String)>) -> Result<Answers> {
    let mut answers = match file {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .wrap_err_with(|| format!("cannot read {}", path.display()))?;
            serde_json::from_str::<Answers>(&raw)
                .wrap_err_with(|| format!("{} is not a JSON object of strings", path.display()))?
        }
        None => Answers::new(),
    };
    answers.extend(pairs.into_iter().collect());
    Ok(answers)
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner per pipeline step.
struct CliProgress {
    spinner: Mutex<Option<ProgressBar>>,
}

impl CliProgress {
    fn new() -> Self {
        Self {
            spinner: Mutex::new(None),
        }
    }

    fn spinner() -> ProgressBar {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        spinner
    }

    fn finish(&self) {
        if let Ok(mut guard) = self.spinner.lock() {
            if let Some(spinner) = guard.take() {
                spinner.finish_and_clear();
            }
        }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        if let Ok(mut guard) = self.spinner.lock() {
            guard
                .get_or_insert_with(Self::spinner)
                .set_message(name.to_string());
        }
    }

    fn analyzed(&self, _outcome: &AnalyzeOutcome) {
        self.finish();
    }

    fn generated(&self, _artifact: &ArtifactRef) {
        self.finish();
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        self.finish();
    }
}
