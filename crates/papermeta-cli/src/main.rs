use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use papermeta_core::config_file::{self, ConfigFile};
use papermeta_core::store::{has_prior_state, reset_state};
use papermeta_core::{
    CheckpointStore, Config, GeminiClient, MetadataRequester, Orchestrator, PdfBackend,
    ProgressEvent, ResultStore, RunSummary, validate_root,
};
use papermeta_pdf_mupdf::MupdfBackend;
use tokio_util::sync::CancellationToken;

mod output;

use output::ColorMode;

/// Extract bibliographic metadata from a folder of academic PDFs
///
/// Progress is saved after every file; rerunning over the same folder
/// resumes where the previous run stopped.
#[derive(Parser, Debug)]
#[command(name = "papermeta", version, about)]
struct Cli {
    /// Directory to scan recursively for PDFs (asked for when omitted)
    root: Option<PathBuf>,

    /// Directory holding metadata.json and processed_files.json
    #[arg(long)]
    state_dir: Option<PathBuf>,

    /// Forget previous progress before running (results are backed up)
    #[arg(long)]
    reset: bool,

    /// Never ask interactive questions
    #[arg(long)]
    no_prompt: bool,

    /// Gemini model name
    #[arg(long)]
    model: Option<String>,

    /// Number of leading pages sent for extraction
    #[arg(long)]
    max_pages: Option<usize>,

    /// Attempts per file before giving up on transient errors
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();
    let cli = Cli::parse();

    let color = ColorMode(!cli.no_color && std::io::stdout().is_terminal());
    let config = resolve_config(&cli, config_file::load_config(), |key| {
        std::env::var(key).ok()
    })?;
    tracing::debug!(?config, "resolved configuration");

    let backend = MupdfBackend::new();
    let timeout = Duration::from_secs(config.request_timeout_secs);
    run(
        &cli,
        &config,
        &backend,
        |api_key| Ok(GeminiClient::new(api_key, config.model.clone(), timeout)?),
        &CancellationToken::new(),
        color,
    )
    .await?;

    Ok(())
}

/// One full invocation after configuration is resolved.
///
/// The root and the API key are checked before the state directory is read
/// or written; either problem is an error. Files that fail individually are
/// part of a successful run and only show up in the returned summary.
async fn run<R: MetadataRequester>(
    cli: &Cli,
    config: &Config,
    backend: &dyn PdfBackend,
    connect: impl FnOnce(String) -> anyhow::Result<R>,
    cancel: &CancellationToken,
    color: ColorMode,
) -> anyhow::Result<RunSummary> {
    let root = resolve_root(cli.root.clone(), cli.no_prompt)?;
    validate_root(&root)?;

    let Some(api_key) = config.api_key.clone() else {
        output::print_missing_key_help(&mut std::io::stderr(), color)?;
        anyhow::bail!("no Gemini API key configured");
    };

    let mut stdout = std::io::stdout();
    if should_reset(cli, config)? {
        match reset_state(&config.state_dir)? {
            Some(backup) => writeln!(stdout, "Backed up previous results to {}", backup.display())?,
            None => writeln!(stdout, "Cleared processing status")?,
        }
    }

    let mut checkpoints = CheckpointStore::in_dir(&config.state_dir)?;
    let mut results = ResultStore::in_dir(&config.state_dir)?;

    let requester = connect(api_key)?;
    writeln!(stdout, "Using {}", requester.name())?;

    // Set up Ctrl+C handler once no more questions will be asked
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel_clone.cancel();
        }
    });

    let orchestrator = Orchestrator::new(backend, &requester)
        .with_retry_policy(config.retry)
        .with_max_pages(config.max_pages);

    let bar = progress_bar(std::io::stderr().is_terminal());
    let progress_cb = |event: ProgressEvent| {
        match &event {
            ProgressEvent::Discovered { pending, .. } => bar.set_length(*pending as u64),
            ProgressEvent::Processing { relative_path, .. } => {
                bar.set_message(relative_path.clone())
            }
            ProgressEvent::Succeeded { .. } | ProgressEvent::Failed { .. } => bar.inc(1),
            _ => {}
        }
        bar.suspend(|| {
            let mut out = std::io::stdout().lock();
            let _ = output::print_progress(&mut out, &event, color);
            let _ = out.flush();
        });
    };

    let summary = orchestrator
        .process_directory(&root, &mut checkpoints, &mut results, progress_cb, cancel)
        .await;
    bar.finish_and_clear();
    let summary = summary?;

    output::print_summary(
        &mut stdout,
        &summary,
        checkpoints.len(),
        results.len(),
        results.path(),
        color,
    )?;

    Ok(summary)
}

/// Install the stderr log subscriber; `RUST_LOG` overrides the default level.
fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Resolve configuration: CLI flags > env vars > config file > defaults.
fn resolve_config(
    cli: &Cli,
    file: ConfigFile,
    env: impl Fn(&str) -> Option<String>,
) -> anyhow::Result<Config> {
    let mut config = Config::from_file(&file);

    if let Some(key) = env("GEMINI_API_KEY").filter(|k| !k.trim().is_empty()) {
        config.api_key = Some(key.trim().to_string());
    }
    if let Some(model) = env("GEMINI_MODEL").filter(|m| !m.trim().is_empty()) {
        config.model = model.trim().to_string();
    }
    if let Some(raw) = env("PAPERMETA_MAX_PAGES") {
        match raw.trim().parse() {
            Ok(pages) => config.max_pages = pages,
            Err(_) => tracing::warn!(value = %raw, "ignoring invalid PAPERMETA_MAX_PAGES"),
        }
    }

    if let Some(model) = &cli.model {
        config.model = model.clone();
    }
    if let Some(pages) = cli.max_pages {
        config.max_pages = pages;
    }
    if let Some(attempts) = cli.max_attempts {
        config.retry.max_attempts = attempts;
    }
    if let Some(dir) = &cli.state_dir {
        config.state_dir = dir.clone();
    }

    config.validate()?;
    Ok(config)
}

fn ask(question: &str) -> anyhow::Result<String> {
    let mut stdout = std::io::stdout();
    write!(stdout, "{}", question)?;
    stdout.flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Strip whitespace and the quotes terminals add around dragged-in paths.
fn clean_path_input(input: &str) -> &str {
    input.trim().trim_matches(|c| c == '"' || c == '\'')
}

fn resolve_root(root: Option<PathBuf>, no_prompt: bool) -> anyhow::Result<PathBuf> {
    if let Some(root) = root {
        return Ok(root);
    }
    if no_prompt {
        anyhow::bail!("no directory given: pass ROOT or drop --no-prompt");
    }
    let answer = ask("Enter the directory path containing PDF papers: ")?;
    let cleaned = clean_path_input(&answer);
    if cleaned.is_empty() {
        anyhow::bail!("no directory given");
    }
    Ok(PathBuf::from(cleaned))
}

fn should_reset(cli: &Cli, config: &Config) -> anyhow::Result<bool> {
    if cli.reset {
        return Ok(true);
    }
    if cli.no_prompt || !std::io::stdin().is_terminal() || !has_prior_state(&config.state_dir) {
        return Ok(false);
    }
    let answer = ask("\nFound existing processing data. Reset and start fresh? (y/N): ")?;
    Ok(is_yes(&answer))
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

fn progress_bar(visible: bool) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{bar:40.green/dim}] {pos}/{len} {wide_msg}",
    )
    .map(|s| s.progress_chars("=> "))
    .unwrap_or_else(|_| ProgressStyle::default_bar());
    let bar = ProgressBar::new(0);
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}
