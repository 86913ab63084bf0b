//! zsxq-explain CLI.
//!
//! Usage examples:
//!   Explain a pasted paragraph:
//!     $ ZSXQ_DEEPSEEK_API_KEY=... ZSXQ_MODEL=deepseek:deepseek-chat \
//!       zsxq-explain explain --text "央行停止购买国债以稳定汇率"
//!   Explain the post under a point of a live page:
//!     $ ZSXQ_CHROME_BIN=/path/to/chrome zsxq-explain explain \
//!       --url https://wx.zsxq.com/group/123 --x 400 --y 1200
//!   Summarise collected posts and sync the result to notes:
//!     $ zsxq-explain summarize posts.txt --sync-notes
//!   Harvest a live feed, keep the raw posts, and summarise them:
//!     $ zsxq-explain summarize --url https://wx.zsxq.com/group/123 \
//!       --scrolls 8 --save-harvest posts.json
//!   List the chat models a provider offers:
//!     $ zsxq-explain models --provider openai

use std::env;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use log::{info, warn};
use tokio::io::AsyncReadExt;
use zsxq_explain::config::{ExplainerSettings, SettingsOverrides, Verbosity, parse_model_selection};
use zsxq_explain::export::NoteBridge;
use zsxq_explain::harvest::ContentHarvester;
use zsxq_explain::llm::prompts::{DISCLAIMER, LOADING_TEXT, SYNC_BUTTON_TEXT};
use zsxq_explain::llm::{ModelFilter, ModelRegistry, PromptMode};
use zsxq_explain::locator::ContentLocator;
use zsxq_explain::logging::{LogCallback, LogCategory, log_facade_handler};
use zsxq_explain::runtime::{BrowserSession, LaunchOptions};
use zsxq_explain::session::{Explainer, SessionSnapshot, SessionState};
use zsxq_explain::surface::PresentationSurface;
use zsxq_explain::transport::ReqwestTransport;
use zsxq_explain::types::{ContentPoint, ProviderKind};

#[derive(Parser)]
#[command(
    name = "zsxq-explain",
    author,
    version,
    about = "Stream AI explanations of community posts"
)]
struct Cli {
    /// Increase log verbosity (pass multiple times for DEBUG).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Persisted settings file (JSON). Environment variables still apply on top.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Explain one post, given as text or located on a live page.
    Explain(ExplainArgs),
    /// Summarise many posts collected from files, stdin, or a live page.
    Summarize(SummarizeArgs),
    /// Fetch and print the chat models a provider offers.
    Models(ModelsArgs),
}

#[derive(Args)]
struct SessionArgs {
    /// System prompt for this run only.
    #[arg(long)]
    prompt: Option<String>,

    /// Model for this run only, as `provider:model-id`.
    #[arg(long, value_parser = parse_model_arg)]
    model: Option<zsxq_explain::types::ModelDescriptor>,

    /// Append the finished result to the notes page.
    #[arg(long)]
    sync_notes: bool,

    /// Show the launched browser window.
    #[arg(long)]
    show_browser: bool,
}

#[derive(Args)]
struct ExplainArgs {
    /// Text to explain.
    #[arg(long, conflicts_with = "url")]
    text: Option<String>,

    /// Page to open; the post under `--x`/`--y` is explained.
    #[arg(long, requires_all = ["x", "y"])]
    url: Option<String>,

    /// Page x coordinate (document space, not viewport).
    #[arg(long, allow_negative_numbers = true)]
    x: Option<f64>,

    /// Page y coordinate (document space, not viewport).
    #[arg(long, allow_negative_numbers = true)]
    y: Option<f64>,

    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Args)]
struct SummarizeArgs {
    /// Files holding posts separated by blank lines. Reads stdin when empty.
    files: Vec<PathBuf>,

    /// Harvest posts from this page instead of files.
    #[arg(long, conflicts_with = "files")]
    url: Option<String>,

    /// Number of viewport-height scrolls to harvest after the first screen.
    #[arg(long, default_value_t = 5)]
    scrolls: u32,

    /// Also write the collected posts as JSON to this path.
    #[arg(long)]
    save_harvest: Option<PathBuf>,

    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Args)]
struct ModelsArgs {
    /// `deepseek` or `openai`.
    #[arg(long, value_parser = parse_provider_arg)]
    provider: ProviderKind,

    /// Keep image, embedding and audio models.
    #[arg(long)]
    all: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_env_logger();

    let cli = Cli::parse();
    let verbosity = verbosity_from_count(cli.verbose);
    let settings = load_settings(cli.settings.as_ref(), verbosity)?;

    match cli.command {
        Command::Explain(args) => run_explain(settings, args).await,
        Command::Summarize(args) => run_summarize(settings, args).await,
        Command::Models(args) => run_models(settings, args).await,
    }
}

fn load_settings(path: Option<&PathBuf>, verbosity: Verbosity) -> Result<ExplainerSettings> {
    let settings = match path {
        Some(path) => ExplainerSettings::from_json_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => ExplainerSettings::from_env().context("failed to load settings from environment")?,
    };
    let logger: LogCallback = Arc::new(log_facade_handler);
    Ok(settings.with_overrides(SettingsOverrides {
        verbose: Some(verbosity),
        logger: Some(Some(logger)),
        ..Default::default()
    }))
}

fn apply_session_args(settings: ExplainerSettings, args: &SessionArgs) -> ExplainerSettings {
    match &args.model {
        Some(model) => {
            settings.with_overrides(SettingsOverrides::default().selected_model(model.clone()))
        }
        None => settings,
    }
}

async fn run_explain(settings: ExplainerSettings, args: ExplainArgs) -> Result<()> {
    let settings = apply_session_args(settings, &args.session);

    let text = match (&args.text, &args.url) {
        (Some(text), _) => text.clone(),
        (None, Some(url)) => {
            let (x, y) = args
                .x
                .zip(args.y)
                .ok_or_else(|| anyhow!("--url needs both --x and --y"))?;
            locate_on_page(&settings, url, ContentPoint::new(x, y), args.session.show_browser)
                .await?
        }
        (None, None) => bail!("pass --text, or --url with --x and --y"),
    };

    run_session(settings, text, PromptMode::Explain, &args.session).await
}

async fn locate_on_page(
    settings: &ExplainerSettings,
    url: &str,
    point: ContentPoint,
    show_browser: bool,
) -> Result<String> {
    let mut browser = launch_browser(url, show_browser).await?;
    browser
        .scroll_to(0.0, (point.y - 200.0).max(0.0))
        .await
        .context("failed to scroll to the requested point")?;

    let mut snapshot = browser.snapshot().await.context("failed to capture the page")?;
    let locator = ContentLocator::new(settings.content_rule.clone());
    let located = locator.extract(&mut snapshot, point);
    if let Err(err) = browser.sync_highlight(&snapshot).await {
        warn!("could not mirror highlight onto the page: {err}");
    }
    browser.close().await.context("failed to close the browser")?;

    match located {
        Ok(found) => {
            let chars = found.text.chars().count();
            info!("located {chars} characters under ({}, {})", point.x, point.y);
            Ok(found.text)
        }
        Err(err) => bail!("{} ({err})", err.user_message()),
    }
}

async fn run_summarize(settings: ExplainerSettings, args: SummarizeArgs) -> Result<()> {
    let settings = apply_session_args(settings, &args.session);
    let mut harvester = ContentHarvester::new();

    if let Some(url) = &args.url {
        harvest_page(&settings, &mut harvester, url, &args).await?;
    } else if args.files.is_empty() {
        let mut input = String::new();
        tokio::io::stdin()
            .read_to_string(&mut input)
            .await
            .context("failed to read stdin")?;
        harvester.push_all(split_blocks(&input));
    } else {
        for path in &args.files {
            let input = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            harvester.push_all(split_blocks(&input));
        }
    }

    if harvester.is_empty() {
        bail!("no content collected");
    }
    if let Some(path) = &args.save_harvest {
        let archive = serde_json::to_string_pretty(&harvester.export_json(Utc::now()))
            .context("failed to serialise collected posts")?;
        tokio::fs::write(path, archive)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        info!("saved {} posts to {}", harvester.count(), path.display());
    }
    info!("summarising {} collected posts", harvester.count());
    run_session(settings, harvester.aggregate(), PromptMode::Summary, &args.session).await
}

async fn harvest_page(
    settings: &ExplainerSettings,
    harvester: &mut ContentHarvester,
    url: &str,
    args: &SummarizeArgs,
) -> Result<()> {
    let mut browser = launch_browser(url, args.session.show_browser).await?;
    let viewport_height = f64::from(LaunchOptions::from_env().height);

    for step in 0..=args.scrolls {
        browser
            .scroll_to(0.0, f64::from(step) * viewport_height)
            .await
            .context("failed to scroll the page")?;
        tokio::time::sleep(Duration::from_millis(500)).await;
        let snapshot = browser.snapshot().await.context("failed to capture the page")?;
        let added = harvester.harvest_snapshot(&snapshot, &settings.content_rule);
        info!("scroll {step}: {added} new posts ({} total)", harvester.count());
    }

    browser.close().await.context("failed to close the browser")?;
    Ok(())
}

async fn launch_browser(url: &str, show_browser: bool) -> Result<BrowserSession> {
    let mut options = LaunchOptions::from_env();
    if show_browser {
        options.headless = false;
    }
    let mut browser = BrowserSession::launch(&options)
        .await
        .context("failed to launch Chrome (set ZSXQ_CHROME_BIN)")?;
    browser
        .open(url)
        .await
        .with_context(|| format!("failed to open {url}"))?;
    info!("opened {url}");
    Ok(browser)
}

async fn run_session(
    settings: ExplainerSettings,
    text: String,
    mode: PromptMode,
    args: &SessionArgs,
) -> Result<()> {
    let note_bridge = settings.note_bridge.clone();
    let explainer = Explainer::new(settings, ReqwestTransport::new());
    let surface = Arc::new(TerminalSurface::default());

    let session = explainer.start(text, args.prompt.as_deref(), mode, surface.clone());
    let handle = session.handle();
    let report = session.run().await;
    surface.finish(&report);

    if report.state != SessionState::Done {
        let failure = report
            .failure
            .map(|err| err.to_string())
            .unwrap_or_else(|| format!("session ended as {:?}", report.state));
        bail!(failure);
    }

    if args.sync_notes {
        let bridge = NoteBridge::new(ReqwestTransport::new(), note_bridge);
        match bridge.export(&handle).await {
            Ok(_) => {
                explainer.logger().info(
                    LogCategory::Export,
                    format!("appended to page {:?}", bridge.config().page),
                    None,
                );
                eprintln!("{SYNC_BUTTON_TEXT}: ok");
            }
            Err(err) => {
                explainer
                    .logger()
                    .error(LogCategory::Export, err.to_string(), None);
                bail!(err.user_message());
            }
        }
    }

    Ok(())
}

/// Prints only what each render adds to the already printed text.
#[derive(Default)]
struct TerminalSurface {
    state: Mutex<TerminalState>,
}

#[derive(Default)]
struct TerminalState {
    printed: usize,
    closed: bool,
}

impl TerminalSurface {
    fn lock(&self) -> std::sync::MutexGuard<'_, TerminalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, report: &SessionSnapshot) {
        if report.state == SessionState::Done {
            println!("{DISCLAIMER}");
        } else if self.lock().printed > 0 {
            println!();
        }
        info!(
            "{} fragments, {} characters in {} ms",
            report.metrics.fragments, report.metrics.characters, report.metrics.total_time_ms
        );
    }
}

impl PresentationSurface for TerminalSurface {
    fn show_loading(&self, model_label: &str) {
        eprintln!("{LOADING_TEXT} ({model_label})");
    }

    fn render(&self, markdown: &str) {
        let body = markdown.strip_suffix(DISCLAIMER).unwrap_or(markdown);
        let mut state = self.lock();
        if state.closed {
            return;
        }
        if let Some(fresh) = body.get(state.printed..) {
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(fresh.as_bytes());
            let _ = stdout.flush();
        }
        state.printed = body.len();
    }

    fn show_error(&self, message: &str, _auto_dismiss: Duration) {
        eprintln!("{message}");
    }

    fn dismiss(&self) {
        self.lock().closed = true;
    }

    fn is_open(&self) -> bool {
        !self.lock().closed
    }
}

async fn run_models(settings: ExplainerSettings, args: ModelsArgs) -> Result<()> {
    let filter = if args.all {
        ModelFilter::allow_all()
    } else {
        settings.model_filter.clone()
    };
    let registry = ModelRegistry::new(ReqwestTransport::new())
        .with_filter(filter)
        .with_timeout(settings.request_timeout());

    let models = registry
        .sync(args.provider, settings.credentials(args.provider))
        .await
        .with_context(|| format!("failed to list {} models", args.provider.label()))?;

    for model in models {
        println!("{}:{}", args.provider.as_str(), model.id);
    }
    Ok(())
}

/// Posts in a plain-text file are separated by blank lines.
fn split_blocks(input: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut current = String::new();
    for line in input.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn parse_model_arg(value: &str) -> Result<zsxq_explain::types::ModelDescriptor, String> {
    parse_model_selection(value).ok_or_else(|| format!("expected provider:model-id, got {value:?}"))
}

fn parse_provider_arg(value: &str) -> Result<ProviderKind, String> {
    ProviderKind::parse(value).ok_or_else(|| format!("unknown provider {value:?}"))
}

fn verbosity_from_count(count: u8) -> Verbosity {
    match count {
        0 => Verbosity::Medium,
        _ => Verbosity::Detailed,
    }
}

fn init_env_logger() {
    if env::var("RUST_LOG").is_err() {
        unsafe {
            env::set_var("RUST_LOG", "info");
        }
    }

    let _ = env_logger::Builder::from_env(env_logger::Env::default())
        .format_timestamp_secs()
        .try_init();
}
