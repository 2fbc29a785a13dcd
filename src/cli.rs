use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use crate::commands::organize_pipeline::{self, PipelineCtx};
use crate::config::OrganizeConfig;
use crate::services::classifier_service::ScriptedClassifier;
use crate::services::memory_host::{HostFixture, InMemoryHost};
use crate::state::{AppState, ProgressEvent};

const LOG_ENV: &str = "TABSHELF_LOG";

#[derive(Parser, Debug)]
#[command(name = "tabshelf", version, about = "Reorganize browser windows and tabs")]
struct Cli {
    /// Organize config (JSON); defaults to the platform config dir
    #[arg(long, global = true, env = "TABSHELF_CONFIG")]
    config: Option<PathBuf>,
    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print the target layout and the first plan without changing anything
    Plan(RunArgs),
    /// Run the full pipeline against a simulated browser
    Simulate(RunArgs),
    /// Dissolve every tab group in a simulated browser
    Ungroup {
        /// Browser state: {"windows": [...], "tabs": [...], "groups": [...]}
        #[arg(long)]
        fixture: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Browser state: {"windows": [...], "tabs": [...], "groups": [...]}
    #[arg(long)]
    fixture: PathBuf,
    /// Canned classifier answers, one JSON value per batch; enables topic grouping
    #[arg(long)]
    classifier_responses: Option<PathBuf>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RunOutput<T> {
    result: T,
    host: HostFixture,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

fn load_host(path: &Path) -> anyhow::Result<InMemoryHost> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading fixture {}", path.display()))?;
    Ok(InMemoryHost::from_json(&raw)?)
}

fn load_classifier(path: Option<&Path>) -> anyhow::Result<Option<ScriptedClassifier>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading classifier responses {}", path.display()))?;
    let responses: Vec<Value> = serde_json::from_str(&raw)
        .with_context(|| format!("parsing classifier responses {}", path.display()))?;
    Ok(Some(ScriptedClassifier::new(responses)))
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn log_progress(event: ProgressEvent) {
    tracing::debug!(
        phase = ?event.phase,
        current = event.current,
        total = event.total,
        "{}",
        event.detail
    );
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = OrganizeConfig::load_or_default(cli.config.as_deref())?;
    let state = AppState::new(config);
    let progress = log_progress;

    match cli.cmd {
        Cmd::Plan(args) => {
            let host = load_host(&args.fixture)?;
            let classifier = load_classifier(args.classifier_responses.as_deref())?;
            let mut ctx = PipelineCtx::new(&host, &state, &progress);
            if let Some(classifier) = classifier.as_ref() {
                ctx = ctx.with_classifier(classifier);
            }
            let preview = organize_pipeline::preview_plan(&ctx, classifier.is_some()).await?;
            print_json(&preview)
        }
        Cmd::Simulate(args) => {
            let host = load_host(&args.fixture)?;
            state.browser_cache.hydrate(&host).await?;
            let classifier = load_classifier(args.classifier_responses.as_deref())?;
            let mut ctx = PipelineCtx::new(&host, &state, &progress);
            if let Some(classifier) = classifier.as_ref() {
                ctx = ctx.with_classifier(classifier);
            }
            let report =
                organize_pipeline::run_full_pipeline(&ctx, classifier.is_some()).await?;
            print_json(&RunOutput {
                result: report,
                host: host.fixture(),
            })
        }
        Cmd::Ungroup { fixture } => {
            let host = load_host(&fixture)?;
            let ctx = PipelineCtx::new(&host, &state, &progress);
            let report = organize_pipeline::run_ungroup_all(&ctx).await?;
            print_json(&RunOutput {
                result: report,
                host: host.fixture(),
            })
        }
    }
}

/// Binary entry point.
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.json_logs);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    runtime.block_on(execute(cli))
}
