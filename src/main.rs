use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use clap::Parser;
use futures::{pin_mut, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use scout_core::messages::Message;
use scout_core::tools::ToolContext;
use scout_engine::compaction::{CompactionEngine, CompactionStatsLog};
use scout_engine::prompt::default_prompt_context;
use scout_engine::tools::register_builtin_tools;
use scout_engine::{
    HookEngine, PermissionCheck, ProcessExecutor, QueryConfig, QueryEvent, QueryLoop,
    ToolDispatcher, ToolRegistry,
};
use scout_llm::ProviderRouter;
use scout_settings::ScoutSettings;
use scout_store::{CompactionStatsRepo, Database};
use scout_telemetry::{init_telemetry, parse_level, LogFormat, TelemetryConfig};

const SYSTEM_PROMPT: &str = "You are a coding agent working in {{cwd}} on {{platform}}. \
Today is {{date}}. Use the available tools to inspect and change the workspace, \
and answer concisely.";

#[derive(Parser, Debug)]
#[command(name = "scout", about = "Run one agent conversation from the terminal")]
struct Cli {
    /// Settings file. Defaults to ~/.scout/settings.json.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Working directory for tools. Defaults to the current directory.
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Run every tool without asking.
    #[arg(long)]
    skip_permissions: bool,

    /// Offer the model no tools.
    #[arg(long)]
    no_tools: bool,

    prompt: Vec<String>,
}

/// Asks on stderr before a tool that needs permission runs.
struct TerminalPermission;

#[async_trait]
impl PermissionCheck for TerminalPermission {
    async fn can_use_tool(&self, tool_name: &str, input: &Value) -> bool {
        let question = format!("Allow {tool_name} with {input}? [y/N] ");
        tokio::task::spawn_blocking(move || {
            let mut stderr = std::io::stderr();
            let _ = write!(stderr, "{question}");
            let _ = stderr.flush();
            let mut answer = String::new();
            if std::io::stdin().read_line(&mut answer).is_err() {
                return false;
            }
            matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
        })
        .await
        .unwrap_or(false)
    }
}

fn load(cli: &Cli) -> anyhow::Result<ScoutSettings> {
    let mut settings = match &cli.config {
        Some(path) => scout_settings::load_settings_from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => scout_settings::load_settings()?,
    };
    if cli.skip_permissions {
        settings.query.skip_permissions = true;
    }
    Ok(settings)
}

fn telemetry_config(settings: &ScoutSettings) -> TelemetryConfig {
    let format = match settings.logging.format.as_str() {
        "pretty" => LogFormat::Pretty,
        _ => LogFormat::Json,
    };
    TelemetryConfig {
        log_level: parse_level(&settings.logging.level).unwrap_or(tracing::Level::WARN),
        format,
        ..Default::default()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    init_telemetry(&telemetry_config(&settings))?;

    let prompt = cli.prompt.join(" ");
    if prompt.trim().is_empty() {
        anyhow::bail!("no prompt given");
    }
    let cwd = match &cli.cwd {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };

    let router = Arc::new(ProviderRouter::from_config(&settings.provider)?);
    tracing::info!(provider = %router.kind(), "provider ready");

    let mut registry = ToolRegistry::new();
    if !cli.no_tools {
        register_builtin_tools(&mut registry);
    }
    let dispatcher = ToolDispatcher::new(Arc::new(registry))
        .with_hooks(Arc::new(HookEngine::from_settings(&settings.hooks)?))
        .with_permission(Arc::new(TerminalPermission))
        .with_skip_permissions(settings.query.skip_permissions);

    let db_path = settings
        .store
        .database_path
        .as_ref()
        .map(PathBuf::from)
        .unwrap_or_else(|| scout_settings::scout_dir().join("scout.db"));
    let db = Database::open(&db_path)?;
    let stats = Arc::new(CompactionStatsLog::new(
        Arc::new(CompactionStatsRepo::new(db)),
        settings.compaction.flush_every,
    ));
    let compaction = CompactionEngine::new(router.clone(), settings.compaction.clone())
        .with_stats(stats.clone());

    let config = QueryConfig::from_settings(&settings.query)
        .with_system_prompt(vec![SYSTEM_PROMPT.to_string()])
        .with_prompt_context(default_prompt_context(&cwd));
    let query = QueryLoop::new(router, Arc::new(dispatcher), config)
        .with_compaction(Arc::new(compaction));

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let ctx = ToolContext::new(cwd, cancel).with_executor(Arc::new(ProcessExecutor::new()));
    let events = query.run(vec![Message::user_text(prompt)], ctx);
    pin_mut!(events);

    let mut stdout = std::io::stdout();
    while let Some(event) = events.next().await {
        match event? {
            QueryEvent::Message(Message::Assistant(msg)) => {
                let text = msg.text_content();
                if !text.is_empty() {
                    writeln!(stdout, "{text}")?;
                }
            }
            QueryEvent::Message(Message::Progress(progress)) => {
                eprint!("{}", progress.content);
            }
            QueryEvent::Message(Message::User(_)) => {}
            QueryEvent::Compacted { stats, .. } => {
                tracing::info!(
                    messages = stats.message_count,
                    tokens_removed = stats.tokens_removed,
                    "history compacted"
                );
            }
        }
    }

    if let Err(e) = stats.flush() {
        tracing::warn!(error = %e, "failed to flush compaction stats");
    }
    Ok(())
}
