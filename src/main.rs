//! comet - terminal-native agent for answering repository questions.

use anyhow::{anyhow, Result};
use clap::Parser;
use comet::agent::{Agent, RunResult};
use comet::config::Config;
use comet::llm::{Client, MockClient, OpenRouterClient};
use comet::render::{Renderer, StdoutRenderer, TeeWriter};
use comet::repo::{self, Limits};
use comet::tools::{Allowlist, ExaTool, GrepTool, Registry, ShellTool};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "comet",
    version,
    about = "Ask questions about the current repository from the terminal"
)]
struct Args {
    /// Question to answer
    #[arg(required = true, trailing_var_arg = true)]
    question: Vec<String>,

    /// Model name
    #[arg(long)]
    model: Option<String>,

    /// Maximum tool steps
    #[arg(long)]
    max_steps: Option<u32>,

    /// Repository path
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Overall timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Allow unsafe shell commands
    #[arg(long)]
    unsafe_shell: bool,

    /// Disable web search
    #[arg(long)]
    no_web: bool,

    /// Disable plan output and generation
    #[arg(long)]
    no_plan: bool,

    /// Only print the final answer
    #[arg(long)]
    quiet: bool,

    /// Output the run record as JSON
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,

    /// Write plain-text output to a file as well
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Number of shell history lines to include
    #[arg(long)]
    history_lines: Option<usize>,

    /// Disable shell history context
    #[arg(long)]
    no_history: bool,
}

fn apply_args(cfg: &mut Config, args: &Args) {
    if let Some(model) = &args.model {
        cfg.model = model.clone();
    }
    if let Some(max_steps) = args.max_steps {
        cfg.max_steps = max_steps;
    }
    if let Some(timeout_secs) = args.timeout_secs {
        cfg.timeout_secs = timeout_secs;
    }
    cfg.unsafe_shell |= args.unsafe_shell;
    cfg.no_web |= args.no_web;
    cfg.no_plan |= args.no_plan;
    cfg.quiet |= args.quiet;
    cfg.json |= args.json;
    cfg.verbose |= args.verbose;
    cfg.no_history |= args.no_history;
    if let Some(history_lines) = args.history_lines {
        cfg.history_lines = history_lines;
    }
    if args.log_file.is_some() {
        cfg.log_file = args.log_file.clone();
    }
    if args.repo != PathBuf::from(".") {
        cfg.repo = args.repo.clone();
    }
    if cfg.quiet {
        cfg.no_plan = true;
    }
}

fn persist_run(result: &RunResult) {
    let Some(dir) = Config::runs_dir() else {
        tracing::warn!("could not determine data directory; run not persisted");
        return;
    };
    if let Err(err) = std::fs::create_dir_all(&dir) {
        tracing::warn!(error = %err, "failed to create run directory");
        return;
    }
    let path = dir.join(format!("{}.json", result.run_id));
    match serde_json::to_string_pretty(result) {
        Ok(payload) => {
            if let Err(err) = std::fs::write(&path, payload) {
                tracing::warn!(error = %err, path = %path.display(), "failed to write run log");
            }
        }
        Err(err) => tracing::warn!(error = %err, "failed to serialize run log"),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose { "comet=debug" } else { "comet=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut cfg = Config::load();
    apply_args(&mut cfg, &args);
    let question = args.question.join(" ");

    let mock_mode = std::env::var("COMET_MOCK_LLM").as_deref() == Ok("1");
    let api_key = std::env::var("OPENROUTER_API_KEY")
        .or_else(|_| std::env::var("OPENAI_API_KEY"))
        .unwrap_or_default();
    if api_key.is_empty() && !mock_mode {
        eprintln!("OPENROUTER_API_KEY is required");
        return ExitCode::from(2);
    }

    let timeout = Duration::from_secs(cfg.timeout_secs);
    tokio::select! {
        outcome = tokio::time::timeout(timeout, run(cfg, question)) => match outcome {
            Ok(Ok(code)) => code,
            Ok(Err(err)) => {
                eprintln!("Error: {:#}", err);
                ExitCode::FAILURE
            }
            Err(_) => {
                eprintln!("Error: run timed out after {}s", timeout.as_secs());
                ExitCode::FAILURE
            }
        },
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\nInterrupted");
            ExitCode::from(130)
        }
    }
}

async fn run(cfg: Config, question: String) -> Result<ExitCode> {
    let mut cfg = cfg;
    let repo_root = repo::find_root(&cfg.repo);
    let repo_root = repo_root.canonicalize().unwrap_or(repo_root);
    let repo_ctx = repo::build_context(
        &repo_root,
        Limits {
            context_max_bytes: cfg.limits.context_max_bytes,
            max_file_bytes: cfg.limits.max_file_bytes,
        },
    );

    let mut registry = Registry::new();
    registry.register(Arc::new(GrepTool::detect()));
    registry.register(Arc::new(ShellTool::new(Allowlist::from_entries(
        &cfg.shell_allowlist,
    ))));
    match std::env::var("EXA_API_KEY") {
        Ok(exa_key) if !exa_key.is_empty() && !cfg.no_web => {
            registry.register(Arc::new(ExaTool::new(exa_key)?));
        }
        _ => cfg.no_web = true,
    }

    let client: Arc<dyn Client> = if std::env::var("COMET_MOCK_LLM").as_deref() == Ok("1") {
        Arc::new(MockClient::new())
    } else {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .or_else(|_| std::env::var("OPENAI_API_KEY"))
            .map_err(|_| anyhow!("OPENROUTER_API_KEY is required"))?;
        Arc::new(OpenRouterClient::new(
            api_key,
            cfg.base_url.clone(),
            cfg.http_referer.clone(),
            cfg.title.clone(),
        )?)
    };

    let renderer: Option<Box<dyn Renderer>> = if cfg.json {
        None
    } else {
        let writer: Box<dyn Write + Send> = match &cfg.log_file {
            Some(log_file) => {
                let path = if log_file.is_absolute() {
                    log_file.clone()
                } else {
                    repo_root.join(log_file)
                };
                let file = std::fs::File::create(&path)?;
                Box::new(TeeWriter::new(vec![
                    Box::new(std::io::stdout()),
                    Box::new(file),
                ]))
            }
            None => Box::new(std::io::stdout()),
        };
        Some(Box::new(StdoutRenderer::new(
            writer,
            cfg.verbose,
            cfg.quiet,
            cfg.no_plan,
        )))
    };

    let json_mode = cfg.json;
    let persist = cfg.persist_runs;
    let mut agent = Agent::new(client, registry, renderer, cfg);
    let (result, run_err) = agent.run(&question, &repo_ctx).await;

    if persist {
        persist_run(&result);
    }
    if json_mode {
        println!("{}", serde_json::to_string_pretty(&result)?);
    }
    match run_err {
        Some(err) => {
            if !json_mode {
                eprintln!("Error: {:#}", err);
            }
            Ok(ExitCode::FAILURE)
        }
        None => Ok(ExitCode::SUCCESS),
    }
}
