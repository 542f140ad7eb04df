mod hook;
mod interactive;
mod memory_cmds;

use std::path::{Component, Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use gitsmart_config::{AppConfig, CONFIG_RELATIVE_PATH};
use gitsmart_memory::SyncDirection;
use gitsmart_repo::RepoAccessor;
use gitsmart_runtime::{AcceptAll, CaptureRequest, GitsmartRuntime};

use crate::interactive::TerminalReviewer;

#[derive(Debug, Parser)]
#[command(
    name = "gitsmart",
    version,
    about = "Decision records attached to your git history, with AI-assisted recall"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write a default .gitsmart/config.toml and optionally install the hook.
    Init {
        #[arg(long)]
        hook: bool,
    },
    /// Record why something was done, anchored to a commit.
    #[command(visible_alias = "remember")]
    Capture {
        #[arg(required = true, num_args = 1..)]
        content: Vec<String>,
        /// decision, note, bug, convention, or any other label
        #[arg(short = 't', long = "type")]
        kind: Option<String>,
        /// Comma-separated or repeated
        #[arg(long = "tag", value_delimiter = ',')]
        tags: Vec<String>,
        #[arg(long, default_value = "HEAD")]
        commit: String,
        /// Skip the AI suggestion
        #[arg(long)]
        no_ai: bool,
        /// Accept the AI suggestion without review
        #[arg(short, long)]
        yes: bool,
    },
    /// Ask a question about the codebase's history.
    #[command(visible_alias = "ask")]
    Query {
        question: Vec<String>,
        /// Show the N most recent queries instead
        #[arg(long, value_name = "N")]
        history: Option<usize>,
    },
    /// Explain how a file or directory came to be.
    Explain { path: String },
    /// Search commit messages and changed paths.
    Search {
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Records, provider and sync overview.
    Status {
        /// Do not contact the remote
        #[arg(long)]
        offline: bool,
    },
    /// Exchange decision records with the remote (pull, then push, by default).
    Sync {
        #[arg(value_enum)]
        direction: Option<CliSyncDirection>,
    },
    Hook {
        #[command(subcommand)]
        command: HookCommands,
    },
    /// Suggest (and store) the reasoning behind an existing commit.
    AnalyzeCommit {
        #[arg(default_value = "HEAD")]
        commit: String,
        #[arg(long)]
        suggest_only: bool,
    },
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Check repository, configuration, provider and hook.
    Doctor,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliSyncDirection {
    Push,
    Pull,
}

#[derive(Debug, Subcommand)]
enum HookCommands {
    /// Invoked by the installed post-commit hook.
    PostCommit,
    Install {
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    Show,
    Get { key: String },
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let cwd = std::env::current_dir()?;
    let repo = RepoAccessor::discover(&cwd).ok();
    let log_level = repo
        .as_ref()
        .and_then(|repo| AppConfig::load_for_repo(repo.root()).ok())
        .map(|config| config.telemetry.log_level)
        .unwrap_or_else(|| "warn".to_string());
    let log_dir = match (&cli.command, &repo) {
        (Commands::Hook { command: HookCommands::PostCommit }, Some(repo)) => Some(repo.local_state_dir().join("logs")),
        _ => None,
    };
    let _guard = init_tracing(&log_level, log_dir);

    let Some(repo) = repo else {
        bail!("not inside a git repository ({})", cwd.display());
    };

    match cli.command {
        Commands::Init { hook } => {
            let path = repo.root().join(CONFIG_RELATIVE_PATH);
            if path.exists() {
                println!("{} already exists", path.display());
            } else {
                AppConfig::default().save_to(&path)?;
                println!("wrote {}", path.display());
            }
            if hook {
                let hook_path = hook::install(repo.git_dir(), false)?;
                println!("installed {}", hook_path.display());
            }
            println!("next: `gitsmart capture \"why you did it\"`, then `gitsmart sync`");
        }
        Commands::Capture {
            content,
            kind,
            tags,
            commit,
            no_ai,
            yes,
        } => {
            let runtime = GitsmartRuntime::open(repo.root())?;
            let mut request = CaptureRequest::new(content.join(" ")).tags(tags).anchor(commit);
            if let Some(kind) = kind {
                request = request.kind(kind);
            }
            let interactive = interactive::can_prompt();
            if no_ai {
                request = request.without_ai();
            } else if !yes && !interactive {
                request = request.without_ai_because("no terminal to review it; pass --yes");
            }
            let outcome = if yes || !interactive {
                runtime.capture(request, &mut AcceptAll).await?
            } else {
                runtime.capture(request, &mut TerminalReviewer).await?
            };
            memory_cmds::print_capture(&outcome);
        }
        Commands::Query { question, history } => {
            let runtime = GitsmartRuntime::open(repo.root())?;
            if let Some(count) = history {
                memory_cmds::print_history(&runtime.query_history(count)?);
                return Ok(());
            }
            let question = question.join(" ");
            if question.trim().is_empty() {
                bail!("ask a question, e.g. gitsmart query \"why do we use Redis?\"");
            }
            let result = runtime.query(&question).await?;
            memory_cmds::print_answer(&result);
        }
        Commands::Explain { path } => {
            let runtime = GitsmartRuntime::open(repo.root())?;
            let path = repo_relative(repo.root(), &cwd, &path);
            let explanation = runtime.explain_path(&path).await?;
            memory_cmds::print_explanation(&explanation);
        }
        Commands::Search { query, limit } => {
            let runtime = GitsmartRuntime::open(repo.root())?;
            let query = query.join(" ");
            let hits = runtime
                .repo()
                .search_commits(&query, runtime.config().query.recent_commit_window, limit)?;
            if hits.is_empty() {
                println!("no commits match '{query}'");
            }
            for commit in &hits {
                memory_cmds::print_commit(commit);
            }
        }
        Commands::Status { offline } => {
            let runtime = GitsmartRuntime::open(repo.root())?;
            let status = runtime.list_status(!offline).await?;
            memory_cmds::print_status(&status);
        }
        Commands::Sync { direction } => {
            let runtime = GitsmartRuntime::open(repo.root())?;
            let directions: &[SyncDirection] = match direction {
                Some(CliSyncDirection::Push) => &[SyncDirection::Push],
                Some(CliSyncDirection::Pull) => &[SyncDirection::Pull],
                None => &[SyncDirection::Pull, SyncDirection::Push],
            };
            for &direction in directions {
                let outcome = runtime.sync(direction).await?;
                memory_cmds::print_sync(direction.label(), &outcome);
            }
        }
        Commands::Hook { command } => match command {
            HookCommands::PostCommit => {
                let runtime = GitsmartRuntime::open(repo.root())?;
                if let Err(err) = hook::run_post_commit(&runtime).await {
                    tracing::warn!(error = %err, "post-commit hook failed");
                    eprintln!("gitsmart: {err}");
                }
            }
            HookCommands::Install { force } => {
                let path = hook::install(repo.git_dir(), force)?;
                println!("installed {}", path.display());
            }
        },
        Commands::AnalyzeCommit { commit, suggest_only } => {
            let runtime = GitsmartRuntime::open(repo.root())?;
            let outcome = runtime.analyze_commit(&commit, suggest_only).await?;
            memory_cmds::print_analysis(&outcome);
        }
        Commands::Config { command } => {
            let path = repo.root().join(CONFIG_RELATIVE_PATH);
            let mut config = AppConfig::load_from(&path)?;
            match command {
                ConfigCommands::Show => print!("{}", toml::to_string_pretty(&config)?),
                ConfigCommands::Get { key } => match config.get(&key)? {
                    toml::Value::String(text) => println!("{text}"),
                    toml::Value::Table(table) => print!("{}", toml::to_string_pretty(&table)?),
                    other => println!("{other}"),
                },
                ConfigCommands::Set { key, value } => {
                    config.set(&key, &value)?;
                    config.save_to(&path)?;
                    println!("{key} updated in {}", path.display());
                }
            }
        }
        Commands::Doctor => run_doctor(&repo).await?,
    }

    Ok(())
}

/// `path` as typed in `cwd`, rewritten relative to the work tree `root`.
/// Paths that land outside the work tree are returned unchanged.
fn repo_relative(root: &Path, cwd: &Path, path: &str) -> String {
    let root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let cwd = cwd.canonicalize().unwrap_or_else(|_| cwd.to_path_buf());

    // Lexical, so deleted files still resolve.
    let mut resolved = PathBuf::new();
    for component in cwd.join(path).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                resolved.pop();
            }
            other => resolved.push(other),
        }
    }

    match resolved.strip_prefix(&root) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        _ => path.to_string(),
    }
}

/// Console logging on stderr, or a daily rolling file for hook runs so
/// commit output stays clean.
fn init_tracing(level: &str, log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "gitsmart.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

async fn run_doctor(repo: &RepoAccessor) -> Result<()> {
    println!("gitsmart doctor");
    println!("- repository: {}", repo.root().display());

    let config_path = repo.root().join(CONFIG_RELATIVE_PATH);
    println!(
        "- config: {}",
        if config_path.exists() {
            config_path.display().to_string()
        } else {
            "(defaults; run `gitsmart init` to write one)".to_string()
        }
    );

    let git = Command::new("git").arg("--version").output();
    match git {
        Ok(output) if output.status.success() => {
            println!("- git: {}", String::from_utf8_lossy(&output.stdout).trim())
        }
        _ => println!("- git: not found (sync needs the git CLI)"),
    }

    println!(
        "- post-commit hook: {}",
        if hook::is_installed(repo.git_dir()) {
            "installed"
        } else {
            "not installed (`gitsmart hook install`)"
        }
    );

    let runtime = GitsmartRuntime::open(repo.root()).context("loading configuration")?;
    let store = runtime.store();
    println!(
        "- notes: {} at {}",
        store.notes_ref(),
        store
            .local_tip()?
            .as_deref()
            .map(|tip| &tip[..tip.len().min(8)])
            .unwrap_or("(empty)")
    );
    println!(
        "- provider: {} ({})",
        runtime.config().llm.provider.label(),
        runtime.config().active_model()
    );
    match runtime.test_provider().await {
        Ok(detail) => println!("- provider check: ok – {detail}"),
        Err(err) => println!("- provider check: failed – {err} (capture and query still work without AI)"),
    }
    Ok(())
}
