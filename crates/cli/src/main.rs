//! yx: hierarchical task tracker synchronized through git refs.
//!
//! Tasks ("yaks") live as directories under the work tree's task directory
//! and travel between collaborators on a dedicated git ref, never touching
//! the project's own history.

mod render;
mod style;

use std::io::{self, BufRead, IsTerminal};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use yaks_core::store::FsTaskStore;
use yaks_core::{Audited, GitBackend, SyncEngine, SyncSettings, YakApp, YaksConfig};

use render::{Format, Only};

type App = YakApp<FsTaskStore, SyncEngine<GitBackend>>;

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Hierarchical task tracker synchronized through git refs.
#[derive(Parser, Debug)]
#[command(name = "yx", version, about = "Shave your yaks, together")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Add a yak. Without a name, reads one yak per line from stdin.
    Add {
        /// Name of the yak; use `/` to nest under a parent.
        name: Vec<String>,
    },

    /// List yaks.
    #[command(visible_alias = "ls")]
    List {
        /// Output format.
        #[arg(long, value_enum, default_value_t = Format::Markdown)]
        format: Format,

        /// Only show yaks in this state.
        #[arg(long, value_enum)]
        only: Option<Only>,
    },

    /// Mark a yak as done.
    Done {
        /// Mark the yak as not done again.
        #[arg(long, conflicts_with = "recursive")]
        undo: bool,

        /// Also mark every descendant as done.
        #[arg(long)]
        recursive: bool,

        name: Vec<String>,
    },

    /// Remove a yak and everything beneath it.
    Rm { name: Vec<String> },

    /// Rename or re-parent a yak.
    #[command(visible_alias = "mv")]
    Move {
        old: String,
        #[arg(required = true)]
        new: Vec<String>,
    },

    /// Show or edit a yak's context.
    Context {
        /// Print the yak and its context.
        #[arg(long, conflicts_with = "edit")]
        show: bool,

        /// Open the context in $EDITOR.
        #[arg(long)]
        edit: bool,

        name: Vec<String>,
    },

    /// Remove every done yak whose subtree is finished.
    Prune,

    /// Exchange yaks with the remote.
    Sync,

    /// Print candidate names for shell completion.
    Completions {
        /// Command being completed, then the flag already typed, if any.
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, num_args = 0..=2)]
        words: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(io::stderr)
        .init();
}

fn work_tree() -> Result<PathBuf> {
    match std::env::var_os("GIT_WORK_TREE") {
        Some(dir) if !dir.is_empty() => Ok(PathBuf::from(dir)),
        _ => std::env::current_dir().context("failed to determine the current directory"),
    }
}

fn run(cli: Cli) -> Result<()> {
    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let work_tree = work_tree()?;
    let config = YaksConfig::load_or_default(&work_tree)
        .with_context(|| format!("failed to load configuration from {}", work_tree.display()))?;
    init_tracing(&config.log.level);

    let tree_root = config.tree_root(&work_tree);
    let backend = GitBackend::open(&work_tree, config.identity.clone());
    let store = FsTaskStore::new(&tree_root);

    if !matches!(command, Commands::Completions { .. }) {
        check_preconditions(&backend, &config, &tree_root)?;
        store
            .migrate_legacy_markers()
            .context("failed to migrate legacy done markers")?;
    }

    let engine = SyncEngine::new(backend, &tree_root, SyncSettings::from(&config.sync));
    let mut app: App = YakApp::new(store, engine);

    match command {
        Commands::Add { name } => cmd_add(&mut app, &name),
        Commands::List { format, only } => cmd_list(&app, format, only),
        Commands::Done {
            undo,
            recursive,
            name,
        } => {
            let name = joined(&name)?;
            let result = if undo {
                app.undo(&name)?
            } else if recursive {
                app.done_recursive(&name)?
            } else {
                app.done(&name)?
            };
            report(result);
            Ok(())
        }
        Commands::Rm { name } => {
            report(app.remove(&joined(&name)?)?);
            Ok(())
        }
        Commands::Move { old, new } => {
            report(app.move_task(&old, &joined(&new)?)?);
            Ok(())
        }
        Commands::Context { show, edit, name } => cmd_context(&mut app, &joined(&name)?, show, edit),
        Commands::Prune => {
            let result = app.prune()?;
            for name in &result.value {
                println!("{}", style::dim(&format!("pruned {}", name)));
            }
            report(result);
            Ok(())
        }
        Commands::Sync => cmd_sync(&app),
        Commands::Completions { words } => {
            let cmd = words.first().map(String::as_str);
            let flag = words.get(1).map(String::as_str);
            for name in app.completions(cmd, flag)? {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

fn check_preconditions(backend: &GitBackend, config: &YaksConfig, tree_root: &Path) -> Result<()> {
    let Some(workdir) = backend.workdir() else {
        bail!("not in a git repository");
    };
    if !config.store.require_gitignore {
        return Ok(());
    }

    let workdir = workdir.canonicalize().unwrap_or(workdir);
    let tree_root = match (tree_root.parent(), tree_root.file_name()) {
        (Some(parent), Some(name)) => parent
            .canonicalize()
            .map(|p| p.join(name))
            .unwrap_or_else(|_| tree_root.to_path_buf()),
        _ => tree_root.to_path_buf(),
    };
    let relative = tree_root
        .strip_prefix(&workdir)
        .unwrap_or(config.store.dir.as_path())
        .to_path_buf();
    // Directory-only patterns like `.yaks/` need the trailing slash to match.
    let as_dir = PathBuf::from(format!("{}/", relative.display()));
    if !backend.is_ignored(&relative)? && !backend.is_ignored(&as_dir)? {
        bail!("{} folder is not gitignored", config.store.dir.display());
    }
    Ok(())
}

fn joined(words: &[String]) -> Result<String> {
    let name = words.join(" ");
    if name.trim().is_empty() {
        bail!("yak name required");
    }
    Ok(name)
}

/// Surface the audit outcome of a mutating command.
fn report<T>(result: Audited<T>) {
    if let Some(warning) = result.warning() {
        eprintln!("{}", style::warning(&warning));
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_add(app: &mut App, name: &[String]) -> Result<()> {
    if !name.is_empty() {
        report(app.add(&joined(name)?)?);
        return Ok(());
    }

    let stdin = io::stdin();
    if stdin.is_terminal() {
        println!("Enter yaks (empty line to finish):");
    }
    for line in stdin.lock().lines() {
        let line = line.context("failed to read from stdin")?;
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        report(app.add(line)?);
    }
    Ok(())
}

fn cmd_list(app: &App, format: Format, only: Option<Only>) -> Result<()> {
    let tasks = app.list(None)?;
    let styled = io::stdout().is_terminal();
    let output = render::render(&tasks, format, only, styled);
    if !output.is_empty() {
        println!("{}", output);
    }
    Ok(())
}

fn cmd_context(app: &mut App, query: &str, show: bool, edit: bool) -> Result<()> {
    let task = app.get(query)?;
    if show {
        println!("{}", render::with_context(&task));
        return Ok(());
    }

    let stdin = io::stdin();
    let text = if edit || stdin.is_terminal() {
        let edited = dialoguer::Editor::new()
            .extension(".md")
            .edit(&task.context)
            .context("failed to run editor")?;
        match edited {
            Some(text) => text,
            None => {
                tracing::debug!(name = %task.name, "editor closed without saving");
                return Ok(());
            }
        }
    } else {
        let lines: Vec<String> = stdin
            .lock()
            .lines()
            .collect::<io::Result<_>>()
            .context("failed to read context from stdin")?;
        lines.join("\n")
    };

    report(app.set_context(&task.name, &text)?);
    Ok(())
}

fn cmd_sync(app: &App) -> Result<()> {
    let outcome = app.log().sync()?;
    for warning in &outcome.warnings {
        eprintln!("{}", style::warning(warning));
    }
    let pointer = outcome
        .snapshot
        .as_ref()
        .map(|s| s.short().to_string())
        .unwrap_or_else(|| "-".into());
    let pushed = if outcome.pushed { ", pushed" } else { "" };
    println!(
        "{}",
        style::success(&format!("Synced ({}) at {}{}", outcome.action, pointer, pushed))
    );
    Ok(())
}
