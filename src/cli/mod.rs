//! CLI 模块

pub mod check;
pub mod repo;
pub mod watch;

use std::future::Future;
use std::io;
use std::rc::Rc;

use clap::{Parser, Subcommand};

use autopilot_core::app::App;
use autopilot_core::backend::LocalBackend;
use autopilot_core::storage::FileSettingsStore;

#[derive(Parser)]
#[command(name = "autopilot")]
#[command(version)]
#[command(about = "Many git worktrees side by side, each with its own terminals and live PR status")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List registered repositories and their worktrees
    List {
        /// Also fetch pull-request status for every branch (needs gh)
        #[arg(long)]
        prs: bool,
    },
    /// Register a git repository
    Add {
        /// Path inside the repository
        path: String,
    },
    /// Unregister a repository (the worktrees on disk are left alone)
    Remove {
        /// Repository root as shown by `autopilot list`
        path: String,
    },
    /// Run headless: watch every repository and poll PR status until Ctrl-C
    Watch,
    /// Check that git and gh are available
    Check,
}

/// Run `f` on a current-thread runtime inside a `LocalSet`.
pub fn block_on_local<F: Future>(f: F) -> io::Result<F::Output> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = tokio::task::LocalSet::new();
    Ok(local.block_on(&runtime, f))
}

/// App backed by the local machine and `~/.autopilot/settings.toml`.
pub fn local_app() -> App {
    App::new(
        Rc::new(LocalBackend::new()),
        Rc::new(FileSettingsStore::default_location()),
    )
}

pub fn dispatch(command: Commands) -> io::Result<()> {
    match command {
        Commands::List { prs } => block_on_local(repo::list(prs)),
        Commands::Add { path } => block_on_local(repo::add(path)),
        Commands::Remove { path } => block_on_local(repo::remove(path)),
        Commands::Watch => block_on_local(watch::execute()),
        Commands::Check => {
            check::execute();
            Ok(())
        }
    }
}
