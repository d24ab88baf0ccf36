//! Collaborator surface: terminal processes, git plumbing, the PR host and the file-system
//! watcher. Everything the core awaits goes through [`Backend`].

pub mod local;

#[cfg(test)]
pub mod fake;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::Result;
use crate::model::{
    ChangedFile, CreatePrRequest, CreatedPr, FileDiff, PrChecksResult, PrDetails, RepoInfo,
    RepoPrStatuses, RepoWithBranches, Workspace,
};

pub use local::LocalBackend;

/// Capacity of the push-event channel. Slow subscribers see `Lagged` and skip ahead.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Push events emitted by the collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendEvent {
    /// `terminal-output`
    TerminalOutput { terminal_id: String, data: String },
    /// `terminal-closed`: the process exited on its own
    TerminalClosed { terminal_id: String },
    /// `git-head-changed`: checkout / branch switch inside one worktree
    GitHeadChanged {
        repo_path: String,
        worktree_path: String,
    },
    /// `worktree-changed`: a worktree was added to or removed from a repository
    WorktreeChanged { repo_path: String },
    /// `file-changed`
    FileChanged { worktree_path: String },
    /// `git-index-changed`
    GitIndexChanged { worktree_path: String },
}

impl BackendEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            BackendEvent::TerminalOutput { .. } => "terminal-output",
            BackendEvent::TerminalClosed { .. } => "terminal-closed",
            BackendEvent::GitHeadChanged { .. } => "git-head-changed",
            BackendEvent::WorktreeChanged { .. } => "worktree-changed",
            BackendEvent::FileChanged { .. } => "file-changed",
            BackendEvent::GitIndexChanged { .. } => "git-index-changed",
        }
    }
}

/// PTY size in character cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub cols: u16,
    pub rows: u16,
}

impl TerminalSize {
    pub fn new(cols: u16, rows: u16) -> Self {
        Self { cols, rows }
    }
}

impl Default for TerminalSize {
    fn default() -> Self {
        Self { cols: 80, rows: 24 }
    }
}

/// Request/response operations consumed by the core.
///
/// The core runs on a single thread, so implementations are not required to be `Send`.
#[async_trait(?Send)]
pub trait Backend {
    // --- terminals ---

    async fn spawn_terminal(&self, cwd: &str, size: TerminalSize) -> Result<String>;

    async fn spawn_terminal_with_command(
        &self,
        cwd: &str,
        command: &str,
        args: &[String],
        size: TerminalSize,
    ) -> Result<String>;

    async fn write_to_terminal(&self, terminal_id: &str, data: &str) -> Result<()>;

    async fn resize_terminal(&self, terminal_id: &str, size: TerminalSize) -> Result<()>;

    async fn close_terminal(&self, terminal_id: &str) -> Result<()>;

    // --- repositories & worktrees ---

    async fn discover_repository(&self, path: &str) -> Result<RepoInfo>;

    async fn list_worktrees(&self, repo_path: &str) -> Result<Vec<Workspace>>;

    async fn get_worktree_branch_name(&self, worktree_path: &str) -> Result<Option<String>>;

    async fn create_worktree_auto(&self, repo_path: &str) -> Result<Workspace>;

    async fn delete_worktree(&self, repo_path: &str, worktree_name: &str, force: bool)
        -> Result<()>;

    // --- pull requests ---

    /// Whether the PR host CLI is installed and usable.
    async fn check_gh_cli(&self) -> Result<bool>;

    async fn get_all_prs_for_repos(
        &self,
        repos: &[RepoWithBranches],
    ) -> Result<Vec<RepoPrStatuses>>;

    async fn get_pr_checks(&self, repo_path: &str, pr_number: u64) -> Result<PrChecksResult>;

    async fn get_pr_details(&self, repo_path: &str, pr_number: u64) -> Result<PrDetails>;

    /// Open a PR for the branch checked out in `worktree_path`.
    async fn create_pr(&self, worktree_path: &str, request: &CreatePrRequest) -> Result<CreatedPr>;

    // --- diffs ---

    async fn get_changed_files(&self, worktree_path: &str) -> Result<Vec<ChangedFile>>;

    async fn get_uncommitted_files(&self, worktree_path: &str) -> Result<Vec<ChangedFile>>;

    async fn get_file_diff(&self, worktree_path: &str, file_path: &str) -> Result<FileDiff>;

    async fn get_uncommitted_diff(&self, worktree_path: &str, file_path: &str)
        -> Result<FileDiff>;

    // --- watching ---

    async fn start_watching_repository(
        &self,
        repo_path: &str,
        worktree_paths: &[String],
    ) -> Result<()>;

    /// Release the watches of one repository. Unknown repositories are not an error.
    async fn stop_watching_repository(&self, repo_path: &str) -> Result<()>;

    async fn stop_all_watchers(&self) -> Result<()>;

    /// New receiver for push events.
    fn subscribe(&self) -> broadcast::Receiver<BackendEvent>;
}
