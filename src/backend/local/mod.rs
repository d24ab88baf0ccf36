//! 本地后端：git / gh CLI、PTY 终端、notify 文件监听
//!
//! All collaborator calls block, so each one runs on tokio's blocking pool.

mod git;
mod github;
mod pty;
mod watch;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{Backend, BackendEvent, TerminalSize, EVENT_CHANNEL_CAPACITY};
use crate::error::{Result, SyncError};
use crate::model::{
    ChangedFile, CreatePrRequest, CreatedPr, FileDiff, PrChecksResult, PrDetails, RepoInfo,
    RepoPrStatuses, RepoWithBranches, Workspace,
};

pub use git::WORKTREES_DIR;
use pty::PtyManager;
use watch::GitWatcher;

/// Run blocking collaborator work off the async thread.
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| SyncError::backend(format!("blocking task failed: {}", e)))?
}

pub struct LocalBackend {
    events: broadcast::Sender<BackendEvent>,
    terminals: Arc<PtyManager>,
    watchers: Arc<GitWatcher>,
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBackend {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            terminals: Arc::new(PtyManager::new(events.clone())),
            watchers: Arc::new(GitWatcher::new(events.clone())),
            events,
        }
    }

    pub fn terminal_count(&self) -> usize {
        self.terminals.len()
    }

    pub fn watched_repository_count(&self) -> usize {
        self.watchers.watched_count()
    }

    async fn spawn(
        &self,
        cwd: &str,
        command: Option<(String, Vec<String>)>,
        size: TerminalSize,
    ) -> Result<String> {
        let terminals = Arc::clone(&self.terminals);
        let cwd = cwd.to_string();
        blocking(move || {
            let cmd = pty::build_command(
                &cwd,
                command.as_ref().map(|(c, a)| (c.as_str(), a.as_slice())),
            );
            terminals.spawn(cmd, size)
        })
        .await
    }
}

#[async_trait(?Send)]
impl Backend for LocalBackend {
    async fn spawn_terminal(&self, cwd: &str, size: TerminalSize) -> Result<String> {
        self.spawn(cwd, None, size).await
    }

    async fn spawn_terminal_with_command(
        &self,
        cwd: &str,
        command: &str,
        args: &[String],
        size: TerminalSize,
    ) -> Result<String> {
        self.spawn(cwd, Some((command.to_string(), args.to_vec())), size)
            .await
    }

    async fn write_to_terminal(&self, terminal_id: &str, data: &str) -> Result<()> {
        let terminals = Arc::clone(&self.terminals);
        let (id, data) = (terminal_id.to_string(), data.to_string());
        blocking(move || terminals.write(&id, &data)).await
    }

    async fn resize_terminal(&self, terminal_id: &str, size: TerminalSize) -> Result<()> {
        let terminals = Arc::clone(&self.terminals);
        let id = terminal_id.to_string();
        blocking(move || terminals.resize(&id, size)).await
    }

    async fn close_terminal(&self, terminal_id: &str) -> Result<()> {
        let terminals = Arc::clone(&self.terminals);
        let id = terminal_id.to_string();
        blocking(move || terminals.close(&id)).await
    }

    async fn discover_repository(&self, path: &str) -> Result<RepoInfo> {
        let path = path.to_string();
        blocking(move || git::discover_repository(&path)).await
    }

    async fn list_worktrees(&self, repo_path: &str) -> Result<Vec<Workspace>> {
        let repo = repo_path.to_string();
        blocking(move || git::list_worktrees(&repo)).await
    }

    async fn get_worktree_branch_name(&self, worktree_path: &str) -> Result<Option<String>> {
        let path = worktree_path.to_string();
        blocking(move || Ok(git::branch_name(&path))).await
    }

    async fn create_worktree_auto(&self, repo_path: &str) -> Result<Workspace> {
        let repo = repo_path.to_string();
        blocking(move || git::create_worktree_auto(&repo)).await
    }

    async fn delete_worktree(
        &self,
        repo_path: &str,
        worktree_name: &str,
        force: bool,
    ) -> Result<()> {
        let (repo, name) = (repo_path.to_string(), worktree_name.to_string());
        blocking(move || git::delete_worktree(&repo, &name, force)).await
    }

    async fn check_gh_cli(&self) -> Result<bool> {
        blocking(|| Ok(github::check_gh_cli())).await
    }

    async fn get_all_prs_for_repos(
        &self,
        repos: &[RepoWithBranches],
    ) -> Result<Vec<RepoPrStatuses>> {
        let repos = repos.to_vec();
        blocking(move || Ok(github::prs_for_repos(&repos))).await
    }

    async fn get_pr_checks(&self, repo_path: &str, pr_number: u64) -> Result<PrChecksResult> {
        let repo = repo_path.to_string();
        blocking(move || github::pr_checks(&repo, pr_number)).await
    }

    async fn get_pr_details(&self, repo_path: &str, pr_number: u64) -> Result<PrDetails> {
        let repo = repo_path.to_string();
        blocking(move || github::pr_details(&repo, pr_number)).await
    }

    async fn create_pr(&self, worktree_path: &str, request: &CreatePrRequest) -> Result<CreatedPr> {
        let path = worktree_path.to_string();
        let request = request.clone();
        blocking(move || github::create_pr(&path, &request)).await
    }

    async fn get_changed_files(&self, worktree_path: &str) -> Result<Vec<ChangedFile>> {
        let path = worktree_path.to_string();
        blocking(move || git::changed_files(&path)).await
    }

    async fn get_uncommitted_files(&self, worktree_path: &str) -> Result<Vec<ChangedFile>> {
        let path = worktree_path.to_string();
        blocking(move || git::uncommitted_files(&path)).await
    }

    async fn get_file_diff(&self, worktree_path: &str, file_path: &str) -> Result<FileDiff> {
        let (path, file) = (worktree_path.to_string(), file_path.to_string());
        blocking(move || git::file_diff(&path, &file)).await
    }

    async fn get_uncommitted_diff(&self, worktree_path: &str, file_path: &str) -> Result<FileDiff> {
        let (path, file) = (worktree_path.to_string(), file_path.to_string());
        blocking(move || git::uncommitted_diff(&path, &file)).await
    }

    async fn start_watching_repository(
        &self,
        repo_path: &str,
        worktree_paths: &[String],
    ) -> Result<()> {
        let watchers = Arc::clone(&self.watchers);
        let repo = repo_path.to_string();
        let paths = worktree_paths.to_vec();
        blocking(move || watchers.watch_repository(&repo, &paths)).await
    }

    async fn stop_watching_repository(&self, repo_path: &str) -> Result<()> {
        let watchers = Arc::clone(&self.watchers);
        let repo = repo_path.to_string();
        blocking(move || {
            watchers.unwatch_repository(&repo);
            Ok(())
        })
        .await
    }

    async fn stop_all_watchers(&self) -> Result<()> {
        let watchers = Arc::clone(&self.watchers);
        blocking(move || {
            watchers.unwatch_all();
            Ok(())
        })
        .await
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }
}
