//! Scripted in-memory backend for tests.
//!
//! Records every call, can fail any operation by name, and can hold an operation at a
//! gate until the test releases it.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, Semaphore};

use super::{Backend, BackendEvent, TerminalSize, EVENT_CHANNEL_CAPACITY};
use crate::error::{Result, SyncError};
use crate::model::{
    ChangedFile, CreatePrRequest, CreatedPr, FileDiff, PrCheck, PrChecksResult, PrDetails,
    PrStatus, RepoInfo, RepoPrStatuses, RepoWithBranches, Workspace,
};

/// Run `f` inside a `LocalSet` so `spawn_local` works.
pub async fn run_local<F: Future>(f: F) -> F::Output {
    tokio::task::LocalSet::new().run_until(f).await
}

/// Let every local task run until it blocks. Needs a paused clock.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

pub struct FakeBackend {
    calls: RefCell<HashMap<&'static str, usize>>,
    failing: RefCell<HashSet<&'static str>>,
    gates: RefCell<HashMap<&'static str, Rc<Semaphore>>>,
    next_terminal: Cell<u32>,
    next_worktree: Cell<u32>,

    pub spawned: RefCell<Vec<(String, Option<String>)>>,
    pub closed: RefCell<Vec<String>>,
    pub writes: RefCell<Vec<(String, String)>>,
    pub watch_registrations: RefCell<Vec<(String, Vec<String>)>>,
    pub watch_stops: RefCell<Vec<String>>,
    pub pr_requests: RefCell<Vec<Vec<RepoWithBranches>>>,
    pub diff_requests: RefCell<Vec<String>>,
    pub created_prs: RefCell<Vec<(String, CreatePrRequest)>>,

    repos: RefCell<HashMap<String, RepoInfo>>,
    worktrees: RefCell<HashMap<String, Vec<Workspace>>>,
    branches: RefCell<HashMap<String, Option<String>>>,
    gh_available: Cell<bool>,
    pr_statuses: RefCell<Vec<RepoPrStatuses>>,
    changed_files: RefCell<Vec<ChangedFile>>,
    failing_diffs: RefCell<HashSet<String>>,
    events: broadcast::Sender<BackendEvent>,
}

impl FakeBackend {
    pub fn new() -> Rc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Rc::new(Self {
            calls: RefCell::new(HashMap::new()),
            failing: RefCell::new(HashSet::new()),
            gates: RefCell::new(HashMap::new()),
            next_terminal: Cell::new(0),
            next_worktree: Cell::new(0),
            spawned: RefCell::new(Vec::new()),
            closed: RefCell::new(Vec::new()),
            writes: RefCell::new(Vec::new()),
            watch_registrations: RefCell::new(Vec::new()),
            watch_stops: RefCell::new(Vec::new()),
            pr_requests: RefCell::new(Vec::new()),
            diff_requests: RefCell::new(Vec::new()),
            created_prs: RefCell::new(Vec::new()),
            repos: RefCell::new(HashMap::new()),
            worktrees: RefCell::new(HashMap::new()),
            branches: RefCell::new(HashMap::new()),
            gh_available: Cell::new(true),
            pr_statuses: RefCell::new(Vec::new()),
            changed_files: RefCell::new(Vec::new()),
            failing_diffs: RefCell::new(HashSet::new()),
            events,
        })
    }

    /// Number of times `op` was called.
    pub fn calls(&self, op: &str) -> usize {
        self.calls.borrow().get(op).copied().unwrap_or(0)
    }

    pub fn fail(&self, op: &'static str) {
        self.failing.borrow_mut().insert(op);
    }

    pub fn succeed(&self, op: &'static str) {
        self.failing.borrow_mut().remove(op);
    }

    /// Hold every future call of `op` until [`FakeBackend::release`].
    pub fn gate(&self, op: &'static str) {
        self.gates.borrow_mut().insert(op, Rc::new(Semaphore::new(0)));
    }

    /// Let `n` held calls of `op` through.
    pub fn release(&self, op: &'static str, n: usize) {
        if let Some(gate) = self.gates.borrow().get(op) {
            gate.add_permits(n);
        }
    }

    pub fn emit(&self, event: BackendEvent) {
        let _ = self.events.send(event);
    }

    pub fn add_repo(&self, repo_path: &str, worktrees: &[(&str, Option<&str>)]) {
        let name = repo_path.rsplit('/').next().unwrap_or(repo_path).to_string();
        self.repos.borrow_mut().insert(
            repo_path.to_string(),
            RepoInfo {
                path: repo_path.to_string(),
                name,
            },
        );
        let list = worktrees
            .iter()
            .map(|(path, branch)| {
                let mut ws = Workspace::new(repo_path, *path);
                ws.branch = branch.map(str::to_string);
                ws
            })
            .collect();
        self.worktrees
            .borrow_mut()
            .insert(repo_path.to_string(), list);
    }

    pub fn set_branch(&self, worktree_path: &str, branch: Option<&str>) {
        self.branches
            .borrow_mut()
            .insert(worktree_path.to_string(), branch.map(str::to_string));
    }

    pub fn set_gh_available(&self, available: bool) {
        self.gh_available.set(available);
    }

    pub fn set_pr_statuses(&self, statuses: Vec<RepoPrStatuses>) {
        *self.pr_statuses.borrow_mut() = statuses;
    }

    pub fn set_changed_files(&self, paths: &[&str]) {
        *self.changed_files.borrow_mut() = paths
            .iter()
            .map(|p| ChangedFile {
                path: p.to_string(),
                status: "modified".to_string(),
                old_path: None,
                additions: 1,
                deletions: 0,
            })
            .collect();
    }

    pub fn fail_diff(&self, path: &str) {
        self.failing_diffs.borrow_mut().insert(path.to_string());
    }

    async fn enter(&self, op: &'static str) -> Result<()> {
        *self.calls.borrow_mut().entry(op).or_insert(0) += 1;
        let gate = self.gates.borrow().get(op).cloned();
        if let Some(gate) = gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.failing.borrow().contains(op) {
            return Err(SyncError::backend(format!("{} failed", op)));
        }
        Ok(())
    }

    fn next_terminal_id(&self) -> String {
        let n = self.next_terminal.get() + 1;
        self.next_terminal.set(n);
        format!("t{}", n)
    }
}

pub fn pr_status(number: u64, branch: &str) -> PrStatus {
    PrStatus {
        number,
        title: format!("PR #{}", number),
        url: format!("https://example.com/pull/{}", number),
        state: "open".to_string(),
        merged: false,
        draft: false,
        review_decision: None,
        checks_status: Some("success".to_string()),
        additions: 1,
        deletions: 1,
        head_branch: branch.to_string(),
    }
}

pub fn checks_result(overall: &str) -> PrChecksResult {
    PrChecksResult {
        checks: vec![PrCheck {
            name: "ci".to_string(),
            status: overall.to_string(),
            conclusion: None,
            url: None,
            started_at: None,
            completed_at: None,
        }],
        overall_status: overall.to_string(),
    }
}

pub fn pr_details() -> PrDetails {
    PrDetails {
        merge_state_status: "CLEAN".to_string(),
        mergeable: "MERGEABLE".to_string(),
        comments: Vec::new(),
        review_decision: None,
    }
}

#[async_trait(?Send)]
impl Backend for FakeBackend {
    async fn spawn_terminal(&self, cwd: &str, _size: TerminalSize) -> Result<String> {
        self.enter("spawn_terminal").await?;
        self.spawned.borrow_mut().push((cwd.to_string(), None));
        Ok(self.next_terminal_id())
    }

    async fn spawn_terminal_with_command(
        &self,
        cwd: &str,
        command: &str,
        args: &[String],
        _size: TerminalSize,
    ) -> Result<String> {
        self.enter("spawn_terminal_with_command").await?;
        let full = std::iter::once(command.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        self.spawned.borrow_mut().push((cwd.to_string(), Some(full)));
        Ok(self.next_terminal_id())
    }

    async fn write_to_terminal(&self, terminal_id: &str, data: &str) -> Result<()> {
        self.enter("write_to_terminal").await?;
        self.writes
            .borrow_mut()
            .push((terminal_id.to_string(), data.to_string()));
        Ok(())
    }

    async fn resize_terminal(&self, _terminal_id: &str, _size: TerminalSize) -> Result<()> {
        self.enter("resize_terminal").await
    }

    async fn close_terminal(&self, terminal_id: &str) -> Result<()> {
        self.closed.borrow_mut().push(terminal_id.to_string());
        self.enter("close_terminal").await
    }

    async fn discover_repository(&self, path: &str) -> Result<RepoInfo> {
        self.enter("discover_repository").await?;
        self.repos
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| SyncError::backend(format!("not a git repository: {}", path)))
    }

    async fn list_worktrees(&self, repo_path: &str) -> Result<Vec<Workspace>> {
        self.enter("list_worktrees").await?;
        Ok(self
            .worktrees
            .borrow()
            .get(repo_path)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_worktree_branch_name(&self, worktree_path: &str) -> Result<Option<String>> {
        self.enter("get_worktree_branch_name").await?;
        Ok(self
            .branches
            .borrow()
            .get(worktree_path)
            .cloned()
            .flatten())
    }

    async fn create_worktree_auto(&self, repo_path: &str) -> Result<Workspace> {
        self.enter("create_worktree_auto").await?;
        let n = self.next_worktree.get() + 1;
        self.next_worktree.set(n);
        let name = format!("wt-{}", n);
        let ws = Workspace::new(repo_path, format!("{}/.worktrees/{}", repo_path, name))
            .with_branch(name);
        self.worktrees
            .borrow_mut()
            .entry(repo_path.to_string())
            .or_default()
            .push(ws.clone());
        Ok(ws)
    }

    async fn delete_worktree(
        &self,
        repo_path: &str,
        worktree_name: &str,
        _force: bool,
    ) -> Result<()> {
        self.enter("delete_worktree").await?;
        if let Some(list) = self.worktrees.borrow_mut().get_mut(repo_path) {
            list.retain(|w| w.name != worktree_name);
        }
        Ok(())
    }

    async fn check_gh_cli(&self) -> Result<bool> {
        self.enter("check_gh_cli").await?;
        Ok(self.gh_available.get())
    }

    async fn get_all_prs_for_repos(
        &self,
        repos: &[RepoWithBranches],
    ) -> Result<Vec<RepoPrStatuses>> {
        self.pr_requests.borrow_mut().push(repos.to_vec());
        self.enter("get_all_prs_for_repos").await?;
        Ok(self.pr_statuses.borrow().clone())
    }

    async fn get_pr_checks(&self, _repo_path: &str, _pr_number: u64) -> Result<PrChecksResult> {
        self.enter("get_pr_checks").await?;
        Ok(checks_result("success"))
    }

    async fn get_pr_details(&self, _repo_path: &str, _pr_number: u64) -> Result<PrDetails> {
        self.enter("get_pr_details").await?;
        Ok(pr_details())
    }

    async fn create_pr(&self, worktree_path: &str, request: &CreatePrRequest) -> Result<CreatedPr> {
        self.enter("create_pr").await?;
        let mut created = self.created_prs.borrow_mut();
        created.push((worktree_path.to_string(), request.clone()));
        let number = 100 + created.len() as u64;
        Ok(CreatedPr {
            number,
            url: format!("https://github.com/o/r/pull/{}", number),
        })
    }

    async fn get_changed_files(&self, _worktree_path: &str) -> Result<Vec<ChangedFile>> {
        self.enter("get_changed_files").await?;
        Ok(self.changed_files.borrow().clone())
    }

    async fn get_uncommitted_files(&self, _worktree_path: &str) -> Result<Vec<ChangedFile>> {
        self.enter("get_uncommitted_files").await?;
        Ok(self.changed_files.borrow().clone())
    }

    async fn get_file_diff(&self, _worktree_path: &str, file_path: &str) -> Result<FileDiff> {
        self.diff_requests.borrow_mut().push(file_path.to_string());
        self.enter("get_file_diff").await?;
        if self.failing_diffs.borrow().contains(file_path) {
            return Err(SyncError::backend(format!("diff failed for {}", file_path)));
        }
        Ok(FileDiff::from_patch(file_path, format!("@@ {} @@", file_path)))
    }

    async fn get_uncommitted_diff(
        &self,
        _worktree_path: &str,
        file_path: &str,
    ) -> Result<FileDiff> {
        self.diff_requests.borrow_mut().push(file_path.to_string());
        self.enter("get_uncommitted_diff").await?;
        Ok(FileDiff::from_patch(file_path, format!("@@ wip {} @@", file_path)))
    }

    async fn start_watching_repository(
        &self,
        repo_path: &str,
        worktree_paths: &[String],
    ) -> Result<()> {
        self.watch_registrations
            .borrow_mut()
            .push((repo_path.to_string(), worktree_paths.to_vec()));
        self.enter("start_watching_repository").await
    }

    async fn stop_watching_repository(&self, repo_path: &str) -> Result<()> {
        self.watch_stops.borrow_mut().push(repo_path.to_string());
        self.enter("stop_watching_repository").await
    }

    async fn stop_all_watchers(&self) -> Result<()> {
        self.enter("stop_all_watchers").await
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendEvent> {
        self.events.subscribe()
    }
}
