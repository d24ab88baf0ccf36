//! Application state and the pure command handlers that mutate it.
//!
//! Components never touch `AppState` directly; they call these handlers through
//! [`AppStore::update`](crate::store::Store::update).

use std::collections::HashMap;

use crate::model::{
    Repository, RepoWithBranches, TerminalSession, Workspace, WorkspaceTerminalState,
};
use crate::store::Store;

pub type AppStore = Store<AppState>;

#[derive(Debug, Clone, Default)]
pub struct AppState {
    pub repositories: Vec<Repository>,
    /// Snapshot of the selected workspace, kept in sync with `repositories`.
    pub selected: Option<Workspace>,
    /// Keyed by worktree path. Absent for workspaces never selected.
    pub terminals: HashMap<String, WorkspaceTerminalState>,
}

impl AppState {
    // ------------------------------------------------------------------
    // queries
    // ------------------------------------------------------------------

    pub fn repository(&self, repo_path: &str) -> Option<&Repository> {
        self.repositories.iter().find(|r| r.repo_path == repo_path)
    }

    pub fn find_workspace(&self, worktree_path: &str) -> Option<&Workspace> {
        self.repositories
            .iter()
            .find_map(|r| r.find_worktree(worktree_path))
    }

    pub fn selected_path(&self) -> Option<&str> {
        self.selected.as_ref().map(|w| w.worktree_path.as_str())
    }

    pub fn terminals_for(&self, worktree_path: &str) -> Option<&WorkspaceTerminalState> {
        self.terminals.get(worktree_path)
    }

    /// Terminal state of the selected workspace, if it has one.
    pub fn selected_terminals(&self) -> Option<&WorkspaceTerminalState> {
        self.selected_path().and_then(|p| self.terminals.get(p))
    }

    /// Worktree path owning terminal `id`.
    pub fn owner_of_terminal(&self, id: &str) -> Option<&str> {
        self.terminals
            .iter()
            .find(|(_, state)| state.contains(id))
            .map(|(path, _)| path.as_str())
    }

    /// Every (repo, branch) pair that can have a PR. Detached worktrees are skipped.
    pub fn repos_with_branches(&self) -> Vec<RepoWithBranches> {
        self.repositories
            .iter()
            .map(|r| {
                let mut branches: Vec<String> =
                    r.worktrees.iter().filter_map(|w| w.branch.clone()).collect();
                branches.sort();
                branches.dedup();
                RepoWithBranches {
                    repo_path: r.repo_path.clone(),
                    branches,
                }
            })
            .filter(|r| !r.branches.is_empty())
            .collect()
    }

    pub fn repository_paths(&self) -> Vec<String> {
        self.repositories.iter().map(|r| r.repo_path.clone()).collect()
    }

    /// Active-id invariant over every workspace.
    pub fn terminals_consistent(&self) -> bool {
        self.terminals.values().all(|t| t.is_consistent())
    }

    // ------------------------------------------------------------------
    // registry commands
    // ------------------------------------------------------------------

    /// Replace the entry with the same `repo_path`, or append. Keeps the old expanded flag.
    pub fn upsert_repository(&mut self, mut repo: Repository) {
        match self
            .repositories
            .iter_mut()
            .find(|r| r.repo_path == repo.repo_path)
        {
            Some(existing) => {
                repo.expanded = existing.expanded;
                *existing = repo;
            }
            None => self.repositories.push(repo),
        }
        self.resync_selected();
    }

    pub fn remove_repository(&mut self, repo_path: &str) -> bool {
        let before = self.repositories.len();
        self.repositories.retain(|r| r.repo_path != repo_path);
        let removed = self.repositories.len() != before;
        if removed
            && self
                .selected
                .as_ref()
                .is_some_and(|w| w.repo_path == repo_path)
        {
            self.selected = None;
        }
        removed
    }

    /// Replace one repository's worktree list. Unknown repositories are ignored.
    pub fn replace_worktrees(&mut self, repo_path: &str, worktrees: Vec<Workspace>) -> bool {
        let Some(repo) = self
            .repositories
            .iter_mut()
            .find(|r| r.repo_path == repo_path)
        else {
            return false;
        };
        repo.worktrees = worktrees;
        self.resync_selected();
        true
    }

    /// Update only the branch of the matching workspace, including the selected snapshot.
    pub fn set_branch(&mut self, worktree_path: &str, branch: Option<String>) -> bool {
        let mut changed = false;
        for ws in self
            .repositories
            .iter_mut()
            .flat_map(|r| r.worktrees.iter_mut())
            .filter(|w| w.worktree_path == worktree_path)
        {
            if ws.branch != branch {
                ws.branch = branch.clone();
                changed = true;
            }
        }
        if let Some(selected) = self
            .selected
            .as_mut()
            .filter(|w| w.worktree_path == worktree_path)
        {
            if selected.branch != branch {
                selected.branch = branch;
                changed = true;
            }
        }
        changed
    }

    pub fn toggle_expanded(&mut self, repo_path: &str) -> Option<bool> {
        let repo = self
            .repositories
            .iter_mut()
            .find(|r| r.repo_path == repo_path)?;
        repo.expanded = !repo.expanded;
        Some(repo.expanded)
    }

    /// Refresh the selected snapshot from the registry. A selected workspace that no longer
    /// exists keeps its last snapshot; the caller decides when to drop it.
    fn resync_selected(&mut self) {
        let Some(path) = self.selected.as_ref().map(|w| w.worktree_path.clone()) else {
            return;
        };
        if let Some(fresh) = self.find_workspace(&path).cloned() {
            self.selected = Some(fresh);
        }
    }

    // ------------------------------------------------------------------
    // session commands
    // ------------------------------------------------------------------

    pub fn select(&mut self, workspace: Workspace) {
        self.selected = Some(workspace);
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Append to the owner workspace's list (creating it) and make it active.
    pub fn insert_session(&mut self, session: TerminalSession) {
        self.terminals
            .entry(session.workspace_path.clone())
            .or_default()
            .push_active(session);
    }

    /// Remove `id` from `worktree_path` with last-session promotion.
    pub fn remove_session(&mut self, worktree_path: &str, id: &str) -> bool {
        self.terminals
            .get_mut(worktree_path)
            .is_some_and(|t| t.remove(id))
    }

    /// Remove `id` from whichever workspace owns it. Returns the owner.
    pub fn remove_session_anywhere(&mut self, id: &str) -> Option<String> {
        let owner = self.owner_of_terminal(id)?.to_string();
        self.remove_session(&owner, id);
        Some(owner)
    }

    pub fn set_active_session(&mut self, worktree_path: &str, id: &str) -> bool {
        self.terminals
            .get_mut(worktree_path)
            .is_some_and(|t| t.set_active(id))
    }

    /// Forget a workspace's terminals entirely, returning the sessions that were live.
    pub fn drop_terminals(&mut self, worktree_path: &str) -> Vec<TerminalSession> {
        self.terminals
            .remove(worktree_path)
            .map(|mut t| t.take_all())
            .unwrap_or_default()
    }
}
