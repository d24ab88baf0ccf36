//! 终端 session 多路复用
//!
//! Each workspace owns an ordered list of live terminal sessions and one active session.
//! Switching the selected workspace is a pointer swap when the workspace already has
//! sessions; only a first visit spawns a terminal.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tracing::{debug, warn};

use crate::backend::{Backend, TerminalSize};
use crate::error::{Result, SyncError};
use crate::model::{TerminalSession, Workspace};
use crate::state::AppStore;

pub struct SessionMultiplexer {
    backend: Rc<dyn Backend>,
    store: Rc<AppStore>,
    size: Cell<TerminalSize>,
    default_agent: RefCell<Option<String>>,
}

impl SessionMultiplexer {
    pub fn new(backend: Rc<dyn Backend>, store: Rc<AppStore>) -> Self {
        Self {
            backend,
            store,
            size: Cell::new(TerminalSize::default()),
            default_agent: RefCell::new(None),
        }
    }

    /// Size used for newly spawned terminals.
    pub fn set_size(&self, size: TerminalSize) {
        self.size.set(size);
    }

    /// Command line used by [`SessionMultiplexer::add_agent_terminal`], e.g. `"claude --yolo"`.
    pub fn set_default_agent(&self, agent: Option<String>) {
        *self.default_agent.borrow_mut() = agent.filter(|a| !a.trim().is_empty());
    }

    /// Make `workspace` the selected one.
    ///
    /// Already selected: nothing happens, unless its first spawn failed, in which case the
    /// spawn is retried. Has sessions: pointer swap, no backend call.
    /// Otherwise one terminal is spawned and becomes active. A spawn that completes after
    /// the user moved on is still recorded under `workspace`.
    pub async fn select_workspace(&self, workspace: Workspace) -> Result<()> {
        let path = workspace.worktree_path.clone();
        let (selected, has_entry) = {
            let state = self.store.snapshot();
            (
                state.selected_path() == Some(path.as_str()),
                state.terminals_for(&path).is_some(),
            )
        };
        if selected {
            if has_entry {
                return Ok(());
            }
            debug!(workspace = %path, "retrying first terminal");
        } else {
            self.store.update(|s| s.select(workspace));
        }

        let has_sessions = self
            .store
            .snapshot()
            .terminals_for(&path)
            .is_some_and(|t| !t.is_empty());
        if has_sessions {
            debug!(workspace = %path, "switched to workspace with live sessions");
            return Ok(());
        }

        let id = self
            .backend
            .spawn_terminal(&path, self.size.get())
            .await
            .map_err(|e| e.into_user_action("Failed to create terminal"))?;
        debug!(workspace = %path, terminal = %id, "spawned first terminal");
        self.store
            .update(|s| s.insert_session(TerminalSession::new(id, path)));
        Ok(())
    }

    /// Spawn a shell in the selected workspace and make it active.
    pub async fn add_terminal(&self) -> Result<String> {
        let path = self.selected_path()?;
        let id = self
            .backend
            .spawn_terminal(&path, self.size.get())
            .await
            .map_err(|e| e.into_user_action("Failed to create terminal"))?;
        self.record_spawn(&id, path);
        Ok(id)
    }

    /// Spawn the configured AI agent in the selected workspace and make it active.
    pub async fn add_agent_terminal(&self) -> Result<String> {
        let path = self.selected_path()?;
        let agent = self
            .default_agent
            .borrow()
            .clone()
            .ok_or_else(|| SyncError::user_action("No default AI agent configured"))?;

        let mut parts = agent.split_whitespace().map(str::to_string);
        let command = parts
            .next()
            .ok_or_else(|| SyncError::user_action("No default AI agent configured"))?;
        let args: Vec<String> = parts.collect();

        let id = self
            .backend
            .spawn_terminal_with_command(&path, &command, &args, self.size.get())
            .await
            .map_err(|e| e.into_user_action("Failed to start agent"))?;
        self.record_spawn(&id, path);
        Ok(id)
    }

    /// Remove `id` from the selected workspace, then close it in the background.
    ///
    /// The local removal is never rolled back; a failed close is only logged.
    pub fn remove_terminal(&self, id: &str) -> bool {
        let Some(path) = self.store.snapshot().selected_path().map(str::to_string) else {
            return false;
        };
        let removed = self.store.update(|s| s.remove_session(&path, id));
        if removed {
            self.close_in_background(id.to_string());
        } else {
            debug!(terminal = %id, "remove_terminal: not in selected workspace");
        }
        removed
    }

    /// Unknown ids are ignored.
    pub fn set_active_terminal(&self, id: &str) -> bool {
        let Some(path) = self.store.snapshot().selected_path().map(str::to_string) else {
            return false;
        };
        let changed = self.store.update(|s| s.set_active_session(&path, id));
        if !changed {
            debug!(terminal = %id, "set_active_terminal: unknown id ignored");
        }
        changed
    }

    pub async fn write(&self, id: &str, data: &str) {
        if let Err(e) = self.backend.write_to_terminal(id, data).await {
            warn!(terminal = %id, "write failed: {}", e);
        }
    }

    pub async fn resize(&self, id: &str, size: TerminalSize) {
        if let Err(e) = self.backend.resize_terminal(id, size).await {
            warn!(terminal = %id, "resize failed: {}", e);
        }
    }

    /// The process behind `id` exited on its own.
    pub fn handle_terminal_closed(&self, id: &str) -> Option<String> {
        let owner = self.store.update(|s| s.remove_session_anywhere(id));
        match &owner {
            Some(path) => debug!(terminal = %id, workspace = %path, "terminal exited"),
            None => debug!(terminal = %id, "exit of untracked terminal"),
        }
        owner
    }

    /// Forget every session of `worktree_path` and close them in the background.
    pub fn close_workspace_terminals(&self, worktree_path: &str) -> usize {
        let sessions = self.store.update(|s| s.drop_terminals(worktree_path));
        let count = sessions.len();
        for session in sessions {
            self.close_in_background(session.id);
        }
        count
    }

    fn selected_path(&self) -> Result<String> {
        self.store
            .snapshot()
            .selected_path()
            .map(str::to_string)
            .ok_or_else(|| SyncError::user_action("No workspace selected"))
    }

    fn record_spawn(&self, id: &str, owner: String) {
        debug!(workspace = %owner, terminal = %id, "terminal added");
        self.store
            .update(|s| s.insert_session(TerminalSession::new(id, owner)));
    }

    fn close_in_background(&self, id: String) {
        let backend = Rc::clone(&self.backend);
        tokio::task::spawn_local(async move {
            if let Err(e) = backend.close_terminal(&id).await {
                warn!(terminal = %id, "close failed: {}", e);
            }
        });
    }
}
