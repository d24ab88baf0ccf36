//! Terminal sessions tracked per workspace.

/// A live terminal process. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalSession {
    pub id: String,
    /// Worktree the session was spawned in (its owner)
    pub workspace_path: String,
}

impl TerminalSession {
    pub fn new(id: impl Into<String>, workspace_path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            workspace_path: workspace_path.into(),
        }
    }
}

/// Sessions of one workspace in creation order, plus the active one.
///
/// Invariant: `active_id` is `None` or names a session in `sessions`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceTerminalState {
    sessions: Vec<TerminalSession>,
    active_id: Option<String>,
}

impl WorkspaceTerminalState {
    pub fn sessions(&self) -> &[TerminalSession] {
        &self.sessions
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_id.as_deref()
    }

    pub fn active(&self) -> Option<&TerminalSession> {
        let id = self.active_id.as_deref()?;
        self.sessions.iter().find(|s| s.id == id)
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.iter().any(|s| s.id == id)
    }

    /// Append and make active.
    pub fn push_active(&mut self, session: TerminalSession) {
        self.active_id = Some(session.id.clone());
        self.sessions.push(session);
    }

    /// Remove `id`. If it was active, the last remaining session becomes active.
    /// Returns false if `id` is unknown.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(index) = self.sessions.iter().position(|s| s.id == id) else {
            return false;
        };
        self.sessions.remove(index);
        if self.active_id.as_deref() == Some(id) {
            self.active_id = self.sessions.last().map(|s| s.id.clone());
        }
        true
    }

    /// Returns false (and changes nothing) if `id` is not one of this workspace's sessions.
    pub fn set_active(&mut self, id: &str) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.active_id = Some(id.to_string());
        true
    }

    /// Drain every session, leaving the state empty.
    pub fn take_all(&mut self) -> Vec<TerminalSession> {
        self.active_id = None;
        std::mem::take(&mut self.sessions)
    }

    pub fn is_consistent(&self) -> bool {
        match self.active_id.as_deref() {
            None => true,
            Some(id) => self.contains(id),
        }
    }
}
