//! Known repositories and their worktrees.

use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::Result;
use crate::model::{Repository, Workspace};
use crate::state::AppStore;
use crate::storage::SettingsStore;

pub struct WorkspaceRegistry {
    backend: Rc<dyn Backend>,
    store: Rc<AppStore>,
    settings: Rc<dyn SettingsStore>,
}

impl WorkspaceRegistry {
    pub fn new(
        backend: Rc<dyn Backend>,
        store: Rc<AppStore>,
        settings: Rc<dyn SettingsStore>,
    ) -> Self {
        Self {
            backend,
            store,
            settings,
        }
    }

    /// Discover the repository at `path`, list its worktrees and register it.
    ///
    /// Adding the same repository twice replaces the entry. The path list is persisted.
    pub async fn add_repository(&self, path: &str) -> Result<Repository> {
        let repo = self
            .load_repository(path)
            .await
            .map_err(|e| e.into_user_action("Failed to add repository"))?;
        info!(repo = %repo.repo_path, worktrees = repo.worktrees.len(), "repository added");
        self.store.update(|s| s.upsert_repository(repo.clone()));
        self.persist();
        Ok(repo)
    }

    pub fn remove_repository(&self, repo_path: &str) -> bool {
        let removed = self.store.update(|s| s.remove_repository(repo_path));
        if removed {
            info!(repo = %repo_path, "repository removed");
            self.persist();
        }
        removed
    }

    /// Replace one repository's worktree list. Returns false for an unregistered repository.
    pub async fn refresh_worktrees(&self, repo_path: &str) -> Result<bool> {
        let worktrees = self
            .backend
            .list_worktrees(repo_path)
            .await
            .map_err(|e| e.into_transient())?;
        let known = self
            .store
            .update(|s| s.replace_worktrees(repo_path, worktrees));
        if !known {
            debug!(repo = %repo_path, "refresh for unregistered repository ignored");
        }
        Ok(known)
    }

    /// Re-read the branch of one worktree. Returns whether the branch changed.
    ///
    /// Worktrees that are no longer registered are ignored without asking the backend.
    pub async fn update_worktree_branch(&self, worktree_path: &str) -> Result<bool> {
        let known = {
            let state = self.store.snapshot();
            state.find_workspace(worktree_path).is_some()
                || state.selected_path() == Some(worktree_path)
        };
        if !known {
            debug!(worktree = %worktree_path, "branch refresh for unknown worktree ignored");
            return Ok(false);
        }

        let branch = self
            .backend
            .get_worktree_branch_name(worktree_path)
            .await
            .map_err(|e| e.into_transient())?;
        debug!(worktree = %worktree_path, branch = ?branch, "branch refreshed");
        Ok(self.store.update(|s| s.set_branch(worktree_path, branch)))
    }

    pub fn toggle_expanded(&self, repo_path: &str) -> Option<bool> {
        self.store.update(|s| s.toggle_expanded(repo_path))
    }

    /// Register every persisted repository path. Paths that fail are logged and skipped,
    /// and the settings file is left untouched.
    pub async fn load_persisted(&self) -> usize {
        let paths = self.settings.load().repository_paths;
        let mut loaded = 0;
        for path in paths {
            match self.load_repository(&path).await {
                Ok(repo) => {
                    self.store.update(|s| s.upsert_repository(repo));
                    loaded += 1;
                }
                Err(e) => warn!(repo = %path, "skipping persisted repository: {}", e),
            }
        }
        loaded
    }

    /// Create a worktree with a generated name, then refresh the repository.
    pub async fn create_workspace(&self, repo_path: &str) -> Result<Workspace> {
        let workspace = self
            .backend
            .create_worktree_auto(repo_path)
            .await
            .map_err(|e| e.into_user_action("Failed to create workspace"))?;
        info!(repo = %repo_path, worktree = %workspace.worktree_path, "workspace created");
        if let Err(e) = self.refresh_worktrees(repo_path).await {
            warn!(repo = %repo_path, "refresh after create failed: {}", e);
        }
        Ok(workspace)
    }

    pub async fn delete_workspace(
        &self,
        repo_path: &str,
        workspace: &Workspace,
        force: bool,
    ) -> Result<()> {
        self.backend
            .delete_worktree(repo_path, &workspace.name, force)
            .await
            .map_err(|e| e.into_user_action("Failed to delete workspace"))?;
        info!(repo = %repo_path, worktree = %workspace.worktree_path, "workspace deleted");
        if let Err(e) = self.refresh_worktrees(repo_path).await {
            warn!(repo = %repo_path, "refresh after delete failed: {}", e);
        }
        Ok(())
    }

    async fn load_repository(&self, path: &str) -> Result<Repository> {
        let info = self.backend.discover_repository(path).await?;
        let worktrees = self.backend.list_worktrees(&info.path).await?;
        Ok(Repository::new(info, worktrees))
    }

    fn persist(&self) {
        let mut settings = self.settings.load();
        settings.repository_paths = self.store.snapshot().repository_paths();
        if let Err(e) = self.settings.save(&settings) {
            warn!("failed to persist repository list: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::FakeBackend;
    use crate::state::AppState;
    use crate::storage::{MemorySettingsStore, Settings};

    fn setup() -> (
        Rc<FakeBackend>,
        Rc<AppStore>,
        Rc<MemorySettingsStore>,
        WorkspaceRegistry,
    ) {
        let backend = FakeBackend::new();
        backend.add_repo("/src/app", &[("/src/app", Some("main")), ("/src/app/.worktrees/x", Some("x"))]);
        let store = Rc::new(AppStore::new(AppState::default()));
        let settings = Rc::new(MemorySettingsStore::default());
        let registry = WorkspaceRegistry::new(backend.clone(), Rc::clone(&store), settings.clone());
        (backend, store, settings, registry)
    }

    #[tokio::test]
    async fn test_add_repository_is_idempotent() {
        let (_backend, store, settings, registry) = setup();
        registry.add_repository("/src/app").await.unwrap();
        registry.add_repository("/src/app").await.unwrap();

        let state = store.snapshot();
        assert_eq!(state.repositories.len(), 1);
        assert_eq!(state.repositories[0].worktrees.len(), 2);
        assert_eq!(settings.load().repository_paths, vec!["/src/app".to_string()]);
    }

    #[tokio::test]
    async fn test_add_unknown_repository_fails() {
        let (_backend, store, settings, registry) = setup();
        let err = registry.add_repository("/nope").await.unwrap_err();
        assert!(err.is_user_facing());
        assert!(store.snapshot().repositories.is_empty());
        assert_eq!(settings.saves(), 0);
    }

    #[tokio::test]
    async fn test_persistence_failure_is_swallowed() {
        let (_backend, store, settings, registry) = setup();
        settings.set_fail_saves(true);
        registry.add_repository("/src/app").await.unwrap();
        assert_eq!(store.snapshot().repositories.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_repository_persists() {
        let (_backend, store, settings, registry) = setup();
        registry.add_repository("/src/app").await.unwrap();
        assert!(registry.remove_repository("/src/app"));
        assert!(!registry.remove_repository("/src/app"));
        assert!(store.snapshot().repositories.is_empty());
        assert!(settings.load().repository_paths.is_empty());
    }

    #[tokio::test]
    async fn test_update_worktree_branch() {
        let (backend, store, _settings, registry) = setup();
        registry.add_repository("/src/app").await.unwrap();
        backend.set_branch("/src/app/.worktrees/x", Some("renamed"));

        registry
            .update_worktree_branch("/src/app/.worktrees/x")
            .await
            .unwrap();

        let state = store.snapshot();
        assert_eq!(
            state
                .find_workspace("/src/app/.worktrees/x")
                .and_then(|w| w.branch.as_deref()),
            Some("renamed")
        );
        assert_eq!(
            state.find_workspace("/src/app").and_then(|w| w.branch.as_deref()),
            Some("main")
        );
    }

    #[tokio::test]
    async fn test_update_branch_of_unknown_worktree_skips_backend() {
        let (backend, _store, _settings, registry) = setup();
        registry.add_repository("/src/app").await.unwrap();

        assert!(!registry.update_worktree_branch("/elsewhere").await.unwrap());
        assert_eq!(backend.calls("get_worktree_branch_name"), 0);

        backend.set_branch("/src/app", Some("main"));
        assert!(!registry.update_worktree_branch("/src/app").await.unwrap());
        assert_eq!(backend.calls("get_worktree_branch_name"), 1);
    }

    #[tokio::test]
    async fn test_refresh_of_unregistered_repository() {
        let (backend, _store, _settings, registry) = setup();
        registry.add_repository("/src/app").await.unwrap();
        assert!(registry.refresh_worktrees("/src/app").await.unwrap());

        backend.add_repo("/other", &[("/other", Some("main"))]);
        assert!(!registry.refresh_worktrees("/other").await.unwrap());
    }

    #[tokio::test]
    async fn test_refresh_failure_is_transient_and_keeps_list() {
        let (backend, store, _settings, registry) = setup();
        registry.add_repository("/src/app").await.unwrap();
        backend.fail("list_worktrees");

        let err = registry.refresh_worktrees("/src/app").await.unwrap_err();
        assert!(!err.is_user_facing());
        assert_eq!(store.snapshot().repositories[0].worktrees.len(), 2);
    }

    #[tokio::test]
    async fn test_create_and_delete_workspace() {
        let (backend, store, _settings, registry) = setup();
        registry.add_repository("/src/app").await.unwrap();

        let ws = registry.create_workspace("/src/app").await.unwrap();
        assert_eq!(store.snapshot().repositories[0].worktrees.len(), 3);
        assert!(store.snapshot().find_workspace(&ws.worktree_path).is_some());

        registry.delete_workspace("/src/app", &ws, false).await.unwrap();
        assert_eq!(store.snapshot().repositories[0].worktrees.len(), 2);
        assert_eq!(backend.calls("delete_worktree"), 1);
    }

    #[tokio::test]
    async fn test_create_failure_leaves_state_untouched() {
        let (backend, store, _settings, registry) = setup();
        registry.add_repository("/src/app").await.unwrap();
        backend.fail("create_worktree_auto");
        let version = store.version();

        let err = registry.create_workspace("/src/app").await.unwrap_err();
        assert!(err.is_user_facing());
        assert_eq!(store.version(), version);
    }

    #[tokio::test]
    async fn test_load_persisted_skips_broken_paths() {
        let backend = FakeBackend::new();
        backend.add_repo("/a", &[("/a", Some("main"))]);
        let store = Rc::new(AppStore::new(AppState::default()));
        let settings = Rc::new(MemorySettingsStore::new(Settings {
            repository_paths: vec!["/a".to_string(), "/gone".to_string()],
            ..Settings::default()
        }));
        let registry = WorkspaceRegistry::new(backend.clone(), Rc::clone(&store), settings.clone());

        assert_eq!(registry.load_persisted().await, 1);
        assert_eq!(store.snapshot().repository_paths(), vec!["/a".to_string()]);
        assert_eq!(settings.saves(), 0);
    }

    #[tokio::test]
    async fn test_toggle_expanded() {
        let (_backend, _store, _settings, registry) = setup();
        registry.add_repository("/src/app").await.unwrap();
        assert_eq!(registry.toggle_expanded("/src/app"), Some(false));
        assert_eq!(registry.toggle_expanded("/src/app"), Some(true));
        assert_eq!(registry.toggle_expanded("/nope"), None);
    }
}
