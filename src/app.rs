//! Composition root: wires the store, the collaborator and every component together.
//!
//! Owns the cross-component flows: removing a repository also forgets its remote data,
//! deleting a workspace also closes its terminals, diff loaders refresh on file changes,
//! and PR statuses are re-fetched whenever worktrees or branches change.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::diff::DiffLoader;
use crate::error::Result;
use crate::model::{Repository, Workspace};
use crate::registry::WorkspaceRegistry;
use crate::remote::RemoteDataCache;
use crate::session::SessionMultiplexer;
use crate::state::{AppState, AppStore};
use crate::storage::{DiffMode, Settings, SettingsStore, DEFAULT_POLL_INTERVAL_SECS};
use crate::watch::ChangeWatcher;

pub struct App {
    store: Rc<AppStore>,
    settings: Rc<dyn SettingsStore>,
    registry: Rc<WorkspaceRegistry>,
    sessions: Rc<SessionMultiplexer>,
    watcher: Rc<ChangeWatcher>,
    remote: Rc<RemoteDataCache>,
    diff_mode: Cell<DiffMode>,
    diff_loaders: RefCell<HashMap<String, Rc<DiffLoader>>>,
    backend: Rc<dyn Backend>,
}

impl App {
    pub fn new(backend: Rc<dyn Backend>, settings: Rc<dyn SettingsStore>) -> Self {
        let store = Rc::new(AppStore::new(AppState::default()));
        let registry = Rc::new(WorkspaceRegistry::new(
            Rc::clone(&backend),
            Rc::clone(&store),
            Rc::clone(&settings),
        ));
        let sessions = Rc::new(SessionMultiplexer::new(Rc::clone(&backend), Rc::clone(&store)));
        let watcher = Rc::new(
            ChangeWatcher::new(Rc::clone(&backend), Rc::clone(&registry), Rc::clone(&store))
                .with_sessions(Rc::clone(&sessions)),
        );
        let remote = Rc::new(RemoteDataCache::new(Rc::clone(&backend), Rc::clone(&store)));

        let weak = Rc::downgrade(&remote);
        watcher.on_structure_changed(move || {
            if let Some(remote) = weak.upgrade() {
                remote.refresh_in_background();
            }
        });

        Self {
            store,
            settings,
            registry,
            sessions,
            watcher,
            remote,
            diff_mode: Cell::new(DiffMode::default()),
            diff_loaders: RefCell::new(HashMap::new()),
            backend,
        }
    }

    pub fn store(&self) -> &Rc<AppStore> {
        &self.store
    }

    pub fn registry(&self) -> &Rc<WorkspaceRegistry> {
        &self.registry
    }

    pub fn sessions(&self) -> &Rc<SessionMultiplexer> {
        &self.sessions
    }

    pub fn watcher(&self) -> &Rc<ChangeWatcher> {
        &self.watcher
    }

    pub fn remote(&self) -> &Rc<RemoteDataCache> {
        &self.remote
    }

    pub fn diff_mode(&self) -> DiffMode {
        self.diff_mode.get()
    }

    /// Load persisted repositories, start watching and start the PR status poll.
    /// Returns how many repositories were restored.
    ///
    /// Must run inside a `LocalSet`.
    pub async fn start(&self) -> usize {
        let settings = self.settings.load();
        self.sessions.set_default_agent(settings.default_ai_agent.clone());
        self.diff_mode.set(settings.diff_mode);

        let restored = self.registry.load_persisted().await;
        self.watcher.subscribe();

        let cli = self.remote.detect_cli().await;
        let secs = if settings.poll_interval_secs == 0 {
            DEFAULT_POLL_INTERVAL_SECS
        } else {
            settings.poll_interval_secs
        };
        self.remote.start_polling(Duration::from_secs(secs));

        info!(repositories = restored, gh = cli, poll_secs = secs, "autopilot started");
        restored
    }

    /// Stop every background activity and close all terminals.
    pub async fn shutdown(&self) {
        self.remote.stop_polling();
        self.watcher.teardown().await;

        let paths: Vec<String> = self.diff_loaders.borrow().keys().cloned().collect();
        for path in paths {
            self.close_diff(&path);
        }

        let owners: Vec<String> = self.store.snapshot().terminals.keys().cloned().collect();
        let mut closed = 0;
        for path in owners {
            closed += self.sessions.close_workspace_terminals(&path);
        }
        info!(terminals = closed, "autopilot shut down");
    }

    pub async fn add_repository(&self, path: &str) -> Result<Repository> {
        let repo = self.registry.add_repository(path).await?;
        // new branches should show PR state without waiting a full interval
        self.remote.refresh().await;
        Ok(repo)
    }

    pub fn remove_repository(&self, repo_path: &str) -> bool {
        let worktrees: Vec<String> = self
            .store
            .snapshot()
            .repository(repo_path)
            .map(|r| r.worktrees.iter().map(|w| w.worktree_path.clone()).collect())
            .unwrap_or_default();

        if !self.registry.remove_repository(repo_path) {
            return false;
        }
        self.remote.clear_for_repo(repo_path);
        for path in worktrees {
            self.close_diff(&path);
        }
        true
    }

    pub async fn create_workspace(&self, repo_path: &str) -> Result<Workspace> {
        let workspace = self.registry.create_workspace(repo_path).await?;
        self.remote.refresh().await;
        Ok(workspace)
    }

    /// Delete the worktree, then drop its terminals and diff state.
    pub async fn delete_workspace(
        &self,
        repo_path: &str,
        workspace: &Workspace,
        force: bool,
    ) -> Result<()> {
        self.registry
            .delete_workspace(repo_path, workspace, force)
            .await?;

        let path = &workspace.worktree_path;
        let closed = self.sessions.close_workspace_terminals(path);
        self.close_diff(path);
        if self.store.snapshot().selected_path() == Some(path.as_str()) {
            self.store.update(|s| s.clear_selection());
        }
        debug!(worktree = %path, terminals = closed, "workspace state dropped");
        self.remote.refresh().await;
        Ok(())
    }

    /// The diff loader of `worktree_path`, created on first use.
    ///
    /// The loader refreshes itself (debounced) on file or index changes in that worktree.
    pub fn diff_loader(&self, worktree_path: &str) -> Rc<DiffLoader> {
        if let Some(loader) = self.diff_loaders.borrow().get(worktree_path) {
            return Rc::clone(loader);
        }

        let loader = Rc::new(DiffLoader::new(
            Rc::clone(&self.backend),
            worktree_path,
            self.diff_mode.get(),
        ));
        let weak: Weak<DiffLoader> = Rc::downgrade(&loader);
        self.watcher.on_files_changed(worktree_path, move || {
            let Some(loader) = weak.upgrade() else { return };
            tokio::task::spawn_local(async move {
                if let Err(e) = loader.refresh().await {
                    warn!(worktree = %loader.worktree_path(), "diff refresh failed: {}", e);
                }
            });
        });

        self.diff_loaders
            .borrow_mut()
            .insert(worktree_path.to_string(), Rc::clone(&loader));
        loader
    }

    pub fn close_diff(&self, worktree_path: &str) -> bool {
        self.watcher.remove_files_listener(worktree_path);
        self.diff_loaders.borrow_mut().remove(worktree_path).is_some()
    }

    /// Switch every open diff to `mode` and persist the choice.
    pub async fn set_diff_mode(&self, mode: DiffMode) {
        if self.diff_mode.replace(mode) == mode {
            return;
        }
        self.persist(|s| s.diff_mode = mode);

        let loaders: Vec<Rc<DiffLoader>> = self.diff_loaders.borrow().values().cloned().collect();
        for loader in loaders {
            if let Err(e) = loader.set_mode(mode).await {
                warn!(worktree = %loader.worktree_path(), "diff reload failed: {}", e);
            }
        }
    }

    pub fn set_default_agent(&self, agent: Option<String>) {
        self.sessions.set_default_agent(agent.clone());
        self.persist(|s| s.default_ai_agent = agent);
    }

    fn persist(&self, change: impl FnOnce(&mut Settings)) {
        let mut settings = self.settings.load();
        change(&mut settings);
        if let Err(e) = self.settings.save(&settings) {
            warn!("failed to save settings: {}", e);
        }
    }
}
