//! Change-driven invalidation.
//!
//! Listens to the backend's push events and turns each one into a targeted, debounced
//! refresh: HEAD changes re-read one worktree's branch, worktree-set changes re-list one
//! repository, file / index changes notify the diff listener registered for that worktree.
//! Also keeps the backend's file-system watches in line with the registered repositories.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeSet, HashMap};
use std::rc::Rc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BackendEvent};
use crate::model::{watch_signature, Repository};
use crate::registry::WorkspaceRegistry;
use crate::session::SessionMultiplexer;
use crate::state::AppStore;
use crate::store::ListenerId;
use crate::sync::{
    CoalescingScheduler, BRANCH_REFRESH_DELAY, FILE_REFRESH_DELAY, WORKTREE_REFRESH_DELAY,
};

type FilesListener = Rc<dyn Fn()>;
type StructureListener = Rc<RefCell<Option<Rc<dyn Fn()>>>>;

pub struct ChangeWatcher {
    backend: Rc<dyn Backend>,
    registry: Rc<WorkspaceRegistry>,
    store: Rc<AppStore>,
    sessions: Option<Rc<SessionMultiplexer>>,
    scheduler: CoalescingScheduler,
    listener: RefCell<Option<JoinHandle<()>>>,
    store_subscription: Cell<Option<ListenerId>>,
    /// Signature of the last registered watch set
    signature: RefCell<Option<String>>,
    /// Repositories with a live backend watch
    watched: RefCell<BTreeSet<String>>,
    structure_listener: StructureListener,
    files_listeners: Rc<RefCell<HashMap<String, FilesListener>>>,
}

impl ChangeWatcher {
    pub fn new(
        backend: Rc<dyn Backend>,
        registry: Rc<WorkspaceRegistry>,
        store: Rc<AppStore>,
    ) -> Self {
        Self {
            backend,
            registry,
            store,
            sessions: None,
            scheduler: CoalescingScheduler::new(),
            listener: RefCell::new(None),
            store_subscription: Cell::new(None),
            signature: RefCell::new(None),
            watched: RefCell::new(BTreeSet::new()),
            structure_listener: Rc::new(RefCell::new(None)),
            files_listeners: Rc::new(RefCell::new(HashMap::new())),
        }
    }

    /// Route `terminal-closed` events to `sessions`.
    pub fn with_sessions(mut self, sessions: Rc<SessionMultiplexer>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn is_subscribed(&self) -> bool {
        self.listener.borrow().is_some()
    }

    /// Start listening. Calling it again while subscribed does nothing.
    ///
    /// Must run inside a `LocalSet`.
    pub fn subscribe(self: &Rc<Self>) {
        if self.is_subscribed() {
            return;
        }

        let mut events = self.backend.subscribe();
        let weak = Rc::downgrade(self);
        let handle = tokio::task::spawn_local(async move {
            loop {
                match events.recv().await {
                    Ok(event) => {
                        let Some(this) = weak.upgrade() else { break };
                        this.handle_event(event);
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!("change watcher lagged, {} events dropped", n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!("change watcher event loop ended");
        });
        *self.listener.borrow_mut() = Some(handle);

        let weak = Rc::downgrade(self);
        let id = self.store.subscribe(move |state| {
            if let Some(this) = weak.upgrade() {
                this.sync_watches(&state.repositories);
            }
        });
        self.store_subscription.set(Some(id));

        self.sync_watches(&self.store.snapshot().repositories);
        info!("change watcher subscribed");
    }

    /// Stop listening, drop pending refreshes and release every backend watch.
    pub async fn teardown(&self) {
        if let Some(handle) = self.listener.borrow_mut().take() {
            handle.abort();
        }
        if let Some(id) = self.store_subscription.take() {
            self.store.unsubscribe(id);
        }
        self.scheduler.cancel_all();
        *self.signature.borrow_mut() = None;
        self.watched.borrow_mut().clear();
        if let Err(e) = self.backend.stop_all_watchers().await {
            warn!("failed to stop watchers: {}", e);
        }
        info!("change watcher torn down");
    }

    /// Call `listener` (debounced) whenever files or the index change under `worktree_path`.
    /// Replaces any previous listener for that worktree.
    pub fn on_files_changed(&self, worktree_path: impl Into<String>, listener: impl Fn() + 'static) {
        self.files_listeners
            .borrow_mut()
            .insert(worktree_path.into(), Rc::new(listener));
    }

    /// Call `listener` after a watcher-driven refresh changed a branch or a worktree list.
    pub fn on_structure_changed(&self, listener: impl Fn() + 'static) {
        *self.structure_listener.borrow_mut() = Some(Rc::new(listener));
    }

    pub fn remove_files_listener(&self, worktree_path: &str) -> bool {
        self.scheduler.cancel(&files_key(worktree_path));
        self.files_listeners.borrow_mut().remove(worktree_path).is_some()
    }

    pub fn handle_event(&self, event: BackendEvent) {
        match event {
            BackendEvent::GitHeadChanged { worktree_path, .. } => {
                let registry = Rc::clone(&self.registry);
                let structure = Rc::clone(&self.structure_listener);
                self.scheduler.schedule(
                    format!("branch:{}", worktree_path),
                    BRANCH_REFRESH_DELAY,
                    move || async move {
                        match registry.update_worktree_branch(&worktree_path).await {
                            Ok(true) => notify_structure(&structure),
                            Ok(false) => {}
                            Err(e) => {
                                warn!(worktree = %worktree_path, "branch refresh failed: {}", e)
                            }
                        }
                    },
                );
            }
            BackendEvent::WorktreeChanged { repo_path } => {
                let registry = Rc::clone(&self.registry);
                let structure = Rc::clone(&self.structure_listener);
                self.scheduler.schedule(
                    format!("worktrees:{}", repo_path),
                    WORKTREE_REFRESH_DELAY,
                    move || async move {
                        match registry.refresh_worktrees(&repo_path).await {
                            Ok(true) => notify_structure(&structure),
                            Ok(false) => {}
                            Err(e) => warn!(repo = %repo_path, "worktree refresh failed: {}", e),
                        }
                    },
                );
            }
            BackendEvent::FileChanged { worktree_path }
            | BackendEvent::GitIndexChanged { worktree_path } => {
                if !self.files_listeners.borrow().contains_key(&worktree_path) {
                    return;
                }
                let listeners = Rc::clone(&self.files_listeners);
                self.scheduler.schedule(
                    files_key(&worktree_path),
                    FILE_REFRESH_DELAY,
                    move || async move {
                        let listener = listeners.borrow().get(&worktree_path).cloned();
                        if let Some(listener) = listener {
                            listener();
                        }
                    },
                );
            }
            BackendEvent::TerminalClosed { terminal_id } => {
                if let Some(sessions) = &self.sessions {
                    sessions.handle_terminal_closed(&terminal_id);
                }
            }
            BackendEvent::TerminalOutput { .. } => {}
        }
    }

    /// Re-register backend watches when the repository / worktree set changed, and release
    /// the watches of repositories that are gone.
    fn sync_watches(&self, repositories: &[Repository]) {
        let signature = watch_signature(repositories);
        if self.signature.borrow().as_deref() == Some(signature.as_str()) {
            return;
        }
        debug!(signature = %signature, "watch set changed");
        *self.signature.borrow_mut() = Some(signature);

        let current: BTreeSet<String> = repositories.iter().map(|r| r.repo_path.clone()).collect();
        let gone: Vec<String> = self
            .watched
            .borrow()
            .difference(&current)
            .cloned()
            .collect();
        *self.watched.borrow_mut() = current;

        for repo_path in gone {
            let backend = Rc::clone(&self.backend);
            tokio::task::spawn_local(async move {
                if let Err(e) = backend.stop_watching_repository(&repo_path).await {
                    warn!(repo = %repo_path, "failed to stop watching repository: {}", e);
                }
            });
        }

        for repo in repositories {
            let backend = Rc::clone(&self.backend);
            let repo_path = repo.repo_path.clone();
            let worktree_paths = repo.sorted_worktree_paths();
            tokio::task::spawn_local(async move {
                if let Err(e) = backend
                    .start_watching_repository(&repo_path, &worktree_paths)
                    .await
                {
                    warn!(repo = %repo_path, "failed to watch repository: {}", e);
                }
            });
        }
    }
}

fn notify_structure(listener: &StructureListener) {
    let listener = listener.borrow().clone();
    if let Some(listener) = listener {
        listener();
    }
}

fn files_key(worktree_path: &str) -> String {
    format!("files:{}", worktree_path)
}
