//! Background diff loader for one worktree.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::error::Result;
use crate::model::{ChangedFile, FileDiff};
use crate::storage::DiffMode;

/// Cached outcome for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffEntry {
    Loaded(FileDiff),
    /// The fetch failed; the path is not retried until `refresh`.
    Failed(String),
}

impl DiffEntry {
    pub fn diff(&self) -> Option<&FileDiff> {
        match self {
            DiffEntry::Loaded(diff) => Some(diff),
            DiffEntry::Failed(_) => None,
        }
    }
}

/// Populates a per-path diff cache from the changed-file listing, one fetch at a time.
///
/// Paths already cached or in flight are never fetched again. `ensure` moves a path to
/// the front of the backlog. Results that arrive after a `refresh` are dropped.
pub struct DiffLoader {
    backend: Rc<dyn Backend>,
    worktree_path: String,
    mode: Cell<DiffMode>,
    files: RefCell<Vec<ChangedFile>>,
    cache: RefCell<HashMap<String, DiffEntry>>,
    backlog: RefCell<VecDeque<String>>,
    in_flight: RefCell<HashSet<String>>,
    running: Cell<bool>,
    generation: Cell<u64>,
    idle: Notify,
}

impl DiffLoader {
    pub fn new(backend: Rc<dyn Backend>, worktree_path: impl Into<String>, mode: DiffMode) -> Self {
        Self {
            backend,
            worktree_path: worktree_path.into(),
            mode: Cell::new(mode),
            files: RefCell::new(Vec::new()),
            cache: RefCell::new(HashMap::new()),
            backlog: RefCell::new(VecDeque::new()),
            in_flight: RefCell::new(HashSet::new()),
            running: Cell::new(false),
            generation: Cell::new(0),
            idle: Notify::new(),
        }
    }

    pub fn worktree_path(&self) -> &str {
        &self.worktree_path
    }

    pub fn mode(&self) -> DiffMode {
        self.mode.get()
    }

    pub fn files(&self) -> Vec<ChangedFile> {
        self.files.borrow().clone()
    }

    pub fn entry(&self, path: &str) -> Option<DiffEntry> {
        self.cache.borrow().get(path).cloned()
    }

    pub fn cached_count(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn is_loading(&self) -> bool {
        self.running.get()
    }

    /// Fetch the changed-file listing and queue every path for background loading.
    ///
    /// A listing failure is returned; nothing is queued.
    pub async fn load(self: &Rc<Self>) -> Result<Vec<ChangedFile>> {
        let generation = self.generation.get();
        let files = match self.mode.get() {
            DiffMode::Branch => self.backend.get_changed_files(&self.worktree_path).await,
            DiffMode::Uncommitted => self.backend.get_uncommitted_files(&self.worktree_path).await,
        }
        .map_err(|e| e.into_transient())?;

        if generation != self.generation.get() {
            debug!(worktree = %self.worktree_path, "listing superseded by refresh");
            return Ok(files);
        }

        {
            let cache = self.cache.borrow();
            let mut backlog = self.backlog.borrow_mut();
            for file in &files {
                if !cache.contains_key(&file.path) && !backlog.contains(&file.path) {
                    backlog.push_back(file.path.clone());
                }
            }
        }
        *self.files.borrow_mut() = files.clone();
        debug!(worktree = %self.worktree_path, count = files.len(), "changed files listed");
        self.kick();
        Ok(files)
    }

    /// Load `path` next unless it is already cached or being fetched.
    pub fn ensure(self: &Rc<Self>, path: &str) {
        if self.cache.borrow().contains_key(path) || self.in_flight.borrow().contains(path) {
            return;
        }
        {
            let mut backlog = self.backlog.borrow_mut();
            backlog.retain(|p| p != path);
            backlog.push_front(path.to_string());
        }
        self.kick();
    }

    /// Drop every cached diff and load the listing again.
    pub async fn refresh(self: &Rc<Self>) -> Result<Vec<ChangedFile>> {
        self.generation.set(self.generation.get() + 1);
        self.cache.borrow_mut().clear();
        self.backlog.borrow_mut().clear();
        self.in_flight.borrow_mut().clear();
        self.files.borrow_mut().clear();
        self.load().await
    }

    /// Switch listing/diff source. Reloads when the mode actually changed.
    pub async fn set_mode(self: &Rc<Self>, mode: DiffMode) -> Result<()> {
        if self.mode.replace(mode) == mode {
            return Ok(());
        }
        self.refresh().await.map(|_| ())
    }

    /// Resolves once the backlog is drained.
    pub async fn settled(&self) {
        while self.running.get() {
            self.idle.notified().await;
        }
    }

    fn kick(self: &Rc<Self>) {
        if self.running.get() || self.backlog.borrow().is_empty() {
            return;
        }
        self.running.set(true);
        let this = Rc::clone(self);
        tokio::task::spawn_local(async move {
            this.drain().await;
            this.running.set(false);
            this.idle.notify_waiters();
        });
    }

    async fn drain(&self) {
        while let Some(path) = self.next_path() {
            let generation = self.generation.get();
            self.in_flight.borrow_mut().insert(path.clone());

            let result = match self.mode.get() {
                DiffMode::Branch => self.backend.get_file_diff(&self.worktree_path, &path).await,
                DiffMode::Uncommitted => {
                    self.backend
                        .get_uncommitted_diff(&self.worktree_path, &path)
                        .await
                }
            };

            if generation != self.generation.get() {
                debug!(path = %path, "discarding diff fetched before refresh");
                continue;
            }
            self.in_flight.borrow_mut().remove(&path);

            let entry = match result {
                Ok(diff) => DiffEntry::Loaded(diff),
                Err(e) => {
                    warn!(worktree = %self.worktree_path, path = %path, "diff fetch failed: {}", e);
                    DiffEntry::Failed(e.to_string())
                }
            };
            self.cache.borrow_mut().insert(path, entry);
        }
    }

    /// Next backlog path that is neither cached nor in flight.
    fn next_path(&self) -> Option<String> {
        let cache = self.cache.borrow();
        let in_flight = self.in_flight.borrow();
        let mut backlog = self.backlog.borrow_mut();
        while let Some(path) = backlog.pop_front() {
            if !cache.contains_key(&path) && !in_flight.contains(&path) {
                return Some(path);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{run_local, settle, FakeBackend};

    fn loader(backend: &Rc<FakeBackend>, mode: DiffMode) -> Rc<DiffLoader> {
        Rc::new(DiffLoader::new(backend.clone(), "/w", mode))
    }

    fn requests(backend: &FakeBackend) -> Vec<String> {
        backend.diff_requests.borrow().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_path_fetched_once() {
        run_local(async {
            let backend = FakeBackend::new();
            backend.set_changed_files(&["a.rs", "b.rs"]);
            backend.gate("get_file_diff");
            let loader = loader(&backend, DiffMode::Branch);

            loader.load().await.unwrap();
            settle().await;
            loader.ensure("a.rs");
            loader.ensure("b.rs");
            loader.ensure("b.rs");

            backend.release("get_file_diff", 10);
            loader.settled().await;

            assert_eq!(requests(&backend), vec!["a.rs", "b.rs"]);
            assert!(matches!(loader.entry("a.rs"), Some(DiffEntry::Loaded(_))));
            assert_eq!(loader.cached_count(), 2);
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_jumps_the_queue() {
        run_local(async {
            let backend = FakeBackend::new();
            backend.set_changed_files(&["a", "b", "c"]);
            backend.gate("get_file_diff");
            let loader = loader(&backend, DiffMode::Branch);

            loader.load().await.unwrap();
            settle().await;
            loader.ensure("c");
            backend.release("get_file_diff", 3);
            loader.settled().await;

            assert_eq!(requests(&backend), vec!["a", "c", "b"]);
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_recorded_and_not_retried() {
        run_local(async {
            let backend = FakeBackend::new();
            backend.set_changed_files(&["ok", "broken"]);
            backend.fail_diff("broken");
            let loader = loader(&backend, DiffMode::Branch);

            loader.load().await.unwrap();
            loader.settled().await;
            assert!(matches!(loader.entry("broken"), Some(DiffEntry::Failed(_))));
            assert!(loader.entry("broken").unwrap().diff().is_none());

            loader.ensure("broken");
            loader.load().await.unwrap();
            loader.settled().await;
            assert_eq!(requests(&backend), vec!["ok", "broken"]);
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_listing_failure_surfaces() {
        run_local(async {
            let backend = FakeBackend::new();
            backend.fail("get_changed_files");
            let loader = loader(&backend, DiffMode::Branch);

            assert!(loader.load().await.is_err());
            assert!(!loader.is_loading());
            assert!(loader.files().is_empty());
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_refetches() {
        run_local(async {
            let backend = FakeBackend::new();
            backend.set_changed_files(&["a"]);
            let loader = loader(&backend, DiffMode::Branch);

            loader.load().await.unwrap();
            loader.settled().await;
            loader.refresh().await.unwrap();
            loader.settled().await;

            assert_eq!(requests(&backend), vec!["a", "a"]);
            assert_eq!(backend.calls("get_changed_files"), 2);
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_from_before_refresh_is_dropped() {
        run_local(async {
            let backend = FakeBackend::new();
            backend.set_changed_files(&["a"]);
            backend.gate("get_file_diff");
            let loader = loader(&backend, DiffMode::Branch);

            loader.load().await.unwrap();
            settle().await;
            loader.refresh().await.unwrap();

            backend.release("get_file_diff", 2);
            loader.settled().await;

            // the stale fetch was discarded, then "a" loaded again for the new generation
            assert_eq!(requests(&backend), vec!["a", "a"]);
            assert!(matches!(loader.entry("a"), Some(DiffEntry::Loaded(_))));
        })
        .await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_uncommitted_mode() {
        run_local(async {
            let backend = FakeBackend::new();
            backend.set_changed_files(&["a"]);
            let loader = loader(&backend, DiffMode::Branch);
            loader.load().await.unwrap();
            loader.settled().await;

            loader.set_mode(DiffMode::Uncommitted).await.unwrap();
            loader.settled().await;
            assert_eq!(backend.calls("get_uncommitted_files"), 1);
            assert_eq!(backend.calls("get_uncommitted_diff"), 1);
            assert_eq!(
                loader.entry("a").and_then(|e| e.diff().map(|d| d.patch.clone())),
                Some("@@ wip a @@".to_string())
            );

            loader.set_mode(DiffMode::Uncommitted).await.unwrap();
            assert_eq!(backend.calls("get_uncommitted_files"), 1);
        })
        .await;
    }
}
