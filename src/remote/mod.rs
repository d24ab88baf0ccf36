//! Remote review data: the batch PR status map and the per-PR detail cache.
//!
//! The status map is refreshed wholesale by a poll loop (one batched fetch for every
//! repo/branch pair). Detail data is read-through with a TTL.

mod detail;

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::backend::Backend;
use crate::error::{Result, SyncError};
use crate::model::{CreatePrRequest, CreatedPr, PrStatus, PrStatusKey, RepoPrStatuses};
use crate::state::AppStore;
use crate::store::{ListenerId, Store};

pub use detail::{PrDataCache, PrDataCacheEntry, PR_DATA_TTL};

pub type PrStatusMap = HashMap<PrStatusKey, PrStatus>;

/// Clears the in-flight flag when the poll finishes or its task is aborted.
struct InFlight<'a>(&'a Cell<bool>);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            None
        } else {
            Some(Self(flag))
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub struct RemoteDataCache {
    backend: Rc<dyn Backend>,
    store: Rc<AppStore>,
    statuses: Store<PrStatusMap>,
    details: RefCell<PrDataCache>,
    cli_available: Cell<bool>,
    poll_in_flight: Cell<bool>,
    poll_task: RefCell<Option<JoinHandle<()>>>,
    /// Latest background refresh, aborted by `stop_polling`
    refresh_task: RefCell<Option<JoinHandle<()>>>,
}

impl RemoteDataCache {
    pub fn new(backend: Rc<dyn Backend>, store: Rc<AppStore>) -> Self {
        Self {
            backend,
            store,
            statuses: Store::default(),
            details: RefCell::new(PrDataCache::default()),
            cli_available: Cell::new(false),
            poll_in_flight: Cell::new(false),
            poll_task: RefCell::new(None),
            refresh_task: RefCell::new(None),
        }
    }

    // ------------------------------------------------------------------
    // batch status
    // ------------------------------------------------------------------

    /// Ask the backend whether the PR host CLI is usable and remember the answer.
    pub async fn detect_cli(&self) -> bool {
        let available = match self.backend.check_gh_cli().await {
            Ok(available) => available,
            Err(e) => {
                warn!("gh availability check failed: {}", e);
                false
            }
        };
        self.cli_available.set(available);
        info!(available, "PR host CLI");
        available
    }

    pub fn set_cli_available(&self, available: bool) {
        self.cli_available.set(available);
    }

    pub fn cli_available(&self) -> bool {
        self.cli_available.get()
    }

    pub fn is_polling(&self) -> bool {
        self.poll_task.borrow().is_some()
    }

    /// One batched status fetch for every (repo, branch) pair, replacing the whole map.
    ///
    /// Skipped (returns false) when the CLI is unavailable or another poll is in flight.
    /// Failures keep the previous map.
    pub async fn refresh(&self) -> bool {
        if !self.cli_available.get() {
            debug!("status poll skipped: gh unavailable");
            return false;
        }
        let Some(_guard) = InFlight::acquire(&self.poll_in_flight) else {
            debug!("status poll skipped: previous poll in flight");
            return false;
        };

        let repos = self.store.snapshot().repos_with_branches();
        if repos.is_empty() {
            self.statuses.update(|m| m.clear());
            return true;
        }

        match self.backend.get_all_prs_for_repos(&repos).await {
            Ok(batches) => {
                let map = build_status_map(batches);
                debug!(count = map.len(), "PR statuses refreshed");
                self.statuses.update(|m| *m = map);
                true
            }
            Err(e) => {
                warn!("PR status poll failed: {}", e.into_transient());
                false
            }
        }
    }

    /// Poll every `period`, starting now. Restarting replaces the previous loop.
    ///
    /// Must run inside a `LocalSet`.
    pub fn start_polling(self: &Rc<Self>, period: Duration) {
        self.stop_polling();
        let weak = Rc::downgrade(self);
        let handle = tokio::task::spawn_local(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let Some(this) = weak.upgrade() else { break };
                // a slow poll must not delay the next tick
                this.refresh_in_background();
            }
        });
        *self.poll_task.borrow_mut() = Some(handle);
        debug!(period_secs = period.as_secs(), "status polling started");
    }

    /// Run [`refresh`](Self::refresh) as a local task. Skipped while the previous one runs.
    ///
    /// Must run inside a `LocalSet`.
    pub fn refresh_in_background(self: &Rc<Self>) {
        let running = self
            .refresh_task
            .borrow()
            .as_ref()
            .is_some_and(|h| !h.is_finished());
        if running {
            debug!("status poll skipped: previous poll in flight");
            return;
        }
        let this = Rc::clone(self);
        let handle = tokio::task::spawn_local(async move {
            this.refresh().await;
        });
        *self.refresh_task.borrow_mut() = Some(handle);
    }

    /// Stop the poll loop and abort a background refresh that is still in flight.
    pub fn stop_polling(&self) {
        if let Some(handle) = self.refresh_task.borrow_mut().take() {
            handle.abort();
        }
        if let Some(handle) = self.poll_task.borrow_mut().take() {
            handle.abort();
            debug!("status polling stopped");
        }
    }

    /// Open a PR for the branch checked out in `worktree_path`, then re-fetch statuses so
    /// the new PR shows up without waiting for the next tick.
    pub async fn create_pr(
        &self,
        worktree_path: &str,
        request: &CreatePrRequest,
    ) -> Result<CreatedPr> {
        if request.title.trim().is_empty() {
            return Err(SyncError::user_action("Failed to create PR: title is empty"));
        }
        let created = self
            .backend
            .create_pr(worktree_path, request)
            .await
            .map_err(|e| e.into_user_action("Failed to create PR"))?;
        info!(worktree = %worktree_path, number = created.number, "PR created");
        self.refresh().await;
        Ok(created)
    }

    pub fn statuses(&self) -> Rc<PrStatusMap> {
        self.statuses.snapshot()
    }

    pub fn status_for(&self, repo_path: &str, branch: &str) -> Option<PrStatus> {
        self.statuses
            .snapshot()
            .get(&PrStatusKey::new(repo_path, branch))
            .cloned()
    }

    pub fn subscribe_statuses(&self, listener: impl Fn(&PrStatusMap) + 'static) -> ListenerId {
        self.statuses.subscribe(listener)
    }

    pub fn unsubscribe_statuses(&self, id: ListenerId) -> bool {
        self.statuses.unsubscribe(id)
    }

    // ------------------------------------------------------------------
    // detail cache
    // ------------------------------------------------------------------

    /// Fresh entry for `(repo_path, pr_number)`, if any.
    pub fn get(&self, repo_path: &str, pr_number: u64) -> Option<PrDataCacheEntry> {
        self.details
            .borrow()
            .get_at(repo_path, pr_number, Instant::now())
            .cloned()
    }

    pub fn set(
        &self,
        repo_path: &str,
        pr_number: u64,
        checks: crate::model::PrChecksResult,
        details: crate::model::PrDetails,
    ) {
        self.details
            .borrow_mut()
            .set_at(repo_path, pr_number, checks, details, Instant::now());
    }

    /// Forget everything cached for `repo_path`: detail entries and PR statuses.
    pub fn clear_for_repo(&self, repo_path: &str) {
        let removed = self.details.borrow_mut().clear_for_repo(repo_path);
        self.statuses.update(|m| m.retain(|k, _| k.repo_path != repo_path));
        debug!(repo = %repo_path, removed, "remote cache cleared");
    }

    /// Cached entry if fresh, otherwise fetch checks and details and cache them.
    ///
    /// Fetch failures are logged and yield `None`; a stale entry is not returned.
    pub async fn get_or_fetch(&self, repo_path: &str, pr_number: u64) -> Option<PrDataCacheEntry> {
        if let Some(entry) = self.get(repo_path, pr_number) {
            return Some(entry);
        }

        let checks = self.backend.get_pr_checks(repo_path, pr_number).await;
        let details = self.backend.get_pr_details(repo_path, pr_number).await;
        match (checks, details) {
            (Ok(checks), Ok(details)) => {
                self.set(repo_path, pr_number, checks, details);
                self.get(repo_path, pr_number)
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(repo = %repo_path, pr = pr_number, "PR detail fetch failed: {}", e.into_transient());
                None
            }
        }
    }
}

impl Drop for RemoteDataCache {
    fn drop(&mut self) {
        self.stop_polling();
    }
}

fn build_status_map(batches: Vec<RepoPrStatuses>) -> PrStatusMap {
    batches
        .into_iter()
        .flat_map(|batch| {
            let repo_path = batch.repo_path;
            batch.statuses.into_iter().map(move |status| {
                (
                    PrStatusKey::new(repo_path.clone(), status.head_branch.clone()),
                    status,
                )
            })
        })
        .collect()
}
