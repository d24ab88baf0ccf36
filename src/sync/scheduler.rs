//! Per-key debounce.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use tokio::task::JoinHandle;

/// Branch name refresh after a HEAD change.
pub const BRANCH_REFRESH_DELAY: Duration = Duration::from_millis(300);
/// Worktree list refresh after the worktree set changed.
pub const WORKTREE_REFRESH_DELAY: Duration = Duration::from_millis(500);
/// Diff refresh after file / index changes.
pub const FILE_REFRESH_DELAY: Duration = Duration::from_millis(500);

struct PendingTimer {
    token: u64,
    handle: JoinHandle<()>,
}

/// Coalesces bursts of calls per key: N `schedule` calls for one key inside the delay
/// window run the last action exactly once.
///
/// Timers run on the current `LocalSet`. Once a timer fires its entry is removed before
/// the action starts, so a later `schedule` never aborts an action that is already
/// running.
#[derive(Default)]
pub struct CoalescingScheduler {
    pending: Rc<RefCell<HashMap<String, PendingTimer>>>,
    next_token: Cell<u64>,
}

impl CoalescingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule<F, Fut>(&self, key: impl Into<String>, delay: Duration, action: F)
    where
        F: FnOnce() -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        let key = key.into();
        let token = self.next_token.get() + 1;
        self.next_token.set(token);

        if let Some(previous) = self.pending.borrow_mut().remove(&key) {
            previous.handle.abort();
        }

        let pending = Rc::clone(&self.pending);
        let timer_key = key.clone();
        let handle = tokio::task::spawn_local(async move {
            tokio::time::sleep(delay).await;
            let current = {
                let mut map = pending.borrow_mut();
                match map.get(&timer_key) {
                    Some(timer) if timer.token == token => map.remove(&timer_key).is_some(),
                    _ => false,
                }
            };
            if current {
                tracing::trace!(key = %timer_key, "debounced action fired");
                action().await;
            }
        });

        self.pending
            .borrow_mut()
            .insert(key, PendingTimer { token, handle });
    }

    /// Drop the pending timer for `key`. Returns false if none was pending.
    pub fn cancel(&self, key: &str) -> bool {
        match self.pending.borrow_mut().remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        let timers: Vec<PendingTimer> = self.pending.borrow_mut().drain().map(|(_, t)| t).collect();
        for timer in timers {
            timer.handle.abort();
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.borrow().contains_key(key)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.borrow().len()
    }
}

impl Drop for CoalescingScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
