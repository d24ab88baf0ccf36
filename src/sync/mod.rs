//! Timing primitives shared by the watcher and the remote cache.

mod scheduler;

pub use scheduler::{
    CoalescingScheduler, BRANCH_REFRESH_DELAY, FILE_REFRESH_DELAY, WORKTREE_REFRESH_DELAY,
};
