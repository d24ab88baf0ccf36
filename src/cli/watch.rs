//! `autopilot watch`: the core without a UI, logging what changes

use std::cell::RefCell;
use std::collections::BTreeMap;

use tracing::{info, warn};

use autopilot_core::state::AppState;

use super::local_app;

/// worktree path → branch label
fn branches(state: &AppState) -> BTreeMap<String, String> {
    state
        .repositories
        .iter()
        .flat_map(|r| r.worktrees.iter())
        .map(|w| (w.worktree_path.clone(), w.branch_label().to_string()))
        .collect()
}

#[derive(Debug, PartialEq, Eq)]
enum WorktreeChange<'a> {
    Appeared { path: &'a str, branch: &'a str },
    BranchChanged { path: &'a str, from: &'a str, to: &'a str },
    Removed { path: &'a str },
}

fn diff_branches<'a>(
    before: &'a BTreeMap<String, String>,
    after: &'a BTreeMap<String, String>,
) -> Vec<WorktreeChange<'a>> {
    let mut changes = Vec::new();
    for (path, branch) in after {
        match before.get(path) {
            None => changes.push(WorktreeChange::Appeared { path, branch }),
            Some(old) if old != branch => changes.push(WorktreeChange::BranchChanged {
                path,
                from: old,
                to: branch,
            }),
            Some(_) => {}
        }
    }
    for path in before.keys().filter(|p| !after.contains_key(*p)) {
        changes.push(WorktreeChange::Removed { path });
    }
    changes
}

fn log_changes(before: &BTreeMap<String, String>, after: &BTreeMap<String, String>) {
    for change in diff_branches(before, after) {
        match change {
            WorktreeChange::Appeared { path, branch } => {
                info!(worktree = %path, branch = %branch, "worktree appeared")
            }
            WorktreeChange::BranchChanged { path, from, to } => {
                info!(worktree = %path, from = %from, to = %to, "branch changed")
            }
            WorktreeChange::Removed { path } => info!(worktree = %path, "worktree removed"),
        }
    }
}

pub async fn execute() {
    let app = local_app();
    let restored = app.start().await;
    if restored == 0 {
        warn!("no repositories registered; add one with `autopilot add <path>`");
    }

    let seen = RefCell::new(branches(&app.store().snapshot()));
    let store_listener = app.store().subscribe(move |state| {
        let current = branches(state);
        let mut seen = seen.borrow_mut();
        if *seen != current {
            log_changes(&seen, &current);
            *seen = current;
        }
    });
    let status_listener = app.remote().subscribe_statuses(|statuses| {
        info!(count = statuses.len(), "pull-request status updated");
    });

    info!("watching, press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl-C: {}", e);
    }

    app.store().unsubscribe(store_listener);
    app.remote().unsubscribe_statuses(status_listener);
    app.shutdown().await;
}
