//! Remote-derived review data: PR status, checks, details, changed files and diffs.

use serde::{Deserialize, Serialize};

/// PR 状态（按 repo + branch 批量获取）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrStatus {
    pub number: u64,
    pub title: String,
    pub url: String,
    /// "open" / "closed" / "merged"
    pub state: String,
    pub merged: bool,
    pub draft: bool,
    pub review_decision: Option<String>,
    /// "success" / "pending" / "failure"，无 check 时为 None
    pub checks_status: Option<String>,
    pub additions: u64,
    pub deletions: u64,
    pub head_branch: String,
}

/// Batch request entry: every branch of one repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoWithBranches {
    pub repo_path: String,
    pub branches: Vec<String>,
}

/// Batch response entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoPrStatuses {
    pub repo_path: String,
    pub statuses: Vec<PrStatus>,
}

/// Key of the status map.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PrStatusKey {
    pub repo_path: String,
    pub branch: String,
}

impl PrStatusKey {
    pub fn new(repo_path: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            repo_path: repo_path.into(),
            branch: branch.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrCheck {
    pub name: String,
    pub status: String,
    pub conclusion: Option<String>,
    pub url: Option<String>,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrChecksResult {
    pub checks: Vec<PrCheck>,
    pub overall_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrComment {
    pub author: String,
    pub body: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrDetails {
    pub merge_state_status: String,
    pub mergeable: String,
    pub comments: Vec<PrComment>,
    pub review_decision: Option<String>,
}

/// Input of `create_pr`. The head branch is whatever the worktree has checked out.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePrRequest {
    pub title: String,
    pub body: Option<String>,
    /// Target branch; the host's default branch when `None`
    pub base: Option<String>,
    pub draft: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPr {
    pub number: u64,
    pub url: String,
}

/// One entry of a changed-file listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    pub path: String,
    /// "added" / "modified" / "deleted" / "renamed" / "untracked"
    pub status: String,
    pub old_path: Option<String>,
    pub additions: usize,
    pub deletions: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDiff {
    pub path: String,
    pub old_content: Option<String>,
    pub new_content: Option<String>,
    pub patch: String,
}

impl FileDiff {
    pub fn from_patch(path: impl Into<String>, patch: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            old_content: None,
            new_content: None,
            patch: patch.into(),
        }
    }
}

/// Overall status from a list of check states/conclusions: failure beats pending beats
/// success. `None` when there are no checks.
pub fn rollup_checks_status<'a, I>(checks: I) -> Option<String>
where
    I: IntoIterator<Item = (Option<&'a str>, Option<&'a str>)>,
{
    let mut any = false;
    let mut has_failure = false;
    let mut has_pending = false;

    for (conclusion, state) in checks {
        any = true;
        let failed = |s: Option<&str>| matches!(s, Some("FAILURE") | Some("ERROR"));
        if failed(conclusion) || failed(state) {
            has_failure = true;
        }
        if conclusion.is_none() && matches!(state, Some("PENDING") | Some("IN_PROGRESS") | Some("QUEUED")) {
            has_pending = true;
        }
    }

    if !any {
        None
    } else if has_failure {
        Some("failure".to_string())
    } else if has_pending {
        Some("pending".to_string())
    } else {
        Some("success".to_string())
    }
}
