//! GitHub CLI (`gh`) queries: PR status per branch, checks and details, and PR creation.

use std::process::Command;

use serde::Deserialize;
use tracing::debug;

use crate::error::{Result, SyncError};
use crate::model::{
    rollup_checks_status, CreatePrRequest, CreatedPr, PrCheck, PrChecksResult, PrComment,
    PrDetails, PrStatus, RepoPrStatuses, RepoWithBranches,
};

const PR_JSON_FIELDS: &str = "number,title,url,state,isDraft,mergedAt,reviewDecision,statusCheckRollup,additions,deletions,headRefName";
const CHECK_JSON_FIELDS: &str = "name,state,description,link,startedAt,completedAt";
const DETAIL_JSON_FIELDS: &str = "mergeStateStatus,mergeable,comments,reviewDecision";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhStatusCheck {
    #[serde(default)]
    conclusion: Option<String>,
    #[serde(default)]
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPr {
    number: u64,
    title: String,
    url: String,
    state: String,
    #[serde(default)]
    is_draft: bool,
    #[serde(default)]
    merged_at: Option<String>,
    #[serde(default)]
    review_decision: Option<String>,
    #[serde(default)]
    status_check_rollup: Vec<GhStatusCheck>,
    #[serde(default)]
    additions: u64,
    #[serde(default)]
    deletions: u64,
    head_ref_name: String,
}

impl From<GhPr> for PrStatus {
    fn from(pr: GhPr) -> Self {
        let checks_status = rollup_checks_status(
            pr.status_check_rollup
                .iter()
                .map(|c| (c.conclusion.as_deref(), c.state.as_deref())),
        );
        PrStatus {
            number: pr.number,
            title: pr.title,
            url: pr.url,
            state: pr.state.to_lowercase(),
            merged: pr.merged_at.is_some(),
            draft: pr.is_draft,
            review_decision: pr.review_decision.filter(|s| !s.is_empty()),
            checks_status,
            additions: pr.additions,
            deletions: pr.deletions,
            head_branch: pr.head_ref_name,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhCheckRun {
    name: String,
    state: String,
    #[serde(default)]
    link: Option<String>,
    #[serde(default)]
    started_at: Option<String>,
    #[serde(default)]
    completed_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GhAuthor {
    login: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhComment {
    author: GhAuthor,
    body: String,
    created_at: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPrView {
    #[serde(default)]
    merge_state_status: String,
    #[serde(default)]
    mergeable: String,
    #[serde(default)]
    comments: Vec<GhComment>,
    #[serde(default)]
    review_decision: Option<String>,
}

/// 执行 gh 命令，返回 stdout；失败时带上 stderr
fn gh(dir: &str, args: &[&str]) -> Result<String> {
    let output = Command::new("gh")
        .current_dir(dir)
        .args(args)
        .output()
        .map_err(|e| SyncError::backend(format!("Failed to run gh: {}", e)))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        Err(SyncError::backend(format!(
            "gh {} failed: {}",
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

/// `gh --version` succeeds
pub fn check_gh_cli() -> bool {
    Command::new("gh")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Most recent PR (any state) in a `gh pr list --json` array.
pub fn parse_pr_list(json: &str) -> Result<Option<PrStatus>> {
    let prs: Vec<GhPr> = serde_json::from_str(json)?;
    Ok(prs.into_iter().next().map(PrStatus::from))
}

/// One repository, one `gh pr list` per branch. A branch whose query fails is skipped.
pub fn prs_for_repo(repo: &RepoWithBranches) -> RepoPrStatuses {
    let mut statuses = Vec::new();
    for branch in &repo.branches {
        let result = gh(
            &repo.repo_path,
            &[
                "pr", "list", "--head", branch, "--state", "all", "--limit", "1", "--json",
                PR_JSON_FIELDS,
            ],
        )
        .and_then(|out| parse_pr_list(&out));

        match result {
            Ok(Some(status)) => statuses.push(status),
            Ok(None) => {}
            Err(e) => debug!(repo = %repo.repo_path, branch = %branch, "pr lookup failed: {}", e),
        }
    }
    RepoPrStatuses {
        repo_path: repo.repo_path.clone(),
        statuses,
    }
}

pub fn prs_for_repos(repos: &[RepoWithBranches]) -> Vec<RepoPrStatuses> {
    repos.iter().map(prs_for_repo).collect()
}

fn no_checks() -> PrChecksResult {
    PrChecksResult {
        checks: Vec::new(),
        overall_status: "none".to_string(),
    }
}

pub fn parse_checks(json: &str) -> Result<PrChecksResult> {
    let runs: Vec<GhCheckRun> = serde_json::from_str(json)?;

    let checks: Vec<PrCheck> = runs
        .into_iter()
        .map(|run| {
            let conclusion = match run.state.as_str() {
                "SUCCESS" => Some("success".to_string()),
                "FAILURE" | "ERROR" => Some("failure".to_string()),
                "CANCELLED" => Some("cancelled".to_string()),
                _ => None,
            };
            let status = if conclusion.is_some() {
                "completed"
            } else {
                "in_progress"
            };
            PrCheck {
                name: run.name,
                status: status.to_string(),
                conclusion,
                url: run.link,
                started_at: run.started_at,
                completed_at: run.completed_at,
            }
        })
        .collect();

    let overall_status = if checks.is_empty() {
        "none"
    } else if checks.iter().any(|c| c.conclusion.as_deref() == Some("failure")) {
        "failure"
    } else if checks.iter().any(|c| c.conclusion.is_none()) {
        "pending"
    } else {
        "success"
    };

    Ok(PrChecksResult {
        checks,
        overall_status: overall_status.to_string(),
    })
}

pub fn pr_checks(repo_path: &str, pr_number: u64) -> Result<PrChecksResult> {
    let number = pr_number.to_string();
    match gh(repo_path, &["pr", "checks", &number, "--json", CHECK_JSON_FIELDS]) {
        Ok(out) => parse_checks(&out),
        // gh exits non-zero when a PR has no checks at all
        Err(SyncError::Backend(msg)) if msg.contains("no checks") => Ok(no_checks()),
        Err(e) => Err(e),
    }
}

pub fn parse_details(json: &str) -> Result<PrDetails> {
    let view: GhPrView = serde_json::from_str(json)?;
    Ok(PrDetails {
        merge_state_status: view.merge_state_status,
        mergeable: view.mergeable,
        comments: view
            .comments
            .into_iter()
            .map(|c| PrComment {
                author: c.author.login,
                body: c.body,
                created_at: c.created_at,
            })
            .collect(),
        review_decision: view.review_decision.filter(|s| !s.is_empty()),
    })
}

pub fn pr_details(repo_path: &str, pr_number: u64) -> Result<PrDetails> {
    let number = pr_number.to_string();
    let out = gh(repo_path, &["pr", "view", &number, "--json", DETAIL_JSON_FIELDS])?;
    parse_details(&out)
}

fn pr_create_args(request: &CreatePrRequest) -> Vec<String> {
    let mut args = vec![
        "pr".to_string(),
        "create".to_string(),
        "--title".to_string(),
        request.title.clone(),
        // gh prompts for a body unless one is given
        "--body".to_string(),
        request.body.clone().unwrap_or_default(),
    ];
    if let Some(base) = request.base.as_deref().filter(|b| !b.is_empty()) {
        args.push("--base".to_string());
        args.push(base.to_string());
    }
    if request.draft {
        args.push("--draft".to_string());
    }
    args
}

/// `gh pr create` prints the PR url; the number is its last segment.
pub fn parse_created_pr(stdout: &str) -> Result<CreatedPr> {
    let url = stdout
        .lines()
        .map(str::trim)
        .rfind(|l| l.starts_with("http"))
        .ok_or_else(|| SyncError::backend(format!("unexpected gh pr create output: {}", stdout.trim())))?;
    let number = url
        .rsplit('/')
        .next()
        .and_then(|n| n.parse::<u64>().ok())
        .ok_or_else(|| SyncError::backend(format!("no PR number in {}", url)))?;
    Ok(CreatedPr {
        number,
        url: url.to_string(),
    })
}

/// Open a PR for the branch checked out in `worktree_path`.
pub fn create_pr(worktree_path: &str, request: &CreatePrRequest) -> Result<CreatedPr> {
    let args = pr_create_args(request);
    let args: Vec<&str> = args.iter().map(String::as_str).collect();
    let out = gh(worktree_path, &args)?;
    let created = parse_created_pr(&out)?;
    debug!(worktree = %worktree_path, number = created.number, "PR created");
    Ok(created)
}
