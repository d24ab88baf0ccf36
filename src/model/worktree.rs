use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 文件变更统计（相对默认分支）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub additions: usize,
    pub deletions: usize,
}

impl DiffStats {
    pub fn new(additions: usize, deletions: usize) -> Self {
        Self { additions, deletions }
    }

    pub fn is_clean(&self) -> bool {
        self.additions == 0 && self.deletions == 0
    }

    /// 格式化显示，如 "+5 -2" 或 "clean"
    pub fn display(&self) -> String {
        if self.is_clean() {
            "clean".to_string()
        } else {
            format!("+{} -{}", self.additions, self.deletions)
        }
    }
}

/// 一个 worktree 及其所属仓库。身份是 `worktree_path`。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub repo_path: String,
    /// Worktree 名称（目录名）
    pub name: String,
    pub worktree_path: String,
    /// Detached HEAD 时为 None
    pub branch: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    pub diff_stats: Option<DiffStats>,
}

impl Workspace {
    pub fn new(repo_path: impl Into<String>, worktree_path: impl Into<String>) -> Self {
        let worktree_path = worktree_path.into();
        let name = std::path::Path::new(&worktree_path)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        Self {
            repo_path: repo_path.into(),
            name,
            worktree_path,
            branch: None,
            last_modified: None,
            diff_stats: None,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// 分支名，detached 时显示 "(detached)"
    pub fn branch_label(&self) -> &str {
        self.branch.as_deref().unwrap_or("(detached)")
    }
}

/// `discover_repository` 的结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoInfo {
    pub path: String,
    pub name: String,
}

/// 已注册的仓库及其 worktree 列表
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    pub repo_path: String,
    pub name: String,
    pub worktrees: Vec<Workspace>,
    pub expanded: bool,
}

impl Repository {
    pub fn new(info: RepoInfo, worktrees: Vec<Workspace>) -> Self {
        Self {
            repo_path: info.path,
            name: info.name,
            worktrees,
            expanded: true,
        }
    }

    pub fn find_worktree(&self, worktree_path: &str) -> Option<&Workspace> {
        self.worktrees
            .iter()
            .find(|w| w.worktree_path == worktree_path)
    }

    /// Sorted worktree paths, used to tell a real structural change from a re-render.
    pub fn sorted_worktree_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self
            .worktrees
            .iter()
            .map(|w| w.worktree_path.clone())
            .collect();
        paths.sort();
        paths
    }
}

/// Structural signature of a repository set: `repo:path,path|repo:path`.
/// Branch renames, expand/collapse and reordering leave it unchanged.
pub fn watch_signature(repositories: &[Repository]) -> String {
    let mut parts: Vec<String> = repositories
        .iter()
        .map(|r| format!("{}:{}", r.repo_path, r.sorted_worktree_paths().join(",")))
        .collect();
    parts.sort();
    parts.join("|")
}

/// 格式化相对时间
pub fn format_relative_time(dt: DateTime<Utc>) -> String {
    let now = Utc::now();
    let duration = now.signed_duration_since(dt);

    let seconds = duration.num_seconds();
    if seconds < 60 {
        return "just now".to_string();
    }

    let minutes = duration.num_minutes();
    let hours = duration.num_hours();
    let days = duration.num_days();

    let (value, unit) = if minutes < 60 {
        (minutes, "min")
    } else if hours < 24 {
        (hours, "hour")
    } else if days < 30 {
        (days, "day")
    } else if days < 365 {
        (days / 30, "month")
    } else {
        (days / 365, "year")
    };

    if value == 1 {
        format!("1 {} ago", unit)
    } else {
        format!("{} {}s ago", value, unit)
    }
}
