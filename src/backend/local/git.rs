//! git CLI plumbing: repository discovery, worktrees, changed files and diffs.
//!
//! Everything here blocks; callers run it on the blocking pool.

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;

use chrono::{DateTime, Utc};

use crate::error::{Result, SyncError};
use crate::model::{ChangedFile, DiffStats, FileDiff, RepoInfo, Workspace};

/// Directory (inside the repository) that holds auto-created worktrees.
pub const WORKTREES_DIR: &str = ".worktrees";

const CITY_NAMES: &[&str] = &[
    "tokyo", "paris", "london", "berlin", "sydney", "toronto", "mumbai", "cairo", "rio",
    "seoul", "dublin", "oslo", "vienna", "prague", "lisbon", "athens", "rome", "madrid",
    "amsterdam", "zurich", "stockholm", "helsinki", "warsaw", "budapest", "bangkok",
    "singapore", "jakarta", "hanoi", "taipei", "osaka", "kyoto", "melbourne", "auckland",
    "vancouver", "montreal", "chicago", "boston", "seattle", "denver", "austin", "miami",
    "nairobi", "lagos", "lima", "bogota", "santiago", "quito", "havana", "panama",
];

/// 执行 git 命令，返回 stdout
fn git(dir: &str, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .current_dir(dir)
        .args(args)
        .output()
        .map_err(|e| SyncError::backend(format!("Failed to execute git: {}", e)))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(SyncError::backend(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )))
    }
}

/// Whether `git rev-parse --verify` resolves `reference`.
fn ref_exists(dir: &str, reference: &str) -> bool {
    Command::new("git")
        .current_dir(dir)
        .args(["rev-parse", "--verify", "--quiet", reference])
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// 仓库根目录 + 目录名
/// 执行: git rev-parse --show-toplevel
pub fn discover_repository(path: &str) -> Result<RepoInfo> {
    if !Path::new(path).is_dir() {
        return Err(SyncError::not_found(format!("{} is not a directory", path)));
    }
    let root = git(path, &["rev-parse", "--show-toplevel"])?.trim().to_string();
    let name = Path::new(&root)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown")
        .to_string();
    Ok(RepoInfo { path: root, name })
}

/// One block of `git worktree list --porcelain`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: String,
    pub branch: Option<String>,
    pub bare: bool,
}

pub fn parse_worktree_list(output: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut current: Option<WorktreeEntry> = None;

    for line in output.lines() {
        if let Some(path) = line.strip_prefix("worktree ") {
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(WorktreeEntry {
                path: path.to_string(),
                branch: None,
                bare: false,
            });
        } else if let Some(entry) = current.as_mut() {
            if let Some(reference) = line.strip_prefix("branch ") {
                entry.branch = Some(
                    reference
                        .strip_prefix("refs/heads/")
                        .unwrap_or(reference)
                        .to_string(),
                );
            } else if line == "bare" {
                entry.bare = true;
            }
        }
    }
    if let Some(entry) = current {
        entries.push(entry);
    }
    entries
}

fn last_modified(path: &str) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// 列出仓库的所有 worktree，主工作区在前
/// 执行: git worktree list --porcelain
pub fn list_worktrees(repo_path: &str) -> Result<Vec<Workspace>> {
    let output = git(repo_path, &["worktree", "list", "--porcelain"])?;
    let entries = parse_worktree_list(&output);

    let mut result = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().filter(|e| !e.bare).enumerate() {
        let mut ws = Workspace::new(repo_path, entry.path.clone());
        ws.branch = entry.branch;
        ws.last_modified = last_modified(&entry.path);
        if index == 0 {
            ws.name = "main".to_string();
        } else {
            ws.diff_stats = diff_stats_vs_default(&entry.path);
        }
        result.push(ws);
    }
    Ok(result)
}

/// 获取当前分支名，detached HEAD 时为 None
/// 执行: git rev-parse --abbrev-ref HEAD
pub fn branch_name(worktree_path: &str) -> Option<String> {
    let branch = git(worktree_path, &["rev-parse", "--abbrev-ref", "HEAD"]).ok()?;
    let branch = branch.trim();
    if branch.is_empty() || branch == "HEAD" {
        None
    } else {
        Some(branch.to_string())
    }
}

/// origin/main, then origin/master
pub fn default_base(dir: &str) -> Result<String> {
    ["origin/main", "origin/master"]
        .into_iter()
        .find(|r| ref_exists(dir, &format!("refs/remotes/{}", r)))
        .map(str::to_string)
        .ok_or_else(|| SyncError::backend("Cannot find origin/main or origin/master"))
}

fn diff_stats_vs_default(worktree_path: &str) -> Option<DiffStats> {
    let base = default_base(worktree_path).ok()?;
    let numstat = git(worktree_path, &["diff", "--numstat", "--no-renames", &base, "HEAD"]).ok()?;
    let (additions, deletions) = parse_numstat(&numstat)
        .values()
        .fold((0, 0), |(a, d), (fa, fd)| (a + fa, d + fd));
    Some(DiffStats::new(additions, deletions))
}

fn generate_worktree_name(repo_path: &str) -> Result<String> {
    for _ in 0..100 {
        let seed = uuid::Uuid::new_v4().as_u128();
        let city = CITY_NAMES[(seed % CITY_NAMES.len() as u128) as usize];
        let num = 100 + ((seed >> 64) % 900) as u32;
        let name = format!("{}-{}", num, city);
        if !ref_exists(repo_path, &format!("refs/heads/{}", name)) {
            return Ok(name);
        }
    }
    Err(SyncError::backend("Could not generate unique worktree name"))
}

/// 以默认分支为基创建新 worktree: {repo}/.worktrees/{name}，分支同名
/// 执行: git worktree add -b {name} {path} {base}
pub fn create_worktree_auto(repo_path: &str) -> Result<Workspace> {
    let _ = git(repo_path, &["worktree", "prune"]);

    let name = generate_worktree_name(repo_path)?;
    let base = default_base(repo_path)?;
    let dir = Path::new(repo_path).join(WORKTREES_DIR);
    std::fs::create_dir_all(&dir)?;
    let wt_path = dir.join(&name);
    let wt_path_str = wt_path.to_string_lossy().into_owned();

    git(
        repo_path,
        &["worktree", "add", "-b", &name, &wt_path_str, &base],
    )?;

    let mut ws = Workspace::new(repo_path, wt_path_str.clone()).with_branch(name.clone());
    ws.name = name;
    ws.last_modified = last_modified(&wt_path_str);
    ws.diff_stats = diff_stats_vs_default(&wt_path_str);
    Ok(ws)
}

/// 删除 worktree（按名字查找路径）
/// 执行: git worktree remove [--force] {path}
pub fn delete_worktree(repo_path: &str, worktree_name: &str, force: bool) -> Result<()> {
    let target = list_worktrees(repo_path)?
        .into_iter()
        .skip(1)
        .find(|w| w.name == worktree_name)
        .ok_or_else(|| SyncError::not_found(format!("worktree {}", worktree_name)))?;

    let mut args = vec!["worktree", "remove"];
    if force {
        args.push("--force");
    }
    args.push(&target.worktree_path);
    git(repo_path, &args)?;

    let _ = git(repo_path, &["worktree", "prune"]);
    Ok(())
}

/// `git diff --numstat` → path → (additions, deletions). Binary files count as 0.
pub fn parse_numstat(output: &str) -> HashMap<String, (usize, usize)> {
    output
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, '\t');
            let additions = parts.next()?.parse().unwrap_or(0);
            let deletions = parts.next()?.parse().unwrap_or(0);
            let path = parts.next()?;
            Some((path.to_string(), (additions, deletions)))
        })
        .collect()
}

/// `git diff --name-status --no-renames` → changed files without line counts.
pub fn parse_name_status(output: &str) -> Vec<ChangedFile> {
    output
        .lines()
        .filter_map(|line| {
            let (code, path) = line.split_once('\t')?;
            let status = match code.chars().next()? {
                'A' => "added",
                'D' => "deleted",
                'M' | 'T' => "modified",
                'R' => "renamed",
                'C' => "copied",
                _ => "unknown",
            };
            Some(ChangedFile {
                path: path.to_string(),
                status: status.to_string(),
                old_path: None,
                additions: 0,
                deletions: 0,
            })
        })
        .collect()
}

fn with_counts(mut files: Vec<ChangedFile>, numstat: &str) -> Vec<ChangedFile> {
    let counts = parse_numstat(numstat);
    for file in &mut files {
        if let Some((additions, deletions)) = counts.get(&file.path) {
            file.additions = *additions;
            file.deletions = *deletions;
        }
    }
    files
}

fn merge_base(worktree_path: &str) -> Result<String> {
    let base = default_base(worktree_path)?;
    Ok(git(worktree_path, &["merge-base", &base, "HEAD"])?.trim().to_string())
}

/// Files changed on this branch since it left the default branch.
pub fn changed_files(worktree_path: &str) -> Result<Vec<ChangedFile>> {
    let base = merge_base(worktree_path)?;
    let names = git(worktree_path, &["diff", "--name-status", "--no-renames", &base, "HEAD"])?;
    let numstat = git(worktree_path, &["diff", "--numstat", "--no-renames", &base, "HEAD"])?;
    Ok(with_counts(parse_name_status(&names), &numstat))
}

/// Staged, unstaged and untracked changes relative to HEAD.
pub fn uncommitted_files(worktree_path: &str) -> Result<Vec<ChangedFile>> {
    let names = git(worktree_path, &["diff", "--name-status", "--no-renames", "HEAD"])?;
    let numstat = git(worktree_path, &["diff", "--numstat", "--no-renames", "HEAD"])?;
    let mut files = with_counts(parse_name_status(&names), &numstat);

    let untracked = git(worktree_path, &["ls-files", "--others", "--exclude-standard"])?;
    for path in untracked.lines().filter(|l| !l.is_empty()) {
        let additions = std::fs::read_to_string(Path::new(worktree_path).join(path))
            .map(|c| c.lines().count())
            .unwrap_or(0);
        files.push(ChangedFile {
            path: path.to_string(),
            status: "untracked".to_string(),
            old_path: None,
            additions,
            deletions: 0,
        });
    }
    Ok(files)
}

fn show(worktree_path: &str, rev: &str, file_path: &str) -> Option<String> {
    git(worktree_path, &["show", &format!("{}:{}", rev, file_path)]).ok()
}

pub fn file_diff(worktree_path: &str, file_path: &str) -> Result<FileDiff> {
    let base = merge_base(worktree_path)?;
    let patch = git(worktree_path, &["diff", "--no-renames", &base, "HEAD", "--", file_path])?;
    Ok(FileDiff {
        path: file_path.to_string(),
        old_content: show(worktree_path, &base, file_path),
        new_content: show(worktree_path, "HEAD", file_path),
        patch,
    })
}

pub fn uncommitted_diff(worktree_path: &str, file_path: &str) -> Result<FileDiff> {
    let old_content = show(worktree_path, "HEAD", file_path);
    let new_content = std::fs::read_to_string(Path::new(worktree_path).join(file_path)).ok();
    let mut patch = git(worktree_path, &["diff", "HEAD", "--", file_path])?;

    // untracked files never show up in `git diff`
    if patch.is_empty() && old_content.is_none() {
        if let Some(content) = &new_content {
            patch = synthetic_patch(content);
        }
    }

    Ok(FileDiff {
        path: file_path.to_string(),
        old_content,
        new_content,
        patch,
    })
}

/// All-additions hunk for a file git does not track yet.
pub fn synthetic_patch(content: &str) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let mut patch = format!("@@ -0,0 +1,{} @@\n", lines.len());
    for line in lines {
        patch.push('+');
        patch.push_str(line);
        patch.push('\n');
    }
    patch
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_worktree_list() {
        let output = "worktree /src/app\nHEAD 1111\nbranch refs/heads/main\n\n\
                      worktree /src/app/.worktrees/123-oslo\nHEAD 2222\nbranch refs/heads/123-oslo\n\n\
                      worktree /src/app/.worktrees/detached\nHEAD 3333\ndetached\n";
        let entries = parse_worktree_list(output);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].branch.as_deref(), Some("main"));
        assert_eq!(entries[1].path, "/src/app/.worktrees/123-oslo");
        assert_eq!(entries[1].branch.as_deref(), Some("123-oslo"));
        assert_eq!(entries[2].branch, None);
    }

    #[test]
    fn test_parse_worktree_list_bare() {
        let entries = parse_worktree_list("worktree /srv/repo.git\nbare\n");
        assert!(entries[0].bare);
    }

    #[test]
    fn test_parse_numstat() {
        let counts = parse_numstat("3\t1\tsrc/lib.rs\n-\t-\tlogo.png\n10\t0\tREADME.md\n");
        assert_eq!(counts.get("src/lib.rs"), Some(&(3, 1)));
        assert_eq!(counts.get("logo.png"), Some(&(0, 0)));
        assert_eq!(counts.len(), 3);
    }

    #[test]
    fn test_parse_name_status_with_counts() {
        let files = with_counts(
            parse_name_status("M\tsrc/lib.rs\nA\tnew.rs\nD\told.rs\n"),
            "3\t1\tsrc/lib.rs\n5\t0\tnew.rs\n0\t7\told.rs\n",
        );
        let summary: Vec<(&str, &str, usize, usize)> = files
            .iter()
            .map(|f| (f.path.as_str(), f.status.as_str(), f.additions, f.deletions))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("src/lib.rs", "modified", 3, 1),
                ("new.rs", "added", 5, 0),
                ("old.rs", "deleted", 0, 7),
            ]
        );
    }

    #[test]
    fn test_synthetic_patch() {
        assert_eq!(synthetic_patch("a\nb\n"), "@@ -0,0 +1,2 @@\n+a\n+b\n");
    }

    #[test]
    fn test_discover_missing_directory() {
        let err = discover_repository("/definitely/not/here").unwrap_err();
        assert!(matches!(err, SyncError::NotFound(_)));
    }
}
