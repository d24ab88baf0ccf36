//! File system watches per repository.
//!
//! Maps raw notify events onto push events:
//! - `HEAD` of a worktree's gitdir → `GitHeadChanged`
//! - `index` of a worktree's gitdir → `GitIndexChanged`
//! - anything under `<repo>/.git/worktrees` → `WorktreeChanged`
//! - working-tree files (outside `.git` / `.worktrees`) → `FileChanged`

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::backend::BackendEvent;
use crate::error::{Result, SyncError};

use super::git::WORKTREES_DIR;

const POLL_INTERVAL: Duration = Duration::from_millis(500);

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

/// Resolve the gitdir of a worktree: `.git` is a directory for the main worktree and a
/// `gitdir: <path>` file for linked ones.
fn resolve_gitdir(worktree_path: &Path) -> Option<PathBuf> {
    let dot_git = worktree_path.join(".git");
    if dot_git.is_dir() {
        return Some(dot_git);
    }
    let content = std::fs::read_to_string(&dot_git).ok()?;
    let gitdir = PathBuf::from(content.strip_prefix("gitdir:")?.trim());
    Some(if gitdir.is_absolute() {
        gitdir
    } else {
        worktree_path.join(gitdir)
    })
}

/// Routing table for one repository's watcher.
#[derive(Debug, Default)]
pub struct WatchMap {
    repo_path: String,
    heads: HashMap<PathBuf, String>,
    indexes: HashMap<PathBuf, String>,
    gitdirs: Vec<PathBuf>,
    worktrees_dir: Option<PathBuf>,
    /// canonical worktree root → worktree path as the caller named it
    roots: Vec<(PathBuf, String)>,
}

impl WatchMap {
    pub fn build(repo_path: &str, worktree_paths: &[String]) -> Self {
        let mut map = WatchMap {
            repo_path: repo_path.to_string(),
            ..Default::default()
        };

        let worktrees_dir = Path::new(repo_path).join(".git").join("worktrees");
        if worktrees_dir.exists() {
            map.worktrees_dir = Some(canonical(&worktrees_dir));
        }

        for wt_path in worktree_paths {
            let root = Path::new(wt_path);
            if root.is_dir() {
                map.roots.push((canonical(root), wt_path.clone()));
            }
            let Some(gitdir) = resolve_gitdir(root) else {
                debug!(worktree = %wt_path, "no gitdir, skipping");
                continue;
            };
            map.heads.insert(canonical(&gitdir.join("HEAD")), wt_path.clone());
            map.indexes.insert(canonical(&gitdir.join("index")), wt_path.clone());
            let gitdir = canonical(&gitdir);
            if gitdir.exists() {
                map.gitdirs.push(gitdir);
            }
        }
        map
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty() && self.worktrees_dir.is_none() && self.roots.is_empty()
    }

    /// Paths to register. Nested targets already covered by a recursive one are skipped.
    pub fn targets(&self) -> Vec<(PathBuf, RecursiveMode)> {
        let mut recursive: Vec<PathBuf> = self.roots.iter().map(|(p, _)| p.clone()).collect();
        recursive.extend(self.worktrees_dir.iter().cloned());

        let mut targets: Vec<(PathBuf, RecursiveMode)> = Vec::new();
        for path in recursive {
            if !targets.iter().any(|(t, _)| path.starts_with(t)) {
                targets.push((path, RecursiveMode::Recursive));
            }
        }
        for gitdir in &self.gitdirs {
            if !targets.iter().any(|(t, _)| gitdir.starts_with(t)) {
                targets.push((gitdir.clone(), RecursiveMode::NonRecursive));
            }
        }
        targets
    }

    fn lookup<'a>(table: &'a HashMap<PathBuf, String>, path: &Path) -> Option<&'a String> {
        table.get(&canonical(path)).or_else(|| table.get(path))
    }

    pub fn events_for(&self, kind: &EventKind, paths: &[PathBuf]) -> Vec<BackendEvent> {
        let changed = matches!(
            kind,
            EventKind::Create(_)
                | EventKind::Modify(ModifyKind::Data(_))
                | EventKind::Modify(ModifyKind::Name(_))
                | EventKind::Modify(ModifyKind::Any)
        );
        let removed = matches!(kind, EventKind::Remove(_));
        if !changed && !removed {
            return Vec::new();
        }

        let mut events = Vec::new();
        let mut push = |event: BackendEvent| {
            if !events.contains(&event) {
                events.push(event);
            }
        };

        for path in paths {
            let file_name = path.file_name().and_then(|n| n.to_str());
            if changed && file_name == Some("HEAD") {
                if let Some(wt) = Self::lookup(&self.heads, path) {
                    push(BackendEvent::GitHeadChanged {
                        repo_path: self.repo_path.clone(),
                        worktree_path: wt.clone(),
                    });
                }
            }
            if changed && file_name == Some("index") {
                if let Some(wt) = Self::lookup(&self.indexes, path) {
                    push(BackendEvent::GitIndexChanged {
                        worktree_path: wt.clone(),
                    });
                }
            }
            if let Some(dir) = &self.worktrees_dir {
                if path.starts_with(dir) {
                    push(BackendEvent::WorktreeChanged {
                        repo_path: self.repo_path.clone(),
                    });
                }
            }
            for (root, wt) in &self.roots {
                let Ok(relative) = path.strip_prefix(root) else {
                    continue;
                };
                let internal = relative.components().any(|c| {
                    matches!(c, Component::Normal(name) if name == ".git" || name == WORKTREES_DIR)
                });
                if !internal && relative.components().next().is_some() {
                    push(BackendEvent::FileChanged {
                        worktree_path: wt.clone(),
                    });
                }
            }
        }
        events
    }
}

/// One notify watcher per repository; re-registering a repository replaces its watcher.
pub struct GitWatcher {
    watchers: Mutex<HashMap<String, RecommendedWatcher>>,
    events: broadcast::Sender<BackendEvent>,
}

impl GitWatcher {
    pub fn new(events: broadcast::Sender<BackendEvent>) -> Self {
        Self {
            watchers: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn watch_repository(&self, repo_path: &str, worktree_paths: &[String]) -> Result<()> {
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        watchers.remove(repo_path);

        let map = WatchMap::build(repo_path, worktree_paths);
        if map.is_empty() {
            return Ok(());
        }
        let targets = map.targets();

        let events = self.events.clone();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for e in map.events_for(&event.kind, &event.paths) {
                        // no receivers is fine
                        let _ = events.send(e);
                    }
                }
                Err(e) => warn!("watch error: {}", e),
            },
            Config::default().with_poll_interval(POLL_INTERVAL),
        )
        .map_err(|e| SyncError::backend(format!("Failed to create watcher: {}", e)))?;

        for (path, mode) in targets {
            if let Err(e) = watcher.watch(&path, mode) {
                warn!(path = %path.display(), "failed to watch: {}", e);
            }
        }

        debug!(repo = %repo_path, worktrees = worktree_paths.len(), "watching repository");
        watchers.insert(repo_path.to_string(), watcher);
        Ok(())
    }

    /// Drop the watcher of one repository. Returns whether one was registered.
    pub fn unwatch_repository(&self, repo_path: &str) -> bool {
        let removed = self
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(repo_path)
            .is_some();
        if removed {
            debug!(repo = %repo_path, "stopped watching repository");
        }
        removed
    }

    pub fn unwatch_all(&self) {
        let mut watchers = self.watchers.lock().unwrap_or_else(PoisonError::into_inner);
        debug!(count = watchers.len(), "stopping all watchers");
        watchers.clear();
    }

    pub fn watched_count(&self) -> usize {
        self.watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, RemoveKind};
    use std::fs;

    struct Layout {
        _tmp: tempfile::TempDir,
        repo: PathBuf,
        linked: PathBuf,
    }

    /// repo/.git (main) + linked worktree "feat" whose gitdir lives in repo/.git/worktrees/feat
    fn layout() -> Layout {
        let tmp = tempfile::tempdir().unwrap();
        let base = tmp.path().canonicalize().unwrap();
        let repo = base.join("repo");
        let linked = base.join("feat");
        let linked_gitdir = repo.join(".git").join("worktrees").join("feat");

        fs::create_dir_all(&linked_gitdir).unwrap();
        fs::create_dir_all(&linked).unwrap();
        fs::write(repo.join(".git").join("HEAD"), "ref: refs/heads/main\n").unwrap();
        fs::write(repo.join(".git").join("index"), "").unwrap();
        fs::write(linked_gitdir.join("HEAD"), "ref: refs/heads/feat\n").unwrap();
        fs::write(linked_gitdir.join("index"), "").unwrap();
        fs::write(
            linked.join(".git"),
            format!("gitdir: {}\n", linked_gitdir.display()),
        )
        .unwrap();

        Layout {
            _tmp: tmp,
            repo,
            linked,
        }
    }

    fn map(l: &Layout) -> WatchMap {
        WatchMap::build(
            &l.repo.to_string_lossy(),
            &[
                l.repo.to_string_lossy().into_owned(),
                l.linked.to_string_lossy().into_owned(),
            ],
        )
    }

    fn modify() -> EventKind {
        EventKind::Modify(ModifyKind::Data(DataChange::Content))
    }

    #[test]
    fn test_head_change_in_linked_worktree() {
        let l = layout();
        let map = map(&l);
        let head = l.repo.join(".git/worktrees/feat/HEAD");

        let events = map.events_for(&modify(), &[head]);
        assert!(events.contains(&BackendEvent::GitHeadChanged {
            repo_path: l.repo.to_string_lossy().into_owned(),
            worktree_path: l.linked.to_string_lossy().into_owned(),
        }));
    }

    #[test]
    fn test_main_index_is_not_a_file_change() {
        let l = layout();
        let map = map(&l);

        let events = map.events_for(&modify(), &[l.repo.join(".git/index")]);
        assert_eq!(
            events,
            vec![BackendEvent::GitIndexChanged {
                worktree_path: l.repo.to_string_lossy().into_owned(),
            }]
        );
    }

    #[test]
    fn test_worktree_removed() {
        let l = layout();
        let map = map(&l);

        let events = map.events_for(
            &EventKind::Remove(RemoveKind::Folder),
            &[l.repo.join(".git/worktrees/gone")],
        );
        assert_eq!(
            events,
            vec![BackendEvent::WorktreeChanged {
                repo_path: l.repo.to_string_lossy().into_owned(),
            }]
        );
    }

    #[test]
    fn test_working_tree_file() {
        let l = layout();
        let map = map(&l);

        let events = map.events_for(
            &EventKind::Create(CreateKind::File),
            &[l.linked.join("src/lib.rs"), l.linked.join("README.md")],
        );
        assert_eq!(
            events,
            vec![BackendEvent::FileChanged {
                worktree_path: l.linked.to_string_lossy().into_owned(),
            }]
        );
    }

    #[test]
    fn test_nested_worktrees_dir_is_ignored_for_main() {
        let l = layout();
        let map = map(&l);

        let events = map.events_for(&modify(), &[l.repo.join(".worktrees/x/a.rs")]);
        assert!(events.is_empty());
    }

    #[test]
    fn test_access_events_ignored() {
        let l = layout();
        let map = map(&l);

        let events = map.events_for(
            &EventKind::Access(AccessKind::Any),
            &[l.repo.join(".git/HEAD")],
        );
        assert!(events.is_empty());
    }

    #[test]
    fn test_targets_skip_covered_paths() {
        let l = layout();
        let targets = map(&l).targets();
        let paths: Vec<&PathBuf> = targets.iter().map(|(p, _)| p).collect();

        // repo root covers .git and .git/worktrees; the linked gitdir lives under it too
        assert_eq!(paths, vec![&l.repo, &l.linked]);
    }

    #[test]
    fn test_unwatch_single_repository() {
        let l = layout();
        let (tx, _rx) = broadcast::channel(16);
        let watcher = GitWatcher::new(tx);
        let repo = l.repo.to_string_lossy().into_owned();
        let linked = l.linked.to_string_lossy().into_owned();

        watcher
            .watch_repository(&repo, &[repo.clone(), linked])
            .unwrap();
        assert_eq!(watcher.watched_count(), 1);

        assert!(watcher.unwatch_repository(&repo));
        assert_eq!(watcher.watched_count(), 0);
        assert!(!watcher.unwatch_repository(&repo));
    }
}
