//! PR 详情缓存（checks + details），按 (repo, pr_number) 索引
//!
//! Entries are served while younger than the TTL and are never swept; a stale entry is
//! simply ignored until the next `set` overwrites it.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::model::{PrChecksResult, PrDetails};

/// How long fetched PR checks / details stay valid.
pub const PR_DATA_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrDataCacheEntry {
    pub checks: PrChecksResult,
    pub details: PrDetails,
    pub last_updated_at: Instant,
}

impl PrDataCacheEntry {
    pub fn is_fresh_at(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.last_updated_at) <= ttl
    }
}

#[derive(Debug)]
pub struct PrDataCache {
    ttl: Duration,
    entries: HashMap<(String, u64), PrDataCacheEntry>,
}

impl Default for PrDataCache {
    fn default() -> Self {
        Self::new(PR_DATA_TTL)
    }
}

impl PrDataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// The entry for `(repo_path, pr_number)` if it is still fresh at `now`.
    pub fn get_at(&self, repo_path: &str, pr_number: u64, now: Instant) -> Option<&PrDataCacheEntry> {
        self.entries
            .get(&(repo_path.to_string(), pr_number))
            .filter(|e| e.is_fresh_at(now, self.ttl))
    }

    pub fn set_at(
        &mut self,
        repo_path: &str,
        pr_number: u64,
        checks: PrChecksResult,
        details: PrDetails,
        now: Instant,
    ) {
        self.entries.insert(
            (repo_path.to_string(), pr_number),
            PrDataCacheEntry {
                checks,
                details,
                last_updated_at: now,
            },
        );
    }

    /// Drop every entry of `repo_path`. Returns how many were removed.
    pub fn clear_for_repo(&mut self, repo_path: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(repo, _), _| repo != repo_path);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
