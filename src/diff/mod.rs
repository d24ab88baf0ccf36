//! Diff review data: changed-file listings and per-file diffs.

mod loader;

pub use loader::{DiffEntry, DiffLoader};
