pub mod remote;
pub mod terminal;
pub mod worktree;

pub use remote::{
    rollup_checks_status, ChangedFile, CreatePrRequest, CreatedPr, FileDiff, PrCheck,
    PrChecksResult, PrComment, PrDetails, PrStatus, PrStatusKey, RepoPrStatuses, RepoWithBranches,
};
pub use terminal::{TerminalSession, WorkspaceTerminalState};
pub use worktree::{format_relative_time, watch_signature, DiffStats, RepoInfo, Repository, Workspace};
