//! autopilot core: keeps many git worktrees, their terminal sessions and their pull-request
//! data in sync with what is happening on disk and on the PR host.
//!
//! Everything runs on one thread. Components share state through `Rc` and spawn their
//! timers and loops with `tokio::task::spawn_local`, so callers drive them from a
//! current-thread runtime inside a [`tokio::task::LocalSet`].
//!
//! ```no_run
//! use std::rc::Rc;
//! use autopilot_core::{app::App, backend::LocalBackend, storage::FileSettingsStore};
//!
//! let runtime = tokio::runtime::Builder::new_current_thread()
//!     .enable_all()
//!     .build()
//!     .unwrap();
//! tokio::task::LocalSet::new().block_on(&runtime, async {
//!     let app = App::new(
//!         Rc::new(LocalBackend::new()),
//!         Rc::new(FileSettingsStore::default_location()),
//!     );
//!     app.start().await;
//!     app.shutdown().await;
//! });
//! ```

pub mod app;
pub mod backend;
pub mod check;
pub mod diff;
pub mod error;
pub mod logging;
pub mod model;
pub mod registry;
pub mod remote;
pub mod session;
pub mod state;
pub mod storage;
pub mod store;
pub mod sync;
pub mod watch;

pub use error::{Result, SyncError};
