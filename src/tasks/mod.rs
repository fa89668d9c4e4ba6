//! Background Tasks Module
//!
//! Detached tasks that run alongside foreground calls.
//!
//! # Tasks
//! - Cache sweeper: removes expired entries at a configured interval
//! - Background refresh: revalidates an aging cache entry without blocking the caller

mod cleanup;
mod refresh;

pub use cleanup::spawn_cleanup_task;
pub use refresh::{refresh, spawn_refresh, RefreshJob, RefreshOutcome};
