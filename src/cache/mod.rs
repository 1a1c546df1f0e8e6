//! Persistent build state.
//!
//! Two files live under the workspace state directory: the source cache
//! (per-TU incremental state) and the workspace cache (strategy, identity
//! hashes). The toolchain cache additionally has a per-user global copy.
//! All three are single-writer: only the orchestrator saves them, after
//! each completed phase.

pub mod source_cache;
pub mod toolchain_cache;
pub mod workspace_cache;

pub use source_cache::{SourceCache, Staleness};
pub use toolchain_cache::{ToolchainCache, ToolchainEntry};
pub use workspace_cache::{keys, WorkspaceCache};
