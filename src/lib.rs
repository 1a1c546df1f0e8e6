//! Slipway - a JSON-configured meta build system for C and C++.
//!
//! This crate provides the core build orchestrator: toolchain resolution,
//! build planning, the parallel command pool, incremental caching, the C++
//! module engine and the execution strategies.

pub mod cache;
pub mod compile;
pub mod core;
pub mod error;
pub mod modules;
pub mod ops;
pub mod plan;
pub mod pool;
pub mod strategy;
pub mod toolchain;
pub mod util;

pub use crate::core::{BuildConfiguration, BuildFileLoader, Target, Workspace};
pub use error::BuildError;
pub use toolchain::{resolve_toolchain, ResolvedToolchain, ToolchainFamily, ToolchainPreference};
