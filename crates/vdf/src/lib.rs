//! # Conductor VDF
//!
//! The verifiable-delay engine that advances Conductor's day counter.
//!
//! A day proof demonstrates that `difficulty` sequential BLAKE3
//! applications were performed from a seed that is deterministic in the
//! day number and the genesis seed. This crate provides:
//!
//! - [`VdfEngine`] - `compute` / `verify` / `derive_seed`
//! - [`DifficultyController`] - median-based retargeting
//! - [`TimingReference`] - the memory-resident anomaly-detection clock
//!
//! The engine is CPU-bound and strictly sequential; run it on the
//! dedicated blocking pool so it never starves network tasks.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod difficulty;
pub mod engine;

pub use clock::TimingReference;
pub use difficulty::{adjusted_difficulty, median, DifficultyController, TARGET_SECONDS_PER_DAY};
pub use engine::VdfEngine;

/// Errors raised by the delay engine.
#[derive(Debug, thiserror::Error)]
pub enum VdfError {
    /// The computation was cancelled at a progress boundary.
    #[error("computation cancelled after {completed} iterations")]
    Cancelled {
        /// Iterations completed before the flag was observed.
        completed: u64,
    },
}

/// Result alias for this crate.
pub type Result<T> = std::result::Result<T, VdfError>;
