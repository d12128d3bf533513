//! mt-core: Shared types, errors, and configuration for the MT-32 DSP core
//!
//! This crate provides the foundational types used by the signal-path crates.

mod config;
mod error;
mod sample;

pub use config::*;
pub use error::*;
pub use sample::*;

/// Native output rate of the MT-32
pub const SAMPLE_RATE: u32 = 32000;

/// Default upper bound on frames rendered per call
pub const MAX_SAMPLES_PER_RUN: usize = 4096;
