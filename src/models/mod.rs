//! Core data models for powersample.
//!
//! Epistemic mapping:
//! - K_i (Knowledge): Concrete types with compile-time guarantees
//! - B_i (Beliefs): Wrapped in Result/Option
//! - I^R (Resolvable): Config parameters and per-run overrides
//! - I^B (Bounded): Error variants with fallback strategies

mod config;
mod error;
mod message;
mod run;

pub use config::*;
pub use error::*;
pub use message::*;
pub use run::*;
