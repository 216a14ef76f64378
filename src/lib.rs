//! powersample - Inference-time reasoning amplification over a chat-completion backend.
//!
//! ## Architecture
//!
//! One prompt, one run, one of four pipelines:
//! - **multi-sample**: k candidates in one batched request, a judge picks one
//! - **annotate**: one draft, weak spans marked then rewritten
//! - **full**: consensus seed, then blockwise continue + repair rounds
//! - **mcmc**: the same rounds under an annealed Metropolis-Hastings test
//!
//! `full` and `mcmc` end with a deterministic answer extraction when the
//! pipeline produced no `SOLUTION:` section.
//!
//! ## Epistemic Design
//!
//! - K_i (Knowledge): Compile-time enforced invariants (types, enums)
//! - B_i (Beliefs): Runtime fallible operations (Result, Option)
//! - I^R (Resolvable): User-configurable parameters
//! - I^B (Bounded): Model replies that do not parse degrade to defaults

pub mod client;
pub mod engine;
pub mod models;
pub mod prompts;
pub mod sampling;

// Re-exports for convenience
pub use client::{Backend, LlmClient, ScriptedBackend};
pub use engine::Engine;
pub use models::{Config, Mode, Payload, Result, RunOverrides, RunResult, SamplerError};
pub use prompts::{Language, TemplateStore};
