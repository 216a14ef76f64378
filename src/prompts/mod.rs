//! Prompt templates and working-language resolution.

mod language;
mod store;

pub use language::*;
pub use store::*;
