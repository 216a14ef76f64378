//! Chat-completion backends.

mod backend;
mod llm_client;
mod scripted;

pub use backend::*;
pub use llm_client::*;
pub use scripted::*;
