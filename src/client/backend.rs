//! Model backend abstraction.
//!
//! K_i: Every pipeline stage talks to the model through this one operation.
//! I^B: Transport, retries and timeouts belong to the implementation, never
//! to the sampling algorithms.

use crate::models::{Message, Result};
use async_trait::async_trait;

/// A text-generation backend.
///
/// `complete` turns a conversation into `n` independently sampled texts.
/// Implementations must flatten provider-specific response shapes into a
/// plain list and report failures as a single [`crate::SamplerError`].
#[async_trait]
pub trait Backend: Send + Sync {
    /// Generate `n` completions for `messages` at `temperature`.
    async fn complete(&self, messages: &[Message], n: usize, temperature: f64)
    -> Result<Vec<String>>;

    /// Model identifier, for logging and run metadata.
    fn model_id(&self) -> &str;

    /// Generate exactly one completion.
    async fn complete_one(&self, messages: &[Message], temperature: f64) -> Result<String> {
        let mut texts = self.complete(messages, 1, temperature).await?;
        if texts.is_empty() {
            return Err(crate::models::BackendError::InvalidResponse(
                "No choices in response".to_string(),
            )
            .into());
        }
        Ok(texts.swap_remove(0))
    }
}
