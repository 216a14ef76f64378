//! One continue-then-repair step, shared by the blockwise driver and the
//! chain sampler.

use crate::client::Backend;
use crate::models::{Message, Result};
use crate::prompts::{Language, TemplateStore, keys};
use crate::sampling::{Refinement, Refiner};
use std::sync::Arc;
use tracing::debug;

/// Outcome of extending a state by one block and refining it.
#[derive(Debug, Clone)]
pub struct Proposal {
    /// Raw continuation block
    pub continuation: String,
    /// Refinement of `current + "\n" + continuation`
    pub refinement: Refinement,
}

impl Proposal {
    /// The proposed next state.
    pub fn text(&self) -> &str {
        &self.refinement.final_text
    }

    pub fn into_text(self) -> String {
        self.refinement.final_text
    }
}

/// Requests a bounded continuation and runs it through the refiner.
#[derive(Clone)]
pub struct BlockProposer {
    backend: Arc<dyn Backend>,
    templates: Arc<TemplateStore>,
    refiner: Refiner,
    rewrite_temperature: f64,
}

impl BlockProposer {
    pub fn new(
        backend: Arc<dyn Backend>,
        templates: Arc<TemplateStore>,
        refiner: Refiner,
        rewrite_temperature: f64,
    ) -> Self {
        Self {
            backend,
            templates,
            refiner,
            rewrite_temperature,
        }
    }

    /// Continue `current` for about `block_tokens` tokens at `temperature`,
    /// append with a newline, then refine the whole text.
    pub async fn propose(
        &self,
        conversation: &[Message],
        current: &str,
        block_tokens: u32,
        temperature: f64,
        language: Language,
    ) -> Result<Proposal> {
        let budget = block_tokens.to_string();
        let continue_prompt =
            self.templates
                .render(keys::CONTINUE, language, &[("block_tokens", budget.as_str())])?;

        let mut messages = conversation.to_vec();
        messages.push(Message::assistant(current));
        messages.push(Message::user(continue_prompt));

        let continuation = self.backend.complete_one(&messages, temperature).await?;
        let extended = format!("{current}\n{continuation}");

        debug!(
            block_tokens,
            temperature,
            continuation_chars = continuation.chars().count(),
            "Continuation received"
        );

        let refinement = self
            .refiner
            .refine(&extended, self.rewrite_temperature, language)
            .await?;

        Ok(Proposal {
            continuation,
            refinement,
        })
    }
}
