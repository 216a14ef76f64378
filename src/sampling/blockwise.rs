//! Blockwise iterative refinement.
//!
//! Consensus seed, then `steps` rounds of continue + refine. Every round is
//! kept: there is no acceptance test and no early exit.

use crate::models::{Message, Result};
use crate::prompts::Language;
use crate::sampling::{BlockProposer, ConsensusOutcome, ConsensusSelector};
use tracing::{debug, info};

/// Continuation temperature relative to the sample temperature.
pub const CONTINUE_TEMPERATURE_FACTOR: f64 = 0.9;

/// Output of a blockwise run.
#[derive(Debug, Clone)]
pub struct BlockwiseOutcome {
    pub text: String,
    pub seed: ConsensusOutcome,
    /// Rounds that found weak spans and rewrote them
    pub rewrites: usize,
}

/// Alternates continuation and refinement for a fixed number of rounds.
#[derive(Clone)]
pub struct BlockwiseDriver {
    consensus: ConsensusSelector,
    proposer: BlockProposer,
    sample_temperature: f64,
}

impl BlockwiseDriver {
    pub fn new(consensus: ConsensusSelector, proposer: BlockProposer, sample_temperature: f64) -> Self {
        Self {
            consensus,
            proposer,
            sample_temperature,
        }
    }

    pub async fn expand_and_refine(
        &self,
        conversation: &[Message],
        k: usize,
        steps: usize,
        block_tokens: u32,
        language: Language,
    ) -> Result<BlockwiseOutcome> {
        let seed = self
            .consensus
            .select(conversation, k, self.sample_temperature, language)
            .await?;
        let mut current = seed.chosen.clone();
        let mut rewrites = 0;
        let temperature = self.sample_temperature * CONTINUE_TEMPERATURE_FACTOR;

        for step in 0..steps {
            let proposal = self
                .proposer
                .propose(conversation, &current, block_tokens, temperature, language)
                .await?;
            if proposal.refinement.rewritten {
                rewrites += 1;
            }
            current = proposal.into_text();
            debug!(step = step + 1, steps, chars = current.chars().count(), "Block refined");
        }

        info!(steps, rewrites, "Blockwise refinement complete");
        Ok(BlockwiseOutcome {
            text: current,
            seed,
            rewrites,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Reply, ScriptedBackend};
    use crate::prompts::TemplateStore;
    use crate::sampling::{KeywordParser, Refiner};
    use std::sync::Arc;

    fn driver(backend: Arc<ScriptedBackend>) -> BlockwiseDriver {
        let templates = Arc::new(TemplateStore::builtin());
        let consensus = ConsensusSelector::new(
            backend.clone(),
            templates.clone(),
            Arc::new(KeywordParser::new()),
            0.0,
        );
        let refiner = Refiner::new(backend.clone(), templates.clone());
        let proposer = BlockProposer::new(backend, templates, refiner, 0.6);
        BlockwiseDriver::new(consensus, proposer, 0.9)
    }

    #[tokio::test]
    async fn test_every_round_is_kept() {
        let backend = Arc::new(ScriptedBackend::queue(vec![
            Reply::texts(["seed-a", "seed-b"]),
            Reply::text("BEST: C2"),
            // round 1: continuation, mark (weak), rewrite
            Reply::text("more"),
            Reply::text("seed-b\n<weak>more</weak>"),
            Reply::text("seed-b\nbetter"),
            // round 2: continuation, mark (clean)
            Reply::text("end"),
            Reply::text("no issues"),
        ]));
        let outcome = driver(backend.clone())
            .expand_and_refine(&[Message::user("q")], 2, 2, 50, Language::En)
            .await
            .unwrap();

        assert_eq!(outcome.seed.chosen, "seed-b");
        assert_eq!(outcome.text, "seed-b\nbetter\nend");
        assert_eq!(outcome.rewrites, 1);

        let calls = backend.calls();
        assert_eq!(calls.len(), 7);
        assert!((calls[2].temperature - 0.81).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_zero_steps_returns_seed() {
        let backend = Arc::new(ScriptedBackend::queue(vec![
            Reply::texts(["only"]),
            Reply::text("BEST: C1"),
        ]));
        let outcome = driver(backend.clone())
            .expand_and_refine(&[Message::user("q")], 1, 0, 50, Language::En)
            .await
            .unwrap();
        assert_eq!(outcome.text, "only");
        assert_eq!(backend.call_count(), 2);
    }
}
