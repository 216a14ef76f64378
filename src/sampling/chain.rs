//! Metropolis-Hastings chain sampling with an annealed temperature schedule.
//!
//! Epistemic foundation:
//! - K_i: temp(t) = initial_temp × decay^t, so exploration shrinks over time
//! - K_i: p_accept = min(1, score_proposed / score_current); better is always kept
//! - K_i: The chain is append-only; entry 0 is the seed and always accepted
//! - B_i: Scores reflect quality (a learned judgement, not ground truth)
//! - I^R: The uniform draw source is injected, so runs replay under a seed
//!
//! Rejected proposals still land in the history: the entry carries the
//! proposal's score and the probability it was refused at, while the state
//! text and score stay those of the retained current state.

use crate::models::{McmcConfig, Message, Result};
use crate::prompts::Language;
use crate::sampling::{BlockProposer, ConsensusOutcome, ConsensusSelector, Scorer};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

/// Source of uniform draws in [0, 1).
pub trait UniformSource: Send {
    fn next_uniform(&mut self) -> f64;
}

/// Adapts any `rand` generator.
#[derive(Debug, Clone)]
pub struct RngSource<R>(pub R);

impl RngSource<StdRng> {
    /// Reproducible draws.
    pub fn seeded(seed: u64) -> Self {
        Self(StdRng::seed_from_u64(seed))
    }

    /// Draws seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self(StdRng::from_os_rng())
    }

    /// Seeded when `seed` is set, entropy otherwise.
    pub fn from_seed_option(seed: Option<u64>) -> Self {
        seed.map(Self::seeded).unwrap_or_else(Self::from_entropy)
    }
}

impl<R: Rng + Send> UniformSource for RngSource<R> {
    fn next_uniform(&mut self) -> f64 {
        self.0.random::<f64>()
    }
}

/// Annealed sampling temperature at iteration `t`.
pub fn annealed_temperature(initial_temp: f64, decay: f64, t: usize) -> f64 {
    initial_temp * decay.powf(t as f64)
}

/// Metropolis acceptance probability on the bounded score scale.
///
/// A current score of zero accepts unconditionally; `floor` lifts the
/// probability of worse proposals.
pub fn acceptance_probability(current: f64, proposed: f64, floor: f64) -> f64 {
    let ratio = if current <= 0.0 {
        1.0
    } else {
        (proposed / current).min(1.0)
    };
    ratio.max(floor).clamp(0.0, 1.0)
}

/// Whether a draw accepts at probability `p`.
pub fn accepts(p: f64, draw: f64) -> bool {
    p >= 1.0 || draw < p
}

/// One entry of the chain history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainState {
    pub iteration: usize,
    /// Current state after this iteration's decision
    pub text: String,
    /// Score of `text`
    pub score: f64,
    pub rationale: String,
    /// Score of this iteration's proposal (absent for the seed)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_score: Option<f64>,
    /// Proposal text when it was rejected
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejected_text: Option<String>,
    pub accepted: bool,
    pub acceptance_probability: f64,
    pub temperature: f64,
}

/// Fixed-width table row for a chain entry.
pub struct ChainStateRow<'a>(pub &'a ChainState);

impl ChainStateRow<'_> {
    pub const HEADER: &'static str = "iter   temp   score  proposed  p      accepted";
}

impl fmt::Display for ChainStateRow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        let proposed = s
            .proposed_score
            .map(|p| format!("{p:.2}"))
            .unwrap_or_else(|| "-".to_string());
        write!(
            f,
            "{:<6} {:<6.3} {:<6.2} {:<9} {:<6.2} {}",
            s.iteration,
            s.temperature,
            s.score,
            proposed,
            s.acceptance_probability,
            if s.accepted { "yes" } else { "no" }
        )
    }
}

/// Output of a chain run.
#[derive(Debug, Clone)]
pub struct ChainOutcome {
    /// Highest-scoring entry, earliest on ties
    pub best: ChainState,
    /// Score of the current state after the last iteration
    pub final_score: f64,
    /// Iterations 0..=T
    pub chain: Vec<ChainState>,
    /// Accepted proposals over T (0 when T = 0)
    pub acceptance_rate: f64,
    pub seed: ConsensusOutcome,
}

/// Highest-scoring entry; the earliest wins ties.
pub fn select_best(chain: &[ChainState]) -> Option<&ChainState> {
    chain.iter().fold(None, |best: Option<&ChainState>, entry| match best {
        Some(b) if b.score >= entry.score => Some(b),
        _ => Some(entry),
    })
}

/// Fraction of proposal iterations (seed excluded) that were accepted.
pub fn acceptance_rate(chain: &[ChainState]) -> f64 {
    let proposals = chain.iter().filter(|s| s.iteration > 0).count();
    if proposals == 0 {
        return 0.0;
    }
    let accepted = chain
        .iter()
        .filter(|s| s.iteration > 0 && s.accepted)
        .count();
    accepted as f64 / proposals as f64
}

/// Blockwise refinement wrapped in an annealed Metropolis-Hastings test.
#[derive(Clone)]
pub struct ChainSampler {
    consensus: ConsensusSelector,
    proposer: BlockProposer,
    scorer: Scorer,
    mcmc: McmcConfig,
}

impl ChainSampler {
    pub fn new(
        consensus: ConsensusSelector,
        proposer: BlockProposer,
        scorer: Scorer,
        mcmc: McmcConfig,
    ) -> Self {
        Self {
            consensus,
            proposer,
            scorer,
            mcmc,
        }
    }

    /// Run `iterations` propose/score/accept cycles from a consensus seed.
    ///
    /// B_i(every backend call succeeds) → Result; the first failure ends the run.
    pub async fn sample<D: UniformSource + ?Sized>(
        &self,
        conversation: &[Message],
        k: usize,
        iterations: usize,
        block_tokens: u32,
        language: Language,
        draws: &mut D,
    ) -> Result<ChainOutcome> {
        let McmcConfig {
            initial_temp,
            decay,
            acceptance_floor,
            ..
        } = self.mcmc;

        // Init
        let seed = self
            .consensus
            .select(conversation, k, initial_temp, language)
            .await?;
        let seed_score = self.scorer.score(&seed.chosen, language).await?;

        let mut current = seed.chosen.clone();
        let mut current_score = seed_score.score;
        let mut current_rationale = seed_score.rationale;

        let mut chain = Vec::with_capacity(iterations + 1);
        chain.push(ChainState {
            iteration: 0,
            text: current.clone(),
            score: current_score,
            rationale: current_rationale.clone(),
            proposed_score: None,
            rejected_text: None,
            accepted: true,
            acceptance_probability: 1.0,
            temperature: annealed_temperature(initial_temp, decay, 0),
        });

        info!(
            iterations,
            initial_temp,
            decay,
            seed_score = current_score,
            "Starting chain"
        );

        for t in 1..=iterations {
            // Propose
            let temperature = annealed_temperature(initial_temp, decay, t);
            let proposal = self
                .proposer
                .propose(conversation, &current, block_tokens, temperature, language)
                .await?;

            // Score
            let proposed = self.scorer.score(proposal.text(), language).await?;

            // Accept/Reject
            let p = acceptance_probability(current_score, proposed.score, acceptance_floor);
            let draw = draws.next_uniform();
            let accepted = accepts(p, draw);

            debug!(
                iteration = t,
                temperature,
                current_score,
                proposed_score = proposed.score,
                acceptance_probability = p,
                draw,
                accepted,
                "Chain step"
            );

            let rejected_text = if accepted {
                current = proposal.into_text();
                current_score = proposed.score;
                current_rationale = proposed.rationale;
                None
            } else {
                Some(proposal.into_text())
            };

            chain.push(ChainState {
                iteration: t,
                text: current.clone(),
                score: current_score,
                rationale: current_rationale.clone(),
                proposed_score: Some(proposed.score),
                rejected_text,
                accepted,
                acceptance_probability: p,
                temperature,
            });
        }

        // Terminal
        let best = select_best(&chain)
            .cloned()
            .unwrap_or_else(|| chain[0].clone());
        let rate = acceptance_rate(&chain);

        info!(
            best_iteration = best.iteration,
            best_score = best.score,
            final_score = current_score,
            acceptance_rate = rate,
            "Chain complete"
        );

        Ok(ChainOutcome {
            best,
            final_score: current_score,
            chain,
            acceptance_rate: rate,
            seed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Reply, ScriptedBackend};
    use crate::prompts::TemplateStore;
    use crate::sampling::{KeywordParser, Refiner};
    use std::collections::VecDeque;
    use std::sync::Arc;

    /// Replays fixed draws.
    struct ScriptedDraws(VecDeque<f64>);

    impl ScriptedDraws {
        fn new(draws: &[f64]) -> Self {
            Self(draws.iter().copied().collect())
        }
    }

    impl UniformSource for ScriptedDraws {
        fn next_uniform(&mut self) -> f64 {
            self.0.pop_front().unwrap_or(0.0)
        }
    }

    fn sampler(backend: Arc<ScriptedBackend>, mcmc: McmcConfig) -> ChainSampler {
        let templates = Arc::new(TemplateStore::builtin());
        let parser = Arc::new(KeywordParser::new());
        let consensus =
            ConsensusSelector::new(backend.clone(), templates.clone(), parser.clone(), 0.0);
        let refiner = Refiner::new(backend.clone(), templates.clone());
        let proposer = BlockProposer::new(backend.clone(), templates.clone(), refiner, 0.6);
        let scorer = Scorer::new(backend, templates, parser);
        ChainSampler::new(consensus, proposer, scorer, mcmc)
    }

    /// Replies for one iteration whose refinement finds no weak spans.
    fn iteration(continuation: &str, score: f64) -> Vec<Reply> {
        vec![
            Reply::text(continuation),
            Reply::text("clean"),
            Reply::text(format!("SCORE: {score}\nREASON: r{score}")),
        ]
    }

    fn script(seed_score: f64, steps: &[(&str, f64)]) -> Vec<Reply> {
        let mut replies = vec![
            Reply::texts(["s1", "s2"]),
            Reply::text("BEST: C1"),
            Reply::text(format!("SCORE: {seed_score}")),
        ];
        for (continuation, score) in steps {
            replies.extend(iteration(continuation, *score));
        }
        replies
    }

    #[test]
    fn test_schedule_starts_at_initial_and_strictly_decreases() {
        assert_eq!(annealed_temperature(0.8, 0.9, 0), 0.8);
        let temps: Vec<f64> = (0..20).map(|t| annealed_temperature(0.8, 0.9, t)).collect();
        assert!(temps.windows(2).all(|w| w[1] < w[0]));
        assert!(temps[19] > 0.0);
    }

    #[test]
    fn test_acceptance_probability_rules() {
        assert_eq!(acceptance_probability(5.0, 5.0, 0.0), 1.0);
        assert_eq!(acceptance_probability(5.0, 9.0, 0.0), 1.0);
        assert_eq!(acceptance_probability(8.0, 4.0, 0.0), 0.5);
        assert_eq!(acceptance_probability(0.0, 0.0, 0.0), 1.0);
        assert_eq!(acceptance_probability(8.0, 0.0, 0.0), 0.0);
        assert_eq!(acceptance_probability(8.0, 2.0, 0.5), 0.5);
        assert_eq!(acceptance_probability(8.0, 6.0, 0.5), 0.75);
    }

    #[test]
    fn test_certain_acceptance_ignores_draw() {
        for draw in [0.0, 0.5, 0.999_999, 1.0] {
            assert!(accepts(1.0, draw));
        }
        assert!(accepts(0.5, 0.49));
        assert!(!accepts(0.5, 0.5));
        assert!(!accepts(0.0, 0.0));
    }

    fn entry(iteration: usize, score: f64) -> ChainState {
        ChainState {
            iteration,
            text: format!("t{iteration}"),
            score,
            rationale: String::new(),
            proposed_score: None,
            rejected_text: None,
            accepted: true,
            acceptance_probability: 1.0,
            temperature: 0.5,
        }
    }

    #[test]
    fn test_best_is_earliest_maximum() {
        let chain = vec![entry(0, 4.0), entry(1, 7.0), entry(2, 7.0), entry(3, 6.0)];
        let best = select_best(&chain).unwrap();
        assert_eq!(best.iteration, 1);
        assert!(chain.iter().all(|e| best.score >= e.score));
        assert!(select_best(&[]).is_none());
    }

    #[test]
    fn test_row_marks_seed_without_proposal() {
        let row = ChainStateRow(&entry(0, 4.0)).to_string();
        assert!(row.starts_with("0 "));
        assert!(row.contains(" - "));
        assert!(row.ends_with("yes"));
    }

    #[test]
    fn test_acceptance_rate_excludes_seed() {
        let mut chain = vec![entry(0, 1.0), entry(1, 2.0), entry(2, 2.0)];
        chain[2].accepted = false;
        assert_eq!(acceptance_rate(&chain), 0.5);
        assert_eq!(acceptance_rate(&chain[..1]), 0.0);
    }

    #[test]
    fn test_seeded_source_is_reproducible() {
        let mut a = RngSource::seeded(42);
        let mut b = RngSource::seeded(42);
        for _ in 0..10 {
            let x = a.next_uniform();
            assert_eq!(x, b.next_uniform());
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[tokio::test]
    async fn test_chain_accepts_and_rejects_by_ratio() {
        // seed 6; t1 proposes 8 (certain), t2 proposes 4 (p = 0.5, draw 0.7 → reject),
        // t3 proposes 6 (p = 0.75, draw 0.1 → accept)
        let backend = Arc::new(ScriptedBackend::queue(script(
            6.0,
            &[("a", 8.0), ("b", 4.0), ("c", 6.0)],
        )));
        let mut draws = ScriptedDraws::new(&[0.99, 0.7, 0.1]);
        let mcmc = McmcConfig {
            initial_temp: 0.8,
            decay: 0.5,
            ..McmcConfig::default()
        };

        let outcome = sampler(backend.clone(), mcmc)
            .sample(&[Message::user("q")], 2, 3, 64, Language::En, &mut draws)
            .await
            .unwrap();

        assert_eq!(outcome.chain.len(), 4);
        let c = &outcome.chain;

        assert!(c[0].accepted);
        assert_eq!(c[0].temperature, 0.8);
        assert_eq!(c[0].text, "s1");

        assert!(c[1].accepted);
        assert_eq!(c[1].text, "s1\na");
        assert_eq!(c[1].score, 8.0);
        assert_eq!(c[1].temperature, 0.4);

        assert!(!c[2].accepted);
        assert_eq!(c[2].acceptance_probability, 0.5);
        assert_eq!(c[2].proposed_score, Some(4.0));
        assert_eq!(c[2].text, "s1\na");
        assert_eq!(c[2].score, 8.0);
        assert_eq!(c[2].rejected_text.as_deref(), Some("s1\na\nb"));

        assert!(c[3].accepted);
        assert_eq!(c[3].acceptance_probability, 0.75);
        assert_eq!(c[3].text, "s1\na\nc");

        assert_eq!(outcome.best.iteration, 1);
        assert_eq!(outcome.best.score, 8.0);
        assert_eq!(outcome.final_score, 6.0);
        assert!((outcome.acceptance_rate - 2.0 / 3.0).abs() < 1e-12);

        // Continuations follow the annealed schedule
        let temps: Vec<f64> = backend
            .calls()
            .iter()
            .filter(|call| call.messages.len() == 3)
            .map(|call| call.temperature)
            .collect();
        assert_eq!(temps, vec![0.4, 0.2, 0.1]);
        // Seed consensus ran at the initial temperature
        assert_eq!(backend.calls()[0].temperature, 0.8);
    }

    #[tokio::test]
    async fn test_zero_current_score_accepts() {
        let backend = Arc::new(ScriptedBackend::queue(script(0.0, &[("a", 0.0)])));
        let mut draws = ScriptedDraws::new(&[0.999]);
        let outcome = sampler(backend, McmcConfig::default())
            .sample(&[Message::user("q")], 2, 1, 64, Language::En, &mut draws)
            .await
            .unwrap();
        assert!(outcome.chain[1].accepted);
        assert_eq!(outcome.acceptance_rate, 1.0);
    }

    #[tokio::test]
    async fn test_zero_iterations_keeps_seed() {
        let backend = Arc::new(ScriptedBackend::queue(script(5.5, &[])));
        let mut draws = RngSource::seeded(1);
        let outcome = sampler(backend, McmcConfig::default())
            .sample(&[Message::user("q")], 2, 0, 64, Language::En, &mut draws)
            .await
            .unwrap();
        assert_eq!(outcome.chain.len(), 1);
        assert_eq!(outcome.best.score, 5.5);
        assert_eq!(outcome.acceptance_rate, 0.0);
    }

    #[tokio::test]
    async fn test_backend_failure_mid_chain_propagates() {
        let mut replies = script(5.0, &[("a", 6.0)]);
        replies.push(Reply::fail(500, "gone"));
        let backend = Arc::new(ScriptedBackend::queue(replies));
        let mut draws = RngSource::seeded(3);
        let result = sampler(backend, McmcConfig::default())
            .sample(&[Message::user("q")], 2, 2, 64, Language::En, &mut draws)
            .await;
        assert!(result.is_err());
    }
}
