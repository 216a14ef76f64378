//! Run orchestrator.
//!
//! Resolves the language, materializes the system + user conversation and
//! dispatches to one pipeline per mode:
//!
//! ```text
//! multi-sample : Consensus
//! annotate     : Draft → Refiner
//! full         : Blockwise → split sections → Solver (if no solution)
//! mcmc         : Chain → best state → split sections → Solver (if no solution)
//!
//! A blank solver reply falls back to the trimmed reasoning.
//! ```
//!
//! A run never returns an error: failures are captured in the RunResult.

use crate::client::Backend;
use crate::models::{
    BackendError, Config, Message, Mode, Payload, Result, RunMetadata, RunResult, SamplerError,
    SolutionSource, split_sections, system_and_user,
};
use crate::prompts::{Language, LanguageResolver, TemplateStore, keys};
use crate::sampling::{
    BlockProposer, BlockwiseDriver, ChainSampler, ConsensusSelector, KeywordParser, Refiner,
    RngSource, Scorer, Solver,
};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// One engine instance per run (or [`Engine::reset`] between runs).
pub struct Engine {
    config: Config,
    backend: Arc<dyn Backend>,
    templates: Arc<TemplateStore>,
    language: LanguageResolver,
    consensus: ConsensusSelector,
    refiner: Refiner,
    blockwise: BlockwiseDriver,
    chain: ChainSampler,
    solver: Solver,
}

impl Engine {
    /// Wire every component from `config`.
    ///
    /// B_i(config is valid) → Result
    pub fn new(config: Config, backend: Arc<dyn Backend>, templates: TemplateStore) -> Result<Self> {
        config.validate()?;

        let templates = Arc::new(templates);
        let parser = Arc::new(KeywordParser::new());
        let temps = config.temperature;

        let consensus = ConsensusSelector::new(
            Arc::clone(&backend),
            Arc::clone(&templates),
            Arc::clone(&parser),
            temps.judge,
        );
        let refiner = Refiner::new(Arc::clone(&backend), Arc::clone(&templates));
        let proposer = BlockProposer::new(
            Arc::clone(&backend),
            Arc::clone(&templates),
            refiner.clone(),
            temps.rewrite,
        );
        let blockwise = BlockwiseDriver::new(consensus.clone(), proposer.clone(), temps.sample);
        let scorer = Scorer::new(Arc::clone(&backend), Arc::clone(&templates), parser);
        let chain = ChainSampler::new(consensus.clone(), proposer, scorer, config.mcmc);
        let solver = Solver::new(Arc::clone(&backend), Arc::clone(&templates));
        let language = LanguageResolver::new(config.language.default, config.language.auto_detect);

        Ok(Self {
            config,
            backend,
            templates,
            language,
            consensus,
            refiner,
            blockwise,
            chain,
            solver,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn language(&self) -> &LanguageResolver {
        &self.language
    }

    /// Drop run-scoped state (the language cache).
    pub fn reset(&mut self) {
        self.language.reset();
    }

    /// Execute one run.
    pub async fn run(&self, prompt: &str, mode: Mode) -> RunResult {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();

        info!(
            %run_id,
            %mode,
            model = self.backend.model_id(),
            k = self.config.sampling.k,
            steps = self.config.sampling.steps,
            "Starting run"
        );

        let (language, outcome) = if prompt.trim().is_empty() {
            (
                self.language.cached().unwrap_or(self.config.language.default),
                Err(SamplerError::InvalidInput("prompt is empty".to_string())),
            )
        } else {
            let language = self.language.resolve(self.backend.as_ref(), prompt).await;
            (language, self.dispatch(prompt, mode, language).await)
        };

        let metadata = RunMetadata {
            run_id,
            started_at,
            elapsed_ms: start.elapsed().as_millis() as u64,
            mode,
            language,
            model: self.backend.model_id().to_string(),
            config: self.config.snapshot(),
        };

        match outcome {
            Ok(payload) => {
                info!(
                    %run_id,
                    elapsed_ms = metadata.elapsed_ms,
                    language = %language,
                    "Run complete"
                );
                RunResult::ok(payload, metadata)
            }
            Err(e) => {
                error!(
                    %run_id,
                    error = %e,
                    backend_failure = e.is_backend_failure(),
                    "Run failed"
                );
                RunResult::failed(&e, metadata)
            }
        }
    }

    async fn dispatch(&self, prompt: &str, mode: Mode, language: Language) -> Result<Payload> {
        let conversation = self.conversation(prompt, language)?;
        let sampling = &self.config.sampling;
        let temps = self.config.temperature;

        match mode {
            Mode::MultiSample => {
                let outcome = self
                    .consensus
                    .select(&conversation, sampling.k, temps.sample, language)
                    .await?;
                Ok(Payload::Consensus {
                    candidates: outcome.candidate_texts(),
                    chosen_index: outcome.verdict.chosen_index,
                    judge: outcome.verdict.raw_judge_text,
                    text: outcome.chosen,
                })
            }

            Mode::Annotate => {
                let draft = self.backend.complete_one(&conversation, temps.sample).await?;
                let refinement = self.refiner.refine(&draft, temps.rewrite, language).await?;
                Ok(Payload::Annotate {
                    text: refinement.final_text,
                    draft,
                    annotated: refinement.annotated,
                    notes: refinement.notes,
                })
            }

            Mode::Full => {
                let outcome = self
                    .blockwise
                    .expand_and_refine(
                        &conversation,
                        sampling.k,
                        sampling.steps,
                        sampling.block_tokens,
                        language,
                    )
                    .await?;
                let (reasoning, solution, solution_source) =
                    self.answer(prompt, &outcome.text, language).await?;
                Ok(Payload::Full {
                    text: outcome.text,
                    reasoning,
                    solution,
                    solution_source,
                    rewrites: outcome.rewrites,
                })
            }

            Mode::Mcmc => {
                let mut draws = RngSource::from_seed_option(self.config.mcmc.seed);
                let outcome = self
                    .chain
                    .sample(
                        &conversation,
                        sampling.k,
                        sampling.steps,
                        sampling.block_tokens,
                        language,
                        &mut draws,
                    )
                    .await?;
                let (reasoning, solution, solution_source) =
                    self.answer(prompt, &outcome.best.text, language).await?;
                Ok(Payload::Mcmc {
                    text: outcome.best.text.clone(),
                    reasoning,
                    solution,
                    solution_source,
                    best_iteration: outcome.best.iteration,
                    best_score: outcome.best.score,
                    final_score: outcome.final_score,
                    acceptance_rate: outcome.acceptance_rate,
                    chain: outcome.chain,
                })
            }
        }
    }

    /// System + user seed conversation.
    fn conversation(&self, prompt: &str, language: Language) -> Result<Vec<Message>> {
        let system = match &self.config.sampling.system_prompt {
            Some(system) => system.clone(),
            None => self.templates.render(keys::SYSTEM_DEFAULT, language, &[])?,
        };
        Ok(system_and_user(system, prompt))
    }

    /// Reasoning and a guaranteed non-empty solution for `text`.
    async fn answer(
        &self,
        question: &str,
        text: &str,
        language: Language,
    ) -> Result<(String, String, SolutionSource)> {
        let sections = split_sections(text);
        let reasoning = sections
            .reasoning
            .unwrap_or_else(|| text.trim().to_string());

        if !sections.solution.is_empty() {
            return Ok((reasoning, sections.solution, SolutionSource::Pipeline));
        }

        let solution = self.solver.solve(question, &reasoning, language).await?;
        if !solution.is_empty() {
            return Ok((reasoning, solution, SolutionSource::Solver));
        }

        let fallback = reasoning.trim();
        if fallback.is_empty() {
            return Err(BackendError::InvalidResponse("No answer text produced".to_string()).into());
        }
        warn!("Solver returned an empty answer, reporting the reasoning as the solution");
        let solution = fallback.to_string();
        Ok((reasoning, solution, SolutionSource::Reasoning))
    }
}
