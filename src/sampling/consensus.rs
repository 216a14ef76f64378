//! Multi-candidate consensus selection.
//!
//! Epistemic foundation:
//! - K_i: k candidates come from ONE batched request at a diverse temperature
//! - K_i: A separate deterministic judge request picks one label C1..Ck
//! - B_i: The judge names a parseable label (might not) → first candidate

use crate::client::Backend;
use crate::models::{BackendError, Message, Result, system_and_user};
use crate::prompts::{Language, TemplateStore, keys};
use crate::sampling::KeywordParser;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// One generated candidate and its position in the batched reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub index: usize,
    pub text: String,
}

/// The judge's pick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeVerdict {
    /// Zero-based, always within the candidate range
    pub chosen_index: usize,
    pub raw_judge_text: String,
    /// True when no label could be parsed and the first candidate was taken
    pub defaulted: bool,
}

/// Output of one consensus call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub chosen: String,
    pub candidates: Vec<Candidate>,
    pub verdict: JudgeVerdict,
}

impl ConsensusOutcome {
    /// Candidate texts in request order.
    pub fn candidate_texts(&self) -> Vec<String> {
        self.candidates.iter().map(|c| c.text.clone()).collect()
    }
}

/// Generates k candidates and lets a judge choose.
#[derive(Clone)]
pub struct ConsensusSelector {
    backend: Arc<dyn Backend>,
    templates: Arc<TemplateStore>,
    parser: Arc<KeywordParser>,
    judge_temperature: f64,
}

impl ConsensusSelector {
    pub fn new(
        backend: Arc<dyn Backend>,
        templates: Arc<TemplateStore>,
        parser: Arc<KeywordParser>,
        judge_temperature: f64,
    ) -> Self {
        Self {
            backend,
            templates,
            parser,
            judge_temperature,
        }
    }

    /// Build the candidate listing shown to the judge.
    fn format_candidates(candidates: &[Candidate]) -> String {
        candidates
            .iter()
            .map(|c| format!("C{}:\n{}", c.index + 1, c.text))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    /// Run one consensus round over `conversation`.
    ///
    /// B_i(backend answers both requests) → Result
    pub async fn select(
        &self,
        conversation: &[Message],
        k: usize,
        temperature: f64,
        language: Language,
    ) -> Result<ConsensusOutcome> {
        let k = k.max(1);
        let texts = self.backend.complete(conversation, k, temperature).await?;

        if texts.is_empty() {
            return Err(BackendError::InvalidResponse("No candidates returned".to_string()).into());
        }
        if texts.len() != k {
            warn!(
                requested = k,
                received = texts.len(),
                "Backend returned a different number of candidates"
            );
        }

        let candidates: Vec<Candidate> = texts
            .into_iter()
            .enumerate()
            .map(|(index, text)| Candidate { index, text })
            .collect();

        let count = candidates.len().to_string();
        let listing = Self::format_candidates(&candidates);
        let judge_prompt = self.templates.render(
            keys::JUDGE,
            language,
            &[("k", count.as_str()), ("candidates", listing.as_str())],
        )?;
        let judge_system = self.templates.render(keys::JUDGE_SYSTEM, language, &[])?;

        let judge_text = self
            .backend
            .complete_one(
                &system_and_user(judge_system, judge_prompt),
                self.judge_temperature,
            )
            .await?;

        let label = self.parser.label(&judge_text, candidates.len(), language);
        if label.defaulted {
            warn!("Judge reply has no recognizable label, taking first candidate");
        }
        debug!(
            candidates = candidates.len(),
            chosen = label.value + 1,
            "Consensus selected"
        );

        Ok(ConsensusOutcome {
            chosen: candidates[label.value].text.clone(),
            candidates,
            verdict: JudgeVerdict {
                chosen_index: label.value,
                raw_judge_text: judge_text,
                defaulted: label.defaulted,
            },
        })
    }
}
