//! Run modes and run results.
//!
//! K_i: A RunResult carries exactly one of payload / error.

use crate::models::{ConfigSnapshot, SamplerError};
use crate::prompts::Language;
use crate::sampling::ChainState;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;
use uuid::Uuid;

/// Pipeline selected for one invocation.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Mode {
    /// Consensus only
    MultiSample,
    /// One draft, then weak-span repair
    Annotate,
    /// Annealed Metropolis-Hastings chain
    Mcmc,
    /// Blockwise refinement plus answer extraction
    #[default]
    Full,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::MultiSample => "multi-sample",
            Mode::Annotate => "annotate",
            Mode::Mcmc => "mcmc",
            Mode::Full => "full",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the reported solution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolutionSource {
    /// The pipeline's own `SOLUTION:` section
    Pipeline,
    /// A follow-up solver request
    Solver,
    /// The reasoning itself, when the solver returned nothing
    Reasoning,
}

/// Mode-specific run output.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Consensus {
        text: String,
        candidates: Vec<String>,
        chosen_index: usize,
        judge: String,
    },
    Annotate {
        text: String,
        draft: String,
        annotated: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        notes: Option<String>,
    },
    Full {
        text: String,
        reasoning: String,
        solution: String,
        solution_source: SolutionSource,
        rewrites: usize,
    },
    Mcmc {
        text: String,
        reasoning: String,
        solution: String,
        solution_source: SolutionSource,
        best_iteration: usize,
        best_score: f64,
        final_score: f64,
        acceptance_rate: f64,
        chain: Vec<ChainState>,
    },
}

impl Payload {
    /// Primary text of the run.
    pub fn text(&self) -> &str {
        match self {
            Payload::Consensus { text, .. }
            | Payload::Annotate { text, .. }
            | Payload::Full { text, .. }
            | Payload::Mcmc { text, .. } => text,
        }
    }

    /// Final answer, for the modes that extract one.
    pub fn solution(&self) -> Option<&str> {
        match self {
            Payload::Full { solution, .. } | Payload::Mcmc { solution, .. } => Some(solution),
            _ => None,
        }
    }
}

/// Bookkeeping attached to every result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub mode: Mode,
    pub language: Language,
    pub model: String,
    pub config: ConfigSnapshot,
}

/// Outcome of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Debug rendering of the failure, shown only under `--verbose`
    #[serde(skip)]
    pub error_detail: Option<String>,
    pub metadata: RunMetadata,
}

impl RunResult {
    pub fn ok(payload: Payload, metadata: RunMetadata) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
            error_detail: None,
            metadata,
        }
    }

    pub fn failed(error: &SamplerError, metadata: RunMetadata) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(error.to_string()),
            error_detail: Some(format!("{error:?}")),
            metadata,
        }
    }

    pub fn text(&self) -> Option<&str> {
        self.payload.as_ref().map(Payload::text)
    }
}

/// Reasoning and solution sections of a pipeline output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sections {
    /// Text after `REASONING:` up to `SOLUTION:`; `None` without the marker
    pub reasoning: Option<String>,
    /// Text after `SOLUTION:`; empty without the marker
    pub solution: String,
}

static REASONING_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?is)REASONING\s*:\s*(.*?)\s*(?:SOLUTION\s*:|\z)").ok()
});
static SOLUTION_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?is)SOLUTION\s*:\s*(.*)\z").ok());

/// Split `text` on the `REASONING:` / `SOLUTION:` markers (case-insensitive).
pub fn split_sections(text: &str) -> Sections {
    let (Some(reasoning_re), Some(solution_re)) = (REASONING_RE.as_ref(), SOLUTION_RE.as_ref())
    else {
        return Sections::default();
    };

    let reasoning = reasoning_re
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string());
    let solution = solution_re
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();

    Sections {
        reasoning,
        solution,
    }
}
