//! Learned-quality scoring of reasoning texts.
//!
//! - K_i: Scores live on [0, 10]; out-of-range replies are clamped
//! - I^B: Unparseable replies degrade to a neutral 5.0 and a placeholder rationale

use crate::client::Backend;
use crate::models::{Result, system_and_user};
use crate::prompts::{Language, TemplateStore, keys};
use crate::sampling::KeywordParser;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// A clamped score and its rationale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub score: f64,
    pub rationale: String,
}

/// Asks the backend to grade a text, deterministically.
#[derive(Clone)]
pub struct Scorer {
    backend: Arc<dyn Backend>,
    templates: Arc<TemplateStore>,
    parser: Arc<KeywordParser>,
}

impl Scorer {
    pub fn new(
        backend: Arc<dyn Backend>,
        templates: Arc<TemplateStore>,
        parser: Arc<KeywordParser>,
    ) -> Self {
        Self {
            backend,
            templates,
            parser,
        }
    }

    pub async fn score(&self, text: &str, language: Language) -> Result<ScoreResult> {
        let prompt = self.templates.render(keys::SCORER, language, &[("text", text)])?;
        let system = self.templates.render(keys::SCORER_SYSTEM, language, &[])?;

        let reply = self
            .backend
            .complete_one(&system_and_user(system, prompt), 0.0)
            .await?;

        let score = self.parser.score(&reply, language);
        if score.defaulted {
            warn!(default = score.value, "Scorer reply has no parseable score");
        }
        let rationale = self.parser.rationale(&reply, language);

        debug!(score = score.value, "Text scored");
        Ok(ScoreResult {
            score: score.value,
            rationale: rationale.value,
        })
    }
}
