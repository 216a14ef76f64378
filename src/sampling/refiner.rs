//! Weak-span annotate-and-rewrite repair.
//!
//! Epistemic foundation:
//! - K_i: Phase 1 marks uncertain spans with `<weak>`; phase 2 rewrites only those
//! - K_i: No marker → the draft is returned unchanged (fixed point)
//! - B_i: The rewriter keeps unmarked text verbatim (prompted, not verified)

use crate::client::Backend;
use crate::models::{Result, system_and_user};
use crate::prompts::{Language, TemplateStore, keys};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Opening weak-span marker the rewrite phase targets.
pub const WEAK_MARKER: &str = "<weak>";

/// Rewriting runs slightly cooler than marking.
pub const REWRITE_TEMPERATURE_FACTOR: f64 = 0.9;

/// Result of one refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Refinement {
    pub final_text: String,
    pub annotated: String,
    /// Set on the no-weak-span path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// Whether a rewrite request was made
    pub rewritten: bool,
}

/// Detects weak spans in a draft and rewrites only those.
#[derive(Clone)]
pub struct Refiner {
    backend: Arc<dyn Backend>,
    templates: Arc<TemplateStore>,
}

impl Refiner {
    pub fn new(backend: Arc<dyn Backend>, templates: Arc<TemplateStore>) -> Self {
        Self { backend, templates }
    }

    /// Mark, then rewrite if anything was marked.
    pub async fn refine(&self, draft: &str, temperature: f64, language: Language) -> Result<Refinement> {
        let mark_prompt = self.templates.render(keys::MARK, language, &[("draft", draft)])?;
        let mark_system = self.templates.render(keys::ANNOTATOR_SYSTEM, language, &[])?;

        let annotated = self
            .backend
            .complete_one(&system_and_user(mark_system, mark_prompt), temperature)
            .await?;

        if !annotated.contains(WEAK_MARKER) {
            debug!("No weak spans marked, keeping draft");
            return Ok(Refinement {
                final_text: draft.to_string(),
                annotated,
                notes: Some(language.no_weak_spans_note().to_string()),
                rewritten: false,
            });
        }

        let weak_spans = annotated.matches(WEAK_MARKER).count();
        let rewrite_prompt = self
            .templates
            .render(keys::REWRITE, language, &[("annotated", annotated.as_str())])?;
        let rewrite_system = self.templates.render(keys::REWRITER_SYSTEM, language, &[])?;

        let final_text = self
            .backend
            .complete_one(
                &system_and_user(rewrite_system, rewrite_prompt),
                temperature * REWRITE_TEMPERATURE_FACTOR,
            )
            .await?;

        debug!(weak_spans, "Weak spans rewritten");

        Ok(Refinement {
            final_text,
            annotated,
            notes: None,
            rewritten: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Reply, ScriptedBackend};

    fn refiner(backend: Arc<ScriptedBackend>) -> Refiner {
        Refiner::new(backend, Arc::new(TemplateStore::builtin()))
    }

    #[tokio::test]
    async fn test_no_weak_span_is_identity() {
        let backend = Arc::new(ScriptedBackend::queue(vec![Reply::text(
            "Everything looks solid.\nNOTES: none",
        )]));
        let draft = "x = 4 because 2 + 2 = 4.\n";
        let result = refiner(backend.clone())
            .refine(draft, 0.6, Language::It)
            .await
            .unwrap();

        assert_eq!(result.final_text, draft);
        assert!(!result.rewritten);
        assert_eq!(result.notes.as_deref(), Some("Nessuno span debole identificato."));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn test_marked_spans_are_rewritten_cooler() {
        let backend = Arc::new(ScriptedBackend::queue(vec![
            Reply::text("x = <weak>5</weak> (arithmetic slip)"),
            Reply::text("x = 4"),
        ]));
        let result = refiner(backend.clone())
            .refine("x = 5", 0.6, Language::En)
            .await
            .unwrap();

        assert_eq!(result.final_text, "x = 4");
        assert!(result.rewritten);
        assert!(result.notes.is_none());

        let calls = backend.calls();
        assert_eq!(calls[0].temperature, 0.6);
        assert!((calls[1].temperature - 0.54).abs() < 1e-12);
        assert!(calls[0].last().contains("x = 5"));
        assert!(calls[1].last().contains("<weak>5</weak>"));
    }

    #[tokio::test]
    async fn test_mark_failure_propagates() {
        let backend = Arc::new(ScriptedBackend::queue(vec![Reply::fail(502, "bad gateway")]));
        assert!(refiner(backend).refine("draft", 0.6, Language::En).await.is_err());
    }
}
