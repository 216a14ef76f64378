//! Deterministic final-answer extraction from a reasoning trace.

use crate::client::Backend;
use crate::models::{Result, system_and_user};
use crate::prompts::{Language, TemplateStore, keys};
use std::sync::Arc;

#[derive(Clone)]
pub struct Solver {
    backend: Arc<dyn Backend>,
    templates: Arc<TemplateStore>,
}

impl Solver {
    pub fn new(backend: Arc<dyn Backend>, templates: Arc<TemplateStore>) -> Self {
        Self { backend, templates }
    }

    /// One zero-temperature request; the answer is trimmed.
    pub async fn solve(&self, question: &str, reasoning: &str, language: Language) -> Result<String> {
        let prompt = self.templates.render(
            keys::SOLVER,
            language,
            &[("question", question), ("reasoning", reasoning)],
        )?;
        let system = self.templates.render(keys::SOLVER_SYSTEM, language, &[])?;

        let answer = self
            .backend
            .complete_one(&system_and_user(system, prompt), 0.0)
            .await?;
        Ok(answer.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Reply, ScriptedBackend};

    #[tokio::test]
    async fn test_solver_trims_and_is_deterministic() {
        let backend = Arc::new(ScriptedBackend::queue(vec![Reply::text("\n  x = 6, y = 4  \n")]));
        let solver = Solver::new(backend.clone(), Arc::new(TemplateStore::builtin()));

        let answer = solver
            .solve("x+y=10, x-y=2", "add the equations", Language::En)
            .await
            .unwrap();
        assert_eq!(answer, "x = 6, y = 4");

        let call = &backend.calls()[0];
        assert_eq!(call.temperature, 0.0);
        assert_eq!(call.n, 1);
        assert!(call.last().contains("x+y=10, x-y=2"));
        assert!(call.last().contains("add the equations"));
    }
}
