//! Prompt template store.
//!
//! Resolution order for a key: the language's own variant, then English,
//! then the entry's single-language template. A file entry that cannot serve
//! the language falls through to the built-in entry for the same key.
//!
//! `{{name}}` placeholders are substituted in one pass over the template, so
//! braces inside a substituted value stay literal. `{{language}}` is always
//! bound to the native name of the run's language; unknown placeholders are
//! left as written.

use crate::models::{ConfigError, Result, SamplerError};
use crate::prompts::Language;
use regex::{Captures, Regex};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, warn};

/// Template keys used by the pipelines.
pub mod keys {
    pub const SYSTEM_DEFAULT: &str = "system_default";
    pub const JUDGE_SYSTEM: &str = "judge_system";
    pub const JUDGE: &str = "judge";
    pub const ANNOTATOR_SYSTEM: &str = "annotator_system";
    pub const MARK: &str = "mark";
    pub const REWRITER_SYSTEM: &str = "rewriter_system";
    pub const REWRITE: &str = "rewrite";
    pub const CONTINUE: &str = "continue";
    pub const SOLVER_SYSTEM: &str = "solver_system";
    pub const SOLVER: &str = "solver";
    pub const SCORER_SYSTEM: &str = "scorer_system";
    pub const SCORER: &str = "scorer";
}

/// A stored template: either a plain string or a per-language table.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TemplateEntry {
    Single(String),
    Localized {
        #[serde(default)]
        template: Option<String>,
        #[serde(default)]
        languages: HashMap<String, String>,
    },
}

impl TemplateEntry {
    fn select(&self, language: Language) -> Option<&str> {
        match self {
            TemplateEntry::Single(text) => Some(text),
            TemplateEntry::Localized {
                template,
                languages,
            } => languages
                .get(language.code())
                .or_else(|| languages.get(Language::En.code()))
                .or(template.as_ref())
                .map(String::as_str),
        }
    }
}

static PLACEHOLDER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\{\{(\w+)\}\}").ok());

/// Keyed template lookup with variable substitution.
#[derive(Debug, Clone)]
pub struct TemplateStore {
    entries: BTreeMap<String, TemplateEntry>,
    /// Entries consulted when `entries` has no variant for a language.
    fallback: BTreeMap<String, TemplateEntry>,
}

impl Default for TemplateStore {
    fn default() -> Self {
        Self::builtin()
    }
}

impl TemplateStore {
    /// An empty store; every lookup fails.
    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
            fallback: BTreeMap::new(),
        }
    }

    /// The language-agnostic fallback set.
    pub fn builtin() -> Self {
        let entries = BUILTIN_TEMPLATES
            .iter()
            .map(|(key, text)| (key.to_string(), TemplateEntry::Single(text.to_string())))
            .collect();
        Self {
            entries,
            fallback: BTreeMap::new(),
        }
    }

    /// Parse a JSON template file and overlay it on the built-ins.
    pub fn from_file(path: &Path) -> std::result::Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;
        let overlay: BTreeMap<String, TemplateEntry> =
            serde_json::from_str(&content).map_err(|e| ConfigError::TemplateFile {
                path: path.to_owned(),
                reason: e.to_string(),
            })?;

        let builtin = Self::builtin().entries;
        debug!(path = %path.display(), templates = overlay.len(), "Loaded prompt templates");
        let mut entries = builtin.clone();
        entries.extend(overlay);
        Ok(Self {
            entries,
            fallback: builtin,
        })
    }

    /// Load `path` if given; a missing or broken file keeps the built-ins.
    pub fn load_or_builtin(path: Option<&Path>) -> Self {
        match path {
            Some(p) => Self::from_file(p).unwrap_or_else(|e| {
                warn!(error = %e, "Prompt templates unavailable, using built-in set");
                Self::builtin()
            }),
            None => Self::builtin(),
        }
    }

    /// Insert or replace one entry.
    pub fn insert(&mut self, key: impl Into<String>, entry: TemplateEntry) {
        self.entries.insert(key.into(), entry);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Render `key` for `language` with `variables` substituted.
    ///
    /// B_i(key exists) → Result: a missing key is fatal for the run.
    pub fn render(&self, key: &str, language: Language, variables: &[(&str, &str)]) -> Result<String> {
        let template = self
            .entries
            .get(key)
            .and_then(|entry| entry.select(language))
            .or_else(|| {
                let entry = self.fallback.get(key)?;
                debug!(key, %language, "Template file has no variant, using built-in");
                entry.select(language)
            })
            .ok_or_else(|| SamplerError::TemplateMissing(key.to_string()))?;

        let placeholder = PLACEHOLDER
            .as_ref()
            .ok_or_else(|| SamplerError::Internal("placeholder pattern unavailable".to_string()))?;
        let rendered = placeholder.replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            if name == "language" {
                return language.name().to_string();
            }
            variables
                .iter()
                .find(|(var, _)| *var == name)
                .map_or_else(|| caps[0].to_string(), |(_, value)| value.to_string())
        });
        Ok(rendered.into_owned())
    }
}

/// Built-in templates (English, with `{{language}}` steering the reply).
const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (
        keys::SYSTEM_DEFAULT,
        "You are a careful reasoner. Think step by step and answer in {{language}}.\n\
Structure your answer as:\n\
REASONING: (your step-by-step reasoning)\n\
SOLUTION: (the final answer only)",
    ),
    (
        keys::JUDGE_SYSTEM,
        "You are an impartial judge. Compare candidate answers strictly on logical \
coherence, correctness and absence of contradictions. Reply in {{language}}.",
    ),
    (
        keys::JUDGE,
        "You have {{k}} CANDIDATES (C1..C{{k}}). Choose the best one.\n\n\
{{candidates}}\n\n\
Rules: logical coherence, correctness, no contradictions.\n\
Output:\n\
BEST: CX\n\
REASON: (max 3 lines)",
    ),
    (
        keys::ANNOTATOR_SYSTEM,
        "You review drafts and flag uncertain passages without fixing them. Reply in {{language}}.",
    ),
    (
        keys::MARK,
        "Analyze the DRAFT. Wrap every uncertain or possibly wrong span in <weak>...</weak> \
and explain why in one line.\n\
Return:\n\
ANNOTATED TEXT (with <weak> markers)\n\
NOTES (short bullet points)\n\n\
DRAFT:\n{{draft}}",
    ),
    (
        keys::REWRITER_SYSTEM,
        "You repair flagged passages and leave everything else untouched. Reply in {{language}}.",
    ),
    (
        keys::REWRITE,
        "Rewrite ONLY the <weak>...</weak> segments, keeping the rest verbatim and coherent.\n\
Return the COMPLETE FINAL TEXT without <weak> markers and without comments.\n\n\
{{annotated}}",
    ),
    (
        keys::CONTINUE,
        "Continue the reasoning above for about {{block_tokens}} tokens. \
Do not repeat what was already written.",
    ),
    (
        keys::SOLVER_SYSTEM,
        "You extract final answers. Be concise and deterministic. Reply in {{language}}.",
    ),
    (
        keys::SOLVER,
        "QUESTION:\n{{question}}\n\nREASONING:\n{{reasoning}}\n\n\
Based only on the reasoning above, state the final answer to the question. \
No explanation.",
    ),
    (
        keys::SCORER_SYSTEM,
        "You grade reasoning quality on a 0-10 scale. Reply in {{language}}.",
    ),
    (
        keys::SCORER,
        "Rate the following reasoning for correctness, coherence and completeness.\n\n\
{{text}}\n\n\
Output:\n\
SCORE: (number from 0 to 10)\n\
REASON: (one or two lines)",
    ),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_builtin_covers_every_key() {
        let store = TemplateStore::builtin();
        for key in [
            keys::SYSTEM_DEFAULT,
            keys::JUDGE_SYSTEM,
            keys::JUDGE,
            keys::ANNOTATOR_SYSTEM,
            keys::MARK,
            keys::REWRITER_SYSTEM,
            keys::REWRITE,
            keys::CONTINUE,
            keys::SOLVER_SYSTEM,
            keys::SOLVER,
            keys::SCORER_SYSTEM,
            keys::SCORER,
        ] {
            assert!(store.contains(key), "missing builtin {key}");
        }
    }

    #[test]
    fn test_variables_replaced_literally() {
        let store = TemplateStore::builtin();
        let text = store
            .render(keys::JUDGE, Language::En, &[("k", "2"), ("candidates", "C1:\n$1 \\n")])
            .unwrap();
        assert!(text.contains("You have 2 CANDIDATES (C1..C2)"));
        assert!(text.contains("C1:\n$1 \\n"));
        assert!(!text.contains("{{"));
    }

    #[test]
    fn test_substituted_values_are_not_rescanned() {
        let store = TemplateStore::builtin();
        let text = store
            .render(
                keys::SOLVER,
                Language::En,
                &[("question", "What does {{reasoning}} mean?"), ("reasoning", "R")],
            )
            .unwrap();
        assert!(text.starts_with("QUESTION:\nWhat does {{reasoning}} mean?\n"));
        assert!(text.contains("REASONING:\nR\n"));

        let mut store = TemplateStore::empty();
        store.insert("t", TemplateEntry::Single("{{a}} {{unknown}} {{language}}".to_string()));
        let text = store
            .render("t", Language::It, &[("a", "{{language}}")])
            .unwrap();
        assert_eq!(text, "{{language}} {{unknown}} italiano");
    }

    #[test]
    fn test_language_name_bound() {
        let store = TemplateStore::builtin();
        let text = store.render(keys::SOLVER_SYSTEM, Language::Ru, &[]).unwrap();
        assert!(text.contains("русский"));
    }

    #[test]
    fn test_missing_key_is_fatal() {
        let store = TemplateStore::empty();
        assert!(matches!(
            store.render("judge", Language::En, &[]),
            Err(SamplerError::TemplateMissing(k)) if k == "judge"
        ));
    }

    #[test]
    fn test_resolution_order() {
        let mut store = TemplateStore::empty();
        store.insert(
            "greet",
            TemplateEntry::Localized {
                template: Some("legacy".to_string()),
                languages: HashMap::from([
                    ("it".to_string(), "ciao".to_string()),
                    ("en".to_string(), "hello".to_string()),
                ]),
            },
        );
        store.insert(
            "plain",
            TemplateEntry::Localized {
                template: Some("legacy".to_string()),
                languages: HashMap::new(),
            },
        );

        assert_eq!(store.render("greet", Language::It, &[]).unwrap(), "ciao");
        assert_eq!(store.render("greet", Language::Fr, &[]).unwrap(), "hello");
        assert_eq!(store.render("plain", Language::Fr, &[]).unwrap(), "legacy");
    }

    #[test]
    fn test_file_overlays_builtins() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "mark": {{ "languages": {{ "it": "Segna: {{{{draft}}}}" }} }},
                "custom": "plain {{{{x}}}}"
            }}"#
        )
        .unwrap();

        let store = TemplateStore::from_file(file.path()).unwrap();
        assert_eq!(
            store.render(keys::MARK, Language::It, &[("draft", "bozza")]).unwrap(),
            "Segna: bozza"
        );
        // No English variant in the file: the built-in mark template serves English
        let english = store
            .render(keys::MARK, Language::En, &[("draft", "draft text")])
            .unwrap();
        assert!(english.contains("<weak>"));
        assert!(english.ends_with("DRAFT:\ndraft text"));
        assert_eq!(store.render("custom", Language::En, &[("x", "1")]).unwrap(), "plain 1");
        assert!(store.contains(keys::JUDGE));
    }

    #[test]
    fn test_broken_file_falls_back() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            TemplateStore::from_file(file.path()),
            Err(ConfigError::TemplateFile { .. })
        ));

        let store = TemplateStore::load_or_builtin(Some(file.path()));
        assert!(store.contains(keys::REWRITE));
    }
}
