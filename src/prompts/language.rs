//! Working-language detection.
//!
//! Epistemic foundation:
//! - K_i: The supported set is closed (it, en, es, de, zh, fr, ru)
//! - B_i: The backend names the prompt's language correctly (might not)
//! - I^B: Detection failure is absorbed → configured default
//!
//! The resolver caches its answer for the lifetime of the instance: one
//! detection call per run, however many pipeline stages ask.

use crate::client::Backend;
use crate::models::system_and_user;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// Characters of the prompt sent for detection.
pub const DETECTION_PREFIX_CHARS: usize = 200;

const DETECTION_SYSTEM_PROMPT: &str = "Detect the language of the user message. \
Reply with ONLY the ISO 639-1 code (2 letters): it, en, es, de, zh, fr, ru. Nothing else.";

/// A supported working language.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    It,
    #[default]
    En,
    Es,
    De,
    Zh,
    Fr,
    Ru,
}

impl Language {
    pub const ALL: [Language; 7] = [
        Language::It,
        Language::En,
        Language::Es,
        Language::De,
        Language::Zh,
        Language::Fr,
        Language::Ru,
    ];

    /// ISO 639-1 code.
    pub fn code(self) -> &'static str {
        match self {
            Language::It => "it",
            Language::En => "en",
            Language::Es => "es",
            Language::De => "de",
            Language::Zh => "zh",
            Language::Fr => "fr",
            Language::Ru => "ru",
        }
    }

    /// Native name, bound to `{{language}}` in templates.
    pub fn name(self) -> &'static str {
        match self {
            Language::It => "italiano",
            Language::En => "English",
            Language::Es => "español",
            Language::De => "Deutsch",
            Language::Zh => "中文",
            Language::Fr => "français",
            Language::Ru => "русский",
        }
    }

    /// Note attached to a refinement that found nothing to rewrite.
    pub fn no_weak_spans_note(self) -> &'static str {
        match self {
            Language::It => "Nessuno span debole identificato.",
            Language::En => "No weak spans identified.",
            Language::Es => "No se identificaron tramos débiles.",
            Language::De => "Keine schwachen Abschnitte identifiziert.",
            Language::Zh => "未发现薄弱部分。",
            Language::Fr => "Aucun passage faible identifié.",
            Language::Ru => "Слабых участков не обнаружено.",
        }
    }

    /// Parse a raw detector reply: trimmed, lower-cased, first two characters.
    pub fn from_reply(reply: &str) -> Option<Self> {
        let code: String = reply.trim().to_lowercase().chars().take(2).collect();
        code.parse().ok()
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::ALL
            .into_iter()
            .find(|l| l.code().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unsupported language code '{s}'"))
    }
}

/// Run-scoped language cache.
///
/// A fresh resolver (or [`LanguageResolver::reset`]) is required between
/// unrelated runs; concurrent runs must not share one.
#[derive(Debug)]
pub struct LanguageResolver {
    default: Language,
    auto_detect: bool,
    cached: OnceCell<Language>,
}

impl LanguageResolver {
    pub fn new(default: Language, auto_detect: bool) -> Self {
        Self {
            default,
            auto_detect,
            cached: OnceCell::new(),
        }
    }

    /// Pin the language without asking the backend.
    pub fn fixed(language: Language) -> Self {
        Self::new(language, false)
    }

    /// Resolved language, if detection already ran.
    pub fn cached(&self) -> Option<Language> {
        self.cached.get().copied()
    }

    /// Forget the cached language.
    pub fn reset(&mut self) {
        self.cached.take();
    }

    /// Detect the language of `prompt`, at most once per instance.
    pub async fn resolve(&self, backend: &dyn Backend, prompt: &str) -> Language {
        *self
            .cached
            .get_or_init(|| self.detect(backend, prompt))
            .await
    }

    async fn detect(&self, backend: &dyn Backend, prompt: &str) -> Language {
        if !self.auto_detect {
            return self.default;
        }

        let prefix: String = prompt.chars().take(DETECTION_PREFIX_CHARS).collect();
        let messages = system_and_user(DETECTION_SYSTEM_PROMPT, prefix);

        match backend.complete_one(&messages, 0.0).await {
            Ok(reply) => match Language::from_reply(&reply) {
                Some(language) => {
                    debug!(language = %language, "Language detected");
                    language
                }
                None => {
                    warn!(
                        reply = %reply.trim(),
                        default = %self.default,
                        "Unrecognized language code, using default"
                    );
                    self.default
                }
            },
            Err(e) => {
                warn!(error = %e, default = %self.default, "Language detection failed, using default");
                self.default
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{Reply, ScriptedBackend};

    #[test]
    fn test_from_reply_normalizes() {
        assert_eq!(Language::from_reply("  IT\n"), Some(Language::It));
        assert_eq!(Language::from_reply("en-US"), Some(Language::En));
        assert_eq!(Language::from_reply("Deutsch"), Some(Language::De));
        assert_eq!(Language::from_reply("pt"), None);
        assert_eq!(Language::from_reply(""), None);
    }

    #[test]
    fn test_codes_round_trip_through_from_str() {
        for language in Language::ALL {
            assert_eq!(language.code().parse::<Language>(), Ok(language));
            assert!(!language.no_weak_spans_note().is_empty());
        }
    }

    #[tokio::test]
    async fn test_detection_runs_once() {
        let backend = ScriptedBackend::queue(vec![Reply::text("fr")]);
        let resolver = LanguageResolver::new(Language::En, true);

        for _ in 0..5 {
            assert_eq!(resolver.resolve(&backend, "Bonjour").await, Language::Fr);
        }
        assert_eq!(backend.call_count(), 1);
        assert_eq!(backend.calls()[0].temperature, 0.0);
    }

    #[tokio::test]
    async fn test_only_prefix_is_sent() {
        let backend = ScriptedBackend::queue(vec![Reply::text("en")]);
        let resolver = LanguageResolver::new(Language::En, true);
        let prompt = "é".repeat(500);

        resolver.resolve(&backend, &prompt).await;
        let sent = backend.calls()[0].last().to_string();
        assert_eq!(sent.chars().count(), DETECTION_PREFIX_CHARS);
    }

    #[tokio::test]
    async fn test_failure_and_garbage_fall_back() {
        let backend = ScriptedBackend::queue(vec![Reply::fail(503, "down")]);
        let resolver = LanguageResolver::new(Language::Es, true);
        assert_eq!(resolver.resolve(&backend, "hola").await, Language::Es);

        let backend = ScriptedBackend::queue(vec![Reply::text("klingon")]);
        let resolver = LanguageResolver::new(Language::De, true);
        assert_eq!(resolver.resolve(&backend, "qapla'").await, Language::De);
    }

    #[tokio::test]
    async fn test_fixed_never_calls_backend_and_reset_clears() {
        let backend = ScriptedBackend::queue(vec![Reply::text("ru")]);
        let resolver = LanguageResolver::fixed(Language::Zh);
        assert_eq!(resolver.resolve(&backend, "anything").await, Language::Zh);
        assert_eq!(backend.call_count(), 0);

        let mut resolver = LanguageResolver::new(Language::En, true);
        assert_eq!(resolver.resolve(&backend, "привет").await, Language::Ru);
        assert_eq!(resolver.cached(), Some(Language::Ru));
        resolver.reset();
        assert_eq!(resolver.cached(), None);
    }
}
