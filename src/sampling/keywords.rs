//! Locale-tolerant extraction of labels, scores and rationales from free text.
//!
//! Epistemic foundation:
//! - K_i: Judges and scorers are asked for `KEYWORD: value` lines
//! - B_i: The model used the keyword of some supported language (might not)
//! - I^B: Unparseable replies degrade to one documented default per kind
//!
//! The synonym table is data; patterns are compiled from it once per parser,
//! one set per language.

use crate::prompts::Language;
use regex::Regex;
use tracing::warn;

/// Label index used when no `BEST: C<n>` label is found (first candidate).
pub const DEFAULT_LABEL_INDEX: usize = 0;

/// Neutral score used when no numeric score is found.
pub const DEFAULT_SCORE: f64 = 5.0;

/// Rationale used when no reason line is found.
pub const DEFAULT_RATIONALE: &str = "No rationale provided.";

/// Bounds every parsed score is clamped to.
pub const SCORE_RANGE: (f64, f64) = (0.0, 10.0);

/// Keywords one language uses for each value kind.
#[derive(Debug, Clone, Copy)]
pub struct Synonyms {
    pub best: &'static [&'static str],
    pub score: &'static [&'static str],
    pub reason: &'static [&'static str],
}

/// Synonyms per language.
pub fn synonyms(language: Language) -> Synonyms {
    match language {
        Language::It => Synonyms {
            best: &["MIGLIORE"],
            score: &["PUNTEGGIO", "VOTO"],
            reason: &["MOTIVO", "MOTIVAZIONE"],
        },
        Language::En => Synonyms {
            best: &["BEST"],
            score: &["SCORE", "RATING"],
            reason: &["REASON", "RATIONALE"],
        },
        Language::Es => Synonyms {
            best: &["MEJOR"],
            score: &["PUNTUACIÓN", "PUNTUACION", "PUNTAJE"],
            reason: &["MOTIVO", "RAZÓN", "RAZON"],
        },
        Language::De => Synonyms {
            best: &["BESTER", "BESTE"],
            score: &["PUNKTZAHL", "BEWERTUNG", "PUNKTE"],
            reason: &["BEGRÜNDUNG", "GRUND"],
        },
        Language::Zh => Synonyms {
            best: &["最佳"],
            score: &["分数", "评分", "得分"],
            reason: &["理由", "原因"],
        },
        Language::Fr => Synonyms {
            best: &["MEILLEUR"],
            score: &["NOTE", "SCORE"],
            reason: &["RAISON", "MOTIF"],
        },
        Language::Ru => Synonyms {
            best: &["ЛУЧШИЙ"],
            score: &["ОЦЕНКА", "БАЛЛ"],
            reason: &["ПРИЧИНА", "ОБОСНОВАНИЕ"],
        },
    }
}

/// A parsed value and whether it came from the default.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Parsed<T> {
    pub value: T,
    pub defaulted: bool,
}

impl<T> Parsed<T> {
    fn found(value: T) -> Self {
        Self {
            value,
            defaulted: false,
        }
    }

    fn fallback(value: T) -> Self {
        Self {
            value,
            defaulted: true,
        }
    }
}

/// Patterns for one value kind: keyword at the start of a line, then anywhere
/// on a word boundary.
#[derive(Debug, Clone)]
struct KindPatterns {
    anchored: Regex,
    inline: Regex,
}

impl KindPatterns {
    fn build(flags: &str, keywords: &[&str], value: &str) -> Option<Self> {
        // `KEYWORD:` tolerating markdown emphasis and full-width colons
        const SEP: &str = r"\**[^\S\n]*[:：]\s*\**\s*";
        // Optional list, quote, heading or emphasis markers before the keyword
        const LEAD: &str = r"^(?:[^\S\n]|[>#*-])*";

        let words = alternation(keywords.iter().copied());
        Some(Self {
            anchored: compile(&format!(r"(?m{flags}){LEAD}(?:{words})\b{SEP}{value}"))?,
            inline: compile(&format!(r"(?{flags})\b(?:{words})\b{SEP}{value}"))?,
        })
    }
}

#[derive(Debug, Clone)]
struct LanguagePatterns {
    language: Language,
    label: KindPatterns,
    score: KindPatterns,
    reason: KindPatterns,
}

impl LanguagePatterns {
    fn build(language: Language) -> Option<Self> {
        let s = synonyms(language);
        Some(Self {
            language,
            label: KindPatterns::build("i", s.best, r"C\s*(\d+)")?,
            score: KindPatterns::build("i", s.score, r"([-+]?\d+(?:[.,]\d+)?)")?,
            reason: KindPatterns::build("is", s.reason, r"(.+)")?,
        })
    }
}

/// Compiled keyword patterns.
///
/// Replies are matched against the keywords of every supported language, so
/// a judge answering in English during an Italian run still parses. The run
/// language is tried first, then English, then the rest; a keyword opening a
/// line wins over one found mid-sentence.
#[derive(Debug, Clone)]
pub struct KeywordParser {
    patterns: Vec<LanguagePatterns>,
}

impl Default for KeywordParser {
    fn default() -> Self {
        Self::new()
    }
}

impl KeywordParser {
    /// Compile patterns for all supported languages.
    pub fn new() -> Self {
        Self::for_languages(&Language::ALL)
    }

    /// Compile patterns for a subset of languages.
    ///
    /// A language whose patterns fail to compile is skipped; its replies
    /// then fall back to the defaults.
    pub fn for_languages(languages: &[Language]) -> Self {
        let patterns = languages
            .iter()
            .filter_map(|&language| {
                let built = LanguagePatterns::build(language);
                if built.is_none() {
                    warn!(%language, "Keyword patterns unavailable, replies will use defaults");
                }
                built
            })
            .collect();
        Self { patterns }
    }

    /// Zero-based candidate index from a judge reply, clamped into [0, k-1].
    pub fn label(&self, text: &str, k: usize, language: Language) -> Parsed<usize> {
        let upper = k.saturating_sub(1);
        // Only digits are captured, so a parse failure is an overflow
        match self
            .capture(text, language, |p| &p.label)
            .map(|m| m.parse::<usize>().unwrap_or(usize::MAX))
        {
            Some(n) => Parsed::found(n.saturating_sub(1).min(upper)),
            None => Parsed::fallback(DEFAULT_LABEL_INDEX),
        }
    }

    /// Score from a scorer reply, clamped into [`SCORE_RANGE`].
    pub fn score(&self, text: &str, language: Language) -> Parsed<f64> {
        match self
            .capture(text, language, |p| &p.score)
            .and_then(|m| m.replace(',', ".").parse::<f64>().ok())
            .filter(|s| s.is_finite())
        {
            Some(s) => Parsed::found(s.clamp(SCORE_RANGE.0, SCORE_RANGE.1)),
            None => Parsed::fallback(DEFAULT_SCORE),
        }
    }

    /// Rationale text following the reason keyword.
    pub fn rationale(&self, text: &str, language: Language) -> Parsed<String> {
        match self
            .capture(text, language, |p| &p.reason)
            .map(|m| m.trim().trim_end_matches('*').trim().to_string())
            .filter(|s| !s.is_empty())
        {
            Some(r) => Parsed::found(r),
            None => Parsed::fallback(DEFAULT_RATIONALE.to_string()),
        }
    }

    /// Preferred language, then English, then table order.
    fn search_order(&self, preferred: Language) -> Vec<&LanguagePatterns> {
        let rank = |l: Language| match l {
            l if l == preferred => 0,
            Language::En => 1,
            _ => 2,
        };
        let mut order: Vec<&LanguagePatterns> = self.patterns.iter().collect();
        order.sort_by_key(|p| rank(p.language));
        order
    }

    fn capture<'t>(
        &self,
        text: &'t str,
        preferred: Language,
        kind: impl Fn(&LanguagePatterns) -> &KindPatterns,
    ) -> Option<&'t str> {
        let order = self.search_order(preferred);
        let first = |pick: fn(&KindPatterns) -> &Regex| {
            order
                .iter()
                .find_map(|p| pick(kind(p)).captures(text).and_then(|c| c.get(1)))
        };
        first(|k| &k.anchored)
            .or_else(|| first(|k| &k.inline))
            .map(|m| m.as_str())
    }
}

/// Longest-first, escaped, deduplicated alternation.
fn alternation<'a>(words: impl Iterator<Item = &'a str>) -> String {
    let mut words: Vec<&str> = words.collect();
    words.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()).then(a.cmp(b)));
    words.dedup();
    words
        .into_iter()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join("|")
}

fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .map_err(|e| warn!(pattern, error = %e, "Invalid keyword pattern"))
        .ok()
}
