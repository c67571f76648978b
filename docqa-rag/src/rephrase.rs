//! Readability heuristics and LLM rephrasing.
//!
//! [`Rephraser::needs_rephrasing`] is a pure function of the text: long
//! sentences, a high Flesch-Kincaid grade, legal jargon or passive
//! constructions each mark a passage as hard to read.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::debug;

use crate::error::Result;
use crate::llm::{GenerationRequest, LlmProvider};

/// Average words per sentence above which text is considered complex.
pub const MAX_AVG_SENTENCE_WORDS: f64 = 30.0;

/// Flesch-Kincaid grade above which text is considered hard to read.
pub const MAX_READING_GRADE: f64 = 10.0;

const JARGON: [&str; 15] = [
    "hereby",
    "aforementioned",
    "hereinafter",
    "pursuant",
    "wherein",
    "therein",
    "thereto",
    "whereby",
    "whereas",
    "notwithstanding",
    "henceforth",
    "thereupon",
    "heretofore",
    "inasmuch",
    "aforestated",
];

static PASSIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(is|was|were|are|been|being) (\w+ed)\b").expect("passive pattern is valid")
});

static SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+").expect("sentence pattern is valid"));

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z]+(?:'[A-Za-z]+)?").expect("word pattern is valid"));

fn sentences(text: &str) -> Vec<&str> {
    SENTENCE_END.split(text).map(str::trim).filter(|s| !s.is_empty()).collect()
}

/// Average whitespace-separated words per sentence.
pub fn average_sentence_words(text: &str) -> f64 {
    let sentences = sentences(text);
    let words: usize = sentences.iter().map(|s| s.split_whitespace().count()).sum();
    words as f64 / sentences.len().max(1) as f64
}

/// Estimate syllables by counting vowel groups, ignoring a silent final `e`.
pub fn syllables(word: &str) -> usize {
    let lower = word.to_ascii_lowercase();
    let mut count = 0;
    let mut previous_vowel = false;
    for c in lower.chars() {
        let vowel = matches!(c, 'a' | 'e' | 'i' | 'o' | 'u' | 'y');
        if vowel && !previous_vowel {
            count += 1;
        }
        previous_vowel = vowel;
    }
    if lower.ends_with('e') && !lower.ends_with("le") && count > 1 {
        count -= 1;
    }
    count.max(1)
}

/// Flesch-Kincaid grade level of `text`; `0.0` for text without words.
pub fn flesch_kincaid_grade(text: &str) -> f64 {
    let words: Vec<&str> = WORD.find_iter(text).map(|m| m.as_str()).collect();
    if words.is_empty() {
        return 0.0;
    }
    let sentence_count = sentences(text).len().max(1) as f64;
    let word_count = words.len() as f64;
    let syllable_count: usize = words.iter().map(|w| syllables(w)).sum();
    0.39 * (word_count / sentence_count) + 11.8 * (syllable_count as f64 / word_count) - 15.59
}

/// Rewrites hard-to-read text in plain language.
#[derive(Clone)]
pub struct Rephraser {
    llm: Arc<dyn LlmProvider>,
}

impl Rephraser {
    /// Create a rephraser backed by `llm`.
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Whether the text would read better rephrased.
    pub fn needs_rephrasing(text: &str) -> bool {
        let lower = text.to_lowercase();
        average_sentence_words(text) > MAX_AVG_SENTENCE_WORDS
            || flesch_kincaid_grade(text) > MAX_READING_GRADE
            || JARGON.iter().any(|term| lower.contains(term))
            || PASSIVE.is_match(&lower)
    }

    /// Rephrase `text`, optionally steering it towards `query`.
    pub async fn rephrase(&self, text: &str, query: Option<&str>) -> Result<String> {
        debug!(provider = self.llm.name(), text_len = text.len(), "rephrasing");

        let prompt = match query {
            Some(q) => format!(
                "Please rephrase the following text to make it more relevant to the question: '{q}'\n\n{text}"
            ),
            None => format!("Please rephrase the following text to make it clearer:\n\n{text}"),
        };
        let request = GenerationRequest::new(prompt)
            .with_system_instruction(
                "Rephrase the following text to make it clearer and more readable. \
                 Maintain all important technical details and information. \
                 Do not add new information not present in the original text.",
            )
            .with_temperature(0.3);
        self.llm.generate(&request).await
    }
}
