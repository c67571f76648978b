//! Merging retrieved passages into one LLM context.
//!
//! Passages are reduced to the snippets around query terms when any term
//! occurs in them, tagged with their source, joined, and truncated to a token
//! budget approximated at four characters per token.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::document::SearchResult;

/// Characters assumed per token when sizing LLM input.
pub const CHARS_PER_TOKEN: usize = 4;

const ELLIPSIS: &str = "...";

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\w+\b").expect("word pattern is valid"));

/// Extract windows of `context_size` characters around every occurrence of a
/// query term.
///
/// Terms are the words of the query, matched case-insensitively anywhere in
/// `text`. A window cut short of the text's start or end gets a `...`
/// marker on that side. Duplicate snippets are dropped and the rest are
/// returned shortest first. Returns an empty `Vec` when nothing matches.
pub fn extract_snippets(text: &str, query: &str, context_size: usize) -> Vec<String> {
    let lowered = query.to_lowercase();
    let terms: BTreeSet<&str> = WORD.find_iter(&lowered).map(|m| m.as_str()).collect();
    if terms.is_empty() || text.is_empty() {
        return Vec::new();
    }

    // Longer terms first so a term never loses to its own prefix.
    let mut ordered: Vec<&str> = terms.into_iter().collect();
    ordered.sort_by_key(|t| std::cmp::Reverse(t.len()));
    let pattern = ordered.iter().map(|t| regex::escape(t)).collect::<Vec<_>>().join("|");
    let Ok(matcher) = RegexBuilder::new(&pattern).case_insensitive(true).build() else {
        return Vec::new();
    };

    // Byte offset of every char, plus the end of the text.
    let offsets: Vec<usize> =
        text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
    let char_len = offsets.len() - 1;
    let char_at = |byte: usize| offsets.partition_point(|&o| o < byte);

    let mut unique = BTreeSet::new();
    for m in matcher.find_iter(text) {
        let start = char_at(m.start()).saturating_sub(context_size);
        let end = (char_at(m.end()) + context_size).min(char_len);

        let mut snippet = String::new();
        if start > 0 {
            snippet.push_str(ELLIPSIS);
        }
        snippet.push_str(&text[offsets[start]..offsets[end]]);
        if end < char_len {
            snippet.push_str(ELLIPSIS);
        }
        unique.insert(snippet);
    }

    let mut snippets: Vec<String> = unique.into_iter().collect();
    snippets.sort_by_key(|s| s.chars().count());
    snippets
}

/// Truncate `text` to `max_tokens * 4` characters.
///
/// If the last `.` inside the budget lies beyond 80% of it, the text is cut
/// right after that period. Otherwise it is hard-cut and ends with `...`,
/// with the marker counted inside the budget. A budget too small for the
/// marker gets a bare cut.
pub fn truncate_for_llm(text: &str, max_tokens: usize) -> String {
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let truncated: Vec<char> = text.chars().take(max_chars).collect();
    let late_period =
        truncated.iter().rposition(|&c| c == '.').filter(|&pos| pos * 5 > max_chars * 4);
    if let Some(pos) = late_period {
        return truncated[..=pos].iter().collect();
    }

    if max_chars < ELLIPSIS.len() {
        return truncated.into_iter().collect();
    }
    let keep = max_chars - ELLIPSIS.len();
    let mut out: String = truncated[..keep].iter().collect();
    out.push_str(ELLIPSIS);
    out
}

/// Builds the LLM context from the best retrieved passages.
#[derive(Debug, Clone)]
pub struct PassageCombiner {
    max_passages: usize,
    max_tokens: usize,
    snippet_context: usize,
}

impl PassageCombiner {
    /// Create a combiner using at most `max_passages` results and a budget
    /// of `max_tokens` tokens.
    pub fn new(max_passages: usize, max_tokens: usize) -> Self {
        Self { max_passages, max_tokens, snippet_context: 100 }
    }

    /// Set the number of characters kept on each side of a query term.
    pub fn with_snippet_context(mut self, chars: usize) -> Self {
        self.snippet_context = chars;
        self
    }

    /// Combine the top results into a single tagged, truncated context.
    ///
    /// Each passage is emitted as `[Source: <title>, Page: <page>] <text>`,
    /// once per snippet, or once with the full content when no query term
    /// occurs in it. Passages are separated by a blank line.
    pub fn combine(&self, results: &[SearchResult], query: &str) -> String {
        let mut passages = Vec::new();
        for result in results.iter().take(self.max_passages) {
            let meta = &result.metadata;
            let tag = format!("[Source: {}, Page: {}]", meta.document_title, meta.page_number);
            let snippets = extract_snippets(&meta.content, query, self.snippet_context);
            if snippets.is_empty() {
                passages.push(format!("{tag} {}", meta.content));
            } else {
                passages.extend(snippets.into_iter().map(|s| format!("{tag} {s}")));
            }
        }
        truncate_for_llm(&passages.join("\n\n"), self.max_tokens)
    }
}

impl Default for PassageCombiner {
    fn default() -> Self {
        Self::new(3, 4000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ChunkMetadata;

    fn hit(title: &str, page: u32, content: &str, score: f32) -> SearchResult {
        SearchResult {
            embedding_id: "0".into(),
            distance: score * 2.0 - 1.0,
            score,
            metadata: ChunkMetadata {
                document_id: 1,
                document_title: title.into(),
                content: content.into(),
                page_number: page,
                chunk_index: 0,
            },
        }
    }

    #[test]
    fn snippet_spanning_whole_text_has_no_markers() {
        let snippets = extract_snippets("The cat sat on the mat", "cat", 100);
        assert_eq!(snippets, vec!["The cat sat on the mat".to_string()]);
    }

    #[test]
    fn snippet_markers_on_cut_sides() {
        let text = "aaaaaaaaaa needle bbbbbbbbbb";
        let snippets = extract_snippets(text, "NEEDLE", 3);
        assert_eq!(snippets, vec!["...aa needle bb...".to_string()]);
    }

    #[test]
    fn snippets_deduplicated_and_sorted_by_length() {
        let text = "cat cat";
        let snippets = extract_snippets(text, "cat", 0);
        assert_eq!(snippets, vec!["...cat".to_string(), "cat...".to_string()]);

        let long = "x".repeat(20) + " dog " + &"y".repeat(3);
        let snippets = extract_snippets(&long, "dog", 5);
        assert_eq!(snippets.len(), 1);
        assert!(snippets[0].starts_with("..."));
        assert!(!snippets[0].ends_with("..."));
    }

    #[test]
    fn no_match_or_no_terms_yields_nothing() {
        assert!(extract_snippets("The cat sat", "dog", 10).is_empty());
        assert!(extract_snippets("The cat sat", "?!", 10).is_empty());
    }

    #[test]
    fn snippets_respect_multibyte_text() {
        let text = "über café naïve résumé";
        let snippets = extract_snippets(text, "café", 2);
        assert_eq!(snippets, vec!["...r café n...".to_string()]);
    }

    #[test]
    fn truncation_prefers_late_sentence_end() {
        // Budget of 40 chars; the period sits at index 35, past 80%.
        let text = format!("{}. {}", "a".repeat(35), "b".repeat(40));
        let out = truncate_for_llm(&text, 10);
        assert_eq!(out, format!("{}.", "a".repeat(35)));
        assert!(out.chars().count() <= 40);
    }

    #[test]
    fn truncation_hard_cuts_without_late_period() {
        let text = format!("{}. {}", "a".repeat(5), "b".repeat(100));
        let out = truncate_for_llm(&text, 10);
        assert_eq!(out.chars().count(), 40);
        assert!(out.ends_with("..."));
    }

    #[test]
    fn zero_budget_yields_empty_text() {
        assert_eq!(truncate_for_llm(&"a".repeat(20), 0), "");
    }

    #[test]
    fn short_text_is_unchanged() {
        assert_eq!(truncate_for_llm("short.", 10), "short.");
    }

    #[test]
    fn combine_tags_snippets_and_full_content() {
        let results = vec![
            hit("Guide", 2, "Install the cli with cargo.", 0.9),
            hit("Notes", 7, "Nothing relevant here.", 0.8),
            hit("Extra", 1, "cli again", 0.7),
            hit("Ignored", 1, "cli", 0.6),
        ];
        let combined = PassageCombiner::default().combine(&results, "cli");
        let passages: Vec<&str> = combined.split("\n\n").collect();
        assert_eq!(
            passages,
            vec![
                "[Source: Guide, Page: 2] Install the cli with cargo.",
                "[Source: Notes, Page: 7] Nothing relevant here.",
                "[Source: Extra, Page: 1] cli again",
            ]
        );
    }

    #[test]
    fn combine_respects_budget() {
        let long = "word ".repeat(200);
        let results = vec![hit("Big", 1, &long, 0.9)];
        let combined = PassageCombiner::new(3, 10).combine(&results, "nomatch");
        assert!(combined.chars().count() <= 40);
    }
}
