//! Property tests for boundary-aware chunking.

use docqa_rag::chunking::{BoundaryChunker, Chunker};
use proptest::prelude::*;

/// Prose with sentence terminators and paragraph breaks.
fn arb_prose() -> impl Strategy<Value = String> {
    proptest::collection::vec(
        ("[A-Za-z]{1,10}", prop_oneof![Just(" "), Just(". "), Just("! "), Just("? "), Just("\n\n")]),
        0..300,
    )
    .prop_map(|words| words.into_iter().map(|(w, sep)| w + sep).collect())
}

/// Words separated by single spaces, so no window is ever pulled back.
fn arb_plain_words() -> impl Strategy<Value = String> {
    proptest::collection::vec("[a-z]{1,8}", 1..300).prop_map(|words| words.join(" "))
}

fn arb_chunker() -> impl Strategy<Value = BoundaryChunker> {
    (20usize..400, 0usize..120).prop_map(|(size, overlap)| BoundaryChunker::new(size, overlap))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn chunking_is_deterministic(text in arb_prose(), chunker in arb_chunker()) {
        prop_assert_eq!(chunker.chunk(&text, 1), chunker.chunk(&text, 1));
    }

    #[test]
    fn chunks_meet_floor_and_are_numbered(text in arb_prose(), chunker in arb_chunker()) {
        let chunks = chunker.chunk(&text, 4);
        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert_eq!(chunk.chunk_index, i);
            prop_assert_eq!(chunk.page_number, 4);
            prop_assert_eq!(chunk.content.trim(), chunk.content.as_str());
            prop_assert!(chunk.content.chars().count() >= chunker.min_chunk_size());
        }
    }

    #[test]
    fn windows_advance_and_overlap_is_bounded(text in arb_prose(), chunker in arb_chunker()) {
        let len = text.chars().count();
        let spans = chunker.spans(&text);
        prop_assert_eq!(spans.is_empty(), len == 0);

        for &(start, end) in &spans {
            prop_assert!(start < end && end <= len);
        }
        for pair in spans.windows(2) {
            let ((start, end), (next_start, _)) = (pair[0], pair[1]);
            prop_assert!(next_start > start);
            prop_assert!(end.saturating_sub(next_start) <= chunker.effective_overlap());
        }
    }

    #[test]
    fn windows_cover_plain_text(text in arb_plain_words(), chunker in arb_chunker()) {
        let len = text.chars().count();
        let spans = chunker.spans(&text);

        prop_assert_eq!(spans.first().map(|s| s.0), Some(0));
        prop_assert_eq!(spans.last().map(|s| s.1), Some(len));
        for pair in spans.windows(2) {
            // No gaps between consecutive windows.
            prop_assert!(pair[1].0 <= pair[0].1);
        }
    }
}

#[test]
fn sentence_boundaries_are_preferred() {
    let text = "Alpha beta gamma delta epsilon zeta eta theta iota kappa lambda mu. \
                Nu xi omicron pi rho sigma tau upsilon phi chi psi omega and more words here. \
                Final sentence closes the page with enough characters to pass the floor.";
    let chunker = BoundaryChunker::new(100, 10).with_min_chunk_size(20);
    let chunks = chunker.chunk(text, 2);

    assert!(chunks.len() >= 2);
    assert!(chunks[0].content.ends_with("lambda mu."));
}
