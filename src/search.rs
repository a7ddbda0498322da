//! Exact-text search over the portion of the book the reader has reached.
//!
//! Shares the same position bound as retrieval: text past the reader's
//! position is never scanned, so search results cannot spoil either.

use serde::Serialize;

use crate::library::types::Chunk;

const SNIPPET_BEFORE: usize = 120;
const SNIPPET_AFTER: usize = 180;

#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    pub chunk_id: i64,
    pub chapter_index: i64,
    pub chapter_title: Option<String>,
    pub position_index: i64,
    pub spine_href: Option<String>,
    pub anchor_text: Option<String>,
    pub match_offset_start: usize,
    pub match_offset_end: usize,
    pub match_text: String,
    pub snippet: String,
}

/// Collect up to `limit` case-insensitive matches from position-ordered
/// chunks, with byte offsets into the chunk text and a whitespace-
/// normalized snippet around each hit.
pub fn collect_matches(chunks: &[Chunk], query: &str, limit: usize) -> Vec<SearchMatch> {
    let query = query.trim();
    if query.is_empty() || limit == 0 {
        return Vec::new();
    }
    let query_lower = query.to_lowercase();

    let mut matches = Vec::new();
    for chunk in chunks {
        let text = &chunk.text;
        let text_lower = text.to_lowercase();
        let mut cursor = 0usize;

        while matches.len() < limit {
            let Some(found) = text_lower[cursor..].find(&query_lower) else {
                break;
            };
            let lower_start = cursor + found;
            cursor = lower_start + query_lower.len().max(1);

            // Offsets come from the lowercased copy; case folding can
            // shift byte lengths, so clamp to boundaries of the original.
            let start = floor_char_boundary(text, lower_start.min(text.len()));
            let end = ceil_char_boundary(text, (start + query_lower.len()).min(text.len()));

            let snippet_start = floor_char_boundary(text, start.saturating_sub(SNIPPET_BEFORE));
            let snippet_end = ceil_char_boundary(text, (end + SNIPPET_AFTER).min(text.len()));
            let snippet = text[snippet_start..snippet_end]
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");

            matches.push(SearchMatch {
                chunk_id: chunk.chunk_id,
                chapter_index: chunk.chapter_index,
                chapter_title: chunk.chapter_title.clone(),
                position_index: chunk.position_index,
                spine_href: chunk.source_location.spine_href.clone(),
                anchor_text: chunk.source_location.anchor_text.clone(),
                match_offset_start: start,
                match_offset_end: end,
                match_text: text[start..end].to_string(),
                snippet,
            });
        }

        if matches.len() >= limit {
            break;
        }
    }

    matches
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    while index < text.len() && !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::types::SourceLocation;

    fn chunk(position: i64, text: &str) -> Chunk {
        Chunk {
            chunk_id: position,
            book_id: 1,
            chapter_index: 0,
            chapter_title: Some("One".to_string()),
            position_index: position,
            text: text.to_string(),
            embedding: Vec::new(),
            source_location: SourceLocation {
                spine_href: Some("ch0.xhtml".to_string()),
                anchor_text: None,
            },
        }
    }

    #[test]
    fn finds_case_insensitive_matches_with_offsets() {
        let chunks = vec![chunk(0, "The Whale surfaced. A whale again.")];
        let matches = collect_matches(&chunks, "whale", 10);

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].match_text, "Whale");
        assert_eq!(matches[0].match_offset_start, 4);
        assert_eq!(matches[1].match_text, "whale");
    }

    #[test]
    fn limit_stops_the_scan() {
        let chunks = vec![chunk(0, "echo echo echo"), chunk(1, "echo")];
        let matches = collect_matches(&chunks, "echo", 2);
        assert_eq!(matches.len(), 2);
        assert!(matches.iter().all(|m| m.position_index == 0));
    }

    #[test]
    fn snippet_is_whitespace_normalized() {
        let chunks = vec![chunk(0, "before\n\n  the   target\tword  \nafter")];
        let matches = collect_matches(&chunks, "target", 5);

        assert_eq!(matches.len(), 1);
        assert!(matches[0].snippet.contains("the target word"));
        assert!(!matches[0].snippet.contains('\n'));
    }

    #[test]
    fn multibyte_text_does_not_split_char_boundaries() {
        let text = format!("{}needle{}", "é".repeat(100), "漢".repeat(100));
        let chunks = vec![chunk(0, &text)];
        let matches = collect_matches(&chunks, "needle", 1);

        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].match_text, "needle");
        assert!(!matches[0].snippet.is_empty());
    }

    #[test]
    fn blank_query_matches_nothing() {
        let chunks = vec![chunk(0, "anything")];
        assert!(collect_matches(&chunks, "   ", 10).is_empty());
    }
}
