//! Citation resolver.
//!
//! Model output references excerpts with markers that are frequently
//! imperfect. Rather than one brittle pattern, independent matcher
//! strategies run in priority order (canonical `[c:ID]` markers first,
//! then numbered fallback brackets) and a single reducer merges their
//! matches into normalized display text plus the resolved citation list.
//!
//! Normalized markers use the excerpt's 1-based rank in the assembled
//! context, so re-resolving already-normalized text maps every `[n]`
//! back to the same chunk.

use std::sync::OnceLock;

use regex::Regex;

use crate::library::types::ResolvedCitation;
use crate::qa::context::ContextBindings;

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    /// Answer text with markers rewritten to normalized `[n]` references.
    pub display_text: String,
    /// Cited chunks, deduplicated by chunk id, in first-occurrence order.
    pub citations: Vec<ResolvedCitation>,
}

#[derive(Debug, Clone, Copy)]
enum MarkerTarget {
    /// Canonical marker carrying a chunk id.
    ChunkId(i64),
    /// Numbered fallback, 1-based rank into the context bindings.
    Rank(usize),
}

#[derive(Debug, Clone, Copy)]
struct MarkerMatch {
    start: usize,
    end: usize,
    target: MarkerTarget,
}

fn canonical_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\[\s*c\s*:\s*(\d+)\s*\]").unwrap())
}

fn fallback_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // ASCII square brackets, CJK black-lens brackets, full-width square
    // brackets. Each style shows up in real model output.
    RE.get_or_init(|| {
        Regex::new(r"\[\s*(\d{1,3})\s*\]|【\s*(\d{1,3})\s*】|［\s*(\d{1,3})\s*］").unwrap()
    })
}

/// Canonical `[c:ID]` markers, whitespace-tolerant.
fn canonical_matches(text: &str) -> Vec<MarkerMatch> {
    canonical_re()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let id: i64 = caps.get(1)?.as_str().parse().ok()?;
            Some(MarkerMatch {
                start: whole.start(),
                end: whole.end(),
                target: MarkerTarget::ChunkId(id),
            })
        })
        .collect()
}

/// Numbered fallback markers in any supported bracket style, skipping
/// spans already claimed by a canonical match.
fn fallback_matches(text: &str, claimed: &[MarkerMatch]) -> Vec<MarkerMatch> {
    fallback_re()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let digits = caps
                .iter()
                .skip(1)
                .flatten()
                .next()?;
            let rank: usize = digits.as_str().parse().ok()?;
            let overlaps = claimed
                .iter()
                .any(|m| whole.start() < m.end && m.start < whole.end());
            if overlaps {
                return None;
            }
            Some(MarkerMatch {
                start: whole.start(),
                end: whole.end(),
                target: MarkerTarget::Rank(rank),
            })
        })
        .collect()
}

/// Parse and normalize every citation marker in `text` against the
/// context bindings of the turn that produced it.
///
/// Markers that resolve are rewritten to `[rank]`; canonical markers with
/// an unknown chunk id are removed (they are unambiguously marker syntax,
/// but the id must never be guessed); numeric brackets that do not map to
/// a bound excerpt are left untouched, since they may be ordinary prose.
/// Text without markers passes through unchanged.
pub fn resolve(text: &str, bindings: &ContextBindings) -> Resolution {
    let canonical = canonical_matches(text);
    let mut matches = fallback_matches(text, &canonical);
    matches.extend(canonical);
    matches.sort_by_key(|m| m.start);

    let mut display_text = String::with_capacity(text.len());
    let mut citations: Vec<ResolvedCitation> = Vec::new();
    let mut cursor = 0usize;

    for marker in matches {
        display_text.push_str(&text[cursor..marker.start]);
        cursor = marker.end;

        let resolved = match marker.target {
            MarkerTarget::ChunkId(id) => bindings.by_chunk_id(id),
            MarkerTarget::Rank(rank) => bindings
                .by_rank(rank)
                .map(|excerpt| (rank, excerpt)),
        };

        match (resolved, marker.target) {
            (Some((rank, excerpt)), _) => {
                display_text.push_str(&format!("[{rank}]"));
                let chunk = &excerpt.chunk;
                if !citations.iter().any(|c| c.chunk_id == chunk.chunk_id) {
                    citations.push(ResolvedCitation {
                        chunk_id: chunk.chunk_id,
                        display_index: rank,
                        chapter_index: chunk.chapter_index,
                        position_index: chunk.position_index,
                        source_location: chunk.source_location.clone(),
                    });
                }
            }
            // Unknown chunk id: drop the marker, never invent a citation.
            (None, MarkerTarget::ChunkId(_)) => {}
            // Unresolvable number: probably prose, keep it verbatim.
            (None, MarkerTarget::Rank(_)) => {
                display_text.push_str(&text[marker.start..marker.end]);
            }
        }
    }
    display_text.push_str(&text[cursor..]);

    Resolution {
        display_text,
        citations,
    }
}
