//! Context assembler: turns ranked chunks into a bounded prompt with
//! per-turn citation markers.

use crate::library::types::Chunk;
use crate::llm::types::ChatMessage;
use crate::qa::retriever::RankedChunk;

const SYSTEM_PROMPT: &str = "\
You are a spoiler-free book companion. Answer ONLY using the provided excerpts.
Do NOT use any knowledge about this book from your training data.
If the excerpts don't contain the answer, say you don't have enough information.
Cite excerpts with their bracketed markers, e.g. [c:12]. Keep the answer concise.";

/// One chunk included in the assembled context, addressable both by its
/// canonical marker (the chunk id) and by its 1-based rank.
#[derive(Debug, Clone)]
pub struct BoundExcerpt {
    pub chunk: Chunk,
    pub score: f32,
}

/// The (marker → chunk) bindings echoed to the citation resolver, in rank
/// order. Resolution never has to re-derive chunk identity from text.
#[derive(Debug, Clone, Default)]
pub struct ContextBindings {
    entries: Vec<BoundExcerpt>,
}

impl ContextBindings {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BoundExcerpt> {
        self.entries.iter()
    }

    /// Canonical lookup: `[c:ID]` markers carry the chunk id itself.
    pub fn by_chunk_id(&self, chunk_id: i64) -> Option<(usize, &BoundExcerpt)> {
        self.entries
            .iter()
            .enumerate()
            .find(|(_, e)| e.chunk.chunk_id == chunk_id)
            .map(|(idx, e)| (idx + 1, e))
    }

    /// Positional lookup for numbered fallback markers, 1-based.
    pub fn by_rank(&self, rank: usize) -> Option<&BoundExcerpt> {
        rank.checked_sub(1).and_then(|idx| self.entries.get(idx))
    }
}

#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub messages: Vec<ChatMessage>,
    pub bindings: ContextBindings,
}

pub struct ContextAssembler {
    char_budget: usize,
}

impl ContextAssembler {
    pub fn new(char_budget: usize) -> Self {
        Self { char_budget }
    }

    /// Build the prompt from ranked chunks. When the total excerpt text
    /// exceeds the character budget, whole chunks are dropped from the
    /// low-scored end; an individual chunk's text is never truncated
    /// (truncation would corrupt citation anchor matching downstream).
    pub fn assemble(&self, question: &str, ranked: Vec<RankedChunk>) -> AssembledContext {
        let mut kept = ranked;
        let mut total: usize = kept
            .iter()
            .map(|r| r.chunk.text.chars().count())
            .sum();
        while kept.len() > 1 && total > self.char_budget {
            if let Some(dropped) = kept.pop() {
                total -= dropped.chunk.text.chars().count();
                tracing::debug!(
                    "context budget exceeded, dropping chunk {} (score {:.3})",
                    dropped.chunk.chunk_id,
                    dropped.score
                );
            }
        }

        let mut excerpts = String::new();
        for item in &kept {
            let chunk = &item.chunk;
            excerpts.push_str(&format!(
                "[c:{}] (Chapter {} | Pos {})\n{}\n\n",
                chunk.chunk_id,
                chunk.chapter_index + 1,
                chunk.position_index,
                chunk.text
            ));
        }

        let user = format!(
            "Question: {}\n\nExcerpts:\n{}",
            question,
            excerpts.trim_end()
        );

        let bindings = ContextBindings {
            entries: kept
                .into_iter()
                .map(|r| BoundExcerpt {
                    chunk: r.chunk,
                    score: r.score,
                })
                .collect(),
        };

        AssembledContext {
            messages: vec![ChatMessage::system(SYSTEM_PROMPT), ChatMessage::user(user)],
            bindings,
        }
    }
}
