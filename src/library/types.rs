use serde::{Deserialize, Serialize};

/// Where a chunk lives in the rendered book. Opaque to ranking; the reader
/// UI uses it to navigate and to report positions back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Spine item the chunk belongs to.
    pub spine_href: Option<String>,
    /// Short excerpt of the chunk's opening text, used as a navigation
    /// anchor inside the spine item.
    pub anchor_text: Option<String>,
}

/// Immutable unit of book text. Written once at ingest, deleted only with
/// the owning book. `(chapter_index, position_index)` is a strictly
/// increasing total order over a book's chunks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: i64,
    pub book_id: i64,
    pub chapter_index: i64,
    pub chapter_title: Option<String>,
    /// Globally monotonic across the whole book.
    pub position_index: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
    pub source_location: SourceLocation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Book {
    pub book_id: i64,
    pub title: String,
    pub author: String,
    pub total_chunks: i64,
    pub embedding_status: EmbeddingStatus,
    pub created_at: String,
}

/// Visibility state of a book's chunk set. Readers only ever observe a
/// complete set: the flip to `Ready` happens after every chunk and vector
/// is durably stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    Processing,
    Ready,
    Failed,
}

impl EmbeddingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingStatus::Processing => "processing",
            EmbeddingStatus::Ready => "ready",
            EmbeddingStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw {
            "ready" => EmbeddingStatus::Ready,
            "failed" => EmbeddingStatus::Failed,
            _ => EmbeddingStatus::Processing,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chapter {
    pub chapter_index: i64,
    pub title: Option<String>,
    pub spine_href: Option<String>,
    pub start_position: i64,
    pub end_position: i64,
}

/// The reader's current place in a book. The pair
/// `(chapter_index, position_index)` drives the admissibility gate; the
/// percent fields are display-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingPosition {
    pub chapter_index: i64,
    pub position_index: i64,
    pub chapter_percent: Option<f64>,
    pub book_percent: Option<f64>,
}

impl ReadingPosition {
    pub fn new(chapter_index: i64, position_index: i64) -> Self {
        Self {
            chapter_index,
            position_index,
            chapter_percent: None,
            book_percent: None,
        }
    }
}

/// One citation as it appears in a finished answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedCitation {
    pub chunk_id: i64,
    /// 1-based index the answer text refers to after normalization.
    pub display_index: usize,
    pub chapter_index: i64,
    pub position_index: i64,
    pub source_location: SourceLocation,
}

/// One question/answer exchange. Immutable once the answer completes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaTurn {
    pub question: String,
    pub answer_text: String,
    pub resolved_citations: Vec<ResolvedCitation>,
    /// The reading position at ask-time.
    pub position_context: Option<ReadingPosition>,
    pub model: String,
    pub timestamp: String,
}

/// Chapter text handed to the ingest pipeline. EPUB parsing happens
/// upstream; the engine only sees extracted text.
#[derive(Debug, Clone, Deserialize)]
pub struct ChapterDraft {
    pub title: Option<String>,
    pub spine_href: Option<String>,
    pub text: String,
}
