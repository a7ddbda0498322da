//! Book library: persistent chunk/position/turn storage and the ingest
//! pipeline that populates it.

pub mod ingest;
pub mod store;
pub mod types;

pub use ingest::{IngestLock, IngestSummary};
pub use store::{ChunkDraft, LibraryStore};
pub use types::{
    Book, Chapter, ChapterDraft, Chunk, EmbeddingStatus, QaTurn, ReadingPosition,
    ResolvedCitation, SourceLocation,
};
