//! Bookworm backend: a spoiler-safe reading companion engine.
//!
//! Answers questions about a book using only the text the reader has
//! already reached. The core is a position-bounded retrieval pipeline
//! (gate, retriever, context assembler, streaming answerer, citation
//! resolver) over a SQLite-backed library of embedded chunks, with
//! per-session history and citation-jump navigation stacks.

pub mod core;
pub mod engine;
pub mod library;
pub mod llm;
pub mod qa;
pub mod search;
pub mod server;
pub mod session;
pub mod state;
pub mod vector_math;
