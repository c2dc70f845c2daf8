//! # Compliance RAG Core
//!
//! Shared logic for Compliance RAG: data models, chunking, the ingestion
//! pipeline, query analysis, retrieval, answer synthesis, and the
//! collaborator traits (extraction, embedding, generation, entity
//! recognition, vector and document stores) they run against.
//!
//! This crate contains no sqlx, HTTP, or filesystem I/O. Concrete
//! collaborators live in the `compliance-rag` application crate; the
//! [`offline`] module and [`store::memory`] provide deterministic ones.
//!
//! Every fallible operation returns [`crate::Error`]; see [`error`] for
//! which variants are retried.

pub mod analyze;
pub mod cancel;
pub mod chunk;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod generate;
pub mod ingest;
pub mod models;
pub mod offline;
pub mod retrieve;
pub mod retry;
pub mod store;
pub mod synthesize;
pub mod text;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
