//! # Compliance RAG
//!
//! Ingests regulatory and audit documents and answers auditor questions
//! with cited excerpts. The retrieval and synthesis pipeline lives in
//! `compliance_rag_core`; this crate supplies the concrete collaborators
//! and the outer surfaces.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────┐
//! │ PDF / DOCX  │──▶│  Ingestor    │──▶│  SQLite   │
//! │ images(OCR) │   │ chunk+embed  │   │ FTS5+Vec  │
//! └─────────────┘   └──────────────┘   └─────┬─────┘
//!                                            │
//!                   ┌────────────────────────┤
//!                   ▼                        ▼
//!              ┌──────────┐   analyze  ┌──────────┐
//!              │   CLI    │──────────▶│  Query   │──▶ cited answer
//!              │  (crag)  │  retrieve  │  Engine  │
//!              └──────────┘ synthesize └──────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`app`] | Collaborator and pipeline wiring |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | Vector and document store over SQLite |
//! | [`extract`] | PDF and DOCX text extraction |
//! | [`ocr`] | OCR engines for scanned content |
//! | [`embedding`] | Embedding providers |
//! | [`generation`] | Answer generators |
//! | [`nlp`] | Entity recognizers |
//! | [`http`] | Shared HTTP client plumbing |
//! | [`server`] | HTTP API |
//! | [`upload`], [`query`], [`status`] | CLI commands |

pub mod app;
pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod http;
pub mod migrate;
pub mod nlp;
pub mod ocr;
pub mod query;
pub mod server;
pub mod sqlite_store;
pub mod status;
pub mod upload;
