//! # RAG Harness
//!
//! A tag-partitioned retrieval-augmented generation service.
//!
//! RAG Harness ingests heterogeneous documents (direct uploads or every file
//! of a cloned Git repository) into a vector index partitioned by knowledge
//! tag, and answers chat requests grounded in two similarity searches —
//! knowledge context plus conversational memory — streaming model tokens
//! back to the caller.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────┐
//! │ Upload / Git │──▶│   Pipeline   │──▶│  Vector   │
//! │   sources    │   │ Parse+Chunk  │   │   index   │
//! └──────────────┘   └──────────────┘   └─────┬─────┘
//!                                             │
//!                        ┌────────────────────┤
//!                        ▼                    ▼
//!                  ┌───────────┐       ┌────────────┐
//!                  │    CLI    │       │    HTTP    │
//!                  │  (ragd)   │       │ (axum API) │
//!                  └───────────┘       └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! ragd tags                               # list registered knowledge tags
//! ragd upload docs manual.pdf notes.md    # index files under tag "docs"
//! ragd analyze https://host/group/repo.git
//! ragd serve                              # start the HTTP API
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Lossless document chunking |
//! | [`extract`] | PDF/DOCX/plain-text parsing |
//! | [`registry`] | Knowledge tag registry |
//! | [`store`] | Vector index abstraction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`chat`] | Chat model abstraction |
//! | [`fetch`] | Git repository fetcher |
//! | [`ingest`] | Ingestion pipeline |
//! | [`orchestrate`] | Retrieval-augmented chat orchestration |
//! | [`server`] | HTTP API server |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod fetch;
pub mod ingest;
pub mod models;
pub mod orchestrate;
pub mod registry;
pub mod server;
pub mod store;
