//! # rag-testgen
//!
//! Retrieval-augmented generation of test artifacts from product
//! documentation.
//!
//! Documents are normalized to text, split into overlapping word windows,
//! embedded and stored in a similarity index. A free-text request retrieves
//! the most relevant chunks, which ground a generated set of structured test
//! cases; a selected test case plus the target page's markup then yields a
//! UI automation script.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌─────────┐   ┌──────────────┐   ┌──────────┐
//! │  parse   │──▶│  chunk  │──▶│    index     │──▶│  store   │
//! │ pdf/html │   │ 350/80  │   │ embed + gate │   │ mem/sql  │
//! └──────────┘   └─────────┘   └──────┬───────┘   └──────────┘
//!                                     │ retrieve
//!                      ┌──────────────┴──────────────┐
//!                      ▼                             ▼
//!               ┌─────────────┐              ┌─────────────┐
//!               │  testcases  │─── TestCase ─▶│   script    │
//!               └─────────────┘              └─────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`parse`] | Format dispatch and text normalization |
//! | [`chunk`] | Overlapping word-window chunker |
//! | [`embedding`] | Embedding providers and vector helpers |
//! | [`generation`] | Text generation providers |
//! | [`index`] | Knowledge index with single-writer locking |
//! | [`retrieve`] | Top-k retrieval and prompt context assembly |
//! | [`testcases`] | Grounded test-case generation |
//! | [`script`] | Automation script synthesis |
//! | [`pipeline`] | `build_index` / `generate_test_cases` / `generate_script` |
//! | [`store`] | Storage trait, in-memory and SQLite backends |
//! | [`server`] | HTTP API |
//! | [`config`] | TOML configuration |
//! | [`error`] | Error taxonomy |
//! | [`testing`] | Deterministic service doubles |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod migrate;
pub mod models;
pub mod parse;
pub mod pipeline;
pub mod retrieve;
pub mod script;
pub mod server;
pub mod store;
pub mod testcases;
pub mod testing;
