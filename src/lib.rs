//! Code intelligence and knowledge memory for coding agents, served over
//! newline-delimited JSON-RPC.
//!
//! Palace keeps two local stores per workspace:
//!
//! | Store | Holds | Rebuildable |
//! |-------|-------|-------------|
//! | **Index** (`.palace/index.db`) | Files, symbols, and the relationships between them | Yes, by rescanning |
//! | **Memory** (`.palace/memory.db`) | Ideas, decisions, learnings, postmortems | No |
//!
//! plus an optional **corridor** (`~/.palace/corridor.db`) that records can be
//! promoted into so they are recalled from every workspace.
//!
//! # Architecture
//!
//! - **Parsing**: tree-sitter grammars for Python, JavaScript/TypeScript, Go, and Rust,
//!   normalized into one symbol model
//! - **Storage**: SQLite with FTS5 for BM25 and
//!   [sqlite-vec](https://github.com/asg017/sqlite-vec) for nearest-neighbour candidates
//! - **Embeddings**: a bounded job queue drained by a worker pool, using local ONNX
//!   Runtime or a remote endpoint; searches fall back to lexical ranking without one
//! - **Protocol**: JSON-RPC 2.0 over stdio or a Unix socket, twelve tools
//!
//! # Modules
//!
//! - [`parser`]: source bytes to symbols, relationships, and diagnostics
//! - [`index`]: the code index, scanning, search, and graph traversal
//! - [`memory`]: knowledge records, recall, reflection, and the corridor
//! - [`embedding`]: job queue, worker pool, and hybrid ranking
//! - [`tools`] and [`server`]: the tool catalog and the JSON-RPC server

pub mod cli;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod index;
pub mod memory;
pub mod parser;
pub mod provider;
pub mod server;
pub mod tools;
