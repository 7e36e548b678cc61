//! Cortex core knowledge engine: durable storage, hybrid search, fact
//! lifecycle (confidence/decay/reinforcement/supersession), and conflict
//! detection + resolution.
//!
//! This crate is the engine beneath a local, import-first memory layer for
//! AI agents. It owns the data model and storage (`store`), the import
//! pipeline (`ingest`), atomic fact extraction (`extract`), the embedding
//! engine and its HNSW acceleration cache (`embed`, `hnsw`), the hybrid
//! search ranker (`search`), observability aggregation (`observe`), the
//! conflict resolver (`resolver`), and the lifecycle sweep (`lifecycle`).
//!
//! Command-line front ends, LLM/embedding provider HTTP clients, and the MCP
//! server transport are deliberately outside this crate's scope; `collab`
//! defines the trait seams they plug into.

pub mod collab;
pub mod config;
pub mod embed;
pub mod error;
pub mod extract;
pub mod hnsw;
pub mod ingest;
pub mod lifecycle;
pub mod model;
pub mod observe;
pub mod resolver;
pub mod search;
pub mod store;

pub use config::CortexConfig;
pub use error::{CoreError, Result};
