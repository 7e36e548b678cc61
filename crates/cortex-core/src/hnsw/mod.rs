//! In-process HNSW approximate nearest-neighbor index (§4.4).
//!
//! This engine owns the graph itself rather than delegating to an external
//! ANN library, so it can serialize the exact wire format pinned in §6.

mod format;
mod index;

pub use format::{FORMAT_MAGIC, FORMAT_VERSION};
pub use index::{HnswError, HnswParams, HnswResult, Index, DEFAULT_EF_CONSTRUCTION, DEFAULT_EF_SEARCH, DEFAULT_M, DEFAULT_M_MAX0};
