//! Pluggable collaborators (§6, §9): the embedding and LLM providers this
//! crate treats as external capabilities. Concrete HTTP clients for them are
//! out of scope (§1) — only the trait seam lives here.

use std::time::Duration;

use crate::error::Result;

/// Embeds text into fixed-dimension vectors (§6).
///
/// Dimension is constant per provider; a provider swap invalidates the HNSW
/// file (§4.4), which the embed engine detects by comparing `dimensions()`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a batch of texts, returning one vector per input in order.
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Fixed output dimensionality for this provider.
    fn dimensions(&self) -> usize;

    /// Stable identifier persisted alongside each embedding row.
    fn model_id(&self) -> &str;

    /// Per-batch timeout the embed engine should respect (§5).
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }
}

/// Options accepted by `LlmProvider::complete` (§6).
#[derive(Debug, Clone, Default)]
pub struct CompletionOptions {
    pub system: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Text-completion collaborator used by extraction and the `llm` resolver
/// strategy (§6).
pub trait LlmProvider: Send + Sync {
    fn complete(&self, prompt: &str, opts: CompletionOptions) -> Result<String>;
}

/// Strict JSON contract the resolver expects back from `LlmProvider::complete`
/// when asked to adjudicate a conflict (§6, §4.7).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LlmResolution {
    pub winner: u8,
    pub action: String,
    pub confidence: f64,
    pub reason: String,
}

impl LlmResolution {
    pub fn parse(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(crate::error::CoreError::Json)
    }

    pub fn is_confident_non_flag(&self) -> bool {
        self.confidence >= 0.70 && self.action != "flag"
    }
}
