//! Fact extraction (§4.3): turns imported `Memory` content into `Fact`
//! subject/predicate/object tuples, either via hand-written rules or an
//! optional `LlmProvider` collaborator.

use std::sync::Arc;

use chrono::Utc;
use regex::Regex;

use crate::collab::{CompletionOptions, LlmProvider};
use crate::error::Result;
use crate::model::{Fact, FactState, FactType, DEFAULT_DECAY_RATE};

/// One candidate extraction before it is persisted as a `Fact` (§4.3).
#[derive(Debug, Clone)]
pub struct ExtractedFact {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub fact_type: FactType,
    pub confidence: f64,
    pub source_quote: String,
}

impl ExtractedFact {
    /// Materialize into a `Fact` ready for `Store::create_fact`, with
    /// `memory_id` filled in by the caller.
    pub fn into_fact(self, memory_id: i64, agent: Option<String>) -> Fact {
        let now = Utc::now();
        Fact {
            id: 0,
            memory_id,
            subject: self.subject,
            predicate: self.predicate,
            object: self.object,
            fact_type: self.fact_type,
            confidence: self.confidence,
            decay_rate: DEFAULT_DECAY_RATE,
            created_at: now,
            last_reinforced: now,
            state: FactState::Active,
            superseded_by: None,
            source_quote: Some(self.source_quote),
            agent,
        }
    }
}

struct Rule {
    pattern: Regex,
    predicate: &'static str,
    fact_type: FactType,
    confidence: f64,
}

/// Hand-written subject/predicate/object rules (§4.3). Ordered most-specific
/// first; a memory can match more than one rule.
fn rules() -> Vec<Rule> {
    vec![
        Rule {
            pattern: Regex::new(r"(?i)^(?P<subject>[\w .-]+?)\s+(?:always|must)\s+(?P<object>.+)$").unwrap(),
            predicate: "must",
            fact_type: FactType::Rule,
            confidence: 0.85,
        },
        Rule {
            pattern: Regex::new(r"(?i)^(?P<subject>[\w .-]+?)\s+never\s+(?P<object>.+)$").unwrap(),
            predicate: "must_not",
            fact_type: FactType::Rule,
            confidence: 0.85,
        },
        Rule {
            pattern: Regex::new(r"(?i)^we\s+decided\s+(?:to\s+)?(?P<object>.+)$").unwrap(),
            predicate: "decided",
            fact_type: FactType::Decision,
            confidence: 0.8,
        },
        Rule {
            pattern: Regex::new(r"(?i)^(?P<subject>i|the team|we)\s+prefer(?:s)?\s+(?P<object>.+)$").unwrap(),
            predicate: "prefers",
            fact_type: FactType::Preference,
            confidence: 0.75,
        },
        Rule {
            pattern: Regex::new(r"(?i)^(?P<subject>[\w .-]+?)\s+is\s+currently\s+(?P<object>.+)$").unwrap(),
            predicate: "status",
            fact_type: FactType::Status,
            confidence: 0.7,
        },
        Rule {
            pattern: Regex::new(r"(?i)^(?P<subject>[\w .-]+?)\s+(?:is|=)\s+(?P<object>.+)$").unwrap(),
            predicate: "is",
            fact_type: FactType::Kv,
            confidence: 0.6,
        },
    ]
}

/// Rule-based extractor with no external dependency. Always available;
/// the baseline path when no `LlmProvider` is configured (§4.3).
pub struct RuleExtractor {
    rules: Vec<Rule>,
}

impl Default for RuleExtractor {
    fn default() -> Self {
        Self { rules: rules() }
    }
}

impl RuleExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extract(&self, content: &str) -> Vec<ExtractedFact> {
        let mut out = Vec::new();
        for sentence in split_sentences(content) {
            let trimmed = sentence.trim();
            if trimmed.is_empty() {
                continue;
            }
            for rule in &self.rules {
                if let Some(caps) = rule.pattern.captures(trimmed) {
                    let subject = caps
                        .name("subject")
                        .map(|m| m.as_str().trim().to_string())
                        .unwrap_or_else(|| "this".to_string());
                    let object = caps.name("object").map(|m| m.as_str().trim().to_string());
                    let Some(object) = object else { continue };
                    out.push(ExtractedFact {
                        subject,
                        predicate: rule.predicate.to_string(),
                        object,
                        fact_type: rule.fact_type,
                        confidence: rule.confidence,
                        source_quote: trimmed.to_string(),
                    });
                    break;
                }
            }
        }
        out
    }
}

fn split_sentences(content: &str) -> Vec<&str> {
    content
        .split(['\n', '.', ';'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Strict JSON contract an `LlmProvider` is prompted to return (§4.3, §6).
#[derive(Debug, Clone, serde::Deserialize)]
struct LlmExtraction {
    subject: String,
    predicate: String,
    object: String,
    #[serde(default)]
    fact_type: Option<String>,
    #[serde(default = "default_llm_confidence")]
    confidence: f64,
}

fn default_llm_confidence() -> f64 {
    0.65
}

/// LLM-backed extractor (§4.3, §6), used when the caller has an
/// `LlmProvider` collaborator configured.
pub struct LlmExtractor {
    provider: Arc<dyn LlmProvider>,
}

impl LlmExtractor {
    pub fn new(provider: Arc<dyn LlmProvider>) -> Self {
        Self { provider }
    }

    pub fn extract(&self, content: &str) -> Result<Vec<ExtractedFact>> {
        let prompt = format!(
            "Extract atomic subject/predicate/object facts from the following note. \
             Respond with a JSON array of objects each shaped \
             {{\"subject\":...,\"predicate\":...,\"object\":...,\"fact_type\":...,\"confidence\":0..1}}. \
             Return an empty array if there is nothing factual to extract.\n\n{content}"
        );
        let raw = self.provider.complete(
            &prompt,
            CompletionOptions {
                system: Some("You extract structured facts. Respond with JSON only.".to_string()),
                max_tokens: Some(1024),
                temperature: Some(0.0),
            },
        )?;
        let parsed: Vec<LlmExtraction> = serde_json::from_str(raw.trim()).map_err(crate::error::CoreError::Json)?;
        Ok(parsed
            .into_iter()
            .map(|e| {
                let fact_type = e
                    .fact_type
                    .as_deref()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(FactType::Kv);
                ExtractedFact {
                    subject: e.subject,
                    predicate: e.predicate,
                    object: e.object,
                    fact_type,
                    confidence: e.confidence.clamp(0.0, 1.0),
                    source_quote: content.to_string(),
                }
            })
            .collect())
    }
}
