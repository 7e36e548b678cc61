//! Core data model (§3): memories, facts, embeddings, access events, alerts,
//! projects, and fact edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Class of a memory, used for class-aware search boosting (§4.5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MemoryClass {
    Rule,
    Decision,
    Preference,
    Identity,
    Status,
    Scratch,
}

impl MemoryClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryClass::Rule => "rule",
            MemoryClass::Decision => "decision",
            MemoryClass::Preference => "preference",
            MemoryClass::Identity => "identity",
            MemoryClass::Status => "status",
            MemoryClass::Scratch => "scratch",
        }
    }
}

impl std::str::FromStr for MemoryClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rule" => Ok(MemoryClass::Rule),
            "decision" => Ok(MemoryClass::Decision),
            "preference" => Ok(MemoryClass::Preference),
            "identity" => Ok(MemoryClass::Identity),
            "status" => Ok(MemoryClass::Status),
            "scratch" => Ok(MemoryClass::Scratch),
            other => Err(format!("unknown memory class: {other}")),
        }
    }
}

impl std::fmt::Display for MemoryClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured metadata carried alongside a memory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub agent: Option<String>,
    pub channel: Option<String>,
    pub model: Option<String>,
    pub tokens_in: Option<u32>,
    pub tokens_out: Option<u32>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// One ingested content chunk (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: i64,
    pub content: String,
    pub content_hash: String,
    pub source_file: Option<String>,
    pub source_line: Option<u32>,
    pub source_section: Option<String>,
    pub imported_at: DateTime<Utc>,
    pub project: Option<String>,
    pub class: Option<MemoryClass>,
    pub metadata: MemoryMetadata,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Memory {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Atomic assertion type (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FactType {
    Kv,
    Temporal,
    Identity,
    Relationship,
    Location,
    Preference,
    Rule,
    Decision,
    State,
    Status,
    Scratch,
    Config,
}

impl FactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactType::Kv => "kv",
            FactType::Temporal => "temporal",
            FactType::Identity => "identity",
            FactType::Relationship => "relationship",
            FactType::Location => "location",
            FactType::Preference => "preference",
            FactType::Rule => "rule",
            FactType::Decision => "decision",
            FactType::State => "state",
            FactType::Status => "status",
            FactType::Scratch => "scratch",
            FactType::Config => "config",
        }
    }
}

impl std::str::FromStr for FactType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "kv" => Ok(FactType::Kv),
            "temporal" => Ok(FactType::Temporal),
            "identity" => Ok(FactType::Identity),
            "relationship" => Ok(FactType::Relationship),
            "location" => Ok(FactType::Location),
            "preference" => Ok(FactType::Preference),
            "rule" => Ok(FactType::Rule),
            "decision" => Ok(FactType::Decision),
            "state" => Ok(FactType::State),
            "status" => Ok(FactType::Status),
            "scratch" => Ok(FactType::Scratch),
            "config" => Ok(FactType::Config),
            other => Err(format!("unknown fact type: {other}")),
        }
    }
}

impl std::fmt::Display for FactType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a fact (§4.7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FactState {
    Active,
    Core,
    Retired,
    Superseded,
}

impl FactState {
    pub fn as_str(&self) -> &'static str {
        match self {
            FactState::Active => "active",
            FactState::Core => "core",
            FactState::Retired => "retired",
            FactState::Superseded => "superseded",
        }
    }
}

impl std::str::FromStr for FactState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(FactState::Active),
            "core" => Ok(FactState::Core),
            "retired" => Ok(FactState::Retired),
            "superseded" => Ok(FactState::Superseded),
            other => Err(format!("unknown fact state: {other}")),
        }
    }
}

impl std::fmt::Display for FactState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Default per-day decay rate (λ) for new facts.
pub const DEFAULT_DECAY_RATE: f64 = 0.01;

/// An atomic assertion extracted from a memory (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: i64,
    pub memory_id: i64,
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub fact_type: FactType,
    pub confidence: f64,
    pub decay_rate: f64,
    pub created_at: DateTime<Utc>,
    pub last_reinforced: DateTime<Utc>,
    pub state: FactState,
    pub superseded_by: Option<i64>,
    pub source_quote: Option<String>,
    pub agent: Option<String>,
}

impl Fact {
    /// Effective confidence at time `now` (§4.5, invariant 3).
    ///
    /// `confidence * exp(-decay_rate * max(0, days_since_last_reinforced))`,
    /// monotonically non-increasing in elapsed time absent reinforcement.
    pub fn effective_confidence_at(&self, now: DateTime<Utc>) -> f64 {
        crate::lifecycle::decay::effective_confidence(
            self.confidence,
            self.decay_rate,
            self.last_reinforced,
            now,
        )
    }

    /// Effective confidence as of now.
    pub fn effective_confidence(&self) -> f64 {
        self.effective_confidence_at(Utc::now())
    }
}

/// A fixed-dimension embedding for a memory (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub memory_id: i64,
    pub vector: Vec<f32>,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// Kind of fact access (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AccessType {
    Reinforce,
    Reference,
    Import,
    Supersede,
    Retire,
    Promote,
}

impl AccessType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessType::Reinforce => "reinforce",
            AccessType::Reference => "reference",
            AccessType::Import => "import",
            AccessType::Supersede => "supersede",
            AccessType::Retire => "retire",
            AccessType::Promote => "promote",
        }
    }
}

impl std::str::FromStr for AccessType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "reinforce" => Ok(AccessType::Reinforce),
            "reference" => Ok(AccessType::Reference),
            "import" => Ok(AccessType::Import),
            "supersede" => Ok(AccessType::Supersede),
            "retire" => Ok(AccessType::Retire),
            "promote" => Ok(AccessType::Promote),
            other => Err(format!("unknown access type: {other}")),
        }
    }
}

/// Append-only log entry of a fact interaction (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessEvent {
    pub id: i64,
    pub fact_id: i64,
    pub actor: Option<String>,
    pub access_type: AccessType,
    pub created_at: DateTime<Utc>,
}

/// Severity of an observability alert (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

impl std::str::FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(AlertSeverity::Info),
            "warning" => Ok(AlertSeverity::Warning),
            "critical" => Ok(AlertSeverity::Critical),
            other => Err(format!("unknown severity: {other}")),
        }
    }
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
        }
    }
}

/// Unacknowledged observability event (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub fact_id: Option<i64>,
    pub related_fact_id: Option<i64>,
    pub message: String,
    pub detail: serde_json::Value,
    pub acknowledged: bool,
    pub created_at: DateTime<Utc>,
}

/// A named tag aggregating memories/facts for scoped queries (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub name: String,
    pub auto_tag_rules: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Type of a directed relation between two facts (§3).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EdgeType {
    Contradicts,
    RelatesTo,
    DerivedFrom,
}

impl EdgeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeType::Contradicts => "contradicts",
            EdgeType::RelatesTo => "relates_to",
            EdgeType::DerivedFrom => "derived_from",
        }
    }
}

impl std::str::FromStr for EdgeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "contradicts" => Ok(EdgeType::Contradicts),
            "relates_to" => Ok(EdgeType::RelatesTo),
            "derived_from" => Ok(EdgeType::DerivedFrom),
            other => Err(format!("unknown edge type: {other}")),
        }
    }
}

/// A directed typed relation between two facts (§3, knowledge graph).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactEdge {
    pub id: i64,
    pub from_fact: i64,
    pub to_fact: i64,
    pub edge_type: EdgeType,
    pub created_at: DateTime<Utc>,
}
