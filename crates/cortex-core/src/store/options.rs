//! `ListOpts` (§4.1) — the option bag shared by `list_memories` and
//! `list_facts`. A plain struct with named fields: there is no stringly-typed
//! map, so "unknown keys are rejected" is enforced by the type system rather
//! than at runtime (§9).

use chrono::{DateTime, Utc};

use crate::model::{FactType, MemoryClass};

/// Sort order for `list_memories` / `list_facts`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    Date,
    Confidence,
    Id,
}

/// Options recognized by `list_memories` / `list_facts` (§4.1).
#[derive(Debug, Clone, Default)]
pub struct ListOpts {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub source_file: Option<String>,
    pub fact_type: Option<FactType>,
    pub memory_classes: Vec<MemoryClass>,
    pub include_superseded: bool,
    pub sort_by: SortBy,
    pub agent: Option<String>,
    pub channel: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
}

impl ListOpts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_source_file(mut self, source_file: impl Into<String>) -> Self {
        self.source_file = Some(source_file.into());
        self
    }

    pub fn with_fact_type(mut self, fact_type: FactType) -> Self {
        self.fact_type = Some(fact_type);
        self
    }

    pub fn with_memory_classes(mut self, classes: Vec<MemoryClass>) -> Self {
        self.memory_classes = classes;
        self
    }

    pub fn with_include_superseded(mut self, include: bool) -> Self {
        self.include_superseded = include;
        self
    }

    pub fn with_sort_by(mut self, sort_by: SortBy) -> Self {
        self.sort_by = sort_by;
        self
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    pub fn with_after(mut self, after: DateTime<Utc>) -> Self {
        self.after = Some(after);
        self
    }

    pub fn with_before(mut self, before: DateTime<Utc>) -> Self {
        self.before = Some(before);
        self
    }
}
