//! Layered configuration (§6, §10): explicit args > environment > defaults.

use std::path::PathBuf;

/// Resolved configuration for a `Store` / engine instance.
#[derive(Debug, Clone)]
pub struct CortexConfig {
    /// Path to the primary SQLite database file.
    pub db_path: PathBuf,
    /// Open the store read-only (§4.1).
    pub read_only: bool,
    /// Whether the embed collaborator is enabled for this run.
    pub embed_enabled: bool,
    /// Whether reasoning telemetry (§6) should be written.
    pub telemetry_enabled: bool,
}

impl CortexConfig {
    /// Build configuration from an explicit db path, falling back to
    /// `DB_PATH`/`READ_ONLY`/`EMBED`/`REASON_TELEMETRY` env vars, then to the
    /// platform default data directory.
    pub fn resolve(db_path: Option<PathBuf>) -> crate::error::Result<Self> {
        let db_path = match db_path.or_else(|| std::env::var("DB_PATH").ok().map(expand_home)) {
            Some(p) => p,
            None => default_db_path()?,
        };

        let read_only = std::env::var("READ_ONLY")
            .map(|v| parse_bool(&v))
            .unwrap_or(false);

        let embed_enabled = std::env::var("EMBED")
            .map(|v| parse_bool(&v))
            .unwrap_or(true);

        let telemetry_enabled = std::env::var("REASON_TELEMETRY")
            .map(|v| !is_falsey(&v))
            .unwrap_or(true);

        Ok(Self {
            db_path,
            read_only,
            embed_enabled,
            telemetry_enabled,
        })
    }

    /// Path to the HNSW index file, alongside the database (§6).
    pub fn hnsw_path(&self) -> PathBuf {
        self.db_path
            .parent()
            .map(|d| d.join("hnsw.idx"))
            .unwrap_or_else(|| PathBuf::from("hnsw.idx"))
    }

    /// Path to the embed run lock file, alongside the database (§5, §6).
    pub fn embed_lock_path(&self) -> PathBuf {
        self.db_path
            .parent()
            .map(|d| d.join("embed.lock"))
            .unwrap_or_else(|| PathBuf::from("embed.lock"))
    }
}

fn default_db_path() -> crate::error::Result<PathBuf> {
    let proj_dirs = directories::ProjectDirs::from("com", "cortex", "core").ok_or_else(|| {
        crate::error::CoreError::Fatal("could not determine project directories".to_string())
    })?;
    let data_dir = proj_dirs.data_dir();
    std::fs::create_dir_all(data_dir)?;
    Ok(data_dir.join("cortex.db"))
}

fn expand_home(raw: String) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = directories::UserDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home.join(rest);
        }
    } else if raw == "~" {
        if let Some(home) = directories::UserDirs::new().map(|d| d.home_dir().to_path_buf()) {
            return home;
        }
    }
    PathBuf::from(raw)
}

fn parse_bool(v: &str) -> bool {
    matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn is_falsey(v: &str) -> bool {
    matches!(
        v.to_lowercase().as_str(),
        "off" | "0" | "false" | "no" | "disabled"
    )
}
