pub mod context;
pub mod fill;
pub mod fragments;
pub mod purge;
pub mod show;
pub mod sync;

use anyhow::{Context, Result};
use skein_core::Store;
use skein_core::config::{self, EffectiveConfig};
use std::path::{Path, PathBuf};

/// What every command needs: resolved config and an open store.
pub struct CommandContext {
    pub config: EffectiveConfig,
    pub store: Store,
    pub db_path: PathBuf,
}

impl CommandContext {
    /// Resolve config under `project_root` and open the store, honouring a
    /// `--db` override.
    pub fn open(project_root: &Path, db_override: Option<&Path>, cli_json: bool) -> Result<Self> {
        let config = config::resolve_config(project_root, cli_json)?;
        let db_path = db_override.map_or_else(
            || config.project.store.resolve_path(project_root),
            Path::to_path_buf,
        );
        let store = Store::open(&db_path, &config.project.store)
            .with_context(|| format!("Failed to open timeline store at {}", db_path.display()))?;
        tracing::debug!(db = %db_path.display(), "command context ready");
        Ok(Self {
            config,
            store,
            db_path,
        })
    }
}

/// Read and parse a JSON fixture file.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}
