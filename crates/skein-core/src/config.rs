use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings read from `.skein/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    #[serde(default)]
    pub timeline: TimelineConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineConfig {
    /// Entries materialised by `Timeline::load`.
    #[serde(default = "default_initial_load")]
    pub initial_load: usize,
    /// Page size requested when filling a gap without an explicit amount.
    #[serde(default = "default_fill_page_size")]
    pub fill_page_size: usize,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            initial_load: default_initial_load(),
            fill_page_size: default_fill_page_size(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
        }
    }
}

impl TimelineConfig {
    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Database file; relative paths resolve against the project root.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: default_busy_timeout_ms(),
            path: None,
        }
    }
}

impl StoreConfig {
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// Where the database lives for a project rooted at `project_root`.
    #[must_use]
    pub fn resolve_path(&self, project_root: &Path) -> PathBuf {
        match &self.path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => project_root.join(path),
            None => project_root.join(".skein/timeline.sqlite3"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UserConfig {
    #[serde(default)]
    pub output: Option<String>,
    /// Overrides the project's timeline settings when present.
    #[serde(default)]
    pub timeline: Option<TimelineConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub project: ProjectConfig,
    pub user: UserConfig,
    pub resolved_output: String,
}

impl EffectiveConfig {
    /// Timeline settings after applying the user override.
    #[must_use]
    pub fn timeline(&self) -> TimelineConfig {
        self.user
            .timeline
            .clone()
            .unwrap_or_else(|| self.project.timeline.clone())
    }
}

pub fn load_project_config(project_root: &Path) -> Result<ProjectConfig> {
    let path = project_root.join(".skein/config.toml");
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<ProjectConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn load_user_config() -> Result<UserConfig> {
    let Some(config_dir) = dirs::config_dir() else {
        return Ok(UserConfig::default());
    };

    let path = config_dir.join("skein/config.toml");
    if !path.exists() {
        return Ok(UserConfig::default());
    }

    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    toml::from_str::<UserConfig>(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

pub fn resolve_config(project_root: &Path, cli_json: bool) -> Result<EffectiveConfig> {
    let project = load_project_config(project_root)?;
    let user = load_user_config()?;

    let env_format = env::var("FORMAT").ok();
    let resolved_output = resolve_output(cli_json, user.output.clone(), env_format);

    Ok(EffectiveConfig {
        project,
        user,
        resolved_output,
    })
}

/// Whether `err` came from a config file that failed to parse.
#[must_use]
pub fn is_parse_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<toml::de::Error>())
}

fn resolve_output(cli_json: bool, user_output: Option<String>, env_format: Option<String>) -> String {
    fn normalize_output_mode(raw: &str) -> Option<&'static str> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "human" => Some("pretty"),
            "text" | "table" => Some("text"),
            "json" => Some("json"),
            _ => None,
        }
    }

    if cli_json {
        return "json".to_string();
    }

    if let Some(mode) = env_format.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if let Some(mode) = user_output.as_deref().and_then(normalize_output_mode) {
        return mode.to_string();
    }

    if std::io::stdout().is_terminal() {
        "pretty".to_string()
    } else {
        "text".to_string()
    }
}

const fn default_initial_load() -> usize {
    100
}

const fn default_fill_page_size() -> usize {
    30
}

const fn default_fetch_timeout_ms() -> u64 {
    30_000
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_project_config_uses_defaults() {
        let root = tempfile::tempdir().expect("temp dir");
        let cfg = load_project_config(root.path()).expect("load should succeed");
        assert_eq!(cfg.timeline.initial_load, 100);
        assert_eq!(cfg.timeline.fill_page_size, 30);
        assert_eq!(cfg.timeline.fetch_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.store.busy_timeout(), Duration::from_secs(5));
        assert_eq!(
            cfg.store.resolve_path(root.path()),
            root.path().join(".skein/timeline.sqlite3")
        );
    }

    #[test]
    fn partial_project_config_keeps_other_defaults() {
        let root = tempfile::tempdir().expect("temp dir");
        std::fs::create_dir_all(root.path().join(".skein")).expect("create .skein");
        std::fs::write(
            root.path().join(".skein/config.toml"),
            "[timeline]\ninitial_load = 20\n\n[store]\npath = \"db/rooms.sqlite3\"\n",
        )
        .expect("write config");

        let cfg = load_project_config(root.path()).expect("load");
        assert_eq!(cfg.timeline.initial_load, 20);
        assert_eq!(cfg.timeline.fill_page_size, 30);
        assert_eq!(
            cfg.store.resolve_path(root.path()),
            root.path().join("db/rooms.sqlite3")
        );
    }

    #[test]
    fn malformed_project_config_is_an_error() {
        let root = tempfile::tempdir().expect("temp dir");
        std::fs::create_dir_all(root.path().join(".skein")).expect("create .skein");
        std::fs::write(root.path().join(".skein/config.toml"), "[timeline\n").expect("write");
        assert!(load_project_config(root.path()).is_err());
    }

    #[test]
    fn cli_json_overrides_env_and_config() {
        let output = resolve_output(true, Some("pretty".to_string()), Some("text".to_string()));
        assert_eq!(output, "json");
    }

    #[test]
    fn legacy_aliases_are_normalized() {
        let pretty = resolve_output(false, Some("table".to_string()), Some("human".to_string()));
        assert_eq!(pretty, "pretty");

        let text = resolve_output(false, Some("human".to_string()), Some("table".to_string()));
        assert_eq!(text, "text");
    }

    #[test]
    fn user_timeline_override_wins() {
        let user: UserConfig =
            toml::from_str("output = \"json\"\n[timeline]\ninitial_load = 7\n").expect("parse");
        let effective = EffectiveConfig {
            project: ProjectConfig::default(),
            user,
            resolved_output: "json".into(),
        };
        assert_eq!(effective.timeline().initial_load, 7);
        assert_eq!(effective.timeline().fill_page_size, 30);
    }

    #[test]
    fn malformed_project_config_is_a_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join(".skein")).expect("mkdir");
        std::fs::write(dir.path().join(".skein/config.toml"), "[timeline\ninitial_load = 1")
            .expect("write config");

        let err = load_project_config(dir.path()).expect_err("malformed toml");
        assert!(is_parse_error(&err));
        assert!(!is_parse_error(&anyhow::anyhow!("disk on fire")));
    }
}
