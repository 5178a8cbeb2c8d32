//! Config Store (spec §6 "Config file"), grounded on the teacher's
//! `worktree_manager.rs`/`mcp_config_writer.rs` use of `directories` for
//! platform data-dir resolution and `plugin_config_writer.rs`'s
//! read-merge-write JSON pattern, generalized here to a single YAML
//! document via `serde_yaml`.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::error::AppError;

/// `config_max_bytes` (spec §6): refuse to load or persist a document past
/// this size.
pub const MAX_CONFIG_BYTES: u64 = 1024 * 1024;

/// Case-insensitive allowlist of shells the `shell` field may name (spec §6
/// "Config file validation").
pub const ALLOWED_SHELLS: &[&str] = &["powershell.exe", "pwsh.exe", "cmd.exe", "bash.exe", "wsl.exe"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WorktreeSettings {
    #[serde(default)]
    pub enabled: bool,
    pub base_dir: Option<String>,
    #[serde(default)]
    pub force_cleanup: bool,
    #[serde(default)]
    pub setup_scripts: Vec<String>,
    #[serde(default)]
    pub copy_files: Vec<String>,
    #[serde(default)]
    pub copy_dirs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentModelOverride {
    pub name: String,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ClaudeEnvSettings {
    #[serde(default)]
    pub default_enabled: bool,
    #[serde(default)]
    pub vars: HashMap<String, String>,
}

/// `from = "ALL"` is the wildcard matching every model not named by a more
/// specific override (spec §6, Open Question resolved in DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AgentModelSettings {
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(default)]
    pub overrides: Vec<AgentModelOverride>,
}

impl AgentModelSettings {
    pub const WILDCARD: &'static str = "ALL";

    /// Resolves the effective target model for a requested model name:
    /// an exact override wins, then the `ALL` wildcard override, then the
    /// top-level `from`/`to` pair, else the name is unchanged.
    pub fn resolve(&self, requested: &str) -> String {
        if let Some(entry) = self.overrides.iter().find(|o| o.name == requested) {
            return entry.model.clone();
        }
        if let Some(entry) = self.overrides.iter().find(|o| o.name == Self::WILDCARD) {
            return entry.model.clone();
        }
        match (&self.from, &self.to) {
            (Some(from), Some(to)) if from == requested || from == Self::WILDCARD => to.clone(),
            _ => requested.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct McpServerSettings {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub shell: Option<String>,
    pub prefix: String,
    pub keys: HashMap<String, String>,
    pub quake_mode: bool,
    pub global_hotkey: Option<String>,
    pub worktree: WorktreeSettings,
    pub agent_model: AgentModelSettings,
    pub pane_env: HashMap<String, String>,
    pub pane_env_default_enabled: bool,
    pub claude_env: ClaudeEnvSettings,
    pub websocket_port: Option<u16>,
    pub viewer_shortcuts: HashMap<String, String>,
    pub default_session_dir: Option<String>,
    pub mcp_servers: Vec<McpServerSettings>,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            shell: None,
            prefix: "C-b".to_string(),
            keys: HashMap::new(),
            quake_mode: false,
            global_hotkey: None,
            worktree: WorktreeSettings::default(),
            agent_model: AgentModelSettings::default(),
            pane_env: HashMap::new(),
            pane_env_default_enabled: false,
            claude_env: ClaudeEnvSettings::default(),
            websocket_port: None,
            viewer_shortcuts: HashMap::new(),
            default_session_dir: None,
            mcp_servers: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Validates cross-field constraints the schema alone can't express:
    /// the shell allowlist (spec §6).
    pub fn validate(&self) -> Result<(), AppError> {
        if let Some(shell) = &self.shell {
            let allowed = ALLOWED_SHELLS.iter().any(|s| s.eq_ignore_ascii_case(shell));
            if !allowed {
                return Err(AppError::invalid_argument(format!(
                    "shell '{shell}' is not in the allowlist"
                )));
            }
        }
        Ok(())
    }
}

/// Resolves and persists [`AppConfig`] as a single YAML document under the
/// platform config directory (spec §6 "Config file location").
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Four-tier fallback chain (spec §6 "Config file location"):
    /// `$LOCALAPPDATA` (Windows-preferred) -> `$APPDATA` -> `~/.config` ->
    /// the system temp dir. `directories::ProjectDirs::config_dir()` maps
    /// to `$APPDATA` (roaming) on Windows, so the `$LOCALAPPDATA` tier is
    /// tried explicitly first via `config_local_dir()`.
    pub fn default_path() -> PathBuf {
        if let Some(dirs) = directories::ProjectDirs::from("dev", "myt-x", "myt-x") {
            return dirs.config_local_dir().join("config.yaml");
        }
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("myt-x").join("config.yaml");
        }
        if let Some(base_dirs) = directories::BaseDirs::new() {
            return base_dirs.home_dir().join(".config").join("myt-x").join("config.yaml");
        }
        std::env::temp_dir().join("myt-x").join("config.yaml")
    }

    pub fn new(path: PathBuf) -> Self {
        ConfigStore { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the config file, returning the default configuration if it
    /// does not exist. A file over [`MAX_CONFIG_BYTES`] or one that fails
    /// to parse is an error (the caller emits `config:load-failed`, spec
    /// §4.3's event table, and falls back to defaults at the call site).
    pub fn load(&self) -> Result<AppConfig, AppError> {
        if !self.path.exists() {
            return Ok(AppConfig::default());
        }
        let metadata = std::fs::metadata(&self.path).map_err(|e| AppError::io_failed(e.to_string()))?;
        if metadata.len() > MAX_CONFIG_BYTES {
            return Err(AppError::invalid_argument(format!(
                "config file exceeds {MAX_CONFIG_BYTES} bytes"
            )));
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| AppError::io_failed(e.to_string()))?;
        let config: AppConfig =
            serde_yaml::from_str(&contents).map_err(|e| AppError::invalid_argument(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes `config` and writes it atomically: a sibling temp file is
    /// written and fsynced, then renamed over the destination, retrying the
    /// rename step up to 10 times to ride out transient `ETXTBSY`/sharing
    /// violations on some platforms (spec §6 "atomic save").
    pub fn save(&self, config: &AppConfig) -> Result<(), AppError> {
        config.validate()?;
        let yaml = serde_yaml::to_string(config).map_err(|e| AppError::internal(e.to_string()))?;
        if yaml.len() as u64 > MAX_CONFIG_BYTES {
            return Err(AppError::invalid_argument(format!(
                "serialized config exceeds {MAX_CONFIG_BYTES} bytes"
            )));
        }

        let dir = self.path.parent().ok_or_else(|| AppError::internal("config path has no parent"))?;
        std::fs::create_dir_all(dir).map_err(|e| AppError::io_failed(e.to_string()))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| AppError::io_failed(e.to_string()))?;
        tmp.write_all(yaml.as_bytes()).map_err(|e| AppError::io_failed(e.to_string()))?;
        tmp.flush().map_err(|e| AppError::io_failed(e.to_string()))?;
        set_owner_only_permissions(tmp.path());

        let mut last_err = None;
        for attempt in 0..10 {
            match tmp.persist(&self.path) {
                Ok(_) => return Ok(()),
                Err(e) => {
                    last_err = Some(e.error.to_string());
                    tmp = e.file;
                    std::thread::sleep(std::time::Duration::from_millis(5 * (attempt + 1)));
                    continue;
                }
            }
        }
        Err(AppError::io_failed(last_err.unwrap_or_else(|| "persist failed".to_string())))
    }
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o600);
        let _ = std::fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_default_config() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.yaml"));
        let config = store.load().unwrap();
        assert_eq!(config.prefix, "C-b");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(dir.path().join("config.yaml"));
        let mut config = AppConfig::default();
        config.shell = Some("bash.exe".to_string());
        config.quake_mode = true;
        store.save(&config).unwrap();

        let loaded = store.load().unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn shell_outside_allowlist_is_rejected() {
        let mut config = AppConfig::default();
        config.shell = Some("zsh".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn shell_allowlist_check_is_case_insensitive() {
        let mut config = AppConfig::default();
        config.shell = Some("BASH.EXE".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn agent_model_wildcard_override_applies_to_unmatched_names() {
        let settings = AgentModelSettings {
            from: None,
            to: None,
            overrides: vec![
                AgentModelOverride { name: "claude-opus".to_string(), model: "claude-opus-pinned".to_string() },
                AgentModelOverride { name: "ALL".to_string(), model: "claude-sonnet-pinned".to_string() },
            ],
        };
        assert_eq!(settings.resolve("claude-opus"), "claude-opus-pinned");
        assert_eq!(settings.resolve("claude-haiku"), "claude-sonnet-pinned");
    }

    #[test]
    fn oversized_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let huge = "x".repeat((MAX_CONFIG_BYTES + 1) as usize);
        std::fs::write(&path, huge).unwrap();
        let store = ConfigStore::new(path);
        assert!(store.load().is_err());
    }
}
