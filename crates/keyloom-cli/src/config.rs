// ABOUTME: Configuration loading and management for keyloom
// ABOUTME: Supports TOML config files with sensible defaults

use anyhow::{Context, Result};
use keyloom_ssh::{KeygenSettings, ShellTransport, DEFAULT_HOME_ROOT};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Key generation tool settings
    pub keygen: KeygenConfig,
    /// How targets are reached
    pub transport: TransportConfig,
    /// Shared parameter store settings
    pub state: StateConfig,
    /// Target filesystem layout
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeygenConfig {
    /// Path to the generation tool on targets (defaults to "ssh-keygen")
    pub binary: String,
    /// Comment used when a request does not supply one
    pub default_comment: String,
}

impl Default for KeygenConfig {
    fn default() -> Self {
        let settings = KeygenSettings::default();
        Self {
            binary: settings.binary,
            default_comment: settings.default_comment,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// ssh client binary used for non-local hosts
    pub ssh_binary: String,
    /// Extra options passed to every ssh invocation
    pub ssh_options: Vec<String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
            ssh_options: vec!["-o".to_string(), "BatchMode=yes".to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Path to the JSON state file
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Parent directory of non-root home directories on targets
    pub home_root: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            home_root: DEFAULT_HOME_ROOT.to_string(),
        }
    }
}

const APP_DIR: &str = "keyloom";
const CONFIG_FILE: &str = "config.toml";
const STATE_FILE: &str = "state.json";

/// `$<var>/keyloom`, or `~/<fallback>/keyloom` when the variable is unset.
fn xdg_app_dir(var: &str, fallback: &[&str]) -> PathBuf {
    let base = match std::env::var_os(var) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            fallback.iter().fold(home, |dir, part| dir.join(part))
        }
    };
    base.join(APP_DIR)
}

impl Config {
    /// Default config file: `$XDG_CONFIG_HOME/keyloom/config.toml`.
    pub fn config_path() -> PathBuf {
        xdg_app_dir("XDG_CONFIG_HOME", &[".config"]).join(CONFIG_FILE)
    }

    /// Default state file: `$XDG_DATA_HOME/keyloom/state.json`.
    pub fn default_state_path() -> PathBuf {
        xdg_app_dir("XDG_DATA_HOME", &[".local", "share"]).join(STATE_FILE)
    }

    /// Load the default config file, falling back to defaults when it is absent.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// The configured state file, or [`Config::default_state_path`].
    pub fn state_path(&self) -> PathBuf {
        self.state
            .path
            .clone()
            .unwrap_or_else(Self::default_state_path)
    }

    pub fn keygen_settings(&self) -> KeygenSettings {
        KeygenSettings {
            binary: self.keygen.binary.clone(),
            default_comment: self.keygen.default_comment.clone(),
        }
    }

    pub fn shell_transport(&self) -> ShellTransport {
        ShellTransport::new()
            .with_ssh_binary(&self.transport.ssh_binary)
            .with_ssh_options(self.transport.ssh_options.clone())
    }

    /// Commented default config file content
    pub fn default_toml() -> String {
        r#"# keyloom configuration
# Location: ~/.config/keyloom/config.toml

[keygen]
binary = "ssh-keygen"
# default_comment = "generated by keyloom"

[transport]
ssh_binary = "ssh"
ssh_options = ["-o", "BatchMode=yes"]

[state]
# path = "~/.local/share/keyloom/state.json"  # Default location

[paths]
home_root = "/home"
"#
        .to_string()
    }

    /// Write the default config to `path` unless a file is already there.
    ///
    /// Returns whether a file was written. The state directory is left to the
    /// store, which creates it on first save.
    pub fn init_at(path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config dir: {}", dir.display()))?;
        }
        if path.exists() {
            return Ok(false);
        }
        std::fs::write(path, Self::default_toml())
            .with_context(|| format!("Failed to write config: {}", path.display()))?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_toml_parses_to_defaults() {
        let config: Config = toml::from_str(&Config::default_toml()).expect("should parse");
        assert_eq!(config.keygen.binary, "ssh-keygen");
        assert_eq!(config.keygen.default_comment, keyloom_ssh::DEFAULT_KEY_COMMENT);
        assert_eq!(config.transport.ssh_options, vec!["-o", "BatchMode=yes"]);
        assert_eq!(config.paths.home_root, "/home");
        assert!(config.state.path.is_none());
    }

    #[test]
    fn test_load_from_partial_file() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(
            &path,
            concat!(
                "[keygen]\nbinary = \"/usr/local/bin/ssh-keygen\"\n\n",
                "[state]\npath = \"/var/lib/keyloom/state.json\"\n",
            ),
        )
        .unwrap();

        let config = Config::load_from(&path).expect("should load");
        assert_eq!(config.keygen.binary, "/usr/local/bin/ssh-keygen");
        assert_eq!(config.keygen.default_comment, keyloom_ssh::DEFAULT_KEY_COMMENT);
        assert_eq!(
            config.state_path(),
            PathBuf::from("/var/lib/keyloom/state.json")
        );
        assert_eq!(config.keygen_settings().binary, "/usr/local/bin/ssh-keygen");
    }

    #[test]
    fn test_init_at_creates_parent_and_keeps_existing() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let path = temp_dir.path().join("nested").join("keyloom").join("config.toml");

        assert!(Config::init_at(&path).expect("should init"));
        let written = std::fs::read_to_string(&path).expect("should read config");
        assert_eq!(written, Config::default_toml());

        std::fs::write(&path, "[paths]\nhome_root = \"/Users\"\n").unwrap();
        assert!(!Config::init_at(&path).expect("should init again"));
        let config = Config::load_from(&path).expect("should load");
        assert_eq!(config.paths.home_root, "/Users");
    }

    #[test]
    fn test_default_state_path_is_named_state_json() {
        let config = Config::default();
        let path = config.state_path();
        assert_eq!(path.file_name().and_then(|n| n.to_str()), Some("state.json"));
        assert_eq!(
            path.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()),
            Some("keyloom")
        );
    }

    #[test]
    fn test_load_from_invalid_file_names_path() {
        let temp_dir = TempDir::new().expect("should create temp dir");
        let path = temp_dir.path().join("config.toml");
        std::fs::write(&path, "[keygen\n").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(format!("{err}").contains("Failed to parse config"));
    }
}
