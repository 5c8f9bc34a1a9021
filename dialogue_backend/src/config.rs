use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Buffer limits and protocol switches for the stream parser.
///
/// Caps are measured in characters. Once a buffer grows past its cap it is
/// cut down to its `*_keep` tail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserSettings {
    #[serde(default = "default_pre_buffer_cap")]
    pub pre_buffer_cap: usize,
    #[serde(default = "default_pre_buffer_keep")]
    pub pre_buffer_keep: usize,
    #[serde(default = "default_content_buffer_cap")]
    pub content_buffer_cap: usize,
    #[serde(default = "default_content_buffer_keep")]
    pub content_buffer_keep: usize,

    // Enter content mode without a <content> wrapper when protocol tags show up
    #[serde(default)]
    pub implicit_content: bool,
    #[serde(default = "default_true")]
    pub miphone_wrapper: bool,

    // Sibling classifiers
    #[serde(default = "default_true")]
    pub group_chat: bool,
    #[serde(default = "default_true")]
    pub moments: bool,
}

fn default_pre_buffer_cap() -> usize {
    80_000
}

fn default_pre_buffer_keep() -> usize {
    40_000
}

fn default_content_buffer_cap() -> usize {
    160_000
}

fn default_content_buffer_keep() -> usize {
    80_000
}

fn default_true() -> bool {
    true
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            pre_buffer_cap: default_pre_buffer_cap(),
            pre_buffer_keep: default_pre_buffer_keep(),
            content_buffer_cap: default_content_buffer_cap(),
            content_buffer_keep: default_content_buffer_keep(),
            implicit_content: false,
            miphone_wrapper: true,
            group_chat: true,
            moments: true,
        }
    }
}

impl ParserSettings {
    /// Keep sizes never exceed their caps.
    pub fn pre_keep(&self) -> usize {
        self.pre_buffer_keep.min(self.pre_buffer_cap)
    }

    pub fn content_keep(&self) -> usize {
        self.content_buffer_keep.min(self.content_buffer_cap)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySettings {
    #[serde(default = "default_true")]
    pub fallback_reparse: bool,
}

impl Default for RecoverySettings {
    fn default() -> Self {
        Self {
            fallback_reparse: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueConfig {
    // Identity used to resolve "{user}和{other}的私聊" tag names
    #[serde(default = "default_user_name")]
    pub user_name: String,

    #[serde(default)]
    pub parser: ParserSettings,

    #[serde(default)]
    pub recovery: RecoverySettings,

    // Persistence
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_conversation_id")]
    pub default_conversation_id: String,

    // Names the loose-tag classifier may resolve bare tags against
    #[serde(default)]
    pub known_contacts: Vec<String>,
    #[serde(default)]
    pub known_groups: Vec<String>,
}

fn default_user_name() -> String {
    "me".to_string()
}

fn default_database_path() -> String {
    "dialogue_messages.db".to_string()
}

fn default_conversation_id() -> String {
    "default".to_string()
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            user_name: default_user_name(),
            parser: ParserSettings::default(),
            recovery: RecoverySettings::default(),
            database_path: default_database_path(),
            default_conversation_id: default_conversation_id(),
            known_contacts: Vec::new(),
            known_groups: Vec::new(),
        }
    }
}

impl DialogueConfig {
    /// Get the directory containing the executable
    fn get_base_dir() -> PathBuf {
        match std::env::current_exe() {
            Ok(exe_path) => exe_path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".")),
            Err(_) => PathBuf::from("."),
        }
    }

    /// Get the path to the config file (relative to executable)
    pub fn config_path() -> PathBuf {
        Self::get_base_dir().join("dialogue_config.toml")
    }

    /// Load config from dialogue_config.toml (next to executable), falling back to env vars
    pub fn load() -> Self {
        let path = Self::config_path();

        if let Ok(contents) = fs::read_to_string(&path) {
            match toml::from_str::<DialogueConfig>(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {:?}", path);
                    return config.with_env_overrides();
                }
                Err(e) => {
                    tracing::error!("Failed to parse {:?}: {}", path, e);
                }
            }
        }

        tracing::warn!("No config file found, using defaults + env vars");
        Self::from_env()
    }

    /// Load config from an explicit path. Unlike [`DialogueConfig::load`], a
    /// missing or malformed file is an error.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let config = toml::from_str::<DialogueConfig>(&contents)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Save config to file (next to executable)
    pub fn save(&self) -> Result<()> {
        self.save_to(Self::config_path())
    }

    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let toml_string = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, toml_string)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Defaults plus environment variable overrides
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        if let Ok(name) = env::var("DIALOGUE_USER_NAME") {
            if !name.trim().is_empty() {
                self.user_name = name;
            }
        }

        if let Ok(path) = env::var("DIALOGUE_DATABASE_PATH") {
            if !path.trim().is_empty() {
                self.database_path = path;
            }
        }

        if let Ok(id) = env::var("DIALOGUE_CONVERSATION_ID") {
            if !id.trim().is_empty() {
                self.default_conversation_id = id;
            }
        }

        if let Ok(enabled) = env::var("DIALOGUE_IMPLICIT_CONTENT") {
            self.parser.implicit_content = parse_flag(&enabled);
        }

        if let Ok(enabled) = env::var("DIALOGUE_FALLBACK_REPARSE") {
            self.recovery.fallback_reparse = parse_flag(&enabled);
        }

        self
    }
}

fn parse_flag(raw: &str) -> bool {
    let raw = raw.trim();
    raw.eq_ignore_ascii_case("1") || raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("yes")
}
