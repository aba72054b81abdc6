//! Robot configuration and layered YAML loading.
//!
//! Configuration is read from the installation directory first and then
//! overlaid key-by-key with the site configuration directory. The same
//! layering is used for per-task configuration files.

use std::path::{Path, PathBuf};

use chatrun_core::{ChannelInfo, MessageFormat, UserInfo};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A YAML document parsed into a JSON object.
pub type ConfigMap = Map<String, Value>;

/// Errors loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {origin}: {source}")]
    Yaml {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{0} doesn't contain a YAML map")]
    NotAMap(String),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Identity of the robot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct BotInfo {
    pub user_name: String,
    pub full_name: String,
    pub email: String,
}

impl Default for BotInfo {
    fn default() -> Self {
        Self {
            user_name: "chatrun".to_string(),
            full_name: "ChatRun Robot".to_string(),
            email: String::new(),
        }
    }
}

/// History provider settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct HistoryConfig {
    /// Directory for the `file` provider.
    pub directory: String,
    /// URL prefix under which history files are published, if any.
    pub url_prefix: String,
}

/// Type of an external script.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptType {
    #[default]
    #[serde(alias = "plugin")]
    Plugin,
    #[serde(alias = "job")]
    Job,
}

/// An external script task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ExternalScript {
    pub name: String,
    pub path: String,
    #[serde(rename = "Type")]
    pub script_type: ScriptType,
}

/// Robot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    /// Users allowed to run admin commands and `RequireAdmin` tasks.
    pub admin_users: Vec<String>,

    /// Contact returned for the bot `contact` attribute.
    pub admin_contact: String,

    /// Single-character prefix addressing the robot in channels.
    pub alias: String,

    pub bot_info: BotInfo,

    /// Authorizer used when a task doesn't name one.
    pub default_authorizer: String,

    /// Elevator used when a task doesn't name one.
    pub default_elevator: String,

    /// Channels for tasks that don't list any.
    pub default_channels: Vec<String>,

    /// `AllowDirect` for tasks that don't set it.
    pub default_allow_direct: bool,

    pub default_message_format: MessageFormat,

    /// Listen address for the JSON bridge.
    pub http_listen: String,

    /// Name of the registered history provider.
    pub history_provider: String,

    pub history_config: HistoryConfig,

    /// Number of history logs kept for tasks without `MaxHistories`.
    pub default_histories: usize,

    pub external_scripts: Vec<ExternalScript>,

    pub user_roster: Vec<UserInfo>,

    pub channel_roster: Vec<ChannelInfo>,

    /// Users whose messages are never processed.
    pub ignore_users: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            admin_users: Vec::new(),
            admin_contact: String::new(),
            alias: ";".to_string(),
            bot_info: BotInfo::default(),
            default_authorizer: String::new(),
            default_elevator: String::new(),
            default_channels: Vec::new(),
            default_allow_direct: true,
            default_message_format: MessageFormat::Raw,
            http_listen: "127.0.0.1:8880".to_string(),
            history_provider: "memory".to_string(),
            history_config: HistoryConfig::default(),
            default_histories: 7,
            external_scripts: Vec::new(),
            user_roster: Vec::new(),
            channel_roster: Vec::new(),
            ignore_users: Vec::new(),
        }
    }
}

impl Config {
    /// Load `conf/robot.yaml` from the install directory, overlaid by the
    /// configuration directory. Missing files are skipped.
    pub fn load(install_path: &Path, config_path: &Path) -> Result<Self, ConfigError> {
        let map = load_layered("robot.yaml", install_path, config_path, ConfigMap::new())?;
        Self::from_map(map)
    }

    /// Build a config from an already-merged map.
    pub fn from_map(map: ConfigMap) -> Result<Self, ConfigError> {
        Ok(serde_json::from_value(Value::Object(map))?)
    }

    /// Parse a single YAML document.
    pub fn from_yaml(s: &str) -> Result<Self, ConfigError> {
        Self::from_map(parse_yaml_map(s, "robot configuration")?)
    }

    /// Returns true if `user` is a configured administrator.
    pub fn is_admin(&self, user: &str) -> bool {
        self.admin_users.iter().any(|a| a == user)
    }
}

/// Parse a YAML document into a map; an empty document yields an empty map.
pub fn parse_yaml_map(s: &str, origin: &str) -> Result<ConfigMap, ConfigError> {
    let value: Value = serde_yaml::from_str(s).map_err(|source| ConfigError::Yaml {
        origin: origin.to_string(),
        source,
    })?;
    match value {
        Value::Object(map) => Ok(map),
        Value::Null => Ok(ConfigMap::new()),
        _ => Err(ConfigError::NotAMap(origin.to_string())),
    }
}

/// Read a YAML map from disk, returning `None` when the file doesn't exist.
pub fn read_yaml_map(path: &Path) -> Result<Option<ConfigMap>, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    parse_yaml_map(&contents, &path.display().to_string()).map(Some)
}

/// Overlay `overlay` onto `base`, replacing whole values key by key.
pub fn merge_layers(base: &mut ConfigMap, overlay: ConfigMap) {
    for (key, value) in overlay {
        base.insert(key, value);
    }
}

/// Load `conf/<relative>` from the install path and then the config path,
/// each overlaid onto `base`.
pub fn load_layered(
    relative: &str,
    install_path: &Path,
    config_path: &Path,
    mut base: ConfigMap,
) -> Result<ConfigMap, ConfigError> {
    let install_file = install_path.join("conf").join(relative);
    let config_file = config_path.join("conf").join(relative);
    if let Some(layer) = read_yaml_map(&install_file)? {
        merge_layers(&mut base, layer);
    }
    if config_file != install_file {
        if let Some(layer) = read_yaml_map(&config_file)? {
            merge_layers(&mut base, layer);
        }
    }
    Ok(base)
}
