//! Configuration loading.
//!
//! Sources, lowest priority first:
//! 1. Built-in defaults
//! 2. TOML file: `--config PATH`, else `~/.taskmaster/config.toml` when it exists
//! 3. Environment variables `TASKMASTER__<SECTION>__<KEY>`, e.g.
//!    `TASKMASTER__OPERATIONS__MAX_CONCURRENT=4`
//!
//! The `--log-level` flag is applied by the binary on top of all three.

use async_ops::ManagerConfig;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{McpError, Result};

pub const ENV_PREFIX: &str = "TASKMASTER";
const ENV_SEPARATOR: &str = "__";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSection,
    pub operations: ManagerConfig,
    pub tasks: TasksSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    /// Name reported in `serverInfo`
    pub name: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: "Task Master".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TasksSection {
    /// Task file; relative paths resolve against the working directory.
    pub file: PathBuf,
}

impl Default for TasksSection {
    fn default() -> Self {
        Self {
            file: PathBuf::from(".taskmaster").join("tasks").join("tasks.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `EnvFilter` directive, e.g. `info` or `taskmaster_mcp=debug,info`.
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// Log directory. Defaults to `~/.taskmaster/logs`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    pub file_name: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_name: "taskmaster-mcp.log".to_string(),
        }
    }
}

impl LoggingSection {
    /// Directory log files go to, if one can be determined.
    pub fn resolved_directory(&self) -> Option<PathBuf> {
        self.directory
            .clone()
            .or_else(|| home_dir().map(|home| home.join("logs")))
    }
}

/// `~/.taskmaster`
pub fn home_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".taskmaster"))
}

/// `~/.taskmaster/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    home_dir().map(|home| home.join("config.toml"))
}

impl AppConfig {
    /// Loads configuration from the process environment. An explicit `path`
    /// must exist; the default file is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with(path, environment())
    }

    fn load_with(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                if !path.is_file() {
                    return Err(McpError::Config(format!(
                        "config file not found: {}",
                        path.display()
                    )));
                }
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
            }
            None => {
                if let Some(default) = default_config_path() {
                    builder = builder.add_source(
                        File::from(default)
                            .format(FileFormat::Toml)
                            .required(false),
                    );
                }
            }
        }

        let config: AppConfig = builder.add_source(env).build()?.try_deserialize()?;
        Ok(config)
    }

    /// Effective configuration rendered as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| McpError::Config(e.to_string()))
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true)
}
