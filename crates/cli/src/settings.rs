//! Layered settings: built-in defaults, then a TOML file, then `FLEET_*` env
//!
//! Env keys use `__` between section and field, e.g.
//! `FLEET_DISPATCH__MAX_CONCURRENCY=32` or `FLEET_INVENTORY__PATH=hosts.json`.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use directories::ProjectDirs;
use fleet_core::application::{DispatchConfig, ExportFormat};
use fleet_infra_system::SubprocessTransportConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_PREFIX: &str = "FLEET";
const CONFIG_FILE_NAME: &str = "config.toml";
const DEFAULT_INVENTORY_FILE: &str = "inventory.json";
const DEFAULT_REPORT_DIR: &str = "reports";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub dispatch: DispatchConfig,
    pub transport: SubprocessTransportConfig,
    pub inventory: InventorySettings,
    pub export: ExportSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InventorySettings {
    pub path: String,
}

impl Default for InventorySettings {
    fn default() -> Self {
        Self {
            path: data_dir()
                .join(DEFAULT_INVENTORY_FILE)
                .to_string_lossy()
                .into_owned(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub destination: String,
    pub formats: Vec<ExportFormat>,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            destination: data_dir()
                .join(DEFAULT_REPORT_DIR)
                .to_string_lossy()
                .into_owned(),
            formats: vec![ExportFormat::Json, ExportFormat::Csv],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `compact`, `pretty` or `json`
    pub format: String,
    /// EnvFilter directives; `RUST_LOG` wins when set
    pub filter: String,
    /// Also append JSON logs to this file
    pub file: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            format: "compact".to_string(),
            filter: "warn,fleetctl=info".to_string(),
            file: None,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "fleet", "fleetctl")
}

fn data_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(shellexpand::tilde("~/.fleet").into_owned()))
}

/// Platform config file location (`~/.config/fleetctl/config.toml` on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    project_dirs().map(|d| d.config_dir().join(CONFIG_FILE_NAME))
}

/// Expand `~` and `$VARS` in a user-supplied path
pub fn expand_path(raw: &str) -> Result<String> {
    Ok(shellexpand::full(raw)
        .with_context(|| format!("Cannot expand path {}", raw))?
        .into_owned())
}

/// `FLEET_DISPATCH__MAX_CONCURRENCY=4`, `FLEET_EXPORT__FORMATS=json,csv`, ...
fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("export.formats")
        .with_list_parse_key("transport.env_allowlist")
}

impl Settings {
    /// Load settings; an explicit `path` must exist, the default one may not
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, environment())
    }

    fn load_with_env(path: Option<&Path>, env: Environment) -> Result<Self> {
        let mut builder = Config::builder();

        match path {
            Some(p) => builder = builder.add_source(File::from(p).required(true)),
            None => {
                if let Some(default) = default_config_path() {
                    builder = builder.add_source(File::from(default).required(false));
                }
            }
        }

        let settings: Settings = builder
            .add_source(env)
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        settings.normalize()
    }

    fn normalize(mut self) -> Result<Self> {
        self.dispatch.validate()?;
        if self.export.formats.is_empty() {
            anyhow::bail!("export.formats must name at least one format");
        }
        self.inventory.path = expand_path(&self.inventory.path)?;
        self.export.destination = expand_path(&self.export.destination)?;
        if let Some(file) = &self.log.file {
            self.log.file = Some(expand_path(file)?);
        }
        Ok(self)
    }
}
