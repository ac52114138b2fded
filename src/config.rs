use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::adapters::PROC_MOUNTS;
use crate::core::hardware::SupportedFilesystem;
use crate::core::progress::ProgressMode;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/fatmirror/config.toml";
pub const ENV_PREFIX: &str = "FATMIRROR_";

/// Run configuration. Built once at startup and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory to mirror; absolute after loading.
    pub source: PathBuf,
    /// Directory name created under every mount point.
    pub destination_name: String,
    /// Filesystem type as it appears in the mount table.
    pub filesystem: String,
    pub mount_table: PathBuf,
    pub sync_files: bool,
    pub preserve_timestamps: bool,
    pub progress: ProgressMode,
    pub verbose: bool,
    pub json_logs: bool,
    /// When non-empty, these directories stand in for mounted devices.
    pub simulated_mounts: Vec<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("tpcbackup"),
            destination_name: "tpcbackup".to_string(),
            filesystem: SupportedFilesystem::Vfat.as_str().to_string(),
            mount_table: PathBuf::from(PROC_MOUNTS),
            sync_files: true,
            preserve_timestamps: true,
            progress: ProgressMode::Auto,
            verbose: false,
            json_logs: false,
            simulated_mounts: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Layer defaults, the TOML file, `FATMIRROR_*` environment variables and
    /// finally any explicitly given CLI arguments.
    pub fn new<T: Serialize>(cli_args: Option<&T>, config_file: Option<&Path>) -> Result<Self> {
        let config_file = config_file.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(config_file))
            .merge(Env::prefixed(ENV_PREFIX));

        if let Some(args) = cli_args {
            figment = figment.merge(Serialized::defaults(args));
        }

        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let mut config: AppConfig = figment
            .extract()
            .context("Failed to load configuration")?;

        config.source = std::path::absolute(&config.source).with_context(|| {
            format!("Failed to resolve source path {}", config.source.display())
        })?;
        config.filesystem = SupportedFilesystem::normalize(&config.filesystem);
        validate_destination_name(&config.destination_name)?;

        Ok(config)
    }
}

/// The destination name must be exactly one plain path segment so each
/// target stays under its own mount point.
fn validate_destination_name(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => bail!(
            "Destination name {:?} must be a single directory name, not a path",
            name
        ),
    }
}
