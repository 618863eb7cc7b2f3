use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{DropError, Result};

const DEFAULT_LOCAL_NAME: &str = "arkdrop";
const DEFAULT_MAX_CONCURRENT_UNITS: usize = 8;
const DEFAULT_JPEG_QUALITY: u8 = 100;

/// Settings of the transfer engine.
///
/// Every field has a default, so a TOML file only needs to mention the
/// values it wants to override:
///
/// ```toml
/// local_name = "Pixel 8"
/// max_concurrent_units = 4
/// jpeg_quality = 90
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name announced to peers and used as the sender of outgoing batches.
    pub local_name: String,
    /// Where loaded (normalized) copies of outgoing files are kept until
    /// they are staged.
    pub staging_dir: PathBuf,
    /// Where downloaded incoming files are materialized.
    pub download_dir: PathBuf,
    /// Upper bound of unit operations running at the same time within
    /// one batch phase.
    pub max_concurrent_units: usize,
    /// Quality used when JPEG images are recompressed during loading.
    pub jpeg_quality: u8,
    /// Delete local copies once a batch has been staged and published.
    pub release_after_stage: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let root = env::temp_dir().join("arkdrop");
        Self {
            local_name: DEFAULT_LOCAL_NAME.to_owned(),
            staging_dir: root.join("staging"),
            download_dir: root.join("downloads"),
            max_concurrent_units: DEFAULT_MAX_CONCURRENT_UNITS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            release_after_stage: true,
        }
    }
}

impl EngineConfig {
    /// Configuration rooted in a single working directory, handy for
    /// tests and embedded callers.
    pub fn with_root<P: AsRef<Path>>(root: P) -> Self {
        let root = root.as_ref();
        Self {
            staging_dir: root.join("staging"),
            download_dir: root.join("downloads"),
            ..Self::default()
        }
    }

    /// Loads the configuration from a TOML file. A missing file yields
    /// the default configuration.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::debug!(
                "config file {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| DropError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.local_name.trim().is_empty() {
            return Err(DropError::Config(
                "local_name must not be empty".to_owned(),
            ));
        }
        if self.max_concurrent_units == 0 {
            return Err(DropError::Config(
                "max_concurrent_units must be at least 1".to_owned(),
            ));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(DropError::Config(format!(
                "jpeg_quality must be within 1..=100, got {}",
                self.jpeg_quality
            )));
        }
        Ok(())
    }
}
