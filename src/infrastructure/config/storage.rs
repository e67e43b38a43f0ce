use super::app_config::Settings;
use directories::ProjectDirs;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

const APP_QUALIFIER: &str = "io";
const APP_ORGANIZATION: &str = "webimage";
const APP_NAME: &str = "webimage";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Errors raised while loading or saving settings.
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ConfigError {
    #[error("failed to determine config directory")]
    ConfigDirNotFound,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("toml serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),
    #[error("toml deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

/// Reads and writes `config.toml`.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_dir: PathBuf,
}

impl ConfigStore {
    /// Locates `config.toml` under the platform config directory.
    ///
    /// # Errors
    /// Returns `ConfigDirNotFound` if the platform has no home directory.
    pub fn new() -> Result<Self, ConfigError> {
        ProjectDirs::from(APP_QUALIFIER, APP_ORGANIZATION, APP_NAME)
            .map(|dirs| Self::with_dir(dirs.config_dir().to_path_buf()))
            .ok_or(ConfigError::ConfigDirNotFound)
    }

    /// Uses `config_dir` instead of the platform directory.
    #[must_use]
    pub const fn with_dir(config_dir: PathBuf) -> Self {
        Self { config_dir }
    }

    /// Directory holding the settings file.
    #[must_use]
    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Path of the default settings file.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE_NAME)
    }

    /// Loads settings from `path_override` or [`Self::config_path`].
    ///
    /// A missing file is created with defaults. A file that fails to parse
    /// is left untouched and defaults are returned.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or the default cannot be written.
    pub fn load(&self, path_override: Option<&Path>) -> Result<Settings, ConfigError> {
        let path = path_override.map_or_else(|| self.config_path(), Path::to_path_buf);

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No settings file, writing defaults");
                let settings = Settings::default();
                write_atomic(&path, &settings)?;
                return Ok(settings);
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self::parse(&content).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Invalid settings file, using defaults");
            Settings::default()
        }))
    }

    /// Parses settings text.
    ///
    /// # Errors
    /// Returns `TomlDe` if the text is not valid settings TOML.
    pub fn parse(content: &str) -> Result<Settings, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Writes `settings` to [`Self::config_path`], replacing it atomically.
    ///
    /// # Errors
    /// Returns error if the file cannot be written.
    pub fn save(&self, settings: &Settings) -> Result<(), ConfigError> {
        write_atomic(&self.config_path(), settings)
    }
}

fn write_atomic(path: &Path, settings: &Settings) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(settings)?;
    let parent = path
        .parent()
        .ok_or_else(|| std::io::Error::other("settings path has no parent"))?;
    fs::create_dir_all(parent)?;

    let mut file = tempfile::NamedTempFile::new_in(parent)?;
    file.write_all(content.as_bytes())?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}
