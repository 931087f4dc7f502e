//! Scaffolding for the dev-server configuration file.
//!
//! `devserver init` writes the keys a first run needs into the file that
//! `OrthoConfig` discovery would load, keeping any other keys already there.

use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::ConfigDiscovery;
use ortho_config::toml;
use thiserror::Error;

const APP_NAME: &str = "devserver";
const CONFIG_ENV_VAR: &str = "DEVSERVER_CONFIG_PATH";
const CONFIG_FILE_NAME: &str = "devserver.toml";
const DOTFILE_NAME: &str = ".devserver.toml";
const PROJECT_FILE_NAME: &str = "devserver.toml";
const GUARD_KEY: &str = "image_name_pattern";

/// Errors raised while updating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigStoreError {
    /// Raised when no configuration candidates are available.
    #[error("no configuration file candidates were discovered")]
    NoCandidates,
    /// Raised when file system operations fail.
    #[error("failed to access {path}: {message}")]
    Io {
        /// Path that could not be accessed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when parsing existing TOML content fails.
    #[error("failed to parse {path}: {message}")]
    Parse {
        /// Path that could not be parsed.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when existing TOML has an unexpected structure.
    #[error("invalid configuration in {path}: {message}")]
    InvalidStructure {
        /// Path that had invalid content.
        path: Utf8PathBuf,
        /// Human-readable error message.
        message: String,
    },
    /// Raised when the file is already configured and overwrite is disabled.
    #[error("{path} already sets {key}; rerun with --force to replace it")]
    AlreadyConfigured {
        /// Configuration file that was left untouched.
        path: Utf8PathBuf,
        /// Key found in the file.
        key: String,
    },
}

/// Values written by `devserver init`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConfigTemplate {
    /// Region hosting the dev server.
    pub region_id: String,
    /// Glob matched against image names.
    pub image_name_pattern: String,
    /// Prefix of the data snapshots to restore.
    pub data_snapshot_prefix: String,
}

impl ConfigTemplate {
    fn entries(&self) -> [(&'static str, &str); 3] {
        [
            ("region_id", self.region_id.as_str()),
            (GUARD_KEY, self.image_name_pattern.as_str()),
            ("data_snapshot_prefix", self.data_snapshot_prefix.as_str()),
        ]
    }
}

/// Abstraction over configuration writers for dependency injection.
pub trait ConfigWriter {
    /// Writes `template` into the configuration file and returns its path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigStoreError::AlreadyConfigured`] when the file already
    /// names an image pattern and `force` is not set, and other
    /// [`ConfigStoreError`] variants when the file cannot be read, parsed,
    /// or written.
    fn write_template(
        &self,
        template: &ConfigTemplate,
        force: bool,
    ) -> Result<Utf8PathBuf, ConfigStoreError>;
}

/// Updates `devserver.toml` using `OrthoConfig`'s discovery search order.
#[derive(Clone, Debug)]
pub struct ConfigStore {
    discovery: ConfigDiscovery,
}

impl ConfigStore {
    /// Builds a config store using the standard discovery settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            discovery: ConfigDiscovery::builder(APP_NAME)
                .env_var(CONFIG_ENV_VAR)
                .config_file_name(CONFIG_FILE_NAME)
                .dotfile_name(DOTFILE_NAME)
                .project_file_name(PROJECT_FILE_NAME)
                .build(),
        }
    }

    /// Builds a config store using an explicit discovery configuration.
    #[must_use]
    pub const fn with_discovery(discovery: ConfigDiscovery) -> Self {
        Self { discovery }
    }

    fn locate(&self) -> Result<ConfigFile, ConfigStoreError> {
        let candidates = self.discovery.utf8_candidates();
        for candidate in &candidates {
            let file = ConfigFile::new(candidate.clone())?;
            if file.exists()? {
                return Ok(file);
            }
        }
        candidates
            .last()
            .cloned()
            .ok_or(ConfigStoreError::NoCandidates)
            .and_then(ConfigFile::new)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigWriter for ConfigStore {
    fn write_template(
        &self,
        template: &ConfigTemplate,
        force: bool,
    ) -> Result<Utf8PathBuf, ConfigStoreError> {
        let file = self.locate()?;
        let mut table = file.load()?;
        if !force && file.string_value(&table, GUARD_KEY)?.is_some() {
            return Err(ConfigStoreError::AlreadyConfigured {
                path: file.path,
                key: String::from(GUARD_KEY),
            });
        }

        for (key, entry) in template.entries() {
            table.insert(key.to_owned(), toml::Value::String(entry.trim().to_owned()));
        }
        file.save(&table)?;
        Ok(file.path)
    }
}

/// A configuration file addressed through its parent directory.
#[derive(Clone, Debug)]
struct ConfigFile {
    path: Utf8PathBuf,
    parent: Utf8PathBuf,
    file_name: String,
}

impl ConfigFile {
    fn new(path: Utf8PathBuf) -> Result<Self, ConfigStoreError> {
        let file_name = path
            .file_name()
            .map(str::to_owned)
            .ok_or_else(|| ConfigStoreError::InvalidStructure {
                path: path.clone(),
                message: String::from("configuration file path is missing a filename"),
            })?;
        let parent = path
            .parent()
            .map_or_else(|| Utf8PathBuf::from("."), Utf8Path::to_path_buf);
        Ok(Self {
            path,
            parent,
            file_name,
        })
    }

    fn open_parent(&self) -> io::Result<Dir> {
        Dir::open_ambient_dir(&self.parent, ambient_authority())
    }

    fn exists(&self) -> Result<bool, ConfigStoreError> {
        match self.open_parent() {
            Ok(dir) => dir
                .try_exists(&self.file_name)
                .map_err(io_error(&self.path)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(io_error(&self.parent)(err)),
        }
    }

    fn read(&self) -> Result<String, ConfigStoreError> {
        self.open_parent()
            .map_err(io_error(&self.parent))?
            .read_to_string(&self.file_name)
            .map_err(io_error(&self.path))
    }

    /// Reads the current table, treating a missing or blank file as empty.
    fn load(&self) -> Result<toml::value::Table, ConfigStoreError> {
        if !self.exists()? {
            return Ok(toml::value::Table::new());
        }
        self.parse(&self.read()?)
    }

    fn parse(&self, contents: &str) -> Result<toml::value::Table, ConfigStoreError> {
        if contents.trim().is_empty() {
            return Ok(toml::value::Table::new());
        }
        toml::from_str(contents).map_err(|err| ConfigStoreError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })
    }

    /// Returns the trimmed string stored at `key`, ignoring blank values.
    fn string_value(
        &self,
        table: &toml::value::Table,
        key: &str,
    ) -> Result<Option<String>, ConfigStoreError> {
        let Some(raw) = table.get(key) else {
            return Ok(None);
        };
        raw.as_str()
            .map(|text| Some(text.trim().to_owned()).filter(|text| !text.is_empty()))
            .ok_or_else(|| ConfigStoreError::InvalidStructure {
                path: self.path.clone(),
                message: format!("{key} must be a string"),
            })
    }

    fn save(&self, table: &toml::value::Table) -> Result<(), ConfigStoreError> {
        Dir::create_ambient_dir_all(&self.parent, ambient_authority())
            .map_err(io_error(&self.parent))?;
        let rendered = toml::to_string_pretty(table).map_err(|err| ConfigStoreError::Parse {
            path: self.path.clone(),
            message: err.to_string(),
        })?;
        self.open_parent()
            .map_err(io_error(&self.parent))?
            .write(&self.file_name, rendered)
            .map_err(io_error(&self.path))
    }
}

fn io_error(path: &Utf8Path) -> impl FnOnce(io::Error) -> ConfigStoreError + '_ {
    move |err| ConfigStoreError::Io {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
