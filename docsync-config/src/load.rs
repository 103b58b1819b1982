use std::{
    io,
    path::{Path, PathBuf},
};

use rust_cli_config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Name of the environment variable holding either a path to the configuration file or the
/// configuration itself as inline JSON.
pub const CONFIG_ENV_NAME: &str = "DOCSYNC_CONFIG";

/// Prefix for environment variable configuration overrides.
const ENV_PREFIX: &str = "APP";

/// Separator between environment variable prefix and key segments.
const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested configuration keys in environment variables.
const ENV_SEPARATOR: &str = "__";

/// Where the configuration record was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// A JSON file on disk.
    File(PathBuf),
    /// JSON supplied directly as the value of [`CONFIG_ENV_NAME`].
    Inline,
}

/// Errors that can occur while loading the configuration record.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// The configuration variable is not set.
    #[error("environment variable `{0}` is not set, it must contain a file path or inline JSON")]
    MissingVariable(&'static str),

    /// The configuration variable names a file that does not exist.
    #[error("configuration file `{0}` does not exist")]
    MissingFile(PathBuf),

    /// The configuration file exists but could not be inspected.
    #[error("failed to access configuration file `{path}`: {source}")]
    FileAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The configuration sources could not be merged.
    #[error("failed to build configuration from {origin}: {source}")]
    Builder {
        origin: String,
        #[source]
        source: rust_cli_config::ConfigError,
    },

    /// The merged configuration could not be deserialized into the target type.
    #[error("failed to deserialize configuration: {0}")]
    Deserialization(#[source] rust_cli_config::ConfigError),
}

/// Loads the configuration named by the [`CONFIG_ENV_NAME`] environment variable.
///
/// See [`load_config_from`] for how the value is interpreted.
pub fn load_config<T>() -> Result<(T, ConfigSource), LoadConfigError>
where
    T: DeserializeOwned,
{
    let raw = std::env::var(CONFIG_ENV_NAME)
        .map_err(|_| LoadConfigError::MissingVariable(CONFIG_ENV_NAME))?;

    load_config_from(&raw)
}

/// Loads the configuration from `raw`, which is either inline JSON or a path to a JSON file.
///
/// A value whose first non-whitespace character is `{` is parsed as inline JSON, anything else
/// is treated as a file path. `APP_`-prefixed environment variables are applied on top, nested
/// keys use double underscores (`APP_SOURCE__URI`).
pub fn load_config_from<T>(raw: &str) -> Result<(T, ConfigSource), LoadConfigError>
where
    T: DeserializeOwned,
{
    let trimmed = raw.trim();

    let (builder, origin) = if trimmed.starts_with('{') {
        let builder =
            ConfigBuilder::builder().add_source(File::from_str(trimmed, FileFormat::Json));

        (builder, ConfigSource::Inline)
    } else {
        let path = Path::new(trimmed);
        check_configuration_file(path)?;

        let builder = ConfigBuilder::builder()
            .add_source(File::from(path.to_path_buf()).format(FileFormat::Json));

        (builder, ConfigSource::File(path.to_path_buf()))
    };

    let environment_source = Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR)
        .try_parsing(true);

    let settings = builder
        .add_source(environment_source)
        .build()
        .map_err(|source| LoadConfigError::Builder {
            origin: describe_origin(&origin),
            source,
        })?;

    let config = settings
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialization)?;

    Ok((config, origin))
}

fn check_configuration_file(path: &Path) -> Result<(), LoadConfigError> {
    match std::fs::metadata(path) {
        Ok(metadata) if metadata.is_file() => Ok(()),
        Ok(_) => Err(LoadConfigError::MissingFile(path.to_path_buf())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            Err(LoadConfigError::MissingFile(path.to_path_buf()))
        }
        Err(source) => Err(LoadConfigError::FileAccess {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn describe_origin(origin: &ConfigSource) -> String {
    match origin {
        ConfigSource::File(path) => format!("file `{}`", path.display()),
        ConfigSource::Inline => format!("inline JSON in `{CONFIG_ENV_NAME}`"),
    }
}
