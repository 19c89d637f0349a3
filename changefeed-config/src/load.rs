use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use rust_cli_config::builder::{ConfigBuilder, DefaultState};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::environment::Environment;

/// Directory, relative to the working directory, holding the configuration files.
const CONFIGURATION_DIR: &str = "configuration";

/// Extensions tried, in order, for every configuration file.
const CONFIG_FILE_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

const ENV_PREFIX: &str = "APP";
const ENV_PREFIX_SEPARATOR: &str = "_";
const ENV_SEPARATOR: &str = "__";
const LIST_SEPARATOR: &str = ",";

/// Implemented by top level configuration structures loadable with [`load_config`].
pub trait Config {
    /// Keys whose environment variable values are split on commas into lists.
    const LIST_PARSE_KEYS: &'static [&'static str];
}

/// Which layer of the configuration a file belongs to.
#[derive(Debug, Clone, Copy)]
enum Layer {
    Base,
    Environment(Environment),
}

impl Layer {
    fn file_stem(&self) -> &'static str {
        match self {
            Layer::Base => "base",
            Layer::Environment(environment) => environment.as_str(),
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Layer::Base => f.write_str("base configuration"),
            Layer::Environment(environment) => write!(f, "{environment} configuration"),
        }
    }
}

/// Errors raised while assembling a configuration.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    #[error("failed to determine the current directory: {0}")]
    CurrentDir(#[source] io::Error),

    #[error("configuration directory `{0}` does not exist")]
    MissingDirectory(PathBuf),

    #[error("could not find the {layer} in `{directory}`, tried: {attempted}")]
    MissingFile {
        layer: String,
        directory: PathBuf,
        attempted: String,
    },

    #[error("failed to read the {layer} from `{path}`: {source}")]
    InvalidFile {
        layer: String,
        path: PathBuf,
        #[source]
        source: rust_cli_config::ConfigError,
    },

    #[error("failed to determine the runtime environment: {0}")]
    Environment(#[source] io::Error),

    #[error("failed to merge configuration sources: {0}")]
    Build(#[source] rust_cli_config::ConfigError),

    #[error("failed to deserialize configuration: {0}")]
    Deserialize(#[source] rust_cli_config::ConfigError),
}

/// Loads `T` from `./configuration` using the environment named by `APP_ENVIRONMENT`.
///
/// Sources are applied in order, later ones overriding earlier ones:
/// `base.(yaml|yml|json)`, `{environment}.(yaml|yml|json)`, then `APP_` prefixed environment
/// variables where `__` separates nested keys (`APP_STORE__INDEX_NAME=wikimedia`).
pub fn load_config<T>() -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    let directory = std::env::current_dir()
        .map_err(LoadConfigError::CurrentDir)?
        .join(CONFIGURATION_DIR);
    let environment = Environment::load().map_err(LoadConfigError::Environment)?;

    load_config_from(&directory, environment)
}

/// Same as [`load_config`] but with an explicit directory and environment.
pub fn load_config_from<T>(directory: &Path, environment: Environment) -> Result<T, LoadConfigError>
where
    T: Config + DeserializeOwned,
{
    if !directory.is_dir() {
        return Err(LoadConfigError::MissingDirectory(directory.to_path_buf()));
    }

    let mut builder = rust_cli_config::Config::builder();
    for layer in [Layer::Base, Layer::Environment(environment)] {
        let path = locate_file(directory, layer)?;
        builder = builder.add_source(rust_cli_config::File::from(path.as_path()));
        check_layer(&builder, layer, &path)?;
    }

    builder
        .add_source(environment_overrides::<T>())
        .build()
        .map_err(LoadConfigError::Build)?
        .try_deserialize::<T>()
        .map_err(LoadConfigError::Deserialize)
}

fn environment_overrides<T: Config>() -> rust_cli_config::Environment {
    let source = rust_cli_config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator(ENV_PREFIX_SEPARATOR)
        .separator(ENV_SEPARATOR);

    if T::LIST_PARSE_KEYS.is_empty() {
        return source;
    }

    T::LIST_PARSE_KEYS.iter().fold(
        source.try_parsing(true).list_separator(LIST_SEPARATOR),
        |source, key| source.with_list_parse_key(key),
    )
}

fn locate_file(directory: &Path, layer: Layer) -> Result<PathBuf, LoadConfigError> {
    let candidates: Vec<PathBuf> = CONFIG_FILE_EXTENSIONS
        .iter()
        .map(|extension| directory.join(format!("{}.{extension}", layer.file_stem())))
        .collect();

    if let Some(found) = candidates.iter().find(|path| path.is_file()) {
        return Ok(found.clone());
    }

    let attempted = candidates
        .iter()
        .map(|path| format!("`{}`", path.display()))
        .collect::<Vec<_>>()
        .join(", ");

    Err(LoadConfigError::MissingFile {
        layer: layer.to_string(),
        directory: directory.to_path_buf(),
        attempted,
    })
}

/// Builds the sources added so far so that a malformed file is reported against its own path.
fn check_layer(
    builder: &ConfigBuilder<DefaultState>,
    layer: Layer,
    path: &Path,
) -> Result<(), LoadConfigError> {
    builder
        .clone()
        .build()
        .map(|_| ())
        .map_err(|source| LoadConfigError::InvalidFile {
            layer: layer.to_string(),
            path: path.to_path_buf(),
            source,
        })
}
