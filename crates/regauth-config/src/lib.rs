use std::path::PathBuf;

pub use clap::ArgMatches;
use clap::parser::ValueSource;
pub use config::Config as RegauthConfig;
use config::{ConfigError, Environment, File};
use miette::Result;
use serde::de::DeserializeOwned;

pub use error::RegauthConfigError;

mod error;

/// Prefix for environment variables, so `REGAUTH_USERNAME` sets `username`.
pub const ENV_PREFIX: &str = "REGAUTH";

pub trait RegauthConfigLayer {
    fn layer_config(&mut self, _matches: &ArgMatches, _config: &RegauthConfig) -> Result<()> {
        Ok(())
    }
}

/// Looks `key` up in `config`, unless the argument `id` was passed on the
/// command line. Command line arguments always win over configuration.
pub fn layered<T: DeserializeOwned>(
    matches: &ArgMatches,
    config: &RegauthConfig,
    id: &str,
    key: &str,
) -> Result<Option<T>> {
    if matches.value_source(id) == Some(ValueSource::CommandLine) {
        return Ok(None);
    }
    match config.get::<T>(key) {
        Ok(val) => Ok(Some(val)),
        Err(ConfigError::NotFound(_)) => Ok(None),
        Err(source) => Err(RegauthConfigError::InvalidValue {
            key: key.into(),
            source,
        }
        .into()),
    }
}

pub struct RegauthConfigOptions {
    global: bool,
    env: bool,
    project_root: Option<PathBuf>,
    global_config_file: Option<PathBuf>,
}

impl Default for RegauthConfigOptions {
    fn default() -> Self {
        RegauthConfigOptions {
            global: true,
            env: true,
            project_root: None,
            global_config_file: None,
        }
    }
}

impl RegauthConfigOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(mut self, global: bool) -> Self {
        self.global = global;
        self
    }

    pub fn env(mut self, env: bool) -> Self {
        self.env = env;
        self
    }

    /// Directory to look for a project-local `regauthrc.toml` in.
    pub fn project_root(mut self, root: Option<PathBuf>) -> Self {
        self.project_root = root;
        self
    }

    pub fn global_config_file(mut self, file: Option<PathBuf>) -> Self {
        self.global_config_file = file;
        self
    }

    /// Loads configuration. Later sources override earlier ones: the global
    /// file, then the environment, then project-local files.
    pub fn load(self) -> Result<RegauthConfig> {
        let mut builder = RegauthConfig::builder();
        if self.global {
            if let Some(config_file) = self.global_config_file {
                let path = config_file.display().to_string();
                builder = builder.add_source(File::with_name(&path[..]).required(false));
            }
        }
        if self.env {
            builder = builder.add_source(Environment::with_prefix(ENV_PREFIX));
        }
        if let Some(root) = self.project_root {
            for name in ["regauthrc.toml", ".regauthrc.toml"] {
                builder = builder.add_source(
                    File::with_name(&root.join(name).display().to_string()).required(false),
                );
            }
        }
        Ok(builder.build().map_err(RegauthConfigError::ConfigError)?)
    }
}
