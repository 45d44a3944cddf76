use async_trait::async_trait;
use clap::Args;
use miette::Result;
use regauth_config::{layered, ArgMatches, RegauthConfig, RegauthConfigLayer};
use url::Url;

use crate::client_args::ClientArgs;
use crate::error::RegauthError;

pub mod challenge;
pub mod ping;
pub mod token;

#[async_trait]
pub trait RegauthCommand {
    async fn execute(self, client_args: ClientArgs) -> Result<()>;
}

/// The registry a command talks to.
#[derive(Debug, Args)]
pub struct RegistryArg {
    /// Registry to talk to, as `host[:port]` or a URL. Defaults to the
    /// `registry` config option.
    registry: Option<String>,
}

impl RegistryArg {
    pub(crate) fn url(&self, client_args: &ClientArgs) -> Result<Url> {
        let registry = self
            .registry
            .as_deref()
            .ok_or(RegauthError::MissingRegistry)?;
        Ok(client_args.registry_url(registry)?)
    }
}

impl RegauthConfigLayer for RegistryArg {
    fn layer_config(&mut self, matches: &ArgMatches, config: &RegauthConfig) -> Result<()> {
        if self.registry.is_none() {
            self.registry = layered(matches, config, "registry", "registry")?;
        }
        Ok(())
    }
}
