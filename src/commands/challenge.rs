use std::collections::BTreeMap;

use async_trait::async_trait;
use clap::Args;
use miette::{IntoDiagnostic, Result, WrapErr};
use regauth_client::Scheme;
use regauth_config::{ArgMatches, RegauthConfig, RegauthConfigLayer};

use crate::client_args::ClientArgs;
use crate::commands::{RegauthCommand, RegistryArg};

#[derive(Debug, Args)]
pub struct ChallengeCmd {
    #[command(flatten)]
    registry: RegistryArg,

    /// Format output as JSON.
    #[arg(long)]
    json: bool,
}

#[async_trait]
impl RegauthCommand for ChallengeCmd {
    async fn execute(self, client_args: ClientArgs) -> Result<()> {
        let registry = self.registry.url(&client_args)?;
        let client = client_args.into_client_builder(&registry).build()?;
        let challenge = client.challenge(&registry).await?;
        let params: BTreeMap<_, _> = challenge.params.iter().collect();
        if self.json {
            let scheme = match challenge.scheme {
                Scheme::Unknown => None,
                scheme => Some(scheme.as_str()),
            };
            let output = serde_json::to_string_pretty(&serde_json::json!({
                "registry": registry.to_string(),
                "scheme": scheme,
                "params": params,
                "scopes": challenge.scopes(),
            }))
            .into_diagnostic()
            .wrap_err("challenge::serialize")?;
            println!("{output}");
        } else if challenge.scheme == Scheme::Unknown {
            println!("{registry} sent no challenge we understand");
        } else {
            println!("{}", challenge.scheme);
            for (key, value) in params {
                println!("  {key}: {value}");
            }
        }
        Ok(())
    }
}

impl RegauthConfigLayer for ChallengeCmd {
    fn layer_config(&mut self, matches: &ArgMatches, config: &RegauthConfig) -> Result<()> {
        self.registry.layer_config(matches, config)
    }
}
