use std::time::Instant;

use async_trait::async_trait;
use clap::Args;
use miette::{IntoDiagnostic, Result, WrapErr};
use regauth_config::{ArgMatches, RegauthConfig, RegauthConfigLayer};

use crate::client_args::ClientArgs;
use crate::commands::{RegauthCommand, RegistryArg};

#[derive(Debug, Args)]
pub struct PingCmd {
    #[command(flatten)]
    registry: RegistryArg,

    /// Format output as JSON.
    #[arg(long)]
    json: bool,
}

#[async_trait]
impl RegauthCommand for PingCmd {
    async fn execute(self, client_args: ClientArgs) -> Result<()> {
        let registry = self.registry.url(&client_args)?;
        let client = client_args.into_client_builder(&registry).build()?;
        tracing::info!("ping: {registry}");
        let start = Instant::now();
        client.ping(&registry).await?;
        let time = start.elapsed().as_micros() as f32 / 1000.0;
        tracing::info!("pong: {time}ms");
        if self.json {
            let output = serde_json::to_string_pretty(&serde_json::json!({
                "registry": registry.to_string(),
                "time": time,
            }))
            .into_diagnostic()
            .wrap_err("ping::serialize")?;
            println!("{output}");
        } else {
            println!("pong from {registry} in {time}ms");
        }
        Ok(())
    }
}

impl RegauthConfigLayer for PingCmd {
    fn layer_config(&mut self, matches: &ArgMatches, config: &RegauthConfig) -> Result<()> {
        self.registry.layer_config(matches, config)
    }
}
