use std::time::SystemTime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clap::Args;
use miette::{IntoDiagnostic, Result, WrapErr};
use regauth_client::{expiry_of, repository_scope, Scheme, Scopes, ACTION_PULL, ACTION_PUSH};
use regauth_config::{ArgMatches, RegauthConfig, RegauthConfigLayer};

use crate::client_args::ClientArgs;
use crate::commands::{RegauthCommand, RegistryArg};

#[derive(Debug, Args)]
pub struct TokenCmd {
    #[command(flatten)]
    registry: RegistryArg,

    /// Scope to ask for, like `repository:library/hello:pull`. Can be given
    /// more than once.
    #[arg(long = "scope", short)]
    scopes: Vec<String>,

    /// Ask for pull access to this repository.
    #[arg(long, value_name = "REPOSITORY")]
    pull: Vec<String>,

    /// Ask for pull and push access to this repository.
    #[arg(long, value_name = "REPOSITORY")]
    push: Vec<String>,

    /// Format output as JSON, including the scheme and when the token
    /// expires.
    #[arg(long)]
    json: bool,
}

impl TokenCmd {
    fn scopes(&self) -> Scopes {
        Scopes::new(&self.scopes)
            .append(
                self.pull
                    .iter()
                    .map(|repo| repository_scope(repo, &[ACTION_PULL])),
            )
            .append(
                self.push
                    .iter()
                    .map(|repo| repository_scope(repo, &[ACTION_PULL, ACTION_PUSH])),
            )
    }
}

#[async_trait]
impl RegauthCommand for TokenCmd {
    async fn execute(self, client_args: ClientArgs) -> Result<()> {
        let registry = self.registry.url(&client_args)?;
        let scopes = self.scopes();
        tracing::debug!("requesting token for {:?}", scopes.as_slice());
        let client = client_args.into_client_builder(&registry).build()?;
        let auth = client.authorize(&registry, &scopes).await?;
        if self.json {
            let expires_at = match auth.scheme {
                Scheme::Bearer => {
                    let expires_at: DateTime<Utc> = expiry_of(&auth.token, SystemTime::now()).into();
                    Some(expires_at.to_rfc3339())
                }
                _ => None,
            };
            let output = serde_json::to_string_pretty(&serde_json::json!({
                "registry": registry.to_string(),
                "scheme": auth.scheme.as_str(),
                "scopes": scopes.as_slice(),
                "token": auth.token,
                "expires_at": expires_at,
            }))
            .into_diagnostic()
            .wrap_err("token::serialize")?;
            println!("{output}");
        } else {
            println!("{}", auth.token);
        }
        Ok(())
    }
}

impl RegauthConfigLayer for TokenCmd {
    fn layer_config(&mut self, matches: &ArgMatches, config: &RegauthConfig) -> Result<()> {
        self.registry.layer_config(matches, config)
    }
}
