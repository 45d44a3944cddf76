use std::time::Duration;

use clap::Args;
use miette::Result;
use regauth_client::{
    registry_host, Credential, RegistryClient, RegistryClientBuilder, StaticCredential,
    DEFAULT_CLIENT_ID,
};
use regauth_config::{layered, ArgMatches, RegauthConfig, RegauthConfigLayer};
use url::Url;

use crate::error::RegauthError;

/// How to reach and authenticate against the registry. Shared by every
/// subcommand.
#[derive(Debug, Clone, Args)]
pub(crate) struct ClientArgs {
    /// Username for the registry.
    #[arg(global = true, long)]
    pub(crate) username: Option<String>,

    /// Password for the registry. Prefer `REGAUTH_PASSWORD` or a config
    /// file over passing this on the command line.
    #[arg(global = true, long)]
    pub(crate) password: Option<String>,

    /// OAuth2 refresh token (also known as an identity token).
    #[arg(global = true, long)]
    pub(crate) refresh_token: Option<String>,

    /// Registry access token to use as-is.
    #[arg(global = true, long)]
    pub(crate) access_token: Option<String>,

    /// OAuth2 client ID to identify as.
    #[arg(global = true, long, default_value = DEFAULT_CLIENT_ID)]
    pub(crate) client_id: String,

    /// Exchange username and password through the OAuth2 password grant.
    #[arg(global = true, long)]
    pub(crate) force_oauth2: bool,

    /// Give up on getting a token after this many seconds.
    #[arg(global = true, long)]
    pub(crate) token_timeout: Option<u64>,

    /// Talk to registries given as `host[:port]` over plain HTTP.
    #[arg(global = true, long)]
    pub(crate) plain_http: bool,
}

impl RegauthConfigLayer for ClientArgs {
    fn layer_config(&mut self, matches: &ArgMatches, config: &RegauthConfig) -> Result<()> {
        if let Some(username) = layered(matches, config, "username", "username")? {
            self.username = Some(username);
        }
        if let Some(password) = layered(matches, config, "password", "password")? {
            self.password = Some(password);
        }
        if let Some(token) = layered(matches, config, "refresh_token", "refresh_token")? {
            self.refresh_token = Some(token);
        }
        if let Some(token) = layered(matches, config, "access_token", "access_token")? {
            self.access_token = Some(token);
        }
        if let Some(client_id) = layered(matches, config, "client_id", "client_id")? {
            self.client_id = client_id;
        }
        if let Some(force) = layered(matches, config, "force_oauth2", "force_oauth2")? {
            self.force_oauth2 = force;
        }
        if let Some(timeout) = layered(matches, config, "token_timeout", "token_timeout")? {
            self.token_timeout = Some(timeout);
        }
        if let Some(plain_http) = layered(matches, config, "plain_http", "plain_http")? {
            self.plain_http = plain_http;
        }
        Ok(())
    }
}

impl ClientArgs {
    /// Turns a registry as given by the user into the registry's base URL.
    pub(crate) fn registry_url(&self, registry: &str) -> Result<Url, RegauthError> {
        // Docker Hub's API isn't served from the name everyone uses for it.
        let registry = match registry {
            "docker.io" | "index.docker.io" => "registry-1.docker.io",
            other => other,
        };
        let url = if registry.contains("://") {
            Url::parse(registry)
        } else if self.plain_http {
            Url::parse(&format!("http://{registry}"))
        } else {
            Url::parse(&format!("https://{registry}"))
        };
        url.map_err(|source| RegauthError::InvalidRegistry {
            registry: registry.into(),
            source,
        })
    }

    pub(crate) fn credential(&self) -> Credential {
        Credential {
            username: self.username.clone().unwrap_or_default(),
            password: self.password.clone().unwrap_or_default(),
            refresh_token: self.refresh_token.clone().unwrap_or_default(),
            access_token: self.access_token.clone().unwrap_or_default(),
        }
    }

    pub(crate) fn into_client_builder(self, registry: &Url) -> RegistryClientBuilder {
        let mut builder = RegistryClient::builder()
            .client_id(&self.client_id)
            .force_attempt_oauth2(self.force_oauth2);
        if let Some(secs) = self.token_timeout {
            builder = builder.token_timeout(Duration::from_secs(secs));
        }
        let credential = self.credential();
        if credential.is_empty() {
            tracing::debug!("no credentials configured, accessing {registry} anonymously");
        } else {
            if credential.username.is_empty() != credential.password.is_empty() {
                tracing::warn!("Only one of username and password is set for {registry}.");
            }
            builder = builder.credentials(StaticCredential::new(registry_host(registry), credential));
        }
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use clap::{CommandFactory, FromArgMatches};
    use pretty_assertions::assert_eq;
    use regauth_config::RegauthConfigOptions;

    use crate::Regauth;

    fn parse(args: &[&str]) -> (Regauth, ArgMatches) {
        let matches = Regauth::command().get_matches_from(args);
        let regauth = Regauth::from_arg_matches(&matches).unwrap();
        (regauth, matches)
    }

    fn args(regauth: &Regauth) -> &ClientArgs {
        &regauth.client_args
    }

    #[test]
    fn registry_urls() {
        let (regauth, _) = parse(&["regauth", "ping", "localhost:5000"]);
        let client_args = args(&regauth);
        assert_eq!(
            client_args.registry_url("localhost:5000").unwrap().as_str(),
            "https://localhost:5000/"
        );
        assert_eq!(
            client_args.registry_url("docker.io").unwrap().as_str(),
            "https://registry-1.docker.io/"
        );
        assert_eq!(
            client_args
                .registry_url("http://127.0.0.1:8080")
                .unwrap()
                .as_str(),
            "http://127.0.0.1:8080/"
        );
        assert!(matches!(
            client_args.registry_url("bad host"),
            Err(RegauthError::InvalidRegistry { .. })
        ));

        let (regauth, _) = parse(&["regauth", "ping", "localhost:5000", "--plain-http"]);
        assert_eq!(
            args(&regauth)
                .registry_url("localhost:5000")
                .unwrap()
                .as_str(),
            "http://localhost:5000/"
        );
    }

    #[test]
    fn config_fills_in_missing_args() -> miette::Result<()> {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("regauthrc.toml"),
            "username = \"me\"\npassword = \"pw\"\nclient_id = \"configured\"\ntoken_timeout = 5",
        )
        .unwrap();
        let config = RegauthConfigOptions::new()
            .global(false)
            .env(false)
            .project_root(Some(dir.path().to_owned()))
            .load()?;

        let (mut regauth, matches) = parse(&["regauth", "ping", "r.io", "--username", "cli"]);
        regauth.client_args.layer_config(&matches, &config)?;
        let client_args = args(&regauth);
        assert_eq!(client_args.username.as_deref(), Some("cli"));
        assert_eq!(client_args.password.as_deref(), Some("pw"));
        assert_eq!(client_args.client_id, "configured");
        assert_eq!(client_args.token_timeout, Some(5));
        assert_eq!(client_args.credential(), Credential::basic("cli", "pw"));
        Ok(())
    }
}
