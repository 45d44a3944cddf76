//! `regauth` talks to OCI/Docker container registries and shows how they
//! authenticate: which challenge they send, what token they hand out for a
//! set of scopes, and whether a configured credential actually works.
//!
//! Configuration is read from `<config_dir>/regauthrc.toml`, `REGAUTH_*`
//! environment variables and a project-local `regauthrc.toml`, in that
//! order. Command line arguments override all of them.

use std::path::PathBuf;

use clap::{ArgMatches, CommandFactory, FromArgMatches as _, Parser, Subcommand};
use directories::ProjectDirs;
use miette::{IntoDiagnostic, Result};
use regauth_config::{RegauthConfig, RegauthConfigLayer, RegauthConfigOptions};
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*, EnvFilter};

use client_args::ClientArgs;
use commands::{challenge::ChallengeCmd, ping::PingCmd, token::TokenCmd, RegauthCommand};

mod client_args;
mod commands;
mod error;

pub use error::RegauthError;

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Regauth {
    /// Directory to look for a project-local `regauthrc.toml` in.
    #[arg(global = true, long)]
    root: Option<PathBuf>,

    /// File to read configuration values from.
    #[arg(global = true, long)]
    config: Option<PathBuf>,

    /// Log output level/directive. Supports plain loglevels (off, error,
    /// warn, info, debug, trace) as well as more advanced directives in the
    /// format `target[span{field=value}]=level`.
    #[arg(global = true, long, default_value = "warn")]
    loglevel: String,

    /// Disable all log output.
    #[arg(global = true, long, short)]
    quiet: bool,

    #[command(flatten)]
    client_args: ClientArgs,

    #[command(subcommand)]
    subcommand: RegauthCmd,
}

impl Regauth {
    fn setup_logging(&self) -> Result<()> {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(
                EnvFilter::builder()
                    .with_default_directive(if self.quiet {
                        LevelFilter::OFF.into()
                    } else {
                        self.loglevel.parse().into_diagnostic()?
                    })
                    .from_env_lossy(),
            )
            .init();
        Ok(())
    }

    pub async fn load() -> Result<()> {
        let start = std::time::Instant::now();
        let matches = Regauth::command().get_matches();
        let mut regauth = Regauth::from_arg_matches(&matches).into_diagnostic()?;
        let cfg = if let Some(file) = &regauth.config {
            RegauthConfigOptions::new()
                .global_config_file(Some(file.clone()))
                .project_root(regauth.root.clone())
                .load()?
        } else {
            RegauthConfigOptions::new()
                .global_config_file(
                    ProjectDirs::from("", "", "regauth")
                        .map(|d| d.config_dir().to_owned().join("regauthrc.toml")),
                )
                .project_root(regauth.root.clone())
                .load()?
        };
        regauth.layer_config(&matches, &cfg)?;
        regauth.setup_logging()?;
        regauth.execute().await?;
        tracing::info!("Ran in {}s", start.elapsed().as_millis() as f32 / 1000.0);
        Ok(())
    }

    async fn execute(self) -> Result<()> {
        tracing::debug!("Running command: {:#?}", self.subcommand);
        let client_args = self.client_args;
        match self.subcommand {
            RegauthCmd::Ping(cmd) => cmd.execute(client_args).await,
            RegauthCmd::Challenge(cmd) => cmd.execute(client_args).await,
            RegauthCmd::Token(cmd) => cmd.execute(client_args).await,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum RegauthCmd {
    /// Check that a registry is reachable and accepts our credentials.
    Ping(PingCmd),

    /// Show the authentication challenge a registry answers with.
    Challenge(ChallengeCmd),

    /// Get a token for a set of scopes.
    Token(TokenCmd),
}

impl RegauthConfigLayer for Regauth {
    fn layer_config(&mut self, args: &ArgMatches, conf: &RegauthConfig) -> Result<()> {
        self.client_args.layer_config(args, conf)?;
        let Some((_, sub_args)) = args.subcommand() else {
            return Ok(());
        };
        match self.subcommand {
            RegauthCmd::Ping(ref mut ping) => ping.layer_config(sub_args, conf),
            RegauthCmd::Challenge(ref mut challenge) => challenge.layer_config(sub_args, conf),
            RegauthCmd::Token(ref mut token) => token.layer_config(sub_args, conf),
        }
    }
}
