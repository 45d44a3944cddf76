use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RegauthConfigError {
    #[error(transparent)]
    #[diagnostic(code(regauth_config::error), url(docsrs))]
    ConfigError(#[from] config::ConfigError),

    /// A config value exists, but isn't of the type the option needs.
    #[error("Invalid value for config option `{key}`: {source}")]
    #[diagnostic(
        code(regauth_config::invalid_value),
        url(docsrs),
        help("Check the value of `{key}` in your regauthrc.toml or the REGAUTH_ environment variables.")
    )]
    InvalidValue {
        key: String,
        source: config::ConfigError,
    },
}
