use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RegauthError {
    /// No registry was given on the command line, and none is configured.
    #[error("No registry given.")]
    #[diagnostic(
        code(regauth::missing_registry),
        url(docsrs),
        help("Pass a registry, like `regauth ping localhost:5000`, or set `registry` in your regauthrc.toml.")
    )]
    MissingRegistry,

    /// The registry couldn't be turned into a URL.
    #[error("`{registry}` is not a valid registry: {source}")]
    #[diagnostic(
        code(regauth::invalid_registry),
        url(docsrs),
        help("Registries are given as `host[:port]`, or as a full URL like `https://registry.example.io`.")
    )]
    InvalidRegistry {
        registry: String,
        source: url::ParseError,
    },
}
