use std::sync::Arc;
use std::time::Duration;

use miette::{Diagnostic, SourceOffset};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, AuthError>;

/// Error type returned by everything in this crate.
///
/// Errors are `Clone` because a single token fetch can have many waiters,
/// and every one of them receives the same outcome.
#[derive(Debug, Clone, Error, Diagnostic)]
pub enum AuthError {
    /// The cache or the orchestrator was handed an authentication scheme it
    /// doesn't know how to compute authorization for.
    #[error("Unknown authentication scheme `{0}`.")]
    #[diagnostic(code(regauth_client::unknown_scheme), url(docsrs))]
    UnknownScheme(String),

    /// The registry asked for HTTP Basic auth, but no credential was
    /// available for it.
    #[error("No basic auth credential found for `{0}`.")]
    #[diagnostic(
        code(regauth_client::basic_credential_not_found),
        url(docsrs),
        help("Configure a username and password for this registry.")
    )]
    BasicCredentialNotFound(String),

    /// Basic auth needs both a username and a password.
    #[error("Missing username or password for basic auth on `{0}`.")]
    #[diagnostic(code(regauth_client::incomplete_basic_credential), url(docsrs))]
    IncompleteBasicCredential(String),

    /// A bearer challenge didn't say where to get a token from.
    #[error("Bearer challenge from `{0}` has no `realm` parameter.")]
    #[diagnostic(code(regauth_client::missing_realm), url(docsrs))]
    MissingRealm(String),

    /// The token endpoint answered successfully, but without a token.
    #[error("Token response from `{0}` did not contain a token.")]
    #[diagnostic(code(regauth_client::missing_token), url(docsrs))]
    MissingToken(String),

    /// A token endpoint (or the registry itself, when probed directly)
    /// answered with an error status.
    #[error("Request to `{url}` failed with status {status}: {message}")]
    #[diagnostic(code(regauth_client::response_error), url(docsrs))]
    ResponseError {
        url: String,
        status: u16,
        message: String,
    },

    /// Failed to parse a JSON response from a token endpoint.
    #[error("{source}")]
    #[diagnostic(
        code(regauth_client::bad_json),
        url(docsrs),
        help("The token endpoint at `{url}` returned something that isn't the JSON we expected.")
    )]
    BadJson {
        source: Arc<serde_json::Error>,
        url: String,
        #[source_code]
        json: String,
        #[label("here")]
        err_loc: (usize, usize),
    },

    /// A transport-level error from reqwest.
    #[error("Request failed: {0}")]
    #[diagnostic(code(regauth_client::request_error), url(docsrs))]
    RequestError(#[source] Arc<reqwest::Error>),

    /// Some other middleware in the stack failed.
    #[error("{0}")]
    #[diagnostic(code(regauth_client::middleware_error), url(docsrs))]
    MiddlewareError(Arc<anyhow::Error>),

    #[error(transparent)]
    #[diagnostic(code(regauth_client::url_parse_error), url(docsrs))]
    UrlParseError(#[from] url::ParseError),

    /// A header value couldn't be built, usually because a token contained
    /// characters that aren't allowed in HTTP headers.
    #[error("Invalid header value: {0}")]
    #[diagnostic(code(regauth_client::invalid_header), url(docsrs))]
    InvalidHeader(String),

    /// A [`crate::CredentialProvider`] failed to produce a credential.
    #[error("Failed to resolve credentials: {0}")]
    #[diagnostic(code(regauth_client::credential_error), url(docsrs))]
    CredentialError(String),

    /// The operation was cancelled before it completed.
    #[error("Operation was cancelled.")]
    #[diagnostic(code(regauth_client::cancelled), url(docsrs))]
    Cancelled,

    /// Acquiring a token took longer than the configured timeout.
    #[error("Token acquisition timed out after {0:?}.")]
    #[diagnostic(
        code(regauth_client::deadline_exceeded),
        url(docsrs),
        help("Raise the token timeout, or check that the token endpoint is reachable.")
    )]
    DeadlineExceeded(Duration),

    /// Authorizing a specific request failed.
    #[error("{method} {url:?}: {source}")]
    #[diagnostic(code(regauth_client::authorize), url(docsrs))]
    Authorize {
        method: String,
        url: String,
        source: Box<AuthError>,
    },
}

impl AuthError {
    pub fn from_json_err(err: serde_json::Error, url: String, json: String) -> Self {
        // These json strings can get VERY LONG and miette doesn't (yet?)
        // support any "windowing" mechanism for displaying stuff, so we have
        // to manually shorten the string to only the relevant bits and
        // translate the spans accordingly.
        let err_offset = SourceOffset::from_location(&json, err.line(), err.column())
            .offset()
            .min(json.len());
        let mut start = err_offset.saturating_sub(40);
        while !json.is_char_boundary(start) {
            start -= 1;
        }
        let mut end = std::cmp::min(err_offset + 40, json.len());
        while !json.is_char_boundary(end) {
            end += 1;
        }
        let snipped_json = json[start..end].to_string();
        Self::BadJson {
            source: Arc::new(err),
            url,
            json: snipped_json,
            err_loc: (err_offset - start, 0),
        }
    }

    /// Whether this error means the operation was abandoned rather than
    /// failed. In-flight token fetches that end this way are handed to the
    /// next waiter instead of being shared.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded(_))
    }

    /// Attaches the request that was being authorized when this error
    /// happened.
    pub(crate) fn with_request(self, method: &reqwest::Method, url: &url::Url) -> Self {
        Self::Authorize {
            method: method.to_string(),
            url: url.to_string(),
            source: Box::new(self),
        }
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::RequestError(Arc::new(err))
    }
}

impl From<reqwest_middleware::Error> for AuthError {
    fn from(err: reqwest_middleware::Error) -> Self {
        match err {
            reqwest_middleware::Error::Reqwest(err) => Self::RequestError(Arc::new(err)),
            reqwest_middleware::Error::Middleware(err) => match err.downcast::<AuthError>() {
                Ok(err) => err,
                Err(err) => Self::MiddlewareError(Arc::new(err)),
            },
        }
    }
}

impl From<AuthError> for reqwest_middleware::Error {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::RequestError(err) => match Arc::try_unwrap(err) {
                Ok(err) => reqwest_middleware::Error::Reqwest(err),
                Err(err) => reqwest_middleware::Error::Middleware(anyhow::Error::new(
                    AuthError::RequestError(err),
                )),
            },
            err => reqwest_middleware::Error::Middleware(anyhow::Error::new(err)),
        }
    }
}
