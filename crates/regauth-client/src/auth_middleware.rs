use std::fmt::{self, Debug};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use reqwest::header::{HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next};
use task_local_extensions::Extensions;
use url::Url;

use crate::cache::TokenCache;
use crate::challenge::{Challenge, Scheme};
use crate::credentials::CredentialProvider;
use crate::error::{AuthError, Result};
use crate::scope::Scopes;
use crate::token::{self, TokenRequest};

/// The value of an `Authorization` header, as a scheme and a token.
#[derive(Clone, PartialEq, Eq)]
pub struct Authorization {
    pub scheme: Scheme,
    pub token: String,
}

impl Authorization {
    /// Renders the header value. It's marked sensitive so it never shows up
    /// in logs.
    pub fn header_value(&self) -> Result<HeaderValue> {
        let mut val = HeaderValue::from_str(&format!("{} {}", self.scheme, self.token))
            .map_err(|e| AuthError::InvalidHeader(e.to_string()))?;
        val.set_sensitive(true);
        Ok(val)
    }
}

impl Debug for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorization")
            .field("scheme", &self.scheme)
            .field("token", &"***")
            .finish()
    }
}

/// Everything needed to turn a challenge into an [`Authorization`]. Shared
/// between the middleware and [`crate::RegistryClient::authorize`].
pub(crate) struct Authorizer {
    /// Plain client for token endpoints. Token requests must not go back
    /// through the auth middleware.
    pub(crate) http: reqwest::Client,
    pub(crate) cache: Arc<dyn TokenCache>,
    pub(crate) credentials: Arc<dyn CredentialProvider>,
    pub(crate) client_id: String,
    pub(crate) force_attempt_oauth2: bool,
    pub(crate) token_timeout: Option<Duration>,
}

impl Debug for Authorizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authorizer")
            .field("cache", &self.cache)
            .field("client_id", &self.client_id)
            .field("force_attempt_oauth2", &self.force_attempt_oauth2)
            .field("token_timeout", &self.token_timeout)
            .finish_non_exhaustive()
    }
}

impl Authorizer {
    /// What to send before the registry has challenged us, based only on
    /// what's already cached. Also returns the bearer key that was tried, so
    /// a later miss under the same key doesn't look the cache up twice.
    pub(crate) fn cached(&self, registry: &str, hints: &Scopes) -> (Option<Authorization>, String) {
        match self.cache.get_scheme(registry) {
            Some(Scheme::Basic) => {
                let auth = self
                    .cache
                    .get_token(registry, Scheme::Basic, "")
                    .map(|token| Authorization {
                        scheme: Scheme::Basic,
                        token,
                    });
                (auth, String::new())
            }
            Some(Scheme::Bearer) => {
                let key = hints.cache_key();
                let auth = self
                    .cache
                    .get_token(registry, Scheme::Bearer, &key)
                    .map(|token| Authorization {
                        scheme: Scheme::Bearer,
                        token,
                    });
                (auth, key)
            }
            _ => (None, String::new()),
        }
    }

    /// Answers `challenge` from `registry`, fetching and caching a token if
    /// necessary.
    pub(crate) async fn authorize(
        &self,
        registry: &str,
        hints: &Scopes,
        challenge: &Challenge,
        attempted_key: Option<&str>,
    ) -> Result<Authorization> {
        let token = match challenge.scheme {
            Scheme::Basic => self.bounded(self.basic(registry)).await?,
            Scheme::Bearer => {
                self.bounded(self.bearer(registry, hints, challenge, attempted_key))
                    .await?
            }
            Scheme::Unknown => return Err(AuthError::UnknownScheme(challenge.scheme.to_string())),
        };
        Ok(Authorization {
            scheme: challenge.scheme,
            token,
        })
    }

    async fn basic(&self, registry: &str) -> Result<String> {
        let fetch = async move {
            let cred = self.credentials.credential(registry).await?;
            token::basic_token(registry, &cred)
        }
        .boxed();
        self.cache.set(registry, Scheme::Basic, "", fetch).await
    }

    async fn bearer(
        &self,
        registry: &str,
        hints: &Scopes,
        challenge: &Challenge,
        attempted_key: Option<&str>,
    ) -> Result<String> {
        let scopes = hints.merged_with(challenge.scopes());
        let key = scopes.cache_key();
        if attempted_key != Some(key.as_str()) {
            if let Some(token) = self.cache.get_token(registry, Scheme::Bearer, &key) {
                tracing::debug!(registry, key = %key, "using cached bearer token");
                return Ok(token);
            }
        }

        let realm = challenge.realm();
        let service = challenge.service();
        let fetch = async move {
            let cred = self.credentials.credential(registry).await?;
            let req = TokenRequest {
                registry,
                realm,
                service,
                scopes: scopes.as_slice(),
                client_id: &self.client_id,
                force_attempt_oauth2: self.force_attempt_oauth2,
            };
            token::fetch_bearer_token(&self.http, &cred, &req).await
        }
        .boxed();
        self.cache.set(registry, Scheme::Bearer, &key, fetch).await
    }

    /// Applies the token timeout. Timing out drops the inner future, which
    /// frees up its single-flight slot for the next caller.
    async fn bounded(&self, fut: impl Future<Output = Result<String>>) -> Result<String> {
        match self.token_timeout {
            Some(limit) => async_std::future::timeout(limit, fut)
                .await
                .unwrap_or(Err(AuthError::DeadlineExceeded(limit))),
            None => fut.await,
        }
    }
}

/// Authorizes requests against container registries, answering `401`
/// challenges and retrying once.
///
/// Scope hints for bearer tokens are read from a [`Scopes`] request
/// extension.
#[derive(Debug, Clone)]
pub(crate) struct AuthMiddleware(pub(crate) Arc<Authorizer>);

#[async_trait::async_trait]
impl Middleware for AuthMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let registry = registry_host(req.url());
        let hints = extensions.get::<Scopes>().cloned().unwrap_or_default();
        let method = req.method().clone();
        let url = req.url().clone();

        let (cached, attempted_key) = self.0.cached(&registry, &hints);
        if let Some(auth) = cached {
            tracing::debug!(%registry, scheme = %auth.scheme, "attaching cached authorization");
            let val = auth.header_value().map_err(|e| e.with_request(&method, &url))?;
            req.headers_mut().insert(AUTHORIZATION, val);
        }

        let retry = req.try_clone();
        let res = next.clone().run(req, extensions).await?;
        if res.status() != StatusCode::UNAUTHORIZED {
            return Ok(res);
        }

        let challenge = res
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|val| val.to_str().ok())
            .map(Challenge::parse)
            .unwrap_or_default();
        tracing::debug!(%registry, scheme = %challenge.scheme, params = ?challenge.params, "got challenge");
        if challenge.scheme == Scheme::Unknown {
            return Ok(res);
        }
        let Some(mut retry) = retry else {
            tracing::warn!(%method, %url, "request body can't be replayed, returning the 401 as-is");
            return Ok(res);
        };

        let auth = self
            .0
            .authorize(&registry, &hints, &challenge, Some(&attempted_key))
            .await
            .map_err(|e| e.with_request(&method, &url))?;
        let val = auth.header_value().map_err(|e| e.with_request(&method, &url))?;
        retry.headers_mut().insert(AUTHORIZATION, val);

        let res = next.run(retry, extensions).await?;
        if res.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!(%method, %url, "still unauthorized after authenticating");
        }
        Ok(res)
    }
}

/// The registry a URL belongs to, as `host[:port]`. Default ports are left
/// out, the same way [`Url`] leaves them out.
pub fn registry_host(url: &Url) -> String {
    match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => String::new(),
    }
}
