use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, WWW_AUTHENTICATE};
use reqwest::{Client, IntoUrl, Method, StatusCode};
use reqwest_middleware::{ClientWithMiddleware, RequestBuilder};
use url::Url;

use crate::auth_middleware::{registry_host, AuthMiddleware, Authorization, Authorizer};
use crate::cache::{ConcurrentCache, TokenCache};
use crate::challenge::{Challenge, Scheme};
use crate::credentials::{CredentialProvider, NoCredentials};
use crate::error::{AuthError, Result};
use crate::scope::Scopes;

pub const DEFAULT_CLIENT_ID: &str = "regauth";

/// Configures a [`RegistryClient`].
pub struct RegistryClientBuilder {
    cache: Option<Arc<dyn TokenCache>>,
    credentials: Arc<dyn CredentialProvider>,
    client_id: String,
    force_attempt_oauth2: bool,
    token_timeout: Option<Duration>,
    user_agent: String,
    headers: HeaderMap,
}

impl Default for RegistryClientBuilder {
    fn default() -> Self {
        Self {
            cache: None,
            credentials: Arc::new(NoCredentials),
            client_id: DEFAULT_CLIENT_ID.into(),
            force_attempt_oauth2: false,
            token_timeout: None,
            user_agent: format!("regauth/{}", env!("CARGO_PKG_VERSION")),
            headers: HeaderMap::new(),
        }
    }
}

impl Debug for RegistryClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryClientBuilder")
            .field("cache", &self.cache)
            .field("client_id", &self.client_id)
            .field("force_attempt_oauth2", &self.force_attempt_oauth2)
            .field("token_timeout", &self.token_timeout)
            .field("user_agent", &self.user_agent)
            .finish_non_exhaustive()
    }
}

impl RegistryClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cache to use. Clients that share a cache share tokens. Without
    /// one, each built client gets its own [`ConcurrentCache`].
    pub fn cache(mut self, cache: Arc<dyn TokenCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Where credentials come from. Without a provider every registry is
    /// accessed anonymously.
    pub fn credentials(mut self, provider: impl CredentialProvider + 'static) -> Self {
        self.credentials = Arc::new(provider);
        self
    }

    /// OAuth2 client ID sent with refresh and password grants.
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Exchange usernames and passwords through the OAuth2 password grant
    /// instead of the distribution token `GET`.
    pub fn force_attempt_oauth2(mut self, force: bool) -> Self {
        self.force_attempt_oauth2 = force;
        self
    }

    /// Upper bound on how long getting a single token may take.
    pub fn token_timeout(mut self, timeout: Duration) -> Self {
        self.token_timeout = Some(timeout);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Headers sent with every request, token requests included.
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn build(self) -> Result<RegistryClient> {
        let http = Client::builder()
            .user_agent(&self.user_agent)
            .default_headers(self.headers)
            .pool_max_idle_per_host(20)
            .build()?;
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(ConcurrentCache::new()));
        let authorizer = Arc::new(Authorizer {
            http: http.clone(),
            cache: cache.clone(),
            credentials: self.credentials,
            client_id: self.client_id,
            force_attempt_oauth2: self.force_attempt_oauth2,
            token_timeout: self.token_timeout,
        });
        let client = reqwest_middleware::ClientBuilder::new(http.clone())
            .with(AuthMiddleware(authorizer.clone()))
            .build();
        Ok(RegistryClient {
            client,
            http,
            authorizer,
            cache,
        })
    }
}

/// HTTP client for talking to OCI/Docker registries.
///
/// Requests made through it are authorized automatically: a `401`
/// challenge is answered with a token (fetched once and cached) and the
/// request is retried. Attach [`Scopes`] to a request with
/// [`RequestBuilder::with_extension`] to ask for a token that covers more
/// than the registry's challenge asks for.
///
/// Cloning is cheap, and clones share their token cache.
#[derive(Clone)]
pub struct RegistryClient {
    client: ClientWithMiddleware,
    http: Client,
    authorizer: Arc<Authorizer>,
    cache: Arc<dyn TokenCache>,
}

impl Debug for RegistryClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryClient")
            .field("authorizer", &self.authorizer)
            .finish_non_exhaustive()
    }
}

impl RegistryClient {
    pub fn builder() -> RegistryClientBuilder {
        RegistryClientBuilder::new()
    }

    /// A client with a fresh cache and no credentials.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn cache(&self) -> &Arc<dyn TokenCache> {
        &self.cache
    }

    pub fn request<U: IntoUrl>(&self, method: Method, url: U) -> RequestBuilder {
        self.client.request(method, url)
    }

    pub fn get<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.client.get(url)
    }

    pub fn head<U: IntoUrl>(&self, url: U) -> RequestBuilder {
        self.client.head(url)
    }

    /// Checks that the registry at `registry` speaks the distribution API
    /// and that we're allowed to talk to it.
    pub async fn ping(&self, registry: &Url) -> Result<()> {
        let url = api_root(registry)?;
        let res = self.get(url.clone()).send().await?;
        let status = res.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(AuthError::ResponseError {
                url: url.to_string(),
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or_default().to_string(),
            })
        }
    }

    /// Probes the registry's API root without any credentials and returns
    /// the challenge it answers with. A registry that doesn't require auth
    /// gives back a challenge with [`Scheme::Unknown`].
    pub async fn challenge(&self, registry: &Url) -> Result<Challenge> {
        Ok(self
            .probe(registry)
            .await?
            .as_deref()
            .map(Challenge::parse)
            .unwrap_or_default())
    }

    /// Gets authorization for `scopes` on `registry` without making any
    /// other request, going through the same cache the client's requests
    /// use.
    pub async fn authorize(&self, registry: &Url, scopes: &Scopes) -> Result<Authorization> {
        let url = api_root(registry)?;
        let header = self
            .probe(registry)
            .await
            .map_err(|e| e.with_request(&Method::GET, &url))?;
        let challenge = header
            .as_deref()
            .map(Challenge::parse)
            .unwrap_or_default();
        if challenge.scheme == Scheme::Unknown {
            let scheme = header
                .as_deref()
                .and_then(|h| h.split_whitespace().next())
                .unwrap_or("none");
            return Err(AuthError::UnknownScheme(scheme.to_string()).with_request(&Method::GET, &url));
        }
        self.authorizer
            .authorize(&registry_host(registry), scopes, &challenge, None)
            .await
            .map_err(|e| e.with_request(&Method::GET, &url))
    }

    /// The `WWW-Authenticate` header of an unauthenticated `GET /v2/`, if
    /// the registry answered with a `401`.
    async fn probe(&self, registry: &Url) -> Result<Option<String>> {
        let url = api_root(registry)?;
        tracing::debug!(%url, "probing registry for a challenge");
        let res = self.http.get(url).send().await?;
        if res.status() != StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        Ok(res
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|val| val.to_str().ok())
            .map(String::from))
    }
}

fn api_root(registry: &Url) -> Result<Url> {
    Ok(registry.join("/v2/")?)
}
