//! Authorization for HTTP requests against OCI/Docker registries.
//!
//! [`RegistryClient`] wraps a `reqwest` client with a middleware that
//! answers `401 Unauthorized` responses: it parses the `WWW-Authenticate`
//! challenge, resolves a [`Credential`] for the registry, exchanges it for a
//! token (HTTP Basic, OAuth2 refresh/password grants, or the distribution
//! token GET), caches the token in a [`TokenCache`] and retries the request
//! once.
//!
//! ```no_run
//! # async fn run() -> Result<(), regauth_client::AuthError> {
//! use regauth_client::{Credential, RegistryClient, Result, Scopes};
//!
//! let client = RegistryClient::builder()
//!     .credentials(|_registry: &str| -> Result<Credential> {
//!         Ok(Credential::basic("me", "hunter2"))
//!     })
//!     .build()?;
//! let res = client
//!     .get("https://registry.example.io/v2/library/hello/tags/list")
//!     .with_extension(Scopes::new(["repository:library/hello:pull"]))
//!     .send()
//!     .await?;
//! println!("{}", res.status());
//! # Ok(())
//! # }
//! ```

mod auth_middleware;
mod cache;
mod challenge;
mod client;
mod credentials;
mod error;
mod expiry;
mod flight;
mod scope;
mod token;

pub use auth_middleware::{registry_host, Authorization};
pub use cache::{CacheEntry, ConcurrentCache, NoopCache, TokenCache, TokenFetch, TokenRecord};
pub use challenge::{Challenge, Scheme};
pub use client::{RegistryClient, RegistryClientBuilder, DEFAULT_CLIENT_ID};
pub use credentials::{Credential, CredentialProvider, StaticCredential, EMPTY_CREDENTIAL};
pub use error::{AuthError, Result};
pub use expiry::{expiry_of, is_expired, DEFAULT_TOKEN_LIFETIME, EXPIRY_GRACE_PERIOD};
pub use scope::{
    clean_scopes, repository_scope, Scopes, ACTION_DELETE, ACTION_PULL, ACTION_PUSH,
    REGISTRY_CATALOG_SCOPE,
};
