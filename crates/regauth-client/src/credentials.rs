use std::fmt::{self, Debug};

use async_trait::async_trait;

use crate::error::Result;

/// Credentials for one registry.
///
/// All fields are optional. A credential with every field empty is
/// [`EMPTY_CREDENTIAL`], which means "nothing configured" and leads to
/// anonymous token requests.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub password: String,
    /// OAuth2 refresh token, sometimes called an identity token.
    pub refresh_token: String,
    /// A token to present to the registry as-is.
    pub access_token: String,
}

pub const EMPTY_CREDENTIAL: Credential = Credential {
    username: String::new(),
    password: String::new(),
    refresh_token: String::new(),
    access_token: String::new(),
};

impl Credential {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    pub fn refresh_token(token: impl Into<String>) -> Self {
        Self {
            refresh_token: token.into(),
            ..Default::default()
        }
    }

    pub fn access_token(token: impl Into<String>) -> Self {
        Self {
            access_token: token.into(),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self == &EMPTY_CREDENTIAL
    }
}

impl Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn redact(s: &str) -> &'static str {
            if s.is_empty() {
                ""
            } else {
                "***"
            }
        }
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &redact(&self.password))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("access_token", &redact(&self.access_token))
            .finish()
    }
}

/// Looks up credentials for a registry, given as `host[:port]`.
///
/// Not having credentials isn't an error: return [`EMPTY_CREDENTIAL`].
/// Plain closures work as providers too.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn credential(&self, registry: &str) -> Result<Credential>;
}

#[async_trait]
impl<F> CredentialProvider for F
where
    F: Fn(&str) -> Result<Credential> + Send + Sync,
{
    async fn credential(&self, registry: &str) -> Result<Credential> {
        self(registry)
    }
}

/// A single credential for a single registry. Every other registry gets
/// [`EMPTY_CREDENTIAL`].
#[derive(Debug, Clone)]
pub struct StaticCredential {
    registry: String,
    credential: Credential,
}

impl StaticCredential {
    pub fn new(registry: impl AsRef<str>, credential: Credential) -> Self {
        let registry = match registry.as_ref() {
            // Docker Hub is addressed as `docker.io`, but its API actually
            // lives here.
            "docker.io" => "registry-1.docker.io".to_string(),
            other => other.to_string(),
        };
        Self {
            registry,
            credential,
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredential {
    async fn credential(&self, registry: &str) -> Result<Credential> {
        if registry == self.registry {
            Ok(self.credential.clone())
        } else {
            Ok(EMPTY_CREDENTIAL)
        }
    }
}

/// Used when no provider is configured.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct NoCredentials;

#[async_trait]
impl CredentialProvider for NoCredentials {
    async fn credential(&self, _registry: &str) -> Result<Credential> {
        Ok(EMPTY_CREDENTIAL)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::AuthError;

    #[test]
    fn empty_credential_is_distinguishable() {
        assert!(EMPTY_CREDENTIAL.is_empty());
        assert!(Credential::default().is_empty());
        assert!(!Credential::basic("me", "").is_empty());
        assert!(!Credential::refresh_token("r").is_empty());
        assert!(!Credential::access_token("a").is_empty());
    }

    #[test]
    fn debug_redacts_secrets() {
        let cred = Credential {
            username: "me".into(),
            password: "hunter2".into(),
            refresh_token: String::new(),
            access_token: "abc".into(),
        };
        let printed = format!("{cred:?}");
        assert!(printed.contains("me"));
        assert!(!printed.contains("hunter2"));
        assert!(!printed.contains("abc"));
    }

    #[async_std::test]
    async fn static_credential_matches_one_registry() -> Result<()> {
        let provider = StaticCredential::new("localhost:5000", Credential::basic("me", "pw"));
        assert_eq!(
            provider.credential("localhost:5000").await?,
            Credential::basic("me", "pw")
        );
        assert!(provider.credential("localhost:5001").await?.is_empty());
        Ok(())
    }

    #[async_std::test]
    async fn static_credential_maps_docker_hub() -> Result<()> {
        let provider = StaticCredential::new("docker.io", Credential::access_token("t"));
        assert_eq!(
            provider.credential("registry-1.docker.io").await?,
            Credential::access_token("t")
        );
        assert!(provider.credential("docker.io").await?.is_empty());
        Ok(())
    }

    #[async_std::test]
    async fn closures_are_providers() -> Result<()> {
        let provider = |registry: &str| {
            if registry == "private.io" {
                Ok(Credential::refresh_token("r"))
            } else {
                Err(AuthError::CredentialError(format!("no helper for {registry}")))
            }
        };
        assert_eq!(
            provider.credential("private.io").await?,
            Credential::refresh_token("r")
        );
        assert!(matches!(
            provider.credential("public.io").await,
            Err(AuthError::CredentialError(_))
        ));
        Ok(())
    }
}
