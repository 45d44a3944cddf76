//! Token endpoint calls: the distribution-spec `GET` exchange and the OAuth2
//! `POST` grants.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{Client, Response};
use serde::Deserialize;
use url::Url;

use crate::credentials::Credential;
use crate::error::{AuthError, Result};

/// Where and what to ask a bearer token endpoint for.
#[derive(Debug, Clone)]
pub(crate) struct TokenRequest<'a> {
    pub(crate) registry: &'a str,
    pub(crate) realm: Option<&'a str>,
    pub(crate) service: &'a str,
    pub(crate) scopes: &'a [String],
    pub(crate) client_id: &'a str,
    pub(crate) force_attempt_oauth2: bool,
}

#[derive(Deserialize)]
struct DistributionTokenResponse {
    #[serde(default)]
    access_token: String,
    // Older registries only send this one.
    #[serde(default)]
    token: String,
}

#[derive(Deserialize)]
struct OAuth2TokenResponse {
    #[serde(default)]
    access_token: String,
}

#[derive(Deserialize)]
struct RegistryErrors {
    #[serde(default)]
    errors: Vec<RegistryError>,
}

#[derive(Deserialize)]
struct RegistryError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// The token for HTTP Basic auth: `base64(username:password)`.
pub(crate) fn basic_token(registry: &str, cred: &Credential) -> Result<String> {
    if cred.is_empty() {
        return Err(AuthError::BasicCredentialNotFound(registry.to_string()));
    }
    if cred.username.is_empty() || cred.password.is_empty() {
        return Err(AuthError::IncompleteBasicCredential(registry.to_string()));
    }
    Ok(STANDARD.encode(format!("{}:{}", cred.username, cred.password)))
}

/// Gets a bearer token for `cred`, picking the exchange by what the
/// credential carries: a refresh token goes through the OAuth2 refresh
/// grant, an access token is used directly, and anything else goes through
/// the distribution `GET` exchange (or the OAuth2 password grant, if
/// forced).
pub(crate) async fn fetch_bearer_token(
    http: &Client,
    cred: &Credential,
    req: &TokenRequest<'_>,
) -> Result<String> {
    if !cred.refresh_token.is_empty() {
        let grant = [
            ("grant_type", "refresh_token"),
            ("refresh_token", cred.refresh_token.as_str()),
        ];
        return fetch_oauth2_token(http, req, &grant).await;
    }
    if !cred.access_token.is_empty() {
        tracing::debug!(registry = req.registry, "using the configured access token");
        return Ok(cred.access_token.clone());
    }
    if req.force_attempt_oauth2 && !cred.username.is_empty() && !cred.password.is_empty() {
        let grant = [
            ("grant_type", "password"),
            ("username", cred.username.as_str()),
            ("password", cred.password.as_str()),
        ];
        return fetch_oauth2_token(http, req, &grant).await;
    }
    fetch_distribution_token(http, cred, req).await
}

async fn fetch_distribution_token(
    http: &Client,
    cred: &Credential,
    req: &TokenRequest<'_>,
) -> Result<String> {
    let mut url = realm_url(req)?;
    {
        let mut query = url.query_pairs_mut();
        if !req.service.is_empty() {
            query.append_pair("service", req.service);
        }
        for scope in req.scopes {
            query.append_pair("scope", scope);
        }
    }
    tracing::debug!(%url, anonymous = cred.username.is_empty(), "requesting distribution token");

    let mut builder = http.get(url.clone());
    if !cred.username.is_empty() || !cred.password.is_empty() {
        builder = builder.basic_auth(&cred.username, Some(&cred.password));
    }
    let text = ok_text(builder.send().await?, &url).await?;
    let body: DistributionTokenResponse = serde_json::from_str(&text)
        .map_err(|e| AuthError::from_json_err(e, url.to_string(), text))?;
    if !body.access_token.is_empty() {
        Ok(body.access_token)
    } else if !body.token.is_empty() {
        Ok(body.token)
    } else {
        Err(AuthError::MissingToken(url.to_string()))
    }
}

async fn fetch_oauth2_token(
    http: &Client,
    req: &TokenRequest<'_>,
    grant: &[(&str, &str)],
) -> Result<String> {
    let url = realm_url(req)?;
    let scope = req.scopes.join(" ");
    let mut form: Vec<(&str, &str)> = grant.to_vec();
    form.push(("service", req.service));
    form.push(("client_id", req.client_id));
    if !scope.is_empty() {
        form.push(("scope", scope.as_str()));
    }
    tracing::debug!(%url, grant_type = grant[0].1, "requesting oauth2 token");

    let text = ok_text(http.post(url.clone()).form(&form).send().await?, &url).await?;
    let body: OAuth2TokenResponse = serde_json::from_str(&text)
        .map_err(|e| AuthError::from_json_err(e, url.to_string(), text))?;
    if body.access_token.is_empty() {
        Err(AuthError::MissingToken(url.to_string()))
    } else {
        Ok(body.access_token)
    }
}

fn realm_url(req: &TokenRequest<'_>) -> Result<Url> {
    let realm = req
        .realm
        .ok_or_else(|| AuthError::MissingRealm(req.registry.to_string()))?;
    Ok(Url::parse(realm)?)
}

/// Most a token endpoint's response body may weigh.
const MAX_TOKEN_RESPONSE_SIZE: usize = 128 * 1024;

/// Body of a successful response, or the registry's error for a failed one.
async fn ok_text(mut res: Response, url: &Url) -> Result<String> {
    let status = res.status();
    let too_large = || AuthError::ResponseError {
        url: url.to_string(),
        status: status.as_u16(),
        message: format!("response body exceeds {MAX_TOKEN_RESPONSE_SIZE} bytes"),
    };
    if res
        .content_length()
        .map_or(false, |len| len > MAX_TOKEN_RESPONSE_SIZE as u64)
    {
        return Err(too_large());
    }
    let mut body = Vec::new();
    while let Some(chunk) = res.chunk().await? {
        if body.len() + chunk.len() > MAX_TOKEN_RESPONSE_SIZE {
            return Err(too_large());
        }
        body.extend_from_slice(&chunk);
    }
    let text = String::from_utf8_lossy(&body).into_owned();
    if status.is_success() {
        return Ok(text);
    }
    let message = match serde_json::from_str::<RegistryErrors>(&text) {
        Ok(RegistryErrors { errors }) if !errors.is_empty() => errors
            .into_iter()
            .map(|e| {
                if e.code.is_empty() {
                    e.message
                } else {
                    format!("{}: {}", e.code.to_lowercase(), e.message)
                }
            })
            .collect::<Vec<_>>()
            .join("; "),
        _ => {
            let text = text.trim();
            if text.is_empty() {
                status.canonical_reason().unwrap_or_default().to_string()
            } else {
                text.chars().take(200).collect()
            }
        }
    };
    Err(AuthError::ResponseError {
        url: url.to_string(),
        status: status.as_u16(),
        message,
    })
}
