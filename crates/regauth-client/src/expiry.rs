use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Deserialize;

/// Lifetime assumed for tokens we can't read an expiration from. This is
/// what the distribution token spec says `expires_in` defaults to.
pub const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(60);

/// How long before its real expiry a token stops being handed out, so it
/// doesn't die in the middle of a request.
pub const EXPIRY_GRACE_PERIOD: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<serde_json::Number>,
}

/// Works out when `token` expires, if it were cached at `now`.
///
/// JWTs are decoded (without any verification) and their `exp` claim used.
/// Anything else, including JWTs with unreadable claims or without `exp`,
/// gets [`DEFAULT_TOKEN_LIFETIME`].
pub fn expiry_of(token: &str, now: SystemTime) -> SystemTime {
    jwt_expiry(token).unwrap_or(now + DEFAULT_TOKEN_LIFETIME)
}

fn jwt_expiry(token: &str) -> Option<SystemTime> {
    let mut segments = token.split('.');
    let (Some(_header), Some(claims), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return None;
    };
    let claims = URL_SAFE_NO_PAD.decode(claims.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&claims).ok()?;
    let exp = claims.exp?.as_f64()?;
    if exp < 0.0 {
        return None;
    }
    // Out of range for `SystemTime` on this platform means unusable, not
    // immortal.
    UNIX_EPOCH.checked_add(Duration::try_from_secs_f64(exp).ok()?)
}

/// Whether a token expiring at `expires_at` should no longer be used at
/// `now`. `None` never expires.
pub fn is_expired(expires_at: Option<SystemTime>, now: SystemTime) -> bool {
    match expires_at {
        Some(expires_at) => now + EXPIRY_GRACE_PERIOD > expires_at,
        None => false,
    }
}

#[cfg(test)]
pub(crate) fn test_jwt(exp: Option<u64>) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let claims = match exp {
        Some(exp) => format!(r#"{{"sub":"test","exp":{exp}}}"#),
        None => r#"{"sub":"test"}"#.to_string(),
    };
    let claims = URL_SAFE_NO_PAD.encode(claims);
    format!("{header}.{claims}.c2lnbmF0dXJl")
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn at(secs: u64) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(secs)
    }

    #[test]
    fn reads_exp_claim() {
        let now = at(1_000_000);
        assert_eq!(
            expiry_of(&test_jwt(Some(1_003_600)), now),
            at(1_003_600)
        );
    }

    #[test]
    fn opaque_tokens_get_default_lifetime() {
        let now = at(1_000_000);
        for token in [
            "",
            "opaque-token",
            "a.b",
            "a.b.c.d",
            "header.!!!not-base64!!!.signature",
            // valid base64, but not a JSON object
            "header.bm90IGpzb24.signature",
            // JSON, but `exp` isn't a number
            "header.eyJleHAiOiJzb29uIn0.signature",
        ] {
            assert_eq!(expiry_of(token, now), at(1_000_060), "{token:?}");
        }
    }

    #[test]
    fn out_of_range_exp_gets_default_lifetime() {
        let now = at(1_000_000);
        for claims in [r#"{"exp":1e19}"#, r#"{"exp":1e300}"#, r#"{"exp":-5}"#] {
            let token = format!(
                "{}.{}.c2lnbmF0dXJl",
                URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256"}"#),
                URL_SAFE_NO_PAD.encode(claims)
            );
            assert_eq!(expiry_of(&token, now), at(1_000_060), "{claims}");
        }
    }

    #[test]
    fn jwt_without_exp_gets_default_lifetime() {
        let now = at(1_000_000);
        assert_eq!(expiry_of(&test_jwt(None), now), at(1_000_060));
    }

    #[test]
    fn grace_period() {
        let expires_at = Some(at(100));
        assert!(!is_expired(expires_at, at(80)));
        assert!(!is_expired(expires_at, at(90)));
        assert!(is_expired(expires_at, at(91)));
        assert!(is_expired(expires_at, at(200)));
    }

    #[test]
    fn unset_expiry_never_expires() {
        assert!(!is_expired(None, at(u32::MAX as u64)));
    }
}
