use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Authentication scheme announced by a registry, or remembered by a
/// [`crate::TokenCache`] for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Scheme {
    #[default]
    Unknown,
    Basic,
    Bearer,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Unknown => "Unknown",
            Scheme::Basic => "Basic",
            Scheme::Bearer => "Bearer",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if s.eq_ignore_ascii_case("basic") {
            Scheme::Basic
        } else if s.eq_ignore_ascii_case("bearer") {
            Scheme::Bearer
        } else {
            Scheme::Unknown
        })
    }
}

/// A parsed `WWW-Authenticate` header.
///
/// Only bearer challenges carry parameters. Basic challenges come with a
/// `realm` too, but nothing in the basic flow needs it, so it's skipped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Challenge {
    pub scheme: Scheme,
    pub params: HashMap<String, String>,
}

impl Challenge {
    /// Parses a challenge header value.
    ///
    /// The grammar is RFC 7235 §2.1 combined with the list rule from RFC 7230
    /// §7:
    ///
    /// ```text
    /// challenge   = auth-scheme [ 1*SP ( token68 / #auth-param ) ]
    /// auth-param  = token BWS "=" BWS ( token / quoted-string )
    /// #auth-param = auth-param *( OWS "," OWS auth-param )
    /// ```
    ///
    /// This never fails. Parsing stops at the first malformed parameter and
    /// whatever was parsed up to that point is kept, since registries in the
    /// wild sometimes send headers with a valid prefix and garbage after it.
    pub fn parse(header: &str) -> Self {
        let (scheme, rest) = take_token(header);
        let scheme = scheme.parse::<Scheme>().unwrap_or_default();
        let mut challenge = Challenge {
            scheme,
            params: HashMap::new(),
        };
        if scheme != Scheme::Bearer {
            return challenge;
        }

        let mut rest = rest;
        loop {
            let (key, after_key) = take_token(skip_space(rest));
            if key.is_empty() {
                break;
            }
            let after_key = skip_space(after_key);
            let Some(after_eq) = after_key.strip_prefix('=') else {
                break;
            };
            let after_eq = skip_space(after_eq);
            let (value, after_value) = if after_eq.starts_with('"') {
                match take_quoted(after_eq) {
                    Some(parsed) => parsed,
                    None => break,
                }
            } else {
                let (value, after_value) = take_token(after_eq);
                if value.is_empty() {
                    break;
                }
                (value.to_string(), after_value)
            };
            challenge.params.insert(key.to_ascii_lowercase(), value);

            match skip_space(after_value).strip_prefix(',') {
                Some(next) => rest = next,
                None => break,
            }
        }
        challenge
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn realm(&self) -> Option<&str> {
        self.param("realm").filter(|realm| !realm.is_empty())
    }

    pub fn service(&self) -> &str {
        self.param("service").unwrap_or_default()
    }

    /// Scopes listed in the challenge. The `scope` parameter may hold
    /// several of them, separated by spaces.
    pub fn scopes(&self) -> Vec<String> {
        self.param("scope")
            .map(|scope| {
                scope
                    .split(' ')
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

// RFC 7230 §3.2.6
fn is_tchar(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '!' | '#' | '$' | '%' | '&' | '\'' | '*' | '+' | '-' | '.' | '^' | '_' | '`' | '|' | '~'
        )
}

fn take_token(s: &str) -> (&str, &str) {
    let end = s.find(|c: char| !is_tchar(c)).unwrap_or(s.len());
    s.split_at(end)
}

// "bad" whitespace, RFC 7230 §3.2.3
fn skip_space(s: &str) -> &str {
    s.trim_start_matches([' ', '\t'])
}

/// Parses a quoted-string at the start of `s`, resolving quoted-pairs.
/// Returns `None` when the closing quote is missing.
fn take_quoted(s: &str) -> Option<(String, &str)> {
    let mut value = String::new();
    let mut chars = s.char_indices().skip(1);
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Some((value, &s[idx + 1..])),
            '\\' => value.push(chars.next()?.1),
            c => value.push(c),
        }
    }
    None
}
