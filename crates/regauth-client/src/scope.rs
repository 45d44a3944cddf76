use std::collections::{BTreeMap, BTreeSet};

pub const ACTION_PULL: &str = "pull";
pub const ACTION_PUSH: &str = "push";
pub const ACTION_DELETE: &str = "delete";

/// Scope for listing the repositories of a registry.
pub const REGISTRY_CATALOG_SCOPE: &str = "registry:catalog:*";

const WILDCARD: &str = "*";

/// Builds a `repository:<name>:<actions>` scope. Actions are cleaned the same
/// way [`clean_scopes`] does.
pub fn repository_scope(repository: &str, actions: &[&str]) -> String {
    let actions = clean_actions(actions.iter().copied());
    format!("repository:{repository}:{}", actions.join(","))
}

/// Normalizes a list of `resourceType:resourceName:actions` scopes.
///
/// Actions for the same resource are merged, deduplicated and sorted, and a
/// `*` action swallows everything else. Scopes that don't have the
/// three-part shape are kept verbatim. Scopes with an empty action list are
/// dropped, since they grant nothing. The result is sorted, so the same
/// inputs always clean to the same list no matter their order.
pub fn clean_scopes<I, S>(scopes: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let scopes: Vec<S> = scopes.into_iter().collect();
    match scopes.as_slice() {
        [] => Vec::new(),
        [scope] => clean_one(scope.as_ref()).into_iter().collect(),
        _ => clean_many(scopes.iter().map(AsRef::as_ref)),
    }
}

fn clean_one(scope: &str) -> Option<String> {
    let Some((resource, actions)) = scope.rsplit_once(':') else {
        return Some(scope.to_string());
    };
    let actions = clean_actions(actions.split(','));
    if actions.is_empty() {
        None
    } else {
        Some(format!("{resource}:{}", actions.join(",")))
    }
}

fn clean_many<'a>(scopes: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut result = Vec::new();
    let mut resources: BTreeMap<(&str, &str), BTreeSet<&str>> = BTreeMap::new();
    for scope in scopes {
        let Some((resource_type, rest)) = scope.split_once(':') else {
            result.push(scope.to_string());
            continue;
        };
        let Some((resource_name, actions)) = rest.rsplit_once(':') else {
            result.push(scope.to_string());
            continue;
        };
        if actions.is_empty() {
            continue;
        }
        resources
            .entry((resource_type, resource_name))
            .or_default()
            .extend(actions.split(',').filter(|a| !a.is_empty()));
    }

    for ((resource_type, resource_name), actions) in resources {
        if actions.is_empty() {
            continue;
        }
        let actions = if actions.contains(WILDCARD) {
            WILDCARD.to_string()
        } else {
            actions.into_iter().collect::<Vec<_>>().join(",")
        };
        result.push(format!("{resource_type}:{resource_name}:{actions}"));
    }

    result.sort();
    result
}

fn clean_actions<'a>(actions: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let actions: BTreeSet<&str> = actions.filter(|a| !a.is_empty()).collect();
    if actions.contains(WILDCARD) {
        vec![WILDCARD]
    } else {
        actions.into_iter().collect()
    }
}

/// Scope hints for a single request.
///
/// Attach them with `with_extension` on a request built from a
/// [`crate::RegistryClient`] and the auth middleware will ask the token
/// endpoint for them in addition to whatever the registry's challenge asks
/// for. Requesting everything an operation needs up front lets one token
/// cover several requests.
///
/// The list is always kept clean (see [`clean_scopes`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Scopes(Vec<String>);

impl Scopes {
    /// A fresh set of hints, replacing whatever a request had before once
    /// attached.
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(clean_scopes(scopes))
    }

    /// Merges more scopes into these hints. Appending nothing leaves them
    /// untouched.
    pub fn append<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut scopes = scopes.into_iter().peekable();
        if scopes.peek().is_none() {
            return self;
        }
        let merged: Vec<String> = self
            .0
            .drain(..)
            .chain(scopes.map(|s| s.as_ref().to_string()))
            .collect();
        self.0 = clean_scopes(merged);
        self
    }

    /// Merges the challenge's scopes into these hints.
    pub(crate) fn merged_with(&self, scopes: Vec<String>) -> Scopes {
        self.clone().append(scopes)
    }

    /// Key under which tokens for exactly these scopes are cached.
    pub fn cache_key(&self) -> String {
        self.0.join(" ")
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: AsRef<str>> FromIterator<S> for Scopes {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter)
    }
}
