use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::BoxFuture;

use crate::challenge::Scheme;
use crate::error::{AuthError, Result};
use crate::expiry;
use crate::flight::{Flight, Landing};

/// A deferred, possibly expensive, token acquisition.
pub type TokenFetch<'a> = BoxFuture<'a, Result<String>>;

/// Storage for the tokens the auth middleware obtains.
///
/// Lookups never fetch anything. A miss (including an expired token, or a
/// token cached under a different scheme) is `None`, and the caller is
/// expected to follow up with [`TokenCache::set`].
#[async_trait]
pub trait TokenCache: Debug + Send + Sync {
    /// Scheme the registry was last authorized with.
    fn get_scheme(&self, registry: &str) -> Option<Scheme>;

    /// Cached token for `registry` under `scheme`. For [`Scheme::Basic`]
    /// the `key` is ignored, since a registry only ever has one basic
    /// token.
    fn get_token(&self, registry: &str, scheme: Scheme, key: &str) -> Option<String>;

    /// Runs `fetch` and caches the token it produces.
    async fn set<'a>(
        &'a self,
        registry: &'a str,
        scheme: Scheme,
        key: &'a str,
        fetch: TokenFetch<'a>,
    ) -> Result<String>;
}

/// A cached token.
#[derive(Clone, PartialEq, Eq)]
pub struct TokenRecord {
    pub token: String,
    /// `None` means the token doesn't expire.
    pub expires_at: Option<SystemTime>,
}

impl TokenRecord {
    /// A bearer token, with its expiry read out of the token itself.
    pub fn bearer(token: String, now: SystemTime) -> Self {
        let expires_at = Some(expiry::expiry_of(&token, now));
        Self { token, expires_at }
    }

    /// A basic token. These are just encoded credentials and never expire.
    pub fn basic(token: String) -> Self {
        Self {
            token,
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        expiry::is_expired(self.expires_at, now)
    }
}

impl Debug for TokenRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenRecord")
            .field("token", &"***")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Everything cached for one registry. The scheme decides how authorization
/// is computed, so a registry only ever holds tokens for one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEntry {
    Basic(TokenRecord),
    /// Bearer tokens, keyed by the scopes they were issued for.
    Bearer(HashMap<String, TokenRecord>),
}

impl CacheEntry {
    pub fn scheme(&self) -> Scheme {
        match self {
            CacheEntry::Basic(_) => Scheme::Basic,
            CacheEntry::Bearer(_) => Scheme::Bearer,
        }
    }
}

/// The default [`TokenCache`]. Safe to share between any number of
/// concurrent requests.
///
/// Concurrent [`TokenCache::set`] calls for the same registry, scheme and
/// key run only one fetch between them. Everybody gets that fetch's
/// outcome, and only the caller that ran it writes to the cache. Failures
/// are not cached, so the next call tries again.
#[derive(Debug, Default)]
pub struct ConcurrentCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    flights: DashMap<String, Arc<Flight>>,
}

impl ConcurrentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every cached token.
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn commit(&self, registry: &str, scheme: Scheme, key: &str, token: &str) {
        let record = match scheme {
            Scheme::Basic => TokenRecord::basic(token.to_string()),
            Scheme::Bearer => {
                let record = TokenRecord::bearer(token.to_string(), SystemTime::now());
                tracing::debug!(
                    registry,
                    key,
                    expires_at = ?record.expires_at,
                    "caching bearer token"
                );
                record
            }
            // Rejected in `set` before anything is fetched.
            Scheme::Unknown => return,
        };
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if scheme == Scheme::Basic {
            entries.insert(registry.to_string(), CacheEntry::Basic(record));
            return;
        }
        match entries.get_mut(registry) {
            Some(CacheEntry::Bearer(tokens)) => {
                tokens.insert(key.to_string(), record);
            }
            _ => {
                entries.insert(
                    registry.to_string(),
                    CacheEntry::Bearer(HashMap::from([(key.to_string(), record)])),
                );
            }
        }
    }
}

#[async_trait]
impl TokenCache for ConcurrentCache {
    fn get_scheme(&self, registry: &str) -> Option<Scheme> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(registry)
            .map(CacheEntry::scheme)
    }

    fn get_token(&self, registry: &str, scheme: Scheme, key: &str) -> Option<String> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let record = match (entries.get(registry)?, scheme) {
            (CacheEntry::Basic(record), Scheme::Basic) => record,
            (CacheEntry::Bearer(tokens), Scheme::Bearer) => tokens.get(key)?,
            _ => return None,
        };
        if record.is_expired(SystemTime::now()) {
            tracing::debug!(registry, %scheme, key, "cached token expired");
            return None;
        }
        Some(record.token.clone())
    }

    async fn set<'a>(
        &'a self,
        registry: &'a str,
        scheme: Scheme,
        key: &'a str,
        fetch: TokenFetch<'a>,
    ) -> Result<String> {
        if scheme == Scheme::Unknown {
            return Err(AuthError::UnknownScheme(scheme.to_string()));
        }
        let flight_key = format!("{registry} {scheme} {key}");
        let flight = self
            .flights
            .entry(flight_key.clone())
            .or_insert_with(|| Arc::new(Flight::new()))
            .value()
            .clone();
        let boarding = Boarding {
            flights: &self.flights,
            key: flight_key,
            flight,
        };

        match boarding.flight.join(fetch).await {
            Landing::Owner(outcome) => {
                let token = outcome?;
                self.commit(registry, scheme, key, &token);
                Ok(token)
            }
            Landing::Passenger(outcome) => outcome,
            Landing::Abandoned(err) => Err(err),
        }
    }
}

/// Takes a settled (or deserted) flight out of the map once its caller is
/// done with it, so the map only ever holds fetches that are still running.
struct Boarding<'a> {
    flights: &'a DashMap<String, Arc<Flight>>,
    key: String,
    flight: Arc<Flight>,
}

impl Drop for Boarding<'_> {
    fn drop(&mut self) {
        self.flights.remove_if(&self.key, |_, flight| {
            // Two references: the map's and ours. No one else is waiting.
            Arc::ptr_eq(flight, &self.flight)
                && (flight.is_settled() || Arc::strong_count(flight) <= 2)
        });
    }
}

/// A [`TokenCache`] that caches nothing. Every [`TokenCache::set`] runs its
/// fetch.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCache;

#[async_trait]
impl TokenCache for NoopCache {
    fn get_scheme(&self, _registry: &str) -> Option<Scheme> {
        None
    }

    fn get_token(&self, _registry: &str, _scheme: Scheme, _key: &str) -> Option<String> {
        None
    }

    async fn set<'a>(
        &'a self,
        _registry: &'a str,
        _scheme: Scheme,
        _key: &'a str,
        fetch: TokenFetch<'a>,
    ) -> Result<String> {
        fetch.await
    }
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, UNIX_EPOCH};

    use async_std::task;
    use futures::future::{join, join_all, FutureExt};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::expiry::test_jwt;

    const REG: &str = "registry.example.io";

    fn ready(token: &str) -> TokenFetch<'static> {
        let token = token.to_string();
        async move { Ok(token) }.boxed()
    }

    fn jwt_expiring_in(secs: u64) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        test_jwt(Some(now + secs))
    }

    #[async_std::test]
    async fn lookups_miss_on_empty_cache() {
        let cache = ConcurrentCache::new();
        assert_eq!(cache.get_scheme(REG), None);
        assert_eq!(cache.get_token(REG, Scheme::Basic, ""), None);
        assert_eq!(cache.get_token(REG, Scheme::Bearer, "repository:foo:pull"), None);
    }

    #[async_std::test]
    async fn set_and_get_bearer() -> Result<()> {
        let cache = ConcurrentCache::new();
        let token = jwt_expiring_in(3600);
        assert_eq!(
            cache
                .set(REG, Scheme::Bearer, "repository:foo:pull", ready(&token))
                .await?,
            token
        );
        assert_eq!(cache.get_scheme(REG), Some(Scheme::Bearer));
        assert_eq!(
            cache.get_token(REG, Scheme::Bearer, "repository:foo:pull"),
            Some(token.clone())
        );
        assert_eq!(cache.get_token(REG, Scheme::Bearer, "repository:bar:pull"), None);
        assert_eq!(cache.get_token("other.io", Scheme::Bearer, "repository:foo:pull"), None);

        cache
            .set(REG, Scheme::Bearer, "repository:bar:pull", ready("other"))
            .await?;
        assert_eq!(
            cache.get_token(REG, Scheme::Bearer, "repository:foo:pull"),
            Some(token),
            "bearer tokens for other keys survive"
        );
        Ok(())
    }

    #[async_std::test]
    async fn set_and_get_basic() -> Result<()> {
        let cache = ConcurrentCache::new();
        cache.set(REG, Scheme::Basic, "", ready("Zm9vOmJhcg==")).await?;
        assert_eq!(cache.get_scheme(REG), Some(Scheme::Basic));
        assert_eq!(
            cache.get_token(REG, Scheme::Basic, "ignored"),
            Some("Zm9vOmJhcg==".into())
        );
        cache.set(REG, Scheme::Basic, "", ready("bmV3")).await?;
        assert_eq!(cache.get_token(REG, Scheme::Basic, ""), Some("bmV3".into()));
        Ok(())
    }

    #[async_std::test]
    async fn scheme_change_discards_tokens() -> Result<()> {
        let cache = ConcurrentCache::new();
        let bearer = jwt_expiring_in(3600);

        cache.set(REG, Scheme::Basic, "", ready("basic")).await?;
        cache.set(REG, Scheme::Bearer, "k", ready(&bearer)).await?;
        assert_eq!(cache.get_scheme(REG), Some(Scheme::Bearer));
        assert_eq!(cache.get_token(REG, Scheme::Basic, ""), None);
        assert_eq!(cache.get_token(REG, Scheme::Bearer, "k"), Some(bearer));

        cache.set(REG, Scheme::Basic, "", ready("basic2")).await?;
        assert_eq!(cache.get_scheme(REG), Some(Scheme::Basic));
        assert_eq!(cache.get_token(REG, Scheme::Bearer, "k"), None);
        assert_eq!(cache.get_token(REG, Scheme::Basic, ""), Some("basic2".into()));
        Ok(())
    }

    #[async_std::test]
    async fn unknown_scheme_fails_before_fetching() {
        let cache = ConcurrentCache::new();
        let fetched = AtomicUsize::new(0);
        let res = cache
            .set(
                REG,
                Scheme::Unknown,
                "",
                async {
                    fetched.fetch_add(1, Ordering::SeqCst);
                    Ok("x".to_string())
                }
                .boxed(),
            )
            .await;
        assert!(matches!(res, Err(AuthError::UnknownScheme(_))));
        assert_eq!(fetched.load(Ordering::SeqCst), 0);
        assert_eq!(cache.get_scheme(REG), None);
    }

    #[async_std::test]
    async fn concurrent_sets_fetch_once() {
        let cache = ConcurrentCache::new();
        let fetched = AtomicUsize::new(0);
        let token = jwt_expiring_in(3600);
        let results = join_all((0..50).map(|_| {
            cache.set(
                REG,
                Scheme::Bearer,
                "repository:foo:pull",
                async {
                    fetched.fetch_add(1, Ordering::SeqCst);
                    task::sleep(Duration::from_millis(50)).await;
                    Ok(token.clone())
                }
                .boxed(),
            )
        }))
        .await;
        assert_eq!(fetched.load(Ordering::SeqCst), 1);
        for res in results {
            assert_eq!(res.unwrap(), token);
        }
        assert!(cache.flights.is_empty(), "settled flights are cleaned up");
    }

    #[async_std::test]
    async fn concurrent_sets_across_tasks_fetch_once() {
        let cache = Arc::new(ConcurrentCache::new());
        let fetched = Arc::new(AtomicUsize::new(0));
        let handles = (0..20)
            .map(|_| {
                let cache = cache.clone();
                let fetched = fetched.clone();
                task::spawn(async move {
                    cache
                        .set(
                            REG,
                            Scheme::Bearer,
                            "key",
                            async move {
                                fetched.fetch_add(1, Ordering::SeqCst);
                                task::sleep(Duration::from_millis(200)).await;
                                Ok("shared".to_string())
                            }
                            .boxed(),
                        )
                        .await
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            assert_eq!(handle.await.unwrap(), "shared");
        }
        assert_eq!(fetched.load(Ordering::SeqCst), 1);
    }

    #[async_std::test]
    async fn distinct_keys_fetch_separately() {
        let cache = ConcurrentCache::new();
        let fetched = AtomicUsize::new(0);
        let fetch = || {
            async {
                fetched.fetch_add(1, Ordering::SeqCst);
                task::sleep(Duration::from_millis(20)).await;
                Ok("t".to_string())
            }
            .boxed()
        };
        let (a, b) = join(
            cache.set(REG, Scheme::Bearer, "a", fetch()),
            cache.set("other.io", Scheme::Bearer, "a", fetch()),
        )
        .await;
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(fetched.load(Ordering::SeqCst), 2);
    }

    #[async_std::test]
    async fn failures_are_shared_and_not_cached() {
        let cache = ConcurrentCache::new();
        let fetched = AtomicUsize::new(0);
        let results = join_all((0..10).map(|_| {
            cache.set(
                REG,
                Scheme::Bearer,
                "key",
                async {
                    fetched.fetch_add(1, Ordering::SeqCst);
                    task::sleep(Duration::from_millis(20)).await;
                    Err(AuthError::MissingToken("https://auth.example.io".into()))
                }
                .boxed(),
            )
        }))
        .await;
        assert_eq!(fetched.load(Ordering::SeqCst), 1);
        for res in results {
            assert!(matches!(res, Err(AuthError::MissingToken(ref url)) if url == "https://auth.example.io"));
        }
        assert_eq!(cache.get_scheme(REG), None);

        let token = cache.set(REG, Scheme::Bearer, "key", ready("retry")).await;
        assert_eq!(token.unwrap(), "retry", "the next call fetches again");
    }

    #[async_std::test]
    async fn cancelled_owner_lets_waiter_fetch() {
        let cache = ConcurrentCache::new();
        let (owner, waiter) = join(
            cache.set(
                REG,
                Scheme::Bearer,
                "key",
                async {
                    task::sleep(Duration::from_millis(20)).await;
                    Err(AuthError::Cancelled)
                }
                .boxed(),
            ),
            cache.set(REG, Scheme::Bearer, "key", ready("from-waiter")),
        )
        .await;
        assert!(matches!(owner, Err(AuthError::Cancelled)));
        assert_eq!(waiter.unwrap(), "from-waiter");
        assert_eq!(
            cache.get_token(REG, Scheme::Bearer, "key"),
            Some("from-waiter".into())
        );
        assert!(cache.flights.is_empty());
    }

    #[async_std::test]
    async fn dropped_owner_releases_the_slot() {
        let cache = ConcurrentCache::new();
        let stalled = async_std::future::timeout(
            Duration::from_millis(20),
            cache.set(
                REG,
                Scheme::Bearer,
                "key",
                async {
                    task::sleep(Duration::from_secs(30)).await;
                    Ok("never".to_string())
                }
                .boxed(),
            ),
        )
        .await;
        assert!(stalled.is_err());
        assert!(cache.flights.is_empty());

        let token = async_std::future::timeout(
            Duration::from_secs(5),
            cache.set(REG, Scheme::Bearer, "key", ready("fresh")),
        )
        .await
        .expect("must not be stuck behind the dropped fetch");
        assert_eq!(token.unwrap(), "fresh");
    }

    #[async_std::test]
    async fn timed_out_owner_hands_over_to_waiting_caller() {
        let cache = ConcurrentCache::new();
        let (owner, waiter) = join(
            async_std::future::timeout(
                Duration::from_millis(20),
                cache.set(
                    REG,
                    Scheme::Bearer,
                    "key",
                    async {
                        task::sleep(Duration::from_secs(30)).await;
                        Ok("never".to_string())
                    }
                    .boxed(),
                ),
            ),
            async_std::future::timeout(
                Duration::from_secs(5),
                cache.set(REG, Scheme::Bearer, "key", ready("from-waiter")),
            ),
        )
        .await;
        assert!(owner.is_err(), "the owner timed out");
        let waiter = waiter.expect("the waiter must not be stuck behind the dropped fetch");
        assert_eq!(waiter.unwrap(), "from-waiter");
        assert_eq!(
            cache.get_token(REG, Scheme::Bearer, "key"),
            Some("from-waiter".into())
        );
        assert!(cache.flights.is_empty());
    }

    #[async_std::test]
    async fn bearer_tokens_with_absurd_expiry_are_cached() -> Result<()> {
        let cache = ConcurrentCache::new();
        let token = test_jwt(Some(u64::MAX));
        cache
            .set(REG, Scheme::Bearer, "key", ready(&token))
            .await?;
        assert_eq!(cache.get_token(REG, Scheme::Bearer, "key"), Some(token));
        Ok(())
    }

    #[async_std::test]
    async fn waiter_abandoning_does_not_cancel_the_fetch() {
        let cache = ConcurrentCache::new();
        let fetched = AtomicUsize::new(0);
        let token = jwt_expiring_in(3600);
        let (owner, waiter) = join(
            cache.set(
                REG,
                Scheme::Bearer,
                "key",
                async {
                    fetched.fetch_add(1, Ordering::SeqCst);
                    task::sleep(Duration::from_millis(100)).await;
                    Ok(token.clone())
                }
                .boxed(),
            ),
            async_std::future::timeout(
                Duration::from_millis(10),
                cache.set(
                    REG,
                    Scheme::Bearer,
                    "key",
                    async {
                        fetched.fetch_add(1, Ordering::SeqCst);
                        Ok("waiter".to_string())
                    }
                    .boxed(),
                ),
            ),
        )
        .await;
        assert!(waiter.is_err(), "the waiter gave up");
        assert_eq!(owner.unwrap(), token, "the owner still finished");
        assert_eq!(fetched.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get_token(REG, Scheme::Bearer, "key"), Some(token));
    }

    #[async_std::test]
    async fn expiring_tokens_are_evicted() -> Result<()> {
        let cache = ConcurrentCache::new();
        // 12 seconds out: usable right now, but within the grace period a
        // couple of seconds from now.
        let short = jwt_expiring_in(12);
        let long = jwt_expiring_in(3600);
        cache.set(REG, Scheme::Bearer, "short", ready(&short)).await?;
        cache.set(REG, Scheme::Bearer, "long", ready(&long)).await?;
        assert_eq!(cache.get_token(REG, Scheme::Bearer, "short"), Some(short));

        task::sleep(Duration::from_millis(2100)).await;
        assert_eq!(cache.get_token(REG, Scheme::Bearer, "short"), None);
        for _ in 0..3 {
            assert_eq!(
                cache.get_token(REG, Scheme::Bearer, "long"),
                Some(long.clone())
            );
        }
        assert_eq!(cache.get_scheme(REG), Some(Scheme::Bearer));
        Ok(())
    }

    #[async_std::test]
    async fn opaque_bearer_tokens_expire() {
        let record = TokenRecord::bearer("opaque".into(), UNIX_EPOCH);
        assert_eq!(record.expires_at, Some(UNIX_EPOCH + Duration::from_secs(60)));
        assert!(!record.is_expired(UNIX_EPOCH + Duration::from_secs(49)));
        assert!(record.is_expired(UNIX_EPOCH + Duration::from_secs(51)));
    }

    #[async_std::test]
    async fn clear_drops_everything() -> Result<()> {
        let cache = ConcurrentCache::new();
        cache.set(REG, Scheme::Basic, "", ready("basic")).await?;
        cache.clear();
        assert_eq!(cache.get_scheme(REG), None);
        Ok(())
    }

    #[async_std::test]
    async fn noop_cache_always_fetches() -> Result<()> {
        let cache = NoopCache;
        let fetched = AtomicUsize::new(0);
        for _ in 0..3 {
            let token = cache
                .set(
                    REG,
                    Scheme::Bearer,
                    "key",
                    async {
                        fetched.fetch_add(1, Ordering::SeqCst);
                        Ok("t".to_string())
                    }
                    .boxed(),
                )
                .await?;
            assert_eq!(token, "t");
        }
        assert_eq!(fetched.load(Ordering::SeqCst), 3);
        assert_eq!(cache.get_scheme(REG), None);
        assert_eq!(cache.get_token(REG, Scheme::Bearer, "key"), None);
        Ok(())
    }
}
