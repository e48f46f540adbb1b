//! Cached bearer tokens with lazy, single-flight refresh.
//!
//! Both the vendor client and the spreadsheet client hold one of these. The
//! slot is guarded by an async mutex that stays locked while a refresh is
//! running, so simultaneous callers wait for the first refresh instead of
//! issuing their own.

use std::future::Future;

use chrono::DateTime;
use chrono::Duration;
use chrono::Utc;
use tokio::sync::Mutex;

/// How long before expiry a token is considered stale.
pub const EXPIRY_MARGIN: Duration = Duration::minutes(10);

/// An opaque bearer string with an absolute expiration time.
#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    /// Build a token from a server-declared time-to-live.
    ///
    /// Returns `None` when the expiry falls outside the representable range.
    pub fn expiring_in(value: String, ttl_secs: i64, now: DateTime<Utc>) -> Option<Self> {
        let expires_at = now.checked_add_signed(Duration::try_seconds(ttl_secs)?)?;
        Some(Self { value, expires_at })
    }

    /// True while `now` is still outside the safety margin before expiry.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .checked_sub_signed(EXPIRY_MARGIN)
            .is_some_and(|renew_at| renew_at > now)
    }
}

// Keep token values out of logs.
impl std::fmt::Debug for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Token")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Debug, Default)]
pub struct TokenCache {
    slot: Mutex<Option<Token>>,
}

impl TokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached token, or run `refresh` and cache its result.
    ///
    /// A failed refresh leaves the previous (stale) value in place and
    /// propagates the error; the next call tries again.
    pub async fn get_or_refresh<F, Fut, E>(&self, refresh: F) -> Result<Token, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Token, E>>,
    {
        let mut slot = self.slot.lock().await;
        if let Some(token) = slot.as_ref() {
            if token.is_fresh(Utc::now()) {
                return Ok(token.clone());
            }
            tracing::debug!(expires_at = %token.expires_at, "Cached token is stale, refreshing");
        }

        let token = refresh().await?;
        *slot = Some(token.clone());
        Ok(token)
    }

    /// Drop the cached token so the next caller refreshes.
    pub async fn invalidate(&self) {
        self.slot.lock().await.take();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use super::*;

    fn token(ttl_secs: i64) -> Token {
        Token::expiring_in("abc".to_string(), ttl_secs, Utc::now()).unwrap()
    }

    #[test]
    fn test_freshness_margin() {
        let now = Utc::now();
        let t = Token::expiring_in("abc".to_string(), 3600, now).unwrap();
        assert!(t.is_fresh(now));
        assert!(t.is_fresh(now + Duration::minutes(49)));
        assert!(!t.is_fresh(now + Duration::minutes(50)));
        assert!(!t.is_fresh(now + Duration::minutes(61)));
    }

    #[test]
    fn test_out_of_range_ttl() {
        let now = Utc::now();
        assert!(Token::expiring_in("abc".to_string(), i64::MAX, now).is_none());
        assert!(Token::expiring_in("abc".to_string(), i64::MIN, now).is_none());
        // In range for `Duration` but past the last representable date.
        assert!(Token::expiring_in("abc".to_string(), i64::MAX / 1_000, now).is_none());
    }

    #[test]
    fn test_debug_redacts_value() {
        let rendered = format!("{:?}", token(60));
        assert!(!rendered.contains("abc"));
        assert!(rendered.contains("<redacted>"));
    }

    #[tokio::test]
    async fn test_fresh_token_is_reused() {
        let cache = TokenCache::new();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let t = cache
                .get_or_refresh(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(token(3600))
                })
                .await
                .unwrap();
            assert_eq!(t.value, "abc");
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stale_token_is_refreshed() {
        let cache = TokenCache::new();
        let calls = AtomicUsize::new(0);

        // Five minutes of life is already inside the margin.
        for _ in 0..2 {
            cache
                .get_or_refresh(|| async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(token(300))
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_propagates_and_retries() {
        let cache = TokenCache::new();

        let err = cache
            .get_or_refresh(|| async { Err::<Token, _>("boom") })
            .await
            .unwrap_err();
        assert_eq!(err, "boom");

        let t = cache
            .get_or_refresh(|| async { Ok::<_, &str>(token(3600)) })
            .await
            .unwrap();
        assert_eq!(t.value, "abc");
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let cache = Arc::new(TokenCache::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_refresh(|| async {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                            Ok::<_, ()>(token(3600))
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refresh() {
        let cache = TokenCache::new();
        let calls = AtomicUsize::new(0);

        cache
            .get_or_refresh(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(token(3600))
            })
            .await
            .unwrap();
        cache.invalidate().await;
        cache
            .get_or_refresh(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(token(3600))
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
