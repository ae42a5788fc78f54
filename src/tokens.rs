//! Short-lived access tokens bound to conversion requests.
//!
//! A token is an unguessable, URL-safe string handed out by the token
//! endpoint. Redeeming it yields the conversion request it was issued for
//! until its TTL elapses. Expired tokens are never visible to readers and are
//! swept periodically so that tokens which are never redeemed do not pile up.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gifforge_common::{ConversionRequest, Error, Result};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::TokenConfig;

/// Produces a candidate token from a byte length.
pub type TokenGenerator = Arc<dyn Fn(usize) -> String + Send + Sync>;

/// Generate a cryptographically random, URL-safe token from `size` bytes.
pub fn generate_token(size: usize) -> String {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A freshly issued token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    /// The opaque token value.
    pub token: String,
    /// Unix time in seconds at which the token stops resolving.
    pub expires: i64,
}

struct TokenEntry {
    request: ConversionRequest,
    expires_at: Instant,
}

impl TokenEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Thread-safe map from token to conversion request with per-entry TTL.
pub struct TokenStore {
    entries: DashMap<String, TokenEntry>,
    ttl: Duration,
    token_size: usize,
    generator: TokenGenerator,
}

impl TokenStore {
    /// Create a store issuing `token_size`-byte tokens that live for `ttl`.
    pub fn new(ttl: Duration, token_size: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            token_size,
            generator: Arc::new(generate_token),
        }
    }

    /// Create a store from the `[tokens]` config section.
    pub fn from_config(config: &TokenConfig) -> Self {
        Self::new(config.ttl(), config.size_bytes)
    }

    /// Replace the token generator.
    pub fn with_generator(mut self, generator: TokenGenerator) -> Self {
        self.generator = generator;
        self
    }

    /// Issue a new token bound to `request`.
    ///
    /// Candidates that collide with a live token are discarded and a new one
    /// is generated, up to `attempt_limit` candidates in total.
    ///
    /// # Errors
    ///
    /// - [`Error::TokenGenerationExhausted`] if every candidate collided.
    /// - [`Error::TokenStoreInconsistent`] if the inserted token cannot be
    ///   read back.
    pub fn issue(&self, request: ConversionRequest, attempt_limit: u32) -> Result<IssuedToken> {
        let mut issued = None;

        for attempt in 1..=attempt_limit {
            let candidate = (self.generator)(self.token_size);
            let now = Instant::now();

            match self.entries.entry(candidate) {
                Entry::Vacant(slot) => {
                    let token = slot.key().clone();
                    slot.insert(TokenEntry {
                        request: request.clone(),
                        expires_at: now + self.ttl,
                    });
                    issued = Some(token);
                    break;
                }
                // An expired token is as good as absent.
                Entry::Occupied(mut slot) if slot.get().is_expired(now) => {
                    let token = slot.key().clone();
                    slot.insert(TokenEntry {
                        request: request.clone(),
                        expires_at: now + self.ttl,
                    });
                    issued = Some(token);
                    break;
                }
                Entry::Occupied(_) => {
                    tracing::debug!(attempt, "Generated token collides with a live token");
                }
            }
        }

        let Some(token) = issued else {
            tracing::warn!(attempts = attempt_limit, "Unable to generate a unique token");
            return Err(Error::TokenGenerationExhausted {
                attempts: attempt_limit,
            });
        };

        let remaining = self
            .remaining_ttl(&token)
            .ok_or(Error::TokenStoreInconsistent)?;
        let expires_ms = chrono::Utc::now().timestamp_millis() + remaining.as_millis() as i64;

        tracing::debug!(%request, ttl_ms = remaining.as_millis() as u64, "Issued token");

        Ok(IssuedToken {
            token,
            expires: expires_ms.div_euclid(1000),
        })
    }

    /// Look up the request bound to `token`.
    ///
    /// Returns `None` for unknown and expired tokens.
    pub fn resolve(&self, token: &str) -> Option<ConversionRequest> {
        let now = Instant::now();
        {
            let entry = self.entries.get(token)?;
            if !entry.is_expired(now) {
                return Some(entry.request.clone());
            }
        }

        self.entries.remove_if(token, |_, entry| entry.is_expired(now));
        None
    }

    /// Time left before `token` expires, `None` if it is unknown or expired.
    pub fn remaining_ttl(&self, token: &str) -> Option<Duration> {
        let entry = self.entries.get(token)?;
        let remaining = entry.expires_at.checked_duration_since(Instant::now())?;
        (!remaining.is_zero()).then_some(remaining)
    }

    /// Remove every expired token, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                removed += 1;
                false
            } else {
                true
            }
        });

        if removed > 0 {
            tracing::debug!(removed, "Purged expired tokens");
        }
        removed
    }

    /// Number of stored tokens, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Lifetime of newly issued tokens.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }
}

/// Start a background task that purges expired tokens every `resolution`.
pub fn start_purge_task(store: Arc<TokenStore>, resolution: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(resolution);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            store.purge_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use gifforge_common::{InputFormat, OutputFormat};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> ConversionRequest {
        ConversionRequest::new("https://good.example/a.mp4", InputFormat::Mp4, OutputFormat::Gif)
    }

    #[test]
    fn test_generate_token_is_url_safe() {
        let token = generate_token(48);
        // 48 bytes encode to 64 base64 characters without padding
        assert_eq!(token.len(), 64);
        assert!(token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, generate_token(48));
    }

    #[test]
    fn test_issue_and_resolve() {
        let store = TokenStore::new(Duration::from_secs(60), 16);
        let issued = store.issue(request(), 64).unwrap();

        assert_eq!(store.resolve(&issued.token), Some(request()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_expires_is_absolute() {
        let store = TokenStore::new(Duration::from_secs(300), 16);
        let before = chrono::Utc::now().timestamp();
        let issued = store.issue(request(), 64).unwrap();
        let after = chrono::Utc::now().timestamp();

        assert!(issued.expires >= before + 299);
        assert!(issued.expires <= after + 300);
    }

    #[test]
    fn test_unknown_token() {
        let store = TokenStore::new(Duration::from_secs(60), 16);
        assert_eq!(store.resolve("nope"), None);
        assert_eq!(store.remaining_ttl("nope"), None);
    }

    #[test]
    fn test_resolve_after_ttl() {
        let store = TokenStore::new(Duration::from_millis(30), 16);
        let issued = store.issue(request(), 64).unwrap();
        assert!(store.resolve(&issued.token).is_some());

        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(store.resolve(&issued.token), None);
        assert_eq!(store.remaining_ttl(&issued.token), None);
        // Lazily removed on read
        assert!(store.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let store = TokenStore::new(Duration::from_millis(30), 16);
        store.issue(request(), 64).unwrap();
        store.issue(request(), 64).unwrap();
        assert_eq!(store.len(), 2);

        std::thread::sleep(Duration::from_millis(60));

        assert_eq!(store.purge_expired(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_forced_collisions_exhaust_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let store = TokenStore::new(Duration::from_secs(60), 16).with_generator(Arc::new(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                "always-the-same".to_string()
            },
        ));

        store.issue(request(), 64).unwrap();
        calls.store(0, Ordering::SeqCst);

        let err = store.issue(request(), 64).unwrap_err();
        assert!(matches!(err, Error::TokenGenerationExhausted { attempts: 64 }));
        assert_eq!(calls.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn test_collision_retries_until_unique() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let store = TokenStore::new(Duration::from_secs(60), 16).with_generator(Arc::new(
            move |_| {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                // first two candidates collide with the token issued first
                if n < 3 { "taken".to_string() } else { format!("fresh-{n}") }
            },
        ));

        let first = store.issue(request(), 64).unwrap();
        assert_eq!(first.token, "taken");

        let second = store.issue(request(), 64).unwrap();
        assert_eq!(second.token, "fresh-3");
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_expired_token_value_can_be_reissued() {
        let store = TokenStore::new(Duration::from_millis(20), 16)
            .with_generator(Arc::new(|_| "recycled".to_string()));

        store.issue(request(), 1).unwrap();
        std::thread::sleep(Duration::from_millis(40));

        let reissued = store.issue(request(), 1).unwrap();
        assert_eq!(reissued.token, "recycled");
        assert!(store.resolve("recycled").is_some());
    }

    #[tokio::test]
    async fn test_purge_task_removes_unredeemed_tokens() {
        let store = Arc::new(TokenStore::new(Duration::from_millis(20), 16));
        store.issue(request(), 64).unwrap();

        let handle = start_purge_task(Arc::clone(&store), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(store.is_empty());
    }
}
