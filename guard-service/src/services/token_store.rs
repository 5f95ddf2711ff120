//! In-process store of anti-forgery tokens bound to authenticated identities.
//!
//! Each token lives for a fixed window from issuance. Expired entries are
//! evicted lazily by [`CsrfTokenStore::validate`] and in bulk by
//! [`CsrfTokenStore::sweep`]. Every operation is atomic per key: reads and
//! evictions of one token go through the same shard lock.

use chrono::{DateTime, Duration, Utc};
use dashmap::{mapref::entry::Entry, DashMap};
use metrics::counter;
use rand::{rngs::OsRng, RngCore};
use std::sync::Arc;

use super::clock::{Clock, SystemClock};

/// Random bytes per token (256 bits), hex encoded to 64 characters.
pub const TOKEN_BYTES: usize = 32;

/// Identity and issuance time recorded for a live token.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TokenBinding {
    owner_id: String,
    issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Check {
    Valid,
    Unknown,
    OwnerMismatch,
    Expired,
}

impl Check {
    fn as_label(&self) -> &'static str {
        match self {
            Check::Valid => "valid",
            Check::Unknown => "unknown",
            Check::OwnerMismatch => "owner_mismatch",
            Check::Expired => "expired",
        }
    }
}

#[derive(Clone)]
pub struct CsrfTokenStore {
    tokens: Arc<DashMap<String, TokenBinding>>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl CsrfTokenStore {
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            tokens: Arc::new(DashMap::new()),
            ttl,
            clock,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Mint a fresh token bound to `owner_id`.
    ///
    /// Several live tokens per owner are allowed; each authentication gets its own.
    pub fn issue(&self, owner_id: &str) -> String {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        let value = hex::encode(bytes);

        self.tokens.insert(
            value.clone(),
            TokenBinding {
                owner_id: owner_id.to_string(),
                issued_at: self.clock.now(),
            },
        );

        counter!("csrf_tokens_issued_total").increment(1);
        tracing::debug!(owner_id = %owner_id, "CSRF token issued");
        value
    }

    /// True only if `token` is live, unexpired and bound to `owner_id`.
    ///
    /// An expired token is removed on the spot, so later calls keep failing.
    pub fn validate(&self, token: &str, owner_id: &str) -> bool {
        let check = self.check(token, owner_id);
        counter!("csrf_validations_total", "outcome" => check.as_label()).increment(1);

        if check != Check::Valid {
            tracing::debug!(
                owner_id = %owner_id,
                outcome = check.as_label(),
                "CSRF token rejected"
            );
        }
        check == Check::Valid
    }

    fn check(&self, token: &str, owner_id: &str) -> Check {
        if token.is_empty() {
            return Check::Unknown;
        }

        let now = self.clock.now();
        match self.tokens.entry(token.to_string()) {
            Entry::Vacant(_) => Check::Unknown,
            Entry::Occupied(entry) => {
                if self.is_expired(entry.get(), now) {
                    entry.remove();
                    Check::Expired
                } else if entry.get().owner_id != owner_id {
                    Check::OwnerMismatch
                } else {
                    Check::Valid
                }
            }
        }
    }

    /// Drop `token` if present. Missing tokens are ignored.
    pub fn invalidate(&self, token: &str) {
        if self.tokens.remove(token).is_some() {
            tracing::debug!("CSRF token invalidated");
        }
    }

    /// Remove every entry older than the expiry window as of `now`.
    /// Entries exactly at the window edge are kept.
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.tokens.retain(|_, binding| {
            let keep = !self.is_expired(binding, now);
            if !keep {
                removed += 1;
            }
            keep
        });

        if removed > 0 {
            counter!("csrf_tokens_swept_total").increment(removed as u64);
        }
        removed
    }

    fn is_expired(&self, binding: &TokenBinding, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(binding.issued_at) > self.ttl
    }
}
