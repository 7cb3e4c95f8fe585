use crate::clock::{Clock, SystemClock};
use chrono::{DateTime, Duration, Utc};
use querygate_shared::ConfirmationError;
use rand::RngCore;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// How long an issued token stays valid.
pub const CONFIRMATION_TTL_MINUTES: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PendingConfirmation {
    pub token: String,
    pub query: String,
    pub connection: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<Value>,
    pub expires_at: DateTime<Utc>,
}

/// Registry of write statements awaiting approval.
///
/// A token survives any number of [`peek`](Self::peek) calls and is only
/// removed by [`consume`](Self::consume) or by expiring, so a failed
/// execution can be retried with the same token. [`claim`](Self::claim)
/// marks a token as executing so concurrent confirmations cannot run the
/// same statement twice.
///
/// Lock order: `pending` before `in_flight`.
pub struct ConfirmationStore {
    pending: Mutex<HashMap<String, PendingConfirmation>>,
    in_flight: Mutex<HashSet<String>>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl Default for ConfirmationStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ConfirmationStore {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashSet::new()),
            clock,
            ttl: Duration::minutes(CONFIRMATION_TTL_MINUTES),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingConfirmation>> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashSet<String>> {
        self.in_flight
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Registers a statement and returns its token and expiry. Expired entries
    /// are swept in the same critical section.
    pub fn create(
        &self,
        query: &str,
        connection: &str,
        params: Vec<Value>,
    ) -> (String, DateTime<Utc>) {
        let now = self.clock.now();
        let token = generate_token(now);
        let expires_at = now + self.ttl;

        let mut pending = self.lock();
        let before = pending.len();
        pending.retain(|_, entry| entry.expires_at > now);
        let swept = before - pending.len();
        if swept > 0 {
            debug!(swept, "Swept expired confirmation tokens");
        }
        pending.insert(
            token.clone(),
            PendingConfirmation {
                token: token.clone(),
                query: query.to_string(),
                connection: connection.to_string(),
                params,
                expires_at,
            },
        );
        (token, expires_at)
    }

    /// Looks a token up without consuming it. An expired entry is removed and
    /// reported as `Expired`.
    pub fn peek(&self, token: &str) -> Result<PendingConfirmation, ConfirmationError> {
        let now = self.clock.now();
        let mut pending = self.lock();
        match pending.get(token) {
            None => Err(ConfirmationError::NotFound),
            Some(entry) if now >= entry.expires_at => {
                pending.remove(token);
                Err(ConfirmationError::Expired)
            }
            Some(entry) => Ok(entry.clone()),
        }
    }

    /// Like [`peek`](Self::peek), but also marks the token as executing.
    /// A second claim fails with `InProgress` until the first caller either
    /// consumes or releases it.
    pub fn claim(&self, token: &str) -> Result<PendingConfirmation, ConfirmationError> {
        let now = self.clock.now();
        let mut pending = self.lock();
        let entry = match pending.get(token) {
            None => return Err(ConfirmationError::NotFound),
            Some(entry) if now >= entry.expires_at => {
                pending.remove(token);
                return Err(ConfirmationError::Expired);
            }
            Some(entry) => entry.clone(),
        };
        if !self.lock_in_flight().insert(token.to_string()) {
            return Err(ConfirmationError::InProgress);
        }
        Ok(entry)
    }

    /// Returns a claimed token to the pending state after a failed run.
    pub fn release(&self, token: &str) {
        self.lock_in_flight().remove(token);
    }

    /// Removes a token. No-op when absent.
    pub fn consume(&self, token: &str) {
        let mut pending = self.lock();
        pending.remove(token);
        self.lock_in_flight().remove(token);
    }

    /// Non-expired entries, soonest expiry first.
    #[must_use]
    pub fn list(&self) -> Vec<PendingConfirmation> {
        let now = self.clock.now();
        let mut entries: Vec<_> = self
            .lock()
            .values()
            .filter(|entry| entry.expires_at > now)
            .cloned()
            .collect();
        entries.sort_by(|a, b| {
            a.expires_at
                .cmp(&b.expires_at)
                .then_with(|| a.token.cmp(&b.token))
        });
        entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Random v4 UUID from the OS entropy source, or a timestamp-derived one
/// when entropy is unavailable.
fn generate_token(now: DateTime<Utc>) -> String {
    let mut bytes = [0u8; 16];
    if let Err(e) = rand::rngs::OsRng.try_fill_bytes(&mut bytes) {
        warn!(error = %e, "OS entropy unavailable, deriving confirmation token from clock");
        let nanos = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp_micros());
        let counter = FALLBACK_COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        bytes[..8].copy_from_slice(&nanos.to_be_bytes());
        bytes[8..].copy_from_slice(&counter.to_be_bytes());
    }
    uuid::Builder::from_random_bytes(bytes)
        .into_uuid()
        .to_string()
}

static FALLBACK_COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
