//! Idempotency guard
//!
//! Deduplicates retried operations by their caller-supplied key. A key moves
//! through two states:
//!
//! - **reserved**: an attempt holds the key while it runs. The reservation
//!   lives in memory only; if the attempt dies, the reservation ages out after
//!   the configured TTL and the next attempt reclaims it.
//! - **completed**: the store holds a transaction under the key. This is
//!   written by the same commit as the ledger entries, so a key is never
//!   completed without its effects (or the other way round).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::warn;

use super::clock::Clock;
use super::traits::LedgerStore;
use crate::types::{IdempotencyKey, LedgerError, Transaction};

/// Handle proving ownership of a reservation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReservationToken(u64);

/// Result of [`IdempotencyGuard::check_and_reserve`]
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    /// The key is now held by the caller, who must complete or release it
    Reserved(ReservationToken),
    /// The key already produced this transaction; do not execute again
    AlreadyProcessed(Transaction),
}

#[derive(Debug, Clone)]
struct PendingKey {
    token: ReservationToken,
    fingerprint: u64,
    reserved_at: DateTime<Utc>,
}

pub struct IdempotencyGuard {
    pending: DashMap<IdempotencyKey, PendingKey>,
    next_token: AtomicU64,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
}

impl IdempotencyGuard {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            pending: DashMap::new(),
            next_token: AtomicU64::new(1),
            ttl: chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX),
            clock,
        }
    }

    /// Reserve `key` for a request with `fingerprint`, or report that it
    /// already completed
    ///
    /// # Errors
    ///
    /// - `IdempotencyKeyReused` if the key completed for a different request
    /// - `RequestInFlight` if a live reservation is held by another attempt
    /// - any error of the store lookup
    pub fn check_and_reserve<S>(
        &self,
        key: &IdempotencyKey,
        fingerprint: u64,
        store: &S,
    ) -> Result<Reservation, LedgerError>
    where
        S: LedgerStore + ?Sized,
    {
        if let Some(existing) = Self::completed(key, fingerprint, store)? {
            return Ok(Reservation::AlreadyProcessed(existing));
        }

        let now = self.clock.now();
        let token = ReservationToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        let pending = PendingKey {
            token,
            fingerprint,
            reserved_at: now,
        };

        match self.pending.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let age = now - occupied.get().reserved_at;
                if age < self.ttl {
                    return Err(LedgerError::RequestInFlight { key: key.clone() });
                }
                warn!(
                    key = %key,
                    age_ms = age.num_milliseconds(),
                    "Reclaiming abandoned idempotency reservation"
                );
                occupied.insert(pending);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(pending);
            }
        }

        // The previous holder may have committed between the lookup above
        // and the reservation
        match Self::completed(key, fingerprint, store) {
            Ok(None) => Ok(Reservation::Reserved(token)),
            Ok(Some(existing)) => {
                self.release(key, token);
                Ok(Reservation::AlreadyProcessed(existing))
            }
            Err(error) => {
                self.release(key, token);
                Err(error)
            }
        }
    }

    fn completed<S>(
        key: &IdempotencyKey,
        fingerprint: u64,
        store: &S,
    ) -> Result<Option<Transaction>, LedgerError>
    where
        S: LedgerStore + ?Sized,
    {
        match store.transaction_for_key(key)? {
            Some(existing) if existing.fingerprint != fingerprint => {
                Err(LedgerError::IdempotencyKeyReused { key: key.clone() })
            }
            other => Ok(other),
        }
    }

    /// Drop the reservation after the transaction committed under `key`
    pub fn complete(&self, key: &IdempotencyKey, token: ReservationToken) {
        self.release(key, token);
    }

    /// Drop the reservation of a failed attempt so the caller may retry
    ///
    /// A reservation reclaimed by another attempt in the meantime is left
    /// alone.
    pub fn release(&self, key: &IdempotencyKey, token: ReservationToken) {
        self.pending.remove_if(key, |_, pending| pending.token == token);
    }

    /// Whether `key` currently has a live or abandoned reservation
    pub fn is_reserved(&self, key: &IdempotencyKey) -> bool {
        self.pending.contains_key(key)
    }

    /// Fingerprint of the request currently holding `key`
    pub fn reserved_fingerprint(&self, key: &IdempotencyKey) -> Option<u64> {
        self.pending.get(key).map(|pending| pending.fingerprint)
    }
}

impl std::fmt::Debug for IdempotencyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyGuard")
            .field("pending", &self.pending.len())
            .field("ttl", &self.ttl)
            .finish()
    }
}
