//! Deduplication of concurrent fetches for the same key.
//!
//! Each key with an outstanding network operation owns exactly one entry.
//! The first requester receives a [`FetchTicket`] and is responsible for
//! driving the fetch; later requesters only attach a waiter.
//!
//! ```text
//! Absent ──join──► Pending ──begin_completion──► Completing ──resolve──► Absent
//!                     │  └──────────────resolve (failure)─────────────────►
//!                     └──cancel──────────────────────────────────────────►
//! ```
//!
//! Entries live in a lock table: keys are spread over independent shards so
//! unrelated keys rarely contend, and no shard lock is ever held across an
//! `.await`. Every transition removes the entry before waiters are notified,
//! so a waiter that retries immediately always starts a fresh request.

use std::collections::HashMap;
use std::hash::{BuildHasher, RandomState};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::domain::entities::{CacheKey, CachedImage};
use crate::domain::errors::{ImageError, ImageResult};

use super::fetcher::FetchHandle;

/// Default number of shards in the lock table.
pub const DEFAULT_SHARDS: usize = 16;

type Waiter = oneshot::Sender<ImageResult<CachedImage>>;

/// Receiving side of a registered waiter.
pub type WaiterReceiver = oneshot::Receiver<ImageResult<CachedImage>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Pending,
    Completing,
}

struct InFlightRequest {
    generation: u64,
    handle: FetchHandle,
    phase: Phase,
    waiters: Vec<Waiter>,
}

/// Proof that the holder created the in-flight entry for a key and must
/// drive it to a terminal state.
#[derive(Debug)]
pub struct FetchTicket {
    key: CacheKey,
    generation: u64,
    token: CancellationToken,
}

impl FetchTicket {
    /// Returns the key being fetched.
    #[must_use]
    pub const fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Returns the cancellation token shared with the registry.
    #[must_use]
    pub const fn token(&self) -> &CancellationToken {
        &self.token
    }
}

/// Result of registering interest in a key.
#[derive(Debug)]
pub struct Registration {
    /// Resolves once the request reaches a terminal state.
    pub receiver: WaiterReceiver,
    /// Present only for the requester that created the entry.
    pub ticket: Option<FetchTicket>,
}

/// What a cancel request did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Nothing was in flight for the key.
    NotInFlight,
    /// The request was removed and its waiters failed.
    Cancelled {
        /// Number of waiters that received the cancellation.
        waiters: usize,
    },
    /// The fetch already produced bytes; the request will resolve successfully.
    TooLate,
}

/// Registry of outstanding fetches keyed by [`CacheKey`].
pub struct InFlightRegistry {
    shards: Box<[Mutex<HashMap<CacheKey, InFlightRequest>>]>,
    hasher: RandomState,
    next_generation: AtomicU64,
}

impl InFlightRegistry {
    /// Creates a registry with `shards` independently locked shards.
    #[must_use]
    pub fn new(shards: usize) -> Self {
        let shards = (0..shards.max(1))
            .map(|_| Mutex::new(HashMap::new()))
            .collect();
        Self {
            shards,
            hasher: RandomState::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    fn shard(&self, key: &CacheKey) -> &Mutex<HashMap<CacheKey, InFlightRequest>> {
        #[allow(clippy::cast_possible_truncation)]
        let index = (self.hasher.hash_one(key) as usize) % self.shards.len();
        &self.shards[index]
    }

    /// Registers a waiter for `key`, creating the entry if none exists.
    pub fn join(&self, key: &CacheKey) -> Registration {
        let (tx, rx) = oneshot::channel();
        let mut shard = self.shard(key).lock();

        if let Some(request) = shard.get_mut(key) {
            request.waiters.push(tx);
            debug!(key = %key, waiters = request.waiters.len(), "Attached to in-flight fetch");
            return Registration {
                receiver: rx,
                ticket: None,
            };
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        shard.insert(
            key.clone(),
            InFlightRequest {
                generation,
                handle: FetchHandle::new(token.clone()),
                phase: Phase::Pending,
                waiters: vec![tx],
            },
        );
        debug!(key = %key, generation = generation, "Started in-flight fetch");

        Registration {
            receiver: rx,
            ticket: Some(FetchTicket {
                key: key.clone(),
                generation,
                token,
            }),
        }
    }

    /// Marks the fetch as having produced bytes, after which cancellation no
    /// longer applies. Returns false if the request was already cancelled.
    pub fn begin_completion(&self, ticket: &FetchTicket) -> bool {
        let mut shard = self.shard(&ticket.key).lock();
        match shard.get_mut(&ticket.key) {
            Some(request) if request.generation == ticket.generation => {
                request.phase = Phase::Completing;
                true
            }
            _ => false,
        }
    }

    /// Removes the entry and delivers `outcome` to every waiter in
    /// registration order. Returns the number of waiters, or `None` if the
    /// entry was already gone (cancelled) or belongs to a newer request.
    pub fn resolve(&self, ticket: &FetchTicket, outcome: &ImageResult<CachedImage>) -> Option<usize> {
        let request = {
            let mut shard = self.shard(&ticket.key).lock();
            let current = shard
                .get(&ticket.key)
                .is_some_and(|request| request.generation == ticket.generation);
            if current {
                shard.remove(&ticket.key)
            } else {
                None
            }
        }?;

        let count = request.waiters.len();
        for waiter in request.waiters {
            let _ = waiter.send(outcome.clone());
        }
        debug!(
            key = %ticket.key,
            generation = ticket.generation,
            waiters = count,
            success = outcome.is_ok(),
            "Resolved in-flight fetch"
        );
        Some(count)
    }

    /// Cancels the pending request for `key`, failing every attached waiter.
    pub fn cancel(&self, key: &CacheKey) -> CancelOutcome {
        let request = {
            let mut shard = self.shard(key).lock();
            match shard.get(key).map(|request| request.phase) {
                None => return CancelOutcome::NotInFlight,
                Some(Phase::Completing) => return CancelOutcome::TooLate,
                Some(Phase::Pending) => shard.remove(key),
            }
        };
        let Some(request) = request else {
            return CancelOutcome::NotInFlight;
        };

        request.handle.cancel();
        let waiters = request.waiters.len();
        for waiter in request.waiters {
            let _ = waiter.send(Err(ImageError::Cancelled));
        }
        debug!(key = %key, generation = request.generation, waiters = waiters, "Cancelled in-flight fetch");
        CancelOutcome::Cancelled { waiters }
    }

    /// Returns true if a request for `key` is outstanding.
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.shard(key).lock().contains_key(key)
    }

    /// Returns the number of waiters attached to `key`.
    pub fn waiter_count(&self, key: &CacheKey) -> usize {
        self.shard(key)
            .lock()
            .get(key)
            .map_or(0, |request| request.waiters.len())
    }

    /// Returns the number of outstanding requests across all keys.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.lock().len()).sum()
    }

    /// Returns true if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InFlightRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SHARDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(url: &str) -> CacheKey {
        CacheKey::from_url(url)
    }

    fn image(k: &CacheKey) -> CachedImage {
        CachedImage::new(k.clone(), &b"bytes"[..])
    }

    #[test]
    fn test_first_join_leads_later_joins_follow() {
        let registry = InFlightRegistry::default();
        let k = key("https://example.com/a.png");

        let first = registry.join(&k);
        let second = registry.join(&k);
        let third = registry.join(&k);

        assert!(first.ticket.is_some());
        assert!(second.ticket.is_none());
        assert!(third.ticket.is_none());
        assert_eq!(registry.waiter_count(&k), 3);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_distinct_keys_each_lead() {
        let registry = InFlightRegistry::new(1);
        let a = registry.join(&key("https://example.com/a.png"));
        let b = registry.join(&key("https://example.com/b.png"));

        assert!(a.ticket.is_some());
        assert!(b.ticket.is_some());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_delivers_in_order_and_removes_entry() {
        let registry = InFlightRegistry::default();
        let k = key("https://example.com/a.png");
        let lead = registry.join(&k);
        let follow = registry.join(&k);
        let ticket = lead.ticket.unwrap();

        assert!(registry.begin_completion(&ticket));
        assert_eq!(registry.resolve(&ticket, &Ok(image(&k))), Some(2));
        assert!(!registry.is_in_flight(&k));

        assert_eq!(lead.receiver.await.unwrap().unwrap(), image(&k));
        assert_eq!(follow.receiver.await.unwrap().unwrap(), image(&k));
    }

    #[tokio::test]
    async fn test_cancel_fails_waiters_and_frees_key() {
        let registry = InFlightRegistry::default();
        let k = key("https://example.com/a.png");
        let lead = registry.join(&k);
        let follow = registry.join(&k);
        let ticket = lead.ticket.unwrap();

        assert_eq!(registry.cancel(&k), CancelOutcome::Cancelled { waiters: 2 });
        assert!(ticket.token().is_cancelled());
        assert!(!registry.is_in_flight(&k));
        assert_eq!(lead.receiver.await.unwrap(), Err(ImageError::Cancelled));
        assert_eq!(follow.receiver.await.unwrap(), Err(ImageError::Cancelled));

        let retry = registry.join(&k);
        assert!(retry.ticket.is_some());
    }

    #[test]
    fn test_stale_ticket_cannot_touch_new_request() {
        let registry = InFlightRegistry::default();
        let k = key("https://example.com/a.png");
        let old = registry.join(&k).ticket.unwrap();
        registry.cancel(&k);
        let new = registry.join(&k).ticket.unwrap();

        assert!(!registry.begin_completion(&old));
        assert_eq!(registry.resolve(&old, &Err(ImageError::Cancelled)), None);
        assert!(registry.is_in_flight(&k));

        assert_eq!(registry.resolve(&new, &Ok(image(&k))), Some(1));
    }

    #[test]
    fn test_cancel_after_completion_began_is_too_late() {
        let registry = InFlightRegistry::default();
        let k = key("https://example.com/a.png");
        let ticket = registry.join(&k).ticket.unwrap();

        assert!(registry.begin_completion(&ticket));
        assert_eq!(registry.cancel(&k), CancelOutcome::TooLate);
        assert!(!ticket.token().is_cancelled());
        assert!(registry.is_in_flight(&k));
    }

    #[test]
    fn test_cancel_without_request_is_noop() {
        let registry = InFlightRegistry::default();
        let k = key("https://example.com/a.png");

        assert_eq!(registry.cancel(&k), CancelOutcome::NotInFlight);
        assert_eq!(registry.cancel(&k), CancelOutcome::NotInFlight);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_joins_elect_single_leader() {
        let registry = std::sync::Arc::new(InFlightRegistry::new(4));
        let k = key("https://example.com/contended.png");

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                let k = k.clone();
                std::thread::spawn(move || registry.join(&k))
            })
            .collect();

        let leaders = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.ticket.is_some())
            .count();

        assert_eq!(leaders, 1);
        assert_eq!(registry.waiter_count(&k), 16);
    }
}
