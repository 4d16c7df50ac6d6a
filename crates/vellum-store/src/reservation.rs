//! The reserve/commit protocol shared by every ID space and backend.
//!
//! An ID slot is in one of three states: free (no record), reserved (a
//! [`Lease`] with an owner token and an expiry) or committed (a payload).
//! Claiming a slot succeeds only when it is free or holds an expired,
//! uncommitted lease. Committing succeeds only while the caller's lease is
//! still the live one. Committed slots are never reclaimed.

use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};
use vellum_types::{Deadline, FileId, StoreId};

use crate::clock::Clock;
use crate::error::{StoreError, StoreResult};

/// An ID that can derive a fresh candidate after a collision.
pub trait Reservable: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync {
    fn mutate(&self) -> Self;
}

impl Reservable for StoreId {
    fn mutate(&self) -> Self {
        StoreId::mutate(self)
    }
}

impl Reservable for FileId {
    fn mutate(&self) -> Self {
        FileId::mutate(self)
    }
}

/// Ownership of a reserved slot until `expires_at_ms`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub token: u64,
    pub expires_at_ms: u64,
}

impl Lease {
    pub fn is_live(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }
}

/// A non-free slot as held by a backend. A missing entry means free.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Slot<P> {
    Reserved(Lease),
    Committed(P),
}

impl<P> Slot<P> {
    /// An expired, uncommitted slot may be claimed again.
    pub fn is_claimable(&self, now_ms: u64) -> bool {
        matches!(self, Slot::Reserved(lease) if !lease.is_live(now_ms))
    }

    /// The slot is reserved under `token` and the lease has not lapsed.
    pub fn is_held_by(&self, token: u64, now_ms: u64) -> bool {
        matches!(self, Slot::Reserved(lease) if lease.token == token && lease.is_live(now_ms))
    }

    pub fn committed(&self) -> Option<&P> {
        match self {
            Slot::Committed(payload) => Some(payload),
            Slot::Reserved(_) => None,
        }
    }
}

/// Proof that the caller claimed `id`. Required to commit or release.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reservation<K> {
    pub id: K,
    pub lease: Lease,
}

impl<K: fmt::Display> Reservation<K> {
    pub(crate) fn not_reserved(&self) -> StoreError {
        StoreError::IdNotReserved(self.id.to_string())
    }
}

/// Atomic claim/commit/release over one ID space.
///
/// Implementations must make `try_claim` and `commit` atomic per ID: two
/// concurrent claims on the same free ID must not both succeed.
pub trait Reservations<K: Reservable>: Send + Sync {
    type Payload;

    /// Claim `id` under `lease` if the slot is free or its lease expired.
    fn try_claim(&self, id: &K, lease: &Lease, now_ms: u64) -> StoreResult<bool>;

    /// Store `payload` under the reserved ID, clearing the lease.
    ///
    /// Fails with [`StoreError::IdNotReserved`] if the slot is not reserved
    /// by this reservation, or the lease has expired by `clock`.
    fn commit(
        &self,
        reservation: &Reservation<K>,
        payload: Self::Payload,
        clock: &dyn Clock,
    ) -> StoreResult<()>;

    /// Drop an uncommitted reservation. Returns `false` if the slot is no
    /// longer held by this reservation.
    fn release(&self, reservation: &Reservation<K>) -> StoreResult<bool>;
}

/// Tunables for the reserve loop.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReservationPolicy {
    /// How long a reservation stays exclusive without a commit.
    pub ttl: Duration,
    /// Claim attempts before giving up with [`StoreError::ReservationExhausted`].
    pub max_attempts: u32,
    /// First backoff delay after repeated collisions.
    pub backoff_base: Duration,
    /// Ceiling for the backoff delay.
    pub backoff_max: Duration,
}

impl Default for ReservationPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(24 * 60 * 60),
            max_attempts: 1024,
            backoff_base: Duration::from_micros(200),
            backoff_max: Duration::from_millis(20),
        }
    }
}

/// Runs the reserve loop against any [`Reservations`] implementation.
#[derive(Clone, Debug)]
pub struct Reserver {
    policy: ReservationPolicy,
    clock: Arc<dyn Clock>,
}

impl Reserver {
    pub fn new(policy: ReservationPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    pub fn policy(&self) -> &ReservationPolicy {
        &self.policy
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Claim `candidate`, or the first free mutation of it.
    ///
    /// The returned ID may differ from `candidate`. Collisions mutate the
    /// candidate and retry with a jittered exponential backoff; the deadline
    /// is checked before every attempt.
    pub fn reserve<K, T>(
        &self,
        target: &T,
        candidate: K,
        deadline: &Deadline,
    ) -> StoreResult<Reservation<K>>
    where
        K: Reservable,
        T: Reservations<K> + ?Sized,
    {
        let start = candidate.clone();
        let ttl_ms = self.policy.ttl.as_millis() as u64;
        let mut id = candidate;

        for attempt in 0..self.policy.max_attempts {
            if deadline.is_expired() {
                debug!(candidate = %start, attempt, "reservation deadline passed");
                return Err(StoreError::Timeout);
            }
            let now = self.clock.now_ms();
            let lease = Lease {
                token: rand::random(),
                expires_at_ms: now.saturating_add(ttl_ms),
            };
            if target.try_claim(&id, &lease, now)? {
                debug!(id = %id, candidate = %start, attempt, "reserved id");
                return Ok(Reservation { id, lease });
            }
            trace!(id = %id, attempt, "id taken, mutating");
            id = id.mutate();
            if attempt > 0 {
                thread::sleep(self.backoff(attempt));
            }
        }

        warn!(
            candidate = %start,
            attempts = self.policy.max_attempts,
            "reservation attempts exhausted"
        );
        Err(StoreError::ReservationExhausted {
            candidate: start.to_string(),
            attempts: self.policy.max_attempts,
        })
    }

    /// Commit `payload` under a reservation obtained from [`Reserver::reserve`].
    pub fn commit<K, T>(
        &self,
        target: &T,
        reservation: &Reservation<K>,
        payload: T::Payload,
    ) -> StoreResult<()>
    where
        K: Reservable,
        T: Reservations<K> + ?Sized,
    {
        target.commit(reservation, payload, self.clock.as_ref())?;
        debug!(id = %reservation.id, "committed reservation");
        Ok(())
    }

    pub fn release<K, T>(&self, target: &T, reservation: &Reservation<K>) -> StoreResult<bool>
    where
        K: Reservable,
        T: Reservations<K> + ?Sized,
    {
        let released = target.release(reservation)?;
        debug!(id = %reservation.id, released, "released reservation");
        Ok(released)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let ceiling = self
            .policy
            .backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.policy.backoff_max);
        let ceiling_us = ceiling.as_micros() as u64;
        if ceiling_us == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(rand::thread_rng().gen_range(ceiling_us / 2..=ceiling_us))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::InMemoryBackend;
    use crate::record::FileStore;
    use crate::traits::ContentBackend;
    use std::collections::HashSet;
    use std::sync::Barrier;
    use std::time::Instant;

    fn quick_policy() -> ReservationPolicy {
        ReservationPolicy {
            ttl: Duration::from_secs(60),
            max_attempts: 64,
            backoff_base: Duration::ZERO,
            backoff_max: Duration::ZERO,
        }
    }

    fn payload(id: StoreId) -> FileStore {
        FileStore::new(id, vec![1, 2, 3], "text/plain", 3)
    }

    #[test]
    fn lease_liveness_boundary() {
        let lease = Lease {
            token: 1,
            expires_at_ms: 100,
        };
        assert!(lease.is_live(99));
        assert!(!lease.is_live(100));
    }

    #[test]
    fn slot_states() {
        let lease = Lease {
            token: 7,
            expires_at_ms: 100,
        };
        let reserved: Slot<u8> = Slot::Reserved(lease);
        assert!(reserved.is_held_by(7, 50));
        assert!(!reserved.is_held_by(8, 50));
        assert!(!reserved.is_held_by(7, 100));
        assert!(!reserved.is_claimable(50));
        assert!(reserved.is_claimable(100));

        let committed = Slot::Committed(1u8);
        assert!(!committed.is_claimable(u64::MAX));
        assert_eq!(committed.committed(), Some(&1));
    }

    #[test]
    fn reserve_free_id_returns_candidate() {
        let backend = InMemoryBackend::new();
        let reserver = Reserver::new(quick_policy(), Arc::new(ManualClock::new(0)));
        let id = StoreId::new(42, 1);
        let res = reserver.reserve(&backend, id, &Deadline::never()).unwrap();
        assert_eq!(res.id, id);
    }

    #[test]
    fn reserve_mutates_on_collision() {
        let backend = InMemoryBackend::new();
        let reserver = Reserver::new(quick_policy(), Arc::new(ManualClock::new(0)));
        let id = StoreId::new(42, 1);
        let first = reserver.reserve(&backend, id, &Deadline::never()).unwrap();
        let second = reserver.reserve(&backend, id, &Deadline::never()).unwrap();
        assert_eq!(first.id, id);
        assert_eq!(second.id, StoreId::new(42, 2));
    }

    #[test]
    fn expired_reservation_is_reclaimed_and_old_commit_fails() {
        let backend = InMemoryBackend::new();
        let clock = Arc::new(ManualClock::new(0));
        let reserver = Reserver::new(quick_policy(), clock.clone());
        let id = StoreId::new(9, 9);

        let stale = reserver.reserve(&backend, id, &Deadline::never()).unwrap();
        clock.advance(Duration::from_secs(61));
        let fresh = reserver.reserve(&backend, id, &Deadline::never()).unwrap();
        assert_eq!(fresh.id, id);

        let err = reserver.commit(&backend, &stale, payload(id)).unwrap_err();
        assert!(matches!(err, StoreError::IdNotReserved(_)));
        reserver.commit(&backend, &fresh, payload(id)).unwrap();
    }

    #[test]
    fn commit_after_expiry_fails() {
        let backend = InMemoryBackend::new();
        let clock = Arc::new(ManualClock::new(0));
        let reserver = Reserver::new(quick_policy(), clock.clone());
        let id = StoreId::new(3, 3);
        let res = reserver.reserve(&backend, id, &Deadline::never()).unwrap();
        clock.advance(Duration::from_secs(60));
        let err = reserver.commit(&backend, &res, payload(id)).unwrap_err();
        assert!(matches!(err, StoreError::IdNotReserved(_)));
    }

    #[test]
    fn committed_id_is_never_reclaimed() {
        let backend = InMemoryBackend::new();
        let clock = Arc::new(ManualClock::new(0));
        let reserver = Reserver::new(quick_policy(), clock.clone());
        let id = StoreId::new(5, 0);
        let res = reserver.reserve(&backend, id, &Deadline::never()).unwrap();
        reserver.commit(&backend, &res, payload(id)).unwrap();
        clock.advance(Duration::from_secs(3600));
        let next = reserver.reserve(&backend, id, &Deadline::never()).unwrap();
        assert_eq!(next.id, StoreId::new(5, 1));
    }

    #[test]
    fn release_frees_the_slot() {
        let backend = InMemoryBackend::new();
        let reserver = Reserver::new(quick_policy(), Arc::new(ManualClock::new(0)));
        let id = StoreId::new(1, 1);
        let res = reserver.reserve(&backend, id, &Deadline::never()).unwrap();
        assert!(reserver.release(&backend, &res).unwrap());
        assert!(!reserver.release(&backend, &res).unwrap());
        let again = reserver.reserve(&backend, id, &Deadline::never()).unwrap();
        assert_eq!(again.id, id);
    }

    #[test]
    fn exhausted_attempts_are_reported() {
        let backend = InMemoryBackend::new();
        let mut policy = quick_policy();
        policy.max_attempts = 3;
        let reserver = Reserver::new(policy, Arc::new(ManualClock::new(0)));
        let base = StoreId::new(8, 0);
        for _ in 0..3 {
            reserver.reserve(&backend, base, &Deadline::never()).unwrap();
        }
        let err = reserver.reserve(&backend, base, &Deadline::never()).unwrap_err();
        assert!(matches!(err, StoreError::ReservationExhausted { attempts: 3, .. }));
    }

    #[test]
    fn expired_deadline_times_out() {
        let backend = InMemoryBackend::new();
        let reserver = Reserver::new(quick_policy(), Arc::new(ManualClock::new(0)));
        let deadline = Deadline::at(Instant::now());
        let err = reserver
            .reserve(&backend, StoreId::new(1, 2), &deadline)
            .unwrap_err();
        assert!(matches!(err, StoreError::Timeout));
    }

    #[test]
    fn concurrent_reservations_have_one_unmutated_winner() {
        let backend = Arc::new(InMemoryBackend::new());
        let policy = ReservationPolicy {
            max_attempts: 256,
            ..ReservationPolicy::default()
        };
        let reserver = Reserver::new(policy, Arc::new(ManualClock::new(0)));
        let candidate = StoreId::new(0xfeed, 0);
        let start = Barrier::new(16);

        let ids: Vec<StoreId> = thread::scope(|s| {
            let handles: Vec<_> = (0..16)
                .map(|_| {
                    let backend = &backend;
                    let reserver = &reserver;
                    let start = &start;
                    s.spawn(move || {
                        start.wait();
                        let res = reserver
                            .reserve(backend.as_ref(), candidate, &Deadline::never())
                            .unwrap();
                        reserver
                            .commit(backend.as_ref(), &res, payload(res.id))
                            .unwrap();
                        res.id
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        let unique: HashSet<_> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 16);
        assert_eq!(ids.iter().filter(|id| **id == candidate).count(), 1);
        assert!(ids.iter().all(|id| id.hash == 0xfeed));
        assert_eq!(backend.match_hash(0xfeed).unwrap().len(), 16);
    }

    #[test]
    fn file_ids_reserve_by_appending() {
        let backend = InMemoryBackend::new();
        let reserver = Reserver::new(quick_policy(), Arc::new(ManualClock::new(0)));
        let base = FileId::with_stamp(StoreId::new(1, 1), vec![0x10]);
        let a = reserver.reserve(&backend, base.clone(), &Deadline::never()).unwrap();
        let b = reserver.reserve(&backend, base.clone(), &Deadline::never()).unwrap();
        assert_eq!(a.id, base);
        assert_eq!(b.id.stamp.len(), 2);
        assert_eq!(b.id.stamp[0], 0x10);
    }
}
