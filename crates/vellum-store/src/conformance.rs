//! Behavioral checks every backend must pass. Each backend's test module
//! calls [`run_all`] with a constructor for a fresh, empty instance.

use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use vellum_codec::{compress, DEFAULT_COMPRESSION_LEVEL};
use vellum_types::{Deadline, FileId, ProcessingStatus, StoreId};

use crate::clock::ManualClock;
use crate::error::StoreError;
use crate::record::{FileRecord, FileStore, OwnerRef};
use crate::reservation::{Lease, Reservation, ReservationPolicy, Reservations, Reserver};
use crate::traits::{ContentBackend, FileBackend};

pub const TTL: Duration = Duration::from_secs(60);

pub fn reserver() -> (Reserver, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(1_000_000));
    let policy = ReservationPolicy {
        ttl: TTL,
        max_attempts: 256,
        backoff_base: Duration::from_micros(50),
        backoff_max: Duration::from_millis(2),
    };
    (Reserver::new(policy, clock.clone()), clock)
}

pub fn record_for(id: StoreId, bytes: &[u8]) -> FileStore {
    let content = compress(bytes, DEFAULT_COMPRESSION_LEVEL).unwrap();
    FileStore::new(id, content, "application/octet-stream", bytes.len() as u64)
}

pub fn reserve_store<B: ContentBackend>(
    backend: &B,
    reserver: &Reserver,
    id: StoreId,
) -> Reservation<StoreId> {
    reserver.reserve(backend, id, &Deadline::never()).unwrap()
}

pub fn commit_store<B: ContentBackend>(
    backend: &B,
    reserver: &Reserver,
    id: StoreId,
    bytes: &[u8],
) -> FileStore {
    let res = reserve_store(backend, reserver, id);
    let record = record_for(res.id, bytes);
    reserver.commit(backend, &res, record.clone()).unwrap();
    record
}

fn patterned(len: usize, seed: u32) -> Vec<u8> {
    let mut state = seed.wrapping_mul(2_654_435_761).max(1);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

pub fn run_all<B, F>(make: F)
where
    B: ContentBackend + FileBackend,
    F: Fn() -> B,
{
    reserved_id_reads_as_absent(&make());
    commit_then_get_round_trips(&make());
    large_payload_round_trips(&make());
    empty_payload_round_trips(&make());
    foreign_token_cannot_commit(&make());
    expired_reservation_is_reclaimable(&make());
    committed_id_is_not_reclaimed(&make());
    payload_id_must_match_reservation(&make());
    match_hash_sees_only_committed(&make());
    update_status_on_committed_only(&make());
    release_returns_slot_to_free(&make());
    file_record_lifecycle(&make());
    concurrent_reservations_have_one_unmutated_winner(&make());
}

fn reserved_id_reads_as_absent<B: ContentBackend>(backend: &B) {
    let (reserver, _) = reserver();
    let res = reserve_store(backend, &reserver, StoreId::new(10, 1));
    assert!(backend.get_store(&res.id).unwrap().is_none());
    assert!(backend.match_hash(10).unwrap().is_empty());
    assert!(backend.require_store(&res.id).unwrap_err().is_not_found());
}

fn commit_then_get_round_trips<B: ContentBackend>(backend: &B) {
    let (reserver, _) = reserver();
    let record = commit_store(backend, &reserver, StoreId::new(11, 1), b"hello world");
    let read = backend.get_store(&record.id).unwrap().unwrap();
    assert_eq!(read, record);
    assert_eq!(read.decompressed().unwrap(), b"hello world");
    assert!(read.status.is_in_progress());
}

fn large_payload_round_trips<B: ContentBackend>(backend: &B) {
    let (reserver, _) = reserver();
    let id = StoreId::new(12, 1);
    let res = reserve_store(backend, &reserver, id);
    // Incompressible content so the stored form spans many chunks.
    let content = patterned(40_000, 7);
    let record = FileStore::new(res.id, content.clone(), "application/x-raw", 40_000);
    reserver.commit(backend, &res, record).unwrap();
    let read = backend.get_store(&id).unwrap().unwrap();
    assert_eq!(read.content, content);
    assert_eq!(read.file_size, 40_000);
}

fn empty_payload_round_trips<B: ContentBackend>(backend: &B) {
    let (reserver, _) = reserver();
    let id = StoreId::new(13, 1);
    let res = reserve_store(backend, &reserver, id);
    let record = FileStore::new(id, Vec::new(), "text/plain", 0);
    reserver.commit(backend, &res, record.clone()).unwrap();
    assert_eq!(backend.get_store(&id).unwrap().unwrap(), record);
}

fn foreign_token_cannot_commit<B: ContentBackend>(backend: &B) {
    let (reserver, _) = reserver();
    let id = StoreId::new(14, 1);
    let res = reserve_store(backend, &reserver, id);
    let forged = Reservation {
        id,
        lease: Lease {
            token: res.lease.token.wrapping_add(1),
            expires_at_ms: res.lease.expires_at_ms,
        },
    };
    let err = reserver.commit(backend, &forged, record_for(id, b"x")).unwrap_err();
    assert!(matches!(err, StoreError::IdNotReserved(_)));
    assert!(backend.get_store(&id).unwrap().is_none());
    reserver.commit(backend, &res, record_for(id, b"x")).unwrap();
}

fn expired_reservation_is_reclaimable<B: ContentBackend>(backend: &B) {
    let (reserver, clock) = reserver();
    let id = StoreId::new(15, 1);
    let stale = reserve_store(backend, &reserver, id);
    clock.advance(TTL);
    let fresh = reserve_store(backend, &reserver, id);
    assert_eq!(fresh.id, id);
    assert_ne!(fresh.lease.token, stale.lease.token);

    let err = reserver.commit(backend, &stale, record_for(id, b"old")).unwrap_err();
    assert!(matches!(err, StoreError::IdNotReserved(_)));
    reserver.commit(backend, &fresh, record_for(id, b"new")).unwrap();
    let read = backend.require_store(&id).unwrap();
    assert_eq!(read.decompressed().unwrap(), b"new");
}

fn committed_id_is_not_reclaimed<B: ContentBackend>(backend: &B) {
    let (reserver, clock) = reserver();
    let id = StoreId::new(16, 1);
    commit_store(backend, &reserver, id, b"kept");
    clock.advance(TTL * 10);
    let next = reserve_store(backend, &reserver, id);
    assert_eq!(next.id, StoreId::new(16, 2));
    let claimed = Reservations::<StoreId>::try_claim(
        backend,
        &id,
        &Lease {
            token: 1,
            expires_at_ms: u64::MAX,
        },
        u64::MAX - 1,
    )
    .unwrap();
    assert!(!claimed);
}

fn payload_id_must_match_reservation<B: ContentBackend>(backend: &B) {
    let (reserver, _) = reserver();
    let res = reserve_store(backend, &reserver, StoreId::new(17, 1));
    let err = reserver
        .commit(backend, &res, record_for(StoreId::new(17, 2), b"x"))
        .unwrap_err();
    assert!(matches!(err, StoreError::IdMismatch { .. }));
}

fn match_hash_sees_only_committed<B: ContentBackend>(backend: &B) {
    let (reserver, _) = reserver();
    let a = commit_store(backend, &reserver, StoreId::new(18, 1), b"first");
    let b = commit_store(backend, &reserver, StoreId::new(18, 1), b"second");
    let _pending = reserve_store(backend, &reserver, StoreId::new(18, 1));
    commit_store(backend, &reserver, StoreId::new(19, 1), b"other hash");

    let mut found = backend.match_hash(18).unwrap();
    found.sort_by_key(|r| r.id);
    assert_eq!(found, vec![a, b]);
    assert!(backend.match_hash(20).unwrap().is_empty());
}

fn update_status_on_committed_only<B: ContentBackend>(backend: &B) {
    let (reserver, _) = reserver();
    let record = commit_store(backend, &reserver, StoreId::new(21, 1), b"status");
    backend
        .update_status(&record.id, ProcessingStatus::failed(500, "bad scan"))
        .unwrap();
    let read = backend.require_store(&record.id).unwrap();
    assert_eq!(read.status, ProcessingStatus::failed(500, "bad scan"));
    assert_eq!(read.content, record.content);

    backend.update_status(&record.id, ProcessingStatus::Ok).unwrap();
    assert!(backend.require_store(&record.id).unwrap().status.is_ready());

    let pending = reserve_store(backend, &reserver, StoreId::new(22, 1));
    let err = backend
        .update_status(&pending.id, ProcessingStatus::Ok)
        .unwrap_err();
    assert!(err.is_not_found());
    let err = backend
        .update_status(&StoreId::new(23, 1), ProcessingStatus::Ok)
        .unwrap_err();
    assert!(err.is_not_found());
}

fn release_returns_slot_to_free<B: ContentBackend>(backend: &B) {
    let (reserver, _) = reserver();
    let id = StoreId::new(24, 1);
    let res = reserve_store(backend, &reserver, id);
    assert!(reserver.release(backend, &res).unwrap());
    assert!(!reserver.release(backend, &res).unwrap());
    let err = reserver.commit(backend, &res, record_for(id, b"x")).unwrap_err();
    assert!(matches!(err, StoreError::IdNotReserved(_)));
    assert_eq!(reserve_store(backend, &reserver, id).id, id);
}

fn file_record_lifecycle<B: ContentBackend + FileBackend>(backend: &B) {
    let (reserver, _) = reserver();
    let store = commit_store(backend, &reserver, StoreId::new(25, 1), b"shared").id;
    let owner = OwnerRef::new("owner-1");

    let candidate = FileId::with_stamp(store, vec![0x41]);
    let first = reserver
        .reserve(backend, candidate.clone(), &Deadline::never())
        .unwrap();
    assert!(backend.get_file(&first.id).unwrap().is_none());
    let record = FileRecord::new(first.id.clone(), "a.txt", owner.clone());
    reserver.commit(backend, &first, record.clone()).unwrap();

    let second = reserver
        .reserve(backend, candidate, &Deadline::never())
        .unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(second.id.store, store);
    let other = FileRecord::new(second.id.clone(), "b.txt", owner);
    reserver.commit(backend, &second, other.clone()).unwrap();

    assert_eq!(backend.require_file(&first.id).unwrap(), record);
    let mut listed = backend.files_for_store(&store).unwrap();
    listed.sort_by(|a, b| a.id.cmp(&b.id));
    let mut expected = vec![record.clone(), other.clone()];
    expected.sort_by(|a, b| a.id.cmp(&b.id));
    assert_eq!(listed, expected);
    assert!(backend.files_for_store(&StoreId::new(25, 2)).unwrap().is_empty());

    let mut renamed = record.clone();
    renamed.name = "renamed.txt".into();
    backend.update_file(&renamed).unwrap();
    assert_eq!(backend.require_file(&first.id).unwrap().name, "renamed.txt");

    backend.remove_file(&first.id).unwrap();
    assert!(backend.get_file(&first.id).unwrap().is_none());
    assert!(backend.remove_file(&first.id).unwrap_err().is_not_found());
    assert!(backend.update_file(&renamed).unwrap_err().is_not_found());
    // The blob outlives its files.
    assert!(backend.get_store(&store).unwrap().is_some());
    assert_eq!(backend.files_for_store(&store).unwrap(), vec![other]);
}

fn concurrent_reservations_have_one_unmutated_winner<B: ContentBackend>(backend: &B) {
    let (reserver, _) = reserver();
    let candidate = StoreId::new(26, 0);
    let start = Barrier::new(8);
    let ids: Vec<StoreId> = thread::scope(|s| {
        let handles: Vec<_> = (0..8u32)
            .map(|i| {
                let reserver = &reserver;
                let start = &start;
                s.spawn(move || {
                    start.wait();
                    commit_store(backend, reserver, candidate, &i.to_le_bytes()).id
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    let unique: HashSet<StoreId> = ids.iter().copied().collect();
    assert_eq!(unique.len(), 8);
    assert_eq!(ids.iter().filter(|id| **id == candidate).count(), 1);
    assert!(ids.iter().all(|id| id.hash == candidate.hash));
    assert_eq!(backend.match_hash(26).unwrap().len(), 8);
}
