//! Pending-Call Registry
//!
//! Process-wide rendezvous between the two signaling sessions of a 1:1 call.
//! An entry is created when a caller opens `/call` and lives until either
//! session observes terminal state (or the sweeper evicts it). The two
//! sessions never hold references to each other's transport; everything they
//! share goes through the channel endpoints stored here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use uuid::Uuid;
use vogo_common::{IceCandidate, SessionDescription};

/// Buffered capacity of each candidate channel. ICE gathering rarely produces
/// more than ten candidates; a sender that overruns this is misbehaving and
/// its session is terminated rather than ever blocking the forwarder.
pub const CANDIDATE_CHANNEL_CAPACITY: usize = 16;

/// Endpoints held by the caller's `/call` session.
pub struct CallerEnds {
    /// caller→recipient candidates (write side)
    pub candidates_tx: mpsc::Sender<IceCandidate>,
    /// recipient→caller candidates (read side)
    pub candidates_rx: mpsc::Receiver<IceCandidate>,
    /// the recipient's answer (single value)
    pub answer_rx: mpsc::Receiver<SessionDescription>,
}

/// Endpoints taken, exactly once, by the recipient's `/answer` session.
pub struct RecipientEnds {
    /// caller→recipient candidates (read side)
    pub candidates_rx: mpsc::Receiver<IceCandidate>,
    /// recipient→caller candidates (write side)
    pub candidates_tx: mpsc::Sender<IceCandidate>,
    /// the recipient's answer (write side)
    pub answer_tx: mpsc::Sender<SessionDescription>,
}

/// One pending call, keyed in the registry by the caller's user id.
pub struct PendingCall {
    pub caller_name: String,
    pub recipient_id: Uuid,
    pub offer: SessionDescription,
    created_at: Instant,
    recipient_ends: Mutex<Option<RecipientEnds>>,
}

impl PendingCall {
    /// Build a call entry and the caller-side channel endpoints.
    pub fn new(
        caller_name: String,
        recipient_id: Uuid,
        offer: SessionDescription,
    ) -> (Arc<Self>, CallerEnds) {
        let (caller_tx, caller_rx) = mpsc::channel(CANDIDATE_CHANNEL_CAPACITY);
        let (recipient_tx, recipient_rx) = mpsc::channel(CANDIDATE_CHANNEL_CAPACITY);
        let (answer_tx, answer_rx) = mpsc::channel(1);

        let call = Arc::new(Self {
            caller_name,
            recipient_id,
            offer,
            created_at: Instant::now(),
            recipient_ends: Mutex::new(Some(RecipientEnds {
                candidates_rx: caller_rx,
                candidates_tx: recipient_tx,
                answer_tx,
            })),
        });
        let ends = CallerEnds {
            candidates_tx: caller_tx,
            candidates_rx: recipient_rx,
            answer_rx,
        };
        (call, ends)
    }

    /// Hand the recipient-side endpoints to the answer session. Returns `None`
    /// if another answer session already claimed them.
    pub fn take_recipient_ends(&self) -> Option<RecipientEnds> {
        unpoison(self.recipient_ends.lock()).take()
    }

    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }
}

/// Lock-guarded map of pending calls, one per caller id at most.
#[derive(Default)]
pub struct PendingCalls {
    calls: Mutex<HashMap<Uuid, Arc<PendingCall>>>,
}

/// Returned by [`PendingCalls::insert`] when the caller already has a call up.
#[derive(Debug)]
pub struct CallExists;

impl PendingCalls {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Put-if-absent. A caller can only have one pending call at a time; a
    /// second insert for the same id fails until the first entry is removed.
    pub fn insert(&self, caller_id: Uuid, call: Arc<PendingCall>) -> Result<(), CallExists> {
        let mut calls = unpoison(self.calls.lock());
        match calls.entry(caller_id) {
            std::collections::hash_map::Entry::Occupied(_) => Err(CallExists),
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(call);
                Ok(())
            }
        }
    }

    pub fn get(&self, caller_id: Uuid) -> Option<Arc<PendingCall>> {
        unpoison(self.calls.lock()).get(&caller_id).cloned()
    }

    /// Remove an entry. Idempotent: both sessions call this on termination.
    pub fn remove(&self, caller_id: Uuid) {
        unpoison(self.calls.lock()).remove(&caller_id);
    }

    /// Names of callers with a call currently pending for this recipient,
    /// surfaced by the status endpoint.
    pub fn incoming_for(&self, recipient_id: Uuid) -> Vec<String> {
        unpoison(self.calls.lock())
            .values()
            .filter(|call| call.recipient_id == recipient_id)
            .map(|call| call.caller_name.clone())
            .collect()
    }

    /// Evict entries older than `ttl`. Returns how many were dropped.
    ///
    /// Per-session removal is the primary cleanup; this bounds the leakage a
    /// misbehaving client can cause by opening a call and going silent.
    pub fn sweep(&self, ttl: Duration) -> usize {
        let mut calls = unpoison(self.calls.lock());
        let before = calls.len();
        calls.retain(|_, call| call.age() < ttl);
        before - calls.len()
    }

    pub fn len(&self) -> usize {
        unpoison(self.calls.lock()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn unpoison<'a, T>(result: Result<MutexGuard<'a, T>, PoisonError<MutexGuard<'a, T>>>) -> MutexGuard<'a, T> {
    // the critical sections here cannot panic; recover the guard anyway
    result.unwrap_or_else(PoisonError::into_inner)
}

/// Removes the registry entry when the owning session ends, however it ends.
pub struct RegistryGuard {
    calls: Arc<PendingCalls>,
    caller_id: Uuid,
}

impl RegistryGuard {
    pub fn new(calls: Arc<PendingCalls>, caller_id: Uuid) -> Self {
        Self { calls, caller_id }
    }
}

impl Drop for RegistryGuard {
    fn drop(&mut self) {
        self.calls.remove(self.caller_id);
    }
}
