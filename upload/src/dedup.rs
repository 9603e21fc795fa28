//! In-flight deduplication (§4.5 step 4: "consult the in-flight deduplication set
//! keyed by content id; if the id is already being processed, serialize by joining
//! the existing outcome"). Concurrent requests for the same content id share one
//! ingest attempt instead of racing two inserts through the triple store.

use std::sync::Arc;

use gateway_common::ContentId;
use tokio::sync::broadcast;

use crate::ingest::IngestOutcome;

/// A shared outcome slot: the first caller for a given id creates it and
/// broadcasts its result when done; later callers for the same id just await the
/// broadcast instead of repeating the work.
#[derive(Clone)]
struct InFlight {
    sender: broadcast::Sender<Result<IngestOutcome, String>>,
}

pub struct DedupSet {
    inflight: dashmap::DashMap<ContentId, InFlight>,
}

impl DedupSet {
    pub fn new() -> Self {
        Self { inflight: dashmap::DashMap::new() }
    }

    /// Either claims the id for the caller to process (returning `None`), or
    /// returns a receiver that resolves once the in-progress attempt for that id
    /// finishes.
    pub fn claim_or_join(&self, id: ContentId) -> Option<broadcast::Receiver<Result<IngestOutcome, String>>> {
        if let Some(existing) = self.inflight.get(&id) {
            return Some(existing.sender.subscribe());
        }
        let (sender, _) = broadcast::channel(1);
        match self.inflight.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(entry) => Some(entry.get().sender.subscribe()),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(InFlight { sender });
                None
            }
        }
    }

    /// Publishes the outcome to any joiners and releases the claim so a later,
    /// unrelated request for the same id (post-settle) starts fresh rather than
    /// waiting forever on a closed channel.
    pub fn finish(&self, id: ContentId, outcome: Result<IngestOutcome, String>) {
        if let Some((_, in_flight)) = self.inflight.remove(&id) {
            let _ = in_flight.sender.send(outcome);
        }
    }
}

impl Default for DedupSet {
    fn default() -> Self {
        Self::new()
    }
}

pub type SharedDedupSet = Arc<DedupSet>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn a_second_claim_for_the_same_id_joins_the_first() {
        let set = DedupSet::new();
        let id = ContentId::from_signature(b"dup");

        assert!(set.claim_or_join(id).is_none());
        let mut joiner = set.claim_or_join(id).expect("second caller joins instead of claiming");

        set.finish(id, Err("boom".to_string()));
        let result = joiner.recv().await.unwrap();
        assert_eq!(result.unwrap_err(), "boom");
    }

    #[test]
    fn after_finishing_the_id_can_be_claimed_again() {
        let set = DedupSet::new();
        let id = ContentId::from_signature(b"dup");
        assert!(set.claim_or_join(id).is_none());
        set.finish(id, Err("done".to_string()));
        assert!(set.claim_or_join(id).is_none());
    }
}
