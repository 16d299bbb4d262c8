use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use cardflow_cards::{CardEvent, CardId, CardStatus, DisplayId};
use cardflow_core::AggregateId;
use cardflow_events::EventEnvelope;

use crate::read_model::ReadModelStore;

/// Aggregate type string under which card events are appended.
pub const CARD_AGGREGATE_TYPE: &str = "cards.card";

/// Queryable card directory: one row per live card, addressable by display id.
///
/// This is what the scan/builder workflow hits: a scanned display id resolves
/// to the card and its last projected status here, then the engine re-checks
/// real state on dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardDirectoryEntry {
    pub card_id: CardId,
    pub display_id: DisplayId,
    pub status: CardStatus,
    pub purchase_price: u64,
}

#[derive(Debug, Error)]
pub enum CardDirectoryError {
    #[error("failed to deserialize card event: {0}")]
    Deserialize(String),

    #[error("envelope/event stream mismatch: {0}")]
    StreamMismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Card directory projection.
///
/// Consumes published envelopes (JSON payloads) and maintains the directory
/// read model plus a display-id index. Read models are disposable and
/// rebuildable from the event stream.
#[derive(Debug)]
pub struct CardDirectoryProjection<S>
where
    S: ReadModelStore<CardId, CardDirectoryEntry>,
{
    store: S,
    display_index: RwLock<HashMap<String, CardId>>,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> CardDirectoryProjection<S>
where
    S: ReadModelStore<CardId, CardDirectoryEntry>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            display_index: RwLock::new(HashMap::new()),
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Query by internal card id.
    pub fn get(&self, card_id: &CardId) -> Option<CardDirectoryEntry> {
        self.store.get(card_id)
    }

    /// Query by human-facing display id (the scan workflow's lookup).
    pub fn by_display_id(&self, display_id: &str) -> Option<CardDirectoryEntry> {
        let card_id = *self.display_index.read().ok()?.get(display_id)?;
        self.store.get(&card_id)
    }

    /// List all live cards.
    pub fn list(&self) -> Vec<CardDirectoryEntry> {
        self.store.list()
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Ignores envelopes for other aggregate types
    /// - Enforces monotonic sequence per card stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), CardDirectoryError> {
        if envelope.aggregate_type() != CARD_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let Ok(mut cursors) = self.cursors.write() else {
            return Ok(());
        };
        let last = *cursors.get(&aggregate_id).unwrap_or(&0);

        if seq == 0 {
            return Err(CardDirectoryError::NonMonotonicSequence { last, found: seq });
        }

        if seq <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(());
        }

        if seq != last + 1 && last != 0 {
            // The first event may carry any positive sequence; afterwards we
            // require strict increments.
            return Err(CardDirectoryError::NonMonotonicSequence { last, found: seq });
        }

        let event: CardEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| CardDirectoryError::Deserialize(e.to_string()))?;

        let card_id = card_id_of(&event);
        if card_id.0 != aggregate_id {
            return Err(CardDirectoryError::StreamMismatch(
                "event card_id does not match envelope aggregate_id".to_string(),
            ));
        }

        self.apply_event(card_id, &event);

        // Advance cursor after successful apply.
        cursors.insert(aggregate_id, seq);

        Ok(())
    }

    fn apply_event(&self, card_id: CardId, event: &CardEvent) {
        match event {
            CardEvent::CardReceived(e) => {
                if let Ok(mut index) = self.display_index.write() {
                    index.insert(e.display_id.as_str().to_string(), card_id);
                }
                self.store.upsert(
                    card_id,
                    CardDirectoryEntry {
                        card_id,
                        display_id: e.display_id.clone(),
                        status: CardStatus::Arrived,
                        purchase_price: e.purchase_price,
                    },
                );
            }
            CardEvent::CardDeleted(_) => {
                // Admin delete removes all references, directory row included.
                if let Some(entry) = self.store.get(&card_id) {
                    if let Ok(mut index) = self.display_index.write() {
                        index.remove(entry.display_id.as_str());
                    }
                }
                self.store.remove(&card_id);
            }
            other => {
                if let Some(status) = status_after(other) {
                    if let Some(mut entry) = self.store.get(&card_id) {
                        entry.status = status;
                        self.store.upsert(card_id, entry);
                    }
                }
            }
        }
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), CardDirectoryError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
        if let Ok(mut index) = self.display_index.write() {
            index.clear();
        }
        self.store.clear();

        // Deterministic replay order: aggregate, then sequence.
        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by_key(|e| (*e.aggregate_id().as_uuid().as_bytes(), e.sequence_number()));

        for env in &envs {
            self.apply_envelope(env)?;
        }

        Ok(())
    }
}

fn card_id_of(event: &CardEvent) -> CardId {
    match event {
        CardEvent::CardReceived(e) => e.card_id,
        CardEvent::CardListed(e) => e.card_id,
        CardEvent::CardAllocated(e) => e.card_id,
        CardEvent::CardReleased(e) => e.card_id,
        CardEvent::CardSold(e) => e.card_id,
        CardEvent::CardStagedForShipping(e) => e.card_id,
        CardEvent::CardPacked(e) => e.card_id,
        CardEvent::CardShipped(e) => e.card_id,
        CardEvent::CardRevalued(e) => e.card_id,
        CardEvent::PayoutApproved(e) => e.card_id,
        CardEvent::PayoutPaid(e) => e.card_id,
        CardEvent::CardReturnedToConsignor(e) => e.card_id,
        CardEvent::CardDeleted(e) => e.card_id,
    }
}

/// Status a card holds after the event, when the event moves status at all.
fn status_after(event: &CardEvent) -> Option<CardStatus> {
    match event {
        CardEvent::CardListed(_) => Some(CardStatus::Available),
        CardEvent::CardAllocated(_) => Some(CardStatus::AllocatedToStream),
        CardEvent::CardReleased(_) => Some(CardStatus::Available),
        CardEvent::CardSold(_) => Some(CardStatus::Sold),
        CardEvent::CardStagedForShipping(_) => Some(CardStatus::ToShip),
        CardEvent::CardPacked(_) => Some(CardStatus::Packed),
        CardEvent::CardShipped(_) => Some(CardStatus::Shipped),
        CardEvent::CardReceived(_)
        | CardEvent::CardRevalued(_)
        | CardEvent::PayoutApproved(_)
        | CardEvent::PayoutPaid(_)
        | CardEvent::CardReturnedToConsignor(_)
        | CardEvent::CardDeleted(_) => None,
    }
}
