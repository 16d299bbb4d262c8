//! Engine services: the transport-agnostic public operations.
//!
//! Every mutating operation here follows the same shape: check the permission
//! matrix, dispatch a command through the event-sourced pipeline, and keep the
//! card directory current. Operations take full input and return full output;
//! there is no hidden session state. A scanning session is nothing but a
//! sequence of independent `add_card_to_stream` calls.
//!
//! Finalize is the one cross-aggregate orchestration: the stream's settlement
//! write always lands first, then the bulk-sale card propagation runs per
//! member with individual skip reporting (never failing the settlement).

mod consignors;

pub use consignors::ConsignorDirectory;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use cardflow_auth::{Action, Actor, can_access_own_resource, has_permission};
use cardflow_batches::{
    ArriveRow, Batch, BatchCommand, BatchEvent, BatchId, CloseBatch, FinishBatch, FlagRow,
    OpenBatch, ResolveRow, RowState, StageRow,
};
use cardflow_cards::{
    AllocateToStream, ApprovePayout, Card, CardCommand, CardDetails, CardId, CardStatus,
    DeleteCard, DisplayId, MarkAvailable, MarkPacked, MarkPayoutPaid, MarkShipped, MarkSold,
    MarkToShip, Ownership, ReceiveCard, ReleaseFromStream, ReturnToConsignor, RevalueCard,
};
use cardflow_consignment::{
    Consignor, ConsignmentTerms, ConsignorId, allocate_pro_rata,
};
use cardflow_core::AggregateId;
use cardflow_events::{EventBus, EventEnvelope};
use cardflow_streams::{
    AddItem, FinalizeStream, LockStream, OpenStream, RemoveItem, Settlement, Stream,
    StreamCommand, StreamId,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError, load_aggregate};
use crate::event_store::{EventStore, StoredEvent};
use crate::projections::{CARD_AGGREGATE_TYPE, CardDirectoryEntry, CardDirectoryProjection};
use crate::read_model::ReadModelStore;

/// Aggregate type string under which batch events are appended.
pub const BATCH_AGGREGATE_TYPE: &str = "batches.batch";

/// Aggregate type string under which stream events are appended.
pub const STREAM_AGGREGATE_TYPE: &str = "streams.stream";

/// Ownership declaration for an arriving row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArrivalOwnership {
    Owned,
    Consigned {
        consignor_id: ConsignorId,
        /// Per-card override; falls back to the consignor's current defaults.
        terms_override: Option<ConsignmentTerms>,
    },
}

/// Full input for a batch-row arrival.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrivalSpec {
    pub display_id: String,
    pub details: CardDetails,
    pub purchase_price: u64,
    pub ownership: ArrivalOwnership,
}

/// Result of `arrive_row`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrivedCard {
    pub card_id: CardId,
    pub display_id: DisplayId,
    /// True when this call was an idempotent replay of an earlier arrival.
    pub replayed: bool,
}

/// A member the bulk-sale propagation could not advance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedMember {
    pub card_id: CardId,
    pub reason: String,
}

/// A consignment payout opened by a bulk finalize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayoutOpened {
    pub card_id: CardId,
    /// The member's pro-rata share of gross sales (by purchase price).
    pub attributed_sale_price: u64,
    pub payout_due: u64,
}

/// Result of `finalize_stream`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementOutcome {
    pub stream_id: StreamId,
    pub settlement: Settlement,
    /// Per-card propagation failures; reported, never fatal.
    pub skipped: Vec<SkippedMember>,
    pub payouts_opened: Vec<PayoutOpened>,
    /// True when the stream was already finalized with the same figures.
    pub replayed: bool,
}

/// The inventory allocation & settlement engine.
///
/// Generic over the event store, event bus, and directory read-model store so
/// tests run fully in memory and persistent backends swap in unchanged.
pub struct Engine<S, B, D>
where
    S: EventStore + Clone,
    B: EventBus<EventEnvelope<JsonValue>>,
    D: ReadModelStore<CardId, CardDirectoryEntry>,
{
    dispatcher: CommandDispatcher<S, B>,
    store: S,
    directory: Arc<CardDirectoryProjection<D>>,
    consignors: Arc<ConsignorDirectory>,
}

impl<S, B, D> Engine<S, B, D>
where
    S: EventStore + Clone,
    B: EventBus<EventEnvelope<JsonValue>>,
    D: ReadModelStore<CardId, CardDirectoryEntry>,
{
    pub fn new(
        store: S,
        bus: B,
        directory: Arc<CardDirectoryProjection<D>>,
        consignors: Arc<ConsignorDirectory>,
    ) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(store.clone(), bus),
            store,
            directory,
            consignors,
        }
    }

    // ── batches ──────────────────────────────────────────────────────────

    pub fn open_batch(&self, actor: Actor, name: &str) -> Result<BatchId, DispatchError> {
        self.authorize(actor, "batches.create")?;

        let batch_id = BatchId::new(AggregateId::new());
        self.dispatch_batch(
            batch_id,
            BatchCommand::OpenBatch(OpenBatch {
                batch_id,
                name: name.to_string(),
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(%batch_id, name, "batch opened");
        Ok(batch_id)
    }

    /// Stage a new intake row; returns the assigned row number.
    pub fn stage_row(
        &self,
        actor: Actor,
        batch_id: BatchId,
        description: &str,
    ) -> Result<u32, DispatchError> {
        self.authorize(actor, "batches.create")?;

        let stored = self.dispatch_batch(
            batch_id,
            BatchCommand::StageRow(StageRow {
                batch_id,
                description: description.to_string(),
                occurred_at: Utc::now(),
            }),
        )?;

        match decode_events::<BatchEvent>(&stored)?.first() {
            Some(BatchEvent::RowStaged(e)) => Ok(e.row_no),
            _ => Err(DispatchError::Deserialize(
                "expected RowStaged event".to_string(),
            )),
        }
    }

    pub fn flag_row(
        &self,
        actor: Actor,
        batch_id: BatchId,
        row_no: u32,
        reason: &str,
    ) -> Result<(), DispatchError> {
        self.authorize(actor, "batches.create")?;

        self.dispatch_batch(
            batch_id,
            BatchCommand::FlagRow(FlagRow {
                batch_id,
                row_no,
                reason: reason.to_string(),
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn resolve_row(
        &self,
        actor: Actor,
        batch_id: BatchId,
        row_no: u32,
    ) -> Result<(), DispatchError> {
        self.authorize(actor, "batches.resolve_row")?;

        self.dispatch_batch(
            batch_id,
            BatchCommand::ResolveRow(ResolveRow {
                batch_id,
                row_no,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    /// Arrive a batch row, creating its card.
    ///
    /// Idempotent per `(row_no, idempotency_key)`: a retry returns the
    /// already-created card instead of duplicating it. The row is bound to the
    /// card id first and the card created second, so a crash between the two
    /// writes is healed by the replay path on the next retry.
    pub fn arrive_row(
        &self,
        actor: Actor,
        batch_id: BatchId,
        row_no: u32,
        idempotency_key: &str,
        spec: ArrivalSpec,
    ) -> Result<ArrivedCard, DispatchError> {
        self.authorize(actor, "batches.arrive_row")?;

        let batch = self.load_batch(batch_id)?;
        let row = batch.row(row_no).ok_or(DispatchError::NotFound)?;

        if let RowState::Arrived {
            card_id,
            idempotency_key: existing,
        } = &row.state
        {
            if existing == idempotency_key {
                return self.replay_arrival(*card_id, &spec);
            }
            return Err(DispatchError::Concurrency(
                "row already arrived under a different idempotency key".to_string(),
            ));
        }

        if self.directory.by_display_id(&spec.display_id).is_some() {
            return Err(DispatchError::Validation(format!(
                "display id '{}' is already in use",
                spec.display_id
            )));
        }

        let card_id = CardId::new(AggregateId::new());
        let display_id = DisplayId::new(spec.display_id.clone())?;
        let ownership = self.resolve_ownership(&spec.ownership)?;

        // Bind the row first; the batch enforces closed/error/conflict rules.
        self.dispatch_batch(
            batch_id,
            BatchCommand::ArriveRow(ArriveRow {
                batch_id,
                row_no,
                idempotency_key: idempotency_key.to_string(),
                card_id,
                occurred_at: Utc::now(),
            }),
        )?;

        self.dispatch_card(
            card_id,
            CardCommand::ReceiveCard(ReceiveCard {
                card_id,
                display_id: display_id.clone(),
                details: spec.details.clone(),
                purchase_price: spec.purchase_price,
                ownership,
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(%batch_id, row_no, %card_id, display_id = %display_id, "row arrived");
        Ok(ArrivedCard {
            card_id,
            display_id,
            replayed: false,
        })
    }

    /// Replay path for an already-arrived row: return the bound card, creating
    /// it if an earlier attempt died between the row bind and the card write.
    fn replay_arrival(
        &self,
        card_id: CardId,
        spec: &ArrivalSpec,
    ) -> Result<ArrivedCard, DispatchError> {
        let card = load_aggregate(&self.store, card_id.0, |id| Card::empty(CardId::new(id)))?;

        if !card.is_created() {
            let display_id = DisplayId::new(spec.display_id.clone())?;
            let ownership = self.resolve_ownership(&spec.ownership)?;
            self.dispatch_card(
                card_id,
                CardCommand::ReceiveCard(ReceiveCard {
                    card_id,
                    display_id,
                    details: spec.details.clone(),
                    purchase_price: spec.purchase_price,
                    ownership,
                    occurred_at: Utc::now(),
                }),
            )?;
        }

        let card = self.load_card(card_id)?;
        let display_id = card.display_id().cloned().ok_or_else(|| {
            DispatchError::Store(crate::event_store::EventStoreError::InvalidAppend(
                "arrived card carries no display id".to_string(),
            ))
        })?;

        Ok(ArrivedCard {
            card_id,
            display_id,
            replayed: true,
        })
    }

    pub fn finish_batch(&self, actor: Actor, batch_id: BatchId) -> Result<(), DispatchError> {
        self.authorize(actor, "batches.finish")?;

        self.dispatch_batch(
            batch_id,
            BatchCommand::FinishBatch(FinishBatch {
                batch_id,
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(%batch_id, "batch finished");
        Ok(())
    }

    pub fn close_batch(&self, actor: Actor, batch_id: BatchId) -> Result<(), DispatchError> {
        self.authorize(actor, "batches.close")?;

        self.dispatch_batch(
            batch_id,
            BatchCommand::CloseBatch(CloseBatch {
                batch_id,
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(%batch_id, "batch closed");
        Ok(())
    }

    // ── cards ────────────────────────────────────────────────────────────

    pub fn mark_card_available(&self, actor: Actor, card_id: CardId) -> Result<(), DispatchError> {
        self.authorize(actor, "cards.mark_available")?;

        self.dispatch_card(
            card_id,
            CardCommand::MarkAvailable(MarkAvailable {
                card_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn revalue_card(
        &self,
        actor: Actor,
        card_id: CardId,
        current_value: Option<u64>,
        notes: Option<String>,
    ) -> Result<(), DispatchError> {
        self.authorize(actor, "cards.update")?;

        self.dispatch_card(
            card_id,
            CardCommand::RevalueCard(RevalueCard {
                card_id,
                current_value,
                notes,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn mark_card_to_ship(&self, actor: Actor, card_id: CardId) -> Result<(), DispatchError> {
        self.authorize(actor, "cards.ship_ops")?;
        self.dispatch_card(
            card_id,
            CardCommand::MarkToShip(MarkToShip {
                card_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn mark_card_packed(&self, actor: Actor, card_id: CardId) -> Result<(), DispatchError> {
        self.authorize(actor, "cards.ship_ops")?;
        self.dispatch_card(
            card_id,
            CardCommand::MarkPacked(MarkPacked {
                card_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    pub fn mark_card_shipped(&self, actor: Actor, card_id: CardId) -> Result<(), DispatchError> {
        self.authorize(actor, "cards.ship_ops")?;
        self.dispatch_card(
            card_id,
            CardCommand::MarkShipped(MarkShipped {
                card_id,
                occurred_at: Utc::now(),
            }),
        )?;
        Ok(())
    }

    /// Irreversible admin delete. Rejected while the card is a stream member.
    pub fn delete_card(&self, actor: Actor, card_id: CardId) -> Result<(), DispatchError> {
        self.authorize(actor, "cards.delete")?;

        self.dispatch_card(
            card_id,
            CardCommand::DeleteCard(DeleteCard {
                card_id,
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(%card_id, "card deleted");
        Ok(())
    }

    // ── streams ──────────────────────────────────────────────────────────

    /// Open a stream owned by the calling user.
    pub fn open_stream(
        &self,
        actor: Actor,
        title: &str,
        streamer: &str,
        scheduled_for: Option<DateTime<Utc>>,
    ) -> Result<StreamId, DispatchError> {
        self.authorize(actor, "streams.create")?;

        let stream_id = StreamId::new(AggregateId::new());
        self.dispatch_stream(
            stream_id,
            StreamCommand::OpenStream(OpenStream {
                stream_id,
                title: title.to_string(),
                streamer: streamer.to_string(),
                owner_user_id: actor.user_id,
                scheduled_for,
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(%stream_id, title, "stream opened");
        Ok(stream_id)
    }

    /// Add a card to a draft stream, addressed by display id (the scan path).
    ///
    /// Flips the card `Available -> AllocatedToStream` first (the card state
    /// machine is the single source of "at most one stream" truth), then
    /// appends the stream membership. A stream-side failure releases the card
    /// again (compensation).
    pub fn add_card_to_stream(
        &self,
        actor: Actor,
        stream_id: StreamId,
        display_id: &str,
    ) -> Result<CardId, DispatchError> {
        self.authorize(actor, "streams.add_item")?;

        let entry = self
            .directory
            .by_display_id(display_id)
            .ok_or(DispatchError::NotFound)?;
        let card = self.load_card(entry.card_id)?;
        let card_id = card.id_typed();

        self.dispatch_card(
            card_id,
            CardCommand::AllocateToStream(AllocateToStream {
                card_id,
                stream_id: stream_id.0,
                occurred_at: Utc::now(),
            }),
        )?;

        let added = self.dispatch_stream(
            stream_id,
            StreamCommand::AddItem(AddItem {
                stream_id,
                card_id,
                purchase_price: card.purchase_price(),
                occurred_at: Utc::now(),
            }),
        );

        if let Err(err) = added {
            // Compensate: put the card back where the scan found it.
            if let Err(release_err) = self.dispatch_card(
                card_id,
                CardCommand::ReleaseFromStream(ReleaseFromStream {
                    card_id,
                    occurred_at: Utc::now(),
                }),
            ) {
                tracing::error!(%card_id, error = ?release_err, "failed to release card after stream add failure");
            }
            return Err(err);
        }

        tracing::info!(%stream_id, %card_id, display_id, "card added to stream");
        Ok(card_id)
    }

    /// Remove a card from a draft stream and release it back to available.
    pub fn remove_card_from_stream(
        &self,
        actor: Actor,
        stream_id: StreamId,
        card_id: CardId,
    ) -> Result<(), DispatchError> {
        self.authorize(actor, "streams.remove_item")?;

        // The stream gates draft-only removal and membership.
        self.dispatch_stream(
            stream_id,
            StreamCommand::RemoveItem(RemoveItem {
                stream_id,
                card_id,
                occurred_at: Utc::now(),
            }),
        )?;

        if let Err(err) = self.dispatch_card(
            card_id,
            CardCommand::ReleaseFromStream(ReleaseFromStream {
                card_id,
                occurred_at: Utc::now(),
            }),
        ) {
            // Compensate: re-append the member so stream and card stay aligned.
            let card = self.load_card(card_id)?;
            if let Err(re_add_err) = self.dispatch_stream(
                stream_id,
                StreamCommand::AddItem(AddItem {
                    stream_id,
                    card_id,
                    purchase_price: card.purchase_price(),
                    occurred_at: Utc::now(),
                }),
            ) {
                tracing::error!(%stream_id, %card_id, error = ?re_add_err, "failed to restore membership after release failure");
            }
            return Err(err);
        }

        tracing::info!(%stream_id, %card_id, "card removed from stream");
        Ok(())
    }

    /// Lock a stream: owner, or an elevated role.
    pub fn lock_stream(&self, actor: Actor, stream_id: StreamId) -> Result<(), DispatchError> {
        let stream = self.load_stream(stream_id)?;
        let owner = stream.owner_user_id().ok_or(DispatchError::NotFound)?;

        let action = Action::new("streams.lock");
        if !can_access_own_resource(actor.role, &action, owner, actor.user_id) {
            return Err(DispatchError::PermissionDenied(
                action.as_str().to_string(),
            ));
        }

        self.dispatch_stream(
            stream_id,
            StreamCommand::LockStream(LockStream {
                stream_id,
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(%stream_id, "stream locked");
        Ok(())
    }

    /// Finalize a locked stream: stamp the settlement, then (for bulk sales)
    /// propagate `AllocatedToStream -> Sold -> ToShip` per member.
    ///
    /// The settlement write always succeeds or fails on its own; per-card
    /// propagation failures land in `SettlementOutcome::skipped` so an
    /// operator can reconcile. Retrying an already-finalized stream with the
    /// same figures returns the recorded settlement.
    pub fn finalize_stream(
        &self,
        actor: Actor,
        stream_id: StreamId,
        gross_sales: u64,
        fees: Option<u64>,
        bulk_sale: bool,
    ) -> Result<SettlementOutcome, DispatchError> {
        self.authorize(actor, "streams.finalize")?;

        let fees = fees.unwrap_or(0);
        let stored = self.dispatch_stream(
            stream_id,
            StreamCommand::FinalizeStream(FinalizeStream {
                stream_id,
                gross_sales,
                fees,
                bulk_sale,
                occurred_at: Utc::now(),
            }),
        )?;

        let stream = self.load_stream(stream_id)?;
        let settlement = *stream.settlement().ok_or_else(|| {
            DispatchError::Store(crate::event_store::EventStoreError::InvalidAppend(
                "finalized stream carries no settlement".to_string(),
            ))
        })?;

        if stored.is_empty() {
            // Idempotent retry of an identical finalize.
            return Ok(SettlementOutcome {
                stream_id,
                settlement,
                skipped: Vec::new(),
                payouts_opened: Vec::new(),
                replayed: true,
            });
        }

        if settlement.is_loss() {
            tracing::warn!(%stream_id, profit = settlement.profit, "stream settled at a loss");
        }

        let mut skipped = Vec::new();
        let mut payouts_opened = Vec::new();

        if bulk_sale {
            let members = stream.members().to_vec();
            let costs: Vec<u64> = members.iter().map(|m| m.purchase_price).collect();
            let attributed_sales = allocate_pro_rata(gross_sales, &costs);
            let attributed_fees = allocate_pro_rata(fees, &costs);

            for (idx, member) in members.iter().enumerate() {
                match self.propagate_bulk_sale(
                    member.card_id,
                    stream_id,
                    attributed_sales[idx],
                    attributed_fees[idx],
                ) {
                    Ok(Some(payout)) => payouts_opened.push(payout),
                    Ok(None) => {}
                    Err(reason) => {
                        tracing::warn!(%stream_id, card_id = %member.card_id, %reason, "bulk-sale member skipped");
                        skipped.push(SkippedMember {
                            card_id: member.card_id,
                            reason,
                        });
                    }
                }
            }
        }

        tracing::info!(
            %stream_id,
            gross_sales,
            fees,
            profit = settlement.profit,
            bulk_sale,
            skipped = skipped.len(),
            "stream finalized"
        );

        Ok(SettlementOutcome {
            stream_id,
            settlement,
            skipped,
            payouts_opened,
            replayed: false,
        })
    }

    /// Advance one bulk-sale member. Errors are skip reasons, not failures.
    fn propagate_bulk_sale(
        &self,
        card_id: CardId,
        stream_id: StreamId,
        attributed_sale_price: u64,
        attributed_fees: u64,
    ) -> Result<Option<PayoutOpened>, String> {
        let card = self
            .load_card(card_id)
            .map_err(|e| format!("failed to load card: {e:?}"))?;

        if card.status() != CardStatus::AllocatedToStream
            || card.allocated_to() != Some(stream_id.0)
        {
            return Err(format!(
                "card is '{}' and no longer allocated to this stream",
                card.status().as_str()
            ));
        }

        self.dispatch_card(
            card_id,
            CardCommand::MarkSold(MarkSold {
                card_id,
                sale_price: attributed_sale_price,
                occurred_at: Utc::now(),
            }),
        )
        .map_err(|e| format!("mark sold failed: {e:?}"))?;

        self.dispatch_card(
            card_id,
            CardCommand::MarkToShip(MarkToShip {
                card_id,
                occurred_at: Utc::now(),
            }),
        )
        .map_err(|e| format!("mark to-ship failed: {e:?}"))?;

        if let Ownership::Consigned { terms, .. } = card.ownership() {
            let payout_due = terms.payout_due(attributed_sale_price, attributed_fees);
            return Ok(Some(PayoutOpened {
                card_id,
                attributed_sale_price,
                payout_due,
            }));
        }

        Ok(None)
    }

    // ── payouts ──────────────────────────────────────────────────────────

    pub fn approve_payout(&self, actor: Actor, card_id: CardId) -> Result<(), DispatchError> {
        self.authorize(actor, "payouts.approve")?;

        self.dispatch_card(
            card_id,
            CardCommand::ApprovePayout(ApprovePayout {
                card_id,
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(%card_id, "payout approved");
        Ok(())
    }

    pub fn mark_payout_paid(
        &self,
        actor: Actor,
        card_id: CardId,
        amount: u64,
        paid_on: DateTime<Utc>,
        reference: &str,
    ) -> Result<(), DispatchError> {
        self.authorize(actor, "payouts.mark_paid")?;

        self.dispatch_card(
            card_id,
            CardCommand::MarkPayoutPaid(MarkPayoutPaid {
                card_id,
                amount,
                paid_on,
                reference: reference.to_string(),
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(%card_id, amount, "payout paid");
        Ok(())
    }

    pub fn return_card_to_consignor(
        &self,
        actor: Actor,
        card_id: CardId,
    ) -> Result<(), DispatchError> {
        self.authorize(actor, "payouts.return")?;

        self.dispatch_card(
            card_id,
            CardCommand::ReturnToConsignor(ReturnToConsignor {
                card_id,
                occurred_at: Utc::now(),
            }),
        )?;

        tracing::info!(%card_id, "card returned to consignor");
        Ok(())
    }

    // ── consignors ───────────────────────────────────────────────────────

    pub fn register_consignor(
        &self,
        actor: Actor,
        name: &str,
        default_terms: ConsignmentTerms,
    ) -> Result<ConsignorId, DispatchError> {
        self.authorize(actor, "consignors.manage")?;

        let id = ConsignorId::new(AggregateId::new());
        let consignor = Consignor::new(id, name, default_terms)?;
        self.consignors.upsert(consignor);

        tracing::info!(consignor_id = %id, name, "consignor registered");
        Ok(id)
    }

    /// Update a consignor's default terms.
    ///
    /// Snapshot semantics: cards that already arrived keep the terms captured
    /// at their arrival; only future arrivals see the new defaults.
    pub fn update_consignor_terms(
        &self,
        actor: Actor,
        consignor_id: ConsignorId,
        terms: ConsignmentTerms,
    ) -> Result<(), DispatchError> {
        self.authorize(actor, "consignors.manage")?;

        let mut consignor = self
            .consignors
            .get(&consignor_id)
            .ok_or(DispatchError::NotFound)?;
        consignor.default_terms = terms;
        self.consignors.upsert(consignor);
        Ok(())
    }

    // ── reads ────────────────────────────────────────────────────────────

    pub fn card(&self, card_id: CardId) -> Result<Card, DispatchError> {
        self.load_card(card_id)
    }

    pub fn card_by_display_id(&self, display_id: &str) -> Result<Card, DispatchError> {
        let entry = self
            .directory
            .by_display_id(display_id)
            .ok_or(DispatchError::NotFound)?;
        self.load_card(entry.card_id)
    }

    pub fn batch(&self, batch_id: BatchId) -> Result<Batch, DispatchError> {
        self.load_batch(batch_id)
    }

    pub fn stream(&self, stream_id: StreamId) -> Result<Stream, DispatchError> {
        self.load_stream(stream_id)
    }

    // ── internals ────────────────────────────────────────────────────────

    fn authorize(&self, actor: Actor, action: &'static str) -> Result<(), DispatchError> {
        let action = Action::new(action);
        if has_permission(actor.role, &action) {
            Ok(())
        } else {
            tracing::debug!(action = action.as_str(), role = actor.role.as_str(), "denied");
            Err(DispatchError::PermissionDenied(
                action.as_str().to_string(),
            ))
        }
    }

    fn resolve_ownership(&self, ownership: &ArrivalOwnership) -> Result<Ownership, DispatchError> {
        match ownership {
            ArrivalOwnership::Owned => Ok(Ownership::Owned),
            ArrivalOwnership::Consigned {
                consignor_id,
                terms_override,
            } => {
                let terms = match terms_override {
                    Some(terms) => *terms,
                    None => {
                        self.consignors
                            .get(consignor_id)
                            .ok_or(DispatchError::NotFound)?
                            .default_terms
                    }
                };
                Ok(Ownership::Consigned {
                    consignor_id: *consignor_id,
                    terms,
                })
            }
        }
    }

    fn dispatch_card(
        &self,
        card_id: CardId,
        command: CardCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        let stored = self.dispatcher.dispatch(
            card_id.0,
            CARD_AGGREGATE_TYPE,
            command,
            |id| Card::empty(CardId::new(id)),
        )?;
        self.project(&stored);
        Ok(stored)
    }

    fn dispatch_batch(
        &self,
        batch_id: BatchId,
        command: BatchCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatcher.dispatch(
            batch_id.0,
            BATCH_AGGREGATE_TYPE,
            command,
            |id| Batch::empty(BatchId::new(id)),
        )
    }

    fn dispatch_stream(
        &self,
        stream_id: StreamId,
        command: StreamCommand,
    ) -> Result<Vec<StoredEvent>, DispatchError> {
        self.dispatcher.dispatch(
            stream_id.0,
            STREAM_AGGREGATE_TYPE,
            command,
            |id| Stream::empty(StreamId::new(id)),
        )
    }

    /// Keep the directory current without waiting on bus consumers. The
    /// projection is idempotent, so the bus-fed copy of the same envelope is
    /// harmless.
    fn project(&self, stored: &[StoredEvent]) {
        for ev in stored {
            if let Err(err) = self.directory.apply_envelope(&ev.to_envelope()) {
                tracing::warn!(error = ?err, "card directory rejected envelope");
            }
        }
    }

    fn load_card(&self, card_id: CardId) -> Result<Card, DispatchError> {
        let card = load_aggregate(&self.store, card_id.0, |id| Card::empty(CardId::new(id)))?;
        if !card.is_created() {
            return Err(DispatchError::NotFound);
        }
        Ok(card)
    }

    fn load_batch(&self, batch_id: BatchId) -> Result<Batch, DispatchError> {
        let batch = load_aggregate(&self.store, batch_id.0, |id| Batch::empty(BatchId::new(id)))?;
        if !batch.is_created() {
            return Err(DispatchError::NotFound);
        }
        Ok(batch)
    }

    fn load_stream(&self, stream_id: StreamId) -> Result<Stream, DispatchError> {
        let stream =
            load_aggregate(&self.store, stream_id.0, |id| Stream::empty(StreamId::new(id)))?;
        if !stream.is_created() {
            return Err(DispatchError::NotFound);
        }
        Ok(stream)
    }
}

fn decode_events<E: serde::de::DeserializeOwned>(
    stored: &[StoredEvent],
) -> Result<Vec<E>, DispatchError> {
    stored
        .iter()
        .map(|s| {
            serde_json::from_value(s.payload.clone())
                .map_err(|e| DispatchError::Deserialize(e.to_string()))
        })
        .collect()
}
