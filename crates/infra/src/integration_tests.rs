//! Integration tests for the full engine pipeline.
//!
//! Tests: Engine op → CommandDispatcher → EventStore → EventBus → Directory
//!
//! Verifies:
//! - Intake idempotency and batch gating
//! - Stream membership, locking permissions, and settlement
//! - Bulk-sale propagation with per-card skip reporting
//! - Consignment payout attribution and lifecycle
//! - Optimistic concurrency conflicts are detected

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serde_json::Value as JsonValue;

    use cardflow_auth::{Actor, Role};
    use cardflow_batches::BatchId;
    use cardflow_cards::{
        Card, CardCommand, CardDetails, CardId, CardStatus, MarkSold, PayoutStatus,
    };
    use cardflow_consignment::ConsignmentTerms;
    use cardflow_core::{AggregateRoot, ExpectedVersion, UserId};
    use cardflow_events::{EventBus, EventEnvelope, InMemoryEventBus};

    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::engine::{ArrivalOwnership, ArrivalSpec, ConsignorDirectory, Engine};
    use crate::event_store::{EventStore, InMemoryEventStore};
    use crate::projections::{CARD_AGGREGATE_TYPE, CardDirectoryEntry, CardDirectoryProjection};
    use crate::read_model::InMemoryReadModelStore;

    type TestStore = Arc<InMemoryEventStore>;
    type TestBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type TestDirectoryStore = Arc<InMemoryReadModelStore<CardId, CardDirectoryEntry>>;
    type TestEngine = Engine<TestStore, TestBus, TestDirectoryStore>;

    struct Harness {
        engine: TestEngine,
        store: TestStore,
        bus: TestBus,
        directory: Arc<CardDirectoryProjection<TestDirectoryStore>>,
        consignors: Arc<ConsignorDirectory>,
    }

    fn setup() -> Harness {
        let store: TestStore = Arc::new(InMemoryEventStore::new());
        let bus: TestBus = Arc::new(InMemoryEventBus::new());
        let directory_store: TestDirectoryStore = Arc::new(InMemoryReadModelStore::new());
        let directory = Arc::new(CardDirectoryProjection::new(directory_store));
        let consignors = Arc::new(ConsignorDirectory::new());

        let engine = Engine::new(
            store.clone(),
            bus.clone(),
            directory.clone(),
            consignors.clone(),
        );

        Harness {
            engine,
            store,
            bus,
            directory,
            consignors,
        }
    }

    fn admin() -> Actor {
        Actor::new(UserId::new(), Role::Admin)
    }

    fn manager() -> Actor {
        Actor::new(UserId::new(), Role::Manager)
    }

    fn member() -> Actor {
        Actor::new(UserId::new(), Role::Member)
    }

    fn owned_spec(display_id: &str, price: u64) -> ArrivalSpec {
        ArrivalSpec {
            display_id: display_id.to_string(),
            details: CardDetails::default(),
            purchase_price: price,
            ownership: ArrivalOwnership::Owned,
        }
    }

    /// Stage+arrive a row and list the resulting card as available.
    fn arrive_available(
        h: &Harness,
        actor: Actor,
        batch_id: BatchId,
        display_id: &str,
        price: u64,
        ownership: ArrivalOwnership,
    ) -> CardId {
        let row_no = h.engine.stage_row(actor, batch_id, display_id).unwrap();
        let arrived = h
            .engine
            .arrive_row(
                actor,
                batch_id,
                row_no,
                &format!("key-{display_id}"),
                ArrivalSpec {
                    display_id: display_id.to_string(),
                    details: CardDetails::default(),
                    purchase_price: price,
                    ownership,
                },
            )
            .unwrap();
        h.engine
            .mark_card_available(actor, arrived.card_id)
            .unwrap();
        arrived.card_id
    }

    #[test]
    fn arrival_is_idempotent_and_finish_is_gated_on_error_rows() {
        let h = setup();
        let actor = member();

        let batch_id = h.engine.open_batch(actor, "B1").unwrap();
        let row1 = h.engine.stage_row(actor, batch_id, "PSA 9 rookie").unwrap();
        let row2 = h.engine.stage_row(actor, batch_id, "raw auto").unwrap();
        h.engine
            .flag_row(actor, batch_id, row2, "missing purchase price")
            .unwrap();

        let first = h
            .engine
            .arrive_row(actor, batch_id, row1, "k1", owned_spec("CF-1001", 12_00))
            .unwrap();
        assert!(!first.replayed);

        // Retry with the same key: exactly one card, same id.
        let second = h
            .engine
            .arrive_row(actor, batch_id, row1, "k1", owned_spec("CF-1001", 12_00))
            .unwrap();
        assert!(second.replayed);
        assert_eq!(first.card_id, second.card_id);
        assert_eq!(h.directory.list().len(), 1);

        // Finish is rejected while row2's error is unresolved.
        let err = h.engine.finish_batch(actor, batch_id).unwrap_err();
        assert!(matches!(err, DispatchError::PreconditionFailed(_)));

        h.engine.resolve_row(actor, batch_id, row2).unwrap();
        h.engine.finish_batch(actor, batch_id).unwrap();

        // Staged, error-free rows may still arrive while locked.
        let arrived = h
            .engine
            .arrive_row(actor, batch_id, row2, "k2", owned_spec("CF-1002", 8_00))
            .unwrap();
        assert!(!arrived.replayed);
    }

    #[test]
    fn re_arrival_under_a_different_key_is_a_conflict() {
        let h = setup();
        let actor = member();

        let batch_id = h.engine.open_batch(actor, "B2").unwrap();
        let row = h.engine.stage_row(actor, batch_id, "row").unwrap();
        h.engine
            .arrive_row(actor, batch_id, row, "k1", owned_spec("CF-2001", 5_00))
            .unwrap();

        let err = h
            .engine
            .arrive_row(actor, batch_id, row, "k9", owned_spec("CF-2001", 5_00))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));
    }

    #[test]
    fn display_ids_are_globally_unique() {
        let h = setup();
        let actor = member();

        let batch_id = h.engine.open_batch(actor, "B3").unwrap();
        let row1 = h.engine.stage_row(actor, batch_id, "a").unwrap();
        let row2 = h.engine.stage_row(actor, batch_id, "b").unwrap();

        h.engine
            .arrive_row(actor, batch_id, row1, "k1", owned_spec("CF-3001", 1_00))
            .unwrap();
        let err = h
            .engine
            .arrive_row(actor, batch_id, row2, "k2", owned_spec("CF-3001", 2_00))
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));
    }

    #[test]
    fn closed_batches_reject_arrival_terminally() {
        let h = setup();
        let actor = member();

        let batch_id = h.engine.open_batch(actor, "B4").unwrap();
        let row = h.engine.stage_row(actor, batch_id, "straggler").unwrap();
        h.engine.finish_batch(actor, batch_id).unwrap();

        // Closing takes an elevated role.
        let err = h.engine.close_batch(actor, batch_id).unwrap_err();
        assert!(matches!(err, DispatchError::PermissionDenied(_)));
        h.engine.close_batch(manager(), batch_id).unwrap();

        let err = h
            .engine
            .arrive_row(actor, batch_id, row, "k1", owned_spec("CF-4001", 1_00))
            .unwrap_err();
        assert!(matches!(err, DispatchError::AlreadyTerminal(_)));
    }

    #[test]
    fn scan_workflow_keeps_stream_totals_derived() {
        let h = setup();
        let actor = member();

        let batch_id = h.engine.open_batch(actor, "pickups").unwrap();
        let card_a = arrive_available(&h, actor, batch_id, "CF-5001", 10_00, ArrivalOwnership::Owned);
        let _card_b = arrive_available(&h, actor, batch_id, "CF-5002", 25_00, ArrivalOwnership::Owned);

        let stream_id = h
            .engine
            .open_stream(actor, "Friday breaks", "dan", None)
            .unwrap();

        h.engine
            .add_card_to_stream(actor, stream_id, "CF-5001")
            .unwrap();
        h.engine
            .add_card_to_stream(actor, stream_id, "CF-5002")
            .unwrap();

        let stream = h.engine.stream(stream_id).unwrap();
        assert_eq!(stream.total_items(), 2);
        assert_eq!(stream.total_cost(), 35_00);

        let card = h.engine.card_by_display_id("CF-5001").unwrap();
        assert_eq!(card.status(), CardStatus::AllocatedToStream);

        h.engine
            .remove_card_from_stream(actor, stream_id, card_a)
            .unwrap();

        let stream = h.engine.stream(stream_id).unwrap();
        assert_eq!(stream.total_items(), 1);
        assert_eq!(stream.total_cost(), 25_00);
        assert_eq!(
            h.engine.card(card_a).unwrap().status(),
            CardStatus::Available
        );
    }

    #[test]
    fn a_card_is_a_member_of_at_most_one_stream() {
        let h = setup();
        let actor = member();

        let batch_id = h.engine.open_batch(actor, "pickups").unwrap();
        arrive_available(&h, actor, batch_id, "CF-6001", 10_00, ArrivalOwnership::Owned);

        let stream_a = h.engine.open_stream(actor, "A", "dan", None).unwrap();
        let stream_b = h.engine.open_stream(actor, "B", "dan", None).unwrap();

        h.engine
            .add_card_to_stream(actor, stream_a, "CF-6001")
            .unwrap();

        let err = h
            .engine
            .add_card_to_stream(actor, stream_b, "CF-6001")
            .unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));

        assert_eq!(h.engine.stream(stream_b).unwrap().total_items(), 0);
        assert_eq!(h.engine.stream(stream_a).unwrap().total_items(), 1);
    }

    #[test]
    fn stream_locking_honors_ownership_and_elevated_roles() {
        let h = setup();
        let owner = member();
        let other_member = member();

        let stream_id = h
            .engine
            .open_stream(owner, "owned stream", "dan", None)
            .unwrap();

        // A different member cannot lock someone else's stream.
        let err = h.engine.lock_stream(other_member, stream_id).unwrap_err();
        assert!(matches!(err, DispatchError::PermissionDenied(_)));

        // A manager can.
        h.engine.lock_stream(manager(), stream_id).unwrap();

        // The owning member can lock their own stream.
        let own_stream = h.engine.open_stream(owner, "mine", "dan", None).unwrap();
        h.engine.lock_stream(owner, own_stream).unwrap();

        // Locked membership is frozen for everyone.
        let batch_id = h.engine.open_batch(owner, "late adds").unwrap();
        arrive_available(&h, owner, batch_id, "CF-7001", 5_00, ArrivalOwnership::Owned);
        let err = h
            .engine
            .add_card_to_stream(admin(), stream_id, "CF-7001")
            .unwrap_err();
        assert!(matches!(err, DispatchError::PreconditionFailed(_)));
    }

    #[test]
    fn bulk_finalize_advances_members_and_reports_skips() {
        let h = setup();
        let actor = member();

        let batch_id = h.engine.open_batch(actor, "bulk lot").unwrap();
        let card_1 = arrive_available(&h, actor, batch_id, "CF-8001", 10_00, ArrivalOwnership::Owned);
        let card_2 = arrive_available(&h, actor, batch_id, "CF-8002", 20_00, ArrivalOwnership::Owned);
        let card_3 = arrive_available(&h, actor, batch_id, "CF-8003", 30_00, ArrivalOwnership::Owned);

        let stream_id = h.engine.open_stream(actor, "bulk", "dan", None).unwrap();
        for display in ["CF-8001", "CF-8002", "CF-8003"] {
            h.engine
                .add_card_to_stream(actor, stream_id, display)
                .unwrap();
        }
        h.engine.lock_stream(manager(), stream_id).unwrap();

        // Advance one member out-of-band so finalize has to skip it.
        let side = CommandDispatcher::new(h.store.clone(), h.bus.clone());
        side.dispatch(
            card_3.0,
            CARD_AGGREGATE_TYPE,
            CardCommand::MarkSold(MarkSold {
                card_id: card_3,
                sale_price: 99_00,
                occurred_at: Utc::now(),
            }),
            |id| Card::empty(CardId::new(id)),
        )
        .unwrap();

        let outcome = h
            .engine
            .finalize_stream(manager(), stream_id, 120_00, Some(6_00), true)
            .unwrap();

        assert!(!outcome.replayed);
        assert_eq!(outcome.settlement.total_cost, 60_00);
        assert_eq!(outcome.settlement.profit, 120_00 - 6_00 - 60_00);
        assert_eq!(outcome.skipped.len(), 1);
        assert_eq!(outcome.skipped[0].card_id, card_3);

        // The other two walked allocated -> sold -> to_ship.
        assert_eq!(h.engine.card(card_1).unwrap().status(), CardStatus::ToShip);
        assert_eq!(h.engine.card(card_2).unwrap().status(), CardStatus::ToShip);
        assert_eq!(h.engine.card(card_3).unwrap().status(), CardStatus::Sold);
    }

    #[test]
    fn bulk_finalize_with_all_members_allocated_skips_nothing() {
        let h = setup();
        let actor = member();

        let batch_id = h.engine.open_batch(actor, "clean lot").unwrap();
        let cards: Vec<CardId> = ["CF-9001", "CF-9002", "CF-9003"]
            .iter()
            .map(|d| arrive_available(&h, actor, batch_id, d, 10_00, ArrivalOwnership::Owned))
            .collect();

        let stream_id = h.engine.open_stream(actor, "clean", "dan", None).unwrap();
        for display in ["CF-9001", "CF-9002", "CF-9003"] {
            h.engine
                .add_card_to_stream(actor, stream_id, display)
                .unwrap();
        }
        h.engine.lock_stream(manager(), stream_id).unwrap();

        let outcome = h
            .engine
            .finalize_stream(manager(), stream_id, 90_00, None, true)
            .unwrap();

        assert!(outcome.skipped.is_empty());
        assert_eq!(outcome.settlement.fees, 0);
        for card_id in cards {
            assert_eq!(h.engine.card(card_id).unwrap().status(), CardStatus::ToShip);
        }
    }

    #[test]
    fn finalize_is_idempotent_and_figures_are_immutable() {
        let h = setup();
        let actor = member();

        let batch_id = h.engine.open_batch(actor, "lot").unwrap();
        arrive_available(&h, actor, batch_id, "CF-A001", 40_00, ArrivalOwnership::Owned);

        let stream_id = h.engine.open_stream(actor, "s", "dan", None).unwrap();
        h.engine
            .add_card_to_stream(actor, stream_id, "CF-A001")
            .unwrap();
        h.engine.lock_stream(manager(), stream_id).unwrap();

        let first = h
            .engine
            .finalize_stream(manager(), stream_id, 100_00, Some(10_00), false)
            .unwrap();
        assert!(!first.replayed);

        // Same figures: replay returns the recorded settlement.
        let replay = h
            .engine
            .finalize_stream(manager(), stream_id, 100_00, Some(10_00), false)
            .unwrap();
        assert!(replay.replayed);
        assert_eq!(replay.settlement, first.settlement);

        // Different figures: rejected, original numbers preserved.
        let err = h
            .engine
            .finalize_stream(manager(), stream_id, 999_00, Some(10_00), false)
            .unwrap_err();
        assert!(matches!(err, DispatchError::AlreadyTerminal(_)));
        assert_eq!(
            h.engine.stream(stream_id).unwrap().settlement().unwrap().gross_sales,
            100_00
        );

        // A member may not finalize at all.
        let err = h
            .engine
            .finalize_stream(actor, stream_id, 100_00, Some(10_00), false)
            .unwrap_err();
        assert!(matches!(err, DispatchError::PermissionDenied(_)));
    }

    #[test]
    fn consigned_bulk_sale_attributes_pro_rata_and_opens_payouts() {
        let h = setup();
        let actor = member();
        let boss = manager();

        let terms = ConsignmentTerms::new(75, 0, true, 14).unwrap();
        let consignor_id = h
            .engine
            .register_consignor(boss, "Vintage Vault", terms)
            .unwrap();

        let batch_id = h.engine.open_batch(actor, "consigned lot").unwrap();
        let card_big = arrive_available(
            &h,
            actor,
            batch_id,
            "CF-B001",
            75_00,
            ArrivalOwnership::Consigned {
                consignor_id,
                terms_override: None,
            },
        );
        let card_small = arrive_available(
            &h,
            actor,
            batch_id,
            "CF-B002",
            25_00,
            ArrivalOwnership::Consigned {
                consignor_id,
                terms_override: None,
            },
        );

        let stream_id = h.engine.open_stream(actor, "consigned", "dan", None).unwrap();
        h.engine.add_card_to_stream(actor, stream_id, "CF-B001").unwrap();
        h.engine.add_card_to_stream(actor, stream_id, "CF-B002").unwrap();
        h.engine.lock_stream(boss, stream_id).unwrap();

        let outcome = h
            .engine
            .finalize_stream(boss, stream_id, 200_00, Some(10_00), true)
            .unwrap();

        // Pro-rata by purchase price: 75% / 25% of gross and fees.
        assert_eq!(outcome.payouts_opened.len(), 2);
        let big = outcome
            .payouts_opened
            .iter()
            .find(|p| p.card_id == card_big)
            .unwrap();
        let small = outcome
            .payouts_opened
            .iter()
            .find(|p| p.card_id == card_small)
            .unwrap();

        assert_eq!(big.attributed_sale_price, 150_00);
        assert_eq!(big.payout_due, 150_00 * 75 / 100 - 7_50);
        assert_eq!(small.attributed_sale_price, 50_00);
        assert_eq!(small.payout_due, 50_00 * 75 / 100 - 2_50);

        // Sale opened the payout machine on both cards.
        assert_eq!(
            h.engine.card(card_big).unwrap().payout_status(),
            PayoutStatus::Pending
        );
    }

    #[test]
    fn payout_lifecycle_requires_elevated_roles() {
        let h = setup();
        let actor = member();
        let boss = manager();

        let terms = ConsignmentTerms::new(70, 50_00, false, 14).unwrap();
        let consignor_id = h.engine.register_consignor(boss, "Attic Finds", terms).unwrap();

        let batch_id = h.engine.open_batch(actor, "lot").unwrap();
        let card_id = arrive_available(
            &h,
            actor,
            batch_id,
            "CF-C001",
            10_00,
            ArrivalOwnership::Consigned {
                consignor_id,
                terms_override: None,
            },
        );

        let stream_id = h.engine.open_stream(actor, "s", "dan", None).unwrap();
        h.engine.add_card_to_stream(actor, stream_id, "CF-C001").unwrap();
        h.engine.lock_stream(boss, stream_id).unwrap();
        h.engine
            .finalize_stream(boss, stream_id, 40_00, None, true)
            .unwrap();

        // The owning member role can never approve or pay.
        let err = h.engine.approve_payout(actor, card_id).unwrap_err();
        assert!(matches!(err, DispatchError::PermissionDenied(_)));

        h.engine.approve_payout(boss, card_id).unwrap();

        let err = h
            .engine
            .mark_payout_paid(boss, card_id, 50_00, Utc::now(), "  ")
            .unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        h.engine
            .mark_payout_paid(boss, card_id, 50_00, Utc::now(), "wire-2001")
            .unwrap();

        let card = h.engine.card(card_id).unwrap();
        assert_eq!(card.payout_status(), PayoutStatus::Paid);
        assert_eq!(card.payout_amount(), Some(50_00));
        assert_eq!(card.payout_reference(), Some("wire-2001"));
    }

    #[test]
    fn consignor_default_terms_are_snapshot_at_arrival() {
        let h = setup();
        let actor = member();
        let boss = manager();

        let original = ConsignmentTerms::new(50, 0, false, 7).unwrap();
        let consignor_id = h.engine.register_consignor(boss, "Earl", original).unwrap();

        let batch_id = h.engine.open_batch(actor, "lot").unwrap();
        let card_id = arrive_available(
            &h,
            actor,
            batch_id,
            "CF-D001",
            10_00,
            ArrivalOwnership::Consigned {
                consignor_id,
                terms_override: None,
            },
        );

        let updated = ConsignmentTerms::new(90, 5_00, true, 30).unwrap();
        h.engine
            .update_consignor_terms(boss, consignor_id, updated)
            .unwrap();

        let card = h.engine.card(card_id).unwrap();
        match card.ownership() {
            cardflow_cards::Ownership::Consigned { terms, .. } => {
                assert_eq!(*terms, original);
            }
            other => panic!("expected consigned ownership, got {other:?}"),
        }
    }

    #[test]
    fn stale_appends_are_concurrency_conflicts() {
        let h = setup();
        let actor = member();

        let batch_id = h.engine.open_batch(actor, "race").unwrap();
        let row = h.engine.stage_row(actor, batch_id, "card").unwrap();
        let arrived = h
            .engine
            .arrive_row(actor, batch_id, row, "k1", owned_spec("CF-E001", 5_00))
            .unwrap();
        h.engine.mark_card_available(actor, arrived.card_id).unwrap();

        // A writer holding a stale version loses the compare-and-swap.
        let card = h.engine.card(arrived.card_id).unwrap();
        let stale = ExpectedVersion::Exact(card.version().saturating_sub(1));
        let event = crate::event_store::UncommittedEvent::from_typed(
            arrived.card_id.0,
            CARD_AGGREGATE_TYPE,
            uuid::Uuid::now_v7(),
            &cardflow_cards::CardEvent::CardListed(cardflow_cards::CardListed {
                card_id: arrived.card_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();

        let err = h.store.append(vec![event], stale).unwrap_err();
        assert!(matches!(
            err,
            crate::event_store::EventStoreError::Concurrency(_)
        ));
    }

    #[test]
    fn directory_is_idempotent_and_rebuildable() {
        let h = setup();
        let actor = member();

        let batch_id = h.engine.open_batch(actor, "lot").unwrap();
        let card_id = arrive_available(&h, actor, batch_id, "CF-F001", 5_00, ArrivalOwnership::Owned);

        // Replaying already-applied envelopes is a no-op.
        let events = h.store.load_stream(card_id.0).unwrap();
        for ev in &events {
            h.directory.apply_envelope(&ev.to_envelope()).unwrap();
        }
        let entry = h.directory.by_display_id("CF-F001").unwrap();
        assert_eq!(entry.status, CardStatus::Available);

        // Rebuild from scratch out of the store.
        h.directory
            .rebuild_from_scratch(h.store.all_events().iter().map(|e| e.to_envelope()))
            .unwrap();
        let rebuilt = h.directory.by_display_id("CF-F001").unwrap();
        assert_eq!(rebuilt, entry);
    }

    #[test]
    fn admin_delete_removes_references_and_is_gated() {
        let h = setup();
        let actor = member();

        let batch_id = h.engine.open_batch(actor, "lot").unwrap();
        let card_id = arrive_available(&h, actor, batch_id, "CF-G001", 5_00, ArrivalOwnership::Owned);

        let stream_id = h.engine.open_stream(actor, "s", "dan", None).unwrap();
        h.engine.add_card_to_stream(actor, stream_id, "CF-G001").unwrap();

        // Deleting an active stream member is rejected, even for admin.
        let err = h.engine.delete_card(admin(), card_id).unwrap_err();
        assert!(matches!(err, DispatchError::PreconditionFailed(_)));

        h.engine
            .remove_card_from_stream(actor, stream_id, card_id)
            .unwrap();

        // Only admin may delete.
        let err = h.engine.delete_card(manager(), card_id).unwrap_err();
        assert!(matches!(err, DispatchError::PermissionDenied(_)));

        h.engine.delete_card(admin(), card_id).unwrap();
        assert!(h.directory.by_display_id("CF-G001").is_none());

        let err = h.engine.mark_card_available(admin(), card_id).unwrap_err();
        assert!(matches!(err, DispatchError::AlreadyTerminal(_)));
    }

    #[test]
    fn shipping_advances_sequentially_after_bulk_finalize() {
        let h = setup();
        let actor = member();

        let batch_id = h.engine.open_batch(actor, "lot").unwrap();
        let card_id = arrive_available(&h, actor, batch_id, "CF-H001", 5_00, ArrivalOwnership::Owned);

        let stream_id = h.engine.open_stream(actor, "s", "dan", None).unwrap();
        h.engine.add_card_to_stream(actor, stream_id, "CF-H001").unwrap();
        h.engine.lock_stream(manager(), stream_id).unwrap();
        h.engine
            .finalize_stream(manager(), stream_id, 20_00, None, true)
            .unwrap();

        assert_eq!(h.engine.card(card_id).unwrap().status(), CardStatus::ToShip);

        // Skipping packed is rejected.
        let err = h.engine.mark_card_shipped(actor, card_id).unwrap_err();
        assert!(matches!(err, DispatchError::InvalidTransition { .. }));

        h.engine.mark_card_packed(actor, card_id).unwrap();
        h.engine.mark_card_shipped(actor, card_id).unwrap();
        assert_eq!(h.engine.card(card_id).unwrap().status(), CardStatus::Shipped);
    }

    #[test]
    fn committed_events_are_published_to_the_bus() {
        let h = setup();
        let actor = member();
        let subscription = h.bus.subscribe();

        let batch_id = h.engine.open_batch(actor, "published").unwrap();
        let row = h.engine.stage_row(actor, batch_id, "card").unwrap();
        h.engine
            .arrive_row(actor, batch_id, row, "k1", owned_spec("CF-I001", 5_00))
            .unwrap();

        let mut aggregate_types = Vec::new();
        while let Ok(envelope) = subscription.try_recv() {
            aggregate_types.push(envelope.aggregate_type().to_string());
        }
        assert!(aggregate_types.iter().any(|t| t == "batches.batch"));
        assert!(aggregate_types.iter().any(|t| t == CARD_AGGREGATE_TYPE));
    }

    #[test]
    fn consignor_registry_lists_registrations() {
        let h = setup();
        let boss = manager();
        let terms = ConsignmentTerms::new(60, 0, false, 14).unwrap();
        h.engine.register_consignor(boss, "Earl", terms).unwrap();
        assert_eq!(h.consignors.list().len(), 1);
    }
}
