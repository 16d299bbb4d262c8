use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cardflow_cards::CardId;
use cardflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult, UserId};
use cardflow_events::Event;

/// Stream identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StreamId(pub AggregateId);

impl StreamId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for StreamId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Stream status lifecycle. Strictly forward, no reversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Draft,
    Locked,
    Finalized,
}

impl StreamStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamStatus::Draft => "draft",
            StreamStatus::Locked => "locked",
            StreamStatus::Finalized => "finalized",
        }
    }
}

/// Stream member. Insertion order is display order.
///
/// The purchase price is captured at add time so the stream can derive its
/// cost figures without reaching into the card aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub card_id: CardId,
    pub purchase_price: u64,
}

/// Settlement figures, stamped exactly once at finalize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Gross sales in cents; always positive.
    pub gross_sales: u64,
    /// Platform fees in cents.
    pub fees: u64,
    /// Sum of member purchase prices at finalize time.
    pub total_cost: u64,
    /// `gross_sales - fees - total_cost`; may be negative.
    pub profit: i64,
    pub bulk_sale: bool,
    pub finalized_at: DateTime<Utc>,
}

impl Settlement {
    /// A loss is a warning condition for the caller, not an error.
    pub fn is_loss(&self) -> bool {
        self.profit < 0
    }
}

/// Aggregate root: Stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    id: StreamId,
    title: String,
    streamer: String,
    owner_user_id: Option<UserId>,
    scheduled_for: Option<DateTime<Utc>>,
    status: StreamStatus,
    members: Vec<Member>,
    settlement: Option<Settlement>,
    version: u64,
    created: bool,
}

impl Stream {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: StreamId) -> Self {
        Self {
            id,
            title: String::new(),
            streamer: String::new(),
            owner_user_id: None,
            scheduled_for: None,
            status: StreamStatus::Draft,
            members: Vec::new(),
            settlement: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> StreamId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn streamer(&self) -> &str {
        &self.streamer
    }

    pub fn owner_user_id(&self) -> Option<UserId> {
        self.owner_user_id
    }

    pub fn scheduled_for(&self) -> Option<DateTime<Utc>> {
        self.scheduled_for
    }

    pub fn status(&self) -> StreamStatus {
        self.status
    }

    /// Ordered member list (insertion order = display order).
    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn is_member(&self, card_id: CardId) -> bool {
        self.members.iter().any(|m| m.card_id == card_id)
    }

    /// Derived: always the count of current members.
    pub fn total_items(&self) -> usize {
        self.members.len()
    }

    /// Derived: always the sum of member purchase prices.
    pub fn total_cost(&self) -> u64 {
        self.members.iter().map(|m| m.purchase_price).sum()
    }

    pub fn settlement(&self) -> Option<&Settlement> {
        self.settlement.as_ref()
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Stream {
    type Id = StreamId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenStream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenStream {
    pub stream_id: StreamId,
    pub title: String,
    pub streamer: String,
    pub owner_user_id: UserId,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItem (draft only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub stream_id: StreamId,
    pub card_id: CardId,
    pub purchase_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveItem (draft only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub stream_id: StreamId,
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: LockStream (freeze membership).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStream {
    pub stream_id: StreamId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FinalizeStream (one-shot settlement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizeStream {
    pub stream_id: StreamId,
    pub gross_sales: u64,
    /// Defaults to 0 when the caller omits it.
    pub fees: u64,
    pub bulk_sale: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamCommand {
    OpenStream(OpenStream),
    AddItem(AddItem),
    RemoveItem(RemoveItem),
    LockStream(LockStream),
    FinalizeStream(FinalizeStream),
}

/// Event: StreamOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamOpened {
    pub stream_id: StreamId,
    pub title: String,
    pub streamer: String,
    pub owner_user_id: UserId,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub stream_id: StreamId,
    pub card_id: CardId,
    pub purchase_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub stream_id: StreamId,
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StreamLocked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamLocked {
    pub stream_id: StreamId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StreamFinalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFinalized {
    pub stream_id: StreamId,
    pub gross_sales: u64,
    pub fees: u64,
    pub total_cost: u64,
    pub profit: i64,
    pub bulk_sale: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamEvent {
    StreamOpened(StreamOpened),
    ItemAdded(ItemAdded),
    ItemRemoved(ItemRemoved),
    StreamLocked(StreamLocked),
    StreamFinalized(StreamFinalized),
}

impl Event for StreamEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StreamEvent::StreamOpened(_) => "streams.stream.opened",
            StreamEvent::ItemAdded(_) => "streams.stream.item_added",
            StreamEvent::ItemRemoved(_) => "streams.stream.item_removed",
            StreamEvent::StreamLocked(_) => "streams.stream.locked",
            StreamEvent::StreamFinalized(_) => "streams.stream.finalized",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StreamEvent::StreamOpened(e) => e.occurred_at,
            StreamEvent::ItemAdded(e) => e.occurred_at,
            StreamEvent::ItemRemoved(e) => e.occurred_at,
            StreamEvent::StreamLocked(e) => e.occurred_at,
            StreamEvent::StreamFinalized(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Stream {
    type Command = StreamCommand;
    type Event = StreamEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StreamEvent::StreamOpened(e) => {
                self.id = e.stream_id;
                self.title = e.title.clone();
                self.streamer = e.streamer.clone();
                self.owner_user_id = Some(e.owner_user_id);
                self.scheduled_for = e.scheduled_for;
                self.status = StreamStatus::Draft;
                self.members.clear();
                self.created = true;
            }
            StreamEvent::ItemAdded(e) => {
                self.members.push(Member {
                    card_id: e.card_id,
                    purchase_price: e.purchase_price,
                });
            }
            StreamEvent::ItemRemoved(e) => {
                self.members.retain(|m| m.card_id != e.card_id);
            }
            StreamEvent::StreamLocked(_) => {
                self.status = StreamStatus::Locked;
            }
            StreamEvent::StreamFinalized(e) => {
                self.status = StreamStatus::Finalized;
                self.settlement = Some(Settlement {
                    gross_sales: e.gross_sales,
                    fees: e.fees,
                    total_cost: e.total_cost,
                    profit: e.profit,
                    bulk_sale: e.bulk_sale,
                    finalized_at: e.occurred_at,
                });
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StreamCommand::OpenStream(cmd) => self.handle_open(cmd),
            StreamCommand::AddItem(cmd) => self.handle_add_item(cmd),
            StreamCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            StreamCommand::LockStream(cmd) => self.handle_lock(cmd),
            StreamCommand::FinalizeStream(cmd) => self.handle_finalize(cmd),
        }
    }
}

impl Stream {
    fn ensure_stream_id(&self, stream_id: StreamId) -> DomainResult<()> {
        if self.id != stream_id {
            return Err(DomainError::validation("stream_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self, stream_id: StreamId) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_stream_id(stream_id)
    }

    /// Membership edits only while drafting; finalized is a hard stop.
    fn ensure_draft(&self) -> DomainResult<()> {
        match self.status {
            StreamStatus::Draft => Ok(()),
            StreamStatus::Locked => Err(DomainError::precondition(
                "stream is locked; membership is frozen",
            )),
            StreamStatus::Finalized => Err(DomainError::already_terminal("stream is finalized")),
        }
    }

    fn handle_open(&self, cmd: &OpenStream) -> DomainResult<Vec<StreamEvent>> {
        if self.created {
            return Err(DomainError::conflict("stream already exists"));
        }
        if cmd.title.trim().is_empty() {
            return Err(DomainError::validation("stream title cannot be empty"));
        }

        Ok(vec![StreamEvent::StreamOpened(StreamOpened {
            stream_id: cmd.stream_id,
            title: cmd.title.clone(),
            streamer: cmd.streamer.clone(),
            owner_user_id: cmd.owner_user_id,
            scheduled_for: cmd.scheduled_for,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> DomainResult<Vec<StreamEvent>> {
        self.ensure_exists(cmd.stream_id)?;
        self.ensure_draft()?;

        if self.is_member(cmd.card_id) {
            return Err(DomainError::conflict("card is already a member"));
        }

        Ok(vec![StreamEvent::ItemAdded(ItemAdded {
            stream_id: cmd.stream_id,
            card_id: cmd.card_id,
            purchase_price: cmd.purchase_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveItem) -> DomainResult<Vec<StreamEvent>> {
        self.ensure_exists(cmd.stream_id)?;
        self.ensure_draft()?;

        if !self.is_member(cmd.card_id) {
            return Err(DomainError::not_found());
        }

        Ok(vec![StreamEvent::ItemRemoved(ItemRemoved {
            stream_id: cmd.stream_id,
            card_id: cmd.card_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_lock(&self, cmd: &LockStream) -> DomainResult<Vec<StreamEvent>> {
        self.ensure_exists(cmd.stream_id)?;

        match self.status {
            StreamStatus::Draft => {}
            StreamStatus::Locked => {
                return Err(DomainError::invalid_transition("locked", "locked"));
            }
            StreamStatus::Finalized => {
                return Err(DomainError::already_terminal("stream is finalized"));
            }
        }

        Ok(vec![StreamEvent::StreamLocked(StreamLocked {
            stream_id: cmd.stream_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_finalize(&self, cmd: &FinalizeStream) -> DomainResult<Vec<StreamEvent>> {
        self.ensure_exists(cmd.stream_id)?;

        match self.status {
            StreamStatus::Locked => {}
            StreamStatus::Draft => {
                return Err(DomainError::invalid_transition("draft", "finalized"));
            }
            StreamStatus::Finalized => {
                // Idempotent retry: identical figures replay as a no-op; any
                // attempt to change the recorded settlement is rejected.
                return match self.settlement.as_ref() {
                    Some(recorded)
                        if recorded.gross_sales == cmd.gross_sales
                            && recorded.fees == cmd.fees
                            && recorded.bulk_sale == cmd.bulk_sale =>
                    {
                        Ok(vec![])
                    }
                    _ => Err(DomainError::already_terminal(
                        "settlement already recorded with different figures",
                    )),
                };
            }
        }

        if cmd.gross_sales == 0 {
            return Err(DomainError::precondition("gross_sales must be positive"));
        }

        let total_cost = self.total_cost();
        let profit = cmd.gross_sales as i64 - cmd.fees as i64 - total_cost as i64;

        Ok(vec![StreamEvent::StreamFinalized(StreamFinalized {
            stream_id: cmd.stream_id,
            gross_sales: cmd.gross_sales,
            fees: cmd.fees,
            total_cost,
            profit,
            bulk_sale: cmd.bulk_sale,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardflow_events::execute;

    fn test_stream_id() -> StreamId {
        StreamId::new(AggregateId::new())
    }

    fn test_card_id() -> CardId {
        CardId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn draft_stream() -> Stream {
        let id = test_stream_id();
        let mut stream = Stream::empty(id);
        execute(
            &mut stream,
            &StreamCommand::OpenStream(OpenStream {
                stream_id: id,
                title: "Friday night breaks".to_string(),
                streamer: "dan".to_string(),
                owner_user_id: UserId::new(),
                scheduled_for: None,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        stream
    }

    fn add(stream: &mut Stream, card_id: CardId, price: u64) {
        execute(
            stream,
            &StreamCommand::AddItem(AddItem {
                stream_id: stream.id_typed(),
                card_id,
                purchase_price: price,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
    }

    fn lock(stream: &mut Stream) {
        execute(
            stream,
            &StreamCommand::LockStream(LockStream {
                stream_id: stream.id_typed(),
                occurred_at: test_time(),
            }),
        )
        .unwrap();
    }

    #[test]
    fn totals_are_derived_from_membership() {
        let mut stream = draft_stream();
        let a = test_card_id();
        let b = test_card_id();
        add(&mut stream, a, 10_00);
        add(&mut stream, b, 25_00);

        assert_eq!(stream.total_items(), 2);
        assert_eq!(stream.total_cost(), 35_00);

        let stream_id = stream.id_typed();
        execute(
            &mut stream,
            &StreamCommand::RemoveItem(RemoveItem {
                stream_id,
                card_id: a,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        assert_eq!(stream.total_items(), 1);
        assert_eq!(stream.total_cost(), 25_00);
        assert_eq!(stream.members()[0].card_id, b);
    }

    #[test]
    fn members_keep_insertion_order() {
        let mut stream = draft_stream();
        let ids: Vec<CardId> = (0..4).map(|_| test_card_id()).collect();
        for id in &ids {
            add(&mut stream, *id, 1_00);
        }
        let order: Vec<CardId> = stream.members().iter().map(|m| m.card_id).collect();
        assert_eq!(order, ids);
    }

    #[test]
    fn duplicate_member_is_a_conflict() {
        let mut stream = draft_stream();
        let card = test_card_id();
        add(&mut stream, card, 10_00);

        let err = stream
            .handle(&StreamCommand::AddItem(AddItem {
                stream_id: stream.id_typed(),
                card_id: card,
                purchase_price: 10_00,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn membership_is_frozen_after_lock() {
        let mut stream = draft_stream();
        add(&mut stream, test_card_id(), 10_00);
        lock(&mut stream);

        let err = stream
            .handle(&StreamCommand::AddItem(AddItem {
                stream_id: stream.id_typed(),
                card_id: test_card_id(),
                purchase_price: 5_00,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::PreconditionFailed(_)));

        let err = stream
            .handle(&StreamCommand::RemoveItem(RemoveItem {
                stream_id: stream.id_typed(),
                card_id: stream.members()[0].card_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::PreconditionFailed(_)));
    }

    #[test]
    fn finalize_stamps_settlement_with_exact_profit() {
        let mut stream = draft_stream();
        add(&mut stream, test_card_id(), 40_00);
        add(&mut stream, test_card_id(), 20_00);
        lock(&mut stream);

        let stream_id = stream.id_typed();
        execute(
            &mut stream,
            &StreamCommand::FinalizeStream(FinalizeStream {
                stream_id,
                gross_sales: 100_00,
                fees: 10_00,
                bulk_sale: false,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let settlement = stream.settlement().unwrap();
        assert_eq!(stream.status(), StreamStatus::Finalized);
        assert_eq!(settlement.gross_sales, 100_00);
        assert_eq!(settlement.fees, 10_00);
        assert_eq!(settlement.total_cost, 60_00);
        assert_eq!(settlement.profit, 30_00);
        assert!(!settlement.is_loss());
    }

    #[test]
    fn negative_profit_is_recorded_not_rejected() {
        let mut stream = draft_stream();
        add(&mut stream, test_card_id(), 90_00);
        lock(&mut stream);

        let stream_id = stream.id_typed();
        execute(
            &mut stream,
            &StreamCommand::FinalizeStream(FinalizeStream {
                stream_id,
                gross_sales: 50_00,
                fees: 5_00,
                bulk_sale: false,
                occurred_at: test_time(),
            }),
        )
        .unwrap();

        let settlement = stream.settlement().unwrap();
        assert_eq!(settlement.profit, -45_00);
        assert!(settlement.is_loss());
    }

    #[test]
    fn finalize_requires_positive_gross_sales() {
        let mut stream = draft_stream();
        lock(&mut stream);

        let err = stream
            .handle(&StreamCommand::FinalizeStream(FinalizeStream {
                stream_id: stream.id_typed(),
                gross_sales: 0,
                fees: 0,
                bulk_sale: false,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::PreconditionFailed(_)));
    }

    #[test]
    fn finalize_from_draft_is_an_invalid_transition() {
        let stream = draft_stream();
        let err = stream
            .handle(&StreamCommand::FinalizeStream(FinalizeStream {
                stream_id: stream.id_typed(),
                gross_sales: 10_00,
                fees: 0,
                bulk_sale: false,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        match err {
            DomainError::InvalidTransition { current, attempted } => {
                assert_eq!(current, "draft");
                assert_eq!(attempted, "finalized");
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
    }

    #[test]
    fn finalize_replay_is_idempotent_and_changes_are_rejected() {
        let mut stream = draft_stream();
        add(&mut stream, test_card_id(), 10_00);
        lock(&mut stream);

        let finalize = FinalizeStream {
            stream_id: stream.id_typed(),
            gross_sales: 80_00,
            fees: 8_00,
            bulk_sale: true,
            occurred_at: test_time(),
        };
        execute(
            &mut stream,
            &StreamCommand::FinalizeStream(finalize.clone()),
        )
        .unwrap();
        let recorded = *stream.settlement().unwrap();

        // Same figures: no-op replay.
        let replay = stream
            .handle(&StreamCommand::FinalizeStream(finalize))
            .unwrap();
        assert!(replay.is_empty());

        // Different figures: rejected, first write preserved.
        let err = stream
            .handle(&StreamCommand::FinalizeStream(FinalizeStream {
                stream_id: stream.id_typed(),
                gross_sales: 99_00,
                fees: 8_00,
                bulk_sale: true,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::AlreadyTerminal(_)));
        assert_eq!(stream.settlement(), Some(&recorded));
    }

    #[test]
    fn lock_is_one_way() {
        let mut stream = draft_stream();
        lock(&mut stream);
        let err = stream
            .handle(&StreamCommand::LockStream(LockStream {
                stream_id: stream.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: after any add/remove sequence, the derived totals
            /// match the member list exactly.
            #[test]
            fn totals_always_match_membership(
                prices in prop::collection::vec(0u64..100_000, 1..16),
                remove_mask in prop::collection::vec(any::<bool>(), 1..16)
            ) {
                let mut stream = draft_stream();
                let mut cards = Vec::new();
                for price in &prices {
                    let card = test_card_id();
                    add(&mut stream, card, *price);
                    cards.push(card);
                }

                for (card, remove) in cards.iter().zip(remove_mask.iter()) {
                    if *remove {
                        let stream_id = stream.id_typed();
                        execute(&mut stream, &StreamCommand::RemoveItem(RemoveItem {
                            stream_id,
                            card_id: *card,
                            occurred_at: test_time(),
                        })).unwrap();
                    }
                }

                let expected_cost: u64 = stream.members().iter().map(|m| m.purchase_price).sum();
                prop_assert_eq!(stream.total_cost(), expected_cost);
                prop_assert_eq!(stream.total_items(), stream.members().len());
            }
        }
    }
}
