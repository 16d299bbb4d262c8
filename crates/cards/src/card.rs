use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cardflow_consignment::{ConsignmentTerms, ConsignorId};
use cardflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult};
use cardflow_events::Event;

/// Card identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CardId(pub AggregateId);

impl CardId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for CardId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Human-facing card identifier (printed on the sleeve label).
///
/// Globally unique and immutable once assigned at arrival. The scan/builder
/// workflow addresses cards by this, not by the internal UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayId(String);

impl DisplayId {
    pub fn new(value: impl Into<String>) -> DomainResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::validation("display id cannot be empty"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for DisplayId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Card status lifecycle.
///
/// Forward edges only, in this order; the single backward edge is
/// `AllocatedToStream -> Available` (stream-item removal). `Staged` is the
/// pre-arrival state: a rehydrated card that has seen no events sits here,
/// and the receive command is the `Staged -> Arrived` edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardStatus {
    Staged,
    Arrived,
    Available,
    AllocatedToStream,
    Sold,
    ToShip,
    Packed,
    Shipped,
}

impl CardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardStatus::Staged => "staged",
            CardStatus::Arrived => "arrived",
            CardStatus::Available => "available",
            CardStatus::AllocatedToStream => "allocated_to_stream",
            CardStatus::Sold => "sold",
            CardStatus::ToShip => "to_ship",
            CardStatus::Packed => "packed",
            CardStatus::Shipped => "shipped",
        }
    }
}

/// Payout status lifecycle for consigned cards.
///
/// `None -> Pending -> Approved -> Paid`, with `Returned` reachable from
/// `Pending` or `Approved`. `Paid` and `Returned` are terminal. Always `None`
/// for owned cards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayoutStatus {
    None,
    Pending,
    Approved,
    Paid,
    Returned,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::None => "none",
            PayoutStatus::Pending => "pending",
            PayoutStatus::Approved => "approved",
            PayoutStatus::Paid => "paid",
            PayoutStatus::Returned => "returned",
        }
    }
}

/// Descriptive classification. Free text, no invariants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDetails {
    pub sport: Option<String>,
    pub year: Option<String>,
    pub brand: Option<String>,
    pub player: Option<String>,
    pub grade: Option<String>,
}

/// Who owns the card while it is in inventory.
///
/// For consigned cards the terms are a value snapshot resolved at arrival;
/// later edits to the consignor's defaults do not reach this card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Ownership {
    Owned,
    Consigned {
        consignor_id: ConsignorId,
        terms: ConsignmentTerms,
    },
}

impl Ownership {
    pub fn is_consigned(&self) -> bool {
        matches!(self, Ownership::Consigned { .. })
    }
}

/// Aggregate root: Card.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    id: CardId,
    display_id: Option<DisplayId>,
    details: CardDetails,
    purchase_price: u64,
    current_value: Option<u64>,
    notes: Option<String>,
    ownership: Ownership,
    status: CardStatus,
    allocated_to: Option<AggregateId>,
    sale_price: Option<u64>,
    payout_status: PayoutStatus,
    payout_amount: Option<u64>,
    paid_on: Option<DateTime<Utc>>,
    payout_reference: Option<String>,
    deleted: bool,
    version: u64,
    created: bool,
}

impl Card {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: CardId) -> Self {
        Self {
            id,
            display_id: None,
            details: CardDetails::default(),
            purchase_price: 0,
            current_value: None,
            notes: None,
            ownership: Ownership::Owned,
            status: CardStatus::Staged,
            allocated_to: None,
            sale_price: None,
            payout_status: PayoutStatus::None,
            payout_amount: None,
            paid_on: None,
            payout_reference: None,
            deleted: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CardId {
        self.id
    }

    pub fn display_id(&self) -> Option<&DisplayId> {
        self.display_id.as_ref()
    }

    pub fn details(&self) -> &CardDetails {
        &self.details
    }

    pub fn purchase_price(&self) -> u64 {
        self.purchase_price
    }

    pub fn current_value(&self) -> Option<u64> {
        self.current_value
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn ownership(&self) -> &Ownership {
        &self.ownership
    }

    pub fn status(&self) -> CardStatus {
        self.status
    }

    /// The stream this card is currently allocated to, if any.
    pub fn allocated_to(&self) -> Option<AggregateId> {
        self.allocated_to
    }

    pub fn sale_price(&self) -> Option<u64> {
        self.sale_price
    }

    pub fn payout_status(&self) -> PayoutStatus {
        self.payout_status
    }

    pub fn payout_amount(&self) -> Option<u64> {
        self.payout_amount
    }

    pub fn paid_on(&self) -> Option<DateTime<Utc>> {
        self.paid_on
    }

    pub fn payout_reference(&self) -> Option<&str> {
        self.payout_reference.as_deref()
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Card {
    type Id = CardId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ReceiveCard (batch-row arrival).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveCard {
    pub card_id: CardId,
    pub display_id: DisplayId,
    pub details: CardDetails,
    pub purchase_price: u64,
    pub ownership: Ownership,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkAvailable (manual readiness, e.g. grading complete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkAvailable {
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AllocateToStream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocateToStream {
    pub card_id: CardId,
    pub stream_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseFromStream (stream-item removal reversal).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFromStream {
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkSold. Issued by stream finalization, never freestanding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkSold {
    pub card_id: CardId,
    pub sale_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkToShip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkToShip {
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkPacked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPacked {
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkShipped {
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RevalueCard (advisory current value / notes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevalueCard {
    pub card_id: CardId,
    pub current_value: Option<u64>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApprovePayout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovePayout {
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkPayoutPaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPayoutPaid {
    pub card_id: CardId,
    pub amount: u64,
    pub paid_on: DateTime<Utc>,
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnToConsignor (card handed back before payout completes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnToConsignor {
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeleteCard (irreversible admin delete).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteCard {
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardCommand {
    ReceiveCard(ReceiveCard),
    MarkAvailable(MarkAvailable),
    AllocateToStream(AllocateToStream),
    ReleaseFromStream(ReleaseFromStream),
    MarkSold(MarkSold),
    MarkToShip(MarkToShip),
    MarkPacked(MarkPacked),
    MarkShipped(MarkShipped),
    RevalueCard(RevalueCard),
    ApprovePayout(ApprovePayout),
    MarkPayoutPaid(MarkPayoutPaid),
    ReturnToConsignor(ReturnToConsignor),
    DeleteCard(DeleteCard),
}

/// Event: CardReceived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardReceived {
    pub card_id: CardId,
    pub display_id: DisplayId,
    pub details: CardDetails,
    pub purchase_price: u64,
    pub ownership: Ownership,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CardListed (arrived -> available).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardListed {
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CardAllocated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardAllocated {
    pub card_id: CardId,
    pub stream_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CardReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardReleased {
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CardSold. Opens the payout (pending) for consigned cards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSold {
    pub card_id: CardId,
    pub sale_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CardStagedForShipping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardStagedForShipping {
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CardPacked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardPacked {
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CardShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardShipped {
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CardRevalued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardRevalued {
    pub card_id: CardId,
    pub current_value: Option<u64>,
    pub notes: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PayoutApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutApproved {
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PayoutPaid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutPaid {
    pub card_id: CardId,
    pub amount: u64,
    pub paid_on: DateTime<Utc>,
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CardReturnedToConsignor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardReturnedToConsignor {
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CardDeleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDeleted {
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardEvent {
    CardReceived(CardReceived),
    CardListed(CardListed),
    CardAllocated(CardAllocated),
    CardReleased(CardReleased),
    CardSold(CardSold),
    CardStagedForShipping(CardStagedForShipping),
    CardPacked(CardPacked),
    CardShipped(CardShipped),
    CardRevalued(CardRevalued),
    PayoutApproved(PayoutApproved),
    PayoutPaid(PayoutPaid),
    CardReturnedToConsignor(CardReturnedToConsignor),
    CardDeleted(CardDeleted),
}

impl Event for CardEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CardEvent::CardReceived(_) => "cards.card.received",
            CardEvent::CardListed(_) => "cards.card.listed",
            CardEvent::CardAllocated(_) => "cards.card.allocated",
            CardEvent::CardReleased(_) => "cards.card.released",
            CardEvent::CardSold(_) => "cards.card.sold",
            CardEvent::CardStagedForShipping(_) => "cards.card.staged_for_shipping",
            CardEvent::CardPacked(_) => "cards.card.packed",
            CardEvent::CardShipped(_) => "cards.card.shipped",
            CardEvent::CardRevalued(_) => "cards.card.revalued",
            CardEvent::PayoutApproved(_) => "cards.payout.approved",
            CardEvent::PayoutPaid(_) => "cards.payout.paid",
            CardEvent::CardReturnedToConsignor(_) => "cards.card.returned_to_consignor",
            CardEvent::CardDeleted(_) => "cards.card.deleted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CardEvent::CardReceived(e) => e.occurred_at,
            CardEvent::CardListed(e) => e.occurred_at,
            CardEvent::CardAllocated(e) => e.occurred_at,
            CardEvent::CardReleased(e) => e.occurred_at,
            CardEvent::CardSold(e) => e.occurred_at,
            CardEvent::CardStagedForShipping(e) => e.occurred_at,
            CardEvent::CardPacked(e) => e.occurred_at,
            CardEvent::CardShipped(e) => e.occurred_at,
            CardEvent::CardRevalued(e) => e.occurred_at,
            CardEvent::PayoutApproved(e) => e.occurred_at,
            CardEvent::PayoutPaid(e) => e.occurred_at,
            CardEvent::CardReturnedToConsignor(e) => e.occurred_at,
            CardEvent::CardDeleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Card {
    type Command = CardCommand;
    type Event = CardEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CardEvent::CardReceived(e) => {
                self.id = e.card_id;
                self.display_id = Some(e.display_id.clone());
                self.details = e.details.clone();
                self.purchase_price = e.purchase_price;
                self.ownership = e.ownership.clone();
                self.status = CardStatus::Arrived;
                self.payout_status = PayoutStatus::None;
                self.created = true;
            }
            CardEvent::CardListed(_) => {
                self.status = CardStatus::Available;
            }
            CardEvent::CardAllocated(e) => {
                self.status = CardStatus::AllocatedToStream;
                self.allocated_to = Some(e.stream_id);
            }
            CardEvent::CardReleased(_) => {
                self.status = CardStatus::Available;
                self.allocated_to = None;
            }
            CardEvent::CardSold(e) => {
                self.status = CardStatus::Sold;
                self.sale_price = Some(e.sale_price);
                if self.ownership.is_consigned() {
                    self.payout_status = PayoutStatus::Pending;
                }
            }
            CardEvent::CardStagedForShipping(_) => {
                self.status = CardStatus::ToShip;
            }
            CardEvent::CardPacked(_) => {
                self.status = CardStatus::Packed;
            }
            CardEvent::CardShipped(_) => {
                self.status = CardStatus::Shipped;
            }
            CardEvent::CardRevalued(e) => {
                self.current_value = e.current_value;
                if let Some(notes) = &e.notes {
                    self.notes = Some(notes.clone());
                }
            }
            CardEvent::PayoutApproved(_) => {
                self.payout_status = PayoutStatus::Approved;
            }
            CardEvent::PayoutPaid(e) => {
                self.payout_status = PayoutStatus::Paid;
                self.payout_amount = Some(e.amount);
                self.paid_on = Some(e.paid_on);
                self.payout_reference = Some(e.reference.clone());
            }
            CardEvent::CardReturnedToConsignor(_) => {
                self.payout_status = PayoutStatus::Returned;
            }
            CardEvent::CardDeleted(_) => {
                self.deleted = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CardCommand::ReceiveCard(cmd) => self.handle_receive(cmd),
            CardCommand::MarkAvailable(cmd) => self.handle_mark_available(cmd),
            CardCommand::AllocateToStream(cmd) => self.handle_allocate(cmd),
            CardCommand::ReleaseFromStream(cmd) => self.handle_release(cmd),
            CardCommand::MarkSold(cmd) => self.handle_mark_sold(cmd),
            CardCommand::MarkToShip(cmd) => self.handle_mark_to_ship(cmd),
            CardCommand::MarkPacked(cmd) => self.handle_mark_packed(cmd),
            CardCommand::MarkShipped(cmd) => self.handle_mark_shipped(cmd),
            CardCommand::RevalueCard(cmd) => self.handle_revalue(cmd),
            CardCommand::ApprovePayout(cmd) => self.handle_approve_payout(cmd),
            CardCommand::MarkPayoutPaid(cmd) => self.handle_mark_payout_paid(cmd),
            CardCommand::ReturnToConsignor(cmd) => self.handle_return_to_consignor(cmd),
            CardCommand::DeleteCard(cmd) => self.handle_delete(cmd),
        }
    }
}

impl Card {
    fn ensure_card_id(&self, card_id: CardId) -> DomainResult<()> {
        if self.id != card_id {
            return Err(DomainError::validation("card_id mismatch"));
        }
        Ok(())
    }

    /// Guard shared by every post-creation command.
    fn ensure_live(&self, card_id: CardId) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_card_id(card_id)?;
        if self.deleted {
            return Err(DomainError::already_terminal("card is deleted"));
        }
        Ok(())
    }

    /// Status-machine edge check: the card must currently sit exactly at
    /// `expected` to move to `attempted`.
    fn ensure_edge(&self, expected: CardStatus, attempted: CardStatus) -> DomainResult<()> {
        if self.status != expected {
            return Err(DomainError::invalid_transition(
                self.status.as_str(),
                attempted.as_str(),
            ));
        }
        Ok(())
    }

    fn handle_receive(&self, cmd: &ReceiveCard) -> DomainResult<Vec<CardEvent>> {
        if self.created {
            return Err(DomainError::conflict("card already exists"));
        }

        Ok(vec![CardEvent::CardReceived(CardReceived {
            card_id: cmd.card_id,
            display_id: cmd.display_id.clone(),
            details: cmd.details.clone(),
            purchase_price: cmd.purchase_price,
            ownership: cmd.ownership.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_available(&self, cmd: &MarkAvailable) -> DomainResult<Vec<CardEvent>> {
        self.ensure_live(cmd.card_id)?;
        self.ensure_edge(CardStatus::Arrived, CardStatus::Available)?;

        Ok(vec![CardEvent::CardListed(CardListed {
            card_id: cmd.card_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_allocate(&self, cmd: &AllocateToStream) -> DomainResult<Vec<CardEvent>> {
        self.ensure_live(cmd.card_id)?;
        self.ensure_edge(CardStatus::Available, CardStatus::AllocatedToStream)?;

        Ok(vec![CardEvent::CardAllocated(CardAllocated {
            card_id: cmd.card_id,
            stream_id: cmd.stream_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseFromStream) -> DomainResult<Vec<CardEvent>> {
        self.ensure_live(cmd.card_id)?;
        self.ensure_edge(CardStatus::AllocatedToStream, CardStatus::Available)?;

        Ok(vec![CardEvent::CardReleased(CardReleased {
            card_id: cmd.card_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_sold(&self, cmd: &MarkSold) -> DomainResult<Vec<CardEvent>> {
        self.ensure_live(cmd.card_id)?;
        self.ensure_edge(CardStatus::AllocatedToStream, CardStatus::Sold)?;

        Ok(vec![CardEvent::CardSold(CardSold {
            card_id: cmd.card_id,
            sale_price: cmd.sale_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_to_ship(&self, cmd: &MarkToShip) -> DomainResult<Vec<CardEvent>> {
        self.ensure_live(cmd.card_id)?;
        self.ensure_edge(CardStatus::Sold, CardStatus::ToShip)?;

        Ok(vec![CardEvent::CardStagedForShipping(CardStagedForShipping {
            card_id: cmd.card_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_packed(&self, cmd: &MarkPacked) -> DomainResult<Vec<CardEvent>> {
        self.ensure_live(cmd.card_id)?;
        self.ensure_edge(CardStatus::ToShip, CardStatus::Packed)?;

        Ok(vec![CardEvent::CardPacked(CardPacked {
            card_id: cmd.card_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_shipped(&self, cmd: &MarkShipped) -> DomainResult<Vec<CardEvent>> {
        self.ensure_live(cmd.card_id)?;
        self.ensure_edge(CardStatus::Packed, CardStatus::Shipped)?;

        Ok(vec![CardEvent::CardShipped(CardShipped {
            card_id: cmd.card_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_revalue(&self, cmd: &RevalueCard) -> DomainResult<Vec<CardEvent>> {
        self.ensure_live(cmd.card_id)?;

        Ok(vec![CardEvent::CardRevalued(CardRevalued {
            card_id: cmd.card_id,
            current_value: cmd.current_value,
            notes: cmd.notes.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn ensure_consigned(&self) -> DomainResult<()> {
        if !self.ownership.is_consigned() {
            return Err(DomainError::precondition("card is not consigned"));
        }
        Ok(())
    }

    fn handle_approve_payout(&self, cmd: &ApprovePayout) -> DomainResult<Vec<CardEvent>> {
        self.ensure_live(cmd.card_id)?;
        self.ensure_consigned()?;

        if self.payout_status != PayoutStatus::Pending {
            return Err(DomainError::invalid_transition(
                self.payout_status.as_str(),
                PayoutStatus::Approved.as_str(),
            ));
        }

        Ok(vec![CardEvent::PayoutApproved(PayoutApproved {
            card_id: cmd.card_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_payout_paid(&self, cmd: &MarkPayoutPaid) -> DomainResult<Vec<CardEvent>> {
        self.ensure_live(cmd.card_id)?;
        self.ensure_consigned()?;

        if self.payout_status == PayoutStatus::Paid {
            return Err(DomainError::already_terminal("payout is already paid"));
        }
        if self.payout_status != PayoutStatus::Approved {
            return Err(DomainError::invalid_transition(
                self.payout_status.as_str(),
                PayoutStatus::Paid.as_str(),
            ));
        }
        if cmd.reference.trim().is_empty() {
            return Err(DomainError::validation("payout reference cannot be empty"));
        }

        Ok(vec![CardEvent::PayoutPaid(PayoutPaid {
            card_id: cmd.card_id,
            amount: cmd.amount,
            paid_on: cmd.paid_on,
            reference: cmd.reference.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return_to_consignor(&self, cmd: &ReturnToConsignor) -> DomainResult<Vec<CardEvent>> {
        self.ensure_live(cmd.card_id)?;
        self.ensure_consigned()?;

        match self.payout_status {
            PayoutStatus::Pending | PayoutStatus::Approved => {}
            PayoutStatus::Paid | PayoutStatus::Returned => {
                return Err(DomainError::already_terminal(format!(
                    "payout is {}",
                    self.payout_status.as_str()
                )));
            }
            PayoutStatus::None => {
                return Err(DomainError::invalid_transition(
                    self.payout_status.as_str(),
                    PayoutStatus::Returned.as_str(),
                ));
            }
        }

        Ok(vec![CardEvent::CardReturnedToConsignor(
            CardReturnedToConsignor {
                card_id: cmd.card_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_delete(&self, cmd: &DeleteCard) -> DomainResult<Vec<CardEvent>> {
        self.ensure_live(cmd.card_id)?;

        if self.status == CardStatus::AllocatedToStream {
            return Err(DomainError::precondition(
                "card is an active stream member; remove it first",
            ));
        }

        Ok(vec![CardEvent::CardDeleted(CardDeleted {
            card_id: cmd.card_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
