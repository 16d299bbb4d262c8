//! `cardflow-cards` — the Card aggregate.
//!
//! One physical inventory unit tracked end-to-end: intake, listing, stream
//! allocation, sale, shipping, and the consignment payout lifecycle.

pub mod card;

pub use card::{
    AllocateToStream, ApprovePayout, Card, CardAllocated, CardCommand, CardDeleted, CardDetails,
    CardEvent, CardId, CardListed, CardPacked, CardReceived, CardReleased, CardReturnedToConsignor,
    CardRevalued, CardShipped, CardSold, CardStagedForShipping, CardStatus, DeleteCard, DisplayId,
    MarkAvailable, MarkPacked, MarkPayoutPaid, MarkShipped, MarkSold, MarkToShip, Ownership,
    PayoutPaid, PayoutApproved, PayoutStatus, ReceiveCard, ReleaseFromStream, ReturnToConsignor,
    RevalueCard,
};
