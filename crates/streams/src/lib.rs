//! `cardflow-streams` — the Stream aggregate.
//!
//! A live-sale session grouping cards for collective settlement: ordered
//! membership while drafting, a lock that freezes the roster, and a one-shot
//! finalize that stamps the P&L.

pub mod stream;

pub use stream::{
    AddItem, FinalizeStream, ItemAdded, ItemRemoved, LockStream, Member, OpenStream, RemoveItem,
    Settlement, Stream, StreamCommand, StreamEvent, StreamFinalized, StreamId, StreamLocked,
    StreamOpened, StreamStatus,
};
