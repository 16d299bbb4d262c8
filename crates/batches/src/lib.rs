//! `cardflow-batches` — the Batch aggregate.
//!
//! Bulk intake: a batch's rows become cards as they arrive. The batch gates
//! when rows may arrive and when the batch may be finished or closed.

pub mod batch;

pub use batch::{
    ArriveRow, Batch, BatchClosed, BatchCommand, BatchEvent, BatchFinished, BatchId, BatchOpened,
    BatchStatus, CloseBatch, FinishBatch, FlagRow, OpenBatch, ResolveRow, Row, RowArrived,
    RowFlagged, RowResolved, RowStaged, RowState, StageRow,
};
