use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cardflow_cards::CardId;
use cardflow_core::{Aggregate, AggregateId, AggregateRoot, DomainError, DomainResult};
use cardflow_events::Event;

/// Batch identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub AggregateId);

impl BatchId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BatchId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Batch status lifecycle. Strictly forward, no reversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Open,
    Locked,
    Closed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Open => "open",
            BatchStatus::Locked => "locked",
            BatchStatus::Closed => "closed",
        }
    }
}

/// Per-row intake state.
///
/// `Staged` rows are waiting to arrive; `Error` rows hold an unresolved
/// validation failure and block finishing; `Arrived` rows are bound to the
/// card they created (and to the idempotency key that created it); `Dropped`
/// rows were never arrived when the batch closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RowState {
    Staged,
    Error { reason: String },
    Arrived { card_id: CardId, idempotency_key: String },
    Dropped,
}

/// One intake row. `row_no` is 1-based and stable once staged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    pub row_no: u32,
    pub description: String,
    pub state: RowState,
}

/// Aggregate root: Batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    id: BatchId,
    name: String,
    status: BatchStatus,
    rows: Vec<Row>,
    version: u64,
    created: bool,
}

impl Batch {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: BatchId) -> Self {
        Self {
            id,
            name: String::new(),
            status: BatchStatus::Open,
            rows: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> BatchId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, row_no: u32) -> Option<&Row> {
        self.rows.iter().find(|r| r.row_no == row_no)
    }

    pub fn total_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn arrived_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| matches!(r.state, RowState::Arrived { .. }))
            .count()
    }

    pub fn unresolved_error_count(&self) -> usize {
        self.rows
            .iter()
            .filter(|r| matches!(r.state, RowState::Error { .. }))
            .count()
    }

    /// Card created by a row, if it has arrived.
    pub fn arrived_card(&self, row_no: u32) -> Option<CardId> {
        match self.row(row_no)?.state {
            RowState::Arrived { card_id, .. } => Some(card_id),
            _ => None,
        }
    }

    pub fn is_created(&self) -> bool {
        self.created
    }
}

impl AggregateRoot for Batch {
    type Id = BatchId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenBatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenBatch {
    pub batch_id: BatchId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: StageRow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRow {
    pub batch_id: BatchId,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FlagRow (validation failure on a staged row).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRow {
    pub batch_id: BatchId,
    pub row_no: u32,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ResolveRow (clear a validation failure).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRow {
    pub batch_id: BatchId,
    pub row_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ArriveRow.
///
/// The idempotency key makes retried arrivals safe: a replay with the same
/// key emits nothing and callers read the already-bound card off the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArriveRow {
    pub batch_id: BatchId,
    pub row_no: u32,
    pub idempotency_key: String,
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FinishBatch (open -> locked).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinishBatch {
    pub batch_id: BatchId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CloseBatch (locked -> closed, administrative hard stop).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseBatch {
    pub batch_id: BatchId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchCommand {
    OpenBatch(OpenBatch),
    StageRow(StageRow),
    FlagRow(FlagRow),
    ResolveRow(ResolveRow),
    ArriveRow(ArriveRow),
    FinishBatch(FinishBatch),
    CloseBatch(CloseBatch),
}

/// Event: BatchOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOpened {
    pub batch_id: BatchId,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RowStaged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowStaged {
    pub batch_id: BatchId,
    pub row_no: u32,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RowFlagged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowFlagged {
    pub batch_id: BatchId,
    pub row_no: u32,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RowResolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowResolved {
    pub batch_id: BatchId,
    pub row_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: RowArrived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowArrived {
    pub batch_id: BatchId,
    pub row_no: u32,
    pub idempotency_key: String,
    pub card_id: CardId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BatchFinished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFinished {
    pub batch_id: BatchId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BatchClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchClosed {
    pub batch_id: BatchId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchEvent {
    BatchOpened(BatchOpened),
    RowStaged(RowStaged),
    RowFlagged(RowFlagged),
    RowResolved(RowResolved),
    RowArrived(RowArrived),
    BatchFinished(BatchFinished),
    BatchClosed(BatchClosed),
}

impl Event for BatchEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BatchEvent::BatchOpened(_) => "batches.batch.opened",
            BatchEvent::RowStaged(_) => "batches.row.staged",
            BatchEvent::RowFlagged(_) => "batches.row.flagged",
            BatchEvent::RowResolved(_) => "batches.row.resolved",
            BatchEvent::RowArrived(_) => "batches.row.arrived",
            BatchEvent::BatchFinished(_) => "batches.batch.finished",
            BatchEvent::BatchClosed(_) => "batches.batch.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BatchEvent::BatchOpened(e) => e.occurred_at,
            BatchEvent::RowStaged(e) => e.occurred_at,
            BatchEvent::RowFlagged(e) => e.occurred_at,
            BatchEvent::RowResolved(e) => e.occurred_at,
            BatchEvent::RowArrived(e) => e.occurred_at,
            BatchEvent::BatchFinished(e) => e.occurred_at,
            BatchEvent::BatchClosed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Batch {
    type Command = BatchCommand;
    type Event = BatchEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BatchEvent::BatchOpened(e) => {
                self.id = e.batch_id;
                self.name = e.name.clone();
                self.status = BatchStatus::Open;
                self.rows.clear();
                self.created = true;
            }
            BatchEvent::RowStaged(e) => {
                self.rows.push(Row {
                    row_no: e.row_no,
                    description: e.description.clone(),
                    state: RowState::Staged,
                });
            }
            BatchEvent::RowFlagged(e) => {
                if let Some(row) = self.rows.iter_mut().find(|r| r.row_no == e.row_no) {
                    row.state = RowState::Error {
                        reason: e.reason.clone(),
                    };
                }
            }
            BatchEvent::RowResolved(e) => {
                if let Some(row) = self.rows.iter_mut().find(|r| r.row_no == e.row_no) {
                    row.state = RowState::Staged;
                }
            }
            BatchEvent::RowArrived(e) => {
                if let Some(row) = self.rows.iter_mut().find(|r| r.row_no == e.row_no) {
                    row.state = RowState::Arrived {
                        card_id: e.card_id,
                        idempotency_key: e.idempotency_key.clone(),
                    };
                }
            }
            BatchEvent::BatchFinished(_) => {
                self.status = BatchStatus::Locked;
            }
            BatchEvent::BatchClosed(_) => {
                self.status = BatchStatus::Closed;
                // Rows never arrived are dropped from further processing.
                for row in &mut self.rows {
                    if !matches!(row.state, RowState::Arrived { .. }) {
                        row.state = RowState::Dropped;
                    }
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BatchCommand::OpenBatch(cmd) => self.handle_open(cmd),
            BatchCommand::StageRow(cmd) => self.handle_stage_row(cmd),
            BatchCommand::FlagRow(cmd) => self.handle_flag_row(cmd),
            BatchCommand::ResolveRow(cmd) => self.handle_resolve_row(cmd),
            BatchCommand::ArriveRow(cmd) => self.handle_arrive_row(cmd),
            BatchCommand::FinishBatch(cmd) => self.handle_finish(cmd),
            BatchCommand::CloseBatch(cmd) => self.handle_close(cmd),
        }
    }
}

impl Batch {
    fn ensure_batch_id(&self, batch_id: BatchId) -> DomainResult<()> {
        if self.id != batch_id {
            return Err(DomainError::validation("batch_id mismatch"));
        }
        Ok(())
    }

    fn ensure_exists(&self, batch_id: BatchId) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_batch_id(batch_id)
    }

    fn handle_open(&self, cmd: &OpenBatch) -> DomainResult<Vec<BatchEvent>> {
        if self.created {
            return Err(DomainError::conflict("batch already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("batch name cannot be empty"));
        }

        Ok(vec![BatchEvent::BatchOpened(BatchOpened {
            batch_id: cmd.batch_id,
            name: cmd.name.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_stage_row(&self, cmd: &StageRow) -> DomainResult<Vec<BatchEvent>> {
        self.ensure_exists(cmd.batch_id)?;

        match self.status {
            BatchStatus::Open => {}
            BatchStatus::Locked => {
                return Err(DomainError::precondition(
                    "batch is finished; row count is frozen",
                ));
            }
            BatchStatus::Closed => {
                return Err(DomainError::already_terminal("batch is closed"));
            }
        }

        let next_row_no = (self.rows.len() as u32) + 1;

        Ok(vec![BatchEvent::RowStaged(RowStaged {
            batch_id: cmd.batch_id,
            row_no: next_row_no,
            description: cmd.description.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_flag_row(&self, cmd: &FlagRow) -> DomainResult<Vec<BatchEvent>> {
        self.ensure_exists(cmd.batch_id)?;

        if self.status != BatchStatus::Open {
            return Err(DomainError::precondition(
                "rows can only be flagged while the batch is open",
            ));
        }

        let row = self.row(cmd.row_no).ok_or(DomainError::NotFound)?;
        if !matches!(row.state, RowState::Staged) {
            return Err(DomainError::precondition(
                "only staged rows can be flagged",
            ));
        }

        Ok(vec![BatchEvent::RowFlagged(RowFlagged {
            batch_id: cmd.batch_id,
            row_no: cmd.row_no,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_resolve_row(&self, cmd: &ResolveRow) -> DomainResult<Vec<BatchEvent>> {
        self.ensure_exists(cmd.batch_id)?;

        if self.status != BatchStatus::Open {
            return Err(DomainError::precondition(
                "rows can only be resolved while the batch is open",
            ));
        }

        let row = self.row(cmd.row_no).ok_or(DomainError::NotFound)?;
        if !matches!(row.state, RowState::Error { .. }) {
            return Err(DomainError::precondition("row is not in error state"));
        }

        Ok(vec![BatchEvent::RowResolved(RowResolved {
            batch_id: cmd.batch_id,
            row_no: cmd.row_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_arrive_row(&self, cmd: &ArriveRow) -> DomainResult<Vec<BatchEvent>> {
        self.ensure_exists(cmd.batch_id)?;

        // Arrival is allowed while open or locked; a closed batch is a hard stop.
        if self.status == BatchStatus::Closed {
            return Err(DomainError::already_terminal("batch is closed"));
        }

        let row = self.row(cmd.row_no).ok_or(DomainError::NotFound)?;
        match &row.state {
            RowState::Staged => Ok(vec![BatchEvent::RowArrived(RowArrived {
                batch_id: cmd.batch_id,
                row_no: cmd.row_no,
                idempotency_key: cmd.idempotency_key.clone(),
                card_id: cmd.card_id,
                occurred_at: cmd.occurred_at,
            })]),
            RowState::Error { .. } => Err(DomainError::precondition(
                "row has an unresolved validation error",
            )),
            RowState::Arrived {
                idempotency_key, ..
            } => {
                if *idempotency_key == cmd.idempotency_key {
                    // Idempotent replay: nothing new happens.
                    Ok(vec![])
                } else {
                    Err(DomainError::conflict(
                        "row already arrived under a different idempotency key",
                    ))
                }
            }
            RowState::Dropped => Err(DomainError::precondition(
                "row was dropped when the batch closed",
            )),
        }
    }

    fn handle_finish(&self, cmd: &FinishBatch) -> DomainResult<Vec<BatchEvent>> {
        self.ensure_exists(cmd.batch_id)?;

        match self.status {
            BatchStatus::Open => {}
            BatchStatus::Locked => {
                return Err(DomainError::invalid_transition("locked", "locked"));
            }
            BatchStatus::Closed => {
                return Err(DomainError::already_terminal("batch is closed"));
            }
        }

        let unresolved = self.unresolved_error_count();
        if unresolved > 0 {
            return Err(DomainError::precondition(format!(
                "{unresolved} row(s) still in unresolved error state"
            )));
        }

        Ok(vec![BatchEvent::BatchFinished(BatchFinished {
            batch_id: cmd.batch_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close(&self, cmd: &CloseBatch) -> DomainResult<Vec<BatchEvent>> {
        self.ensure_exists(cmd.batch_id)?;

        match self.status {
            BatchStatus::Locked => {}
            BatchStatus::Open => {
                return Err(DomainError::invalid_transition("open", "closed"));
            }
            BatchStatus::Closed => {
                return Err(DomainError::already_terminal("batch is closed"));
            }
        }

        Ok(vec![BatchEvent::BatchClosed(BatchClosed {
            batch_id: cmd.batch_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
