//! Read-model projections fed from published event envelopes.

pub mod card_directory;

pub use card_directory::{CARD_AGGREGATE_TYPE, CardDirectoryEntry, CardDirectoryError,
    CardDirectoryProjection};
