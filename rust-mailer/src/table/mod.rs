//! Recipient tables.
//!
//! Loading and saving are the file-format collaborators of a batch: the
//! orchestrator only ever sees immutable [`Row`] snapshots and hands back a
//! [`StatusUpdates`] side-table, which is applied in one pass before saving.

pub mod loader;
pub mod types;
pub mod writer;

pub use loader::load_table;
pub use types::{
    choose_status_column, Row, RowStatus, SourceFormat, StatusUpdates, Table, Value,
    REQUIRED_COLUMNS, STATUS_FAILED, STATUS_SENT,
};
pub use writer::save_table;
