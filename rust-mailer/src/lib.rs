//! BulkMailer - resumable personalized bulk email.
//!
//! Sends one templated email per row of a CSV or Excel recipient list and
//! records a per-row delivery status, so an interrupted run picks up where it
//! stopped instead of re-sending.
//!
//! ## Architecture
//!
//! ```text
//! table::load_table → batch::Orchestrator ─ validate → template → send ─→ StatusUpdates
//!                                                                          ↓
//!                              report::BatchSummary ← table::save_table ← Table::apply
//! ```

pub mod auth;
pub mod batch;
pub mod config;
pub mod error;
pub mod report;
pub mod runner;
pub mod send;
pub mod table;
pub mod template;
pub mod validate;

// Re-export commonly used types
pub use batch::{BatchAborted, BatchOutcome, BatchState, Dispatch, Orchestrator, StopReason};
pub use config::Config;
pub use error::{exit_code, LoadError, MailerError, SaveError};
pub use report::{BatchEvents, BatchSummary, RowFailure, TracingEvents};
pub use runner::{run_batch, BatchRequest, BatchResult};
pub use send::{send_email, Delivery, OutgoingMessage, RetryPolicy, SendCapability, SendOutcome};
pub use table::{Row, RowStatus, StatusUpdates, Table, Value};
