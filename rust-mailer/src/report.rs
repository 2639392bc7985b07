//! Batch progress events and the end-of-run summary.
//!
//! The orchestrator reports through [`BatchEvents`] instead of logging, so a
//! batch can be observed (or asserted on) without touching global state.

use std::fmt;

use tracing::{error, info, warn};

use crate::batch::{BatchState, StopReason};
use crate::send::OutgoingMessage;

/// Which template a placeholder failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateKind {
    Subject,
    Body,
}

impl fmt::Display for TemplateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemplateKind::Subject => f.write_str("subject"),
            TemplateKind::Body => f.write_str("body"),
        }
    }
}

/// Why a row was marked failed.
#[derive(Debug, Clone, PartialEq)]
pub enum RowFailure {
    Invalid(String),
    MissingPlaceholders {
        template: TemplateKind,
        names: Vec<String>,
    },
    Send(String),
}

impl fmt::Display for RowFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowFailure::Invalid(reason) => f.write_str(reason),
            RowFailure::MissingPlaceholders { template, names } => {
                write!(f, "Missing {} placeholders: {}", template, names.join(", "))
            }
            RowFailure::Send(reason) => f.write_str(reason),
        }
    }
}

/// Sink for everything a batch wants to tell its caller.
pub trait BatchEvents: Send + Sync {
    fn batch_started(&self, _rows: usize, _limit: Option<usize>, _preview: bool) {}

    fn row_skipped(&self, row: usize, reason: &str);
    fn row_failed(&self, row: usize, email: Option<&str>, failure: &RowFailure);
    fn row_sent(&self, row: usize, email: &str);
    fn row_previewed(&self, row: usize, message: &OutgoingMessage);
    fn limit_reached(&self, limit: usize);
    fn rate_limit_stop(&self, row: usize, email: &str, reason: &str);
    fn batch_summary(&self, summary: &BatchSummary);
}

/// Terminal summary of a batch, rendered from [`BatchState`].
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub stop: StopReason,
    pub last_successful_row: Option<usize>,
}

impl BatchSummary {
    pub fn new(state: &BatchState, stop: StopReason) -> Self {
        Self {
            total: state.sent + state.failed + state.skipped,
            sent: state.sent,
            failed: state.failed,
            skipped: state.skipped,
            stop,
            last_successful_row: state.last_successful_row,
        }
    }

    /// Last sent row as reported to users, `-1` when nothing was sent.
    pub fn last_successful_row_display(&self) -> i64 {
        self.last_successful_row.map(|r| r as i64).unwrap_or(-1)
    }
}

impl fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = "=".repeat(50);
        writeln!(f, "{}", rule)?;
        writeln!(f, "SUMMARY")?;
        writeln!(f, "{}", rule)?;
        writeln!(f, "Total rows processed: {}", self.total)?;
        writeln!(f, "Successfully sent: {}", self.sent)?;
        writeln!(f, "Failed: {}", self.failed)?;
        writeln!(f, "Skipped: {}", self.skipped)?;
        writeln!(f, "{}", rule)?;

        if self.stop == StopReason::Aborted {
            writeln!(f, "Batch aborted by an unexpected error; see the log for details.")?;
        }

        if self.stop == StopReason::RateLimited {
            let bang = "!".repeat(50);
            writeln!(f)?;
            writeln!(f, "{}", bang)?;
            writeln!(f, "RATE LIMIT REACHED")?;
            writeln!(f, "{}", bang)?;
            writeln!(
                f,
                "Last successfully processed row: {}",
                self.last_successful_row_display()
            )?;
            writeln!(f, "File has been saved with current progress.")?;
            writeln!(f, "Please wait before resuming the operation.")?;
            writeln!(f, "{}", bang)?;
        }

        Ok(())
    }
}

/// Production sink: every event becomes a structured tracing event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEvents;

impl BatchEvents for TracingEvents {
    fn batch_started(&self, rows: usize, limit: Option<usize>, preview: bool) {
        info!(rows = rows, limit = ?limit, dry_run = preview, "batch_start");
    }

    fn row_skipped(&self, row: usize, reason: &str) {
        info!(row = row, reason = %reason, "row_skipped");
    }

    fn row_failed(&self, row: usize, email: Option<&str>, failure: &RowFailure) {
        warn!(
            row = row,
            to = %email.unwrap_or("N/A"),
            reason = %failure,
            "row_failed"
        );
    }

    fn row_sent(&self, row: usize, email: &str) {
        info!(row = row, to = %email, "row_sent");
    }

    fn row_previewed(&self, row: usize, message: &OutgoingMessage) {
        info!(
            row = row,
            to = %message.to,
            subject = %message.subject,
            body = %message.body,
            "row_previewed"
        );
    }

    fn limit_reached(&self, limit: usize) {
        info!(limit = limit, "batch_limit_reached");
    }

    fn rate_limit_stop(&self, row: usize, email: &str, reason: &str) {
        error!(row = row, to = %email, reason = %reason, "batch_rate_limit_stop");
    }

    fn batch_summary(&self, summary: &BatchSummary) {
        info!(
            total = summary.total,
            sent = summary.sent,
            failed = summary.failed,
            skipped = summary.skipped,
            stop = ?summary.stop,
            last_successful_row = summary.last_successful_row_display(),
            "batch_summary"
        );
    }
}
