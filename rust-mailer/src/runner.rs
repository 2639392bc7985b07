//! Batch runner - the single entry point behind the command line.
//!
//! ```text
//! body template → load table → authenticate → Orchestrator → apply → save → summary
//! ```
//!
//! Dry runs skip authentication and saving: nothing is dispatched and no
//! status cell changes, so there is nothing to persist.

use std::path::PathBuf;

use tracing::{error, info};

use crate::auth::authenticate;
use crate::batch::{Dispatch, Orchestrator, StopReason};
use crate::config::Config;
use crate::error::{exit_code, MailerError};
use crate::report::{BatchEvents, BatchSummary};
use crate::send::{RetryPolicy, SendCapability};
use crate::table::{load_table, save_table, Table};

/// Everything a caller chooses for one run.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// CSV or Excel recipient list
    pub file: PathBuf,
    /// Subject template with `{placeholders}`
    pub subject: String,
    /// File holding the body template
    pub body_path: PathBuf,
    /// Cap on sent + failed rows
    pub limit: Option<usize>,
    /// Render and report only; no authentication, dispatch, or save
    pub dry_run: bool,
    /// Overwrite Excel sources instead of writing an `_updated` sibling
    pub in_place: bool,
}

/// Inputs loaded before any message is sent.
#[derive(Debug, Clone)]
pub struct PreparedBatch {
    pub table: Table,
    pub body_template: String,
}

/// Result of a run that reached the end of its loop.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub summary: BatchSummary,
    /// Where statuses were written; `None` for dry runs
    pub saved_path: Option<PathBuf>,
}

impl BatchResult {
    pub fn exit_code(&self) -> u8 {
        match self.summary.stop {
            StopReason::RateLimited => exit_code::RATE_LIMITED,
            StopReason::Aborted => exit_code::UNEXPECTED,
            StopReason::Completed | StopReason::LimitReached => exit_code::SUCCESS,
        }
    }
}

/// Run one batch end to end.
pub async fn run_batch(
    request: &BatchRequest,
    config: &Config,
    events: &dyn BatchEvents,
) -> Result<BatchResult, MailerError> {
    let prepared = prepare(request).await?;

    let capability = if request.dry_run {
        info!("auth_skipped_dry_run");
        None
    } else {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| crate::auth::AuthError::Failed(format!("HTTP client: {}", e)))?;
        Some(authenticate(config, &client).await?)
    };

    execute(
        prepared,
        request,
        config.retry_policy(),
        capability.as_ref().map(|c| c as &dyn SendCapability),
        events,
    )
    .await
}

/// Read the body template and load the recipient table.
pub async fn prepare(request: &BatchRequest) -> Result<PreparedBatch, MailerError> {
    if request.subject.trim().is_empty() {
        return Err(MailerError::MissingInput("subject template is empty".into()));
    }

    info!(path = %request.body_path.display(), "body_template_loading");
    let body_template = tokio::fs::read_to_string(&request.body_path)
        .await
        .map_err(|source| MailerError::BodyTemplate {
            path: request.body_path.clone(),
            source,
        })?;

    info!(path = %request.file.display(), "table_loading");
    let table = load_table(&request.file)?;

    Ok(PreparedBatch {
        table,
        body_template,
    })
}

/// Run the orchestrator over a prepared batch, then persist and summarise.
///
/// `capability` is ignored for dry runs.
pub async fn execute(
    prepared: PreparedBatch,
    request: &BatchRequest,
    policy: RetryPolicy,
    capability: Option<&dyn SendCapability>,
    events: &dyn BatchEvents,
) -> Result<BatchResult, MailerError> {
    let PreparedBatch {
        mut table,
        body_template,
    } = prepared;

    let dispatch = match capability {
        Some(capability) if !request.dry_run => Dispatch::Send { capability, policy },
        None if !request.dry_run => {
            return Err(MailerError::MissingInput(
                "no send capability for a live run".into(),
            ))
        }
        _ => Dispatch::Preview,
    };

    let result = Orchestrator::new(dispatch, events)
        .with_limit(request.limit)
        .run(&table.rows, &table.status_column, &request.subject, &body_template)
        .await;

    match result {
        Ok(outcome) => {
            table.apply(&outcome.updates);
            let summary = BatchSummary::new(&outcome.state, outcome.stop);

            let saved_path = if request.dry_run {
                None
            } else {
                match save_table(&table, request.in_place) {
                    Ok(path) => Some(path),
                    Err(e) => {
                        error!(error = %e, "table_save_failed");
                        events.batch_summary(&summary);
                        return Err(e.into());
                    }
                }
            };

            events.batch_summary(&summary);
            Ok(BatchResult {
                summary,
                saved_path,
            })
        }
        Err(aborted) => {
            error!(
                row = aborted.row,
                error = ?aborted.fault,
                "batch_aborted"
            );

            table.apply(&aborted.updates);
            if !request.dry_run {
                match save_table(&table, request.in_place) {
                    Ok(path) => info!(path = %path.display(), "batch_partial_progress_saved"),
                    Err(e) => error!(error = %e, "batch_partial_save_failed"),
                }
            }

            events.batch_summary(&BatchSummary::new(&aborted.state, StopReason::Aborted));
            Err(aborted.into())
        }
    }
}
