//! Batch orchestration - the row-by-row send loop.
//!
//! Rows are processed strictly in order, one send in flight at a time:
//!
//! ```text
//! Row → validate → render subject/body → preview | send_email → StatusUpdates
//! ```
//!
//! The loop never mutates the table. Status changes are collected in a
//! [`StatusUpdates`] side-table and applied by the caller once the loop ends,
//! whatever the reason it ended.

use thiserror::Error;

use crate::report::{BatchEvents, RowFailure, TemplateKind};
use crate::send::{send_email, OutgoingMessage, RetryPolicy, SendCapability, SendStatus};
use crate::table::{Row, RowStatus, StatusUpdates};
use crate::template::render;
use crate::validate::{validate, Validation};

/// How rendered messages leave the orchestrator.
#[derive(Clone, Copy)]
pub enum Dispatch<'a> {
    /// Dry run: count rendered rows as sent, touch nothing
    Preview,
    Send {
        capability: &'a dyn SendCapability,
        policy: RetryPolicy,
    },
}

/// Running counters for a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchState {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    pub last_successful_row: Option<usize>,
    pub rate_limited: bool,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Completed,
    LimitReached,
    RateLimited,
    /// A collaborator fault ended the batch; see [`BatchAborted`]
    Aborted,
}

/// A batch that ran to one of its normal stopping points.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub state: BatchState,
    pub stop: StopReason,
    pub updates: StatusUpdates,
}

/// A collaborator fault stopped the batch mid-row.
///
/// Carries the progress made before the fault so it can still be persisted.
#[derive(Debug, Error)]
#[error("Unexpected error while processing row {row}: {fault:#}")]
pub struct BatchAborted {
    pub row: usize,
    pub fault: anyhow::Error,
    pub state: BatchState,
    pub updates: StatusUpdates,
}

/// Drives one batch over a set of rows.
pub struct Orchestrator<'a> {
    dispatch: Dispatch<'a>,
    events: &'a dyn BatchEvents,
    limit: Option<usize>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(dispatch: Dispatch<'a>, events: &'a dyn BatchEvents) -> Self {
        Self {
            dispatch,
            events,
            limit: None,
        }
    }

    /// Cap on rows that end up sent or failed; skipped rows do not count.
    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Process `rows` in order.
    ///
    /// `status_column` is never offered to the templates as a placeholder.
    pub async fn run(
        &self,
        rows: &[Row],
        status_column: &str,
        subject_template: &str,
        body_template: &str,
    ) -> Result<BatchOutcome, BatchAborted> {
        let mut state = BatchState::default();
        let mut updates = StatusUpdates::default();
        let mut stop = StopReason::Completed;

        self.events.batch_started(
            rows.len(),
            self.limit,
            matches!(self.dispatch, Dispatch::Preview),
        );

        for row in rows {
            if let Some(limit) = self.limit {
                if state.sent + state.failed >= limit {
                    self.events.limit_reached(limit);
                    stop = StopReason::LimitReached;
                    break;
                }
            }

            let email = match validate(row, status_column) {
                Validation::AlreadySent => {
                    state.skipped += 1;
                    self.events.row_skipped(row.index, "Already sent");
                    continue;
                }
                Validation::Invalid { email, reason } => {
                    let failure = RowFailure::Invalid(reason);
                    self.fail(&mut state, &mut updates, row.index, email.as_deref(), failure);
                    continue;
                }
                Validation::Ok { email, .. } => email,
            };

            let subject = render(subject_template, row, Some(status_column));
            if !subject.is_success() {
                let failure = RowFailure::MissingPlaceholders {
                    template: TemplateKind::Subject,
                    names: subject.missing,
                };
                self.fail(&mut state, &mut updates, row.index, Some(&email), failure);
                continue;
            }

            let body = render(body_template, row, Some(status_column));
            if !body.is_success() {
                let failure = RowFailure::MissingPlaceholders {
                    template: TemplateKind::Body,
                    names: body.missing,
                };
                self.fail(&mut state, &mut updates, row.index, Some(&email), failure);
                continue;
            }

            let (capability, policy) = match self.dispatch {
                Dispatch::Preview => {
                    let message = OutgoingMessage {
                        to: email,
                        subject: subject.text,
                        body: body.text,
                    };
                    self.events.row_previewed(row.index, &message);
                    state.sent += 1;
                    continue;
                }
                Dispatch::Send { capability, policy } => (capability, policy),
            };

            let sent = send_email(capability, &policy, &email, &subject.text, &body.text).await;
            let outcome = match sent {
                Ok(outcome) => outcome,
                Err(fault) => {
                    return Err(BatchAborted {
                        row: row.index,
                        fault,
                        state,
                        updates,
                    });
                }
            };

            match outcome.status {
                SendStatus::Sent => {
                    updates.record(row.index, RowStatus::Sent);
                    state.sent += 1;
                    state.last_successful_row = Some(row.index);
                    self.events.row_sent(row.index, &email);
                }
                SendStatus::RateLimited => {
                    state.rate_limited = true;
                    stop = StopReason::RateLimited;
                    let reason = outcome.error.unwrap_or_default();
                    self.events.rate_limit_stop(row.index, &email, &reason);
                    break;
                }
                SendStatus::Failed => {
                    let failure = RowFailure::Send(outcome.error.unwrap_or_default());
                    self.fail(&mut state, &mut updates, row.index, Some(&email), failure);
                }
            }
        }

        Ok(BatchOutcome {
            state,
            stop,
            updates,
        })
    }

    fn fail(
        &self,
        state: &mut BatchState,
        updates: &mut StatusUpdates,
        index: usize,
        email: Option<&str>,
        failure: RowFailure,
    ) {
        updates.record(index, RowStatus::Failed);
        state.failed += 1;
        self.events.row_failed(index, email, &failure);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::testing::{Event, RecordingEvents};
    use crate::send::testing::ScriptedCapability;
    use crate::send::Delivery;
    use crate::table::Value;
    use std::io;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    const STATUS: &str = "status";
    const SUBJECT: &str = "Hello {name}";
    const BODY: &str = "Hi {name}, welcome to {city}.";

    fn row(index: usize, email: &str, name: &str, city: &str, status: &str) -> Row {
        Row::new(
            index,
            vec![
                ("email".into(), Value::from(email)),
                ("name".into(), Value::from(name)),
                ("city".into(), Value::from(city)),
                (STATUS.into(), Value::from(status)),
            ],
        )
    }

    fn valid(index: usize) -> Row {
        row(index, &format!("user{}@example.com", index), "Ann", "Oslo", "")
    }

    fn send<'a>(capability: &'a ScriptedCapability) -> Dispatch<'a> {
        Dispatch::Send {
            capability,
            policy: RetryPolicy::new(3, Duration::ZERO),
        }
    }

    #[tokio::test]
    async fn test_all_rows_sent() {
        let provider = ScriptedCapability::new(vec![]);
        let events = RecordingEvents::default();
        let rows = vec![valid(0), valid(1)];

        let outcome = Orchestrator::new(send(&provider), &events)
            .run(&rows, STATUS, SUBJECT, BODY)
            .await
            .unwrap();

        assert_eq!(outcome.stop, StopReason::Completed);
        assert_eq!(outcome.state.sent, 2);
        assert_eq!(outcome.state.last_successful_row, Some(1));
        assert_eq!(outcome.updates.get(0), Some(RowStatus::Sent));
        assert_eq!(outcome.updates.get(1), Some(RowStatus::Sent));

        let calls = provider.calls.lock().unwrap().clone();
        assert_eq!(calls[0].subject, "Hello Ann");
        assert_eq!(calls[0].body, "Hi Ann, welcome to Oslo.");
    }

    #[tokio::test]
    async fn test_already_sent_rows_are_skipped_and_untouched() {
        let provider = ScriptedCapability::new(vec![]);
        let events = RecordingEvents::default();
        let rows = vec![
            row(0, "a@example.com", "Ann", "Oslo", "sent"),
            valid(1),
            row(2, "c@example.com", "Cy", "Rome", "sent"),
        ];

        let outcome = Orchestrator::new(send(&provider), &events)
            .run(&rows, STATUS, SUBJECT, BODY)
            .await
            .unwrap();

        assert_eq!(outcome.state.skipped, 2);
        assert_eq!(outcome.state.sent, 1);
        assert_eq!(outcome.updates.get(0), None);
        assert_eq!(outcome.updates.get(2), None);
        assert_eq!(provider.recipients(), vec!["user1@example.com"]);
    }

    #[tokio::test]
    async fn test_missing_placeholder_fails_row_without_sending() {
        let provider = ScriptedCapability::new(vec![]);
        let events = RecordingEvents::default();
        let rows = vec![row(0, "a@example.com", "Ann", "", "")];

        let outcome = Orchestrator::new(send(&provider), &events)
            .run(&rows, STATUS, SUBJECT, BODY)
            .await
            .unwrap();

        assert_eq!(outcome.state.failed, 1);
        assert_eq!(outcome.updates.get(0), Some(RowStatus::Failed));
        assert_eq!(provider.call_count(), 0);
        assert_eq!(
            events.events(),
            vec![Event::Failed(
                0,
                RowFailure::MissingPlaceholders {
                    template: TemplateKind::Body,
                    names: vec!["city".into()],
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_subject_placeholders_reported_separately() {
        let provider = ScriptedCapability::new(vec![]);
        let events = RecordingEvents::default();
        let rows = vec![valid(0)];

        Orchestrator::new(send(&provider), &events)
            .run(&rows, STATUS, "Re: {order_id}", BODY)
            .await
            .unwrap();

        assert_eq!(
            events.events(),
            vec![Event::Failed(
                0,
                RowFailure::MissingPlaceholders {
                    template: TemplateKind::Subject,
                    names: vec!["order_id".into()],
                }
            )]
        );
    }

    #[tokio::test]
    async fn test_status_column_is_not_a_placeholder() {
        let provider = ScriptedCapability::new(vec![]);
        let events = RecordingEvents::default();
        let rows = vec![row(0, "a@example.com", "Ann", "Oslo", "failed")];

        let outcome = Orchestrator::new(send(&provider), &events)
            .run(&rows, STATUS, "{status}", BODY)
            .await
            .unwrap();

        assert_eq!(outcome.updates.get(0), Some(RowStatus::Failed));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rate_limit_stops_batch_and_leaves_row_untouched() {
        let provider = ScriptedCapability::new(vec![
            Ok(Delivery::Sent { id: None }),
            Ok(Delivery::Rejected("HTTP Error 400: bad".into())),
            Ok(Delivery::RateLimited("Rate limit exceeded".into())),
        ]);
        let events = RecordingEvents::default();
        let rows = vec![valid(0), valid(1), valid(2), valid(3), valid(4)];

        let outcome = Orchestrator::new(send(&provider), &events)
            .run(&rows, STATUS, SUBJECT, BODY)
            .await
            .unwrap();

        assert_eq!(outcome.stop, StopReason::RateLimited);
        assert!(outcome.state.rate_limited);
        assert_eq!(outcome.state.last_successful_row, Some(0));
        assert_eq!(outcome.updates.get(1), Some(RowStatus::Failed));
        assert_eq!(outcome.updates.get(2), None);
        assert_eq!(outcome.updates.get(3), None);
        assert_eq!(outcome.updates.len(), 2);
        assert_eq!(provider.call_count(), 3);
        assert_eq!(events.events().last(), Some(&Event::RateLimitStop(2)));
    }

    #[tokio::test]
    async fn test_rate_limit_on_first_row_reports_no_success() {
        let provider =
            ScriptedCapability::new(vec![Ok(Delivery::RateLimited("quota".into()))]);
        let events = RecordingEvents::default();
        let rows = vec![valid(0), valid(1)];

        let outcome = Orchestrator::new(send(&provider), &events)
            .run(&rows, STATUS, SUBJECT, BODY)
            .await
            .unwrap();

        assert_eq!(outcome.state.last_successful_row, None);
        assert!(outcome.updates.is_empty());
    }

    #[tokio::test]
    async fn test_limit_counts_sent_and_failed_not_skipped() {
        let provider = ScriptedCapability::new(vec![
            Ok(Delivery::Sent { id: None }),
            Ok(Delivery::Rejected("nope".into())),
        ]);
        let events = RecordingEvents::default();
        let rows = vec![
            row(0, "a@example.com", "Ann", "Oslo", "sent"),
            valid(1),
            valid(2),
            valid(3),
        ];

        let outcome = Orchestrator::new(send(&provider), &events)
            .with_limit(Some(2))
            .run(&rows, STATUS, SUBJECT, BODY)
            .await
            .unwrap();

        assert_eq!(outcome.stop, StopReason::LimitReached);
        assert_eq!(outcome.state.skipped, 1);
        assert_eq!(outcome.state.sent + outcome.state.failed, 2);
        assert_eq!(outcome.updates.get(3), None);
        assert_eq!(events.events().last(), Some(&Event::LimitReached(2)));
    }

    #[tokio::test]
    async fn test_limit_zero_processes_nothing() {
        let provider = ScriptedCapability::new(vec![]);
        let events = RecordingEvents::default();
        let rows = vec![valid(0)];

        let outcome = Orchestrator::new(send(&provider), &events)
            .with_limit(Some(0))
            .run(&rows, STATUS, SUBJECT, BODY)
            .await
            .unwrap();

        assert_eq!(outcome.stop, StopReason::LimitReached);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn test_preview_counts_without_dispatch_or_status() {
        let events = RecordingEvents::default();
        let rows = vec![valid(0), row(1, "bad", "Bo", "Oslo", "")];

        let outcome = Orchestrator::new(Dispatch::Preview, &events)
            .run(&rows, STATUS, SUBJECT, BODY)
            .await
            .unwrap();

        assert_eq!(outcome.state.sent, 1);
        assert_eq!(outcome.state.failed, 1);
        assert_eq!(outcome.state.last_successful_row, None);
        assert_eq!(outcome.updates.get(0), None);
        assert_eq!(outcome.updates.get(1), Some(RowStatus::Failed));

        match &events.events()[0] {
            Event::Previewed(0, message) => {
                assert_eq!(message.to, "user0@example.com");
                assert_eq!(message.subject, "Hello Ann");
            }
            other => panic!("Expected preview, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fault_aborts_with_partial_progress() {
        let provider = ScriptedCapability::new(vec![
            Ok(Delivery::Sent { id: None }),
            Err(anyhow::anyhow!("capability poisoned")),
        ]);
        let events = RecordingEvents::default();
        let rows = vec![valid(0), valid(1), valid(2)];

        let aborted = Orchestrator::new(send(&provider), &events)
            .run(&rows, STATUS, SUBJECT, BODY)
            .await
            .unwrap_err();

        assert_eq!(aborted.row, 1);
        assert_eq!(aborted.state.sent, 1);
        assert_eq!(aborted.updates.get(0), Some(RowStatus::Sent));
        assert_eq!(aborted.updates.get(1), None);
        assert!(aborted.to_string().contains("capability poisoned"));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn test_transient_exhaustion_fails_row_and_continues() {
        let provider = ScriptedCapability::new(vec![
            Ok(Delivery::Transient("HTTP Error 503: backend".into())),
            Ok(Delivery::Transient("HTTP Error 503: backend".into())),
            Ok(Delivery::Transient("HTTP Error 500: backend".into())),
        ]);
        let events = RecordingEvents::default();
        let rows = vec![valid(0), valid(1)];

        let outcome = Orchestrator::new(send(&provider), &events)
            .run(&rows, STATUS, SUBJECT, BODY)
            .await
            .unwrap();

        assert_eq!(outcome.stop, StopReason::Completed);
        assert_eq!(outcome.state.failed, 1);
        assert_eq!(outcome.state.sent, 1);
        assert_eq!(outcome.updates.get(0), Some(RowStatus::Failed));
        assert_eq!(outcome.updates.get(1), Some(RowStatus::Sent));
        assert_eq!(
            provider.recipients(),
            vec![
                "user0@example.com",
                "user0@example.com",
                "user0@example.com",
                "user1@example.com",
            ]
        );

        match &events.events()[0] {
            Event::Failed(0, RowFailure::Send(reason)) => {
                assert!(reason.starts_with("Failed after 3 attempts"), "{}", reason);
            }
            other => panic!("Expected send failure, got {:?}", other),
        }
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[tokio::test]
    async fn test_run_reports_only_through_sink() {
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_max_level(tracing::Level::TRACE)
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let events = RecordingEvents::default();
        let rows = vec![valid(0)];

        let outcome = Orchestrator::new(Dispatch::Preview, &events)
            .with_limit(Some(5))
            .run(&rows, STATUS, SUBJECT, BODY)
            .await
            .unwrap();

        assert_eq!(outcome.state.sent, 1);
        assert_eq!(*events.started.lock().unwrap(), Some((1, Some(5), true)));

        let captured = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(captured.is_empty(), "unexpected direct log output: {}", captured);
    }
}
