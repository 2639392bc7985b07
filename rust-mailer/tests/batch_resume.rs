use std::fs;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bulkmailer::report::BatchEvents;
use bulkmailer::runner::{execute, prepare};
use bulkmailer::{
    BatchRequest, BatchSummary, Delivery, OutgoingMessage, RetryPolicy, RowFailure,
    SendCapability, StopReason,
};
use tempfile::TempDir;

const BODY: &str = "Dear {name},\nyour seat in {city} is confirmed.\n";

/// Provider that rate-limits after a fixed number of deliveries.
struct QuotaProvider {
    quota: usize,
    delivered: Mutex<Vec<String>>,
}

impl QuotaProvider {
    fn new(quota: usize) -> Self {
        Self {
            quota,
            delivered: Mutex::new(Vec::new()),
        }
    }

    fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl SendCapability for QuotaProvider {
    async fn deliver(&self, message: &OutgoingMessage) -> anyhow::Result<Delivery> {
        let mut delivered = self.delivered.lock().unwrap();
        if delivered.len() >= self.quota {
            return Ok(Delivery::RateLimited("Rate limit exceeded: quota".into()));
        }
        delivered.push(message.to.clone());
        Ok(Delivery::Sent { id: None })
    }
}

#[derive(Default)]
struct Summaries {
    failures: Mutex<Vec<(usize, RowFailure)>>,
    previews: Mutex<Vec<usize>>,
    summaries: Mutex<Vec<BatchSummary>>,
}

impl BatchEvents for Summaries {
    fn row_skipped(&self, _row: usize, _reason: &str) {}

    fn row_failed(&self, row: usize, _email: Option<&str>, failure: &RowFailure) {
        self.failures.lock().unwrap().push((row, failure.clone()));
    }

    fn row_sent(&self, _row: usize, _email: &str) {}

    fn row_previewed(&self, row: usize, _message: &OutgoingMessage) {
        self.previews.lock().unwrap().push(row);
    }

    fn limit_reached(&self, _limit: usize) {}

    fn rate_limit_stop(&self, _row: usize, _email: &str, _reason: &str) {}

    fn batch_summary(&self, summary: &BatchSummary) {
        self.summaries.lock().unwrap().push(summary.clone());
    }
}

fn request(dir: &TempDir, csv: &str) -> BatchRequest {
    let file = dir.path().join("guests.csv");
    let body_path = dir.path().join("body.txt");
    fs::write(&file, csv).unwrap();
    fs::write(&body_path, BODY).unwrap();

    BatchRequest {
        file,
        subject: "See you in {city}, {name}".into(),
        body_path,
        limit: None,
        dry_run: false,
        in_place: false,
    }
}

fn policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::ZERO)
}

#[tokio::test]
async fn dry_run_mixed_rows_reports_without_dispatch() {
    let dir = TempDir::new().unwrap();
    let csv = "\
email,name,city,status
ann@example.com,Ann,Oslo,sent
bob@example.com,Bob,Rome,sent
not-an-email,Cy,Lima,
dee@example.com,Dee,,
eve@example.com,Eve,Kyiv,
";
    let mut req = request(&dir, csv);
    req.dry_run = true;
    let provider = QuotaProvider::new(100);
    let events = Summaries::default();

    let prepared = prepare(&req).await.unwrap();
    assert_eq!(prepared.table.status_column, "status");
    let result = execute(prepared, &req, policy(), Some(&provider), &events)
        .await
        .unwrap();

    assert_eq!(result.summary.sent, 1);
    assert_eq!(result.summary.failed, 2);
    assert_eq!(result.summary.skipped, 2);
    assert_eq!(result.summary.total, 5);
    assert_eq!(result.summary.stop, StopReason::Completed);
    assert_eq!(result.saved_path, None);
    assert!(provider.delivered().is_empty());
    assert_eq!(*events.previews.lock().unwrap(), vec![4]);

    let failed_rows: Vec<usize> = events
        .failures
        .lock()
        .unwrap()
        .iter()
        .map(|(row, _)| *row)
        .collect();
    assert_eq!(failed_rows, vec![2, 3]);

    // Nothing was written back
    assert_eq!(fs::read_to_string(&req.file).unwrap(), csv);
}

#[tokio::test]
async fn foreign_status_column_is_left_alone() {
    let dir = TempDir::new().unwrap();
    let csv = "\
email,name,city,status
ann@example.com,Ann,Oslo,vip
bob@example.com,Bob,Rome,
";
    let req = request(&dir, csv);
    let provider = QuotaProvider::new(100);
    let events = Summaries::default();

    let prepared = prepare(&req).await.unwrap();
    assert_eq!(prepared.table.status_column, "status_1");
    let result = execute(prepared, &req, policy(), Some(&provider), &events)
        .await
        .unwrap();

    assert_eq!(result.summary.sent, 2);
    assert_eq!(
        fs::read_to_string(&req.file).unwrap(),
        "\
email,name,city,status,status_1
ann@example.com,Ann,Oslo,vip,sent
bob@example.com,Bob,Rome,,sent
"
    );
}

#[tokio::test]
async fn rate_limited_run_resumes_without_resending() {
    let dir = TempDir::new().unwrap();
    let csv = "\
email,name,city
ann@example.com,Ann,Oslo
bob@example.com,Bob,Rome
cy@example.com,Cy,Lima
dee@example.com,Dee,Kyiv
";
    let req = request(&dir, csv);

    let first = QuotaProvider::new(2);
    let events = Summaries::default();
    let prepared = prepare(&req).await.unwrap();
    let result = execute(prepared, &req, policy(), Some(&first), &events)
        .await
        .unwrap();

    assert_eq!(result.summary.stop, StopReason::RateLimited);
    assert_eq!(result.summary.last_successful_row, Some(1));
    assert_eq!(first.delivered(), vec!["ann@example.com", "bob@example.com"]);
    assert_eq!(
        fs::read_to_string(&req.file).unwrap(),
        "\
email,name,city,status
ann@example.com,Ann,Oslo,sent
bob@example.com,Bob,Rome,sent
cy@example.com,Cy,Lima,
dee@example.com,Dee,Kyiv,
"
    );

    let second = QuotaProvider::new(100);
    let events = Summaries::default();
    let prepared = prepare(&req).await.unwrap();
    assert_eq!(prepared.table.status_column, "status");
    let result = execute(prepared, &req, policy(), Some(&second), &events)
        .await
        .unwrap();

    assert_eq!(result.summary.stop, StopReason::Completed);
    assert_eq!(result.summary.skipped, 2);
    assert_eq!(result.summary.sent, 2);
    assert_eq!(second.delivered(), vec!["cy@example.com", "dee@example.com"]);
    assert!(fs::read_to_string(&req.file)
        .unwrap()
        .ends_with("cy@example.com,Cy,Lima,sent\ndee@example.com,Dee,Kyiv,sent\n"));
}
