//! Durable row stores and the batch upsert contract.

pub mod payload;
pub mod postgrest;
pub mod sqlite;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::Event;
use payload::Coercions;

pub type Row = Map<String, Value>;

pub const DELETE_BATCH_SIZE: usize = 50;
const MAX_ERROR_BODY_CHARS: usize = 300;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store rejected request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("store request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),
    #[error("invalid store configuration: {0}")]
    Config(String),
    #[error("unexpected store response: {0}")]
    Response(String),
}

impl StoreError {
    pub(crate) fn rejected(status: u16, body: &str) -> Self {
        StoreError::Rejected {
            status,
            body: crate::scraping::base::truncate_chars(body.trim(), MAX_ERROR_BODY_CHARS),
        }
    }
}

/// A row as it lives in the store, with the store-assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: String,
    pub event: Event,
}

pub trait RowStore {
    /// Writes `rows`, merging on `conflict_column` when given. Returns how many
    /// rows the store reports as written.
    fn upsert(&self, rows: &[Row], conflict_column: Option<&str>) -> Result<usize, StoreError>;
    fn fetch_all(&self) -> Result<Vec<StoredRecord>, StoreError>;
    fn delete(&self, ids: &[String]) -> Result<usize, StoreError>;
}

#[derive(Debug, Clone)]
pub struct UpsertOptions {
    pub conflict_column: Option<String>,
    pub batch_size: usize,
    pub coercions: Coercions,
}

impl Default for UpsertOptions {
    fn default() -> Self {
        Self {
            conflict_column: Some("event_name_and_link".to_string()),
            batch_size: 200,
            coercions: Coercions::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRecord {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct UpsertReport {
    pub submitted: usize,
    pub accepted: usize,
    pub batches: usize,
    pub fallback_batches: usize,
    pub skipped: Vec<SkippedRecord>,
}

/// Submits `events` in batches. A rejected batch is retried one row at a
/// time so a single bad row only costs itself.
pub fn upsert_events<S: RowStore + ?Sized>(
    store: &S,
    events: &[Event],
    options: &UpsertOptions,
) -> UpsertReport {
    let conflict = options.conflict_column.as_deref();
    let rows: Vec<Row> = events
        .iter()
        .map(|event| payload::to_payload(event, &options.coercions))
        .collect();
    let rows = payload::dedupe_rows(rows, conflict);

    let mut report = UpsertReport {
        submitted: rows.len(),
        ..UpsertReport::default()
    };
    let batch_size = options.batch_size.max(1);
    for (idx, batch) in rows.chunks(batch_size).enumerate() {
        report.batches += 1;
        match store.upsert(batch, conflict) {
            Ok(accepted) => {
                debug!(batch = idx + 1, rows = batch.len(), accepted, "batch upserted");
                report.accepted += accepted;
            }
            Err(err) => {
                warn!(
                    batch = idx + 1,
                    rows = batch.len(),
                    "batch rejected, retrying row by row: {err}"
                );
                report.fallback_batches += 1;
                for row in batch {
                    match store.upsert(std::slice::from_ref(row), conflict) {
                        Ok(accepted) => report.accepted += accepted,
                        Err(err) => {
                            let key = payload::row_label(row, conflict);
                            warn!(key = %key, "row skipped: {err}");
                            report.skipped.push(SkippedRecord {
                                key,
                                reason: err.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }
    info!(
        submitted = report.submitted,
        accepted = report.accepted,
        skipped = report.skipped.len(),
        "upsert finished"
    );
    report
}

/// Deletes `ids` in fixed-size batches; a failing batch is logged and the
/// rest continue. Returns the number of rows removed.
pub fn delete_records<S: RowStore + ?Sized>(store: &S, ids: &[String]) -> usize {
    let mut deleted = 0;
    for batch in ids.chunks(DELETE_BATCH_SIZE) {
        match store.delete(batch) {
            Ok(count) => deleted += count,
            Err(err) => warn!(rows = batch.len(), "delete batch failed: {err}"),
        }
    }
    deleted
}
