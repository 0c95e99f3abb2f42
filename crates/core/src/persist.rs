use crate::models::Record;
use crate::traits::VectorStore;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct InsertReport {
    pub batches_ok: usize,
    pub batches_degraded: usize,
    pub rows_ok: usize,
    pub row_failures: Vec<RowFailure>,
}

#[derive(Debug)]
pub struct RowFailure {
    pub id: Uuid,
    pub reason: String,
}

impl InsertReport {
    pub fn merge(&mut self, other: InsertReport) {
        self.batches_ok += other.batches_ok;
        self.batches_degraded += other.batches_degraded;
        self.rows_ok += other.rows_ok;
        self.row_failures.extend(other.row_failures);
    }
}

/// Inserts records in fixed-size batches. A failed batch is retried row by
/// row so a single malformed record cannot block its neighbours; row-level
/// failures are tallied, never propagated.
pub async fn persist_records(
    store: &dyn VectorStore,
    records: &[Record],
    batch_size: usize,
) -> InsertReport {
    let mut report = InsertReport::default();

    for batch in records.chunks(batch_size.max(1)) {
        match store.insert(batch).await {
            Ok(()) => {
                report.batches_ok += 1;
                report.rows_ok += batch.len();
            }
            Err(batch_error) => {
                warn!(rows = batch.len(), error = %batch_error, "bulk insert failed, retrying row by row");
                report.batches_degraded += 1;

                for record in batch {
                    match store.insert_one(record).await {
                        Ok(()) => report.rows_ok += 1,
                        Err(row_error) => {
                            warn!(record_id = %record.id, error = %row_error, "row insert failed");
                            report.row_failures.push(RowFailure {
                                id: record.id,
                                reason: row_error.to_string(),
                            });
                        }
                    }
                }
            }
        }
    }

    info!(
        rows_ok = report.rows_ok,
        row_failures = report.row_failures.len(),
        "persistence finished"
    );
    report
}
