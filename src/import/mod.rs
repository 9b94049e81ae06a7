//! Bulk import: record sources, importers and the worker pool driving them.

pub mod importers;
pub mod params;
pub mod pool;
pub mod source;

use crate::client::Civi;
use crate::error::{CiviError, CiviResult};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

pub use importers::{Importer, Outcome};
pub use params::{ImportParameters, NoteMode};
pub use pool::{PoolStats, WorkerPool};
pub use source::{CsvRecordSource, Record};

/// Totals of one import run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub pool: PoolStats,
    pub written: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub elapsed: Duration,
}

impl fmt::Display for ImportSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} records in {:.2?}: {} written, {} unchanged, {} skipped, {} failed",
            self.pool.processed,
            self.elapsed,
            self.written,
            self.unchanged,
            self.skipped,
            self.pool.failed
        )
    }
}

#[derive(Default)]
struct OutcomeTally {
    written: AtomicUsize,
    unchanged: AtomicUsize,
    skipped: AtomicUsize,
}

impl OutcomeTally {
    fn count(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Written(_) => &self.written,
            Outcome::Unchanged => &self.unchanged,
            Outcome::Skipped(reason) => {
                log::warn!("record skipped: {}", reason);
                &self.skipped
            }
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Run `importer` over `source` on `pool`.
pub fn run_import<I>(
    civi: &Civi,
    importer: Importer,
    source: I,
    params: &ImportParameters,
    pool: &WorkerPool,
) -> ImportSummary
where
    I: IntoIterator<Item = CiviResult<Record>>,
{
    let started = Instant::now();
    let tally = OutcomeTally::default();
    log::info!("starting '{}' import with {} worker(s)", importer, pool.workers());

    let stats = pool.run(source, |record: &CiviResult<Record>| {
        let record = match record {
            Ok(record) => record.clone(),
            Err(err) => return Err(CiviError::record(format!("unreadable record: {err}"))),
        };
        let outcome = importer.import(civi, record, params)?;
        tally.count(&outcome);
        Ok(outcome)
    });

    let summary = ImportSummary {
        pool: stats,
        written: tally.written.load(Ordering::Relaxed),
        unchanged: tally.unchanged.load(Ordering::Relaxed),
        skipped: tally.skipped.load(Ordering::Relaxed),
        elapsed: started.elapsed(),
    };
    log::info!("'{}' import completed: {}", importer, summary);
    log::info!("{}", civi.stats());
    summary
}
