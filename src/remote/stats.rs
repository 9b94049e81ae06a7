//! Remote call statistics.
//!
//! Counts calls and cumulative wall time per `Entity.action`, shared by all
//! workers of an import.

use dashmap::DashMap;
use std::fmt;
use std::time::Duration;

/// Counters for one `Entity.action` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounter {
    pub calls: u64,
    pub failures: u64,
    pub elapsed: Duration,
}

impl CallCounter {
    /// Sum another counter into this one.
    pub fn merge(&mut self, other: CallCounter) {
        self.calls += other.calls;
        self.failures += other.failures;
        self.elapsed += other.elapsed;
    }
}

/// Concurrent per-operation call statistics.
#[derive(Debug, Default)]
pub struct CallStats {
    by_operation: DashMap<String, CallCounter>,
}

impl CallStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entity: &str, action: &str, elapsed: Duration, failed: bool) {
        let mut counter = self
            .by_operation
            .entry(format!("{entity}.{action}"))
            .or_default();
        counter.calls += 1;
        counter.elapsed += elapsed;
        if failed {
            counter.failures += 1;
        }
    }

    pub fn totals(&self) -> CallCounter {
        let mut total = CallCounter::default();
        for entry in self.by_operation.iter() {
            total.merge(*entry.value());
        }
        total
    }

    /// Sorted copy of the per-operation counters.
    pub fn snapshot(&self) -> Vec<(String, CallCounter)> {
        let mut rows: Vec<_> = self
            .by_operation
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}

impl fmt::Display for CallStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.totals();
        let average = if total.calls == 0 {
            Duration::ZERO
        } else {
            total.elapsed / u32::try_from(total.calls).unwrap_or(u32::MAX)
        };
        write!(
            f,
            "{} API calls ({} failed) in {:.2?}, avg {:.2?}",
            total.calls, total.failures, total.elapsed, average
        )?;
        for (operation, counter) in self.snapshot() {
            write!(f, "; {operation}: {}", counter.calls)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_per_operation() {
        let stats = CallStats::new();
        stats.record("Contact", "get", Duration::from_millis(10), false);
        stats.record("Contact", "get", Duration::from_millis(30), false);
        stats.record("Contact", "create", Duration::from_millis(5), true);

        let rows = stats.snapshot();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "Contact.create");
        assert_eq!(rows[1].1.calls, 2);

        let total = stats.totals();
        assert_eq!(total.calls, 3);
        assert_eq!(total.failures, 1);
        assert_eq!(total.elapsed, Duration::from_millis(45));
    }

    #[test]
    fn display_summarises() {
        let stats = CallStats::new();
        stats.record("Tag", "get", Duration::from_millis(4), false);
        let text = stats.to_string();
        assert!(text.starts_with("1 API calls (0 failed)"));
        assert!(text.ends_with("Tag.get: 1"));
    }
}
