//! Chunked progress reporting for the worker pool.
//!
//! The scheduler emits one event per completed chunk of tasks rather than
//! one per file, which keeps log volume bounded on large runs.

use tracing::info;

/// A single progress event.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// Work is being distributed across the pool.
    Started { total: u64, workers: usize },
    /// `n` of `total` tasks have finished (successfully or not).
    ChunkCompleted { n: u64, total: u64 },
    /// An interrupt was received; the pool is draining.
    Draining { n: u64, total: u64 },
}

/// Receives progress events from the scheduler.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Writes progress through `tracing` at info level.
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Started { total, workers } => info!(
                "Distributing work for {} file(s) across {} worker(s)",
                format_number(total),
                workers
            ),
            ProgressEvent::ChunkCompleted { n, total } => info!(
                "Chunk completed. Metadata extraction progress at {:.1}% ({} / {})",
                percent(n, total),
                format_number(n),
                format_number(total)
            ),
            ProgressEvent::Draining { n, total } => info!(
                "Interrupt received; draining worker pool at {} / {} files",
                format_number(n),
                format_number(total)
            ),
        }
    }
}

fn percent(n: u64, total: u64) -> f64 {
    if total == 0 {
        100.0
    } else {
        100.0 * n as f64 / total as f64
    }
}

/// Thousands-grouped decimal, e.g. `12,345`.
fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let head = match digits.len() % 3 {
        0 => 3,
        r => r,
    };
    let (first, rest) = digits.split_at(head);
    let mut grouped = String::from(first);
    for group in rest.as_bytes().chunks(3) {
        grouped.push(',');
        grouped.extend(group.iter().map(|&b| b as char));
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_grouped_by_thousands() {
        assert_eq!(format_number(7), "7");
        assert_eq!(format_number(42_000), "42,000");
        assert_eq!(format_number(365_250), "365,250");
        assert_eq!(format_number(u64::MAX), "18,446,744,073,709,551,615");
    }

    #[test]
    fn percent_handles_empty_total() {
        assert_eq!(percent(0, 0), 100.0);
        assert_eq!(percent(5, 10), 50.0);
    }
}
