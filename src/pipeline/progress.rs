//! Progress notifications for long batch runs.
//!
//! The orchestrator reports what it is doing through a [`ProgressObserver`].
//! Every method has a no-op default, so an observer only overrides what it
//! cares about.
//!
//! # Example
//!
//! ```
//! use docvl::pipeline::{Checkpoint, ProgressObserver};
//!
//! struct PrintEta;
//!
//! impl ProgressObserver for PrintEta {
//!     fn checkpoint(&mut self, checkpoint: &Checkpoint) {
//!         println!(
//!             "{}/{} pages, about {:.0}s left",
//!             checkpoint.processed,
//!             checkpoint.total,
//!             checkpoint.eta.as_secs_f64()
//!         );
//!     }
//! }
//! ```

use std::time::Duration;

use super::record::PageRecord;

/// Periodic progress snapshot, emitted every `release_every` pages.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Pages processed so far in this run
    pub processed: u32,
    /// Pages in the run
    pub total: u32,
    /// Mean latency of successful pages so far, in seconds
    pub mean_latency: f64,
    /// Estimated time for the remaining pages
    pub eta: Duration,
}

impl Checkpoint {
    /// Build a snapshot; the ETA is `remaining × mean_latency`.
    pub fn new(processed: u32, total: u32, mean_latency: f64) -> Self {
        let remaining = total.saturating_sub(processed);
        let eta = f64::from(remaining) * mean_latency;
        Self {
            processed,
            total,
            mean_latency,
            eta: Duration::from_secs_f64(eta.max(0.0)),
        }
    }

    /// Pages still to go.
    pub fn remaining(&self) -> u32 {
        self.total.saturating_sub(self.processed)
    }
}

/// Receives notifications while a batch runs.
pub trait ProgressObserver {
    /// Called once before the first page, with the number of pages to process.
    fn run_started(&mut self, total: u32) {
        let _ = total;
    }

    /// Called after every page, successful or not.
    fn page_finished(&mut self, record: &PageRecord) {
        let _ = record;
    }

    /// Called every `release_every` processed pages.
    fn checkpoint(&mut self, checkpoint: &Checkpoint) {
        let _ = checkpoint;
    }

    /// Called once after the last record is appended.
    fn run_finished(&mut self, records: &[PageRecord]) {
        let _ = records;
    }
}

/// Observer that ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {}
