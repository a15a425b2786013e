//! Aggregation of page records into a run report.
//!
//! A [`DocumentReport`] holds every page record in page order together with
//! run statistics. It renders to three artifacts: the concatenated text of
//! the successful pages, a detailed JSON document and a per-page CSV table.
//!
//! # Example
//!
//! ```no_run
//! use docvl::pipeline::PageRecord;
//! use docvl::report::{aggregate, JsonFormat};
//!
//! fn save(records: Vec<PageRecord>) -> docvl::Result<()> {
//!     let report = aggregate(records).with_source("scan.pdf");
//!     println!("{}", report.summary);
//!     println!("{}", report.to_json(JsonFormat::Compact)?);
//!     report.write_to_dir("ocr_results")?;
//!     Ok(())
//! }
//! ```

mod csv;
mod summary;

pub use self::csv::to_csv;
pub use self::summary::{QualitySummary, Summary};

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::pipeline::PageRecord;

/// File name of the concatenated text.
pub const TEXT_FILE: &str = "extracted_text_all_pages.txt";
/// File name of the detailed JSON report.
pub const JSON_FILE: &str = "results_detailed.json";
/// File name of the per-page CSV table.
pub const CSV_FILE: &str = "results.csv";

/// Layout of JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JsonFormat {
    /// Indented, one field per line
    #[default]
    Pretty,
    /// Single line
    Compact,
}

/// Report of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentReport {
    /// Label of the processed document
    pub source: String,

    /// When the report was assembled
    pub generated_at: DateTime<Utc>,

    /// Statistics over the records
    pub summary: Summary,

    /// One record per requested page, in page order
    pub pages: Vec<PageRecord>,
}

/// Paths written by [`DocumentReport::write_to_dir`].
#[derive(Debug, Clone)]
pub struct ReportFiles {
    /// Concatenated text
    pub text: PathBuf,
    /// Detailed JSON
    pub json: PathBuf,
    /// Per-page CSV
    pub csv: PathBuf,
}

/// Build a report from page records.
///
/// Never fails: a run without successful pages yields empty text and
/// "no data" statistics.
pub fn aggregate(records: Vec<PageRecord>) -> DocumentReport {
    DocumentReport {
        source: String::new(),
        generated_at: Utc::now(),
        summary: Summary::from_records(&records),
        pages: records,
    }
}

impl DocumentReport {
    /// Set the document label.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Text of the successful pages, each as `=== Page N ===\n{text}\n`.
    pub fn full_text(&self) -> String {
        let mut text = String::new();
        for record in &self.pages {
            if let Some(page_text) = record.text() {
                text.push_str(&format!("=== Page {} ===\n", record.page_number));
                text.push_str(page_text);
                text.push('\n');
            }
        }
        text
    }

    /// Render the report as JSON.
    pub fn to_json(&self, format: JsonFormat) -> Result<String> {
        let json = match format {
            JsonFormat::Pretty => serde_json::to_string_pretty(self)?,
            JsonFormat::Compact => serde_json::to_string(self)?,
        };
        Ok(json)
    }

    /// Render the page records as CSV.
    pub fn to_csv(&self) -> Result<String> {
        to_csv(&self.pages)
    }

    /// Failed records.
    pub fn failures(&self) -> impl Iterator<Item = &PageRecord> {
        self.pages.iter().filter(|record| !record.is_success())
    }

    /// Write text, JSON and CSV artifacts into `dir`, creating it if needed.
    pub fn write_to_dir<P: AsRef<Path>>(&self, dir: P) -> Result<ReportFiles> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let files = ReportFiles {
            text: dir.join(TEXT_FILE),
            json: dir.join(JSON_FILE),
            csv: dir.join(CSV_FILE),
        };

        fs::write(&files.text, self.full_text())?;
        fs::write(&files.json, self.to_json(JsonFormat::Pretty)?)?;
        fs::write(&files.csv, self.to_csv()?)?;

        log::info!("Saved report for '{}' to {}", self.source, dir.display());
        Ok(files)
    }
}
