//! CSV rendering: one row per page.

use serde::Serialize;

use crate::error::{Error, Result};
use crate::pipeline::{PageOutcome, PageRecord};

/// Flat row written for each page.
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    page_num: u32,
    status: &'static str,
    processing_time: Option<f64>,
    tokens: Option<u32>,
    cer: Option<f64>,
    accuracy: Option<f64>,
    edit_distance: Option<usize>,
    ref_length: Option<usize>,
    hyp_length: Option<usize>,
    error: Option<&'a str>,
    extracted_text: Option<&'a str>,
}

impl<'a> From<&'a PageRecord> for CsvRow<'a> {
    fn from(record: &'a PageRecord) -> Self {
        let quality = record.quality();
        let status = match record.outcome {
            PageOutcome::Success { .. } => "success",
            PageOutcome::Failed { .. } => "failed",
        };

        Self {
            page_num: record.page_number,
            status,
            processing_time: record.latency_seconds(),
            tokens: record.token_count(),
            cer: quality.map(|q| q.character_error_rate),
            accuracy: quality.map(|q| q.accuracy),
            edit_distance: quality.map(|q| q.edit_distance),
            ref_length: quality.map(|q| q.reference_length),
            hyp_length: quality.map(|q| q.hypothesis_length),
            error: record.error(),
            extracted_text: record.text(),
        }
    }
}

/// Render page records as CSV with a header row.
pub fn to_csv(records: &[PageRecord]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if records.is_empty() {
        writer.write_record([
            "page_num",
            "status",
            "processing_time",
            "tokens",
            "cer",
            "accuracy",
            "edit_distance",
            "ref_length",
            "hyp_length",
            "error",
            "extracted_text",
        ])?;
    }
    for record in records {
        writer.serialize(CsvRow::from(record))?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| Error::Serialize(format!("CSV flush error: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| Error::Serialize(e.to_string()))
}
