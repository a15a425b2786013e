//! Run statistics over successful pages.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pipeline::PageRecord;

/// Aggregate statistics for one run.
///
/// Timing and token figures only count successful pages.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Pages requested
    pub total_pages: u32,

    /// Pages transcribed
    pub succeeded: u32,

    /// Pages that failed
    pub failed: u32,

    /// Sum of generation time in seconds
    pub total_time: f64,

    /// Mean generation time per page (`None` without successes)
    pub mean_time: Option<f64>,

    /// Generated tokens
    pub total_tokens: u64,

    /// Quality over scored pages (`None` without ground truth or successes)
    pub quality: Option<QualitySummary>,
}

impl Summary {
    /// Compute statistics over `records`.
    pub fn from_records(records: &[PageRecord]) -> Self {
        let mut summary = Summary {
            total_pages: records.len() as u32,
            ..Default::default()
        };

        let mut cer = Vec::new();
        let mut accuracy = Vec::new();

        for record in records {
            let Some(latency) = record.latency_seconds() else {
                summary.failed += 1;
                continue;
            };

            summary.succeeded += 1;
            summary.total_time += latency;
            summary.total_tokens += u64::from(record.token_count().unwrap_or(0));

            if let Some(metrics) = record.quality() {
                cer.push(metrics.character_error_rate);
                accuracy.push(metrics.accuracy);
            }
        }

        if summary.succeeded > 0 {
            summary.mean_time = Some(summary.total_time / f64::from(summary.succeeded));
        }
        summary.quality = QualitySummary::from_values(cer, accuracy);
        summary
    }

    /// Fraction of requested pages that were transcribed.
    pub fn success_rate(&self) -> f64 {
        if self.total_pages == 0 {
            0.0
        } else {
            f64::from(self.succeeded) / f64::from(self.total_pages)
        }
    }

    /// Whether no page succeeded.
    pub fn is_empty(&self) -> bool {
        self.succeeded == 0
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pages: {} total", self.total_pages)?;
        writeln!(f, "Successful: {}", self.succeeded)?;
        writeln!(f, "Failed: {}", self.failed)?;

        match self.mean_time {
            Some(mean) => {
                writeln!(f, "Total time: {:.2}s", self.total_time)?;
                writeln!(f, "Average time per page: {:.2}s", mean)?;
                writeln!(f, "Tokens generated: {}", self.total_tokens)?;
            }
            None => writeln!(f, "Timing: no data")?,
        }

        match &self.quality {
            Some(quality) => write!(f, "{}", quality),
            None => writeln!(f, "Quality: no data"),
        }
    }
}

/// Mean and median quality over scored pages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
    /// Pages that had ground truth
    pub scored_pages: u32,
    /// Mean character error rate
    pub mean_cer: f64,
    /// Median character error rate
    pub median_cer: f64,
    /// Mean accuracy
    pub mean_accuracy: f64,
    /// Median accuracy
    pub median_accuracy: f64,
}

impl QualitySummary {
    fn from_values(mut cer: Vec<f64>, mut accuracy: Vec<f64>) -> Option<Self> {
        if cer.is_empty() {
            return None;
        }
        Some(Self {
            scored_pages: cer.len() as u32,
            mean_cer: mean(&cer),
            median_cer: median(&mut cer),
            mean_accuracy: mean(&accuracy),
            median_accuracy: median(&mut accuracy),
        })
    }
}

impl fmt::Display for QualitySummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Scored pages: {}", self.scored_pages)?;
        writeln!(
            f,
            "CER: mean {:.4} ({:.2}%), median {:.4}",
            self.mean_cer,
            self.mean_cer * 100.0,
            self.median_cer
        )?;
        writeln!(
            f,
            "Accuracy: mean {:.4} ({:.2}%), median {:.4}",
            self.mean_accuracy,
            self.mean_accuracy * 100.0,
            self.median_accuracy
        )
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median of a non-empty slice; an even count averages the middle pair.
fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::InferenceResult;
    use crate::metrics::score;
    use crate::pipeline::FailureStage;

    fn ok(page: u32, latency: f64, tokens: u32) -> PageRecord {
        PageRecord::success(
            page,
            InferenceResult {
                extracted_text: format!("page {}", page),
                token_count: tokens,
                latency_seconds: latency,
            },
        )
    }

    #[test]
    fn test_statistics_skip_failures() {
        let records = vec![
            ok(1, 2.0, 10),
            PageRecord::failure(2, FailureStage::Render, "broken"),
            ok(3, 4.0, 30),
        ];
        let summary = Summary::from_records(&records);

        assert_eq!(summary.total_pages, 3);
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.total_time, 6.0);
        assert_eq!(summary.mean_time, Some(3.0));
        assert_eq!(summary.total_tokens, 40);
        assert!(summary.quality.is_none());
    }

    #[test]
    fn test_all_failed_is_no_data() {
        let records = vec![
            PageRecord::failure(1, FailureStage::Render, "a"),
            PageRecord::failure(2, FailureStage::Inference, "b"),
        ];
        let summary = Summary::from_records(&records);

        assert!(summary.is_empty());
        assert_eq!(summary.mean_time, None);
        assert_eq!(summary.success_rate(), 0.0);

        let text = summary.to_string();
        assert!(text.contains("Timing: no data"));
        assert!(text.contains("Quality: no data"));
    }

    #[test]
    fn test_empty_records() {
        let summary = Summary::from_records(&[]);
        assert_eq!(summary.total_pages, 0);
        assert_eq!(summary.success_rate(), 0.0);
    }

    #[test]
    fn test_quality_mean_and_median() {
        let records = vec![
            ok(1, 1.0, 1).with_quality(score("abcd", "abcd")),
            ok(2, 1.0, 1).with_quality(score("abcd", "abcx")),
            ok(3, 1.0, 1).with_quality(score("abcd", "axyz")),
            ok(4, 1.0, 1).with_quality(score("abcd", "wxyz")),
            ok(5, 1.0, 1),
        ];
        let quality = Summary::from_records(&records).quality.unwrap();

        assert_eq!(quality.scored_pages, 4);
        // CER values 0, 0.25, 0.75, 1.0
        assert!((quality.mean_cer - 0.5).abs() < 1e-9);
        assert!((quality.median_cer - 0.5).abs() < 1e-9);
        assert!((quality.mean_accuracy - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_median_odd_count() {
        let mut values = vec![3.0, 1.0, 2.0];
        assert_eq!(median(&mut values), 2.0);
    }
}
