//! Per-page outcomes of a batch run.

use serde::{Deserialize, Serialize};

use crate::inference::InferenceResult;
use crate::metrics::QualityMetrics;

/// Pipeline step at which a page failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// The page could not be rasterized
    Render,
    /// The backend could not transcribe the page
    Inference,
    /// The run's deadline passed before the page was reached
    Deadline,
}

impl std::fmt::Display for FailureStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureStage::Render => "render",
            FailureStage::Inference => "inference",
            FailureStage::Deadline => "deadline",
        };
        f.write_str(name)
    }
}

/// Result of one page: transcribed, or failed with a reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageOutcome {
    /// The page was transcribed.
    Success {
        /// Transcribed text
        extracted_text: String,
        /// Generation time in seconds
        #[serde(rename = "processing_time")]
        latency_seconds: f64,
        /// Generated tokens
        #[serde(rename = "tokens")]
        token_count: u32,
        /// Quality against ground truth, when a reference exists
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quality: Option<QualityMetrics>,
    },

    /// The page failed.
    Failed {
        /// Step that failed
        stage: FailureStage,
        /// Human-readable reason
        error: String,
    },
}

/// Outcome of one page, numbered from 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    /// 1-indexed page number
    #[serde(rename = "page_num")]
    pub page_number: u32,

    /// Success or failure details
    #[serde(flatten)]
    pub outcome: PageOutcome,
}

impl PageRecord {
    /// Record a transcribed page.
    pub fn success(page_number: u32, result: InferenceResult) -> Self {
        Self {
            page_number,
            outcome: PageOutcome::Success {
                extracted_text: result.extracted_text,
                latency_seconds: result.latency_seconds,
                token_count: result.token_count,
                quality: None,
            },
        }
    }

    /// Record a failed page.
    pub fn failure(page_number: u32, stage: FailureStage, error: impl Into<String>) -> Self {
        Self {
            page_number,
            outcome: PageOutcome::Failed {
                stage,
                error: error.into(),
            },
        }
    }

    /// Attach quality metrics. Failed pages are left unchanged.
    pub fn with_quality(mut self, metrics: QualityMetrics) -> Self {
        if let PageOutcome::Success { quality, .. } = &mut self.outcome {
            *quality = Some(metrics);
        }
        self
    }

    /// Whether the page was transcribed.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PageOutcome::Success { .. })
    }

    /// Transcribed text of a successful page.
    pub fn text(&self) -> Option<&str> {
        match &self.outcome {
            PageOutcome::Success { extracted_text, .. } => Some(extracted_text),
            PageOutcome::Failed { .. } => None,
        }
    }

    /// Generation time of a successful page.
    pub fn latency_seconds(&self) -> Option<f64> {
        match self.outcome {
            PageOutcome::Success {
                latency_seconds, ..
            } => Some(latency_seconds),
            PageOutcome::Failed { .. } => None,
        }
    }

    /// Generated tokens of a successful page.
    pub fn token_count(&self) -> Option<u32> {
        match self.outcome {
            PageOutcome::Success { token_count, .. } => Some(token_count),
            PageOutcome::Failed { .. } => None,
        }
    }

    /// Quality metrics of a successful, scored page.
    pub fn quality(&self) -> Option<&QualityMetrics> {
        match &self.outcome {
            PageOutcome::Success { quality, .. } => quality.as_ref(),
            PageOutcome::Failed { .. } => None,
        }
    }

    /// Failure reason of a failed page.
    pub fn error(&self) -> Option<&str> {
        match &self.outcome {
            PageOutcome::Failed { error, .. } => Some(error),
            PageOutcome::Success { .. } => None,
        }
    }

    /// Failure stage of a failed page.
    pub fn failure_stage(&self) -> Option<FailureStage> {
        match self.outcome {
            PageOutcome::Failed { stage, .. } => Some(stage),
            PageOutcome::Success { .. } => None,
        }
    }
}
