//! Text quality metrics against ground truth.
//!
//! Lengths and distances are counted in Unicode scalar values, not bytes, so
//! CJK and accented text are scored per character.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Quality of a hypothesis (OCR output) measured against a reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    /// Minimum number of single-character edits between the two strings
    pub edit_distance: usize,

    /// Character error rate: edit distance / reference length
    #[serde(rename = "cer")]
    pub character_error_rate: f64,

    /// 1 - edit distance / longer length.
    ///
    /// Not clamped. Levenshtein distance never exceeds the longer length, so
    /// the value already lies in [0, 1].
    pub accuracy: f64,

    /// Reference length in characters
    #[serde(rename = "ref_length")]
    pub reference_length: usize,

    /// Hypothesis length in characters
    #[serde(rename = "hyp_length")]
    pub hypothesis_length: usize,
}

/// Score `hypothesis` against `reference`.
///
/// * `cer = distance / len(reference)`, or 0 for an empty reference
/// * `accuracy = 1 - distance / max(len(reference), len(hypothesis))`, or 1 when both are empty
pub fn score(reference: &str, hypothesis: &str) -> QualityMetrics {
    let edit_distance = strsim::levenshtein(reference, hypothesis);
    let reference_length = reference.chars().count();
    let hypothesis_length = hypothesis.chars().count();

    let character_error_rate = if reference_length > 0 {
        edit_distance as f64 / reference_length as f64
    } else {
        0.0
    };

    let longest = reference_length.max(hypothesis_length);
    let accuracy = if longest > 0 {
        1.0 - edit_distance as f64 / longest as f64
    } else {
        1.0
    };

    QualityMetrics {
        edit_distance,
        character_error_rate,
        accuracy,
        reference_length,
        hypothesis_length,
    }
}

/// Reference text per page, indexed by absolute 0-based page index.
#[derive(Debug, Clone, Default)]
pub struct GroundTruth {
    lines: Vec<String>,
}

impl GroundTruth {
    /// Load a ground-truth file with one line of reference text per page.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let truth = Self::from_text(&content);
        log::info!("Loaded {} lines of ground truth", truth.len());
        Ok(truth)
    }

    /// Split text into per-page references, one line each.
    ///
    /// Line terminators (`\n` or `\r\n`) are not part of the reference.
    pub fn from_text(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    /// Build from explicit per-page references.
    pub fn from_pages<I, S>(pages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: pages.into_iter().map(Into::into).collect(),
        }
    }

    /// Reference text for the page at `index`, if any.
    pub fn page(&self, index: u32) -> Option<&str> {
        self.lines.get(index as usize).map(String::as_str)
    }

    /// Number of pages with a reference.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Check whether there are no references.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_identical_strings() {
        for s in ["a", "hello world", "페이지 1", "  spaced  "] {
            let m = score(s, s);
            assert_eq!(m.edit_distance, 0);
            assert_eq!(m.character_error_rate, 0.0);
            assert_eq!(m.accuracy, 1.0);
        }
    }

    #[test]
    fn test_both_empty() {
        let m = score("", "");
        assert_eq!(m.edit_distance, 0);
        assert_eq!(m.character_error_rate, 0.0);
        assert_eq!(m.accuracy, 1.0);
    }

    #[test]
    fn test_single_deletion() {
        let m = score("hello world", "hello word");
        assert_eq!(m.edit_distance, 1);
        assert_eq!(m.reference_length, 11);
        assert_eq!(m.hypothesis_length, 10);
        assert!(approx(m.character_error_rate, 0.0909));
        assert!(approx(m.accuracy, 0.9091));
    }

    #[test]
    fn test_empty_reference() {
        let m = score("", "noise");
        assert_eq!(m.edit_distance, 5);
        assert_eq!(m.character_error_rate, 0.0);
        assert_eq!(m.accuracy, 0.0);
    }

    #[test]
    fn test_empty_hypothesis() {
        let m = score("text", "");
        assert_eq!(m.character_error_rate, 1.0);
        assert_eq!(m.accuracy, 0.0);
    }

    #[test]
    fn test_counts_characters_not_bytes() {
        let m = score("가나다", "가나라");
        assert_eq!(m.edit_distance, 1);
        assert_eq!(m.reference_length, 3);
        assert!(approx(m.character_error_rate, 1.0 / 3.0));
    }

    #[test]
    fn test_accuracy_floor_at_zero_for_disjoint_strings() {
        // d = max(len) when nothing lines up, so accuracy bottoms out at exactly 0
        let m = score("ab", "xyzw");
        assert_eq!(m.edit_distance, 4);
        assert_eq!(m.accuracy, 0.0);
        assert_eq!(m.character_error_rate, 2.0);
    }

    #[test]
    fn test_cer_exceeds_one_for_long_hypothesis() {
        let m = score("abc", "abcdefghij");
        assert_eq!(m.edit_distance, 7);
        assert!(approx(m.character_error_rate, 7.0 / 3.0));
        assert!(approx(m.accuracy, 0.3));
    }

    #[test]
    fn test_ground_truth_lines() {
        let truth = GroundTruth::from_text("first page\r\nsecond page\n\nfourth page\n");
        assert_eq!(truth.len(), 4);
        assert_eq!(truth.page(0), Some("first page"));
        assert_eq!(truth.page(1), Some("second page"));
        assert_eq!(truth.page(2), Some(""));
        assert_eq!(truth.page(3), Some("fourth page"));
        assert_eq!(truth.page(4), None);
    }

    #[test]
    fn test_ground_truth_from_pages() {
        let truth = GroundTruth::from_pages(["one", "two"]);
        assert_eq!(truth.page(1), Some("two"));
        assert!(!truth.is_empty());
        assert!(GroundTruth::default().is_empty());
    }
}
