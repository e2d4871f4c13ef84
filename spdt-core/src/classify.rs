//! Conclusion bands
//!
//! Global invariants enforced:
//! - Every score maps to exactly one band
//! - Boundary values belong to the upper band

use serde::{Deserialize, Serialize};

/// Conclusion drawn from a similarity score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conclusion {
    NoMatch,    // < 0.3
    Ambiguous,  // 0.3 - 0.8
    Plagiarism, // >= 0.8
}

impl Conclusion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Conclusion::NoMatch => "No matches were found in your submission.",
            Conclusion::Ambiguous => "Plagiarism might be present.",
            Conclusion::Plagiarism => "Plagiarism found.",
        }
    }

    /// Whether function-level matching should run for this pair.
    pub fn needs_function_matching(&self) -> bool {
        *self == Conclusion::Ambiguous
    }
}

/// Configurable band boundaries
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Lower bound of the ambiguous band
    pub ambiguous: f64,
    /// Lower bound of the plagiarism band
    pub plagiarism: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            ambiguous: 0.3,
            plagiarism: 0.8,
        }
    }
}

/// Classify with the default thresholds
pub fn classify(similarity: f64) -> Conclusion {
    classify_with_thresholds(similarity, &Thresholds::default())
}

/// Classify with custom thresholds.
///
/// Negative scores fall in the lowest band; NaN is treated as no match.
pub fn classify_with_thresholds(similarity: f64, thresholds: &Thresholds) -> Conclusion {
    if similarity.is_nan() || similarity < thresholds.ambiguous {
        Conclusion::NoMatch
    } else if similarity < thresholds.plagiarism {
        Conclusion::Ambiguous
    } else {
        Conclusion::Plagiarism
    }
}
