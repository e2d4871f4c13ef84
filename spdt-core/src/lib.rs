//! spdt core library - structural plagiarism detection for C++ submissions

// Global invariants enforced in this crate:
// - Comparison is structural: identifiers, literals, comments and formatting
//   never affect a score
// - Caches are owned by a run, never global
// - Each distinct text is parsed once and each distinct pair scored once
// - Deterministic ordering is explicit, never an artifact of scheduling
// - Identical input yields byte-for-byte identical JSON output

pub mod ast_cache;
pub mod classify;
pub mod config;
pub mod diff_link;
pub mod error;
pub mod functions;
pub mod normalize;
pub mod parser;
pub mod pipeline;
pub mod preprocess;
pub mod report;
pub mod similarity;
pub mod ted;
pub mod tree;

pub use classify::{classify, Conclusion, Thresholds};
pub use config::ResolvedConfig;
pub use error::SpdtError;
pub use pipeline::{Detector, DetectorOptions, InputMode, MissingInputPolicy};
pub use report::{render_json, render_text, sort_pairs, ComparisonReport, PairReport};

use anyhow::Result;
use std::path::PathBuf;

/// Compare submissions with default configuration
pub fn detect(paths: &[PathBuf]) -> Result<ComparisonReport> {
    detect_with_config(paths, &ResolvedConfig::defaults()?)
}

/// Compare submissions with resolved configuration
pub fn detect_with_config(paths: &[PathBuf], config: &ResolvedConfig) -> Result<ComparisonReport> {
    Detector::from_config(config)?.run(paths)
}
