//! Function extraction and function-level matching
//!
//! Runs only for unit pairs in the ambiguous band. Candidates come from a
//! replaceable [`FunctionExtractor`] policy:
//! - [`TextScanExtractor`] scans normalized text for
//!   `<optional-type> identifier(...) {` and brace-matches the body
//! - [`SyntaxExtractor`] asks the parser for real `function_definition` nodes
//!
//! Every pair in the Cartesian product of candidate names is then parsed and
//! scored with the tree-edit form, through the shared caches.

use crate::ast_cache::AstCache;
use crate::normalize::SourceUnit;
use crate::parser::SyntaxParser;
use crate::similarity::{is_anomalous, PairKey, ScorePolicy, Scorer};
use anyhow::Result;
use rayon::prelude::*;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::Range;
use std::sync::{Arc, OnceLock};
use tracing::warn;

/// Control-flow keywords the text pattern would otherwise mistake for names.
const KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "sizeof", "alignof", "decltype",
    "static_assert", "else", "do",
];

/// A function-like unit found in normalized source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FunctionCandidate {
    pub name: String,
    /// Byte range of the whole definition in the unit's text.
    pub span: Range<usize>,
}

/// Which extraction policy to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Heuristic text scan.
    #[default]
    Text,
    /// Function definitions from the parsed tree.
    Syntax,
}

/// Isolates function-like units from normalized text.
pub trait FunctionExtractor: Send + Sync {
    /// Candidates in source order.
    fn extract(&self, text: &str) -> Result<Vec<FunctionCandidate>>;

    /// Source snippet compared for `candidate`.
    ///
    /// By default the snippet is recovered by name: from the first
    /// occurrence of the name to the first closing brace after it.
    fn snippet<'t>(&self, text: &'t str, candidate: &FunctionCandidate) -> &'t str {
        recover_snippet(text, &candidate.name).unwrap_or("")
    }
}

/// Regex scan with brace matching for the body end.
#[derive(Debug, Clone)]
pub struct TextScanExtractor {
    min_name_length: usize,
}

impl TextScanExtractor {
    pub fn new(min_name_length: usize) -> Self {
        TextScanExtractor { min_name_length }
    }
}

fn signature_regex() -> &'static Regex {
    static SIGNATURE_RE: OnceLock<Regex> = OnceLock::new();
    SIGNATURE_RE.get_or_init(|| {
        Regex::new(r"\b(?:(?:void|int|float|double|char|bool)\s+)?([a-zA-Z_]\w*)\s*\([^)]*\)\s*\{")
            .expect("signature pattern is a valid regex literal")
    })
}

impl FunctionExtractor for TextScanExtractor {
    fn extract(&self, text: &str) -> Result<Vec<FunctionCandidate>> {
        let re = signature_regex();
        let mut candidates = Vec::new();
        let mut pos = 0;
        while let Some(caps) = re.captures_at(text, pos) {
            let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
                break;
            };
            // The match ends just past the opening brace
            let end = matching_brace_end(text, whole.end());
            pos = end.max(whole.end());

            let name = name.as_str();
            if KEYWORDS.contains(&name) || name.chars().count() < self.min_name_length {
                continue;
            }
            candidates.push(FunctionCandidate {
                name: name.to_string(),
                span: whole.start()..end,
            });
        }
        Ok(candidates)
    }
}

/// Byte offset just past the brace closing the block opened before `from`,
/// or the end of `text` when braces are unbalanced.
fn matching_brace_end(text: &str, from: usize) -> usize {
    let mut depth = 1usize;
    for (offset, byte) in text.as_bytes()[from..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return from + offset + 1;
                }
            }
            _ => {}
        }
    }
    text.len()
}

/// Function definitions reported by the parser.
pub struct SyntaxExtractor {
    parser: Arc<dyn SyntaxParser>,
    min_name_length: usize,
}

impl SyntaxExtractor {
    pub fn new(parser: Arc<dyn SyntaxParser>, min_name_length: usize) -> Self {
        SyntaxExtractor {
            parser,
            min_name_length,
        }
    }
}

impl FunctionExtractor for SyntaxExtractor {
    fn extract(&self, text: &str) -> Result<Vec<FunctionCandidate>> {
        Ok(self
            .parser
            .function_definitions(text)?
            .into_iter()
            .filter(|f| f.name.chars().count() >= self.min_name_length)
            .map(|f| FunctionCandidate {
                name: f.name,
                span: f.bytes,
            })
            .collect())
    }

    fn snippet<'t>(&self, text: &'t str, candidate: &FunctionCandidate) -> &'t str {
        text.get(candidate.span.clone()).unwrap_or("")
    }
}

/// Build the extractor for a mode.
pub fn extractor_for(
    mode: ExtractionMode,
    parser: Arc<dyn SyntaxParser>,
    min_name_length: usize,
) -> Box<dyn FunctionExtractor> {
    match mode {
        ExtractionMode::Text => Box::new(TextScanExtractor::new(min_name_length)),
        ExtractionMode::Syntax => Box::new(SyntaxExtractor::new(parser, min_name_length)),
    }
}

/// Snippet from the first occurrence of `name` through the first `}` after it.
///
/// Not brace-depth aware: a body with nested blocks is cut at the first
/// inner closing brace. Returns `None` if the name does not occur.
pub fn recover_snippet<'t>(text: &'t str, name: &str) -> Option<&'t str> {
    let start = text.find(name)?;
    let end = text[start..]
        .find('}')
        .map(|offset| start + offset + 1)
        .unwrap_or(text.len());
    Some(&text[start..end])
}

/// One scored function pair.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionMatch {
    pub left: String,
    pub right: String,
    /// Raw tree-edit similarity.
    pub similarity: f64,
    /// Raw score outside `[0, 1]`.
    pub anomaly: bool,
}

/// Function-level comparison of one ambiguous unit pair.
#[derive(Debug, Clone, Serialize)]
pub struct FunctionComparison {
    pub left_unit: String,
    pub right_unit: String,
    pub left_functions: Vec<String>,
    pub right_functions: Vec<String>,
    /// Ranked by descending similarity.
    pub matches: Vec<FunctionMatch>,
}

/// Candidate names in first-seen order, without repeats.
fn distinct_names(candidates: &[FunctionCandidate]) -> Vec<&FunctionCandidate> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|c| seen.insert(c.name.as_str()))
        .collect()
}

/// Shared collaborators for function matching.
pub struct FunctionMatcher<'a> {
    pub extractor: &'a dyn FunctionExtractor,
    pub ast_cache: &'a AstCache,
    pub scorer: &'a Scorer,
    pub policy: ScorePolicy,
}

impl FunctionMatcher<'_> {
    /// Extract candidates from both units and score every name pair.
    ///
    /// Returns `None` when either unit has no candidates.
    pub fn compare(&self, left: &SourceUnit, right: &SourceUnit) -> Result<Option<FunctionComparison>> {
        let left_candidates = self.extractor.extract(&left.text)?;
        let right_candidates = self.extractor.extract(&right.text)?;
        if left_candidates.is_empty() || right_candidates.is_empty() {
            return Ok(None);
        }

        let left_distinct = distinct_names(&left_candidates);
        let right_distinct = distinct_names(&right_candidates);
        let pairs: Vec<(&FunctionCandidate, &FunctionCandidate)> = left_distinct
            .iter()
            .flat_map(|l| right_distinct.iter().map(move |r| (*l, *r)))
            .collect();

        let mut matches: Vec<FunctionMatch> = pairs
            .par_iter()
            .filter_map(|(l, r)| match self.score_pair(left, l, right, r) {
                Ok(m) => Some(m),
                Err(e) => {
                    warn!(
                        left = %l.name,
                        right = %r.name,
                        "skipping function pair: {:#}",
                        e
                    );
                    None
                }
            })
            .collect();
        sort_matches(&mut matches, self.policy);

        Ok(Some(FunctionComparison {
            left_unit: left.id.clone(),
            right_unit: right.id.clone(),
            left_functions: left_candidates.iter().map(|c| c.name.clone()).collect(),
            right_functions: right_candidates.iter().map(|c| c.name.clone()).collect(),
            matches,
        }))
    }

    fn score_pair(
        &self,
        left: &SourceUnit,
        l: &FunctionCandidate,
        right: &SourceUnit,
        r: &FunctionCandidate,
    ) -> Result<FunctionMatch> {
        let key = PairKey::functions(&left.id, &l.name, &right.id, &r.name);
        let left_tree = self.ast_cache.build(self.extractor.snippet(&left.text, l))?;
        let right_tree = self.ast_cache.build(self.extractor.snippet(&right.text, r))?;
        let similarity = self.scorer.score_functions(key, &left_tree, &right_tree);
        Ok(FunctionMatch {
            left: l.name.clone(),
            right: r.name.clone(),
            similarity,
            anomaly: is_anomalous(similarity),
        })
    }
}

/// Descending by policy-adjusted score, then by names.
fn sort_matches(matches: &mut [FunctionMatch], policy: ScorePolicy) {
    matches.sort_by(|a, b| {
        policy
            .apply(b.similarity)
            .total_cmp(&policy.apply(a.similarity))
            .then_with(|| a.left.cmp(&b.left))
            .then_with(|| a.right.cmp(&b.right))
    });
}
