//! Similarity scoring
//!
//! Two scores over canonical trees:
//! - line-level change similarity, used for whole units:
//!   `1 - max(additions, removals) / max(size1, size2)` over a line diff of
//!   the serialized forms
//! - tree-edit similarity, used for functions:
//!   `1 - ted(t1, t2) / max(size1, size2)`
//!
//! Scores are returned raw. Both are bounded by 1 at the top. The line form
//! cannot drop below 0 because every node is exactly one line, but a tree
//! edit distance can exceed the larger tree (e.g. a chain against a star),
//! so function scores may be negative. [`ScorePolicy`] decides whether
//! ranking and classification see the raw or clamped value.
//!
//! Global invariants enforced:
//! - Each distinct key is computed at most once per run
//! - A cached score is never overwritten

use crate::ted::tree_edit_distance;
use crate::tree::SyntaxTree;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// How out-of-range scores are treated downstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorePolicy {
    /// Rank and classify by the signed value as computed.
    #[default]
    Raw,
    /// Rank and classify by the value clamped to `[0, 1]`.
    Clamp,
}

impl ScorePolicy {
    pub fn apply(self, raw: f64) -> f64 {
        match self {
            ScorePolicy::Raw => raw,
            ScorePolicy::Clamp => raw.clamp(0.0, 1.0),
        }
    }
}

/// Whether a raw score falls outside `[0, 1]`.
pub fn is_anomalous(raw: f64) -> bool {
    !(0.0..=1.0).contains(&raw)
}

/// Count added and removed lines between two texts.
pub fn count_changes(old: &str, new: &str) -> (usize, usize) {
    let diff = TextDiff::from_lines(old, new);
    let mut additions = 0;
    let mut removals = 0;
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => additions += 1,
            ChangeTag::Delete => removals += 1,
            ChangeTag::Equal => {}
        }
    }
    (additions, removals)
}

/// Line-level change similarity of two trees.
pub fn line_similarity(a: &SyntaxTree, b: &SyntaxTree) -> f64 {
    let (additions, removals) = count_changes(a.serialized(), b.serialized());
    let edits = additions.max(removals);
    1.0 - edits as f64 / a.size().max(b.size()) as f64
}

/// Tree-edit similarity of two trees.
pub fn tree_edit_similarity(a: &SyntaxTree, b: &SyntaxTree) -> f64 {
    let distance = tree_edit_distance(a.root(), b.root());
    1.0 - distance as f64 / a.size().max(b.size()) as f64
}

/// Identity of a compared pair.
///
/// Built from unit ids, which the pipeline keeps unique per submission path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PairKey {
    Units {
        left: String,
        right: String,
    },
    Functions {
        left_unit: String,
        left_function: String,
        right_unit: String,
        right_function: String,
    },
}

impl PairKey {
    pub fn units(left: &str, right: &str) -> Self {
        PairKey::Units {
            left: left.to_string(),
            right: right.to_string(),
        }
    }

    pub fn functions(
        left_unit: &str,
        left_function: &str,
        right_unit: &str,
        right_function: &str,
    ) -> Self {
        PairKey::Functions {
            left_unit: left_unit.to_string(),
            left_function: left_function.to_string(),
            right_unit: right_unit.to_string(),
            right_function: right_function.to_string(),
        }
    }
}

/// Memoized scores keyed by pair identity.
#[derive(Default)]
pub struct SimilarityCache {
    entries: DashMap<PairKey, Arc<OnceLock<f64>>>,
    computations: AtomicUsize,
}

impl SimilarityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached score for `key`, computing it with `compute` once.
    pub fn get_or_compute(&self, key: PairKey, compute: impl FnOnce() -> f64) -> f64 {
        let cell = self.entries.entry(key).or_default().value().clone();
        *cell.get_or_init(|| {
            self.computations.fetch_add(1, Ordering::Relaxed);
            compute()
        })
    }

    pub fn get(&self, key: &PairKey) -> Option<f64> {
        self.entries.get(key).and_then(|cell| cell.get().copied())
    }

    /// Number of scores actually computed (cache misses).
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Scores pairs of trees through a shared [`SimilarityCache`].
#[derive(Default)]
pub struct Scorer {
    cache: SimilarityCache,
}

impl Scorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cache(&self) -> &SimilarityCache {
        &self.cache
    }

    /// Whole-unit similarity (line-level form).
    pub fn score_units(&self, left: &str, a: &SyntaxTree, right: &str, b: &SyntaxTree) -> f64 {
        self.cache.get_or_compute(PairKey::units(left, right), || {
            let score = line_similarity(a, b);
            debug!(left, right, score, "scored unit pair");
            score
        })
    }

    /// Function-level similarity (tree-edit form).
    pub fn score_functions(&self, key: PairKey, a: &SyntaxTree, b: &SyntaxTree) -> f64 {
        self.cache.get_or_compute(key, || tree_edit_similarity(a, b))
    }
}
