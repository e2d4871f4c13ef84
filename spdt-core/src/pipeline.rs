//! Pairwise detection pipeline
//!
//! Stages, each handing an explicit value to the next:
//! 1. normalize: paths -> [`NormalizedSet`]
//! 2. build: units -> [`BuiltSet`] (trees through the AST cache)
//! 3. filter: node sizes -> [`PairPlan`] (scored vs excluded pairs)
//! 4. score + classify: scored pairs -> ranked [`PairReport`]s
//! 5. function matching for ambiguous pairs, diff links
//!
//! Global invariants enforced:
//! - The size threshold is computed from every built unit before any pair
//!   is filtered (build -> filter is a barrier)
//! - Each unordered pair is either scored or excluded, never both
//! - Unit ids are unique per distinct submission path
//! - Output order comes from explicit sorting, never from scheduling
//! - One bad submission never aborts comparisons among the rest, except a
//!   missing path under [`MissingInputPolicy::Abort`]

use crate::ast_cache::AstCache;
use crate::classify::{classify_with_thresholds, Thresholds};
use crate::config::ResolvedConfig;
use crate::diff_link::{DiffLinker, GumtreeLinker, NoDiffLinker};
use crate::error::{missing_input, SpdtError};
use crate::functions::{extractor_for, FunctionComparison, FunctionExtractor, FunctionMatcher, TextScanExtractor};
use crate::normalize::{disambiguate_ids, NormalizeOptions, Normalizer, SourceUnit};
use crate::parser::{CppParser, SyntaxParser};
use crate::preprocess::{CommandPreprocessor, NoopPreprocessor, Preprocessor};
use crate::report::{sort_pairs, ComparisonReport, ExcludedPair, PairReport, SubmissionFailure, UnitReport};
use crate::similarity::{is_anomalous, ScorePolicy, Scorer};
use crate::tree::SyntaxTree;
use anyhow::Result;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// How the submission list is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InputMode {
    /// Every path is a file: each is preprocessed.
    Files,
    /// Every path is a directory: each is combined into one unit.
    Directories,
    /// Anything else: an opaque list of files read verbatim.
    Mixed,
}

impl InputMode {
    /// Mode of the submissions that exist; missing paths are reported by
    /// normalization and never change how the others are read.
    pub fn detect(paths: &[PathBuf]) -> Self {
        let existing: Vec<&PathBuf> = paths.iter().filter(|p| p.exists()).collect();
        if existing.iter().all(|p| !p.is_dir()) {
            InputMode::Files
        } else if existing.iter().all(|p| p.is_dir()) {
            InputMode::Directories
        } else {
            InputMode::Mixed
        }
    }
}

/// What happens when a submission path does not exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingInputPolicy {
    /// Stop the run before any comparison.
    #[default]
    Abort,
    /// Report the submission as failed and compare the rest.
    Skip,
}

/// Run-level knobs.
#[derive(Debug, Clone)]
pub struct DetectorOptions {
    pub thresholds: Thresholds,
    /// Pre-filter granularity; `None` scores every pair.
    pub size_filter: Option<usize>,
    pub score_policy: ScorePolicy,
    pub missing_inputs: MissingInputPolicy,
    pub top: Option<usize>,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        DetectorOptions {
            thresholds: Thresholds::default(),
            size_filter: Some(10),
            score_policy: ScorePolicy::Raw,
            missing_inputs: MissingInputPolicy::Abort,
            top: None,
        }
    }
}

/// Stage 1 output.
#[derive(Debug)]
pub struct NormalizedSet {
    pub mode: InputMode,
    pub units: Vec<SourceUnit>,
    pub failures: Vec<SubmissionFailure>,
}

/// A unit with its tree.
#[derive(Debug, Clone)]
pub struct BuiltUnit {
    pub unit: SourceUnit,
    pub tree: Arc<SyntaxTree>,
}

/// Stage 2 output.
#[derive(Debug)]
pub struct BuiltSet {
    pub units: Vec<BuiltUnit>,
    pub failures: Vec<SubmissionFailure>,
}

impl BuiltSet {
    pub fn sizes(&self) -> Vec<usize> {
        self.units.iter().map(|b| b.tree.size()).collect()
    }
}

/// Stage 3 output: indices into the built units, `left < right`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairPlan {
    pub scored: Vec<(usize, usize)>,
    /// `(left, right, size difference)`
    pub excluded: Vec<(usize, usize, usize)>,
}

/// `floor(average / granularity) * granularity`, with an integer average.
pub fn filter_threshold(sizes: &[usize], granularity: usize) -> usize {
    if sizes.is_empty() || granularity == 0 {
        return 0;
    }
    let average = sizes.iter().sum::<usize>() / sizes.len();
    (average / granularity) * granularity
}

/// Split every unordered pair into scored and excluded.
///
/// A pair is excluded when its size difference is strictly greater than
/// `threshold`. With no threshold every pair is scored.
pub fn plan_pairs(sizes: &[usize], threshold: Option<usize>) -> PairPlan {
    let mut plan = PairPlan::default();
    for i in 0..sizes.len() {
        for j in (i + 1)..sizes.len() {
            let difference = sizes[i].abs_diff(sizes[j]);
            match threshold {
                Some(t) if difference > t => plan.excluded.push((i, j, difference)),
                _ => plan.scored.push((i, j)),
            }
        }
    }
    plan
}

/// The detection engine. Owns the run's caches and collaborators.
pub struct Detector {
    normalizer: Normalizer,
    ast_cache: AstCache,
    scorer: Scorer,
    extractor: Box<dyn FunctionExtractor>,
    linker: Box<dyn DiffLinker>,
    diff_links: bool,
    options: DetectorOptions,
}

impl Detector {
    /// Detector with text-scan function extraction and no diff links.
    pub fn new(normalizer: Normalizer, parser: Arc<dyn SyntaxParser>, options: DetectorOptions) -> Self {
        Detector {
            normalizer,
            ast_cache: AstCache::new(parser),
            scorer: Scorer::new(),
            extractor: Box::new(TextScanExtractor::new(4)),
            linker: Box::new(NoDiffLinker),
            diff_links: false,
            options,
        }
    }

    pub fn with_extractor(mut self, extractor: Box<dyn FunctionExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// Attach a diff linker; rows without a link then render as unavailable.
    pub fn with_linker(mut self, linker: Box<dyn DiffLinker>) -> Self {
        self.linker = linker;
        self.diff_links = true;
        self
    }

    /// Wire every collaborator from resolved configuration.
    pub fn from_config(config: &ResolvedConfig) -> Result<Self> {
        let parser: Arc<dyn SyntaxParser> = Arc::new(CppParser::new()?);

        let preprocessor: Box<dyn Preprocessor> = if config.preprocessor_enabled {
            Box::new(CommandPreprocessor::new(
                config.preprocessor_command.clone(),
                config.preprocessor_std.clone(),
                config.preprocessor_args.clone(),
            ))
        } else {
            Box::new(NoopPreprocessor)
        };

        let normalizer = Normalizer::new(
            NormalizeOptions {
                combined_file_name: config.combined_file_name.clone(),
                source_extensions: config.source_extensions.clone(),
                header_extensions: config.header_extensions.clone(),
                exclude: config.exclude.clone(),
                write_artifacts: config.write_artifacts,
                reuse_combined: config.reuse_combined,
            },
            preprocessor,
        );

        let options = DetectorOptions {
            thresholds: config.thresholds,
            size_filter: config.size_filter,
            score_policy: config.score_policy,
            missing_inputs: config.missing_inputs,
            top: config.top_n,
        };

        let extractor = extractor_for(config.extraction, parser.clone(), config.min_name_length);
        let mut detector = Detector::new(normalizer, parser, options).with_extractor(extractor);
        if config.html_diff {
            detector = detector.with_linker(Box::new(GumtreeLinker::new(
                config.html_diff_command.clone(),
                config.html_diff_output_dir.clone(),
                config.combined_file_name.clone(),
            )));
        }
        Ok(detector)
    }

    pub fn options(&self) -> &DetectorOptions {
        &self.options
    }

    pub fn ast_cache(&self) -> &AstCache {
        &self.ast_cache
    }

    pub fn scorer(&self) -> &Scorer {
        &self.scorer
    }

    /// Run every stage over `paths`.
    pub fn run(&self, paths: &[PathBuf]) -> Result<ComparisonReport> {
        let normalized = self.normalize_inputs(paths)?;
        let mode = normalized.mode;
        let mut failures = normalized.failures;

        let built = self.build_trees(normalized.units);
        failures.extend(built.failures.iter().cloned());

        // Barrier: every size is known before filtering starts
        let sizes = built.sizes();
        let threshold = self
            .options
            .size_filter
            .map(|granularity| filter_threshold(&sizes, granularity));
        let plan = plan_pairs(&sizes, threshold);
        info!(
            units = built.units.len(),
            threshold = ?threshold,
            scored = plan.scored.len(),
            excluded = plan.excluded.len(),
            "pair plan ready"
        );

        let start = Instant::now();
        let mut pairs = self.score_pairs(&built, &plan);
        if let Some(top) = self.options.top {
            pairs.truncate(top);
        }
        let mut excluded: Vec<ExcludedPair> = plan
            .excluded
            .iter()
            .map(|&(i, j, size_difference)| {
                debug!(
                    left = %built.units[i].unit.id,
                    right = %built.units[j].unit.id,
                    size_difference,
                    "pair excluded by size filter"
                );
                ExcludedPair {
                    left: built.units[i].unit.id.clone(),
                    right: built.units[j].unit.id.clone(),
                    size_difference,
                    diff_link: None,
                }
            })
            .collect();

        let functions = self.match_functions(&built, &pairs);
        if self.diff_links {
            self.attach_links(&built, &mut pairs, &mut excluded);
        }
        let elapsed = start.elapsed();
        info!(elapsed_ms = elapsed.as_millis() as u64, "comparison finished");

        Ok(ComparisonReport {
            mode,
            units: built
                .units
                .iter()
                .map(|b| UnitReport {
                    id: b.unit.id.clone(),
                    kind: b.unit.kind,
                    size: b.tree.size(),
                    hash: b.unit.hash.clone(),
                    parse_errors: b.tree.has_errors(),
                })
                .collect(),
            filter_threshold: threshold,
            pairs,
            excluded,
            functions,
            failures,
            diff_links: self.diff_links,
            elapsed,
        })
    }

    /// Stage 1: one unit per submission path, in input order.
    pub fn normalize_inputs(&self, paths: &[PathBuf]) -> Result<NormalizedSet> {
        let mode = InputMode::detect(paths);
        info!(?mode, submissions = paths.len(), "normalizing submissions");

        if self.options.missing_inputs == MissingInputPolicy::Abort {
            if let Some(path) = paths.iter().find(|p| !p.exists()) {
                return Err(SpdtError::MissingInput { path: path.clone() }.into());
            }
        }

        let results: Vec<Result<SourceUnit>> = paths
            .par_iter()
            .map(|path| self.normalize_one(mode, path))
            .collect();

        let mut units = Vec::new();
        let mut failures = Vec::new();
        for (path, result) in paths.iter().zip(results) {
            match result {
                Ok(unit) => units.push(unit),
                Err(e) => {
                    if missing_input(&e).is_some()
                        && self.options.missing_inputs == MissingInputPolicy::Abort
                    {
                        return Err(e);
                    }
                    warn!(path = %path.display(), "skipping submission: {:#}", e);
                    failures.push(SubmissionFailure {
                        path: path.display().to_string(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }
        // Ids key both caches and the unit index
        disambiguate_ids(&mut units);
        Ok(NormalizedSet {
            mode,
            units,
            failures,
        })
    }

    fn normalize_one(&self, mode: InputMode, path: &Path) -> Result<SourceUnit> {
        match mode {
            InputMode::Files => self.normalizer.normalize_file(path),
            InputMode::Directories => self.normalizer.combine_directory(path),
            InputMode::Mixed => self.normalizer.load_raw(path),
        }
    }

    /// Stage 2: parse every unit through the cache.
    pub fn build_trees(&self, units: Vec<SourceUnit>) -> BuiltSet {
        let results: Vec<(SourceUnit, Result<Arc<SyntaxTree>>)> = units
            .into_par_iter()
            .map(|unit| {
                let tree = self.ast_cache.build(&unit.text);
                (unit, tree)
            })
            .collect();

        let mut built = Vec::new();
        let mut failures = Vec::new();
        for (unit, tree) in results {
            match tree {
                Ok(tree) => {
                    if tree.has_errors() {
                        debug!(unit = %unit.id, "parsed with recoverable errors");
                    }
                    built.push(BuiltUnit { unit, tree });
                }
                Err(e) => {
                    warn!(unit = %unit.id, "skipping submission: {:#}", e);
                    failures.push(SubmissionFailure {
                        path: unit.path.display().to_string(),
                        reason: format!("{:#}", e),
                    });
                }
            }
        }
        BuiltSet {
            units: built,
            failures,
        }
    }

    /// Stages 4 and 5: score planned pairs, classify and rank.
    pub fn score_pairs(&self, built: &BuiltSet, plan: &PairPlan) -> Vec<PairReport> {
        let policy = self.options.score_policy;
        let pairs: Vec<PairReport> = plan
            .scored
            .par_iter()
            .map(|&(i, j)| {
                let (a, b) = (&built.units[i], &built.units[j]);
                let similarity = self
                    .scorer
                    .score_units(&a.unit.id, &a.tree, &b.unit.id, &b.tree);
                let anomaly = is_anomalous(similarity);
                if anomaly {
                    warn!(left = %a.unit.id, right = %b.unit.id, similarity, "score outside [0, 1]");
                }
                PairReport {
                    left: a.unit.id.clone(),
                    right: b.unit.id.clone(),
                    similarity,
                    conclusion: classify_with_thresholds(
                        policy.apply(similarity),
                        &self.options.thresholds,
                    ),
                    anomaly,
                    diff_link: None,
                }
            })
            .collect();
        sort_pairs(pairs, policy)
    }

    /// Function-level comparison of every ambiguous pair, in rank order.
    pub fn match_functions(&self, built: &BuiltSet, pairs: &[PairReport]) -> Vec<FunctionComparison> {
        let by_id = index_units(built);
        let matcher = FunctionMatcher {
            extractor: self.extractor.as_ref(),
            ast_cache: &self.ast_cache,
            scorer: &self.scorer,
            policy: self.options.score_policy,
        };

        let mut comparisons = Vec::new();
        for pair in pairs.iter().filter(|p| p.conclusion.needs_function_matching()) {
            let (Some(left), Some(right)) = (by_id.get(pair.left.as_str()), by_id.get(pair.right.as_str())) else {
                continue;
            };
            match matcher.compare(left, right) {
                Ok(Some(comparison)) => comparisons.push(comparison),
                Ok(None) => debug!(left = %pair.left, right = %pair.right, "no function candidates"),
                Err(e) => warn!(left = %pair.left, right = %pair.right, "function matching failed: {:#}", e),
            }
        }
        comparisons
    }

    fn attach_links(&self, built: &BuiltSet, pairs: &mut [PairReport], excluded: &mut [ExcludedPair]) {
        let by_id = index_units(built);
        let link = |left: &str, right: &str| match (by_id.get(left), by_id.get(right)) {
            (Some(l), Some(r)) => self.linker.link(l, r),
            _ => None,
        };
        pairs
            .par_iter_mut()
            .for_each(|p| p.diff_link = link(&p.left, &p.right));
        excluded
            .par_iter_mut()
            .for_each(|p| p.diff_link = link(&p.left, &p.right));
    }
}

fn index_units(built: &BuiltSet) -> HashMap<&str, &SourceUnit> {
    built
        .units
        .iter()
        .map(|b| (b.unit.id.as_str(), &b.unit))
        .collect()
}
