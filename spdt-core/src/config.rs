//! Configuration file support for spdt
//!
//! Loads run configuration from JSON files.
//!
//! Search order:
//! 1. Explicit path (--config CLI flag)
//! 2. `.spdtrc.json` in the working directory
//! 3. `spdt.config.json` in the working directory
//!
//! All fields are optional. CLI flags take precedence over config file values.

use crate::classify::Thresholds;
use crate::functions::ExtractionMode;
use crate::pipeline::MissingInputPolicy;
use crate::similarity::ScorePolicy;
use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_GRANULARITY: usize = 10;
const DEFAULT_PREPROCESSOR: &str = "g++";
const DEFAULT_STD: &str = "c++11";
const DEFAULT_MIN_NAME_LENGTH: usize = 4;
const DEFAULT_COMBINED_FILE: &str = "fin_ent.cpp";
const DEFAULT_DIFF_TOOL: &str = "gumtree";
const DEFAULT_SOURCE_EXTENSIONS: &[&str] = &["cpp", "cc", "cxx"];
const DEFAULT_HEADER_EXTENSIONS: &[&str] = &["h", "hpp", "hh"];

/// spdt configuration loaded from a JSON config file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SpdtConfig {
    /// Conclusion band boundaries
    #[serde(default)]
    pub thresholds: Option<ThresholdConfig>,

    /// Node-size pre-filter
    #[serde(default)]
    pub size_filter: Option<SizeFilterConfig>,

    /// External preprocessor for single-file submissions
    #[serde(default)]
    pub preprocessor: Option<PreprocessorConfig>,

    /// Function-level matching
    #[serde(default)]
    pub functions: Option<FunctionConfig>,

    /// Raw or clamped scores for ranking and classification (default: raw)
    #[serde(default)]
    pub score_policy: Option<ScorePolicy>,

    /// Combined file written into directory submissions (default: fin_ent.cpp)
    #[serde(default)]
    pub combined_file_name: Option<String>,

    #[serde(default)]
    pub source_extensions: Vec<String>,

    #[serde(default)]
    pub header_extensions: Vec<String>,

    /// Glob patterns for files ignored during directory combination
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Write `<stem>_p.<ext>` next to file submissions (default: true)
    #[serde(default)]
    pub write_artifacts: Option<bool>,

    /// Abort on a missing submission or skip it (default: abort)
    #[serde(default)]
    pub missing_inputs: Option<MissingInputPolicy>,

    /// HTML diff links
    #[serde(default)]
    pub html_diff: Option<HtmlDiffConfig>,

    /// Maximum number of scored pairs to show
    #[serde(default)]
    pub top: Option<usize>,
}

/// Conclusion band boundaries
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThresholdConfig {
    /// Lower bound of "plagiarism might be present" (default: 0.3)
    pub ambiguous: Option<f64>,
    /// Lower bound of "plagiarism found" (default: 0.8)
    #[serde(rename = "match")]
    pub plagiarism: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SizeFilterConfig {
    /// Default: true
    pub enabled: Option<bool>,
    /// Threshold is rounded down to a multiple of this (default: 10)
    pub granularity: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PreprocessorConfig {
    /// Default: true
    pub enabled: Option<bool>,
    /// Compiler driver (default: g++)
    pub command: Option<String>,
    /// Language standard (default: c++11)
    pub std: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FunctionConfig {
    /// `text` (default) or `syntax`
    pub extraction: Option<ExtractionMode>,
    /// Shorter names are discarded (default: 4)
    pub min_name_length: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HtmlDiffConfig {
    /// Default: false
    pub enabled: Option<bool>,
    /// Diff tool (default: gumtree)
    pub command: Option<String>,
    /// Directory receiving the HTML files (default: .)
    pub output_dir: Option<PathBuf>,
}

/// Resolved configuration with compiled glob patterns
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub thresholds: Thresholds,
    /// Pre-filter granularity; `None` disables the filter
    pub size_filter: Option<usize>,
    /// Preprocessor
    pub preprocessor_enabled: bool,
    pub preprocessor_command: String,
    pub preprocessor_std: String,
    pub preprocessor_args: Vec<String>,
    /// Function matching
    pub extraction: ExtractionMode,
    pub min_name_length: usize,
    pub score_policy: ScorePolicy,
    /// Normalization
    pub combined_file_name: String,
    pub source_extensions: Vec<String>,
    pub header_extensions: Vec<String>,
    pub exclude: Option<GlobSet>,
    pub exclude_patterns: Vec<String>,
    pub write_artifacts: bool,
    /// Reuse combined directory files from earlier runs (CLI `--refresh` clears it)
    pub reuse_combined: bool,
    pub missing_inputs: MissingInputPolicy,
    /// Diff links
    pub html_diff: bool,
    pub html_diff_command: String,
    pub html_diff_output_dir: PathBuf,
    pub top_n: Option<usize>,
    /// Path the config was loaded from (None if defaults)
    pub config_path: Option<PathBuf>,
}

impl SpdtConfig {
    /// Validate the configuration for logical errors
    pub fn validate(&self) -> Result<()> {
        if let Some(ref t) = self.thresholds {
            let ambiguous = t.ambiguous.unwrap_or(0.3);
            let plagiarism = t.plagiarism.unwrap_or(0.8);

            if !(0.0..=1.0).contains(&ambiguous) {
                anyhow::bail!(
                    "thresholds.ambiguous must be between 0 and 1 (got {})",
                    ambiguous
                );
            }
            if !(0.0..=1.0).contains(&plagiarism) {
                anyhow::bail!(
                    "thresholds.match must be between 0 and 1 (got {})",
                    plagiarism
                );
            }
            if ambiguous >= plagiarism {
                anyhow::bail!(
                    "thresholds.ambiguous ({}) must be less than thresholds.match ({})",
                    ambiguous,
                    plagiarism
                );
            }
        }

        if let Some(granularity) = self.size_filter.as_ref().and_then(|s| s.granularity) {
            if granularity == 0 {
                anyhow::bail!("size_filter.granularity must be at least 1");
            }
        }

        if let Some(ref p) = self.preprocessor {
            if p.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
                anyhow::bail!("preprocessor.command must not be empty");
            }
        }

        if let Some(min) = self.functions.as_ref().and_then(|f| f.min_name_length) {
            if min == 0 {
                anyhow::bail!("functions.min_name_length must be at least 1");
            }
        }

        if let Some(ref name) = self.combined_file_name {
            if name.is_empty() || name.contains(['/', '\\']) {
                anyhow::bail!(
                    "combined_file_name must be a plain file name (got {:?})",
                    name
                );
            }
        }

        for ext in self.source_extensions.iter().chain(&self.header_extensions) {
            if ext.is_empty() || ext.starts_with('.') {
                anyhow::bail!("extensions are given without a leading dot (got {:?})", ext);
            }
        }

        if let Some(ref h) = self.html_diff {
            if h.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
                anyhow::bail!("html_diff.command must not be empty");
            }
        }

        if self.top == Some(0) {
            anyhow::bail!("top must be at least 1");
        }

        // Validate glob patterns compile
        for pattern in &self.exclude {
            Glob::new(pattern).with_context(|| format!("invalid exclude pattern: {}", pattern))?;
        }

        Ok(())
    }

    /// Resolve config into compiled form ready for use
    pub fn resolve(&self) -> Result<ResolvedConfig> {
        self.validate()?;

        let exclude = if self.exclude.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in &self.exclude {
                builder.add(Glob::new(pattern)?);
            }
            Some(builder.build()?)
        };

        let thresholds = match &self.thresholds {
            Some(t) => Thresholds {
                ambiguous: t.ambiguous.unwrap_or(0.3),
                plagiarism: t.plagiarism.unwrap_or(0.8),
            },
            None => Thresholds::default(),
        };

        let size_filter = match &self.size_filter {
            Some(s) if s.enabled == Some(false) => None,
            Some(s) => Some(s.granularity.unwrap_or(DEFAULT_GRANULARITY)),
            None => Some(DEFAULT_GRANULARITY),
        };

        let (preprocessor_enabled, preprocessor_command, preprocessor_std, preprocessor_args) =
            match &self.preprocessor {
                Some(p) => (
                    p.enabled.unwrap_or(true),
                    p.command.clone().unwrap_or_else(|| DEFAULT_PREPROCESSOR.to_string()),
                    p.std.clone().unwrap_or_else(|| DEFAULT_STD.to_string()),
                    p.args.clone(),
                ),
                None => (
                    true,
                    DEFAULT_PREPROCESSOR.to_string(),
                    DEFAULT_STD.to_string(),
                    Vec::new(),
                ),
            };

        let (extraction, min_name_length) = match &self.functions {
            Some(f) => (
                f.extraction.unwrap_or_default(),
                f.min_name_length.unwrap_or(DEFAULT_MIN_NAME_LENGTH),
            ),
            None => (ExtractionMode::default(), DEFAULT_MIN_NAME_LENGTH),
        };

        let (html_diff, html_diff_command, html_diff_output_dir) = match &self.html_diff {
            Some(h) => (
                h.enabled.unwrap_or(false),
                h.command.clone().unwrap_or_else(|| DEFAULT_DIFF_TOOL.to_string()),
                h.output_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
            ),
            None => (false, DEFAULT_DIFF_TOOL.to_string(), PathBuf::from(".")),
        };

        Ok(ResolvedConfig {
            thresholds,
            size_filter,
            preprocessor_enabled,
            preprocessor_command,
            preprocessor_std,
            preprocessor_args,
            extraction,
            min_name_length,
            score_policy: self.score_policy.unwrap_or_default(),
            combined_file_name: self
                .combined_file_name
                .clone()
                .unwrap_or_else(|| DEFAULT_COMBINED_FILE.to_string()),
            source_extensions: or_defaults(&self.source_extensions, DEFAULT_SOURCE_EXTENSIONS),
            header_extensions: or_defaults(&self.header_extensions, DEFAULT_HEADER_EXTENSIONS),
            exclude,
            exclude_patterns: self.exclude.clone(),
            write_artifacts: self.write_artifacts.unwrap_or(true),
            reuse_combined: true,
            missing_inputs: self.missing_inputs.unwrap_or_default(),
            html_diff,
            html_diff_command,
            html_diff_output_dir,
            top_n: self.top,
            config_path: None,
        })
    }
}

fn or_defaults(values: &[String], defaults: &[&str]) -> Vec<String> {
    if values.is_empty() {
        defaults.iter().map(|s| s.to_string()).collect()
    } else {
        values.to_vec()
    }
}

impl ResolvedConfig {
    /// Build a ResolvedConfig with all defaults (no config file)
    pub fn defaults() -> Result<Self> {
        SpdtConfig::default().resolve()
    }
}

/// Discover and load a config file from a directory
///
/// Search order:
/// 1. `.spdtrc.json`
/// 2. `spdt.config.json`
///
/// Returns `None` if no config file is found (use defaults).
pub fn discover_config(root: &Path) -> Result<Option<(SpdtConfig, PathBuf)>> {
    for name in [".spdtrc.json", "spdt.config.json"] {
        let path = root.join(name);
        if path.exists() {
            let config = load_config_file(&path)?;
            return Ok(Some((config, path)));
        }
    }
    Ok(None)
}

/// Load config from an explicit file path
pub fn load_config_file(path: &Path) -> Result<SpdtConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;

    let config: SpdtConfig = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse config file: {}", path.display()))?;

    config
        .validate()
        .with_context(|| format!("invalid config in: {}", path.display()))?;

    Ok(config)
}

/// Load and resolve configuration
///
/// If `config_path` is provided, loads from that file.
/// Otherwise, discovers config from `root`.
/// Returns default config if nothing is found.
pub fn load_and_resolve(root: &Path, config_path: Option<&Path>) -> Result<ResolvedConfig> {
    let (config, source_path) = if let Some(path) = config_path {
        let config = load_config_file(path)?;
        (config, Some(path.to_path_buf()))
    } else {
        match discover_config(root)? {
            Some((config, path)) => (config, Some(path)),
            None => (SpdtConfig::default(), None),
        }
    };

    let mut resolved = config.resolve()?;
    resolved.config_path = source_path;
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_default_config_is_valid() {
        let config = SpdtConfig::default();
        config.validate().expect("default config should be valid");
        let resolved = config.resolve().expect("default config should resolve");
        assert_eq!(resolved.thresholds, Thresholds::default());
        assert_eq!(resolved.size_filter, Some(10));
        assert!(resolved.preprocessor_enabled);
        assert_eq!(resolved.preprocessor_command, "g++");
        assert_eq!(resolved.preprocessor_std, "c++11");
        assert_eq!(resolved.extraction, ExtractionMode::Text);
        assert_eq!(resolved.min_name_length, 4);
        assert_eq!(resolved.score_policy, ScorePolicy::Raw);
        assert_eq!(resolved.combined_file_name, "fin_ent.cpp");
        assert_eq!(resolved.source_extensions, vec!["cpp", "cc", "cxx"]);
        assert_eq!(resolved.header_extensions, vec!["h", "hpp", "hh"]);
        assert!(resolved.exclude.is_none());
        assert!(resolved.write_artifacts);
        assert_eq!(resolved.missing_inputs, MissingInputPolicy::Abort);
        assert!(!resolved.html_diff);
        assert_eq!(resolved.html_diff_command, "gumtree");
        assert_eq!(resolved.top_n, None);
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: SpdtConfig = serde_json::from_str("{}").unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_full_config() {
        let json = r#"{
            "thresholds": { "ambiguous": 0.25, "match": 0.9 },
            "size_filter": { "enabled": true, "granularity": 5 },
            "preprocessor": { "command": "clang++", "std": "c++17", "args": ["-DNDEBUG"] },
            "functions": { "extraction": "syntax", "min_name_length": 3 },
            "score_policy": "clamp",
            "combined_file_name": "combined.cpp",
            "source_extensions": ["cpp"],
            "exclude": ["**/test_*.cpp"],
            "write_artifacts": false,
            "missing_inputs": "skip",
            "html_diff": { "enabled": true, "output_dir": "diffs" },
            "top": 20
        }"#;
        let config: SpdtConfig = serde_json::from_str(json).unwrap();
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.thresholds.ambiguous, 0.25);
        assert_eq!(resolved.thresholds.plagiarism, 0.9);
        assert_eq!(resolved.size_filter, Some(5));
        assert_eq!(resolved.preprocessor_command, "clang++");
        assert_eq!(resolved.preprocessor_std, "c++17");
        assert_eq!(resolved.preprocessor_args, vec!["-DNDEBUG"]);
        assert_eq!(resolved.extraction, ExtractionMode::Syntax);
        assert_eq!(resolved.min_name_length, 3);
        assert_eq!(resolved.score_policy, ScorePolicy::Clamp);
        assert_eq!(resolved.combined_file_name, "combined.cpp");
        assert_eq!(resolved.source_extensions, vec!["cpp"]);
        assert_eq!(resolved.header_extensions, vec!["h", "hpp", "hh"]);
        assert!(resolved.exclude.is_some());
        assert!(!resolved.write_artifacts);
        assert_eq!(resolved.missing_inputs, MissingInputPolicy::Skip);
        assert!(resolved.html_diff);
        assert_eq!(resolved.html_diff_command, "gumtree");
        assert_eq!(resolved.html_diff_output_dir, PathBuf::from("diffs"));
        assert_eq!(resolved.top_n, Some(20));
    }

    #[test]
    fn test_reject_unknown_fields() {
        let result: Result<SpdtConfig, _> = serde_json::from_str(r#"{"unknown_field": true}"#);
        assert!(result.is_err(), "unknown fields should be rejected");
    }

    #[test]
    fn test_reject_unordered_thresholds() {
        let json = r#"{"thresholds": {"ambiguous": 0.8, "match": 0.3}}"#;
        let config: SpdtConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_out_of_range_threshold() {
        let json = r#"{"thresholds": {"match": 1.5}}"#;
        let config: SpdtConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_zero_granularity() {
        let json = r#"{"size_filter": {"granularity": 0}}"#;
        let config: SpdtConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_path_as_combined_file_name() {
        let json = r#"{"combined_file_name": "../out.cpp"}"#;
        let config: SpdtConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_dotted_extension() {
        let json = r#"{"source_extensions": [".cpp"]}"#;
        let config: SpdtConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_invalid_glob_pattern() {
        let json = r#"{"exclude": ["[invalid"]}"#;
        let config: SpdtConfig = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_reject_unknown_policy_value() {
        let result: Result<SpdtConfig, _> = serde_json::from_str(r#"{"score_policy": "round"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_disabled_size_filter() {
        let json = r#"{"size_filter": {"enabled": false, "granularity": 20}}"#;
        let config: SpdtConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.resolve().unwrap().size_filter, None);
    }

    #[test]
    fn test_partial_thresholds_use_defaults_for_rest() {
        let json = r#"{"thresholds": {"ambiguous": 0.4}}"#;
        let config: SpdtConfig = serde_json::from_str(json).unwrap();
        let resolved = config.resolve().unwrap();
        assert_eq!(resolved.thresholds.ambiguous, 0.4);
        assert_eq!(resolved.thresholds.plagiarism, 0.8);
    }

    #[test]
    fn test_discover_spdtrc() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join(".spdtrc.json");
        fs::write(&config_path, r#"{"top": 5}"#).unwrap();

        let (config, path) = discover_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.top, Some(5));
        assert_eq!(path, config_path);
    }

    #[test]
    fn test_discover_priority_order() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(".spdtrc.json"), r#"{"top": 1}"#).unwrap();
        fs::write(dir.path().join("spdt.config.json"), r#"{"top": 2}"#).unwrap();

        let (config, _) = discover_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.top, Some(1));
    }

    #[test]
    fn test_discover_spdt_config_json() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("spdt.config.json"), r#"{"top": 2}"#).unwrap();

        let (config, _) = discover_config(dir.path()).unwrap().unwrap();
        assert_eq!(config.top, Some(2));
    }

    #[test]
    fn test_no_config_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_config(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_load_and_resolve_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let resolved = load_and_resolve(dir.path(), None).unwrap();
        assert!(resolved.config_path.is_none());
        assert_eq!(resolved.size_filter, Some(10));
    }

    #[test]
    fn test_load_and_resolve_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.json");
        fs::write(&path, r#"{"preprocessor": {"enabled": false}}"#).unwrap();

        let resolved = load_and_resolve(dir.path(), Some(&path)).unwrap();
        assert_eq!(resolved.config_path, Some(path));
        assert!(!resolved.preprocessor_enabled);
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, r#"{"top": 0}"#).unwrap();

        let err = load_config_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("bad.json"));
    }
}
