//! Source normalization
//!
//! Every submission becomes exactly one [`SourceUnit`]:
//! - a single file is include-stripped, macro-expanded and directive-stripped
//! - a directory is combined into one synthetic translation unit
//! - in mixed mode a path is taken verbatim
//!
//! Global invariants enforced:
//! - Submission files are never modified; artifacts are written beside them
//! - A unit is immutable once built
//! - Directory combination is idempotent (the combined file is reused)

use crate::error::SpdtError;
use crate::preprocess::Preprocessor;
use anyhow::{Context, Result};
use globset::GlobSet;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// How a unit was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    File,
    Directory,
    Raw,
}

/// One comparable piece of code.
#[derive(Debug, Clone, Serialize)]
pub struct SourceUnit {
    /// Display identifier: the path as given, or the directory name.
    pub id: String,
    /// The submission path this unit was built from.
    pub path: PathBuf,
    pub kind: UnitKind,
    #[serde(skip)]
    pub text: String,
    /// blake3 digest of `text`, hex encoded.
    pub hash: String,
}

impl SourceUnit {
    pub fn new(id: impl Into<String>, path: PathBuf, kind: UnitKind, text: String) -> Self {
        let hash = content_hash(&text);
        SourceUnit {
            id: id.into(),
            path,
            kind,
            text,
            hash,
        }
    }
}

/// Hex blake3 digest of normalized text.
pub fn content_hash(text: &str) -> String {
    blake3::hash(text.as_bytes()).to_hex().to_string()
}

/// Knobs for normalization, resolved from configuration.
#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    /// Name of the combined file written into directory submissions.
    pub combined_file_name: String,
    pub source_extensions: Vec<String>,
    pub header_extensions: Vec<String>,
    /// Files matching these globs are ignored during combination.
    pub exclude: Option<GlobSet>,
    /// Write `<stem>_p.<ext>` next to single-file submissions.
    pub write_artifacts: bool,
    /// Reuse an existing combined file instead of recombining.
    pub reuse_combined: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        NormalizeOptions {
            combined_file_name: "fin_ent.cpp".to_string(),
            source_extensions: vec!["cpp".to_string(), "cc".to_string(), "cxx".to_string()],
            header_extensions: vec!["h".to_string(), "hpp".to_string(), "hh".to_string()],
            exclude: None,
            write_artifacts: true,
            reuse_combined: true,
        }
    }
}

/// Turns submission paths into [`SourceUnit`]s.
pub struct Normalizer {
    options: NormalizeOptions,
    preprocessor: Box<dyn Preprocessor>,
}

impl Normalizer {
    pub fn new(options: NormalizeOptions, preprocessor: Box<dyn Preprocessor>) -> Self {
        Normalizer {
            options,
            preprocessor,
        }
    }

    pub fn options(&self) -> &NormalizeOptions {
        &self.options
    }

    /// Normalize a single source file.
    ///
    /// Include lines are removed, the preprocessor expands macros and
    /// conditionals, then every remaining directive line is dropped. If the
    /// preprocessor cannot run, the include-stripped text is used instead.
    pub fn normalize_file(&self, path: &Path) -> Result<SourceUnit> {
        let raw = read_submission(path)?;
        let without_includes = strip_include_directives(&raw);

        let expanded = match self.preprocessor.expand(&without_includes) {
            Ok(expanded) => expanded,
            Err(e) => {
                warn!(
                    file = %path.display(),
                    preprocessor = self.preprocessor.name(),
                    "preprocessing failed, continuing without macro expansion: {:#}",
                    e
                );
                without_includes
            }
        };
        let text = strip_preprocessor_directives(&expanded);

        if self.options.write_artifacts {
            let artifact = artifact_path(path);
            if let Err(e) = std::fs::write(&artifact, &text) {
                warn!(artifact = %artifact.display(), "failed to write preprocessed artifact: {}", e);
            }
        }

        Ok(SourceUnit::new(
            path.display().to_string(),
            path.to_path_buf(),
            UnitKind::File,
            text,
        ))
    }

    /// Combine a directory submission into one unit.
    ///
    /// Layout of the combined text: the deduplicated angle-bracket includes of
    /// all files, then header bodies (all directives removed), then source
    /// bodies (include directives removed). The result is written through to
    /// `<dir>/<combined_file_name>` and reused on later runs.
    pub fn combine_directory(&self, dir: &Path) -> Result<SourceUnit> {
        if !dir.exists() {
            return Err(SpdtError::MissingInput {
                path: dir.to_path_buf(),
            }
            .into());
        }
        let id = directory_name(dir);
        let combined_path = dir.join(&self.options.combined_file_name);

        if self.options.reuse_combined && combined_path.is_file() {
            debug!(dir = %dir.display(), "reusing combined file");
            let text = read_submission(&combined_path)?;
            return Ok(SourceUnit::new(id, dir.to_path_buf(), UnitKind::Directory, text));
        }

        let text = self.combine_files(dir)?;
        if let Err(e) = std::fs::write(&combined_path, &text) {
            warn!(file = %combined_path.display(), "failed to write combined file: {}", e);
        }
        Ok(SourceUnit::new(id, dir.to_path_buf(), UnitKind::Directory, text))
    }

    /// Take a path verbatim (mixed input mode).
    pub fn load_raw(&self, path: &Path) -> Result<SourceUnit> {
        let text = read_submission(path)?;
        Ok(SourceUnit::new(
            path.display().to_string(),
            path.to_path_buf(),
            UnitKind::Raw,
            text,
        ))
    }

    fn combine_files(&self, dir: &Path) -> Result<String> {
        let mut includes = BTreeSet::new();
        let mut headers = String::new();
        let mut sources = String::new();

        for file in self.collect_directory_files(dir)? {
            let code = std::fs::read_to_string(&file)
                .map_err(|source| SpdtError::Unreadable {
                    path: file.clone(),
                    source,
                })?;
            includes.extend(angle_includes(&code));

            if self.has_extension(&file, &self.options.header_extensions) {
                headers.push_str(&strip_preprocessor_directives(&code));
                headers.push_str("\n\n");
            } else {
                sources.push_str(&strip_include_directives(&code));
                sources.push_str("\n\n");
            }
        }

        let include_block = includes.into_iter().collect::<Vec<_>>().join("\n");
        Ok(format!("{}\n\n{}{}", include_block, headers, sources))
    }

    /// Source and header files directly inside `dir`, sorted by name.
    fn collect_directory_files(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory: {}", dir.display()))?
        {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            if path.file_name().and_then(|n| n.to_str())
                == Some(self.options.combined_file_name.as_str())
            {
                continue;
            }
            let wanted = self.has_extension(&path, &self.options.source_extensions)
                || self.has_extension(&path, &self.options.header_extensions);
            if !wanted {
                continue;
            }
            if let Some(exclude) = &self.options.exclude {
                if exclude.is_match(&path) {
                    debug!(file = %path.display(), "excluded by pattern");
                    continue;
                }
            }
            files.push(path);
        }
        // Sort files for deterministic order
        files.sort();
        Ok(files)
    }

    fn has_extension(&self, path: &Path, extensions: &[String]) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| extensions.iter().any(|want| want == ext))
    }
}

fn read_submission(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(SpdtError::MissingInput {
            path: path.to_path_buf(),
        }
        .into());
    }
    std::fs::read_to_string(path).map_err(|source| {
        SpdtError::Unreadable {
            path: path.to_path_buf(),
            source,
        }
        .into()
    })
}

/// `dir/name.cpp` -> `dir/name_p.cpp`
pub fn artifact_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}_p.{}", stem, ext.to_string_lossy()),
        None => format!("{}_p", stem),
    };
    path.with_file_name(name)
}

/// Give every distinct submission path a distinct id.
///
/// Units whose ids clash (two directories both called `alice`) are prefixed
/// with their parent directory name (`x/alice`, `y/alice`). If that still
/// clashes, the full path is used. The same path given twice keeps one id.
pub fn disambiguate_ids(units: &mut [SourceUnit]) {
    let clashing = clashing_ids(units);
    if clashing.is_empty() {
        return;
    }
    for unit in units.iter_mut().filter(|u| clashing.contains(&u.id)) {
        unit.id = parent_qualified_id(&unit.path, &unit.id);
    }

    let still_clashing = clashing_ids(units);
    for unit in units.iter_mut().filter(|u| still_clashing.contains(&u.id)) {
        unit.id = unit.path.display().to_string();
    }
}

/// Ids shared by more than one distinct path.
fn clashing_ids(units: &[SourceUnit]) -> HashSet<String> {
    let mut owners: HashMap<&str, HashSet<&Path>> = HashMap::new();
    for unit in units {
        owners
            .entry(unit.id.as_str())
            .or_default()
            .insert(unit.path.as_path());
    }
    owners
        .into_iter()
        .filter(|(_, paths)| paths.len() > 1)
        .map(|(id, _)| id.to_string())
        .collect()
}

fn parent_qualified_id(path: &Path, id: &str) -> String {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    match canonical
        .parent()
        .and_then(|p| p.file_name())
        .map(|n| n.to_string_lossy().into_owned())
    {
        Some(parent) => format!("{}/{}", parent, id),
        None => path.display().to_string(),
    }
}

fn directory_name(dir: &Path) -> String {
    // `foo/.` and `foo/` should still be called `foo`
    let canonical = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    canonical
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

fn strip_lines(code: &str, drop: impl Fn(&str) -> bool) -> String {
    code.split('\n')
        .filter(|line| !drop(line.trim_start()))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Remove every `#include` line.
pub fn strip_include_directives(code: &str) -> String {
    strip_lines(code, |line| line.starts_with("#include"))
}

/// Remove every preprocessor directive line, line markers included.
pub fn strip_preprocessor_directives(code: &str) -> String {
    strip_lines(code, |line| line.starts_with('#'))
}

/// System includes (`#include <...>`) in order of appearance.
pub fn angle_includes(code: &str) -> Vec<String> {
    code.lines()
        .map(str::trim)
        .filter(|line| line.starts_with("#include <") && line.ends_with('>'))
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
#[path = "normalize/tests.rs"]
mod tests;
