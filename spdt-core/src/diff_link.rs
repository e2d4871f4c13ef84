//! HTML diff links for compared pairs
//!
//! Each reported pair can carry a link to a side-by-side tree diff rendered
//! by an external tool (`gumtree htmldiff` by default). Generation is
//! best-effort: a failure leaves the link empty and never fails the run.
//!
//! Uses the diff tool's CLI directly.

use crate::error::SpdtError;
use crate::normalize::{SourceUnit, UnitKind};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::warn;

/// Produces a viewable diff for a unit pair.
pub trait DiffLinker: Send + Sync {
    /// Link to the diff, or `None` if it could not be produced.
    fn link(&self, left: &SourceUnit, right: &SourceUnit) -> Option<String>;
}

/// Linker used when diff generation is turned off.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDiffLinker;

impl DiffLinker for NoDiffLinker {
    fn link(&self, _left: &SourceUnit, _right: &SourceUnit) -> Option<String> {
        None
    }
}

/// Runs `<command> htmldiff <left> <right> -o <output>`.
#[derive(Debug, Clone)]
pub struct GumtreeLinker {
    command: String,
    output_dir: PathBuf,
    combined_file_name: String,
}

impl GumtreeLinker {
    pub fn new(
        command: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        combined_file_name: impl Into<String>,
    ) -> Self {
        GumtreeLinker {
            command: command.into(),
            output_dir: output_dir.into(),
            combined_file_name: combined_file_name.into(),
        }
    }

    /// Where the HTML for a pair is written.
    pub fn output_path(&self, left: &SourceUnit, right: &SourceUnit) -> PathBuf {
        self.output_dir
            .join(format!("{}_vs_{}.html", label(left), label(right)))
    }

    /// File actually handed to the diff tool for a unit.
    pub fn diff_input(&self, unit: &SourceUnit) -> PathBuf {
        match unit.kind {
            UnitKind::Directory => unit.path.join(&self.combined_file_name),
            UnitKind::File | UnitKind::Raw => unit.path.clone(),
        }
    }

    fn run(&self, left: &Path, right: &Path, output: &Path) -> Result<()> {
        let result = Command::new(&self.command)
            .arg("htmldiff")
            .arg(left)
            .arg(right)
            .arg("-o")
            .arg(output)
            .output()
            .with_context(|| format!("failed to invoke {}", self.command))?;

        if !result.status.success() {
            return Err(SpdtError::ExternalTool {
                tool: self.command.clone(),
                message: String::from_utf8_lossy(&result.stderr).trim().to_string(),
            }
            .into());
        }
        Ok(())
    }
}

impl DiffLinker for GumtreeLinker {
    fn link(&self, left: &SourceUnit, right: &SourceUnit) -> Option<String> {
        let output = self.output_path(left, right);
        match self.run(&self.diff_input(left), &self.diff_input(right), &output) {
            Ok(()) => Some(file_url(&output)),
            Err(e) => {
                warn!(left = %left.id, right = %right.id, "html diff unavailable: {:#}", e);
                None
            }
        }
    }
}

/// Short name for a unit in output file names.
fn label(unit: &SourceUnit) -> String {
    match unit.kind {
        UnitKind::Directory => unit.id.clone(),
        UnitKind::File | UnitKind::Raw => unit
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| unit.id.clone()),
    }
}

/// `file://` URL for a local path, absolute when it can be resolved.
pub fn file_url(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", absolute.display())
}
