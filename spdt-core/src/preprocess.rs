//! External C/C++ preprocessor invocation
//!
//! Input is source text whose include directives were already removed; output
//! is macro-expanded text that may still contain line markers and other
//! directive lines. Stripping those is the normalizer's job.
//!
//! Uses the compiler driver's `-E` mode over stdin/stdout, so no temporary
//! files are created and concurrent invocations cannot collide.

use crate::error::SpdtError;
use anyhow::{Context, Result};
use std::io::Write;
use std::process::{Command, Stdio};

/// Macro expansion and conditional-compilation resolution.
pub trait Preprocessor: Send + Sync {
    /// Expand `source`.
    fn expand(&self, source: &str) -> Result<String>;

    /// Short name used in diagnostics.
    fn name(&self) -> &str;
}

/// Preprocessor that shells out to a compiler driver (`g++ -E` by default)
#[derive(Debug, Clone)]
pub struct CommandPreprocessor {
    command: String,
    std: String,
    args: Vec<String>,
}

impl CommandPreprocessor {
    pub fn new(command: impl Into<String>, std: impl Into<String>, args: Vec<String>) -> Self {
        CommandPreprocessor {
            command: command.into(),
            std: std.into(),
            args,
        }
    }

    fn command_args(&self) -> Vec<String> {
        let mut args = vec![
            "-E".to_string(),
            "-x".to_string(),
            "c++".to_string(),
            format!("-std={}", self.std),
        ];
        args.extend(self.args.iter().cloned());
        // Read the translation unit from stdin
        args.push("-".to_string());
        args
    }
}

impl Preprocessor for CommandPreprocessor {
    fn expand(&self, source: &str) -> Result<String> {
        let mut child = Command::new(&self.command)
            .args(self.command_args())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| SpdtError::ExternalTool {
                tool: self.command.clone(),
                message: format!("failed to invoke: {}", e),
            })?;

        // Feed stdin from a separate thread so a full stdout pipe cannot deadlock us
        let mut stdin = child
            .stdin
            .take()
            .context("preprocessor stdin was not captured")?;
        let input = source.to_string();
        let writer = std::thread::spawn(move || stdin.write_all(input.as_bytes()));

        let output = child
            .wait_with_output()
            .with_context(|| format!("failed to wait for {}", self.command))?;
        // A broken pipe here means the tool exited early; its status says why
        let _ = writer.join();

        if !output.status.success() {
            return Err(SpdtError::ExternalTool {
                tool: self.command.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn name(&self) -> &str {
        &self.command
    }
}

/// Pass-through used when preprocessing is disabled; directive lines are
/// still stripped by the normalizer afterwards.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPreprocessor;

impl Preprocessor for NoopPreprocessor {
    fn expand(&self, source: &str) -> Result<String> {
        Ok(source.to_string())
    }

    fn name(&self) -> &str {
        "none"
    }
}
