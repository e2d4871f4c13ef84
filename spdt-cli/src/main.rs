//! spdt CLI - structural plagiarism detection for C++ submissions

#![deny(warnings)]

// Global invariants enforced:
// - Reports go to stdout, diagnostics and progress to stderr
// - Identical input yields byte-for-byte identical JSON output
// - A missing submission exits with status 2, any other failure with 1

use anyhow::Context;
use clap::{ArgAction, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use spdt_core::config::{self, ResolvedConfig};
use spdt_core::error::missing_input;
use spdt_core::{render_json, render_text, Detector, MissingInputPolicy};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "spdt")]
#[command(about = "Structural plagiarism detection for C++ submissions")]
#[command(version = env!("SPDT_VERSION"))]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug); RUST_LOG takes precedence
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare submissions pairwise (all files, all directories, or a mix)
    Check {
        /// Submission files or directories
        #[arg(required = true, num_args = 2..)]
        paths: Vec<PathBuf>,

        /// Output format
        #[arg(long, default_value = "text")]
        format: OutputFormat,

        /// Path to config file (default: auto-discover)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Show only the top N scored pairs (overrides config file)
        #[arg(long)]
        top: Option<usize>,

        /// Generate HTML diff links with the configured diff tool
        #[arg(long)]
        html_diff: bool,

        /// Rebuild combined directory files instead of reusing them
        #[arg(long)]
        refresh: bool,

        /// Report missing submissions and compare the rest
        #[arg(long)]
        skip_missing: bool,

        /// Read file submissions without running the preprocessor
        #[arg(long)]
        no_preprocess: bool,

        /// Worker threads (default: one per CPU)
        #[arg(long)]
        jobs: Option<usize>,
    },
    /// Inspect configuration
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate a config file without running a comparison
    Validate {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Show the resolved configuration (merged defaults + config file)
    Show {
        /// Path to config file (default: auto-discover from current directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

struct CheckArgs {
    paths: Vec<PathBuf>,
    format: OutputFormat,
    config: Option<PathBuf>,
    top: Option<usize>,
    html_diff: bool,
    refresh: bool,
    skip_missing: bool,
    no_preprocess: bool,
    jobs: Option<usize>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(cli)));
    match outcome {
        Ok(Ok(code)) => code,
        Ok(Err(e)) => {
            eprintln!("Error: {:#}", e);
            if missing_input(&e).is_some() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
        // The panic hook has already printed the message
        Err(_) => ExitCode::FAILURE,
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Check {
            paths,
            format,
            config,
            top,
            html_diff,
            refresh,
            skip_missing,
            no_preprocess,
            jobs,
        } => check(CheckArgs {
            paths,
            format,
            config,
            top,
            html_diff,
            refresh,
            skip_missing,
            no_preprocess,
            jobs,
        }),
        Commands::Config { action } => match action {
            ConfigAction::Validate { path } => {
                let project_root = std::env::current_dir()?;
                match config::load_and_resolve(&project_root, path.as_deref()) {
                    Ok(config) => {
                        if let Some(ref p) = config.config_path {
                            println!("Config valid: {}", p.display());
                        } else {
                            println!("No config file found. Using defaults.");
                        }
                        Ok(ExitCode::SUCCESS)
                    }
                    Err(e) => {
                        eprintln!("Config validation failed: {:#}", e);
                        Ok(ExitCode::FAILURE)
                    }
                }
            }
            ConfigAction::Show { path } => {
                let project_root = std::env::current_dir()?;
                let resolved = config::load_and_resolve(&project_root, path.as_deref())
                    .context("failed to load configuration")?;
                print_config(&resolved);
                Ok(ExitCode::SUCCESS)
            }
        },
    }
}

fn check(args: CheckArgs) -> anyhow::Result<ExitCode> {
    if let Some(jobs) = args.jobs {
        rayon::ThreadPoolBuilder::new()
            .num_threads(jobs)
            .build_global()
            .context("failed to configure worker threads")?;
    }

    let project_root = std::env::current_dir()?;
    let mut resolved = config::load_and_resolve(&project_root, args.config.as_deref())
        .context("failed to load configuration")?;

    if let Some(ref p) = resolved.config_path {
        eprintln!("Using config: {}", p.display());
    }

    // CLI flags override config file values
    resolved.top_n = args.top.or(resolved.top_n);
    if args.html_diff {
        resolved.html_diff = true;
    }
    if args.refresh {
        resolved.reuse_combined = false;
    }
    if args.skip_missing {
        resolved.missing_inputs = MissingInputPolicy::Skip;
    }
    if args.no_preprocess {
        resolved.preprocessor_enabled = false;
    }

    let detector = Detector::from_config(&resolved)?;
    tracing::info!(
        submissions = args.paths.len(),
        preprocess = resolved.preprocessor_enabled,
        html_diff = resolved.html_diff,
        "starting comparison"
    );

    let spinner = progress_spinner(args.paths.len());
    let result = detector.run(&args.paths);
    spinner.finish_and_clear();
    let report = result?;

    match args.format {
        OutputFormat::Text => print!("{}", render_text(&report)),
        OutputFormat::Json => println!("{}", render_json(&report)),
    }

    Ok(ExitCode::SUCCESS)
}

/// Spinner on stderr; hidden automatically when stderr is not a terminal.
fn progress_spinner(submissions: usize) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} [{elapsed}]") {
        spinner.set_style(style);
    }
    spinner.set_message(format!("Comparing {} submissions", submissions));
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}

fn print_config(resolved: &ResolvedConfig) {
    println!("Configuration:");
    match resolved.config_path {
        Some(ref p) => println!("  Source: {}", p.display()),
        None => println!("  Source: defaults (no config file found)"),
    }
    println!();
    println!("Thresholds:");
    println!("  ambiguous: {}", resolved.thresholds.ambiguous);
    println!("  match: {}", resolved.thresholds.plagiarism);
    println!("  score_policy: {:?}", resolved.score_policy);
    println!();
    println!("Size filter:");
    println!("  granularity: {}", or_none(resolved.size_filter));
    println!();
    println!("Preprocessor:");
    if resolved.preprocessor_enabled {
        println!(
            "  command: {} -std={} {}",
            resolved.preprocessor_command,
            resolved.preprocessor_std,
            resolved.preprocessor_args.join(" ")
        );
    } else {
        println!("  disabled");
    }
    println!();
    println!("Functions:");
    println!("  extraction: {:?}", resolved.extraction);
    println!("  min_name_length: {}", resolved.min_name_length);
    println!();
    println!("Submissions:");
    println!("  combined_file_name: {}", resolved.combined_file_name);
    println!("  source_extensions: {}", resolved.source_extensions.join(", "));
    println!("  header_extensions: {}", resolved.header_extensions.join(", "));
    println!(
        "  exclude: {}",
        if resolved.exclude_patterns.is_empty() {
            "none".to_string()
        } else {
            resolved.exclude_patterns.join(", ")
        }
    );
    println!("  write_artifacts: {}", resolved.write_artifacts);
    println!("  missing_inputs: {:?}", resolved.missing_inputs);
    println!();
    println!("Output:");
    println!("  top: {}", or_none(resolved.top_n));
    if resolved.html_diff {
        println!(
            "  html_diff: {} -> {}",
            resolved.html_diff_command,
            display_dir(&resolved.html_diff_output_dir)
        );
    } else {
        println!("  html_diff: disabled");
    }
}

fn or_none(value: Option<usize>) -> String {
    value
        .map(|v| v.to_string())
        .unwrap_or_else(|| "none".to_string())
}

fn display_dir(path: &Path) -> String {
    if path.as_os_str().is_empty() {
        ".".to_string()
    } else {
        path.display().to_string()
    }
}
