//! FigStyle CLI - Batch figure restyling front end
//!
//! Commands: templates, batch-improve, batch-analyze, batch-watch
//! Outputs JSON to stdout, logs to stderr
//! Returns exit code 2 when any file in a batch failed

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use figstyle_core::{
    batch::WatchSettings,
    store::{JsonManifestStore, JsonTemplateStore},
    BatchEngine, BatchOptions, BatchOutcome, BatchRequest, BatchTarget, ColorMapping,
    OutputFormat, TemplateRegistry,
};

#[derive(Parser)]
#[command(name = "figstyle-cli")]
#[command(about = "FigStyle CLI - Publication Figure Restyling Engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding custom templates and the processing manifest
    #[arg(long, default_value = ".figstyle")]
    state_dir: PathBuf,
}

#[derive(Subcommand)]
enum Commands {
    /// List available templates
    Templates,

    /// Restyle figures to match a template
    BatchImprove {
        /// Input SVG/PDF files, or a single directory
        inputs: Vec<PathBuf>,

        /// Template name
        #[arg(short, long)]
        template: String,

        /// Output directory (default: `improved/` next to the inputs)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format: svg, pdf, or png
        #[arg(short, long, default_value = "svg")]
        format: String,

        /// File name filter, e.g. 'fig_*.svg'
        #[arg(long)]
        pattern: Option<String>,

        /// Map remaining data colors to the nearest palette entry
        #[arg(long, action = ArgAction::Set, default_value_t = true)]
        auto_color: bool,

        /// Skip files unchanged since the last successful run
        #[arg(long)]
        incremental: bool,

        /// Write a self-contained HTML report next to the outputs
        #[arg(long)]
        report: bool,

        /// Force the matplotlib cleanup ruleset on or off
        /// (default: decided by detection)
        #[arg(long, action = ArgAction::Set)]
        cleanup_matplotlib: Option<bool>,

        /// Explicit color overrides as JSON, e.g. '{"#4682b4":"#2171b5"}'
        #[arg(long)]
        color_map: Option<String>,
    },

    /// Classify and map figures without modifying anything
    BatchAnalyze {
        /// Input SVG/PDF files, or a single directory
        inputs: Vec<PathBuf>,

        /// Template name to map colors against
        #[arg(short, long)]
        template: Option<String>,

        /// File name filter, e.g. 'fig_*.svg'
        #[arg(long)]
        pattern: Option<String>,
    },

    /// Poll a directory, restyling figures as they change
    BatchWatch {
        /// Input SVG/PDF files, or a single directory
        inputs: Vec<PathBuf>,

        /// Template name
        #[arg(short, long)]
        template: String,

        /// Output directory (default: `improved/` next to the inputs)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output format: svg, pdf, or png
        #[arg(short, long, default_value = "svg")]
        format: String,

        /// File name filter, e.g. 'fig_*.svg'
        #[arg(long)]
        pattern: Option<String>,

        /// Map remaining data colors to the nearest palette entry
        #[arg(long, action = ArgAction::Set, default_value_t = true)]
        auto_color: bool,

        /// Write a self-contained HTML report each cycle
        #[arg(long)]
        report: bool,

        /// Force the matplotlib cleanup ruleset on or off
        /// (default: decided by detection)
        #[arg(long, action = ArgAction::Set)]
        cleanup_matplotlib: Option<bool>,

        /// Poll interval in seconds
        #[arg(long, default_value_t = 5)]
        interval: u64,

        /// Stop after this many seconds (default: run indefinitely)
        #[arg(long)]
        duration: Option<u64>,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let store = JsonTemplateStore::new(cli.state_dir.join("templates.json"));
    let registry = match TemplateRegistry::with_builtins(Box::new(store)) {
        Ok(r) => r,
        Err(e) => {
            eprintln!(r#"{{"error": "Failed to load templates: {}"}}"#, e);
            return ExitCode::FAILURE;
        }
    };
    let manifest = JsonManifestStore::new(cli.state_dir.join("batch_manifest.json"));
    let mut engine = BatchEngine::new(registry, Box::new(manifest));

    match cli.command {
        Commands::Templates => {
            let templates: Vec<_> = engine
                .registry()
                .list()
                .iter()
                .map(|t| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "provenance": t.provenance,
                        "palette": t.palette,
                    })
                })
                .collect();

            println!("{}", serde_json::to_string_pretty(&templates).unwrap());
            ExitCode::SUCCESS
        }

        Commands::BatchImprove {
            inputs,
            template,
            output,
            format,
            pattern,
            auto_color,
            incremental,
            report,
            cleanup_matplotlib,
            color_map,
        } => {
            let format: OutputFormat = match format.parse() {
                Ok(f) => f,
                Err(e) => return request_error(&e),
            };
            let color_map: Option<ColorMapping> = match color_map {
                None => None,
                Some(json) => match serde_json::from_str(&json) {
                    Ok(map) => Some(map),
                    Err(e) => {
                        println!(r#"{{"error": "Invalid color map: {}"}}"#, e);
                        return ExitCode::FAILURE;
                    }
                },
            };

            let request = BatchRequest {
                target: target_from_inputs(inputs),
                template,
                output_dir: output,
                format,
                options: BatchOptions {
                    pattern,
                    auto_color,
                    color_map,
                    incremental,
                    report,
                    cleanup_matplotlib,
                },
            };

            match engine.run_improve(&request) {
                Ok(outcome) => print_outcome(&outcome),
                Err(e) => request_error(&e),
            }
        }

        Commands::BatchAnalyze {
            inputs,
            template,
            pattern,
        } => {
            let target = target_from_inputs(inputs);
            match engine.run_analyze(&target, template.as_deref(), pattern.as_deref()) {
                Ok(outcome) => print_outcome(&outcome),
                Err(e) => request_error(&e),
            }
        }

        Commands::BatchWatch {
            inputs,
            template,
            output,
            format,
            pattern,
            auto_color,
            report,
            cleanup_matplotlib,
            interval,
            duration,
        } => {
            let format: OutputFormat = match format.parse() {
                Ok(f) => f,
                Err(e) => return request_error(&e),
            };
            let request = BatchRequest {
                target: target_from_inputs(inputs),
                template,
                output_dir: output,
                format,
                options: BatchOptions {
                    pattern,
                    auto_color,
                    incremental: true,
                    report,
                    cleanup_matplotlib,
                    ..Default::default()
                },
            };
            let settings = WatchSettings {
                interval: Duration::from_secs(interval.max(1)),
                duration: duration.map(Duration::from_secs),
            };

            match engine.watch(&request, &settings, &AtomicBool::new(false)) {
                Ok(summary) => {
                    println!("{}", serde_json::to_string_pretty(&summary).unwrap());
                    if summary.failed > 0 {
                        ExitCode::from(2)
                    } else {
                        ExitCode::SUCCESS
                    }
                }
                Err(e) => request_error(&e),
            }
        }
    }
}

/// A single directory input is a directory target; anything else is an
/// explicit file list. No inputs means the current directory.
fn target_from_inputs(inputs: Vec<PathBuf>) -> BatchTarget {
    match inputs.as_slice() {
        [] => BatchTarget::Directory(PathBuf::from(".")),
        [only] if only.is_dir() => BatchTarget::Directory(only.clone()),
        _ => BatchTarget::Files(inputs),
    }
}

fn print_outcome(outcome: &BatchOutcome) -> ExitCode {
    println!("{}", serde_json::to_string_pretty(outcome).unwrap());
    if outcome.failed > 0 {
        ExitCode::from(2) // Per-file failures
    } else {
        ExitCode::SUCCESS
    }
}

fn request_error(e: &figstyle_core::Error) -> ExitCode {
    let output = serde_json::json!({
        "error": e.to_string(),
        "kind": e.kind(),
    });
    println!("{}", serde_json::to_string_pretty(&output).unwrap());
    ExitCode::FAILURE
}
