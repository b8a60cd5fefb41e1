//! Batch orchestration: directory runs, incremental skipping, polling
//! watch.
//!
//! Request-level failures (missing template, unreadable directory)
//! abort before any file is touched. Per-file failures become `Failed`
//! records and the run continues; the manifest is only advanced for a
//! file after its output has been written.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::color::ColorMapping;
use crate::document::{parse_svg, serialize};
use crate::error::{Error, Result};
use crate::fingerprint::fingerprint_file;
use crate::report::{render_report, FileSnapshot, ReportContext};
use crate::store::{ManifestEntry, ManifestStore};
use crate::template::TemplateRegistry;
use crate::transform::{analyze, apply, ApplyOptions, TransformationRecord};

/// Default output subdirectory under the input directory.
const DEFAULT_OUTPUT_DIR: &str = "improved";

const REPORT_FILE_NAME: &str = "batch_report.html";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Svg,
    Pdf,
    Png,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Svg => "svg",
            OutputFormat::Pdf => "pdf",
            OutputFormat::Png => "png",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "svg" => Ok(OutputFormat::Svg),
            "pdf" => Ok(OutputFormat::Pdf),
            "png" => Ok(OutputFormat::Png),
            other => Err(Error::UnsupportedFormat(other.to_string())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Shell-style file name filter (`*` and `?`), applied on top of
    /// the extension filter.
    pub pattern: Option<String>,
    pub auto_color: bool,
    pub color_map: Option<ColorMapping>,
    pub incremental: bool,
    pub report: bool,
    pub cleanup_matplotlib: Option<bool>,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            pattern: None,
            auto_color: true,
            color_map: None,
            incremental: false,
            report: false,
            cleanup_matplotlib: None,
        }
    }
}

/// What a batch run operates on: every `.svg`/`.pdf` directly under a
/// directory, or an explicit file list.
#[derive(Debug, Clone)]
pub enum BatchTarget {
    Directory(PathBuf),
    Files(Vec<PathBuf>),
}

#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub target: BatchTarget,
    pub template: String,
    pub output_dir: Option<PathBuf>,
    pub format: OutputFormat,
    pub options: BatchOptions,
}

/// Result of one batch run.
#[derive(Debug, Serialize)]
pub struct BatchOutcome {
    pub run_id: Uuid,
    pub template: Option<String>,
    pub started_at: DateTime<Utc>,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub records: Vec<TransformationRecord>,
    pub report_path: Option<PathBuf>,
}

pub struct WatchSettings {
    pub interval: Duration,
    /// `None` runs until cancelled.
    pub duration: Option<Duration>,
}

#[derive(Debug, Default, Serialize)]
pub struct WatchSummary {
    pub cycles: usize,
    pub processed: usize,
    pub failed: usize,
}

/// Converts between SVG and the other supported formats through an
/// external renderer.
pub trait FormatConverter {
    /// Render a written SVG as PDF or PNG.
    fn from_svg(&self, svg: &Path, output: &Path, format: OutputFormat) -> Result<()>;
    /// Convert a PDF input into an SVG the engine can parse.
    fn to_svg(&self, input: &Path, svg: &Path) -> Result<()>;
}

/// Shells out to the `inkscape` CLI for both conversion directions.
pub struct InkscapeConverter {
    binary: String,
}

impl InkscapeConverter {
    pub fn new() -> Self {
        Self {
            binary: "inkscape".to_string(),
        }
    }

    fn run(&self, input: &Path, output: &Path, export_type: &str) -> Result<()> {
        let status = Command::new(&self.binary)
            .arg(input)
            .arg("--export-type")
            .arg(export_type)
            .arg("--export-filename")
            .arg(output)
            .status()
            .map_err(|e| Error::ExportFailed(format!("failed to run {}: {e}", self.binary)))?;
        if !status.success() {
            return Err(Error::ExportFailed(format!(
                "{} exited with {status} for {}",
                self.binary,
                input.display()
            )));
        }
        Ok(())
    }
}

impl Default for InkscapeConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatConverter for InkscapeConverter {
    fn from_svg(&self, svg: &Path, output: &Path, format: OutputFormat) -> Result<()> {
        self.run(svg, output, format.extension())
    }

    fn to_svg(&self, input: &Path, svg: &Path) -> Result<()> {
        self.run(input, svg, "svg")
    }
}

/// Time source, injectable so watch loops are testable without real
/// sleeps.
pub trait Clock {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

pub struct BatchEngine {
    registry: TemplateRegistry,
    manifest: Box<dyn ManifestStore>,
    converter: Box<dyn FormatConverter>,
    clock: Box<dyn Clock>,
}

impl BatchEngine {
    pub fn new(registry: TemplateRegistry, manifest: Box<dyn ManifestStore>) -> Self {
        Self::with_parts(
            registry,
            manifest,
            Box::new(InkscapeConverter::new()),
            Box::new(SystemClock),
        )
    }

    pub fn with_parts(
        registry: TemplateRegistry,
        manifest: Box<dyn ManifestStore>,
        converter: Box<dyn FormatConverter>,
        clock: Box<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            manifest,
            converter,
            clock,
        }
    }

    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TemplateRegistry {
        &mut self.registry
    }

    /// Restyle every matching file, writing results into the output
    /// directory. Originals are never modified.
    pub fn run_improve(&mut self, request: &BatchRequest) -> Result<BatchOutcome> {
        let template = self.registry.lookup(&request.template)?.clone();
        let files = resolve_target(&request.target, request.options.pattern.as_deref())?;

        let manifest = if request.options.incremental {
            match self.manifest.load() {
                Ok(entries) => entries,
                Err(Error::ManifestCorrupt(reason)) => {
                    warn!(%reason, "manifest unreadable, reprocessing everything");
                    BTreeMap::new()
                }
                Err(e) => return Err(e),
            }
        } else {
            BTreeMap::new()
        };

        let output_dir = request
            .output_dir
            .clone()
            .unwrap_or_else(|| default_output_dir(&request.target));
        fs::create_dir_all(&output_dir)?;

        let run_id = Uuid::new_v4();
        let started_at = self.clock.now();
        info!(%run_id, template = %template.name, files = files.len(), "batch run started");

        let apply_options = ApplyOptions {
            auto_color: request.options.auto_color,
            color_map: request.options.color_map.clone(),
            cleanup_matplotlib: request.options.cleanup_matplotlib,
            ..Default::default()
        };
        // Without auto colors and without an explicit map there is
        // nothing for the recolor rule to do.
        let apply_options = ApplyOptions {
            colors: apply_options.auto_color || apply_options.color_map.is_some(),
            ..apply_options
        };

        let mut records: Vec<TransformationRecord> = Vec::new();
        let mut snapshots: Vec<FileSnapshot> = Vec::new();

        for path in &files {
            let key = path.to_string_lossy().to_string();
            let name = file_name(path);

            let fingerprint = match fingerprint_file(path) {
                Ok(fp) => fp,
                Err(e) => {
                    warn!(file = %name, error = %e, "cannot fingerprint file");
                    records.push(TransformationRecord::failed(name, &e));
                    continue;
                }
            };
            if request.options.incremental
                && manifest
                    .get(&key)
                    .map(|entry| entry.fingerprint == fingerprint)
                    .unwrap_or(false)
            {
                records.push(TransformationRecord::skipped(name));
                continue;
            }

            let text = match self.read_input(path) {
                Ok(text) => text,
                Err(e) => {
                    warn!(file = %name, error = %e, "cannot read input");
                    records.push(TransformationRecord::failed(name, &e));
                    continue;
                }
            };
            let mut doc = match parse_svg(&text) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(file = %name, error = %e, "cannot parse document");
                    records.push(TransformationRecord::failed(name, &e));
                    continue;
                }
            };

            let mut record = apply(&mut doc, &template, &apply_options);
            record.file = Some(name.clone());
            let output_text = serialize(&doc);

            if let Err(e) = self.write_output(path, &output_dir, request.format, &output_text) {
                warn!(file = %name, error = %e, "cannot write output");
                records.push(TransformationRecord::failed(name, &e));
                continue;
            }

            let entry = ManifestEntry {
                fingerprint,
                last_processed: self.clock.now(),
            };
            if let Err(e) = self.manifest.upsert(&key, &entry) {
                warn!(file = %name, error = %e, "cannot update manifest");
            }

            if request.options.report {
                snapshots.push(FileSnapshot {
                    file: name,
                    before: text,
                    after: Some(output_text),
                });
            }
            records.push(record);
        }

        let mut outcome = summarize(run_id, Some(template.name.clone()), started_at, records);

        if request.options.report {
            let run_id_text = run_id.to_string();
            let context = ReportContext {
                run_id: &run_id_text,
                template: &template,
                generated_at: self.clock.now(),
                snapshots: &snapshots,
            };
            let html = render_report(&outcome.records, &context);
            let report_path = output_dir.join(REPORT_FILE_NAME);
            fs::write(&report_path, html)?;
            outcome.report_path = Some(report_path);
        }

        info!(
            %run_id,
            processed = outcome.processed,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "batch run finished"
        );
        Ok(outcome)
    }

    /// Classify and map every matching file without writing anything.
    pub fn run_analyze(
        &self,
        target: &BatchTarget,
        template: Option<&str>,
        pattern: Option<&str>,
    ) -> Result<BatchOutcome> {
        let template = match template {
            Some(name) => Some(self.registry.lookup(name)?.clone()),
            None => None,
        };
        let files = resolve_target(target, pattern)?;
        let run_id = Uuid::new_v4();
        let started_at = self.clock.now();

        let mut records = Vec::new();
        for path in &files {
            let name = file_name(path);
            let text = match self.read_input(path) {
                Ok(text) => text,
                Err(e) => {
                    records.push(TransformationRecord::failed(name, &e));
                    continue;
                }
            };
            match parse_svg(&text) {
                Ok(doc) => {
                    let mut record = analyze(&doc, template.as_ref());
                    record.file = Some(name);
                    records.push(record);
                }
                Err(e) => records.push(TransformationRecord::failed(name, &e)),
            }
        }

        Ok(summarize(
            run_id,
            template.map(|t| t.name),
            started_at,
            records,
        ))
    }

    /// Poll the directory, rerunning an incremental batch each cycle.
    ///
    /// `cancel` is checked only at iteration boundaries: a cycle in
    /// flight always completes.
    pub fn watch(
        &mut self,
        request: &BatchRequest,
        settings: &WatchSettings,
        cancel: &AtomicBool,
    ) -> Result<WatchSummary> {
        let mut request = request.clone();
        request.options.incremental = true;

        let started = self.clock.now();
        let mut summary = WatchSummary::default();
        info!(watch_target = ?request.target, "watch started");

        loop {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let outcome = self.run_improve(&request)?;
            summary.cycles += 1;
            summary.processed += outcome.processed;
            summary.failed += outcome.failed;

            if cancel.load(Ordering::Relaxed) {
                break;
            }
            if let Some(limit) = settings.duration {
                let elapsed = (self.clock.now() - started)
                    .to_std()
                    .unwrap_or(Duration::ZERO);
                if elapsed >= limit {
                    break;
                }
            }
            self.clock.sleep(settings.interval);
        }

        info!(cycles = summary.cycles, "watch finished");
        Ok(summary)
    }

    /// Input text as SVG. PDF inputs go through the converter first; the
    /// intermediate file lives in the system temp directory and is
    /// removed after reading.
    fn read_input(&self, path: &Path) -> Result<String> {
        if !has_extension(path, "pdf") {
            return Ok(fs::read_to_string(path)?);
        }
        let tmp = std::env::temp_dir().join(format!("figstyle-{}.svg", Uuid::new_v4()));
        self.converter.to_svg(path, &tmp)?;
        let text = fs::read_to_string(&tmp);
        let _ = fs::remove_file(&tmp);
        Ok(text?)
    }

    fn write_output(
        &self,
        input: &Path,
        output_dir: &Path,
        format: OutputFormat,
        svg_text: &str,
    ) -> Result<()> {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "figure".to_string());
        let svg_path = output_dir.join(format!("{stem}.svg"));
        fs::write(&svg_path, svg_text)?;

        if format != OutputFormat::Svg {
            let target = output_dir.join(format!("{stem}.{}", format.extension()));
            self.converter.from_svg(&svg_path, &target, format)?;
        }
        Ok(())
    }
}

fn summarize(
    run_id: Uuid,
    template: Option<String>,
    started_at: DateTime<Utc>,
    records: Vec<TransformationRecord>,
) -> BatchOutcome {
    use crate::transform::Outcome;
    let processed = records
        .iter()
        .filter(|r| matches!(r.outcome, Outcome::Success))
        .count();
    let skipped = records
        .iter()
        .filter(|r| matches!(r.outcome, Outcome::SkippedUnchanged))
        .count();
    let failed = records.iter().filter(|r| r.is_failed()).count();
    BatchOutcome {
        run_id,
        template,
        started_at,
        processed,
        skipped,
        failed,
        records,
        report_path: None,
    }
}

/// Sorted input set for a target. An explicit file list must be
/// non-empty and hold only processable formats; both are request-level
/// failures.
fn resolve_target(target: &BatchTarget, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    match target {
        BatchTarget::Directory(dir) => enumerate_inputs(dir, pattern),
        BatchTarget::Files(files) => {
            if files.is_empty() {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "empty input file list",
                )));
            }
            for file in files {
                if !is_processable(file) {
                    return Err(Error::UnsupportedFormat(file.to_string_lossy().to_string()));
                }
            }
            let mut files = files.clone();
            files.sort();
            Ok(files)
        }
    }
}

/// SVG natively; PDF through the converter.
fn is_processable(path: &Path) -> bool {
    has_extension(path, "svg") || has_extension(path, "pdf")
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .map(|e| e.eq_ignore_ascii_case(ext))
        .unwrap_or(false)
}

fn default_output_dir(target: &BatchTarget) -> PathBuf {
    match target {
        BatchTarget::Directory(dir) => dir.join(DEFAULT_OUTPUT_DIR),
        BatchTarget::Files(files) => files
            .first()
            .and_then(|f| f.parent())
            .map(|p| p.join(DEFAULT_OUTPUT_DIR))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
    }
}

/// Matching processable files directly under `directory`, sorted by
/// name so runs are deterministic. Subdirectories are not descended
/// into; notably the output directory often lives under the input
/// directory.
fn enumerate_inputs(directory: &Path, pattern: Option<&str>) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_file() || !is_processable(&path) {
            continue;
        }
        if let Some(pattern) = pattern {
            let name = file_name(&path);
            if !glob_match(pattern, &name) {
                continue;
            }
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

/// Shell-style match: `*` any run, `?` one character, everything else
/// literal.
fn glob_match(pattern: &str, name: &str) -> bool {
    fn inner(p: &[char], n: &[char]) -> bool {
        match (p.first(), n.first()) {
            (None, None) => true,
            (Some('*'), _) => {
                inner(&p[1..], n) || (!n.is_empty() && inner(p, &n[1..]))
            }
            (Some('?'), Some(_)) => inner(&p[1..], &n[1..]),
            (Some(pc), Some(nc)) if pc == nc => inner(&p[1..], &n[1..]),
            _ => false,
        }
    }
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    inner(&p, &n)
}
