//! Self-contained HTML run reports.
//!
//! One file, no external assets: styles are inlined and the per-file
//! before/after previews are embedded as base64 SVG data URIs, so the
//! report can be mailed or archived as-is. Rendering is pure; the
//! orchestrator decides where the file goes.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};

use crate::template::Template;
use crate::transform::{Outcome, TransformationRecord};

const REPORT_CSS: &str = "\
body { font-family: -apple-system, 'Segoe UI', Helvetica, Arial, sans-serif; margin: 2em auto; max-width: 960px; color: #222; }
h1 { font-size: 1.4em; } h2 { font-size: 1.1em; margin-top: 2em; }
.meta { color: #666; font-size: 0.85em; }
.summary { display: flex; gap: 2em; margin: 1em 0; }
.summary .stat { font-size: 1.6em; font-weight: bold; }
.summary .stat span { display: block; font-size: 0.5em; font-weight: normal; color: #666; }
.swatch { display: inline-block; width: 1.2em; height: 1.2em; border: 1px solid #ccc; border-radius: 3px; vertical-align: middle; margin-right: 0.3em; }
.card { border: 1px solid #ddd; border-radius: 6px; padding: 1em; margin: 1em 0; }
.card h3 { margin-top: 0; font-size: 1em; }
.badge { padding: 0.15em 0.5em; border-radius: 3px; font-size: 0.8em; color: #fff; }
.badge.success { background: #2e7d32; }
.badge.skipped { background: #757575; }
.badge.failed { background: #c62828; }
.previews { display: flex; gap: 1em; margin-top: 0.8em; }
.previews figure { margin: 0; flex: 1; }
.previews img { width: 100%; border: 1px solid #eee; background: #fafafa; }
.previews figcaption { font-size: 0.8em; color: #666; text-align: center; }
table.mapping { border-collapse: collapse; font-size: 0.85em; margin-top: 0.5em; }
table.mapping td { padding: 0.2em 0.6em; border-bottom: 1px solid #eee; }
ul.issues { font-size: 0.85em; color: #b26a00; }
";

/// Before/after document text for one file, captured by the
/// orchestrator when a report was requested.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub file: String,
    pub before: String,
    pub after: Option<String>,
}

pub struct ReportContext<'a> {
    pub run_id: &'a str,
    pub template: &'a Template,
    pub generated_at: DateTime<Utc>,
    pub snapshots: &'a [FileSnapshot],
}

pub fn render_report(records: &[TransformationRecord], ctx: &ReportContext) -> String {
    let mut out = String::with_capacity(16 * 1024);
    out.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str("<title>Figure styling report</title>\n<style>\n");
    out.push_str(REPORT_CSS);
    out.push_str("</style>\n</head>\n<body>\n");

    out.push_str("<h1>Figure styling report</h1>\n");
    out.push_str(&format!(
        "<p class=\"meta\">Run {} &middot; template <strong>{}</strong> &middot; {}</p>\n",
        escape(ctx.run_id),
        escape(&ctx.template.name),
        ctx.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
    ));

    let processed = records
        .iter()
        .filter(|r| matches!(r.outcome, Outcome::Success))
        .count();
    let skipped = records
        .iter()
        .filter(|r| matches!(r.outcome, Outcome::SkippedUnchanged))
        .count();
    let failed = records.iter().filter(|r| r.is_failed()).count();
    out.push_str("<div class=\"summary\">\n");
    for (value, label) in [
        (records.len(), "files"),
        (processed, "restyled"),
        (skipped, "skipped"),
        (failed, "failed"),
    ] {
        out.push_str(&format!(
            "<div class=\"stat\">{value}<span>{label}</span></div>\n"
        ));
    }
    out.push_str("</div>\n");

    out.push_str("<h2>Template palette</h2>\n<p>");
    for color in ctx.template.palette.colors() {
        let hex = color.hex();
        out.push_str(&format!(
            "<span class=\"swatch\" style=\"background:{hex}\"></span>{hex} "
        ));
    }
    out.push_str("</p>\n");

    for record in records {
        render_file_card(&mut out, record, ctx);
    }

    out.push_str("</body>\n</html>\n");
    out
}

fn render_file_card(out: &mut String, record: &TransformationRecord, ctx: &ReportContext) {
    let file = record.file.as_deref().unwrap_or("(unnamed)");
    let (badge, badge_text) = match &record.outcome {
        Outcome::Success => ("success", "restyled".to_string()),
        Outcome::SkippedUnchanged => ("skipped", "skipped".to_string()),
        Outcome::Failed { kind, .. } => ("failed", kind.clone()),
    };

    out.push_str("<div class=\"card\">\n");
    out.push_str(&format!(
        "<h3>{} <span class=\"badge {badge}\">{}</span></h3>\n",
        escape(file),
        escape(&badge_text),
    ));

    if let Outcome::Failed { reason, .. } = &record.outcome {
        out.push_str(&format!("<p class=\"meta\">{}</p>\n", escape(reason)));
        out.push_str("</div>\n");
        return;
    }

    out.push_str(&format!(
        "<p class=\"meta\">{} modification(s)</p>\n",
        record.modifications
    ));

    if !record.color_mapping.is_empty() {
        out.push_str("<table class=\"mapping\">\n");
        for (from, to) in record.color_mapping.iter() {
            let (from, to) = (from.hex(), to.hex());
            out.push_str(&format!(
                "<tr><td><span class=\"swatch\" style=\"background:{from}\"></span>{from}</td>\
                 <td>&rarr;</td>\
                 <td><span class=\"swatch\" style=\"background:{to}\"></span>{to}</td></tr>\n"
            ));
        }
        out.push_str("</table>\n");
    }

    if !record.issues.is_empty() {
        out.push_str("<ul class=\"issues\">\n");
        for issue in &record.issues {
            out.push_str(&format!(
                "<li>{}: {}</li>\n",
                escape(&issue.element),
                escape(&issue.detail)
            ));
        }
        out.push_str("</ul>\n");
    }

    if let Some(snapshot) = ctx
        .snapshots
        .iter()
        .find(|s| Some(s.file.as_str()) == record.file.as_deref())
    {
        out.push_str("<div class=\"previews\">\n");
        out.push_str(&format!(
            "<figure><img src=\"{}\" alt=\"before\"><figcaption>before</figcaption></figure>\n",
            data_uri(&snapshot.before)
        ));
        if let Some(after) = &snapshot.after {
            out.push_str(&format!(
                "<figure><img src=\"{}\" alt=\"after\"><figcaption>after</figcaption></figure>\n",
                data_uri(after)
            ));
        }
        out.push_str("</div>\n");
    }

    out.push_str("</div>\n");
}

fn data_uri(svg: &str) -> String {
    format!("data:image/svg+xml;base64,{}", STANDARD.encode(svg))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}
