//! The restyling engine.
//!
//! [`apply`] rewrites a parsed document in place to conform to a
//! template; [`analyze`] computes the same classification and mapping
//! without mutating anything. Rules run in a fixed order so the same
//! input always produces the same output: toolchain cleanup, structure
//! (spines, grids, background), data colors, typography.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::Serialize;

use crate::classify::{Classifier, ElementClass, GridOrientation};
use crate::color::{auto_map_colors, nearest_palette_match, Color, ColorMapping};
use crate::document::{Document, Element, Node};
use crate::error::Error;
use crate::matplotlib::{self, MatplotlibDetection};
use crate::template::{AxisStyle, SpineSide, Template, TextRole};

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Spine removal/restyling, grid restyling, background policy.
    pub structural: bool,
    /// Data-mark recoloring.
    pub colors: bool,
    /// Per-role font substitution.
    pub fonts: bool,
    /// Explicit source-to-target overrides, consulted before the
    /// automatic nearest-palette match.
    pub color_map: Option<ColorMapping>,
    /// Fall back to the nearest palette entry for colors not covered by
    /// the explicit map.
    pub auto_color: bool,
    /// `None` defers to detection; `Some` forces the toolchain cleanup
    /// ruleset on or off.
    pub cleanup_matplotlib: Option<bool>,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            structural: true,
            colors: true,
            fonts: true,
            color_map: None,
            auto_color: true,
            cleanup_matplotlib: None,
        }
    }
}

/// One structural edit made by [`apply`], for the record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "change", rename_all = "snake_case")]
pub enum StructuralChange {
    MatplotlibCleanup { modifications: usize },
    SpineRemoved { side: SpineSide, elements: usize },
    SpineRestyled { side: SpineSide, elements: usize },
    GridRemoved { orientation: GridOrientation, elements: usize },
    GridRestyled { orientation: GridOrientation, elements: usize },
    BackgroundRestyled { elements: usize },
    FontSubstituted { role: TextRole, elements: usize },
}

/// An element whose inline style could not be parsed. The element is
/// left untouched and the run continues.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ElementStyleIssue {
    pub element: String,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum Outcome {
    Success,
    SkippedUnchanged,
    Failed { kind: String, reason: String },
}

/// Everything one document's run produced: outcome, detection verdict,
/// class counts before and after, the color mapping actually applied,
/// the structural changes, and any per-element style issues.
#[derive(Debug, Clone, Serialize)]
pub struct TransformationRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    pub outcome: Outcome,
    pub matplotlib: MatplotlibDetection,
    pub counts_before: BTreeMap<String, usize>,
    pub counts_after: BTreeMap<String, usize>,
    pub color_mapping: ColorMapping,
    pub changes: Vec<StructuralChange>,
    pub issues: Vec<ElementStyleIssue>,
    pub modifications: usize,
}

impl TransformationRecord {
    /// Record for a document that could not be processed at all.
    pub fn failed(file: impl Into<String>, err: &Error) -> Self {
        Self {
            file: Some(file.into()),
            outcome: Outcome::Failed {
                kind: err.kind().to_string(),
                reason: err.to_string(),
            },
            matplotlib: MatplotlibDetection {
                is_matplotlib_like: false,
                confidence: 0.0,
                signals: Vec::new(),
            },
            counts_before: BTreeMap::new(),
            counts_after: BTreeMap::new(),
            color_mapping: ColorMapping::new(),
            changes: Vec::new(),
            issues: Vec::new(),
            modifications: 0,
        }
    }

    /// Record for a file skipped by the incremental check, without
    /// ever being parsed.
    pub fn skipped(file: impl Into<String>) -> Self {
        Self {
            file: Some(file.into()),
            outcome: Outcome::SkippedUnchanged,
            matplotlib: MatplotlibDetection {
                is_matplotlib_like: false,
                confidence: 0.0,
                signals: Vec::new(),
            },
            counts_before: BTreeMap::new(),
            counts_after: BTreeMap::new(),
            color_mapping: ColorMapping::new(),
            changes: Vec::new(),
            issues: Vec::new(),
            modifications: 0,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }
}

/// Per-category element counts under the current classification.
pub fn class_counts(doc: &Document) -> BTreeMap<String, usize> {
    let classifier = Classifier::new(doc);
    let mut counts = BTreeMap::new();
    doc.root.walk(&mut |elem| {
        if elem.local_tag() == "svg" {
            return;
        }
        *counts
            .entry(classifier.classify(elem).label().to_string())
            .or_insert(0) += 1;
    });
    counts
}

/// Rewrite `doc` in place to conform to `template`.
///
/// Deterministic and idempotent: running twice with the same template
/// and options leaves the document identical to one run, and the second
/// record reports `SkippedUnchanged`.
pub fn apply(doc: &mut Document, template: &Template, options: &ApplyOptions) -> TransformationRecord {
    let detection = matplotlib::detect(doc);
    let run_cleanup = options.cleanup_matplotlib.unwrap_or(detection.is_matplotlib_like);

    let counts_before = class_counts(doc);
    let mut changes: Vec<StructuralChange> = Vec::new();
    let mut issues: Vec<ElementStyleIssue> = Vec::new();
    let mut mapping = ColorMapping::new();
    let mut modifications = 0usize;

    if run_cleanup {
        let n = matplotlib::cleanup(doc);
        if n > 0 {
            modifications += n;
            changes.push(StructuralChange::MatplotlibCleanup { modifications: n });
        }
    }

    if options.structural {
        modifications += restyle_structure(doc, template, &mut changes, &mut issues);
    }
    if options.colors {
        modifications += recolor_data_marks(doc, template, options, &mut mapping, &mut issues);
    }
    if options.fonts {
        modifications += substitute_fonts(doc, template, &mut changes, &mut issues);
    }

    let counts_after = class_counts(doc);
    TransformationRecord {
        file: None,
        outcome: if modifications == 0 {
            Outcome::SkippedUnchanged
        } else {
            Outcome::Success
        },
        matplotlib: detection,
        counts_before,
        counts_after,
        color_mapping: mapping,
        changes,
        issues,
        modifications,
    }
}

/// Classification and mapping for a document without touching it. With
/// a template, reports the automatic mapping [`apply`] would use: only
/// colors sitting on data-mark elements participate, so the two paths
/// report the same pairs.
pub fn analyze(doc: &Document, template: Option<&Template>) -> TransformationRecord {
    let detection = matplotlib::detect(doc);
    let counts = class_counts(doc);
    let mapping = match template {
        Some(t) => auto_map_colors(&data_mark_colors(doc), &t.palette),
        None => ColorMapping::new(),
    };

    let mut issues: Vec<ElementStyleIssue> = Vec::new();
    doc.root.walk(&mut |elem| {
        if let Err(detail) = elem.style_decls() {
            push_issue(&mut issues, elem, detail);
        }
    });

    TransformationRecord {
        file: None,
        outcome: Outcome::Success,
        matplotlib: detection,
        counts_before: counts.clone(),
        counts_after: counts,
        color_mapping: mapping,
        changes: Vec::new(),
        issues,
        modifications: 0,
    }
}

/// Non-neutral fill/stroke colors on data-mark-classified elements,
/// with occurrence counts, most frequent first (count ties by hex).
fn data_mark_colors(doc: &Document) -> Vec<(Color, usize)> {
    let classifier = Classifier::new(doc);
    let mut counts: IndexMap<Color, usize> = IndexMap::new();
    doc.root.walk(&mut |elem| {
        if classifier.classify(elem) != ElementClass::DataMark {
            return;
        }
        for prop in ["fill", "stroke"] {
            if let Some(color) = elem.style_prop(prop).and_then(|v| Color::parse(&v)) {
                if !color.is_neutral() {
                    *counts.entry(color).or_insert(0) += 1;
                }
            }
        }
    });
    let mut out: Vec<(Color, usize)> = counts.into_iter().collect();
    out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.hex().cmp(&b.0.hex())));
    out
}

// --- Rule implementations ---

fn restyle_structure(
    doc: &mut Document,
    template: &Template,
    changes: &mut Vec<StructuralChange>,
    issues: &mut Vec<ElementStyleIssue>,
) -> usize {
    let classifier = Classifier::new(doc);
    let mut modified = 0usize;

    // Removal first, so restyling never touches elements about to go.
    let mut removed_spines: IndexMap<SpineSide, usize> = IndexMap::new();
    let mut removed_grids: IndexMap<GridOrientation, usize> = IndexMap::new();
    prune_chrome(
        &mut doc.root,
        &classifier,
        template,
        &mut removed_spines,
        &mut removed_grids,
    );
    for (side, elements) in removed_spines {
        modified += elements;
        changes.push(StructuralChange::SpineRemoved { side, elements });
    }
    for (orientation, elements) in removed_grids {
        modified += elements;
        changes.push(StructuralChange::GridRemoved {
            orientation,
            elements,
        });
    }

    let mut restyled_spines: IndexMap<SpineSide, usize> = IndexMap::new();
    let mut restyled_grids: IndexMap<GridOrientation, usize> = IndexMap::new();
    let mut backgrounds = 0usize;

    doc.root.walk_mut(&mut |elem| match classifier.classify(elem) {
        ElementClass::Spine(side) => {
            if !style_ok(elem, issues) {
                return;
            }
            let mut touched = elem.set_style_prop("stroke", &template.axis.stroke.hex());
            touched |= elem.set_style_prop("stroke-width", &fmt_number(template.axis.width));
            if touched {
                *restyled_spines.entry(side).or_insert(0) += 1;
            }
        }
        ElementClass::Grid(orientation) => {
            if !style_ok(elem, issues) {
                return;
            }
            let mut touched = elem.set_style_prop("stroke", &template.grid.stroke.hex());
            touched |= elem.set_style_prop("stroke-width", &fmt_number(template.grid.width));
            if let Some(dash) = &template.grid.dash {
                touched |= elem.set_style_prop("stroke-dasharray", dash);
            }
            if touched {
                *restyled_grids.entry(orientation).or_insert(0) += 1;
            }
        }
        ElementClass::Background => {
            if !style_ok(elem, issues) {
                return;
            }
            let touched = match template.background {
                Some(color) => elem.set_style_prop("fill", &color.hex()),
                None => {
                    let a = elem.set_style_prop("fill", "none");
                    let b = elem.set_style_prop("stroke", "none");
                    a || b
                }
            };
            if touched {
                backgrounds += 1;
            }
        }
        _ => {}
    });

    for (side, elements) in restyled_spines {
        modified += elements;
        changes.push(StructuralChange::SpineRestyled { side, elements });
    }
    for (orientation, elements) in restyled_grids {
        modified += elements;
        changes.push(StructuralChange::GridRestyled {
            orientation,
            elements,
        });
    }
    if backgrounds > 0 {
        modified += backgrounds;
        changes.push(StructuralChange::BackgroundRestyled {
            elements: backgrounds,
        });
    }
    modified
}

/// Drop spines the template does not keep and grid lines in
/// orientations the template does not draw.
fn prune_chrome(
    elem: &mut Element,
    classifier: &Classifier,
    template: &Template,
    removed_spines: &mut IndexMap<SpineSide, usize>,
    removed_grids: &mut IndexMap<GridOrientation, usize>,
) {
    let axis: &AxisStyle = &template.axis;
    elem.children.retain(|node| {
        let Node::Element(e) = node else { return true };
        match classifier.classify(e) {
            ElementClass::Spine(side) if !axis.keeps(side) => {
                *removed_spines.entry(side).or_insert(0) += 1;
                false
            }
            ElementClass::Grid(orientation) if !template.grid.applies_to(orientation) => {
                *removed_grids.entry(orientation).or_insert(0) += 1;
                false
            }
            _ => true,
        }
    });
    for child in &mut elem.children {
        if let Node::Element(e) = child {
            prune_chrome(e, classifier, template, removed_spines, removed_grids);
        }
    }
}

fn recolor_data_marks(
    doc: &mut Document,
    template: &Template,
    options: &ApplyOptions,
    mapping: &mut ColorMapping,
    issues: &mut Vec<ElementStyleIssue>,
) -> usize {
    let classifier = Classifier::new(doc);
    let mut modified = 0usize;

    doc.root.walk_mut(&mut |elem| {
        if classifier.classify(elem) != ElementClass::DataMark {
            return;
        }
        if !style_ok(elem, issues) {
            return;
        }
        for prop in ["fill", "stroke"] {
            let Some(color) = elem.style_prop(prop).and_then(|v| Color::parse(&v)) else {
                continue;
            };
            if color.is_neutral() {
                continue;
            }
            let target = match options.color_map.as_ref().and_then(|m| m.get(&color)) {
                Some(t) => *t,
                None if options.auto_color => {
                    let (_, nearest, _) = nearest_palette_match(&color, &template.palette);
                    *nearest
                }
                None => continue,
            };
            if target == color {
                continue;
            }
            if elem.set_style_prop(prop, &target.hex()) {
                mapping.insert(color, target);
                modified += 1;
            }
        }
    });
    modified
}

fn substitute_fonts(
    doc: &mut Document,
    template: &Template,
    changes: &mut Vec<StructuralChange>,
    issues: &mut Vec<ElementStyleIssue>,
) -> usize {
    let classifier = Classifier::new(doc);
    let mut per_role: IndexMap<TextRole, usize> = IndexMap::new();
    let mut modified = 0usize;

    doc.root.walk_mut(&mut |elem| {
        let ElementClass::Text(role) = classifier.classify(elem) else {
            return;
        };
        if !style_ok(elem, issues) {
            return;
        }
        let spec = template.fonts.for_role(role);
        let mut touched = elem.set_style_prop("font-family", &spec.family);
        // Elements without their own size inherit it; forcing one
        // there would break the document's size ranking.
        if elem.style_prop("font-size").is_some() {
            touched |= elem.set_style_prop("font-size", &format!("{}px", fmt_number(spec.size)));
            touched |= elem.set_style_prop("font-weight", &spec.weight);
            touched |= elem.set_style_prop("fill", &spec.color.hex());
        }
        if touched {
            *per_role.entry(role).or_insert(0) += 1;
        }
    });

    for (role, elements) in per_role {
        modified += elements;
        changes.push(StructuralChange::FontSubstituted { role, elements });
    }
    modified
}

fn style_ok(elem: &Element, issues: &mut Vec<ElementStyleIssue>) -> bool {
    match elem.style_decls() {
        Ok(_) => true,
        Err(detail) => {
            push_issue(issues, elem, detail);
            false
        }
    }
}

fn push_issue(issues: &mut Vec<ElementStyleIssue>, elem: &Element, detail: String) {
    let element = elem.label();
    if !issues.iter().any(|i| i.element == element) {
        issues.push(ElementStyleIssue { element, detail });
    }
}

/// `1.0` renders as `1`, `0.75` as `0.75`; style values stay minimal so
/// re-runs compare equal.
fn fmt_number(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{parse_svg, serialize};
    use crate::template::test_template;

    const CHART: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="800" height="600" viewBox="0 0 800 600">
  <rect id="canvas-bg" x="0" y="0" width="800" height="600" style="fill:#ffffff"/>
  <path id="spine-top" d="M 80 40 L 720 40" style="fill:none;stroke:#333333;stroke-width:2"/>
  <path id="spine-right" d="M 720 40 L 720 520" style="fill:none;stroke:#333333;stroke-width:2"/>
  <path id="spine-bottom" d="M 80 520 L 720 520" style="fill:none;stroke:#333333;stroke-width:2"/>
  <path id="spine-left" d="M 80 40 L 80 520" style="fill:none;stroke:#333333;stroke-width:2"/>
  <path id="grid-h" d="M 80 280 L 720 280" style="fill:none;stroke:#cccccc;stroke-width:1"/>
  <rect id="bar1" x="150" y="200" width="60" height="320" style="fill:#4682b4"/>
  <rect id="bar2" x="300" y="260" width="60" height="260" style="fill:#d95f02"/>
  <text id="title" x="400" y="28" style="font-size:18px;font-family:Times;font-weight:normal;fill:#222222">Revenue</text>
  <text id="tick1" x="180" y="540" style="font-size:9px;font-family:Times;fill:#222222">Q1</text>
</svg>"##;

    fn ids(doc: &Document) -> Vec<String> {
        let mut out = Vec::new();
        doc.root.walk(&mut |e| {
            if let Some(id) = e.id() {
                out.push(id.to_string());
            }
        });
        out
    }

    #[test]
    fn removes_spines_not_kept() {
        let mut doc = parse_svg(CHART).unwrap();
        let record = apply(&mut doc, &test_template("t"), &ApplyOptions::default());

        let remaining = ids(&doc);
        assert!(!remaining.contains(&"spine-top".to_string()));
        assert!(!remaining.contains(&"spine-right".to_string()));
        assert!(remaining.contains(&"spine-bottom".to_string()));
        assert!(remaining.contains(&"spine-left".to_string()));
        assert_eq!(record.outcome, Outcome::Success);
        assert!(record
            .changes
            .iter()
            .any(|c| matches!(c, StructuralChange::SpineRemoved { side: SpineSide::Top, .. })));
    }

    #[test]
    fn restyles_kept_spines_and_grid() {
        let mut doc = parse_svg(CHART).unwrap();
        let template = test_template("t");
        apply(&mut doc, &template, &ApplyOptions::default());

        doc.root.walk(&mut |e| match e.id() {
            Some("spine-bottom") | Some("spine-left") => {
                assert_eq!(e.style_prop("stroke").as_deref(), Some("#000000"));
                assert_eq!(e.style_prop("stroke-width").as_deref(), Some("1"));
            }
            Some("grid-h") => {
                assert_eq!(e.style_prop("stroke").as_deref(), Some("#dddddd"));
                assert_eq!(e.style_prop("stroke-dasharray").as_deref(), Some("2,2"));
            }
            _ => {}
        });
    }

    #[test]
    fn recolors_data_marks_to_nearest_palette() {
        let mut doc = parse_svg(CHART).unwrap();
        let record = apply(&mut doc, &test_template("t"), &ApplyOptions::default());

        doc.root.walk(&mut |e| match e.id() {
            Some("bar1") => assert_eq!(e.style_prop("fill").as_deref(), Some("#2171b5")),
            Some("bar2") => assert_eq!(e.style_prop("fill").as_deref(), Some("#e6550d")),
            _ => {}
        });
        assert_eq!(record.color_mapping.len(), 2);
    }

    #[test]
    fn explicit_map_beats_automatic() {
        let mut doc = parse_svg(CHART).unwrap();
        let mut map = ColorMapping::new();
        map.insert(
            Color::parse("#4682b4").unwrap(),
            Color::parse("#e6550d").unwrap(),
        );
        let options = ApplyOptions {
            color_map: Some(map),
            ..Default::default()
        };
        apply(&mut doc, &test_template("t"), &options);

        doc.root.walk(&mut |e| {
            if e.id() == Some("bar1") {
                assert_eq!(e.style_prop("fill").as_deref(), Some("#e6550d"));
            }
        });
    }

    #[test]
    fn substitutes_fonts_by_role() {
        let mut doc = parse_svg(CHART).unwrap();
        apply(&mut doc, &test_template("t"), &ApplyOptions::default());

        doc.root.walk(&mut |e| match e.id() {
            Some("title") => {
                assert_eq!(
                    e.style_prop("font-family").as_deref(),
                    Some("Helvetica,Arial,sans-serif")
                );
                assert_eq!(e.style_prop("font-size").as_deref(), Some("12px"));
                assert_eq!(e.style_prop("font-weight").as_deref(), Some("bold"));
            }
            Some("tick1") => {
                assert_eq!(e.style_prop("font-size").as_deref(), Some("8px"));
                assert_eq!(e.style_prop("fill").as_deref(), Some("#333333"));
            }
            _ => {}
        });
    }

    #[test]
    fn background_goes_transparent_without_policy() {
        let mut doc = parse_svg(CHART).unwrap();
        apply(&mut doc, &test_template("t"), &ApplyOptions::default());

        doc.root.walk(&mut |e| {
            if e.id() == Some("canvas-bg") {
                assert_eq!(e.style_prop("fill").as_deref(), Some("none"));
            }
        });
    }

    #[test]
    fn second_run_is_byte_identical_and_skipped() {
        let template = test_template("t");
        let mut doc = parse_svg(CHART).unwrap();
        let first = apply(&mut doc, &template, &ApplyOptions::default());
        assert_eq!(first.outcome, Outcome::Success);
        let after_first = serialize(&doc);

        let mut doc2 = parse_svg(&after_first).unwrap();
        let second = apply(&mut doc2, &template, &ApplyOptions::default());
        assert_eq!(second.outcome, Outcome::SkippedUnchanged);
        assert_eq!(second.modifications, 0);
        assert_eq!(serialize(&doc2), after_first);
    }

    #[test]
    fn disabled_rules_do_not_run() {
        let mut doc = parse_svg(CHART).unwrap();
        let options = ApplyOptions {
            structural: false,
            colors: false,
            fonts: false,
            ..Default::default()
        };
        let record = apply(&mut doc, &test_template("t"), &options);
        assert_eq!(record.outcome, Outcome::SkippedUnchanged);
        assert!(ids(&doc).contains(&"spine-top".to_string()));
    }

    #[test]
    fn malformed_style_is_reported_not_fatal() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" width="400" height="300">
  <path id="spine-bottom" d="M 40 260 L 360 260" style="fill:none;stroke:#000000"/>
  <path id="spine-left" d="M 40 20 L 40 260" style="fill:none;stroke:#000000"/>
  <rect id="good" x="80" y="100" width="40" height="160" style="fill:#4682b4"/>
  <rect id="broken" x="160" y="140" width="40" height="120" style="fill:#d95f02;;broken-no-colon" fill="#d95f02"/>
</svg>"##;
        let mut doc = parse_svg(svg).unwrap();
        let record = apply(&mut doc, &test_template("t"), &ApplyOptions::default());

        assert_eq!(record.outcome, Outcome::Success);
        assert!(record.issues.iter().any(|i| i.element.contains("broken")));
        doc.root.walk(&mut |e| {
            if e.id() == Some("broken") {
                assert!(e.attr("style").unwrap().contains("#d95f02"));
            }
        });
    }

    #[test]
    fn analyze_never_mutates() {
        let doc = parse_svg(CHART).unwrap();
        let before = serialize(&doc);
        let record = analyze(&doc, Some(&test_template("t")));
        assert_eq!(serialize(&doc), before);
        assert_eq!(record.modifications, 0);
        assert_eq!(record.counts_before, record.counts_after);
        assert_eq!(record.color_mapping.len(), 2);
    }

    #[test]
    fn analyze_ignores_colors_outside_data_marks() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" width="400" height="300">
  <path id="spine-bottom" d="M 40 260 L 360 260" style="fill:none;stroke:#000000"/>
  <path id="spine-left" d="M 40 20 L 40 260" style="fill:none;stroke:#000000"/>
  <text id="note" x="200" y="150" style="font-size:10px;fill:#b22222">annotated</text>
</svg>"##;
        let template = test_template("t");
        let doc = parse_svg(svg).unwrap();
        let analysis = analyze(&doc, Some(&template));
        assert!(analysis.color_mapping.is_empty());

        let mut doc = parse_svg(svg).unwrap();
        let applied = apply(&mut doc, &template, &ApplyOptions::default());
        assert!(applied.color_mapping.is_empty());
    }

    #[test]
    fn class_counts_by_category() {
        let doc = parse_svg(CHART).unwrap();
        let counts = class_counts(&doc);
        assert_eq!(counts.get("spine"), Some(&4));
        assert_eq!(counts.get("data-mark"), Some(&2));
        assert_eq!(counts.get("background"), Some(&1));
        assert_eq!(counts.get("text"), Some(&2));
    }
}
