//! Detection of matplotlib-generated documents.
//!
//! Charting-toolchain output is structurally uniform, so a positive
//! detection unlocks a deeper cleanup ruleset: generated CSS blocks are
//! stripped, the toolchain's default font is treated as noise rather
//! than intent, and backgrounds lose their opaque fill.

use serde::Serialize;

use crate::document::{Document, Element, Node};

/// Confidence at or above which a document is treated as matplotlib
/// output.
const DETECT_THRESHOLD: f64 = 0.5;

/// The toolchain's default font family.
const DEFAULT_FONT_MARKER: &str = "DejaVu";

#[derive(Debug, Clone, Serialize)]
pub struct MatplotlibDetection {
    pub is_matplotlib_like: bool,
    pub confidence: f64,
    pub signals: Vec<&'static str>,
}

/// Decision rule over structural signals. Generator metadata is
/// decisive on its own; the id-nesting, default-font, and clip-wrapper
/// signals accumulate.
pub fn detect(doc: &Document) -> MatplotlibDetection {
    let mut signals: Vec<&'static str> = Vec::new();
    let mut confidence: f64 = 0.0;

    if mentions_generator(&doc.root) {
        signals.push("generator-metadata");
        confidence += 1.0;
    }

    let (has_figure_id, has_axes_id, clip_refs, dejavu) = scan_structure(&doc.root);
    if has_figure_id && has_axes_id {
        signals.push("figure-axes-ids");
        confidence += 0.6;
    }
    if dejavu {
        signals.push("dejavu-font");
        confidence += 0.3;
    }
    if clip_refs >= 2 {
        signals.push("clip-path-wrappers");
        confidence += 0.3;
    }

    let confidence = confidence.min(1.0);
    MatplotlibDetection {
        is_matplotlib_like: confidence >= DETECT_THRESHOLD,
        confidence,
        signals,
    }
}

fn mentions_generator(root: &Element) -> bool {
    fn scan(elem: &Element) -> bool {
        for child in &elem.children {
            match child {
                Node::Comment(text) if text.to_lowercase().contains("matplotlib") => {
                    return true;
                }
                Node::Text(text)
                    if elem.local_tag() == "metadata"
                        && text.to_lowercase().contains("matplotlib") =>
                {
                    return true;
                }
                Node::Element(e) => {
                    if e.local_tag() == "metadata"
                        && e.text_content().to_lowercase().contains("matplotlib")
                    {
                        return true;
                    }
                    if scan(e) {
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }
    scan(root)
}

fn scan_structure(root: &Element) -> (bool, bool, usize, bool) {
    let mut has_figure = false;
    let mut has_axes = false;
    let mut clip_refs = 0usize;
    let mut dejavu = false;

    root.walk(&mut |elem| {
        if let Some(id) = elem.id() {
            if id.starts_with("figure_") {
                has_figure = true;
            }
            if id.starts_with("axes_") {
                has_axes = true;
            }
        }
        if elem.attr("clip-path").is_some() || elem.local_tag() == "clipPath" {
            clip_refs += 1;
        }
        if elem
            .attr("style")
            .map(|s| s.contains(DEFAULT_FONT_MARKER))
            .unwrap_or(false)
        {
            dejavu = true;
        }
        if elem.local_tag() == "style" && elem.text_content().contains(DEFAULT_FONT_MARKER) {
            dejavu = true;
        }
    });

    (has_figure, has_axes, clip_refs, dejavu)
}

/// Deeper cleanup for matplotlib output: strip generated `<style>` CSS
/// blocks and generator `<metadata>`, and normalize the toolchain
/// default font out of style attributes. Per-element font deviations in
/// toolchain output are noise, not intent. Returns the number of
/// modifications.
pub fn cleanup(doc: &mut Document) -> usize {
    let mut modifications = 0usize;

    fn strip_generated(elem: &mut Element, modifications: &mut usize) {
        let before = elem.children.len();
        elem.children.retain(|node| {
            let Node::Element(e) = node else { return true };
            if e.local_tag() == "style" {
                return false;
            }
            if e.local_tag() == "metadata"
                && e.text_content().to_lowercase().contains("matplotlib")
            {
                return false;
            }
            true
        });
        *modifications += before - elem.children.len();
        for child in &mut elem.children {
            if let Node::Element(e) = child {
                strip_generated(e, modifications);
            }
        }
    }
    strip_generated(&mut doc.root, &mut modifications);

    doc.root.walk_mut(&mut |elem| {
        let Some(family) = elem.style_prop("font-family") else {
            return;
        };
        if family.contains(DEFAULT_FONT_MARKER) && elem.set_style_prop("font-family", "sans-serif")
        {
            modifications += 1;
        }
    });

    modifications
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_svg;

    const MPL_BY_METADATA: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg"
     xmlns:dc="http://purl.org/dc/elements/1.1/"
     xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"
     width="640" height="480" viewBox="0 0 640 480">
  <metadata>
    <rdf:RDF>
      <rdf:Description>
        <dc:creator>matplotlib version 3.8.2</dc:creator>
      </rdf:Description>
    </rdf:RDF>
  </metadata>
  <defs>
    <style type="text/css">*{stroke-linecap:butt;} .f { font-family: DejaVu Sans; }</style>
  </defs>
  <rect id="figure_1" x="0" y="0" width="640" height="480" fill="#ffffff"/>
  <g id="axes_1">
    <text id="text_1" x="320" y="30" style="font-family:DejaVu Sans;font-size:14px">Chart Title</text>
    <path id="line_1" d="M 100,200 L 200,150 L 300,180" style="fill:none;stroke:#1f77b4"/>
  </g>
</svg>"##;

    const MPL_BY_IDS: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="640" height="480">
  <g id="figure_1">
    <g id="axes_1">
      <rect id="patch_1" x="0" y="0" width="640" height="480" fill="white"/>
    </g>
  </g>
</svg>"##;

    const PLAIN: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200">
  <rect id="shape1" x="10" y="10" width="100" height="100" fill="blue"/>
  <circle id="shape2" cx="150" cy="150" r="30" fill="red"/>
</svg>"##;

    #[test]
    fn detect_by_creator_metadata() {
        let doc = parse_svg(MPL_BY_METADATA).unwrap();
        let d = detect(&doc);
        assert!(d.is_matplotlib_like);
        assert!(d.signals.contains(&"generator-metadata"));
        assert!((0.0..=1.0).contains(&d.confidence));
    }

    #[test]
    fn detect_by_id_nesting() {
        let doc = parse_svg(MPL_BY_IDS).unwrap();
        let d = detect(&doc);
        assert!(d.is_matplotlib_like);
        assert!(d.signals.contains(&"figure-axes-ids"));
    }

    #[test]
    fn detect_by_comment() {
        let svg = r#"<svg xmlns="http://www.w3.org/2000/svg" width="100" height="100">
  <!-- Created with matplotlib (version 3.8) -->
  <rect x="0" y="0" width="100" height="100"/>
</svg>"#;
        let doc = parse_svg(svg).unwrap();
        assert!(detect(&doc).is_matplotlib_like);
    }

    #[test]
    fn plain_document_is_negative() {
        let doc = parse_svg(PLAIN).unwrap();
        let d = detect(&doc);
        assert!(!d.is_matplotlib_like);
        assert_eq!(d.confidence, 0.0);
    }

    #[test]
    fn cleanup_strips_generated_blocks_and_fonts() {
        let mut doc = parse_svg(MPL_BY_METADATA).unwrap();
        let count = cleanup(&mut doc);
        assert!(count >= 3);

        let mut generated = 0;
        doc.root.walk(&mut |e| {
            if matches!(e.local_tag(), "style" | "metadata") {
                generated += 1;
            }
            if let Some(s) = e.attr("style") {
                assert!(!s.contains("DejaVu"), "font not normalized: {s}");
            }
        });
        assert_eq!(generated, 0);
    }

    #[test]
    fn cleanup_runs_once() {
        let mut doc = parse_svg(MPL_BY_METADATA).unwrap();
        assert!(cleanup(&mut doc) > 0);
        assert_eq!(cleanup(&mut doc), 0);
    }

    #[test]
    fn cleanup_is_noop_on_plain_document() {
        let mut doc = parse_svg(PLAIN).unwrap();
        assert_eq!(cleanup(&mut doc), 0);
    }
}
