//! Element classification.
//!
//! Distinguishes structural chrome (spines, grids, backgrounds) from
//! data content without a semantic plot model, using an explicit ordered
//! list of rules evaluated against a precomputed document profile. The
//! rules are shape/position/style heuristics: they are documented as
//! such and are not guaranteed correct on arbitrary input.

use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::document::{parse_dimension, Document, Element};
use crate::template::{SpineSide, TextRole};

/// Minimum share of the content span a straight line must cover to
/// count as a spine or grid line (shorter lines are ticks).
const MIN_LINE_SPAN_RATIO: f64 = 0.5;

/// Minimum share of the canvas a rect must cover to count as the
/// document background.
const BACKGROUND_COVER_RATIO: f64 = 0.9;

/// Minimum L* for a neutral stroke to count as a grid line.
const GRID_MIN_LIGHTNESS: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GridOrientation {
    Horizontal,
    Vertical,
}

impl GridOrientation {
    pub fn label(&self) -> &'static str {
        match self {
            GridOrientation::Horizontal => "horizontal",
            GridOrientation::Vertical => "vertical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementClass {
    Spine(SpineSide),
    Grid(GridOrientation),
    Text(TextRole),
    DataMark,
    Background,
    Other,
}

impl ElementClass {
    /// Category label used for element counts in records.
    pub fn label(&self) -> &'static str {
        match self {
            ElementClass::Spine(_) => "spine",
            ElementClass::Grid(_) => "grid",
            ElementClass::Text(_) => "text",
            ElementClass::DataMark => "data-mark",
            ElementClass::Background => "background",
            ElementClass::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    fn expand(&mut self, x: f64, y: f64) {
        self.min_x = self.min_x.min(x);
        self.min_y = self.min_y.min(y);
        self.max_x = self.max_x.max(x);
        self.max_y = self.max_y.max(y);
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// A straight segment extracted from a `line` element or a simple
/// M/L/H/V path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSeg {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl LineSeg {
    fn is_horizontal(&self) -> bool {
        (self.y1 - self.y2).abs() < 1e-6
    }

    fn is_vertical(&self) -> bool {
        (self.x1 - self.x2).abs() < 1e-6
    }
}

/// Per-document facts the rules need: canvas size, the bounding box of
/// shape content (text and full-canvas rects excluded so labels and
/// backgrounds don't stretch the plot frame), and the distinct font
/// sizes used by text elements.
#[derive(Debug, Clone)]
pub struct DocumentProfile {
    pub canvas: Option<(f64, f64)>,
    pub bounds: Option<Bounds>,
    /// Distinct font sizes, ascending.
    pub font_sizes: Vec<f64>,
    pub tol_x: f64,
    pub tol_y: f64,
}

impl DocumentProfile {
    pub fn build(doc: &Document) -> Self {
        let canvas = doc.canvas_size();
        let mut bounds: Option<Bounds> = None;
        let mut font_sizes: Vec<f64> = Vec::new();

        doc.root.walk(&mut |elem| {
            let tag = elem.local_tag();
            if matches!(tag, "text" | "tspan") {
                if let Some(size) = elem.style_prop("font-size").map(|v| parse_dimension(&v)) {
                    if size > 0.0 && !font_sizes.iter().any(|s| approx(*s, size, 1e-6)) {
                        font_sizes.push(size);
                    }
                }
                return;
            }
            if is_full_canvas_rect(elem, canvas) {
                return;
            }
            for (x, y) in element_points(elem) {
                match &mut bounds {
                    Some(b) => b.expand(x, y),
                    None => {
                        bounds = Some(Bounds {
                            min_x: x,
                            min_y: y,
                            max_x: x,
                            max_y: y,
                        })
                    }
                }
            }
        });

        font_sizes.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let (tol_x, tol_y) = match bounds {
            Some(b) => (
                (b.width() * 0.02).max(2.0),
                (b.height() * 0.02).max(2.0),
            ),
            None => (2.0, 2.0),
        };

        Self {
            canvas,
            bounds,
            font_sizes,
            tol_x,
            tol_y,
        }
    }
}

/// One classification rule. Rules are evaluated in a fixed order; the
/// first match wins.
pub trait ClassRule {
    fn name(&self) -> &'static str;
    fn evaluate(&self, elem: &Element, profile: &DocumentProfile) -> Option<ElementClass>;
}

/// Ordered rule evaluator over a precomputed profile.
pub struct Classifier {
    profile: DocumentProfile,
    rules: Vec<Box<dyn ClassRule>>,
}

impl Classifier {
    pub fn new(doc: &Document) -> Self {
        Self {
            profile: DocumentProfile::build(doc),
            rules: vec![
                Box::new(SpineRule),
                Box::new(GridRule),
                Box::new(TextRule),
                Box::new(BackgroundRule),
                Box::new(DataMarkRule),
            ],
        }
    }

    pub fn profile(&self) -> &DocumentProfile {
        &self.profile
    }

    pub fn classify(&self, elem: &Element) -> ElementClass {
        for rule in &self.rules {
            if let Some(class) = rule.evaluate(elem, &self.profile) {
                return class;
            }
        }
        ElementClass::Other
    }
}

// --- Concrete rules ---

/// A spine is a straight, unfilled line running along the boundary of
/// the content box.
struct SpineRule;

impl ClassRule for SpineRule {
    fn name(&self) -> &'static str {
        "spine"
    }

    fn evaluate(&self, elem: &Element, profile: &DocumentProfile) -> Option<ElementClass> {
        let seg = line_segment(elem)?;
        if has_fill(elem) {
            return None;
        }
        let bounds = profile.bounds?;

        if seg.is_horizontal() {
            if (seg.x2 - seg.x1).abs() < MIN_LINE_SPAN_RATIO * bounds.width() {
                return None;
            }
            if approx(seg.y1, bounds.max_y, profile.tol_y) {
                return Some(ElementClass::Spine(SpineSide::Bottom));
            }
            if approx(seg.y1, bounds.min_y, profile.tol_y) {
                return Some(ElementClass::Spine(SpineSide::Top));
            }
        } else if seg.is_vertical() {
            if (seg.y2 - seg.y1).abs() < MIN_LINE_SPAN_RATIO * bounds.height() {
                return None;
            }
            if approx(seg.x1, bounds.min_x, profile.tol_x) {
                return Some(ElementClass::Spine(SpineSide::Left));
            }
            if approx(seg.x1, bounds.max_x, profile.tol_x) {
                return Some(ElementClass::Spine(SpineSide::Right));
            }
        }
        None
    }
}

/// A grid line is a straight line spanning the plot interior with a
/// light neutral stroke.
struct GridRule;

impl ClassRule for GridRule {
    fn name(&self) -> &'static str {
        "grid"
    }

    fn evaluate(&self, elem: &Element, profile: &DocumentProfile) -> Option<ElementClass> {
        let seg = line_segment(elem)?;
        let bounds = profile.bounds?;
        let stroke = elem.style_prop("stroke").and_then(|v| Color::parse(&v))?;
        if !stroke.is_neutral() || stroke.lightness() <= GRID_MIN_LIGHTNESS {
            return None;
        }

        if seg.is_horizontal() {
            if (seg.x2 - seg.x1).abs() < MIN_LINE_SPAN_RATIO * bounds.width() {
                return None;
            }
            let interior = seg.y1 > bounds.min_y + profile.tol_y
                && seg.y1 < bounds.max_y - profile.tol_y;
            if interior {
                return Some(ElementClass::Grid(GridOrientation::Horizontal));
            }
        } else if seg.is_vertical() {
            if (seg.y2 - seg.y1).abs() < MIN_LINE_SPAN_RATIO * bounds.height() {
                return None;
            }
            let interior = seg.x1 > bounds.min_x + profile.tol_x
                && seg.x1 < bounds.max_x - profile.tol_x;
            if interior {
                return Some(ElementClass::Grid(GridOrientation::Vertical));
            }
        }
        None
    }
}

/// Text elements, sub-classified by relative font size rank: largest is
/// the title, smallest the tick labels, anything else (including ties
/// and unknown sizes) an axis label.
struct TextRule;

impl ClassRule for TextRule {
    fn name(&self) -> &'static str {
        "text"
    }

    fn evaluate(&self, elem: &Element, profile: &DocumentProfile) -> Option<ElementClass> {
        if !matches!(elem.local_tag(), "text" | "tspan") {
            return None;
        }
        let role = match (
            elem.style_prop("font-size").map(|v| parse_dimension(&v)),
            profile.font_sizes.as_slice(),
        ) {
            (Some(size), sizes) if sizes.len() >= 2 => {
                if approx(size, *sizes.last().unwrap(), 1e-6) {
                    TextRole::Title
                } else if approx(size, sizes[0], 1e-6) {
                    TextRole::TickLabel
                } else {
                    TextRole::AxisLabel
                }
            }
            _ => TextRole::AxisLabel,
        };
        Some(ElementClass::Text(role))
    }
}

/// A background is a rect covering (nearly) the whole canvas.
struct BackgroundRule;

impl ClassRule for BackgroundRule {
    fn name(&self) -> &'static str {
        "background"
    }

    fn evaluate(&self, elem: &Element, profile: &DocumentProfile) -> Option<ElementClass> {
        if is_full_canvas_rect(elem, profile.canvas) {
            Some(ElementClass::Background)
        } else {
            None
        }
    }
}

/// Any remaining shape whose fill or stroke is a non-neutral color.
struct DataMarkRule;

impl ClassRule for DataMarkRule {
    fn name(&self) -> &'static str {
        "data-mark"
    }

    fn evaluate(&self, elem: &Element, _profile: &DocumentProfile) -> Option<ElementClass> {
        if !matches!(
            elem.local_tag(),
            "rect" | "circle" | "ellipse" | "path" | "polygon" | "polyline" | "line"
        ) {
            return None;
        }
        for prop in ["fill", "stroke"] {
            if let Some(color) = elem.style_prop(prop).and_then(|v| Color::parse(&v)) {
                if !color.is_neutral() {
                    return Some(ElementClass::DataMark);
                }
            }
        }
        None
    }
}

// --- Geometry helpers ---

fn approx(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() <= tol
}

fn has_fill(elem: &Element) -> bool {
    elem.style_prop("fill")
        .map(|v| Color::parse(&v).is_some())
        .unwrap_or(false)
}

pub(crate) fn is_full_canvas_rect(elem: &Element, canvas: Option<(f64, f64)>) -> bool {
    if elem.local_tag() != "rect" {
        return false;
    }
    let Some((cw, ch)) = canvas else {
        return false;
    };
    let w = elem.attr("width").map(parse_dimension).unwrap_or(0.0);
    let h = elem.attr("height").map(parse_dimension).unwrap_or(0.0);
    w >= BACKGROUND_COVER_RATIO * cw && h >= BACKGROUND_COVER_RATIO * ch
}

/// The element's straight segment, if it is a `line` or a two-point
/// M/L/H/V path.
pub(crate) fn line_segment(elem: &Element) -> Option<LineSeg> {
    match elem.local_tag() {
        "line" => {
            let get = |name: &str| elem.attr(name).map(parse_dimension).unwrap_or(0.0);
            Some(LineSeg {
                x1: get("x1"),
                y1: get("y1"),
                x2: get("x2"),
                y2: get("y2"),
            })
        }
        "path" => {
            let points = path_points(elem.attr("d")?)?;
            if points.len() == 2 {
                Some(LineSeg {
                    x1: points[0].0,
                    y1: points[0].1,
                    x2: points[1].0,
                    y2: points[1].1,
                })
            } else {
                None
            }
        }
        _ => None,
    }
}

/// Points visited by an M/L/H/V(/Z) path. Returns `None` when the path
/// uses curve commands; those are not straight-line candidates.
fn path_points(d: &str) -> Option<Vec<(f64, f64)>> {
    let mut spaced = String::with_capacity(d.len() + 8);
    for c in d.chars() {
        if c.is_ascii_alphabetic() {
            spaced.push(' ');
            spaced.push(c);
            spaced.push(' ');
        } else if c == ',' {
            spaced.push(' ');
        } else {
            spaced.push(c);
        }
    }

    let mut points: Vec<(f64, f64)> = Vec::new();
    let mut command = ' ';
    let mut pending: Vec<f64> = Vec::new();
    for token in spaced.split_whitespace() {
        if token.len() == 1 && token.chars().next().unwrap().is_ascii_alphabetic() {
            command = token.chars().next().unwrap();
            if !matches!(command, 'M' | 'm' | 'L' | 'l' | 'H' | 'h' | 'V' | 'v' | 'Z' | 'z') {
                return None;
            }
            pending.clear();
            continue;
        }
        let value: f64 = token.parse().ok()?;
        match command {
            'M' | 'L' => {
                pending.push(value);
                if pending.len() == 2 {
                    points.push((pending[0], pending[1]));
                    pending.clear();
                }
            }
            'm' | 'l' => {
                pending.push(value);
                if pending.len() == 2 {
                    let (px, py) = points.last().copied().unwrap_or((0.0, 0.0));
                    points.push((px + pending[0], py + pending[1]));
                    pending.clear();
                }
            }
            'H' => {
                let (_, py) = points.last().copied()?;
                points.push((value, py));
            }
            'h' => {
                let (px, py) = points.last().copied()?;
                points.push((px + value, py));
            }
            'V' => {
                let (px, _) = points.last().copied()?;
                points.push((px, value));
            }
            'v' => {
                let (px, py) = points.last().copied()?;
                points.push((px, py + value));
            }
            _ => return None,
        }
    }
    if points.is_empty() {
        None
    } else {
        Some(points)
    }
}

/// Geometry sample points for the content bounding box.
fn element_points(elem: &Element) -> Vec<(f64, f64)> {
    let attr = |name: &str| elem.attr(name).map(parse_dimension).unwrap_or(0.0);
    match elem.local_tag() {
        "line" => vec![
            (attr("x1"), attr("y1")),
            (attr("x2"), attr("y2")),
        ],
        "rect" => {
            let (x, y, w, h) = (attr("x"), attr("y"), attr("width"), attr("height"));
            if w > 0.0 && h > 0.0 {
                vec![(x, y), (x + w, y + h)]
            } else {
                Vec::new()
            }
        }
        "circle" => {
            let (cx, cy, r) = (attr("cx"), attr("cy"), attr("r"));
            if r > 0.0 {
                vec![(cx - r, cy - r), (cx + r, cy + r)]
            } else {
                Vec::new()
            }
        }
        "ellipse" => {
            let (cx, cy, rx, ry) = (attr("cx"), attr("cy"), attr("rx"), attr("ry"));
            if rx > 0.0 && ry > 0.0 {
                vec![(cx - rx, cy - ry), (cx + rx, cy + ry)]
            } else {
                Vec::new()
            }
        }
        "polyline" | "polygon" => points_attr(elem.attr("points").unwrap_or("")),
        "path" => elem
            .attr("d")
            .and_then(path_points)
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn points_attr(points: &str) -> Vec<(f64, f64)> {
    let values: Vec<f64> = points
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect();
    values.chunks_exact(2).map(|p| (p[0], p[1])).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::parse_svg;

    const CHART: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="800" height="600" viewBox="0 0 800 600">
  <rect id="canvas-bg" x="0" y="0" width="800" height="600" style="fill:#ffffff"/>
  <path id="spine-top" d="M 80 40 L 720 40" style="fill:none;stroke:#000000"/>
  <path id="spine-right" d="M 720 40 L 720 520" style="fill:none;stroke:#000000"/>
  <path id="spine-bottom" d="M 80 520 L 720 520" style="fill:none;stroke:#000000"/>
  <path id="spine-left" d="M 80 40 L 80 520" style="fill:none;stroke:#000000"/>
  <path id="grid-h" d="M 80 280 L 720 280" style="fill:none;stroke:#dddddd"/>
  <path id="grid-v" d="M 400 40 L 400 520" style="fill:none;stroke:#eeeeee"/>
  <rect id="bar1" x="150" y="200" width="60" height="320" style="fill:#4682b4"/>
  <rect id="bar2" x="300" y="260" width="60" height="260" style="fill:#d95f02"/>
  <text id="title" x="400" y="28" style="font-size:18px;font-family:Arial">Revenue</text>
  <text id="xlabel" x="400" y="560" style="font-size:12px;font-family:Arial">Quarter</text>
  <text id="tick1" x="180" y="540" style="font-size:9px;font-family:Arial">Q1</text>
</svg>"##;

    fn classes(svg: &str) -> Vec<(String, ElementClass)> {
        let doc = parse_svg(svg).unwrap();
        let classifier = Classifier::new(&doc);
        let mut out = Vec::new();
        doc.root.walk(&mut |e| {
            if e.local_tag() != "svg" {
                out.push((e.id().unwrap_or("?").to_string(), classifier.classify(e)));
            }
        });
        out
    }

    fn class_of(svg: &str, id: &str) -> ElementClass {
        classes(svg)
            .into_iter()
            .find(|(i, _)| i == id)
            .map(|(_, c)| c)
            .unwrap()
    }

    #[test]
    fn spines_by_side() {
        assert_eq!(class_of(CHART, "spine-top"), ElementClass::Spine(SpineSide::Top));
        assert_eq!(class_of(CHART, "spine-right"), ElementClass::Spine(SpineSide::Right));
        assert_eq!(class_of(CHART, "spine-bottom"), ElementClass::Spine(SpineSide::Bottom));
        assert_eq!(class_of(CHART, "spine-left"), ElementClass::Spine(SpineSide::Left));
    }

    #[test]
    fn grid_lines_by_orientation() {
        assert_eq!(
            class_of(CHART, "grid-h"),
            ElementClass::Grid(GridOrientation::Horizontal)
        );
        assert_eq!(
            class_of(CHART, "grid-v"),
            ElementClass::Grid(GridOrientation::Vertical)
        );
    }

    #[test]
    fn data_marks_are_non_neutral_shapes() {
        assert_eq!(class_of(CHART, "bar1"), ElementClass::DataMark);
        assert_eq!(class_of(CHART, "bar2"), ElementClass::DataMark);
    }

    #[test]
    fn text_roles_by_size_rank() {
        assert_eq!(class_of(CHART, "title"), ElementClass::Text(TextRole::Title));
        assert_eq!(class_of(CHART, "xlabel"), ElementClass::Text(TextRole::AxisLabel));
        assert_eq!(class_of(CHART, "tick1"), ElementClass::Text(TextRole::TickLabel));
    }

    #[test]
    fn background_is_full_canvas_rect() {
        assert_eq!(class_of(CHART, "canvas-bg"), ElementClass::Background);
    }

    #[test]
    fn short_boundary_ticks_are_not_spines() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" width="800" height="600">
  <path id="spine-bottom" d="M 80 520 L 720 520" style="fill:none;stroke:#000000"/>
  <path id="spine-left" d="M 80 40 L 80 520" style="fill:none;stroke:#000000"/>
  <path id="tick" d="M 150 520 L 150 528" style="fill:none;stroke:#000000"/>
</svg>"##;
        assert_eq!(class_of(svg, "spine-bottom"), ElementClass::Spine(SpineSide::Bottom));
        assert!(!matches!(class_of(svg, "tick"), ElementClass::Spine(_)));
    }

    #[test]
    fn dark_interior_line_is_not_grid() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" width="800" height="600">
  <path id="top" d="M 80 40 L 720 40" style="fill:none;stroke:#000000"/>
  <path id="bottom" d="M 80 520 L 720 520" style="fill:none;stroke:#000000"/>
  <path id="mid" d="M 80 280 L 720 280" style="fill:none;stroke:#111111"/>
</svg>"##;
        assert!(!matches!(class_of(svg, "mid"), ElementClass::Grid(_)));
    }

    #[test]
    fn curved_path_with_color_is_data() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" width="200" height="200">
  <path id="wave" d="M 10 100 C 40 40 80 160 110 100" style="fill:none;stroke:#1f77b4"/>
</svg>"##;
        assert_eq!(class_of(svg, "wave"), ElementClass::DataMark);
    }

    #[test]
    fn line_tag_segment() {
        let mut e = Element::new("line");
        e.set_attr("x1", "10");
        e.set_attr("y1", "20");
        e.set_attr("x2", "10");
        e.set_attr("y2", "120");
        let seg = line_segment(&e).unwrap();
        assert!(seg.is_vertical());
    }

    #[test]
    fn path_points_forms() {
        assert_eq!(
            path_points("M 100,200 L 200,150 L 300,180").unwrap().len(),
            3
        );
        assert_eq!(
            path_points("M 80 520 H 720").unwrap(),
            vec![(80.0, 520.0), (720.0, 520.0)]
        );
        assert_eq!(
            path_points("m 10 10 l 5 0").unwrap(),
            vec![(10.0, 10.0), (15.0, 10.0)]
        );
        assert!(path_points("M 10 10 C 20 20 30 30 40 40").is_none());
    }
}
