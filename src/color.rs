//! Color science: device RGB, perceptual LAB, and palette matching.
//!
//! All perceptual work happens in CIE LAB (D65 illuminant), so that
//! distance between two colors approximates perceived difference
//! (CIE76 deltaE). RGB is the source of truth; LAB is a cached derived
//! view computed once at construction.

use std::fmt;

use indexmap::IndexMap;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::document::Document;
use crate::error::{Error, Result};

/// Chroma magnitude below which a color is treated as neutral
/// (gray, near-black, near-white). Fixed rather than user-tunable so
/// automatic mapping stays deterministic across runs.
pub const NEUTRAL_CHROMA_THRESHOLD: f64 = 15.0;

/// Basic CSS named colors accepted when parsing SVG paint values.
const NAMED_COLORS: &[(&str, [u8; 3])] = &[
    ("black", [0x00, 0x00, 0x00]),
    ("white", [0xff, 0xff, 0xff]),
    ("red", [0xff, 0x00, 0x00]),
    ("green", [0x00, 0x80, 0x00]),
    ("blue", [0x00, 0x00, 0xff]),
    ("yellow", [0xff, 0xff, 0x00]),
    ("cyan", [0x00, 0xff, 0xff]),
    ("magenta", [0xff, 0x00, 0xff]),
    ("orange", [0xff, 0xa5, 0x00]),
    ("purple", [0x80, 0x00, 0x80]),
    ("pink", [0xff, 0xc0, 0xcb]),
    ("brown", [0xa5, 0x2a, 0x2a]),
    ("gray", [0x80, 0x80, 0x80]),
    ("grey", [0x80, 0x80, 0x80]),
    ("silver", [0xc0, 0xc0, 0xc0]),
    ("navy", [0x00, 0x00, 0x80]),
    ("teal", [0x00, 0x80, 0x80]),
    ("maroon", [0x80, 0x00, 0x00]),
    ("olive", [0x80, 0x80, 0x00]),
    ("lime", [0x00, 0xff, 0x00]),
    ("aqua", [0x00, 0xff, 0xff]),
    ("fuchsia", [0xff, 0x00, 0xff]),
    ("coral", [0xff, 0x7f, 0x50]),
    ("salmon", [0xfa, 0x80, 0x72]),
    ("gold", [0xff, 0xd7, 0x00]),
    ("khaki", [0xf0, 0xe6, 0x8c]),
    ("plum", [0xdd, 0xa0, 0xdd]),
    ("tan", [0xd2, 0xb4, 0x8c]),
    ("beige", [0xf5, 0xf5, 0xdc]),
    ("ivory", [0xff, 0xff, 0xf0]),
    ("indigo", [0x4b, 0x00, 0x82]),
    ("violet", [0xee, 0x82, 0xee]),
    ("crimson", [0xdc, 0x14, 0x3c]),
    ("tomato", [0xff, 0x63, 0x47]),
    ("steelblue", [0x46, 0x82, 0xb4]),
    ("darkblue", [0x00, 0x00, 0x8b]),
    ("darkgreen", [0x00, 0x64, 0x00]),
    ("darkred", [0x8b, 0x00, 0x00]),
    ("lightblue", [0xad, 0xd8, 0xe6]),
    ("lightgreen", [0x90, 0xee, 0x90]),
    ("lightgray", [0xd3, 0xd3, 0xd3]),
    ("lightgrey", [0xd3, 0xd3, 0xd3]),
    ("darkgray", [0xa9, 0xa9, 0xa9]),
    ("darkgrey", [0xa9, 0xa9, 0xa9]),
];

/// A point in CIE LAB space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lab {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

impl Lab {
    /// Chroma magnitude, `sqrt(a^2 + b^2)`.
    pub fn chroma(&self) -> f64 {
        (self.a * self.a + self.b * self.b).sqrt()
    }
}

/// CIE76 color difference: Euclidean distance in LAB space.
/// Symmetric, non-negative, zero iff the two points are equal.
pub fn delta_e76(a: Lab, b: Lab) -> f64 {
    let dl = a.l - b.l;
    let da = a.a - b.a;
    let db = a.b - b.b;
    (dl * dl + da * da + db * db).sqrt()
}

/// A device-RGB color with a cached LAB view.
///
/// Equality and hashing consider the RGB channels (and alpha) only; the
/// derived LAB never participates.
#[derive(Debug, Clone, Copy)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub alpha: Option<u8>,
    lab: Lab,
}

impl Color {
    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self {
            r,
            g,
            b,
            alpha: None,
            lab: rgb_to_lab(r, g, b),
        }
    }

    pub fn with_alpha(r: u8, g: u8, b: u8, alpha: u8) -> Self {
        Self {
            alpha: Some(alpha),
            ..Self::new(r, g, b)
        }
    }

    /// Parse an SVG paint value: `#rrggbb`, `#rgb`, `#rrggbbaa`,
    /// `rgb(r, g, b)`, or a basic CSS color name.
    ///
    /// Returns `None` for non-color paints (`none`, `transparent`,
    /// `inherit`, `currentcolor`, `url(...)`) and for anything
    /// unparseable: callers walking a document must not fail on a
    /// malformed value.
    pub fn parse(value: &str) -> Option<Self> {
        let v = value.trim().to_ascii_lowercase();
        if v.is_empty()
            || matches!(v.as_str(), "none" | "transparent" | "inherit" | "currentcolor")
            || v.starts_with("url(")
        {
            return None;
        }

        if let Some(hex) = v.strip_prefix('#') {
            return Self::parse_hex(hex);
        }

        if let Some(body) = v.strip_prefix("rgb(").and_then(|s| s.strip_suffix(')')) {
            let parts: Vec<_> = body.split(',').map(str::trim).collect();
            if parts.len() == 3 {
                let r = parts[0].parse::<u8>().ok()?;
                let g = parts[1].parse::<u8>().ok()?;
                let b = parts[2].parse::<u8>().ok()?;
                return Some(Self::new(r, g, b));
            }
            return None;
        }

        NAMED_COLORS
            .iter()
            .find(|(name, _)| *name == v)
            .map(|(_, [r, g, b])| Self::new(*r, *g, *b))
    }

    fn parse_hex(hex: &str) -> Option<Self> {
        let expand = |h: &str| -> Option<Vec<u8>> {
            h.chars()
                .map(|c| c.to_digit(16).map(|d| d as u8))
                .collect()
        };
        match hex.len() {
            3 => {
                let d = expand(hex)?;
                Some(Self::new(d[0] * 17, d[1] * 17, d[2] * 17))
            }
            6 => {
                let d = expand(hex)?;
                Some(Self::new(
                    d[0] * 16 + d[1],
                    d[2] * 16 + d[3],
                    d[4] * 16 + d[5],
                ))
            }
            8 => {
                let d = expand(hex)?;
                Some(Self::with_alpha(
                    d[0] * 16 + d[1],
                    d[2] * 16 + d[3],
                    d[4] * 16 + d[5],
                    d[6] * 16 + d[7],
                ))
            }
            _ => None,
        }
    }

    /// Lowercase hex form, `#rrggbb` (or `#rrggbbaa` when alpha is set).
    pub fn hex(&self) -> String {
        match self.alpha {
            Some(a) => format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, a),
            None => format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b),
        }
    }

    pub fn lab(&self) -> Lab {
        self.lab
    }

    /// Perceptual lightness, L* in [0, 100].
    pub fn lightness(&self) -> f64 {
        self.lab.l
    }

    /// True for grays and near-black/near-white colors: chroma below
    /// [`NEUTRAL_CHROMA_THRESHOLD`]. Neutral colors are excluded from
    /// data-color analysis and automatic mapping.
    pub fn is_neutral(&self) -> bool {
        self.lab.chroma() < NEUTRAL_CHROMA_THRESHOLD
    }
}

impl PartialEq for Color {
    fn eq(&self, other: &Self) -> bool {
        self.r == other.r && self.g == other.g && self.b == other.b && self.alpha == other.alpha
    }
}

impl Eq for Color {}

impl std::hash::Hash for Color {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (self.r, self.g, self.b, self.alpha).hash(state);
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.hex())
    }
}

impl Serialize for Color {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.hex())
    }
}

impl<'de> Deserialize<'de> for Color {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Color::parse(&s).ok_or_else(|| D::Error::custom(format!("invalid color: {s}")))
    }
}

/// sRGB (0-255) to CIE LAB via linearization and XYZ, D65 reference white.
fn rgb_to_lab(r: u8, g: u8, b: u8) -> Lab {
    fn linearize(c: u8) -> f64 {
        let c = f64::from(c) / 255.0;
        if c <= 0.04045 {
            c / 12.92
        } else {
            ((c + 0.055) / 1.055).powf(2.4)
        }
    }

    let (rl, gl, bl) = (linearize(r), linearize(g), linearize(b));

    let x = rl * 0.4124564 + gl * 0.3575761 + bl * 0.1804375;
    let y = rl * 0.2126729 + gl * 0.7151522 + bl * 0.0721750;
    let z = rl * 0.0193339 + gl * 0.1191920 + bl * 0.9503041;

    let (xn, yn, zn) = (0.95047, 1.00000, 1.08883);

    fn f(t: f64) -> f64 {
        const DELTA: f64 = 6.0 / 29.0;
        if t > DELTA * DELTA * DELTA {
            t.cbrt()
        } else {
            t / (3.0 * DELTA * DELTA) + 4.0 / 29.0
        }
    }

    let (fx, fy, fz) = (f(x / xn), f(y / yn), f(z / zn));

    Lab {
        l: 116.0 * fy - 16.0,
        a: 500.0 * (fx - fy),
        b: 200.0 * (fy - fz),
    }
}

/// An ordered, non-empty sequence of colors. Order is the assignment
/// priority for automatic mapping; duplicates are distinct slots.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Palette(Vec<Color>);

impl Palette {
    pub fn new(colors: Vec<Color>) -> Result<Self> {
        if colors.is_empty() {
            return Err(Error::EmptyPalette);
        }
        Ok(Self(colors))
    }

    pub fn colors(&self) -> &[Color] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Never true: empty palettes are rejected at construction.
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl<'de> Deserialize<'de> for Palette {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let colors = Vec::<Color>::deserialize(deserializer)?;
        Palette::new(colors).map_err(|_| D::Error::custom("palette must be non-empty"))
    }
}

/// The palette entry closest to `color` under CIE76 distance.
/// Ties break toward the earliest palette index.
pub fn nearest_palette_match<'a>(color: &Color, palette: &'a Palette) -> (usize, &'a Color, f64) {
    let lab = color.lab();
    let mut best = (0usize, &palette.colors()[0], f64::INFINITY);
    for (i, candidate) in palette.colors().iter().enumerate() {
        let dist = delta_e76(lab, candidate.lab());
        if dist < best.2 {
            best = (i, candidate, dist);
        }
    }
    best
}

/// A per-run mapping from observed source colors to template palette
/// colors. Keys are unique; insertion order is preserved for reporting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColorMapping {
    entries: IndexMap<Color, Color>,
}

impl ColorMapping {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, from: Color, to: Color) {
        self.entries.insert(from, to);
    }

    pub fn get(&self, from: &Color) -> Option<&Color> {
        self.entries.get(from)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Color, &Color)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(Color, Color)> for ColorMapping {
    fn from_iter<T: IntoIterator<Item = (Color, Color)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Every color used by a document's fill/stroke properties, with
/// occurrence counts, sorted most-frequent first (hex ascending on
/// count ties so the order is stable).
///
/// Looks at both the `style` attribute and discrete presentation
/// attributes; unparseable values are skipped without failing the walk.
pub fn extract_colors(doc: &Document) -> Vec<(Color, usize)> {
    let mut counts: IndexMap<Color, usize> = IndexMap::new();
    doc.root.walk(&mut |elem| {
        for prop in ["fill", "stroke"] {
            if let Some(value) = elem.style_prop(prop) {
                if let Some(color) = Color::parse(&value) {
                    *counts.entry(color).or_insert(0) += 1;
                }
            }
            if let Some(value) = elem.attr(prop) {
                if let Some(color) = Color::parse(value) {
                    *counts.entry(color).or_insert(0) += 1;
                }
            }
        }
    });

    let mut out: Vec<(Color, usize)> = counts.into_iter().collect();
    out.sort_by(|(ca, na), (cb, nb)| nb.cmp(na).then_with(|| ca.hex().cmp(&cb.hex())));
    out
}

/// Non-neutral colors likely to represent data marks rather than
/// structural chrome (text, axes, grids, backgrounds).
pub fn extract_data_colors(doc: &Document) -> Vec<(Color, usize)> {
    extract_colors(doc)
        .into_iter()
        .filter(|(c, _)| !c.is_neutral())
        .collect()
}

/// Derive an automatic mapping: each distinct source color maps to its
/// nearest palette entry by CIE76, independently of the others. Ties
/// break toward the earliest palette index. Identity pairs are omitted.
pub fn auto_map_colors(data_colors: &[(Color, usize)], palette: &Palette) -> ColorMapping {
    let mut mapping = ColorMapping::new();
    for (src, _count) in data_colors {
        let (_, target, _) = nearest_palette_match(src, palette);
        if target != src {
            mapping.insert(*src, *target);
        }
    }
    mapping
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_forms() {
        assert_eq!(Color::parse("#4682b4").unwrap(), Color::new(0x46, 0x82, 0xb4));
        assert_eq!(Color::parse("#FFF").unwrap(), Color::new(255, 255, 255));
        assert_eq!(
            Color::parse("#11223344").unwrap(),
            Color::with_alpha(0x11, 0x22, 0x33, 0x44)
        );
    }

    #[test]
    fn parse_named_and_rgb_func() {
        assert_eq!(Color::parse("steelblue").unwrap(), Color::new(0x46, 0x82, 0xb4));
        assert_eq!(Color::parse("rgb(70, 130, 180)").unwrap(), Color::new(70, 130, 180));
    }

    #[test]
    fn parse_non_colors() {
        assert!(Color::parse("none").is_none());
        assert!(Color::parse("transparent").is_none());
        assert!(Color::parse("url(#grad1)").is_none());
        assert!(Color::parse("not-a-color").is_none());
        assert!(Color::parse("#12345").is_none());
        assert!(Color::parse("rgb(300,0,0)").is_none());
    }

    #[test]
    fn lab_endpoints() {
        let black = Color::new(0, 0, 0).lab();
        assert!(black.l.abs() < 1e-9);
        let white = Color::new(255, 255, 255).lab();
        assert!((white.l - 100.0).abs() < 0.01);
    }

    #[test]
    fn delta_e_self_is_zero() {
        for hex in ["#4682b4", "#d95f02", "#000000", "#ffffff", "#808080"] {
            let lab = Color::parse(hex).unwrap().lab();
            assert_eq!(delta_e76(lab, lab), 0.0);
        }
    }

    #[test]
    fn delta_e_symmetric() {
        let a = Color::new(70, 130, 180).lab();
        let b = Color::new(217, 95, 2).lab();
        assert!((delta_e76(a, b) - delta_e76(b, a)).abs() < 1e-12);
        assert!(delta_e76(a, b) > 0.0);
    }

    #[test]
    fn neutral_classification() {
        assert!(Color::new(0x80, 0x80, 0x80).is_neutral());
        assert!(Color::new(0, 0, 0).is_neutral());
        assert!(Color::new(255, 255, 255).is_neutral());
        assert!(Color::new(0xdd, 0xdd, 0xdd).is_neutral());
        assert!(!Color::new(0x46, 0x82, 0xb4).is_neutral());
        assert!(!Color::new(0xd9, 0x5f, 0x02).is_neutral());
    }

    #[test]
    fn nearest_match_is_minimal() {
        let palette = Palette::new(vec![
            Color::parse("#2171b5").unwrap(),
            Color::parse("#e6550d").unwrap(),
            Color::parse("#31a354").unwrap(),
        ])
        .unwrap();
        let probe = Color::parse("#4682b4").unwrap();
        let (idx, matched, dist) = nearest_palette_match(&probe, &palette);
        assert!(palette.colors().contains(matched));
        for c in palette.colors() {
            assert!(delta_e76(probe.lab(), c.lab()) >= dist);
        }
        assert_eq!(idx, 0);
    }

    #[test]
    fn nearest_match_tie_breaks_earliest() {
        let dup = Color::parse("#2171b5").unwrap();
        let palette = Palette::new(vec![dup, dup]).unwrap();
        let (idx, _, dist) = nearest_palette_match(&dup, &palette);
        assert_eq!(idx, 0);
        assert_eq!(dist, 0.0);
    }

    #[test]
    fn auto_mapping_deterministic() {
        let palette = Palette::new(vec![
            Color::parse("#2171b5").unwrap(),
            Color::parse("#e6550d").unwrap(),
        ])
        .unwrap();
        let found = vec![
            (Color::parse("#4682b4").unwrap(), 3),
            (Color::parse("#d95f02").unwrap(), 2),
        ];
        for _ in 0..3 {
            let mapping = auto_map_colors(&found, &palette);
            assert_eq!(
                mapping.get(&Color::parse("#4682b4").unwrap()).unwrap().hex(),
                "#2171b5"
            );
            assert_eq!(
                mapping.get(&Color::parse("#d95f02").unwrap()).unwrap().hex(),
                "#e6550d"
            );
        }
    }

    #[test]
    fn empty_palette_rejected() {
        assert!(matches!(Palette::new(vec![]), Err(Error::EmptyPalette)));
    }

    #[test]
    fn color_serde_round_trip() {
        let c = Color::parse("#d95f02").unwrap();
        let json = serde_json::to_string(&c).unwrap();
        assert_eq!(json, "\"#d95f02\"");
        let back: Color = serde_json::from_str(&json).unwrap();
        assert_eq!(back, c);
    }
}
