//! Template model and registry.
//!
//! A template is the contract a styled figure must conform to: palette,
//! per-role typography, spine and grid rules, background policy. Names
//! are case-insensitive. Built-ins come from the packaged catalog and
//! are immutable; customs live in an injected [`TemplateStore`] and are
//! persisted on every mutation, never on a deferred flush.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::classify::{Classifier, ElementClass, GridOrientation};
use crate::color::{extract_colors, extract_data_colors, Color, Palette};
use crate::document::{parse_dimension, Document};
use crate::error::{Error, Result};
use crate::store::TemplateStore;

/// Packaged built-in catalog, loaded once at registry construction.
const BUILTIN_CATALOG: &str = include_str!("../data/builtin_templates.json");

/// The longest palette a captured template will take from a document.
const CAPTURE_PALETTE_LIMIT: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpineSide {
    Top,
    Right,
    Bottom,
    Left,
}

impl SpineSide {
    pub fn label(&self) -> &'static str {
        match self {
            SpineSide::Top => "top",
            SpineSide::Right => "right",
            SpineSide::Bottom => "bottom",
            SpineSide::Left => "left",
        }
    }
}

/// Text sub-classification, ranked by relative font size within the
/// document: largest = title, smallest = tick label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TextRole {
    Title,
    AxisLabel,
    TickLabel,
}

impl TextRole {
    pub fn label(&self) -> &'static str {
        match self {
            TextRole::Title => "title",
            TextRole::AxisLabel => "axis_label",
            TextRole::TickLabel => "tick_label",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontSpec {
    pub family: String,
    pub size: f64,
    pub weight: String,
    pub color: Color,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FontSet {
    pub title: FontSpec,
    pub axis_label: FontSpec,
    pub tick_label: FontSpec,
}

impl FontSet {
    pub fn for_role(&self, role: TextRole) -> &FontSpec {
        match role {
            TextRole::Title => &self.title,
            TextRole::AxisLabel => &self.axis_label,
            TextRole::TickLabel => &self.tick_label,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AxisStyle {
    /// Spine sides retained after restyling; everything else is removed.
    pub keep: Vec<SpineSide>,
    pub stroke: Color,
    pub width: f64,
}

impl AxisStyle {
    pub fn keeps(&self, side: SpineSide) -> bool {
        self.keep.contains(&side)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridStyle {
    pub stroke: Color,
    pub width: f64,
    #[serde(default)]
    pub dash: Option<String>,
    pub horizontal: bool,
    pub vertical: bool,
}

impl GridStyle {
    pub fn applies_to(&self, orientation: GridOrientation) -> bool {
        match orientation {
            GridOrientation::Horizontal => self.horizontal,
            GridOrientation::Vertical => self.vertical,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    BuiltIn,
    #[default]
    Custom,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub palette: Palette,
    pub fonts: FontSet,
    pub axis: AxisStyle,
    pub grid: GridStyle,
    /// `None` means backgrounds become transparent; `Some` restyles the
    /// background fill to that color.
    #[serde(default)]
    pub background: Option<Color>,
    #[serde(default)]
    pub provenance: Provenance,
}

impl Template {
    pub fn is_builtin(&self) -> bool {
        self.provenance == Provenance::BuiltIn
    }
}

/// Name-to-template mapping partitioned into the immutable built-in set
/// and a persisted custom set. Lookup is custom-first: a custom sharing
/// a built-in name is a shadow override, never a destructive overwrite.
pub struct TemplateRegistry {
    builtins: IndexMap<String, Template>,
    customs: IndexMap<String, Template>,
    store: Box<dyn TemplateStore>,
}

impl TemplateRegistry {
    /// Build a registry over the packaged built-in catalog plus the
    /// customs already persisted in `store`.
    pub fn with_builtins(store: Box<dyn TemplateStore>) -> Result<Self> {
        Self::with_catalog(BUILTIN_CATALOG, store)
    }

    fn with_catalog(catalog: &str, store: Box<dyn TemplateStore>) -> Result<Self> {
        let raw: IndexMap<String, Template> = serde_json::from_str(catalog)?;
        let mut builtins = IndexMap::new();
        for (key, mut template) in raw {
            template.provenance = Provenance::BuiltIn;
            builtins.insert(key.to_lowercase(), template);
        }

        let mut customs = IndexMap::new();
        for template in store.list()? {
            customs.insert(template.name.to_lowercase(), template);
        }

        Ok(Self {
            builtins,
            customs,
            store,
        })
    }

    /// Register a custom template, persisting it immediately.
    ///
    /// A name colliding with a built-in fails with `DuplicateTemplate`
    /// unless `allow_override_builtin` is set, in which case the custom
    /// shadows the built-in (the built-in table itself is untouched).
    pub fn register(&mut self, mut template: Template, allow_override_builtin: bool) -> Result<()> {
        let key = template.name.to_lowercase();
        if self.builtins.contains_key(&key) && !allow_override_builtin {
            return Err(Error::DuplicateTemplate(template.name));
        }
        template.provenance = Provenance::Custom;
        self.store.set(&key, &template)?;
        self.customs.insert(key, template);
        Ok(())
    }

    /// Case-insensitive lookup, custom set first.
    pub fn lookup(&self, name: &str) -> Result<&Template> {
        let key = name.to_lowercase();
        self.customs
            .get(&key)
            .or_else(|| self.builtins.get(&key))
            .ok_or_else(|| Error::TemplateNotFound(name.to_string()))
    }

    /// Remove a custom template, persisting the removal immediately.
    /// Built-in names are protected.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        let key = name.to_lowercase();
        if self.customs.contains_key(&key) {
            self.store.delete(&key)?;
            self.customs.shift_remove(&key);
            return Ok(());
        }
        if self.builtins.contains_key(&key) {
            return Err(Error::ProtectedTemplate(name.to_string()));
        }
        Err(Error::TemplateNotFound(name.to_string()))
    }

    /// Merged view, customs shadowing built-ins, sorted by name.
    pub fn list(&self) -> Vec<&Template> {
        let mut merged: IndexMap<&str, &Template> = IndexMap::new();
        for (key, t) in &self.builtins {
            merged.insert(key.as_str(), t);
        }
        for (key, t) in &self.customs {
            merged.insert(key.as_str(), t);
        }
        let mut out: Vec<&Template> = merged.into_values().collect();
        out.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        out
    }

    /// Derive a template from an existing document: dominant non-neutral
    /// colors become the palette, the most common font family and the
    /// document's size ranking become the font spec, and the current
    /// spine/grid configuration becomes the axis and grid rules.
    ///
    /// The result is not registered; pass it to [`Self::register`].
    pub fn capture(&self, doc: &Document, name: &str) -> Result<Template> {
        let palette = capture_palette(doc)?;
        let fonts = capture_fonts(doc);
        let classifier = Classifier::new(doc);

        let mut keep: Vec<SpineSide> = Vec::new();
        let mut spine_style: Option<(Color, f64)> = None;
        let mut grid_style: Option<(Color, f64, Option<String>)> = None;
        let mut horizontal = false;
        let mut vertical = false;
        let mut background: Option<Color> = None;

        doc.root.walk(&mut |elem| match classifier.classify(elem) {
            ElementClass::Spine(side) => {
                if !keep.contains(&side) {
                    keep.push(side);
                }
                if spine_style.is_none() {
                    let stroke = elem
                        .style_prop("stroke")
                        .and_then(|v| Color::parse(&v))
                        .unwrap_or_else(|| Color::new(0, 0, 0));
                    let width = elem
                        .style_prop("stroke-width")
                        .map(|v| parse_dimension(&v))
                        .filter(|w| *w > 0.0)
                        .unwrap_or(1.0);
                    spine_style = Some((stroke, width));
                }
            }
            ElementClass::Grid(orientation) => {
                match orientation {
                    GridOrientation::Horizontal => horizontal = true,
                    GridOrientation::Vertical => vertical = true,
                }
                if grid_style.is_none() {
                    let stroke = elem
                        .style_prop("stroke")
                        .and_then(|v| Color::parse(&v))
                        .unwrap_or_else(|| Color::new(0xdd, 0xdd, 0xdd));
                    let width = elem
                        .style_prop("stroke-width")
                        .map(|v| parse_dimension(&v))
                        .filter(|w| *w > 0.0)
                        .unwrap_or(0.5);
                    grid_style = Some((stroke, width, elem.style_prop("stroke-dasharray")));
                }
            }
            ElementClass::Background => {
                if background.is_none() {
                    background = elem.style_prop("fill").and_then(|v| Color::parse(&v));
                }
            }
            _ => {}
        });

        if keep.is_empty() {
            keep = vec![SpineSide::Bottom, SpineSide::Left];
        }
        let (axis_stroke, axis_width) =
            spine_style.unwrap_or_else(|| (Color::new(0, 0, 0), 1.0));
        let (grid_stroke, grid_width, grid_dash) =
            grid_style.unwrap_or_else(|| (Color::new(0xdd, 0xdd, 0xdd), 0.5, None));

        Ok(Template {
            name: name.to_string(),
            description: "captured from document".to_string(),
            palette,
            fonts,
            axis: AxisStyle {
                keep,
                stroke: axis_stroke,
                width: axis_width,
            },
            grid: GridStyle {
                stroke: grid_stroke,
                width: grid_width,
                dash: grid_dash,
                horizontal,
                vertical,
            },
            background,
            provenance: Provenance::Custom,
        })
    }
}

fn capture_palette(doc: &Document) -> Result<Palette> {
    let mut colors: Vec<Color> = extract_data_colors(doc)
        .into_iter()
        .take(CAPTURE_PALETTE_LIMIT)
        .map(|(c, _)| c)
        .collect();
    if colors.is_empty() {
        colors = extract_colors(doc)
            .into_iter()
            .take(CAPTURE_PALETTE_LIMIT)
            .map(|(c, _)| c)
            .collect();
    }
    if colors.is_empty() {
        colors.push(Color::new(0, 0, 0));
    }
    Palette::new(colors)
}

fn capture_fonts(doc: &Document) -> FontSet {
    let mut families: IndexMap<String, usize> = IndexMap::new();
    let mut sizes: Vec<f64> = Vec::new();
    let mut fill_counts: IndexMap<Color, usize> = IndexMap::new();

    doc.root.walk(&mut |elem| {
        if !matches!(elem.local_tag(), "text" | "tspan") {
            return;
        }
        if let Some(family) = elem.style_prop("font-family") {
            *families.entry(family).or_insert(0) += 1;
        }
        if let Some(size) = elem.style_prop("font-size").map(|v| parse_dimension(&v)) {
            if size > 0.0 && !sizes.iter().any(|s| (s - size).abs() < f64::EPSILON) {
                sizes.push(size);
            }
        }
        if let Some(color) = elem.style_prop("fill").and_then(|v| Color::parse(&v)) {
            *fill_counts.entry(color).or_insert(0) += 1;
        }
    });

    let family = families
        .iter()
        .max_by(|(fa, na), (fb, nb)| na.cmp(nb).then_with(|| fb.cmp(fa)))
        .map(|(f, _)| f.clone())
        .unwrap_or_else(|| "Helvetica,Arial,sans-serif".to_string());
    let color = fill_counts
        .iter()
        .max_by(|(ca, na), (cb, nb)| na.cmp(nb).then_with(|| cb.hex().cmp(&ca.hex())))
        .map(|(c, _)| *c)
        .unwrap_or_else(|| Color::new(0, 0, 0));

    sizes.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let (title_size, axis_size, tick_size) = match sizes.as_slice() {
        [] => (12.0, 10.0, 8.0),
        [only] => (*only, *only, *only),
        sizes => {
            let title = *sizes.last().unwrap();
            let tick = sizes[0];
            let axis = sizes[sizes.len() / 2];
            (title, axis, tick)
        }
    };

    let spec = |size: f64, weight: &str| FontSpec {
        family: family.clone(),
        size,
        weight: weight.to_string(),
        color,
    };
    FontSet {
        title: spec(title_size, "bold"),
        axis_label: spec(axis_size, "normal"),
        tick_label: spec(tick_size, "normal"),
    }
}

#[cfg(test)]
pub fn test_template(name: &str) -> Template {
    Template {
        name: name.to_string(),
        description: "test".to_string(),
        palette: Palette::new(vec![
            Color::parse("#2171b5").unwrap(),
            Color::parse("#e6550d").unwrap(),
        ])
        .unwrap(),
        fonts: FontSet {
            title: FontSpec {
                family: "Helvetica,Arial,sans-serif".into(),
                size: 12.0,
                weight: "bold".into(),
                color: Color::new(0, 0, 0),
            },
            axis_label: FontSpec {
                family: "Helvetica,Arial,sans-serif".into(),
                size: 10.0,
                weight: "normal".into(),
                color: Color::new(0, 0, 0),
            },
            tick_label: FontSpec {
                family: "Helvetica,Arial,sans-serif".into(),
                size: 8.0,
                weight: "normal".into(),
                color: Color::new(0x33, 0x33, 0x33),
            },
        },
        axis: AxisStyle {
            keep: vec![SpineSide::Bottom, SpineSide::Left],
            stroke: Color::new(0, 0, 0),
            width: 1.0,
        },
        grid: GridStyle {
            stroke: Color::new(0xdd, 0xdd, 0xdd),
            width: 0.5,
            dash: Some("2,2".into()),
            horizontal: true,
            vertical: false,
        },
        background: None,
        provenance: Provenance::Custom,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryTemplateStore;

    fn registry() -> TemplateRegistry {
        TemplateRegistry::with_builtins(Box::new(MemoryTemplateStore::new())).unwrap()
    }

    #[test]
    fn builtin_catalog_loads() {
        let reg = registry();
        for name in ["nature", "science", "tufte"] {
            let t = reg.lookup(name).unwrap();
            assert!(t.is_builtin(), "{name} should be built-in");
            assert!(!t.palette.colors().is_empty());
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let reg = registry();
        assert_eq!(reg.lookup("Nature").unwrap().name, reg.lookup("nature").unwrap().name);
    }

    #[test]
    fn unknown_template_not_found() {
        let err = registry().lookup("does-not-exist").unwrap_err();
        assert_eq!(err.kind(), "TemplateNotFoundError");
    }

    #[test]
    fn register_and_lookup_custom() {
        let mut reg = registry();
        reg.register(test_template("mystyle"), false).unwrap();
        let t = reg.lookup("MyStyle").unwrap();
        assert!(!t.is_builtin());
    }

    #[test]
    fn builtin_collision_requires_force() {
        let mut reg = registry();
        let err = reg.register(test_template("nature"), false).unwrap_err();
        assert_eq!(err.kind(), "DuplicateTemplateError");

        // With force the custom shadows the built-in; removing the
        // shadow uncovers the original catalog entry again.
        reg.register(test_template("nature"), true).unwrap();
        assert!(!reg.lookup("nature").unwrap().is_builtin());
        reg.remove("nature").unwrap();
        assert!(reg.lookup("nature").unwrap().is_builtin());
    }

    #[test]
    fn builtins_are_protected_from_removal() {
        let mut reg = registry();
        let err = reg.remove("tufte").unwrap_err();
        assert_eq!(err.kind(), "ProtectedTemplateError");
    }

    #[test]
    fn register_persists_to_store() {
        let mut reg = registry();
        reg.register(test_template("persisted"), false).unwrap();
        // A registry rebuilt over the same (memory) store would see the
        // custom; here we verify through the registry's own view.
        assert!(reg.list().iter().any(|t| t.name == "persisted"));
    }

    #[test]
    fn capture_derives_palette_and_axes() {
        let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" width="400" height="300">
  <path d="M 40 260 L 360 260" style="fill:none;stroke:#000000;stroke-width:1"/>
  <path d="M 40 20 L 40 260" style="fill:none;stroke:#000000;stroke-width:1"/>
  <rect x="80" y="100" width="40" height="160" style="fill:#4682b4"/>
  <rect x="160" y="140" width="40" height="120" style="fill:#d95f02"/>
  <text x="200" y="16" style="font-family:Georgia;font-size:14px;fill:#000000">Title</text>
  <text x="200" y="290" style="font-family:Georgia;font-size:9px;fill:#000000">x</text>
</svg>"##;
        let doc = crate::document::parse_svg(svg).unwrap();
        let reg = registry();
        let captured = reg.capture(&doc, "from-doc").unwrap();
        let hexes: Vec<String> = captured.palette.colors().iter().map(|c| c.hex()).collect();
        assert!(hexes.contains(&"#4682b4".to_string()));
        assert!(hexes.contains(&"#d95f02".to_string()));
        assert!(captured.axis.keeps(SpineSide::Bottom));
        assert!(captured.axis.keeps(SpineSide::Left));
        assert_eq!(captured.fonts.title.family, "Georgia");
        assert_eq!(captured.fonts.title.size, 14.0);
        assert_eq!(captured.fonts.tick_label.size, 9.0);
    }
}
