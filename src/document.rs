//! Parsed SVG document tree.
//!
//! The engine operates purely on this attribute/style tree: elements with
//! a tag name, an ordered attribute map, and ordered children. Parsing
//! goes through roxmltree and is lowered into this mutable shape; the
//! serializer writes it back without introducing whitespace, so an
//! untouched tree round-trips stably.
//!
//! Namespace declarations are re-emitted on the root element; nested
//! re-declarations (rare in SVG output) are not preserved.

use indexmap::IndexMap;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub root: Element,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Element(Element),
    Text(String),
    Comment(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub tag: String,
    pub attrs: IndexMap<String, String>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            attrs: IndexMap::new(),
            children: Vec::new(),
        }
    }

    /// Tag name without a namespace prefix.
    pub fn local_tag(&self) -> &str {
        self.tag.rsplit(':').next().unwrap_or(&self.tag)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        self.attrs.insert(name.to_string(), value.into());
    }

    pub fn id(&self) -> Option<&str> {
        self.attr("id")
    }

    /// Short human label for issue reporting: `tag#id` or `tag`.
    pub fn label(&self) -> String {
        match self.id() {
            Some(id) => format!("{}#{}", self.tag, id),
            None => self.tag.clone(),
        }
    }

    /// Parsed declarations of the `style` attribute, in order.
    ///
    /// `Err` carries a description when a non-empty declaration has no
    /// `property:value` shape; callers record it per element instead of
    /// failing the walk.
    pub fn style_decls(&self) -> std::result::Result<Vec<(String, String)>, String> {
        let Some(style) = self.attr("style") else {
            return Ok(Vec::new());
        };
        let mut decls = Vec::new();
        for part in style.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            match part.split_once(':') {
                Some((k, v)) => decls.push((k.trim().to_string(), v.trim().to_string())),
                None => return Err(format!("malformed style declaration: '{part}'")),
            }
        }
        Ok(decls)
    }

    /// Value of a style property, looked up in the `style` attribute
    /// first, then in the matching presentation attribute.
    pub fn style_prop(&self, prop: &str) -> Option<String> {
        if let Ok(decls) = self.style_decls() {
            if let Some((_, v)) = decls.iter().find(|(k, _)| k == prop) {
                return Some(v.clone());
            }
        }
        self.attr(prop).map(str::to_string)
    }

    /// Set a style property wherever the element currently carries it:
    /// in the `style` attribute when present, else on an existing
    /// presentation attribute, else appended to (or creating) `style`.
    ///
    /// Returns true when the effective value changed.
    pub fn set_style_prop(&mut self, prop: &str, value: &str) -> bool {
        if self.attrs.contains_key("style") {
            let mut decls = match self.style_decls() {
                Ok(d) => d,
                Err(_) => return false,
            };
            let mut changed = false;
            let mut found = false;
            for (k, v) in &mut decls {
                if k == prop {
                    found = true;
                    if v != value {
                        *v = value.to_string();
                        changed = true;
                    }
                }
            }
            if !found {
                // A presentation attribute may still carry the property.
                if let Some(existing) = self.attrs.get_mut(prop) {
                    if existing != value {
                        *existing = value.to_string();
                        return true;
                    }
                    return false;
                }
                decls.push((prop.to_string(), value.to_string()));
                changed = true;
            }
            if changed {
                let style = decls
                    .iter()
                    .map(|(k, v)| format!("{k}:{v}"))
                    .collect::<Vec<_>>()
                    .join(";");
                self.attrs.insert("style".to_string(), style);
            }
            changed
        } else if let Some(existing) = self.attrs.get_mut(prop) {
            if existing != value {
                *existing = value.to_string();
                true
            } else {
                false
            }
        } else {
            self.attrs
                .insert("style".to_string(), format!("{prop}:{value}"));
            true
        }
    }

    /// Depth-first walk over this element and all element descendants.
    pub fn walk<F: FnMut(&Element)>(&self, f: &mut F) {
        f(self);
        for child in &self.children {
            if let Node::Element(e) = child {
                e.walk(f);
            }
        }
    }

    pub fn walk_mut<F: FnMut(&mut Element)>(&mut self, f: &mut F) {
        f(self);
        for child in &mut self.children {
            if let Node::Element(e) = child {
                e.walk_mut(f);
            }
        }
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
    }

    /// Concatenated text content of this element's subtree.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        fn collect(e: &Element, out: &mut String) {
            for child in &e.children {
                match child {
                    Node::Text(t) => out.push_str(t),
                    Node::Element(c) => collect(c, out),
                    Node::Comment(_) => {}
                }
            }
        }
        collect(self, &mut out);
        out
    }
}

impl Document {
    /// Canvas size from the root `width`/`height` attributes, falling
    /// back to the `viewBox` when they are absent or unparseable.
    pub fn canvas_size(&self) -> Option<(f64, f64)> {
        let w = self.root.attr("width").map(parse_dimension).unwrap_or(0.0);
        let h = self.root.attr("height").map(parse_dimension).unwrap_or(0.0);
        if w > 0.0 && h > 0.0 {
            return Some((w, h));
        }
        let vb = self.root.attr("viewBox")?;
        let parts: Vec<f64> = vb
            .split_whitespace()
            .filter_map(|p| p.parse().ok())
            .collect();
        if parts.len() == 4 && parts[2] > 0.0 && parts[3] > 0.0 {
            Some((parts[2], parts[3]))
        } else {
            None
        }
    }
}

/// Parse a dimension value like `100`, `100px`, `50mm`. Returns 0.0 for
/// anything unparseable.
pub fn parse_dimension(value: &str) -> f64 {
    let v = value.trim();
    let numeric: String = v
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.' || *c == '-' || *c == '+')
        .collect();
    numeric.parse().unwrap_or(0.0)
}

// ---------------------------------------------------------------------
// Parsing (roxmltree lowered into the mutable tree)
// ---------------------------------------------------------------------

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

pub fn parse_svg(text: &str) -> Result<Document> {
    let rx = roxmltree::Document::parse(text).map_err(|e| Error::DocumentParse(e.to_string()))?;
    let root_node = rx.root_element();
    let mut root = lower(root_node);

    // Re-emit in-scope namespace declarations on the root, default first.
    let mut ns_attrs: Vec<(String, String)> = Vec::new();
    for ns in root_node.namespaces() {
        if ns.uri() == XML_NS {
            continue;
        }
        match ns.name() {
            None => ns_attrs.insert(0, ("xmlns".to_string(), ns.uri().to_string())),
            Some(prefix) => ns_attrs.push((format!("xmlns:{prefix}"), ns.uri().to_string())),
        }
    }
    let mut attrs = IndexMap::new();
    for (k, v) in ns_attrs {
        attrs.insert(k, v);
    }
    for (k, v) in root.attrs {
        attrs.insert(k, v);
    }
    root.attrs = attrs;

    Ok(Document { root })
}

fn lower(node: roxmltree::Node<'_, '_>) -> Element {
    let mut elem = Element::new(qualified_tag(&node));

    for attr in node.attributes() {
        let name = match attr.namespace() {
            Some(ns) if ns != XML_NS => match node.lookup_prefix(ns) {
                Some(prefix) if !prefix.is_empty() => format!("{prefix}:{}", attr.name()),
                _ => attr.name().to_string(),
            },
            Some(_) => format!("xml:{}", attr.name()),
            None => attr.name().to_string(),
        };
        elem.attrs.insert(name, attr.value().to_string());
    }

    for child in node.children() {
        match child.node_type() {
            roxmltree::NodeType::Element => {
                elem.children.push(Node::Element(lower(child)));
            }
            roxmltree::NodeType::Text => {
                if let Some(t) = child.text() {
                    elem.children.push(Node::Text(t.to_string()));
                }
            }
            roxmltree::NodeType::Comment => {
                if let Some(t) = child.text() {
                    elem.children.push(Node::Comment(t.to_string()));
                }
            }
            _ => {}
        }
    }

    elem
}

fn qualified_tag(node: &roxmltree::Node<'_, '_>) -> String {
    let name = node.tag_name().name();
    match node.tag_name().namespace() {
        Some(ns) => match node.lookup_prefix(ns) {
            Some(prefix) if !prefix.is_empty() => format!("{prefix}:{name}"),
            _ => name.to_string(),
        },
        None => name.to_string(),
    }
}

// ---------------------------------------------------------------------
// Serialization
// ---------------------------------------------------------------------

pub fn serialize(doc: &Document) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    write_element(&doc.root, &mut out);
    out.push('\n');
    out
}

fn write_element(elem: &Element, out: &mut String) {
    out.push('<');
    out.push_str(&elem.tag);
    for (k, v) in &elem.attrs {
        out.push(' ');
        out.push_str(k);
        out.push_str("=\"");
        out.push_str(&escape_attr(v));
        out.push('"');
    }
    if elem.children.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in &elem.children {
        match child {
            Node::Element(e) => write_element(e, out),
            Node::Text(t) => out.push_str(&escape_text(t)),
            Node::Comment(t) => {
                out.push_str("<!--");
                out.push_str(t);
                out.push_str("-->");
            }
        }
    }
    out.push_str("</");
    out.push_str(&elem.tag);
    out.push('>');
}

fn escape_text(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

fn escape_attr(s: &str) -> String {
    escape_text(s).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: &str = r##"<?xml version="1.0" encoding="UTF-8"?>
<svg xmlns="http://www.w3.org/2000/svg" width="800" height="600" viewBox="0 0 800 600">
  <rect id="bg" x="0" y="0" width="800" height="600" style="fill:#ffffff"/>
  <text id="title" x="100" y="50" style="font-family:Arial;font-size:14px">Title</text>
</svg>"##;

    #[test]
    fn parse_and_query() {
        let doc = parse_svg(SIMPLE).unwrap();
        assert_eq!(doc.root.local_tag(), "svg");
        assert_eq!(doc.canvas_size(), Some((800.0, 600.0)));
        let rect = doc.root.child_elements().next().unwrap();
        assert_eq!(rect.id(), Some("bg"));
        assert_eq!(rect.style_prop("fill").as_deref(), Some("#ffffff"));
    }

    #[test]
    fn malformed_input_is_parse_error() {
        let err = parse_svg("<svg><rect</svg>").unwrap_err();
        assert_eq!(err.kind(), "DocumentParseError");
    }

    #[test]
    fn style_prop_prefers_style_attr() {
        let mut e = Element::new("rect");
        e.set_attr("fill", "#ff0000");
        e.set_attr("style", "fill:#00ff00");
        assert_eq!(e.style_prop("fill").as_deref(), Some("#00ff00"));
    }

    #[test]
    fn set_style_prop_updates_in_place() {
        let mut e = Element::new("rect");
        e.set_attr("style", "fill:#ffffff;stroke:none");
        assert!(e.set_style_prop("fill", "#2171b5"));
        assert_eq!(e.attr("style"), Some("fill:#2171b5;stroke:none"));
        // Second write of the same value is a no-op.
        assert!(!e.set_style_prop("fill", "#2171b5"));
    }

    #[test]
    fn set_style_prop_on_presentation_attr() {
        let mut e = Element::new("rect");
        e.set_attr("fill", "#ff0000");
        assert!(e.set_style_prop("fill", "#2171b5"));
        assert_eq!(e.attr("fill"), Some("#2171b5"));
        assert!(e.attr("style").is_none());
    }

    #[test]
    fn malformed_style_reported() {
        let mut e = Element::new("rect");
        e.set_attr("style", "fill#broken");
        assert!(e.style_decls().is_err());
    }

    #[test]
    fn dimension_parsing() {
        assert_eq!(parse_dimension("100"), 100.0);
        assert_eq!(parse_dimension("100px"), 100.0);
        assert_eq!(parse_dimension("50mm"), 50.0);
        assert_eq!(parse_dimension("123.456"), 123.456);
        assert_eq!(parse_dimension(""), 0.0);
        assert_eq!(parse_dimension("abc"), 0.0);
    }

    #[test]
    fn serialization_is_stable() {
        let doc = parse_svg(SIMPLE).unwrap();
        let once = serialize(&doc);
        let again = serialize(&parse_svg(&once).unwrap());
        assert_eq!(once, again);
    }

    #[test]
    fn canvas_size_from_viewbox() {
        let doc = parse_svg(r#"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 640 480"/>"#)
            .unwrap();
        assert_eq!(doc.canvas_size(), Some((640.0, 480.0)));
    }
}
