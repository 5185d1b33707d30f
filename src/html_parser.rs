use anyhow::{Context, Result};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{parse_document, Attribute, ParseOpts};
use markup5ever_rcdom::{Handle, NodeData, RcDom};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::rc::Rc;
use std::sync::OnceLock;
use url::Url;

use crate::naming::{authority, page_filename, strip_fragment};
use crate::serializer::to_pretty_html;

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Schemes that never point at something downloadable.
const PSEUDO_SCHEMES: &[&str] = &["data:", "mailto:", "javascript:", "tel:", "about:", "blob:"];

/// How the value of an attribute holds its URLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeKind {
    /// The whole value is one URL.
    Url,
    /// A `srcset` list: `url descriptor, url descriptor, ...`
    SrcSet,
    /// Inline CSS; every `url(...)` token is a URL.
    InlineStyle,
}

/// Extra condition an element must satisfy before its attribute counts as an
/// asset reference.
#[derive(Debug, Clone, Copy)]
pub enum AttributeFilter {
    Always,
    /// One of the element's `rel` tokens is in the list.
    RelAnyOf(&'static [&'static str]),
    /// The attribute value ends with one of the suffixes.
    SuffixAnyOf(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct AssetAttribute {
    /// Element name, or `*` for any element.
    pub element: &'static str,
    pub attribute: &'static str,
    pub kind: AttributeKind,
    pub filter: AttributeFilter,
}

const ASSET_LINK_RELS: &[&str] = &[
    "stylesheet",
    "icon",
    "apple-touch-icon",
    "apple-touch-icon-precomposed",
    "mask-icon",
    "manifest",
    "preload",
    "modulepreload",
];

const ASSET_META_SUFFIXES: &[&str] = &[".webmanifest", ".xml", ".json", ".ico", ".svg"];

const fn asset(
    element: &'static str,
    attribute: &'static str,
    kind: AttributeKind,
    filter: AttributeFilter,
) -> AssetAttribute {
    AssetAttribute {
        element,
        attribute,
        kind,
        filter,
    }
}

/// Every attribute that points at a resource the page needs to render.
pub const ASSET_ATTRIBUTES: &[AssetAttribute] = &[
    asset("link", "href", AttributeKind::Url, AttributeFilter::RelAnyOf(ASSET_LINK_RELS)),
    asset("script", "src", AttributeKind::Url, AttributeFilter::Always),
    asset("img", "src", AttributeKind::Url, AttributeFilter::Always),
    asset("img", "srcset", AttributeKind::SrcSet, AttributeFilter::Always),
    asset("source", "src", AttributeKind::Url, AttributeFilter::Always),
    asset("source", "srcset", AttributeKind::SrcSet, AttributeFilter::Always),
    asset("video", "src", AttributeKind::Url, AttributeFilter::Always),
    asset("video", "poster", AttributeKind::Url, AttributeFilter::Always),
    asset("audio", "src", AttributeKind::Url, AttributeFilter::Always),
    asset("track", "src", AttributeKind::Url, AttributeFilter::Always),
    asset("iframe", "src", AttributeKind::Url, AttributeFilter::Always),
    asset("embed", "src", AttributeKind::Url, AttributeFilter::Always),
    asset("object", "data", AttributeKind::Url, AttributeFilter::Always),
    asset("meta", "content", AttributeKind::Url, AttributeFilter::SuffixAnyOf(ASSET_META_SUFFIXES)),
    asset("*", "style", AttributeKind::InlineStyle, AttributeFilter::Always),
];

/// Attributes that navigate to another page of the site.
pub const NAVIGATION_ATTRIBUTES: &[(&str, &str)] = &[
    ("a", "href"),
    ("area", "href"),
    ("form", "action"),
    ("iframe", "src"),
    ("script", "src"),
    ("link", "href"),
];

/// One resource mentioned by a document, found during the asset pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetReference {
    /// Absolute URL, fragment removed.
    pub url: Url,
    pub element: String,
    pub attribute: &'static str,
    pub kind: AttributeKind,
}

/// A fetched HTML page, parsed and ready to be rewritten.
pub struct PageDocument {
    url: Url,
    base_url: Url,
    dom: RcDom,
    claimed: HashSet<(usize, &'static str)>,
}

impl PageDocument {
    /// Parses `html` fetched from `url`. Relative references resolve against
    /// `final_url` (where redirects ended up), or against the document's own
    /// `<base href>` when it has one.
    pub fn parse(url: Url, final_url: Url, html: &str) -> Self {
        let dom = parse_document(RcDom::default(), ParseOpts::default())
            .one(StrTendril::from_slice(html));

        let mut document = Self {
            url,
            base_url: final_url,
            dom,
            claimed: HashSet::new(),
        };
        document.adopt_base_href();
        document
    }

    /// The URL this page was requested as. Its saved file name derives from it.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn filename(&self) -> String {
        page_filename(&self.url)
    }

    /// Lists every asset reference in document order.
    ///
    /// Attributes that yield at least one reference are remembered so the
    /// navigation pass leaves them alone, whether or not the download later
    /// succeeds.
    pub fn asset_references(&mut self) -> Vec<AssetReference> {
        let mut references = Vec::new();

        for element in self.elements() {
            let Some(tag) = element_name(&element) else {
                continue;
            };

            for rule in ASSET_ATTRIBUTES.iter().filter(|s| s.element == "*" || s.element == tag) {
                let Some(value) = attribute_value(&element, rule.attribute) else {
                    continue;
                };
                if !passes_filter(&element, &value, rule.filter) {
                    continue;
                }

                let before = references.len();
                for span in url_spans(rule.kind, &value) {
                    if let Some(url) = self.resolve_asset(&value[span]) {
                        references.push(AssetReference {
                            url: strip_fragment(&url),
                            element: tag.clone(),
                            attribute: rule.attribute,
                            kind: rule.kind,
                        });
                    }
                }

                if references.len() > before {
                    self.claimed.insert((node_key(&element), rule.attribute));
                }
            }
        }

        references
    }

    /// Points every asset reference found in `localized` at its local copy.
    ///
    /// `localized` maps an absolute asset URL (without fragment) to the path
    /// it should be referenced by. References missing from the map keep
    /// their remote value. Returns the number of URLs rewritten.
    pub fn rewrite_assets(&self, localized: &HashMap<String, String>) -> usize {
        let mut rewritten = 0;

        for element in self.elements() {
            let Some(tag) = element_name(&element) else {
                continue;
            };

            for rule in ASSET_ATTRIBUTES.iter().filter(|s| s.element == "*" || s.element == tag) {
                let Some(value) = attribute_value(&element, rule.attribute) else {
                    continue;
                };
                if !passes_filter(&element, &value, rule.filter) {
                    continue;
                }

                let mut replacements = Vec::new();
                for span in url_spans(rule.kind, &value) {
                    let Some(url) = self.resolve_asset(&value[span.clone()]) else {
                        continue;
                    };
                    if let Some(local) = localized.get(strip_fragment(&url).as_str()) {
                        replacements.push((span, with_fragment(local, &url)));
                    }
                }

                if !replacements.is_empty() {
                    rewritten += replacements.len();
                    set_attribute(&element, rule.attribute, &replace_spans(&value, replacements));
                }
            }
        }

        rewritten
    }

    /// Same-domain pages this document links to with `<a href>`, resolved,
    /// fragment stripped, in document order. Duplicates are kept; the
    /// frontier discards them.
    pub fn internal_links(&self, domain: Option<&str>) -> Vec<Url> {
        self.elements()
            .iter()
            .filter(|element| element_name(element).as_deref() == Some("a"))
            .filter_map(|element| attribute_value(element, "href"))
            .filter_map(|href| self.resolve_navigation(&href))
            .filter(|url| authority(url).as_deref() == domain)
            .map(|url| strip_fragment(&url))
            .collect()
    }

    /// Rewrites same-domain navigation attributes to the file name the target
    /// page is saved under. Cross-domain targets, pseudo-URLs and attributes
    /// claimed by the asset pass are untouched. Returns the number rewritten.
    pub fn rewrite_navigation(&self, domain: Option<&str>) -> usize {
        let mut rewritten = 0;

        for element in self.elements() {
            let Some(tag) = element_name(&element) else {
                continue;
            };

            for &(_, attribute) in NAVIGATION_ATTRIBUTES.iter().filter(|(e, _)| *e == tag) {
                if self.claimed.contains(&(node_key(&element), attribute)) {
                    continue;
                }
                let Some(value) = attribute_value(&element, attribute) else {
                    continue;
                };
                let Some(target) = self.resolve_navigation(&value) else {
                    continue;
                };
                if authority(&target).as_deref() != domain {
                    continue;
                }

                let local = page_filename(&target).replace('%', "%25");
                set_attribute(&element, attribute, &with_fragment(&local, &target));
                rewritten += 1;
            }
        }

        rewritten
    }

    /// Indented HTML for the current state of the document.
    pub fn to_html(&self) -> String {
        to_pretty_html(&self.dom.document)
    }

    fn adopt_base_href(&mut self) {
        let base = self
            .elements()
            .into_iter()
            .find(|e| {
                element_name(e).as_deref() == Some("base") && attribute_value(e, "href").is_some()
            });

        if let Some(element) = base {
            if let Some(href) = attribute_value(&element, "href") {
                if let Ok(url) = self.resolve_url(&href) {
                    self.base_url = url;
                }
            }
            remove_attribute(&element, "href");
        }
    }

    fn resolve_url(&self, url: &str) -> Result<Url> {
        self.base_url
            .join(url.trim())
            .with_context(|| format!("Failed to resolve {} against {}", url, self.base_url))
    }

    fn resolve_asset(&self, raw: &str) -> Option<Url> {
        if is_skippable(raw) {
            return None;
        }
        self.resolve_url(raw)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
    }

    fn resolve_navigation(&self, raw: &str) -> Option<Url> {
        if is_skippable(raw) {
            return None;
        }
        self.resolve_url(raw).ok()
    }

    fn elements(&self) -> Vec<Handle> {
        let mut elements = Vec::new();
        collect_elements(&self.dom.document, &mut elements);
        elements
    }
}

/// True for values that must never be fetched or rewritten.
pub fn is_pseudo_url(value: &str) -> bool {
    let value = value.trim_start().to_ascii_lowercase();
    PSEUDO_SCHEMES.iter().any(|scheme| value.starts_with(scheme))
}

fn is_skippable(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || value.starts_with('#') || is_pseudo_url(value)
}

/// Byte ranges of the URL tokens inside an attribute value.
pub fn url_spans(kind: AttributeKind, value: &str) -> Vec<Range<usize>> {
    match kind {
        AttributeKind::Url => {
            let start = value.len() - value.trim_start().len();
            let end = value.trim_end().len();
            if start < end {
                vec![start..end]
            } else {
                Vec::new()
            }
        }
        AttributeKind::SrcSet => srcset_spans(value),
        AttributeKind::InlineStyle => css_url_regex()
            .map(|regex| {
                regex
                    .captures_iter(value)
                    .filter_map(|cap| cap.get(1))
                    .map(|m| m.range())
                    .collect()
            })
            .unwrap_or_default(),
    }
}

/// Splits a `srcset` value the way browsers do: a URL runs until whitespace,
/// descriptors run until the next comma. Only URL ranges are returned, so
/// descriptors and separators survive a rewrite byte for byte.
fn srcset_spans(value: &str) -> Vec<Range<usize>> {
    let bytes = value.as_bytes();
    let mut spans = Vec::new();
    let mut pos = 0;

    while pos < bytes.len() {
        while pos < bytes.len() && (bytes[pos].is_ascii_whitespace() || bytes[pos] == b',') {
            pos += 1;
        }
        if pos >= bytes.len() {
            break;
        }

        let start = pos;
        while pos < bytes.len() && !bytes[pos].is_ascii_whitespace() {
            pos += 1;
        }
        let mut end = pos;
        let bare = bytes[end - 1] == b',';
        while end > start && bytes[end - 1] == b',' {
            end -= 1;
        }
        if end > start {
            spans.push(start..end);
        }
        if bare {
            continue;
        }

        let mut depth = 0usize;
        while pos < bytes.len() {
            match bytes[pos] {
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                b',' if depth == 0 => break,
                _ => {}
            }
            pos += 1;
        }
    }

    spans
}

fn css_url_regex() -> Option<&'static Regex> {
    static CSS_URL: OnceLock<Option<Regex>> = OnceLock::new();
    CSS_URL
        .get_or_init(|| Regex::new(r#"url\(\s*['"]?([^'")\s]+)['"]?\s*\)"#).ok())
        .as_ref()
}

fn replace_spans(value: &str, mut replacements: Vec<(Range<usize>, String)>) -> String {
    replacements.sort_by_key(|(span, _)| span.start);
    let mut result = String::with_capacity(value.len());
    let mut cursor = 0;
    for (span, replacement) in replacements {
        result.push_str(&value[cursor..span.start]);
        result.push_str(&replacement);
        cursor = span.end;
    }
    result.push_str(&value[cursor..]);
    result
}

fn with_fragment(local: &str, url: &Url) -> String {
    match url.fragment() {
        Some(fragment) => format!("{}#{}", local, fragment),
        None => local.to_string(),
    }
}

fn passes_filter(element: &Handle, value: &str, filter: AttributeFilter) -> bool {
    match filter {
        AttributeFilter::Always => true,
        AttributeFilter::RelAnyOf(rels) => attribute_value(element, "rel")
            .map(|rel| {
                rel.to_ascii_lowercase()
                    .split_ascii_whitespace()
                    .any(|token| rels.contains(&token))
            })
            .unwrap_or(false),
        AttributeFilter::SuffixAnyOf(suffixes) => {
            let value = value.trim().to_ascii_lowercase();
            suffixes.iter().any(|suffix| value.ends_with(suffix))
        }
    }
}

fn collect_elements(node: &Handle, out: &mut Vec<Handle>) {
    if let NodeData::Element {
        template_contents, ..
    } = &node.data
    {
        out.push(node.clone());
        if let Some(contents) = template_contents.borrow().as_ref() {
            collect_elements(contents, out);
        }
    }
    for child in node.children.borrow().iter() {
        collect_elements(child, out);
    }
}

fn element_name(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Element { name, .. } if &*name.ns == HTML_NAMESPACE => {
            Some(name.local.to_string())
        }
        _ => None,
    }
}

fn node_key(node: &Handle) -> usize {
    Rc::as_ptr(node) as usize
}

fn is_plain_attribute(attr: &Attribute, name: &str) -> bool {
    attr.name.prefix.is_none() && &*attr.name.local == name
}

fn attribute_value(node: &Handle, name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|attr| is_plain_attribute(attr, name))
            .map(|attr| attr.value.to_string()),
        _ => None,
    }
}

fn set_attribute(node: &Handle, name: &str, value: &str) {
    if let NodeData::Element { attrs, .. } = &node.data {
        if let Some(attr) = attrs
            .borrow_mut()
            .iter_mut()
            .find(|attr| is_plain_attribute(attr, name))
        {
            attr.value = StrTendril::from_slice(value);
        }
    }
}

fn remove_attribute(node: &Handle, name: &str) {
    if let NodeData::Element { attrs, .. } = &node.data {
        attrs.borrow_mut().retain(|attr| !is_plain_attribute(attr, name));
    }
}
