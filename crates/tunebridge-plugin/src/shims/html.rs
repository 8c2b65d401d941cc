//! Native backing for the `cheerio` shim.
//!
//! A selection on the JavaScript side is a list of [`HtmlNode`]s. Each node
//! carries its outer HTML, so every follow-up query re-parses that fragment.

use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::PluginError;

/// One element handed to plugin code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HtmlNode {
    pub html: String,
    pub name: String,
    pub attribs: Map<String, Value>,
}

impl HtmlNode {
    fn from_element(element: ElementRef<'_>) -> Self {
        let attribs = element
            .value()
            .attrs()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        Self {
            html: element.html(),
            name: element.value().name().to_string(),
            attribs,
        }
    }
}

fn parse_selector(selector: &str) -> Result<Selector, PluginError> {
    Selector::parse(selector)
        .map_err(|e| PluginError::Execution(format!("Invalid CSS selector '{selector}': {e}")))
}

/// Run `f` on the single top-level element of `fragment`.
fn with_fragment_root<T>(fragment: &str, f: impl FnOnce(ElementRef<'_>) -> T) -> Option<T> {
    let parsed = Html::parse_fragment(fragment);
    let root = parsed.root_element();
    let top = root.children().find_map(ElementRef::wrap)?;
    Some(f(top))
}

/// `$(selector)` against a whole document.
pub fn select_document(document: &str, selector: &str) -> Result<Vec<HtmlNode>, PluginError> {
    let selector = parse_selector(selector)?;
    let parsed = Html::parse_document(document);
    Ok(parsed.select(&selector).map(HtmlNode::from_element).collect())
}

/// `.find(selector)`: descendants of every fragment, in order.
pub fn find(fragments: &[String], selector: &str) -> Result<Vec<HtmlNode>, PluginError> {
    let selector = parse_selector(selector)?;
    let mut out = Vec::new();
    for fragment in fragments {
        if let Some(found) = with_fragment_root(fragment, |top| {
            top.select(&selector)
                .map(HtmlNode::from_element)
                .collect::<Vec<_>>()
        }) {
            out.extend(found);
        }
    }
    Ok(out)
}

/// `.children(selector?)`: direct element children, optionally filtered.
pub fn children(fragments: &[String], selector: Option<&str>) -> Result<Vec<HtmlNode>, PluginError> {
    let selector = selector
        .filter(|s| !s.trim().is_empty())
        .map(parse_selector)
        .transpose()?;
    let mut out = Vec::new();
    for fragment in fragments {
        if let Some(found) = with_fragment_root(fragment, |top| {
            top.children()
                .filter_map(ElementRef::wrap)
                .filter(|child| selector.as_ref().map_or(true, |s| s.matches(child)))
                .map(HtmlNode::from_element)
                .collect::<Vec<_>>()
        }) {
            out.extend(found);
        }
    }
    Ok(out)
}

/// Combined text content, like cheerio's `.text()`.
pub fn text(fragments: &[String]) -> String {
    fragments
        .iter()
        .filter_map(|fragment| with_fragment_root(fragment, |top| top.text().collect::<String>()))
        .collect()
}

/// Inner HTML of the first fragment.
pub fn inner_html(fragment: &str) -> Option<String> {
    with_fragment_root(fragment, |top| top.inner_html())
}

/// Text content of a whole document (`$.text()`).
pub fn document_text(document: &str) -> String {
    Html::parse_document(document)
        .root_element()
        .text()
        .collect()
}
