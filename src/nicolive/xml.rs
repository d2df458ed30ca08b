//! Minimal XML helpers for the broadcast protocol.
//!
//! The comment server and the metadata API only produce flat, well known
//! documents: a single element per comment frame, and small nested
//! documents for the API. These helpers pull elements, attributes and text
//! out of them without a full XML parser.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

// Patterns are literals; Regex::new cannot fail on them.
static RE_OPEN_TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*<([A-Za-z_][\w.-]*)((?:\s[^>]*?)?)\s*(/?)>").expect("invalid open tag regex")
});
static RE_ATTR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_][\w:.-]*)\s*=\s*"([^"]*)""#).expect("invalid attribute regex")
});
static RE_ENTITY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#x[0-9a-fA-F]+|#[0-9]+|lt|gt|amp|quot|apos);").expect("invalid entity regex")
});

/// One element parsed from a single-element frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    /// Tag name.
    pub name: String,
    /// Attributes, values unescaped.
    pub attrs: HashMap<String, String>,
    /// Unescaped text content (empty for self-closing elements).
    pub text: String,
}

impl Element {
    /// Attribute value, if present.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Attribute parsed as a number. Missing or malformed values yield `None`.
    pub fn attr_num<T: std::str::FromStr>(&self, name: &str) -> Option<T> {
        self.attr(name).and_then(|v| v.trim().parse().ok())
    }
}

/// Parse a frame holding one element such as `<chat no="1">hi</chat>`.
pub fn parse_element(frame: &str) -> Option<Element> {
    let caps = RE_OPEN_TAG.captures(frame)?;
    let whole = caps.get(0)?;
    let name = caps.get(1)?.as_str().to_string();
    let attrs = parse_attrs(caps.get(2).map_or("", |m| m.as_str()));
    let self_closing = caps.get(3).is_some_and(|m| !m.as_str().is_empty());

    let text = if self_closing {
        String::new()
    } else {
        let rest = frame.get(whole.end()..)?;
        let close = format!("</{name}>");
        let end = rest.rfind(&close).unwrap_or(rest.len());
        unescape(rest.get(..end)?)
    };

    Some(Element { name, attrs, text })
}

fn parse_attrs(raw: &str) -> HashMap<String, String> {
    RE_ATTR
        .captures_iter(raw)
        .map(|c| (c[1].to_string(), unescape(&c[2])))
        .collect()
}

/// Inner markup of the first `<tag …>…</tag>` in `doc`.
pub fn section<'a>(doc: &'a str, tag: &str) -> Option<&'a str> {
    let tag = regex::escape(tag);
    let re = Regex::new(&format!(r"(?s)<{tag}(?:\s[^>]*)?>(.*?)</{tag}>")).ok()?;
    re.captures(doc)?.get(1).map(|m| m.as_str())
}

/// Unescaped text of the first `<tag>` in `doc`.
pub fn child_text(doc: &str, tag: &str) -> Option<String> {
    section(doc, tag).map(|s| unescape(s.trim()))
}

/// Attribute of the first `<tag …>` in `doc`.
pub fn root_attr(doc: &str, tag: &str, attr: &str) -> Option<String> {
    let tag = regex::escape(tag);
    let re = Regex::new(&format!(r"<{tag}(\s[^>]*?)?/?>")).ok()?;
    let raw = re.captures(doc)?.get(1).map_or("", |m| m.as_str());
    parse_attrs(raw).remove(attr)
}

/// Escape text for use in element content or attribute values.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Replace the predefined entities and numeric character references.
/// Unknown or invalid references are left as-is.
pub fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    RE_ENTITY
        .replace_all(text, |caps: &Captures<'_>| {
            let entity = &caps[1];
            let decoded = match entity {
                "lt" => Some('<'),
                "gt" => Some('>'),
                "amp" => Some('&'),
                "quot" => Some('"'),
                "apos" => Some('\''),
                _ => entity
                    .strip_prefix("#x")
                    .map(|hex| u32::from_str_radix(hex, 16))
                    .unwrap_or_else(|| entity.trim_start_matches('#').parse())
                    .ok()
                    .and_then(char::from_u32),
            };
            decoded.map_or_else(|| caps[0].to_string(), String::from)
        })
        .into_owned()
}
