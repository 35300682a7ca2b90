//! Rich lyric documents
//!
//! A rich lyric document is HTML in which section elements carry a
//! `data-time` attribute holding a zero-padded `MMSS` code. The section
//! shown for a playback position is the latest timed element whose code is
//! not after the position's code. Elements may be scoped to a voice part by
//! carrying the part name as a class; multi-part wrappers carry the `parts`
//! class.

use std::borrow::Cow;

use tl::{HTMLTag, Node, NodeHandle, Parser, ParserOptions};
use tracing::debug;

use crate::lyrics::{format_mmss, is_mmss};
use crate::model::{RichLyricSource, VoicePart};
use crate::{Error, Result};

/// Attribute holding the `MMSS` timing code
pub const TIMING_ATTRIBUTE: &str = "data-time";

/// Class marking a wrapper around several voice-part elements
pub const PARTS_WRAPPER_CLASS: &str = "parts";

const VOID_ELEMENTS: [&str; 8] = ["br", "hr", "img", "input", "meta", "link", "wbr", "source"];

/// One timed element of the document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimedSection {
    /// `MMSS` code from the timing attribute
    pub time: String,
    /// Outer HTML of the element
    pub html: String,
}

/// Parsed document: timed sections in document order
#[derive(Debug, Clone)]
pub struct RichLyricDocument {
    sections: Vec<TimedSection>,
}

impl RichLyricDocument {
    /// Parse document text, collecting every element with a valid timing code
    pub fn parse(text: &str) -> Result<Self> {
        let dom = tl::parse(text, ParserOptions::new())
            .map_err(|e| Error::RichDocumentParse(format!("{:?}", e)))?;
        let parser = dom.parser();

        let mut sections = Vec::new();
        collect_sections(dom.children(), parser, &mut sections);

        if sections.is_empty() {
            return Err(Error::RichDocumentParse(format!(
                "no element carries a {} attribute",
                TIMING_ATTRIBUTE
            )));
        }

        debug!("Parsed rich lyric document with {} timed sections", sections.len());
        Ok(Self { sections })
    }

    pub fn sections(&self) -> &[TimedSection] {
        &self.sections
    }

    /// Index of the section shown at `position` (seconds)
    ///
    /// Codes are fixed-width digit strings, so string comparison orders them
    /// by time. Equal codes resolve to the later element.
    pub fn current_section(&self, position: f64) -> Option<usize> {
        let now = format_mmss(position);
        let mut best: Option<usize> = None;
        for (i, section) in self.sections.iter().enumerate() {
            if section.time.as_str() <= now.as_str() {
                match best {
                    Some(b) if self.sections[b].time > section.time => {}
                    _ => best = Some(i),
                }
            }
        }
        best
    }

    /// Render a section, optionally keeping only one voice part
    ///
    /// With a filter, elements scoped to another voice part are removed, as is
    /// any `parts` wrapper left without a matching voice-part element.
    pub fn render_section(&self, index: usize, filter: Option<VoicePart>) -> Option<String> {
        let section = self.sections.get(index)?;
        let Some(part) = filter else {
            return Some(section.html.clone());
        };

        let dom = tl::parse(&section.html, ParserOptions::new()).ok()?;
        let parser = dom.parser();
        let mut out = String::with_capacity(section.html.len());
        for handle in dom.children() {
            if let Some(rendered) = render_node(handle, parser, part) {
                out.push_str(&rendered.html);
            }
        }
        Some(out)
    }

    /// Convenience: render whatever section is current at `position`
    pub fn render_at(&self, position: f64, filter: Option<VoicePart>) -> Option<String> {
        self.current_section(position)
            .and_then(|i| self.render_section(i, filter))
    }
}

/// Retrieve a document by URL
pub async fn fetch_rich_lyrics(client: &reqwest::Client, url: &str) -> Result<String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::RichDocumentFetch(format!("{}: {}", url, e)))?;
    let response = response
        .error_for_status()
        .map_err(|e| Error::RichDocumentFetch(format!("{}: {}", url, e)))?;
    response
        .text()
        .await
        .map_err(|e| Error::RichDocumentFetch(format!("{}: {}", url, e)))
}

/// Resolve a song's rich lyric source into a parsed document
pub async fn load_rich_lyrics(
    client: &reqwest::Client,
    source: &RichLyricSource,
) -> Result<RichLyricDocument> {
    match source {
        RichLyricSource::Inline(text) => RichLyricDocument::parse(text),
        RichLyricSource::Url(url) => {
            let text = fetch_rich_lyrics(client, url).await?;
            RichLyricDocument::parse(&text)
        }
    }
}

fn collect_sections(children: &[NodeHandle], parser: &Parser<'_>, out: &mut Vec<TimedSection>) {
    for handle in children {
        let Some(node) = handle.get(parser) else {
            continue;
        };
        if let Node::Tag(tag) = node {
            if let Some(time) = attr(tag, TIMING_ATTRIBUTE) {
                let time = time.trim();
                if is_mmss(time) {
                    out.push(TimedSection {
                        time: time.to_string(),
                        html: tag.outer_html(parser),
                    });
                }
            }
        }
        if let Some(children) = node.children() {
            collect_sections(&children.top().to_vec(), parser, out);
        }
    }
}

fn attr<'a>(tag: &'a HTMLTag<'_>, name: &'static str) -> Option<Cow<'a, str>> {
    tag.attributes()
        .get(name)
        .flatten()
        .map(|v| v.as_utf8_str())
}

fn voice_parts_of(tag: &HTMLTag<'_>) -> Vec<VoicePart> {
    attr(tag, "class")
        .map(|classes| {
            classes
                .split_whitespace()
                .filter_map(|c| c.parse::<VoicePart>().ok())
                .collect()
        })
        .unwrap_or_default()
}

fn has_class(tag: &HTMLTag<'_>, class: &str) -> bool {
    attr(tag, "class")
        .map(|classes| classes.split_whitespace().any(|c| c.eq_ignore_ascii_case(class)))
        .unwrap_or(false)
}

struct Rendered {
    html: String,
    /// Kept elements scoped to the filtered voice part (self or descendants)
    matching_parts: usize,
}

fn render_node(handle: &NodeHandle, parser: &Parser<'_>, part: VoicePart) -> Option<Rendered> {
    match handle.get(parser)? {
        Node::Raw(text) => Some(Rendered {
            html: text.as_utf8_str().into_owned(),
            matching_parts: 0,
        }),
        Node::Comment(_) => None,
        Node::Tag(tag) => render_tag(tag, parser, part),
    }
}

fn render_tag(tag: &HTMLTag<'_>, parser: &Parser<'_>, part: VoicePart) -> Option<Rendered> {
    let parts = voice_parts_of(tag);
    if !parts.is_empty() && !parts.contains(&part) {
        return None;
    }
    let mut matching_parts = usize::from(!parts.is_empty());

    let name = tag.name().as_utf8_str().into_owned();
    let mut html = String::new();
    html.push('<');
    html.push_str(&name);
    for key in ["id", "class"] {
        if let Some(value) = attr(tag, key) {
            push_attribute(&mut html, key, Some(&value));
        }
    }
    for (key, value) in tag.attributes().iter() {
        if key == "id" || key == "class" {
            continue;
        }
        push_attribute(&mut html, &key, value.as_deref());
    }
    html.push('>');

    if VOID_ELEMENTS.contains(&name.to_ascii_lowercase().as_str()) {
        return Some(Rendered { html, matching_parts });
    }

    let mut inner_parts = 0;
    for child in tag.children().top().to_vec().iter() {
        if let Some(rendered) = render_node(child, parser, part) {
            inner_parts += rendered.matching_parts;
            html.push_str(&rendered.html);
        }
    }

    if has_class(tag, PARTS_WRAPPER_CLASS) && inner_parts == 0 {
        return None;
    }
    matching_parts += inner_parts;

    html.push_str("</");
    html.push_str(&name);
    html.push('>');
    Some(Rendered { html, matching_parts })
}

fn push_attribute(html: &mut String, key: &str, value: Option<&str>) {
    html.push(' ');
    html.push_str(key);
    if let Some(value) = value {
        html.push_str("=\"");
        html.push_str(&value.replace('"', "&quot;"));
        html.push('"');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"<html><body>
<div data-time="0000"><p>Intro</p></div>
<div data-time="0030"><p class="soprano">Gloria</p><p class="alto">Gloria low</p></div>
<div data-time="0105"><div class="parts"><p class="tenor">Laudamus</p><p class="bass">Te</p></div><p>Amen</p></div>
</body></html>"#;

    #[test]
    fn test_parse_collects_sections_in_order() {
        let doc = RichLyricDocument::parse(DOC).unwrap();
        let times: Vec<&str> = doc.sections().iter().map(|s| s.time.as_str()).collect();
        assert_eq!(times, vec!["0000", "0030", "0105"]);
    }

    #[test]
    fn test_parse_without_timed_elements_fails() {
        let err = RichLyricDocument::parse("<p>No timing here</p>").unwrap_err();
        assert!(matches!(err, Error::RichDocumentParse(_)));
    }

    #[test]
    fn test_malformed_timing_codes_are_ignored() {
        let doc = RichLyricDocument::parse(
            r#"<p data-time="1:05">bad</p><p data-time="0010">good</p>"#,
        )
        .unwrap();
        assert_eq!(doc.sections().len(), 1);
        assert_eq!(doc.sections()[0].time, "0010");
    }

    #[test]
    fn test_current_section_selection() {
        let doc = RichLyricDocument::parse(DOC).unwrap();
        assert_eq!(doc.current_section(0.0), Some(0));
        assert_eq!(doc.current_section(29.9), Some(0));
        assert_eq!(doc.current_section(30.0), Some(1));
        assert_eq!(doc.current_section(64.0), Some(1));
        assert_eq!(doc.current_section(65.0), Some(2));
        assert_eq!(doc.current_section(600.0), Some(2));
    }

    #[test]
    fn test_no_section_before_first_code() {
        let doc = RichLyricDocument::parse(r#"<p data-time="0010">late</p>"#).unwrap();
        assert_eq!(doc.current_section(5.0), None);
    }

    #[test]
    fn test_render_unfiltered_keeps_everything() {
        let doc = RichLyricDocument::parse(DOC).unwrap();
        let html = doc.render_section(1, None).unwrap();
        assert!(html.contains("Gloria low"));
        assert!(html.contains("soprano"));
    }

    #[test]
    fn test_render_filter_removes_other_parts() {
        let doc = RichLyricDocument::parse(DOC).unwrap();
        let html = doc.render_section(1, Some(VoicePart::Soprano)).unwrap();
        assert!(html.contains(">Gloria<"));
        assert!(!html.contains("Gloria low"));
    }

    #[test]
    fn test_render_filter_drops_empty_parts_wrapper() {
        let doc = RichLyricDocument::parse(DOC).unwrap();

        let html = doc.render_section(2, Some(VoicePart::Soprano)).unwrap();
        assert!(!html.contains("parts"));
        assert!(!html.contains("Laudamus"));
        assert!(html.contains("Amen"));

        let html = doc.render_section(2, Some(VoicePart::Tenor)).unwrap();
        assert!(html.contains("class=\"parts\""));
        assert!(html.contains("Laudamus"));
        assert!(!html.contains(">Te<"));
    }

    #[test]
    fn test_render_at_position() {
        let doc = RichLyricDocument::parse(DOC).unwrap();
        let html = doc.render_at(31.0, Some(VoicePart::Alto)).unwrap();
        assert!(html.contains("Gloria low"));
        assert!(doc.render_section(9, None).is_none());
    }

    #[tokio::test]
    async fn test_inline_source_loads_without_network() {
        let client = reqwest::Client::new();
        let doc = load_rich_lyrics(&client, &RichLyricSource::Inline(DOC.to_string()))
            .await
            .unwrap();
        assert_eq!(doc.sections().len(), 3);
    }

    #[tokio::test]
    async fn test_unreachable_url_is_fetch_failure() {
        let client = reqwest::Client::new();
        let err = fetch_rich_lyrics(&client, "http://127.0.0.1:1/lyrics.html")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RichDocumentFetch(_)));
    }
}
