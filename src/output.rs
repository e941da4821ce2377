//! Output pipeline — shapes the located element's outer HTML into the
//! requested `OutputType`. Shaping never mutates the located XPath; it only
//! transforms the already-extracted markup.

use crate::types::{ElementDetails, OutputType, ScrapePayload};
use scraper::{Html, Selector};

/// Tags stripped when producing `cleaned_html`, mirroring the Analyzer's
/// simplification noise list plus a couple of UI-chrome tags that a
/// sanitized subtree should not carry.
const STRIP_TAGS_FOR_CLEAN: &[&str] = &["script", "style", "noscript", "svg", "path", "iframe", "button"];

/// Render `outer_html` (the located element's outer HTML, as returned by the
/// Browser Driver or Analyzer) into the requested output shape.
pub fn shape_output(
    outer_html: &str,
    output_type: OutputType,
    details: &ElementDetails,
    timings_ms: u64,
) -> ScrapePayload {
    match output_type {
        OutputType::ContentOnly => ScrapePayload::Text(plain_text(outer_html)),
        OutputType::Markdown => ScrapePayload::Text(to_markdown(outer_html)),
        OutputType::CleanedHtml => ScrapePayload::Text(clean_html(outer_html)),
        OutputType::FullHtml => ScrapePayload::Text(outer_html.to_string()),
        OutputType::MetadataOnly => ScrapePayload::Metadata(metadata_only(details, timings_ms)),
    }
}

fn plain_text(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    fragment
        .root_element()
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn to_markdown(html: &str) -> String {
    html2md::parse_html(html)
}

fn clean_html(html: &str) -> String {
    let fragment = Html::parse_fragment(html);
    let mut out = String::new();
    render_clean(fragment.tree.root(), &mut out);
    out
}

fn render_clean(node: ego_tree::NodeRef<scraper::Node>, out: &mut String) {
    use scraper::Node;
    match node.value() {
        Node::Comment(_) | Node::ProcessingInstruction(_) | Node::Doctype(_) => {}
        Node::Text(text) => out.push_str(text),
        Node::Element(el) => {
            let tag = el.name();
            if STRIP_TAGS_FOR_CLEAN.contains(&tag) {
                return;
            }
            out.push('<');
            out.push_str(tag);
            for (name, value) in el.attrs() {
                if name.eq_ignore_ascii_case("onclick") || name.starts_with("on") {
                    continue;
                }
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&value.replace('"', "&quot;"));
                out.push('"');
            }
            out.push('>');
            for child in node.children() {
                render_clean(child, out);
            }
            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        _ => {
            for child in node.children() {
                render_clean(child, out);
            }
        }
    }
}

fn metadata_only(details: &ElementDetails, timings_ms: u64) -> serde_json::Value {
    serde_json::json!({
        "xpath": details.xpath,
        "element_found_count": details.element_found_count,
        "tag_name": details.tag_name,
        "text_content_length": details.text_content_length,
        "paragraph_count": details.paragraph_count,
        "link_count": details.link_count,
        "image_count": details.image_count,
        "timings_ms": timings_ms,
    })
}

/// `Selector` is kept as a dependency touchpoint so malformed-fragment
/// parsing degrades the same way the rest of the analyzer does (never
/// panics); reused by callers that need a quick subtree presence check.
pub fn has_any(html: &str, selector: &str) -> bool {
    let fragment = Html::parse_fragment(html);
    Selector::parse(selector)
        .map(|sel| fragment.select(&sel).next().is_some())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn details() -> ElementDetails {
        let mut d = ElementDetails::zero("//article");
        d.tag_name = "article".to_string();
        d
    }

    #[test]
    fn content_only_strips_tags() {
        let html = "<article><p>Hello <b>world</b></p></article>";
        let payload = shape_output(html, OutputType::ContentOnly, &details(), 10);
        match payload {
            ScrapePayload::Text(t) => assert_eq!(t, "Hello world"),
            _ => panic!("expected text payload"),
        }
    }

    #[test]
    fn markdown_converts_basic_structure() {
        let html = "<article><h1>Title</h1><p>Body text.</p></article>";
        let payload = shape_output(html, OutputType::Markdown, &details(), 10);
        match payload {
            ScrapePayload::Text(t) => assert!(t.contains("Title")),
            _ => panic!("expected text payload"),
        }
    }

    #[test]
    fn cleaned_html_removes_scripts() {
        let html = "<article><script>evil()</script><p>keep</p></article>";
        let payload = shape_output(html, OutputType::CleanedHtml, &details(), 10);
        match payload {
            ScrapePayload::Text(t) => {
                assert!(!t.contains("evil()"));
                assert!(t.contains("keep"));
            }
            _ => panic!("expected text payload"),
        }
    }

    #[test]
    fn full_html_is_untransformed() {
        let html = "<article><script>x()</script></article>";
        let payload = shape_output(html, OutputType::FullHtml, &details(), 10);
        match payload {
            ScrapePayload::Text(t) => assert_eq!(t, html),
            _ => panic!("expected text payload"),
        }
    }

    #[test]
    fn metadata_only_never_exposes_markup() {
        let html = "<article><p>Secret body</p></article>";
        let payload = shape_output(html, OutputType::MetadataOnly, &details(), 42);
        match payload {
            ScrapePayload::Metadata(v) => {
                assert!(!v.to_string().contains("Secret body"));
                assert_eq!(v["timings_ms"], 42);
            }
            _ => panic!("expected metadata payload"),
        }
    }
}
