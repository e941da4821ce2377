//! `evaluateXPath` — evaluate an expression against a parsed document with
//! full [`ElementDetails`] accounting.
//!
//! Grounded on the `sxd-document` / `sxd-xpath` pairing used elsewhere in
//! this ecosystem for real XPath evaluation (as opposed to CSS selectors).

use crate::error::AnalyzerError;
use crate::types::{ElementDetails, UNWANTED_TAGS};
use sxd_document::dom::{ChildOfElement, Element};
use sxd_document::parser;
use sxd_xpath::nodeset::Node;
use sxd_xpath::{evaluate_xpath as sxd_evaluate, Factory, Value};

const INNER_HTML_SAMPLE_LEN: usize = 300;

/// Evaluate `xpath` against `html`. Zero matches yields a zeroed record, not
/// an error. A malformed expression yields [`AnalyzerError::MalformedXPath`].
pub fn evaluate_xpath(html: &str, xpath: &str) -> Result<ElementDetails, AnalyzerError> {
    let factory = Factory::new();
    match factory.build(xpath) {
        Ok(Some(_)) => {}
        Ok(None) | Err(_) => return Err(AnalyzerError::MalformedXPath(xpath.to_string())),
    }

    let package = match parser::parse(html) {
        Ok(p) => p,
        Err(_) => return Ok(ElementDetails::zero(xpath)),
    };
    let document = package.as_document();

    let value = sxd_evaluate(&document, xpath)
        .map_err(|e| AnalyzerError::MalformedXPath(format!("{xpath}: {e}")))?;

    let Value::Nodeset(nodes) = value else {
        return Ok(ElementDetails::zero(xpath));
    };

    let elements: Vec<Element> = nodes
        .iter()
        .filter_map(|n| match n {
            Node::Element(e) => Some(e),
            _ => None,
        })
        .collect();

    if elements.is_empty() {
        return Ok(ElementDetails::zero(xpath));
    }

    let first = elements[0];
    let mut details = ElementDetails::zero(xpath);
    details.element_found_count = elements.len();
    details.tag_name = first.name().local_part().to_string();
    details.id = first
        .attribute("id")
        .map(|a| a.value().to_string())
        .unwrap_or_default();
    details.class_name = first
        .attribute("class")
        .map(|a| a.value().to_string())
        .unwrap_or_default();

    let mut acc = Accumulator::default();
    walk(first, &mut acc);
    details.text_content_length = acc.text_len;
    details.paragraph_count = acc.paragraphs;
    details.link_count = acc.links;
    details.image_count = acc.images;
    details.video_count = acc.videos;
    details.audio_count = acc.audios;
    details.picture_count = acc.pictures;
    details.unwanted_tag_count = acc.unwanted;
    details.descendant_count = acc.descendants;
    details.inner_html_sample = render_sample(first, INNER_HTML_SAMPLE_LEN);

    Ok(details)
}

/// Evaluate `xpath` against `html` and return the first matched element's
/// full, untruncated outer HTML. `None` on zero matches, a parse failure, or
/// a non-element result — mirrors [`evaluate_xpath`]'s "zero matches is not
/// an error" convention, just without the [`ElementDetails`] accounting.
pub fn evaluate_xpath_full(html: &str, xpath: &str) -> Result<Option<String>, AnalyzerError> {
    let factory = Factory::new();
    match factory.build(xpath) {
        Ok(Some(_)) => {}
        Ok(None) | Err(_) => return Err(AnalyzerError::MalformedXPath(xpath.to_string())),
    }

    let package = match parser::parse(html) {
        Ok(p) => p,
        Err(_) => return Ok(None),
    };
    let document = package.as_document();

    let value = sxd_evaluate(&document, xpath)
        .map_err(|e| AnalyzerError::MalformedXPath(format!("{xpath}: {e}")))?;

    let Value::Nodeset(nodes) = value else {
        return Ok(None);
    };

    let first = nodes.iter().find_map(|n| match n {
        Node::Element(e) => Some(e),
        _ => None,
    });

    Ok(first.map(render_full))
}

#[derive(Default)]
struct Accumulator {
    text_len: usize,
    paragraphs: usize,
    links: usize,
    images: usize,
    videos: usize,
    audios: usize,
    pictures: usize,
    unwanted: usize,
    descendants: usize,
}

fn walk(el: Element, acc: &mut Accumulator) {
    for child in el.children() {
        match child {
            ChildOfElement::Element(child_el) => {
                acc.descendants += 1;
                let tag = child_el.name().local_part();
                match tag {
                    "p" => acc.paragraphs += 1,
                    "a" => acc.links += 1,
                    "img" => acc.images += 1,
                    "video" => acc.videos += 1,
                    "audio" => acc.audios += 1,
                    "picture" => acc.pictures += 1,
                    _ => {}
                }
                if UNWANTED_TAGS.contains(&tag) {
                    acc.unwanted += 1;
                }
                walk(child_el, acc);
            }
            ChildOfElement::Text(text) => {
                acc.text_len += text.text().trim().len();
            }
            _ => {}
        }
    }
}

/// A short, approximate inner-HTML rendering — not a faithful serializer,
/// just enough for a human or an LLM retry prompt to recognize the element.
fn render_sample(el: Element, max_len: usize) -> String {
    let mut out = String::new();
    render_into(el, &mut out, max_len);
    out.truncate(out.len().min(max_len));
    out
}

/// A faithful, unbounded outer-HTML serialization of `el` and its subtree.
fn render_full(el: Element) -> String {
    let mut out = String::new();
    render_full_into(el, &mut out);
    out
}

fn render_full_into(el: Element, out: &mut String) {
    let tag = el.name().local_part();
    out.push('<');
    out.push_str(tag);
    out.push('>');
    for child in el.children() {
        match child {
            ChildOfElement::Element(child_el) => render_full_into(child_el, out),
            ChildOfElement::Text(text) => out.push_str(text.text()),
            _ => {}
        }
    }
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

fn render_into(el: Element, out: &mut String, max_len: usize) {
    if out.len() >= max_len {
        return;
    }
    let tag = el.name().local_part();
    out.push('<');
    out.push_str(tag);
    out.push('>');
    for child in el.children() {
        if out.len() >= max_len {
            break;
        }
        match child {
            ChildOfElement::Element(child_el) => render_into(child_el, out, max_len),
            ChildOfElement::Text(text) => out.push_str(text.text()),
            _ => {}
        }
    }
    out.push_str("</");
    out.push_str(tag);
    out.push('>');
}

#[cfg(test)]
mod tests {
    use super::*;

    const HTML: &str = r#"<html><body>
        <article class="article-content">
            <p>First paragraph with some text.</p>
            <p>Second paragraph.</p>
            <a href="/x">a link</a>
            <img src="/y.png"/>
        </article>
    </body></html>"#;

    #[test]
    fn counts_descendants_of_matched_element() {
        let details = evaluate_xpath(HTML, "//article").unwrap();
        assert_eq!(details.element_found_count, 1);
        assert_eq!(details.tag_name, "article");
        assert_eq!(details.paragraph_count, 2);
        assert_eq!(details.link_count, 1);
        assert_eq!(details.image_count, 1);
        assert_eq!(details.class_name, "article-content");
    }

    #[test]
    fn zero_matches_returns_zeroed_record_not_error() {
        let details = evaluate_xpath(HTML, "//section[@id='missing']").unwrap();
        assert_eq!(details.element_found_count, 0);
        assert_eq!(details.paragraph_count, 0);
    }

    #[test]
    fn malformed_xpath_is_a_typed_error() {
        let err = evaluate_xpath(HTML, "///[[[");
        assert!(err.is_err());
    }

    #[test]
    fn full_serialization_is_not_truncated() {
        let long_html = format!(
            r#"<html><body><article>{}</article></body></html>"#,
            "x".repeat(INNER_HTML_SAMPLE_LEN * 2)
        );
        let full = evaluate_xpath_full(&long_html, "//article").unwrap().unwrap();
        assert!(full.len() > INNER_HTML_SAMPLE_LEN);
        assert!(full.starts_with("<article>"));
        assert!(full.ends_with("</article>"));
    }

    #[test]
    fn full_serialization_zero_matches_is_none() {
        let found = evaluate_xpath_full(HTML, "//section[@id='missing']").unwrap();
        assert!(found.is_none());
    }
}
