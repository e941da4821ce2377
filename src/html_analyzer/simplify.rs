//! `simplifyDom` — strip noise tags, truncate long text runs, and annotate
//! surviving elements with text/paragraph accounting before the document is
//! handed to the LLM Suggester.

use ego_tree::NodeRef;
use scraper::{Html, Node};

const STRIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "meta", "link", "head", "svg", "path", "iframe",
];
const FALLBACK_TRUNCATE_LEN: usize = 100_000;

/// Strip noise, truncate text nodes longer than `max_text_len`, and annotate
/// elements whose aggregated text length exceeds `min_annotate_size` with
/// `data-original-text-length` (and `data-paragraph-count` when the element
/// has at least one descendant `<p>`). Falls back to the first 100,000
/// characters of the raw input on parse failure or when nothing survives
/// stripping.
pub fn simplify_dom(html: &str, max_text_len: usize, min_annotate_size: usize) -> String {
    let document = Html::parse_document(html);
    let root = document.tree.root();

    let mut out = String::new();
    for child in root.children() {
        render_node(child, &mut out, max_text_len, min_annotate_size);
    }

    if out.trim().is_empty() {
        return html.chars().take(FALLBACK_TRUNCATE_LEN).collect();
    }
    out
}

fn render_node(node: NodeRef<Node>, out: &mut String, max_text_len: usize, min_annotate_size: usize) {
    match node.value() {
        Node::Comment(_) | Node::ProcessingInstruction(_) | Node::Doctype(_) => {}
        Node::Text(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return;
            }
            let truncated: String = trimmed.chars().take(max_text_len).collect();
            out.push_str(&truncated);
            out.push(' ');
        }
        Node::Element(el) => {
            let tag = el.name();
            if STRIP_TAGS.contains(&tag) {
                return;
            }

            let (text_len, paragraph_count) = accounting(node);

            out.push('<');
            out.push_str(tag);
            for (name, value) in el.attrs() {
                out.push(' ');
                out.push_str(name);
                out.push_str("=\"");
                out.push_str(&value.replace('"', "&quot;"));
                out.push('"');
            }
            if text_len > min_annotate_size {
                out.push_str(" data-original-text-length=\"");
                out.push_str(&text_len.to_string());
                out.push('"');
                if paragraph_count > 0 {
                    out.push_str(" data-paragraph-count=\"");
                    out.push_str(&paragraph_count.to_string());
                    out.push('"');
                }
            }
            out.push('>');

            for child in node.children() {
                render_node(child, out, max_text_len, min_annotate_size);
            }

            out.push_str("</");
            out.push_str(tag);
            out.push('>');
        }
        _ => {
            for child in node.children() {
                render_node(child, out, max_text_len, min_annotate_size);
            }
        }
    }
}

/// Text length and paragraph count across `node`'s subtree, counted before
/// any stripping/truncation so the annotation reflects the original page.
fn accounting(node: NodeRef<Node>) -> (usize, usize) {
    let mut text_len = 0;
    let mut paragraphs = 0;
    for descendant in node.descendants() {
        match descendant.value() {
            Node::Text(text) => text_len += text.trim().len(),
            Node::Element(el) if el.name() == "p" => paragraphs += 1,
            _ => {}
        }
    }
    (text_len, paragraphs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_and_style() {
        let html = "<html><body><script>evil()</script><style>.x{}</style><p>keep me around please</p></body></html>";
        let simplified = simplify_dom(html, 500, 0);
        assert!(!simplified.contains("evil()"));
        assert!(!simplified.contains(".x{}"));
        assert!(simplified.contains("keep me around please"));
    }

    #[test]
    fn annotates_paragraph_count_above_threshold() {
        let html = "<html><body><article><p>one</p><p>two</p></article></body></html>";
        let simplified = simplify_dom(html, 500, 0);
        assert!(simplified.contains("data-paragraph-count=\"2\""));
    }

    #[test]
    fn below_annotate_threshold_is_not_annotated() {
        let html = "<html><body><article><p>one</p></article></body></html>";
        let simplified = simplify_dom(html, 500, 10_000);
        assert!(!simplified.contains("data-original-text-length"));
    }

    #[test]
    fn truncates_long_text_nodes() {
        let long = "w".repeat(2000);
        let html = format!("<html><body><p>{long}</p></body></html>");
        let simplified = simplify_dom(&html, 500, 0);
        let w_run = simplified.chars().filter(|&c| c == 'w').count();
        assert!(w_run <= 500);
    }

    #[test]
    fn falls_back_to_truncated_raw_on_empty_result() {
        let html = "<html><head><title>t</title></head><body></body></html>";
        let simplified = simplify_dom(html, 500, 0);
        assert!(!simplified.is_empty());
    }
}
