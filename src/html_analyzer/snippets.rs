//! `extractSnippets` — gather trimmed text from content-ish elements.

use scraper::{Html, Selector};

const CONTENT_KEYWORDS: &[&str] = &[
    "content", "article", "post", "entry", "body", "story", "main", "text",
];
const MIN_SNIPPET_LEN: usize = 50;

pub fn extract_snippets(html: &str, max_snippets: usize, snippet_max_len: usize) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut snippets = Vec::new();

    let Ok(selector) = Selector::parse("p, article, main, section, div") else {
        return snippets;
    };

    for el in document.select(&selector) {
        if snippets.len() >= max_snippets {
            break;
        }

        let tag = el.value().name();
        if tag == "div" && !class_is_content_ish(el.value()) {
            continue;
        }

        let text: String = el.text().collect::<Vec<_>>().join(" ");
        let trimmed = text.trim();
        if trimmed.len() < MIN_SNIPPET_LEN {
            continue;
        }

        let truncated: String = trimmed.chars().take(snippet_max_len).collect();
        snippets.push(truncated);
    }

    snippets
}

fn class_is_content_ish(el: &scraper::node::Element) -> bool {
    let Some(class) = el.attr("class") else {
        return false;
    };
    let lower = class.to_ascii_lowercase();
    CONTENT_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_only_long_enough_text() {
        let html = r#"<p>short</p><p>this paragraph is definitely long enough to pass the fifty character minimum threshold easily</p>"#;
        let snippets = extract_snippets(html, 10, 1000);
        assert_eq!(snippets.len(), 1);
    }

    #[test]
    fn caps_at_max_snippets() {
        let long = "x".repeat(60);
        let html = format!("<p>{long}</p><p>{long}</p><p>{long}</p>");
        let snippets = extract_snippets(&html, 2, 1000);
        assert_eq!(snippets.len(), 2);
    }

    #[test]
    fn truncates_to_snippet_max_len() {
        let long = "word ".repeat(50);
        let html = format!("<article>{long}</article>");
        let snippets = extract_snippets(&html, 5, 20);
        assert_eq!(snippets[0].chars().count(), 20);
    }

    #[test]
    fn malformed_html_yields_empty_list_not_panic() {
        let snippets = extract_snippets("<<<not html at all", 5, 100);
        assert!(snippets.is_empty() || snippets.len() <= 5);
    }

    #[test]
    fn div_without_content_class_is_skipped() {
        let html = r#"<div class="sidebar-widget">this div is long enough to pass the minimum length check easily here</div>"#;
        let snippets = extract_snippets(html, 5, 1000);
        assert!(snippets.is_empty());
    }
}
