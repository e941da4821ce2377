//! Scoring Engine — turns one [`ElementDetails`] into a real number (or a
//! hard rejection) so the Extraction Engine can pick a winner among
//! candidate locators.

use crate::types::ElementDetails;

/// Tag names treated as semantically content-bearing.
const SEMANTIC_TAGS: &[&str] = &["article", "main", "section"];

/// Default descriptive id/class keywords. Configuration may override this.
pub const DEFAULT_DESCRIPTIVE_KEYWORDS: &[&str] = &[
    "content", "article", "post", "entry", "body", "story", "main", "text", "primary",
];

/// Weights and thresholds for the additive scoring formula. All fields are
/// injected from configuration; these implement the documented defaults.
#[derive(Debug, Clone)]
pub struct ScoringWeights {
    pub w_single: f64,
    pub w_p: f64,
    pub w_text: f64,
    pub w_link: f64,
    pub w_sem: f64,
    pub w_id_bonus: f64,
    pub w_class_bonus: f64,
    pub w_class_content: f64,
    pub w_shallow: f64,
    pub w_depth_bonus: f64,
    pub w_media: f64,
    pub w_unwanted: f64,
    pub min_paragraph_threshold: usize,
    pub min_depth_for_shallow_penalty: usize,
    pub descriptive_keywords: Vec<String>,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            w_single: 20.0,
            w_p: 2.0,
            w_text: 30.0,
            w_link: -40.0,
            w_sem: 15.0,
            w_id_bonus: 50.0,
            w_class_bonus: 40.0,
            w_class_content: 20.0,
            w_shallow: -30.0,
            w_depth_bonus: 1.0,
            w_media: 5.0,
            w_unwanted: -10.0,
            min_paragraph_threshold: 3,
            min_depth_for_shallow_penalty: 3,
            descriptive_keywords: DEFAULT_DESCRIPTIVE_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Score a single locator candidate. `f64::NEG_INFINITY` signals a hard
/// rejection; otherwise the result is clamped to `max(0, score)`.
pub fn score(details: &ElementDetails, weights: &ScoringWeights) -> f64 {
    if details.element_found_count == 0 {
        return f64::NEG_INFINITY;
    }
    if details.paragraph_count < weights.min_paragraph_threshold {
        return f64::NEG_INFINITY;
    }

    let mut total = 0.0;

    total += if details.element_found_count == 1 {
        weights.w_single
    } else {
        -weights.w_single.abs() * (details.element_found_count as f64 - 1.0)
    };

    total += weights.w_p * details.paragraph_count as f64;

    total += weights.w_text * (details.text_content_length as f64 / 1000.0);

    if details.link_count > 5 && details.text_content_length > 0 {
        let link_density = details.link_count as f64 / details.text_content_length as f64;
        if link_density > 0.10 {
            total += link_density * weights.w_link * (details.link_count as f64 / 10.0);
        }
    }

    if SEMANTIC_TAGS.contains(&details.tag_name.as_str()) {
        total += weights.w_sem;
    }

    let id_lower = details.id.to_ascii_lowercase();
    if !id_lower.is_empty()
        && weights
            .descriptive_keywords
            .iter()
            .any(|kw| id_lower.contains(kw.as_str()))
    {
        total += weights.w_id_bonus;
    }

    let class_lower = details.class_name.to_ascii_lowercase();
    let class_tokens: Vec<&str> = class_lower.split_whitespace().collect();
    if class_tokens
        .iter()
        .any(|token| weights.descriptive_keywords.iter().any(|kw| token.contains(kw.as_str())))
    {
        total += weights.w_class_bonus;
    }
    if class_lower.contains("content") {
        total += weights.w_class_content;
    }

    let depth = details.xpath.matches('/').count();
    if depth < weights.min_depth_for_shallow_penalty {
        total += weights.w_shallow;
    } else {
        total += depth as f64 * weights.w_depth_bonus;
    }

    let media_count = (details.image_count + details.video_count).min(5);
    total += weights.w_media * media_count as f64;

    total += details.unwanted_tag_count as f64 * weights.w_unwanted;

    total.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_details() -> ElementDetails {
        let mut d = ElementDetails::zero("//article");
        d.element_found_count = 1;
        d.tag_name = "article".to_string();
        d.paragraph_count = 5;
        d.text_content_length = 2000;
        d
    }

    #[test]
    fn zero_matches_is_hard_rejected() {
        let d = ElementDetails::zero("//article");
        assert_eq!(score(&d, &ScoringWeights::default()), f64::NEG_INFINITY);
    }

    #[test]
    fn too_few_paragraphs_is_hard_rejected() {
        let mut d = base_details();
        d.paragraph_count = 1;
        assert_eq!(score(&d, &ScoringWeights::default()), f64::NEG_INFINITY);
    }

    #[test]
    fn multiple_matches_are_penalized() {
        let weights = ScoringWeights::default();
        let mut single = base_details();
        single.element_found_count = 1;
        let mut multi = base_details();
        multi.element_found_count = 3;
        assert!(score(&single, &weights) > score(&multi, &weights));
    }

    #[test]
    fn descriptive_id_and_class_bonuses_apply() {
        let weights = ScoringWeights::default();
        let mut plain = base_details();
        let mut described = base_details();
        described.id = "main-content".to_string();
        described.class_name = "post-content".to_string();
        plain.id = "x1".to_string();
        plain.class_name = "x1".to_string();
        assert!(score(&described, &weights) > score(&plain, &weights));
    }

    #[test]
    fn shallow_xpath_is_penalized() {
        let weights = ScoringWeights::default();
        let mut shallow = base_details();
        shallow.xpath = "//article".to_string();
        let mut deep = base_details();
        deep.xpath = "/html/body/main/article".to_string();
        assert!(score(&deep, &weights) > score(&shallow, &weights));
    }

    #[test]
    fn dense_link_list_is_penalized() {
        let weights = ScoringWeights::default();
        let mut linky = base_details();
        linky.link_count = 50;
        linky.text_content_length = 200;
        let mut clean = base_details();
        clean.link_count = 1;
        assert!(score(&clean, &weights) > score(&linky, &weights));
    }

    #[test]
    fn score_never_goes_negative() {
        let weights = ScoringWeights::default();
        let mut bad = base_details();
        bad.unwanted_tag_count = 1000;
        assert_eq!(score(&bad, &weights), 0.0);
    }
}
