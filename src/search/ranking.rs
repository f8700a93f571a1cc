//! Composite relevance scoring and highlight extraction
//!
//! The relevance score is a weighted sum of four signals, each in [0, 1]:
//! vector similarity, lexical term overlap with title/content, exact tag
//! matches, and an exponential recency decay on `updated_at`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RelevanceConfig;
use crate::types::{EnhancedSearchResult, Memory, SearchResult};

/// A title hit counts fully, a content-only hit partially
const CONTENT_ONLY_HIT: f32 = 0.7;

/// Updates younger than this fire the "recently updated" reason
const RECENT_DAYS: f32 = 7.0;

const ELLIPSIS: &str = "...";

/// Individual signals before weighting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct RelevanceComponents {
    pub similarity: f32,
    pub lexical: f32,
    pub tag: f32,
    pub recency: f32,
}

/// Scores candidates against a query
#[derive(Debug, Clone)]
pub struct RelevanceScorer {
    config: RelevanceConfig,
}

impl RelevanceScorer {
    pub fn new(config: RelevanceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RelevanceConfig {
        &self.config
    }

    /// Weighted sum of the components
    pub fn combine(&self, c: &RelevanceComponents) -> f32 {
        self.config.similarity_weight * c.similarity
            + self.config.lexical_weight * c.lexical
            + self.config.tag_weight * c.tag
            + self.config.recency_weight * c.recency
    }

    /// Exponential decay: 1.0 now, 0.5 after one half-life
    pub fn recency(&self, updated_at: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
        let age_days = age_in_days(updated_at, now);
        if self.config.recency_half_life_days <= 0.0 {
            return 0.0;
        }
        0.5_f32.powf(age_days / self.config.recency_half_life_days)
    }

    /// Score one candidate, collecting the reasons that fired
    pub fn score(
        &self,
        result: SearchResult,
        terms: &[String],
        now: DateTime<Utc>,
    ) -> EnhancedSearchResult {
        let memory = &result.memory;
        let mut reasons = Vec::new();

        let similarity = result.similarity.clamp(0.0, 1.0);
        if similarity > 0.0 {
            reasons.push(format!("semantic similarity {:.2}", similarity));
        }

        let lexical = self.lexical(memory, terms, &mut reasons);
        let tag = tag_overlap(memory, terms, &mut reasons);

        let recency = self.recency(memory.updated_at, now);
        if age_in_days(memory.updated_at, now) < RECENT_DAYS {
            reasons.push("recently updated".to_string());
        }

        let components = RelevanceComponents {
            similarity,
            lexical,
            tag,
            recency,
        };
        let highlights = generate_highlights(
            &memory.content,
            terms,
            self.config.highlight_budget,
            self.config.max_highlights,
        );

        EnhancedSearchResult {
            relevance_score: self.combine(&components),
            similarity,
            match_reasons: reasons,
            highlights,
            memory: result.memory,
        }
    }

    fn lexical(&self, memory: &Memory, terms: &[String], reasons: &mut Vec<String>) -> f32 {
        if terms.is_empty() {
            return 0.0;
        }

        let title_terms = term_set(&memory.title);
        let content_terms = term_set(&memory.content);

        let mut total = 0.0;
        for term in terms {
            let in_title = title_terms.contains(term);
            let in_content = content_terms.contains(term);
            if in_title {
                reasons.push(format!("title contains query term: {}", term));
            }
            if in_content {
                reasons.push(format!("content contains query term: {}", term));
            }
            total += if in_title {
                1.0
            } else if in_content {
                CONTENT_ONLY_HIT
            } else {
                0.0
            };
        }

        total / terms.len() as f32
    }
}

impl Default for RelevanceScorer {
    fn default() -> Self {
        Self::new(RelevanceConfig::default())
    }
}

fn age_in_days(then: DateTime<Utc>, now: DateTime<Utc>) -> f32 {
    ((now - then).num_seconds().max(0) as f32) / 86_400.0
}

/// Fraction of query terms that equal a tag, case-insensitively
fn tag_overlap(memory: &Memory, terms: &[String], reasons: &mut Vec<String>) -> f32 {
    if memory.tags.is_empty() || terms.is_empty() {
        return 0.0;
    }

    let mut seen = HashSet::new();
    let mut matches = 0;
    for tag in &memory.tags {
        let lower = tag.to_lowercase();
        if terms.contains(&lower) && seen.insert(lower) {
            reasons.push(format!("tag match: {}", tag));
            matches += 1;
        }
    }

    (matches as f32 / terms.len().min(memory.tags.len()) as f32).min(1.0)
}

/// Distinct lowercase query terms in first-seen order
pub fn extract_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.chars().count() > 1)
        .filter(|s| seen.insert(s.to_string()))
        .map(String::from)
        .collect()
}

fn term_set(text: &str) -> HashSet<String> {
    extract_terms(text).into_iter().collect()
}

/// Excerpts around the first occurrence of each matched term.
///
/// Each excerpt holds at most `budget` characters of content, with `...`
/// marking a cut at either end. Terms already covered by an earlier excerpt
/// do not produce another one.
pub fn generate_highlights(content: &str, terms: &[String], budget: usize, max: usize) -> Vec<String> {
    if terms.is_empty() || budget == 0 || max == 0 {
        return vec![];
    }

    let chars: Vec<char> = content.chars().collect();
    // One lowercase char per original char keeps indices aligned
    let lower: Vec<char> = chars
        .iter()
        .map(|c| c.to_lowercase().next().unwrap_or(*c))
        .collect();

    let mut windows: Vec<(usize, usize)> = Vec::new();
    for term in terms {
        if windows.len() >= max {
            break;
        }
        let needle: Vec<char> = term.chars().collect();
        let Some(pos) = find_chars(&lower, &needle) else {
            continue;
        };
        if windows.iter().any(|&(s, e)| pos >= s && pos + needle.len() <= e) {
            continue;
        }
        windows.push(window_around(pos, needle.len(), chars.len(), budget));
    }

    windows
        .into_iter()
        .map(|(start, end)| {
            let body: String = chars[start..end].iter().collect();
            let mut snippet = String::with_capacity(body.len() + 6);
            if start > 0 {
                snippet.push_str(ELLIPSIS);
            }
            snippet.push_str(body.trim());
            if end < chars.len() {
                snippet.push_str(ELLIPSIS);
            }
            snippet
        })
        .collect()
}

fn find_chars(haystack: &[char], needle: &[char]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Character window of at most `budget` centred on the match
fn window_around(pos: usize, len: usize, total: usize, budget: usize) -> (usize, usize) {
    let slack = budget.saturating_sub(len) / 2;
    let mut start = pos.saturating_sub(slack);
    let end = (start + budget).min(total);
    if end - start < budget {
        start = end.saturating_sub(budget);
    }
    (start, end)
}
