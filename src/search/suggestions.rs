//! Query completions drawn from existing titles and tags

use std::collections::HashMap;

#[derive(Default)]
struct Candidate {
    frequency: usize,
    prefix: bool,
}

fn consider<'a>(candidates: &mut HashMap<&'a str, Candidate>, needle: &str, text: &'a str) {
    let lower = text.to_lowercase();
    let prefix = lower.starts_with(needle);
    if prefix || lower.contains(needle) {
        let candidate = candidates.entry(text).or_default();
        candidate.frequency += 1;
        candidate.prefix = prefix;
    }
}

/// Complete a partial query from `(title, tags)` pairs.
///
/// Case-insensitive prefix or substring match; ranked by occurrence count,
/// then prefix matches before substring matches, then alphabetically.
pub fn suggest(partial: &str, entries: &[(String, Vec<String>)], limit: usize) -> Vec<String> {
    let needle = partial.trim().to_lowercase();
    let mut candidates: HashMap<&str, Candidate> = HashMap::new();

    for (title, tags) in entries {
        consider(&mut candidates, &needle, title);
        for tag in tags {
            consider(&mut candidates, &needle, tag);
        }
    }

    let mut ranked: Vec<(&str, Candidate)> = candidates.into_iter().collect();
    ranked.sort_by(|(a_text, a), (b_text, b)| {
        b.frequency
            .cmp(&a.frequency)
            .then_with(|| b.prefix.cmp(&a.prefix))
            .then_with(|| a_text.cmp(b_text))
    });

    ranked
        .into_iter()
        .take(limit)
        .map(|(text, _)| text.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entries() -> Vec<(String, Vec<String>)> {
        vec![
            ("Use JWT".into(), vec!["auth".into(), "jwt".into()]),
            ("JWT refresh flow".into(), vec!["auth".into()]),
            ("OAuth provider".into(), vec!["auth".into(), "oauth".into()]),
        ]
    }

    #[test]
    fn test_frequency_then_prefix() {
        let suggestions = suggest("au", &entries(), 10);
        assert_eq!(suggestions[0], "auth");
        // "OAuth provider" and "oauth" are substring matches
        assert!(suggestions.contains(&"oauth".to_string()));
    }

    #[test]
    fn test_case_insensitive_and_limit() {
        let suggestions = suggest("JW", &entries(), 2);
        assert_eq!(suggestions, vec!["JWT refresh flow", "jwt"]);
    }

    #[test]
    fn test_no_match() {
        assert!(suggest("zzz", &entries(), 10).is_empty());
    }
}
