//! Facet aggregation over a filtered candidate set
//!
//! Pure: takes the pre-pagination memories and the request time, returns
//! grouped counts sorted by count descending then key ascending.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::types::{FacetCount, Facets, Memory};

/// Time-period bucket of a memory relative to the request time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimePeriod {
    Today,
    ThisWeek,
    ThisMonth,
    Older,
}

impl TimePeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimePeriod::Today => "today",
            TimePeriod::ThisWeek => "this_week",
            TimePeriod::ThisMonth => "this_month",
            TimePeriod::Older => "older",
        }
    }

    /// Same UTC calendar day, then the last 7 days, then the last 30
    pub fn bucket(created_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        if created_at.date_naive() == now.date_naive() {
            return TimePeriod::Today;
        }
        let age = now - created_at;
        if age < chrono::Duration::days(7) {
            TimePeriod::ThisWeek
        } else if age < chrono::Duration::days(30) {
            TimePeriod::ThisMonth
        } else {
            TimePeriod::Older
        }
    }
}

/// Compute all five facet dimensions
pub fn aggregate_facets(memories: &[Memory], now: DateTime<Utc>) -> Facets {
    let mut types: HashMap<String, usize> = HashMap::new();
    let mut tags: HashMap<String, usize> = HashMap::new();
    let mut projects: HashMap<String, usize> = HashMap::new();
    let mut sessions: HashMap<String, usize> = HashMap::new();
    let mut periods: HashMap<String, usize> = HashMap::new();

    for memory in memories {
        *types.entry(memory.memory_type.as_str().to_string()).or_default() += 1;
        *projects.entry(memory.project_id.clone()).or_default() += 1;
        *periods
            .entry(TimePeriod::bucket(memory.created_at, now).as_str().to_string())
            .or_default() += 1;

        if let Some(ref session_id) = memory.session_id {
            *sessions.entry(session_id.clone()).or_default() += 1;
        }

        // Duplicate tags on one memory count once
        let distinct: HashSet<&String> = memory.tags.iter().collect();
        for tag in distinct {
            *tags.entry(tag.clone()).or_default() += 1;
        }
    }

    Facets {
        types: sorted_counts(types),
        tags: sorted_counts(tags),
        projects: sorted_counts(projects),
        sessions: sorted_counts(sessions),
        time_periods: sorted_counts(periods),
    }
}

fn sorted_counts(counts: HashMap<String, usize>) -> Vec<FacetCount> {
    let mut entries: Vec<FacetCount> = counts
        .into_iter()
        .map(|(key, count)| FacetCount { key, count })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MemoryDetails, MemoryType};
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn memory(id: &str, t: MemoryType, tags: &[&str], session: Option<&str>, age_days: i64) -> Memory {
        let now = Utc::now();
        Memory {
            id: id.into(),
            project_id: "p".into(),
            session_id: session.map(String::from),
            memory_type: t,
            title: id.into(),
            content: "c".into(),
            context: String::new(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            details: MemoryDetails::empty(t),
            extensions: BTreeMap::new(),
            created_at: now - chrono::Duration::days(age_days),
            updated_at: now,
        }
    }

    #[test]
    fn test_counts_and_ordering() {
        let memories = vec![
            memory("a", MemoryType::Decision, &["auth", "auth", "db"], Some("s1"), 0),
            memory("b", MemoryType::Code, &["auth"], None, 3),
            memory("c", MemoryType::Decision, &["db"], Some("s1"), 45),
        ];
        let facets = aggregate_facets(&memories, Utc::now());

        assert_eq!(
            facets.types,
            vec![
                FacetCount { key: "decision".into(), count: 2 },
                FacetCount { key: "code".into(), count: 1 },
            ]
        );
        assert_eq!(
            facets.tags,
            vec![
                FacetCount { key: "auth".into(), count: 2 },
                FacetCount { key: "db".into(), count: 2 },
            ]
        );
        assert_eq!(facets.sessions, vec![FacetCount { key: "s1".into(), count: 2 }]);

        let type_total: usize = facets.types.iter().map(|f| f.count).sum();
        assert_eq!(type_total, memories.len());
        let period_total: usize = facets.time_periods.iter().map(|f| f.count).sum();
        assert_eq!(period_total, memories.len());
    }

    #[test]
    fn test_time_buckets() {
        let now = Utc::now();
        assert_eq!(TimePeriod::bucket(now, now), TimePeriod::Today);
        assert_eq!(
            TimePeriod::bucket(now - chrono::Duration::days(2), now),
            TimePeriod::ThisWeek
        );
        assert_eq!(
            TimePeriod::bucket(now - chrono::Duration::days(20), now),
            TimePeriod::ThisMonth
        );
        assert_eq!(
            TimePeriod::bucket(now - chrono::Duration::days(31), now),
            TimePeriod::Older
        );
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(aggregate_facets(&[], Utc::now()), Facets::default());
    }
}
