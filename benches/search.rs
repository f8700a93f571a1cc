//! Performance benchmarks for ranking and facet aggregation

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use membank::config::RelevanceConfig;
use membank::embedding::TfIdfEmbedder;
use membank::search::{aggregate_facets, extract_terms, generate_highlights, RelevanceScorer};
use membank::types::*;

const SAMPLE_CONTENTS: &[&str] = &[
    "Authentication using JWT tokens and refresh mechanism",
    "Database migration strategy for PostgreSQL",
    "React component lifecycle and hooks optimization",
    "API rate limiting implementation with Redis",
    "Docker container orchestration with Kubernetes",
    "GraphQL schema design best practices",
    "Microservices communication patterns",
    "CI/CD pipeline configuration with GitHub Actions",
    "Memory leak detection in Node.js applications",
    "Rust ownership and borrowing concepts",
];

fn sample_memories(count: usize) -> Vec<Memory> {
    let now = Utc::now();
    (0..count)
        .map(|i| {
            let memory_type = MemoryType::all()[i % MemoryType::all().len()];
            let at = now - Duration::hours((i * 7) as i64);
            Memory {
                id: format!("{:08}", i),
                project_id: format!("project{}", i % 3),
                session_id: (i % 4 == 0).then(|| format!("session{}", i % 5)),
                memory_type,
                title: SAMPLE_CONTENTS[i % SAMPLE_CONTENTS.len()].to_string(),
                content: format!(
                    "{} - variation {} with additional context about software development",
                    SAMPLE_CONTENTS[i % SAMPLE_CONTENTS.len()],
                    i
                ),
                context: String::new(),
                tags: vec![format!("topic{}", i % 5), "development".to_string()],
                details: MemoryDetails::empty(memory_type),
                extensions: BTreeMap::new(),
                created_at: at,
                updated_at: at,
            }
        })
        .collect()
}

fn bench_facets(c: &mut Criterion) {
    let mut group = c.benchmark_group("facets");

    for size in [100, 1000, 5000] {
        let memories = sample_memories(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("aggregate", size), &memories, |b, memories| {
            b.iter(|| aggregate_facets(black_box(memories), Utc::now()))
        });
    }

    group.finish();
}

fn bench_ranking(c: &mut Criterion) {
    let mut group = c.benchmark_group("ranking");
    let scorer = RelevanceScorer::new(RelevanceConfig::default());
    let terms = extract_terms("jwt auth refresh tokens");

    for size in [100, 1000] {
        let results: Vec<SearchResult> = sample_memories(size)
            .into_iter()
            .enumerate()
            .map(|(i, memory)| SearchResult {
                memory,
                similarity: (i % 100) as f32 / 100.0,
            })
            .collect();

        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::new("score", size), &results, |b, results| {
            b.iter(|| {
                let now = Utc::now();
                results
                    .iter()
                    .map(|r| scorer.score(black_box(r.clone()), &terms, now))
                    .count()
            })
        });
    }

    group.finish();
}

fn bench_highlights(c: &mut Criterion) {
    let content = SAMPLE_CONTENTS.join(". ").repeat(20);
    let terms = extract_terms("kubernetes redis ownership");

    c.bench_function("highlights", |b| {
        b.iter(|| generate_highlights(black_box(&content), &terms, 160, 3))
    });
}

fn bench_embedding(c: &mut Criterion) {
    let embedder = TfIdfEmbedder::new(384);
    let text = SAMPLE_CONTENTS.join(" ");

    c.bench_function("tfidf_embed", |b| b.iter(|| embedder.embed_sync(black_box(&text))));
}

criterion_group!(
    benches,
    bench_facets,
    bench_ranking,
    bench_highlights,
    bench_embedding
);
criterion_main!(benches);
