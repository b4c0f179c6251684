//! Packing scenarios and budget properties across the context engine.

use std::sync::Arc;

use ctxpack_core::{
    ArtifactAssembler, CandidateArtifact, CandidateKind, ContextEntry, ContextTier,
    HeuristicEstimator, MemoryArtifactProvider, OverflowPreference, TieredContextBuilder,
    TokenBudget, TokenEstimator,
};
use ctxpack_test_utils::fakes::{FailingSummarizer, FixedSummarizer};
use pretty_assertions::assert_eq;

fn estimator() -> Arc<dyn TokenEstimator> {
    Arc::new(HeuristicEstimator::default())
}

/// Prose estimating to exactly `tokens` under the plain heuristic.
fn prose(tokens: usize) -> String {
    let sentence = "The step reads it. "; // 19 bytes
    let bytes = tokens * 4;
    let mut text = sentence.repeat(bytes / sentence.len());
    text.push_str(&"z".repeat(bytes % sentence.len()));
    text
}

fn workflow_candidates() -> Vec<CandidateArtifact> {
    vec![
        CandidateArtifact::new("brief", prose(400), 0, CandidateKind::PriorStepDoc),
        CandidateArtifact::new("stories", prose(500), 1, CandidateKind::PriorStepDoc),
        CandidateArtifact::new("design", prose(700), 2, CandidateKind::PriorStepDoc),
    ]
}

// ── 1000-token workflow scenario ──────────────────────────────────

#[test_log::test(tokio::test)]
async fn test_scenario_default_floor_omits_design() {
    let mut budget = TokenBudget::new(1000);
    let ctx = ArtifactAssembler::new(estimator())
        .assemble(workflow_candidates(), &mut budget, None)
        .await;

    assert!(ctx.get("brief").unwrap().is_full());
    assert!(ctx.get("stories").unwrap().is_full());
    assert_eq!(ctx.get("design"), Some(&ContextEntry::Omitted));
    assert!(ctx.is_degraded());
    assert_eq!(ctx.total_tokens, 900);
}

#[tokio::test]
async fn test_scenario_low_floor_truncates_design_to_remaining() {
    let mut budget = TokenBudget::new(1000);
    let ctx = ArtifactAssembler::new(estimator())
        .with_truncation_floor(100)
        .assemble(workflow_candidates(), &mut budget, None)
        .await;

    let design = ctx.entries.iter().find(|e| e.key == "design").unwrap();
    let ContextEntry::Truncated {
        content,
        original_tokens,
    } = &design.entry
    else {
        panic!("design should be truncated, got {:?}", design.entry);
    };
    assert_eq!(*original_tokens, 700);
    // Cut at a sentence end, close to the 100 remaining tokens
    assert!(content.ends_with('.'));
    assert!(design.tokens <= 100 && design.tokens >= 90, "{}", design.tokens);
    assert_eq!(ctx.degraded_keys, vec!["design".to_string()]);
}

#[tokio::test]
async fn test_scenario_with_summarizer_summarizes_design() {
    let summarizer = FixedSummarizer::new("Design: event-driven, three services.");
    let mut budget = TokenBudget::new(1000);
    let ctx = ArtifactAssembler::new(estimator())
        .assemble(workflow_candidates(), &mut budget, Some(&summarizer))
        .await;

    assert_eq!(
        ctx.get("design"),
        Some(&ContextEntry::Summarized(
            "Design: event-driven, three services.".to_string()
        ))
    );
    assert_eq!(summarizer.calls(), 1);
    // Bounded to min(remaining, floor)
    assert_eq!(summarizer.last_bound(), 100);
}

#[tokio::test]
async fn test_scenario_failing_summarizer_uses_descriptor() {
    let mut budget = TokenBudget::new(1000);
    let ctx = ArtifactAssembler::new(estimator())
        .assemble(workflow_candidates(), &mut budget, Some(&FailingSummarizer))
        .await;
    let text = ctx.get("design").and_then(ContextEntry::content).unwrap();
    assert_eq!(
        text,
        "prior-step-doc design: summary unavailable, omitted for budget"
    );
    assert!(ctx.total_tokens <= 1000);
}

#[tokio::test]
async fn test_summarize_preference_bounds_summary_by_remaining() {
    let summarizer = FixedSummarizer::new("short");
    let mut budget = TokenBudget::new(1000);
    let _ = ArtifactAssembler::new(estimator())
        .with_truncation_floor(50)
        .with_preference(OverflowPreference::Summarize)
        .assemble(workflow_candidates(), &mut budget, Some(&summarizer))
        .await;
    assert_eq!(summarizer.last_bound(), 100);
}

// ── Properties ────────────────────────────────────────────────────

/// Small deterministic generator so the property runs are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 33) as usize) % bound.max(1)
    }
}

#[tokio::test]
async fn test_total_within_capacity_and_no_starvation() {
    let mut rng = Lcg(7);
    let summarizer = FixedSummarizer::new("summary of the artifact");

    for round in 0..200 {
        let n = 1 + rng.next(8);
        let mut candidates: Vec<_> = (0..n)
            .map(|i| {
                CandidateArtifact::new(
                    format!("c{i}"),
                    prose(1 + rng.next(900)),
                    rng.next(5) as u32,
                    CandidateKind::FullFile,
                )
            })
            .collect();
        candidates.sort_by_key(|c| c.priority);

        let capacity = rng.next(3000);
        let floor = rng.next(300);
        let mut budget = TokenBudget::new(capacity);
        let use_summarizer = round % 2 == 0;
        let ctx = ArtifactAssembler::new(estimator())
            .with_truncation_floor(floor)
            .assemble(
                candidates,
                &mut budget,
                use_summarizer.then_some(&summarizer as &dyn ctxpack_core::Summarizer),
            )
            .await;

        let included: usize = ctx
            .entries
            .iter()
            .filter(|e| !e.entry.is_omitted())
            .map(|e| e.tokens)
            .sum();
        assert!(included <= capacity, "round {round}: {included} > {capacity}");
        assert_eq!(included, ctx.total_tokens);

        if let Some(first_omitted) = ctx.entries.iter().position(|e| e.entry.is_omitted()) {
            assert!(
                ctx.entries[first_omitted..].iter().all(|e| !e.entry.is_full()),
                "round {round}: full entry after an omission"
            );
        }
    }
}

// ── Tiered context ────────────────────────────────────────────────

#[tokio::test]
async fn test_tier1_on_huge_file_is_skeleton_only() {
    let source: String = (0..2200)
        .map(|i| {
            format!(
                "pub fn handler_{i}(input: &str) -> usize {{\n    let trimmed = input.trim();\n    trimmed.len() + {i}\n}}\n\n"
            )
        })
        .collect();
    let est = estimator();
    assert!(est.estimate(&source) >= 50_000);

    let provider = MemoryArtifactProvider::new().with("src/handlers.rs", source);
    let builder = TieredContextBuilder::new(Arc::new(provider), est);
    let ctx = builder
        .build("src/handlers.rs", ContextTier::Tier1)
        .await
        .unwrap();

    assert!(ctx.truncated);
    assert!(ctx.tokens <= 1000);
    assert!(ctx.units_included > 0 && ctx.units_included < ctx.units_total);
    for line in ctx.content.lines() {
        assert!(
            line.starts_with("pub fn handler_") && line.ends_with('{'),
            "not a whole signature line: {line:?}"
        );
    }
}

#[tokio::test]
async fn test_tiers_grow_with_detail() {
    let source: String = (0..40)
        .map(|i| format!("fn step_{i}() {{\n    let a = {i};\n    let b = a * 2;\n    println!(\"{{b}}\");\n    drop(b);\n}}\n\n"))
        .collect();
    let provider = MemoryArtifactProvider::new().with("steps.rs", source.clone());
    let builder = TieredContextBuilder::new(Arc::new(provider), estimator());

    let t1 = builder.build("steps.rs", ContextTier::Tier1).await.unwrap();
    let t2 = builder.build("steps.rs", ContextTier::Tier2).await.unwrap();
    let t3 = builder.build("steps.rs", ContextTier::Tier3).await.unwrap();

    assert!(t1.tokens < t2.tokens && t2.tokens < t3.tokens);
    assert!(!t2.content.contains("drop(b)"));
    assert_eq!(t3.content, source);
}
