//! The Judge (§4.7): groundedness / citation coverage scoring over an
//! output against a pool of Evidence. No direct teacher analogue — a pure
//! scoring algorithm implemented directly from the spec's ten steps, built
//! on [`crate::types::Evidence`]/[`crate::types::Span`] from
//! [`crate::sentinel::telemetry::TelemetryStore`].

use std::time::{Duration, SystemTime};

use crate::types::{Evidence, JudgeDecision, Verdict, VerdictMode};

#[derive(Debug, Clone)]
pub struct JudgeConfig {
    pub enabled: bool,
    pub sample_n: usize,
    pub citation_min: f64,
    pub low_threshold: f64,
    pub privacy_default_groundedness: f64,
    pub evidence_candidates: usize,
    pub max_evidence_age: Duration,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sample_n: 6,
            citation_min: 0.5,
            low_threshold: 0.7,
            privacy_default_groundedness: 0.8,
            evidence_candidates: 20,
            max_evidence_age: Duration::from_secs(24 * 3600),
        }
    }
}

/// Soft context passed by the caller, mirrors §4.7 step 7's penalties.
#[derive(Debug, Clone, Copy, Default)]
pub struct JudgeContext {
    pub temperature: Option<f64>,
    pub context_length: Option<usize>,
    pub external_action: bool,
}

fn make_verdict(
    correlation_id: uuid::Uuid,
    span_id: uuid::Uuid,
    groundedness: f64,
    citation_coverage: f64,
    decision: JudgeDecision,
    mode: VerdictMode,
    sampled_indices: Vec<usize>,
    sentence_supports: Vec<f64>,
) -> Verdict {
    Verdict {
        id: uuid::Uuid::new_v4(),
        correlation_id,
        span_id,
        groundedness,
        citation_coverage,
        decision,
        mode,
        sampled_indices,
        sentence_supports,
    }
}

/// Split on `.!?` followed by whitespace and a capital letter (§4.7 step 4).
fn segment_sentences(output: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = output.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        current.push(c);
        if matches!(c, '.' | '!' | '?') {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && chars[j].is_uppercase() {
                sentences.push(current.trim().to_string());
                current.clear();
                i = j - 1;
            }
        }
        i += 1;
    }
    if !current.trim().is_empty() {
        sentences.push(current.trim().to_string());
    }
    sentences.into_iter().filter(|s| !s.is_empty()).collect()
}

/// §4.7 step 5: first 3 plus the 3 longest remaining, capped at sentence count.
fn sample_sentences(sentences: &[String], sample_n: usize) -> Vec<usize> {
    if sentences.len() <= sample_n {
        return (0..sentences.len()).collect();
    }
    let first_n = 3.min(sentences.len());
    let mut indices: Vec<usize> = (0..first_n).collect();

    let remaining_budget = sample_n.saturating_sub(first_n);
    let mut remaining: Vec<usize> = (first_n..sentences.len()).collect();
    remaining.sort_by_key(|&i| std::cmp::Reverse(sentences[i].len()));
    indices.extend(remaining.into_iter().take(remaining_budget));
    indices.sort();
    indices
}

fn tokenize_min_len(text: &str, min_len: usize) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_string())
        .filter(|w| w.len() > min_len)
        .map(|w| w.to_ascii_lowercase())
        .collect()
}

fn capitalized_entities(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()))
        .filter(|w| w.chars().next().is_some_and(|c| c.is_uppercase()))
        .map(|s| s.to_string())
        .collect()
}

fn numeric_tokens(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '.' && c != '%'))
        .filter(|w| w.chars().any(|c| c.is_ascii_digit()))
        .map(|s| s.to_string())
        .collect()
}

fn overlap_ratio(a: &[String], b: &[String]) -> f64 {
    if a.is_empty() {
        return 0.0;
    }
    let b_set: std::collections::HashSet<&String> = b.iter().collect();
    let hits = a.iter().filter(|t| b_set.contains(t)).count();
    hits as f64 / a.len() as f64
}

/// §4.7 step 6: max of exact-word, capitalized-entity, and numeric overlap,
/// scanned against up to `evidence_candidates` newest evidence pieces.
fn best_support(sentence: &str, candidates: &[Evidence]) -> f64 {
    let sentence_words = tokenize_min_len(sentence, 2);
    let sentence_entities = capitalized_entities(sentence);
    let sentence_numbers = numeric_tokens(sentence);

    candidates
        .iter()
        .map(|ev| {
            let ev_words = tokenize_min_len(&ev.content, 2);
            let ev_entities = capitalized_entities(&ev.content);
            let ev_numbers = numeric_tokens(&ev.content);
            let word_score = overlap_ratio(&sentence_words, &ev_words);
            let entity_score = overlap_ratio(&sentence_entities, &ev_entities);
            let number_score = overlap_ratio(&sentence_numbers, &ev_numbers);
            word_score.max(entity_score).max(number_score)
        })
        .fold(0.0_f64, f64::max)
}

/// §4.7 full algorithm. `now` is threaded explicitly rather than read from
/// the system clock so callers (and tests) control evidence-age filtering
/// deterministically.
pub fn judge(
    correlation_id: uuid::Uuid,
    span_id: uuid::Uuid,
    output: &str,
    evidence: &[Evidence],
    now: SystemTime,
    config: &JudgeConfig,
    ctx: JudgeContext,
) -> Verdict {
    // Step 1.
    if !config.enabled {
        return make_verdict(
            correlation_id,
            span_id,
            1.0,
            1.0,
            JudgeDecision::Allow,
            VerdictMode::Plaintext,
            Vec::new(),
            Vec::new(),
        );
    }

    // Step 2.
    if output.trim().is_empty() {
        return make_verdict(
            correlation_id,
            span_id,
            config.privacy_default_groundedness,
            1.0,
            JudgeDecision::Allow,
            VerdictMode::HashOnly,
            Vec::new(),
            Vec::new(),
        );
    }

    // Step 3: filter by age, newest-first, cap at 20.
    let mut filtered: Vec<&Evidence> = evidence
        .iter()
        .filter(|e| now.duration_since(e.timestamp).map(|age| age <= config.max_evidence_age).unwrap_or(true))
        .collect();
    filtered.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    filtered.truncate(20);

    if filtered.is_empty() {
        // §8.5: evidence = ∅ → groundedness = 0, citationCoverage = 0 (plaintext).
        return make_verdict(
            correlation_id,
            span_id,
            0.0,
            0.0,
            judge_decision_for(0.0, config, ctx),
            VerdictMode::Plaintext,
            Vec::new(),
            Vec::new(),
        );
    }

    // Step 4-5.
    let sentences = segment_sentences(output);
    if sentences.is_empty() {
        return make_verdict(
            correlation_id,
            span_id,
            0.0,
            0.0,
            judge_decision_for(0.0, config, ctx),
            VerdictMode::Plaintext,
            Vec::new(),
            Vec::new(),
        );
    }
    let sampled = sample_sentences(&sentences, config.sample_n);
    let candidates: Vec<Evidence> =
        filtered.into_iter().take(config.evidence_candidates).cloned().collect();

    // Step 6.
    let supports: Vec<f64> =
        sampled.iter().map(|&i| best_support(&sentences[i], &candidates)).collect();

    // Step 7.
    let mut groundedness = if supports.is_empty() {
        0.0
    } else {
        supports.iter().sum::<f64>() / supports.len() as f64
    };
    if ctx.temperature.is_some_and(|t| t > 0.8) {
        groundedness -= 0.05;
    }
    if ctx.context_length.is_some_and(|len| len < 100) {
        groundedness -= 0.05;
    }
    groundedness = groundedness.clamp(0.0, 1.0);

    // Step 8.
    let citation_coverage = if supports.is_empty() {
        0.0
    } else {
        supports.iter().filter(|&&s| s >= config.citation_min).count() as f64 / supports.len() as f64
    };

    // Step 9.
    let decision = judge_decision_for(groundedness, config, ctx);

    make_verdict(
        correlation_id,
        span_id,
        groundedness,
        citation_coverage,
        decision,
        VerdictMode::Plaintext,
        sampled,
        supports,
    )
}

fn judge_decision_for(groundedness: f64, config: &JudgeConfig, ctx: JudgeContext) -> JudgeDecision {
    if groundedness < config.low_threshold && ctx.external_action {
        JudgeDecision::RequireApproval
    } else {
        JudgeDecision::Allow
    }
}

/// An "error verdict" per §4.7's closing paragraph: any exception in the
/// judging pipeline produces groundedness=0.5, decision=require_approval.
pub fn error_verdict(correlation_id: uuid::Uuid, span_id: uuid::Uuid) -> Verdict {
    make_verdict(
        correlation_id,
        span_id,
        0.5,
        0.0,
        JudgeDecision::RequireApproval,
        VerdictMode::Plaintext,
        Vec::new(),
        Vec::new(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evidence(content: &str, age: Duration, now: SystemTime) -> Evidence {
        Evidence {
            id: uuid::Uuid::new_v4(),
            correlation_id: uuid::Uuid::new_v4(),
            span_id: uuid::Uuid::new_v4(),
            source_id: None,
            url: None,
            content: content.to_string(),
            content_hash: Evidence::hash_content(content),
            timestamp: now - age,
        }
    }

    #[test]
    fn disabled_judge_returns_default_allow_verdict() {
        let mut config = JudgeConfig::default();
        config.enabled = false;
        let v = judge(uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), "anything", &[], SystemTime::now(), &config, JudgeContext::default());
        assert_eq!(v.groundedness, 1.0);
        assert_eq!(v.citation_coverage, 1.0);
        assert_eq!(v.decision, JudgeDecision::Allow);
    }

    #[test]
    fn empty_output_returns_hash_only_verdict_with_privacy_default() {
        let config = JudgeConfig::default();
        let v = judge(uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), "", &[], SystemTime::now(), &config, JudgeContext::default());
        assert_eq!(v.mode, VerdictMode::HashOnly);
        assert_eq!(v.groundedness, config.privacy_default_groundedness);
        assert_eq!(v.decision, JudgeDecision::Allow);
    }

    #[test]
    fn s8_5_no_evidence_gives_zero_groundedness_and_coverage() {
        let config = JudgeConfig::default();
        let v = judge(uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), "ACME raised $42M.", &[], SystemTime::now(), &config, JudgeContext::default());
        assert_eq!(v.groundedness, 0.0);
        assert_eq!(v.citation_coverage, 0.0);
        assert_eq!(v.mode, VerdictMode::Plaintext);
    }

    #[test]
    fn output_equal_to_evidence_is_fully_grounded() {
        let now = SystemTime::now();
        let config = JudgeConfig::default();
        let content = "ACME closed a $10M round in 2022. The founders are based in Austin.";
        let ev = vec![evidence(content, Duration::from_secs(60), now)];
        let v = judge(uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), content, &ev, now, &config, JudgeContext::default());
        assert_eq!(v.groundedness, 1.0);
    }

    #[test]
    fn s5_unsupported_claim_with_external_action_requires_approval() {
        let now = SystemTime::now();
        let mut config = JudgeConfig::default();
        config.low_threshold = 0.7;
        let ev = vec![evidence("ACME closed a $10M round in 2022.", Duration::from_secs(60), now)];
        let ctx = JudgeContext { external_action: true, ..Default::default() };
        let v = judge(
            uuid::Uuid::new_v4(),
            uuid::Uuid::new_v4(),
            "ACME raised $42M in 2023.",
            &ev,
            now,
            &config,
            ctx,
        );
        assert!(v.groundedness < 0.7);
        assert_eq!(v.decision, JudgeDecision::RequireApproval);
    }

    #[test]
    fn stale_evidence_beyond_max_age_is_excluded() {
        let now = SystemTime::now();
        let config = JudgeConfig::default();
        let content = "ACME closed a $10M round in 2022.";
        let ev = vec![evidence(content, Duration::from_secs(3 * 24 * 3600), now)];
        let v = judge(uuid::Uuid::new_v4(), uuid::Uuid::new_v4(), content, &ev, now, &config, JudgeContext::default());
        assert_eq!(v.groundedness, 0.0);
    }

    #[test]
    fn sentence_segmentation_splits_on_terminal_punctuation_before_capital() {
        let sentences = segment_sentences("Hello there. How are you? I am fine!");
        assert_eq!(sentences.len(), 3);
    }
}
