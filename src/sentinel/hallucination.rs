//! Hallucination Detector (§4.6): best-effort textual heuristics over an
//! output string. Same severity-scoring shape as [`crate::sentinel::injection`];
//! word-set drift is plain `HashSet` arithmetic, no teacher analogue needed.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::sentinel::injection::Sensitivity;
use crate::types::Severity;

#[derive(Debug, Clone)]
pub struct HallucinationConfig {
    pub enabled: bool,
    pub sensitivity: Sensitivity,
    pub uncertainty_phrases: Vec<String>,
}

impl Default for HallucinationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sensitivity: Sensitivity::Medium,
            uncertainty_phrases: vec![
                "i'm not sure".into(),
                "i think".into(),
                "might be".into(),
                "possibly".into(),
                "it is unclear".into(),
            ],
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HallucinationResult {
    pub severity: Severity,
    pub score: f64,
    pub context_drift: f64,
    pub uncertainty_hits: usize,
    pub contradiction_hits: usize,
    pub temporal_issues: usize,
}

const CONTRADICTION_PAIRS: &[(&str, &str)] =
    &[("yes", "no"), ("true", "false"), ("always", "never"), ("increase", "decrease")];

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_ascii_lowercase())
        .filter(|w| w.len() > 3)
        .collect()
}

/// §4.6 `1 - |W_in ∩ W_out| / |W_in ∪ W_out|` using word sets (tokens len>3).
pub fn context_drift(input: &str, output: &str) -> f64 {
    let w_in = word_set(input);
    let w_out = word_set(output);
    if w_in.is_empty() && w_out.is_empty() {
        return 0.0;
    }
    let intersection = w_in.intersection(&w_out).count();
    let union = w_in.union(&w_out).count();
    if union == 0 {
        return 0.0;
    }
    1.0 - (intersection as f64 / union as f64)
}

fn year_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(1[5-9]\d{2}|20\d{2}|21\d{2})\b").unwrap())
}

/// Calendar/temporal impossibilities (§4.6): flags years beyond a sane
/// horizon or explicit "before X after Y" phrasing where Y > X.
fn temporal_issues(text: &str) -> usize {
    let mut issues = 0;
    let years: Vec<i32> =
        year_re().find_iter(text).filter_map(|m| m.as_str().parse::<i32>().ok()).collect();
    if years.iter().any(|&y| y > 2100) {
        issues += 1;
    }
    let lower = text.to_ascii_lowercase();
    if lower.contains("before") && lower.contains("after") {
        if let (Some(before_years), Some(after_years)) =
            (years.first(), years.get(1))
        {
            if before_years < after_years && lower.find("before").unwrap() < lower.find("after").unwrap() {
                // benign ordering; only flag the inverted case below
            }
            if before_years > after_years {
                issues += 1;
            }
        }
    }
    issues
}

/// §4.6 algorithm: combine pattern counts (×2), drift (×⌊score·10⌋), factual
/// issues (×5), weighted by sensitivity, into a severity classification.
pub fn detect(input: &str, output: &str, config: &HallucinationConfig) -> HallucinationResult {
    if !config.enabled {
        return HallucinationResult { severity: Severity::Low, ..Default::default() };
    }

    let lower = output.to_ascii_lowercase();
    let uncertainty_hits =
        config.uncertainty_phrases.iter().filter(|p| lower.contains(p.as_str())).count();

    let contradiction_hits = CONTRADICTION_PAIRS
        .iter()
        .filter(|(a, b)| lower.contains(a) && lower.contains(b))
        .count();

    let drift = context_drift(input, output);
    let temporal = temporal_issues(output);

    let pattern_count = uncertainty_hits + contradiction_hits;
    let mut score = (pattern_count as f64) * 2.0;
    score += (drift * 10.0).floor();
    score += (temporal as f64) * 5.0;
    score *= config.sensitivity.factor();

    let severity = if score >= 15.0 {
        Severity::High
    } else if score >= 8.0 {
        Severity::Medium
    } else {
        Severity::Low
    };

    HallucinationResult {
        severity,
        score,
        context_drift: drift,
        uncertainty_hits,
        contradiction_hits,
        temporal_issues: temporal,
    }
}
