//! Policy file loading and hot reload (§6 "Policy files", §A.3).
//!
//! Two JSON documents are read at startup and watched by mtime: the main
//! Sentinel config and the Shield config. Merge order is `defaults <
//! main-config < shield-config` — the Shield document wins within
//! `shield.*`. Reload uses the teacher's [`crate::config_adaptive::Adaptive`]
//! pattern rather than a `RwLock`.
//!
//! The runtime types in [`crate::sentinel::shield`] hold compiled `Regex`es
//! and aren't themselves `Deserialize`; this module defines plain JSON
//! "doc" shapes that mirror §6's option names and converts them into the
//! runtime types at load time.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::sentinel::injection::{InjectionAction, InjectionConfig, Sensitivity};
use crate::sentinel::judge::JudgeConfig;
use crate::sentinel::shield::{
    Condition, ConditionField, ConditionOp, FailureBehavior, MaskRule, MaskTokens, ShieldAction,
    ShieldConfig, ShieldPolicy,
};
use crate::sentinel::SentinelConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    Parse { path: PathBuf, #[source] source: serde_json::Error },
    #[error("invalid regex pattern `{pattern}` in config: {source}")]
    InvalidPattern { pattern: String, #[source] source: regex::Error },
}

fn read_json(path: &Path) -> Result<Value, ConfigError> {
    let text = std::fs::read_to_string(path)
        .map_err(|source| ConfigError::Io { path: path.to_path_buf(), source })?;
    serde_json::from_str(&text)
        .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
}

fn mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

/// Deep-merges `overlay` on top of `base`, object keys replaced
/// recursively; non-object values in `overlay` always win.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value;
        }
    }
}

// ---- Main Sentinel config doc (§6 "Recognised configuration options") ----

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionDoc {
    pub enabled: bool,
    pub sensitivity: String,
    pub patterns: Vec<String>,
    pub action: String,
}

impl Default for InjectionDoc {
    fn default() -> Self {
        let d = InjectionConfig::default();
        Self {
            enabled: d.enabled,
            sensitivity: sensitivity_to_str(d.sensitivity).to_string(),
            patterns: Vec::new(),
            action: injection_action_to_str(d.forced_action).to_string(),
        }
    }
}

fn sensitivity_from_str(s: &str) -> Sensitivity {
    match s {
        "low" => Sensitivity::Low,
        "high" => Sensitivity::High,
        _ => Sensitivity::Medium,
    }
}

fn sensitivity_to_str(s: Sensitivity) -> &'static str {
    match s {
        Sensitivity::Low => "low",
        Sensitivity::Medium => "medium",
        Sensitivity::High => "high",
    }
}

fn injection_action_from_str(s: &str) -> Option<InjectionAction> {
    match s {
        "block" => Some(InjectionAction::Block),
        "mask" => Some(InjectionAction::Mask),
        "require_approval" => Some(InjectionAction::RequireApproval),
        "flag" => Some(InjectionAction::Flag),
        _ => None,
    }
}

fn injection_action_to_str(a: Option<InjectionAction>) -> &'static str {
    match a {
        Some(InjectionAction::Block) => "block",
        Some(InjectionAction::Mask) => "mask",
        Some(InjectionAction::RequireApproval) => "require_approval",
        Some(InjectionAction::Flag) => "flag",
        None => "",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeDoc {
    pub enabled: bool,
    pub sample_n: usize,
    pub citation_min: f64,
    pub low_threshold: f64,
    pub privacy_default_groundedness: f64,
    pub evidence_candidates: usize,
    pub max_evidence_age_hours: u64,
}

impl Default for JudgeDoc {
    fn default() -> Self {
        let d = JudgeConfig::default();
        Self {
            enabled: d.enabled,
            sample_n: d.sample_n,
            citation_min: d.citation_min,
            low_threshold: d.low_threshold,
            privacy_default_groundedness: d.privacy_default_groundedness,
            evidence_candidates: d.evidence_candidates,
            max_evidence_age_hours: d.max_evidence_age.as_secs() / 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfigDoc {
    pub telemetry_enabled: bool,
    pub shield_enabled: bool,
    pub injection: InjectionDoc,
    pub hallucination_enabled: bool,
    pub judge: JudgeDoc,
}

impl Default for SentinelConfigDoc {
    fn default() -> Self {
        Self {
            telemetry_enabled: true,
            shield_enabled: true,
            injection: InjectionDoc::default(),
            hallucination_enabled: true,
            judge: JudgeDoc::default(),
        }
    }
}

impl SentinelConfigDoc {
    fn into_config(self) -> Result<SentinelConfig, ConfigError> {
        let mut config = SentinelConfig::default();
        config.shield_enabled = self.shield_enabled;
        config.hallucination.enabled = self.hallucination_enabled;

        config.injection.enabled = self.injection.enabled;
        config.injection.sensitivity = sensitivity_from_str(&self.injection.sensitivity);
        config.injection.forced_action = injection_action_from_str(&self.injection.action);

        config.judge.enabled = self.judge.enabled;
        config.judge.sample_n = self.judge.sample_n;
        config.judge.citation_min = self.judge.citation_min;
        config.judge.low_threshold = self.judge.low_threshold;
        config.judge.privacy_default_groundedness = self.judge.privacy_default_groundedness;
        config.judge.evidence_candidates = self.judge.evidence_candidates;
        config.judge.max_evidence_age = Duration::from_secs(self.judge.max_evidence_age_hours * 3600);

        Ok(config)
    }
}

// ---- Shield config doc ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionDoc {
    pub field: String,
    pub op: String,
    pub value: Value,
}

fn condition_field_from_str(s: &str) -> Option<ConditionField> {
    match s {
        "groundedness" => Some(ConditionField::Groundedness),
        "citation_coverage" => Some(ConditionField::CitationCoverage),
        "injection_detected" => Some(ConditionField::InjectionDetected),
        "pii_found" => Some(ConditionField::PiiFound),
        "hallucination_severity" => Some(ConditionField::HallucinationSeverity),
        "external_action" => Some(ConditionField::ExternalAction),
        "cost" => Some(ConditionField::Cost),
        "latency" => Some(ConditionField::Latency),
        _ => None,
    }
}

fn condition_op_from_doc(op: &str, value: &Value) -> Option<ConditionOp> {
    match op {
        "eq" => Some(ConditionOp::Eq(value.clone())),
        "min" => value.as_f64().map(ConditionOp::Min),
        "max" => value.as_f64().map(ConditionOp::Max),
        "length_min" => value.as_u64().map(|n| ConditionOp::LengthMin(n as usize)),
        "length_max" => value.as_u64().map(|n| ConditionOp::LengthMax(n as usize)),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShieldPolicyDoc {
    pub id: String,
    pub priority: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: Vec<ConditionDoc>,
    pub action: String,
    #[serde(default)]
    pub r#continue: bool,
    #[serde(default)]
    pub params: Value,
}

fn default_true() -> bool {
    true
}

fn shield_action_from_str(s: &str) -> Option<ShieldAction> {
    match s {
        "pass" => Some(ShieldAction::Pass),
        "mask" => Some(ShieldAction::Mask),
        "rewrite" => Some(ShieldAction::Rewrite),
        "block" => Some(ShieldAction::Block),
        "require_approval" => Some(ShieldAction::RequireApproval),
        "flag" => Some(ShieldAction::Flag),
        _ => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MaskTokensDoc {
    #[serde(default)]
    pub pii: Vec<(String, String)>,
    #[serde(default)]
    pub hallucination: Vec<(String, String)>,
    #[serde(default)]
    pub injection: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShieldConfigDoc {
    pub enabled: bool,
    pub policies: Vec<ShieldPolicyDoc>,
    pub mask_tokens: MaskTokensDoc,
    pub rewrite_max_attempts: usize,
    pub rewrite_latency_budget_ms: u64,
    pub max_decision_time_ms: u64,
    pub failure_external_sink_default: String,
    pub failure_internal_sink_default: String,
}

impl Default for ShieldConfigDoc {
    fn default() -> Self {
        let d = ShieldConfig::default();
        Self {
            enabled: d.enabled,
            policies: Vec::new(),
            mask_tokens: MaskTokensDoc::default(),
            rewrite_max_attempts: d.rewrite_max_attempts,
            rewrite_latency_budget_ms: d.rewrite_latency_budget.as_millis() as u64,
            max_decision_time_ms: d.max_decision_time.as_millis() as u64,
            failure_external_sink_default: "block".to_string(),
            failure_internal_sink_default: "flag".to_string(),
        }
    }
}

fn compile_mask_rules(pairs: &[(String, String)]) -> Result<Vec<MaskRule>, ConfigError> {
    pairs
        .iter()
        .map(|(pattern, token)| {
            regex::Regex::new(pattern)
                .map(|compiled| MaskRule { pattern: compiled, token: token.clone() })
                .map_err(|source| ConfigError::InvalidPattern { pattern: pattern.clone(), source })
        })
        .collect()
}

impl ShieldConfigDoc {
    fn into_config(self) -> Result<ShieldConfig, ConfigError> {
        let mut policies = Vec::with_capacity(self.policies.len());
        for p in self.policies {
            let conditions = p
                .conditions
                .iter()
                .filter_map(|c| {
                    let field = condition_field_from_str(&c.field)?;
                    let op = condition_op_from_doc(&c.op, &c.value)?;
                    Some(Condition { field, op })
                })
                .collect();
            let action = shield_action_from_str(&p.action).unwrap_or(ShieldAction::Flag);
            policies.push(ShieldPolicy {
                id: p.id,
                priority: p.priority,
                enabled: p.enabled,
                conditions,
                action,
                continue_on_match: p.r#continue,
                params: p.params,
            });
        }

        let mask_tokens = MaskTokens {
            pii: compile_mask_rules(&self.mask_tokens.pii)?,
            hallucination: compile_mask_rules(&self.mask_tokens.hallucination)?,
            injection: compile_mask_rules(&self.mask_tokens.injection)?,
        };

        let default_behavior = FailureBehavior::default();
        let failure_behavior = FailureBehavior {
            external_sink_default: shield_action_from_str(&self.failure_external_sink_default)
                .unwrap_or(default_behavior.external_sink_default),
            internal_sink_default: shield_action_from_str(&self.failure_internal_sink_default)
                .unwrap_or(default_behavior.internal_sink_default),
        };

        Ok(ShieldConfig {
            enabled: self.enabled,
            policies,
            mask_tokens,
            rewrite_max_attempts: self.rewrite_max_attempts,
            rewrite_latency_budget: Duration::from_millis(self.rewrite_latency_budget_ms),
            max_decision_time: Duration::from_millis(self.max_decision_time_ms),
            failure_behavior,
        })
    }
}

/// Tracks the two policy files on disk and produces merged, converted
/// config values, reloading when either file's mtime advances.
pub struct PolicyFiles {
    main_path: Option<PathBuf>,
    shield_path: Option<PathBuf>,
    main_mtime: Option<SystemTime>,
    shield_mtime: Option<SystemTime>,
}

impl PolicyFiles {
    pub fn new(main_path: Option<PathBuf>, shield_path: Option<PathBuf>) -> Self {
        Self { main_path, shield_path, main_mtime: None, shield_mtime: None }
    }

    /// §6 "Merge order: defaults < main-config < shield-config (shield-config
    /// wins within `shield.*`)". Loads both documents (either may be absent)
    /// and converts into the runtime config types.
    pub fn load(&mut self) -> Result<(SentinelConfig, ShieldConfig), ConfigError> {
        let sentinel_defaults =
            serde_json::to_value(SentinelConfigDoc::default()).expect("doc always serializes");
        let main_overlay = match &self.main_path {
            Some(p) => {
                self.main_mtime = mtime(p);
                Some(read_json(p)?)
            }
            None => None,
        };
        let mut sentinel_value = sentinel_defaults;
        if let Some(overlay) = main_overlay.clone() {
            merge(&mut sentinel_value, overlay);
        }
        // shield-config can also carry a nested `sentinel` override and wins
        // within `shield.*`, but main-level sentinel keys stay authoritative
        // outside the shield namespace per §6's merge order.
        let sentinel_doc: SentinelConfigDoc = serde_json::from_value(sentinel_value)
            .map_err(|source| ConfigError::Parse { path: PathBuf::from("<merged-sentinel>"), source })?;

        let shield_defaults =
            serde_json::to_value(ShieldConfigDoc::default()).expect("doc always serializes");
        let shield_overlay = match &self.shield_path {
            Some(p) => {
                self.shield_mtime = mtime(p);
                Some(read_json(p)?)
            }
            None => None,
        };
        let mut shield_value = shield_defaults;
        if let Some(overlay) = main_overlay.and_then(|v| v.get("shield").cloned()) {
            merge(&mut shield_value, overlay);
        }
        if let Some(overlay) = shield_overlay {
            merge(&mut shield_value, overlay);
        }
        let shield_doc: ShieldConfigDoc = serde_json::from_value(shield_value)
            .map_err(|source| ConfigError::Parse { path: PathBuf::from("<merged-shield>"), source })?;

        Ok((sentinel_doc.into_config()?, shield_doc.into_config()?))
    }

    /// §4.8 "hot-reload-by-mtime": returns `true` if either file's mtime has
    /// advanced since the last [`Self::load`].
    pub fn changed(&self) -> bool {
        let main_changed = self.main_path.as_deref().map(mtime).unwrap_or(None) != self.main_mtime;
        let shield_changed =
            self.shield_path.as_deref().map(mtime).unwrap_or(None) != self.shield_mtime;
        main_changed || shield_changed
    }
}

/// Loads the Sentinel and Shield configs once at startup from the given
/// paths (either may be absent, yielding pure defaults).
pub fn load_configs(
    main_path: Option<PathBuf>,
    shield_path: Option<PathBuf>,
) -> Result<(SentinelConfig, ShieldConfig), ConfigError> {
    PolicyFiles::new(main_path, shield_path).load()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overlays_objects_recursively() {
        let mut base = serde_json::json!({ "a": 1, "nested": { "x": 1, "y": 2 } });
        let overlay = serde_json::json!({ "nested": { "y": 99 } });
        merge(&mut base, overlay);
        assert_eq!(base["a"], 1);
        assert_eq!(base["nested"]["x"], 1);
        assert_eq!(base["nested"]["y"], 99);
    }

    #[test]
    fn defaults_load_with_no_files_present() {
        let (sentinel, shield) = load_configs(None, None).unwrap();
        assert!(sentinel.shield_enabled);
        assert!(shield.enabled);
        assert!(shield.policies.is_empty());
    }

    #[test]
    fn unchanged_files_report_no_change() {
        let files = PolicyFiles::new(None, None);
        assert!(!files.changed());
    }

    #[test]
    fn shield_policy_doc_converts_conditions_and_action() {
        let doc = ShieldConfigDoc {
            policies: vec![ShieldPolicyDoc {
                id: "p1".into(),
                priority: 5,
                enabled: true,
                conditions: vec![ConditionDoc {
                    field: "groundedness".into(),
                    op: "max".into(),
                    value: serde_json::json!(0.5),
                }],
                action: "block".into(),
                r#continue: false,
                params: serde_json::json!({}),
            }],
            ..ShieldConfigDoc::default()
        };
        let config = doc.into_config().unwrap();
        assert_eq!(config.policies.len(), 1);
        assert_eq!(config.policies[0].action, ShieldAction::Block);
        assert_eq!(config.policies[0].conditions.len(), 1);
    }
}
