use std::collections::BTreeMap;
use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use crate::error::CoreError;

pub const DEFAULT_OOS_THRESHOLD: f64 = 0.15;
pub const DEFAULT_VARIANT: &str = "summary";
pub const DEFAULT_FALLBACK_MESSAGE: &str = "Out of scope";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentDefinition {
    pub id: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentCatalog {
    #[serde(default)]
    pub intents: Vec<IntentDefinition>,
    pub default_intent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oos_threshold: Option<f64>,
}

impl IntentCatalog {
    pub fn new(default_intent: impl Into<String>) -> Self {
        Self {
            intents: Vec::new(),
            default_intent: default_intent.into(),
            oos_threshold: None,
        }
    }

    pub fn with_intent<I, K>(mut self, id: impl Into<String>, keywords: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.intents.push(IntentDefinition {
            id: id.into(),
            keywords: keywords.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.oos_threshold = Some(threshold);
        self
    }

    pub fn oos_threshold(&self) -> f64 {
        self.oos_threshold.unwrap_or(DEFAULT_OOS_THRESHOLD)
    }

    /// Checks the invariants the classifier relies on but never enforces itself:
    /// unique intent ids, a non-empty default intent, and a finite, non-negative
    /// threshold.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.default_intent.trim().is_empty() {
            return Err(CoreError::Precondition(
                "catalog defaultIntent must not be empty".to_string(),
            ));
        }

        let threshold = self.oos_threshold();
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(CoreError::Precondition(format!(
                "catalog oosThreshold must be a non-negative number, got {threshold}"
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for intent in &self.intents {
            if !seen.insert(intent.id.as_str()) {
                return Err(CoreError::Precondition(format!(
                    "duplicate intent id `{}` in catalog",
                    intent.id
                )));
            }
        }

        Ok(())
    }
}

/// Per-intent keyword hit counts, kept in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScoreMap {
    entries: Vec<(String, u32)>,
}

impl ScoreMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, intent_id: impl Into<String>, score: u32) {
        let intent_id = intent_id.into();
        match self.entries.iter_mut().find(|(id, _)| *id == intent_id) {
            Some(entry) => entry.1 = score,
            None => self.entries.push((intent_id, score)),
        }
    }

    pub fn get(&self, intent_id: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|(id, _)| id == intent_id)
            .map(|(_, score)| *score)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(id, score)| (id.as_str(), *score))
    }

    pub fn total(&self) -> u32 {
        self.entries.iter().map(|(_, score)| *score).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for ScoreMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, score) in &self.entries {
            map.serialize_entry(id, score)?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentSelection {
    pub query: String,
    pub intent_id: String,
    pub confidence: f64,
    pub best_score: u32,
    pub is_out_of_scope: bool,
    pub rationale: String,
    pub scores: ScoreMap,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataAvailability {
    #[serde(default)]
    pub has_cluster_data: Option<bool>,
    #[serde(default)]
    pub is_ambiguous: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReasonCode {
    Oos,
    MissingClusterContext,
    Ambiguous,
}

impl ReasonCode {
    pub fn as_code(self) -> &'static str {
        match self {
            Self::Oos => "oos",
            Self::MissingClusterContext => "missing-cluster-context",
            Self::Ambiguous => "ambiguous",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_code())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackPolicy {
    pub id: String,
    #[serde(rename = "match")]
    pub match_reason: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicySet {
    #[serde(default)]
    pub policies: Vec<FallbackPolicy>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackDecision {
    pub policy_id: String,
    pub action: String,
    pub reason: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub user: String,
}

/// Variant name to template; the `default` variant is the per-intent fallback.
pub type IntentTemplates = BTreeMap<String, Template>;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FallbackTemplates {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reject: Option<Template>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateSet {
    #[serde(
        rename = "generalInfo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub general_info: Option<IntentTemplates>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackTemplates>,
    #[serde(flatten)]
    pub intents: BTreeMap<String, IntentTemplates>,
}

impl TemplateSet {
    pub fn reject_template(&self) -> Option<&Template> {
        self.fallback.as_ref().and_then(|fallback| fallback.reject.as_ref())
    }
}

/// Substitution variables supplied by the caller; sorted for deterministic output.
pub type Variables = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RenderResult {
    #[serde(rename_all = "camelCase")]
    Rendered {
        prompt: String,
        template_id: Option<String>,
        variables_used: Vec<String>,
        intent_id: String,
        variant: String,
        unresolved_placeholders: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Missing {
        prompt: String,
        template_id: Option<String>,
        error: String,
    },
}

impl RenderResult {
    pub fn prompt(&self) -> &str {
        match self {
            Self::Rendered { prompt, .. } | Self::Missing { prompt, .. } => prompt,
        }
    }

    pub fn template_id(&self) -> Option<&str> {
        match self {
            Self::Rendered { template_id, .. } | Self::Missing { template_id, .. } => {
                template_id.as_deref()
            }
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Missing { error, .. } => Some(error),
            Self::Rendered { .. } => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing { .. })
    }
}
