use serde::Serialize;
use tracing::debug;

use crate::models::{
    DataAvailability, FallbackDecision, FallbackPolicy, IntentSelection, PolicySet, ReasonCode,
    DEFAULT_FALLBACK_MESSAGE,
};

#[derive(Debug, Clone, Copy)]
pub struct ScopeInput<'a> {
    pub intent: &'a IntentSelection,
    pub data_availability: DataAvailability,
}

impl<'a> ScopeInput<'a> {
    pub fn new(intent: &'a IntentSelection, data_availability: DataAvailability) -> Self {
        Self {
            intent,
            data_availability,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeAssessment {
    #[serde(rename = "isOOS")]
    pub is_oos: bool,
    pub reasons: Vec<ReasonCode>,
}

/// Collects every reason the request cannot be answered as asked. Only an
/// explicit `false` for cluster data or an explicit `true` for ambiguity counts;
/// absent flags never add a reason.
pub fn detect_out_of_scope(input: &ScopeInput<'_>) -> ScopeAssessment {
    let mut reasons = Vec::new();

    if input.intent.is_out_of_scope {
        reasons.push(ReasonCode::Oos);
    }
    if input.data_availability.has_cluster_data == Some(false) {
        reasons.push(ReasonCode::MissingClusterContext);
    }
    if input.data_availability.is_ambiguous == Some(true) {
        reasons.push(ReasonCode::Ambiguous);
    }

    ScopeAssessment {
        is_oos: !reasons.is_empty(),
        reasons,
    }
}

pub fn apply_fallback(
    reasons: &[ReasonCode],
    policies: &[FallbackPolicy],
) -> Option<FallbackDecision> {
    policies
        .iter()
        .find(|policy| {
            reasons
                .iter()
                .any(|reason| reason.as_code() == policy.match_reason)
        })
        .map(|policy| FallbackDecision {
            policy_id: policy.id.clone(),
            action: policy.action.clone(),
            reason: policy.match_reason.clone(),
            message: policy
                .message
                .clone()
                .or_else(|| policy.notes.clone())
                .unwrap_or_else(|| DEFAULT_FALLBACK_MESSAGE.to_string()),
        })
}

/// `None` covers two cases: the request is in scope, or it is out of scope and
/// no policy matched. Callers that need to tell them apart should run
/// [`detect_out_of_scope`] themselves.
pub fn route(input: &ScopeInput<'_>, policies: &[FallbackPolicy]) -> Option<FallbackDecision> {
    let assessment = detect_out_of_scope(input);
    if !assessment.is_oos {
        return None;
    }

    let decision = apply_fallback(&assessment.reasons, policies);
    debug!(
        reasons = ?assessment.reasons,
        policy = decision.as_ref().map(|d| d.policy_id.as_str()),
        "fallback routed"
    );
    decision
}

#[derive(Debug, Clone, Default)]
pub struct FallbackRouter {
    policies: PolicySet,
}

impl FallbackRouter {
    pub fn new(policies: PolicySet) -> Self {
        Self { policies }
    }

    pub fn assess(&self, input: &ScopeInput<'_>) -> ScopeAssessment {
        detect_out_of_scope(input)
    }

    pub fn apply(&self, reasons: &[ReasonCode]) -> Option<FallbackDecision> {
        apply_fallback(reasons, &self.policies.policies)
    }

    pub fn route(&self, input: &ScopeInput<'_>) -> Option<FallbackDecision> {
        route(input, &self.policies.policies)
    }
}
