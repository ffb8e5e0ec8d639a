pub mod eval;

use std::sync::Arc;
use std::time::Instant;

use promptgate_config::ConfigSnapshot;
use promptgate_core::{
    build_prompt, classify, normalize_text, DataAvailability, FallbackDecision, FallbackRouter,
    IntentSelection, PromptRequest, ReasonCode, RenderResult, ScopeAssessment, ScopeInput,
    Variables,
};
use promptgate_observability::{DecisionLog, PipelineMetrics};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

pub use eval::{run_eval, EvalCase, EvalFailure, EvalReport, EvalSuite};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineRequest {
    pub query: String,
    #[serde(default)]
    pub data_availability: DataAvailability,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub variables: Variables,
}

impl PipelineRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineOutcome {
    Fallback { decision: FallbackDecision },
    /// Out of scope, but no configured policy matched any of the reasons.
    UnhandledOutOfScope { reasons: Vec<ReasonCode> },
    Prompt { render: RenderResult },
}

impl PipelineOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fallback { .. } => "fallback",
            Self::UnhandledOutOfScope { .. } => "unhandled_out_of_scope",
            Self::Prompt { render } if render.is_missing() => "missing_template",
            Self::Prompt { .. } => "prompt",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResponse {
    pub request_id: Uuid,
    pub intent: IntentSelection,
    pub scope: ScopeAssessment,
    pub outcome: PipelineOutcome,
}

#[derive(Serialize)]
struct DecisionRecord<'a> {
    request_id: Uuid,
    query: &'a str,
    intent_id: &'a str,
    confidence: f64,
    is_out_of_scope: bool,
    reasons: &'a [ReasonCode],
    outcome: &'static str,
    policy_id: Option<&'a str>,
    template_id: Option<&'a str>,
}

#[derive(Clone)]
pub struct Pipeline {
    config: Arc<ConfigSnapshot>,
    router: FallbackRouter,
    metrics: Arc<PipelineMetrics>,
    decision_log: Option<Arc<DecisionLog>>,
}

impl Pipeline {
    pub fn new(config: Arc<ConfigSnapshot>, metrics: Arc<PipelineMetrics>) -> Self {
        let router = FallbackRouter::new(config.policies.clone());
        Self {
            config,
            router,
            metrics,
            decision_log: None,
        }
    }

    pub fn with_decision_log(mut self, log: DecisionLog) -> Self {
        self.decision_log = Some(Arc::new(log));
        self
    }

    /// Same metrics and decision log, new configuration.
    pub fn reconfigure(&self, config: Arc<ConfigSnapshot>) -> Self {
        Self {
            router: FallbackRouter::new(config.policies.clone()),
            config,
            metrics: self.metrics.clone(),
            decision_log: self.decision_log.clone(),
        }
    }

    pub fn config(&self) -> &ConfigSnapshot {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Matches on whitespace-normalized text but echoes `query` as given.
    pub fn classify(&self, query: &str) -> IntentSelection {
        let mut selection = classify(&normalize_text(query), &self.config.catalog);
        selection.query = query.to_string();
        selection
    }

    pub fn render(&self, request: &PromptRequest) -> RenderResult {
        build_prompt(request, &self.config.templates)
    }

    #[instrument(skip(self, request), fields(query_len = request.query.len()))]
    pub fn handle(&self, request: &PipelineRequest) -> PipelineResponse {
        let started = Instant::now();
        self.metrics.inc_request();

        let request_id = Uuid::new_v4();
        let query = normalize_text(&request.query);
        let intent = self.classify(&request.query);
        let scope = self
            .router
            .assess(&ScopeInput::new(&intent, request.data_availability));

        let outcome = if scope.is_oos {
            match self.router.apply(&scope.reasons) {
                Some(decision) => {
                    self.metrics.inc_fallback();
                    PipelineOutcome::Fallback { decision }
                }
                None => {
                    self.metrics.inc_unhandled_oos();
                    warn!(
                        request_id = %request_id,
                        reasons = ?scope.reasons,
                        "out of scope with no matching fallback policy"
                    );
                    PipelineOutcome::UnhandledOutOfScope {
                        reasons: scope.reasons.clone(),
                    }
                }
            }
        } else {
            self.metrics.inc_in_scope();
            let prompt_request = PromptRequest {
                query: query.clone(),
                intent_id: intent.intent_id.clone(),
                variant: request.variant.clone(),
                variables: request.variables.clone(),
            };
            let render = build_prompt(&prompt_request, &self.config.templates);
            if let Some(error) = render.error() {
                self.metrics.inc_missing_template();
                warn!(request_id = %request_id, intent = %intent.intent_id, error, "no template resolved");
            }
            PipelineOutcome::Prompt { render }
        };

        self.record(request_id, &query, &intent, &scope, &outcome);
        self.metrics.observe_latency(started.elapsed());

        info!(
            request_id = %request_id,
            intent = %intent.intent_id,
            confidence = intent.confidence,
            outcome = outcome.label(),
            "query handled"
        );

        PipelineResponse {
            request_id,
            intent,
            scope,
            outcome,
        }
    }

    fn record(
        &self,
        request_id: Uuid,
        query: &str,
        intent: &IntentSelection,
        scope: &ScopeAssessment,
        outcome: &PipelineOutcome,
    ) {
        let Some(log) = self.decision_log.as_ref() else {
            return;
        };

        let (policy_id, template_id) = match outcome {
            PipelineOutcome::Fallback { decision } => (Some(decision.policy_id.as_str()), None),
            PipelineOutcome::Prompt { render } => (None, render.template_id()),
            PipelineOutcome::UnhandledOutOfScope { .. } => (None, None),
        };

        log.append(&DecisionRecord {
            request_id,
            query,
            intent_id: &intent.intent_id,
            confidence: intent.confidence,
            is_out_of_scope: intent.is_out_of_scope,
            reasons: &scope.reasons,
            outcome: outcome.label(),
            policy_id,
            template_id,
        });
    }
}
