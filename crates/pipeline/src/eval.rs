use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::Pipeline;

/// A labelled query. `expected_intent` is only checked when present, so
/// out-of-scope cases can leave it unset.
#[derive(Debug, Clone, Deserialize)]
pub struct EvalCase {
    pub query: String,
    #[serde(default)]
    pub expected_intent: Option<String>,
    #[serde(default)]
    pub expect_out_of_scope: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EvalSuite {
    #[serde(default)]
    pub cases: Vec<EvalCase>,
}

impl EvalSuite {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading eval suite {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("failed parsing eval suite {}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvalFailure {
    pub query: String,
    pub expected_intent: Option<String>,
    pub actual_intent: String,
    pub expected_out_of_scope: bool,
    pub actual_out_of_scope: bool,
    pub confidence: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EvalReport {
    pub total: usize,
    pub intent_checked: usize,
    pub intent_correct: usize,
    pub scope_correct: usize,
    pub failures: Vec<EvalFailure>,
}

impl EvalReport {
    pub fn scope_accuracy(&self) -> f64 {
        ratio(self.scope_correct, self.total)
    }

    pub fn intent_accuracy(&self) -> f64 {
        ratio(self.intent_correct, self.intent_checked)
    }

    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs every case through the classifier. Scope is judged on the classifier's
/// own out-of-scope flag, independent of data availability.
pub fn run_eval(pipeline: &Pipeline, suite: &EvalSuite) -> EvalReport {
    let mut report = EvalReport {
        total: suite.cases.len(),
        ..EvalReport::default()
    };

    for case in &suite.cases {
        let selection = pipeline.classify(&case.query);

        let scope_ok = selection.is_out_of_scope == case.expect_out_of_scope;
        let intent_ok = match case.expected_intent.as_deref() {
            Some(expected) => {
                report.intent_checked += 1;
                let ok = expected == selection.intent_id;
                if ok {
                    report.intent_correct += 1;
                }
                ok
            }
            None => true,
        };

        if scope_ok {
            report.scope_correct += 1;
        }

        if !(scope_ok && intent_ok) {
            report.failures.push(EvalFailure {
                query: case.query.clone(),
                expected_intent: case.expected_intent.clone(),
                actual_intent: selection.intent_id,
                expected_out_of_scope: case.expect_out_of_scope,
                actual_out_of_scope: selection.is_out_of_scope,
                confidence: selection.confidence,
            });
        }
    }

    info!(
        total = report.total,
        failures = report.failures.len(),
        scope_accuracy = report.scope_accuracy(),
        "evaluation finished"
    );

    report
}

fn ratio(hits: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64
    }
}
