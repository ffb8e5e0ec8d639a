use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::models::{RenderResult, Template, TemplateSet, Variables, DEFAULT_VARIANT};

const DEFAULT_TEMPLATE_KEY: &str = "default";

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{([^{}\s]+)\}\}").expect("valid placeholder regex"));

/// A render request. `variables` is a sorted map, so `variablesUsed` in the
/// result lists names alphabetically rather than in the order they were sent.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    #[serde(default)]
    pub query: String,
    pub intent_id: String,
    #[serde(default)]
    pub variant: Option<String>,
    #[serde(default)]
    pub variables: Variables,
}

impl PromptRequest {
    pub fn new(query: impl Into<String>, intent_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            intent_id: intent_id.into(),
            variant: None,
            variables: Variables::new(),
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn variant(&self) -> &str {
        self.variant.as_deref().unwrap_or(DEFAULT_VARIANT)
    }
}

/// Resolves a template by walking an ordered candidate list: the requested
/// variant, the intent's `default`, then the global reject template. Unknown
/// intents borrow the `generalInfo` set.
pub fn select_template<'a>(
    templates: &'a TemplateSet,
    intent_id: &str,
    variant: &str,
) -> Option<&'a Template> {
    let intent_templates = templates
        .intents
        .get(intent_id)
        .or(templates.general_info.as_ref());

    let candidates = [
        intent_templates.and_then(|set| set.get(variant)),
        intent_templates.and_then(|set| set.get(DEFAULT_TEMPLATE_KEY)),
        templates.reject_template(),
    ];

    candidates.into_iter().flatten().next()
}

/// Single pass over the template; inserted values are never scanned again.
pub fn render(body: &str, variables: &Variables) -> String {
    PLACEHOLDER
        .replace_all(body, |caps: &Captures<'_>| match variables.get(&caps[1]) {
            Some(value) => value_to_text(value),
            None => caps[0].to_string(),
        })
        .into_owned()
}

pub fn build_prompt(request: &PromptRequest, templates: &TemplateSet) -> RenderResult {
    let variant = request.variant();
    let Some(chosen) = select_template(templates, &request.intent_id, variant) else {
        debug!(intent = %request.intent_id, variant, "no template resolved");
        return RenderResult::Missing {
            prompt: String::new(),
            template_id: None,
            error: format!(
                "No template found for intent `{}` (variant `{}`)",
                request.intent_id, variant
            ),
        };
    };

    let mut context = Variables::new();
    context.insert("query".to_string(), Value::String(request.query.clone()));
    context.extend(
        request
            .variables
            .iter()
            .map(|(key, value)| (key.clone(), value.clone())),
    );

    let user_block = render(&chosen.user, &context);
    let system_block = render(chosen.system.as_deref().unwrap_or_default(), &context);

    let prompt = [system_block.trim(), user_block.trim()]
        .into_iter()
        .filter(|block| !block.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n");

    let unresolved_placeholders = unresolved_placeholders(&prompt);

    RenderResult::Rendered {
        prompt,
        template_id: chosen.template_id.clone(),
        variables_used: request.variables.keys().cloned().collect(),
        intent_id: request.intent_id.clone(),
        variant: variant.to_string(),
        unresolved_placeholders,
    }
}

/// Distinct `{{name}}` tokens left in rendered text, in order of appearance.
pub fn unresolved_placeholders(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for capture in PLACEHOLDER.captures_iter(text) {
        let name = &capture[1];
        if !names.iter().any(|existing| existing == name) {
            names.push(name.to_string());
        }
    }
    names
}

fn value_to_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
