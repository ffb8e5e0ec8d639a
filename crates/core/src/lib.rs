pub mod error;
pub mod intent;
pub mod models;
pub mod policy;
pub mod prompt;

pub use error::CoreError;
pub use intent::{classify, normalize_text, score_intents, select_intent};
pub use models::*;
pub use policy::{
    apply_fallback, detect_out_of_scope, route, FallbackRouter, ScopeAssessment, ScopeInput,
};
pub use prompt::{build_prompt, render, select_template, PromptRequest};
