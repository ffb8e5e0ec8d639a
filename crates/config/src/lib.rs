use std::fs;
use std::path::{Path, PathBuf};

use promptgate_core::{CoreError, IntentCatalog, PolicySet, TemplateSet};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

pub const CATALOG_FILE: &str = "intent_catalog.json";
pub const POLICIES_FILE: &str = "fallback_policies.yml";
pub const TEMPLATES_FILE: &str = "prompt_templates.yml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to parse YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("precondition violated in {path}: {message}")]
    Precondition { path: PathBuf, message: String },
}

/// Locations of the three configuration artifacts. Nothing in the pipeline
/// resolves paths on its own; callers build one of these and hand it to
/// [`ConfigLoader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    pub catalog: PathBuf,
    pub policies: PathBuf,
    pub templates: PathBuf,
}

impl ConfigPaths {
    pub fn from_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            catalog: dir.join(CATALOG_FILE),
            policies: dir.join(POLICIES_FILE),
            templates: dir.join(TEMPLATES_FILE),
        }
    }
}

/// An immutable, fully parsed configuration. Load once, share behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    pub catalog: IntentCatalog,
    pub policies: PolicySet,
    pub templates: TemplateSet,
}

impl ConfigSnapshot {
    pub fn from_parts(catalog: IntentCatalog, policies: PolicySet, templates: TemplateSet) -> Self {
        Self {
            catalog,
            policies,
            templates,
        }
    }

    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            intents: self.catalog.intents.len(),
            default_intent: self.catalog.default_intent.clone(),
            oos_threshold: self.catalog.oos_threshold(),
            policies: self.policies.policies.len(),
            template_intents: self.templates.intents.len(),
            has_general_info: self.templates.general_info.is_some(),
            has_reject_template: self.templates.reject_template().is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct ConfigSummary {
    pub intents: usize,
    pub default_intent: String,
    pub oos_threshold: f64,
    pub policies: usize,
    pub template_intents: usize,
    pub has_general_info: bool,
    pub has_reject_template: bool,
}

#[derive(Debug, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    templates: TemplateSet,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn load(paths: &ConfigPaths) -> Result<ConfigSnapshot, ConfigError> {
        let catalog = Self::load_catalog(&paths.catalog)?;
        let policies = Self::load_policies(&paths.policies)?;
        let templates = Self::load_templates(&paths.templates)?;

        info!(
            intents = catalog.intents.len(),
            policies = policies.policies.len(),
            template_intents = templates.intents.len(),
            "configuration loaded"
        );

        Ok(ConfigSnapshot::from_parts(catalog, policies, templates))
    }

    pub fn load_dir(dir: impl AsRef<Path>) -> Result<ConfigSnapshot, ConfigError> {
        Self::load(&ConfigPaths::from_dir(dir))
    }

    pub fn load_catalog(path: &Path) -> Result<IntentCatalog, ConfigError> {
        let raw = read(path)?;
        let catalog: IntentCatalog =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        prepare_catalog(catalog).map_err(|err| match err {
            CoreError::Precondition(message) => ConfigError::Precondition {
                path: path.to_path_buf(),
                message,
            },
        })
    }

    pub fn load_policies(path: &Path) -> Result<PolicySet, ConfigError> {
        let raw = read(path)?;
        // An empty document deserializes to unit, so fall back to no policies.
        let parsed: Option<PolicySet> =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(parsed.unwrap_or_default())
    }

    pub fn load_templates(path: &Path) -> Result<TemplateSet, ConfigError> {
        let raw = read(path)?;
        let parsed: Option<TemplateFile> =
            serde_yaml::from_str(&raw).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(parsed.map(|file| file.templates).unwrap_or_default())
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn prepare_catalog(mut catalog: IntentCatalog) -> Result<IntentCatalog, CoreError> {
    catalog.validate()?;

    for intent in &mut catalog.intents {
        let before = intent.keywords.len();
        // A blank keyword is a substring of every query.
        intent.keywords.retain(|keyword| !keyword.trim().is_empty());
        if intent.keywords.len() != before {
            warn!(intent = %intent.id, dropped = before - intent.keywords.len(), "blank keywords dropped");
        }
    }

    Ok(catalog)
}
