use thiserror::Error;

use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    #[error("No models available for capability '{0}'.")]
    NoModels(String),
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    /// Resolves `requested` for `capability`, falling back to the
    /// capability's default and saying why.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
    ) -> Result<ModelSelection, SelectionError> {
        let requested = requested.map(str::trim).filter(|value| !value.is_empty());
        if let Some(name) = requested {
            if let Some(model) = self.registry.ensure(name, capability) {
                return Ok(ModelSelection {
                    model,
                    requested: Some(name.to_string()),
                    fallback_reason: None,
                });
            }
        }

        let fallback_reason = match requested {
            Some(name) => {
                format!("Requested model '{name}' unavailable for capability '{capability}'.")
            }
            None => "No model specified; using default.".to_string(),
        };
        let model = self
            .registry
            .by_capability(capability)
            .into_iter()
            .next()
            .ok_or_else(|| SelectionError::NoModels(capability.to_string()))?;
        Ok(ModelSelection {
            model,
            requested: requested.map(str::to_string),
            fallback_reason: Some(fallback_reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::{ModelSelector, SelectionError};
    use crate::models::{ModelRegistry, ModelSpec, DESIGN_QA_CAPABILITY};

    fn qa_model(name: &str, service: &str) -> ModelSpec {
        ModelSpec {
            name: name.to_string(),
            service: service.to_string(),
            capabilities: vec![DESIGN_QA_CAPABILITY.to_string()],
            max_output_tokens: None,
        }
    }

    #[test]
    fn explicit_model_is_used_without_fallback() {
        let selection = ModelSelector::new(None)
            .select(Some("dryrun-qa-1"), DESIGN_QA_CAPABILITY)
            .unwrap();
        assert_eq!(selection.model.service, "dryrun");
        assert_eq!(selection.fallback_reason, None);
    }

    #[test]
    fn unknown_model_falls_back_with_reason() {
        let mut models = IndexMap::new();
        models.insert("qa-default".to_string(), qa_model("qa-default", "dryrun"));
        let selection = ModelSelector::new(Some(ModelRegistry::new(Some(models))))
            .select(Some("missing"), DESIGN_QA_CAPABILITY)
            .unwrap();
        assert_eq!(selection.model.name, "qa-default");
        assert_eq!(selection.requested.as_deref(), Some("missing"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested model 'missing' unavailable for capability 'design_qa'.")
        );
    }

    #[test]
    fn blank_request_uses_default_with_explanation() {
        let selection = ModelSelector::new(None)
            .select(Some("  "), DESIGN_QA_CAPABILITY)
            .unwrap();
        assert_eq!(selection.model.name, "gemini-2.5-flash");
        assert_eq!(selection.requested, None);
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("No model specified; using default.")
        );
    }

    #[test]
    fn empty_capability_is_an_error() {
        let err = ModelSelector::new(None)
            .select(None, "video")
            .unwrap_err();
        assert_eq!(err, SelectionError::NoModels("video".to_string()));
        assert_eq!(err.to_string(), "No models available for capability 'video'.");
    }
}
