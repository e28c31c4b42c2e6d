use indexmap::IndexMap;

/// Capability a model needs to compare a mockup against a screenshot and
/// return a structured report.
pub const DESIGN_QA_CAPABILITY: &str = "design_qa";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub service: String,
    pub capabilities: Vec<String>,
    pub max_output_tokens: Option<u64>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Ordered model table; the first model supporting a capability is its
/// default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name.trim())
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        self.get(name)
            .filter(|model| model.supports(capability))
            .cloned()
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, service: &str, max_output_tokens: Option<u64>| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                service: service.to_string(),
                capabilities: vec![DESIGN_QA_CAPABILITY.to_string()],
                max_output_tokens,
            },
        );
    };

    insert("gemini-2.5-flash", "gemini", Some(8192));
    insert("gemini-2.5-pro", "gemini", Some(8192));
    insert("gemini-2.0-flash", "gemini", Some(8192));
    insert("dryrun-qa-1", "dryrun", None);

    map
}
