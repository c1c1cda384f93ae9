use indexmap::IndexMap;

pub const CAPABILITY_TEXT: &str = "text";
pub const CAPABILITY_VISION: &str = "vision";
pub const CAPABILITY_SEARCH: &str = "search";
pub const CAPABILITY_SUMMARIZE: &str = "summarize";
pub const CAPABILITY_IMAGE: &str = "image";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub context_window: Option<u64>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }

    pub fn is_dryrun(&self) -> bool {
        self.provider == "dryrun"
    }
}

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
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    /// Models supporting `capability`, declaration order. Offline models
    /// come last so they are never picked as an implicit default.
    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        let mut matches: Vec<ModelSpec> = self
            .models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect();
        matches.sort_by_key(ModelSpec::is_dryrun);
        matches
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str], context_window: Option<u64>| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
                context_window,
            },
        );
    };

    insert(
        "gemini-2.0-flash",
        "gemini",
        &[CAPABILITY_TEXT, CAPABILITY_VISION],
        Some(1_048_576),
    );
    insert(
        "gemini-1.5-pro",
        "gemini",
        &[CAPABILITY_TEXT, CAPABILITY_VISION],
        Some(2_097_152),
    );
    insert(
        "llama3-70b-8192",
        "groq",
        &[CAPABILITY_SEARCH, CAPABILITY_SUMMARIZE],
        Some(8192),
    );
    insert(
        "llama-3.3-70b-versatile",
        "groq",
        &[CAPABILITY_SEARCH, CAPABILITY_SUMMARIZE],
        Some(131_072),
    );
    insert(
        "gemini-2.0-flash-preview-image-generation",
        "gemini",
        &[CAPABILITY_IMAGE],
        None,
    );
    insert("dryrun-text-1", "dryrun", &[CAPABILITY_TEXT], Some(8192));
    insert(
        "dryrun-search-1",
        "dryrun",
        &[CAPABILITY_SEARCH, CAPABILITY_SUMMARIZE],
        None,
    );
    insert("dryrun-image-1", "dryrun", &[CAPABILITY_IMAGE], None);

    map
}
