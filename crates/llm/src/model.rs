#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

impl Model {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: None,
        }
    }

    pub fn from_id(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelCatalogSource {
    Configured,
    StaticFallback,
}

/// Remote models offered by the model selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCatalog {
    pub models: Vec<Model>,
    pub source: ModelCatalogSource,
}

impl ModelCatalog {
    /// Builds a catalog from configured ids, falling back to the static defaults when none remain.
    pub fn from_configured<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut models: Vec<Model> = Vec::new();
        for id in ids {
            let id = id.as_ref().trim();
            if id.is_empty() || models.iter().any(|model| model.id == id) {
                continue;
            }
            models.push(Model::from_id(id));
        }

        if models.is_empty() {
            return Self {
                models: default_openai_models(),
                source: ModelCatalogSource::StaticFallback,
            };
        }

        Self {
            models,
            source: ModelCatalogSource::Configured,
        }
    }

    pub fn contains(&self, model_id: &str) -> bool {
        self.models.iter().any(|model| model.id == model_id)
    }

    pub fn default_model(&self) -> &str {
        self.models
            .first()
            .map(|model| model.id.as_str())
            .unwrap_or(DEFAULT_OPENAI_MODEL)
    }
}

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-3.5-turbo";

pub fn default_openai_models() -> Vec<Model> {
    vec![
        Model::from_id("gpt-3.5-turbo").with_description("Fast default chat model"),
        Model::from_id("gpt-4").with_description("Higher quality, slower responses"),
    ]
}
