use easel_core::{EngineError, GenerationRequest, ModelDescriptor, ModelRegistry, Seed, SessionConfig};
use serde::{Deserialize, Serialize};

/// JSON body of `POST /v1/images/generations`. Omitted fields take the same
/// defaults a fresh session starts with.
#[derive(Deserialize, Debug, Clone)]
pub struct GenerationBody {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    pub model: Option<String>,
    pub steps: Option<u32>,
    pub guidance_scale: Option<f64>,
    pub seed: Option<i64>,
}

impl GenerationBody {
    pub fn into_request(self) -> Result<GenerationRequest, EngineError> {
        let defaults = SessionConfig::default();
        let model_name = self.model.unwrap_or(defaults.model_name);
        let model = ModelRegistry::resolve(&model_name)?;
        let seed = Seed::from_raw(self.seed.unwrap_or(defaults.seed))?;

        Ok(GenerationRequest::new(self.prompt, model)
            .with_negative_prompt(self.negative_prompt)
            .with_steps(self.steps.unwrap_or(defaults.steps))
            .with_guidance_scale(self.guidance_scale.unwrap_or(defaults.cfg))
            .with_seed(seed))
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct GenerationResponse {
    /// Base64-encoded PNG.
    pub image: String,
    pub seed: u32,
    pub model: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Serialize, Deserialize, Debug, PartialEq)]
pub struct ModelInfo {
    pub name: String,
    pub identifier: String,
}

impl From<&ModelDescriptor> for ModelInfo {
    fn from(model: &ModelDescriptor) -> Self {
        Self {
            name: model.display_name.to_string(),
            identifier: model.identifier.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
pub struct ModelsResponse {
    pub models: Vec<ModelInfo>,
    pub default: String,
}
