use crate::EngineError;

/// Architecture family of a registered model; decides how the backend loads it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelFamily {
    StableDiffusionV1_5,
    StableDiffusionXl,
    Kandinsky2_2,
}

/// A model offered to the user: the name shown in the UI and the hub repository
/// it is loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelDescriptor {
    pub display_name: &'static str,
    pub identifier: &'static str,
    pub family: ModelFamily,
}

const MODELS: [ModelDescriptor; 3] = [
    ModelDescriptor {
        display_name: "Stable Diffusion v1.5",
        identifier: "runwayml/stable-diffusion-v1-5",
        family: ModelFamily::StableDiffusionV1_5,
    },
    ModelDescriptor {
        display_name: "Stable Diffusion XL",
        identifier: "stabilityai/stable-diffusion-xl-base-1.0",
        family: ModelFamily::StableDiffusionXl,
    },
    ModelDescriptor {
        display_name: "Kandinsky 2.2",
        identifier: "kandinsky-community/kandinsky-2-2-decoder",
        family: ModelFamily::Kandinsky2_2,
    },
];

/// The fixed set of models, in display order.
pub struct ModelRegistry;

impl ModelRegistry {
    pub fn resolve(display_name: &str) -> Result<ModelDescriptor, EngineError> {
        MODELS
            .iter()
            .find(|model| model.display_name == display_name)
            .copied()
            .ok_or_else(|| EngineError::UnknownModel(display_name.to_string()))
    }

    /// The first registered entry, used when no prior session exists.
    pub fn default_descriptor() -> ModelDescriptor {
        MODELS[0]
    }

    pub fn all() -> &'static [ModelDescriptor] {
        &MODELS
    }
}
