use anyhow::Result;
use image::DynamicImage;

use crate::{ComputeTarget, ModelDescriptor, SeededGenerator};

/// Inputs handed to a loaded pipeline for a single image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthesisParams<'a> {
    pub prompt: &'a str,
    pub negative_prompt: &'a str,
    pub steps: u32,
    pub guidance_scale: f64,
}

/// A loaded synthesis pipeline.
///
/// `run` is inference-only: it must not update any weights or other training
/// state, so repeated runs with the same inputs and seed are reproducible up to
/// the backend's own determinism.
pub trait ModelLike: Send {
    fn run(
        &mut self,
        params: &SynthesisParams<'_>,
        generator: &mut SeededGenerator,
    ) -> Result<DynamicImage>;
}

/// Builds pipelines for registered models. Blocking; callers keep it off any
/// interactive thread.
pub trait Loader: Send {
    type Model: ModelLike;

    fn load(&mut self, model: &ModelDescriptor, target: &ComputeTarget) -> Result<Self::Model>;
}
