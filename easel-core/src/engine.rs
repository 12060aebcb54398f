use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use rand::Rng;

use crate::{
    preview, ComputeTarget, DeviceMap, EngineError, GeneratedImage, GenerationRequest, Loader,
    ModelDescriptor, ModelLike, SeededGenerator, SynthesisParams,
};

/// Outcome of one generation: the image, or a categorised failure.
pub type GenerationResult = Result<GeneratedImage, EngineError>;

/// Longest prompt prefix quoted in status text.
pub const PROMPT_PREVIEW_CHARS: usize = 50;

/// A loaded pipeline together with the model and target it was loaded for.
pub struct PipelineHandle<M> {
    model: M,
    descriptor: ModelDescriptor,
    target: ComputeTarget,
}

impl<M> PipelineHandle<M> {
    pub fn identifier(&self) -> &'static str {
        self.descriptor.identifier
    }
}

/// Owns the current pipeline and runs requests against it.
///
/// At most one pipeline is current. A different model replaces it only after
/// the new one has loaded; a failed load leaves the previous pipeline in place.
/// Not reentrant: callers serialise `generate` calls.
pub struct GenerationEngine<L: Loader> {
    loader: L,
    device_map: DeviceMap,
    current: Option<PipelineHandle<L::Model>>,
}

impl<L: Loader> GenerationEngine<L> {
    pub fn new(loader: L, device_map: DeviceMap) -> Self {
        Self {
            loader,
            device_map,
            current: None,
        }
    }

    pub fn loaded_identifier(&self) -> Option<&'static str> {
        self.current.as_ref().map(PipelineHandle::identifier)
    }

    fn is_loaded(&self, model: &ModelDescriptor) -> bool {
        self.loaded_identifier() == Some(model.identifier)
    }

    /// Returns the pipeline for `model`, loading it first unless it is already
    /// current.
    pub fn ensure_loaded(
        &mut self,
        model: &ModelDescriptor,
        on_progress: &mut dyn FnMut(String),
    ) -> Result<&mut PipelineHandle<L::Model>, EngineError> {
        if !self.is_loaded(model) {
            report(on_progress, format!("Loading model: {}...", model.display_name));

            let started = Instant::now();
            let loader = &mut self.loader;
            let device_map = self.device_map;
            let (pipeline, target) = guarded(|| {
                let target = ComputeTarget::select(device_map)?;
                let pipeline = loader.load(model, &target)?;
                Ok((pipeline, target))
            })
            .map_err(|message| {
                tracing::error!("Loading {} failed: {message}", model.identifier);
                EngineError::Load(message)
            })?;

            tracing::info!(
                "Loaded {} ({}) on {:?} with {:?} precision in {:.1?}",
                model.display_name,
                model.identifier,
                target.device,
                target.precision,
                started.elapsed()
            );
            self.current = Some(PipelineHandle {
                model: pipeline,
                descriptor: *model,
                target,
            });
        }

        self.current
            .as_mut()
            .ok_or_else(|| EngineError::Load(format!("{} is not loaded", model.identifier)))
    }

    /// Runs `request`, drawing a random seed from the thread RNG when the
    /// request asks for one.
    pub fn generate(
        &mut self,
        request: &GenerationRequest,
        on_progress: &mut dyn FnMut(String),
    ) -> GenerationResult {
        self.generate_with_rng(request, on_progress, &mut rand::thread_rng())
    }

    pub fn generate_with_rng<R: Rng + ?Sized>(
        &mut self,
        request: &GenerationRequest,
        on_progress: &mut dyn FnMut(String),
        rng: &mut R,
    ) -> GenerationResult {
        request.validate()?;

        let seed = request.seed.resolve(rng);
        tracing::info!("Using seed: {seed}");

        let handle = self.ensure_loaded(&request.model, on_progress)?;

        report(
            on_progress,
            format!(
                "Generating image for: '{}...'",
                preview(&request.prompt, PROMPT_PREVIEW_CHARS)
            ),
        );

        let params = SynthesisParams {
            prompt: &request.prompt,
            negative_prompt: &request.negative_prompt,
            steps: request.steps,
            guidance_scale: request.guidance_scale,
        };
        let started = Instant::now();
        let image = guarded(|| {
            let mut generator = SeededGenerator::new(u64::from(seed), &handle.target.device)?;
            handle.model.run(&params, &mut generator)
        })
        .map_err(|message| {
            tracing::error!("Generation with {} failed: {message}", handle.descriptor.display_name);
            EngineError::Generation(message)
        })?;

        tracing::info!(
            "Generated {}x{} image in {:.1?}",
            image.width(),
            image.height(),
            started.elapsed()
        );
        Ok(GeneratedImage { image, seed })
    }
}

fn report(on_progress: &mut dyn FnMut(String), text: String) {
    tracing::info!("{text}");
    on_progress(text);
}

/// Runs a synthesizer call, turning both errors and panics into a message.
fn guarded<T>(call: impl FnOnce() -> anyhow::Result<T>) -> Result<T, String> {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(format!("{error:#}")),
        Err(payload) => Err(panic_message(payload.as_ref())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {message}")
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {message}")
    } else {
        "panicked".to_string()
    }
}
