use std::path::PathBuf;

use anyhow::{bail, ensure, Context, Error, Result};
use candle_core::{DType, Device, IndexOp, Module, Tensor, D};
use candle_transformers::models::stable_diffusion::{
    self, clip, unet_2d::UNet2DConditionModel, vae::AutoEncoderKL, StableDiffusionConfig,
};
use hf_hub::api::sync::{Api, ApiRepo};
use image::{DynamicImage, RgbImage};
use tokenizers::Tokenizer;

use crate::{
    ComputeTarget, Loader, ModelDescriptor, ModelFamily, ModelLike, SeededGenerator,
    SynthesisParams,
};

const LATENT_CHANNELS: usize = 4;

/// Where one CLIP text encoder of a pipeline comes from.
struct EncoderSource {
    tokenizer_repo: &'static str,
    weights_stem: &'static str,
}

struct TextEncoder {
    config: clip::Config,
    tokenizer: Tokenizer,
    model: clip::ClipTextTransformer,
    pad_id: u32,
}

impl TextEncoder {
    fn encode(&self, text: &str, device: &Device) -> Result<Tensor> {
        let max_len = self.config.max_position_embeddings;
        let mut tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(Error::msg)?
            .get_ids()
            .to_vec();
        if tokens.len() > max_len {
            tracing::warn!(
                "Prompt is {} tokens, truncating to {max_len}",
                tokens.len()
            );
            tokens.truncate(max_len);
        }
        tokens.resize(max_len, self.pad_id);

        let tokens = Tensor::new(tokens.as_slice(), device)?.unsqueeze(0)?;
        Ok(self.model.forward(&tokens)?)
    }
}

pub struct StableDiffusionPipeline {
    config: StableDiffusionConfig,
    encoders: Vec<TextEncoder>,
    unet: UNet2DConditionModel,
    vae: AutoEncoderKL,
    vae_scale: f64,
    device: Device,
    dtype: DType,
}

impl StableDiffusionPipeline {
    /// Conditional embeddings, preceded by the negative prompt's embeddings
    /// when classifier-free guidance is on. SDXL concatenates its two encoders
    /// along the feature axis.
    fn text_embeddings(&self, params: &SynthesisParams<'_>, guided: bool) -> Result<Tensor> {
        let mut per_encoder = Vec::with_capacity(self.encoders.len());
        for encoder in &self.encoders {
            let cond = encoder.encode(params.prompt, &self.device)?;
            let embeddings = if guided {
                let uncond = encoder.encode(params.negative_prompt, &self.device)?;
                Tensor::cat(&[uncond, cond], 0)?
            } else {
                cond
            };
            per_encoder.push(embeddings);
        }
        Ok(Tensor::cat(&per_encoder, D::Minus1)?.to_dtype(self.dtype)?)
    }
}

impl ModelLike for StableDiffusionPipeline {
    fn run(
        &mut self,
        params: &SynthesisParams<'_>,
        generator: &mut SeededGenerator,
    ) -> Result<DynamicImage> {
        let guided = params.guidance_scale > 1.0;
        let text_embeddings = self.text_embeddings(params, guided)?;

        let mut scheduler = self.config.build_scheduler(params.steps as usize)?;
        let latent_shape = (
            1,
            LATENT_CHANNELS,
            self.config.height / 8,
            self.config.width / 8,
        );
        let mut latents =
            (generator.randn(latent_shape, self.dtype)? * scheduler.init_noise_sigma())?;

        let timesteps = scheduler.timesteps().to_vec();
        for (index, &timestep) in timesteps.iter().enumerate() {
            tracing::debug!("Step {}/{}", index + 1, timesteps.len());

            let input = if guided {
                Tensor::cat(&[&latents, &latents], 0)?
            } else {
                latents.clone()
            };
            let input = scheduler.scale_model_input(input, timestep)?;
            let noise_pred = self.unet.forward(&input, timestep as f64, &text_embeddings)?;

            let noise_pred = if guided {
                let chunks = noise_pred.chunk(2, 0)?;
                let (uncond, text) = (&chunks[0], &chunks[1]);
                (uncond + ((text - uncond)? * params.guidance_scale)?)?
            } else {
                noise_pred
            };
            latents = scheduler.step(&noise_pred, timestep, &latents)?;
        }

        let decoded = self.vae.decode(&(&latents / self.vae_scale)?)?;
        decoded_to_image(&decoded)
    }
}

/// Maps a VAE output batch of shape (1, 3, height, width) with values in
/// [-1, 1] to an RGB image.
fn decoded_to_image(decoded: &Tensor) -> Result<DynamicImage> {
    let (batch, channels, height, width) = decoded.dims4()?;
    ensure!(
        batch == 1 && channels == 3,
        "VAE produced a {batch}x{channels} batch, expected one RGB image"
    );

    let pixels = ((decoded.to_device(&Device::Cpu)?.to_dtype(DType::F32)? + 1.)? * 127.5)?
        .clamp(0f32, 255f32)?
        .to_dtype(DType::U8)?
        .i(0)?
        .permute((1, 2, 0))?
        .flatten_all()?
        .to_vec1::<u8>()?;

    let buffer = RgbImage::from_raw(width as u32, height as u32, pixels)
        .context("decoded pixels do not fill the image")?;
    Ok(DynamicImage::ImageRgb8(buffer))
}

/// Loads Stable Diffusion v1.5 and XL pipelines from the Hugging Face hub.
pub struct StableDiffusionLoader {
    api: Api,
}

impl StableDiffusionLoader {
    pub fn new() -> Result<Self> {
        let api = Api::new().context("failed to create hf hub API")?;
        Ok(Self { api })
    }

    fn load_encoder(
        &self,
        model_repo: &ApiRepo,
        config: clip::Config,
        source: &EncoderSource,
        target: &ComputeTarget,
    ) -> Result<TextEncoder> {
        let tokenizer_file = self
            .api
            .model(source.tokenizer_repo.to_string())
            .get("tokenizer.json")
            .with_context(|| format!("failed to get tokenizer from {}", source.tokenizer_repo))?;
        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(Error::msg)
            .context("failed to load CLIP tokenizer")?;

        let pad_token = config.pad_with.as_deref().unwrap_or("<|endoftext|>");
        let pad_id = *tokenizer
            .get_vocab(true)
            .get(pad_token)
            .with_context(|| format!("pad token {pad_token} missing from vocabulary"))?;

        let weights = fetch_weights(model_repo, source.weights_stem, target.dtype(), "safetensors")?;
        let model = stable_diffusion::build_clip_transformer(
            &config,
            weights,
            &target.device,
            target.dtype(),
        )
        .context("failed to build CLIP text encoder")?;

        Ok(TextEncoder {
            config,
            tokenizer,
            model,
            pad_id,
        })
    }
}

impl Loader for StableDiffusionLoader {
    type Model = StableDiffusionPipeline;

    fn load(&mut self, model: &ModelDescriptor, target: &ComputeTarget) -> Result<Self::Model> {
        let (config, sources, vae_scale) = match model.family {
            ModelFamily::StableDiffusionV1_5 => (
                StableDiffusionConfig::v1_5(None, None, None),
                vec![EncoderSource {
                    tokenizer_repo: "openai/clip-vit-base-patch32",
                    weights_stem: "text_encoder/model",
                }],
                0.18215,
            ),
            ModelFamily::StableDiffusionXl => (
                StableDiffusionConfig::sdxl(None, None, None),
                vec![
                    EncoderSource {
                        tokenizer_repo: "openai/clip-vit-large-patch14",
                        weights_stem: "text_encoder/model",
                    },
                    EncoderSource {
                        tokenizer_repo: "laion/CLIP-ViT-bigG-14-laion2B-39B-b160k",
                        weights_stem: "text_encoder_2/model",
                    },
                ],
                0.13025,
            ),
            ModelFamily::Kandinsky2_2 => bail!(
                "{} uses the Kandinsky architecture, which the candle backend cannot load",
                model.display_name
            ),
        };

        let dtype = target.dtype();
        let repo = self.api.model(model.identifier.to_string());

        let mut clip_configs = vec![config.clip.clone()];
        if sources.len() > 1 {
            let clip2 = config
                .clip2
                .clone()
                .context("second text encoder config missing")?;
            clip_configs.push(clip2);
        }
        let encoders = sources
            .iter()
            .zip(clip_configs)
            .map(|(source, clip_config)| self.load_encoder(&repo, clip_config, source, target))
            .collect::<Result<Vec<_>>>()?;

        tracing::info!("Loading VAE");
        let vae_weights = if dtype == DType::F16 && model.family == ModelFamily::StableDiffusionXl {
            // the stock SDXL VAE overflows in f16
            self.api
                .model("madebyollin/sdxl-vae-fp16-fix".to_string())
                .get("diffusion_pytorch_model.safetensors")
                .context("failed to get fp16-fixed SDXL VAE")?
        } else {
            fetch_weights(&repo, "vae/diffusion_pytorch_model", dtype, "safetensors")?
        };
        let vae = config
            .build_vae(vae_weights, &target.device, dtype)
            .context("failed to build VAE")?;

        tracing::info!("Loading UNet");
        let unet_weights = fetch_weights(&repo, "unet/diffusion_pytorch_model", dtype, "safetensors")?;
        let unet = config
            .build_unet(unet_weights, &target.device, LATENT_CHANNELS, false, dtype)
            .context("failed to build UNet")?;

        Ok(StableDiffusionPipeline {
            config,
            encoders,
            unet,
            vae,
            vae_scale,
            device: target.device.clone(),
            dtype,
        })
    }
}

/// Fetches `<stem>.fp16.<ext>` for half precision, falling back to the full
/// precision file when the repo has no fp16 variant.
fn fetch_weights(repo: &ApiRepo, stem: &str, dtype: DType, ext: &str) -> Result<PathBuf> {
    if dtype == DType::F16 {
        match repo.get(&format!("{stem}.fp16.{ext}")) {
            Ok(path) => return Ok(path),
            Err(e) => tracing::warn!("fp16 weights for {stem} unavailable ({e}), using fp32"),
        }
    }
    repo.get(&format!("{stem}.{ext}"))
        .with_context(|| format!("failed to get {stem}.{ext}"))
}
