use std::ops::RangeInclusive;

use rand::Rng;

use crate::{EngineError, ModelDescriptor};

pub const DEFAULT_STEPS: u32 = 25;
pub const DEFAULT_GUIDANCE_SCALE: f64 = 7.5;
pub const STEPS_RANGE: RangeInclusive<u32> = 10..=150;
pub const GUIDANCE_SCALE_RANGE: RangeInclusive<f64> = 1.0..=20.0;

/// Seed of a request: a fixed value in `[0, 2^32-1]`, or drawn when the
/// request runs. Persisted and exchanged as an integer where `-1` means random.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Seed {
    #[default]
    Random,
    Fixed(u32),
}

impl Seed {
    pub const RANDOM_SENTINEL: i64 = -1;

    pub fn from_raw(raw: i64) -> Result<Self, EngineError> {
        if raw == Self::RANDOM_SENTINEL {
            return Ok(Self::Random);
        }
        u32::try_from(raw).map(Self::Fixed).map_err(|_| {
            EngineError::Validation(format!(
                "seed must be -1 or within [0, {}], got {raw}",
                u32::MAX
            ))
        })
    }

    pub fn to_raw(self) -> i64 {
        match self {
            Self::Random => Self::RANDOM_SENTINEL,
            Self::Fixed(seed) => i64::from(seed),
        }
    }

    /// The seed to run with: the fixed value, or a fresh uniform draw.
    pub fn resolve<R: Rng + ?Sized>(self, rng: &mut R) -> u32 {
        match self {
            Self::Random => rng.gen(),
            Self::Fixed(seed) => seed,
        }
    }

    /// A fixed seed drawn now, so the value can be shown before generating.
    pub fn randomized<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::Fixed(rng.gen())
    }
}

/// One generation's parameters, built fresh per submission.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub model: ModelDescriptor,
    pub steps: u32,
    pub guidance_scale: f64,
    pub seed: Seed,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>, model: ModelDescriptor) -> Self {
        Self {
            prompt: prompt.into(),
            negative_prompt: String::new(),
            model,
            steps: DEFAULT_STEPS,
            guidance_scale: DEFAULT_GUIDANCE_SCALE,
            seed: Seed::Random,
        }
    }

    pub fn with_negative_prompt(mut self, negative_prompt: impl Into<String>) -> Self {
        self.negative_prompt = negative_prompt.into();
        self
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps;
        self
    }

    pub fn with_guidance_scale(mut self, guidance_scale: f64) -> Self {
        self.guidance_scale = guidance_scale;
        self
    }

    pub fn with_seed(mut self, seed: Seed) -> Self {
        self.seed = seed;
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.prompt.trim().is_empty() {
            return Err(EngineError::Validation("prompt must not be empty".into()));
        }
        if !STEPS_RANGE.contains(&self.steps) {
            return Err(EngineError::Validation(format!(
                "steps must be within [{}, {}], got {}",
                STEPS_RANGE.start(),
                STEPS_RANGE.end(),
                self.steps
            )));
        }
        // NaN fails `contains`
        if !GUIDANCE_SCALE_RANGE.contains(&self.guidance_scale) {
            return Err(EngineError::Validation(format!(
                "guidance scale must be within [{}, {}], got {}",
                GUIDANCE_SCALE_RANGE.start(),
                GUIDANCE_SCALE_RANGE.end(),
                self.guidance_scale
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModelRegistry;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn request(prompt: &str) -> GenerationRequest {
        GenerationRequest::new(prompt, ModelRegistry::default_descriptor())
    }

    #[test]
    fn seed_raw_conversion() {
        assert_eq!(Seed::from_raw(-1).unwrap(), Seed::Random);
        assert_eq!(Seed::from_raw(42).unwrap(), Seed::Fixed(42));
        assert_eq!(Seed::from_raw(4_294_967_295).unwrap(), Seed::Fixed(u32::MAX));
        assert!(Seed::from_raw(4_294_967_296).is_err());
        assert!(Seed::from_raw(-2).is_err());
        assert_eq!(Seed::Fixed(7).to_raw(), 7);
        assert_eq!(Seed::Random.to_raw(), -1);
    }

    #[test]
    fn fixed_seed_resolves_to_itself() {
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(Seed::Fixed(42).resolve(&mut rng), 42);
    }

    #[test]
    fn randomized_seed_is_fixed() {
        let mut rng = StdRng::seed_from_u64(9);
        assert!(matches!(Seed::randomized(&mut rng), Seed::Fixed(_)));
    }

    #[test]
    fn blank_prompts_are_rejected() {
        for prompt in ["", "   ", "\t\n"] {
            let err = request(prompt).validate().unwrap_err();
            assert!(matches!(err, EngineError::Validation(_)));
        }
        assert!(request("a red cube").validate().is_ok());
    }

    #[test]
    fn steps_bounds() {
        assert!(request("x").with_steps(10).validate().is_ok());
        assert!(request("x").with_steps(150).validate().is_ok());
        assert!(request("x").with_steps(9).validate().is_err());
        assert!(request("x").with_steps(151).validate().is_err());
    }

    #[test]
    fn guidance_bounds() {
        assert!(request("x").with_guidance_scale(1.0).validate().is_ok());
        assert!(request("x").with_guidance_scale(20.0).validate().is_ok());
        assert!(request("x").with_guidance_scale(0.5).validate().is_err());
        assert!(request("x").with_guidance_scale(f64::NAN).validate().is_err());
    }

    #[test]
    fn defaults() {
        let request = request("x");
        assert_eq!(request.steps, 25);
        assert_eq!(request.guidance_scale, 7.5);
        assert_eq!(request.seed, Seed::Random);
        assert!(request.negative_prompt.is_empty());
    }
}
