use std::f32::consts::TAU;

use candle_core::{DType, Device, Shape, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Deterministic noise source for one generation.
///
/// Samples are drawn on the host from a seeded RNG and then moved to the
/// pipeline's device, so a given seed yields the same initial noise whatever
/// device the pipeline runs on. On accelerators the device RNG is seeded as
/// well, for any sampling the backend does on-device.
pub struct SeededGenerator {
    seed: u64,
    device: Device,
    rng: StdRng,
}

impl SeededGenerator {
    pub fn new(seed: u64, device: &Device) -> candle_core::Result<Self> {
        // the CPU backend has no seedable RNG of its own
        if !device.is_cpu() {
            device.set_seed(seed)?;
        }
        Ok(Self {
            seed,
            device: device.clone(),
            rng: StdRng::seed_from_u64(seed),
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Standard normal samples (Box-Muller) of the given shape and dtype.
    pub fn randn<S: Into<Shape>>(&mut self, shape: S, dtype: DType) -> candle_core::Result<Tensor> {
        let shape = shape.into();
        let count = shape.elem_count();
        let mut values = Vec::with_capacity(count);
        while values.len() < count {
            let u1: f32 = self.rng.gen_range(f32::EPSILON..1.0);
            let u2: f32 = self.rng.gen();
            let radius = (-2.0 * u1.ln()).sqrt();
            values.push(radius * (TAU * u2).cos());
            if values.len() < count {
                values.push(radius * (TAU * u2).sin());
            }
        }
        Tensor::from_vec(values, shape, &Device::Cpu)?
            .to_device(&self.device)?
            .to_dtype(dtype)
    }
}
