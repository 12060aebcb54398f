#[cfg(feature = "accelerate")]
extern crate accelerate_src;
#[cfg(feature = "mkl")]
extern crate intel_mkl_src;

pub mod bridge;
pub mod device_map;
pub mod engine;
pub mod error;
pub mod generator;
pub mod loader;
pub mod output;
pub mod registry;
pub mod request;
pub mod session;
mod util;

mod stable_diffusion;

pub use bridge::{AsyncExecutionBridge, StatusMessage, DEFAULT_POLL_INTERVAL};
pub use device_map::*;
pub use engine::{GenerationEngine, GenerationResult, PipelineHandle};
pub use error::{BridgeError, EngineError, FailureCategory, SessionError};
pub use generator::SeededGenerator;
pub use loader::*;
pub use output::GeneratedImage;
pub use registry::{ModelDescriptor, ModelFamily, ModelRegistry};
pub use request::{GenerationRequest, Seed};
pub use session::{SessionConfig, SessionConfigStore, DEFAULT_SESSION_FILE};
pub use stable_diffusion::{StableDiffusionLoader, StableDiffusionPipeline};
pub(crate) use util::*;
