use std::sync::{Mutex, MutexGuard, PoisonError};

use easel_core::{GeneratedImage, GenerationEngine, Loader};

/// Shared server state. The engine mutex serialises generations, so requests
/// are handled one at a time.
pub struct AppState<L: Loader> {
    engine: Mutex<GenerationEngine<L>>,
    latest: Mutex<Option<GeneratedImage>>,
}

impl<L: Loader> AppState<L> {
    pub fn new(engine: GenerationEngine<L>) -> Self {
        Self {
            engine: Mutex::new(engine),
            latest: Mutex::new(None),
        }
    }

    // the engine converts synthesizer panics into errors, so a poisoned lock
    // still guards a usable engine
    pub fn engine(&self) -> MutexGuard<'_, GenerationEngine<L>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn latest(&self) -> Option<GeneratedImage> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_latest(&self, image: GeneratedImage) {
        *self.latest.lock().unwrap_or_else(PoisonError::into_inner) = Some(image);
    }
}
