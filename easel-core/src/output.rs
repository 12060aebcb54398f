use std::io::Cursor;
use std::path::Path;

use anyhow::{Context, Result};
use image::{DynamicImage, ImageFormat};

/// An image produced by the engine, with the seed it was produced from.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedImage {
    pub image: DynamicImage,
    pub seed: u32,
}

impl GeneratedImage {
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn to_png_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        self.image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("failed to encode image as PNG")?;
        Ok(bytes)
    }

    pub fn save_png(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.image
            .save_with_format(path, ImageFormat::Png)
            .with_context(|| format!("failed to save image to {}", path.display()))?;
        tracing::info!("Image saved at {}", path.display());
        Ok(())
    }
}
