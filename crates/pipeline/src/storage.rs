//! Local image storage and its public URL mapping.
//!
//! Every image is re-encoded to lossless WebP and written under the
//! configured output folder as `{identifier}_{index:03}.webp`.

use std::io::Cursor;
use std::path::{Path, PathBuf};

use fate_core::config::AppConfig;
use fate_core::naming::{self, GRID_INDEX};
use image::{DynamicImage, ImageFormat, RgbaImage};

use crate::error::GenerationError;

/// Extension of every file written by [`ImageStore`].
pub const OUTPUT_EXTENSION: &str = "webp";

#[derive(Debug, Clone)]
pub struct ImageStore {
    folder: Option<PathBuf>,
    domain: Option<String>,
}

impl ImageStore {
    pub fn new(folder: Option<PathBuf>, domain: Option<String>) -> Self {
        Self { folder, domain }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.folder_path.clone(), config.domain_path.clone())
    }

    /// Fail unless both the output folder and the public domain are set.
    pub fn ensure_configured(&self) -> Result<(), GenerationError> {
        self.folder()?;
        if self.domain.is_none() {
            return Err(GenerationError::Configuration(
                "COMFYUI_DOMAIN_PATH is not set".into(),
            ));
        }
        Ok(())
    }

    fn folder(&self) -> Result<&Path, GenerationError> {
        self.folder.as_deref().ok_or_else(|| {
            GenerationError::Configuration("COMFYUI_FOLDER_PATH is not set".into())
        })
    }

    /// Re-encode one raw image and write it as `index` of `identifier`.
    pub async fn save(
        &self,
        identifier: &str,
        index: u32,
        bytes: Vec<u8>,
    ) -> Result<PathBuf, GenerationError> {
        let encoded = blocking(move || {
            let img = image::load_from_memory(&bytes)
                .map_err(|e| GenerationError::Storage(format!("undecodable image: {e}")))?;
            encode_webp(img.to_rgba8())
        })
        .await?;
        self.write(identifier, index, encoded).await
    }

    /// Encode a composed grid and write it under [`GRID_INDEX`].
    pub async fn save_grid(
        &self,
        identifier: &str,
        canvas: RgbaImage,
    ) -> Result<PathBuf, GenerationError> {
        let encoded = blocking(move || encode_webp(canvas)).await?;
        self.write(identifier, GRID_INDEX, encoded).await
    }

    /// Public URL for a file previously written by this store.
    pub fn public_path(&self, local: &Path) -> Result<String, GenerationError> {
        Ok(naming::public_path(
            local,
            self.folder.as_deref(),
            self.domain.as_deref(),
        )?)
    }

    async fn write(
        &self,
        identifier: &str,
        index: u32,
        data: Vec<u8>,
    ) -> Result<PathBuf, GenerationError> {
        let folder = self.folder()?;
        let path = naming::image_path(folder, identifier, index, OUTPUT_EXTENSION);

        tokio::fs::create_dir_all(folder)
            .await
            .map_err(|e| GenerationError::Storage(format!("{}: {e}", folder.display())))?;
        tokio::fs::write(&path, &data)
            .await
            .map_err(|e| GenerationError::Storage(format!("{}: {e}", path.display())))?;

        tracing::debug!(path = %path.display(), bytes = data.len(), "Saved image");
        Ok(path)
    }
}

fn encode_webp(img: RgbaImage) -> Result<Vec<u8>, GenerationError> {
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageRgba8(img)
        .write_to(&mut out, ImageFormat::WebP)
        .map_err(|e| GenerationError::Storage(format!("WebP encoding failed: {e}")))?;
    Ok(out.into_inner())
}

/// Run CPU-bound image work off the async workers.
pub(crate) async fn blocking<T, F>(work: F) -> Result<T, GenerationError>
where
    F: FnOnce() -> Result<T, GenerationError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| GenerationError::Storage(format!("image task failed: {e}")))?
}
