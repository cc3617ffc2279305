//! Composite grid of a generated batch.

use image::{imageops, DynamicImage, RgbaImage};

use crate::error::GenerationError;

/// Column/row counts for a grid of `n` images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub cols: u32,
    pub rows: u32,
}

impl GridLayout {
    /// `cols = ceil(sqrt(n))`, `rows = ceil(n / cols)`.
    pub fn for_count(n: u32) -> Self {
        if n == 0 {
            return Self { cols: 0, rows: 0 };
        }
        let mut cols = 1;
        while cols * cols < n {
            cols += 1;
        }
        Self {
            cols,
            rows: n.div_ceil(cols),
        }
    }

    /// Top-left corner of cell `index` (row-major).
    pub fn cell_origin(&self, index: u32, cell_width: u32, cell_height: u32) -> (u32, u32) {
        ((index % self.cols) * cell_width, (index / self.cols) * cell_height)
    }
}

/// Decode `buffers` and paste them onto one transparent canvas.
///
/// Every cell is as large as the widest and tallest input; each image
/// sits unscaled in the top-left corner of its cell.
pub fn compose(buffers: &[Vec<u8>]) -> Result<RgbaImage, GenerationError> {
    if buffers.is_empty() {
        return Err(GenerationError::Compose("no images to compose".into()));
    }

    let images = buffers
        .iter()
        .enumerate()
        .map(|(i, bytes)| {
            image::load_from_memory(bytes)
                .map_err(|e| GenerationError::Compose(format!("image {i} is unreadable: {e}")))
        })
        .collect::<Result<Vec<DynamicImage>, _>>()?;

    Ok(compose_images(&images))
}

/// Paste already-decoded images onto a grid canvas.
pub fn compose_images(images: &[DynamicImage]) -> RgbaImage {
    let layout = GridLayout::for_count(images.len() as u32);
    let cell_width = images.iter().map(|img| img.width()).max().unwrap_or(0);
    let cell_height = images.iter().map(|img| img.height()).max().unwrap_or(0);

    let mut canvas = RgbaImage::new(layout.cols * cell_width, layout.rows * cell_height);
    for (i, img) in images.iter().enumerate() {
        let (x, y) = layout.cell_origin(i as u32, cell_width, cell_height);
        imageops::overlay(&mut canvas, &img.to_rgba8(), i64::from(x), i64::from(y));
    }

    tracing::debug!(
        count = images.len(),
        cols = layout.cols,
        rows = layout.rows,
        width = canvas.width(),
        height = canvas.height(),
        "Composed image grid",
    );
    canvas
}
