// THEORY:
// The `patch_grid` module is the bridge between raw camera pixels and the
// model's patch-based view of the world. Every frame that enters the engine is
// reshaped here: the grid geometry is derived from the frame's aspect ratio,
// the pixels are resampled to exactly fill that grid, and the result is laid
// out as the channel-planar float tensor the feature extractor expects.
//
// Key architectural principles:
// 1.  **Geometry First**: The grid is computed before any pixel is touched.
//     Everything downstream (scoring, component search, centroid math) indexes
//     by the same `(w_patches, h_patches)` pair produced here, so prototype
//     creation and live inference stay geometrically consistent by
//     construction.
// 2.  **Even Column Count**: The column count derived by division is forced
//     even by rounding DOWN (decrement when odd, never increment). The model
//     requires symmetric tensor dimensions, and rounding down keeps the resize
//     a strict shrink of the source.
// 3.  **Reusable Output Buffer**: The tensor is written into a caller-owned
//     `Vec<f32>` so the processing context can reuse one allocation across
//     frames instead of paying for a fresh multi-megabyte buffer per tick.

use crate::error::SegmentationError;
use image::RgbImage;
use image::imageops::{self, FilterType};

/// The edge length of one square patch in model-input pixels.
pub const PATCH_EDGE: u32 = 16;
/// The model's input resolution along the short (height) edge.
pub const MODEL_INPUT_EDGE: u32 = 400;
/// Per-channel normalization mean (ImageNet convention, RGB order).
pub const CHANNEL_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// Per-channel normalization standard deviation (ImageNet convention).
pub const CHANNEL_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// The patch-grid geometry derived for a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchGrid {
    /// The number of patch columns. Always even, always at least 2.
    pub w_patches: u32,
    /// The number of patch rows (`input_edge / patch_edge`).
    pub h_patches: u32,
    /// The edge length of one square patch in pixels.
    pub patch_edge: u32,
}

impl PatchGrid {
    /// Derives the grid geometry for a `width` x `height` source image.
    ///
    /// The row count is fixed by the model input edge; the column count
    /// follows the source aspect ratio, floored, then forced even by
    /// decrementing. Deterministic: identical inputs always produce the
    /// identical grid.
    pub fn from_dimensions(
        width: u32,
        height: u32,
        input_edge: u32,
        patch_edge: u32,
    ) -> Result<Self, SegmentationError> {
        if width == 0 || height == 0 {
            return Err(SegmentationError::EmptyInput);
        }

        let h_patches = input_edge / patch_edge;
        let mut w_patches =
            (width as u64 * input_edge as u64) / (height as u64 * patch_edge as u64);
        if w_patches % 2 != 0 {
            w_patches -= 1;
        }

        // An extreme aspect ratio can floor the column count to zero; that is
        // degenerate geometry, same as a zero-sized image.
        if h_patches == 0 || w_patches == 0 {
            return Err(SegmentationError::EmptyInput);
        }

        Ok(Self {
            w_patches: w_patches as u32,
            h_patches,
            patch_edge,
        })
    }

    /// The total number of patches in the grid.
    pub fn num_patches(&self) -> usize {
        (self.w_patches * self.h_patches) as usize
    }

    /// The model-input width in pixels.
    pub fn pixel_width(&self) -> u32 {
        self.w_patches * self.patch_edge
    }

    /// The model-input height in pixels.
    pub fn pixel_height(&self) -> u32 {
        self.h_patches * self.patch_edge
    }
}

/// Resamples `image` to the grid's pixel dimensions and writes the normalized
/// channel-planar `[1, 3, H', W']` tensor into `out`.
///
/// The resize uses a cubic filter, the right choice for photographic
/// downsizing (masks go through nearest-neighbor instead; see the prototype
/// builder). `out` is cleared first, so the same buffer can be handed in
/// frame after frame.
pub fn to_model_tensor(
    image: &RgbImage,
    grid: &PatchGrid,
    mean: [f32; 3],
    std: [f32; 3],
    out: &mut Vec<f32>,
) {
    let new_w = grid.pixel_width();
    let new_h = grid.pixel_height();

    let resized;
    let raw: &[u8] = if image.dimensions() == (new_w, new_h) {
        image.as_raw()
    } else {
        resized = imageops::resize(image, new_w, new_h, FilterType::CatmullRom);
        resized.as_raw()
    };

    out.clear();
    out.reserve(3 * (new_w * new_h) as usize);

    // Channel-planar layout: all of R, then all of G, then all of B, each in
    // row-major pixel order.
    for c in 0..3 {
        for pixel in raw.chunks_exact(3) {
            let value = pixel[c] as f32 / 255.0;
            out.push((value - mean[c]) / std[c]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_for_1080p_frame() {
        let grid = PatchGrid::from_dimensions(1920, 1080, MODEL_INPUT_EDGE, PATCH_EDGE).unwrap();
        assert_eq!(grid.h_patches, 25);
        // 1920 * 400 / (1080 * 16) = 44.44 -> 44, already even.
        assert_eq!(grid.w_patches, 44);
        assert_eq!(grid.num_patches(), 1100);
        assert_eq!(grid.pixel_width(), 704);
        assert_eq!(grid.pixel_height(), 400);
    }

    #[test]
    fn grid_mapping_is_deterministic_and_column_count_is_even() {
        for width in [320, 480, 640, 641, 1000, 1280, 1920, 3840] {
            let a = PatchGrid::from_dimensions(width, 1080, MODEL_INPUT_EDGE, PATCH_EDGE).unwrap();
            let b = PatchGrid::from_dimensions(width, 1080, MODEL_INPUT_EDGE, PATCH_EDGE).unwrap();
            assert_eq!(a, b);
            assert_eq!(a.w_patches % 2, 0, "width {width} produced odd columns");
            assert!(a.w_patches > 0);
        }
    }

    #[test]
    fn odd_column_count_rounds_down() {
        // 900 * 400 / (1080 * 16) = 20.83 -> 20 (even, kept).
        // 932 * 400 / (1080 * 16) = 21.57 -> 21 (odd, decremented to 20).
        let grid = PatchGrid::from_dimensions(932, 1080, MODEL_INPUT_EDGE, PATCH_EDGE).unwrap();
        assert_eq!(grid.w_patches, 20);
    }

    #[test]
    fn zero_sized_image_is_rejected() {
        assert!(matches!(
            PatchGrid::from_dimensions(0, 1080, MODEL_INPUT_EDGE, PATCH_EDGE),
            Err(SegmentationError::EmptyInput)
        ));
        assert!(matches!(
            PatchGrid::from_dimensions(1920, 0, MODEL_INPUT_EDGE, PATCH_EDGE),
            Err(SegmentationError::EmptyInput)
        ));
    }

    #[test]
    fn extreme_aspect_ratio_is_rejected() {
        // A sliver of an image whose column count floors to zero.
        assert!(matches!(
            PatchGrid::from_dimensions(1, 4000, MODEL_INPUT_EDGE, PATCH_EDGE),
            Err(SegmentationError::EmptyInput)
        ));
    }

    #[test]
    fn tensor_is_channel_planar_and_normalized() {
        // A 4x4 uniform gray image with a 2x2 grid of 2px patches: no resize
        // happens, so every value must be exactly (128/255 - mean) / std.
        let image = RgbImage::from_pixel(4, 4, image::Rgb([128, 128, 128]));
        let grid = PatchGrid::from_dimensions(4, 4, 4, 2).unwrap();
        assert_eq!(grid.w_patches, 2);
        assert_eq!(grid.h_patches, 2);

        let mut tensor = Vec::new();
        to_model_tensor(&image, &grid, CHANNEL_MEAN, CHANNEL_STD, &mut tensor);
        assert_eq!(tensor.len(), 3 * 16);

        let plane = 16;
        for c in 0..3 {
            let expected = (128.0 / 255.0 - CHANNEL_MEAN[c]) / CHANNEL_STD[c];
            for i in 0..plane {
                let value = tensor[c * plane + i];
                assert!((value - expected).abs() < 1e-6, "channel {c} index {i}");
            }
        }
    }

    #[test]
    fn tensor_buffer_is_reusable() {
        let image = RgbImage::from_pixel(4, 4, image::Rgb([10, 20, 30]));
        let grid = PatchGrid::from_dimensions(4, 4, 4, 2).unwrap();

        let mut tensor = vec![99.0f32; 7];
        to_model_tensor(&image, &grid, CHANNEL_MEAN, CHANNEL_STD, &mut tensor);
        let first = tensor.clone();
        to_model_tensor(&image, &grid, CHANNEL_MEAN, CHANNEL_STD, &mut tensor);
        assert_eq!(tensor, first);
    }
}
