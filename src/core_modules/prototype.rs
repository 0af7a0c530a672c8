// THEORY:
// The `prototype` module is the registration side of the engine. Given a
// reference image of the target object with a foreground mask in its alpha
// channel, it produces the single averaged feature vector (the "prototype")
// that every live frame is scored against.
//
// Key architectural principles:
// 1.  **One Pipeline, Two Entrances**: The reference image goes through the
//     exact same patch grid mapper as live frames. That guarantees the
//     prototype and live inference agree on geometry and normalization, so
//     scores are comparable by construction.
// 2.  **Hard Mask Boundaries**: The foreground mask is downsampled to
//     patch-grid resolution with nearest-neighbor, never a smoothing filter.
//     A patch is either foreground or it is not; blending mask edges would
//     leak background texture into the prototype.
// 3.  **Immutable Product**: A `Prototype` is created whole, held for the
//     session, and replaced wholesale on re-registration. It is never
//     partially mutated.

use crate::core_modules::extractor::{ExtractorError, FeatureExtractor, TensorShape};
use crate::core_modules::feature::mean_vector;
use crate::core_modules::patch_grid::{self, PatchGrid};
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};

/// The midpoint above which a downsampled mask sample counts as foreground.
const MASK_FOREGROUND_MIDPOINT: u8 = 127;

use crate::error::SegmentationError;

/// The foreground-averaged feature signature of a registered object.
#[derive(Debug, Clone, PartialEq)]
pub struct Prototype {
    features: Vec<f32>,
}

impl Prototype {
    pub fn new(features: Vec<f32>) -> Self {
        Self { features }
    }

    pub fn features(&self) -> &[f32] {
        &self.features
    }

    /// The feature dimension `D`, as discovered from the extractor's output.
    pub fn dim(&self) -> usize {
        self.features.len()
    }
}

/// Builds a prototype from a reference image whose alpha channel marks the
/// object's foreground.
///
/// Fails with `InvalidChannelCount` when the image carries no alpha channel
/// and with `NoForegroundPatches` when the mask selects nothing; both are
/// registration-time errors the caller surfaces to the user.
pub fn build_prototype<E: FeatureExtractor>(
    reference: &DynamicImage,
    extractor: &E,
    input_edge: u32,
    patch_edge: u32,
    mean: [f32; 3],
    std: [f32; 3],
) -> Result<Prototype, SegmentationError> {
    let color = reference.color();
    if !color.has_alpha() {
        return Err(SegmentationError::InvalidChannelCount {
            found: color.channel_count(),
        });
    }

    let rgba = reference.to_rgba8();
    let (width, height) = rgba.dimensions();
    let grid = PatchGrid::from_dimensions(width, height, input_edge, patch_edge)?;

    // Split color and foreground mask; the mapper only ever sees RGB.
    let mut rgb = RgbImage::new(width, height);
    let mut mask = GrayImage::new(width, height);
    for (x, y, pixel) in rgba.enumerate_pixels() {
        rgb.put_pixel(x, y, Rgb([pixel[0], pixel[1], pixel[2]]));
        mask.put_pixel(x, y, Luma([pixel[3]]));
    }

    let mut tensor = Vec::new();
    patch_grid::to_model_tensor(&rgb, &grid, mean, std, &mut tensor);

    // One mask sample per patch; nearest-neighbor keeps the assignment binary.
    let patch_mask = imageops::resize(
        &mask,
        grid.w_patches,
        grid.h_patches,
        FilterType::Nearest,
    );

    let shape = TensorShape {
        height: grid.pixel_height(),
        width: grid.pixel_width(),
    };
    let features = extractor.extract(&tensor, &shape)?;

    let num_patches = grid.num_patches();
    if features.is_empty() || features.len() % num_patches != 0 {
        return Err(ExtractorError::new(format!(
            "extractor returned {} values, not divisible into {} patches",
            features.len(),
            num_patches
        ))
        .into());
    }
    let feature_dim = features.len() / num_patches;

    let foreground: Vec<&[f32]> = patch_mask
        .pixels()
        .zip(features.chunks_exact(feature_dim))
        .filter(|(sample, _)| sample[0] > MASK_FOREGROUND_MIDPOINT)
        .map(|(_, patch)| patch)
        .collect();

    if foreground.is_empty() {
        return Err(SegmentationError::NoForegroundPatches);
    }

    log::info!(
        "prototype registered from {} of {} patches (dim {})",
        foreground.len(),
        num_patches,
        feature_dim
    );
    Ok(Prototype::new(mean_vector(foreground, feature_dim)))
}
