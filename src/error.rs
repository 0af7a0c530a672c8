use crate::core_modules::extractor::ExtractorError;
use thiserror::Error;

/// The crate-wide error taxonomy.
///
/// The first three variants are user-correctable and surface synchronously at
/// their call site. `Extractor` is fatal for the current frame only: the
/// pipeline logs it, clears its in-flight state, and the next eligible tick
/// retries from scratch.
#[derive(Debug, Error)]
pub enum SegmentationError {
    /// The source image has zero width or height, or its aspect ratio
    /// collapses the patch grid to zero columns. The caller must skip the
    /// frame rather than retry it.
    #[error("input image has degenerate geometry (zero-sized image or empty patch grid)")]
    EmptyInput,

    /// The reference mask selected no foreground patches, so there is nothing
    /// to average into a prototype.
    #[error("foreground mask selected no patches")]
    NoForegroundPatches,

    /// The reference image does not carry an explicit foreground/alpha
    /// channel.
    #[error("reference image has {found} channels, expected 4 (RGB plus a foreground alpha channel)")]
    InvalidChannelCount { found: u8 },

    /// The external feature extractor failed or produced output that does not
    /// line up with the patch grid.
    #[error("feature extractor failed: {0}")]
    Extractor(#[from] ExtractorError),
}
