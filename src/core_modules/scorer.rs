// THEORY:
// The `scorer` module turns raw per-patch feature vectors into the score grid
// the rest of the engine reasons about. One cosine similarity against the
// registered prototype per patch, row-major, nothing else. It is a pure
// function of its inputs: no state, no side effects, trivially reentrant.

use crate::core_modules::feature::cosine_similarity;

/// Scores every patch's feature vector against the prototype.
///
/// `features` holds `num_patches` consecutive vectors, each with the
/// prototype's dimension. The returned score grid is row-major over the patch
/// grid, with values in `[-1, 1]`; only positive similarities are meaningful
/// downstream. A trailing partial vector (which a well-behaved extractor
/// never produces) is ignored.
pub fn score_patches(features: &[f32], prototype: &[f32]) -> Vec<f32> {
    if prototype.is_empty() {
        return Vec::new();
    }
    features
        .chunks_exact(prototype.len())
        .map(|patch| cosine_similarity(patch, prototype))
        .collect()
}
