// THEORY:
// The `feature` module holds the small, fixed-length vector arithmetic that
// everything above it is built from. A feature vector is the model's
// description of one image patch: an ordered run of `D` floats, produced once
// by the extractor and never mutated afterwards.
//
// Key architectural principles:
// 1.  **Dumb Math, No Policy**: This layer knows nothing about grids, masks or
//     thresholds. It compares and averages flat slices, and that is all.
// 2.  **Total Functions**: Every input has a defined answer. The degenerate
//     zero-magnitude case of cosine similarity is mapped to `0.0` rather than
//     an error, because an all-zero feature patch carries no signal and should
//     simply never score.

/// Computes the cosine similarity between two feature vectors.
///
/// Returns exactly `0.0` when either vector has zero magnitude, which avoids
/// the division by zero without raising an error. Both slices must have the
/// same length.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let mut dot = 0.0f32;
    let mut mag_a = 0.0f32;
    let mut mag_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    let mag_a = mag_a.sqrt();
    let mag_b = mag_b.sqrt();
    if mag_a == 0.0 || mag_b == 0.0 {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

/// Computes the dimension-wise arithmetic mean of a set of feature vectors.
///
/// Returns an all-zero vector of length `dim` when the iterator is empty; the
/// caller decides whether that is an error (the prototype builder does).
pub fn mean_vector<'a, I>(vectors: I, dim: usize) -> Vec<f32>
where
    I: IntoIterator<Item = &'a [f32]>,
{
    let mut sum = vec![0.0f32; dim];
    let mut count = 0usize;

    for vector in vectors {
        debug_assert_eq!(vector.len(), dim);
        for (acc, value) in sum.iter_mut().zip(vector.iter()) {
            *acc += value;
        }
        count += 1;
    }

    if count > 0 {
        for acc in &mut sum {
            *acc /= count as f32;
        }
    }
    sum
}
