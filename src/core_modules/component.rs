// THEORY:
// The `component` module is the spatial grouping layer. It takes the flat
// score grid from the scorer and finds the single largest contiguous region of
// "active" patches, the region most likely to be the registered object.
//
// Key architectural principles:
// 1.  **Binary Activity, 4-Connectivity**: A patch is active iff its score is
//     strictly above the threshold. Regions grow through direct neighbors only
//     (up/down/left/right); diagonal adjacency does not connect patches.
// 2.  **Single Winner**: All components are discovered, but only the largest
//     (by patch count) survives. Everything else is zeroed in the output so
//     downstream overlay code never renders stray islands. Ties go to the
//     first component discovered in row-major scan order, a stable,
//     reproducible tie-break.
// 3.  **Stateless Utility**: Each call operates on a fresh grid and retains
//     nothing. A `visited` grid bounds the flood fill to one visit per patch,
//     so the whole pass is O(rows * cols) in time and space.

use crate::core_modules::patch_grid::PatchGrid;
use std::collections::VecDeque;

/// The sole output artifact of one segmentation pass, consumed by the
/// rendering/placement collaborators.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentationResult {
    /// Row-major similarity scores, masked to the largest component: member
    /// patches keep their score, every other patch is `0.0`.
    pub scores: Vec<f32>,
    /// The number of patch columns in the grid.
    pub w_patches: u32,
    /// The number of patch rows in the grid.
    pub h_patches: u32,
    /// The mean `(column, row)` of the largest component's patches, or `None`
    /// when no patch was active.
    pub centroid: Option<(f32, f32)>,
}

impl SegmentationResult {
    /// Maps the centroid from patch-grid coordinates into a view of the given
    /// pixel dimensions, for placement/hit-test consumers.
    pub fn centroid_in_view(&self, view_width: f32, view_height: f32) -> Option<(f32, f32)> {
        let (cx, cy) = self.centroid?;
        Some((
            cx / self.w_patches as f32 * view_width,
            cy / self.h_patches as f32 * view_height,
        ))
    }
}

/// Finds the largest 4-connected component of patches scoring strictly above
/// `threshold` and returns the masked score grid plus its centroid.
///
/// Pure and reentrant: safe to call repeatedly on fresh grids with no state
/// carried across calls.
pub fn extract_largest_component(
    scores: &[f32],
    grid: &PatchGrid,
    threshold: f32,
) -> SegmentationResult {
    let rows = grid.h_patches as usize;
    let cols = grid.w_patches as usize;
    debug_assert_eq!(scores.len(), rows * cols);

    let mut visited = vec![false; rows * cols];
    let mut largest: Vec<usize> = Vec::new();

    // Components are discovered in row-major scan order; the strict `>` below
    // means an equal-sized later component never displaces an earlier one.
    for r in 0..rows {
        for c in 0..cols {
            let index = r * cols + c;
            if scores[index] > threshold && !visited[index] {
                let component = flood_fill(scores, rows, cols, threshold, (r, c), &mut visited);
                if component.len() > largest.len() {
                    largest = component;
                }
            }
        }
    }

    if largest.is_empty() {
        return SegmentationResult {
            scores: vec![0.0; rows * cols],
            w_patches: grid.w_patches,
            h_patches: grid.h_patches,
            centroid: None,
        };
    }

    let mut masked = vec![0.0f32; rows * cols];
    let mut total_col = 0usize;
    let mut total_row = 0usize;
    for &index in &largest {
        masked[index] = scores[index];
        total_col += index % cols;
        total_row += index / cols;
    }

    let count = largest.len() as f32;
    SegmentationResult {
        scores: masked,
        w_patches: grid.w_patches,
        h_patches: grid.h_patches,
        centroid: Some((total_col as f32 / count, total_row as f32 / count)),
    }
}

/// Breadth-first flood fill collecting one component's patch indices.
fn flood_fill(
    scores: &[f32],
    rows: usize,
    cols: usize,
    threshold: f32,
    seed: (usize, usize),
    visited: &mut [bool],
) -> Vec<usize> {
    let mut component = Vec::new();
    let mut queue = VecDeque::new();

    queue.push_back(seed);
    visited[seed.0 * cols + seed.1] = true;

    while let Some((r, c)) = queue.pop_front() {
        component.push(r * cols + c);

        // Direct neighbors only, no diagonals.
        for (dr, dc) in [(0i32, 1i32), (0, -1), (1, 0), (-1, 0)] {
            let nr = r as i32 + dr;
            let nc = c as i32 + dc;
            if nr < 0 || nr >= rows as i32 || nc < 0 || nc >= cols as i32 {
                continue;
            }

            let nr = nr as usize;
            let nc = nc as usize;
            let neighbor = nr * cols + nc;
            if !visited[neighbor] && scores[neighbor] > threshold {
                visited[neighbor] = true;
                queue.push_back((nr, nc));
            }
        }
    }

    component
}
