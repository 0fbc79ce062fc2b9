//! Merging of per-tree leaf predictions into one per-pixel prediction.

use crate::clustering::{ScorePrediction, MAX_MODES};

/// Merge the leaf predictions reached by one pixel, one per tree.
///
/// Each input is already sorted by non-increasing inliers, so this is a
/// k-way merge with one cursor per tree:
/// 1. pick the tree whose cursor mode has strictly more inliers than any
///    earlier tree (ties go to the lowest tree index)
/// 2. stop when no cursor has a mode with a positive inlier count
/// 3. append that mode and advance the cursor
///
/// At most `max_modes` (clamped to [`MAX_MODES`]) modes are emitted.
pub fn merge_leaf_predictions(leaves: &[&ScorePrediction], max_modes: usize) -> ScorePrediction {
    let max_modes = max_modes.min(MAX_MODES);
    let mut cursors = vec![0usize; leaves.len()];
    let mut merged = ScorePrediction::new();

    while merged.len() < max_modes {
        let mut best_tree = None;
        let mut best_inliers = 0u32;

        for (tree, leaf) in leaves.iter().enumerate() {
            if let Some(mode) = leaf.modes().get(cursors[tree]) {
                if mode.inliers > best_inliers {
                    best_inliers = mode.inliers;
                    best_tree = Some(tree);
                }
            }
        }

        let Some(tree) = best_tree else { break };
        merged.push(leaves[tree].modes()[cursors[tree]]);
        cursors[tree] += 1;
    }

    merged
}
