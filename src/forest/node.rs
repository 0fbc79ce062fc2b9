//! Forest topology: node records, interleaved node table, text loader.
//!
//! # Layout
//!
//! Nodes of all trees are interleaved so that node `n` of every tree sits
//! in one contiguous run: `nodes[n * tree_count + tree]`. Trees with fewer
//! nodes than the largest tree are padded with unreachable placeholder
//! nodes. Leaves of tree `t` map to flat leaf indices starting at
//! `leaf_offset(t)`, which index the reservoir store and prediction table.
//!
//! # Text Format
//!
//! ```text
//! tree_count
//! node_count leaf_count          (once per tree, followed by its nodes)
//! left_child leaf feature threshold
//! ...
//! ```
//!
//! A node is a leaf iff `leaf >= 0`; split nodes carry `leaf = -1` and send
//! descriptors with `descriptor[feature] > threshold` to `left_child + 1`,
//! all others to `left_child`. Blank lines and lines starting with `#` are
//! ignored.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::ForestError;

/// One node of a decision tree.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForestNode {
    /// Index of the left child; the right child is `left_child + 1`.
    pub left_child: i32,
    /// Leaf id within the tree, or -1 for split nodes.
    pub leaf: i32,
    /// Descriptor element tested by a split node.
    pub feature: u32,
    pub threshold: f32,
}

impl ForestNode {
    /// A leaf node with the given id.
    pub fn leaf(leaf: u32) -> Self {
        Self {
            left_child: -1,
            leaf: leaf as i32,
            feature: 0,
            threshold: 0.0,
        }
    }

    /// A split node.
    pub fn split(left_child: u32, feature: u32, threshold: f32) -> Self {
        Self {
            left_child: left_child as i32,
            leaf: -1,
            feature,
            threshold,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.leaf >= 0
    }

    /// Padding entry for interleaved slots beyond a tree's node count.
    fn placeholder() -> Self {
        Self {
            left_child: -1,
            leaf: -1,
            feature: 0,
            threshold: 0.0,
        }
    }
}

/// Validated, interleaved node storage for a whole forest.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeTable {
    tree_count: usize,
    stride: usize,
    node_counts: Vec<usize>,
    leaf_counts: Vec<usize>,
    leaf_offsets: Vec<usize>,
    total_leaves: usize,
    required_descriptor_len: usize,
    nodes: Vec<ForestNode>,
}

impl NodeTable {
    /// Build a table from per-tree node lists, validating topology.
    ///
    /// Every split node must point at two children inside its tree and after
    /// itself; leaf ids must be exactly `0..leaf_count` for each tree.
    pub fn from_trees(trees: &[Vec<ForestNode>]) -> Result<Self, ForestError> {
        if trees.is_empty() {
            return Err(ForestError::malformed(0, "forest has no trees"));
        }

        let mut node_counts = Vec::with_capacity(trees.len());
        let mut leaf_counts = Vec::with_capacity(trees.len());
        let mut required_descriptor_len = 0usize;

        for (t, tree) in trees.iter().enumerate() {
            let leaf_count = validate_tree(t, tree)?;
            for node in tree.iter().filter(|n| !n.is_leaf()) {
                required_descriptor_len = required_descriptor_len.max(node.feature as usize + 1);
            }
            node_counts.push(tree.len());
            leaf_counts.push(leaf_count);
        }

        let tree_count = trees.len();
        let stride = node_counts.iter().copied().max().unwrap_or(0);
        let mut nodes = vec![ForestNode::placeholder(); stride * tree_count];
        for (t, tree) in trees.iter().enumerate() {
            for (n, node) in tree.iter().enumerate() {
                nodes[n * tree_count + t] = *node;
            }
        }

        let mut leaf_offsets = Vec::with_capacity(tree_count);
        let mut total_leaves = 0;
        for &count in &leaf_counts {
            leaf_offsets.push(total_leaves);
            total_leaves += count;
        }

        Ok(Self {
            tree_count,
            stride,
            node_counts,
            leaf_counts,
            leaf_offsets,
            total_leaves,
            required_descriptor_len,
            nodes,
        })
    }

    /// Load a forest structure from the text format.
    pub fn load_from_text<P: AsRef<Path>>(path: P) -> Result<Self, ForestError> {
        let file = File::open(path.as_ref())?;
        let table = Self::parse_text(BufReader::new(file))?;

        tracing::info!(
            "Loaded forest structure: {} trees, {} leaves, descriptors of length >= {}",
            table.tree_count,
            table.total_leaves,
            table.required_descriptor_len
        );

        Ok(table)
    }

    /// Parse the text format from any reader.
    pub fn parse_text<R: BufRead>(reader: R) -> Result<Self, ForestError> {
        let mut lines = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            lines.push((idx + 1, trimmed.to_string()));
        }
        let mut lines = lines.into_iter();

        let (line_no, header) = lines
            .next()
            .ok_or_else(|| ForestError::parse(1, "empty forest file"))?;
        let tree_count: usize = header
            .parse()
            .map_err(|_| ForestError::parse(line_no, "invalid tree count"))?;

        let mut trees = Vec::with_capacity(tree_count);
        for t in 0..tree_count {
            let (line_no, tree_header) = lines
                .next()
                .ok_or_else(|| ForestError::parse(line_no, format!("missing header of tree {}", t)))?;
            let parts: Vec<&str> = tree_header.split_whitespace().collect();
            if parts.len() != 2 {
                return Err(ForestError::parse(line_no, "expected: node_count leaf_count"));
            }
            let node_count: usize = parts[0]
                .parse()
                .map_err(|_| ForestError::parse(line_no, "invalid node count"))?;
            let leaf_count: usize = parts[1]
                .parse()
                .map_err(|_| ForestError::parse(line_no, "invalid leaf count"))?;

            let mut nodes = Vec::with_capacity(node_count);
            for _ in 0..node_count {
                let (line_no, node_line) = lines
                    .next()
                    .ok_or_else(|| ForestError::parse(line_no, format!("tree {} is truncated", t)))?;
                nodes.push(parse_node(line_no, &node_line)?);
            }

            let actual_leaves = nodes.iter().filter(|n| n.is_leaf()).count();
            if actual_leaves != leaf_count {
                return Err(ForestError::malformed(
                    t,
                    format!("header declares {} leaves, found {}", leaf_count, actual_leaves),
                ));
            }
            trees.push(nodes);
        }

        if let Some((line_no, _)) = lines.next() {
            return Err(ForestError::parse(line_no, "trailing data after last tree"));
        }

        Self::from_trees(&trees)
    }

    /// Write the structure in the text format accepted by [`parse_text`](Self::parse_text).
    pub fn write_text<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        writeln!(writer, "{}", self.tree_count)?;
        for t in 0..self.tree_count {
            writeln!(writer, "{} {}", self.node_counts[t], self.leaf_counts[t])?;
            for node in self.tree_nodes(t) {
                writeln!(
                    writer,
                    "{} {} {} {}",
                    node.left_child, node.leaf, node.feature, node.threshold
                )?;
            }
        }
        Ok(())
    }

    /// Build complete binary trees of the given depth with random splits.
    ///
    /// Thresholds are drawn uniformly from `threshold_range`. Useful to
    /// bootstrap a forest that is then adapted online.
    pub fn random_complete<R: Rng>(
        tree_count: usize,
        depth: u32,
        descriptor_len: usize,
        threshold_range: std::ops::Range<f32>,
        rng: &mut R,
    ) -> Result<Self, ForestError> {
        let descriptor_len = descriptor_len.max(1);
        let split_count = (1usize << depth) - 1;
        let node_count = (1usize << (depth + 1)) - 1;

        let trees: Vec<Vec<ForestNode>> = (0..tree_count)
            .map(|_| {
                (0..node_count)
                    .map(|n| {
                        if n < split_count {
                            ForestNode::split(
                                (2 * n + 1) as u32,
                                rng.gen_range(0..descriptor_len) as u32,
                                rng.gen_range(threshold_range.clone()),
                            )
                        } else {
                            ForestNode::leaf((n - split_count) as u32)
                        }
                    })
                    .collect()
            })
            .collect();

        Self::from_trees(&trees)
    }

    /// Node `node` of tree `tree`.
    #[inline]
    pub fn node(&self, tree: usize, node: usize) -> &ForestNode {
        &self.nodes[node * self.tree_count + tree]
    }

    /// De-interleaved copy of one tree's nodes.
    pub fn tree_nodes(&self, tree: usize) -> Vec<ForestNode> {
        (0..self.node_counts[tree])
            .map(|n| *self.node(tree, n))
            .collect()
    }

    pub fn tree_count(&self) -> usize {
        self.tree_count
    }

    pub fn node_count(&self, tree: usize) -> usize {
        self.node_counts[tree]
    }

    pub fn leaf_count(&self, tree: usize) -> usize {
        self.leaf_counts[tree]
    }

    /// Leaves across all trees.
    pub fn total_leaves(&self) -> usize {
        self.total_leaves
    }

    /// Smallest descriptor length every split can be evaluated on.
    pub fn required_descriptor_len(&self) -> usize {
        self.required_descriptor_len
    }

    /// Flat index of the first leaf of `tree`.
    #[inline]
    pub fn leaf_offset(&self, tree: usize) -> usize {
        self.leaf_offsets[tree]
    }

    /// Flat leaf index for (tree, leaf), checking both ranges.
    pub fn flat_leaf_index(&self, tree: usize, leaf: usize) -> Result<usize, ForestError> {
        if tree >= self.tree_count {
            return Err(ForestError::TreeOutOfRange {
                tree,
                tree_count: self.tree_count,
            });
        }
        if leaf >= self.leaf_counts[tree] {
            return Err(ForestError::LeafOutOfRange {
                tree,
                leaf,
                leaf_count: self.leaf_counts[tree],
            });
        }
        Ok(self.leaf_offsets[tree] + leaf)
    }

    /// Inverse of [`flat_leaf_index`](Self::flat_leaf_index).
    pub fn split_flat_index(&self, flat: usize) -> Option<(usize, usize)> {
        if flat >= self.total_leaves {
            return None;
        }
        let tree = self.leaf_offsets.partition_point(|&off| off <= flat) - 1;
        Some((tree, flat - self.leaf_offsets[tree]))
    }

    /// Depth of the deepest leaf of `tree` (a root-only tree has depth 0).
    pub fn tree_depth(&self, tree: usize) -> usize {
        let mut max_depth = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((n, depth)) = stack.pop() {
            let node = self.node(tree, n);
            if node.is_leaf() {
                max_depth = max_depth.max(depth);
            } else {
                let left = node.left_child as usize;
                stack.push((left, depth + 1));
                stack.push((left + 1, depth + 1));
            }
        }
        max_depth
    }
}

fn parse_node(line_no: usize, line: &str) -> Result<ForestNode, ForestError> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 4 {
        return Err(ForestError::parse(
            line_no,
            "expected: left_child leaf feature threshold",
        ));
    }
    let left_child: i32 = parts[0]
        .parse()
        .map_err(|_| ForestError::parse(line_no, "invalid left child"))?;
    let leaf: i32 = parts[1]
        .parse()
        .map_err(|_| ForestError::parse(line_no, "invalid leaf index"))?;
    let feature: u32 = parts[2]
        .parse()
        .map_err(|_| ForestError::parse(line_no, "invalid feature index"))?;
    let threshold: f32 = parts[3]
        .parse()
        .map_err(|_| ForestError::parse(line_no, "invalid threshold"))?;

    Ok(ForestNode {
        left_child,
        leaf,
        feature,
        threshold,
    })
}

/// Check one tree's topology; returns its leaf count.
fn validate_tree(t: usize, tree: &[ForestNode]) -> Result<usize, ForestError> {
    if tree.is_empty() {
        return Err(ForestError::malformed(t, "tree has no nodes"));
    }

    let leaf_count = tree.iter().filter(|n| n.is_leaf()).count();
    let mut seen = vec![false; leaf_count];

    for (i, node) in tree.iter().enumerate() {
        if node.is_leaf() {
            let leaf = node.leaf as usize;
            if leaf >= leaf_count {
                return Err(ForestError::malformed(
                    t,
                    format!("node {} has leaf id {} but the tree has {} leaves", i, leaf, leaf_count),
                ));
            }
            if std::mem::replace(&mut seen[leaf], true) {
                return Err(ForestError::malformed(t, format!("leaf id {} appears twice", leaf)));
            }
        } else {
            if node.leaf != -1 {
                return Err(ForestError::malformed(
                    t,
                    format!("node {} has invalid leaf id {}", i, node.leaf),
                ));
            }
            let left = node.left_child;
            if left <= i as i32 || left as usize + 1 >= tree.len() {
                return Err(ForestError::malformed(
                    t,
                    format!("node {} has invalid left child {}", i, left),
                ));
            }
        }
    }

    Ok(leaf_count)
}
