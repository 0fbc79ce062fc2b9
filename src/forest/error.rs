//! Errors raised by the forest and its stores.

use thiserror::Error;

/// Load failures and invalid-argument errors from the forest.
#[derive(Debug, Error)]
pub enum ForestError {
    #[error("forest I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("forest parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error("malformed tree {tree}: {message}")]
    MalformedTree { tree: usize, message: String },

    #[error("tree index {tree} out of range (forest has {tree_count} trees)")]
    TreeOutOfRange { tree: usize, tree_count: usize },

    #[error("leaf index {leaf} out of range (tree {tree} has {leaf_count} leaves)")]
    LeafOutOfRange {
        tree: usize,
        leaf: usize,
        leaf_count: usize,
    },

    #[error("reservoir index {index} out of range (store has {count} reservoirs)")]
    ReservoirOutOfRange { index: usize, count: usize },

    #[error("descriptors have {actual} features but the forest reads feature {required}")]
    DescriptorTooShort { required: usize, actual: usize },

    #[error("image size mismatch: expected {expected:?}, got {actual:?}")]
    ImageSizeMismatch {
        expected: (usize, usize),
        actual: (usize, usize),
    },

    #[error("forest snapshot error: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("inconsistent forest snapshot: {0}")]
    InconsistentSnapshot(String),
}

impl ForestError {
    pub(crate) fn parse(line: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            message: message.into(),
        }
    }

    pub(crate) fn malformed(tree: usize, message: impl Into<String>) -> Self {
        Self::MalformedTree {
            tree,
            message: message.into(),
        }
    }
}
