//! Regression forest mapping descriptors to modal scene-coordinate predictions.
//!
//! - [`node`]: topology, interleaved node table, text loader
//! - [`router`]: descriptor → leaf per tree
//! - [`reservoir`]: bounded per-leaf sample stores
//! - [`score_forest`]: training, budgeted prediction updates, evaluation

pub mod error;
pub mod node;
pub mod reservoir;
pub mod router;
pub mod score_forest;

pub use error::ForestError;
pub use node::{ForestNode, NodeTable};
pub use reservoir::{ReservoirSample, ReservoirState, ReservoirStore};
pub use router::{route, route_all};
pub use score_forest::{ForestConfig, LeafIndexImage, LeafIndices, ScoreForest, TreeStatistics};
