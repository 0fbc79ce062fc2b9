//! Camera relocalisation on top of the score forest.
//!
//! - [`ScoreRelocaliser`]: features → forest predictions → preemptive RANSAC
//! - [`RefiningRelocaliser`]: wraps any relocaliser with dense refinement,
//!   quality grading, timing and pose persistence

pub mod pose_writer;
pub mod ransac;
pub mod refining;
pub mod relocaliser;
pub mod score_relocaliser;
pub mod timer;

pub use pose_writer::{AsyncPoseWriter, PoseRecord, PoseSink};
pub use ransac::{PoseCandidate, PoseFromModes, PreemptiveRansac, RansacConfig};
pub use refining::{
    EvaluationMode, PoseRefiner, RefinedPose, RefiningConfig, RefiningRelocaliser,
    RelocalisationOutcome, TrackingQuality,
};
pub use relocaliser::{RelocalisationQuality, RelocalisationResult, Relocaliser};
pub use score_relocaliser::ScoreRelocaliser;
pub use timer::AverageTimer;
