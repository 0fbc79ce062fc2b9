//! Geometry utilities: SE3 transforms, rigid point-set alignment.

pub mod kabsch;
pub mod se3;

pub use kabsch::rigid_transform;
pub use se3::SE3;
