pub mod backend;
pub mod clustering;
pub mod config;
pub mod features;
pub mod forest;
pub mod geometry;
pub mod image;
pub mod prediction;
pub mod relocalisation;
