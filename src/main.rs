use anyhow::{Context, Result};
use nalgebra::Vector3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rust_reloc::backend::ExecutionBackend;
use rust_reloc::config::RelocaliserConfig;
use rust_reloc::features::{
    backproject_keypoints, CameraIntrinsics, DescriptorImage, FeatureExtractor, KeypointImage,
    RgbdFrame,
};
use rust_reloc::forest::{NodeTable, ScoreForest};
use rust_reloc::geometry::SE3;
use rust_reloc::image::Image;
use rust_reloc::relocalisation::{
    PreemptiveRansac, RefiningRelocaliser, RelocalisationOutcome, Relocaliser, ScoreRelocaliser,
};

/// Wall plane of the synthetic scene (world z, metres).
const WALL_Z: f64 = 3.0;

const WIDTH: usize = 80;
const HEIGHT: usize = 60;

/// Descriptor = normalised pixel colour.
struct ColourExtractor;

impl FeatureExtractor for ColourExtractor {
    fn compute_features(&self, frame: &RgbdFrame) -> Result<(KeypointImage, DescriptorImage)> {
        let keypoints = backproject_keypoints(frame);
        let mut descriptors = DescriptorImage::new(frame.colour.width(), frame.colour.height(), 3);
        for (p, rgb) in frame.colour.iter().enumerate() {
            let d = descriptors.descriptor_mut(p);
            for c in 0..3 {
                d[c] = rgb[c] as f32 / 255.0;
            }
        }
        Ok((keypoints, descriptors))
    }
}

/// Colour of the textured wall at world (x, y).
fn wall_colour(x: f64, y: f64) -> [u8; 3] {
    let r = x.rem_euclid(1.0);
    let g = y.rem_euclid(1.0);
    let b = (x.floor() + y.floor()).rem_euclid(4.0) / 4.0;
    [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]
}

/// Render the wall as seen from `camera_to_world`.
fn render(camera_to_world: &SE3, intrinsics: &CameraIntrinsics) -> Result<RgbdFrame> {
    let mut colour = Vec::with_capacity(WIDTH * HEIGHT);
    let mut depth = Vec::with_capacity(WIDTH * HEIGHT);

    for v in 0..HEIGHT {
        for u in 0..WIDTH {
            let ray_cam = Vector3::new(
                (u as f64 - intrinsics.cx as f64) / intrinsics.fx as f64,
                (v as f64 - intrinsics.cy as f64) / intrinsics.fy as f64,
                1.0,
            );
            let ray_world = camera_to_world.rotation * ray_cam;
            let s = (WALL_Z - camera_to_world.translation.z) / ray_world.z;
            if ray_world.z <= 0.0 || s <= 0.0 {
                colour.push([0, 0, 0]);
                depth.push(0.0);
                continue;
            }
            let hit = camera_to_world.translation + ray_world * s;
            colour.push(wall_colour(hit.x, hit.y));
            depth.push(s as f32);
        }
    }

    Ok(RgbdFrame {
        colour: Image::from_vec(WIDTH, HEIGHT, colour).context("Colour buffer size")?,
        depth: Image::from_vec(WIDTH, HEIGHT, depth).context("Depth buffer size")?,
        intrinsics: *intrinsics,
    })
}

fn trajectory_pose(i: usize) -> SE3 {
    let t = i as f64 * 0.05;
    SE3::from_axis_angle(
        Vector3::new(0.05 * t.sin(), 0.1 * t.cos(), 0.02 * t),
        Vector3::new(0.4 * t.sin(), 0.2 * t.cos(), 0.1 * t),
    )
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => RelocaliserConfig::load(&path)
            .with_context(|| format!("Failed to load configuration {}", path))?,
        None => RelocaliserConfig::default(),
    };
    let forest_path = args.next();

    let intrinsics = CameraIntrinsics::new(70.0, 70.0, WIDTH as f32 / 2.0, HEIGHT as f32 / 2.0);
    let backend = ExecutionBackend::from_config(&config.backend)?;

    let inner = match forest_path {
        Some(path) => ScoreRelocaliser::from_config(Box::new(ColourExtractor), &path, &config)?,
        None => {
            let mut rng = StdRng::seed_from_u64(config.forest.seed);
            let nodes = NodeTable::random_complete(5, 8, 3, 0.0..1.0, &mut rng)?;
            let forest = ScoreForest::new(
                nodes,
                config.forest.clone(),
                config.clustering.clone(),
                backend,
            );
            ScoreRelocaliser::new(
                Box::new(ColourExtractor),
                forest,
                Box::new(PreemptiveRansac::new(config.ransac.clone())),
            )
        }
    };

    let mut relocaliser =
        RefiningRelocaliser::new(Box::new(inner), None, config.refining.clone())?;

    // Train on every other pose of the trajectory.
    let frame_count = 40;
    for i in (0..frame_count).step_by(2) {
        let pose = trajectory_pose(i);
        relocaliser.train(&render(&pose, &intrinsics)?, &pose)?;
        relocaliser.update()?;
    }
    relocaliser.finish_training()?;

    // Relocalise the poses in between.
    let mut found = 0;
    for i in (1..frame_count).step_by(2) {
        let truth = trajectory_pose(i);
        let frame = render(&truth, &intrinsics)?;
        match relocaliser.relocalise_with_outcome(&frame)? {
            RelocalisationOutcome::Relocalised { result, .. } => {
                let (dt, angle) = result.pose.distance_to(&truth);
                info!(
                    "Frame {}: {:?}, error {:.3} m / {:.2} deg",
                    i,
                    result.quality,
                    dt,
                    angle.to_degrees()
                );
                found += 1;
            }
            outcome => warn!("Frame {}: {:?}", i, outcome),
        }
    }

    info!("Relocalised {}/{} frames", found, frame_count / 2);
    Ok(())
}
