//! Closed-form rigid alignment of 3D point correspondences.
//!
//! Used by the pose solver to turn camera-space keypoints and their predicted
//! world-space scene coordinates into a camera-to-world pose.

use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};

use super::SE3;

/// Compute the rigid transform T minimising Σ‖T·src_i − dst_i‖².
///
/// Algorithm (Horn / Kabsch, scale fixed to 1):
/// 1. Centre both point sets on their centroids
/// 2. Cross-covariance H = Σ src_i dst_iᵀ
/// 3. R = V Uᵀ from the SVD of H, flipping the last column of V on reflection
/// 4. t = c_dst − R c_src
///
/// Returns `None` for fewer than 3 correspondences or a failed SVD.
pub fn rigid_transform(src: &[Vector3<f64>], dst: &[Vector3<f64>]) -> Option<SE3> {
    let n = src.len();
    if n < 3 || n != dst.len() {
        return None;
    }

    let centroid_src = centroid(src);
    let centroid_dst = centroid(dst);

    let mut h = Matrix3::zeros();
    for (s, d) in src.iter().zip(dst.iter()) {
        h += (s - centroid_src) * (d - centroid_dst).transpose();
    }

    let svd = h.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;

    let mut rotation_mat = v_t.transpose() * u.transpose();
    if rotation_mat.determinant() < 0.0 {
        let mut v = v_t.transpose();
        for i in 0..3 {
            v[(i, 2)] = -v[(i, 2)];
        }
        rotation_mat = v * u.transpose();
    }

    let rotation =
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(rotation_mat));
    let translation = centroid_dst - rotation * centroid_src;

    Some(SE3 {
        rotation,
        translation,
    })
}

fn centroid(points: &[Vector3<f64>]) -> Vector3<f64> {
    let sum: Vector3<f64> = points.iter().sum();
    sum / points.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_points() -> Vec<Vector3<f64>> {
        (0..8)
            .map(|i| {
                let f = i as f64;
                Vector3::new(f * 0.3 + 1.0, (f * 0.7).sin(), (f * 1.3).cos() + 2.0)
            })
            .collect()
    }

    #[test]
    fn test_identity_alignment() {
        let pts = sample_points();
        let pose = rigid_transform(&pts, &pts).unwrap();

        assert_relative_eq!(pose.translation.norm(), 0.0, epsilon = 1e-10);
        assert_relative_eq!(pose.rotation.angle(), 0.0, epsilon = 1e-8);
    }

    #[test]
    fn test_recovers_known_transform() {
        let truth = SE3::from_axis_angle(Vector3::new(0.2, -0.4, 0.9), Vector3::new(0.5, -1.0, 2.0));
        let src = sample_points();
        let dst: Vec<_> = src.iter().map(|p| truth.transform_point(p)).collect();

        let pose = rigid_transform(&src, &dst).unwrap();
        for (s, d) in src.iter().zip(dst.iter()) {
            assert_relative_eq!(pose.transform_point(s), *d, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_too_few_points() {
        let pts = vec![Vector3::new(1.0, 0.0, 0.0), Vector3::new(0.0, 1.0, 0.0)];
        assert!(rigid_transform(&pts, &pts).is_none());
    }
}
