//! Modal predictions: per-leaf and per-pixel lists of spatial clusters.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

/// Upper bound on modes in any prediction, per leaf or merged per pixel.
pub const MAX_MODES: usize = 50;

/// Regulariser added to covariance diagonals before inversion.
pub const COVARIANCE_EPSILON: f32 = 1e-6;

/// Summary of one spatial cluster of scene points.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Mode {
    /// Mean world position of the members.
    pub position: Vector3<f32>,
    /// Population covariance of the member positions.
    pub covariance: Matrix3<f32>,
    /// Inverse of the regularised covariance.
    pub inverse_covariance: Matrix3<f32>,
    /// Determinant of the regularised covariance.
    pub determinant: f32,
    /// Mean colour, rounded.
    pub colour: Vector3<u8>,
    /// Number of members; always > 0.
    pub inliers: u32,
}

impl Mode {
    /// Gaussian-style energy of `point` under this mode (higher is better).
    ///
    /// Used by the pose solver to score scene-coordinate hypotheses.
    pub fn log_likelihood(&self, point: &Vector3<f32>) -> f32 {
        let diff = point - self.position;
        let mahalanobis = diff.dot(&(self.inverse_covariance * diff));
        let norm = (2.0 * std::f32::consts::PI).powi(3) * self.determinant.max(f32::MIN_POSITIVE);
        (self.inliers as f32).ln() - 0.5 * norm.ln() - 0.5 * mahalanobis
    }
}

/// Ranked list of at most [`MAX_MODES`] modes, sorted by non-increasing inliers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScorePrediction {
    modes: Vec<Mode>,
}

impl ScorePrediction {
    pub fn new() -> Self {
        Self { modes: Vec::new() }
    }

    /// Build from modes, sorting by inliers (stable) and truncating to
    /// [`MAX_MODES`].
    pub fn from_modes(mut modes: Vec<Mode>) -> Self {
        modes.sort_by(|a, b| b.inliers.cmp(&a.inliers));
        modes.truncate(MAX_MODES);
        Self { modes }
    }

    /// Append a mode the caller knows ranks below all existing ones.
    /// Returns false (and drops the mode) when the prediction is full.
    pub fn push(&mut self, mode: Mode) -> bool {
        if self.modes.len() >= MAX_MODES {
            return false;
        }
        debug_assert!(self.modes.last().map_or(true, |m| m.inliers >= mode.inliers));
        self.modes.push(mode);
        true
    }

    /// Check the ranking invariants of a prediction that did not come from
    /// [`from_modes`](Self::from_modes), e.g. one read back from disk.
    pub fn validate(&self) -> Result<(), String> {
        if self.modes.len() > MAX_MODES {
            return Err(format!("{} modes exceed the limit of {}", self.modes.len(), MAX_MODES));
        }
        if let Some(i) = self.modes.iter().position(|m| m.inliers == 0) {
            return Err(format!("mode {} has no inliers", i));
        }
        if let Some(i) = self.modes.windows(2).position(|w| w[0].inliers < w[1].inliers) {
            return Err(format!("modes {} and {} are not ranked by inliers", i, i + 1));
        }
        Ok(())
    }

    pub fn modes(&self) -> &[Mode] {
        &self.modes
    }

    pub fn len(&self) -> usize {
        self.modes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modes.is_empty()
    }

    /// Mode with the most inliers.
    pub fn best(&self) -> Option<&Mode> {
        self.modes.first()
    }

    /// Mode whose mean is closest to `point`.
    pub fn closest(&self, point: &Vector3<f32>) -> Option<&Mode> {
        self.modes.iter().min_by(|a, b| {
            let da = (a.position - point).norm_squared();
            let db = (b.position - point).norm_squared();
            da.total_cmp(&db)
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// A unit-covariance mode at `position` with `inliers` members.
    pub fn mode_at(position: Vector3<f32>, inliers: u32) -> Mode {
        Mode {
            position,
            covariance: Matrix3::identity(),
            inverse_covariance: Matrix3::identity(),
            determinant: 1.0,
            colour: Vector3::zeros(),
            inliers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::mode_at;
    use super::*;

    #[test]
    fn test_from_modes_sorts_and_bounds() {
        let modes: Vec<Mode> = (0..60)
            .map(|i| mode_at(Vector3::new(i as f32, 0.0, 0.0), (i % 7 + 1) as u32))
            .collect();
        let pred = ScorePrediction::from_modes(modes);

        assert_eq!(pred.len(), MAX_MODES);
        assert!(pred.modes().windows(2).all(|w| w[0].inliers >= w[1].inliers));
        assert_eq!(pred.best().unwrap().inliers, 7);
    }

    #[test]
    fn test_push_stops_at_capacity() {
        let mut pred = ScorePrediction::new();
        for _ in 0..MAX_MODES {
            assert!(pred.push(mode_at(Vector3::zeros(), 1)));
        }
        assert!(!pred.push(mode_at(Vector3::zeros(), 1)));
        assert_eq!(pred.len(), MAX_MODES);
    }

    #[test]
    fn test_validate_rejects_broken_rankings() {
        let ranked = ScorePrediction::from_modes(vec![
            mode_at(Vector3::zeros(), 2),
            mode_at(Vector3::zeros(), 9),
        ]);
        assert!(ranked.validate().is_ok());
        assert!(ScorePrediction::new().validate().is_ok());

        let unsorted = ScorePrediction {
            modes: vec![mode_at(Vector3::zeros(), 5), mode_at(Vector3::zeros(), 10)],
        };
        assert!(unsorted.validate().is_err());

        let empty_mode = ScorePrediction {
            modes: vec![mode_at(Vector3::zeros(), 5), mode_at(Vector3::zeros(), 0)],
        };
        assert!(empty_mode.validate().is_err());

        let oversized = ScorePrediction {
            modes: vec![mode_at(Vector3::zeros(), 1); MAX_MODES + 1],
        };
        assert!(oversized.validate().is_err());
    }

    #[test]
    fn test_closest_mode() {
        let pred = ScorePrediction::from_modes(vec![
            mode_at(Vector3::new(0.0, 0.0, 0.0), 5),
            mode_at(Vector3::new(1.0, 0.0, 0.0), 3),
        ]);
        let m = pred.closest(&Vector3::new(0.9, 0.1, 0.0)).unwrap();
        assert_eq!(m.inliers, 3);
    }

    #[test]
    fn test_likelihood_peaks_at_mean() {
        let m = mode_at(Vector3::new(1.0, 2.0, 3.0), 10);
        let at_mean = m.log_likelihood(&Vector3::new(1.0, 2.0, 3.0));
        let away = m.log_likelihood(&Vector3::new(1.5, 2.0, 3.0));
        assert!(at_mean > away);
    }
}
