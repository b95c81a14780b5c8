use std::f64::consts::PI;
use tch::{Kind, Tensor};
use pose3d_utils::rotation::axis_angle_to_matrix;
use pose3d_utils::tensor::{dot_last, excess_above, l2_normalize, negative_part, norm_last, tile_rows, weighted_mse};
use crate::config::{CameraConfig, FocalSource};
use crate::output::{self, CAM_FOCAL_INDEX, CAM_POS_OFFSET};

/// Per-sample camera derived from the network output.
#[derive(Debug)]
pub struct CameraParams {
    /// `[N, 3]`
    pub position: Tensor,
    /// Axis-angle `[N, 3]`
    pub rotation: Tensor,
    /// `[N]`
    pub focal: Tensor,
}

impl CameraParams {
    pub fn from_output(outputs: &Tensor, focal: FocalSource) -> Self {
        let position = output::cam_position(outputs);
        let rotation = output::cam_rotation(outputs);
        let focal = match focal {
            FocalSource::Predicted => output::cam_focal(outputs),
            FocalSource::Fixed { value } => {
                Tensor::full(&[outputs.size()[0]], value, (outputs.kind(), outputs.device()))
            }
        };
        Self { position, rotation, focal }
    }

    pub fn batch_size(&self) -> i64 {
        self.position.size()[0]
    }

    /// Repeats each camera `n` times so row `i * n + j` lines up with point `j` of sample `i`.
    pub fn tile(&self, n: i64) -> Self {
        Self {
            position: tile_rows(&self.position, n),
            rotation: tile_rows(&self.rotation, n),
            focal: tile_rows(&self.focal, n),
        }
    }

    /// Same camera with gradients stopped.
    pub fn detach(&self) -> Self {
        Self {
            position: self.position.detach(),
            rotation: self.rotation.detach(),
            focal: self.focal.detach(),
        }
    }

    pub fn shallow_clone(&self) -> Self {
        Self {
            position: self.position.shallow_clone(),
            rotation: self.rotation.shallow_clone(),
            focal: self.focal.shallow_clone(),
        }
    }

    /// Vertical field of view in degrees: `atan2(ss / 2, f) · 360 / π`.
    pub fn fov_degrees(&self, sensor_size: f64) -> Tensor {
        let half = self.focal.full_like(sensor_size / 2.0);
        half.atan2(&self.focal) * (360.0 / PI)
    }

    /// Viewing plane of each camera: normal `n = R · ẑ` `[N, 3]` and offset `d = n · pos` `[N]`.
    pub fn normal_plane(&self) -> (Tensor, Tensor) {
        let rot = axis_angle_to_matrix(&self.rotation);
        let normal = rot.select(2, 2);
        let offset = dot_last(&normal, &self.position);
        (normal, offset)
    }

    /// Mean distance of the cameras from the origin.
    pub fn position_spread(&self) -> Tensor {
        norm_last(&self.position).mean(Kind::Float)
    }

    /// Mean alignment between each camera's viewing normal and its direction to the origin.
    /// 1 means every camera looks straight at the origin.
    pub fn origin_alignment(&self) -> Tensor {
        let (normal, _) = self.normal_plane();
        dot_last(&normal, &l2_normalize(&(-&self.position))).mean(Kind::Float)
    }
}

/// Penalises cameras whose depth leaves `[depth_min, depth_max]` or whose raw focal output
/// is negative, as a squared one-sided hinge averaged over the three limits.
pub fn camera_bounds_loss(outputs: &Tensor, config: &CameraConfig) -> Tensor {
    let (kind, device) = (outputs.kind(), outputs.device());
    let index = Tensor::from_slice(&[CAM_POS_OFFSET + 2, CAM_POS_OFFSET + 2, CAM_FOCAL_INDEX]).to_device(device);
    let sign = Tensor::from_slice(&[-1.0, 1.0, 1.0]).to_kind(kind).to_device(device);
    let offset = Tensor::from_slice(&[config.depth_max, -config.depth_min, 0.0]).to_kind(kind).to_device(device);

    // each limit is satisfied while its entry is non-negative
    let limits = outputs.index_select(1, &index) * sign + offset;
    let violations = negative_part(&limits);
    weighted_mse(&violations, &violations.zeros_like(), config.bounds_weight)
}

/// Penalises camera rotations larger than the allowed cone.
pub fn camera_rotation_loss(outputs: &Tensor, config: &CameraConfig) -> Tensor {
    let rot_norm = norm_last(&output::cam_rotation(outputs)).squeeze_dim(-1);
    let too_large = excess_above(&rot_norm, config.max_rotation);
    weighted_mse(&too_large, &too_large.zeros_like(), config.rotation_weight)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OUTPUT_DIM;
    use pose3d_utils::tensor::scalar_value;

    fn outputs_with_camera(pos: [f32; 3], rot: [f32; 3], focal: f32) -> Tensor {
        let mut values = vec![0.0f32; OUTPUT_DIM as usize];
        values[72..75].copy_from_slice(&pos);
        values[75..78].copy_from_slice(&rot);
        values[78] = focal;
        Tensor::from_slice(&values).view([1, OUTPUT_DIM])
    }

    #[test]
    fn test_fixed_focal_ignores_output() {
        let outputs = outputs_with_camera([0.0, 0.0, -3.0], [0.0; 3], 7.0);
        let predicted = CameraParams::from_output(&outputs, FocalSource::Predicted);
        let fixed = CameraParams::from_output(&outputs, FocalSource::Fixed { value: 1.0 });

        assert_eq!(predicted.focal.double_value(&[0]), 7.0);
        assert_eq!(fixed.focal.double_value(&[0]), 1.0);
        assert_eq!(fixed.tile(24).focal.size(), &[24]);
    }

    #[test]
    fn test_camera_inside_bounds_is_free() {
        let config = CameraConfig::default();
        let outputs = outputs_with_camera([0.0, 0.0, -3.0], [0.1, 0.0, 0.0], 1.0);
        assert_eq!(scalar_value(&camera_bounds_loss(&outputs, &config)), 0.0);
        assert_eq!(scalar_value(&camera_rotation_loss(&outputs, &config)), 0.0);
    }

    #[test]
    fn test_camera_bounds_hinge() {
        let config = CameraConfig::default();

        // z = 0.7 is 1.0 beyond depth_max, focal -2 is 2.0 below zero: (1 + 4) / 3
        let outputs = outputs_with_camera([0.0, 0.0, 0.7], [0.0; 3], -2.0);
        assert!((scalar_value(&camera_bounds_loss(&outputs, &config)) - 5.0 / 3.0).abs() < 1e-5);

        // z = -12 is 2.0 beyond depth_min
        let outputs = outputs_with_camera([0.0, 0.0, -12.0], [0.0; 3], 1.0);
        assert!((scalar_value(&camera_bounds_loss(&outputs, &config)) - 4.0 / 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_camera_rotation_cone() {
        let config = CameraConfig::default();
        let outputs = outputs_with_camera([0.0, 0.0, -3.0], [0.0, 1.0, 0.0], 1.0);
        // the whole norm counts once it leaves the cone
        assert!((scalar_value(&camera_rotation_loss(&outputs, &config)) - 10.0).abs() < 1e-5);
    }

    #[test]
    fn test_camera_facing_origin() {
        let outputs = outputs_with_camera([0.0, 0.0, -4.0], [0.0; 3], 1.0);
        let camera = CameraParams::from_output(&outputs, FocalSource::Predicted);

        let (normal, offset) = camera.normal_plane();
        assert!(normal.allclose(&Tensor::from_slice(&[0.0f32, 0.0, 1.0]).view([1, 3]), 1e-6, 1e-6, false));
        assert!((offset.double_value(&[0]) + 4.0).abs() < 1e-6);
        assert!((scalar_value(&camera.origin_alignment()) - 1.0).abs() < 1e-6);
        assert!((scalar_value(&camera.position_spread()) - 4.0).abs() < 1e-6);

        // f = ss / 2 gives a 90 degree field of view
        let camera = CameraParams::from_output(&outputs, FocalSource::Fixed { value: 0.5 });
        assert!((camera.fov_degrees(1.0).double_value(&[0]) - 90.0).abs() < 1e-4);
    }
}
