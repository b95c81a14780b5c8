use std::f64::consts::FRAC_PI_2;
use tch::Tensor;
use pose3d_smpl::constants::POSE_DIM;
use pose3d_utils::rotation::compose_axis_angle;
use pose3d_utils::tensor::validate_tensor;

/// Re-expresses ground-truth global rotations whose vertical is the z axis so the body's
/// vertical becomes the y axis: a fixed -90 degree turn about x is composed with each
/// sample's root rotation. Local joint rotations are untouched.
pub fn rotate_global_pose(thetas: &Tensor) -> Tensor {
    validate_tensor(thetas, &[-1, POSE_DIM], "thetas");
    let batch_size = thetas.size()[0];

    let turn_x = Tensor::from_slice(&[-FRAC_PI_2, 0.0, 0.0])
        .to_kind(thetas.kind())
        .to_device(thetas.device())
        .view([1, 3])
        .expand([batch_size, 3], false);
    let global_rot = compose_axis_angle(&turn_x, &thetas.narrow(1, 0, 3));

    Tensor::cat(&[global_rot, thetas.narrow(1, 3, POSE_DIM - 3)], 1)
}

/// Predicted pose with its root rotation replaced by the ground truth one.
pub fn with_gt_global(out_pose: &Tensor, gt_pose: &Tensor) -> Tensor {
    Tensor::cat(&[gt_pose.narrow(1, 0, 3), out_pose.narrow(1, 3, POSE_DIM - 3)], 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pose3d_utils::rotation::axis_angle_to_matrix;

    #[test]
    fn test_rotate_zero_global_gives_turn() {
        let thetas = Tensor::zeros(&[3, 72], tch::kind::FLOAT_CPU);
        let rotated = rotate_global_pose(&thetas);

        let expected = Tensor::from_slice(&[-FRAC_PI_2 as f32, 0.0, 0.0]).view([1, 3]).expand([3, 3], false);
        assert!(rotated.narrow(1, 0, 3).allclose(&expected, 1e-6, 1e-6, false));
        assert!(rotated.narrow(1, 3, 69).allclose(&thetas.narrow(1, 3, 69), 0.0, 0.0, false));
    }

    #[test]
    fn test_rotate_matches_matrix_product() {
        tch::manual_seed(11);
        let thetas = (Tensor::rand(&[4, 72], tch::kind::FLOAT_CPU) - 0.5) * 2.0;
        let rotated = rotate_global_pose(&thetas);

        let turn = axis_angle_to_matrix(&Tensor::from_slice(&[-FRAC_PI_2 as f32, 0.0, 0.0]).view([1, 3]));
        let expected = turn.expand([4, 3, 3], false).bmm(&axis_angle_to_matrix(&thetas.narrow(1, 0, 3)));
        let actual = axis_angle_to_matrix(&rotated.narrow(1, 0, 3));
        assert!(actual.allclose(&expected, 1e-4, 1e-4, false));
    }

    #[test]
    fn test_with_gt_global_swaps_root_only() {
        let out_pose = Tensor::ones(&[2, 72], tch::kind::FLOAT_CPU);
        let gt_pose = Tensor::zeros(&[2, 72], tch::kind::FLOAT_CPU);
        let mixed = with_gt_global(&out_pose, &gt_pose);

        assert_eq!(mixed.double_value(&[0, 2]), 0.0);
        assert_eq!(mixed.double_value(&[1, 3]), 1.0);
    }
}
