//! Layout of the encoder's 79-wide output vector.

use tch::Tensor;
use pose3d_smpl::constants::POSE_DIM;

/// `pose(72) | camera position(3) | camera rotation(3) | focal(1)`
pub const OUTPUT_DIM: i64 = 79;
pub const CAM_POS_OFFSET: i64 = 72;
pub const CAM_ROT_OFFSET: i64 = 75;
pub const CAM_FOCAL_INDEX: i64 = 78;

/// Predicted axis-angle pose `[B, 72]`.
pub fn pose(outputs: &Tensor) -> Tensor {
    outputs.narrow(1, 0, POSE_DIM)
}

/// Predicted camera position `[B, 3]`.
pub fn cam_position(outputs: &Tensor) -> Tensor {
    outputs.narrow(1, CAM_POS_OFFSET, 3)
}

/// Predicted camera rotation, axis-angle `[B, 3]`.
pub fn cam_rotation(outputs: &Tensor) -> Tensor {
    outputs.narrow(1, CAM_ROT_OFFSET, 3)
}

/// Predicted focal length `[B]`.
pub fn cam_focal(outputs: &Tensor) -> Tensor {
    outputs.select(1, CAM_FOCAL_INDEX)
}
