/// Number of SMPL joints, root included.
pub const NUM_JOINTS: i64 = 24;

/// Length of a full axis-angle pose vector.
pub const POSE_DIM: i64 = NUM_JOINTS * 3;

/// Number of shape coefficients used by the regressor.
pub const NUM_BETAS: i64 = 10;

/// Parent of each joint in the SMPL kinematic tree; the root has no parent.
pub const SMPL_PARENTS: [i64; 24] = [
    -1, 0, 0, 0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 9, 9, 12, 13, 14, 16, 17, 18, 19, 20, 21,
];
