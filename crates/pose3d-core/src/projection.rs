use tch::Tensor;
use pose3d_utils::rotation::axis_angle_to_matrix;
use pose3d_utils::tensor::validate_tensor;

/// Perspective projection of 3D points with per-point camera parameters.
pub trait Project {
    /// Projects `points` `[N, 3]` through cameras at `cam_pos` `[N, 3]` with axis-angle
    /// orientation `cam_rot` `[N, 3]` and focal length `focal` `[N]`, returning `[N, 2]`
    /// in sensor units.
    fn project(&self, points: &Tensor, cam_pos: &Tensor, cam_rot: &Tensor, focal: &Tensor) -> Tensor;
}

/// Pinhole camera looking down its local +z axis.
///
/// A world point `X` maps to `q = Rᵀ(X - C)` in camera space and to `f · (q_x, q_y) / q_z`
/// on the sensor.
#[derive(Debug, Clone, Copy, Default)]
pub struct PinholeProjection;

impl Project for PinholeProjection {
    fn project(&self, points: &Tensor, cam_pos: &Tensor, cam_rot: &Tensor, focal: &Tensor) -> Tensor {
        validate_tensor(points, &[-1, 3], "points");
        validate_tensor(cam_pos, &[-1, 3], "cam_pos");
        validate_tensor(cam_rot, &[-1, 3], "cam_rot");
        validate_tensor(focal, &[-1], "focal");

        let rot = axis_angle_to_matrix(cam_rot);
        let q = rot
            .transpose(1, 2)
            .bmm(&(points - cam_pos).unsqueeze(-1))
            .squeeze_dim(-1);

        q.narrow(1, 0, 2) / q.narrow(1, 2, 1) * focal.unsqueeze(-1)
    }
}

/// Image geometry shared by the losses: converts between sensor units, pixels and rays.
#[derive(Debug, Clone, Copy)]
pub struct ImageFrame {
    pub height: f64,
    pub width: f64,
    pub sensor_size: f64,
}

impl ImageFrame {
    pub fn new(height: i64, width: i64, sensor_size: f64) -> Self {
        Self { height: height as f64, width: width as f64, sensor_size }
    }

    fn center(&self, like: &Tensor) -> Tensor {
        Tensor::from_slice(&[self.width / 2.0, self.height / 2.0])
            .to_kind(like.kind())
            .to_device(like.device())
    }

    /// Sensor coordinates `[..., 2]` to pixels: `p / ss · H + (W/2, H/2)`.
    pub fn to_pixels(&self, points: &Tensor) -> Tensor {
        points / self.sensor_size * self.height + self.center(points)
    }

    /// Flips annotated 2D joints from image convention (top-left origin, y down) to the
    /// projection convention: `(x, y) -> (x, H - y)`.
    pub fn flip_joints2d(&self, joints2d: &Tensor) -> Tensor {
        let sign = Tensor::from_slice(&[1.0, -1.0]).to_kind(joints2d.kind()).to_device(joints2d.device());
        let offset = Tensor::from_slice(&[0.0, self.height]).to_kind(joints2d.kind()).to_device(joints2d.device());
        joints2d * sign + offset
    }

    /// Back-projects flipped 2D pixel coordinates `[B, J, 2]` into world-space ray
    /// directions `[B, J, 3]` for cameras with rotation `cam_rot` `[B, 3]` and focal `[B]`:
    /// `d = R · ((px - W/2)·ss/H, (py - H/2)·ss/H, f)`.
    pub fn points_2d_in_3d(&self, joints2d: &Tensor, cam_rot: &Tensor, focal: &Tensor) -> Tensor {
        validate_tensor(joints2d, &[-1, -1, 2], "joints2d");
        let num_joints = joints2d.size()[1];

        let sensor_xy = (joints2d - self.center(joints2d)) * (self.sensor_size / self.height);
        let f = focal.view([-1, 1, 1]).expand([-1, num_joints, 1], false);
        let local = Tensor::cat(&[sensor_xy, f.to_kind(joints2d.kind())], 2);

        let rot = axis_angle_to_matrix(cam_rot);
        local.matmul(&rot.transpose(1, 2))
    }
}
