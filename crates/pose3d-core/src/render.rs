//! Diagnostic mesh rendering: camera setup for the two summary views and a point-splat
//! renderer used when no differentiable rasteriser is available.

use tch::{Device, IndexOp, Kind, Tensor};
use pose3d_utils::rotation::axis_angle_to_matrix;
use pose3d_utils::tensor::{dot_last, l2_normalize, validate_tensor};
use crate::camera::CameraParams;
use crate::error::Result;

pub const NEAR_CLIP: f64 = 0.01;
pub const FAR_CLIP: f64 = 10.0;

/// Eye, look-at target and up vector per sample, plus vertical field of view in degrees.
#[derive(Debug)]
pub struct RenderCamera {
    pub eye: Tensor,
    pub look_at: Tensor,
    pub up: Tensor,
    pub fov_y: Tensor,
}

impl RenderCamera {
    /// Looks along `R · ẑ` from each predicted camera, with `R · ŷ` as up.
    pub fn from_params(camera: &CameraParams, sensor_size: f64) -> Self {
        let rot = axis_angle_to_matrix(&camera.rotation);
        Self {
            eye: camera.position.shallow_clone(),
            look_at: &camera.position + rot.select(2, 2),
            up: rot.select(2, 1),
            fov_y: camera.fov_degrees(sensor_size),
        }
    }

    /// Fixed view of the body from the front, used to inspect predicted meshes.
    pub fn front(batch_size: i64, device: Device) -> Self {
        let row = |v: [f32; 3]| Tensor::from_slice(&v).to_device(device).view([1, 3]).expand([batch_size, 3], false);
        Self {
            eye: row([0.0, -0.35, -4.0]),
            look_at: row([0.0, -0.35, -3.0]),
            up: row([0.0, 1.0, 0.0]),
            fov_y: Tensor::full(&[batch_size], 30.0, (Kind::Float, device)),
        }
    }
}

/// Everything needed to draw a batch of meshes.
pub struct RenderRequest<'a> {
    /// `[B, V, 3]`
    pub vertices: &'a Tensor,
    /// `[F, 3]`
    pub faces: &'a Tensor,
    /// `[B, V, 3]`
    pub normals: Tensor,
    /// `[B, V, 3]`
    pub diffuse: Tensor,
    pub camera: &'a RenderCamera,
    /// Point light positions `[B, L, 3]`
    pub lights: Tensor,
}

impl<'a> RenderRequest<'a> {
    /// White mesh lit by `lights`, with vertex directions standing in for normals.
    pub fn shaded(vertices: &'a Tensor, faces: &'a Tensor, camera: &'a RenderCamera, lights: Tensor) -> Self {
        Self {
            vertices,
            faces,
            normals: l2_normalize(vertices),
            diffuse: vertices.ones_like(),
            camera,
            lights,
        }
    }
}

/// Renders meshes to RGBA images `[B, H, W, 4]`.
pub trait MeshRenderer {
    fn render(&self, request: &RenderRequest) -> Result<Tensor>;
}

/// Collapses RGBA renders to one grey channel `[B, H, W, 1]` for summaries.
pub fn to_summary_image(rendered: &Tensor) -> Tensor {
    rendered.narrow(3, 0, 3).mean_dim(&[3i64][..], true, Kind::Float)
}

/// Projects every vertex through a perspective camera and splats its Lambert shade into
/// the pixel it lands on. Faces are ignored.
#[derive(Debug, Clone, Copy)]
pub struct PointSplatRenderer {
    pub height: i64,
    pub width: i64,
}

impl MeshRenderer for PointSplatRenderer {
    fn render(&self, request: &RenderRequest) -> Result<Tensor> {
        let vertices = request.vertices.detach().to_kind(Kind::Float);
        validate_tensor(&vertices, &[-1, -1, 3], "vertices");
        let size = vertices.size();
        let (b, v) = (size[0], size[1]);
        let (h, w) = (self.height, self.width);
        let device = vertices.device();
        let cam = request.camera;

        let forward = l2_normalize(&(&cam.look_at - &cam.eye));
        let right = l2_normalize(&forward.linalg_cross(&cam.up, -1));
        let up = right.linalg_cross(&forward, -1);

        let rel = &vertices - cam.eye.unsqueeze(1);
        let x = dot_last(&rel, &right.unsqueeze(1));
        let y = dot_last(&rel, &up.unsqueeze(1));
        let z = dot_last(&rel, &forward.unsqueeze(1));

        let tan_half = (cam.fov_y.to_kind(Kind::Float) * (std::f64::consts::PI / 360.0)).tan().unsqueeze(1);
        let aspect = w as f64 / h as f64;
        let safe_z = z.clamp_min(NEAR_CLIP);
        let ndc_x = &x / (&safe_z * &tan_half * aspect);
        let ndc_y = &y / (&safe_z * &tan_half);

        let col = ((&ndc_x + 1.0) * (w as f64 / 2.0)).floor().to_kind(Kind::Int64);
        let row = ((1.0 - &ndc_y) * (h as f64 / 2.0)).floor().to_kind(Kind::Int64);

        let visible = z.gt(NEAR_CLIP)
            .logical_and(&z.lt(FAR_CLIP))
            .logical_and(&col.ge(0i64))
            .logical_and(&col.lt(w))
            .logical_and(&row.ge(0i64))
            .logical_and(&row.lt(h));

        // Lambert term against the first light
        let light = request.lights.i((.., 0..1, ..)).to_kind(Kind::Float);
        let to_light = l2_normalize(&(light - &vertices));
        let shade = dot_last(&request.normals.to_kind(Kind::Float), &to_light).clamp(0.0, 1.0).unsqueeze(-1);
        let rgb = request.diffuse.to_kind(Kind::Float) * shade;
        let rgba = Tensor::cat(&[rgb, vertices.ones_like().narrow(2, 0, 1)], 2);

        let batch_idx = Tensor::arange(b, (Kind::Int64, device)).view([b, 1]).expand([b, v], false);
        let flat_idx = (batch_idx * (h * w) + row * w + col).masked_select(&visible);
        let values = rgba.index(&[Some(visible)]);

        let mut image = Tensor::zeros(&[b * h * w, 4], (Kind::Float, device));
        let _ = image.index_put_(&[Some(flat_idx)], &values, false);
        Ok(image.view([b, h, w, 4]))
    }
}
