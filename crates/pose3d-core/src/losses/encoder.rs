use tch::{Reduction, Tensor};
use pose3d_smpl::{BodyModel, BodyModelOutput};
use pose3d_utils::rotation::axis_angle_to_matrix;
use pose3d_utils::tensor::{dot_last, excess_above, l2_normalize, norm_last, scalar_value, validate_tensor, weighted_mse};
use crate::camera::{camera_bounds_loss, camera_rotation_loss, CameraParams};
use crate::config::{CameraConfig, LossConfig, ReprojectionMetric, ReprojectionTarget};
use crate::error::{ConfigError, Result};
use crate::output;
use crate::pose::with_gt_global;
use crate::projection::{ImageFrame, Project};
use super::{LossBreakdown, LossTerm};

/// Skinned meshes of one step, kept for render summaries.
#[derive(Debug)]
pub struct MeshPair {
    /// Predicted pose with ground-truth root rotation `[B, V, 3]`
    pub predicted: Tensor,
    /// `[B, V, 3]`
    pub ground_truth: Tensor,
}

#[derive(Debug, Default)]
pub struct EncoderLossOutput {
    pub breakdown: LossBreakdown,
    /// `cam_pos_diff` and `rot_dot`, when the camera was evaluated
    pub camera_summaries: Vec<(&'static str, f64)>,
    pub camera: Option<CameraParams>,
    pub meshes: Option<MeshPair>,
}

/// Composes the encoder's task losses from one batch of network outputs.
pub struct EncoderLoss<'a> {
    pub loss: &'a LossConfig,
    pub camera: &'a CameraConfig,
    pub frame: ImageFrame,
    pub body_model: Option<&'a dyn BodyModel>,
    pub projector: &'a dyn Project,
    /// Skin meshes even when the mesh loss is off, for render summaries
    pub keep_meshes: bool,
}

fn reprojection_error(predictions: &Tensor, labels: &Tensor, metric: ReprojectionMetric) -> Tensor {
    match metric {
        ReprojectionMetric::Mse => predictions.mse_loss(labels, Reduction::Mean),
        ReprojectionMetric::Huber { delta } => predictions.huber_loss(labels, Reduction::Mean, delta),
    }
}

fn skinned(output: BodyModelOutput) -> Result<(Tensor, Tensor)> {
    let vertices = output.vertices.ok_or_else(|| ConfigError::InvalidValue {
        field: "body_model",
        reason: "no vertices returned although skinning was requested".to_string(),
    })?;
    Ok((vertices, output.joints))
}

impl EncoderLoss<'_> {
    fn project_to_pixels(&self, joints: &Tensor, camera: &CameraParams) -> Tensor {
        let uv = self.projector.project(
            &joints.reshape([-1, 3]),
            &camera.position,
            &camera.rotation,
            &camera.focal,
        );
        self.frame.to_pixels(&uv)
    }

    /// Evaluates every enabled term for `outputs` `[B, 79]` against the ground truth
    /// `gt_pose` `[B, 72]`, `betas` `[B, NB]` and image-space `gt_joints2d` `[B, J, 2]`.
    pub fn compute(&self, outputs: &Tensor, gt_pose: &Tensor, betas: &Tensor, gt_joints2d: &Tensor) -> Result<EncoderLossOutput> {
        validate_tensor(outputs, &[-1, output::OUTPUT_DIM], "outputs");
        let cfg = self.loss;
        let out_pose = output::pose(outputs);
        let mut result = EncoderLossOutput::default();

        if cfg.pose_loss {
            if cfg.direct_pose_loss {
                result.breakdown.push(LossTerm::new(
                    "pose_loss_direct",
                    weighted_mse(&out_pose, gt_pose, cfg.pose_loss_direct_scale),
                ));
            }
            let out_mat = axis_angle_to_matrix(&out_pose.reshape([-1, 3]));
            let gt_mat = axis_angle_to_matrix(&gt_pose.reshape([-1, 3]));
            result.breakdown.push(LossTerm::new("pose_loss", weighted_mse(&out_mat, &gt_mat, cfg.pose_loss_scale)));
        }

        let joint_angles = norm_last(&out_pose.reshape([-1, 3])).squeeze_dim(-1);
        let too_large = excess_above(&joint_angles, cfg.joint_limit);
        result.breakdown.push(LossTerm::new(
            "reg_loss",
            weighted_mse(&too_large, &too_large.zeros_like(), cfg.reg_loss_scale),
        ));

        if !(cfg.mesh_loss || cfg.reproject_loss) {
            return Ok(result);
        }

        let body_model = self.body_model.ok_or(ConfigError::MissingBodyModel("the mesh and reprojection losses"))?;
        let get_skin = cfg.mesh_loss || self.keep_meshes;
        let out_body = body_model.forward(betas, &with_gt_global(&out_pose, gt_pose), get_skin);
        let gt_body = body_model.forward(betas, gt_pose, get_skin);

        let (out_joints, gt_joints3d) = if get_skin {
            let (out_meshes, out_joints) = skinned(out_body)?;
            let (gt_meshes, gt_joints3d) = skinned(gt_body)?;
            if cfg.mesh_loss {
                let loss3d = weighted_mse(&out_meshes, &gt_meshes, cfg.mesh_loss_scale)
                    + weighted_mse(&out_joints, &gt_joints3d, cfg.joint_loss_scale);
                result.breakdown.push(LossTerm::new("3d_loss", loss3d));
            }
            result.meshes = Some(MeshPair { predicted: out_meshes, ground_truth: gt_meshes });
            (out_joints, gt_joints3d)
        } else {
            (out_body.joints, gt_body.joints)
        };

        if cfg.reproject_loss {
            self.camera_terms(outputs, &out_joints, &gt_joints3d, gt_joints2d, &mut result);
        }

        Ok(result)
    }

    fn camera_terms(
        &self,
        outputs: &Tensor,
        out_joints: &Tensor,
        gt_joints3d: &Tensor,
        gt_joints2d: &Tensor,
        result: &mut EncoderLossOutput,
    ) {
        let cfg = self.loss;
        let num_joints = gt_joints3d.size()[1];
        let gt_2d = self.frame.flip_joints2d(gt_joints2d);
        let gt_2d_flat = gt_2d.reshape([-1, 2]);

        let camera = CameraParams::from_output(outputs, self.camera.focal);
        let camera_tiled = camera.tile(num_joints);

        // only the pose should learn from the reprojection term
        let camera_sg = camera_tiled.detach();
        let out_2d = self.project_to_pixels(out_joints, &camera_sg);
        let target_2d = match cfg.reproj_target {
            ReprojectionTarget::ProjectedGroundTruth => self.project_to_pixels(gt_joints3d, &camera_sg),
            ReprojectionTarget::Joints2d => gt_2d_flat.shallow_clone(),
        };
        let reproj_loss = reprojection_error(&out_2d, &target_2d, cfg.reproj_metric) * cfg.reproj_loss_scale;
        result.breakdown.push(LossTerm::new("reproj_loss", reproj_loss).capped(cfg.reproj_cap));

        let cam_2d = self.project_to_pixels(gt_joints3d, &camera_tiled);
        let cam_loss = weighted_mse(&cam_2d, &gt_2d_flat, cfg.cam_loss_scale);
        result.breakdown.push(LossTerm::new("cam_loss", cam_loss).capped(cfg.cam_cap));

        // angle between the ray to each gt joint and the ray through its annotated pixel
        let vec_to_gt_3d = l2_normalize(&(gt_joints3d - camera.position.unsqueeze(1)));
        let gt_2d_in_3d = self.frame.points_2d_in_3d(&gt_2d, &camera.rotation, &camera.focal);
        let vec_to_gt_2d = l2_normalize(&gt_2d_in_3d);
        let eps = cfg.angle_clamp_eps;
        let angle = dot_last(&vec_to_gt_3d, &vec_to_gt_2d).clamp(-1.0 + eps, 1.0 - eps).acos();
        result.breakdown.push(LossTerm::new(
            "cam_angle",
            weighted_mse(&angle, &angle.zeros_like(), cfg.cam_angle_loss_scale),
        ));

        if cfg.camera_bounds {
            result.breakdown.push(LossTerm::new("cam_bounds", camera_bounds_loss(outputs, self.camera)));
        }
        if cfg.camera_rotation {
            result.breakdown.push(LossTerm::new("cam_rot", camera_rotation_loss(outputs, self.camera)));
        }

        result.camera_summaries = vec![
            ("cam_pos_diff", scalar_value(&camera.position_spread())),
            ("rot_dot", scalar_value(&camera.origin_alignment())),
        ];
        result.camera = Some(camera);
    }
}
