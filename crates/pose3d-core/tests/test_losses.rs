#[cfg(test)]
mod tests {
    use tch::{Device, Kind, Tensor};
    use pose3d_core::config::{LossConfig, ModelConfig};
    use pose3d_core::losses::discriminator::encoder_adversarial_loss;
    use pose3d_core::losses::encoder::EncoderLoss;
    use pose3d_core::losses::LossTerm;
    use pose3d_core::projection::{ImageFrame, PinholeProjection, Project};
    use pose3d_smpl::{BodyModel, DataModel, SMPL};
    use pose3d_utils::tensor::scalar_value;

    const BATCH: i64 = 4;

    fn synthetic_smpl() -> SMPL {
        tch::manual_seed(5);
        SMPL::new(DataModel::synthetic(40, 10, Device::Cpu), 10, Device::Cpu)
    }

    /// Network outputs that reproduce `pose` exactly with a camera 3 units in front of the body.
    fn perfect_outputs(pose: &Tensor) -> Tensor {
        let camera = Tensor::from_slice(&[0.0f32, 0.0, -3.0, 0.0, 0.0, 0.0, 1.0])
            .view([1, 7])
            .expand([BATCH, 7], false);
        Tensor::cat(&[pose.shallow_clone(), camera], 1)
    }

    /// Image-convention 2D joints consistent with `joints3d` seen by the camera above.
    fn annotated_joints(joints3d: &Tensor, frame: &ImageFrame) -> Tensor {
        let n = joints3d.size()[1];
        let points = joints3d.reshape([-1, 3]);
        let pos = Tensor::from_slice(&[0.0f32, 0.0, -3.0]).view([1, 3]).expand([BATCH * n, 3], false);
        let rot = Tensor::zeros(&[BATCH * n, 3], (Kind::Float, Device::Cpu));
        let focal = Tensor::ones(&[BATCH * n], (Kind::Float, Device::Cpu));
        let uv = PinholeProjection.project(&points, &pos, &rot, &focal);
        frame.flip_joints2d(&frame.to_pixels(&uv)).view([BATCH, n, 2])
    }

    fn all_losses() -> LossConfig {
        LossConfig {
            pose_loss: true,
            mesh_loss: true,
            reproject_loss: true,
            discriminator: true,
            camera_bounds: true,
            camera_rotation: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_perfect_prediction_has_near_zero_total() {
        let smpl = synthetic_smpl();
        let config = ModelConfig { loss: all_losses(), ..Default::default() };
        let frame = ImageFrame::new(config.image.height, config.image.width, config.camera.sensor_size);

        let pose = (Tensor::rand(&[BATCH, 72], (Kind::Float, Device::Cpu)) - 0.5) * 0.2;
        let betas = Tensor::rand(&[BATCH, 10], (Kind::Float, Device::Cpu)) - 0.5;
        let gt_joints3d = smpl.forward(&betas, &pose, false).joints;
        let joints2d = annotated_joints(&gt_joints3d, &frame);

        let composer = EncoderLoss {
            loss: &config.loss,
            camera: &config.camera,
            frame,
            body_model: Some(&smpl),
            projector: &PinholeProjection,
            keep_meshes: false,
        };
        let mut result = composer.compute(&perfect_outputs(&pose), &pose, &betas, &joints2d).unwrap();

        let confident_real = Tensor::from_slice(&[50.0f32, -50.0]).view([1, 2]).expand([BATCH, 2], false);
        result.breakdown.push(LossTerm::new(
            "discriminator_loss",
            encoder_adversarial_loss(&confident_real, config.loss.disc_loss_scale),
        ));

        let names: Vec<&str> = result.breakdown.terms().iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "pose_loss_direct", "pose_loss", "reg_loss", "3d_loss", "reproj_loss",
                "cam_loss", "cam_angle", "cam_bounds", "cam_rot", "discriminator_loss",
            ]
        );
        for term in result.breakdown.terms() {
            assert!(scalar_value(&term.value) < 1e-5, "{} = {}", term.name, scalar_value(&term.value));
        }
        assert!(scalar_value(&result.breakdown.total()) < 1e-5);
        assert!(result.meshes.is_some());
    }

    #[test]
    fn test_camera_angle_vanishes_for_consistent_annotations() {
        let smpl = synthetic_smpl();
        let config = ModelConfig { loss: all_losses(), ..Default::default() };
        let frame = ImageFrame::new(config.image.height, config.image.width, config.camera.sensor_size);

        let pose = Tensor::zeros(&[BATCH, 72], (Kind::Float, Device::Cpu));
        let betas = Tensor::zeros(&[BATCH, 10], (Kind::Float, Device::Cpu));
        let joints2d = annotated_joints(&smpl.forward(&betas, &pose, false).joints, &frame);

        let composer = EncoderLoss {
            loss: &config.loss,
            camera: &config.camera,
            frame,
            body_model: Some(&smpl),
            projector: &PinholeProjection,
            keep_meshes: false,
        };
        let result = composer.compute(&perfect_outputs(&pose), &pose, &betas, &joints2d).unwrap();

        let angle = result.breakdown.get("cam_angle").unwrap();
        assert!(scalar_value(&angle.value) < 1e-4);
        let camera = result.camera.unwrap();
        assert_eq!(camera.position.size(), &[BATCH, 3]);
        assert_eq!(result.camera_summaries.iter().map(|(tag, _)| *tag).collect::<Vec<_>>(), vec!["cam_pos_diff", "rot_dot"]);
    }

    #[test]
    fn test_misplaced_annotations_raise_capped_camera_loss() {
        let smpl = synthetic_smpl();
        let config = ModelConfig { loss: all_losses(), ..Default::default() };
        let frame = ImageFrame::new(config.image.height, config.image.width, config.camera.sensor_size);

        let pose = Tensor::zeros(&[BATCH, 72], (Kind::Float, Device::Cpu));
        let betas = Tensor::zeros(&[BATCH, 10], (Kind::Float, Device::Cpu));
        let joints2d = annotated_joints(&smpl.forward(&betas, &pose, false).joints, &frame) + 500.0;

        let composer = EncoderLoss {
            loss: &config.loss,
            camera: &config.camera,
            frame,
            body_model: Some(&smpl),
            projector: &PinholeProjection,
            keep_meshes: false,
        };
        let result = composer.compute(&perfect_outputs(&pose), &pose, &betas, &joints2d).unwrap();

        let cam_loss = result.breakdown.get("cam_loss").unwrap();
        assert!(scalar_value(&cam_loss.value) > 0.5);
        assert!((scalar_value(&cam_loss.contribution()) - 0.5).abs() < 1e-6);
    }
}
