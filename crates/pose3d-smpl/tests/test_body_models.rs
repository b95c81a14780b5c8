#[cfg(test)]
mod tests {
    use tch::{Device, Kind, Tensor};
    use pose3d_smpl::{BodyModel, DataModel, SMPL};

    const NUM_VERTS: i64 = 64;

    // Generates input tensors with the given batch size
    fn generate_inputs(batch_size: i64, betas_size: i64) -> (Tensor, Tensor) {
        let betas = Tensor::rand(&[batch_size, betas_size], tch::kind::FLOAT_CPU);
        let pose = (Tensor::rand(&[batch_size, 24 * 3], tch::kind::FLOAT_CPU) - 0.5) * 0.4;
        (betas, pose)
    }

    fn synthetic_smpl(num_betas: i64) -> SMPL {
        tch::manual_seed(3);
        SMPL::new(DataModel::synthetic(NUM_VERTS, 10, Device::Cpu), num_betas, Device::Cpu)
    }

    #[test]
    fn test_smpl_model_creation() {
        let smpl_default = synthetic_smpl(10);
        let smpl_small = synthetic_smpl(5);
        let smpl_clamped = synthetic_smpl(300);

        assert_eq!(smpl_default.num_betas, 10);
        assert_eq!(smpl_small.num_betas, 5);
        assert_eq!(smpl_clamped.num_betas, 10);
        assert_eq!(smpl_default.model.num_verts(), NUM_VERTS);
        assert_eq!(smpl_default.model.f.size()[0], 2 * NUM_VERTS);
        assert_eq!(smpl_default.model.num_joints(), 24);
    }

    #[test]
    fn test_smpl_forward_pass() {
        let smpl_model = synthetic_smpl(10);
        let batch_size = 2;

        let (betas, pose) = generate_inputs(batch_size, 10);
        let output = smpl_model.forward(&betas, &pose, true);

        assert_eq!(output.vertices.unwrap().size(), &[batch_size, NUM_VERTS, 3]);
        assert_eq!(output.joints.size(), &[batch_size, 24, 3]);
    }

    #[test]
    fn test_smpl_without_skin_skips_vertices() {
        let smpl_model = synthetic_smpl(10);
        let (betas, pose) = generate_inputs(3, 10);

        let skinned = smpl_model.forward(&betas, &pose, true);
        let joints_only = smpl_model.forward(&betas, &pose, false);

        assert!(joints_only.vertices.is_none());
        assert!(joints_only.joints.allclose(&skinned.joints, 1e-6, 1e-6, false));
    }

    #[test]
    fn test_smpl_remembers_last_joints() {
        let smpl_model = synthetic_smpl(10);
        assert!(smpl_model.last_joints().is_none());

        let (betas, pose) = generate_inputs(2, 10);
        let first = smpl_model.forward(&betas, &pose, false);
        assert!(smpl_model.last_joints().unwrap().equal(&first.joints));

        let second = smpl_model.forward(&betas, &pose.zeros_like(), false);
        assert!(smpl_model.last_joints().unwrap().equal(&second.joints));
    }

    #[test]
    fn test_smpl_pose_gradients_flow() {
        let smpl_model = synthetic_smpl(10);
        let (betas, pose) = generate_inputs(2, 10);
        let pose = pose.set_requires_grad(true);

        let output = smpl_model.forward(&betas, &pose, true);
        output.vertices.unwrap().sum(Kind::Float).backward();

        let grad = pose.grad();
        assert_eq!(grad.size(), &[2, 72]);
        assert!(!bool::try_from(grad.isnan().any()).unwrap());
    }

    #[test]
    fn test_smpl_model_save_and_load() {
        let dir = std::env::temp_dir().join(format!("pose3d-smpl-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("smpl_synthetic.ot");

        let data = DataModel::synthetic(NUM_VERTS, 10, Device::Cpu);
        data.save_to_file(&path).unwrap();
        let loaded = SMPL::load(&path, Device::Cpu).unwrap();

        assert_eq!(loaded.model.parents, data.parents);
        assert!(loaded.model.v_template.allclose(&data.v_template, 1e-6, 1e-6, false));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
