use tch::{IndexOp, Kind, Tensor};
use pose3d_utils::rotation::axis_angle_to_matrix;

/// Performs Linear Blend Skinning with the given shape and pose parameters
///
/// Parameters
/// ----------
/// betas: Tensor of shape BxNB
///     The tensor of shape parameters
/// pose: Tensor of shape Bx(J * 3)
///     The pose parameters in axis-angle format, root first
/// v_template: Tensor of shape Vx3
///     The template mesh that will be deformed
/// shapedirs: Tensor of shape Vx3xNB
///     The tensor of PCA shape displacements
/// posedirs: Tensor of shape Vx3xP
///     The pose blend shapes, `P = (J - 1) * 9`
/// j_regressor: Tensor of shape JxV
///     The regressor array that is used to calculate the joints from
///     the position of the vertices
/// parents: &[i64] of length J
///     The kinematic tree, `parents[0] == -1`
/// lbs_weights: Tensor of shape VxJ
///     The linear blend skinning weights that represent how much the
///     rotation matrix of each part affects each vertex
/// get_skin: bool
///     Whether to skin the mesh. The posed joints do not need the skinned
///     vertices, so this can be skipped when only joints are wanted.
///
/// Returns
/// -------
/// (Option<Tensor>, Tensor)
///     verts: Tensor of shape BxVx3, when `get_skin`
///         The vertices of the mesh after applying the shape and pose
///         displacements.
///     joints: Tensor of shape BxJx3
///         The posed joints of the model
#[allow(clippy::too_many_arguments)]
pub fn lbs(
    betas: &Tensor,
    pose: &Tensor,
    v_template: &Tensor,
    shapedirs: &Tensor,
    posedirs: &Tensor,
    j_regressor: &Tensor,
    parents: &[i64],
    lbs_weights: &Tensor,
    get_skin: bool,
) -> (Option<Tensor>, Tensor) {
    let batch_size = betas.size()[0].max(pose.size()[0]);
    let device = betas.device();
    let dtype = betas.kind();

    // Add shape contribution
    let v_shaped = v_template + blend_shapes(betas, shapedirs);

    // Get the joints
    let j = vertices2joints(j_regressor, &v_shaped);

    let rot_mats = axis_angle_to_matrix(&pose.reshape([-1, 3])).view([batch_size, -1, 3, 3]);

    // Get the global joint location
    let (j_transformed, a) = batch_rigid_transform(&rot_mats, &j, parents);

    if !get_skin {
        return (None, j_transformed);
    }

    // Add pose blend shapes
    let ident = Tensor::eye(3, (dtype, device));
    let pose_feature = (rot_mats.i((.., 1..)) - ident).view([batch_size, -1]);
    let num_pose_basis = posedirs.size()[2];
    let posedirs = posedirs.reshape([-1, num_pose_basis]).transpose(0, 1);
    let pose_offsets = pose_feature.matmul(&posedirs).view([batch_size, -1, 3]);
    let v_posed = pose_offsets + v_shaped;

    // Do skinning:
    let num_joints = j_regressor.size()[0];
    let w = lbs_weights.unsqueeze(0).expand([batch_size, -1, -1], false);
    let t = w.matmul(&a.view([batch_size, num_joints, 16])).view([batch_size, -1, 4, 4]);

    let homogen_coord = Tensor::ones(&[batch_size, v_posed.size()[1], 1], (dtype, device));
    let v_posed_homo = Tensor::cat(&[&v_posed, &homogen_coord], 2);
    let v_homo = t.matmul(&v_posed_homo.unsqueeze(-1));

    (Some(v_homo.i((.., .., ..3, 0))), j_transformed)
}

/// Calculates the 3D joint locations from the vertices
///
/// `j_regressor` is `[J, V]`, `vertices` is `[B, V, 3]`; the result is `[B, J, 3]`.
pub fn vertices2joints(j_regressor: &Tensor, vertices: &Tensor) -> Tensor {
    Tensor::einsum("bik,ji->bjk", &[vertices, j_regressor], None::<i64>)
}

/// Calculates the per vertex displacement due to the blend shapes
///
/// `betas` is `[B, NB]`, `shape_disps` is `[V, 3, NB']` with `NB' >= NB`; only the first `NB`
/// blend shapes are used. The result is `[B, V, 3]`.
pub fn blend_shapes(betas: &Tensor, shape_disps: &Tensor) -> Tensor {
    let num_betas = betas.size()[1];
    let shape_disps = shape_disps.narrow(2, 0, num_betas);
    Tensor::einsum("bl,mkl->bmk", &[betas, &shape_disps], None::<i64>)
}

/// Creates a batch of transformation matrices
///
/// `r` is `[N, 3, 3]`, `t` is `[N, 3, 1]`; the result is `[N, 4, 4]`.
fn transform_mat(r: &Tensor, t: &Tensor) -> Tensor {
    let n = r.size()[0];
    let (device, dtype) = (r.device(), r.kind());
    let top = Tensor::cat(&[r, t], 2);
    let bottom = Tensor::from_slice(&[0.0f32, 0.0, 0.0, 1.0])
        .to_kind(dtype)
        .to_device(device)
        .view([1, 1, 4])
        .expand([n, 1, 4], false);
    Tensor::cat(&[top, bottom], 1)
}

/// Applies a batch of rigid transformations to the joints
///
/// Parameters
/// ----------
/// rot_mats: Tensor of shape BxJx3x3
///     Tensor of rotation matrices
/// joints: Tensor of shape BxJx3
///     Locations of joints
/// parents: &[i64] of length J
///     The kinematic tree
///
/// Returns
/// -------
/// (Tensor, Tensor)
///     posed_joints: Tensor of shape BxJx3
///         The locations of the joints after applying the pose rotations
///     rel_transforms: Tensor of shape BxJx4x4
///         The relative (with respect to the root joint) rigid transformations
///         for all the joints
fn batch_rigid_transform(rot_mats: &Tensor, joints: &Tensor, parents: &[i64]) -> (Tensor, Tensor) {
    let batch_size = rot_mats.size()[0];
    let num_joints = joints.size()[1];

    let joints = joints.unsqueeze(-1);

    // Joint offsets relative to the parent, the root keeps its absolute position
    let parent_idx = Tensor::from_slice(&parents[1..]).to_device(joints.device());
    let rel_joints = Tensor::cat(&[
        joints.narrow(1, 0, 1),
        joints.narrow(1, 1, num_joints - 1) - joints.index_select(1, &parent_idx),
    ], 1);

    let transforms_mat = transform_mat(
        &rot_mats.reshape([-1, 3, 3]),
        &rel_joints.reshape([-1, 3, 1]),
    ).reshape([batch_size, num_joints, 4, 4]);

    let mut transform_chain = vec![transforms_mat.i((.., 0))];
    for i in 1..num_joints as usize {
        let parent = parents[i] as usize;
        let local = transforms_mat.i((.., i as i64));
        let chained = transform_chain[parent].matmul(&local);
        transform_chain.push(chained);
    }

    let transforms = Tensor::stack(&transform_chain, 1);
    let posed_joints = transforms.i((.., .., ..3, 3));

    let joints_homogen = Tensor::cat(&[
        &joints,
        &Tensor::zeros(&[batch_size, num_joints, 1, 1], (joints.kind(), joints.device())),
    ], 2);
    let offsets = transforms.matmul(&joints_homogen);
    let rel_transforms = &transforms - Tensor::cat(&[
        Tensor::zeros(&[batch_size, num_joints, 4, 3], (joints.kind(), joints.device())),
        offsets,
    ], 3);

    (posed_joints, rel_transforms)
}
