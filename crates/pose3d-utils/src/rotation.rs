use tch::Tensor;
use crate::tensor::dot_last;

/// Angles below this are treated as "no rotation".
const ANGLE_EPS: f64 = 1e-8;

/// Calculates the rotation matrices for a batch of rotation vectors
///
/// Parameters
/// ----------
/// rot_vecs: Tensor of shape Nx3
///     Array of N axis-angle vectors
///
/// Returns
/// -------
/// Tensor of shape Nx3x3
///     The rotation matrices for the given axis-angle parameters
///
/// Zero (and near-zero) vectors map to the identity: the axis is taken from the vector
/// offset by `1e-8`, so the skew matrix vanishes instead of dividing by zero.
pub fn axis_angle_to_matrix(rot_vecs: &Tensor) -> Tensor {
    let batch_size = rot_vecs.size()[0];
    let device = rot_vecs.device();
    let dtype = rot_vecs.kind();

    let angle = (rot_vecs + ANGLE_EPS)
        .square()
        .sum_dim_intlist(&[1i64][..], true, dtype)
        .sqrt();
    let rot_dir = rot_vecs / &angle;

    let cos = angle.cos().unsqueeze(-1);
    let sin = angle.sin().unsqueeze(-1);

    let rx = rot_dir.narrow(1, 0, 1);
    let ry = rot_dir.narrow(1, 1, 1);
    let rz = rot_dir.narrow(1, 2, 1);

    let zeros = Tensor::zeros(&[batch_size, 1], (dtype, device));
    let k = Tensor::cat(&[
        &zeros, &(-&rz), &ry,
        &rz, &zeros, &(-&rx),
        &(-&ry), &rx, &zeros,
    ], 1).view([batch_size, 3, 3]);

    let ident = Tensor::eye(3, (dtype, device)).unsqueeze(0);
    ident + &sin * &k + (1.0 - &cos) * k.bmm(&k)
}

/// Composes two batches of axis-angle rotations `rv1 ∘ rv2` (apply `rv2` first).
///
/// With `rv1 = a·l`, `rv2 = b·m` (`l`, `m` unit axes) the result `c·n` satisfies
///
/// ```text
/// cos(c/2)   = cos(a/2)cos(b/2) - sin(a/2)sin(b/2) (l · m)
/// sin(c/2) n = sin(a/2)cos(b/2) l + cos(a/2)sin(b/2) m + sin(a/2)sin(b/2) (l × m)
/// ```
///
/// Rows where `|rv1| == 0` return `rv2` unchanged and rows where `|rv2| == 0` return `rv1`.
/// Both inputs are `[N, 3]`.
pub fn compose_axis_angle(rv1: &Tensor, rv2: &Tensor) -> Tensor {
    let dtype = rv1.kind();
    let a = rv1.square().sum_dim_intlist(&[1i64][..], true, dtype).sqrt();
    let b = rv2.square().sum_dim_intlist(&[1i64][..], true, dtype).sqrt();

    let l = rv1 / a.clamp_min(ANGLE_EPS);
    let m = rv2 / b.clamp_min(ANGLE_EPS);

    let (sin_a, cos_a) = ((&a / 2.0).sin(), (&a / 2.0).cos());
    let (sin_b, cos_b) = ((&b / 2.0).sin(), (&b / 2.0).cos());

    let l_dot_m = dot_last(&l, &m).unsqueeze(-1);
    let cos_half_c = &cos_a * &cos_b - &sin_a * &sin_b * l_dot_m;
    let sin_half_c_n = &sin_a * &cos_b * &l
        + &cos_a * &sin_b * &m
        + &sin_a * &sin_b * l.linalg_cross(&m, -1);

    let half_c = cos_half_c.clamp(-1.0, 1.0).acos();
    let sin_half_c = half_c.sin();

    // half_c / sin(half_c) -> 1 as the composed angle vanishes
    let small = sin_half_c.abs().lt(ANGLE_EPS);
    let ratio = (&half_c / sin_half_c.where_self(&small.logical_not(), &sin_half_c.ones_like()))
        .where_self(&small.logical_not(), &half_c.ones_like());
    let result = sin_half_c_n * ratio * 2.0;

    let a_zero = a.eq(0.0).expand_as(&result);
    let b_zero = b.eq(0.0).expand_as(&result);
    let result = rv2.where_self(&a_zero, &result);
    rv1.where_self(&b_zero, &result)
}
