use tch::{Kind, Reduction, Tensor};

/// Epsilon used when normalising vectors, matching `tf.nn.l2_normalize`.
pub const NORMALIZE_EPS: f64 = 1e-12;

#[cfg(debug_assertions)]
pub fn validate_tensor(tensor: &Tensor, expected_dims: &[i64], name: &str) {
    let actual_dims = tensor.size();
    assert_eq!(
        actual_dims.len(),
        expected_dims.len(),
        "{} has {} dimensions, expected {}",
        name,
        actual_dims.len(),
        expected_dims.len()
    );

    for (i, (&actual, &expected)) in actual_dims.iter().zip(expected_dims.iter()).enumerate() {
        // -1 matches any size, used for the batch dimension
        if expected < 0 {
            continue;
        }
        assert_eq!(
            actual,
            expected,
            "{} dimension {} is {}, expected {}",
            name,
            i,
            actual,
            expected
        );
    }
}

#[cfg(not(debug_assertions))]
pub fn validate_tensor(_tensor: &Tensor, _expected_dims: &[i64], _name: &str) {
    // Shapes are trusted in release builds
}

/// Euclidean norm along the last dimension, keeping that dimension.
pub fn norm_last(t: &Tensor) -> Tensor {
    t.square().sum_dim_intlist(&[-1i64][..], true, Kind::Float).sqrt()
}

/// Normalises `t` along its last dimension. Zero vectors stay zero.
pub fn l2_normalize(t: &Tensor) -> Tensor {
    let sq = t.square().sum_dim_intlist(&[-1i64][..], true, Kind::Float);
    t * sq.clamp_min(NORMALIZE_EPS).rsqrt()
}

/// Dot product along the last dimension, dropping that dimension.
pub fn dot_last(a: &Tensor, b: &Tensor) -> Tensor {
    (a * b).sum_dim_intlist(&[-1i64][..], false, Kind::Float)
}

/// Repeats each row of a `[B, D]` tensor `n` times, giving `[B * n, D]`.
///
/// Row `i * n + j` holds sample `i`, so the result lines up with a `[B, n, D]` tensor
/// flattened to `[B * n, D]`.
pub fn tile_rows(t: &Tensor, n: i64) -> Tensor {
    let size = t.size();
    let batch = size[0];
    let rest: Vec<i64> = size[1..].to_vec();

    let mut view = vec![batch, 1];
    view.extend(&rest);
    let mut expand = vec![batch, n];
    expand.extend(&rest);
    let mut out = vec![batch * n];
    out.extend(&rest);

    t.view(view.as_slice()).expand(expand.as_slice(), false).reshape(out.as_slice())
}

/// Mean squared error scaled by a scalar weight, like `tf.losses.mean_squared_error(weights=w)`.
pub fn weighted_mse(predictions: &Tensor, labels: &Tensor, weight: f64) -> Tensor {
    predictions.mse_loss(labels, Reduction::Mean) * weight
}

/// Values of `t` above `limit`, zero elsewhere. Squaring the result gives a one-sided hinge.
pub fn excess_above(t: &Tensor, limit: f64) -> Tensor {
    t.where_self(&t.gt(limit), &t.zeros_like())
}

/// Values of `t` below zero, zero elsewhere.
pub fn negative_part(t: &Tensor) -> Tensor {
    t.where_self(&t.lt(0.0), &t.zeros_like())
}

/// Reads a scalar tensor into an `f64`, detached from the graph.
pub fn scalar_value(t: &Tensor) -> f64 {
    t.detach().to_kind(Kind::Double).double_value(&[])
}
