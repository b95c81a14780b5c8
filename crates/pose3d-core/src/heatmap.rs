use tch::{Kind, Tensor};
use pose3d_utils::tensor::validate_tensor;

/// Sharpening applied to the heatmaps before the spatial softmax.
pub const DEFAULT_STRENGTH: f64 = 100.0;

/// Differentiable argmax over heatmaps `[B, H, W, C]`.
///
/// Each channel goes through a softmax over its `H * W` pixels after scaling by `strength`;
/// the expected row and column under that distribution replace the hard argmax.
/// Returns `[B, C, 3]` holding `(y, x, max activation)` per channel, in pixel units.
pub fn soft_argmax(heatmaps: &Tensor, strength: f64) -> Tensor {
    validate_tensor(heatmaps, &[-1, -1, -1, -1], "heatmaps");
    let size = heatmaps.size();
    let (b, h, w, c) = (size[0], size[1], size[2], size[3]);
    let opts = (heatmaps.kind(), heatmaps.device());

    let softmax = (heatmaps * strength)
        .reshape([b, h * w, c])
        .softmax(1, Kind::Float)
        .reshape([b, h, w, c]);

    let y_ind = Tensor::arange(h, opts).to_kind(Kind::Float).view([1, h, 1, 1]);
    let x_ind = Tensor::arange(w, opts).to_kind(Kind::Float).view([1, 1, w, 1]);

    let y = (&softmax * y_ind).sum_dim_intlist(&[1i64, 2][..], false, Kind::Float);
    let x = (&softmax * x_ind).sum_dim_intlist(&[1i64, 2][..], false, Kind::Float);
    let maxes = heatmaps.amax(&[1i64, 2][..], false).to_kind(Kind::Float);

    Tensor::stack(&[y, x, maxes], 2)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    fn peak(h: i64, w: i64, y0: i64, x0: i64) -> Tensor {
        let maps = Tensor::zeros(&[1, h, w, 1], (Kind::Float, Device::Cpu));
        let _ = maps.get(0).get(y0).get(x0).fill_(1.0);
        maps
    }

    #[test]
    fn test_isolated_peak_converges() {
        let maps = peak(16, 12, 5, 9);

        let loose = soft_argmax(&maps, 1.0);
        let sharp = soft_argmax(&maps, DEFAULT_STRENGTH);

        assert_eq!(sharp.size(), &[1, 1, 3]);
        assert!((sharp.double_value(&[0, 0, 0]) - 5.0).abs() < 1e-3);
        assert!((sharp.double_value(&[0, 0, 1]) - 9.0).abs() < 1e-3);
        assert_eq!(sharp.double_value(&[0, 0, 2]), 1.0);

        // a soft distribution drifts towards the image centre
        assert!((loose.double_value(&[0, 0, 0]) - 5.0).abs() > 1e-2);
    }

    #[test]
    fn test_uniform_map_gives_centre() {
        let maps = Tensor::zeros(&[2, 5, 7, 3], (Kind::Float, Device::Cpu));
        let out = soft_argmax(&maps, DEFAULT_STRENGTH);

        assert_eq!(out.size(), &[2, 3, 3]);
        assert!((out.double_value(&[1, 2, 0]) - 2.0).abs() < 1e-5);
        assert!((out.double_value(&[1, 2, 1]) - 3.0).abs() < 1e-5);
    }

    #[test]
    fn test_large_activations_stay_finite() {
        let maps = peak(8, 8, 1, 2) * 1e4;
        let out = soft_argmax(&maps, DEFAULT_STRENGTH);
        assert!(!bool::try_from(out.isnan().any()).unwrap());
        assert!((out.double_value(&[0, 0, 1]) - 2.0).abs() < 1e-4);
    }
}
