use tch::{Device, Kind, Tensor};
use pose3d_utils::module::TensorCollection;
use super::softmax_cross_entropy;

/// One-hot labels for a discriminator batch of `2 * batch_size` poses: `[1, 0]` (real) for
/// the first half, `[0, 1]` (fake) for the second.
pub fn real_fake_labels(batch_size: i64, device: Device) -> Tensor {
    let real = real_labels(batch_size, device);
    let fake = real.flip([1]);
    Tensor::cat(&[real, fake], 0)
}

fn real_labels(batch_size: i64, device: Device) -> Tensor {
    Tensor::from_slice(&[1.0f32, 0.0])
        .to_device(device)
        .view([1, 2])
        .expand([batch_size, 2], false)
        .contiguous()
}

/// Class index per row of [`real_fake_labels`]: 0 for real, 1 for fake.
pub fn real_fake_classes(batch_size: i64, device: Device) -> Tensor {
    Tensor::cat(&[
        Tensor::zeros(&[batch_size], (Kind::Int64, device)),
        Tensor::ones(&[batch_size], (Kind::Int64, device)),
    ], 0)
}

/// Softmax cross-entropy over the stacked `[gt; predicted]` logits `[2B, 2]`.
pub fn discriminator_loss(logits: &Tensor) -> Tensor {
    let batch_size = logits.size()[0] / 2;
    softmax_cross_entropy(logits, &real_fake_labels(batch_size, logits.device()))
}

/// Adversarial encoder loss: predicted poses' logits `[B, 2]` scored against the real label.
pub fn encoder_adversarial_loss(fake_logits: &Tensor, scale: f64) -> Tensor {
    let batch_size = fake_logits.size()[0];
    softmax_cross_entropy(fake_logits, &real_labels(batch_size, fake_logits.device())) * scale
}

/// Fraction of the stacked `[gt; predicted]` batch the discriminator classifies correctly.
pub fn discriminator_accuracy(logits: &Tensor) -> Tensor {
    let batch_size = logits.size()[0] / 2;
    logits.accuracy_for_logits(&real_fake_classes(batch_size, logits.device()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pose3d_utils::tensor::scalar_value;

    #[test]
    fn test_labels_split_real_and_fake() {
        let labels = real_fake_labels(3, Device::Cpu);
        assert_eq!(labels.size(), &[6, 2]);
        for i in 0..3 {
            assert_eq!(labels.double_value(&[i, 0]), 1.0);
            assert_eq!(labels.double_value(&[i, 1]), 0.0);
            assert_eq!(labels.double_value(&[3 + i, 0]), 0.0);
            assert_eq!(labels.double_value(&[3 + i, 1]), 1.0);
        }
    }

    #[test]
    fn test_perfect_discriminator() {
        let logits = Tensor::from_slice(&[9.0f32, -9.0, 9.0, -9.0, -9.0, 9.0, -9.0, 9.0]).view([4, 2]);

        assert!(scalar_value(&discriminator_loss(&logits)) < 1e-6);
        assert_eq!(scalar_value(&discriminator_accuracy(&logits)), 1.0);

        // the fooled-encoder loss is large when fakes are recognised
        let fake = logits.narrow(0, 2, 2);
        assert!(scalar_value(&encoder_adversarial_loss(&fake, 0.1)) > 1.0);
    }

    #[test]
    fn test_adversarial_loss_scale() {
        let fake = Tensor::zeros(&[5, 2], tch::kind::FLOAT_CPU);
        let ln2 = std::f64::consts::LN_2;
        assert!((scalar_value(&encoder_adversarial_loss(&fake, 0.5)) - 0.5 * ln2).abs() < 1e-6);
    }
}
