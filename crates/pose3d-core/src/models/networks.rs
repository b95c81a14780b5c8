use tch::nn::{self, Module};
use tch::{Kind, Tensor};
use pose3d_smpl::constants::POSE_DIM;
use pose3d_utils::module::ModuleMT;
use pose3d_utils::tensor::validate_tensor;
use crate::config::{ImageConfig, NetworkConfig};
use crate::heatmap::soft_argmax;
use crate::output::OUTPUT_DIM;

/// Small convolutional encoder: image `[B, H, W, C]` -> keypoint heatmaps -> soft-argmax
/// keypoints -> 79-wide pose and camera regression.
#[derive(Debug)]
pub struct HeatmapEncoder {
    conv1: nn::Conv2D,
    conv2: nn::Conv2D,
    heatmaps: nn::Conv2D,
    fc1: nn::Linear,
    fc2: nn::Linear,
    in_channels: i64,
    strength: f64,
}

impl HeatmapEncoder {
    pub fn new(vs: &nn::Path, image: &ImageConfig, network: &NetworkConfig) -> Self {
        let in_channels = image.channels + image.aux_channels;
        let down = nn::ConvConfig { stride: 2, padding: 1, ..Default::default() };
        let k = network.heatmap_channels;

        Self {
            conv1: nn::conv2d(vs / "conv1", in_channels, 32, 3, down),
            conv2: nn::conv2d(vs / "conv2", 32, 64, 3, down),
            heatmaps: nn::conv2d(vs / "heatmaps", 64, k, 1, Default::default()),
            fc1: nn::linear(vs / "fc1", k * 3, 256, Default::default()),
            fc2: nn::linear(vs / "fc2", 256, OUTPUT_DIM, Default::default()),
            in_channels,
            strength: network.soft_argmax_strength,
        }
    }
}

impl ModuleMT<Tensor, Tensor> for HeatmapEncoder {
    fn forward_mt(&self, xs: Tensor, _train: bool) -> Tensor {
        validate_tensor(&xs, &[-1, -1, -1, self.in_channels], "image");

        let maps = xs
            .permute([0, 3, 1, 2])
            .apply(&self.conv1)
            .relu()
            .apply(&self.conv2)
            .relu()
            .apply(&self.heatmaps)
            .permute([0, 2, 3, 1]);
        let size = maps.size();
        let (h, w) = (size[1] as f64, size[2] as f64);

        // keypoints in [0, 1] image units so the head does not depend on resolution
        let scale = Tensor::from_slice(&[1.0 / h, 1.0 / w, 1.0]).to_kind(Kind::Float).to_device(maps.device());
        let keypoints = soft_argmax(&maps, self.strength) * scale;

        keypoints.flatten(1, 2).apply(&self.fc1).relu().apply(&self.fc2)
    }
}

/// Real/fake classifier over pose vectors `[B, 72]` -> logits `[B, 2]`.
#[derive(Debug)]
pub struct PoseDiscriminator {
    layers: nn::Sequential,
}

impl PoseDiscriminator {
    pub fn new(vs: &nn::Path, network: &NetworkConfig) -> Self {
        let hidden = network.discriminator_hidden;
        let layers = nn::seq()
            .add(nn::linear(vs / "fc1", POSE_DIM, hidden, Default::default()))
            .add_fn(|xs| xs.relu())
            .add(nn::linear(vs / "fc2", hidden, hidden, Default::default()))
            .add_fn(|xs| xs.relu())
            .add(nn::linear(vs / "logits", hidden, 2, Default::default()));
        Self { layers }
    }
}

impl ModuleMT<Tensor, Tensor> for PoseDiscriminator {
    fn forward_mt(&self, xs: Tensor, _train: bool) -> Tensor {
        validate_tensor(&xs, &[-1, POSE_DIM], "pose");
        self.layers.forward(&xs)
    }
}
