use std::f64::consts::PI;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use serde::{Deserialize, Serialize};
use crate::error::ConfigError;

/// What the model is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Test,
    Eval,
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "train" => Ok(Mode::Train),
            "test" => Ok(Mode::Test),
            "eval" => Ok(Mode::Eval),
            other => Err(ConfigError::InvalidMode(other.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Train => "train",
            Mode::Test => "test",
            Mode::Eval => "eval",
        };
        f.write_str(s)
    }
}

/// Input image geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    pub height: i64,
    pub width: i64,
    pub channels: i64,
    /// Extra per-pixel input channels (e.g. keypoint heatmaps) appended to the image
    pub aux_channels: i64,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self { height: 224, width: 224, channels: 3, aux_channels: 0 }
    }
}

/// Where the focal length used for projection comes from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FocalSource {
    /// Network output index 78
    Predicted,
    /// A constant focal length for every sample
    Fixed { value: f64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub focal: FocalSource,
    /// Sensor size used to rescale projected points into pixels
    pub sensor_size: f64,
    /// Allowed camera depth (position z) range
    pub depth_min: f64,
    pub depth_max: f64,
    /// Largest camera rotation magnitude before it is penalised
    pub max_rotation: f64,
    pub rotation_weight: f64,
    pub bounds_weight: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            focal: FocalSource::Fixed { value: 1.0 },
            sensor_size: 1.0,
            depth_min: -10.0,
            depth_max: -0.3,
            max_rotation: PI * 0.125,
            rotation_weight: 10.0,
            bounds_weight: 1.0,
        }
    }
}

/// Per-element loss used for the 2D reprojection term.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReprojectionMetric {
    Mse,
    Huber { delta: f64 },
}

/// What the projected predicted joints are compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReprojectionTarget {
    /// Ground-truth 3D joints projected through the same (stop-gradient) camera
    ProjectedGroundTruth,
    /// The annotated 2D joints
    Joints2d,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LossConfig {
    pub pose_loss: bool,
    pub mesh_loss: bool,
    pub reproject_loss: bool,
    pub discriminator: bool,

    /// Adds the raw axis-angle MSE on top of the rotation-matrix loss
    pub direct_pose_loss: bool,
    /// Rotates ground-truth global orientation from z-up to y-up before use
    pub rotate_global: bool,
    /// Hinge penalty on camera depth and focal sign
    pub camera_bounds: bool,
    /// Penalty on camera rotations outside the allowed cone
    pub camera_rotation: bool,

    pub pose_loss_direct_scale: f64,
    pub pose_loss_scale: f64,
    pub joint_limit: f64,
    pub reg_loss_scale: f64,
    pub mesh_loss_scale: f64,
    pub joint_loss_scale: f64,

    pub reproj_loss_scale: f64,
    pub reproj_cap: Option<f64>,
    pub reproj_metric: ReprojectionMetric,
    pub reproj_target: ReprojectionTarget,

    pub cam_loss_scale: f64,
    pub cam_cap: Option<f64>,
    pub cam_angle_loss_scale: f64,
    /// Dot products are clamped to `[-1 + eps, 1 - eps]` before `acos`
    pub angle_clamp_eps: f64,

    pub disc_loss_scale: f64,
    pub total_loss_scale: f64,
}

impl Default for LossConfig {
    fn default() -> Self {
        Self {
            pose_loss: true,
            mesh_loss: true,
            reproject_loss: true,
            discriminator: false,
            direct_pose_loss: true,
            rotate_global: true,
            camera_bounds: true,
            camera_rotation: true,
            pose_loss_direct_scale: 1.0,
            pose_loss_scale: 10.0,
            joint_limit: PI,
            reg_loss_scale: 1.0,
            mesh_loss_scale: 1.0,
            joint_loss_scale: 1.0,
            reproj_loss_scale: 1e-4,
            reproj_cap: Some(1.0 / 24.0),
            reproj_metric: ReprojectionMetric::Mse,
            reproj_target: ReprojectionTarget::ProjectedGroundTruth,
            cam_loss_scale: 1e-4,
            cam_cap: Some(0.5),
            cam_angle_loss_scale: 1.0,
            angle_clamp_eps: 1e-6,
            disc_loss_scale: 0.1,
            total_loss_scale: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Keypoint heatmaps produced by the encoder backbone
    pub heatmap_channels: i64,
    pub soft_argmax_strength: f64,
    pub discriminator_hidden: i64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { heatmap_channels: 24, soft_argmax_strength: 100.0, discriminator_hidden: 256 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainConfig {
    /// `train`, `test` or `eval`
    pub mode: String,
    pub batch_size: i64,
    pub epochs: u32,
    pub encoder_lr: f64,
    pub discriminator_lr: f64,
    pub summary_every: i64,
    pub checkpoint_every: i64,
    pub saver_path: PathBuf,
    pub summary_dir: PathBuf,
    pub restore_model: bool,
    pub shuffle: bool,
    pub progress: bool,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            mode: "test".to_string(),
            batch_size: 32,
            epochs: 1,
            encoder_lr: 2e-4,
            discriminator_lr: 4e-4,
            summary_every: 10,
            checkpoint_every: 2000,
            saver_path: PathBuf::from("/tmp/pose3d/ckpts/3d_pose"),
            summary_dir: PathBuf::from("/tmp/pose3d/logs"),
            restore_model: true,
            shuffle: true,
            progress: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub train: TrainConfig,
    pub loss: LossConfig,
    pub camera: CameraConfig,
    pub image: ImageConfig,
    pub network: NetworkConfig,
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue { field, reason: reason.into() }
}

impl ModelConfig {
    /// Reads a JSON config; absent fields take their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        serde_json::from_str(&content)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Parsed mode.
    pub fn mode(&self) -> Result<Mode, ConfigError> {
        self.train.mode.parse()
    }

    /// Checks every value and returns the parsed mode.
    pub fn validate(&self) -> Result<Mode, ConfigError> {
        let mode = self.mode()?;

        let t = &self.train;
        if t.batch_size <= 0 {
            return Err(invalid("train.batch_size", format!("must be positive, got {}", t.batch_size)));
        }
        if t.encoder_lr <= 0.0 || t.discriminator_lr <= 0.0 {
            return Err(invalid("train.*_lr", "learning rates must be positive"));
        }
        if t.summary_every <= 0 || t.checkpoint_every <= 0 {
            return Err(invalid("train.*_every", "intervals must be positive"));
        }

        let i = &self.image;
        if i.height <= 0 || i.width <= 0 || i.channels <= 0 || i.aux_channels < 0 {
            return Err(invalid("image", format!("bad image geometry {}x{}x{}+{}", i.height, i.width, i.channels, i.aux_channels)));
        }

        let c = &self.camera;
        if c.sensor_size <= 0.0 {
            return Err(invalid("camera.sensor_size", "must be positive"));
        }
        if c.depth_min >= c.depth_max {
            return Err(invalid("camera.depth_min", format!("{} is not below depth_max {}", c.depth_min, c.depth_max)));
        }
        if let FocalSource::Fixed { value } = c.focal {
            if value <= 0.0 {
                return Err(invalid("camera.focal", format!("fixed focal length must be positive, got {value}")));
            }
        }

        let l = &self.loss;
        for (field, cap) in [("loss.reproj_cap", l.reproj_cap), ("loss.cam_cap", l.cam_cap)] {
            if matches!(cap, Some(v) if v <= 0.0) {
                return Err(invalid(field, "caps must be positive"));
            }
        }
        if let ReprojectionMetric::Huber { delta } = l.reproj_metric {
            if delta <= 0.0 {
                return Err(invalid("loss.reproj_metric", "huber delta must be positive"));
            }
        }
        if !(0.0..0.5).contains(&l.angle_clamp_eps) {
            return Err(invalid("loss.angle_clamp_eps", "must lie in [0, 0.5)"));
        }

        if self.network.heatmap_channels <= 0 || self.network.soft_argmax_strength <= 0.0 {
            return Err(invalid("network", "heatmap channels and soft-argmax strength must be positive"));
        }

        Ok(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("train".parse::<Mode>().unwrap(), Mode::Train);
        assert_eq!("eval".parse::<Mode>().unwrap(), Mode::Eval);
        assert!(matches!("fit".parse::<Mode>(), Err(ConfigError::InvalidMode(m)) if m == "fit"));
    }

    #[test]
    fn test_defaults_validate() {
        let config = ModelConfig::default();
        assert_eq!(config.validate().unwrap(), Mode::Test);
    }

    #[test]
    fn test_partial_json_takes_defaults() {
        let json = r#"{
            "train": { "mode": "train", "batch_size": 4 },
            "loss": { "reproj_metric": { "kind": "huber", "delta": 2.0 }, "reproj_cap": null },
            "camera": { "focal": { "kind": "predicted" } }
        }"#;
        let config: ModelConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.validate().unwrap(), Mode::Train);
        assert_eq!(config.train.batch_size, 4);
        assert_eq!(config.train.checkpoint_every, 2000);
        assert_eq!(config.loss.reproj_metric, ReprojectionMetric::Huber { delta: 2.0 });
        assert_eq!(config.loss.reproj_cap, None);
        assert_eq!(config.loss.cam_cap, Some(0.5));
        assert_eq!(config.camera.focal, FocalSource::Predicted);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let mut config = ModelConfig::default();
        config.train.mode = "serve".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMode(_))));

        let mut config = ModelConfig::default();
        config.camera.depth_min = 1.0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { field: "camera.depth_min", .. })));

        let mut config = ModelConfig::default();
        config.train.batch_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidValue { field: "train.batch_size", .. })));
    }
}
