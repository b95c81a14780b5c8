pub mod camera;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod dataset;
pub mod error;
pub mod heatmap;
pub mod losses;
pub mod models;
pub mod output;
pub mod pose;
pub mod projection;
pub mod render;
pub mod summary;
pub mod trainer;

pub use config::{Mode, ModelConfig};
pub use error::{CheckpointError, ConfigError, DatasetError, Pose3dError, Result};
pub use trainer::{ModelParts, PoseModel3d};
