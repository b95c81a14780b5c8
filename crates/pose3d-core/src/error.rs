use std::path::PathBuf;
use tch::TchError;
use thiserror::Error;
use pose3d_smpl::SmplError;

/// Invalid or inconsistent configuration. Always fatal, raised before any state is built.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("mode must be 'train', 'test', or 'eval', got '{0}'")]
    InvalidMode(String),

    #[error("{0} requires a body model but none was provided")]
    MissingBodyModel(&'static str),

    #[error("the discriminator is enabled but no discriminator network was provided")]
    MissingDiscriminator,

    #[error("{0} mode requires a dataset but none was provided")]
    MissingDataset(String),

    #[error("invalid value for `{field}`: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("`{operation}` is not available in {mode} mode")]
    WrongMode { operation: &'static str, mode: String },

    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Checkpoint problems. `NotFound` and `Corrupt` are recoverable at restore time,
/// write failures are not.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("no model checkpoint found in {0}")]
    NotFound(PathBuf),

    #[error("invalid model checkpoint {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: TchError,
    },

    #[error("invalid checkpoint index {path}: {source}")]
    BadIndex {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint I/O failed for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write checkpoint {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: TchError,
    },
}

/// Dataset loading problems.
#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("dataset is missing tensor `{0}`")]
    MissingTensor(&'static str),

    #[error("dataset tensor `{name}` has shape {actual:?}, expected {expected}")]
    BadShape { name: &'static str, actual: Vec<i64>, expected: String },

    #[error(transparent)]
    Tch(#[from] TchError),
}

#[derive(Debug, Error)]
pub enum Pose3dError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Smpl(#[from] SmplError),

    #[error(transparent)]
    Tch(#[from] TchError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Pose3dError> = std::result::Result<T, E>;
