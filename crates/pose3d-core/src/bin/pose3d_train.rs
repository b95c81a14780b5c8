use std::path::PathBuf;
use clap::Parser;
use log::{error, info};
use tch::Device;
use pose3d_core::dataset::TensorDataset;
use pose3d_core::render::PointSplatRenderer;
use pose3d_core::{Mode, ModelConfig, ModelParts, PoseModel3d};
use pose3d_smpl::SMPL;

/// Trains or evaluates the 3D pose regressor.
#[derive(Debug, Parser)]
#[command(name = "pose3d-train", version)]
struct Args {
    /// JSON model configuration. Defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// SMPL body model as a tch multi-tensor file (`Tensor::save_multi`) holding `v_template`,
    /// `shapedirs`, `posedirs`, `j_regressor`, `weights`, `f` and `kintree_table`
    #[arg(long)]
    smpl: Option<PathBuf>,

    /// Multi-tensor dataset file
    #[arg(short, long)]
    dataset: Option<PathBuf>,

    /// Overrides `train.mode` (train, test or eval)
    #[arg(short, long)]
    mode: Option<String>,

    #[arg(long)]
    epochs: Option<u32>,

    #[arg(long)]
    batch_size: Option<i64>,

    /// Run on the CPU even when CUDA is available
    #[arg(long)]
    cpu: bool,

    /// Write the encoder weights here when done
    #[arg(long)]
    export: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => ModelConfig::load(path)?,
        None => ModelConfig::default(),
    };
    if let Some(mode) = args.mode {
        config.train.mode = mode;
    }
    if let Some(epochs) = args.epochs {
        config.train.epochs = epochs;
    }
    if let Some(batch_size) = args.batch_size {
        config.train.batch_size = batch_size;
    }
    let mode = config.validate()?;

    let device = if !args.cpu && tch::Cuda::is_available() {
        info!("CUDA is available. Using GPU.");
        Device::Cuda(0)
    } else {
        info!("Using CPU.");
        Device::Cpu
    };

    let mut parts = ModelParts::reference(&config, device)
        .with_renderer(PointSplatRenderer { height: config.image.height, width: config.image.width });
    if let Some(path) = &args.smpl {
        parts = parts.with_body_model(SMPL::load(path, device)?);
    }
    if let Some(path) = &args.dataset {
        // Batches are moved to the training device one at a time.
        parts = parts.with_dataset(TensorDataset::load(path, Device::Cpu)?);
    }

    let mut model = match PoseModel3d::new(config, parts) {
        Ok(model) => model,
        Err(e) => {
            error!("Failed to build model: {e}");
            std::process::exit(1);
        }
    };

    match mode {
        Mode::Train => {
            let report = model.train()?;
            info!("Trained {} epochs ({} steps), last loss {:?}", report.epochs, report.steps, report.last_loss);
        }
        Mode::Eval => {
            let report = model.evaluate()?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Mode::Test => {
            model.restore();
            info!("Model ready for inference at step {}", model.global_step());
        }
    }

    if let Some(path) = &args.export {
        model.save_model(path)?;
    }
    Ok(())
}
