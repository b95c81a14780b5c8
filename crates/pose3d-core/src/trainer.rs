use std::path::{Path, PathBuf};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use serde::Serialize;
use tch::nn::{self, OptimizerConfig};
use tch::{Device, Reduction, Tensor};
use pose3d_smpl::BodyModel;
use pose3d_utils::module::ModuleMT;
use pose3d_utils::tensor::scalar_value;
use pose3d_utils::var_store::ListTensors;
use pose3d_utils::Network;
use crate::camera::CameraParams;
use crate::checkpoint::{save_var_store, CheckpointStore};
use crate::config::{Mode, ModelConfig};
use crate::context::TrainingContext;
use crate::dataset::{Batch, PoseDataset};
use crate::error::{CheckpointError, ConfigError, Result};
use crate::losses::discriminator::{discriminator_accuracy, discriminator_loss, encoder_adversarial_loss};
use crate::losses::encoder::{EncoderLoss, EncoderLossOutput, MeshPair};
use crate::losses::LossTerm;
use crate::models::networks::{HeatmapEncoder, PoseDiscriminator};
use crate::output;
use crate::pose::rotate_global_pose;
use crate::projection::{PinholeProjection, Project};
use crate::render::{to_summary_image, MeshRenderer, RenderCamera, RenderRequest};
use crate::summary::open_summary_sink;

/// The collaborators a [`PoseModel3d`] is built from.
pub struct ModelParts {
    pub encoder: Box<Network>,
    pub encoder_vs: nn::VarStore,
    pub discriminator: Option<(Box<Network>, nn::VarStore)>,
    pub body_model: Option<Box<dyn BodyModel>>,
    pub projector: Box<dyn Project>,
    pub renderer: Option<Box<dyn MeshRenderer>>,
    pub dataset: Option<Box<dyn PoseDataset>>,
}

impl ModelParts {
    /// Heatmap encoder, MLP discriminator (when enabled) and pinhole projection on `device`.
    /// Body model, renderer and dataset are added with the `with_*` methods.
    pub fn reference(config: &ModelConfig, device: Device) -> Self {
        let encoder_vs = nn::VarStore::new(device);
        let encoder = HeatmapEncoder::new(&(encoder_vs.root() / "encoder"), &config.image, &config.network);

        let discriminator = config.loss.discriminator.then(|| {
            let vs = nn::VarStore::new(device);
            let disc = PoseDiscriminator::new(&(vs.root() / "discriminator"), &config.network);
            (Box::new(disc) as Box<Network>, vs)
        });

        Self {
            encoder: Box::new(encoder),
            encoder_vs,
            discriminator,
            body_model: None,
            projector: Box::new(PinholeProjection),
            renderer: None,
            dataset: None,
        }
    }

    pub fn with_body_model(mut self, body_model: impl BodyModel + 'static) -> Self {
        self.body_model = Some(Box::new(body_model));
        self
    }

    pub fn with_renderer(mut self, renderer: impl MeshRenderer + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub fn with_dataset(mut self, dataset: impl PoseDataset + 'static) -> Self {
        self.dataset = Some(Box::new(dataset));
        self
    }
}

/// What [`PoseModel3d::restore`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum RestoreOutcome {
    Restored { path: PathBuf, step: i64 },
    AlreadyRestored,
    NotFound,
    Invalid,
}

#[derive(Debug, Clone)]
pub struct StepReport {
    /// Global step after the update
    pub step: i64,
    pub total_loss: f64,
    pub terms: Vec<(&'static str, f64)>,
    pub discriminator_loss: Option<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct TrainReport {
    pub epochs: u32,
    pub steps: i64,
    pub last_loss: Option<f64>,
}

/// Per-batch errors, in dataset order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EvalReport {
    pub pose_errors: Vec<f64>,
    pub reproj_errors: Vec<f64>,
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

impl EvalReport {
    pub fn mean_pose_error(&self) -> Option<f64> {
        mean(&self.pose_errors)
    }

    pub fn mean_reproj_error(&self) -> Option<f64> {
        mean(&self.reproj_errors)
    }
}

struct Optimizers {
    encoder: nn::Optimizer,
    discriminator: Option<nn::Optimizer>,
}

/// 3D pose and shape regressor: an image encoder supervised through a body model and a
/// pinhole camera, optionally with an adversarial pose prior.
pub struct PoseModel3d {
    config: ModelConfig,
    mode: Mode,
    encoder: Box<Network>,
    encoder_vs: nn::VarStore,
    discriminator: Option<(Box<Network>, nn::VarStore)>,
    body_model: Option<Box<dyn BodyModel>>,
    projector: Box<dyn Project>,
    renderer: Option<Box<dyn MeshRenderer>>,
    dataset: Option<Box<dyn PoseDataset>>,
    /// Built on the first update and kept so Adam moments carry across steps
    optimizers: Option<Optimizers>,
    checkpoints: CheckpointStore,
    context: TrainingContext,
}

impl PoseModel3d {
    /// Validates `config` against the provided parts. Nothing is created on failure.
    pub fn new(config: ModelConfig, parts: ModelParts) -> Result<Self> {
        let mode = config.validate()?;
        let loss = &config.loss;

        if matches!(mode, Mode::Train | Mode::Eval) {
            if parts.dataset.is_none() {
                return Err(ConfigError::MissingDataset(mode.to_string()).into());
            }
            let needs_body_model = mode == Mode::Eval || loss.mesh_loss || loss.reproject_loss;
            if needs_body_model && parts.body_model.is_none() {
                return Err(ConfigError::MissingBodyModel("the mesh, reprojection and evaluation losses").into());
            }
        }
        if mode == Mode::Train && loss.discriminator && parts.discriminator.is_none() {
            return Err(ConfigError::MissingDiscriminator.into());
        }

        let device = parts.encoder_vs.device();
        let subdir = if mode == Mode::Train { "train" } else { "test" };
        let summary = open_summary_sink(&config.train.summary_dir.join(subdir));
        let frame = crate::projection::ImageFrame::new(config.image.height, config.image.width, config.camera.sensor_size);

        info!("Built {} model with {} encoder parameters on {:?}", mode, parts.encoder_vs.num_parameters(), device);
        parts.encoder_vs.list_tensors();

        Ok(Self {
            checkpoints: CheckpointStore::new(&config.train.saver_path),
            context: TrainingContext::new(device, frame, summary),
            mode,
            encoder: parts.encoder,
            encoder_vs: parts.encoder_vs,
            discriminator: parts.discriminator,
            body_model: parts.body_model,
            projector: parts.projector,
            renderer: parts.renderer,
            dataset: parts.dataset,
            optimizers: None,
            config,
        })
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn global_step(&self) -> i64 {
        self.context.global_step
    }

    pub fn context(&self) -> &TrainingContext {
        &self.context
    }

    /// Encoder weights.
    pub fn var_store(&self) -> &nn::VarStore {
        &self.encoder_vs
    }

    fn require_mode(&self, operation: &'static str, allowed: &[Mode]) -> Result<()> {
        if allowed.contains(&self.mode) {
            Ok(())
        } else {
            Err(ConfigError::WrongMode { operation, mode: self.mode.to_string() }.into())
        }
    }

    /// Loads the latest checkpoint once. Missing or unreadable checkpoints are logged and
    /// training continues from the current weights.
    pub fn restore(&mut self) -> RestoreOutcome {
        if self.context.already_restored() {
            warn!("Already restored");
            return RestoreOutcome::AlreadyRestored;
        }

        let discriminator_vs = self.discriminator.as_mut().map(|(_, vs)| vs);
        match self.checkpoints.restore(&mut self.encoder_vs, discriminator_vs) {
            Ok(checkpoint) => {
                info!("Model restored from checkpoint at {}", checkpoint.path.display());
                self.context.mark_restored(checkpoint.step);
                RestoreOutcome::Restored { path: checkpoint.path, step: checkpoint.step }
            }
            Err(CheckpointError::NotFound(dir)) => {
                warn!("No model checkpoint found in {}. Continuing without loading model", dir.display());
                RestoreOutcome::NotFound
            }
            Err(e) => {
                warn!("{e}. Continuing without loading model");
                RestoreOutcome::Invalid
            }
        }
    }

    fn restore_if_requested(&mut self) {
        if self.config.train.restore_model {
            self.restore();
        }
    }

    /// Runs the encoder on `input` `[B, H, W, C]` and returns raw outputs `[B, 79]`.
    pub fn estimate(&mut self, input: &Tensor) -> Result<Tensor> {
        self.restore_if_requested();
        let input = input.to_device(self.context.device);
        Ok(tch::no_grad(|| self.encoder.forward_mt(input, false)))
    }

    /// Writes the encoder weights to `path`.
    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        save_var_store(&self.encoder_vs, path)?;
        info!("Saved model to {}", path.display());
        Ok(())
    }

    /// Snapshot of the current weights keyed by the global step.
    pub fn save_checkpoint(&self) -> Result<PathBuf> {
        let discriminator = self.discriminator.as_ref().map(|(_, vs)| vs);
        let checkpoint = self.checkpoints.save(&self.encoder_vs, discriminator, self.context.global_step)?;
        Ok(checkpoint.path)
    }

    fn build_optimizers(&self) -> Result<Optimizers> {
        let train = &self.config.train;
        let encoder = nn::Adam::default().build(&self.encoder_vs, train.encoder_lr)?;
        let discriminator = match &self.discriminator {
            Some((_, vs)) if self.config.loss.discriminator => Some(nn::Adam::default().build(vs, train.discriminator_lr)?),
            _ => None,
        };
        Ok(Optimizers { encoder, discriminator })
    }

    fn take_optimizers(&mut self) -> Result<Optimizers> {
        match self.optimizers.take() {
            Some(optimizers) => Ok(optimizers),
            None => self.build_optimizers(),
        }
    }

    fn progress_bar(&self, dataset: &dyn PoseDataset) -> ProgressBar {
        if !self.config.train.progress {
            return ProgressBar::hidden();
        }
        let train = &self.config.train;
        let batches = (dataset.len() + train.batch_size - 1) / train.batch_size;
        let pb = ProgressBar::new((batches * train.epochs as i64).max(0) as u64);
        if let Ok(style) = ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}") {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb
    }

    /// Trains for the configured number of epochs over the dataset given at construction.
    pub fn train(&mut self) -> Result<TrainReport> {
        self.require_mode("train", &[Mode::Train])?;
        self.restore_if_requested();

        let dataset = self.dataset.take().ok_or_else(|| ConfigError::MissingDataset(self.mode.to_string()))?;
        let result = self.take_optimizers().and_then(|mut optimizers| {
            let report = self.run_training(dataset.as_ref(), &mut optimizers);
            self.optimizers = Some(optimizers);
            report
        });
        self.dataset = Some(dataset);
        result
    }

    fn run_training(&mut self, dataset: &dyn PoseDataset, optimizers: &mut Optimizers) -> Result<TrainReport> {
        let (batch_size, epochs, shuffle) = (self.config.train.batch_size, self.config.train.epochs, self.config.train.shuffle);
        let pb = self.progress_bar(dataset);
        let start_step = self.context.global_step;
        let mut report = TrainReport::default();

        for epoch in 1..=epochs {
            for batch in dataset.batches(batch_size, shuffle)? {
                let step = self.step_with(&batch, optimizers)?;
                pb.inc(1);
                pb.set_message(format!("step {} loss {:.5}", step.step, step.total_loss));
                report.last_loss = Some(step.total_loss);
            }
            self.save_checkpoint()?;
            info!("Epoch {}/{} complete at step {}", epoch, epochs, self.context.global_step);
            report.epochs = epoch;
        }

        pb.finish_with_message("Training complete");
        report.steps = self.context.global_step - start_step;
        Ok(report)
    }

    /// One encoder update (and one discriminator update when enabled) on `batch`.
    pub fn train_step(&mut self, batch: &Batch) -> Result<StepReport> {
        self.require_mode("train_step", &[Mode::Train])?;
        let mut optimizers = self.take_optimizers()?;
        let report = self.step_with(batch, &mut optimizers);
        self.optimizers = Some(optimizers);
        report
    }

    fn step_with(&mut self, batch: &Batch, optimizers: &mut Optimizers) -> Result<StepReport> {
        let batch = batch.to_device(self.context.device);
        let summary_step = self.context.global_step;
        let write_summaries = summary_step % self.config.train.summary_every == 0;
        let loss_cfg = &self.config.loss;

        let outputs = self.encoder.forward_mt(batch.encoder_input(), true);
        let out_pose = output::pose(&outputs);
        let gt_pose = if loss_cfg.rotate_global {
            rotate_global_pose(&batch.pose)
        } else {
            batch.pose.shallow_clone()
        };

        let composer = EncoderLoss {
            loss: loss_cfg,
            camera: &self.config.camera,
            frame: self.context.frame,
            body_model: self.body_model.as_deref(),
            projector: self.projector.as_ref(),
            keep_meshes: write_summaries && self.renderer.is_some(),
        };
        let mut losses = composer.compute(&outputs, &gt_pose, &batch.betas, &batch.joints2d)?;

        let discriminator = match (&self.discriminator, optimizers.discriminator.as_mut()) {
            (Some((network, _)), Some(opt)) => Some((network, opt)),
            _ => None,
        };

        if let Some((network, _)) = &discriminator {
            let fake_logits = network.forward_mt(out_pose.shallow_clone(), true);
            losses.breakdown.push(LossTerm::new(
                "discriminator_loss",
                encoder_adversarial_loss(&fake_logits, loss_cfg.disc_loss_scale),
            ));
        }

        let total = losses.breakdown.total() * loss_cfg.total_loss_scale;
        optimizers.encoder.backward_step(&total);

        let disc_stats = discriminator.map(|(network, opt)| {
            let logits = network.forward_mt(Tensor::cat(&[&gt_pose, &out_pose.detach()], 0), true);
            let loss = discriminator_loss(&logits);
            opt.backward_step(&loss);
            (scalar_value(&loss), scalar_value(&discriminator_accuracy(&logits)))
        });

        let step = self.context.step_completed();
        let total_loss = scalar_value(&total);
        debug!("step {step}: total loss {total_loss:.6}");

        if write_summaries {
            self.write_summaries(summary_step, &losses, total_loss, disc_stats);
        }
        if step % self.config.train.checkpoint_every == 0 {
            self.save_checkpoint()?;
        }

        Ok(StepReport {
            step,
            total_loss,
            terms: losses.breakdown.terms().iter().map(|t| (t.name, scalar_value(&t.value))).collect(),
            discriminator_loss: disc_stats.map(|(loss, _)| loss),
        })
    }

    fn write_summaries(&mut self, step: i64, losses: &EncoderLossOutput, total_loss: f64, disc_stats: Option<(f64, f64)>) {
        let images = match (&self.renderer, &losses.meshes, &losses.camera) {
            (Some(renderer), Some(meshes), Some(camera)) => {
                let faces = self.body_model.as_ref().and_then(|m| m.faces());
                render_views(renderer.as_ref(), faces, meshes, camera, self.config.camera.sensor_size)
                    .unwrap_or_else(|e| {
                        warn!("Failed to render summary views: {e}");
                        Vec::new()
                    })
            }
            _ => Vec::new(),
        };

        let sink = self.context.summary.as_mut();
        losses.breakdown.write_summaries(sink, step);
        sink.scalar("losses", "total_loss", total_loss, step);
        for (tag, value) in &losses.camera_summaries {
            sink.scalar("camera", tag, *value, step);
        }
        if let Some((loss, accuracy)) = disc_stats {
            sink.scalar("discriminator", "discriminator_loss", loss, step);
            sink.scalar("discriminator", "accuracy", accuracy, step);
        }
        for (tag, image) in &images {
            sink.image(tag, image, step);
        }
        sink.flush();
    }

    /// Mirrors the training batches without updates and returns per-batch pose and
    /// reprojection errors.
    pub fn evaluate(&mut self) -> Result<EvalReport> {
        self.require_mode("evaluate", &[Mode::Train, Mode::Eval])?;
        self.restore_if_requested();

        let dataset = self.dataset.take().ok_or_else(|| ConfigError::MissingDataset(self.mode.to_string()))?;
        let result = self.run_evaluation(dataset.as_ref());
        self.dataset = Some(dataset);
        result
    }

    fn run_evaluation(&self, dataset: &dyn PoseDataset) -> Result<EvalReport> {
        let body_model = self.body_model.as_deref().ok_or(ConfigError::MissingBodyModel("evaluation"))?;
        let frame = self.context.frame;
        let mut report = EvalReport::default();

        for batch in dataset.batches(self.config.train.batch_size, false)? {
            let batch = batch.to_device(self.context.device);
            let (pose_error, reproj_error) = tch::no_grad(|| {
                let outputs = self.encoder.forward_mt(batch.encoder_input(), false);
                let out_pose = output::pose(&outputs);
                let gt_pose = if self.config.loss.rotate_global {
                    rotate_global_pose(&batch.pose)
                } else {
                    batch.pose.shallow_clone()
                };
                let pose_error = out_pose.mse_loss(&gt_pose, Reduction::Mean);

                let joints = body_model.forward(&batch.betas, &out_pose, false).joints;
                let camera = CameraParams::from_output(&outputs, self.config.camera.focal).tile(joints.size()[1]);
                let uv = self.projector.project(&joints.reshape([-1, 3]), &camera.position, &camera.rotation, &camera.focal);
                let gt_2d = frame.flip_joints2d(&batch.joints2d).reshape([-1, 2]);
                let reproj_error = frame.to_pixels(&uv).mse_loss(&gt_2d, Reduction::Mean);

                (scalar_value(&pose_error), scalar_value(&reproj_error))
            });
            report.pose_errors.push(pose_error);
            report.reproj_errors.push(reproj_error);
        }

        info!(
            "Evaluated {} batches: mean pose error {:?}, mean reprojection error {:?}",
            report.pose_errors.len(),
            report.mean_pose_error(),
            report.mean_reproj_error()
        );
        Ok(report)
    }
}

/// Ground truth mesh seen from the first sample's predicted camera (lit from the camera)
/// and the predicted mesh from the fixed front view.
fn render_views(
    renderer: &dyn MeshRenderer,
    faces: Option<Tensor>,
    meshes: &MeshPair,
    camera: &CameraParams,
    sensor_size: f64,
) -> Result<Vec<(&'static str, Tensor)>> {
    let device = meshes.predicted.device();
    let faces = faces.unwrap_or_else(|| Tensor::zeros(&[0, 3], (tch::Kind::Int64, device)));
    let first = |t: &Tensor| t.narrow(0, 0, 1).detach();

    let camera = CameraParams {
        position: first(&camera.position),
        rotation: first(&camera.rotation),
        focal: first(&camera.focal),
    };
    let gt_mesh = first(&meshes.ground_truth);
    let out_mesh = first(&meshes.predicted);

    let camera_view = RenderCamera::from_params(&camera, sensor_size);
    let camera_lights = camera.position.unsqueeze(1);
    let rendered_cam = renderer.render(&RenderRequest::shaded(&gt_mesh, &faces, &camera_view, camera_lights))?;

    let front_view = RenderCamera::front(1, device);
    let front_lights = Tensor::from_slice(&[0.0f32, 1.0, -4.0]).to_device(device).view([1, 1, 3]);
    let rendered_out = renderer.render(&RenderRequest::shaded(&out_mesh, &faces, &front_view, front_lights))?;

    Ok(vec![
        ("camera_view", to_summary_image(&rendered_cam)),
        ("out_mesh", to_summary_image(&rendered_out)),
    ])
}
