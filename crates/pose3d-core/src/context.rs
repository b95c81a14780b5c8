use tch::Device;
use crate::projection::ImageFrame;
use crate::summary::SummarySink;

/// State that outlives a single batch: the global step, the summary sink and whether
/// weights were already restored. Owned by the training loop and passed by reference.
pub struct TrainingContext {
    pub global_step: i64,
    pub device: Device,
    pub frame: ImageFrame,
    pub summary: Box<dyn SummarySink>,
    already_restored: bool,
}

impl TrainingContext {
    pub fn new(device: Device, frame: ImageFrame, summary: Box<dyn SummarySink>) -> Self {
        Self { global_step: 0, device, frame, summary, already_restored: false }
    }

    /// Increments the step after a successful batch and returns the new value.
    pub fn step_completed(&mut self) -> i64 {
        self.global_step += 1;
        self.global_step
    }

    pub fn already_restored(&self) -> bool {
        self.already_restored
    }

    pub(crate) fn mark_restored(&mut self, global_step: i64) {
        self.already_restored = true;
        self.global_step = global_step;
    }
}
