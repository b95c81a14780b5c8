use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use log::{debug, warn};
use serde::Serialize;
use tch::{Kind, Tensor};
use pose3d_utils::tensor::scalar_value;

/// Destination for training summaries. Writes are fire-and-forget: failures are logged
/// by the sink and never interrupt training.
pub trait SummarySink {
    fn scalar(&mut self, family: &str, tag: &str, value: f64, step: i64);

    /// `image` is `[B, H, W, C]`; sinks may keep only the first sample.
    fn image(&mut self, tag: &str, image: &Tensor, step: i64);

    fn flush(&mut self) {}
}

/// Sends summaries to the `log` facade.
#[derive(Debug, Default)]
pub struct LogSummary;

impl SummarySink for LogSummary {
    fn scalar(&mut self, family: &str, tag: &str, value: f64, step: i64) {
        debug!("[{step}] {family}/{tag} = {value:.6}");
    }

    fn image(&mut self, tag: &str, image: &Tensor, step: i64) {
        debug!("[{step}] image {tag} {:?}", image.size());
    }
}

#[derive(Debug, Serialize)]
struct SummaryEvent<'a> {
    step: i64,
    family: &'a str,
    tag: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shape: Option<Vec<i64>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pixels: Option<Vec<f32>>,
}

/// Appends one JSON object per summary to `<dir>/events.jsonl`.
pub struct JsonlSummaryWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlSummaryWriter {
    pub fn create<P: AsRef<Path>>(dir: P) -> std::io::Result<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join("events.jsonl");
        let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, writer: BufWriter::new(file) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_event(&mut self, event: &SummaryEvent) {
        let result = serde_json::to_writer(&mut self.writer, event)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"));
        if let Err(e) = result {
            warn!("Failed to write summary to {}: {e}", self.path.display());
        }
    }
}

impl SummarySink for JsonlSummaryWriter {
    fn scalar(&mut self, family: &str, tag: &str, value: f64, step: i64) {
        self.write_event(&SummaryEvent { step, family, tag, value: Some(value), shape: None, pixels: None });
    }

    fn image(&mut self, tag: &str, image: &Tensor, step: i64) {
        let first = image.get(0).detach().to_kind(Kind::Float).contiguous();
        let pixels = match Vec::<f32>::try_from(first.view([-1])) {
            Ok(p) => p,
            Err(e) => {
                warn!("Failed to read image summary {tag}: {e}");
                return;
            }
        };
        let event = SummaryEvent {
            step,
            family: "images",
            tag,
            value: Some(scalar_value(&first.mean(Kind::Float))),
            shape: Some(first.size()),
            pixels: Some(pixels),
        };
        self.write_event(&event);
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!("Failed to flush summaries to {}: {e}", self.path.display());
        }
    }
}

impl Drop for JsonlSummaryWriter {
    fn drop(&mut self) {
        SummarySink::flush(self);
    }
}

/// Opens the JSON-lines writer for `dir`, falling back to [`LogSummary`] when the directory
/// cannot be written.
pub fn open_summary_sink(dir: &Path) -> Box<dyn SummarySink> {
    match JsonlSummaryWriter::create(dir) {
        Ok(writer) => Box::new(writer),
        Err(e) => {
            warn!("Cannot write summaries to {}: {e}. Logging them instead", dir.display());
            Box::new(LogSummary)
        }
    }
}
