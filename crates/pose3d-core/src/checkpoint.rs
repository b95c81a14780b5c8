use std::fs;
use std::path::{Path, PathBuf};
use log::info;
use serde::{Deserialize, Serialize};
use tch::nn::VarStore;
use tch::Tensor;
use crate::error::CheckpointError;

const INDEX_FILE: &str = "checkpoint.json";

/// `checkpoint.json`: which snapshot is the latest, and every snapshot written so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointIndex {
    pub latest: Option<String>,
    pub latest_step: i64,
    pub all: Vec<String>,
}

/// A snapshot on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Encoder weights
    pub path: PathBuf,
    /// Discriminator weights, next to the encoder's
    pub discriminator_path: PathBuf,
    pub step: i64,
}

/// Whole-state snapshots named `<stem>-<step>.ot` in the directory of `saver_path`.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
    stem: String,
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> CheckpointError + '_ {
    move |source| CheckpointError::Io { path: path.to_path_buf(), source }
}

impl CheckpointStore {
    /// `saver_path` is a path prefix such as `/tmp/ckpts/3d_pose`.
    pub fn new<P: AsRef<Path>>(saver_path: P) -> Self {
        let saver_path = saver_path.as_ref();
        let dir = match saver_path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let stem = saver_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "model".to_string());
        Self { dir, stem }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn checkpoint_at(&self, file_name: &str, step: i64) -> Checkpoint {
        let path = self.dir.join(file_name);
        let discriminator_path = path.with_extension("disc.ot");
        Checkpoint { path, discriminator_path, step }
    }

    fn read_index(&self) -> Result<Option<CheckpointIndex>, CheckpointError> {
        let path = self.index_path();
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(io_error(&path))?;
        let index = serde_json::from_str(&content)
            .map_err(|source| CheckpointError::BadIndex { path: path.clone(), source })?;
        Ok(Some(index))
    }

    /// The most recent snapshot, if any was recorded.
    pub fn latest(&self) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self
            .read_index()?
            .and_then(|index| index.latest.map(|name| self.checkpoint_at(&name, index.latest_step))))
    }

    /// Writes the encoder (and discriminator) weights for `step`, then points the index at
    /// them. Every file goes through a temporary sibling and a rename.
    pub fn save(&self, encoder: &VarStore, discriminator: Option<&VarStore>, step: i64) -> Result<Checkpoint, CheckpointError> {
        fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;

        let file_name = format!("{}-{}.ot", self.stem, step);
        let checkpoint = self.checkpoint_at(&file_name, step);

        save_var_store(encoder, &checkpoint.path)?;
        if let Some(discriminator) = discriminator {
            save_var_store(discriminator, &checkpoint.discriminator_path)?;
        }

        let mut index = self.read_index().ok().flatten().unwrap_or_default();
        if !index.all.contains(&file_name) {
            index.all.push(file_name.clone());
        }
        index.latest = Some(file_name);
        index.latest_step = step;

        let index_path = self.index_path();
        let tmp = index_path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&index)
            .map_err(|source| CheckpointError::BadIndex { path: index_path.clone(), source })?;
        fs::write(&tmp, content).map_err(io_error(&tmp))?;
        fs::rename(&tmp, &index_path).map_err(io_error(&index_path))?;

        info!("Saved checkpoint {} at step {}", checkpoint.path.display(), step);
        Ok(checkpoint)
    }

    /// Loads the latest snapshot into the given var stores. Either every store is loaded or
    /// none is changed.
    ///
    /// `NotFound` when nothing was saved yet, `Corrupt` when a snapshot cannot be loaded.
    pub fn restore(&self, encoder: &mut VarStore, discriminator: Option<&mut VarStore>) -> Result<Checkpoint, CheckpointError> {
        let checkpoint = self.latest()?.ok_or_else(|| CheckpointError::NotFound(self.dir.clone()))?;

        let encoder_before = snapshot(encoder);
        if let Err(source) = encoder.load(&checkpoint.path) {
            roll_back(encoder, &encoder_before);
            return Err(CheckpointError::Corrupt { path: checkpoint.path.clone(), source });
        }

        if let Some(discriminator) = discriminator {
            if checkpoint.discriminator_path.exists() {
                let discriminator_before = snapshot(discriminator);
                if let Err(source) = discriminator.load(&checkpoint.discriminator_path) {
                    roll_back(discriminator, &discriminator_before);
                    roll_back(encoder, &encoder_before);
                    return Err(CheckpointError::Corrupt { path: checkpoint.discriminator_path.clone(), source });
                }
            }
        }
        Ok(checkpoint)
    }
}

fn snapshot(vs: &VarStore) -> Vec<(String, Tensor)> {
    tch::no_grad(|| vs.variables().into_iter().map(|(name, var)| (name, var.copy())).collect())
}

fn roll_back(vs: &VarStore, snapshot: &[(String, Tensor)]) {
    let variables = vs.variables();
    tch::no_grad(|| {
        for (name, saved) in snapshot {
            if let Some(var) = variables.get(name) {
                var.shallow_clone().copy_(saved);
            }
        }
    });
}

/// Saves a var store through a temporary file so readers never see a partial snapshot.
pub fn save_var_store(vs: &VarStore, path: &Path) -> Result<(), CheckpointError> {
    let tmp = path.with_extension("tmp");
    vs.save(&tmp)
        .map_err(|source| CheckpointError::Write { path: path.to_path_buf(), source })?;
    fs::rename(&tmp, path).map_err(io_error(path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{nn, Device, Kind};

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("pose3d-ckpt-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn store_with_weight(value: f64) -> VarStore {
        let vs = VarStore::new(Device::Cpu);
        let _ = vs.root().var("w", &[2, 2], nn::Init::Const(value));
        vs
    }

    #[test]
    fn test_empty_store_has_no_latest() {
        let dir = temp_dir("empty");
        let store = CheckpointStore::new(dir.join("3d_pose"));

        assert_eq!(store.latest().unwrap(), None);
        let mut vs = store_with_weight(0.0);
        assert!(matches!(store.restore(&mut vs, None), Err(CheckpointError::NotFound(_))));
    }

    #[test]
    fn test_save_then_restore_latest() {
        let dir = temp_dir("roundtrip");
        let store = CheckpointStore::new(dir.join("3d_pose"));

        store.save(&store_with_weight(1.0), None, 10).unwrap();
        let saved = store.save(&store_with_weight(2.0), Some(&store_with_weight(5.0)), 20).unwrap();
        assert_eq!(saved.path, dir.join("3d_pose-20.ot"));
        assert!(!dir.join("3d_pose-20.tmp").exists());

        let mut vs = store_with_weight(0.0);
        let mut disc = store_with_weight(0.0);
        let restored = store.restore(&mut vs, Some(&mut disc)).unwrap();

        assert_eq!(restored.step, 20);
        let w = vs.variables()["w"].shallow_clone();
        assert_eq!(w.sum(Kind::Float).double_value(&[]), 8.0);
        assert_eq!(disc.variables()["w"].sum(Kind::Float).double_value(&[]), 20.0);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_corrupt_snapshot_is_reported() {
        let dir = temp_dir("corrupt");
        let store = CheckpointStore::new(dir.join("3d_pose"));
        let saved = store.save(&store_with_weight(1.0), None, 3).unwrap();
        fs::write(&saved.path, b"not a tensor file").unwrap();

        let mut vs = store_with_weight(0.0);
        assert!(matches!(store.restore(&mut vs, None), Err(CheckpointError::Corrupt { .. })));
        assert_eq!(vs.variables()["w"].sum(Kind::Float).double_value(&[]), 0.0);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_failed_discriminator_load_leaves_encoder_untouched() {
        let dir = temp_dir("partial");
        let store = CheckpointStore::new(dir.join("3d_pose"));
        let saved = store.save(&store_with_weight(2.0), Some(&store_with_weight(5.0)), 7).unwrap();
        fs::write(&saved.discriminator_path, b"truncated").unwrap();

        let mut vs = store_with_weight(0.5);
        let mut disc = store_with_weight(0.25);
        let result = store.restore(&mut vs, Some(&mut disc));

        assert!(matches!(result, Err(CheckpointError::Corrupt { path, .. }) if path == saved.discriminator_path));
        assert_eq!(vs.variables()["w"].sum(Kind::Float).double_value(&[]), 2.0);
        assert_eq!(disc.variables()["w"].sum(Kind::Float).double_value(&[]), 1.0);

        fs::remove_dir_all(&dir).unwrap();
    }
}
