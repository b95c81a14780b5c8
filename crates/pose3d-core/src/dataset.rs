use std::path::Path;
use log::info;
use tch::{Device, Tensor};
use pose3d_smpl::constants::{NUM_BETAS, NUM_JOINTS, POSE_DIM};
use pose3d_utils::data::BatchIter;
use crate::error::DatasetError;

/// One mini-batch of training samples.
#[derive(Debug)]
pub struct Batch {
    /// `[B, H, W, C]`
    pub image: Tensor,
    /// Extra per-pixel inputs `[B, H, W, A]`
    pub aux: Option<Tensor>,
    /// `[B, 72]`
    pub pose: Tensor,
    /// `[B, 10]`
    pub betas: Tensor,
    /// Image-space joints `[B, 24, 2]`
    pub joints2d: Tensor,
    /// Per-sample rotation about the vertical axis `[B]`
    pub zrot: Option<Tensor>,
}

impl Batch {
    pub fn size(&self) -> i64 {
        self.image.size()[0]
    }

    /// Image with any auxiliary channels appended, as fed to the encoder.
    pub fn encoder_input(&self) -> Tensor {
        match &self.aux {
            Some(aux) => Tensor::cat(&[&self.image, aux], 3),
            None => self.image.shallow_clone(),
        }
    }

    pub fn to_device(&self, device: Device) -> Batch {
        Batch {
            image: self.image.to_device(device),
            aux: self.aux.as_ref().map(|t| t.to_device(device)),
            pose: self.pose.to_device(device),
            betas: self.betas.to_device(device),
            joints2d: self.joints2d.to_device(device),
            zrot: self.zrot.as_ref().map(|t| t.to_device(device)),
        }
    }
}

/// A finite stream of samples. Each call to [`PoseDataset::batches`] starts one epoch; the
/// iterator ending is the end of that epoch.
pub trait PoseDataset {
    fn len(&self) -> i64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn batches(&self, batch_size: i64, shuffle: bool) -> Result<Box<dyn Iterator<Item = Batch> + '_>, DatasetError>;
}

/// Samples held in memory as stacked tensors.
#[derive(Debug)]
pub struct TensorDataset {
    images: Tensor,
    aux: Option<Tensor>,
    poses: Tensor,
    betas: Tensor,
    joints2d: Tensor,
    zrot: Option<Tensor>,
}

fn check_shape(tensor: &Tensor, name: &'static str, expected: &[i64]) -> Result<(), DatasetError> {
    let actual = tensor.size();
    let matches = actual.len() == expected.len()
        && actual.iter().zip(expected).all(|(&a, &e)| e < 0 || a == e);
    if matches {
        Ok(())
    } else {
        Err(DatasetError::BadShape { name, actual, expected: format!("{expected:?}") })
    }
}

impl TensorDataset {
    pub fn new(
        images: Tensor,
        aux: Option<Tensor>,
        poses: Tensor,
        betas: Tensor,
        joints2d: Tensor,
        zrot: Option<Tensor>,
    ) -> Result<Self, DatasetError> {
        check_shape(&images, "images", &[-1, -1, -1, -1])?;
        let img = images.size();
        let n = img[0];
        if let Some(aux) = &aux {
            check_shape(aux, "aux", &[n, img[1], img[2], -1])?;
        }
        check_shape(&poses, "poses", &[n, POSE_DIM])?;
        check_shape(&betas, "betas", &[n, NUM_BETAS])?;
        check_shape(&joints2d, "joints2d", &[n, NUM_JOINTS, 2])?;
        if let Some(zrot) = &zrot {
            check_shape(zrot, "zrot", &[n])?;
        }
        Ok(Self { images, aux, poses, betas, joints2d, zrot })
    }

    /// Loads a multi-tensor file with `images`, `poses`, `betas`, `joints2d` and optionally
    /// `aux` and `zrot`.
    pub fn load<P: AsRef<Path>>(path: P, device: Device) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        let mut tensors = Tensor::load_multi_with_device(path, device)?;
        let mut take = |name: &'static str| {
            tensors
                .iter()
                .position(|(n, _)| n == name)
                .map(|i| tensors.swap_remove(i).1)
        };

        let images = take("images").ok_or(DatasetError::MissingTensor("images"))?;
        let poses = take("poses").ok_or(DatasetError::MissingTensor("poses"))?;
        let betas = take("betas").ok_or(DatasetError::MissingTensor("betas"))?;
        let joints2d = take("joints2d").ok_or(DatasetError::MissingTensor("joints2d"))?;
        let aux = take("aux");
        let zrot = take("zrot");

        let dataset = Self::new(images, aux, poses, betas, joints2d, zrot)?;
        info!("Loaded {} samples from {}", dataset.len(), path.display());
        Ok(dataset)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), DatasetError> {
        let mut named = vec![
            ("images", self.images.shallow_clone()),
            ("poses", self.poses.shallow_clone()),
            ("betas", self.betas.shallow_clone()),
            ("joints2d", self.joints2d.shallow_clone()),
        ];
        if let Some(aux) = &self.aux {
            named.push(("aux", aux.shallow_clone()));
        }
        if let Some(zrot) = &self.zrot {
            named.push(("zrot", zrot.shallow_clone()));
        }
        Tensor::save_multi(&named, path)?;
        Ok(())
    }

    /// Image geometry `(height, width, channels + aux channels)`.
    pub fn input_shape(&self) -> (i64, i64, i64) {
        let img = self.images.size();
        let aux = self.aux.as_ref().map_or(0, |a| a.size()[3]);
        (img[1], img[2], img[3] + aux)
    }
}

impl PoseDataset for TensorDataset {
    fn len(&self) -> i64 {
        self.images.size()[0]
    }

    fn batches(&self, batch_size: i64, shuffle: bool) -> Result<Box<dyn Iterator<Item = Batch> + '_>, DatasetError> {
        let mut tensors = vec![
            self.images.shallow_clone(),
            self.poses.shallow_clone(),
            self.betas.shallow_clone(),
            self.joints2d.shallow_clone(),
        ];
        let aux_index = self.aux.as_ref().map(|aux| {
            tensors.push(aux.shallow_clone());
            tensors.len() - 1
        });
        let zrot_index = self.zrot.as_ref().map(|zrot| {
            tensors.push(zrot.shallow_clone());
            tensors.len() - 1
        });

        let mut iter = BatchIter::f_new(&tensors, batch_size)?;
        iter.return_smaller_last_batch();
        if shuffle {
            iter.shuffle();
        }

        Ok(Box::new(iter.map(move |t| Batch {
            image: t[0].shallow_clone(),
            pose: t[1].shallow_clone(),
            betas: t[2].shallow_clone(),
            joints2d: t[3].shallow_clone(),
            aux: aux_index.map(|i| t[i].shallow_clone()),
            zrot: zrot_index.map(|i| t[i].shallow_clone()),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Kind;

    fn synthetic(n: i64, with_aux: bool) -> TensorDataset {
        let opts = (Kind::Float, Device::Cpu);
        TensorDataset::new(
            Tensor::rand(&[n, 8, 6, 3], opts),
            with_aux.then(|| Tensor::rand(&[n, 8, 6, 2], opts)),
            Tensor::arange(n, opts).view([n, 1]).expand([n, 72], false).contiguous(),
            Tensor::zeros(&[n, 10], opts),
            Tensor::zeros(&[n, 24, 2], opts),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_epoch_covers_every_sample_once() {
        let dataset = synthetic(10, false);
        let batches: Vec<Batch> = dataset.batches(4, true).unwrap().collect();

        assert_eq!(batches.iter().map(Batch::size).collect::<Vec<_>>(), vec![4, 4, 2]);
        let mut ids: Vec<i64> = batches
            .iter()
            .flat_map(|b| Vec::<f32>::try_from(b.pose.select(1, 0)).unwrap())
            .map(|v| v as i64)
            .collect();
        ids.sort();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_aux_is_appended_to_channels() {
        let dataset = synthetic(3, true);
        assert_eq!(dataset.input_shape(), (8, 6, 5));

        let batch = dataset.batches(3, false).unwrap().next().unwrap();
        assert_eq!(batch.encoder_input().size(), &[3, 8, 6, 5]);
    }

    #[test]
    fn test_inconsistent_shapes_are_rejected() {
        let opts = (Kind::Float, Device::Cpu);
        let result = TensorDataset::new(
            Tensor::rand(&[4, 8, 6, 3], opts),
            None,
            Tensor::zeros(&[4, 72], opts),
            Tensor::zeros(&[3, 10], opts),
            Tensor::zeros(&[4, 24, 2], opts),
            None,
        );
        assert!(matches!(result, Err(DatasetError::BadShape { name: "betas", .. })));
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("pose3d-dataset-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("samples.ot");

        let dataset = synthetic(5, true);
        dataset.save(&path).unwrap();
        let loaded = TensorDataset::load(&path, Device::Cpu).unwrap();

        assert_eq!(loaded.len(), 5);
        assert_eq!(loaded.input_shape(), dataset.input_shape());
        assert!(loaded.poses.equal(&dataset.poses));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
