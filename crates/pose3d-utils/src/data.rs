use tch::{Kind, TchError, Tensor};

/// `BatchIter` walks a set of tensors sharing their first (sample) dimension and yields
/// aligned mini-batches of every tensor.
///
/// A dataset sample is a row of every tensor (image, pose, betas, 2D joints, ...), so each
/// batch is a `Vec<Tensor>` in the same order as the tensors handed to [`BatchIter::f_new`].
#[derive(Debug)]
pub struct BatchIter {
    tensors: Vec<Tensor>,
    batch_index: i64,
    batch_size: i64,
    total_size: i64,
    return_smaller_last_batch: bool,
}

impl BatchIter {
    /// Creates a new `BatchIter`.
    ///
    /// An error is returned if `tensors` is empty, if `batch_size` is not positive, or if
    /// the tensors disagree on their first dimension.
    pub fn f_new(tensors: &[Tensor], batch_size: i64) -> Result<BatchIter, TchError> {
        if batch_size <= 0 {
            return Err(TchError::Shape(format!("batch size must be positive, got {batch_size}")));
        }
        let total_size = match tensors.first() {
            Some(t) => t.size()[0],
            None => return Err(TchError::Shape("no tensors to batch".to_string())),
        };
        for (i, t) in tensors.iter().enumerate() {
            if t.size()[0] != total_size {
                return Err(TchError::Shape(format!(
                    "inconsistent sample count: tensor {} has {}, expected {}",
                    i,
                    t.size()[0],
                    total_size
                )));
            }
        }

        Ok(BatchIter {
            tensors: tensors.iter().map(|t| t.shallow_clone()).collect(),
            batch_index: 0,
            batch_size,
            total_size,
            return_smaller_last_batch: false,
        })
    }

    /// Shuffles the samples consistently across all tensors.
    ///
    /// The iterator still visits every sample once, only the grouping into batches changes.
    pub fn shuffle(&mut self) -> &mut BatchIter {
        let device = self.tensors[0].device();
        let index = Tensor::randperm(self.total_size, (Kind::Int64, device));
        self.tensors = self.tensors.iter().map(|t| t.index_select(0, &index)).collect();
        self.batch_index = 0;
        self
    }

    /// When set, returns the last batch even if it is smaller than the batch size.
    pub fn return_smaller_last_batch(&mut self) -> &mut BatchIter {
        self.return_smaller_last_batch = true;
        self
    }

    /// Number of samples covered by the iterator.
    pub fn total_size(&self) -> i64 {
        self.total_size
    }
}

impl Iterator for BatchIter {
    type Item = Vec<Tensor>;

    fn next(&mut self) -> Option<Self::Item> {
        let start = self.batch_index * self.batch_size;
        let end = (start + self.batch_size).min(self.total_size);
        let size = end - start;

        if size <= 0 || (!self.return_smaller_last_batch && size < self.batch_size) {
            return None;
        }

        self.batch_index += 1;
        Some(self.tensors.iter().map(|t| t.narrow(0, start, size)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::data::Iter2;
    use tch::Device;

    fn create_test_data(num_tensors: usize, size: i64) -> Vec<Tensor> {
        (0..num_tensors)
            .map(|i| Tensor::arange(size, (Kind::Float, Device::Cpu)).view([size, 1]) * (i as f64 + 1.0))
            .collect()
    }

    #[test]
    fn test_batch_iter_creation() {
        let tensors = create_test_data(3, 10);
        let iter = BatchIter::f_new(&tensors, 2).unwrap();
        assert_eq!(iter.total_size(), 10);

        assert!(BatchIter::f_new(&[], 2).is_err());
        assert!(BatchIter::f_new(&tensors, 0).is_err());

        let mut tensors = create_test_data(3, 10);
        tensors[1] = Tensor::arange(15, (Kind::Float, Device::Cpu)).view([15, 1]);
        assert!(BatchIter::f_new(&tensors, 2).is_err());
    }

    #[test]
    fn test_batch_iter_drops_partial_batch() {
        let tensors = create_test_data(2, 10);
        let batches: Vec<_> = BatchIter::f_new(&tensors, 3).unwrap().collect();

        assert_eq!(batches.len(), 3);
        for (i, batch) in batches.iter().enumerate() {
            assert_eq!(batch.len(), 2);
            assert_eq!(batch[0].size(), &[3, 1]);
            assert_eq!(batch[0].double_value(&[0, 0]), (i * 3) as f64);
            assert_eq!(batch[1].double_value(&[0, 0]), (i * 3) as f64 * 2.0);
        }
    }

    #[test]
    fn test_batch_iter_smaller_last_batch() {
        let tensors = create_test_data(2, 10);
        let mut iter = BatchIter::f_new(&tensors, 3).unwrap();
        iter.return_smaller_last_batch();
        let batches: Vec<_> = iter.collect();

        assert_eq!(batches.len(), 4);
        assert_eq!(batches.last().unwrap()[0].size(), &[1, 1]);
    }

    #[test]
    fn test_batch_iter_shuffle_keeps_rows_aligned() {
        let tensors = create_test_data(2, 10);
        let mut iter = BatchIter::f_new(&tensors, 2).unwrap();
        iter.shuffle();

        let mut all_elements = Vec::new();
        for batch in iter {
            assert!(batch[1].allclose(&(&batch[0] * 2.0), 1e-6, 1e-6, false));
            all_elements.extend(Vec::<f64>::try_from(&batch[0].view(-1).to_kind(Kind::Double)).unwrap());
        }
        all_elements.sort_by(|a, b| a.partial_cmp(b).unwrap());

        let expected: Vec<f64> = (0..10).map(|x| x as f64).collect();
        assert_eq!(all_elements, expected);
    }

    #[test]
    fn test_batch_iter_consistency_with_iter2() {
        let tensors = create_test_data(2, 10);

        tch::manual_seed(42);
        let mut batch_iter = BatchIter::f_new(&tensors, 3).unwrap();
        batch_iter.shuffle();

        tch::manual_seed(42);
        let mut normal_iter = Iter2::new(&tensors[0], &tensors[1], 3);
        normal_iter.shuffle();

        let ours: Vec<_> = batch_iter.collect();
        let theirs: Vec<_> = normal_iter.collect();

        assert_eq!(ours.len(), theirs.len());
        for (batch, (x, y)) in ours.iter().zip(theirs.iter()) {
            assert!(batch[0].allclose(x, 1e-5, 1e-8, false));
            assert!(batch[1].allclose(y, 1e-5, 1e-8, false));
        }
    }
}
