use log::debug;
use tch::{Device, Kind};
use tch::nn::VarStore;

pub trait ListTensors {
    /// Logs every variable of the store at debug level.
    fn list_tensors(&self);
    fn get_tensor_info(&self) -> Vec<TensorInfo>;
    /// Total number of scalar parameters held by the store.
    fn num_parameters(&self) -> i64;
}

impl ListTensors for VarStore {
    fn list_tensors(&self) {
        for info in self.get_tensor_info() {
            debug!(
                "{}: shape {:?}, {:?}, {:?}, requires grad: {}",
                info.name, info.shape, info.device, info.kind, info.requires_grad
            );
        }
    }

    fn get_tensor_info(&self) -> Vec<TensorInfo> {
        let mut infos: Vec<TensorInfo> = self.variables().into_iter().map(|(name, tensor)| {
            TensorInfo {
                name,
                shape: tensor.size(),
                device: tensor.device(),
                kind: tensor.kind(),
                requires_grad: tensor.requires_grad(),
            }
        }).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    fn num_parameters(&self) -> i64 {
        self.trainable_variables().iter().map(|t| t.numel() as i64).sum()
    }
}

#[derive(Debug)]
pub struct TensorInfo {
    pub name: String,
    pub shape: Vec<i64>,
    pub device: Device,
    pub kind: Kind,
    pub requires_grad: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::nn;

    #[test]
    fn test_tensor_info_is_sorted_and_counted() {
        let vs = VarStore::new(Device::Cpu);
        let root = vs.root();
        let _fc = nn::linear(&root / "head", 4, 2, Default::default());
        let _w = root.zeros("alpha", &[3]);

        let infos = vs.get_tensor_info();
        let names: Vec<_> = infos.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "head.bias", "head.weight"]);
        assert_eq!(vs.num_parameters(), 3 + 4 * 2 + 2);
    }
}
