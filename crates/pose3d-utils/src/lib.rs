use crate::module::ModuleMT;

pub mod module;
pub mod tensor;
pub mod data;
pub mod var_store;
pub mod rotation;

/// A network that maps a batch of tensors to a batch of tensors, i.e. the pose encoder
/// (`image -> [B, 79]`) or the pose discriminator (`pose -> [B, 2]`)
pub type Network = dyn ModuleMT<tch::Tensor, tch::Tensor>;
