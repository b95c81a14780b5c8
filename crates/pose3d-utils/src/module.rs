use tch::{Kind, Tensor};

/// Inputs and outputs a `ModuleMT` can consume and produce.
pub trait TensorCollection: Send {
    /// Calculates the accuracy of predicted logits against target class indices.
    fn accuracy_for_logits(&self, targets: &Self) -> Tensor;
}

impl TensorCollection for Tensor {
    fn accuracy_for_logits(&self, targets: &Self) -> Tensor {
        self.argmax(-1, false).eq_tensor(targets).to_kind(Kind::Float).mean(Kind::Float)
    }
}

/// `ModuleMT` is a `tch-rs` `ModuleT` that is generic over its input and output types
pub trait ModuleMT<Input, Output>: Send
where
    Input: TensorCollection,
    Output: TensorCollection,
{
    /// Performs a forward pass through the module.
    ///
    /// # Arguments
    ///
    /// * `xs` - The input tensor collection.
    /// * `train` - Whether the module is in training mode.
    ///
    /// # Returns
    ///
    /// The output tensor collection.
    fn forward_mt(&self, xs: Input, train: bool) -> Output;
}
