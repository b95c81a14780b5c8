use std::cell::RefCell;
use std::path::Path;
use log::debug;
use tch::{Device, Tensor};
use pose3d_utils::tensor::validate_tensor;
use crate::constants::{NUM_BETAS, POSE_DIM};
use crate::lbs::lbs;
use crate::model::data::{DataModel, SmplError};

/// Result of evaluating a body model.
#[derive(Debug)]
pub struct BodyModelOutput {
    /// Skinned mesh vertices `[B, V, 3]`, only when skinning was requested
    pub vertices: Option<Tensor>,
    /// Posed joints `[B, J, 3]`
    pub joints: Tensor,
}

/// A parametric body model: `(betas, pose) -> (mesh, joints)`.
///
/// Implementations must be pure per call apart from remembering the joints of the most
/// recent evaluation.
pub trait BodyModel {
    /// Evaluates the model for `betas` `[B, NB]` and axis-angle `pose` `[B, J * 3]`.
    fn forward(&self, betas: &Tensor, pose: &Tensor, get_skin: bool) -> BodyModelOutput;

    /// Joints computed by the most recent [`BodyModel::forward`] call.
    fn last_joints(&self) -> Option<Tensor>;

    /// Mesh faces `[F, 3]`, when the model has a mesh topology.
    fn faces(&self) -> Option<Tensor> {
        None
    }
}

/// The SMPL model struct.
pub struct SMPL {
    /// The SMPL model data.
    pub model: DataModel,

    /// The number of shape parameters (betas) used in the model.
    pub num_betas: i64,

    /// The device the tensors are on
    pub device: Device,

    /// Joints of the latest evaluation
    last_joints: RefCell<Option<Tensor>>,
}

impl BodyModel for SMPL {
    fn forward(&self, betas: &Tensor, pose: &Tensor, get_skin: bool) -> BodyModelOutput {
        validate_tensor(betas, &[-1, self.num_betas], "betas");
        validate_tensor(pose, &[-1, POSE_DIM], "pose");

        debug!("SMPL forward: betas {:?}, pose {:?}", betas.size(), pose.size());

        let (vertices, joints) = lbs(
            betas,
            pose,
            &self.model.v_template,
            &self.model.shapedirs,
            &self.model.posedirs,
            &self.model.j_regressor,
            &self.model.parents,
            &self.model.weights,
            get_skin,
        );

        *self.last_joints.borrow_mut() = Some(joints.shallow_clone());
        BodyModelOutput { vertices, joints }
    }

    fn last_joints(&self) -> Option<Tensor> {
        self.last_joints.borrow().as_ref().map(|j| j.shallow_clone())
    }

    fn faces(&self) -> Option<Tensor> {
        Some(self.model.f.shallow_clone())
    }
}

impl SMPL {
    /// Creates an SMPL model from loaded model data.
    pub fn new(model: DataModel, num_betas: i64, device: Device) -> Self {
        let num_betas = num_betas.min(model.shapedirs.size()[2]);
        let model = DataModel {
            v_template: model.v_template.to_device(device),
            shapedirs: model.shapedirs.to_device(device),
            posedirs: model.posedirs.to_device(device),
            j_regressor: model.j_regressor.to_device(device),
            weights: model.weights.to_device(device),
            f: model.f.to_device(device),
            parents: model.parents,
        };

        SMPL {
            model,
            num_betas,
            device,
            last_joints: RefCell::new(None),
        }
    }

    /// Loads an SMPL model file, using the regressor's 10 shape coefficients.
    pub fn load<P: AsRef<Path>>(path: P, device: Device) -> Result<Self, SmplError> {
        let model = DataModel::load_from_file(path, device)?;
        Ok(Self::new(model, NUM_BETAS, device))
    }
}

