pub mod body_models;
pub mod constants;
pub mod lbs;
pub mod model;

pub use body_models::{BodyModel, BodyModelOutput, SMPL};
pub use model::data::{DataModel, SmplError};
