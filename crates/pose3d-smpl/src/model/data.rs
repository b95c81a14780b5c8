use std::collections::HashMap;
use std::path::Path;
use log::{debug, info};
use tch::{Device, Kind, TchError, Tensor};
use thiserror::Error;
use crate::constants::{NUM_JOINTS, SMPL_PARENTS};

#[derive(Debug, Error)]
pub enum SmplError {
    #[error("SMPL model file {path} is missing tensor `{name}`")]
    MissingTensor { path: String, name: String },

    #[error("SMPL tensor `{name}` has shape {actual:?}, expected {expected}")]
    BadShape { name: String, actual: Vec<i64>, expected: String },

    #[error(transparent)]
    Tch(#[from] TchError),
}

/// The arrays making up an SMPL body model.
#[derive(Debug)]
pub struct DataModel {
    /// Template mesh, `[V, 3]`
    pub v_template: Tensor,
    /// Shape blend shapes, `[V, 3, NB]`
    pub shapedirs: Tensor,
    /// Pose blend shapes, `[V, 3, (J - 1) * 9]`
    pub posedirs: Tensor,
    /// Joint regressor, `[J, V]`
    pub j_regressor: Tensor,
    /// Skinning weights, `[V, J]`
    pub weights: Tensor,
    /// Mesh faces, `[F, 3]`
    pub f: Tensor,
    /// Kinematic tree, `parents[0] == -1`
    pub parents: Vec<i64>,
}

impl DataModel {
    /// Loads a model saved with [`DataModel::save_to_file`] (or any tch multi-tensor file
    /// with the same tensor names).
    pub fn load_from_file<P: AsRef<Path>>(path: P, device: Device) -> Result<Self, SmplError> {
        let path_str = path.as_ref().display().to_string();
        let mut named: HashMap<String, Tensor> = Tensor::load_multi_with_device(path.as_ref(), device)?
            .into_iter()
            .collect();

        let mut take = |name: &str| -> Result<Tensor, SmplError> {
            named.remove(name).ok_or_else(|| SmplError::MissingTensor {
                path: path_str.clone(),
                name: name.to_string(),
            })
        };

        let v_template = take("v_template")?.to_kind(Kind::Float);
        let shapedirs = take("shapedirs")?.to_kind(Kind::Float);
        let posedirs = take("posedirs")?.to_kind(Kind::Float);
        let j_regressor = take("j_regressor")?.to_kind(Kind::Float);
        let weights = take("weights")?.to_kind(Kind::Float);
        let f = take("f")?.to_kind(Kind::Int64);
        let kintree_table = take("kintree_table")?.to_kind(Kind::Int64);

        let parents = parents_from_kintree(&kintree_table)?;
        let model = Self { v_template, shapedirs, posedirs, j_regressor, weights, f, parents };
        model.check_shapes()?;

        info!("Loaded SMPL model from {}", path_str);
        model.log_tensor_sizes();
        Ok(model)
    }

    /// Saves the model arrays as a tch multi-tensor file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), SmplError> {
        let parents: Vec<i64> = self.parents.clone();
        let num_joints = parents.len() as i64;
        let children: Vec<i64> = (0..num_joints).collect();
        let kintree_table = Tensor::cat(&[
            Tensor::from_slice(&parents).view([1, num_joints]),
            Tensor::from_slice(&children).view([1, num_joints]),
        ], 0);

        Tensor::save_multi(&[
            ("v_template", &self.v_template),
            ("shapedirs", &self.shapedirs),
            ("posedirs", &self.posedirs),
            ("j_regressor", &self.j_regressor),
            ("weights", &self.weights),
            ("f", &self.f),
            ("kintree_table", &kintree_table),
        ], path.as_ref())?;
        Ok(())
    }

    /// A randomly initialised model with the SMPL kinematic tree and `num_verts` vertices.
    ///
    /// Skinning weights and the joint regressor are proper convex combinations, so the
    /// result behaves like a (strange looking) body model. Useful for tests and dry runs
    /// without the licensed SMPL files.
    pub fn synthetic(num_verts: i64, num_betas: i64, device: Device) -> Self {
        let opts = (Kind::Float, device);
        let v_template = Tensor::rand(&[num_verts, 3], opts) - 0.5;
        let shapedirs = Tensor::randn(&[num_verts, 3, num_betas], opts) * 0.01;
        let posedirs = Tensor::randn(&[num_verts, 3, (NUM_JOINTS - 1) * 9], opts) * 0.001;
        let j_regressor = Tensor::rand(&[NUM_JOINTS, num_verts], opts);
        let j_regressor = &j_regressor / j_regressor.sum_dim_intlist(&[1i64][..], true, Kind::Float);
        let weights = (Tensor::randn(&[num_verts, NUM_JOINTS], opts) * 4.0).softmax(1, Kind::Float);
        let f = Tensor::randint(num_verts, &[2 * num_verts, 3], (Kind::Int64, device));

        Self {
            v_template,
            shapedirs,
            posedirs,
            j_regressor,
            weights,
            f,
            parents: SMPL_PARENTS.to_vec(),
        }
    }

    pub fn num_verts(&self) -> i64 {
        self.v_template.size()[0]
    }

    pub fn num_joints(&self) -> i64 {
        self.j_regressor.size()[0]
    }

    fn check_shapes(&self) -> Result<(), SmplError> {
        let v = self.num_verts();
        let j = self.num_joints();
        let expect = |name: &str, t: &Tensor, dims: &[i64]| -> Result<(), SmplError> {
            let actual = t.size();
            let matches = actual.len() == dims.len()
                && actual.iter().zip(dims.iter()).all(|(&a, &d)| d < 0 || a == d);
            if matches {
                Ok(())
            } else {
                Err(SmplError::BadShape {
                    name: name.to_string(),
                    actual,
                    expected: format!("{dims:?}"),
                })
            }
        };

        expect("v_template", &self.v_template, &[v, 3])?;
        expect("shapedirs", &self.shapedirs, &[v, 3, -1])?;
        expect("posedirs", &self.posedirs, &[v, 3, (j - 1) * 9])?;
        expect("weights", &self.weights, &[v, j])?;
        expect("f", &self.f, &[-1, 3])?;
        if self.parents.len() as i64 != j {
            return Err(SmplError::BadShape {
                name: "kintree_table".to_string(),
                actual: vec![2, self.parents.len() as i64],
                expected: format!("[2, {j}]"),
            });
        }
        Ok(())
    }

    pub fn log_tensor_sizes(&self) {
        debug!("SMPL Data Contents:");
        debug!("v_template: {:?}", self.v_template.size());
        debug!("shapedirs: {:?}", self.shapedirs.size());
        debug!("posedirs: {:?}", self.posedirs.size());
        debug!("j_regressor: {:?}", self.j_regressor.size());
        debug!("weights: {:?}", self.weights.size());
        debug!("f: {:?}", self.f.size());
        debug!("parents: {:?}", self.parents);
    }
}

/// The first row of the kintree table holds the parents; the root's entry is either -1 or
/// the unsigned wrap-around value the SMPL pickles store.
fn parents_from_kintree(kintree_table: &Tensor) -> Result<Vec<i64>, SmplError> {
    let size = kintree_table.size();
    if size.len() != 2 || size[0] != 2 {
        return Err(SmplError::BadShape {
            name: "kintree_table".to_string(),
            actual: size,
            expected: "[2, J]".to_string(),
        });
    }
    let row = Vec::<i64>::try_from(&kintree_table.get(0))?;
    Ok(row
        .into_iter()
        .enumerate()
        .map(|(i, p)| if i == 0 || p < 0 || p >= size[1] { -1 } else { p })
        .collect())
}
