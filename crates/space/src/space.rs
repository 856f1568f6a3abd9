use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use crate::errors::{Result, SpaceError};
use crate::{Sampling, XType};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

type RngRef<R> = Arc<RwLock<R>>;

/// The search space of an optimization problem: an ordered list of named typed variables.
///
/// Clones share the same random generator.
#[derive(Clone, Debug)]
pub struct SearchSpace {
    xtypes: Vec<XType>,
    var_names: Vec<String>,
    rng: RngRef<Xoshiro256Plus>,
}

impl SearchSpace {
    /// Constructor given the variable types, variables are named `x0`, `x1`, ...
    pub fn new(xtypes: &[XType]) -> Result<Self> {
        if xtypes.is_empty() {
            return Err(SpaceError::InvalidXType(
                "search space should have at least one variable".to_string(),
            ));
        }
        xtypes.iter().try_for_each(|xtype| xtype.check())?;
        Ok(SearchSpace {
            xtypes: xtypes.to_vec(),
            var_names: (0..xtypes.len()).map(|i| format!("x{i}")).collect(),
            rng: Arc::new(RwLock::new(Xoshiro256Plus::from_entropy())),
        })
    }

    /// Constructor of a continuous space given a (nx, 2) matrix \[\[lower bound, upper bound\], ...\]
    pub fn continuous(xlimits: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Result<Self> {
        if xlimits.ncols() != 2 {
            return Err(SpaceError::InvalidLimits(format!(
                "xlimits must have 2 columns (lower, upper), got {}",
                xlimits.ncols()
            )));
        }
        let xtypes: Vec<XType> = xlimits
            .rows()
            .into_iter()
            .map(|row| XType::Float(row[0], row[1]))
            .collect();
        Self::new(&xtypes)
    }

    /// Sets variable names (one per variable, all distinct)
    pub fn with_names<S: Into<String>>(mut self, names: impl IntoIterator<Item = S>) -> Result<Self> {
        let names: Vec<String> = names.into_iter().map(|n| n.into()).collect();
        if names.len() != self.xtypes.len() {
            return Err(SpaceError::InvalidNames(format!(
                "expected {} names, got {}",
                self.xtypes.len(),
                names.len()
            )));
        }
        if names.iter().collect::<HashSet<_>>().len() != names.len() {
            return Err(SpaceError::InvalidNames(format!(
                "names should be unique, got {names:?}"
            )));
        }
        self.var_names = names;
        Ok(self)
    }

    /// Sets the random generator seed used for sampling, for reproducibility
    pub fn with_seed(self, seed: u64) -> Self {
        SearchSpace {
            rng: Arc::new(RwLock::new(Xoshiro256Plus::seed_from_u64(seed))),
            ..self
        }
    }

    /// Number of variables
    pub fn dim(&self) -> usize {
        self.xtypes.len()
    }

    /// Variable types
    pub fn xtypes(&self) -> &[XType] {
        &self.xtypes
    }

    /// Variable names in declaration order
    pub fn var_names(&self) -> &[String] {
        &self.var_names
    }

    /// A (nx, 2) matrix \[\[lower bound, upper bound\], ...\]
    pub fn bounds(&self) -> Array2<f64> {
        let mut xlimits = Array2::zeros((self.dim(), 2));
        for (mut row, xtype) in xlimits.rows_mut().into_iter().zip(&self.xtypes) {
            let (lb, ub) = xtype.bounds();
            row[0] = lb;
            row[1] = ub;
        }
        xlimits
    }

    /// Mask of continuous variables
    pub fn continuous_mask(&self) -> Vec<bool> {
        self.xtypes.iter().map(XType::is_float).collect()
    }

    /// Mask of ordinal variables (integers or ordered levels)
    pub fn ordinal_mask(&self) -> Vec<bool> {
        self.xtypes.iter().map(XType::is_ordinal).collect()
    }

    /// Mask of categorical variables
    pub fn categorical_mask(&self) -> Vec<bool> {
        self.xtypes.iter().map(XType::is_categorical).collect()
    }

    /// Whether every variable is continuous
    pub fn is_continuous(&self) -> bool {
        self.xtypes.iter().all(XType::is_float)
    }

    /// Draws `ns` points, returned as a (ns, nx) matrix
    pub fn sample(&self, ns: usize, method: Sampling) -> Array2<f64> {
        let mut unit = {
            let mut rng = self.rng.write().unwrap();
            method.normalized_sample(ns, self.dim(), &mut *rng)
        };
        for (mut col, xtype) in unit.columns_mut().into_iter().zip(&self.xtypes) {
            col.mapv_inplace(|u| xtype.from_unit(u));
        }
        unit
    }

    /// Projects a point onto the space: values are clipped within bounds and
    /// discrete components are set to their closest admissible value
    pub fn round(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> Array1<f64> {
        x.iter()
            .zip(&self.xtypes)
            .map(|(&v, xtype)| xtype.round(v))
            .collect()
    }

    /// Whether `x` is a point of the space
    pub fn contains(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix1>) -> bool {
        x.len() == self.dim()
            && x.iter()
                .zip(&self.xtypes)
                .all(|(&v, xtype)| xtype.contains(v))
    }

    /// Runs `f` with the random generator of the space
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut Xoshiro256Plus) -> T) -> T {
        let mut rng = self.rng.write().unwrap();
        f(&mut rng)
    }
}
