use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::errors::{OptimError, Result};
use finitediff::FiniteDiff;
use ndarray::{Array1, ArrayBase, Axis, Data, Ix2};
use serde::{Deserialize, Serialize};

/// An objective function `f(x)`
pub type ObjFn = dyn Fn(&[f64]) -> f64 + Send + Sync;
/// The gradient of an objective function
pub type GradFn = dyn Fn(&[f64]) -> Vec<f64> + Send + Sync;

/// A shareable handle on the objective function and its optional gradient.
///
/// When no gradient is given, the gradient-box optimizer falls back on
/// central finite differences.
#[derive(Clone)]
pub struct Objective {
    fun: Arc<ObjFn>,
    grad: Option<Arc<GradFn>>,
}

impl fmt::Debug for Objective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Objective")
            .field("gradient", &self.grad.is_some())
            .finish()
    }
}

impl Objective {
    /// Constructor given the function
    pub fn new(fun: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) -> Self {
        Objective {
            fun: Arc::new(fun),
            grad: None,
        }
    }

    /// Sets the analytic gradient
    pub fn with_gradient(mut self, grad: impl Fn(&[f64]) -> Vec<f64> + Send + Sync + 'static) -> Self {
        self.grad = Some(Arc::new(grad));
        self
    }

    /// Whether an analytic gradient is available
    pub fn has_gradient(&self) -> bool {
        self.grad.is_some()
    }

    /// Evaluates f(x)
    pub fn value(&self, x: &[f64]) -> f64 {
        (self.fun)(x)
    }

    /// Evaluates the gradient of f at x
    pub fn gradient(&self, x: &[f64]) -> Vec<f64> {
        match &self.grad {
            Some(grad) => grad(x),
            None => {
                let f = |x: &Vec<f64>| -> f64 { (self.fun)(x.as_slice()) };
                x.to_vec().central_diff(&f)
            }
        }
    }

    /// Evaluates f on each row of `x`
    pub fn values(&self, x: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Array1<f64> {
        x.map_axis(Axis(1), |row| self.value(&row.to_vec()))
    }
}

/// Format of the points given to constraint functions
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvalType {
    /// Points are given as a vector ordered as the search space variables
    #[default]
    List,
    /// Points are given as a map from variable names to values
    Dict,
}

/// A constraint function taking points as positional vectors
pub type CstrFn = Arc<dyn Fn(&[f64]) -> Vec<f64> + Send + Sync>;
/// A constraint function taking points as maps from variable names to values
pub type NamedCstrFn = Arc<dyn Fn(&BTreeMap<String, f64>) -> Vec<f64> + Send + Sync>;

/// A vector-valued constraint function
#[derive(Clone)]
pub enum Constraint {
    /// Used with [`EvalType::List`]
    Positional(CstrFn),
    /// Used with [`EvalType::Dict`]
    Named(NamedCstrFn),
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Constraint::Positional(_) => write!(f, "Constraint::Positional"),
            Constraint::Named(_) => write!(f, "Constraint::Named"),
        }
    }
}

impl Constraint {
    /// Constraint taking positional vectors
    pub fn positional(cstr: impl Fn(&[f64]) -> Vec<f64> + Send + Sync + 'static) -> Self {
        Constraint::Positional(Arc::new(cstr))
    }

    /// Constraint taking named variables
    pub fn named(cstr: impl Fn(&BTreeMap<String, f64>) -> Vec<f64> + Send + Sync + 'static) -> Self {
        Constraint::Named(Arc::new(cstr))
    }

    /// Returns the positional form of the constraint, named constraints being wrapped
    /// to receive variables named after `var_names`
    pub fn resolve(self, eval_type: EvalType, var_names: &[String]) -> Result<CstrFn> {
        match (self, eval_type) {
            (Constraint::Positional(cstr), EvalType::List) => Ok(cstr),
            (Constraint::Named(cstr), EvalType::Dict) => {
                let names = var_names.to_vec();
                Ok(Arc::new(move |x: &[f64]| {
                    let named: BTreeMap<String, f64> =
                        names.iter().cloned().zip(x.iter().copied()).collect();
                    cstr(&named)
                }))
            }
            (cstr, eval_type) => Err(OptimError::InvalidConfig(format!(
                "{cstr:?} cannot be evaluated with {eval_type:?}"
            ))),
        }
    }
}

/// Equality constraints `h(x) = 0` and inequality constraints `g(x) <= 0`
#[derive(Clone, Default)]
pub struct Constraints {
    eq: Option<CstrFn>,
    ineq: Option<CstrFn>,
}

impl fmt::Debug for Constraints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constraints")
            .field("eq", &self.eq.is_some())
            .field("ineq", &self.ineq.is_some())
            .finish()
    }
}

impl Constraints {
    /// Constructor given optional equality and inequality constraints
    pub fn new(eq: Option<CstrFn>, ineq: Option<CstrFn>) -> Self {
        Constraints { eq, ineq }
    }

    /// Whether no constraint is given
    pub fn is_empty(&self) -> bool {
        self.eq.is_none() && self.ineq.is_none()
    }

    /// Total violation at `x`: `sum |h(x)| + sum max(g(x), 0)`, zero when `x` is feasible
    pub fn violation(&self, x: &[f64]) -> f64 {
        let eq: f64 = self
            .eq
            .as_ref()
            .map_or(0., |h| h(x).iter().map(|v| v.abs()).sum());
        let ineq: f64 = self
            .ineq
            .as_ref()
            .map_or(0., |g| g(x).iter().map(|v| v.max(0.)).sum());
        eq + ineq
    }
}

/// Optimizer run from each restart of the multistart optimization
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptimizerKind {
    /// Bound constrained gradient-based optimizer (SLSQP), continuous variables only
    #[default]
    GradientBox,
    /// (1+1)-Cholesky-CMA-ES, handles constraints
    CovarianceAdaptation,
    /// Mixed-integer evolution strategy, handles constraints and any variable types
    MixedInteger,
}

/// Reasons why an optimizer stopped, each given with its diagnostic value
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminationReport {
    /// Number of objective function evaluations
    pub funcalls: usize,
    /// Evaluation budget, set when exhausted
    pub max_evals: Option<usize>,
    /// Best value, set when the target value is reached
    pub ftarget: Option<f64>,
    /// Range of the recent values, set when below tolerance
    pub ftol: Option<f64>,
    /// Step size, set when below tolerance
    pub xtol: Option<f64>,
    /// Number of iterations without improvement, set when too many
    pub stagnation: Option<usize>,
    /// Status of an optimizer which ended abnormally (not a stop criterion)
    pub abnormal: Option<String>,
}

impl TerminationReport {
    /// Whether at least one stop criterion is met
    pub fn is_stopped(&self) -> bool {
        self.max_evals.is_some()
            || self.ftarget.is_some()
            || self.ftol.is_some()
            || self.xtol.is_some()
            || self.stagnation.is_some()
    }
}

/// Result of an optimizer run
#[derive(Clone, Debug)]
pub struct OptimOutcome {
    /// Optimum x value
    pub x_opt: Array1<f64>,
    /// Optimum y value (e.g. f(x_opt))
    pub y_opt: f64,
    /// Why the run ended
    pub report: TerminationReport,
}
