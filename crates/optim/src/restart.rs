//! Multistart maximization: an optimizer is run from random starting points
//! until the evaluation budget is spent or restarts stop improving.
use crate::errors::{OptimError, Result};
use crate::optimizers::{check_continuous, Backend, CmaBackend, GradientBox, MiesBackend, Problem};
use crate::types::{Constraint, Constraints, EvalType, Objective, OptimizerKind};
use crate::Logger;
use acqopt_space::{Sampling, SearchSpace};
use ndarray::Array1;
use ndarray_stats::QuantileExt;
use serde::{Deserialize, Serialize};
use std::fmt;

impl OptimizerKind {
    /// Backend running this kind of optimizer with default settings
    pub fn backend(self) -> Box<dyn Backend> {
        match self {
            OptimizerKind::GradientBox => Box::<GradientBox>::default(),
            OptimizerKind::CovarianceAdaptation => Box::<CmaBackend>::default(),
            OptimizerKind::MixedInteger => Box::<MiesBackend>::default(),
        }
    }
}

/// Multistart optimization configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestartConfig {
    /// Format of the points given to constraint functions
    pub eval_type: EvalType,
    /// Evaluation budget shared by all restarts
    pub max_evals: usize,
    /// Max number of restarts
    pub n_restart: usize,
    /// Number of consecutive restarts without improvement before stopping
    pub wait_iter: usize,
    /// Optimizer run from each restart
    pub optimizer: OptimizerKind,
}

impl Default for RestartConfig {
    fn default() -> Self {
        RestartConfig {
            eval_type: EvalType::List,
            max_evals: 100,
            n_restart: 10,
            wait_iter: 3,
            optimizer: OptimizerKind::GradientBox,
        }
    }
}

impl RestartConfig {
    /// Sets the format of the points given to constraint functions
    pub fn eval_type(mut self, eval_type: EvalType) -> Self {
        self.eval_type = eval_type;
        self
    }

    /// Sets the evaluation budget
    pub fn max_evals(mut self, max_evals: usize) -> Self {
        self.max_evals = max_evals;
        self
    }

    /// Sets the max number of restarts
    pub fn n_restart(mut self, n_restart: usize) -> Self {
        self.n_restart = n_restart;
        self
    }

    /// Sets the number of restarts without improvement before stopping
    pub fn wait_iter(mut self, wait_iter: usize) -> Self {
        self.wait_iter = wait_iter;
        self
    }

    /// Sets the optimizer run from each restart
    pub fn optimizer(mut self, optimizer: OptimizerKind) -> Self {
        self.optimizer = optimizer;
        self
    }

    /// Checks the configuration is valid
    pub fn check(&self) -> Result<()> {
        if self.max_evals == 0 {
            return Err(OptimError::InvalidConfig(
                "max_evals should be positive".to_string(),
            ));
        }
        if self.n_restart == 0 {
            return Err(OptimError::InvalidConfig(
                "n_restart should be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Maps an optimizer kind to the backend run from each restart
pub type BackendFactory = Box<dyn Fn(OptimizerKind) -> Box<dyn Backend>>;

/// Multistart maximizer of an objective function over a search space
///
/// ```
/// use acqopt::{Objective, OptimizerKind, RestartConfig, RestartController};
/// use acqopt_space::SearchSpace;
/// use ndarray::array;
///
/// let space = SearchSpace::continuous(&array![[-5., 5.]]).unwrap().with_seed(42);
/// let objective = Objective::new(|x: &[f64]| -(x[0] - 1.).powi(2));
/// let config = RestartConfig::default()
///     .max_evals(200)
///     .optimizer(OptimizerKind::CovarianceAdaptation);
/// let (x, f) = RestartController::new(config)
///     .optimize(&objective, &space, None, None)
///     .expect("multistart maximization");
/// assert!((x[0] - 1.).abs() < 1e-1);
/// assert!(f <= 0.);
/// ```
pub struct RestartController {
    config: RestartConfig,
    logger: Option<Logger>,
    backends: BackendFactory,
}

impl fmt::Debug for RestartController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestartController")
            .field("config", &self.config)
            .field("logger", &self.logger)
            .finish()
    }
}

impl RestartController {
    /// Constructor given the configuration, backends use their default settings
    pub fn new(config: RestartConfig) -> Self {
        RestartController {
            config,
            logger: None,
            backends: Box::new(OptimizerKind::backend),
        }
    }

    /// Sets the logger handle used to report restarts
    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Sets the mapping from optimizer kinds to backends
    pub fn with_backends(
        mut self,
        backends: impl Fn(OptimizerKind) -> Box<dyn Backend> + 'static,
    ) -> Self {
        self.backends = Box::new(backends);
        self
    }

    /// Configuration
    pub fn config(&self) -> &RestartConfig {
        &self.config
    }

    /// Maximizes `objective` over `space` subject to optional equality constraints `h(x) = 0`
    /// and inequality constraints `g(x) <= 0`.
    ///
    /// Returns the best point and value over all restarts, the earliest one on ties.
    pub fn optimize(
        &self,
        objective: &Objective,
        space: &SearchSpace,
        h: Option<Constraint>,
        g: Option<Constraint>,
    ) -> Result<(Array1<f64>, f64)> {
        self.config.check()?;
        let eval_type = self.config.eval_type;
        let eq = h
            .map(|h| h.resolve(eval_type, space.var_names()))
            .transpose()?;
        let ineq = g
            .map(|g| g.resolve(eval_type, space.var_names()))
            .transpose()?;
        let constraints = Constraints::new(eq, ineq);

        let mut kind = self.config.optimizer;
        if !constraints.is_empty() && kind == OptimizerKind::GradientBox {
            self.debug("constraints given, GradientBox replaced by CovarianceAdaptation");
            kind = OptimizerKind::CovarianceAdaptation;
        }
        if kind == OptimizerKind::GradientBox {
            check_continuous(space)?;
        }
        let mut backend = (self.backends)(kind);
        let problem = Problem {
            objective,
            space,
            constraints: &constraints,
            logger: self.logger.as_ref(),
        };

        let mut budget = self.config.max_evals as i64;
        let mut best = f64::NEG_INFINITY;
        let mut wait_count = 0;
        let mut xopt = Vec::with_capacity(self.config.n_restart);
        let mut fopt = Vec::with_capacity(self.config.n_restart);
        for iteration in 0..self.config.n_restart {
            let x0 = space.sample(1, Sampling::Uniform).row(0).to_owned();
            let res = backend.optimize(&problem, &x0, budget as usize)?;
            if res.y_opt > best {
                best = res.y_opt;
                wait_count = 0;
                self.debug(format_args!(
                    "restart : {} - funcalls : {} - Fopt : {}",
                    iteration + 1,
                    res.report.funcalls,
                    res.y_opt
                ));
            } else {
                wait_count += 1;
            }
            budget -= res.report.funcalls as i64;
            xopt.push(res.x_opt);
            fopt.push(res.y_opt);
            if budget <= 0 || wait_count >= self.config.wait_iter {
                break;
            }
        }

        let values: Array1<f64> = fopt
            .iter()
            .map(|&v| if v.is_nan() { f64::NEG_INFINITY } else { v })
            .collect();
        let best_idx = values
            .argmax()
            .map_err(|err| OptimError::InvalidConfig(format!("no restart result ({err})")))?;
        Ok((xopt.swap_remove(best_idx), fopt[best_idx]))
    }

    fn debug(&self, msg: impl fmt::Display) {
        if let Some(logger) = &self.logger {
            logger.debug(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OptimOutcome, TerminationReport};
    use acqopt_space::XType;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use std::collections::BTreeMap;
    use std::sync::{Arc, Mutex};

    /// Records (kind, budget given, violation at a probe point) for each backend call
    type Calls = Arc<Mutex<Vec<(OptimizerKind, usize, f64)>>>;

    struct Scripted {
        kind: OptimizerKind,
        values: Vec<f64>,
        funcalls: usize,
        calls: Calls,
    }

    impl Backend for Scripted {
        fn optimize(
            &mut self,
            problem: &Problem<'_>,
            _x0: &Array1<f64>,
            max_evals: usize,
        ) -> Result<OptimOutcome> {
            let violation = problem.constraints.violation(&[0.5, 1.]);
            let mut calls = self.calls.lock().unwrap();
            let y = self.values[calls.len()];
            calls.push((self.kind, max_evals, violation));
            Ok(OptimOutcome {
                x_opt: array![y, 0.],
                y_opt: y,
                report: TerminationReport {
                    funcalls: self.funcalls,
                    ..Default::default()
                },
            })
        }
    }

    fn scripted(values: &[f64], funcalls: usize) -> (impl Fn(OptimizerKind) -> Box<dyn Backend>, Calls) {
        let calls = Calls::default();
        let values = values.to_vec();
        let recorded = calls.clone();
        let factory = move |kind: OptimizerKind| -> Box<dyn Backend> {
            Box::new(Scripted {
                kind,
                values: values.clone(),
                funcalls,
                calls: recorded.clone(),
            })
        };
        (factory, calls)
    }

    fn space() -> SearchSpace {
        SearchSpace::continuous(&array![[-1., 1.], [-1., 1.]])
            .unwrap()
            .with_seed(42)
    }

    fn objective() -> Objective {
        Objective::new(|x: &[f64]| -argmin_testfunctions::sphere(x))
    }

    #[test]
    fn test_returns_best_restart() {
        let (factory, calls) = scripted(&[1., 5., 3.], 1);
        let config = RestartConfig::default().n_restart(3).wait_iter(10);
        let (x, f) = RestartController::new(config)
            .with_backends(factory)
            .optimize(&objective(), &space(), None, None)
            .unwrap();
        assert_eq!(f, 5.);
        assert_eq!(x, array![5., 0.]);
        assert_eq!(calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_ties_keep_earliest_and_nan_is_worst() {
        let (factory, _) = scripted(&[f64::NAN, 2., 2.], 1);
        let config = RestartConfig::default().n_restart(3).wait_iter(10);
        let (_, f) = RestartController::new(config)
            .with_backends(factory)
            .optimize(&objective(), &space(), None, None)
            .unwrap();
        assert_eq!(f, 2.);
    }

    #[test]
    fn test_nan_only_restart_returns_its_value() {
        let (factory, _) = scripted(&[f64::NAN], 1);
        let (x, f) = RestartController::new(RestartConfig::default().n_restart(1))
            .with_backends(factory)
            .optimize(&objective(), &space(), None, None)
            .unwrap();
        assert!(f.is_nan());
        assert!(x[0].is_nan());
    }

    #[test]
    fn test_stall_stops_restarts() {
        let (factory, calls) = scripted(&[5., 4., 4., 9.], 1);
        let config = RestartConfig::default().n_restart(10).wait_iter(2);
        let (_, f) = RestartController::new(config)
            .with_backends(factory)
            .optimize(&objective(), &space(), None, None)
            .unwrap();
        assert_eq!(f, 5.);
        assert_eq!(calls.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_at_least_one_restart() {
        let (factory, calls) = scripted(&[-3.], 1);
        let config = RestartConfig::default().wait_iter(0);
        let (_, f) = RestartController::new(config)
            .with_backends(factory)
            .optimize(&objective(), &space(), None, None)
            .unwrap();
        assert_eq!(f, -3.);
        assert_eq!(calls.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_budget_is_shared() {
        let (factory, calls) = scripted(&[1., 2., 3., 4., 5.], 10);
        let config = RestartConfig::default().max_evals(25).n_restart(5);
        RestartController::new(config)
            .with_backends(factory)
            .optimize(&objective(), &space(), None, None)
            .unwrap();
        let budgets: Vec<usize> = calls.lock().unwrap().iter().map(|c| c.1).collect();
        assert_eq!(budgets, vec![25, 15, 5]);
        // consumed 30 = budget + overshoot of the last restart
        assert!(budgets.len() * 10 <= 25 + 10);
    }

    #[test]
    fn test_constraints_switch_to_covariance_adaptation() {
        let (factory, calls) = scripted(&[1.], 1);
        let config = RestartConfig::default().n_restart(1);
        RestartController::new(config)
            .with_backends(factory)
            .optimize(
                &objective(),
                &space(),
                None,
                Some(Constraint::positional(|x: &[f64]| vec![x[0] + x[1] - 1.])),
            )
            .unwrap();
        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].0, OptimizerKind::CovarianceAdaptation);
        assert_abs_diff_eq!(calls[0].2, 0.5);
    }

    #[test]
    fn test_gradient_box_rejects_categorical() {
        let (factory, calls) = scripted(&[1.], 1);
        let space = SearchSpace::new(&[XType::Float(0., 1.), XType::Enum(3)]).unwrap();
        let res = RestartController::new(RestartConfig::default())
            .with_backends(factory)
            .optimize(&objective(), &space, None, None);
        assert!(matches!(
            res,
            Err(OptimError::InvalidVariableType { index: 1, .. })
        ));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_named_constraints() {
        let (factory, calls) = scripted(&[1.], 1);
        let space = space().with_names(["a", "b"]).unwrap();
        let config = RestartConfig::default()
            .n_restart(1)
            .eval_type(EvalType::Dict)
            .optimizer(OptimizerKind::MixedInteger);
        let h = Constraint::named(|x: &BTreeMap<String, f64>| vec![x["b"] - x["a"]]);
        RestartController::new(config.clone())
            .with_backends(factory)
            .optimize(&objective(), &space, Some(h), None)
            .unwrap();
        let calls = calls.lock().unwrap();
        assert_eq!(calls[0].0, OptimizerKind::MixedInteger);
        assert_abs_diff_eq!(calls[0].2, 0.5);

        let positional = Constraint::positional(|x: &[f64]| vec![x[0]]);
        let res = RestartController::new(config).optimize(&objective(), &space, Some(positional), None);
        assert!(matches!(res, Err(OptimError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_config() {
        let (factory, calls) = scripted(&[1.], 1);
        let res = RestartController::new(RestartConfig::default().n_restart(0))
            .with_backends(factory)
            .optimize(&objective(), &space(), None, None);
        assert!(matches!(res, Err(OptimError::InvalidConfig(_))));
        let res = RestartController::new(RestartConfig::default().max_evals(0))
            .optimize(&objective(), &space(), None, None);
        assert!(matches!(res, Err(OptimError::InvalidConfig(_))));
        assert!(calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_config_from_json() {
        let config: RestartConfig =
            serde_json::from_str(r#"{"max_evals": 50, "optimizer": "MixedInteger"}"#).unwrap();
        assert_eq!(
            config,
            RestartConfig::default()
                .max_evals(50)
                .optimizer(OptimizerKind::MixedInteger)
        );
    }

    #[test]
    fn test_gradient_box_restarts() {
        let space = SearchSpace::continuous(&array![[-5., 5.]]).unwrap().with_seed(0);
        let objective = Objective::new(|x: &[f64]| -(x[0] - 1.).powi(2));
        let (x, f) = RestartController::new(RestartConfig::default().max_evals(300))
            .with_logger(Logger::default())
            .optimize(&objective, &space, None, None)
            .expect("multistart gradient-box maximization");
        assert_abs_diff_eq!(x[0], 1., epsilon = 1e-4);
        assert_abs_diff_eq!(f, 0., epsilon = 1e-6);
    }

    #[test]
    fn test_mies_restarts_on_mixed_space() {
        let space = SearchSpace::new(&[XType::Float(-3., 3.), XType::Int(-3, 3)])
            .unwrap()
            .with_seed(1);
        let objective = Objective::new(|x: &[f64]| -(x[0] - 1.).powi(2) - (x[1] + 2.).abs());
        let config = RestartConfig::default()
            .max_evals(1000)
            .optimizer(OptimizerKind::MixedInteger);
        let (x, f) = RestartController::new(config)
            .optimize(&objective, &space, None, None)
            .expect("multistart MIES maximization");
        assert_eq!(x[1], -2.);
        assert!(f > -0.1, "f = {f}");
    }
}
